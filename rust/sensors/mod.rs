//! Streaming sensor layers: laser scans, point clouds and occupancy maps.

pub mod buffer;
pub mod colormap;
pub mod laser_scan;
pub mod occupancy_grid;
pub mod point_cloud;
pub mod points;

pub use buffer::StreamingPointBuffer;
pub use laser_scan::{LaserScanClient, LaserScanConfig, LaserScanDecoder};
pub use occupancy_grid::{OccupancyGridClient, OccupancyGridConfig};
pub use point_cloud::{PointCloud2Client, PointCloud2Config, PointCloudDecoder};
pub use points::{PointsConfig, PointsLayer};
