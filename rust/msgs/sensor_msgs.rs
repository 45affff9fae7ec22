use serde::{Deserialize, Serialize};

use super::std_msgs::{Header, Time};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LaserScan {
    pub header: Header,
    pub angle_min: f32,
    pub angle_max: f32,
    pub angle_increment: f32,
    pub time_increment: f32,
    pub scan_time: f32,
    pub range_min: f32,
    pub range_max: f32,
    pub ranges: Vec<f32>,
    pub intensities: Vec<f32>,
}

pub mod point_field {
    pub const INT8: u8 = 1;
    pub const UINT8: u8 = 2;
    pub const INT16: u8 = 3;
    pub const UINT16: u8 = 4;
    pub const INT32: u8 = 5;
    pub const UINT32: u8 = 6;
    pub const FLOAT32: u8 = 7;
    pub const FLOAT64: u8 = 8;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PointField {
    pub name: String,
    pub offset: u32,
    pub datatype: u8,
    pub count: u32,
}

impl PointField {
    pub fn new(name: &str, offset: u32, datatype: u8) -> Self {
        Self {
            name: name.to_owned(),
            offset,
            datatype,
            count: 1,
        }
    }
}

/// Point cloud payload: raw bytes, or base64 text as rosbridge sends it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PointData {
    Base64(String),
    Binary(Vec<u8>),
}

impl Default for PointData {
    fn default() -> Self {
        Self::Binary(Vec::new())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PointCloud2 {
    pub header: Header,
    pub height: u32,
    pub width: u32,
    pub fields: Vec<PointField>,
    pub is_bigendian: bool,
    pub point_step: u32,
    pub row_step: u32,
    pub data: PointData,
    pub is_dense: bool,
}

impl PointCloud2 {
    pub fn field(&self, name: &str) -> Option<&PointField> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn num_points(&self) -> usize {
        self.height as usize * self.width as usize
    }
}

impl From<edgefirst_schemas::sensor_msgs::PointCloud2> for PointCloud2 {
    fn from(pcd: edgefirst_schemas::sensor_msgs::PointCloud2) -> Self {
        let fields = pcd
            .fields
            .iter()
            .map(|f| PointField::new(&f.name, f.offset as u32, f.datatype as u8))
            .collect();
        Self {
            header: Header {
                stamp: Time {
                    sec: pcd.header.stamp.sec as i32,
                    nanosec: pcd.header.stamp.nanosec as u32,
                },
                frame_id: pcd.header.frame_id.clone(),
            },
            height: pcd.height,
            width: pcd.width,
            fields,
            is_bigendian: pcd.is_bigendian,
            point_step: pcd.point_step,
            row_step: pcd.row_step,
            data: PointData::Binary(pcd.data),
            is_dense: true,
        }
    }
}
