//! Sparse voxel octrees in the octomap serialization.
//!
//! Trees are 16 levels deep. A node is addressed by an integer key per axis,
//! centered on [`TREE_MAX_VAL`], so the root covers the whole key space and
//! each level halves the cell size down to the map resolution.

pub mod client;
pub mod format;
pub mod reader;

use glam::DVec3;

pub use client::{OctomapClient, OctomapConfig, OctomapLayer, VoxelColorMode};
pub use format::{ColorFormat, OctreeFormat, PlainFormat, decode_binary, decode_full};

pub const TREE_DEPTH: u32 = 16;
pub const TREE_MAX_VAL: u32 = 1 << (TREE_DEPTH - 1);

/// Leaves whose occupancy probability does not exceed this are not drawn.
pub const OCCUPANCY_THRESHOLD: f32 = 0.5;

/// Log-odds written for occupied leaves of binary trees.
pub const CLAMPING_THRES_MAX: f32 = 3.5;
/// Log-odds written for free leaves of binary trees.
pub const CLAMPING_THRES_MIN: f32 = -2.0;

pub fn probability(log_odds: f32) -> f32 {
    1.0 - 1.0 / (1.0 + log_odds.exp())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OcTreeKey(pub [u32; 3]);

impl OcTreeKey {
    pub const ROOT: Self = Self([TREE_MAX_VAL; 3]);

    /// Key of child `index` (bit 0: x, bit 1: y, bit 2: z) of the node at
    /// `depth`.
    pub fn child(&self, index: u8, depth: u32) -> Self {
        let offset = TREE_MAX_VAL >> (depth + 1);
        let step = |axis: usize, bit: u8| {
            let parent = self.0[axis];
            if index & bit != 0 {
                parent + offset
            } else {
                // at the last level the offset is 0 and the low child is one key down
                parent - offset - u32::from(offset == 0)
            }
        };
        Self([step(0, 1), step(1, 2), step(2, 4)])
    }

    pub fn center(&self, depth: u32, resolution: f64) -> DVec3 {
        DVec3::new(
            key_to_coord(self.0[0], depth, resolution),
            key_to_coord(self.0[1], depth, resolution),
            key_to_coord(self.0[2], depth, resolution),
        )
    }
}

/// Edge length of a node at `depth`.
pub fn node_size(depth: u32, resolution: f64) -> f64 {
    resolution * f64::from(1u32 << (TREE_DEPTH - depth.min(TREE_DEPTH)))
}

/// Center coordinate of the cell holding `key` at `depth`.
pub fn key_to_coord(key: u32, depth: u32, resolution: f64) -> f64 {
    let relative = f64::from(key) - f64::from(TREE_MAX_VAL);
    if depth >= TREE_DEPTH {
        return (relative + 0.5) * resolution;
    }
    let cells = f64::from(1u32 << (TREE_DEPTH - depth));
    ((relative / cells).floor() + 0.5) * node_size(depth, resolution)
}

/// One drawable leaf.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Voxel {
    pub center: DVec3,
    pub size: f64,
    pub occupancy: f32,
    pub color: Option<[u8; 3]>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descending_one_corner_reaches_the_edge_of_the_key_space() {
        let descend = |first: u8, rest: u8| {
            let mut key = OcTreeKey::ROOT.child(first, 0);
            for depth in 1..TREE_DEPTH {
                key = key.child(rest, depth);
            }
            key
        };
        let low = descend(0, 0);
        assert_eq!(low, OcTreeKey([0; 3]));
        assert!(low.center(TREE_DEPTH, 0.1).abs_diff_eq(DVec3::splat(-3276.75), 1e-9));

        let high = descend(7, 7);
        assert_eq!(high, OcTreeKey([2 * TREE_MAX_VAL - 1; 3]));

        // first cell on the positive side of the origin
        let inner = descend(7, 0);
        assert_eq!(inner, OcTreeKey::ROOT);
        assert!(inner.center(TREE_DEPTH, 0.1).abs_diff_eq(DVec3::splat(0.05), 1e-12));
    }

    #[test]
    fn coarse_nodes_are_centered_in_their_cell() {
        let key = OcTreeKey::ROOT.child(1, 0);
        assert_eq!(node_size(1, 1.0), 32768.0);
        assert_eq!(key_to_coord(key.0[0], 1, 1.0), 16384.0);
        assert_eq!(key_to_coord(key.0[1], 1, 1.0), -16384.0);
    }

    #[test]
    fn probability_crosses_one_half_at_zero() {
        assert_eq!(probability(0.0), 0.5);
        assert!(probability(CLAMPING_THRES_MAX) > OCCUPANCY_THRESHOLD);
        assert!(probability(CLAMPING_THRES_MIN) < OCCUPANCY_THRESHOLD);
    }
}
