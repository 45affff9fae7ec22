//! Node payloads and tree walks for the two octomap serializations.

use glam::DVec3;
use serde::Deserialize;

use super::{
    CLAMPING_THRES_MAX, CLAMPING_THRES_MIN, OCCUPANCY_THRESHOLD, OcTreeKey, TREE_DEPTH, Voxel,
    node_size, probability, reader::ByteReader,
};
use crate::{
    error::{Error, Result},
    scene::{Rgba, object::Instance},
    sensors::colormap::{self, ColorMap},
};

const BINARY_FREE: u16 = 0b01;
const BINARY_OCCUPIED: u16 = 0b10;
const BINARY_INNER: u16 = 0b11;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoxelColorMode {
    /// Every voxel takes the configured color.
    #[default]
    Solid,
    /// Voxels are colored by height over the decoded extent.
    Height,
    /// Colors stored in the tree, when it has any.
    Node,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NodeValue {
    pub log_odds: f32,
    pub color: Option<[u8; 3]>,
}

/// What a tree stores per node, and how its leaves turn into instances.
pub trait OctreeFormat {
    fn name(&self) -> &'static str;

    fn decode_node(&self, reader: &mut ByteReader<'_>) -> Result<NodeValue>;

    fn build_instances(
        &self,
        voxels: &[Voxel],
        mode: VoxelColorMode,
        color: Rgba,
        colormap: &ColorMap,
    ) -> Vec<Instance> {
        match mode {
            VoxelColorMode::Height => height_colored(voxels, color[3], colormap),
            VoxelColorMode::Solid | VoxelColorMode::Node => solid(voxels),
        }
    }
}

/// `OcTree`: a float32 log-odds per node.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainFormat;

impl OctreeFormat for PlainFormat {
    fn name(&self) -> &'static str {
        "OcTree"
    }

    fn decode_node(&self, reader: &mut ByteReader<'_>) -> Result<NodeValue> {
        Ok(NodeValue {
            log_odds: reader.read_f32()?,
            color: None,
        })
    }
}

/// `ColorOcTree`: log-odds followed by an 8-bit RGB triple.
#[derive(Debug, Clone, Copy, Default)]
pub struct ColorFormat;

impl OctreeFormat for ColorFormat {
    fn name(&self) -> &'static str {
        "ColorOcTree"
    }

    fn decode_node(&self, reader: &mut ByteReader<'_>) -> Result<NodeValue> {
        let log_odds = reader.read_f32()?;
        let color = reader.read_rgb()?;
        Ok(NodeValue {
            log_odds,
            color: Some(color),
        })
    }

    fn build_instances(
        &self,
        voxels: &[Voxel],
        mode: VoxelColorMode,
        color: Rgba,
        colormap: &ColorMap,
    ) -> Vec<Instance> {
        match mode {
            VoxelColorMode::Node => voxels
                .iter()
                .map(|voxel| Instance {
                    color: voxel.color.map(|[r, g, b]| {
                        [
                            f32::from(r) / 255.0,
                            f32::from(g) / 255.0,
                            f32::from(b) / 255.0,
                            color[3],
                        ]
                    }),
                    ..instance(voxel)
                })
                .collect(),
            VoxelColorMode::Height => height_colored(voxels, color[3], colormap),
            VoxelColorMode::Solid => solid(voxels),
        }
    }
}

fn instance(voxel: &Voxel) -> Instance {
    Instance {
        position: voxel.center,
        size: DVec3::splat(voxel.size),
        color: None,
    }
}

fn solid(voxels: &[Voxel]) -> Vec<Instance> {
    voxels.iter().map(instance).collect()
}

fn height_colored(voxels: &[Voxel], alpha: f32, colormap: &ColorMap) -> Vec<Instance> {
    let (min, max) = voxels.iter().fold((f64::MAX, f64::MIN), |(lo, hi), v| {
        (lo.min(v.center.z), hi.max(v.center.z))
    });
    voxels
        .iter()
        .map(|voxel| {
            let t = colormap::normalize(voxel.center.z as f32, min as f32, max as f32);
            let [r, g, b] = colormap(t);
            Instance {
                color: Some([r, g, b, alpha]),
                ..instance(voxel)
            }
        })
        .collect()
}

fn push_leaf(
    out: &mut Vec<Voxel>,
    key: OcTreeKey,
    depth: u32,
    resolution: f64,
    value: NodeValue,
) {
    let occupancy = probability(value.log_odds);
    if occupancy > OCCUPANCY_THRESHOLD {
        out.push(Voxel {
            center: key.center(depth, resolution),
            size: node_size(depth, resolution),
            occupancy,
            color: value.color,
        });
    }
}

/// Decodes a full (`binary = false`) tree: every node carries its payload
/// and an 8-bit child mask, depth first from the root.
pub fn decode_full(
    data: &[u8],
    resolution: f64,
    format: &dyn OctreeFormat,
) -> Result<Vec<Voxel>> {
    let mut voxels = Vec::new();
    if data.is_empty() {
        return Ok(voxels);
    }
    let mut reader = ByteReader::new(data);
    read_full_node(
        &mut reader,
        format,
        OcTreeKey::ROOT,
        0,
        resolution,
        &mut voxels,
    )?;
    Ok(voxels)
}

fn read_full_node(
    reader: &mut ByteReader<'_>,
    format: &dyn OctreeFormat,
    key: OcTreeKey,
    depth: u32,
    resolution: f64,
    out: &mut Vec<Voxel>,
) -> Result<()> {
    let value = format.decode_node(reader)?;
    let children = reader.read_u8()?;
    if children == 0 {
        push_leaf(out, key, depth, resolution, value);
        return Ok(());
    }
    if depth >= TREE_DEPTH {
        return Err(Error::decode(
            format.name(),
            format!("node at byte {} is deeper than the tree", reader.position()),
        ));
    }
    for index in 0..8u8 {
        if children & (1 << index) != 0 {
            read_full_node(
                reader,
                format,
                key.child(index, depth),
                depth + 1,
                resolution,
                out,
            )?;
        }
    }
    Ok(())
}

/// Decodes a binary (`binary = true`) tree: two bits per child, occupancy
/// only. Leaves take the clamping log-odds octomap writes them with.
pub fn decode_binary(data: &[u8], resolution: f64) -> Result<Vec<Voxel>> {
    let mut voxels = Vec::new();
    if data.is_empty() {
        return Ok(voxels);
    }
    let mut reader = ByteReader::new(data);
    read_binary_node(&mut reader, OcTreeKey::ROOT, 0, resolution, &mut voxels)?;
    Ok(voxels)
}

fn read_binary_node(
    reader: &mut ByteReader<'_>,
    key: OcTreeKey,
    depth: u32,
    resolution: f64,
    out: &mut Vec<Voxel>,
) -> Result<()> {
    let codes = u16::from(reader.read_u8()?) | u16::from(reader.read_u8()?) << 8;
    let mut inner = Vec::new();
    for index in 0..8u8 {
        let child = key.child(index, depth);
        let log_odds = match (codes >> (2 * index)) & 0b11 {
            BINARY_FREE => CLAMPING_THRES_MIN,
            BINARY_OCCUPIED => CLAMPING_THRES_MAX,
            BINARY_INNER => {
                inner.push(child);
                continue;
            }
            _ => continue,
        };
        let value = NodeValue {
            log_odds,
            color: None,
        };
        push_leaf(out, child, depth + 1, resolution, value);
    }
    if !inner.is_empty() && depth + 1 >= TREE_DEPTH {
        return Err(Error::decode(
            "OcTree",
            format!("node at byte {} is deeper than the tree", reader.position()),
        ));
    }
    for child in inner {
        read_binary_node(reader, child, depth + 1, resolution, out)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensors::colormap;

    /// Writes a full-format node path: inner nodes along child `index`
    /// down to `leaf_depth`, then a leaf with `log_odds`.
    fn full_chain(leaf_depth: u32, index: u8, log_odds: f32, color: Option<[u8; 3]>) -> Vec<u8> {
        let mut data = Vec::new();
        for _ in 0..leaf_depth {
            data.extend_from_slice(&0.0f32.to_le_bytes());
            if let Some(rgb) = color {
                data.extend_from_slice(&rgb);
            }
            data.push(1 << index);
        }
        data.extend_from_slice(&log_odds.to_le_bytes());
        if let Some(rgb) = color {
            data.extend_from_slice(&rgb);
        }
        data.push(0);
        data
    }

    #[test]
    fn full_tree_emits_occupied_leaves_only() {
        let occupied = full_chain(TREE_DEPTH, 7, 2.0, None);
        let voxels = decode_full(&occupied, 0.1, &PlainFormat).unwrap();
        assert_eq!(voxels.len(), 1);
        assert!((voxels[0].size - 0.1).abs() < 1e-12);
        assert!(voxels[0].center.abs_diff_eq(DVec3::splat(3276.75), 1e-9));

        let free = full_chain(TREE_DEPTH, 7, -1.0, None);
        assert!(decode_full(&free, 0.1, &PlainFormat).unwrap().is_empty());

        // exactly one half is not above the threshold
        let even = full_chain(3, 0, 0.0, None);
        assert!(decode_full(&even, 0.1, &PlainFormat).unwrap().is_empty());
    }

    #[test]
    fn pruned_leaves_cover_larger_cells() {
        let data = full_chain(14, 7, 3.0, None);
        let voxels = decode_full(&data, 0.5, &PlainFormat).unwrap();
        assert_eq!(voxels.len(), 1);
        assert_eq!(voxels[0].size, 2.0);
    }

    #[test]
    fn color_tree_reads_node_colors() {
        let data = full_chain(2, 0, 3.0, Some([255, 0, 51]));
        let voxels = decode_full(&data, 0.1, &ColorFormat).unwrap();
        assert_eq!(voxels[0].color, Some([255, 0, 51]));

        let instances = ColorFormat.build_instances(
            &voxels,
            VoxelColorMode::Node,
            [1.0; 4],
            &colormap::turbo(),
        );
        assert_eq!(instances[0].color, Some([1.0, 0.0, 0.2, 1.0]));

        let plain = PlainFormat.build_instances(
            &voxels,
            VoxelColorMode::Node,
            [1.0; 4],
            &colormap::turbo(),
        );
        assert_eq!(plain[0].color, None);
    }

    #[test]
    fn truncated_and_too_deep_trees_are_errors() {
        let mut data = full_chain(3, 1, 3.0, None);
        data.pop();
        assert!(decode_full(&data, 0.1, &PlainFormat).is_err());

        let too_deep = full_chain(TREE_DEPTH + 1, 1, 3.0, None);
        assert!(decode_full(&too_deep, 0.1, &PlainFormat).is_err());
    }

    #[test]
    fn binary_tree_uses_two_bit_child_codes() {
        // root: child 0 occupied, child 1 free, child 2 inner
        let root: u16 = BINARY_OCCUPIED | BINARY_FREE << 2 | BINARY_INNER << 4;
        // that inner node: child 7 occupied
        let inner: u16 = BINARY_OCCUPIED << 14;
        let mut data = root.to_le_bytes().to_vec();
        data.extend_from_slice(&inner.to_le_bytes());

        let voxels = decode_binary(&data, 1.0).unwrap();
        assert_eq!(voxels.len(), 2);
        assert_eq!(voxels[0].size, node_size(1, 1.0));
        assert_eq!(voxels[1].size, node_size(2, 1.0));
        assert!(voxels.iter().all(|v| v.occupancy > OCCUPANCY_THRESHOLD));
        assert!(voxels[1].center.y > 0.0 && voxels[1].center.x < 0.0);
    }

    #[test]
    fn height_mode_spans_the_colormap() {
        let voxels: Vec<Voxel> = [0.0, 1.0]
            .iter()
            .map(|&z| Voxel {
                center: DVec3::new(0.0, 0.0, z),
                size: 1.0,
                occupancy: 1.0,
                color: None,
            })
            .collect();
        let instances = PlainFormat.build_instances(
            &voxels,
            VoxelColorMode::Height,
            [1.0, 1.0, 1.0, 0.5],
            &colormap::grayscale(),
        );
        assert_eq!(instances[0].color, Some([0.0, 0.0, 0.0, 0.5]));
        assert_eq!(instances[1].color, Some([1.0, 1.0, 1.0, 0.5]));
    }
}
