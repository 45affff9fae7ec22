use serde::Deserialize;

use super::format::{ColorFormat, OctreeFormat, PlainFormat, decode_binary, decode_full};
pub use super::format::VoxelColorMode;
use crate::{
    error::{Error, Result},
    logging::Logger,
    msgs::octomap_msgs::Octomap,
    nav::{Built, NavClient, NavLayer},
    scene::{Material, MaterialKind, Object3D, ObjectKind, Resources, Rgba, Shape, object::Instanced},
    sensors::colormap::{self, ColorMap},
};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OctomapConfig {
    pub topic: String,
    pub color: Rgba,
    pub color_mode: VoxelColorMode,
}

impl Default for OctomapConfig {
    fn default() -> Self {
        Self {
            topic: "/octomap_full".to_owned(),
            color: [0.0, 0.6, 1.0, 1.0],
            color_mode: VoxelColorMode::Solid,
        }
    }
}

/// Picks the node format a message declares.
pub fn format_for(map: &Octomap) -> Result<Box<dyn OctreeFormat>> {
    match map.id.as_str() {
        "OcTree" => Ok(Box::new(PlainFormat)),
        "ColorOcTree" if !map.binary => Ok(Box::new(ColorFormat)),
        other => Err(Error::decode(
            "octomap",
            format!("unsupported tree type {other:?} (binary: {})", map.binary),
        )),
    }
}

/// `octomap_msgs/Octomap` as instanced voxels.
pub struct OctomapLayer {
    config: OctomapConfig,
    colormap: ColorMap,
    log: Logger,
}

impl OctomapLayer {
    pub fn new(config: OctomapConfig, log: Logger) -> Self {
        Self {
            config,
            colormap: colormap::turbo(),
            log,
        }
    }

    pub fn with_colormap(mut self, colormap: ColorMap) -> Self {
        self.colormap = colormap;
        self
    }

    fn voxels(&self, map: &Octomap, resources: &Resources) -> Result<Object3D> {
        if !(map.resolution > 0.0) {
            return Err(Error::decode(
                "octomap",
                format!("invalid resolution {}", map.resolution),
            ));
        }
        let format = format_for(map)?;
        let data: Vec<u8> = map.data.iter().map(|&b| b as u8).collect();
        let voxels = if map.binary {
            decode_binary(&data, map.resolution)?
        } else {
            decode_full(&data, map.resolution, format.as_ref())?
        };
        let instances = format.build_instances(
            &voxels,
            self.config.color_mode,
            self.config.color,
            &self.colormap,
        );
        self.log.debug(format_args!(
            "{} voxels from {} bytes of {}",
            instances.len(),
            data.len(),
            format.name()
        ));
        let material = Material::new(resources, MaterialKind::Phong, self.config.color);
        Ok(Object3D::new(
            "voxels",
            ObjectKind::Instanced(Instanced::new(resources, Shape::Cube, instances, material)),
        ))
    }
}

impl NavLayer for OctomapLayer {
    type Message = Octomap;

    fn topic(&self) -> &str {
        &self.config.topic
    }

    fn message_type(&self) -> &'static str {
        "octomap_msgs/Octomap"
    }

    fn build(&mut self, map: &Octomap, resources: &Resources) -> Option<Built> {
        match self.voxels(map, resources) {
            Ok(object) => Some(Built {
                frame_id: map.header.frame_id.clone(),
                object,
            }),
            Err(err) => {
                self.log.warn(format_args!("skipping octomap: {err}"));
                None
            }
        }
    }
}

pub type OctomapClient = NavClient<OctomapLayer>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        tf::{FrameTransformStore, FrameTransformStoreConfig},
        transport::LoopbackTransport,
    };

    fn binary_map() -> Octomap {
        // root with one occupied child
        let mut map = Octomap {
            binary: true,
            id: "OcTree".into(),
            resolution: 0.05,
            data: vec![0b10, 0],
            ..Default::default()
        };
        map.header.frame_id = "map".into();
        map
    }

    #[test]
    fn unsupported_types_are_skipped() {
        let resources = Resources::new();
        let mut layer = OctomapLayer::new(OctomapConfig::default(), Logger::detached("octomap"));
        let mut map = binary_map();
        map.id = "ColorOcTree".into();
        assert!(layer.build(&map, &resources).is_none());
        map.id = "CountingOcTree".into();
        map.binary = false;
        assert!(layer.build(&map, &resources).is_none());
        assert_eq!(resources.live_count(), 0);
    }

    #[test]
    fn client_draws_the_latest_map() {
        let transport = LoopbackTransport::new(Logger::detached("transport"));
        let store = FrameTransformStore::new(
            FrameTransformStoreConfig::default(),
            Logger::detached("tf"),
        );
        let resources = Resources::new();
        let client = OctomapClient::new(
            OctomapLayer::new(OctomapConfig::default(), Logger::detached("octomap")),
            transport.clone(),
            store,
            resources.clone(),
            Logger::detached("octomap"),
        );
        transport.inject("/octomap_full", serde_json::to_value(binary_map()).unwrap());
        transport.dispatch_pending();

        let count = client.with_node(|node| {
            node.with_child(|child| match &child.kind {
                ObjectKind::Instanced(instanced) => instanced.instances.len(),
                _ => 0,
            })
        });
        assert_eq!(count, Some(Some(1)));
        drop(client);
        assert_eq!(resources.live_count(), 0);
    }
}
