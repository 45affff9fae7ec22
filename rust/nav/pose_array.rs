use serde::Deserialize;

use super::{Built, NavLayer, pose::ArrowStyle};
use crate::{
    msgs::geometry_msgs::PoseArray,
    scene::{Object3D, Resources},
};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PoseArrayConfig {
    pub topic: String,
    #[serde(flatten)]
    pub arrow: ArrowStyle,
}

impl Default for PoseArrayConfig {
    fn default() -> Self {
        Self {
            topic: "/particlecloud".to_owned(),
            arrow: ArrowStyle::default(),
        }
    }
}

/// `geometry_msgs/PoseArray` as one arrow per pose.
pub struct PoseArrayLayer {
    config: PoseArrayConfig,
}

impl PoseArrayLayer {
    pub fn new(config: PoseArrayConfig) -> Self {
        Self { config }
    }
}

impl NavLayer for PoseArrayLayer {
    type Message = PoseArray;

    fn topic(&self) -> &str {
        &self.config.topic
    }

    fn message_type(&self) -> &'static str {
        "geometry_msgs/PoseArray"
    }

    fn build(&mut self, message: &PoseArray, resources: &Resources) -> Option<Built> {
        let object = message
            .poses
            .iter()
            .fold(Object3D::group("poses"), |group, pose| {
                group.with_child(self.config.arrow.build(resources, &(*pose).into()))
            });
        Some(Built {
            frame_id: message.header.frame_id.clone(),
            object,
        })
    }
}
