use serde::Deserialize;

use super::{Built, DEFAULT_COLOR, NavLayer};
use crate::{
    math::Pose,
    msgs::geometry_msgs::PoseStamped,
    scene::{Object3D, Resources, Rgba, object::ArrowShape, shapes},
};

/// Arrow dimensions shared by the pose-like layers.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct ArrowStyle {
    pub length: f64,
    pub head_length: f64,
    pub shaft_diameter: f64,
    pub head_diameter: f64,
    pub color: Rgba,
}

impl Default for ArrowStyle {
    fn default() -> Self {
        Self {
            length: 1.0,
            head_length: 0.2,
            shaft_diameter: 0.05,
            head_diameter: 0.1,
            color: DEFAULT_COLOR,
        }
    }
}

impl ArrowStyle {
    /// An arrow along +X, placed at `pose`.
    pub fn build(&self, resources: &Resources, pose: &Pose) -> Object3D {
        let shape = ArrowShape {
            length: self.length,
            head_length: self.head_length,
            shaft_diameter: self.shaft_diameter,
            head_diameter: self.head_diameter,
            ..Default::default()
        };
        shapes::arrow(resources, shape, self.color).with_pose(pose)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PoseConfig {
    pub topic: String,
    #[serde(flatten)]
    pub arrow: ArrowStyle,
}

impl Default for PoseConfig {
    fn default() -> Self {
        Self {
            topic: "/pose".to_owned(),
            arrow: ArrowStyle::default(),
        }
    }
}

/// `geometry_msgs/PoseStamped` as a single arrow.
pub struct PoseLayer {
    config: PoseConfig,
}

impl PoseLayer {
    pub fn new(config: PoseConfig) -> Self {
        Self { config }
    }
}

impl NavLayer for PoseLayer {
    type Message = PoseStamped;

    fn topic(&self) -> &str {
        &self.config.topic
    }

    fn message_type(&self) -> &'static str {
        "geometry_msgs/PoseStamped"
    }

    fn build(&mut self, message: &PoseStamped, resources: &Resources) -> Option<Built> {
        Some(Built {
            frame_id: message.header.frame_id.clone(),
            object: self.config.arrow.build(resources, &message.pose.into()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::DVec3;

    #[test]
    fn arrow_sits_at_the_pose() {
        let resources = Resources::new();
        let mut message = PoseStamped::default();
        message.header.frame_id = "base_link".into();
        message.pose.position.y = 2.0;
        let built = PoseLayer::new(PoseConfig::default())
            .build(&message, &resources)
            .unwrap();
        assert_eq!(built.object.position, DVec3::new(0.0, 2.0, 0.0));
        assert_eq!(resources.live_count(), 2);
    }
}
