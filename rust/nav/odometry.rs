use std::collections::VecDeque;

use serde::Deserialize;

use super::{Built, NavLayer, pose::ArrowStyle};
use crate::{
    math::Pose,
    msgs::nav_msgs::Odometry,
    scene::{Object3D, Resources},
};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OdometryConfig {
    pub topic: String,
    /// Number of arrows kept on screen.
    pub keep: usize,
    /// A new pose closer than both tolerances to the last one is dropped.
    pub length_tolerance: f64,
    pub angle_tolerance: f64,
    #[serde(flatten)]
    pub arrow: ArrowStyle,
}

impl Default for OdometryConfig {
    fn default() -> Self {
        Self {
            topic: "/odom".to_owned(),
            keep: 1,
            length_tolerance: 1.0,
            angle_tolerance: 0.1,
            arrow: ArrowStyle::default(),
        }
    }
}

/// `nav_msgs/Odometry` as a trail of the last `keep` poses.
pub struct OdometryLayer {
    config: OdometryConfig,
    trail: VecDeque<Pose>,
}

impl OdometryLayer {
    pub fn new(config: OdometryConfig) -> Self {
        Self {
            config,
            trail: VecDeque::new(),
        }
    }

    pub fn trail(&self) -> impl Iterator<Item = &Pose> {
        self.trail.iter()
    }

    fn is_new(&self, pose: &Pose) -> bool {
        let Some(last) = self.trail.back() else {
            return true;
        };
        let distance = last.position.distance(pose.position);
        let angle = last.orientation.angle_between(pose.orientation);
        distance >= self.config.length_tolerance || angle >= self.config.angle_tolerance
    }
}

impl NavLayer for OdometryLayer {
    type Message = Odometry;

    fn topic(&self) -> &str {
        &self.config.topic
    }

    fn message_type(&self) -> &'static str {
        "nav_msgs/Odometry"
    }

    fn build(&mut self, message: &Odometry, resources: &Resources) -> Option<Built> {
        let pose: Pose = message.pose.pose.into();
        if !self.is_new(&pose) {
            return None;
        }
        self.trail.push_back(pose);
        while self.trail.len() > self.config.keep.max(1) {
            self.trail.pop_front();
        }

        let object = self
            .trail
            .iter()
            .fold(Object3D::group("odometry"), |group, pose| {
                group.with_child(self.config.arrow.build(resources, pose))
            });
        Some(Built {
            frame_id: message.header.frame_id.clone(),
            object,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn odometry(x: f64) -> Odometry {
        let mut message = Odometry::default();
        message.header.frame_id = "odom".into();
        message.pose.pose.position.x = x;
        message
    }

    #[test]
    fn keeps_a_bounded_trail_and_drops_small_moves() {
        let resources = Resources::new();
        let mut layer = OdometryLayer::new(OdometryConfig {
            keep: 2,
            length_tolerance: 0.5,
            ..Default::default()
        });
        assert!(layer.build(&odometry(0.0), &resources).is_some());
        assert!(layer.build(&odometry(0.1), &resources).is_none());
        assert!(layer.build(&odometry(1.0), &resources).is_some());
        let built = layer.build(&odometry(2.0), &resources).unwrap();
        assert_eq!(built.object.children.len(), 2);
        let xs: Vec<f64> = layer.trail().map(|p| p.position.x).collect();
        assert_eq!(xs, vec![1.0, 2.0]);
    }
}
