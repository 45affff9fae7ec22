use glam::DVec3;
use serde::Deserialize;

use super::{Built, DEFAULT_COLOR, NavLayer};
use crate::{
    msgs::geometry_msgs::PolygonStamped,
    scene::{Resources, Rgba, object::LineKind, shapes},
};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PolygonConfig {
    pub topic: String,
    pub color: Rgba,
    pub width: f64,
}

impl Default for PolygonConfig {
    fn default() -> Self {
        Self {
            topic: "/polygon".to_owned(),
            color: DEFAULT_COLOR,
            width: 1.0,
        }
    }
}

/// `geometry_msgs/PolygonStamped` as a closed line loop.
pub struct PolygonLayer {
    config: PolygonConfig,
}

impl PolygonLayer {
    pub fn new(config: PolygonConfig) -> Self {
        Self { config }
    }
}

impl NavLayer for PolygonLayer {
    type Message = PolygonStamped;

    fn topic(&self) -> &str {
        &self.config.topic
    }

    fn message_type(&self) -> &'static str {
        "geometry_msgs/PolygonStamped"
    }

    fn build(&mut self, message: &PolygonStamped, resources: &Resources) -> Option<Built> {
        let mut points: Vec<DVec3> = message.polygon.points.iter().map(|&p| p.into()).collect();
        if let Some(&first) = points.first() {
            points.push(first);
        }
        Some(Built {
            frame_id: message.header.frame_id.clone(),
            object: shapes::lines(
                resources,
                LineKind::Strip,
                points,
                None,
                self.config.color,
                self.config.width,
            ),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{msgs::geometry_msgs::Point32, scene::ObjectKind};

    #[test]
    fn loop_is_closed() {
        let resources = Resources::new();
        let mut message = PolygonStamped::default();
        message.polygon.points = vec![
            Point32 { x: 0.0, y: 0.0, z: 0.0 },
            Point32 { x: 1.0, y: 0.0, z: 0.0 },
            Point32 { x: 1.0, y: 1.0, z: 0.0 },
        ];
        let built = PolygonLayer::new(PolygonConfig::default())
            .build(&message, &resources)
            .unwrap();
        let ObjectKind::Lines(lines) = &built.object.kind else {
            panic!("polygon should be a line strip");
        };
        assert_eq!(lines.points.len(), 4);
        assert_eq!(lines.points.first(), lines.points.last());
    }
}
