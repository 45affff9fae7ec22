use glam::DVec3;
use serde::Deserialize;

use super::{Built, DEFAULT_COLOR, NavLayer};
use crate::{
    msgs::nav_msgs::Path,
    scene::{Resources, Rgba, object::LineKind, shapes},
};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PathConfig {
    pub topic: String,
    pub color: Rgba,
    pub width: f64,
}

impl Default for PathConfig {
    fn default() -> Self {
        Self {
            topic: "/path".to_owned(),
            color: DEFAULT_COLOR,
            width: 1.0,
        }
    }
}

/// `nav_msgs/Path` as a line strip through the pose positions.
pub struct PathLayer {
    config: PathConfig,
}

impl PathLayer {
    pub fn new(config: PathConfig) -> Self {
        Self { config }
    }
}

impl NavLayer for PathLayer {
    type Message = Path;

    fn topic(&self) -> &str {
        &self.config.topic
    }

    fn message_type(&self) -> &'static str {
        "nav_msgs/Path"
    }

    fn build(&mut self, path: &Path, resources: &Resources) -> Option<Built> {
        let points: Vec<DVec3> = path.poses.iter().map(|p| p.pose.position.into()).collect();
        Some(Built {
            frame_id: path.header.frame_id.clone(),
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
    use crate::{msgs::geometry_msgs::PoseStamped, scene::ObjectKind};

    #[test]
    fn strip_follows_the_poses() {
        let resources = Resources::new();
        let mut path = Path::default();
        path.header.frame_id = "map".into();
        for x in 0..4 {
            let mut pose = PoseStamped::default();
            pose.pose.position.x = x as f64;
            path.poses.push(pose);
        }
        let built = PathLayer::new(PathConfig::default())
            .build(&path, &resources)
            .unwrap();
        assert_eq!(built.frame_id, "map");
        let ObjectKind::Lines(lines) = &built.object.kind else {
            panic!("path should be a line strip");
        };
        assert_eq!(lines.points.len(), 4);
        assert_eq!(lines.points[3], DVec3::new(3.0, 0.0, 0.0));
    }
}
