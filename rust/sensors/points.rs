//! Point layer shared by the laser scan and point cloud clients.

use std::rc::Rc;

use serde::Deserialize;

use super::buffer::StreamingPointBuffer;
use crate::{
    logging::Logger,
    scene::{
        AnchoredNode, AnchoredNodeOptions, Material, MaterialKind, Object3D, ObjectKind,
        RenderSink, Resources, object::PointsGeometry,
    },
    tf::TransformStore,
};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PointsConfig {
    /// Fixed buffer capacity, chosen once per subscription.
    pub max_points: usize,
    /// Keep one record out of every `point_ratio`.
    pub point_ratio: usize,
    /// Process one message out of every `message_ratio`.
    pub message_ratio: usize,
    pub point_size: f64,
    pub color: [f32; 4],
    /// Field providing per-point color (`rgb`, `intensity`, ...).
    pub color_source: Option<String>,
    pub color_min: f32,
    pub color_max: f32,
}

impl Default for PointsConfig {
    fn default() -> Self {
        Self {
            max_points: 10_000,
            point_ratio: 1,
            message_ratio: 1,
            point_size: 0.05,
            color: [1.0, 1.0, 1.0, 1.0],
            color_source: None,
            color_min: 0.0,
            color_max: 1.0,
        }
    }
}

/// Lazily created renderable for one stream of points.
///
/// Nothing is allocated until the first usable message names the frame (and,
/// for clouds, the field layout); after that the buffer and node live until
/// the layer is disposed.
pub struct PointsLayer {
    config: PointsConfig,
    resources: Resources,
    store: Option<Rc<dyn TransformStore>>,
    log: Logger,
    node: Option<AnchoredNode>,
    messages_seen: usize,
}

impl PointsLayer {
    pub fn new(
        config: PointsConfig,
        resources: Resources,
        store: Option<Rc<dyn TransformStore>>,
        log: Logger,
    ) -> Self {
        Self {
            config,
            resources,
            store,
            log,
            node: None,
            messages_seen: 0,
        }
    }

    pub fn config(&self) -> &PointsConfig {
        &self.config
    }

    /// Counts a message and reports whether it falls on `message_ratio`.
    pub fn accept_message(&mut self) -> bool {
        let ratio = self.config.message_ratio.max(1);
        let accept = self.messages_seen % ratio == 0;
        self.messages_seen = self.messages_seen.wrapping_add(1);
        accept
    }

    pub fn is_setup(&self) -> bool {
        self.node.is_some()
    }

    /// One-shot setup. Returns whether the layer is ready for points.
    pub fn setup(&mut self, frame_id: &str, with_colors: bool) -> bool {
        if self.node.is_some() {
            return true;
        }
        if frame_id.is_empty() && self.store.is_some() {
            self.log
                .warn(format_args!("point stream has no frame id, waiting for one"));
            return false;
        }

        let buffer = StreamingPointBuffer::new(self.config.max_points, with_colors);
        let material = Material::new(
            &self.resources,
            MaterialKind::Point {
                size: self.config.point_size,
            },
            self.config.color,
        );
        let points = Object3D::new(
            "points",
            ObjectKind::Points(PointsGeometry::new(&self.resources, buffer, material)),
        );
        let mut options = AnchoredNodeOptions::new(points);
        if let Some(store) = &self.store {
            options = options.frame(frame_id, Rc::clone(store));
        }
        self.log.debug(format_args!(
            "set up {} points in {frame_id} (colors: {with_colors})",
            self.config.max_points
        ));
        self.node = Some(AnchoredNode::new(options));
        true
    }

    /// Runs `f` on the layer's buffer, if set up.
    pub fn with_buffer<R>(&self, f: impl FnOnce(&mut StreamingPointBuffer) -> R) -> Option<R> {
        self.node.as_ref()?.with_child_mut(|child| match &mut child.kind {
            ObjectKind::Points(points) => Some(f(&mut points.buffer)),
            _ => None,
        })?
    }

    pub fn node(&self) -> Option<&AnchoredNode> {
        self.node.as_ref()
    }

    pub fn render(&self, path: &str, sink: &mut dyn RenderSink) {
        if let Some(node) = &self.node {
            node.render(path, sink);
        }
    }

    pub fn dispose(&mut self) {
        if let Some(mut node) = self.node.take() {
            node.dispose();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_ratio_keeps_every_nth() {
        let mut layer = PointsLayer::new(
            PointsConfig {
                message_ratio: 3,
                ..Default::default()
            },
            Resources::new(),
            None,
            Logger::detached("points"),
        );
        let accepted: Vec<bool> = (0..6).map(|_| layer.accept_message()).collect();
        assert_eq!(accepted, vec![true, false, false, true, false, false]);
    }

    #[test]
    fn setup_is_one_shot() {
        let resources = Resources::new();
        let mut layer = PointsLayer::new(
            PointsConfig {
                max_points: 8,
                ..Default::default()
            },
            resources.clone(),
            None,
            Logger::detached("points"),
        );
        assert!(layer.with_buffer(|b| b.capacity()).is_none());
        assert!(layer.setup("laser", false));
        let id = layer.node().map(AnchoredNode::id);
        assert!(layer.setup("other", true));
        assert_eq!(layer.node().map(AnchoredNode::id), id);
        assert_eq!(layer.with_buffer(|b| (b.capacity(), b.has_colors())), Some((8, false)));

        layer.dispose();
        assert_eq!(resources.live_count(), 0);
    }
}
