//! The render pass contract between scene components and a backend.

use super::object::{Object3D, ObjectKind};
use crate::math::Pose;

/// Receives renderables from the render pass.
///
/// Paths are hierarchical (`markers/ns/3/child`); an object's own pose is
/// relative to its parent path, and `world` is provided for backends that do
/// not compose transforms along paths.
pub trait RenderSink {
    fn draw(&mut self, path: &str, world: &Pose, object: &Object3D);
    fn remove(&mut self, path: &str);
}

/// Draws the subtree rooted at `object`, visiting only what changed since the
/// previous pass unless `force` is set. Dirty flags are cleared as objects are
/// drawn, so writers only ever touch buffers between render ticks.
pub fn render_object(
    sink: &mut dyn RenderSink,
    path: &str,
    parent_world: &Pose,
    object: &mut Object3D,
    force: bool,
) {
    let mut dirty = object.take_dirty();
    if let ObjectKind::Points(points) = &mut object.kind {
        dirty |= points.buffer.take_dirty();
    }
    let dirty = dirty || force;

    if !object.visible {
        if dirty {
            sink.remove(path);
        }
        return;
    }

    let world = parent_world.mul_pose(&object.pose());
    if dirty {
        sink.draw(path, &world, object);
    }
    for (index, child) in object.children.iter_mut().enumerate() {
        let child_path = format!("{path}/{}", segment(&child.name, index));
        render_object(sink, &child_path, &world, child, dirty);
    }
}

/// Path segment for a child: its name when usable, else its index.
fn segment(name: &str, index: usize) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
        .collect();
    if cleaned.is_empty() {
        index.to_string()
    } else {
        format!("{cleaned}_{index}")
    }
}

/// Sink that remembers what it was asked to do; handy in tests and for
/// debugging a scene without a viewer.
#[derive(Debug, Default)]
pub struct RecordingSink {
    pub drawn: Vec<(String, Pose)>,
    pub removed: Vec<String>,
}

impl RenderSink for RecordingSink {
    fn draw(&mut self, path: &str, world: &Pose, _object: &Object3D) {
        self.drawn.push((path.to_owned(), *world));
    }

    fn remove(&mut self, path: &str) {
        self.removed.push(path.to_owned());
    }
}
