//! Scene graph: retained renderables, their GPU resources, and the nodes
//! that anchor them to frames.

pub mod node;
pub mod object;
pub mod render;
pub mod resources;
pub mod shapes;

pub use node::{AnchoredNode, AnchoredNodeOptions, NodeHandle};
pub use object::{Material, MaterialKind, Object3D, ObjectId, ObjectKind, Rgba, Shape};
pub use render::{RecordingSink, RenderSink};
pub use resources::{ResourceKind, Resources};
