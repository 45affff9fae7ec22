//! Retained renderables handed to the graphics backend.

use std::sync::atomic::{AtomicU64, Ordering};

use glam::{DQuat, DVec3};

use super::resources::{self, ResourceHandle, ResourceKind, Resources};
use crate::{math::Pose, sensors::buffer::StreamingPointBuffer};

static NEXT_OBJECT_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a renderable, never reused within a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(u64);

impl ObjectId {
    fn next() -> Self {
        Self(NEXT_OBJECT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for ObjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub type Rgba = [f32; 4];

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MaterialKind {
    Basic,
    Phong,
    Line { width: f64 },
    Point { size: f64 },
}

#[derive(Debug)]
pub struct Material {
    pub kind: MaterialKind,
    pub color: Rgba,
    pub transparent: bool,
    /// Not owned by the color update path; see marker transparency.
    pub detached: bool,
    handle: Option<ResourceHandle>,
}

impl Material {
    pub fn new(resources: &Resources, kind: MaterialKind, color: Rgba) -> Self {
        Self {
            kind,
            color,
            transparent: color[3] < 1.0,
            detached: false,
            handle: Some(resources.allocate(ResourceKind::Material)),
        }
    }

    /// Fully transparent stand-in that never follows color updates.
    pub fn transparent_stand_in(resources: &Resources) -> Self {
        Self {
            detached: true,
            ..Self::new(resources, MaterialKind::Basic, [0.0, 0.0, 0.0, 0.0])
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.handle.is_none()
    }

    pub fn dispose(&mut self) {
        resources::release(&mut self.handle);
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ArrowShape {
    pub origin: DVec3,
    pub direction: DVec3,
    pub length: f64,
    pub shaft_diameter: f64,
    pub head_diameter: f64,
    pub head_length: f64,
}

impl Default for ArrowShape {
    fn default() -> Self {
        Self {
            origin: DVec3::ZERO,
            direction: DVec3::X,
            length: 1.0,
            shaft_diameter: 0.05,
            head_diameter: 0.1,
            head_length: 0.23,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Shape {
    /// Unit cube, sized by the object scale.
    Cube,
    /// Unit-diameter sphere.
    Sphere,
    /// Unit-diameter, unit-height cylinder along Z.
    Cylinder,
    Arrow(ArrowShape),
    Plane { width: f64, height: f64 },
    /// Flat ring in the XY plane.
    Disc { inner_radius: f64, outer_radius: f64 },
    /// External mesh asset, loaded by the backend.
    MeshResource { uri: String },
    Triangles {
        positions: Vec<DVec3>,
        colors: Option<Vec<Rgba>>,
    },
}

#[derive(Debug)]
pub struct Mesh {
    pub shape: Shape,
    pub material: Material,
    geometry: Option<ResourceHandle>,
}

impl Mesh {
    pub fn new(resources: &Resources, shape: Shape, material: Material) -> Self {
        Self {
            shape,
            material,
            geometry: Some(resources.allocate(ResourceKind::Geometry)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    Strip,
    /// Pairs of points, one segment each.
    List,
}

#[derive(Debug)]
pub struct Lines {
    pub kind: LineKind,
    pub points: Vec<DVec3>,
    pub colors: Option<Vec<Rgba>>,
    pub material: Material,
    geometry: Option<ResourceHandle>,
}

impl Lines {
    pub fn new(
        resources: &Resources,
        kind: LineKind,
        points: Vec<DVec3>,
        colors: Option<Vec<Rgba>>,
        material: Material,
    ) -> Self {
        Self {
            kind,
            points,
            colors,
            material,
            geometry: Some(resources.allocate(ResourceKind::Geometry)),
        }
    }
}

#[derive(Debug)]
pub struct PointsGeometry {
    pub buffer: StreamingPointBuffer,
    pub material: Material,
    geometry: Option<ResourceHandle>,
}

impl PointsGeometry {
    pub fn new(resources: &Resources, buffer: StreamingPointBuffer, material: Material) -> Self {
        Self {
            buffer,
            material,
            geometry: Some(resources.allocate(ResourceKind::Geometry)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Instance {
    pub position: DVec3,
    pub size: DVec3,
    pub color: Option<Rgba>,
}

#[derive(Debug)]
pub struct Instanced {
    pub shape: Shape,
    pub instances: Vec<Instance>,
    pub material: Material,
    geometry: Option<ResourceHandle>,
}

impl Instanced {
    pub fn new(
        resources: &Resources,
        shape: Shape,
        instances: Vec<Instance>,
        material: Material,
    ) -> Self {
        Self {
            shape,
            instances,
            material,
            geometry: Some(resources.allocate(ResourceKind::Geometry)),
        }
    }
}

#[derive(Debug)]
pub struct Text {
    pub text: String,
    pub height: f64,
    pub material: Material,
    texture: Option<ResourceHandle>,
}

impl Text {
    pub fn new(resources: &Resources, text: String, height: f64, material: Material) -> Self {
        Self {
            text,
            height,
            material,
            texture: Some(resources.allocate(ResourceKind::Texture)),
        }
    }
}

/// Row-major RGBA texture laid on a plane, one texel per cell.
#[derive(Debug)]
pub struct Grid {
    pub width: u32,
    pub height: u32,
    pub resolution: f64,
    pub texels: Vec<[u8; 4]>,
    pub material: Material,
    geometry: Option<ResourceHandle>,
    texture: Option<ResourceHandle>,
}

impl Grid {
    pub fn new(
        resources: &Resources,
        width: u32,
        height: u32,
        resolution: f64,
        texels: Vec<[u8; 4]>,
        material: Material,
    ) -> Self {
        Self {
            width,
            height,
            resolution,
            texels,
            material,
            geometry: Some(resources.allocate(ResourceKind::Geometry)),
            texture: Some(resources.allocate(ResourceKind::Texture)),
        }
    }
}

#[derive(Debug)]
pub enum ObjectKind {
    Group,
    Mesh(Mesh),
    Lines(Lines),
    Points(PointsGeometry),
    Instanced(Instanced),
    Text(Text),
    Grid(Grid),
}

impl ObjectKind {
    fn dispose(&mut self) {
        match self {
            ObjectKind::Group => {}
            ObjectKind::Mesh(mesh) => {
                resources::release(&mut mesh.geometry);
                mesh.material.dispose();
            }
            ObjectKind::Lines(lines) => {
                resources::release(&mut lines.geometry);
                lines.material.dispose();
            }
            ObjectKind::Points(points) => {
                resources::release(&mut points.geometry);
                points.material.dispose();
            }
            ObjectKind::Instanced(instanced) => {
                resources::release(&mut instanced.geometry);
                instanced.material.dispose();
            }
            ObjectKind::Text(text) => {
                resources::release(&mut text.texture);
                text.material.dispose();
            }
            ObjectKind::Grid(grid) => {
                resources::release(&mut grid.geometry);
                resources::release(&mut grid.texture);
                grid.material.dispose();
            }
        }
    }

    pub fn material(&self) -> Option<&Material> {
        match self {
            ObjectKind::Group => None,
            ObjectKind::Mesh(mesh) => Some(&mesh.material),
            ObjectKind::Lines(lines) => Some(&lines.material),
            ObjectKind::Points(points) => Some(&points.material),
            ObjectKind::Instanced(instanced) => Some(&instanced.material),
            ObjectKind::Text(text) => Some(&text.material),
            ObjectKind::Grid(grid) => Some(&grid.material),
        }
    }

    pub fn material_mut(&mut self) -> Option<&mut Material> {
        match self {
            ObjectKind::Group => None,
            ObjectKind::Mesh(mesh) => Some(&mut mesh.material),
            ObjectKind::Lines(lines) => Some(&mut lines.material),
            ObjectKind::Points(points) => Some(&mut points.material),
            ObjectKind::Instanced(instanced) => Some(&mut instanced.material),
            ObjectKind::Text(text) => Some(&mut text.material),
            ObjectKind::Grid(grid) => Some(&mut grid.material),
        }
    }
}

/// A positioned, oriented renderable with owned children.
///
/// Children are owned by containment; the parent disposes them explicitly.
#[derive(Debug)]
pub struct Object3D {
    id: ObjectId,
    pub name: String,
    pub position: DVec3,
    pub orientation: DQuat,
    pub scale: DVec3,
    pub visible: bool,
    pub kind: ObjectKind,
    pub children: Vec<Object3D>,
    dirty: bool,
    disposed: bool,
}

impl Object3D {
    pub fn new(name: impl Into<String>, kind: ObjectKind) -> Self {
        Self {
            id: ObjectId::next(),
            name: name.into(),
            position: DVec3::ZERO,
            orientation: DQuat::IDENTITY,
            scale: DVec3::ONE,
            visible: true,
            kind,
            children: Vec::new(),
            dirty: true,
            disposed: false,
        }
    }

    pub fn group(name: impl Into<String>) -> Self {
        Self::new(name, ObjectKind::Group)
    }

    /// Placeholder used when a renderable could not be built.
    pub fn empty() -> Self {
        Self::group("empty")
    }

    pub fn with_child(mut self, child: Object3D) -> Self {
        self.children.push(child);
        self
    }

    pub fn with_pose(mut self, pose: &Pose) -> Self {
        self.set_pose(pose);
        self
    }

    pub fn with_scale(mut self, scale: DVec3) -> Self {
        self.scale = scale;
        self
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub fn pose(&self) -> Pose {
        Pose::new(self.position, self.orientation)
    }

    pub fn set_pose(&mut self, pose: &Pose) {
        self.position = pose.position;
        self.orientation = pose.orientation;
        self.dirty = true;
    }

    pub fn set_visible(&mut self, visible: bool) {
        if self.visible != visible {
            self.visible = visible;
            self.dirty = true;
        }
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn take_dirty(&mut self) -> bool {
        std::mem::take(&mut self.dirty)
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// Releases every resource in the subtree. Later calls do nothing.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        for mut child in self.children.drain(..) {
            child.dispose();
        }
        self.kind.dispose();
    }

    /// Removes the child with `id` from this object's list and disposes it.
    pub fn remove_child(&mut self, id: ObjectId) -> bool {
        let Some(index) = self.children.iter().position(|c| c.id == id) else {
            return false;
        };
        let mut child = self.children.remove(index);
        child.dispose();
        self.dirty = true;
        true
    }

    /// Depth-first search by name.
    pub fn find(&self, name: &str) -> Option<&Object3D> {
        if self.name == name {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.find(name))
    }

    pub fn find_mut(&mut self, name: &str) -> Option<&mut Object3D> {
        if self.name == name {
            return Some(self);
        }
        self.children.iter_mut().find_map(|c| c.find_mut(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispose_releases_the_whole_subtree_once() {
        let resources = Resources::new();
        let material = Material::new(&resources, MaterialKind::Phong, [1.0; 4]);
        let cube = Object3D::new(
            "cube",
            ObjectKind::Mesh(Mesh::new(&resources, Shape::Cube, material)),
        );
        let label = Object3D::new(
            "label",
            ObjectKind::Text(Text::new(
                &resources,
                "hi".into(),
                0.2,
                Material::new(&resources, MaterialKind::Basic, [1.0; 4]),
            )),
        );
        let mut root = Object3D::group("root").with_child(cube).with_child(label);
        assert_eq!(resources.live_count(), 4);

        root.dispose();
        root.dispose();
        assert_eq!(resources.live_count(), 0);
        assert!(root.children.is_empty());
        assert!(root.is_disposed());
    }

    #[test]
    fn ids_are_unique() {
        let a = Object3D::group("a");
        let b = Object3D::group("a");
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn remove_child_disposes_after_unlinking() {
        let resources = Resources::new();
        let line = Object3D::new(
            "line",
            ObjectKind::Lines(Lines::new(
                &resources,
                LineKind::Strip,
                vec![DVec3::ZERO, DVec3::X],
                None,
                Material::new(&resources, MaterialKind::Line { width: 1.0 }, [1.0; 4]),
            )),
        );
        let id = line.id();
        let mut root = Object3D::group("root").with_child(line);
        assert!(root.remove_child(id));
        assert!(!root.remove_child(id));
        assert_eq!(resources.live_count(), 0);
    }
}
