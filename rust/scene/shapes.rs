//! Builders for the primitive renderables shared by markers, navigation
//! layers and interactive controls.

use glam::DVec3;

use super::{
    object::{
        ArrowShape, LineKind, Lines, Material, MaterialKind, Mesh, Object3D, ObjectKind, Rgba,
        Shape,
    },
    resources::Resources,
};

pub fn solid(resources: &Resources, name: &str, shape: Shape, color: Rgba) -> Object3D {
    let material = Material::new(resources, MaterialKind::Phong, color);
    Object3D::new(name, ObjectKind::Mesh(Mesh::new(resources, shape, material)))
}

pub fn arrow(resources: &Resources, shape: ArrowShape, color: Rgba) -> Object3D {
    solid(resources, "arrow", Shape::Arrow(shape), color)
}

/// Arrow from `start` to `end`; `None` when the two points coincide.
pub fn arrow_between(
    resources: &Resources,
    start: DVec3,
    end: DVec3,
    shaft_diameter: f64,
    head_diameter: f64,
    head_length: Option<f64>,
    color: Rgba,
) -> Option<Object3D> {
    let delta = end - start;
    let length = delta.length();
    let direction = delta.try_normalize()?;
    let shape = ArrowShape {
        origin: start,
        direction,
        length,
        shaft_diameter,
        head_diameter,
        head_length: head_length.unwrap_or(0.23 * length),
    };
    Some(arrow(resources, shape, color))
}

pub fn lines(
    resources: &Resources,
    kind: LineKind,
    points: Vec<DVec3>,
    colors: Option<Vec<Rgba>>,
    color: Rgba,
    width: f64,
) -> Object3D {
    let material = Material::new(resources, MaterialKind::Line { width }, color);
    let name = match kind {
        LineKind::Strip => "line_strip",
        LineKind::List => "line_list",
    };
    Object3D::new(
        name,
        ObjectKind::Lines(Lines::new(resources, kind, points, colors, material)),
    )
}

pub fn disc(resources: &Resources, inner_radius: f64, outer_radius: f64, color: Rgba) -> Object3D {
    solid(
        resources,
        "disc",
        Shape::Disc {
            inner_radius,
            outer_radius,
        },
        color,
    )
}
