//! One `visualization_msgs/Marker` turned into a renderable, and the rules
//! for updating it in place.

use std::rc::Rc;

use glam::DVec3;

use crate::{
    logging::Logger,
    math::Pose,
    msgs::{
        geometry_msgs::Point,
        visualization_msgs::{Marker, marker},
    },
    scene::{
        AnchoredNode, AnchoredNodeOptions, Material, MaterialKind, NodeHandle, Object3D,
        ObjectId, ObjectKind, RenderSink, Resources, Rgba, Shape,
        object::{ArrowShape, Instance, Instanced, LineKind, Mesh, PointsGeometry, Text},
        shapes,
    },
    sensors::buffer::StreamingPointBuffer,
    tf::TransformStore,
};

/// Channel difference above which a material is rebuilt.
pub const COLOR_EPSILON: f32 = 1e-6;
/// Per-axis scale difference treated as a change.
pub const SCALE_EPSILON: f64 = 1e-6;

/// Fraction of the arrow length used for the head when none is given.
const ARROW_HEAD_FRACTION: f64 = 0.23;

pub fn colors_differ(a: Rgba, b: Rgba) -> bool {
    a.iter().zip(b).any(|(x, y)| (x - y).abs() > COLOR_EPSILON)
}

fn is_clear(color: Rgba) -> bool {
    color.iter().all(|c| *c == 0.0)
}

fn points(marker: &Marker) -> Vec<DVec3> {
    marker.points.iter().map(|&p| p.into()).collect()
}

/// Per-vertex colors, used only when there is one per point.
fn vertex_colors(marker: &Marker) -> Option<Vec<Rgba>> {
    (!marker.points.is_empty() && marker.colors.len() == marker.points.len())
        .then(|| marker.colors.iter().map(|c| c.to_array()).collect())
}

/// Number of vertices the renderable keeps; triangle lists drop a trailing
/// partial triangle.
fn vertex_count(marker: &Marker) -> usize {
    let len = marker.points.len();
    match marker.kind {
        marker::TRIANGLE_LIST => len - len % 3,
        _ => len,
    }
}

fn triangles(marker: &Marker) -> (Vec<DVec3>, Option<Vec<Rgba>>) {
    let count = vertex_count(marker);
    let positions = marker.points[..count].iter().map(|&p| p.into()).collect();
    let colors = vertex_colors(marker).map(|mut colors| {
        colors.truncate(count);
        colors
    });
    (positions, colors)
}

fn instances(marker: &Marker) -> Vec<Instance> {
    let size: DVec3 = marker.scale.into();
    let colors = vertex_colors(marker);
    marker
        .points
        .iter()
        .enumerate()
        .map(|(i, &p)| Instance {
            position: p.into(),
            size,
            color: colors.as_ref().map(|c| c[i]),
        })
        .collect()
}

/// Points without per-vertex colors take the marker color, so nothing from
/// a previous message survives in the buffer.
fn fill_points(buffer: &mut StreamingPointBuffer, marker: &Marker) {
    let colors = vertex_colors(marker);
    let [r, g, b, _] = marker.color.to_array();
    buffer.begin();
    for (i, p) in marker.points.iter().enumerate() {
        let color = colors.as_ref().map_or([r, g, b], |c| [c[i][0], c[i][1], c[i][2]]);
        buffer.push([p.x as f32, p.y as f32, p.z as f32], Some(color));
    }
    buffer.finish();
}

fn arrow(marker: &Marker, resources: &Resources, log: &Logger) -> Object3D {
    let color = marker.color.to_array();
    let scale = marker.scale;
    if let [start, end] = marker.points.as_slice() {
        let head_length = (scale.z != 0.0).then_some(scale.z);
        return shapes::arrow_between(
            resources,
            (*start).into(),
            (*end).into(),
            scale.x,
            scale.y,
            head_length,
            color,
        )
        .unwrap_or_else(|| {
            log.debug(format_args!("arrow {}/{} has no length", marker.ns, marker.id));
            Object3D::empty()
        });
    }
    let shape = ArrowShape {
        origin: DVec3::ZERO,
        direction: DVec3::X,
        length: scale.x,
        shaft_diameter: scale.y * 0.5,
        head_diameter: scale.y,
        head_length: scale.x * ARROW_HEAD_FRACTION,
    };
    shapes::arrow(resources, shape, color)
}

/// Builds the renderable for a marker. Malformed markers log and yield an
/// empty object.
pub fn build_object(marker: &Marker, resources: &Resources, log: &Logger) -> Object3D {
    let color = marker.color.to_array();
    let scale: DVec3 = marker.scale.into();
    let line = |kind| {
        shapes::lines(
            resources,
            kind,
            points(marker),
            vertex_colors(marker),
            color,
            marker.scale.x,
        )
    };
    let list = |name: &str, shape| {
        let material = Material::new(resources, MaterialKind::Phong, color);
        Object3D::new(
            name,
            ObjectKind::Instanced(Instanced::new(resources, shape, instances(marker), material)),
        )
    };

    match marker.kind {
        marker::ARROW => arrow(marker, resources, log),
        marker::CUBE => shapes::solid(resources, "cube", Shape::Cube, color).with_scale(scale),
        marker::SPHERE => shapes::solid(resources, "sphere", Shape::Sphere, color).with_scale(scale),
        marker::CYLINDER => {
            shapes::solid(resources, "cylinder", Shape::Cylinder, color).with_scale(scale)
        }
        marker::LINE_STRIP => line(LineKind::Strip),
        marker::LINE_LIST => line(LineKind::List),
        marker::CUBE_LIST => list("cube_list", Shape::Cube),
        marker::SPHERE_LIST => list("sphere_list", Shape::Sphere),
        marker::POINTS => {
            let mut buffer =
                StreamingPointBuffer::new(marker.points.len(), vertex_colors(marker).is_some());
            fill_points(&mut buffer, marker);
            let material = Material::new(
                resources,
                MaterialKind::Point {
                    size: marker.scale.x,
                },
                color,
            );
            Object3D::new(
                "points",
                ObjectKind::Points(PointsGeometry::new(resources, buffer, material)),
            )
        }
        marker::TEXT_VIEW_FACING => {
            let material = Material::new(resources, MaterialKind::Basic, color);
            Object3D::new(
                "text",
                ObjectKind::Text(Text::new(
                    resources,
                    marker.text.clone(),
                    marker.scale.z,
                    material,
                )),
            )
        }
        marker::MESH_RESOURCE => {
            if marker.mesh_resource.is_empty() {
                log.warn(format_args!(
                    "mesh marker {}/{} has no resource",
                    marker.ns, marker.id
                ));
                return Object3D::empty();
            }
            // An all-zero color means "use the mesh's own materials".
            let material = if is_clear(color) {
                Material::transparent_stand_in(resources)
            } else {
                Material::new(resources, MaterialKind::Phong, color)
            };
            let shape = Shape::MeshResource {
                uri: marker.mesh_resource.clone(),
            };
            Object3D::new(
                "mesh",
                ObjectKind::Mesh(Mesh::new(resources, shape, material)),
            )
            .with_scale(scale)
        }
        marker::TRIANGLE_LIST => {
            if marker.points.len() % 3 != 0 {
                log.warn(format_args!(
                    "triangle marker {}/{} has {} points, dropping the partial triangle",
                    marker.ns,
                    marker.id,
                    marker.points.len()
                ));
            }
            let (positions, colors) = triangles(marker);
            shapes::solid(resources, "triangles", Shape::Triangles { positions, colors }, color)
                .with_scale(scale)
        }
        other => {
            log.warn(format_args!(
                "marker {}/{} has unsupported type {other}",
                marker.ns, marker.id
            ));
            Object3D::empty()
        }
    }
}

/// A live marker: its renderable anchored in the marker's frame, plus what
/// the update rules need to remember about the message that built it.
pub struct MarkerView {
    kind: i32,
    frame_id: String,
    scale: DVec3,
    color: Rgba,
    point_count: usize,
    arrow_points: Vec<Point>,
    mesh_resource: String,
    stand_in: bool,
    node: AnchoredNode,
    resources: Resources,
}

impl MarkerView {
    pub fn new(
        marker: &Marker,
        store: Rc<dyn TransformStore>,
        resources: &Resources,
        log: &Logger,
    ) -> Self {
        let frame_id = crate::tf::normalize_frame_id(&marker.header.frame_id).to_owned();
        let object = if frame_id.is_empty() {
            log.warn(format_args!(
                "marker {}/{} has no frame id",
                marker.ns, marker.id
            ));
            Object3D::empty()
        } else {
            build_object(marker, resources, log)
        };
        let node = AnchoredNode::new(
            AnchoredNodeOptions::new(object)
                .frame(frame_id.clone(), store)
                .pose(marker.pose.into()),
        );
        Self {
            kind: marker.kind,
            frame_id,
            scale: marker.scale.into(),
            color: marker.color.to_array(),
            point_count: vertex_count(marker),
            arrow_points: marker.points.clone(),
            mesh_resource: marker.mesh_resource.clone(),
            stand_in: marker.kind == marker::MESH_RESOURCE && is_clear(marker.color.to_array()),
            node,
            resources: resources.clone(),
        }
    }

    pub fn kind(&self) -> i32 {
        self.kind
    }

    pub fn id(&self) -> ObjectId {
        self.node.id()
    }

    pub fn handle(&self) -> NodeHandle {
        self.node.handle()
    }

    pub fn node(&self) -> &AnchoredNode {
        &self.node
    }

    /// Re-poses the marker within its frame.
    pub fn set_pose(&self, pose: Pose) {
        self.node.set_local_pose(pose);
        self.node.refresh();
    }

    /// Tries to apply `marker` to the existing renderable. Returns `false`
    /// when the change needs a rebuild; nothing is modified in that case.
    pub fn update(&mut self, marker: &Marker) -> bool {
        if marker.kind != self.kind
            || crate::tf::normalize_frame_id(&marker.header.frame_id) != self.frame_id
        {
            return false;
        }
        let scale: DVec3 = marker.scale.into();
        let scale_changed = !scale.abs_diff_eq(self.scale, SCALE_EPSILON);
        let color = marker.color.to_array();

        let refused = match marker.kind {
            marker::ARROW => scale_changed || marker.points != self.arrow_points,
            marker::TEXT_VIEW_FACING => scale_changed,
            marker::MESH_RESOURCE => {
                scale_changed
                    || marker.mesh_resource != self.mesh_resource
                    || is_clear(color) != self.stand_in
            }
            marker::TRIANGLE_LIST => scale_changed || vertex_count(marker) != self.point_count,
            marker::LINE_STRIP
            | marker::LINE_LIST
            | marker::CUBE_LIST
            | marker::SPHERE_LIST
            | marker::POINTS => marker.points.len() != self.point_count,
            _ => false,
        };
        if refused {
            return false;
        }

        let recolor = colors_differ(color, self.color);
        let resources = &self.resources;
        self.node.with_child_mut(|object| {
            apply_in_place(object, marker, scale, color, recolor, resources);
        });
        self.scale = scale;
        self.color = color;
        true
    }

    pub fn render(&self, path: &str, sink: &mut dyn RenderSink) {
        self.node.render(path, sink);
    }

    pub fn dispose(&mut self) {
        self.node.dispose();
    }
}

fn rebuild_material(material: &mut Material, kind: MaterialKind, color: Rgba, resources: &Resources) {
    if material.detached || (material.kind == kind && !colors_differ(material.color, color)) {
        return;
    }
    material.dispose();
    *material = Material::new(resources, kind, color);
}

fn apply_in_place(
    object: &mut Object3D,
    marker: &Marker,
    scale: DVec3,
    color: Rgba,
    recolor: bool,
    resources: &Resources,
) {
    object.mark_dirty();
    match &mut object.kind {
        ObjectKind::Group => {}
        ObjectKind::Mesh(mesh) => {
            match &mut mesh.shape {
                Shape::Triangles { positions, colors } => {
                    (*positions, *colors) = triangles(marker);
                }
                Shape::Arrow(_) => {}
                _ => object.scale = scale,
            }
            if recolor {
                let kind = mesh.material.kind;
                rebuild_material(&mut mesh.material, kind, color, resources);
            }
        }
        ObjectKind::Lines(lines) => {
            lines.points = points(marker);
            lines.colors = vertex_colors(marker);
            let kind = MaterialKind::Line {
                width: marker.scale.x,
            };
            rebuild_material(&mut lines.material, kind, color, resources);
        }
        ObjectKind::Points(geometry) => {
            fill_points(&mut geometry.buffer, marker);
            let kind = MaterialKind::Point {
                size: marker.scale.x,
            };
            rebuild_material(&mut geometry.material, kind, color, resources);
        }
        ObjectKind::Instanced(instanced) => {
            instanced.instances = instances(marker);
            if recolor {
                rebuild_material(&mut instanced.material, MaterialKind::Phong, color, resources);
            }
        }
        ObjectKind::Text(text) => {
            text.text.clone_from(&marker.text);
            if recolor {
                rebuild_material(&mut text.material, MaterialKind::Basic, color, resources);
            }
        }
        ObjectKind::Grid(_) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        msgs::std_msgs::ColorRGBA,
        scene::ResourceKind,
        tf::{FrameTransformStore, FrameTransformStoreConfig},
    };

    fn line_strip(points: usize) -> Marker {
        let mut marker = Marker {
            kind: marker::LINE_STRIP,
            color: ColorRGBA::new(1.0, 0.0, 0.0, 1.0),
            points: (0..points).map(|i| Point::new(i as f64, 0.0, 0.0)).collect(),
            ..Default::default()
        };
        marker.scale.x = 0.1;
        marker.header.frame_id = "base_link".into();
        marker
    }

    fn view(marker: &Marker, resources: &Resources) -> MarkerView {
        let store = FrameTransformStore::new(
            FrameTransformStoreConfig::default(),
            Logger::detached("tf"),
        );
        MarkerView::new(marker, store, resources, &Logger::detached("marker"))
    }

    #[test]
    fn same_point_count_updates_in_place() {
        let resources = Resources::new();
        let mut view = view(&line_strip(3), &resources);
        let id = view.id();
        let mut next = line_strip(3);
        next.points[2].y = 1.0;
        assert!(view.update(&next));
        assert_eq!(view.id(), id);
        let y = view.node().with_child(|o| match &o.kind {
            ObjectKind::Lines(lines) => lines.points[2].y,
            _ => 0.0,
        });
        assert_eq!(y, Some(1.0));
    }

    #[test]
    fn point_count_or_type_changes_are_refused() {
        let resources = Resources::new();
        let mut view = view(&line_strip(3), &resources);
        assert!(!view.update(&line_strip(4)));
        assert!(!view.update(&line_strip(2)));
        let mut cube = line_strip(3);
        cube.kind = marker::CUBE;
        assert!(!view.update(&cube));
    }

    #[test]
    fn recolor_replaces_the_material_without_leaking() {
        let resources = Resources::new();
        let mut sphere = line_strip(0);
        sphere.kind = marker::SPHERE;
        let mut view = view(&sphere, &resources);
        let materials = resources.live_of(ResourceKind::Material);

        sphere.color.g = 0.5;
        assert!(view.update(&sphere));
        assert_eq!(resources.live_of(ResourceKind::Material), materials);
        let color = view
            .node()
            .with_child(|o| o.kind.material().map(|m| m.color));
        assert_eq!(color, Some(Some([1.0, 0.5, 0.0, 1.0])));

        sphere.color.g = 0.5 + COLOR_EPSILON / 10.0;
        sphere.scale.x = 3.0;
        assert!(view.update(&sphere));
        assert_eq!(view.node().with_child(|o| o.scale.x), Some(3.0));
    }

    #[test]
    fn shape_scale_changes_need_a_rebuild() {
        let resources = Resources::new();
        let mut text = line_strip(0);
        text.kind = marker::TEXT_VIEW_FACING;
        text.text = "hello".into();
        text.scale.z = 0.2;
        let mut view = view(&text, &resources);

        text.text = "world".into();
        assert!(view.update(&text));
        text.scale.z = 0.4;
        assert!(!view.update(&text));
    }

    #[test]
    fn clear_mesh_markers_get_a_detached_stand_in() {
        let resources = Resources::new();
        let mut mesh = line_strip(0);
        mesh.kind = marker::MESH_RESOURCE;
        mesh.mesh_resource = "package://robot/meshes/base.dae".into();
        mesh.color = ColorRGBA::default();
        let mut view = view(&mesh, &resources);
        let detached = view
            .node()
            .with_child(|o| o.kind.material().map(|m| m.detached));
        assert_eq!(detached, Some(Some(true)));

        mesh.color.a = 1.0;
        assert!(!view.update(&mesh));
    }

    #[test]
    fn malformed_markers_degrade_to_empty_objects() {
        let resources = Resources::new();
        let log = Logger::detached("marker");
        let mut mesh = line_strip(0);
        mesh.kind = marker::MESH_RESOURCE;
        assert!(matches!(
            build_object(&mesh, &resources, &log).kind,
            ObjectKind::Group
        ));
        mesh.kind = 42;
        assert!(matches!(
            build_object(&mesh, &resources, &log).kind,
            ObjectKind::Group
        ));
        assert_eq!(resources.live_count(), 0);
    }

    fn triangle_count(view: &MarkerView) -> Option<usize> {
        view.node().with_child(|o| match &o.kind {
            ObjectKind::Mesh(mesh) => match &mesh.shape {
                Shape::Triangles { positions, colors } => {
                    let colored = colors.as_ref().map_or(positions.len(), Vec::len);
                    assert_eq!(colored, positions.len());
                    positions.len()
                }
                _ => 0,
            },
            _ => 0,
        })
    }

    #[test]
    fn partial_triangles_are_dropped_on_build_and_update() {
        let resources = Resources::new();
        let mut tri = line_strip(4);
        tri.kind = marker::TRIANGLE_LIST;
        tri.scale = crate::msgs::geometry_msgs::Vector3::new(1.0, 1.0, 1.0);
        tri.colors = vec![ColorRGBA::new(0.0, 1.0, 0.0, 1.0); 4];
        let mut view = view(&tri, &resources);
        assert_eq!(triangle_count(&view), Some(3));

        tri.points[0].z = 1.0;
        assert!(view.update(&tri));
        assert_eq!(triangle_count(&view), Some(3));

        tri.points.truncate(3);
        tri.colors.truncate(3);
        assert!(view.update(&tri));
        tri.points.truncate(2);
        tri.colors.truncate(2);
        assert!(!view.update(&tri));
    }

    #[test]
    fn uncolored_point_updates_reset_vertex_colors() {
        let resources = Resources::new();
        let mut points = line_strip(2);
        points.kind = marker::POINTS;
        points.colors = vec![ColorRGBA::new(0.0, 0.0, 1.0, 1.0); 2];
        let mut view = view(&points, &resources);
        let first = |view: &MarkerView| {
            view.node().with_child(|o| match &o.kind {
                ObjectKind::Points(geometry) => geometry.buffer.color(0),
                _ => None,
            })
        };
        assert_eq!(first(&view), Some(Some([0.0, 0.0, 1.0])));

        points.colors.clear();
        assert!(view.update(&points));
        assert_eq!(first(&view), Some(Some([1.0, 0.0, 0.0])));
    }

    #[test]
    fn arrows_from_points_use_scale_as_diameters() {
        let resources = Resources::new();
        let mut arrow = line_strip(0);
        arrow.kind = marker::ARROW;
        arrow.points = vec![Point::new(0.0, 0.0, 0.0), Point::new(0.0, 2.0, 0.0)];
        arrow.scale = crate::msgs::geometry_msgs::Vector3::new(0.1, 0.2, 0.0);
        let object = build_object(&arrow, &resources, &Logger::detached("marker"));
        let ObjectKind::Mesh(mesh) = &object.kind else {
            panic!("arrow should be a mesh");
        };
        let Shape::Arrow(shape) = &mesh.shape else {
            panic!("arrow should have an arrow shape");
        };
        assert_eq!(shape.length, 2.0);
        assert_eq!(shape.direction, DVec3::Y);
        assert_eq!(shape.shaft_diameter, 0.1);
        assert_eq!(shape.head_diameter, 0.2);
        assert!((shape.head_length - 0.46).abs() < 1e-12);
    }
}
