//! Render pass backend that logs the scene to a rerun recording.
//!
//! Each drawn path receives its local `Transform3D` (rerun composes them
//! along the entity path) followed by the archetype for its geometry.

use rerun::{
    Arrows3D, Asset3D, Boxes3D, Capsules3D, Clear, Color, Ellipsoids3D, LineStrips3D, Mesh3D,
    Points3D, RecordingStream, Transform3D,
};

use crate::{
    logging::Logger,
    math::Pose,
    scene::{
        MaterialKind, Object3D, ObjectKind, RenderSink, Rgba, Shape,
        object::{Grid, Instanced, LineKind, Lines, Mesh, PointsGeometry, Text},
    },
};

/// Segments used to draw a disc outline.
const DISC_SEGMENTS: usize = 48;

pub struct RerunSink {
    rec: RecordingStream,
    log: Logger,
}

impl RerunSink {
    pub fn new(rec: RecordingStream, log: Logger) -> Self {
        Self { rec, log }
    }

    pub fn recording(&self) -> &RecordingStream {
        &self.rec
    }

    fn send(&self, path: &str, archetype: &impl rerun::AsComponents) {
        if let Err(err) = self.rec.log(path, archetype) {
            self.log.warn(format_args!("failed to log {path}: {err}"));
        }
    }

    fn mesh(&self, path: &str, mesh: &Mesh) {
        let color = color(mesh.material.color);
        match &mesh.shape {
            Shape::Cube => self.send(
                path,
                &Boxes3D::from_half_sizes([[0.5, 0.5, 0.5]]).with_colors([color]),
            ),
            Shape::Sphere => self.send(
                path,
                &Ellipsoids3D::from_half_sizes([[0.5, 0.5, 0.5]]).with_colors([color]),
            ),
            Shape::Cylinder => self.send(
                path,
                &Capsules3D::from_lengths_and_radii([1.0], [0.5])
                    .with_translations([[0.0, 0.0, -0.5]])
                    .with_colors([color]),
            ),
            Shape::Arrow(arrow) => {
                let origin = arrow.origin.as_vec3().to_array();
                let vector = (arrow.direction * arrow.length).as_vec3().to_array();
                let radius = arrow.shaft_diameter.max(arrow.head_diameter * 0.5) * 0.5;
                self.send(
                    path,
                    &Arrows3D::from_vectors([vector])
                        .with_origins([origin])
                        .with_radii([radius as f32])
                        .with_colors([color]),
                );
            }
            Shape::Plane { width, height } => self.send(
                path,
                &Boxes3D::from_half_sizes([[*width as f32 * 0.5, *height as f32 * 0.5, 0.0]])
                    .with_colors([color]),
            ),
            Shape::Disc {
                inner_radius,
                outer_radius,
            } => {
                let radius = ((inner_radius + outer_radius) * 0.5) as f32;
                let ring: Vec<[f32; 3]> = (0..=DISC_SEGMENTS)
                    .map(|i| {
                        let angle = i as f32 / DISC_SEGMENTS as f32 * std::f32::consts::TAU;
                        [radius * angle.cos(), radius * angle.sin(), 0.0]
                    })
                    .collect();
                let width = (outer_radius - inner_radius) as f32;
                self.send(
                    path,
                    &LineStrips3D::new([ring])
                        .with_radii([width * 0.5])
                        .with_colors([color]),
                );
            }
            Shape::MeshResource { uri } => match uri.strip_prefix("file://") {
                Some(file) => match Asset3D::from_file(file) {
                    Ok(asset) => self.send(path, &asset),
                    Err(err) => self.log.warn(format_args!("cannot load mesh {uri}: {err}")),
                },
                None => self
                    .log
                    .debug(format_args!("mesh {uri} is not a local file, skipping")),
            },
            Shape::Triangles { positions, colors } => {
                if positions.len() % 3 != 0 {
                    self.log.warn(format_args!(
                        "{path}: {} vertices is not a whole number of triangles",
                        positions.len()
                    ));
                }
                let (vertices, vertex_colors) =
                    triangle_vertices(positions, colors.as_deref(), color);
                if vertices.is_empty() {
                    return;
                }
                self.send(path, &Mesh3D::new(vertices).with_vertex_colors(vertex_colors));
            }
        }
    }

    fn lines(&self, path: &str, lines: &Lines) {
        let points: Vec<[f32; 3]> =
            lines.points.iter().map(|p| p.as_vec3().to_array()).collect();
        let strips: Vec<Vec<[f32; 3]>> = match lines.kind {
            LineKind::Strip => vec![points],
            LineKind::List => points.chunks_exact(2).map(<[_]>::to_vec).collect(),
        };
        let width = match lines.material.kind {
            MaterialKind::Line { width } => width as f32,
            _ => 0.01,
        };
        let mut archetype = LineStrips3D::new(strips).with_radii([width * 0.5]);
        archetype = match (&lines.colors, lines.kind) {
            (Some(colors), LineKind::List) => archetype.with_colors(
                colors.chunks_exact(2).map(|pair| color(pair[0])),
            ),
            _ => archetype.with_colors([color(lines.material.color)]),
        };
        self.send(path, &archetype);
    }

    fn points(&self, path: &str, points: &PointsGeometry) {
        let buffer = &points.buffer;
        let positions = buffer.positions().chunks_exact(3).map(|p| [p[0], p[1], p[2]]);
        let size = match points.material.kind {
            MaterialKind::Point { size } => size as f32,
            _ => 0.05,
        };
        let mut archetype = Points3D::new(positions).with_radii([size * 0.5]);
        archetype = match buffer.colors() {
            Some(colors) => archetype.with_colors(colors.chunks_exact(3).map(|c| {
                color([c[0], c[1], c[2], points.material.color[3]])
            })),
            None => archetype.with_colors([color(points.material.color)]),
        };
        self.send(path, &archetype);
    }

    fn instanced(&self, path: &str, instanced: &Instanced) {
        let centers = instanced.instances.iter().map(|i| i.position.as_vec3().to_array());
        let half_sizes = instanced
            .instances
            .iter()
            .map(|i| (i.size * 0.5).as_vec3().to_array());
        let fallback = instanced.material.color;
        let colors = instanced
            .instances
            .iter()
            .map(|i| color(i.color.unwrap_or(fallback)));
        match instanced.shape {
            Shape::Cube => self.send(
                path,
                &Boxes3D::from_centers_and_half_sizes(centers, half_sizes).with_colors(colors),
            ),
            Shape::Sphere => self.send(
                path,
                &Ellipsoids3D::from_centers_and_half_sizes(centers, half_sizes).with_colors(colors),
            ),
            _ => self.send(path, &Points3D::new(centers).with_colors(colors)),
        }
    }

    fn text(&self, path: &str, text: &Text) {
        self.send(
            path,
            &Points3D::new([[0.0, 0.0, 0.0]])
                .with_labels([text.text.as_str()])
                .with_radii([(text.height * 0.1) as f32])
                .with_colors([color(text.material.color)]),
        );
    }

    /// One point per cell; the grid object is centered on the map.
    fn grid(&self, path: &str, grid: &Grid) {
        let resolution = grid.resolution as f32;
        let width = (grid.width as usize).max(1);
        let half = [
            grid.width as f32 * resolution * 0.5,
            grid.height as f32 * resolution * 0.5,
        ];
        let centers = (0..grid.texels.len()).map(|index| {
            let (row, col) = (index / width, index % width);
            [
                (col as f32 + 0.5) * resolution - half[0],
                (row as f32 + 0.5) * resolution - half[1],
                0.0,
            ]
        });
        let colors = grid
            .texels
            .iter()
            .map(|[r, g, b, a]| Color::from_unmultiplied_rgba(*r, *g, *b, *a));
        self.send(
            path,
            &Points3D::new(centers)
                .with_colors(colors)
                .with_radii([resolution * 0.5]),
        );
    }
}

impl RenderSink for RerunSink {
    fn draw(&mut self, path: &str, _world: &Pose, object: &Object3D) {
        let position = object.position.as_vec3().to_array();
        let q = object.orientation.as_quat();
        let scale = object.scale.as_vec3().to_array();
        self.send(
            path,
            &Transform3D::from_translation_rotation_scale(
                position,
                rerun::Quaternion::from_xyzw([q.x, q.y, q.z, q.w]),
                scale,
            ),
        );

        match &object.kind {
            ObjectKind::Group => {}
            ObjectKind::Mesh(mesh) => self.mesh(path, mesh),
            ObjectKind::Lines(lines) => self.lines(path, lines),
            ObjectKind::Points(points) => self.points(path, points),
            ObjectKind::Instanced(instanced) => self.instanced(path, instanced),
            ObjectKind::Text(text) => self.text(path, text),
            ObjectKind::Grid(grid) => self.grid(path, grid),
        }
    }

    fn remove(&mut self, path: &str) {
        self.send(path, &Clear::recursive());
    }
}

fn color([r, g, b, a]: Rgba) -> Color {
    let channel = |v: f32| (v.clamp(0.0, 1.0) * 255.0).round() as u8;
    Color::from_unmultiplied_rgba(channel(r), channel(g), channel(b), channel(a))
}

/// Whole triangles only, with one color per vertex.
fn triangle_vertices(
    positions: &[glam::DVec3],
    colors: Option<&[Rgba]>,
    fallback: Color,
) -> (Vec<[f32; 3]>, Vec<Color>) {
    let count = positions.len() - positions.len() % 3;
    let vertices = positions[..count]
        .iter()
        .map(|p| p.as_vec3().to_array())
        .collect();
    let colors = (0..count)
        .map(|i| {
            colors
                .and_then(|colors| colors.get(i))
                .map_or(fallback, |&c| color(c))
        })
        .collect();
    (vertices, colors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::DVec3;

    #[test]
    fn partial_triangles_never_reach_the_mesh() {
        let positions = vec![DVec3::ZERO, DVec3::X, DVec3::Y, DVec3::Z];
        let red = [1.0, 0.0, 0.0, 1.0];
        let fallback = color([0.0, 1.0, 0.0, 1.0]);

        let (vertices, colors) = triangle_vertices(&positions, Some(&[red]), fallback);
        assert_eq!(vertices.len(), 3);
        assert_eq!(colors, [color(red), fallback, fallback]);

        let (vertices, colors) = triangle_vertices(&positions[..2], None, fallback);
        assert!(vertices.is_empty());
        assert!(colors.is_empty());
    }
}
