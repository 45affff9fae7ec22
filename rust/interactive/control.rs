//! Interactive marker controls: interaction modes, their visuals, and the
//! pointer geometry that turns a drag into a new pose.

use std::f64::consts::FRAC_PI_2;

use glam::{DQuat, DVec3};

use crate::{
    logging::Logger,
    markers::build_object,
    math::{
        Plane, Pose, Ray, Transform, axis_angle, closest_axis_parameter, control_axis,
        intersect_plane, normalize_or_identity, signed_angle_about,
    },
    msgs::visualization_msgs::{InteractiveMarkerControl, interactive_marker_control as code},
    scene::{Object3D, Resources, Rgba, Shape, object::ArrowShape, shapes},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InteractionMode {
    None,
    Menu,
    Button,
    MoveAxis,
    MovePlane,
    RotateAxis,
    /// Translates in the control plane.
    MoveRotate,
    /// Translates in the plane facing the viewer.
    Move3d,
    Rotate3d,
    MoveRotate3d,
}

impl InteractionMode {
    pub fn from_code(value: u8) -> Option<Self> {
        Some(match value {
            code::NONE => Self::None,
            code::MENU => Self::Menu,
            code::BUTTON => Self::Button,
            code::MOVE_AXIS => Self::MoveAxis,
            code::MOVE_PLANE => Self::MovePlane,
            code::ROTATE_AXIS => Self::RotateAxis,
            code::MOVE_ROTATE => Self::MoveRotate,
            code::MOVE_3D => Self::Move3d,
            code::ROTATE_3D => Self::Rotate3d,
            code::MOVE_ROTATE_3D => Self::MoveRotate3d,
            _ => return None,
        })
    }

    /// Modes that respond to a pointer drag.
    pub fn is_draggable(self) -> bool {
        matches!(
            self,
            Self::MoveAxis | Self::MovePlane | Self::RotateAxis | Self::MoveRotate | Self::Move3d
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrientationMode {
    /// Follows the marker orientation.
    Inherit,
    /// Keeps its orientation in the marker's frame.
    Fixed,
    /// Working axis points at the viewer.
    ViewFacing,
}

impl OrientationMode {
    pub fn from_code(value: u8) -> Option<Self> {
        Some(match value {
            code::INHERIT => Self::Inherit,
            code::FIXED => Self::Fixed,
            code::VIEW_FACING => Self::ViewFacing,
            _ => return None,
        })
    }
}

/// One control of an interactive marker, parsed from its message.
#[derive(Debug, Clone)]
pub struct Control {
    pub name: String,
    pub mode: InteractionMode,
    pub orientation_mode: OrientationMode,
    pub orientation: DQuat,
    pub always_visible: bool,
    pub description: String,
}

impl Control {
    /// Unknown modes degrade to an inert control.
    pub fn from_message(message: &InteractiveMarkerControl, log: &Logger) -> Self {
        let mode = InteractionMode::from_code(message.interaction_mode).unwrap_or_else(|| {
            log.warn(format_args!(
                "control {:?} has unknown interaction mode {}",
                message.name, message.interaction_mode
            ));
            InteractionMode::None
        });
        if matches!(mode, InteractionMode::Rotate3d | InteractionMode::MoveRotate3d) {
            log.warn(format_args!(
                "control {:?} uses unsupported mode {mode:?}, it will not respond to drags",
                message.name
            ));
        }
        let orientation_mode =
            OrientationMode::from_code(message.orientation_mode).unwrap_or_else(|| {
                log.warn(format_args!(
                    "control {:?} has unknown orientation mode {}",
                    message.name, message.orientation_mode
                ));
                OrientationMode::Inherit
            });
        Self {
            name: message.name.clone(),
            mode,
            orientation_mode,
            orientation: message.orientation.into(),
            always_visible: message.always_visible,
            description: message.description.clone(),
        }
    }

    /// Orientation of the control relative to the marker whose local
    /// orientation is `marker`.
    pub fn relative_orientation(&self, marker: DQuat) -> DQuat {
        match self.orientation_mode {
            OrientationMode::Fixed => {
                normalize_or_identity(normalize_or_identity(marker).inverse() * self.orientation)
            }
            OrientationMode::Inherit | OrientationMode::ViewFacing => self.orientation,
        }
    }

    /// Working axis in the fixed frame.
    pub fn world_axis(&self, marker_world: &Pose, frame: &Transform, view: DVec3) -> DVec3 {
        match self.orientation_mode {
            OrientationMode::Inherit => {
                control_axis(marker_world.orientation * self.orientation)
            }
            OrientationMode::Fixed => control_axis(frame.rotation * self.orientation),
            OrientationMode::ViewFacing => -view,
        }
    }

    /// Captures the reference geometry for a drag that starts with `ray`
    /// hitting the control at `point`. `None` when the mode does not drag or
    /// the geometry is degenerate.
    pub fn begin_drag(
        &self,
        marker_world: &Pose,
        frame: &Transform,
        ray: &Ray,
        point: Option<DVec3>,
    ) -> Option<DragReference> {
        let center = marker_world.position;
        let axis = self.world_axis(marker_world, frame, ray.direction);
        match self.mode {
            InteractionMode::MoveAxis => {
                let axis = Ray::new(center, axis)?;
                let start = match closest_axis_parameter(&axis, ray) {
                    Some(t) => t,
                    None => (point? - center).dot(axis.direction),
                };
                Some(DragReference::Axis { axis, start })
            }
            InteractionMode::MovePlane | InteractionMode::MoveRotate => {
                let plane = Plane::new(center, axis)?;
                let start = intersect_plane(ray, &plane).or(point)?;
                Some(DragReference::Plane { plane, start })
            }
            InteractionMode::Move3d => {
                let plane = Plane::new(center, ray.direction)?;
                let start = intersect_plane(ray, &plane).or(point)?;
                Some(DragReference::Plane { plane, start })
            }
            InteractionMode::RotateAxis => {
                let plane = Plane::new(center, axis)?;
                let start = intersect_plane(ray, &plane).or(point)?;
                let from = start - center;
                if from.length_squared() < crate::math::EPSILON {
                    return None;
                }
                Some(DragReference::Rotation { plane, from })
            }
            _ => None,
        }
    }
}

/// Geometry fixed at drag start, against which every later pointer ray is
/// measured.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DragReference {
    Axis { axis: Ray, start: f64 },
    Plane { plane: Plane, start: DVec3 },
    Rotation { plane: Plane, from: DVec3 },
}

impl DragReference {
    /// World pose of the marker for the pointer at `ray`, or `None` when the
    /// ray gives no usable intersection.
    pub fn target(&self, start_world: &Pose, ray: &Ray) -> Option<Pose> {
        match self {
            Self::Axis { axis, start } => {
                let t = closest_axis_parameter(axis, ray)?;
                Some(Pose::new(
                    start_world.position + axis.direction * (t - start),
                    start_world.orientation,
                ))
            }
            Self::Plane { plane, start } => {
                let hit = intersect_plane(ray, plane)?;
                Some(Pose::new(
                    start_world.position + (hit - *start),
                    start_world.orientation,
                ))
            }
            Self::Rotation { plane, from } => {
                let hit = intersect_plane(ray, plane)?;
                let angle = signed_angle_about(plane.normal, *from, hit - plane.point)?;
                let rotation = axis_angle(plane.normal, angle)?;
                Some(Pose::new(
                    start_world.position,
                    normalize_or_identity(rotation * start_world.orientation),
                ))
            }
        }
    }
}

const AXIS_COLORS: [Rgba; 3] = [
    [1.0, 0.0, 0.0, 1.0],
    [0.0, 1.0, 0.0, 1.0],
    [0.0, 0.0, 1.0, 1.0],
];

/// Color of a default visual: red, green or blue by the axis the control
/// orientation points along.
fn axis_color(orientation: DQuat) -> Rgba {
    let axis = control_axis(orientation).abs();
    if axis.x >= axis.y && axis.x >= axis.z {
        AXIS_COLORS[0]
    } else if axis.y >= axis.z {
        AXIS_COLORS[1]
    } else {
        AXIS_COLORS[2]
    }
}

/// Renderable for a control: its own markers when it carries any, otherwise
/// a default visual for its mode, sized by the marker `scale`.
pub fn build_visual(
    control: &Control,
    message: &InteractiveMarkerControl,
    scale: f64,
    resources: &Resources,
    log: &Logger,
) -> Object3D {
    let mut group = Object3D::group(control.name.clone());
    if !message.markers.is_empty() {
        for marker in &message.markers {
            let visual = build_object(marker, resources, log).with_pose(&marker.pose.into());
            group = group.with_child(visual);
        }
        return group;
    }

    let color = axis_color(control.orientation);
    let scale = if scale > 0.0 { scale } else { 1.0 };
    match control.mode {
        InteractionMode::MoveAxis => {
            for direction in [DVec3::X, DVec3::NEG_X] {
                let shape = ArrowShape {
                    origin: direction * 0.5 * scale,
                    direction,
                    length: 0.5 * scale,
                    shaft_diameter: 0.0,
                    head_diameter: 0.2 * scale,
                    head_length: 0.5 * scale,
                };
                group = group.with_child(shapes::arrow(resources, shape, color));
            }
        }
        InteractionMode::RotateAxis
        | InteractionMode::MovePlane
        | InteractionMode::MoveRotate => {
            // disc lies in the plane normal to the control's X axis
            let normal_to_x = Pose::new(DVec3::ZERO, DQuat::from_rotation_y(FRAC_PI_2));
            let disc =
                shapes::disc(resources, 0.5 * scale, 0.65 * scale, color).with_pose(&normal_to_x);
            group = group.with_child(disc);
        }
        InteractionMode::Move3d => {
            let handle = shapes::solid(resources, "handle", Shape::Sphere, [1.0, 1.0, 0.0, 0.6])
                .with_scale(DVec3::splat(0.3 * scale));
            group = group.with_child(handle);
        }
        InteractionMode::None
        | InteractionMode::Menu
        | InteractionMode::Button
        | InteractionMode::Rotate3d
        | InteractionMode::MoveRotate3d => {}
    }
    group
}
