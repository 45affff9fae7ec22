//! Rigid poses, frame transforms, and the ray geometry used by the
//! interactive controls.

use glam::{DAffine3, DQuat, DVec3};
use serde::{Deserialize, Serialize};

/// Below this magnitude a denominator or a vector length is treated as zero.
pub const EPSILON: f64 = 1e-9;

/// Position + orientation of an object relative to its parent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    pub position: DVec3,
    pub orientation: DQuat,
}

impl Default for Pose {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Pose {
    pub const IDENTITY: Self = Self {
        position: DVec3::ZERO,
        orientation: DQuat::IDENTITY,
    };

    pub fn new(position: DVec3, orientation: DQuat) -> Self {
        Self {
            position,
            orientation,
        }
    }

    pub fn from_position(position: DVec3) -> Self {
        Self {
            position,
            orientation: DQuat::IDENTITY,
        }
    }

    /// `self ∘ other`: `other` expressed in the frame described by `self`.
    pub fn mul_pose(&self, other: &Pose) -> Pose {
        Pose {
            position: self.position + self.orientation * other.position,
            orientation: normalize_or_identity(self.orientation * other.orientation),
        }
    }

    pub fn inverse(&self) -> Pose {
        let orientation = normalize_or_identity(self.orientation).inverse();
        Pose {
            position: -(orientation * self.position),
            orientation,
        }
    }

    pub fn transform_point(&self, point: DVec3) -> DVec3 {
        self.position + self.orientation * point
    }

    pub fn to_affine(&self) -> DAffine3 {
        DAffine3::from_rotation_translation(self.orientation, self.position)
    }

    /// Drops any scale carried by the matrix.
    pub fn from_affine(affine: &DAffine3) -> Pose {
        let (_scale, rotation, translation) = affine.to_scale_rotation_translation();
        Pose {
            position: translation,
            orientation: normalize_or_identity(rotation),
        }
    }

    pub fn abs_diff_eq(&self, other: &Pose, max_abs_diff: f64) -> bool {
        self.position.abs_diff_eq(other.position, max_abs_diff)
            && same_rotation(self.orientation, other.orientation, max_abs_diff)
    }
}

/// Rigid transform from a named frame to the fixed frame.
///
/// Each update produces a new value; transforms are never edited in place.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    pub translation: DVec3,
    pub rotation: DQuat,
}

impl Default for Transform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Transform {
    pub const IDENTITY: Self = Self {
        translation: DVec3::ZERO,
        rotation: DQuat::IDENTITY,
    };

    pub fn new(translation: DVec3, rotation: DQuat) -> Self {
        Self {
            translation,
            rotation,
        }
    }

    pub fn from_translation(translation: DVec3) -> Self {
        Self {
            translation,
            rotation: DQuat::IDENTITY,
        }
    }

    pub fn as_pose(&self) -> Pose {
        Pose {
            position: self.translation,
            orientation: normalize_or_identity(self.rotation),
        }
    }

    /// `self ∘ child`: chains an edge transform below this one.
    pub fn then(&self, child: &Transform) -> Transform {
        let rotation = normalize_or_identity(self.rotation);
        Transform {
            translation: self.translation + rotation * child.translation,
            rotation: normalize_or_identity(rotation * child.rotation),
        }
    }

    /// Largest translation delta and rotation angle between two transforms.
    pub fn distance(&self, other: &Transform) -> (f64, f64) {
        let translation = self.translation.distance(other.translation);
        let a = normalize_or_identity(self.rotation);
        let b = normalize_or_identity(other.rotation);
        (translation, a.angle_between(b))
    }
}

/// World pose of a local pose held in a frame: `transform ∘ local`.
///
/// Pure in both arguments. The rotation is re-normalized before it is applied
/// and the result orientation is re-normalized again, so feeding the same
/// inputs always yields the same bits.
pub fn compose(local: &Pose, transform: &Transform) -> Pose {
    let rotation = normalize_or_identity(transform.rotation);
    Pose {
        position: rotation * local.position + transform.translation,
        orientation: normalize_or_identity(rotation * local.orientation),
    }
}

pub fn normalize_or_identity(q: DQuat) -> DQuat {
    let length = q.length();
    if !length.is_finite() || length < EPSILON {
        DQuat::IDENTITY
    } else {
        q / length
    }
}

/// Quaternions `q` and `-q` describe the same rotation.
pub fn same_rotation(a: DQuat, b: DQuat, max_abs_diff: f64) -> bool {
    a.abs_diff_eq(b, max_abs_diff) || a.abs_diff_eq(-b, max_abs_diff)
}

/// Rotation about `axis`, or `None` when the axis has no usable length.
pub fn axis_angle(axis: DVec3, angle: f64) -> Option<DQuat> {
    let axis = axis.try_normalize()?;
    Some(DQuat::from_axis_angle(axis, angle))
}

/// X axis of a control orientation, the convention interactive marker
/// controls use for their working axis.
pub fn control_axis(orientation: DQuat) -> DVec3 {
    normalize_or_identity(orientation) * DVec3::X
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ray {
    pub origin: DVec3,
    pub direction: DVec3,
}

impl Ray {
    /// `None` when the direction is degenerate.
    pub fn new(origin: DVec3, direction: DVec3) -> Option<Self> {
        Some(Self {
            origin,
            direction: direction.try_normalize()?,
        })
    }

    pub fn at(&self, t: f64) -> DVec3 {
        self.origin + self.direction * t
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Plane {
    pub point: DVec3,
    pub normal: DVec3,
}

impl Plane {
    pub fn new(point: DVec3, normal: DVec3) -> Option<Self> {
        Some(Self {
            point,
            normal: normal.try_normalize()?,
        })
    }
}

/// Where `ray` crosses `plane`.
///
/// `None` when the ray runs parallel to the plane or the hit lies behind the
/// ray origin.
pub fn intersect_plane(ray: &Ray, plane: &Plane) -> Option<DVec3> {
    let denominator = plane.normal.dot(ray.direction);
    if denominator.abs() < EPSILON {
        return None;
    }
    let t = plane.normal.dot(plane.point - ray.origin) / denominator;
    if t < 0.0 {
        return None;
    }
    Some(ray.at(t))
}

/// Parameter along `axis` of the point closest to `ray`.
///
/// `None` when the two lines are parallel.
pub fn closest_axis_parameter(axis: &Ray, ray: &Ray) -> Option<f64> {
    let w0 = axis.origin - ray.origin;
    let a = axis.direction.dot(axis.direction);
    let b = axis.direction.dot(ray.direction);
    let c = ray.direction.dot(ray.direction);
    let d = axis.direction.dot(w0);
    let e = ray.direction.dot(w0);
    let denominator = a * c - b * b;
    if denominator.abs() < EPSILON {
        return None;
    }
    Some((b * e - c * d) / denominator)
}

/// Signed angle from `from` to `to` about `axis`, both projected onto the
/// plane normal to `axis`.
pub fn signed_angle_about(axis: DVec3, from: DVec3, to: DVec3) -> Option<f64> {
    let axis = axis.try_normalize()?;
    let from = (from - axis * from.dot(axis)).try_normalize()?;
    let to = (to - axis * to.dot(axis)).try_normalize()?;
    let sin = axis.dot(from.cross(to));
    let cos = from.dot(to);
    Some(sin.atan2(cos))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::FRAC_PI_2;

    #[test]
    fn compose_rotates_then_translates() {
        let local = Pose::from_position(DVec3::new(1.0, 0.0, 0.0));
        let transform = Transform::new(
            DVec3::new(0.0, 0.0, 2.0),
            DQuat::from_rotation_z(FRAC_PI_2),
        );
        let world = compose(&local, &transform);
        assert!(world.position.abs_diff_eq(DVec3::new(0.0, 1.0, 2.0), 1e-12));
        assert!(same_rotation(
            world.orientation,
            DQuat::from_rotation_z(FRAC_PI_2),
            1e-12
        ));
    }

    #[test]
    fn compose_applies_transform_rotation_on_top_of_local() {
        let local = Pose::new(DVec3::ZERO, DQuat::from_rotation_x(FRAC_PI_2));
        let transform = Transform::new(DVec3::ZERO, DQuat::from_rotation_z(FRAC_PI_2));
        let world = compose(&local, &transform);
        let expected = DQuat::from_rotation_z(FRAC_PI_2) * DQuat::from_rotation_x(FRAC_PI_2);
        assert!(same_rotation(world.orientation, expected, 1e-12));
    }

    #[test]
    fn compose_is_bit_identical_on_repeat() {
        let local = Pose::new(
            DVec3::new(0.3, -1.2, 4.5),
            DQuat::from_xyzw(0.1, 0.2, 0.3, 0.9),
        );
        let transform = Transform::new(
            DVec3::new(7.0, 8.0, -9.0),
            DQuat::from_xyzw(0.4, -0.1, 0.2, 0.8),
        );
        let first = compose(&local, &transform);
        let second = compose(&local, &transform);
        assert_eq!(first.position.to_array(), second.position.to_array());
        assert_eq!(first.orientation.to_array(), second.orientation.to_array());
    }

    #[test]
    fn unnormalized_rotation_is_normalized_before_use() {
        let local = Pose::from_position(DVec3::X);
        let transform = Transform::new(DVec3::ZERO, DQuat::from_xyzw(0.0, 0.0, 0.0, 2.0));
        let world = compose(&local, &transform);
        assert!(world.position.abs_diff_eq(DVec3::X, 1e-12));
    }

    #[test]
    fn parallel_ray_has_no_plane_hit() {
        let ray = Ray::new(DVec3::new(0.0, 0.0, 1.0), DVec3::X).unwrap();
        let plane = Plane::new(DVec3::ZERO, DVec3::Z).unwrap();
        assert_eq!(intersect_plane(&ray, &plane), None);

        let down = Ray::new(DVec3::new(2.0, 3.0, 1.0), -DVec3::Z).unwrap();
        let hit = intersect_plane(&down, &plane).unwrap();
        assert!(hit.abs_diff_eq(DVec3::new(2.0, 3.0, 0.0), 1e-12));
    }

    #[test]
    fn degenerate_vectors_are_rejected() {
        assert!(Ray::new(DVec3::ZERO, DVec3::ZERO).is_none());
        assert!(axis_angle(DVec3::ZERO, 1.0).is_none());
        assert!(signed_angle_about(DVec3::Z, DVec3::Z, DVec3::X).is_none());
    }

    #[test]
    fn closest_axis_parameter_finds_skew_line_foot() {
        let axis = Ray::new(DVec3::ZERO, DVec3::X).unwrap();
        let ray = Ray::new(DVec3::new(3.0, 0.0, 5.0), -DVec3::Z).unwrap();
        let t = closest_axis_parameter(&axis, &ray).unwrap();
        assert!((t - 3.0).abs() < 1e-12);

        let parallel = Ray::new(DVec3::new(0.0, 1.0, 0.0), DVec3::X).unwrap();
        assert!(closest_axis_parameter(&axis, &parallel).is_none());
    }

    #[test]
    fn signed_angle_respects_axis_direction() {
        let angle = signed_angle_about(DVec3::Z, DVec3::X, DVec3::Y).unwrap();
        assert!((angle - FRAC_PI_2).abs() < 1e-12);
        let angle = signed_angle_about(-DVec3::Z, DVec3::X, DVec3::Y).unwrap();
        assert!((angle + FRAC_PI_2).abs() < 1e-12);
    }

    #[test]
    fn pose_inverse_round_trips() {
        let pose = Pose::new(DVec3::new(1.0, 2.0, 3.0), DQuat::from_rotation_y(0.7));
        let identity = pose.mul_pose(&pose.inverse());
        assert!(identity.abs_diff_eq(&Pose::IDENTITY, 1e-12));
    }
}
