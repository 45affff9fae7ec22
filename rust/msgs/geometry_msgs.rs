use glam::{DQuat, DVec3};
use serde::{Deserialize, Serialize};

use super::std_msgs::Header;
use crate::math;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Vector3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

pub type Point = Vector3;

impl Vector3 {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
}

impl From<Vector3> for DVec3 {
    fn from(v: Vector3) -> Self {
        DVec3::new(v.x, v.y, v.z)
    }
}

impl From<DVec3> for Vector3 {
    fn from(v: DVec3) -> Self {
        Self::new(v.x, v.y, v.z)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Point32 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl From<Point32> for DVec3 {
    fn from(p: Point32) -> Self {
        DVec3::new(p.x as f64, p.y as f64, p.z as f64)
    }
}

/// An all-zero quaternion (what an unset field deserializes to) is read as
/// identity by the math layer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Quaternion {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub w: f64,
}

impl Quaternion {
    pub const IDENTITY: Self = Self {
        x: 0.0,
        y: 0.0,
        z: 0.0,
        w: 1.0,
    };
}

impl From<Quaternion> for DQuat {
    fn from(q: Quaternion) -> Self {
        math::normalize_or_identity(DQuat::from_xyzw(q.x, q.y, q.z, q.w))
    }
}

impl From<DQuat> for Quaternion {
    fn from(q: DQuat) -> Self {
        Self {
            x: q.x,
            y: q.y,
            z: q.z,
            w: q.w,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Pose {
    pub position: Point,
    pub orientation: Quaternion,
}

impl From<Pose> for math::Pose {
    fn from(p: Pose) -> Self {
        math::Pose::new(p.position.into(), p.orientation.into())
    }
}

impl From<math::Pose> for Pose {
    fn from(p: math::Pose) -> Self {
        Self {
            position: p.position.into(),
            orientation: p.orientation.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoseStamped {
    pub header: Header,
    pub pose: Pose,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoseArray {
    pub header: Header,
    pub poses: Vec<Pose>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoseWithCovariance {
    pub pose: Pose,
    pub covariance: Vec<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Polygon {
    pub points: Vec<Point32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolygonStamped {
    pub header: Header,
    pub polygon: Polygon,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Transform {
    pub translation: Vector3,
    pub rotation: Quaternion,
}

impl From<Transform> for math::Transform {
    fn from(t: Transform) -> Self {
        math::Transform::new(t.translation.into(), t.rotation.into())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransformStamped {
    pub header: Header,
    pub child_frame_id: String,
    pub transform: Transform,
}

impl From<&edgefirst_schemas::geometry_msgs::TransformStamped> for TransformStamped {
    fn from(tf: &edgefirst_schemas::geometry_msgs::TransformStamped) -> Self {
        let t = &tf.transform;
        Self {
            header: Header {
                stamp: super::std_msgs::Time {
                    sec: tf.header.stamp.sec,
                    nanosec: tf.header.stamp.nanosec,
                },
                frame_id: tf.header.frame_id.clone(),
            },
            child_frame_id: tf.child_frame_id.clone(),
            transform: Transform {
                translation: Vector3::new(t.translation.x, t.translation.y, t.translation.z),
                rotation: Quaternion {
                    x: t.rotation.x,
                    y: t.rotation.y,
                    z: t.rotation.z,
                    w: t.rotation.w,
                },
            },
        }
    }
}
