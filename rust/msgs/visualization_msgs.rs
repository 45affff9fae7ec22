use serde::{Deserialize, Serialize};

use super::{
    geometry_msgs::{Point, Pose, Quaternion, Vector3},
    std_msgs::{ColorRGBA, Duration, Header},
};

pub mod marker {
    pub const ARROW: i32 = 0;
    pub const CUBE: i32 = 1;
    pub const SPHERE: i32 = 2;
    pub const CYLINDER: i32 = 3;
    pub const LINE_STRIP: i32 = 4;
    pub const LINE_LIST: i32 = 5;
    pub const CUBE_LIST: i32 = 6;
    pub const SPHERE_LIST: i32 = 7;
    pub const POINTS: i32 = 8;
    pub const TEXT_VIEW_FACING: i32 = 9;
    pub const MESH_RESOURCE: i32 = 10;
    pub const TRIANGLE_LIST: i32 = 11;

    pub const ADD: i32 = 0;
    /// Deprecated upstream, never acted on.
    pub const MODIFY: i32 = 1;
    pub const DELETE: i32 = 2;
    pub const DELETEALL: i32 = 3;
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Marker {
    pub header: Header,
    pub ns: String,
    pub id: i32,
    #[serde(rename = "type")]
    pub kind: i32,
    pub action: i32,
    pub pose: Pose,
    pub scale: Vector3,
    pub color: ColorRGBA,
    pub lifetime: Duration,
    pub frame_locked: bool,
    pub points: Vec<Point>,
    pub colors: Vec<ColorRGBA>,
    pub text: String,
    pub mesh_resource: String,
    pub mesh_use_embedded_materials: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarkerArray {
    pub markers: Vec<Marker>,
}

pub mod menu_entry {
    pub const FEEDBACK: u8 = 0;
    pub const ROSRUN: u8 = 1;
    pub const ROSLAUNCH: u8 = 2;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MenuEntry {
    pub id: u32,
    /// `0` for top level entries.
    pub parent_id: u32,
    pub title: String,
    pub command: String,
    pub command_type: u8,
}

pub mod interactive_marker_control {
    pub const INHERIT: u8 = 0;
    pub const FIXED: u8 = 1;
    pub const VIEW_FACING: u8 = 2;

    pub const NONE: u8 = 0;
    pub const MENU: u8 = 1;
    pub const BUTTON: u8 = 2;
    pub const MOVE_AXIS: u8 = 3;
    pub const MOVE_PLANE: u8 = 4;
    pub const ROTATE_AXIS: u8 = 5;
    pub const MOVE_ROTATE: u8 = 6;
    pub const MOVE_3D: u8 = 7;
    pub const ROTATE_3D: u8 = 8;
    pub const MOVE_ROTATE_3D: u8 = 9;
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InteractiveMarkerControl {
    pub name: String,
    pub orientation: Quaternion,
    pub orientation_mode: u8,
    pub interaction_mode: u8,
    pub always_visible: bool,
    pub markers: Vec<Marker>,
    pub independent_marker_orientation: bool,
    pub description: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InteractiveMarker {
    pub header: Header,
    pub pose: Pose,
    pub name: String,
    pub description: String,
    pub scale: f32,
    pub menu_entries: Vec<MenuEntry>,
    pub controls: Vec<InteractiveMarkerControl>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InteractiveMarkerPose {
    pub header: Header,
    pub pose: Pose,
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InteractiveMarkerInit {
    pub server_id: String,
    pub seq_num: u64,
    pub markers: Vec<InteractiveMarker>,
}

pub mod interactive_marker_update {
    pub const KEEP_ALIVE: u8 = 0;
    pub const UPDATE: u8 = 1;
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InteractiveMarkerUpdate {
    pub server_id: String,
    pub seq_num: u64,
    #[serde(rename = "type")]
    pub kind: u8,
    pub markers: Vec<InteractiveMarker>,
    pub poses: Vec<InteractiveMarkerPose>,
    pub erases: Vec<String>,
}

pub mod interactive_marker_feedback {
    pub const KEEP_ALIVE: u8 = 0;
    pub const POSE_UPDATE: u8 = 1;
    pub const MENU_SELECT: u8 = 2;
    pub const BUTTON_CLICK: u8 = 3;
    pub const MOUSE_DOWN: u8 = 4;
    pub const MOUSE_UP: u8 = 5;
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InteractiveMarkerFeedback {
    pub header: Header,
    pub client_id: String,
    pub marker_name: String,
    pub control_name: String,
    pub event_type: u8,
    pub pose: Pose,
    pub menu_entry_id: u32,
    pub mouse_point: Point,
    pub mouse_point_valid: bool,
}
