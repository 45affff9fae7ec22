//! Conversion of zenoh samples into the messages the scene clients consume.
//!
//! ROS 2 topics are published under the `rt` prefix, so `/scan` is read from
//! the `rt/scan` key. Payloads are either JSON (rosbridge style) or CDR; CDR
//! payloads are decoded with the typed message for the topic's declared
//! schema and handed on as JSON values.

use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;

use crate::{
    error::{Error, Result},
    msgs::{
        self,
        geometry_msgs::{PolygonStamped, PoseArray, PoseStamped},
        nav_msgs::{OccupancyGrid, Path},
        octomap_msgs::Octomap,
        sensor_msgs::{LaserScan, PointCloud2},
        tf2_msgs::TFMessage,
    },
};

pub const TF_TOPIC: &str = "/tf";
pub const TF_STATIC_TOPIC: &str = "/tf_static";
pub const TF_MESSAGE_TYPE: &str = "tf2_msgs/TFMessage";

/// The zenoh key a ROS topic is bridged on.
pub fn key_expr(topic: &str) -> String {
    format!("rt/{}", topic.trim_start_matches('/'))
}

/// Decodes one payload published on a topic of type `message_type`.
pub fn decode(message_type: &str, encoding: &str, payload: &[u8]) -> Result<Value> {
    if encoding.contains("json") {
        return Ok(serde_json::from_slice(payload)?);
    }
    match message_type {
        "sensor_msgs/LaserScan" => typed::<LaserScan>(encoding, payload),
        "sensor_msgs/PointCloud2" => {
            let pcd = cdr::deserialize::<edgefirst_schemas::sensor_msgs::PointCloud2>(payload)?;
            Ok(serde_json::to_value(PointCloud2::from(pcd))?)
        }
        "nav_msgs/OccupancyGrid" => typed::<OccupancyGrid>(encoding, payload),
        "nav_msgs/Path" => typed::<Path>(encoding, payload),
        "geometry_msgs/PoseStamped" => typed::<PoseStamped>(encoding, payload),
        "geometry_msgs/PoseArray" => typed::<PoseArray>(encoding, payload),
        "geometry_msgs/PolygonStamped" => typed::<PolygonStamped>(encoding, payload),
        "octomap_msgs/Octomap" => typed::<Octomap>(encoding, payload),
        TF_MESSAGE_TYPE => {
            // A TFMessage is a single sequence field, so its CDR body is the
            // sequence itself.
            let transforms = cdr::deserialize::<
                Vec<edgefirst_schemas::geometry_msgs::TransformStamped>,
            >(payload)?;
            let message = TFMessage {
                transforms: transforms.iter().map(Into::into).collect(),
            };
            Ok(serde_json::to_value(message)?)
        }
        other => Err(Error::decode(
            other,
            format!("no CDR decoder, publish it as JSON (got {encoding:?})"),
        )),
    }
}

fn typed<T: DeserializeOwned + Serialize>(encoding: &str, payload: &[u8]) -> Result<Value> {
    let message: T = msgs::from_payload(encoding, payload)?;
    Ok(serde_json::to_value(message)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::msgs::std_msgs::Header;

    #[test]
    fn topics_map_to_rt_keys() {
        assert_eq!(key_expr("/scan"), "rt/scan");
        assert_eq!(key_expr("tf_static"), "rt/tf_static");
    }

    #[test]
    fn json_payloads_pass_through() {
        let value = decode(
            "visualization_msgs/Marker",
            "application/json",
            br#"{"ns": "a", "id": 3}"#,
        )
        .unwrap();
        assert_eq!(value["id"], 3);
    }

    #[test]
    fn cdr_laser_scans_become_json() {
        let scan = LaserScan {
            header: Header {
                frame_id: "laser".into(),
                ..Default::default()
            },
            angle_increment: 0.5,
            range_max: 10.0,
            ranges: vec![1.0, 2.0],
            ..Default::default()
        };
        let bytes = cdr::serialize::<_, _, cdr::CdrLe>(&scan, cdr::Infinite).unwrap();
        let value = decode("sensor_msgs/LaserScan", "", &bytes).unwrap();
        let back: LaserScan = msgs::from_value(&value).unwrap();
        assert_eq!(back, scan);
    }

    #[test]
    fn cdr_transforms_become_json() {
        let mut message = TFMessage::default();
        let mut tf = crate::msgs::geometry_msgs::TransformStamped::default();
        tf.header.frame_id = "odom".into();
        tf.header.stamp.sec = 12;
        tf.child_frame_id = "base_link".into();
        tf.transform.translation.x = 1.5;
        tf.transform.rotation.w = 1.0;
        message.transforms.push(tf);

        let bytes = cdr::serialize::<_, _, cdr::CdrLe>(&message, cdr::Infinite).unwrap();
        let value = decode(TF_MESSAGE_TYPE, "", &bytes).unwrap();
        let back: TFMessage = msgs::from_value(&value).unwrap();
        assert_eq!(back, message);
    }

    #[test]
    fn unknown_cdr_types_are_rejected() {
        let err = decode("visualization_msgs/MarkerArray", "", &[0, 1, 0, 0]).unwrap_err();
        assert!(matches!(err, Error::Decode { .. }));
    }
}
