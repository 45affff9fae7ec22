//! Wire message shapes.
//!
//! Field names and field order follow the ROS message definitions so the same
//! structs deserialize from rosbridge-style JSON and, for the flat messages,
//! from CDR. Every field carries a default so partially populated JSON still
//! parses.

pub mod geometry_msgs;
pub mod nav_msgs;
pub mod octomap_msgs;
pub mod sensor_msgs;
pub mod std_msgs;
pub mod tf2_msgs;
pub mod visualization_msgs;

use serde::de::DeserializeOwned;

use crate::error::Result;

/// Parses a message delivered by the transport as a typed message.
pub fn from_value<T: DeserializeOwned>(value: &serde_json::Value) -> Result<T> {
    Ok(T::deserialize(value)?)
}

/// Decodes a raw payload according to its declared encoding.
///
/// Anything that is not declared as JSON is treated as CDR.
pub fn from_payload<T: DeserializeOwned>(encoding: &str, payload: &[u8]) -> Result<T> {
    if encoding.contains("json") {
        Ok(serde_json::from_slice(payload)?)
    } else {
        Ok(cdr::deserialize::<T>(payload)?)
    }
}
