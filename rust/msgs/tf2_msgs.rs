use serde::{Deserialize, Serialize};

use super::geometry_msgs::TransformStamped;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TFMessage {
    pub transforms: Vec<TransformStamped>,
}
