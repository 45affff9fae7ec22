use serde::{Deserialize, Serialize};

use super::std_msgs::Header;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Octomap {
    pub header: Header,
    pub binary: bool,
    /// Tree class name, `"OcTree"` or `"ColorOcTree"`.
    pub id: String,
    pub resolution: f64,
    pub data: Vec<i8>,
}
