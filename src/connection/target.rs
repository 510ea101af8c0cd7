use serde::{Deserialize, Serialize};
use std::fmt;

/// One stream to open: which camera, which of its parallel connections, and where
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionTarget {
    pub camera_id: String,
    /// 1-based index among the connections opened to the same camera
    pub connection_number: u32,
    pub stream_url: String,
}

impl ConnectionTarget {
    pub fn new<S: Into<String>>(camera_id: S, connection_number: u32, stream_url: S) -> Self {
        Self {
            camera_id: camera_id.into(),
            connection_number,
            stream_url: stream_url.into(),
        }
    }

    /// Stable identifier used in logs and reports
    pub fn connection_id(&self) -> String {
        format!("camera_{}_conn_{}", self.camera_id, self.connection_number)
    }
}

impl fmt::Display for ConnectionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "camera_{}_conn_{}", self.camera_id, self.connection_number)
    }
}
