use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::devices::MIN_DISCOVERY_INTERVAL;
use crate::protocol::client::ControlOptions;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Expected `Authorization` header value. Unset or empty disables the check.
    pub auth_token: Option<String>,
    pub devices_path: String,
    pub color_path: String,
    pub discovery_interval_ms: u64,
    pub scan_timeout_ms: u64,
    pub connect_timeout_ms: u64,
    pub wait_for_reply: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            auth_token: None,
            devices_path: String::from("./dump/devices.json.b64"),
            color_path: String::from("./dump/color.json.b64"),
            discovery_interval_ms: 2000,
            scan_timeout_ms: 500,
            connect_timeout_ms: 1500,
            wait_for_reply: true,
        }
    }
}

impl Settings {
    /// Reads settings from a JSON file. `Ok(None)` when the file cannot be read.
    pub fn from_file(path: &Path) -> Result<Option<Self>, serde_json::Error> {
        match std::fs::read_to_string(path) {
            Ok(content) => serde_json::from_str(&content).map(Some),
            Err(_) => Ok(None),
        }
    }

    /// Never shorter than [`MIN_DISCOVERY_INTERVAL`], so `0` cannot stall the ticker.
    pub fn discovery_interval(&self) -> Duration {
        Duration::from_millis(self.discovery_interval_ms).max(MIN_DISCOVERY_INTERVAL)
    }

    pub fn scan_timeout(&self) -> Duration {
        Duration::from_millis(self.scan_timeout_ms)
    }

    pub fn control_options(&self) -> ControlOptions {
        ControlOptions {
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            wait_for_reply: self.wait_for_reply,
            ..ControlOptions::default()
        }
    }
}
