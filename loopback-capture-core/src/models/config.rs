use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::endpoint::EndpointRole;
use super::error::CaptureError;

/// Engine configuration.
///
/// Every field has a default, so a partial JSON document is enough:
/// ```json
/// { "stereo_recording": false, "data_wait_timeout_ms": 750 }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// How long `start_recording` waits for the capture thread to confirm startup (default: 1000).
    pub start_timeout_ms: u64,

    /// Join bound for `stop_recording` (default: 2000).
    pub stop_timeout_ms: u64,

    /// A wait longer than this with neither data nor shutdown is fatal (default: 500).
    pub data_wait_timeout_ms: u64,

    /// Try stereo before mono during negotiation (default: true).
    pub stereo_recording: bool,

    /// Role used until the first explicit selection (default: `default`).
    pub default_role: EndpointRole,

    /// Name given to the capture thread.
    pub thread_name: String,
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.start_timeout_ms == 0 {
            return Err("start timeout must be positive".into());
        }
        if self.stop_timeout_ms == 0 {
            return Err("stop timeout must be positive".into());
        }
        if self.data_wait_timeout_ms == 0 {
            return Err("data wait timeout must be positive".into());
        }
        if self.thread_name.is_empty() {
            return Err("thread name must not be empty".into());
        }
        Ok(())
    }

    pub fn from_json_str(json: &str) -> Result<Self, CaptureError> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| CaptureError::ConfigurationError(format!("invalid engine config: {}", e)))?;
        config.validate().map_err(CaptureError::ConfigurationError)?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, CaptureError> {
        let json = std::fs::read_to_string(path).map_err(|e| {
            CaptureError::ConfigurationError(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_json_str(&json)
    }

    pub fn start_timeout(&self) -> Duration {
        Duration::from_millis(self.start_timeout_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    pub fn data_wait_timeout(&self) -> Duration {
        Duration::from_millis(self.data_wait_timeout_ms)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            start_timeout_ms: 1000,
            stop_timeout_ms: 2000,
            data_wait_timeout_ms: 500,
            stereo_recording: true,
            default_role: EndpointRole::Default,
            thread_name: "loopback-capture".into(),
        }
    }
}
