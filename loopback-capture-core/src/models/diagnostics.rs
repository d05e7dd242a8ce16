use serde::Serialize;

use super::error::CaptureError;
use super::format::CaptureFormat;

/// How the capture thread left its loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ThreadExit {
    /// The shutdown signal was observed.
    Shutdown,
    /// Any other exit path: data timeout, packet failure, overflow, torn-down state.
    Premature(CaptureError),
}

impl ThreadExit {
    pub fn is_clean(&self) -> bool {
        matches!(self, Self::Shutdown)
    }

    pub fn describe(&self) -> String {
        match self {
            Self::Shutdown => "shutdown".into(),
            Self::Premature(e) => e.to_string(),
        }
    }
}

/// Snapshot of the engine's counters, serializable for export.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CaptureDiagnostics {
    /// Fresh v4 UUID per `start_recording`.
    pub session_id: Option<String>,
    pub started_at: Option<String>,
    pub format: Option<CaptureFormat>,
    pub recorded_samples: u64,
    pub delivered_blocks: u64,
    pub silent_packets: u64,
    pub capture_delay_ms: u32,
    pub sync_buffer_bytes: usize,
    /// Stream latency plus device period.
    pub extra_delay_ms: f64,
    pub priority_boost: bool,
    pub last_exit: Option<String>,
}

impl CaptureDiagnostics {
    pub fn new_session() -> Self {
        Self {
            session_id: Some(uuid::Uuid::new_v4().to_string()),
            started_at: Some(chrono::Utc::now().to_rfc3339()),
            ..Default::default()
        }
    }

    pub fn to_json(&self) -> Result<String, CaptureError> {
        serde_json::to_string_pretty(self)
            .map_err(|e| CaptureError::Platform(format!("failed to serialize diagnostics: {}", e)))
    }
}
