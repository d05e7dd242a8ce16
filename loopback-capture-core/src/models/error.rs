use std::time::Duration;

use thiserror::Error;

/// Errors surfaced by the loopback capture engine.
///
/// Transient packet conditions (empty buffer, silent flag) never show up
/// here; they are absorbed by the capture thread.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CaptureError {
    /// Call made in the wrong order or while the session is in the wrong state.
    #[error("configuration error: {0}")]
    ConfigurationError(String),

    /// Enumeration or default-endpoint resolution failed at the platform level.
    #[error("device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("device index {index} is out of range (count {count})")]
    IndexOutOfRange { index: u16, count: u16 },

    /// No (rate, channels) pair of the priority matrix was accepted.
    #[error("no supported shared-mode capture format")]
    FormatNegotiationFailure,

    /// Data timeout or a hard packet-acquisition failure on the capture thread.
    #[error("fatal stream error: {0}")]
    FatalStreamError(String),

    #[error("capture thread did not confirm startup within {0:?}")]
    StartupTimeout(Duration),

    /// The capture thread was abandoned after not exiting in time; the session is idle regardless.
    #[error("capture thread did not exit within {0:?}")]
    ShutdownTimeout(Duration),

    /// The capture thread exited through any path other than the shutdown signal.
    #[error("capture thread terminated prematurely: {0}")]
    PrematureTermination(String),

    #[error("platform error: {0}")]
    Platform(String),
}

impl CaptureError {
    /// Whether this error ends a running capture stream.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::FatalStreamError(_) | Self::PrematureTermination(_))
    }
}
