/// Capture session state machine.
///
/// State transitions:
/// ```text
/// idle → initializing → running → stopping → idle
///   ↑          │
///   └──────────┘  (stop_recording before start_recording)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CaptureState {
    #[default]
    Idle,
    /// Endpoint acquired and format negotiated; the audio client is prepared but not started.
    Initializing,
    Running,
    Stopping,
}

impl CaptureState {
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }

    /// Whether `init_recording` has prepared an audio client that is still owned by the session.
    pub fn is_initialized(&self) -> bool {
        matches!(self, Self::Initializing | Self::Running)
    }

    /// Device and format state may only change while this returns true.
    pub fn allows_reconfiguration(&self) -> bool {
        matches!(self, Self::Idle | Self::Initializing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_idle() {
        assert!(CaptureState::default().is_idle());
    }

    #[test]
    fn reconfiguration_only_before_running() {
        assert!(CaptureState::Idle.allows_reconfiguration());
        assert!(CaptureState::Initializing.allows_reconfiguration());
        assert!(!CaptureState::Running.allows_reconfiguration());
        assert!(!CaptureState::Stopping.allows_reconfiguration());
    }

    #[test]
    fn initialized_covers_prepared_and_running() {
        assert!(!CaptureState::Idle.is_initialized());
        assert!(CaptureState::Initializing.is_initialized());
        assert!(CaptureState::Running.is_initialized());
        assert!(!CaptureState::Stopping.is_initialized());
    }
}
