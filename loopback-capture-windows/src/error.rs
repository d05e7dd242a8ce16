use loopback_capture_core::CaptureError;
use thiserror::Error;

/// A failed Win32/COM call, tagged with the call that failed.
#[derive(Debug, Error)]
#[error("{call} failed: {source}")]
pub struct WasapiError {
    pub call: &'static str,
    #[source]
    pub source: windows::core::Error,
}

impl From<WasapiError> for CaptureError {
    fn from(e: WasapiError) -> Self {
        CaptureError::Platform(e.to_string())
    }
}

pub(crate) trait ResultExt<T> {
    /// Name the Win32/COM call behind an error.
    fn call(self, call: &'static str) -> Result<T, WasapiError>;

    /// Same, surfaced as an unavailable device.
    fn unavailable(self, call: &'static str) -> Result<T, CaptureError>;
}

impl<T> ResultExt<T> for windows::core::Result<T> {
    fn call(self, call: &'static str) -> Result<T, WasapiError> {
        self.map_err(|source| WasapiError { call, source })
    }

    fn unavailable(self, call: &'static str) -> Result<T, CaptureError> {
        self.map_err(|source| CaptureError::DeviceUnavailable(WasapiError { call, source }.to_string()))
    }
}
