//! # loopback-capture-windows
//!
//! Windows WASAPI backend for loopback-capture-core.
//!
//! Provides:
//! - `WasapiBackend`: render-endpoint enumeration via the MMDevice API, MMCSS
//!   boost and COM scope for the capture thread, key-press hint
//! - `WasapiCaptureClient`: shared-mode, event-driven loopback stream on one endpoint
//!
//! ## Platform Requirements
//! - Windows 10 1703+ (build 15063) for event-driven loopback
//! - Visual Studio Build Tools 2022 + Windows SDK for linking
//!
//! ## Usage
//! ```ignore
//! use loopback_capture_core::{EngineConfig, LoopbackDevice};
//! use loopback_capture_windows::{ComScope, WasapiBackend};
//!
//! let _com = ComScope::initialize_mta()?;
//! let mut device = LoopbackDevice::new(WasapiBackend::new()?, EngineConfig::default())?;
//! device.attach_sink(sink);
//! device.init()?;
//! device.init_recording()?;
//! device.start_recording()?;
//! ```

pub mod clock;

#[cfg(target_os = "windows")]
pub mod com;
#[cfg(target_os = "windows")]
pub mod device_enumerator;
#[cfg(target_os = "windows")]
pub mod error;
#[cfg(target_os = "windows")]
mod keyboard;
#[cfg(target_os = "windows")]
mod mmcss;
#[cfg(target_os = "windows")]
pub mod wasapi_loopback;

#[cfg(target_os = "windows")]
pub use com::ComScope;
#[cfg(target_os = "windows")]
pub use device_enumerator::{CaptureThreadScope, WasapiBackend, WasapiEndpoint};
#[cfg(target_os = "windows")]
pub use error::WasapiError;
#[cfg(target_os = "windows")]
pub use wasapi_loopback::WasapiCaptureClient;
