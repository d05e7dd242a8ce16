//! # loopback-capture-core
//!
//! Platform-agnostic loopback capture engine.
//!
//! Turns an audio *output* endpoint into a capture source delivering fixed
//! 10 ms PCM blocks with capture-delay estimates. Platform backends (Windows
//! WASAPI) implement the `AudioBackend` trait and plug into the generic
//! `LoopbackDevice`.
//!
//! ## Architecture
//!
//! ```text
//! loopback-capture-core (this crate)
//! ├── traits/       ← AudioBackend, CaptureClient, FrameSink
//! ├── models/       ← CaptureError, CaptureState, CaptureFormat, EngineConfig, endpoints, diagnostics
//! ├── processing/   ← format negotiation, SyncBuffer, capture-delay math
//! ├── session/      ← LoopbackDevice (controller), capture thread, cross-thread signals
//! └── mock          ← scripted backend for tests
//! ```

pub mod mock;
pub mod models;
pub mod processing;
pub mod session;
pub mod traits;

// Re-export key types at crate root for convenience.
pub use models::config::EngineConfig;
pub use models::diagnostics::{CaptureDiagnostics, ThreadExit};
pub use models::endpoint::{
    DeviceSelection, EndpointDescriptor, EndpointRole, EndpointStates, HardwareSupport, SelectionMode,
};
pub use models::error::CaptureError;
pub use models::format::{CaptureFormat, ChannelPriority, FormatCapabilities, FREQUENCY_PRIORITY};
pub use models::state::CaptureState;
pub use processing::sync_buffer::SyncBuffer;
pub use session::loopback::{LoopbackDevice, DEFAULT_COMMUNICATIONS_INDEX};
pub use session::signals::{CaptureSignals, DataReadyNotifier};
pub use traits::backend::{AudioBackend, BufferRead, CaptureClient, Packet, StreamTiming};
pub use traits::frame_sink::{CapturedFrame, FrameSink};
