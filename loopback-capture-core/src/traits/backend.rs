use crate::models::endpoint::{EndpointDescriptor, EndpointRole, EndpointStates};
use crate::models::error::CaptureError;
use crate::models::format::CaptureFormat;
use crate::session::signals::DataReadyNotifier;

/// Latency figures the platform reports for an initialized stream, in 100 ns units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StreamTiming {
    pub latency_100ns: i64,
    pub device_period_100ns: i64,
}

impl StreamTiming {
    /// Delay the endpoint adds on top of the buffered samples.
    pub fn extra_delay_ms(&self) -> f64 {
        (self.latency_100ns + self.device_period_100ns) as f64 / 10_000.0
    }
}

/// One packet handed out by [`CaptureClient::next_packet`].
///
/// Borrowed from the client until [`CaptureClient::release_packet`] is called.
#[derive(Debug)]
pub struct Packet<'a> {
    pub frames: u32,
    /// `None` when the platform flagged the packet as silent.
    pub data: Option<&'a [u8]>,
    /// Clock value at which the first frame was recorded, 100 ns units.
    pub timestamp_100ns: u64,
}

#[derive(Debug)]
pub enum BufferRead<'a> {
    /// Nothing left to drain; go back to waiting.
    Empty,
    Packet(Packet<'a>),
}

/// Shared-mode loopback stream on one output endpoint.
///
/// Created on the control thread by [`AudioBackend::activate`], then driven
/// from the capture thread. Dropping the client releases its platform handles.
pub trait CaptureClient: Send {
    /// Whether the endpoint accepts 16-bit PCM at this rate and channel count in shared mode.
    fn is_format_supported(&self, sample_rate: u32, channels: u16) -> bool;

    /// Prepare an event-driven loopback stream. The client must call
    /// `notifier.notify()` whenever a packet becomes available.
    fn initialize(&mut self, format: &CaptureFormat, notifier: DataReadyNotifier) -> Result<(), CaptureError>;

    /// Endpoint buffer size in frames.
    fn buffer_frames(&self) -> Result<u32, CaptureError>;

    fn stream_timing(&self) -> Result<StreamTiming, CaptureError>;

    fn start(&mut self) -> Result<(), CaptureError>;

    fn stop(&mut self) -> Result<(), CaptureError>;

    fn reset(&mut self) -> Result<(), CaptureError>;

    /// Acquire the next packet. An `Err` here is a hard failure, not an empty buffer.
    fn next_packet(&mut self) -> Result<BufferRead<'_>, CaptureError>;

    fn release_packet(&mut self, frames: u32) -> Result<(), CaptureError>;

    /// High-resolution clock in the same base as packet timestamps.
    fn clock_100ns(&self) -> u64;
}

/// Platform audio subsystem: endpoint discovery and client activation.
///
/// Endpoint handles are owned values; dropping one releases it.
pub trait AudioBackend: Send + Sync + 'static {
    type Endpoint: Clone + Send + 'static;
    type Client: CaptureClient + 'static;
    /// Per-thread platform scope held for the lifetime of the capture thread.
    type ThreadGuard;

    /// Output endpoints whose state intersects `states`, in platform order.
    fn enumerate(&self, states: EndpointStates) -> Result<Vec<Self::Endpoint>, CaptureError>;

    fn default_endpoint(&self, role: EndpointRole) -> Result<Self::Endpoint, CaptureError>;

    fn describe(&self, endpoint: &Self::Endpoint) -> Result<EndpointDescriptor, CaptureError>;

    fn activate(&self, endpoint: &Self::Endpoint) -> Result<Self::Client, CaptureError>;

    /// Whether thread-priority boosting was found when the backend was created.
    fn supports_priority_boost(&self) -> bool;

    /// Enter the capture thread's platform scope, boosting priority when supported.
    fn enter_capture_thread(&self) -> Result<Self::ThreadGuard, CaptureError>;

    /// Keyboard-activity hint forwarded with each frame.
    fn key_pressed(&self) -> bool {
        false
    }
}
