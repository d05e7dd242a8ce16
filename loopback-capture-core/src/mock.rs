//! Scripted in-memory backend.
//!
//! Endpoints carry a fixed set of accepted `(rate, channels)` pairs. Packets
//! are queued through a shared [`MockScript`] handle, which also drives the
//! synthetic clock, injects failures and counts client calls.

use std::collections::VecDeque;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

use crate::models::endpoint::{EndpointDescriptor, EndpointRole, EndpointStates, HardwareSupport};
use crate::models::error::CaptureError;
use crate::models::format::CaptureFormat;
use crate::session::signals::DataReadyNotifier;
use crate::traits::backend::{AudioBackend, BufferRead, CaptureClient, Packet, StreamTiming};

/// A packet waiting in the script queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptedPacket {
    Audio { data: Vec<u8>, frames: u32, timestamp_100ns: u64 },
    Silent { frames: u32, timestamp_100ns: u64 },
}

impl ScriptedPacket {
    fn frames(&self) -> u32 {
        match self {
            Self::Audio { frames, .. } | Self::Silent { frames, .. } => *frames,
        }
    }
}

/// Counters for client calls made by the engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub activations: u32,
    pub initializations: u32,
    pub starts: u32,
    pub stops: u32,
    pub resets: u32,
    pub released_frames: u64,
    pub clients_dropped: u32,
}

#[derive(Default)]
struct ScriptState {
    packets: VecDeque<ScriptedPacket>,
    clock_100ns: u64,
    notifier: Option<DataReadyNotifier>,
    calls: CallCounts,
    key_pressed: bool,
    start_delay: Duration,
    fail_enumerate: bool,
    fail_start: bool,
    fail_thread_scope: bool,
    fail_next_packet: bool,
}

/// Shared handle between a test and the mock backend it configured.
#[derive(Clone, Default)]
pub struct MockScript(Arc<Mutex<ScriptState>>);

impl MockScript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue packets and raise data-ready once.
    pub fn push(&self, packets: impl IntoIterator<Item = ScriptedPacket>) {
        let notifier = {
            let mut s = self.0.lock();
            s.packets.extend(packets);
            s.notifier.clone()
        };
        if let Some(notifier) = notifier {
            notifier.notify();
        }
    }

    /// Raise data-ready without queueing anything.
    pub fn notify(&self) {
        let notifier = self.0.lock().notifier.clone();
        if let Some(notifier) = notifier {
            notifier.notify();
        }
    }

    pub fn pending_packets(&self) -> usize {
        self.0.lock().packets.len()
    }

    pub fn set_clock(&self, clock_100ns: u64) {
        self.0.lock().clock_100ns = clock_100ns;
    }

    pub fn set_key_pressed(&self, pressed: bool) {
        self.0.lock().key_pressed = pressed;
    }

    /// Make `CaptureClient::start` block, delaying the startup confirmation.
    pub fn set_start_delay(&self, delay: Duration) {
        self.0.lock().start_delay = delay;
    }

    pub fn fail_enumerate(&self, fail: bool) {
        self.0.lock().fail_enumerate = fail;
    }

    pub fn fail_start(&self, fail: bool) {
        self.0.lock().fail_start = fail;
    }

    pub fn fail_thread_scope(&self, fail: bool) {
        self.0.lock().fail_thread_scope = fail;
    }

    /// The next `next_packet` call returns a hard acquisition error.
    pub fn fail_next_packet(&self) {
        self.0.lock().fail_next_packet = true;
    }

    pub fn calls(&self) -> CallCounts {
        self.0.lock().calls
    }

    pub fn has_notifier(&self) -> bool {
        self.0.lock().notifier.is_some()
    }
}

/// One scripted output endpoint.
#[derive(Debug, Clone)]
pub struct MockEndpoint {
    descriptor: EndpointDescriptor,
    accepted: Vec<(u32, u16)>,
    buffer_frames: u32,
}

impl MockEndpoint {
    pub fn new(id: &str, name: &str) -> Self {
        Self {
            descriptor: EndpointDescriptor {
                id: id.into(),
                name: name.into(),
                state: EndpointStates::ACTIVE,
                hardware_support: HardwareSupport::VOLUME.union(HardwareSupport::MUTE),
            },
            accepted: vec![(48000, 2)],
            buffer_frames: 960,
        }
    }

    pub fn with_state(mut self, state: EndpointStates) -> Self {
        self.descriptor.state = state;
        self
    }

    pub fn accepting(mut self, formats: &[(u32, u16)]) -> Self {
        self.accepted = formats.to_vec();
        self
    }

    pub fn with_buffer_frames(mut self, frames: u32) -> Self {
        self.buffer_frames = frames;
        self
    }

    pub fn id(&self) -> &str {
        &self.descriptor.id
    }
}

/// Backend over a fixed endpoint list.
pub struct MockBackend {
    endpoints: Vec<MockEndpoint>,
    default: Option<usize>,
    communications: Option<usize>,
    priority_boost: bool,
    script: MockScript,
}

impl MockBackend {
    /// The first endpoint is the default for both roles.
    pub fn new(endpoints: Vec<MockEndpoint>, script: MockScript) -> Self {
        let first = if endpoints.is_empty() { None } else { Some(0) };
        Self {
            endpoints,
            default: first,
            communications: first,
            priority_boost: true,
            script,
        }
    }

    pub fn with_default(mut self, role: EndpointRole, index: Option<usize>) -> Self {
        match role {
            EndpointRole::Default => self.default = index,
            EndpointRole::DefaultCommunications => self.communications = index,
        }
        self
    }

    pub fn with_priority_boost(mut self, supported: bool) -> Self {
        self.priority_boost = supported;
        self
    }
}

impl AudioBackend for MockBackend {
    type Endpoint = MockEndpoint;
    type Client = MockClient;
    type ThreadGuard = ();

    fn enumerate(&self, states: EndpointStates) -> Result<Vec<MockEndpoint>, CaptureError> {
        if self.script.0.lock().fail_enumerate {
            return Err(CaptureError::DeviceUnavailable("enumeration refused".into()));
        }
        Ok(self
            .endpoints
            .iter()
            .filter(|e| e.descriptor.state.intersects(states))
            .cloned()
            .collect())
    }

    fn default_endpoint(&self, role: EndpointRole) -> Result<MockEndpoint, CaptureError> {
        let index = match role {
            EndpointRole::Default => self.default,
            EndpointRole::DefaultCommunications => self.communications,
        };
        index
            .and_then(|i| self.endpoints.get(i))
            .cloned()
            .ok_or_else(|| CaptureError::DeviceUnavailable(format!("no {:?} endpoint", role)))
    }

    fn describe(&self, endpoint: &MockEndpoint) -> Result<EndpointDescriptor, CaptureError> {
        Ok(endpoint.descriptor.clone())
    }

    fn activate(&self, endpoint: &MockEndpoint) -> Result<MockClient, CaptureError> {
        self.script.0.lock().calls.activations += 1;
        Ok(MockClient {
            endpoint: endpoint.clone(),
            script: self.script.clone(),
            current: None,
            format: None,
        })
    }

    fn supports_priority_boost(&self) -> bool {
        self.priority_boost
    }

    fn enter_capture_thread(&self) -> Result<(), CaptureError> {
        if self.script.0.lock().fail_thread_scope {
            return Err(CaptureError::Platform("thread scope refused".into()));
        }
        Ok(())
    }

    fn key_pressed(&self) -> bool {
        self.script.0.lock().key_pressed
    }
}

pub struct MockClient {
    endpoint: MockEndpoint,
    script: MockScript,
    current: Option<ScriptedPacket>,
    format: Option<CaptureFormat>,
}

impl CaptureClient for MockClient {
    fn is_format_supported(&self, sample_rate: u32, channels: u16) -> bool {
        self.endpoint.accepted.contains(&(sample_rate, channels))
    }

    fn initialize(&mut self, format: &CaptureFormat, notifier: DataReadyNotifier) -> Result<(), CaptureError> {
        if !self.is_format_supported(format.sample_rate, format.channels) {
            return Err(CaptureError::Platform("format rejected by endpoint".into()));
        }
        self.format = Some(*format);
        let mut s = self.script.0.lock();
        s.notifier = Some(notifier);
        s.calls.initializations += 1;
        Ok(())
    }

    fn buffer_frames(&self) -> Result<u32, CaptureError> {
        Ok(self.endpoint.buffer_frames)
    }

    fn stream_timing(&self) -> Result<StreamTiming, CaptureError> {
        Ok(StreamTiming {
            latency_100ns: 100_000,
            device_period_100ns: 100_000,
        })
    }

    fn start(&mut self) -> Result<(), CaptureError> {
        let (delay, fail) = {
            let s = self.script.0.lock();
            (s.start_delay, s.fail_start)
        };
        if !delay.is_zero() {
            thread::sleep(delay);
        }
        if fail {
            return Err(CaptureError::Platform("start refused".into()));
        }
        self.script.0.lock().calls.starts += 1;
        Ok(())
    }

    fn stop(&mut self) -> Result<(), CaptureError> {
        self.script.0.lock().calls.stops += 1;
        Ok(())
    }

    fn reset(&mut self) -> Result<(), CaptureError> {
        self.script.0.lock().calls.resets += 1;
        Ok(())
    }

    fn next_packet(&mut self) -> Result<BufferRead<'_>, CaptureError> {
        {
            let mut s = self.script.0.lock();
            if s.fail_next_packet {
                s.fail_next_packet = false;
                return Err(CaptureError::FatalStreamError("buffer acquisition failed".into()));
            }
            self.current = s.packets.pop_front();
        }

        Ok(match &self.current {
            None => BufferRead::Empty,
            Some(ScriptedPacket::Audio {
                data,
                frames,
                timestamp_100ns,
            }) => BufferRead::Packet(Packet {
                frames: *frames,
                data: Some(data.as_slice()),
                timestamp_100ns: *timestamp_100ns,
            }),
            Some(ScriptedPacket::Silent { frames, timestamp_100ns }) => BufferRead::Packet(Packet {
                frames: *frames,
                data: None,
                timestamp_100ns: *timestamp_100ns,
            }),
        })
    }

    fn release_packet(&mut self, frames: u32) -> Result<(), CaptureError> {
        let held = self.current.take().map(|p| p.frames()).unwrap_or(0);
        if held != frames {
            return Err(CaptureError::Platform(format!("released {} frames, held {}", frames, held)));
        }
        self.script.0.lock().calls.released_frames += frames as u64;
        Ok(())
    }

    fn clock_100ns(&self) -> u64 {
        self.script.0.lock().clock_100ns
    }
}

impl Drop for MockClient {
    fn drop(&mut self) {
        let mut s = self.script.0.lock();
        s.calls.clients_dropped += 1;
        if self.format.is_some() {
            s.notifier = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enumerate_filters_by_state() {
        let backend = MockBackend::new(
            vec![
                MockEndpoint::new("a", "Speakers"),
                MockEndpoint::new("b", "Headset").with_state(EndpointStates::UNPLUGGED),
                MockEndpoint::new("c", "Gone").with_state(EndpointStates::NOT_PRESENT),
            ],
            MockScript::new(),
        );
        assert_eq!(backend.enumerate(EndpointStates::ACTIVE).unwrap().len(), 1);
        assert_eq!(backend.enumerate(EndpointStates::DIAGNOSTIC).unwrap().len(), 2);
    }

    #[test]
    fn packets_are_handed_out_in_order() {
        let script = MockScript::new();
        let backend = MockBackend::new(vec![MockEndpoint::new("a", "Speakers")], script.clone());
        let mut client = backend.activate(&backend.default_endpoint(EndpointRole::Default).unwrap()).unwrap();

        script.push([
            ScriptedPacket::Audio {
                data: vec![1; 8],
                frames: 2,
                timestamp_100ns: 10,
            },
            ScriptedPacket::Silent {
                frames: 3,
                timestamp_100ns: 20,
            },
        ]);

        match client.next_packet().unwrap() {
            BufferRead::Packet(p) => assert_eq!((p.frames, p.data.map(<[u8]>::len)), (2, Some(8))),
            BufferRead::Empty => panic!("expected a packet"),
        }
        client.release_packet(2).unwrap();

        match client.next_packet().unwrap() {
            BufferRead::Packet(p) => assert!(p.data.is_none()),
            BufferRead::Empty => panic!("expected a packet"),
        }
        client.release_packet(3).unwrap();

        assert!(matches!(client.next_packet().unwrap(), BufferRead::Empty));
        assert_eq!(script.calls().released_frames, 5);
    }
}
