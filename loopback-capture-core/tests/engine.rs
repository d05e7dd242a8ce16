//! Integration tests for the loopback capture engine.
//!
//! Everything runs against the scripted backend, so the capture thread,
//! its timeouts and the shutdown handshake are exercised on any OS.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use loopback_capture_core::mock::{MockBackend, MockEndpoint, MockScript, ScriptedPacket};
use loopback_capture_core::{
    CaptureError, CaptureState, CapturedFrame, EndpointRole, EndpointStates, EngineConfig, FrameSink, LoopbackDevice,
    DEFAULT_COMMUNICATIONS_INDEX,
};
use parking_lot::{Condvar, Mutex};

/// 8 kHz stereo: 4-byte frames, 80-frame blocks, 320-frame sync buffer.
const RATE: u32 = 8000;
const FRAME_BYTES: usize = 4;
const BLOCK_FRAMES: usize = 80;

#[derive(Debug, Clone)]
struct Block {
    pcm: Vec<u8>,
    samples_per_channel: usize,
    channels: u16,
    sample_rate: u32,
    capture_delay_ms: u32,
    playout_delay_ms: u32,
    key_pressed: bool,
}

/// A test sink that records every block it receives.
#[derive(Default)]
struct RecordingSink {
    formats: Mutex<Vec<(u32, u16)>>,
    blocks: Mutex<Vec<Block>>,
}

impl RecordingSink {
    fn block_count(&self) -> usize {
        self.blocks.lock().len()
    }

    fn blocks(&self) -> Vec<Block> {
        self.blocks.lock().clone()
    }

    fn bytes(&self) -> Vec<u8> {
        self.blocks.lock().iter().flat_map(|b| b.pcm.clone()).collect()
    }
}

impl FrameSink for RecordingSink {
    fn set_recording_format(&self, sample_rate: u32, channels: u16) {
        self.formats.lock().push((sample_rate, channels));
    }

    fn deliver(&self, frame: &CapturedFrame<'_>) {
        self.blocks.lock().push(Block {
            pcm: frame.pcm.to_vec(),
            samples_per_channel: frame.samples_per_channel,
            channels: frame.channels,
            sample_rate: frame.sample_rate,
            capture_delay_ms: frame.capture_delay_ms,
            playout_delay_ms: frame.playout_delay_ms,
            key_pressed: frame.key_pressed,
        });
    }
}

/// A sink whose first delivery blocks until the test opens the gate.
#[derive(Default)]
struct GatedSink {
    entered: AtomicBool,
    open: Mutex<bool>,
    cond: Condvar,
    delivered: AtomicUsize,
}

impl GatedSink {
    fn open(&self) {
        *self.open.lock() = true;
        self.cond.notify_all();
    }
}

impl FrameSink for GatedSink {
    fn set_recording_format(&self, _sample_rate: u32, _channels: u16) {}

    fn deliver(&self, _frame: &CapturedFrame<'_>) {
        self.entered.store(true, Ordering::SeqCst);
        let mut open = self.open.lock();
        while !*open {
            self.cond.wait(&mut open);
        }
        self.delivered.fetch_add(1, Ordering::SeqCst);
    }
}

fn config() -> EngineConfig {
    EngineConfig {
        data_wait_timeout_ms: 5_000,
        ..Default::default()
    }
}

fn speakers() -> MockEndpoint {
    MockEndpoint::new("{speakers}", "Speakers")
        .accepting(&[(RATE, 2)])
        .with_buffer_frames(160)
}

fn engine_with(endpoints: Vec<MockEndpoint>, config: EngineConfig) -> (LoopbackDevice<MockBackend>, MockScript) {
    let script = MockScript::new();
    let backend = MockBackend::new(endpoints, script.clone());
    let device = LoopbackDevice::new(backend, config).unwrap();
    (device, script)
}

fn running_engine(config: EngineConfig) -> (LoopbackDevice<MockBackend>, MockScript, Arc<RecordingSink>) {
    let (mut device, script) = engine_with(vec![speakers()], config);
    let sink = Arc::new(RecordingSink::default());
    device.attach_sink(sink.clone());
    device.init_recording().unwrap();
    device.start_recording().unwrap();
    (device, script, sink)
}

fn ramp(frames: usize, seed: usize) -> Vec<u8> {
    (0..frames * FRAME_BYTES).map(|i| ((i * 7 + seed) % 251) as u8).collect()
}

fn audio(data: Vec<u8>, timestamp_100ns: u64) -> ScriptedPacket {
    let frames = (data.len() / FRAME_BYTES) as u32;
    ScriptedPacket::Audio {
        data,
        frames,
        timestamp_100ns,
    }
}

fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

// --- Lifecycle ---

#[test]
fn test_start_and_stop_are_idempotent() {
    let (mut device, script, _sink) = running_engine(config());
    assert!(device.recording());

    device.start_recording().unwrap();
    assert_eq!(script.calls().starts, 1);

    device.stop_recording().unwrap();
    assert_eq!(device.state(), CaptureState::Idle);
    assert!(!device.recording());
    assert!(!device.recording_is_initialized());

    device.stop_recording().unwrap();
    assert_eq!(script.calls().stops, 1);
    assert_eq!(script.calls().resets, 0);
}

#[test]
fn test_start_requires_init_recording() {
    let (mut device, _script) = engine_with(vec![speakers()], config());
    let err = device.start_recording().unwrap_err();
    assert!(matches!(err, CaptureError::ConfigurationError(_)));
}

#[test]
fn test_stop_before_start_releases_client() {
    let (mut device, script) = engine_with(vec![speakers()], config());
    device.init_recording().unwrap();
    assert_eq!(device.state(), CaptureState::Initializing);
    device.init_recording().unwrap();
    assert_eq!(script.calls().activations, 1);

    device.stop_recording().unwrap();
    assert_eq!(device.state(), CaptureState::Idle);
    assert_eq!(script.calls().clients_dropped, 1);
    assert_eq!(script.calls().starts, 0);
    assert!(!script.has_notifier());
}

#[test]
fn test_restart_after_stop() {
    let (mut device, script, sink) = running_engine(config());
    device.stop_recording().unwrap();

    device.init_recording().unwrap();
    device.start_recording().unwrap();
    script.push([audio(ramp(BLOCK_FRAMES, 0), 0)]);
    assert!(wait_until(Duration::from_secs(2), || sink.block_count() == 1));
    device.stop_recording().unwrap();
    assert_eq!(script.calls().starts, 2);
}

#[test]
fn test_sink_sees_placeholder_then_negotiated_format() {
    let (mut device, _script) = engine_with(vec![speakers()], config());
    let sink = Arc::new(RecordingSink::default());
    device.attach_sink(sink.clone());
    device.init_recording().unwrap();
    assert_eq!(*sink.formats.lock(), vec![(0, 0), (RATE, 2)]);
}

// --- Segmentation ---

#[test]
fn test_segments_packets_into_fixed_blocks() {
    let (mut device, script, sink) = running_engine(config());

    let first = [ramp(50, 1), ramp(70, 2), ramp(45, 3)];
    let mut input: Vec<u8> = first.concat();
    script.push(first.into_iter().map(|data| audio(data, 0)));

    // 165 frames: two blocks out, five frames held back
    assert!(wait_until(Duration::from_secs(2), || sink.block_count() == 2));
    thread::sleep(Duration::from_millis(20));
    assert_eq!(sink.block_count(), 2);
    assert_eq!(sink.bytes(), input[..2 * BLOCK_FRAMES * FRAME_BYTES]);

    let second = ramp(75, 4);
    input.extend_from_slice(&second);
    script.push([audio(second, 0)]);
    assert!(wait_until(Duration::from_secs(2), || sink.block_count() == 3));
    assert_eq!(sink.bytes(), input[..3 * BLOCK_FRAMES * FRAME_BYTES]);

    for block in sink.blocks() {
        assert_eq!(block.pcm.len(), BLOCK_FRAMES * FRAME_BYTES);
        assert_eq!(block.samples_per_channel, BLOCK_FRAMES);
        assert_eq!(block.channels, 2);
        assert_eq!(block.sample_rate, RATE);
        assert_eq!(block.playout_delay_ms, 0);
    }

    device.stop_recording().unwrap();
    let diagnostics = device.diagnostics();
    assert_eq!(diagnostics.recorded_samples, 240);
    assert_eq!(diagnostics.delivered_blocks, 3);
}

#[test]
fn test_silent_packets_are_zero_filled() {
    let (mut device, script, sink) = running_engine(config());
    script.push([
        audio(vec![0xAB; 40 * FRAME_BYTES], 0),
        ScriptedPacket::Silent {
            frames: 40,
            timestamp_100ns: 0,
        },
    ]);
    assert!(wait_until(Duration::from_secs(2), || sink.block_count() == 1));

    let pcm = &sink.blocks()[0].pcm;
    assert!(pcm[..160].iter().all(|&b| b == 0xAB));
    assert!(pcm[160..].iter().all(|&b| b == 0));

    device.stop_recording().unwrap();
    assert_eq!(device.diagnostics().silent_packets, 1);
}

#[test]
fn test_delay_estimate_and_keyboard_hint() {
    let (mut device, script, sink) = running_engine(config());
    script.set_key_pressed(true);
    script.set_clock(1_050_000);

    // 5 ms behind the clock with two blocks buffered: 5 + 20 - 10, then one block less
    script.push([audio(ramp(2 * BLOCK_FRAMES, 0), 1_000_000)]);
    assert!(wait_until(Duration::from_secs(2), || sink.block_count() == 2));

    let delays: Vec<u32> = sink.blocks().iter().map(|b| b.capture_delay_ms).collect();
    assert_eq!(delays, vec![15, 5]);
    assert!(sink.blocks().iter().all(|b| b.key_pressed));
    device.stop_recording().unwrap();
}

// --- Fatal conditions ---

#[test]
fn test_no_data_within_wait_timeout_is_fatal() {
    let (mut device, script, _sink) = running_engine(EngineConfig {
        data_wait_timeout_ms: 50,
        ..Default::default()
    });

    assert!(wait_until(Duration::from_secs(2), || device.diagnostics().last_exit.is_some()));
    assert_eq!(script.calls().resets, 1);

    let err = device.stop_recording().unwrap_err();
    assert!(matches!(err, CaptureError::PrematureTermination(_)));
    assert_eq!(device.state(), CaptureState::Idle);
}

#[test]
fn test_acquisition_failure_is_fatal() {
    let (mut device, script, _sink) = running_engine(config());
    script.fail_next_packet();
    script.notify();

    assert!(wait_until(Duration::from_secs(2), || device.diagnostics().last_exit.is_some()));
    match device.stop_recording() {
        Err(CaptureError::PrematureTermination(reason)) => assert!(reason.contains("buffer acquisition failed")),
        other => panic!("unexpected stop result: {:?}", other),
    }
}

#[test]
fn test_sync_buffer_overflow_is_fatal_not_truncated() {
    let (mut device, script, sink) = running_engine(config());

    // 400 frames against a 320-frame sync buffer
    script.push([audio(ramp(400, 0), 0)]);
    assert!(wait_until(Duration::from_secs(2), || device.diagnostics().last_exit.is_some()));

    assert_eq!(sink.block_count(), 0);
    assert_eq!(device.diagnostics().sync_buffer_bytes, 320 * FRAME_BYTES);
    let err = device.stop_recording().unwrap_err();
    assert!(err.to_string().contains("overflow"));
}

#[test]
fn test_shutdown_stops_draining_mid_burst() {
    let (mut device, script) = engine_with(vec![speakers()], config());
    let sink = Arc::new(GatedSink::default());
    device.attach_sink(sink.clone());
    device.init_recording().unwrap();
    device.start_recording().unwrap();

    script.push([audio(ramp(BLOCK_FRAMES, 0), 0), audio(ramp(BLOCK_FRAMES, 1), 0)]);
    assert!(wait_until(Duration::from_secs(2), || sink.entered.load(Ordering::SeqCst)));

    // Shutdown is raised while the first block is still in the sink.
    let stopper = thread::spawn(move || {
        let result = device.stop_recording();
        (device, result)
    });
    thread::sleep(Duration::from_millis(100));
    sink.open();

    let (device, result) = stopper.join().unwrap();
    result.unwrap();
    assert_eq!(device.state(), CaptureState::Idle);
    assert_eq!(sink.delivered.load(Ordering::SeqCst), 1);
    assert_eq!(script.pending_packets(), 1);
}

#[test]
fn test_abandoned_thread_leaves_next_session_alone() {
    let (mut device, script) = engine_with(
        vec![speakers()],
        EngineConfig {
            stop_timeout_ms: 100,
            ..config()
        },
    );
    let sink = Arc::new(GatedSink::default());
    device.attach_sink(sink.clone());
    device.init_recording().unwrap();
    device.start_recording().unwrap();

    script.push([audio(ramp(BLOCK_FRAMES, 0), 0)]);
    assert!(wait_until(Duration::from_secs(2), || sink.entered.load(Ordering::SeqCst)));

    // The sink holds the thread past the stop bound.
    let err = device.stop_recording().unwrap_err();
    assert_eq!(err, CaptureError::ShutdownTimeout(Duration::from_millis(100)));
    assert_eq!(device.state(), CaptureState::Idle);
    assert!(!device.recording_is_initialized());
    assert_eq!(script.calls().clients_dropped, 1);
    assert_eq!(script.calls().stops, 0);

    device.init_recording().unwrap();
    device.start_recording().unwrap();

    // Let the old thread return from the sink into the new session.
    sink.open();
    assert!(wait_until(Duration::from_secs(2), || sink.delivered.load(Ordering::SeqCst) == 1));
    thread::sleep(Duration::from_millis(100));

    assert!(device.recording());
    let calls = script.calls();
    assert_eq!(calls.stops, 0);
    assert_eq!(calls.resets, 0);
    assert_eq!(calls.clients_dropped, 1);
    assert_eq!(device.diagnostics().last_exit, None);

    script.push([audio(ramp(BLOCK_FRAMES, 1), 0)]);
    assert!(wait_until(Duration::from_secs(2), || sink.delivered.load(Ordering::SeqCst) == 2));

    device.stop_recording().unwrap();
    assert_eq!(script.calls().stops, 1);
    assert_eq!(script.calls().clients_dropped, 2);
    assert_eq!(device.diagnostics().last_exit.as_deref(), Some("shutdown"));
}

// --- Startup ---

#[test]
fn test_startup_timeout_leaves_no_thread() {
    let (mut device, script) = engine_with(
        vec![speakers()],
        EngineConfig {
            start_timeout_ms: 50,
            ..config()
        },
    );
    script.set_start_delay(Duration::from_millis(300));
    device.init_recording().unwrap();

    let err = device.start_recording().unwrap_err();
    assert_eq!(err, CaptureError::StartupTimeout(Duration::from_millis(50)));
    assert_eq!(device.state(), CaptureState::Idle);
    assert!(!device.recording());

    // The late thread saw shutdown and released its client before the call returned.
    assert_eq!(script.calls().stops, 1);
    assert_eq!(script.calls().clients_dropped, 1);
}

#[test]
fn test_client_start_failure_is_reported() {
    let (mut device, script) = engine_with(vec![speakers()], config());
    script.fail_start(true);
    device.init_recording().unwrap();

    let err = device.start_recording().unwrap_err();
    assert!(matches!(err, CaptureError::PrematureTermination(_)));
    assert_eq!(device.state(), CaptureState::Idle);
    assert_eq!(script.calls().clients_dropped, 1);
}

#[test]
fn test_thread_scope_failure_is_reported() {
    let (mut device, script) = engine_with(vec![speakers()], config());
    script.fail_thread_scope(true);
    device.init_recording().unwrap();

    let err = device.start_recording().unwrap_err();
    assert!(err.to_string().contains("thread scope refused"));
    assert!(!device.recording_is_initialized());
}

// --- Selection and negotiation ---

fn two_endpoints() -> Vec<MockEndpoint> {
    vec![
        MockEndpoint::new("{a}", "Speakers").accepting(&[(48000, 2)]),
        MockEndpoint::new("{b}", "Headset").accepting(&[(44100, 1), (16000, 2)]),
        MockEndpoint::new("{c}", "Monitor").with_state(EndpointStates::UNPLUGGED),
    ]
}

#[test]
fn test_select_by_index_negotiates_that_endpoint() {
    let (mut device, _script) = engine_with(two_endpoints(), config());
    assert_eq!(device.recording_devices().unwrap(), 2);
    assert_eq!(device.device_count(), 2);

    device.set_recording_device(1).unwrap();
    device.init_recording().unwrap();
    assert!(device.microphone_is_initialized());

    let format = device.format().unwrap();
    assert_eq!((format.sample_rate, format.channels), (44100, 1));
    assert_eq!(format.block_frames, 441);
    assert!(!device.stereo_recording());
}

#[test]
fn test_select_index_out_of_range() {
    let (mut device, _script) = engine_with(two_endpoints(), config());
    let err = device.set_recording_device(5).unwrap_err();
    assert_eq!(err, CaptureError::IndexOutOfRange { index: 5, count: 2 });
}

#[test]
fn test_initial_selection_follows_default_role() {
    let script = MockScript::new();
    let backend = MockBackend::new(two_endpoints(), script).with_default(EndpointRole::Default, Some(1));
    let mut device = LoopbackDevice::new(backend, config()).unwrap();

    device.init_recording().unwrap();
    assert_eq!(device.format().unwrap().sample_rate, 44100);
}

#[test]
fn test_select_by_role() {
    let script = MockScript::new();
    let backend = MockBackend::new(two_endpoints(), script).with_default(EndpointRole::DefaultCommunications, Some(1));
    let mut device = LoopbackDevice::new(backend, config()).unwrap();

    device.set_recording_device_role(EndpointRole::DefaultCommunications).unwrap();
    device.init_recording().unwrap();
    assert_eq!(device.format().unwrap().sample_rate, 44100);
}

#[test]
fn test_missing_default_endpoint_is_unavailable() {
    let script = MockScript::new();
    let backend = MockBackend::new(two_endpoints(), script).with_default(EndpointRole::Default, None);
    let mut device = LoopbackDevice::new(backend, config()).unwrap();

    let err = device.init_microphone().unwrap_err();
    assert!(matches!(err, CaptureError::DeviceUnavailable(_)));
    assert!(!device.microphone_is_initialized());
    assert!(!device.recording_is_available());
}

#[test]
fn test_selection_rejected_while_running() {
    let (mut device, _script, _sink) = running_engine(config());

    let err = device.set_recording_device(0).unwrap_err();
    assert!(matches!(err, CaptureError::ConfigurationError(_)));
    let err = device.set_recording_device_role(EndpointRole::Default).unwrap_err();
    assert!(matches!(err, CaptureError::ConfigurationError(_)));
    let err = device.init_microphone().unwrap_err();
    assert!(matches!(err, CaptureError::ConfigurationError(_)));
    let err = device.set_stereo_recording(false).unwrap_err();
    assert!(matches!(err, CaptureError::ConfigurationError(_)));

    device.stop_recording().unwrap();
    device.set_recording_device(0).unwrap();
}

#[test]
fn test_negotiation_failure_keeps_session_idle() {
    let endpoint = MockEndpoint::new("{x}", "Odd").accepting(&[(22050, 2)]);
    let (mut device, script) = engine_with(vec![endpoint], config());

    let err = device.init_recording().unwrap_err();
    assert_eq!(err, CaptureError::FormatNegotiationFailure);
    assert_eq!(device.state(), CaptureState::Idle);
    assert_eq!(script.calls().clients_dropped, 1);
    assert!(device.format().is_none());
}

#[test]
fn test_stereo_preference_reorders_channels() {
    let endpoint = MockEndpoint::new("{s}", "Speakers").accepting(&[(48000, 1), (48000, 2)]);
    let (mut device, _script) = engine_with(vec![endpoint], config());
    assert!(device.stereo_recording());

    device.set_stereo_recording(false).unwrap();
    assert!(!device.stereo_recording());
    device.init_recording().unwrap();
    assert_eq!(device.format().unwrap().channels, 1);
    device.stop_recording().unwrap();

    device.set_stereo_recording(true).unwrap();
    device.init_recording().unwrap();
    assert_eq!(device.format().unwrap().channels, 2);
    assert!(device.stereo_recording());
}

#[test]
fn test_format_capabilities() {
    let (mut device, _script) = engine_with(two_endpoints(), config());
    device.set_recording_device(1).unwrap();
    let caps = device.format_capabilities().unwrap();
    assert!(caps.stereo);
    assert!(caps.mono);

    device.set_recording_device(0).unwrap();
    assert!(device.stereo_recording_is_available().unwrap());
    assert!(!device.format_capabilities().unwrap().mono);
}

// --- Enumeration ---

#[test]
fn test_device_names_and_sentinel() {
    let script = MockScript::new();
    let backend = MockBackend::new(two_endpoints(), script).with_default(EndpointRole::DefaultCommunications, Some(1));
    let mut device = LoopbackDevice::new(backend, config()).unwrap();

    assert_eq!(device.recording_device_name(0).unwrap().name, "Speakers");
    let communications = device.recording_device_name(DEFAULT_COMMUNICATIONS_INDEX).unwrap();
    assert_eq!(communications.id, "{b}");
    assert_eq!(
        device.recording_device_name(2).unwrap_err(),
        CaptureError::IndexOutOfRange { index: 2, count: 2 }
    );
}

#[test]
fn test_all_endpoints_includes_unplugged() {
    let (mut device, _script) = engine_with(two_endpoints(), config());
    device.init().unwrap();
    assert!(device.initialized());

    let all = device.all_endpoints().unwrap();
    assert_eq!(all.len(), 3);
    assert!(!all[2].is_active());
    // The diagnostic listing does not feed selection.
    assert_eq!(device.device_count(), 0);

    device.terminate().unwrap();
    assert!(!device.initialized());
}

#[test]
fn test_enumeration_failure_is_device_unavailable() {
    let (mut device, script) = engine_with(two_endpoints(), config());
    script.fail_enumerate(true);

    assert!(matches!(
        device.recording_devices().unwrap_err(),
        CaptureError::DeviceUnavailable(_)
    ));
    // Listing failure is logged, not fatal, at init.
    device.init().unwrap();

    device.set_recording_device(0).unwrap_err();
}

// --- Availability probes and fixed answers ---

#[test]
fn test_recording_is_available_undoes_its_probe() {
    let (mut device, script) = engine_with(vec![speakers()], config());
    assert!(device.recording_is_available());
    assert_eq!(device.state(), CaptureState::Idle);
    assert_eq!(script.calls().activations, 1);
    assert_eq!(script.calls().clients_dropped, 1);

    let endpoint = MockEndpoint::new("{x}", "Odd").accepting(&[]);
    let (mut device, _script) = engine_with(vec![endpoint], config());
    assert!(!device.recording_is_available());
    assert_eq!(device.state(), CaptureState::Idle);
}

#[test]
fn test_recording_is_available_keeps_existing_session() {
    let (mut device, script) = engine_with(vec![speakers()], config());
    device.init_recording().unwrap();

    assert!(device.recording_is_available());
    assert_eq!(device.state(), CaptureState::Initializing);
    assert_eq!(script.calls().activations, 1);
    assert_eq!(script.calls().clients_dropped, 0);
    device.start_recording().unwrap();
    assert!(device.recording_is_available());
    assert!(device.recording());
}

#[test]
fn test_playout_and_aec_answers() {
    let (mut device, _script) = engine_with(vec![speakers()], config());
    assert!(!device.playout_is_available());
    assert_eq!(device.playout_delay_ms(), 0);
    assert!(!device.playing());
    assert!(device.built_in_aec_is_available());

    device.enable_built_in_aec(true).unwrap();
    device.init_recording().unwrap();
    let err = device.enable_built_in_aec(false).unwrap_err();
    assert!(matches!(err, CaptureError::ConfigurationError(_)));
}

#[test]
fn test_invalid_config_is_rejected() {
    let script = MockScript::new();
    let backend = MockBackend::new(vec![speakers()], script);
    let result = LoopbackDevice::new(
        backend,
        EngineConfig {
            stop_timeout_ms: 0,
            ..Default::default()
        },
    );
    assert!(matches!(result, Err(CaptureError::ConfigurationError(_))));
}

// --- Diagnostics ---

#[test]
fn test_session_diagnostics() {
    let script = MockScript::new();
    let backend = MockBackend::new(vec![speakers()], script.clone()).with_priority_boost(false);
    let mut device = LoopbackDevice::new(backend, config()).unwrap();
    device.init_recording().unwrap();
    device.start_recording().unwrap();

    script.push([audio(ramp(BLOCK_FRAMES, 0), 0)]);
    assert!(wait_until(Duration::from_secs(2), || device.diagnostics().delivered_blocks == 1));
    device.stop_recording().unwrap();

    let diagnostics = device.diagnostics();
    assert!(diagnostics.session_id.is_some());
    assert!(diagnostics.started_at.is_some());
    assert!(!diagnostics.priority_boost);
    assert_eq!(diagnostics.recorded_samples, BLOCK_FRAMES as u64);
    assert_eq!(diagnostics.format.unwrap().block_frames, BLOCK_FRAMES);
    assert_eq!(diagnostics.last_exit.as_deref(), Some("shutdown"));
    assert!((diagnostics.extra_delay_ms - 20.0).abs() < 1e-9);

    let json = diagnostics.to_json().unwrap();
    assert!(json.contains("\"delivered_blocks\": 1"));
}
