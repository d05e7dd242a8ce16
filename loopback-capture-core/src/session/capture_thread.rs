use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, MutexGuard};

use crate::models::diagnostics::{CaptureDiagnostics, ThreadExit};
use crate::models::error::CaptureError;
use crate::models::format::CaptureFormat;
use crate::models::state::CaptureState;
use crate::processing::delay::{after_block_delivered, estimate_capture_delay_ms};
use crate::processing::sync_buffer::SyncBuffer;
use crate::session::signals::{CaptureSignals, WaitOutcome};
use crate::traits::backend::{AudioBackend, BufferRead, CaptureClient};
use crate::traits::frame_sink::{CapturedFrame, FrameSink};

/// Session state shared between the control thread and the capture thread.
///
/// Every read and write goes through the one `parking_lot::Mutex` wrapping it.
pub(crate) struct SharedSession<C> {
    /// Bumped each time a session's client is released. A capture thread only
    /// touches the session it was spawned for.
    pub generation: u64,
    pub state: CaptureState,
    /// Owned by the session; taken and dropped by whichever side tears down first.
    pub client: Option<C>,
    pub format: Option<CaptureFormat>,
    pub diagnostics: CaptureDiagnostics,
    pub last_exit: Option<ThreadExit>,
}

impl<C> SharedSession<C> {
    pub fn new() -> Self {
        Self {
            generation: 0,
            state: CaptureState::Idle,
            client: None,
            format: None,
            diagnostics: CaptureDiagnostics::default(),
            last_exit: None,
        }
    }

    pub fn is_current(&self, generation: u64) -> bool {
        self.generation == generation
    }

    /// End the current session; any thread still running for it is cut off.
    pub fn retire(&mut self) -> Option<C> {
        self.generation = self.generation.wrapping_add(1);
        self.state = CaptureState::Idle;
        self.client.take()
    }
}

/// Everything the capture thread needs, moved in at spawn.
pub(crate) struct CaptureContext<B: AudioBackend> {
    pub backend: Arc<B>,
    pub shared: Arc<Mutex<SharedSession<B::Client>>>,
    /// Generation of the session this thread serves.
    pub generation: u64,
    pub signals: Arc<CaptureSignals>,
    pub sink: Option<Arc<dyn FrameSink>>,
    pub format: CaptureFormat,
    pub data_wait_timeout: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Drain {
    /// Device reported an empty buffer; go back to waiting.
    Empty,
    Shutdown,
}

/// Raises the exited signal however the thread leaves, including unwinding out of a sink.
struct ExitMarker(Arc<CaptureSignals>);

impl Drop for ExitMarker {
    fn drop(&mut self) {
        self.0.mark_exited();
    }
}

/// Capture thread entry point.
pub(crate) fn run<B: AudioBackend>(ctx: CaptureContext<B>) {
    let _exit_marker = ExitMarker(Arc::clone(&ctx.signals));

    let exit = match ctx.backend.enter_capture_thread() {
        Ok(_scope) => {
            let exit = match capture_loop(&ctx) {
                Ok(()) => ThreadExit::Shutdown,
                Err(e) => ThreadExit::Premature(e),
            };
            // Client goes before the thread scope it was used under.
            release_client(&ctx, &exit);
            exit
        }
        Err(e) => {
            log::error!("failed to enter capture thread scope: {}", e);
            ThreadExit::Premature(e)
        }
    };

    match &exit {
        ThreadExit::Shutdown => log::info!("capture thread terminated on shutdown"),
        ThreadExit::Premature(e) => log::error!("capture thread ended prematurely: {}", e),
    }

    let mut shared = ctx.shared.lock();
    if !shared.is_current(ctx.generation) {
        log::warn!("abandoned capture thread finished after its session was released");
        return;
    }
    shared.diagnostics.last_exit = Some(exit.describe());
    shared.last_exit = Some(exit);
}

fn capture_loop<B: AudioBackend>(ctx: &CaptureContext<B>) -> Result<(), CaptureError> {
    let mut sync = prepare_stream(ctx)?;
    ctx.signals.confirm_started();

    loop {
        match ctx.signals.wait_for_capture_event(ctx.data_wait_timeout) {
            WaitOutcome::Shutdown => break,
            WaitOutcome::TimedOut => {
                log::error!("no capture event within {:?}", ctx.data_wait_timeout);
                return Err(CaptureError::FatalStreamError(format!(
                    "no data or shutdown within {:?}",
                    ctx.data_wait_timeout
                )));
            }
            WaitOutcome::DataReady => {}
        }

        if drain(ctx, &mut sync)? == Drain::Shutdown {
            break;
        }
    }

    if !sync.is_empty() {
        log::debug!("{} buffered frames dropped at shutdown", sync.fill_frames());
    }
    Ok(())
}

/// Size the sync buffer from the endpoint buffer and start the client.
fn prepare_stream<B: AudioBackend>(ctx: &CaptureContext<B>) -> Result<SyncBuffer, CaptureError> {
    let mut guard = ctx.shared.lock();
    let shared = &mut *guard;
    if !shared.is_current(ctx.generation) {
        return Err(client_released());
    }
    let client = shared.client.as_mut().ok_or_else(client_released)?;

    let buffer_frames = client.buffer_frames()?;
    let sync = SyncBuffer::new(buffer_frames as usize, &ctx.format);
    log::debug!(
        "endpoint buffer: {} frames, sync buffer: {} bytes, endpoint buffer duration: {:.1} ms",
        buffer_frames,
        sync.capacity_bytes(),
        10.0 * buffer_frames as f64 / ctx.format.block_frames as f64
    );

    match client.stream_timing() {
        Ok(timing) => {
            log::debug!(
                "stream latency: {} (100 ns), device period: {} (100 ns), extra delay: {:.2} ms",
                timing.latency_100ns,
                timing.device_period_100ns,
                timing.extra_delay_ms()
            );
            shared.diagnostics.extra_delay_ms = timing.extra_delay_ms();
        }
        Err(e) => log::warn!("stream timing unavailable: {}", e),
    }

    client.start()?;
    shared.diagnostics.sync_buffer_bytes = sync.capacity_bytes();
    Ok(sync)
}

/// Pull packets until the device reports an empty buffer, delivering every
/// complete block as it becomes available.
fn drain<B: AudioBackend>(ctx: &CaptureContext<B>, sync: &mut SyncBuffer) -> Result<Drain, CaptureError> {
    let format = ctx.format;

    loop {
        if ctx.signals.shutdown_requested() {
            return Ok(Drain::Shutdown);
        }

        let mut guard = ctx.shared.lock();
        let shared = &mut *guard;
        if !shared.is_current(ctx.generation) {
            return Err(client_released());
        }
        let client = shared.client.as_mut().ok_or_else(client_released)?;

        let (frames, timestamp) = match client.next_packet()? {
            BufferRead::Empty => return Ok(Drain::Empty),
            BufferRead::Packet(packet) => {
                if packet.data.is_none() {
                    log::warn!("silent packet: {} frames zero-filled", packet.frames);
                    shared.diagnostics.silent_packets += 1;
                }
                sync.push(packet.data, packet.frames as usize)?;
                (packet.frames, packet.timestamp_100ns)
            }
        };
        client.release_packet(frames)?;

        let now = client.clock_100ns();
        let mut delay_ms = estimate_capture_delay_ms(now, timestamp, sync.fill_frames(), format.block_frames);
        shared.diagnostics.recorded_samples += frames as u64;
        shared.diagnostics.capture_delay_ms = delay_ms;

        while sync.has_block() {
            if let Some(sink) = &ctx.sink {
                let frame = CapturedFrame {
                    pcm: sync.front_block(),
                    samples_per_channel: format.block_frames,
                    channels: format.channels,
                    sample_rate: format.sample_rate,
                    capture_delay_ms: delay_ms,
                    playout_delay_ms: 0,
                    key_pressed: ctx.backend.key_pressed(),
                };
                MutexGuard::unlocked(&mut guard, || sink.deliver(&frame));

                if !guard.is_current(ctx.generation) || guard.client.is_none() {
                    log::error!("audio client released while a block was being delivered");
                    return Err(client_released());
                }
            }
            guard.diagnostics.delivered_blocks += 1;
            sync.consume_block();
            delay_ms = after_block_delivered(delay_ms);
        }
    }
}

/// Stop the client (and reset it after a failure), then drop it.
fn release_client<B: AudioBackend>(ctx: &CaptureContext<B>, exit: &ThreadExit) {
    let client = {
        let mut shared = ctx.shared.lock();
        if !shared.is_current(ctx.generation) {
            return;
        }
        shared.client.take()
    };
    let Some(mut client) = client else {
        return;
    };
    if let Err(e) = client.stop() {
        log::warn!("failed to stop audio client: {}", e);
    }
    if !exit.is_clean() {
        if let Err(e) = client.reset() {
            log::warn!("failed to reset audio client: {}", e);
        }
    }
}

fn client_released() -> CaptureError {
    CaptureError::FatalStreamError("audio client was released by the session".into())
}
