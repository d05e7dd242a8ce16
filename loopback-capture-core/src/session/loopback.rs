use std::sync::Arc;
use std::thread;

use parking_lot::Mutex;

use crate::models::config::EngineConfig;
use crate::models::diagnostics::{CaptureDiagnostics, ThreadExit};
use crate::models::endpoint::{DeviceSelection, EndpointDescriptor, EndpointRole, EndpointStates, SelectionMode};
use crate::models::error::CaptureError;
use crate::models::format::{CaptureFormat, ChannelPriority, FormatCapabilities};
use crate::models::state::CaptureState;
use crate::processing::negotiation;
use crate::session::capture_thread::{self, CaptureContext, SharedSession};
use crate::session::signals::{CaptureSignals, DataReadyNotifier, StartupOutcome};
use crate::traits::backend::{AudioBackend, CaptureClient};
use crate::traits::frame_sink::FrameSink;

/// Index passed to [`LoopbackDevice::recording_device_name`] to describe the
/// default communications endpoint instead of a list position.
pub const DEFAULT_COMMUNICATIONS_INDEX: u16 = u16::MAX;

/// Loopback capture engine: turns an output endpoint into a 10 ms block source.
///
/// Generic over the platform backend. Control calls run on the caller's
/// thread; `start_recording` spawns the one capture thread and
/// `stop_recording` tears it down.
///
/// ```text
/// [enumerate] → [select] → [negotiate] → [capture thread] → [FrameSink]
///                                         packets → SyncBuffer → blocks
/// ```
pub struct LoopbackDevice<B: AudioBackend> {
    backend: Arc<B>,
    config: EngineConfig,
    shared: Arc<Mutex<SharedSession<B::Client>>>,
    signals: Arc<CaptureSignals>,
    sink: Option<Arc<dyn FrameSink>>,

    // Caller-thread state; `&mut self` serializes it.
    devices: Vec<B::Endpoint>,
    selection: DeviceSelection<B::Endpoint>,
    priority: ChannelPriority,
    initialized: bool,
    microphone_initialized: bool,

    capture_thread: Option<thread::JoinHandle<()>>,
}

impl<B: AudioBackend> LoopbackDevice<B> {
    pub fn new(backend: B, config: EngineConfig) -> Result<Self, CaptureError> {
        config.validate().map_err(CaptureError::ConfigurationError)?;

        if !backend.supports_priority_boost() {
            log::warn!("thread priority boost unavailable, capturing without it");
        }

        Ok(Self {
            backend: Arc::new(backend),
            priority: ChannelPriority::new(config.stereo_recording),
            selection: DeviceSelection::new(SelectionMode::ByRole(config.default_role)),
            config,
            shared: Arc::new(Mutex::new(SharedSession::new())),
            signals: CaptureSignals::new(),
            sink: None,
            devices: Vec::new(),
            initialized: false,
            microphone_initialized: false,
            capture_thread: None,
        })
    }

    /// Attach the downstream consumer. Takes effect at the next `start_recording`.
    pub fn attach_sink(&mut self, sink: Arc<dyn FrameSink>) {
        sink.set_recording_format(0, 0);
        self.sink = Some(sink);
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn state(&self) -> CaptureState {
        self.shared.lock().state
    }

    pub fn diagnostics(&self) -> CaptureDiagnostics {
        self.shared.lock().diagnostics.clone()
    }

    /// Format negotiated by the last successful `init_recording`.
    pub fn format(&self) -> Option<CaptureFormat> {
        self.shared.lock().format
    }

    // --- Module lifecycle ---

    /// Log every output endpoint once, including disabled and unplugged ones.
    pub fn init(&mut self) -> Result<(), CaptureError> {
        if self.initialized {
            return Ok(());
        }

        match self.all_endpoints() {
            Ok(endpoints) => {
                log::info!("{} output endpoints found", endpoints.len());
                for (i, endpoint) in endpoints.iter().enumerate() {
                    log::info!(
                        "endpoint {}: \"{}\" id={} state={} hardware_support={}",
                        i,
                        endpoint.name,
                        endpoint.id,
                        endpoint.state,
                        endpoint.hardware_support
                    );
                }
            }
            Err(e) => log::warn!("endpoint listing failed: {}", e),
        }

        self.initialized = true;
        Ok(())
    }

    /// Stop recording and drop every endpoint and client handle.
    pub fn terminate(&mut self) -> Result<(), CaptureError> {
        if !self.initialized {
            return Ok(());
        }

        if let Err(e) = self.stop_recording() {
            log::warn!("stop during terminate: {}", e);
        }
        self.devices.clear();
        self.selection.resolved = None;
        self.selection.mark_stale();
        self.microphone_initialized = false;
        self.initialized = false;
        Ok(())
    }

    pub fn initialized(&self) -> bool {
        self.initialized
    }

    // --- Enumeration ---

    /// Rebuild the active-endpoint list and return its size.
    ///
    /// Indices from an earlier refresh are invalid afterwards.
    pub fn recording_devices(&mut self) -> Result<u16, CaptureError> {
        let devices = self.backend.enumerate(EndpointStates::ACTIVE)?;
        self.devices = devices;
        self.selection.mark_stale();
        log::debug!("{} active output endpoints", self.devices.len());
        Ok(self.device_count())
    }

    /// Size of the last refreshed list; does not re-query the platform.
    pub fn device_count(&self) -> u16 {
        self.devices.len().min(u16::MAX as usize) as u16
    }

    /// Name and id of the endpoint at `index` after a refresh.
    ///
    /// [`DEFAULT_COMMUNICATIONS_INDEX`] describes the default communications endpoint.
    pub fn recording_device_name(&mut self, index: u16) -> Result<EndpointDescriptor, CaptureError> {
        let count = self.recording_devices()?;

        if index == DEFAULT_COMMUNICATIONS_INDEX {
            log::debug!("describing the default communications endpoint");
            let endpoint = self.backend.default_endpoint(EndpointRole::DefaultCommunications)?;
            return self.backend.describe(&endpoint);
        }

        let endpoint = self
            .devices
            .get(index as usize)
            .ok_or(CaptureError::IndexOutOfRange { index, count })?;
        self.backend.describe(endpoint)
    }

    /// Every output endpoint that is active, disabled or unplugged. Listing only.
    pub fn all_endpoints(&self) -> Result<Vec<EndpointDescriptor>, CaptureError> {
        self.backend
            .enumerate(EndpointStates::DIAGNOSTIC)?
            .iter()
            .map(|endpoint| self.backend.describe(endpoint))
            .collect()
    }

    // --- Selection ---

    /// Select by position in a freshly refreshed list.
    pub fn set_recording_device(&mut self, index: u16) -> Result<(), CaptureError> {
        self.ensure_not_running("select a recording device")?;

        let count = self.recording_devices()?;
        let endpoint = self
            .devices
            .get(index as usize)
            .cloned()
            .ok_or(CaptureError::IndexOutOfRange { index, count })?;

        if let Ok(descriptor) = self.backend.describe(&endpoint) {
            log::debug!("selected endpoint {}: \"{}\"", index, descriptor.name);
        }

        self.selection = DeviceSelection::new(SelectionMode::ByIndex(index));
        self.selection.resolve(endpoint);
        Ok(())
    }

    /// Select through the platform's default-endpoint query, bypassing the list.
    pub fn set_recording_device_role(&mut self, role: EndpointRole) -> Result<(), CaptureError> {
        self.ensure_not_running("select a recording device")?;

        if let Err(e) = self.recording_devices() {
            log::warn!("endpoint refresh failed: {}", e);
        }
        let endpoint = self.backend.default_endpoint(role)?;

        if let Ok(descriptor) = self.backend.describe(&endpoint) {
            log::debug!("selected {:?} endpoint: \"{}\"", role, descriptor.name);
        }

        self.selection = DeviceSelection::new(SelectionMode::ByRole(role));
        self.selection.resolve(endpoint);
        Ok(())
    }

    /// Re-resolve the current selection; devices may have come or gone.
    pub fn init_microphone(&mut self) -> Result<(), CaptureError> {
        self.ensure_not_running("initialize the microphone")?;

        match self.resolve_selection() {
            Ok(_) => {
                self.microphone_initialized = true;
                Ok(())
            }
            Err(e) => {
                log::error!("failed to resolve the capture endpoint: {}", e);
                self.selection.resolved = None;
                self.microphone_initialized = false;
                Err(e)
            }
        }
    }

    pub fn microphone_is_initialized(&self) -> bool {
        self.microphone_initialized
    }

    fn resolve_selection(&mut self) -> Result<B::Endpoint, CaptureError> {
        let endpoint = match self.selection.mode {
            SelectionMode::ByIndex(index) => {
                let count = self.recording_devices()?;
                self.devices
                    .get(index as usize)
                    .cloned()
                    .ok_or(CaptureError::IndexOutOfRange { index, count })?
            }
            SelectionMode::ByRole(role) => self.backend.default_endpoint(role)?,
        };
        self.selection.resolve(endpoint.clone());
        Ok(endpoint)
    }

    // --- Recording side ---

    /// Probe by initializing and undoing it. Never fails.
    ///
    /// An already initialized or running session is left untouched and
    /// reported as available; the probe only undoes its own initialization.
    pub fn recording_is_available(&mut self) -> bool {
        if self.state().is_initialized() {
            return true;
        }

        let available = self.init_recording().is_ok();
        if let Err(e) = self.stop_recording() {
            log::warn!("undoing probe initialization: {}", e);
        }
        available
    }

    /// Acquire the endpoint, negotiate a format and prepare (not start) the client.
    pub fn init_recording(&mut self) -> Result<(), CaptureError> {
        match self.state() {
            CaptureState::Initializing => return Ok(()),
            CaptureState::Running | CaptureState::Stopping => {
                return Err(CaptureError::ConfigurationError(
                    "cannot initialize recording while capturing".into(),
                ))
            }
            CaptureState::Idle => {}
        }

        self.init_microphone()?;
        let endpoint = self
            .selection
            .resolved
            .clone()
            .ok_or_else(|| CaptureError::DeviceUnavailable("no capture endpoint selected".into()))?;

        let mut client = self.backend.activate(&endpoint)?;
        let format = negotiation::negotiate(&self.priority, |rate, channels| {
            client.is_format_supported(rate, channels)
        })?;

        // Fresh signals per session so an abandoned thread cannot touch the next one.
        self.signals = CaptureSignals::new();
        client.initialize(&format, DataReadyNotifier::new(Arc::clone(&self.signals)))?;

        match client.buffer_frames() {
            Ok(frames) => log::debug!(
                "endpoint buffer: {} frames ({} bytes)",
                frames,
                frames as usize * format.frame_bytes
            ),
            Err(e) => log::warn!("endpoint buffer size unavailable: {}", e),
        }

        if let Some(sink) = &self.sink {
            sink.set_recording_format(format.sample_rate, format.channels);
        } else {
            log::debug!("no frame sink attached; attach one before starting");
        }

        {
            let mut shared = self.shared.lock();
            shared.client = Some(client);
            shared.format = Some(format);
            shared.diagnostics.format = Some(format);
            shared.state = CaptureState::Initializing;
        }

        log::info!(
            "capture initialized: {} Hz, {} ch, {} frames per block",
            format.sample_rate,
            format.channels,
            format.block_frames
        );
        Ok(())
    }

    pub fn recording_is_initialized(&self) -> bool {
        self.state().is_initialized()
    }

    /// Spawn the capture thread and wait for it to confirm startup.
    pub fn start_recording(&mut self) -> Result<(), CaptureError> {
        let (format, generation) = {
            let mut shared = self.shared.lock();
            match shared.state {
                CaptureState::Running => return Ok(()),
                CaptureState::Initializing => {}
                CaptureState::Idle | CaptureState::Stopping => {
                    return Err(CaptureError::ConfigurationError("recording is not initialized".into()))
                }
            }
            if self.capture_thread.is_some() {
                return Ok(());
            }

            let format = shared
                .format
                .ok_or_else(|| CaptureError::ConfigurationError("no negotiated format".into()))?;

            let mut diagnostics = CaptureDiagnostics::new_session();
            diagnostics.format = Some(format);
            diagnostics.priority_boost = self.backend.supports_priority_boost();
            shared.diagnostics = diagnostics;
            shared.last_exit = None;
            (format, shared.generation)
        };

        self.signals.prepare_start();
        let ctx = CaptureContext {
            backend: Arc::clone(&self.backend),
            shared: Arc::clone(&self.shared),
            generation,
            signals: Arc::clone(&self.signals),
            sink: self.sink.clone(),
            format,
            data_wait_timeout: self.config.data_wait_timeout(),
        };

        let handle = thread::Builder::new()
            .name(self.config.thread_name.clone())
            .spawn(move || capture_thread::run(ctx))
            .map_err(|e| CaptureError::Platform(format!("failed to spawn capture thread: {}", e)))?;
        self.capture_thread = Some(handle);

        let timeout = self.config.start_timeout();
        match self.signals.wait_started(timeout) {
            StartupOutcome::Started => {
                self.shared.lock().state = CaptureState::Running;
                log::info!("capture stream started");
                Ok(())
            }
            StartupOutcome::Exited => {
                self.shutdown_capture_thread();
                let reason = self
                    .shared
                    .lock()
                    .last_exit
                    .as_ref()
                    .map(ThreadExit::describe)
                    .unwrap_or_else(|| "exit reason unknown".into());
                self.release_session();
                Err(CaptureError::PrematureTermination(reason))
            }
            StartupOutcome::TimedOut => {
                log::error!("capture thread did not start within {:?}", timeout);
                self.shutdown_capture_thread();
                self.release_session();
                Err(CaptureError::StartupTimeout(timeout))
            }
        }
    }

    /// Signal shutdown, wait a bounded time for the thread, and return to idle.
    ///
    /// The audio client is released even when the thread has to be abandoned.
    pub fn stop_recording(&mut self) -> Result<(), CaptureError> {
        if !self.state().is_initialized() {
            return Ok(());
        }

        if self.capture_thread.is_none() {
            log::debug!("no capture stream active, releasing audio client only");
            self.release_session();
            return Ok(());
        }

        self.shared.lock().state = CaptureState::Stopping;
        log::info!("stopping capture stream");

        let exited = self.shutdown_capture_thread();
        let last_exit = self.shared.lock().last_exit.clone();
        self.release_session();

        if !exited {
            return Err(CaptureError::ShutdownTimeout(self.config.stop_timeout()));
        }
        match last_exit {
            Some(ThreadExit::Shutdown) => Ok(()),
            Some(ThreadExit::Premature(e)) => Err(CaptureError::PrematureTermination(e.to_string())),
            None => Err(CaptureError::PrematureTermination("capture thread panicked".into())),
        }
    }

    pub fn recording(&self) -> bool {
        self.state().is_running()
    }

    /// Raise shutdown and join the thread, or abandon it after the stop timeout.
    /// Returns whether the thread exited in time.
    fn shutdown_capture_thread(&mut self) -> bool {
        let Some(handle) = self.capture_thread.take() else {
            return true;
        };

        self.signals.request_shutdown();
        let timeout = self.config.stop_timeout();
        let exited = self.signals.wait_exited(timeout);

        if exited {
            if handle.join().is_err() {
                log::error!("capture thread panicked");
            } else {
                log::debug!("capture thread joined");
            }
            self.signals.clear_shutdown();
        } else {
            // Shutdown stays raised on the abandoned thread's signals.
            log::warn!("capture thread did not exit within {:?}; abandoning it", timeout);
            drop(handle);
        }
        exited
    }

    /// Drop the client (if the thread has not already) and go idle.
    fn release_session(&mut self) {
        let client = self.shared.lock().retire();
        drop(client);
    }

    // --- Format preferences ---

    /// Prefer stereo (2, 1, 4) or mono (1, 2, 4) at the next `init_recording`.
    pub fn set_stereo_recording(&mut self, enable: bool) -> Result<(), CaptureError> {
        self.ensure_not_running("change the channel preference")?;
        self.priority.set_prefer_stereo(enable);
        Ok(())
    }

    /// Negotiated channel count if a format exists, otherwise the preference.
    pub fn stereo_recording(&self) -> bool {
        match self.format() {
            Some(format) => format.channels == 2,
            None => self.priority.prefers_stereo(),
        }
    }

    pub fn stereo_recording_is_available(&mut self) -> Result<bool, CaptureError> {
        Ok(self.format_capabilities()?.stereo)
    }

    /// Which channel layouts the selected endpoint accepts anywhere in the priority matrix.
    pub fn format_capabilities(&mut self) -> Result<FormatCapabilities, CaptureError> {
        let endpoint = self.resolve_selection()?;
        let client = self.backend.activate(&endpoint)?;
        Ok(negotiation::probe_capabilities(|rate, channels| {
            client.is_format_supported(rate, channels)
        }))
    }

    // --- Fixed answers: no render path, echo cancellation delegated ---

    pub fn playout_is_available(&self) -> bool {
        false
    }

    pub fn playout_delay_ms(&self) -> u16 {
        0
    }

    pub fn playing(&self) -> bool {
        false
    }

    pub fn built_in_aec_is_available(&self) -> bool {
        true
    }

    /// Accepted and ignored unless recording is already initialized.
    pub fn enable_built_in_aec(&mut self, enable: bool) -> Result<(), CaptureError> {
        if self.recording_is_initialized() {
            log::error!("built-in AEC cannot change with recording initialized");
            return Err(CaptureError::ConfigurationError(
                "recording already initialized".into(),
            ));
        }
        log::debug!("built-in AEC {} (delegated)", if enable { "enabled" } else { "disabled" });
        Ok(())
    }

    fn ensure_not_running(&self, action: &str) -> Result<(), CaptureError> {
        if self.state().allows_reconfiguration() {
            Ok(())
        } else {
            Err(CaptureError::ConfigurationError(format!("cannot {} while capturing", action)))
        }
    }
}

impl<B: AudioBackend> Drop for LoopbackDevice<B> {
    fn drop(&mut self) {
        if let Err(e) = self.stop_recording() {
            log::warn!("stop on drop: {}", e);
        }
    }
}
