//! WASAPI loopback capture client.
//!
//! Opens a render endpoint in shared mode with `AUDCLNT_STREAMFLAGS_LOOPBACK`
//! and `AUDCLNT_STREAMFLAGS_EVENTCALLBACK`. The buffer-ready event is bridged
//! to the engine's data-ready signal through a thread-pool wait.
//!
//! ## Notes
//! - No permissions or entitlements are needed for loopback on Windows
//! - DRM-protected audio arrives as silent packets
//! - Event-driven loopback requires Windows 10 1703+

use std::ffi::c_void;

use windows::Win32::Foundation::{CloseHandle, HANDLE, INVALID_HANDLE_VALUE, S_OK};
use windows::Win32::Media::Audio::*;
use windows::Win32::Media::KernelStreaming::{KSDATAFORMAT_SUBTYPE_PCM, WAVE_FORMAT_EXTENSIBLE};
use windows::Win32::System::Com::CoTaskMemFree;
use windows::Win32::System::Performance::QueryPerformanceCounter;
use windows::Win32::System::Threading::{
    CreateEventW, RegisterWaitForSingleObject, UnregisterWaitEx, INFINITE, WT_EXECUTEDEFAULT,
};

use loopback_capture_core::{
    BufferRead, CaptureClient, CaptureError, CaptureFormat, DataReadyNotifier, Packet, StreamTiming,
};

use crate::clock;
use crate::error::ResultExt;

/// Auto-reset event the audio engine signals, forwarded to a [`DataReadyNotifier`].
struct DataReadyEvent {
    event: HANDLE,
    wait: HANDLE,
    notifier: *mut DataReadyNotifier,
}

unsafe extern "system" fn on_buffer_ready(context: *mut c_void, _timed_out: bool) {
    // SAFETY: context is the boxed notifier, alive until the wait is unregistered.
    let notifier = unsafe { &*(context as *const DataReadyNotifier) };
    notifier.notify();
}

impl DataReadyEvent {
    fn new(notifier: DataReadyNotifier) -> Result<Self, CaptureError> {
        unsafe {
            let event = CreateEventW(None, false, false, None).call("CreateEventW")?;
            let notifier = Box::into_raw(Box::new(notifier));

            let mut wait = HANDLE::default();
            if let Err(e) = RegisterWaitForSingleObject(
                &mut wait,
                event,
                Some(on_buffer_ready),
                Some(notifier as *const c_void),
                INFINITE,
                WT_EXECUTEDEFAULT,
            ) {
                drop(Box::from_raw(notifier));
                let _ = CloseHandle(event);
                return Err(CaptureError::Platform(format!("RegisterWaitForSingleObject failed: {}", e)));
            }

            Ok(Self { event, wait, notifier })
        }
    }
}

impl Drop for DataReadyEvent {
    fn drop(&mut self) {
        unsafe {
            // Blocks until any running callback has returned.
            if let Err(e) = UnregisterWaitEx(self.wait, Some(INVALID_HANDLE_VALUE)) {
                log::warn!("UnregisterWaitEx failed: {}", e);
            }
            drop(Box::from_raw(self.notifier));
            let _ = CloseHandle(self.event);
        }
    }
}

/// Shared-mode loopback stream on one render endpoint.
pub struct WasapiCaptureClient {
    audio_client: IAudioClient,
    capture_client: Option<IAudioCaptureClient>,
    // Dropped after the clients so the engine stops signalling first.
    ready_event: Option<DataReadyEvent>,
    format: Option<CaptureFormat>,
    clock_factor: f64,
}

// SAFETY: COM objects are created in the MTA and only used by one thread at a time,
// serialized by the session lock.
unsafe impl Send for WasapiCaptureClient {}

impl WasapiCaptureClient {
    pub(crate) fn new(audio_client: IAudioClient, clock_factor: f64) -> Self {
        Self {
            audio_client,
            capture_client: None,
            ready_event: None,
            format: None,
            clock_factor,
        }
    }

    fn log_mix_format(&self) {
        unsafe {
            let Ok(mix) = self.audio_client.GetMixFormat() else {
                return;
            };
            let wfx = &*mix;
            log::debug!(
                "engine mix format: tag=0x{:x} channels={} rate={} avg_bytes={} block_align={} bits={}",
                wfx.wFormatTag,
                wfx.nChannels,
                wfx.nSamplesPerSec,
                wfx.nAvgBytesPerSec,
                wfx.nBlockAlign,
                wfx.wBitsPerSample
            );
            CoTaskMemFree(Some(mix as *const _));
        }
    }

    fn capture_client(&self) -> Result<&IAudioCaptureClient, CaptureError> {
        self.capture_client
            .as_ref()
            .ok_or_else(|| CaptureError::ConfigurationError("capture client not initialized".into()))
    }
}

/// 16-bit integer PCM, channel mask left to the engine.
fn pcm16_wave_format(sample_rate: u32, channels: u16) -> WAVEFORMATEXTENSIBLE {
    let format = CaptureFormat::pcm16(sample_rate, channels);
    let block_align = format.frame_bytes as u16;
    WAVEFORMATEXTENSIBLE {
        Format: WAVEFORMATEX {
            wFormatTag: WAVE_FORMAT_EXTENSIBLE as u16,
            nChannels: channels,
            nSamplesPerSec: sample_rate,
            nAvgBytesPerSec: format.avg_bytes_per_sec(),
            nBlockAlign: block_align,
            wBitsPerSample: format.bits_per_sample,
            cbSize: 22,
        },
        Samples: WAVEFORMATEXTENSIBLE_0 {
            wValidBitsPerSample: format.bits_per_sample,
        },
        dwChannelMask: 0,
        SubFormat: KSDATAFORMAT_SUBTYPE_PCM,
    }
}

impl CaptureClient for WasapiCaptureClient {
    fn is_format_supported(&self, sample_rate: u32, channels: u16) -> bool {
        let wfx = pcm16_wave_format(sample_rate, channels);
        let mut closest: *mut WAVEFORMATEX = std::ptr::null_mut();
        unsafe {
            let hr = self.audio_client.IsFormatSupported(
                AUDCLNT_SHAREMODE_SHARED,
                &wfx as *const _ as *const WAVEFORMATEX,
                Some(&mut closest),
            );
            if !closest.is_null() {
                log::debug!(
                    "{} Hz / {} ch rejected, closest match {} Hz / {} ch",
                    sample_rate,
                    channels,
                    (*closest).nSamplesPerSec,
                    (*closest).nChannels
                );
                CoTaskMemFree(Some(closest as *const _));
            }
            hr == S_OK
        }
    }

    fn initialize(&mut self, format: &CaptureFormat, notifier: DataReadyNotifier) -> Result<(), CaptureError> {
        self.log_mix_format();
        let wfx = pcm16_wave_format(format.sample_rate, format.channels);

        unsafe {
            self.audio_client
                .Initialize(
                    AUDCLNT_SHAREMODE_SHARED,
                    AUDCLNT_STREAMFLAGS_EVENTCALLBACK | AUDCLNT_STREAMFLAGS_NOPERSIST | AUDCLNT_STREAMFLAGS_LOOPBACK,
                    0,
                    0,
                    &wfx as *const _ as *const WAVEFORMATEX,
                    None,
                )
                .call("IAudioClient::Initialize")?;

            let ready_event = DataReadyEvent::new(notifier)?;
            self.audio_client
                .SetEventHandle(ready_event.event)
                .call("IAudioClient::SetEventHandle")?;

            let capture_client: IAudioCaptureClient =
                self.audio_client.GetService().call("IAudioClient::GetService")?;

            self.ready_event = Some(ready_event);
            self.capture_client = Some(capture_client);
        }

        self.format = Some(*format);
        Ok(())
    }

    fn buffer_frames(&self) -> Result<u32, CaptureError> {
        Ok(unsafe { self.audio_client.GetBufferSize() }.call("IAudioClient::GetBufferSize")?)
    }

    fn stream_timing(&self) -> Result<StreamTiming, CaptureError> {
        unsafe {
            let latency_100ns = self.audio_client.GetStreamLatency().call("IAudioClient::GetStreamLatency")?;
            let mut device_period_100ns = 0i64;
            self.audio_client
                .GetDevicePeriod(Some(&mut device_period_100ns), None)
                .call("IAudioClient::GetDevicePeriod")?;
            Ok(StreamTiming {
                latency_100ns,
                device_period_100ns,
            })
        }
    }

    fn start(&mut self) -> Result<(), CaptureError> {
        Ok(unsafe { self.audio_client.Start() }.call("IAudioClient::Start")?)
    }

    fn stop(&mut self) -> Result<(), CaptureError> {
        Ok(unsafe { self.audio_client.Stop() }.call("IAudioClient::Stop")?)
    }

    fn reset(&mut self) -> Result<(), CaptureError> {
        Ok(unsafe { self.audio_client.Reset() }.call("IAudioClient::Reset")?)
    }

    fn next_packet(&mut self) -> Result<BufferRead<'_>, CaptureError> {
        let frame_bytes = self
            .format
            .map(|f| f.frame_bytes)
            .ok_or_else(|| CaptureError::ConfigurationError("capture client not initialized".into()))?;
        let capture = self.capture_client()?;

        unsafe {
            let pending = capture
                .GetNextPacketSize()
                .map_err(|e| CaptureError::FatalStreamError(format!("GetNextPacketSize failed: {}", e)))?;
            if pending == 0 {
                return Ok(BufferRead::Empty);
            }

            let mut data: *mut u8 = std::ptr::null_mut();
            let mut frames: u32 = 0;
            let mut flags: u32 = 0;
            let mut qpc_position: u64 = 0;
            capture
                .GetBuffer(&mut data, &mut frames, &mut flags, None, Some(&mut qpc_position))
                .map_err(|e| CaptureError::FatalStreamError(format!("GetBuffer failed: {}", e)))?;

            if frames == 0 {
                // Every successful GetBuffer is paired with a release, even an empty one.
                capture
                    .ReleaseBuffer(0)
                    .map_err(|e| CaptureError::FatalStreamError(format!("ReleaseBuffer failed: {}", e)))?;
                return Ok(BufferRead::Empty);
            }

            let silent = flags & (AUDCLNT_BUFFERFLAGS_SILENT.0 as u32) != 0;
            let data = if silent || data.is_null() {
                None
            } else {
                // SAFETY: valid until ReleaseBuffer, which needs `&mut self` and so ends this borrow.
                Some(std::slice::from_raw_parts(data as *const u8, frames as usize * frame_bytes))
            };

            Ok(BufferRead::Packet(Packet {
                frames,
                data,
                timestamp_100ns: qpc_position,
            }))
        }
    }

    fn release_packet(&mut self, frames: u32) -> Result<(), CaptureError> {
        let capture = self.capture_client()?;
        unsafe { capture.ReleaseBuffer(frames) }
            .map_err(|e| CaptureError::FatalStreamError(format!("ReleaseBuffer failed: {}", e)))
    }

    fn clock_100ns(&self) -> u64 {
        let mut ticks = 0i64;
        if unsafe { QueryPerformanceCounter(&mut ticks) }.is_err() {
            return 0;
        }
        clock::ticks_to_100ns(ticks, self.clock_factor)
    }
}
