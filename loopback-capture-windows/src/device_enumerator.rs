//! Output-endpoint discovery via the MMDevice API.
//!
//! Wraps `IMMDeviceEnumerator` over render endpoints. Loopback capture reads
//! what an output device plays, so every query here is on `eRender`.

use windows::Win32::Devices::FunctionDiscovery::PKEY_Device_FriendlyName;
use windows::Win32::Media::Audio::Endpoints::IAudioEndpointVolume;
use windows::Win32::Media::Audio::*;
use windows::Win32::System::Com::*;
use windows::Win32::System::Performance::QueryPerformanceFrequency;
use windows::Win32::System::Threading::{GetCurrentThread, SetThreadPriority, THREAD_PRIORITY_TIME_CRITICAL};

use loopback_capture_core::{AudioBackend, CaptureError, EndpointDescriptor, EndpointRole, EndpointStates, HardwareSupport};

use crate::clock;
use crate::com::ComScope;
use crate::error::ResultExt;
use crate::keyboard;
use crate::mmcss::{Mmcss, MmcssBoost};
use crate::wasapi_loopback::WasapiCaptureClient;

/// One render endpoint. Cloning adds a COM reference; dropping releases it.
#[derive(Clone)]
pub struct WasapiEndpoint(IMMDevice);

// SAFETY: MMDevice objects live in the multithreaded apartment and are free-threaded.
unsafe impl Send for WasapiEndpoint {}

impl WasapiEndpoint {
    pub fn device(&self) -> &IMMDevice {
        &self.0
    }
}

/// Platform scope of the capture thread: COM apartment plus optional MMCSS boost.
pub struct CaptureThreadScope {
    // Boost reverts before COM is left.
    _boost: Option<MmcssBoost>,
    _com: ComScope,
}

/// WASAPI backend for the loopback capture engine.
///
/// Requires COM to be initialized (MTA) on the thread that creates it.
pub struct WasapiBackend {
    enumerator: IMMDeviceEnumerator,
    mmcss: Option<Mmcss>,
    clock_factor: f64,
}

// SAFETY: the enumerator is created in the MTA; MTA COM objects may be called from any thread.
unsafe impl Send for WasapiBackend {}
unsafe impl Sync for WasapiBackend {}

impl WasapiBackend {
    pub fn new() -> Result<Self, CaptureError> {
        let enumerator: IMMDeviceEnumerator =
            unsafe { CoCreateInstance(&MMDeviceEnumerator, None, CLSCTX_ALL) }.unavailable("CoCreateInstance")?;

        let mut frequency = 0i64;
        unsafe { QueryPerformanceFrequency(&mut frequency) }.call("QueryPerformanceFrequency")?;

        let mmcss = Mmcss::probe();
        if mmcss.is_none() {
            log::warn!("MMCSS unavailable; capture thread will not be boosted");
        }

        Ok(Self {
            enumerator,
            mmcss,
            clock_factor: clock::ticks_to_100ns_factor(frequency),
        })
    }

    fn endpoint_id(device: &IMMDevice) -> Result<String, CaptureError> {
        unsafe {
            let id = device.GetId().call("IMMDevice::GetId")?;
            let text = id.to_string().unwrap_or_default();
            CoTaskMemFree(Some(id.0 as *const _));
            Ok(text)
        }
    }

    /// Read `PKEY_Device_FriendlyName` from a device's property store.
    fn friendly_name(device: &IMMDevice) -> Option<String> {
        unsafe {
            let store = device.OpenPropertyStore(STGM_READ).ok()?;
            let value = store.GetValue(&PKEY_Device_FriendlyName).ok()?;
            let name = value.to_string();
            (!name.is_empty()).then_some(name)
        }
    }

    fn hardware_support(device: &IMMDevice) -> HardwareSupport {
        unsafe {
            device
                .Activate::<IAudioEndpointVolume>(CLSCTX_ALL, None)
                .and_then(|volume| volume.QueryHardwareSupport())
                .map(HardwareSupport::from_bits)
                .unwrap_or_default()
        }
    }
}

fn erole(role: EndpointRole) -> ERole {
    match role {
        EndpointRole::Default => eConsole,
        EndpointRole::DefaultCommunications => eCommunications,
    }
}

impl AudioBackend for WasapiBackend {
    type Endpoint = WasapiEndpoint;
    type Client = WasapiCaptureClient;
    type ThreadGuard = CaptureThreadScope;

    fn enumerate(&self, states: EndpointStates) -> Result<Vec<WasapiEndpoint>, CaptureError> {
        unsafe {
            let collection = self
                .enumerator
                .EnumAudioEndpoints(eRender, DEVICE_STATE(states.bits()))
                .unavailable("EnumAudioEndpoints")?;

            let count = collection.GetCount().unavailable("IMMDeviceCollection::GetCount")?;

            let mut endpoints = Vec::with_capacity(count as usize);
            for i in 0..count {
                let device = collection.Item(i).unavailable("IMMDeviceCollection::Item")?;
                endpoints.push(WasapiEndpoint(device));
            }
            Ok(endpoints)
        }
    }

    fn default_endpoint(&self, role: EndpointRole) -> Result<WasapiEndpoint, CaptureError> {
        unsafe {
            self.enumerator
                .GetDefaultAudioEndpoint(eRender, erole(role))
                .map(WasapiEndpoint)
                .unavailable("GetDefaultAudioEndpoint")
        }
    }

    fn describe(&self, endpoint: &WasapiEndpoint) -> Result<EndpointDescriptor, CaptureError> {
        let device = endpoint.device();
        let id = Self::endpoint_id(device)?;
        let state = unsafe { device.GetState() }.call("IMMDevice::GetState")?;

        Ok(EndpointDescriptor {
            name: Self::friendly_name(device).unwrap_or_else(|| "<unknown>".into()),
            id,
            state: EndpointStates::from_bits(state.0),
            hardware_support: Self::hardware_support(device),
        })
    }

    fn activate(&self, endpoint: &WasapiEndpoint) -> Result<WasapiCaptureClient, CaptureError> {
        let client: IAudioClient =
            unsafe { endpoint.device().Activate(CLSCTX_ALL, None) }.unavailable("IMMDevice::Activate")?;
        Ok(WasapiCaptureClient::new(client, self.clock_factor))
    }

    fn supports_priority_boost(&self) -> bool {
        self.mmcss.is_some()
    }

    fn enter_capture_thread(&self) -> Result<CaptureThreadScope, CaptureError> {
        let com = ComScope::initialize_mta()?;

        if let Err(e) = unsafe { SetThreadPriority(GetCurrentThread(), THREAD_PRIORITY_TIME_CRITICAL) } {
            log::warn!("SetThreadPriority failed: {}", e);
        }
        let boost = self.mmcss.as_ref().and_then(Mmcss::boost_current_thread);

        Ok(CaptureThreadScope {
            _boost: boost,
            _com: com,
        })
    }

    fn key_pressed(&self) -> bool {
        keyboard::key_pressed()
    }
}
