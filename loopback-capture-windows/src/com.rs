use windows::Win32::System::Com::{CoInitializeEx, CoUninitialize, COINIT_MULTITHREADED};

use crate::error::{ResultExt, WasapiError};

/// Multithreaded COM apartment for the current thread, left on drop.
///
/// Must be dropped on the thread that created it.
pub struct ComScope {
    _not_send: std::marker::PhantomData<*const ()>,
}

impl ComScope {
    pub fn initialize_mta() -> Result<Self, WasapiError> {
        unsafe { CoInitializeEx(None, COINIT_MULTITHREADED) }
            .ok()
            .call("CoInitializeEx")?;
        Ok(Self {
            _not_send: std::marker::PhantomData,
        })
    }
}

impl Drop for ComScope {
    fn drop(&mut self) {
        unsafe {
            CoUninitialize();
        }
    }
}
