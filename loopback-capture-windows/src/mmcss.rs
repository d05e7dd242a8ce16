//! MMCSS thread-priority boost, probed at runtime.
//!
//! `avrt.dll` is loaded dynamically; when it or its entry points are missing
//! the capture thread simply runs without the boost.

use windows::core::{s, w, BOOL, PCWSTR};
use windows::Win32::Foundation::{FreeLibrary, GetLastError, HANDLE, HMODULE};
use windows::Win32::System::LibraryLoader::{GetProcAddress, LoadLibraryW};

type AvSetMmThreadCharacteristicsW = unsafe extern "system" fn(PCWSTR, *mut u32) -> HANDLE;
type AvRevertMmThreadCharacteristics = unsafe extern "system" fn(HANDLE) -> BOOL;

/// Entry points resolved from `avrt.dll`.
pub struct Mmcss {
    module: HMODULE,
    set: AvSetMmThreadCharacteristicsW,
    revert: AvRevertMmThreadCharacteristics,
}

// SAFETY: the module handle and function pointers are process-wide and immutable.
unsafe impl Send for Mmcss {}
unsafe impl Sync for Mmcss {}

impl Mmcss {
    /// `None` when the boost is not available on this system.
    pub fn probe() -> Option<Self> {
        unsafe {
            let module = LoadLibraryW(w!("avrt.dll")).ok()?;
            let set = GetProcAddress(module, s!("AvSetMmThreadCharacteristicsW"));
            let revert = GetProcAddress(module, s!("AvRevertMmThreadCharacteristics"));
            match (set, revert) {
                (Some(set), Some(revert)) => Some(Self {
                    module,
                    set: std::mem::transmute::<unsafe extern "system" fn() -> isize, AvSetMmThreadCharacteristicsW>(set),
                    revert: std::mem::transmute::<unsafe extern "system" fn() -> isize, AvRevertMmThreadCharacteristics>(
                        revert,
                    ),
                }),
                _ => {
                    log::warn!("avrt.dll lacks the MMCSS entry points");
                    let _ = FreeLibrary(module);
                    None
                }
            }
        }
    }

    /// Register the calling thread with the "Pro Audio" task.
    pub fn boost_current_thread(&self) -> Option<MmcssBoost> {
        let mut task_index: u32 = 0;
        let handle = unsafe { (self.set)(w!("Pro Audio"), &mut task_index) };
        if handle.is_invalid() {
            log::warn!("AvSetMmThreadCharacteristicsW failed: {:?}", unsafe { GetLastError() });
            return None;
        }
        log::debug!("capture thread registered with MMCSS (task index {})", task_index);
        Some(MmcssBoost {
            handle,
            revert: self.revert,
        })
    }
}

impl Drop for Mmcss {
    fn drop(&mut self) {
        unsafe {
            let _ = FreeLibrary(self.module);
        }
    }
}

/// Active MMCSS registration; reverted on drop.
pub struct MmcssBoost {
    handle: HANDLE,
    revert: AvRevertMmThreadCharacteristics,
}

impl Drop for MmcssBoost {
    fn drop(&mut self) {
        if !unsafe { (self.revert)(self.handle) }.as_bool() {
            log::warn!("AvRevertMmThreadCharacteristics failed");
        }
    }
}
