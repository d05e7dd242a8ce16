//! Shared-mode format negotiation.
//!
//! Frequencies form the outer loop and channel counts the inner loop; the
//! first pair the endpoint accepts wins.

use crate::models::error::CaptureError;
use crate::models::format::{CaptureFormat, ChannelPriority, FormatCapabilities, FREQUENCY_PRIORITY};

/// Pick the first `(rate, channels)` in priority order that `accepts` approves.
pub fn negotiate<F>(priority: &ChannelPriority, mut accepts: F) -> Result<CaptureFormat, CaptureError>
where
    F: FnMut(u32, u16) -> bool,
{
    for &rate in FREQUENCY_PRIORITY.iter() {
        for channels in priority.iter() {
            if accepts(rate, channels) {
                let format = CaptureFormat::pcm16(rate, channels);
                log::debug!(
                    "selected capture format: {} Hz, {} ch, {} bytes/frame, {} frames/block",
                    format.sample_rate,
                    format.channels,
                    format.frame_bytes,
                    format.block_frames
                );
                return Ok(format);
            }
            log::debug!("{} Hz / {} ch not supported", rate, channels);
        }
    }
    Err(CaptureError::FormatNegotiationFailure)
}

/// Which of stereo and mono the priority matrix can reach on this endpoint.
pub fn probe_capabilities<F>(mut accepts: F) -> FormatCapabilities
where
    F: FnMut(u32, u16) -> bool,
{
    let mut caps = FormatCapabilities::default();
    for &rate in FREQUENCY_PRIORITY.iter() {
        if !caps.stereo && accepts(rate, 2) {
            caps.stereo = true;
        }
        if !caps.mono && accepts(rate, 1) {
            caps.mono = true;
        }
        if caps.stereo && caps.mono {
            break;
        }
    }
    caps
}
