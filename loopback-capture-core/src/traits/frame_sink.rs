/// One 10 ms block ready for the transport pipeline.
#[derive(Debug, Clone, Copy)]
pub struct CapturedFrame<'a> {
    /// Interleaved 16-bit little-endian PCM, exactly one block.
    pub pcm: &'a [u8],
    pub samples_per_channel: usize,
    pub channels: u16,
    pub sample_rate: u32,
    pub capture_delay_ms: u32,
    /// Always 0: there is no render path.
    pub playout_delay_ms: u32,
    /// Hint for downstream typing-noise suppression.
    pub key_pressed: bool,
}

/// Downstream consumer of captured blocks (audio buffer / transport).
///
/// `deliver` is called on the capture thread without the session lock held.
/// Keep it short: a slow sink delays the next drain.
pub trait FrameSink: Send + Sync {
    /// Called with zeros when attached and with the negotiated values after `init_recording`.
    fn set_recording_format(&self, sample_rate: u32, channels: u16);

    fn deliver(&self, frame: &CapturedFrame<'_>);
}
