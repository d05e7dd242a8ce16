use serde::Serialize;

/// Sample rates tried during negotiation, highest priority first.
pub const FREQUENCY_PRIORITY: [u32; 6] = [48000, 44100, 16000, 96000, 32000, 8000];

/// Capture is always 16-bit integer PCM.
pub const BITS_PER_SAMPLE: u16 = 16;

/// Duration of one delivered block.
pub const BLOCK_DURATION_MS: u32 = 10;

/// Negotiated shared-mode PCM format. Immutable once negotiated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct CaptureFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
    /// Bytes per interleaved frame (`channels × 2`).
    pub frame_bytes: usize,
    /// Frames per 10 ms block (`sample_rate / 100`).
    pub block_frames: usize,
}

impl CaptureFormat {
    pub fn pcm16(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
            bits_per_sample: BITS_PER_SAMPLE,
            frame_bytes: channels as usize * (BITS_PER_SAMPLE as usize / 8),
            block_frames: (sample_rate / (1000 / BLOCK_DURATION_MS)) as usize,
        }
    }

    /// Size of one delivered block in bytes.
    pub fn block_bytes(&self) -> usize {
        self.block_frames * self.frame_bytes
    }

    pub fn avg_bytes_per_sec(&self) -> u32 {
        self.sample_rate * self.frame_bytes as u32
    }
}

/// Channel counts tried for each frequency, highest priority first.
///
/// Stereo preference toggles the first two slots at runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelPriority {
    order: Vec<u16>,
}

impl ChannelPriority {
    pub fn new(prefer_stereo: bool) -> Self {
        let order = if prefer_stereo { vec![2, 1, 4] } else { vec![1, 2, 4] };
        Self { order }
    }

    pub fn set_prefer_stereo(&mut self, prefer_stereo: bool) {
        *self = Self::new(prefer_stereo);
    }

    pub fn prefers_stereo(&self) -> bool {
        self.order.first() == Some(&2)
    }

    pub fn iter(&self) -> impl Iterator<Item = u16> + '_ {
        self.order.iter().copied()
    }
}

impl Default for ChannelPriority {
    fn default() -> Self {
        Self::new(true)
    }
}

/// Which channel layouts an endpoint can reach anywhere in the priority matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct FormatCapabilities {
    pub stereo: bool,
    pub mono: bool,
}
