use crate::models::error::CaptureError;
use crate::models::format::CaptureFormat;

/// Linear accumulation buffer between variable-size device packets and
/// fixed 10 ms blocks.
///
/// Capacity is twice the endpoint buffer. Overflow is fatal: the buffer
/// never drops or truncates data. Owned by the capture thread only.
#[derive(Debug)]
pub struct SyncBuffer {
    buffer: Vec<u8>,
    fill_frames: usize,
    frame_bytes: usize,
    block_frames: usize,
}

impl SyncBuffer {
    pub fn new(device_buffer_frames: usize, format: &CaptureFormat) -> Self {
        Self {
            buffer: vec![0; 2 * device_buffer_frames * format.frame_bytes],
            fill_frames: 0,
            frame_bytes: format.frame_bytes,
            block_frames: format.block_frames,
        }
    }

    /// Append one packet. `None` appends `frames` of silence.
    pub fn push(&mut self, data: Option<&[u8]>, frames: usize) -> Result<(), CaptureError> {
        let offset = self.fill_frames * self.frame_bytes;
        let len = frames * self.frame_bytes;
        if offset + len > self.buffer.len() {
            return Err(CaptureError::FatalStreamError(format!(
                "sync buffer overflow: {} + {} bytes exceeds capacity {}",
                offset,
                len,
                self.buffer.len()
            )));
        }

        let dest = &mut self.buffer[offset..offset + len];
        match data {
            Some(bytes) => {
                if bytes.len() < len {
                    return Err(CaptureError::FatalStreamError(format!(
                        "packet holds {} bytes, expected {}",
                        bytes.len(),
                        len
                    )));
                }
                dest.copy_from_slice(&bytes[..len]);
            }
            None => dest.fill(0),
        }

        self.fill_frames += frames;
        Ok(())
    }

    /// Whether at least one full block is buffered.
    pub fn has_block(&self) -> bool {
        self.fill_frames >= self.block_frames
    }

    /// The oldest full block. Only meaningful when `has_block()` is true.
    pub fn front_block(&self) -> &[u8] {
        &self.buffer[..self.block_frames * self.frame_bytes]
    }

    /// Drop the front block and shift the remainder to the start.
    pub fn consume_block(&mut self) {
        let block_bytes = self.block_frames * self.frame_bytes;
        let fill_bytes = self.fill_frames * self.frame_bytes;
        self.buffer.copy_within(block_bytes..fill_bytes, 0);
        self.fill_frames -= self.block_frames;
    }

    /// Buffered frames not yet delivered.
    pub fn fill_frames(&self) -> usize {
        self.fill_frames
    }

    pub fn capacity_bytes(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fill_frames == 0
    }
}
