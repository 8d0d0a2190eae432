/// Fixed-capacity scratch arena the synthesizer renders into before each hardware copy.
///
/// Sized once for the device's full hardware buffer, so no render cycle ever allocates.
#[derive(Debug)]
pub struct RenderBuffer {
    bytes: Box<[u8]>,
    bytes_per_frame: usize,
}

impl RenderBuffer {
    pub fn new(max_frames: u32, bytes_per_frame: usize) -> Self {
        let len = max_frames as usize * bytes_per_frame;
        Self {
            bytes: vec![0u8; len].into_boxed_slice(),
            bytes_per_frame,
        }
    }

    /// Capacity in frames.
    pub fn max_frames(&self) -> usize {
        if self.bytes_per_frame == 0 {
            0
        } else {
            self.bytes.len() / self.bytes_per_frame
        }
    }

    /// Mutable view over the first `frames` frames (clamped to capacity).
    pub fn frames_mut(&mut self, frames: usize) -> &mut [u8] {
        let len = frames.min(self.max_frames()) * self.bytes_per_frame;
        &mut self.bytes[..len]
    }

    /// Read-only view over the first `frames` frames (clamped to capacity).
    pub fn frames(&self, frames: usize) -> &[u8] {
        let len = frames.min(self.max_frames()) * self.bytes_per_frame;
        &self.bytes[..len]
    }
}
