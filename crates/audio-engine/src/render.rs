//! One render cycle: padding query, synthesis, hardware write.

use crate::backend::RenderStream;
use crate::buffer::RenderBuffer;
use crate::error::EngineResult;
use crate::session::SessionInfo;
use crate::synth::{Tone, synthesize};

/// Result of a completed render cycle.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Rendered {
    /// Frames committed to the device (0 when the buffer was already full enough).
    pub frames: u32,
    /// Phase to carry into the next cycle.
    pub phase: f64,
}

/// Frames to write this cycle: at most `min_render_frames`, never more than the free space.
pub fn frames_to_render(max_buffer_frames: u32, padding: u32, min_render_frames: u32) -> u32 {
    min_render_frames.min(max_buffer_frames.saturating_sub(padding))
}

/// Top up the hardware buffer once.
///
/// On error nothing was committed and the returned phase is not advanced, so the caller can
/// skip the cycle and keep its accumulator.
pub fn render_cycle(
    stream: &mut dyn RenderStream,
    buffer: &mut RenderBuffer,
    info: &SessionInfo,
    tone: &Tone,
    phase: f64,
) -> EngineResult<Rendered> {
    let padding = stream.current_padding()?;
    let target = stream
        .period_frames()
        .map_or(info.min_render_frames, |period| period.max(info.min_render_frames));
    let frames = frames_to_render(info.max_buffer_frames, padding, target);
    if frames == 0 {
        return Ok(Rendered { frames: 0, phase });
    }

    let out = buffer.frames_mut(frames as usize);
    let synth = synthesize(
        out,
        info.representation,
        tone,
        phase,
        info.sample_rate,
        frames as usize,
        info.channel_count as usize,
    );
    let frames = synth.frames as u32;
    stream.write_frames(frames, buffer.frames(synth.frames))?;

    Ok(Rendered {
        frames,
        phase: synth.phase,
    })
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::backend::BufferEvent;
    use crate::error::EngineError;
    use crate::format::{Representation, WaveFormat};

    struct FakeStream {
        capacity: u32,
        padding: u32,
        writes: Vec<u32>,
        fail_padding: bool,
        period: Option<u32>,
    }

    impl FakeStream {
        fn new(capacity: u32, padding: u32) -> Self {
            Self {
                capacity,
                padding,
                writes: Vec::new(),
                fail_padding: false,
                period: None,
            }
        }
    }

    impl RenderStream for FakeStream {
        fn create_buffer_event(&mut self) -> EngineResult<BufferEvent> {
            Ok(BufferEvent::new().1)
        }
        fn buffer_frames(&self) -> u32 {
            self.capacity
        }
        fn stream_latency(&self) -> Duration {
            Duration::from_millis(10)
        }
        fn clock_frequency(&self) -> u64 {
            48_000
        }
        fn period_frames(&self) -> Option<u32> {
            self.period
        }
        fn current_padding(&self) -> EngineResult<u32> {
            if self.fail_padding {
                Err(EngineError::Render("padding".into()))
            } else {
                Ok(self.padding)
            }
        }
        fn write_frames(&mut self, frames: u32, data: &[u8]) -> EngineResult<()> {
            assert!(frames <= self.capacity - self.padding);
            assert_eq!(data.len(), frames as usize * 8);
            self.padding += frames;
            self.writes.push(frames);
            Ok(())
        }
        fn start(&mut self) -> EngineResult<()> {
            Ok(())
        }
        fn stop(&mut self) -> EngineResult<()> {
            Ok(())
        }
    }

    fn info(max_buffer_frames: u32, min_render_frames: u32) -> SessionInfo {
        let format = WaveFormat::preferred();
        SessionInfo {
            format,
            representation: Representation::Float,
            channel_count: 2,
            sample_rate: 48_000,
            bytes_per_frame: 8,
            max_buffer_frames,
            min_render_frames,
            clock_frequency: 48_000,
            latency: Duration::from_millis(10),
        }
    }

    #[test]
    fn never_renders_beyond_free_space() {
        let max = 1_000;
        for min_render in [0, 1, 480, 999, 1_000, 5_000] {
            for padding in 0..=max {
                let frames = frames_to_render(max, padding, min_render);
                assert!(frames <= max - padding);
                assert!(frames <= min_render);
            }
        }
    }

    #[test]
    fn padding_above_capacity_renders_nothing() {
        assert_eq!(frames_to_render(100, 150, 480), 0);
    }

    #[test]
    fn full_buffer_skips_write() {
        let info = info(480, 480);
        let mut stream = FakeStream::new(480, 480);
        let mut buffer = RenderBuffer::new(480, 8);
        let out = render_cycle(&mut stream, &mut buffer, &info, &Tone::default(), 0.25).unwrap();
        assert_eq!(out, Rendered { frames: 0, phase: 0.25 });
        assert!(stream.writes.is_empty());
    }

    #[test]
    fn cycle_tops_up_to_min_render_frames() {
        let info = info(4_800, 480);
        let mut stream = FakeStream::new(4_800, 4_500);
        let mut buffer = RenderBuffer::new(4_800, 8);
        let out = render_cycle(&mut stream, &mut buffer, &info, &Tone::default(), 0.0).unwrap();
        assert_eq!(out.frames, 300);
        assert!((out.phase - 300.0 / 48_000.0).abs() < 1e-12);

        stream.padding = 0;
        let out = render_cycle(&mut stream, &mut buffer, &info, &Tone::default(), out.phase).unwrap();
        assert_eq!(out.frames, 480);
        assert_eq!(stream.writes, vec![300, 480]);
    }

    #[test]
    fn observed_period_raises_render_target() {
        let info = info(48_000, 480);
        let mut buffer = RenderBuffer::new(48_000, 8);

        let mut stream = FakeStream::new(48_000, 0);
        stream.period = Some(1_024);
        let out = render_cycle(&mut stream, &mut buffer, &info, &Tone::default(), 0.0).unwrap();
        assert_eq!(out.frames, 1_024);

        // A period shorter than the latency never lowers the target.
        let mut stream = FakeStream::new(48_000, 0);
        stream.period = Some(256);
        let out = render_cycle(&mut stream, &mut buffer, &info, &Tone::default(), 0.0).unwrap();
        assert_eq!(out.frames, 480);
    }

    #[test]
    fn padding_failure_writes_nothing() {
        let info = info(480, 480);
        let mut stream = FakeStream::new(480, 0);
        stream.fail_padding = true;
        let mut buffer = RenderBuffer::new(480, 8);
        assert!(render_cycle(&mut stream, &mut buffer, &info, &Tone::default(), 0.0).is_err());
        assert!(stream.writes.is_empty());
    }
}
