//! Signal-conditioning DSP stage
//!
//! Float PCM from the synthesizer passes through a fixed per-sample chain
//! before hitting the wire: gain, one-pole IIR smoothing, exponential soft
//! clip, i16 quantisation. Filter state is per-stream and dies with it.
//!
//! The whole stage is pure f32/f64-free arithmetic: the same input samples
//! always produce byte-identical frames.

use voice_gateway_core::{FRAME_BYTES, FRAME_SAMPLES};

/// Fixed output gain applied before smoothing.
const GAIN: f32 = 1.8;

/// One-pole smoothing coefficient: y = alpha * x + (1 - alpha) * y_prev.
const ALPHA: f32 = 0.15;

/// Per-sample conditioning chain with per-stream filter state.
#[derive(Debug, Clone)]
pub struct SampleShaper {
    /// Previous smoother output, initialised to silence.
    state: f32,
}

impl SampleShaper {
    pub fn new() -> Self {
        Self { state: 0.0 }
    }

    /// Run one sample through gain, smoothing, and the soft clipper, then
    /// quantise to i16.
    pub fn process(&mut self, sample: f32) -> i16 {
        let amplified = sample * GAIN;
        let smoothed = ALPHA * amplified + (1.0 - ALPHA) * self.state;
        self.state = smoothed;
        quantize(soft_clip(smoothed))
    }
}

impl Default for SampleShaper {
    fn default() -> Self {
        Self::new()
    }
}

/// Exponential saturation in place of hard clipping. Inside [-1, 1] the
/// signal passes unchanged; the overflow branches approach the rails
/// asymptotically.
fn soft_clip(x: f32) -> f32 {
    if x > 1.0 {
        1.0 - (-(x - 1.0)).exp()
    } else if x < -1.0 {
        -1.0 + (-(x.abs() - 1.0)).exp()
    } else {
        x
    }
}

/// Round to the nearest i16, clamping at the rails.
fn quantize(x: f32) -> i16 {
    (x * 32767.0).round().clamp(-32768.0, 32767.0) as i16
}

/// Accumulates conditioned samples into fixed 882-byte frames.
#[derive(Debug, Default)]
pub struct FrameAssembler {
    buf: Vec<u8>,
}

impl FrameAssembler {
    pub fn new() -> Self {
        Self {
            buf: Vec::with_capacity(FRAME_BYTES),
        }
    }

    /// Append one sample; returns a full frame when the 441st sample lands.
    pub fn push(&mut self, sample: i16) -> Option<Vec<u8>> {
        self.buf.extend_from_slice(&sample.to_le_bytes());
        if self.buf.len() == FRAME_BYTES {
            Some(std::mem::replace(
                &mut self.buf,
                Vec::with_capacity(FRAME_BYTES),
            ))
        } else {
            None
        }
    }

    /// Zero-pad and emit any trailing partial frame at end-of-stream.
    pub fn flush(&mut self) -> Option<Vec<u8>> {
        if self.buf.is_empty() {
            return None;
        }
        let mut frame = std::mem::replace(&mut self.buf, Vec::with_capacity(FRAME_BYTES));
        frame.resize(FRAME_BYTES, 0);
        Some(frame)
    }

    /// Samples currently buffered short of a frame.
    pub fn pending_samples(&self) -> usize {
        self.buf.len() / 2
    }
}

/// Shaper and assembler glued together: float chunks in, frames out.
#[derive(Debug, Default)]
pub struct FrameProducer {
    shaper: SampleShaper,
    assembler: FrameAssembler,
}

impl FrameProducer {
    pub fn new() -> Self {
        Self {
            shaper: SampleShaper::new(),
            assembler: FrameAssembler::new(),
        }
    }

    /// Condition a chunk of float PCM, returning every completed frame.
    pub fn push_chunk(&mut self, samples: &[f32]) -> Vec<Vec<u8>> {
        let mut frames = Vec::new();
        for &sample in samples {
            let conditioned = self.shaper.process(sample);
            if let Some(frame) = self.assembler.push(conditioned) {
                frames.push(frame);
            }
        }
        frames
    }

    /// Emit the zero-padded tail frame, if any samples are pending.
    pub fn finish(&mut self) -> Option<Vec<u8>> {
        self.assembler.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frames_for(samples: &[f32]) -> Vec<Vec<u8>> {
        let mut producer = FrameProducer::new();
        let mut frames = producer.push_chunk(samples);
        frames.extend(producer.finish());
        frames
    }

    #[test]
    fn test_every_frame_is_882_bytes() {
        let samples = vec![0.25f32; FRAME_SAMPLES * 3 + 100];
        let frames = frames_for(&samples);
        assert_eq!(frames.len(), 4);
        for frame in &frames {
            assert_eq!(frame.len(), FRAME_BYTES);
        }
    }

    #[test]
    fn test_frame_count_is_ceil_of_samples() {
        // 0 samples -> 0 frames
        assert!(frames_for(&[]).is_empty());

        // exactly one frame, no padding
        assert_eq!(frames_for(&vec![0.1f32; FRAME_SAMPLES]).len(), 1);

        // one extra sample -> a second, padded frame
        assert_eq!(frames_for(&vec![0.1f32; FRAME_SAMPLES + 1]).len(), 2);
    }

    #[test]
    fn test_tail_frame_is_zero_padded() {
        let frames = frames_for(&vec![0.5f32; FRAME_SAMPLES + 10]);
        let tail = frames.last().unwrap();
        // everything past the 10 real samples must be silence
        assert!(tail[20..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_deterministic_output() {
        let samples: Vec<f32> = (0..2000).map(|i| ((i as f32) * 0.013).sin() * 0.7).collect();
        assert_eq!(frames_for(&samples), frames_for(&samples));
    }

    #[test]
    fn test_smoother_converges_on_constant_input() {
        // A constant input below the clip threshold converges to
        // gain * input; with alpha = 0.15 it is within 1% by ~30 samples.
        let input = 0.3f32;
        let target = input * 1.8;

        let mut shaper = SampleShaper::new();
        let mut last = 0i16;
        for _ in 0..30 {
            last = shaper.process(input);
        }
        let value = last as f32 / 32767.0;
        assert!(value >= 0.99 * target, "converged to {value}, want >= {}", 0.99 * target);
        assert!(value <= target + 0.01);
    }

    #[test]
    fn test_soft_clip_passthrough_below_threshold() {
        assert_eq!(soft_clip(0.0), 0.0);
        assert_eq!(soft_clip(0.9), 0.9);
        assert_eq!(soft_clip(-0.9), -0.9);
        assert_eq!(soft_clip(1.0), 1.0);
        assert_eq!(soft_clip(-1.0), -1.0);
    }

    #[test]
    fn test_soft_clip_saturates_toward_rails() {
        // the overflow branches approach +/-1 without ever crossing
        assert!(soft_clip(5.0) < 1.0);
        assert!(soft_clip(50.0) > soft_clip(5.0));
        assert!(soft_clip(-5.0) > -1.0);
        assert!(soft_clip(-50.0) < soft_clip(-5.0));
    }

    #[test]
    fn test_quantize_rounds_and_clamps() {
        assert_eq!(quantize(0.0), 0);
        assert_eq!(quantize(1.0), 32767);
        assert_eq!(quantize(-1.0), -32767);
        assert_eq!(quantize(2.0), 32767);
        assert_eq!(quantize(-2.0), -32768);
    }

    #[test]
    fn test_filter_state_is_per_stream() {
        // a fresh producer must not remember a previous stream's tail
        let samples = vec![0.8f32; 100];

        let mut first = FrameProducer::new();
        first.push_chunk(&samples);

        let mut second = FrameProducer::new();
        let fresh = second.push_chunk(&samples);
        let repeat = FrameProducer::new().push_chunk(&samples);
        assert_eq!(fresh, repeat);
    }
}
