// Fully decoded audio held in memory
// Read-only once built; engine starts share it through an Arc

use std::fmt;
use std::ops::Range;

pub struct DecodedBuffer {
    /// Interleaved f32 samples
    samples: Vec<f32>,
    sample_rate: u32,
    channels: usize,
}

impl DecodedBuffer {
    pub fn new(samples: Vec<f32>, sample_rate: u32, channels: usize) -> Self {
        let channels = channels.max(1);
        let mut samples = samples;
        // Drop a trailing partial frame so every frame has all channels
        samples.truncate(samples.len() - samples.len() % channels);

        Self {
            samples,
            sample_rate: sample_rate.max(1),
            channels,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Number of frames (one sample per channel)
    pub fn frames(&self) -> u64 {
        (self.samples.len() / self.channels) as u64
    }

    /// Physical duration in seconds
    pub fn duration(&self) -> f64 {
        self.frames() as f64 / self.sample_rate as f64
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// Frame index for a time in seconds, clamped to the buffer
    pub fn frame_at(&self, seconds: f64) -> u64 {
        if !seconds.is_finite() || seconds <= 0.0 {
            return if seconds == f64::INFINITY { self.frames() } else { 0 };
        }
        let frame = (seconds * self.sample_rate as f64).round() as u64;
        frame.min(self.frames())
    }

    /// Sample for a frame/channel pair. Channels past the buffer's layout
    /// reuse the last channel, so mono sources fill every output channel.
    pub fn sample(&self, frame: usize, channel: usize) -> f32 {
        let channel = channel.min(self.channels - 1);
        self.samples
            .get(frame * self.channels + channel)
            .copied()
            .unwrap_or(0.0)
    }

    /// Resolve an offset/duration request to the frames that physically exist.
    ///
    /// The playable length is `min(duration, self.duration() - offset)`, so a
    /// range drawn past the end of the audio is clamped rather than rejected.
    pub fn frame_range(&self, offset: f64, duration: f64) -> Range<u64> {
        let start = self.frame_at(offset);
        let end = self.frame_at(offset.max(0.0) + duration.max(0.0)).max(start);
        start..end
    }
}

impl fmt::Debug for DecodedBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecodedBuffer")
            .field("frames", &self.frames())
            .field("sample_rate", &self.sample_rate)
            .field("channels", &self.channels)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn silence(seconds: f64, sample_rate: u32, channels: usize) -> DecodedBuffer {
        let frames = (seconds * sample_rate as f64) as usize;
        DecodedBuffer::new(vec![0.0; frames * channels], sample_rate, channels)
    }

    #[test]
    fn test_duration_from_frames() {
        let buffer = silence(2.5, 1000, 2);
        assert_eq!(buffer.frames(), 2500);
        assert!((buffer.duration() - 2.5).abs() < 1e-9);
    }

    #[test]
    fn test_partial_frame_is_dropped() {
        let buffer = DecodedBuffer::new(vec![0.1, 0.2, 0.3], 8000, 2);
        assert_eq!(buffer.frames(), 1);
        assert_eq!(buffer.samples().len(), 2);
    }

    #[test]
    fn test_frame_range_clamps_past_physical_end() {
        let buffer = silence(5.0, 1000, 1);
        assert_eq!(buffer.frame_range(4.0, 5.0), 4000..5000);
        assert_eq!(buffer.frame_range(1.0, 2.0), 1000..3000);
    }

    #[test]
    fn test_frame_range_starting_after_end_is_empty() {
        let buffer = silence(5.0, 1000, 1);
        let range = buffer.frame_range(7.0, 1.0);
        assert!(range.is_empty());
        assert_eq!(range.start, 5000);
    }

    #[test]
    fn test_mono_sample_fills_extra_channels() {
        let buffer = DecodedBuffer::new(vec![0.5, -0.5], 1000, 1);
        assert_eq!(buffer.sample(0, 0), 0.5);
        assert_eq!(buffer.sample(0, 1), 0.5);
        assert_eq!(buffer.sample(1, 3), -0.5);
        assert_eq!(buffer.sample(9, 0), 0.0);
    }
}
