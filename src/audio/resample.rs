// Sample rate and channel layout conversion for the streaming path
// The streaming decoder produces source-rate packets; the output runs at the
// device rate.

use rubato::{FftFixedIn, Resampler};
use tracing::warn;

const CHUNK_FRAMES: usize = 1024;

/// Map interleaved samples from one channel count to another.
/// Extra output channels repeat the last source channel; surplus source
/// channels are dropped.
pub fn remix(samples: &[f32], from_channels: usize, to_channels: usize) -> Vec<f32> {
    if from_channels == to_channels || from_channels == 0 || to_channels == 0 {
        return samples.to_vec();
    }

    let frames = samples.len() / from_channels;
    let mut out = Vec::with_capacity(frames * to_channels);
    for frame in samples.chunks_exact(from_channels) {
        for ch in 0..to_channels {
            out.push(frame[ch.min(from_channels - 1)]);
        }
    }
    out
}

/// Chunked resampler that accepts arbitrary packet sizes.
/// Passes audio through untouched when both rates match.
pub struct StreamResampler {
    inner: Option<FftFixedIn<f32>>,
    channels: usize,
    ratio: f64,
    /// Per-channel input waiting for a full chunk
    pending: Vec<Vec<f32>>,
    /// Leading output frames that are filter delay rather than audio
    skip: usize,
    frames_in: u64,
    frames_out: u64,
}

impl StreamResampler {
    pub fn new(from_rate: u32, to_rate: u32, channels: usize) -> Result<Self, String> {
        let channels = channels.max(1);
        let inner = if from_rate == to_rate {
            None
        } else {
            let resampler = FftFixedIn::<f32>::new(
                from_rate as usize,
                to_rate as usize,
                CHUNK_FRAMES,
                2,
                channels,
            )
            .map_err(|e| format!("Failed to create resampler: {}", e))?;
            Some(resampler)
        };

        Ok(Self {
            skip: inner.as_ref().map(|r| r.output_delay()).unwrap_or(0),
            inner,
            channels,
            ratio: to_rate as f64 / from_rate.max(1) as f64,
            pending: vec![Vec::new(); channels],
            frames_in: 0,
            frames_out: 0,
        })
    }

    pub fn is_passthrough(&self) -> bool {
        self.inner.is_none()
    }

    /// Feed interleaved samples, returns whatever output is ready
    pub fn process(&mut self, interleaved: &[f32]) -> Vec<f32> {
        let Self {
            inner,
            channels,
            pending,
            skip,
            frames_in,
            frames_out,
            ..
        } = self;
        let Some(resampler) = inner.as_mut() else {
            return interleaved.to_vec();
        };

        for frame in interleaved.chunks_exact(*channels) {
            for (ch, sample) in frame.iter().enumerate() {
                pending[ch].push(*sample);
            }
            *frames_in += 1;
        }

        let mut out = Vec::new();
        loop {
            let needed = resampler.input_frames_next();
            if pending[0].len() < needed {
                break;
            }

            let chunk: Vec<Vec<f32>> = pending
                .iter_mut()
                .map(|channel| channel.drain(..needed).collect())
                .collect();

            match resampler.process(&chunk, None) {
                Ok(planes) => append_frames(&planes, skip, frames_out, u64::MAX, &mut out),
                Err(e) => {
                    warn!("Resampler dropped a chunk: {}", e);
                }
            }
        }
        out
    }

    /// End of input: convert the partial chunk still pending and drain the
    /// filter delay, so the output length matches the input length
    pub fn flush(&mut self) -> Vec<f32> {
        let Self {
            inner,
            ratio,
            pending,
            skip,
            frames_in,
            frames_out,
            ..
        } = self;
        let Some(resampler) = inner.as_mut() else {
            return Vec::new();
        };

        let expected = (*frames_in as f64 * *ratio).round() as u64;
        let mut tail: Option<Vec<Vec<f32>>> = Some(pending.iter_mut().map(std::mem::take).collect());
        let mut out = Vec::new();

        for _ in 0..FLUSH_ROUNDS {
            if *frames_out >= expected {
                break;
            }
            let result = match tail.take() {
                Some(chunk) => resampler.process_partial(Some(chunk.as_slice()), None),
                None => resampler.process_partial::<Vec<f32>>(None, None),
            };
            match result {
                Ok(planes) => append_frames(&planes, skip, frames_out, expected, &mut out),
                Err(e) => {
                    warn!("Resampler flush failed: {}", e);
                    break;
                }
            }
        }
        out
    }
}

/// Upper bound on zero-input rounds needed to drain the filter delay
const FLUSH_ROUNDS: usize = 8;

/// Interleave resampler output into `out`, dropping the first `skip`
/// frames and stopping once `limit` frames have been produced in total
fn append_frames(planes: &[Vec<f32>], skip: &mut usize, frames_out: &mut u64, limit: u64, out: &mut Vec<f32>) {
    let frames = planes.first().map(|p| p.len()).unwrap_or(0);
    let skipped = (*skip).min(frames);
    *skip -= skipped;

    out.reserve((frames - skipped) * planes.len());
    for frame in skipped..frames {
        if *frames_out >= limit {
            break;
        }
        for plane in planes {
            out.push(plane[frame]);
        }
        *frames_out += 1;
    }
}
