// Audio decoder using Symphonia
// Decodes an in-memory payload to interleaved f32 samples

use bytes::Bytes;
use std::io::Cursor;
use symphonia::core::audio::{AudioBufferRef, AudioPlanes, Signal};
use symphonia::core::codecs::{Decoder, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, SeekMode, SeekTo};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::sample::Sample;
use symphonia::core::units::Time;
use thiserror::Error;
use tracing::{debug, warn};

use super::buffer::DecodedBuffer;

#[derive(Debug, Clone, Error)]
pub enum DecodeError {
    #[error("Failed to probe audio format: {0}")]
    Probe(String),
    #[error("No audio track found")]
    NoTrack,
    #[error("Failed to create decoder: {0}")]
    Codec(String),
    #[error("Failed to read packet: {0}")]
    Packet(String),
    #[error("Seek failed: {0}")]
    Seek(String),
    #[error("Payload contained no audio frames")]
    Empty,
    #[error("Decode worker failed: {0}")]
    Worker(String),
}

pub struct AudioDecoder {
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    sample_rate: u32,
    channels: usize,
    duration: Option<f64>,
    /// Frames still to discard after an accurate seek
    skip_frames: u64,
}

impl AudioDecoder {
    /// Probe an in-memory payload and prepare for decoding.
    /// `extension` is only a hint; the probe inspects the bytes themselves.
    pub fn from_bytes(bytes: Bytes, extension: Option<&str>) -> Result<Self, DecodeError> {
        let mss = MediaSourceStream::new(Box::new(Cursor::new(bytes)), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = extension {
            hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe()
            .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
            .map_err(|e| DecodeError::Probe(e.to_string()))?;

        let format = probed.format;

        // Find the first audio track
        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or(DecodeError::NoTrack)?;

        let track_id = track.id;
        let sample_rate = track.codec_params.sample_rate.unwrap_or(44100);
        let channels = track.codec_params.channels.map(|c| c.count()).unwrap_or(2);
        let duration = track
            .codec_params
            .n_frames
            .map(|frames| frames as f64 / sample_rate as f64);

        let decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(|e| DecodeError::Codec(e.to_string()))?;

        Ok(Self {
            format,
            decoder,
            track_id,
            sample_rate,
            channels,
            duration,
            skip_frames: 0,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Duration in seconds, when the container declares it
    pub fn duration(&self) -> Option<f64> {
        self.duration
    }

    /// Decode next packet, returns interleaved f32 samples.
    /// Returns None when end of stream is reached.
    pub fn decode_next(&mut self) -> Result<Option<Vec<f32>>, DecodeError> {
        loop {
            let packet = match self.format.next_packet() {
                Ok(p) => p,
                Err(SymphoniaError::IoError(ref e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    return Ok(None);
                }
                Err(SymphoniaError::ResetRequired) => {
                    self.decoder.reset();
                    continue;
                }
                Err(e) => return Err(DecodeError::Packet(e.to_string())),
            };

            if packet.track_id() != self.track_id {
                continue;
            }

            match self.decoder.decode(&packet) {
                Ok(decoded) => {
                    // The codec parameters can be incomplete until the first packet
                    self.sample_rate = decoded.spec().rate;
                    self.channels = decoded.spec().channels.count().max(1);

                    let mut samples = Self::audio_buf_to_f32(&decoded);
                    if self.skip_frames > 0 {
                        let available = (samples.len() / self.channels) as u64;
                        let skip = self.skip_frames.min(available);
                        samples.drain(..skip as usize * self.channels);
                        self.skip_frames -= skip;
                        if samples.is_empty() {
                            continue;
                        }
                    }
                    return Ok(Some(samples));
                }
                Err(SymphoniaError::DecodeError(e)) => {
                    warn!("Decode error (skipping packet): {}", e);
                    continue;
                }
                Err(e) => return Err(DecodeError::Packet(e.to_string())),
            }
        }
    }

    /// Seek to a position in seconds. Decoding resumes exactly at the
    /// requested time; returns the position actually reached.
    pub fn seek(&mut self, position: f64) -> Result<f64, DecodeError> {
        let seconds = position.max(0.0);
        let time = Time::new(seconds.trunc() as u64, seconds.fract());

        let seeked_to = self
            .format
            .seek(
                SeekMode::Accurate,
                SeekTo::Time {
                    time,
                    track_id: Some(self.track_id),
                },
            )
            .map_err(|e| DecodeError::Seek(e.to_string()))?;

        // Reset decoder state after seek
        self.decoder.reset();

        // The reader lands on a packet boundary; trim up to the requested frame
        self.skip_frames = seeked_to.required_ts.saturating_sub(seeked_to.actual_ts);
        debug!(
            "Seeked to {:.3}s (packet at ts {}, skipping {} frames)",
            seconds, seeked_to.actual_ts, self.skip_frames
        );

        Ok(seeked_to.required_ts as f64 / self.sample_rate as f64)
    }

    /// Decode the whole payload into a single in-memory buffer
    pub fn decode_all(mut self) -> Result<DecodedBuffer, DecodeError> {
        let capacity = self
            .duration
            .map(|d| (d * self.sample_rate as f64) as usize * self.channels)
            .unwrap_or(0);
        let mut samples = Vec::with_capacity(capacity);

        while let Some(chunk) = self.decode_next()? {
            samples.extend_from_slice(&chunk);
        }

        if samples.is_empty() {
            return Err(DecodeError::Empty);
        }

        Ok(DecodedBuffer::new(samples, self.sample_rate, self.channels))
    }

    /// Convert any AudioBufferRef to interleaved f32 samples
    fn audio_buf_to_f32(buf: &AudioBufferRef) -> Vec<f32> {
        match buf {
            AudioBufferRef::F32(b) => Self::interleave_convert(b.planes(), b.frames(), |s: f32| s),
            AudioBufferRef::F64(b) => {
                Self::interleave_convert(b.planes(), b.frames(), |s: f64| s as f32)
            }
            AudioBufferRef::S8(b) => {
                let scale = 1.0 / 128.0;
                Self::interleave_convert(b.planes(), b.frames(), |s: i8| s as f32 * scale)
            }
            AudioBufferRef::S16(b) => {
                let scale = 1.0 / 32768.0;
                Self::interleave_convert(b.planes(), b.frames(), |s: i16| s as f32 * scale)
            }
            AudioBufferRef::S24(b) => {
                let scale = 1.0 / 8388608.0;
                Self::interleave_convert(b.planes(), b.frames(), |s| s.inner() as f32 * scale)
            }
            AudioBufferRef::S32(b) => {
                let scale = 1.0 / 2147483648.0;
                Self::interleave_convert(b.planes(), b.frames(), |s: i32| s as f32 * scale)
            }
            AudioBufferRef::U8(b) => {
                Self::interleave_convert(b.planes(), b.frames(), |s: u8| (s as f32 - 128.0) / 128.0)
            }
            AudioBufferRef::U16(b) => Self::interleave_convert(b.planes(), b.frames(), |s: u16| {
                (s as f32 - 32768.0) / 32768.0
            }),
            AudioBufferRef::U24(b) => Self::interleave_convert(b.planes(), b.frames(), |s| {
                (s.inner() as f32 - 8388608.0) / 8388608.0
            }),
            AudioBufferRef::U32(b) => Self::interleave_convert(b.planes(), b.frames(), |s: u32| {
                (s as f64 - 2147483648.0) as f32 / 2147483648.0
            }),
        }
    }

    fn interleave_convert<T: Sample + Copy, F: Fn(T) -> f32>(
        planes: AudioPlanes<T>,
        frames: usize,
        convert: F,
    ) -> Vec<f32> {
        let planes = planes.planes();
        let num_channels = planes.len();
        if num_channels == 0 || frames == 0 {
            return vec![];
        }

        let mut interleaved = Vec::with_capacity(frames * num_channels);
        for frame in 0..frames {
            for plane in planes.iter() {
                interleaved.push(convert(plane[frame]));
            }
        }

        interleaved
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::wav_bytes;

    #[test]
    fn test_decode_all_wav() {
        let decoder = AudioDecoder::from_bytes(wav_bytes(8000, 1, 2.0), Some("wav")).unwrap();
        assert_eq!(decoder.sample_rate(), 8000);
        assert_eq!(decoder.channels(), 1);
        assert!((decoder.duration().unwrap() - 2.0).abs() < 1e-6);

        let buffer = decoder.decode_all().unwrap();
        assert_eq!(buffer.frames(), 16000);
        assert!(buffer.samples().iter().any(|s| s.abs() > 0.01));
    }

    #[test]
    fn test_decode_stereo_keeps_interleaving() {
        let buffer = AudioDecoder::from_bytes(wav_bytes(8000, 2, 0.5), None)
            .unwrap()
            .decode_all()
            .unwrap();
        assert_eq!(buffer.channels(), 2);
        assert_eq!(buffer.frames(), 4000);
    }

    #[test]
    fn test_garbage_payload_fails_probe() {
        let result = AudioDecoder::from_bytes(Bytes::from_static(b"definitely not audio"), Some("mp3"));
        assert!(matches!(result, Err(DecodeError::Probe(_))));
    }

    #[test]
    fn test_seek_lands_on_requested_time() {
        let mut decoder = AudioDecoder::from_bytes(wav_bytes(8000, 1, 3.0), Some("wav")).unwrap();
        let reached = decoder.seek(1.5).unwrap();
        assert!((reached - 1.5).abs() < 0.01);

        let mut remaining = 0usize;
        while let Some(chunk) = decoder.decode_next().unwrap() {
            remaining += chunk.len();
        }
        // 1.5s left at 8kHz mono, within one packet of slack
        assert!((remaining as i64 - 12000).abs() <= 1200, "remaining = {}", remaining);
    }
}
