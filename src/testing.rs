// Test fixtures shared by the unit tests
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::f32::consts::PI;
use std::sync::Arc;

use crate::audio::DecodedBuffer;
use crate::playback::{
    ElementFactory, MediaElement, MediaEventSink, PlaybackError, ReadyState, ResourceId,
    ResourceSource,
};

/// 16-bit PCM WAV holding a 440 Hz tone
pub fn wav_bytes(sample_rate: u32, channels: u16, seconds: f64) -> Bytes {
    let frames = (seconds * sample_rate as f64).round() as u32;
    let block_align = channels as u32 * 2;
    let data_len = frames * block_align;

    let mut out = Vec::with_capacity(44 + data_len as usize);
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&(36 + data_len).to_le_bytes());
    out.extend_from_slice(b"WAVE");
    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&16u32.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes());
    out.extend_from_slice(&channels.to_le_bytes());
    out.extend_from_slice(&sample_rate.to_le_bytes());
    out.extend_from_slice(&(sample_rate * block_align).to_le_bytes());
    out.extend_from_slice(&(block_align as u16).to_le_bytes());
    out.extend_from_slice(&16u16.to_le_bytes());
    out.extend_from_slice(b"data");
    out.extend_from_slice(&data_len.to_le_bytes());

    for i in 0..frames {
        let t = i as f32 / sample_rate as f32;
        let sample = ((2.0 * PI * 440.0 * t).sin() * 8000.0) as i16;
        for _ in 0..channels {
            out.extend_from_slice(&sample.to_le_bytes());
        }
    }
    Bytes::from(out)
}

/// Mono ramp buffer; each sample encodes its own frame index
pub fn tone_buffer(seconds: f64, sample_rate: u32) -> Arc<DecodedBuffer> {
    let frames = (seconds * sample_rate as f64).round() as usize;
    let samples = (0..frames).map(|i| (i % 1000) as f32 / 1000.0).collect();
    Arc::new(DecodedBuffer::new(samples, sample_rate, 1))
}

/// Observable state of a [`FakeElement`]
#[derive(Debug)]
pub struct ElementProbe {
    pub ready: ReadyState,
    pub position: f64,
    pub paused: bool,
    pub ended: bool,
    pub duration: Option<f64>,
    pub loads: usize,
    pub seeks: Vec<f64>,
    pub plays: usize,
    pub pauses: usize,
    pub reject_play: bool,
}

impl ElementProbe {
    pub fn ready(duration: f64) -> Arc<Mutex<Self>> {
        Self::with_state(ReadyState::HaveEnoughData, duration)
    }

    pub fn unready(duration: f64) -> Arc<Mutex<Self>> {
        Self::with_state(ReadyState::HaveNothing, duration)
    }

    fn with_state(ready: ReadyState, duration: f64) -> Arc<Mutex<Self>> {
        Arc::new(Mutex::new(Self {
            ready,
            position: 0.0,
            paused: true,
            ended: false,
            duration: Some(duration),
            loads: 0,
            seeks: Vec::new(),
            plays: 0,
            pauses: 0,
            reject_play: false,
        }))
    }
}

/// Scripted media element; tests move its clock by editing the probe
pub struct FakeElement {
    probe: Arc<Mutex<ElementProbe>>,
}

impl FakeElement {
    pub fn new(probe: Arc<Mutex<ElementProbe>>) -> Self {
        Self { probe }
    }
}

impl MediaElement for FakeElement {
    fn ready_state(&self) -> ReadyState {
        self.probe.lock().ready
    }

    fn load(&mut self) {
        self.probe.lock().loads += 1;
    }

    fn seek(&mut self, position: f64) -> Result<(), PlaybackError> {
        let mut probe = self.probe.lock();
        if probe.ready < ReadyState::HaveMetadata {
            return Err(PlaybackError::Seek("no metadata".into()));
        }
        probe.seeks.push(position);
        probe.position = position;
        probe.ended = false;
        Ok(())
    }

    fn play(&mut self) -> Result<(), PlaybackError> {
        let mut probe = self.probe.lock();
        if probe.reject_play {
            return Err(PlaybackError::PlayRejected("autoplay blocked".into()));
        }
        probe.plays += 1;
        probe.paused = false;
        Ok(())
    }

    fn pause(&mut self) {
        let mut probe = self.probe.lock();
        probe.pauses += 1;
        probe.paused = true;
    }

    fn current_time(&self) -> f64 {
        self.probe.lock().position
    }

    fn is_paused(&self) -> bool {
        self.probe.lock().paused
    }

    fn has_ended(&self) -> bool {
        self.probe.lock().ended
    }

    fn duration(&self) -> Option<f64> {
        self.probe.lock().duration
    }
}

/// Every element the factory builds shares one probe
pub fn fake_factory(probe: Arc<Mutex<ElementProbe>>) -> ElementFactory {
    Box::new(move |_: &ResourceId, _: MediaEventSink| -> Box<dyn MediaElement> {
        Box::new(FakeElement::new(Arc::clone(&probe)))
    })
}

/// A source whose fetches never finish
pub struct NeverSource;

#[async_trait]
impl ResourceSource for NeverSource {
    async fn fetch(&self, _id: &ResourceId) -> Result<Bytes, PlaybackError> {
        std::future::pending().await
    }
}
