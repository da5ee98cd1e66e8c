// Audio output using cpal
// One process-wide output context renders either the precise voice (a slice of
// a decoded buffer, counted sample by sample) or the streaming ring fed by the
// fallback decoder.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Stream, StreamConfig};
use parking_lot::Mutex;
use ringbuf::{
    traits::{Consumer, Observer, Producer, Split},
    HeapRb,
};
use std::ops::Range;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::JoinHandle;
use std::time::Duration;
use thiserror::Error;
use tokio::runtime::{Handle, RuntimeFlavor};
use tracing::{debug, error, info, warn};

use super::buffer::DecodedBuffer;
use crate::settings::OutputSettings;

const HEADLESS_SAMPLE_RATE: u32 = 48000;
const HEADLESS_CHANNELS: u16 = 2;

type RingProducer = ringbuf::HeapProd<f32>;
type RingConsumer = ringbuf::HeapCons<f32>;

#[derive(Debug, Clone, Error)]
pub enum OutputError {
    #[error("No output device available")]
    NoDevice,
    #[error("Failed to get default output config: {0}")]
    Config(String),
    #[error("Failed to build output stream: {0}")]
    Build(String),
    #[error("Unsupported sample format: {0}")]
    UnsupportedFormat(String),
    #[error("Audio output is suspended")]
    Suspended,
    #[error("Failed to resume audio output: {0}")]
    Resume(String),
    #[error("Audio output thread has shut down")]
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputState {
    Running,
    Suspended,
}

/// Identifies one voice started on the context
pub type VoiceId = u64;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum VoiceEvent {
    /// Source position in seconds, emitted once per tick while rendering
    Progress(f64),
    /// The last frame of the range has been rendered
    Completed,
}

pub type VoiceListener = Box<dyn FnMut(VoiceEvent) + Send>;

/// A frame range of a decoded buffer being rendered to the output.
///
/// The cursor advances in source frames, so completion is tied to the
/// buffer's sample clock regardless of the device rate.
pub struct Voice {
    id: VoiceId,
    buffer: Arc<DecodedBuffer>,
    cursor: f64,
    end_frame: u64,
    /// Source frames consumed per output frame
    step: f64,
    tick_frames: f64,
    next_tick: f64,
    listener: VoiceListener,
}

impl Voice {
    pub fn new(
        buffer: Arc<DecodedBuffer>,
        frames: Range<u64>,
        output_rate: u32,
        tick: Duration,
        listener: VoiceListener,
    ) -> Self {
        let step = buffer.sample_rate() as f64 / output_rate.max(1) as f64;
        let tick_frames = (tick.as_secs_f64() * buffer.sample_rate() as f64).max(1.0);
        let cursor = frames.start as f64;

        Self {
            id: 0,
            buffer,
            cursor,
            end_frame: frames.end.max(frames.start),
            step,
            tick_frames,
            next_tick: cursor,
            listener,
        }
    }

    pub fn id(&self) -> VoiceId {
        self.id
    }

    /// Current source position in seconds
    pub fn position(&self) -> f64 {
        self.cursor / self.buffer.sample_rate() as f64
    }

    /// Render one output frame. Returns false once the range is exhausted.
    fn render_frame(&mut self, out: &mut [f32]) -> bool {
        let end = self.end_frame as f64;
        if self.cursor >= end {
            return false;
        }

        if self.cursor >= self.next_tick {
            let position = self.position();
            (self.listener)(VoiceEvent::Progress(position));
            self.next_tick += self.tick_frames;
        }

        let index = self.cursor.floor() as usize;
        let frac = (self.cursor - index as f64) as f32;
        let has_next = ((index + 1) as u64) < self.end_frame;
        for (ch, sample) in out.iter_mut().enumerate() {
            let a = self.buffer.sample(index, ch);
            let b = if has_next { self.buffer.sample(index + 1, ch) } else { a };
            *sample = a + (b - a) * frac;
        }

        self.cursor += self.step;
        self.cursor < end
    }

    fn complete(mut self) {
        (self.listener)(VoiceEvent::Completed);
    }
}

/// State touched by the audio callback
struct RenderCore {
    voice: Option<Voice>,
    stream: RingConsumer,
    /// Frames taken from the stream ring since it was last cleared
    stream_frames: u64,
    channels: usize,
    volume: f32,
}

impl RenderCore {
    fn render(&mut self, data: &mut [f32]) {
        let channels = self.channels;
        for frame in data.chunks_mut(channels) {
            frame.fill(0.0);

            if let Some(voice) = self.voice.as_mut() {
                if !voice.render_frame(frame) {
                    if let Some(done) = self.voice.take() {
                        done.complete();
                    }
                }
            } else if self.stream.occupied_len() >= channels {
                for sample in frame.iter_mut() {
                    *sample = self.stream.try_pop().unwrap_or(0.0);
                }
                self.stream_frames += 1;
            }

            for sample in frame.iter_mut() {
                *sample *= self.volume;
            }
        }
    }

    fn clear_stream(&mut self) {
        // Drain all samples from the buffer
        while self.stream.try_pop().is_some() {}
        self.stream_frames = 0;
    }
}

enum StreamCommand {
    Play(mpsc::Sender<Result<(), String>>),
    Pause,
    Shutdown,
}

enum Backend {
    /// cpal stream owned by a dedicated thread (streams are not Send)
    Device {
        commands: mpsc::Sender<StreamCommand>,
        thread: Option<JoinHandle<()>>,
    },
    /// No device; frames are rendered on demand with `pull`
    Headless,
}

pub struct OutputContext {
    core: Arc<Mutex<RenderCore>>,
    producer: Mutex<RingProducer>,
    state: Mutex<OutputState>,
    next_voice: AtomicU64,
    sample_rate: u32,
    channels: u16,
    backend: Backend,
}

impl OutputContext {
    /// Open the default output device.
    pub fn open_default(settings: &OutputSettings) -> Result<Self, OutputError> {
        let (init_tx, init_rx) = mpsc::channel();
        let (command_tx, command_rx) = mpsc::channel();
        let buffer_ms = settings.stream_buffer_ms;
        let volume = settings.volume;

        let thread = std::thread::Builder::new()
            .name("audio-output".into())
            .spawn(move || run_device_thread(buffer_ms, volume, init_tx, command_rx))
            .map_err(|e| OutputError::Build(e.to_string()))?;

        let (core, producer, sample_rate, channels) = init_rx
            .recv()
            .map_err(|_| OutputError::Closed)??;

        info!(
            "Audio output opened: {} Hz, {} channels",
            sample_rate, channels
        );

        Ok(Self {
            core,
            producer: Mutex::new(producer),
            state: Mutex::new(OutputState::Running),
            next_voice: AtomicU64::new(1),
            sample_rate,
            channels,
            backend: Backend::Device {
                commands: command_tx,
                thread: Some(thread),
            },
        })
    }

    /// Create a context without a device. Nothing is rendered until `pull`.
    pub fn headless(sample_rate: u32, channels: u16, settings: &OutputSettings) -> Self {
        let (core, producer) = build_core(sample_rate, channels, settings.stream_buffer_ms, settings.volume);
        debug!("Headless audio output: {} Hz, {} channels", sample_rate, channels);

        Self {
            core,
            producer: Mutex::new(producer),
            state: Mutex::new(OutputState::Running),
            next_voice: AtomicU64::new(1),
            sample_rate,
            channels,
            backend: Backend::Headless,
        }
    }

    pub fn is_headless(&self) -> bool {
        matches!(self.backend, Backend::Headless)
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn state(&self) -> OutputState {
        *self.state.lock()
    }

    /// Stop consuming frames; the voice and stream positions freeze.
    pub fn suspend(&self) {
        let mut state = self.state.lock();
        if *state == OutputState::Suspended {
            return;
        }
        if let Backend::Device { commands, .. } = &self.backend {
            let _ = commands.send(StreamCommand::Pause);
        }
        *state = OutputState::Suspended;
        info!("Audio output suspended");
    }

    /// Resume a suspended output. A no-op when already running.
    pub fn resume(&self) -> Result<(), OutputError> {
        let mut state = self.state.lock();
        if *state == OutputState::Running {
            return Ok(());
        }
        if let Backend::Device { commands, .. } = &self.backend {
            let (reply_tx, reply_rx) = mpsc::channel();
            commands
                .send(StreamCommand::Play(reply_tx))
                .map_err(|_| OutputError::Closed)?;
            reply_rx
                .recv_timeout(Duration::from_secs(2))
                .map_err(|_| OutputError::Closed)?
                .map_err(OutputError::Resume)?;
        }
        *state = OutputState::Running;
        info!("Audio output resumed");
        Ok(())
    }

    /// Install a voice. Any voice still installed is dropped without firing
    /// its completion.
    pub fn start_voice(&self, mut voice: Voice) -> Result<VoiceId, OutputError> {
        if self.state() == OutputState::Suspended {
            return Err(OutputError::Suspended);
        }
        let id = self.next_voice.fetch_add(1, Ordering::Relaxed);
        voice.id = id;

        let mut core = self.core.lock();
        if let Some(previous) = core.voice.replace(voice) {
            warn!("Voice {} replaced while still active", previous.id());
        }
        Ok(id)
    }

    /// Remove a voice if it is still installed. Safe to call repeatedly and
    /// after the voice has completed on its own.
    pub fn stop_voice(&self, id: VoiceId) -> bool {
        let mut core = self.core.lock();
        if core.voice.as_ref().map(|v| v.id()) == Some(id) {
            core.voice = None;
            true
        } else {
            false
        }
    }

    pub fn has_voice(&self) -> bool {
        self.core.lock().voice.is_some()
    }

    /// Write samples to the stream ring.
    /// Returns the number of samples actually written.
    pub fn write(&self, samples: &[f32]) -> usize {
        let mut producer = self.producer.lock();
        producer.push_slice(samples)
    }

    /// Write samples, waiting for space until all are written or `cancel`
    /// is raised. Returns false when cancelled.
    pub fn write_blocking(&self, samples: &[f32], cancel: &AtomicBool) -> bool {
        let mut remaining = samples;

        while !remaining.is_empty() {
            if cancel.load(Ordering::Acquire) {
                return false;
            }
            let written = self.write(remaining);
            if written > 0 {
                remaining = &remaining[written..];
            } else {
                // Buffer full, wait a bit
                std::thread::sleep(Duration::from_millis(1));
            }
        }
        true
    }

    /// Get available space in the stream ring
    pub fn available_space(&self) -> usize {
        self.producer.lock().vacant_len()
    }

    /// Samples written to the stream ring but not yet rendered
    pub fn queued_samples(&self) -> usize {
        self.producer.lock().occupied_len()
    }

    /// Drop queued stream audio and restart the played-frame counter
    pub fn clear_stream(&self) {
        self.core.lock().clear_stream();
    }

    /// Frames rendered from the stream ring since the last clear
    pub fn stream_frames_played(&self) -> u64 {
        self.core.lock().stream_frames
    }

    /// Set the output volume (0.0 to 1.0)
    pub fn set_volume(&self, vol: f32) {
        self.core.lock().volume = vol.clamp(0.0, 1.0);
    }

    pub fn volume(&self) -> f32 {
        self.core.lock().volume
    }

    /// Render `frames` frames on a headless context. A suspended context
    /// yields silence without advancing.
    pub fn pull(&self, frames: usize) -> Vec<f32> {
        let mut data = vec![0.0f32; frames * self.channels as usize];
        if self.state() == OutputState::Running {
            self.core.lock().render(&mut data);
        }
        data
    }
}

impl Drop for OutputContext {
    fn drop(&mut self) {
        if let Backend::Device { commands, thread } = &mut self.backend {
            let _ = commands.send(StreamCommand::Shutdown);
            if let Some(thread) = thread.take() {
                let _ = thread.join();
            }
        }
    }
}

fn build_core(
    sample_rate: u32,
    channels: u16,
    buffer_ms: u32,
    volume: f32,
) -> (Arc<Mutex<RenderCore>>, RingProducer) {
    let capacity =
        (sample_rate as usize * channels as usize * buffer_ms.max(20) as usize / 1000).max(channels as usize);
    let rb = HeapRb::<f32>::new(capacity);
    let (producer, consumer) = rb.split();

    let core = RenderCore {
        voice: None,
        stream: consumer,
        stream_frames: 0,
        channels: channels.max(1) as usize,
        volume: volume.clamp(0.0, 1.0),
    };
    (Arc::new(Mutex::new(core)), producer)
}

type DeviceInit = Result<(Arc<Mutex<RenderCore>>, RingProducer, u32, u16), OutputError>;

fn run_device_thread(
    buffer_ms: u32,
    volume: f32,
    init: mpsc::Sender<DeviceInit>,
    commands: mpsc::Receiver<StreamCommand>,
) {
    let opened = open_device_stream(buffer_ms, volume);
    let stream = match opened {
        Ok((stream, core, producer, sample_rate, channels)) => {
            if init.send(Ok((core, producer, sample_rate, channels))).is_err() {
                return;
            }
            stream
        }
        Err(e) => {
            let _ = init.send(Err(e));
            return;
        }
    };

    while let Ok(command) = commands.recv() {
        match command {
            StreamCommand::Play(reply) => {
                let _ = reply.send(stream.play().map_err(|e| e.to_string()));
            }
            StreamCommand::Pause => {
                if let Err(e) = stream.pause() {
                    warn!("Failed to pause output stream: {}", e);
                }
            }
            StreamCommand::Shutdown => break,
        }
    }
    debug!("Audio output thread exiting");
}

fn open_device_stream(
    buffer_ms: u32,
    volume: f32,
) -> Result<(Stream, Arc<Mutex<RenderCore>>, RingProducer, u32, u16), OutputError> {
    let host = cpal::default_host();

    let device = host.default_output_device().ok_or(OutputError::NoDevice)?;

    let config = device
        .default_output_config()
        .map_err(|e| OutputError::Config(e.to_string()))?;

    let sample_rate = config.sample_rate().0;
    let channels = config.channels();
    let (core, producer) = build_core(sample_rate, channels, buffer_ms, volume);

    let stream = match config.sample_format() {
        cpal::SampleFormat::F32 => build_stream::<f32>(&device, &config.into(), core.clone())?,
        cpal::SampleFormat::I16 => build_stream::<i16>(&device, &config.into(), core.clone())?,
        cpal::SampleFormat::U16 => build_stream::<u16>(&device, &config.into(), core.clone())?,
        format => return Err(OutputError::UnsupportedFormat(format!("{:?}", format))),
    };

    stream.play().map_err(|e| OutputError::Build(e.to_string()))?;

    Ok((stream, core, producer, sample_rate, channels))
}

fn build_stream<T: cpal::SizedSample + cpal::FromSample<f32>>(
    device: &cpal::Device,
    config: &StreamConfig,
    core: Arc<Mutex<RenderCore>>,
) -> Result<Stream, OutputError> {
    let mut scratch: Vec<f32> = Vec::new();

    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                scratch.resize(data.len(), 0.0);
                core.lock().render(&mut scratch);
                for (out, value) in data.iter_mut().zip(scratch.iter()) {
                    *out = T::from_sample(*value);
                }
            },
            move |err| {
                error!("Audio output error: {}", err);
            },
            None,
        )
        .map_err(|e| OutputError::Build(e.to_string()))
}

/// Lazily created, process-wide output context.
///
/// The context is opened on first use and then kept for the life of the
/// process; a suspended context is resumed, never replaced.
pub struct SharedOutput {
    context: Mutex<Option<Arc<OutputContext>>>,
    settings: OutputSettings,
}

impl SharedOutput {
    pub fn new(settings: OutputSettings) -> Self {
        Self {
            context: Mutex::new(None),
            settings,
        }
    }

    /// Wrap an already created context
    pub fn with_context(context: Arc<OutputContext>, settings: OutputSettings) -> Self {
        Self {
            context: Mutex::new(Some(context)),
            settings,
        }
    }

    /// Get the context, opening it on first call
    pub fn get(&self) -> Result<Arc<OutputContext>, OutputError> {
        let mut slot = self.context.lock();
        if let Some(context) = slot.as_ref() {
            return Ok(Arc::clone(context));
        }

        let context = if self.settings.headless {
            OutputContext::headless(HEADLESS_SAMPLE_RATE, HEADLESS_CHANNELS, &self.settings)
        } else {
            wait_blocking(|| OutputContext::open_default(&self.settings))?
        };
        let context = Arc::new(context);
        *slot = Some(Arc::clone(&context));
        Ok(context)
    }

    /// The context if it has been opened
    pub fn current(&self) -> Option<Arc<OutputContext>> {
        self.context.lock().clone()
    }

    /// Resume the context if it exists and is suspended
    pub fn resume(&self) -> Result<(), OutputError> {
        let context = self.get()?;
        wait_blocking(|| context.resume())
    }
}

/// Run a wait on the device or on a worker thread. On a multi-thread runtime
/// the worker is handed off first so other tasks keep being polled.
pub fn wait_blocking<T>(f: impl FnOnce() -> T) -> T {
    match Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => tokio::task::block_in_place(f),
        _ => f(),
    }
}
