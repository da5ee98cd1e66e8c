// Streaming media element backed by the decoder
// Fetches the resource, then decodes from the current position on a worker
// thread and feeds the shared output's stream ring. Position is derived from
// frames the output has actually rendered.

use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tracing::{debug, error, info, warn};

use super::error::PlaybackError;
use super::loader::ResourceSource;
use super::segment::ResourceId;
use super::streaming::{ElementFactory, MediaElement, MediaEvent, MediaEventSink, ReadyState};
use crate::audio::resample::{remix, StreamResampler};
use crate::audio::{wait_blocking, AudioDecoder, DecodeError, OutputContext, SharedOutput};

/// State shared between the element and its workers
struct ElementState {
    ready: Mutex<ReadyState>,
    bytes: Mutex<Option<Bytes>>,
    duration: Mutex<Option<f64>>,
    loading: AtomicBool,
    /// Current time in seconds, stored as f64 bits
    position: AtomicU64,
    paused: AtomicBool,
    ended: AtomicBool,
}

impl ElementState {
    fn new() -> Self {
        Self {
            ready: Mutex::new(ReadyState::HaveNothing),
            bytes: Mutex::new(None),
            duration: Mutex::new(None),
            loading: AtomicBool::new(false),
            position: AtomicU64::new(0f64.to_bits()),
            paused: AtomicBool::new(true),
            ended: AtomicBool::new(false),
        }
    }

    fn position(&self) -> f64 {
        f64::from_bits(self.position.load(Ordering::Acquire))
    }

    fn set_position(&self, seconds: f64) {
        self.position.store(seconds.to_bits(), Ordering::Release);
    }
}

struct Worker {
    stop: Arc<AtomicBool>,
    thread: JoinHandle<()>,
}

pub struct DecodingElement {
    resource: ResourceId,
    source: Arc<dyn ResourceSource>,
    output: Arc<SharedOutput>,
    runtime: Handle,
    events: MediaEventSink,
    time_update: Duration,
    state: Arc<ElementState>,
    worker: Option<Worker>,
}

impl DecodingElement {
    pub fn new(
        resource: ResourceId,
        source: Arc<dyn ResourceSource>,
        output: Arc<SharedOutput>,
        runtime: Handle,
        events: MediaEventSink,
        time_update: Duration,
    ) -> Self {
        Self {
            resource,
            source,
            output,
            runtime,
            events,
            time_update,
            state: Arc::new(ElementState::new()),
            worker: None,
        }
    }

    fn is_running(&self) -> bool {
        self.worker
            .as_ref()
            .map(|w| !w.thread.is_finished())
            .unwrap_or(false)
    }

    fn stop_worker(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.stop.store(true, Ordering::Release);
            if wait_blocking(|| worker.thread.join()).is_err() {
                warn!("Streaming worker for {} panicked", self.resource);
            }
        }
    }
}

impl MediaElement for DecodingElement {
    fn ready_state(&self) -> ReadyState {
        *self.state.ready.lock()
    }

    fn load(&mut self) {
        if self.ready_state() >= ReadyState::HaveEnoughData {
            (self.events)(MediaEvent::CanPlayThrough);
            return;
        }
        if self.state.loading.swap(true, Ordering::AcqRel) {
            return;
        }

        let source = Arc::clone(&self.source);
        let state = Arc::clone(&self.state);
        let events = Arc::clone(&self.events);
        let resource = self.resource.clone();

        self.runtime.spawn(async move {
            let result = async {
                let bytes = source.fetch(&resource).await?;
                let hint = resource.extension().map(str::to_owned);
                let probe_bytes = bytes.clone();
                let duration = tokio::task::spawn_blocking(move || {
                    AudioDecoder::from_bytes(probe_bytes, hint.as_deref()).map(|d| d.duration())
                })
                .await
                .map_err(|e| DecodeError::Worker(e.to_string()))??;
                Ok::<_, PlaybackError>((bytes, duration))
            }
            .await;

            state.loading.store(false, Ordering::Release);
            match result {
                Ok((bytes, duration)) => {
                    *state.bytes.lock() = Some(bytes);
                    *state.duration.lock() = duration;
                    *state.ready.lock() = ReadyState::HaveEnoughData;
                    debug!("Streaming element for {} ready", resource);
                    events(MediaEvent::CanPlayThrough);
                }
                Err(e) => {
                    error!("Streaming element for {} failed to load: {}", resource, e);
                    events(MediaEvent::Error(e.to_string()));
                }
            }
        });
    }

    fn seek(&mut self, position: f64) -> Result<(), PlaybackError> {
        if self.ready_state() < ReadyState::HaveMetadata {
            return Err(PlaybackError::Seek("element has no metadata yet".into()));
        }
        let was_playing = self.is_running();
        self.stop_worker();

        let duration = self.duration().unwrap_or(f64::INFINITY);
        self.state.set_position(position.clamp(0.0, duration));
        self.state.ended.store(false, Ordering::Release);

        if was_playing {
            self.play()?;
        }
        Ok(())
    }

    fn play(&mut self) -> Result<(), PlaybackError> {
        if self.is_running() {
            return Ok(());
        }
        // Reap a worker that ran to the end on its own
        self.stop_worker();
        let Some(bytes) = self.state.bytes.lock().clone() else {
            return Err(PlaybackError::PlayRejected("resource not loaded".into()));
        };
        let context = self
            .output
            .get()
            .map_err(|e| PlaybackError::PlayRejected(e.to_string()))?;
        wait_blocking(|| context.resume())
            .map_err(|e| PlaybackError::PlayRejected(e.to_string()))?;

        if self.state.ended.load(Ordering::Acquire) {
            self.state.set_position(0.0);
            self.state.ended.store(false, Ordering::Release);
        }

        let stop = Arc::new(AtomicBool::new(false));
        let job = StreamJob {
            bytes,
            hint: self.resource.extension().map(str::to_owned),
            context,
            state: Arc::clone(&self.state),
            events: Arc::clone(&self.events),
            stop: Arc::clone(&stop),
            time_update: self.time_update,
        };

        self.state.paused.store(false, Ordering::Release);
        let thread = std::thread::Builder::new()
            .name("stream-decode".into())
            .spawn(move || job.run())
            .map_err(|e| PlaybackError::PlayRejected(e.to_string()))?;

        self.worker = Some(Worker { stop, thread });
        Ok(())
    }

    fn pause(&mut self) {
        if self.worker.is_some() {
            self.stop_worker();
            if let Some(context) = self.output.current() {
                context.clear_stream();
            }
        }
        self.state.paused.store(true, Ordering::Release);
    }

    fn current_time(&self) -> f64 {
        self.state.position()
    }

    fn is_paused(&self) -> bool {
        self.state.paused.load(Ordering::Acquire)
    }

    fn has_ended(&self) -> bool {
        self.state.ended.load(Ordering::Acquire)
    }

    fn duration(&self) -> Option<f64> {
        *self.state.duration.lock()
    }
}

impl Drop for DecodingElement {
    fn drop(&mut self) {
        self.pause();
    }
}

/// One run of the streaming worker, from the current position to the end
/// of the resource or until stopped
struct StreamJob {
    bytes: Bytes,
    hint: Option<String>,
    context: Arc<OutputContext>,
    state: Arc<ElementState>,
    events: MediaEventSink,
    stop: Arc<AtomicBool>,
    time_update: Duration,
}

impl StreamJob {
    fn run(self) {
        match self.stream() {
            Ok(true) => {
                self.state.paused.store(true, Ordering::Release);
                self.state.ended.store(true, Ordering::Release);
                info!("Streaming reached end of resource at {:.3}s", self.state.position());
                (self.events)(MediaEvent::TimeUpdate);
                (self.events)(MediaEvent::Ended);
            }
            Ok(false) => {}
            Err(e) => {
                error!("Streaming playback failed: {}", e);
                self.state.paused.store(true, Ordering::Release);
                (self.events)(MediaEvent::Error(e.to_string()));
            }
        }
    }

    /// Returns true when the end of the resource was rendered
    fn stream(&self) -> Result<bool, DecodeError> {
        let mut decoder = AudioDecoder::from_bytes(self.bytes.clone(), self.hint.as_deref())?;
        let start = match self.state.position() {
            p if p > 0.0 => decoder.seek(p)?,
            _ => 0.0,
        };

        self.context.clear_stream();
        let out_rate = self.context.sample_rate();
        let out_channels = self.context.channels() as usize;
        let mut resampler = StreamResampler::new(decoder.sample_rate(), out_rate, out_channels)
            .map_err(DecodeError::Codec)?;
        let mut last_update = Instant::now();

        debug!("Streaming from {:.3}s at {} Hz", start, out_rate);

        while let Some(chunk) = decoder.decode_next()? {
            if self.stop.load(Ordering::Acquire) {
                return Ok(false);
            }

            let samples = resampler.process(&remix(&chunk, decoder.channels(), out_channels));

            if !self.context.write_blocking(&samples, &self.stop) {
                return Ok(false);
            }
            self.tick(start, out_rate, &mut last_update);
        }

        let tail = resampler.flush();
        if !tail.is_empty() && !self.context.write_blocking(&tail, &self.stop) {
            return Ok(false);
        }

        // Let the ring drain so the end event matches what was heard
        while self.context.queued_samples() > 0 {
            if self.stop.load(Ordering::Acquire) {
                return Ok(false);
            }
            std::thread::sleep(Duration::from_millis(5));
            self.tick(start, out_rate, &mut last_update);
        }
        self.update_position(start, out_rate);
        Ok(true)
    }

    fn update_position(&self, start: f64, out_rate: u32) {
        let played = self.context.stream_frames_played() as f64 / out_rate.max(1) as f64;
        self.state.set_position(start + played);
    }

    fn tick(&self, start: f64, out_rate: u32, last_update: &mut Instant) {
        self.update_position(start, out_rate);
        if last_update.elapsed() >= self.time_update {
            *last_update = Instant::now();
            (self.events)(MediaEvent::TimeUpdate);
        }
    }
}

/// Factory producing decoder-backed elements for selected resources
pub fn decoding_element_factory(
    source: Arc<dyn ResourceSource>,
    output: Arc<SharedOutput>,
    runtime: Handle,
    time_update: Duration,
) -> ElementFactory {
    Box::new(move |resource: &ResourceId, events: MediaEventSink| -> Box<dyn MediaElement> {
        Box::new(DecodingElement::new(
            resource.clone(),
            Arc::clone(&source),
            Arc::clone(&output),
            runtime.clone(),
            events,
            time_update,
        ))
    })
}
