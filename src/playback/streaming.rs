// Streaming fallback player
// Drives a seekable media element and detects the segment end by checking the
// element's position on every time update. End latency is bounded by the
// element's time-update interval; this is the known precision gap against
// the precise engine.

use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::engine::{ActivePlayback, ElementId, EngineKind, SessionSignal, SessionSink, StartOutcome};
use super::error::PlaybackError;
use super::segment::{ResourceId, Segment};

/// How much of the resource the element can serve
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ReadyState {
    HaveNothing,
    HaveMetadata,
    HaveEnoughData,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MediaEvent {
    /// The element can seek and play without stalling
    CanPlayThrough,
    /// Periodic signal while playing; read the element for the position
    TimeUpdate,
    /// The end of the resource was reached
    Ended,
    Error(String),
}

pub type MediaEventSink = Arc<dyn Fn(MediaEvent) + Send + Sync>;

/// A streaming media element bound to one resource
pub trait MediaElement: Send {
    fn ready_state(&self) -> ReadyState;

    /// Begin fetching; `CanPlayThrough` fires once the element is ready
    fn load(&mut self);

    fn seek(&mut self, position: f64) -> Result<(), PlaybackError>;

    fn play(&mut self) -> Result<(), PlaybackError>;

    fn pause(&mut self);

    fn current_time(&self) -> f64;

    fn is_paused(&self) -> bool;

    /// True once playback ran into the end of the resource
    fn has_ended(&self) -> bool;

    fn duration(&self) -> Option<f64>;
}

pub type SharedElement = Arc<Mutex<Box<dyn MediaElement>>>;

/// Builds the element for a newly selected resource
pub type ElementFactory = Box<dyn Fn(&ResourceId, MediaEventSink) -> Box<dyn MediaElement> + Send>;

/// Owns the streaming element of the selected resource
#[derive(Default)]
pub struct StreamingPlayer {
    element: Option<(ElementId, SharedElement)>,
    next_id: ElementId,
}

impl StreamingPlayer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the element. `build` receives the id the element's events
    /// must be tagged with.
    pub fn attach<F>(&mut self, build: F) -> ElementId
    where
        F: FnOnce(ElementId) -> Box<dyn MediaElement>,
    {
        self.detach();
        self.next_id += 1;
        let id = self.next_id;
        self.element = Some((id, Arc::new(Mutex::new(build(id)))));
        debug!("Attached streaming element {}", id);
        id
    }

    pub fn detach(&mut self) {
        if let Some((id, element)) = self.element.take() {
            element.lock().pause();
            debug!("Detached streaming element {}", id);
        }
    }

    pub fn element_id(&self) -> Option<ElementId> {
        self.element.as_ref().map(|(id, _)| *id)
    }

    /// Position and paused flag as the element reports them right now
    pub fn sample_position(&self) -> Option<(f64, bool)> {
        self.element.as_ref().map(|(_, element)| {
            let element = element.lock();
            (element.current_time(), element.is_paused())
        })
    }

    pub fn has_ended(&self) -> bool {
        self.element
            .as_ref()
            .map(|(_, element)| element.lock().has_ended())
            .unwrap_or(false)
    }

    /// Prepare playback of `segment`. Nothing happens until `start`.
    pub fn play(&self, segment: &Segment, sink: SessionSink) -> Result<FallbackHandle, PlaybackError> {
        let (_, element) = self.element.as_ref().ok_or(PlaybackError::NoResource)?;
        Ok(FallbackHandle {
            element: Arc::clone(element),
            start: segment.start_time(),
            end: segment.end_time(),
            sink,
            awaiting_ready: false,
            watching: false,
        })
    }
}

pub struct FallbackHandle {
    element: SharedElement,
    start: f64,
    end: f64,
    sink: SessionSink,
    /// One-shot ready listener is registered
    awaiting_ready: bool,
    /// Time-update end check is registered
    watching: bool,
}

impl FallbackHandle {
    fn seek_and_play(&mut self, element: &mut dyn MediaElement) -> Result<(), PlaybackError> {
        if let Some(duration) = element.duration() {
            self.end = self.end.min(duration);
        }
        element.seek(self.start)?;
        element.play()?;
        self.watching = true;
        info!(
            "Session {}: streaming playback {:.3}s..{:.3}s",
            self.sink.session(),
            self.start,
            self.end
        );
        Ok(())
    }

    fn finish(&mut self, element: &mut dyn MediaElement) {
        self.watching = false;
        element.pause();
        self.sink.send(SessionSignal::Completed);
    }
}

impl ActivePlayback for FallbackHandle {
    fn kind(&self) -> EngineKind {
        EngineKind::Fallback
    }

    fn start(&mut self) -> Result<StartOutcome, PlaybackError> {
        let element = Arc::clone(&self.element);
        let mut element = element.lock();
        element.pause();

        if element.ready_state() >= ReadyState::HaveEnoughData {
            self.seek_and_play(element.as_mut())?;
            Ok(StartOutcome::Started)
        } else {
            // Seeking before metadata is available is undefined; wait for
            // the element to become ready first
            debug!("Session {}: waiting for streaming element", self.sink.session());
            self.awaiting_ready = true;
            element.load();
            Ok(StartOutcome::Pending)
        }
    }

    fn stop(&mut self) {
        if !self.awaiting_ready && !self.watching {
            return;
        }
        self.awaiting_ready = false;
        self.watching = false;
        self.element.lock().pause();
        debug!("Session {}: streaming playback stopped", self.sink.session());
    }

    fn on_media_event(&mut self, event: &MediaEvent) {
        let element = Arc::clone(&self.element);
        let mut element = element.lock();

        match event {
            MediaEvent::CanPlayThrough if self.awaiting_ready => {
                self.awaiting_ready = false;
                match self.seek_and_play(element.as_mut()) {
                    Ok(()) => self.sink.send(SessionSignal::Started),
                    Err(e) => {
                        warn!("Session {}: streaming start failed: {}", self.sink.session(), e);
                        self.watching = false;
                        self.sink.send(SessionSignal::Failed(e));
                    }
                }
            }
            MediaEvent::TimeUpdate if self.watching => {
                // The element is the source of truth; updates queued before
                // our seek still carry the old position in flight
                if element.current_time() >= self.end {
                    debug!(
                        "Session {}: reached {:.3}s (end {:.3}s)",
                        self.sink.session(),
                        element.current_time(),
                        self.end
                    );
                    self.finish(element.as_mut());
                }
            }
            MediaEvent::Ended if self.watching && element.has_ended() => {
                self.finish(element.as_mut());
            }
            MediaEvent::Error(message) if self.awaiting_ready || self.watching => {
                self.awaiting_ready = false;
                self.watching = false;
                element.pause();
                self.sink.send(SessionSignal::Failed(PlaybackError::Media(message.clone())));
            }
            _ => {}
        }
    }
}

impl Drop for FallbackHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
