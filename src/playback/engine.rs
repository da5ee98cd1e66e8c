// Playback engine capability shared by the precise and streaming engines
// Engines report back to the controller through one event channel; every
// session signal carries the id of the session that produced it.

use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;

use super::error::PlaybackError;
use super::streaming::MediaEvent;
use crate::audio::DecodedBuffer;

/// Monotonic id of a playback session
pub type SessionId = u64;

/// Identifies an attached streaming element
pub type ElementId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    /// Sample-accurate playback out of the decoded buffer
    Precise,
    /// Streaming element with polled end detection
    Fallback,
}

#[derive(Debug, Clone)]
pub enum SessionSignal {
    /// An asynchronous start has resolved
    Started,
    /// Playback position in seconds while the engine is producing sound
    Progress(f64),
    /// The requested range has finished playing
    Completed,
    Failed(PlaybackError),
}

#[derive(Debug, Clone)]
pub enum ControllerEvent {
    Session {
        session: SessionId,
        signal: SessionSignal,
    },
    Media {
        element: ElementId,
        event: MediaEvent,
    },
    Loaded {
        generation: u64,
        result: Result<Arc<DecodedBuffer>, PlaybackError>,
    },
}

pub type EventSender = mpsc::UnboundedSender<ControllerEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<ControllerEvent>;

/// Sends signals for one session
#[derive(Clone)]
pub struct SessionSink {
    session: SessionId,
    events: EventSender,
}

impl SessionSink {
    pub fn new(session: SessionId, events: EventSender) -> Self {
        Self { session, events }
    }

    pub fn session(&self) -> SessionId {
        self.session
    }

    pub fn send(&self, signal: SessionSignal) {
        // The controller going away just means nobody is listening anymore
        let _ = self.events.send(ControllerEvent::Session {
            session: self.session,
            signal,
        });
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// Producing sound now
    Started,
    /// Waiting on the engine; `SessionSignal::Started` follows
    Pending,
}

/// A prepared playback attempt.
///
/// The controller registers the handle before calling `start`, so tearing a
/// session down is always a single `stop` call whichever engine is behind it.
pub trait ActivePlayback: Send {
    fn kind(&self) -> EngineKind;

    fn start(&mut self) -> Result<StartOutcome, PlaybackError>;

    /// Release the engine: stop sound and drop listeners. Idempotent, and
    /// never emits a completion.
    fn stop(&mut self);

    /// Streaming element events, routed only to the current session
    fn on_media_event(&mut self, _event: &MediaEvent) {}
}
