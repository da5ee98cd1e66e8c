// Playback session controller
// Owns the selected resource, the two engines and at most one playback
// session. Every request tears the previous session down before the next one
// may produce sound, and signals from anything but the current session are
// dropped.

use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::engine::{
    ActivePlayback, ControllerEvent, ElementId, EngineKind, EventSender, SessionId, SessionSignal, SessionSink,
    StartOutcome,
};
use super::error::PlaybackError;
use super::loader::{DecodeStatus, ResourceLoader, ResourceSource};
use super::position::{PositionState, PositionTracker};
use super::precise::PreciseEngine;
use super::segment::{ResourceId, Segment};
use super::streaming::{ElementFactory, MediaEvent, MediaEventSink, StreamingPlayer};
use crate::audio::SharedOutput;
use crate::settings::PlaybackSettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PlayerState {
    Idle,
    Loading,
    Playing,
    Ended,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Loading,
    Playing,
    Stopped,
    Ended,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceSnapshot {
    pub id: ResourceId,
    pub status: DecodeStatus,
}

/// Observable controller state
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerSnapshot {
    pub state: PlayerState,
    pub is_loading: bool,
    pub is_playing: bool,
    pub current_segment: Option<Segment>,
    pub active_owner_id: Option<i64>,
    pub engine: Option<EngineKind>,
    pub session_id: Option<SessionId>,
    pub session_status: Option<SessionStatus>,
    pub resource: Option<ResourceSnapshot>,
}

/// One playback attempt. The engine handle is registered here before it
/// starts, and released when the session is stopped or dropped.
struct PlaybackSession {
    id: SessionId,
    segment: Segment,
    status: SessionStatus,
    engine: Option<EngineKind>,
    handle: Option<Box<dyn ActivePlayback>>,
}

impl PlaybackSession {
    fn new(id: SessionId, segment: Segment) -> Self {
        Self {
            id,
            segment,
            status: SessionStatus::Loading,
            engine: None,
            handle: None,
        }
    }

    fn install(&mut self, handle: Box<dyn ActivePlayback>) {
        self.release();
        self.engine = Some(handle.kind());
        self.handle = Some(handle);
    }

    fn start(&mut self) -> Result<StartOutcome, PlaybackError> {
        match self.handle.as_mut() {
            Some(handle) => handle.start(),
            None => Err(PlaybackError::EngineStart("no engine installed".into())),
        }
    }

    /// Stop the engine and drop its listeners
    fn release(&mut self) {
        if let Some(mut handle) = self.handle.take() {
            handle.stop();
        }
    }

    fn finish(&mut self, status: SessionStatus) {
        self.release();
        self.status = status;
    }

    fn is_active(&self) -> bool {
        matches!(self.status, SessionStatus::Loading | SessionStatus::Playing)
    }
}

impl Drop for PlaybackSession {
    fn drop(&mut self) {
        self.release();
    }
}

pub struct SessionController {
    settings: PlaybackSettings,
    events: EventSender,
    loader: ResourceLoader,
    precise: PreciseEngine,
    streaming: StreamingPlayer,
    element_factory: ElementFactory,
    resource: Option<ResourceId>,
    session: Option<PlaybackSession>,
    last_session: SessionId,
    state: PlayerState,
    is_loading: bool,
    current_segment: Option<Segment>,
    active_owner: Option<i64>,
    position: PositionTracker,
}

impl SessionController {
    pub fn new(
        settings: PlaybackSettings,
        source: Arc<dyn ResourceSource>,
        output: Arc<SharedOutput>,
        element_factory: ElementFactory,
        events: EventSender,
    ) -> Self {
        let precise = PreciseEngine::new(output, settings.time_update_interval());
        Self {
            loader: ResourceLoader::new(source, events.clone()),
            precise,
            streaming: StreamingPlayer::new(),
            element_factory,
            settings,
            events,
            resource: None,
            session: None,
            last_session: 0,
            state: PlayerState::Idle,
            is_loading: false,
            current_segment: None,
            active_owner: None,
            position: PositionTracker::new(),
        }
    }

    /// Switch to another resource. Stops everything first, then starts the
    /// background decode and attaches a fresh streaming element.
    pub fn select_resource(&mut self, id: ResourceId) {
        self.stop_all();
        info!("Selected resource {}", id);

        if self.settings.precise_enabled {
            self.loader.load(id.clone());
        } else {
            self.loader.unload();
        }

        let events = self.events.clone();
        let factory = &self.element_factory;
        self.streaming.attach(|element| {
            let sink: MediaEventSink = Arc::new(move |event| {
                let _ = events.send(ControllerEvent::Media { element, event });
            });
            factory(&id, sink)
        });

        self.resource = Some(id);
        self.position.reset();
    }

    /// Play `segment`, replacing whatever is playing
    pub fn request_segment(&mut self, segment: Segment) -> Result<SessionId, PlaybackError> {
        self.teardown();

        self.last_session += 1;
        let id = self.last_session;
        self.state = PlayerState::Loading;
        self.is_loading = true;
        if let Some(owner) = segment.owner_id() {
            self.active_owner = Some(owner);
        }
        info!("Session {}: requested {}", id, segment);

        self.session = Some(PlaybackSession::new(id, segment));
        let sink = SessionSink::new(id, self.events.clone());

        match self.start_engine(&segment, sink) {
            Ok(StartOutcome::Started) => {
                self.mark_playing();
                Ok(id)
            }
            Ok(StartOutcome::Pending) => Ok(id),
            Err(e) => {
                self.fail_session(&e);
                Err(e)
            }
        }
    }

    /// Stop any playback; used when the resource selection changes.
    /// Safe to call in any state, any number of times.
    pub fn stop_all(&mut self) {
        if let Some(session) = self.session.as_mut() {
            if session.is_active() {
                info!("Session {}: stopped", session.id);
                session.finish(SessionStatus::Stopped);
            }
        }
        self.state = PlayerState::Idle;
        self.is_loading = false;
        self.current_segment = None;
        self.active_owner = None;
        self.position.on_resource_end();
    }

    pub fn handle_event(&mut self, event: ControllerEvent) {
        match event {
            ControllerEvent::Session { session, signal } => self.on_session_signal(session, signal),
            ControllerEvent::Media { element, event } => {
                if self.streaming.element_id() != Some(element) {
                    debug!("Ignoring event from detached element {}", element);
                    return;
                }
                self.on_media_event(event);
            }
            ControllerEvent::Loaded { generation, result } => {
                self.loader.complete(generation, result);
            }
        }
    }

    pub fn snapshot(&self) -> PlayerSnapshot {
        let session = self.session.as_ref();
        PlayerSnapshot {
            state: self.state,
            is_loading: self.is_loading,
            is_playing: self.state == PlayerState::Playing,
            current_segment: self.current_segment,
            active_owner_id: self.active_owner,
            engine: session.and_then(|s| s.engine),
            session_id: session.map(|s| s.id),
            session_status: session.map(|s| s.status),
            resource: self.resource.as_ref().map(|id| ResourceSnapshot {
                id: id.clone(),
                status: self
                    .loader
                    .resource()
                    .map(|r| r.status)
                    .unwrap_or(DecodeStatus::Unloaded),
            }),
        }
    }

    pub fn position(&self) -> PositionState {
        self.position.state()
    }

    pub fn resource_generation(&self) -> u64 {
        self.loader.generation()
    }

    pub fn element_id(&self) -> Option<ElementId> {
        self.streaming.element_id()
    }

    pub fn set_volume(&self, volume: f32) -> Result<(), PlaybackError> {
        self.precise.output().get()?.set_volume(volume);
        Ok(())
    }

    /// Release everything before the controller goes away
    pub fn shutdown(&mut self) {
        self.stop_all();
        self.session = None;
        self.streaming.detach();
        self.loader.unload();
        self.resource = None;
    }

    fn teardown(&mut self) {
        if let Some(mut session) = self.session.take() {
            if session.is_active() {
                debug!("Session {}: superseded", session.id);
                session.finish(SessionStatus::Stopped);
            }
        }
    }

    fn start_engine(&mut self, segment: &Segment, sink: SessionSink) -> Result<StartOutcome, PlaybackError> {
        if self.settings.precise_enabled {
            if let Some(buffer) = self.loader.ready_buffer() {
                let handle = self.precise.prepare(buffer, segment, sink.clone());
                match self.start_installed(Box::new(handle)) {
                    Ok(outcome) => return Ok(outcome),
                    Err(e) => warn!("Session {}: precise engine unavailable, falling back: {}", sink.session(), e),
                }
            }
        }

        let handle = self.streaming.play(segment, sink)?;
        self.start_installed(Box::new(handle))
    }

    /// Register `handle` with the current session, then start it. A
    /// suspended output is resumed and the start retried once.
    fn start_installed(&mut self, handle: Box<dyn ActivePlayback>) -> Result<StartOutcome, PlaybackError> {
        let retry = self.settings.resume_retry;
        let precise = &self.precise;
        let session = self.session.as_mut().ok_or(PlaybackError::NoResource)?;
        session.install(handle);

        let result = match session.start() {
            Err(PlaybackError::EngineStart(reason)) if retry && session.engine == Some(EngineKind::Precise) => {
                info!("Session {}: resuming output after failed start ({})", session.id, reason);
                precise.resume_output().and_then(|_| session.start())
            }
            other => other,
        };

        if result.is_err() {
            session.release();
        }
        result
    }

    fn mark_playing(&mut self) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        session.status = SessionStatus::Playing;
        self.state = PlayerState::Playing;
        self.is_loading = false;
        self.current_segment = Some(session.segment);
        info!("Session {}: playing via {:?}", session.id, session.engine);
    }

    fn fail_session(&mut self, error: &PlaybackError) {
        if let Some(session) = self.session.as_mut() {
            warn!("Session {}: failed to start: {}", session.id, error);
            session.finish(SessionStatus::Failed);
        }
        self.state = PlayerState::Idle;
        self.is_loading = false;
        self.current_segment = None;
    }

    fn on_session_signal(&mut self, id: SessionId, signal: SessionSignal) {
        let Some(session) = self.session.as_mut().filter(|s| s.id == id) else {
            debug!("Dropping {:?} from stale session {}", signal, id);
            return;
        };

        match signal {
            SessionSignal::Started => {
                if session.status == SessionStatus::Loading {
                    self.mark_playing();
                }
            }
            SessionSignal::Progress(time) => {
                if session.status == SessionStatus::Playing {
                    self.position.on_time_update(time, false);
                }
            }
            SessionSignal::Completed => {
                if !session.is_active() {
                    return;
                }
                info!("Session {}: completed", session.id);
                session.finish(SessionStatus::Ended);
                self.state = PlayerState::Ended;
                self.is_loading = false;
                self.position.on_halt();
            }
            SessionSignal::Failed(e) => {
                if session.is_active() {
                    self.fail_session(&e);
                }
            }
        }
    }

    fn on_media_event(&mut self, event: MediaEvent) {
        // Sample the element before the session reacts; a completing session
        // pauses it
        match event {
            MediaEvent::TimeUpdate => {
                if let Some((time, paused)) = self.streaming.sample_position() {
                    self.position.on_time_update(time, paused);
                }
            }
            MediaEvent::Ended => {
                if self.streaming.has_ended() {
                    self.position.on_resource_end();
                }
            }
            MediaEvent::CanPlayThrough | MediaEvent::Error(_) => {}
        }

        let fallback_session = self
            .session
            .as_mut()
            .filter(|s| s.is_active() && s.engine == Some(EngineKind::Fallback));
        if let Some(handle) = fallback_session.and_then(|s| s.handle.as_mut()) {
            handle.on_media_event(&event);
        }
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        self.shutdown();
    }
}
