// Player service
// Runs the session controller as a single task. Commands from the UI layer
// and signals from the engines are handled one at a time in arrival order;
// observable state is published on watch channels after each step.

use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info};

use super::controller::{PlayerSnapshot, SessionController};
use super::engine::{EventReceiver, SessionId};
use super::error::PlaybackError;
use super::loader::ResourceSource;
use super::position::PositionState;
use super::segment::{ResourceId, Segment};
use super::streaming::ElementFactory;
use crate::audio::SharedOutput;
use crate::settings::PlaybackSettings;

pub enum PlayerCommand {
    SelectResource(ResourceId),
    RequestSegment {
        segment: Segment,
        reply: oneshot::Sender<Result<SessionId, PlaybackError>>,
    },
    StopAll,
    SetVolume {
        volume: f32,
        reply: oneshot::Sender<Result<(), PlaybackError>>,
    },
    Shutdown,
}

pub struct PlayerService {
    controller: SessionController,
    commands: mpsc::UnboundedReceiver<PlayerCommand>,
    events: EventReceiver,
    snapshot: watch::Sender<PlayerSnapshot>,
    position: watch::Sender<PositionState>,
}

impl PlayerService {
    /// Spawn the service on the current tokio runtime
    pub fn start(
        settings: PlaybackSettings,
        source: Arc<dyn ResourceSource>,
        output: Arc<SharedOutput>,
        element_factory: ElementFactory,
    ) -> PlayerHandle {
        let (event_tx, events) = mpsc::unbounded_channel();
        let (command_tx, commands) = mpsc::unbounded_channel();

        let controller = SessionController::new(settings, source, output, element_factory, event_tx);
        let (snapshot_tx, snapshot_rx) = watch::channel(controller.snapshot());
        let (position_tx, position_rx) = watch::channel(controller.position());

        let service = Self {
            controller,
            commands,
            events,
            snapshot: snapshot_tx,
            position: position_tx,
        };
        tokio::spawn(service.run());

        PlayerHandle {
            commands: command_tx,
            snapshot: snapshot_rx,
            position: position_rx,
        }
    }

    async fn run(mut self) {
        info!("Player service started");
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(PlayerCommand::Shutdown) | None => break,
                    Some(command) => self.handle_command(command),
                },
                Some(event) = self.events.recv() => self.controller.handle_event(event),
            }
            self.publish();
        }

        self.controller.shutdown();
        self.publish();
        info!("Player service stopped");
    }

    fn handle_command(&mut self, command: PlayerCommand) {
        match command {
            PlayerCommand::SelectResource(id) => self.controller.select_resource(id),
            PlayerCommand::RequestSegment { segment, reply } => {
                let result = self.controller.request_segment(segment);
                // Callers read the snapshot as soon as the reply lands
                self.publish();
                let _ = reply.send(result);
            }
            PlayerCommand::StopAll => self.controller.stop_all(),
            PlayerCommand::SetVolume { volume, reply } => {
                let _ = reply.send(self.controller.set_volume(volume));
            }
            PlayerCommand::Shutdown => {}
        }
    }

    fn publish(&self) {
        let snapshot = self.controller.snapshot();
        self.snapshot.send_if_modified(|current| {
            if *current == snapshot {
                return false;
            }
            *current = snapshot;
            true
        });

        let position = self.controller.position();
        self.position.send_if_modified(|current| {
            if *current == position {
                return false;
            }
            debug!("Position {:.3}s (advancing: {})", position.current_time, position.is_advancing);
            *current = position;
            true
        });
    }
}

/// Cloneable front end of the player service
#[derive(Clone)]
pub struct PlayerHandle {
    commands: mpsc::UnboundedSender<PlayerCommand>,
    snapshot: watch::Receiver<PlayerSnapshot>,
    position: watch::Receiver<PositionState>,
}

impl PlayerHandle {
    fn send(&self, command: PlayerCommand) -> Result<(), PlaybackError> {
        self.commands.send(command).map_err(|_| PlaybackError::ServiceClosed)
    }

    pub fn select_resource(&self, id: impl Into<ResourceId>) -> Result<(), PlaybackError> {
        self.send(PlayerCommand::SelectResource(id.into()))
    }

    pub async fn request_segment(
        &self,
        start_time: f64,
        end_time: f64,
        owner_id: Option<i64>,
    ) -> Result<SessionId, PlaybackError> {
        let segment = Segment::new(start_time, end_time, owner_id)?;
        let (reply, response) = oneshot::channel();
        self.send(PlayerCommand::RequestSegment { segment, reply })?;
        response.await.map_err(|_| PlaybackError::ServiceClosed)?
    }

    pub fn stop_all(&self) -> Result<(), PlaybackError> {
        self.send(PlayerCommand::StopAll)
    }

    pub async fn set_volume(&self, volume: f32) -> Result<(), PlaybackError> {
        let (reply, response) = oneshot::channel();
        self.send(PlayerCommand::SetVolume { volume, reply })?;
        response.await.map_err(|_| PlaybackError::ServiceClosed)?
    }

    pub fn snapshot(&self) -> PlayerSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn position(&self) -> PositionState {
        *self.position.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<PlayerSnapshot> {
        self.snapshot.clone()
    }

    pub fn subscribe_position(&self) -> watch::Receiver<PositionState> {
        self.position.clone()
    }

    /// Wait until the published snapshot satisfies `predicate`
    pub async fn wait_until<F>(&self, mut predicate: F) -> Result<PlayerSnapshot, PlaybackError>
    where
        F: FnMut(&PlayerSnapshot) -> bool,
    {
        let mut rx = self.snapshot.clone();
        let snapshot = rx
            .wait_for(|s| predicate(s))
            .await
            .map_err(|_| PlaybackError::ServiceClosed)?;
        Ok((*snapshot).clone())
    }

    pub fn shutdown(&self) {
        let _ = self.commands.send(PlayerCommand::Shutdown);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::OutputContext;
    use crate::playback::controller::PlayerState;
    use crate::playback::engine::EngineKind;
    use crate::playback::loader::{DecodeStatus, MemorySource};
    use crate::settings::OutputSettings;
    use crate::testing::{fake_factory, wav_bytes, ElementProbe};
    use std::time::Duration;

    fn service(context: &Arc<OutputContext>) -> PlayerHandle {
        let settings = OutputSettings {
            headless: true,
            ..OutputSettings::default()
        };
        let output = Arc::new(SharedOutput::with_context(Arc::clone(context), settings));
        let source = MemorySource::new().with("lesson.wav", wav_bytes(8000, 1, 4.0));
        PlayerService::start(
            PlaybackSettings::default(),
            Arc::new(source),
            output,
            fake_factory(ElementProbe::ready(4.0)),
        )
    }

    fn headless() -> Arc<OutputContext> {
        let settings = OutputSettings {
            headless: true,
            ..OutputSettings::default()
        };
        Arc::new(OutputContext::headless(8000, 1, &settings))
    }

    #[tokio::test]
    async fn test_segment_plays_to_completion() {
        let context = headless();
        let player = service(&context);
        player.select_resource("lesson.wav").unwrap();
        player
            .wait_until(|s| s.resource.as_ref().map(|r| r.status) == Some(DecodeStatus::Ready))
            .await
            .unwrap();

        player.request_segment(1.0, 1.5, Some(2)).await.unwrap();
        let snap = player.snapshot();
        assert_eq!(snap.state, PlayerState::Playing);
        assert_eq!(snap.engine, Some(EngineKind::Precise));

        context.pull(5000);
        let ended = tokio::time::timeout(
            Duration::from_secs(5),
            player.wait_until(|s| s.state == PlayerState::Ended),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(ended.active_owner_id, Some(2));
        assert!(!player.position().is_advancing);
    }

    #[tokio::test]
    async fn test_invalid_segment_is_rejected_before_sending() {
        let context = headless();
        let player = service(&context);
        let result = player.request_segment(5.0, 5.0, None).await;
        assert!(matches!(result, Err(PlaybackError::InvalidSegment(_))));
    }

    #[tokio::test]
    async fn test_stop_all_through_handle() {
        let context = headless();
        let player = service(&context);
        player.select_resource("lesson.wav").unwrap();
        player.request_segment(0.5, 3.0, None).await.unwrap();

        player.stop_all().unwrap();
        let snap = player.wait_until(|s| s.state == PlayerState::Idle).await.unwrap();
        assert_eq!(snap.current_segment, None);
    }

    #[tokio::test]
    async fn test_commands_fail_after_shutdown() {
        let context = headless();
        let player = service(&context);
        player.set_volume(0.5).await.unwrap();
        assert_eq!(context.volume(), 0.5);

        player.shutdown();
        let closed = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if player.stop_all().is_err() {
                    return;
                }
                tokio::task::yield_now().await;
            }
        })
        .await;
        assert!(closed.is_ok());
    }
}
