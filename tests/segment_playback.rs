// End-to-end playback through the player service on a headless output
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;

use segment_player_lib::audio::{OutputContext, SharedOutput};
use segment_player_lib::playback::{
    decoding_element_factory, DecodeStatus, EngineKind, MemorySource, PlayerHandle, PlayerService,
    PlayerState,
};
use segment_player_lib::settings::{OutputSettings, PlaybackSettings};

const RATE: u32 = 8000;

fn wav(seconds: f64) -> Bytes {
    let frames = (seconds * RATE as f64) as u32;
    let data_len = frames * 2;
    let mut out = Vec::new();
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&(36 + data_len).to_le_bytes());
    out.extend_from_slice(b"WAVEfmt ");
    out.extend_from_slice(&16u32.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes()); // PCM
    out.extend_from_slice(&1u16.to_le_bytes()); // mono
    out.extend_from_slice(&RATE.to_le_bytes());
    out.extend_from_slice(&(RATE * 2).to_le_bytes());
    out.extend_from_slice(&2u16.to_le_bytes());
    out.extend_from_slice(&16u16.to_le_bytes());
    out.extend_from_slice(b"data");
    out.extend_from_slice(&data_len.to_le_bytes());
    for i in 0..frames {
        let sample = (((i % 40) as i32 - 20) * 400) as i16;
        out.extend_from_slice(&sample.to_le_bytes());
    }
    Bytes::from(out)
}

fn start_player(playback: PlaybackSettings) -> (PlayerHandle, Arc<OutputContext>) {
    let settings = OutputSettings {
        headless: true,
        ..OutputSettings::default()
    };
    let context = Arc::new(OutputContext::headless(RATE, 2, &settings));
    let output = Arc::new(SharedOutput::with_context(Arc::clone(&context), settings));
    let source = Arc::new(MemorySource::new().with("lesson.wav", wav(3.0)));
    let factory = decoding_element_factory(
        source.clone(),
        Arc::clone(&output),
        tokio::runtime::Handle::current(),
        playback.time_update_interval(),
    );
    (PlayerService::start(playback, source, output, factory), context)
}

/// Render output until the player reaches `state`
async fn render_until(player: &PlayerHandle, context: &OutputContext, state: PlayerState) {
    let reached = tokio::time::timeout(Duration::from_secs(10), async {
        while player.snapshot().state != state {
            context.pull(80);
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await;
    assert!(reached.is_ok(), "player never reached {:?}", state);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_precise_segment_end_to_end() {
    let (player, context) = start_player(PlaybackSettings::default());
    player.select_resource("lesson.wav").unwrap();
    player
        .wait_until(|s| s.resource.as_ref().map(|r| r.status) == Some(DecodeStatus::Ready))
        .await
        .unwrap();

    player.request_segment(1.0, 1.5, Some(3)).await.unwrap();
    let snapshot = player.snapshot();
    assert_eq!(snapshot.state, PlayerState::Playing);
    assert_eq!(snapshot.engine, Some(EngineKind::Precise));
    assert_eq!(snapshot.active_owner_id, Some(3));

    render_until(&player, &context, PlayerState::Ended).await;
    let snapshot = player.snapshot();
    assert_eq!(snapshot.current_segment.map(|s| s.start_time()), Some(1.0));

    let position = player.position();
    assert!(!position.is_advancing);
    assert!((1.0..=1.5).contains(&position.current_time));

    player.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_streaming_segment_end_to_end() {
    let playback = PlaybackSettings {
        precise_enabled: false,
        time_update_ms: 10,
        ..PlaybackSettings::default()
    };
    let (player, context) = start_player(playback);
    player.select_resource("lesson.wav").unwrap();

    player.request_segment(0.5, 0.8, None).await.unwrap();
    render_until(&player, &context, PlayerState::Ended).await;

    let snapshot = player.snapshot();
    assert_eq!(snapshot.engine, Some(EngineKind::Fallback));
    let position = player.position();
    assert!(position.current_time >= 0.8);
    // Overshoot is bounded by the time-update interval
    assert!(position.current_time < 1.2);

    player.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_switching_resources_stops_playback() {
    let (player, context) = start_player(PlaybackSettings::default());
    player.select_resource("lesson.wav").unwrap();
    player
        .wait_until(|s| s.resource.as_ref().map(|r| r.status) == Some(DecodeStatus::Ready))
        .await
        .unwrap();

    player.request_segment(0.0, 2.5, Some(1)).await.unwrap();
    context.pull(800);

    player.select_resource("missing.wav").unwrap();
    let snapshot = player
        .wait_until(|s| s.resource.as_ref().map(|r| r.status) == Some(DecodeStatus::Failed))
        .await
        .unwrap();
    assert_eq!(snapshot.state, PlayerState::Idle);
    assert_eq!(snapshot.current_segment, None);
    assert_eq!(snapshot.active_owner_id, None);
    assert!(!context.has_voice());

    player.shutdown();
}
