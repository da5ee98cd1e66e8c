// Command handlers for the interactive shell
use serde::Serialize;
use std::path::PathBuf;

use crate::playback::{
    DecodeStatus, EngineKind, PlayerState, PositionState, ResourceId, Segment, SessionId,
};
use crate::settings::AppSettings;
use crate::state::AppState;
use crate::transcript::{is_current_segment, Transcript, TranscriptLine};

pub fn open_resource(resource_id: String, state: &AppState) -> Result<(), String> {
    if resource_id.trim().is_empty() {
        return Err("Resource id is empty".to_string());
    }
    state
        .player
        .select_resource(ResourceId::new(resource_id))
        .map_err(|e| format!("Failed to open resource: {}", e))
}

pub async fn play_segment(
    start_time: f64,
    end_time: f64,
    owner_id: Option<i64>,
    state: &AppState,
) -> Result<SessionId, String> {
    state
        .player
        .request_segment(start_time, end_time, owner_id)
        .await
        .map_err(|e| format!("Failed to play segment: {}", e))
}

/// Play a whole question from the loaded transcript
pub async fn play_question(owner_id: i64, state: &AppState) -> Result<SessionId, String> {
    let segment = state
        .transcript
        .lock()
        .as_ref()
        .ok_or_else(|| "No transcript loaded".to_string())?
        .question_segment(owner_id)
        .ok_or_else(|| format!("Question {} not found", owner_id))?;

    play_segment(segment.start_time(), segment.end_time(), segment.owner_id(), state).await
}

pub fn stop_playback(state: &AppState) -> Result<(), String> {
    state
        .player
        .stop_all()
        .map_err(|e| format!("Failed to stop playback: {}", e))
}

pub async fn set_volume(volume: f32, state: &AppState) -> Result<(), String> {
    if !(0.0..=1.0).contains(&volume) {
        return Err(format!("Volume must be between 0 and 1, got {}", volume));
    }
    state
        .player
        .set_volume(volume)
        .await
        .map_err(|e| format!("Failed to set volume: {}", e))?;
    state.settings.lock().output.volume = volume;
    Ok(())
}

pub fn load_transcript(path: PathBuf, state: &AppState) -> Result<usize, String> {
    let transcript =
        Transcript::load(&path).map_err(|e| format!("Failed to load transcript: {}", e))?;
    let count = transcript.lines().len();
    *state.transcript.lock() = Some(transcript);
    Ok(count)
}

pub fn save_settings(state: &AppState) -> Result<PathBuf, String> {
    let dir = state
        .app_dir
        .as_ref()
        .ok_or_else(|| "No settings directory available".to_string())?;
    state
        .settings
        .lock()
        .save(dir)
        .map_err(|e| format!("Failed to save settings: {}", e))?;
    Ok(AppSettings::get_settings_path(dir))
}

pub fn get_player_state(state: &AppState) -> PlayerStateResponse {
    let snapshot = state.player.snapshot();
    let position = state.player.position();
    let transcript = state.transcript.lock();

    let highlighted_line = transcript
        .as_ref()
        .and_then(|t| t.line_at(position.current_time))
        .cloned();
    let playing_line = transcript.as_ref().and_then(|t| {
        t.lines()
            .iter()
            .find(|line| is_current_segment(line, snapshot.current_segment.as_ref()))
            .cloned()
    });

    PlayerStateResponse {
        state: snapshot.state,
        is_playing: snapshot.is_playing,
        is_loading: snapshot.is_loading,
        current_segment: snapshot.current_segment,
        active_owner_id: snapshot.active_owner_id,
        engine: snapshot.engine,
        resource: snapshot.resource.as_ref().map(|r| r.id.to_string()),
        resource_status: snapshot.resource.as_ref().map(|r| r.status),
        position,
        highlighted_line,
        playing_line,
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerStateResponse {
    pub state: PlayerState,
    pub is_playing: bool,
    pub is_loading: bool,
    pub current_segment: Option<Segment>,
    pub active_owner_id: Option<i64>,
    pub engine: Option<EngineKind>,
    pub resource: Option<String>,
    pub resource_status: Option<DecodeStatus>,
    pub position: PositionState,
    /// Line under the playback position
    pub highlighted_line: Option<TranscriptLine>,
    /// Line matching the playing segment exactly
    pub playing_line: Option<TranscriptLine>,
}

/// One line of shell input
#[derive(Debug, Clone, PartialEq)]
pub enum ShellCommand {
    Open(String),
    Play {
        start_time: f64,
        end_time: f64,
        owner_id: Option<i64>,
    },
    Question(i64),
    Stop,
    Status,
    Volume(f32),
    Transcript(PathBuf),
    Save,
    Help,
    Quit,
}

pub const HELP: &str = "\
commands:
  open <resource-id>           select an audio resource
  play <start> <end> [owner]   play a segment (seconds)
  question <owner>             play a whole question from the transcript
  stop                         stop playback
  status                       print player state as JSON
  volume <0..1>                set output volume
  transcript <path>            load a transcript JSON file
  save                         save settings
  quit";

impl ShellCommand {
    pub fn parse(line: &str) -> Result<Option<Self>, String> {
        let mut words = line.split_whitespace();
        let Some(command) = words.next() else {
            return Ok(None);
        };
        let args: Vec<&str> = words.collect();

        let command = match (command, args.as_slice()) {
            ("open", [id]) => Self::Open(id.to_string()),
            ("play", [start, end]) => Self::Play {
                start_time: parse_number(start)?,
                end_time: parse_number(end)?,
                owner_id: None,
            },
            ("play", [start, end, owner]) => Self::Play {
                start_time: parse_number(start)?,
                end_time: parse_number(end)?,
                owner_id: Some(parse_number(owner)?),
            },
            ("question", [owner]) => Self::Question(parse_number(owner)?),
            ("stop", []) => Self::Stop,
            ("status", []) => Self::Status,
            ("volume", [volume]) => Self::Volume(parse_number(volume)?),
            ("transcript", [path]) => Self::Transcript(PathBuf::from(path)),
            ("save", []) => Self::Save,
            ("help", []) | ("?", []) => Self::Help,
            ("quit", []) | ("exit", []) => Self::Quit,
            (other, _) => return Err(format!("Unknown or malformed command: {} (try help)", other)),
        };
        Ok(Some(command))
    }
}

fn parse_number<T: std::str::FromStr>(word: &str) -> Result<T, String>
where
    T::Err: std::fmt::Display,
{
    word.parse()
        .map_err(|e| format!("Invalid number {:?}: {}", word, e))
}

/// Run one command. Returns the text to print, if any.
pub async fn execute(command: ShellCommand, state: &AppState) -> Result<Option<String>, String> {
    match command {
        ShellCommand::Open(id) => {
            open_resource(id.clone(), state)?;
            Ok(Some(format!("opened {}", id)))
        }
        ShellCommand::Play {
            start_time,
            end_time,
            owner_id,
        } => {
            let session = play_segment(start_time, end_time, owner_id, state).await?;
            Ok(Some(format!("session {}", session)))
        }
        ShellCommand::Question(owner) => {
            let session = play_question(owner, state).await?;
            let prompt = state
                .transcript
                .lock()
                .as_ref()
                .and_then(|t| t.question_prompt(owner))
                .map(|(text, _)| text);
            Ok(Some(match prompt {
                Some(text) => format!("session {}: {}", session, text),
                None => format!("session {}", session),
            }))
        }
        ShellCommand::Stop => stop_playback(state).map(|_| None),
        ShellCommand::Status => serde_json::to_string_pretty(&get_player_state(state))
            .map(Some)
            .map_err(|e| format!("Failed to serialize state: {}", e)),
        ShellCommand::Volume(volume) => set_volume(volume, state).await.map(|_| None),
        ShellCommand::Transcript(path) => {
            let count = load_transcript(path, state)?;
            Ok(Some(format!("{} transcript lines", count)))
        }
        ShellCommand::Save => {
            let path = save_settings(state)?;
            Ok(Some(format!("saved {}", path.display())))
        }
        ShellCommand::Help => Ok(Some(HELP.to_string())),
        ShellCommand::Quit => Ok(None),
    }
}
