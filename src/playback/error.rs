use thiserror::Error;

use crate::audio::{DecodeError, OutputError};

/// Everything that can go wrong while loading or playing a segment.
///
/// None of these are fatal: the controller degrades to the streaming engine
/// or returns to idle.
#[derive(Debug, Clone, Error)]
pub enum PlaybackError {
    #[error("Failed to fetch resource {resource}: {reason}")]
    ResourceFetch { resource: String, reason: String },

    #[error("Failed to decode audio: {0}")]
    Decode(#[from] DecodeError),

    #[error("Precise engine refused to start: {0}")]
    EngineStart(String),

    #[error("Seek failed: {0}")]
    Seek(String),

    #[error("Playback rejected: {0}")]
    PlayRejected(String),

    #[error("Media element error: {0}")]
    Media(String),

    #[error("Audio output unavailable: {0}")]
    OutputUnavailable(#[from] OutputError),

    #[error("Invalid segment: {0}")]
    InvalidSegment(String),

    #[error("No audio resource selected")]
    NoResource,

    #[error("Player service has shut down")]
    ServiceClosed,
}

impl PlaybackError {
    pub fn fetch(resource: impl ToString, reason: impl ToString) -> Self {
        Self::ResourceFetch {
            resource: resource.to_string(),
            reason: reason.to_string(),
        }
    }
}
