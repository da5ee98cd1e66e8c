// Playback module
// Segment playback over one shared resource: a sample-accurate engine on the
// decoded buffer and a streaming fallback, arbitrated by the session controller

pub mod controller;
pub mod element;
pub mod engine;
pub mod error;
pub mod loader;
pub mod position;
pub mod precise;
pub mod segment;
pub mod service;
pub mod streaming;

pub use controller::{PlayerSnapshot, PlayerState, ResourceSnapshot, SessionController, SessionStatus};
pub use element::{decoding_element_factory, DecodingElement};
pub use engine::{ActivePlayback, ControllerEvent, EngineKind, SessionId, SessionSignal, StartOutcome};
pub use error::PlaybackError;
pub use loader::{
    AudioResource, DecodeStatus, FileSource, HttpSource, MemorySource, ResourceLoader, ResourceSource,
};
pub use position::{PositionState, PositionTracker, NO_POSITION};
pub use precise::{PreciseEngine, PreciseHandle};
pub use segment::{ResourceId, Segment};
pub use service::{PlayerCommand, PlayerHandle, PlayerService};
pub use streaming::{
    ElementFactory, FallbackHandle, MediaElement, MediaEvent, MediaEventSink, ReadyState, StreamingPlayer,
};
