// Settings module
// Application configuration loaded from settings.json

#[allow(clippy::module_inception)]
pub mod settings;

pub use settings::{
    AppSettings, LoggingSettings, OutputSettings, PlaybackSettings, ResourceSettings, SettingsError,
};
