// Application state management
use parking_lot::Mutex;
use std::path::PathBuf;

use crate::playback::PlayerHandle;
use crate::settings::AppSettings;
use crate::transcript::Transcript;

pub struct AppState {
    pub player: PlayerHandle,
    pub settings: Mutex<AppSettings>,
    pub transcript: Mutex<Option<Transcript>>,
    /// Directory settings are saved to; `None` when no config dir exists
    pub app_dir: Option<PathBuf>,
}

impl AppState {
    pub fn new(player: PlayerHandle, settings: AppSettings, app_dir: Option<PathBuf>) -> Self {
        Self {
            player,
            settings: Mutex::new(settings),
            transcript: Mutex::new(None),
            app_dir,
        }
    }
}
