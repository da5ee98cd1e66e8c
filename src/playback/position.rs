// Playback position published to the UI
use serde::Serialize;

/// `current_time` once playback has run off the end of the resource or was
/// stopped outright. Matches no transcript line.
pub const NO_POSITION: f64 = -1.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionState {
    pub current_time: f64,
    pub is_advancing: bool,
}

impl Default for PositionState {
    fn default() -> Self {
        Self {
            current_time: 0.0,
            is_advancing: false,
        }
    }
}

impl PositionState {
    pub fn is_sentinel(&self) -> bool {
        self.current_time < 0.0
    }
}

#[derive(Debug, Default)]
pub struct PositionTracker {
    state: PositionState,
}

impl PositionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> PositionState {
        self.state
    }

    /// A position sample from the engine producing sound. Samples taken
    /// while the transport is paused are ignored.
    pub fn on_time_update(&mut self, current_time: f64, paused: bool) -> bool {
        if paused {
            return false;
        }
        self.set(PositionState {
            current_time,
            is_advancing: true,
        })
    }

    /// Playback halted at a segment end; the last position stays readable
    pub fn on_halt(&mut self) -> bool {
        self.set(PositionState {
            current_time: self.state.current_time,
            is_advancing: false,
        })
    }

    /// Playback ran off the resource or was stopped
    pub fn on_resource_end(&mut self) -> bool {
        self.set(PositionState {
            current_time: NO_POSITION,
            is_advancing: false,
        })
    }

    pub fn reset(&mut self) -> bool {
        self.set(PositionState::default())
    }

    /// Returns true when the published state changed
    fn set(&mut self, state: PositionState) -> bool {
        if self.state == state {
            return false;
        }
        self.state = state;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_updates_and_halt() {
        let mut tracker = PositionTracker::new();
        assert!(tracker.on_time_update(12.5, false));
        assert!(tracker.state().is_advancing);

        assert!(tracker.on_halt());
        assert_eq!(tracker.state().current_time, 12.5);
        assert!(!tracker.state().is_advancing);
        assert!(!tracker.on_halt());
    }

    #[test]
    fn test_paused_samples_are_ignored() {
        let mut tracker = PositionTracker::new();
        tracker.on_time_update(4.0, false);
        assert!(!tracker.on_time_update(9.0, true));
        assert_eq!(tracker.state().current_time, 4.0);
        assert!(tracker.state().is_advancing);
    }

    #[test]
    fn test_resource_end_sentinel() {
        let mut tracker = PositionTracker::new();
        tracker.on_time_update(119.9, false);
        tracker.on_resource_end();
        assert!(tracker.state().is_sentinel());
        assert_eq!(tracker.state().current_time, NO_POSITION);
    }

    #[test]
    fn test_serializes_camel_case() {
        let json = serde_json::to_string(&PositionState::default()).unwrap();
        assert_eq!(json, r#"{"currentTime":0.0,"isAdvancing":false}"#);
    }
}
