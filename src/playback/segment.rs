// Segment and resource identifiers
use serde::Serialize;
use std::fmt;
use std::path::Path;

use super::error::PlaybackError;

/// Opaque identifier of an audio resource (a file id, path or URL tail)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ResourceId(String);

impl ResourceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// File extension, used as a format hint for the decoder
    pub fn extension(&self) -> Option<&str> {
        Path::new(&self.0).extension().and_then(|e| e.to_str())
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ResourceId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for ResourceId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// A requested playback range in seconds.
///
/// `owner_id` ties the segment to a question for highlight bookkeeping;
/// `None` means the segment does not change the current owner.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Segment {
    start_time: f64,
    end_time: f64,
    owner_id: Option<i64>,
}

impl Segment {
    pub fn new(start_time: f64, end_time: f64, owner_id: Option<i64>) -> Result<Self, PlaybackError> {
        if !start_time.is_finite() || !end_time.is_finite() {
            return Err(PlaybackError::InvalidSegment(format!(
                "non-finite bounds {}..{}",
                start_time, end_time
            )));
        }
        if start_time < 0.0 {
            return Err(PlaybackError::InvalidSegment(format!(
                "start {} is negative",
                start_time
            )));
        }
        if end_time <= start_time {
            return Err(PlaybackError::InvalidSegment(format!(
                "end {} is not after start {}",
                end_time, start_time
            )));
        }

        Ok(Self {
            start_time,
            end_time,
            owner_id,
        })
    }

    pub fn start_time(&self) -> f64 {
        self.start_time
    }

    pub fn end_time(&self) -> f64 {
        self.end_time
    }

    pub fn owner_id(&self) -> Option<i64> {
        self.owner_id
    }

    pub fn duration(&self) -> f64 {
        self.end_time - self.start_time
    }

    /// End time limited to a known resource duration
    pub fn clamped_end(&self, duration: Option<f64>) -> f64 {
        match duration {
            Some(d) => self.end_time.min(d),
            None => self.end_time,
        }
    }

    /// Same time range, ignoring the owner
    pub fn same_range(&self, start_time: f64, end_time: f64) -> bool {
        self.start_time == start_time && self.end_time == end_time
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.3}s..{:.3}s", self.start_time, self.end_time)?;
        if let Some(owner) = self.owner_id {
            write!(f, " (owner {})", owner)?;
        }
        Ok(())
    }
}
