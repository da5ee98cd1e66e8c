// Transcript model for highlight bookkeeping
// Questions own transcript lines; the player highlights the line under the
// playback position and the line that exactly matches the playing segment.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

use crate::playback::{PlaybackError, Segment};

#[derive(Debug, Error)]
pub enum TranscriptError {
    #[error("Failed to read transcript {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse transcript: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptLine {
    pub start_time: f64,
    pub end_time: f64,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Question that owns the line, filled in when loading
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<i64>,
}

impl TranscriptLine {
    /// Inclusive on both ends
    pub fn contains(&self, time: f64) -> bool {
        time >= self.start_time && time <= self.end_time
    }

    pub fn segment(&self) -> Result<Segment, PlaybackError> {
        Segment::new(self.start_time, self.end_time, self.owner_id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Question {
    pub id: i64,
    #[serde(default)]
    pub question_number: i64,
    #[serde(default)]
    pub part: i64,
    pub start_time: f64,
    pub end_time: f64,
    #[serde(default)]
    pub transcripts: Vec<TranscriptLine>,
}

#[derive(Debug, Clone, Default)]
pub struct Transcript {
    questions: Vec<Question>,
    lines: Vec<TranscriptLine>,
}

impl Transcript {
    pub fn new(mut questions: Vec<Question>) -> Self {
        questions.sort_by(|a, b| a.start_time.total_cmp(&b.start_time));

        let mut lines: Vec<TranscriptLine> = questions
            .iter()
            .flat_map(|q| {
                q.transcripts.iter().cloned().map(move |mut line| {
                    line.owner_id = Some(q.id);
                    line
                })
            })
            .collect();
        lines.sort_by(|a, b| a.start_time.total_cmp(&b.start_time));

        Self { questions, lines }
    }

    pub fn from_json(json: &str) -> Result<Self, TranscriptError> {
        let questions: Vec<Question> = serde_json::from_str(json)?;
        Ok(Self::new(questions))
    }

    pub fn load(path: &Path) -> Result<Self, TranscriptError> {
        let json = std::fs::read_to_string(path).map_err(|source| TranscriptError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&json)
    }

    pub fn lines(&self) -> &[TranscriptLine] {
        &self.lines
    }

    pub fn questions(&self) -> &[Question] {
        &self.questions
    }

    /// The line under `time`. The stopped sentinel matches nothing.
    pub fn line_at(&self, time: f64) -> Option<&TranscriptLine> {
        if time < 0.0 {
            return None;
        }
        self.lines.iter().find(|line| line.contains(time))
    }

    /// Lines belonging to one question
    pub fn owner_lines(&self, owner_id: i64) -> impl Iterator<Item = &TranscriptLine> {
        self.lines.iter().filter(move |line| line.owner_id == Some(owner_id))
    }

    pub fn question(&self, owner_id: i64) -> Option<&Question> {
        self.questions.iter().find(|q| q.id == owner_id)
    }

    /// The whole range of a question, for the play-question button
    pub fn question_segment(&self, owner_id: i64) -> Option<Segment> {
        let question = self.question(owner_id)?;
        Segment::new(question.start_time, question.end_time, Some(question.id)).ok()
    }

    /// Lines labelled as the question prompt joined into one, with the range
    /// from the first prompt line's start to the last one's end
    pub fn question_prompt(&self, owner_id: i64) -> Option<(String, Segment)> {
        let prompt: Vec<&TranscriptLine> = self
            .owner_lines(owner_id)
            .filter(|line| line.label.as_deref() == Some("question"))
            .collect();
        let first = prompt.first()?;
        let last = prompt.last()?;

        let text = prompt.iter().map(|line| line.text.as_str()).collect::<Vec<_>>().join(" ");
        let segment = Segment::new(first.start_time, last.end_time, Some(owner_id)).ok()?;
        Some((text, segment))
    }
}

/// Whether `line` is the segment currently playing (exact range match)
pub fn is_current_segment(line: &TranscriptLine, playing: Option<&Segment>) -> bool {
    playing
        .map(|segment| segment.same_range(line.start_time, line.end_time))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"[
        {
            "id": 9, "question_number": 2, "part": 1,
            "start_time": 20.0, "end_time": 30.0,
            "transcripts": [
                {"start_time": 20.0, "end_time": 24.0, "text": "Where is the meeting?", "label": "question"},
                {"start_time": 24.0, "end_time": 30.0, "text": "In room B."}
            ]
        },
        {
            "id": 7, "question_number": 1, "part": 1,
            "start_time": 10.0, "end_time": 15.0,
            "transcripts": [
                {"start_time": 10.0, "end_time": 12.5, "text": "What time", "label": "question"},
                {"start_time": 12.5, "end_time": 13.0, "text": "is it?", "label": "question"},
                {"start_time": 13.0, "end_time": 15.0, "text": "Noon."}
            ]
        }
    ]"#;

    #[test]
    fn test_lines_sorted_with_owners() {
        let transcript = Transcript::from_json(SAMPLE).unwrap();
        let starts: Vec<f64> = transcript.lines().iter().map(|l| l.start_time).collect();
        assert_eq!(starts, vec![10.0, 12.5, 13.0, 20.0, 24.0]);
        assert_eq!(transcript.lines()[0].owner_id, Some(7));
        assert_eq!(transcript.owner_lines(9).count(), 2);
        assert_eq!(transcript.questions()[0].id, 7);
    }

    #[test]
    fn test_line_at_is_inclusive_and_ignores_sentinel() {
        let transcript = Transcript::from_json(SAMPLE).unwrap();
        assert_eq!(transcript.line_at(11.0).unwrap().text, "What time");
        // Shared boundary resolves to the earlier line
        assert_eq!(transcript.line_at(12.5).unwrap().text, "What time");
        assert!(transcript.line_at(17.0).is_none());
        assert!(transcript.line_at(-1.0).is_none());
    }

    #[test]
    fn test_current_segment_needs_exact_range() {
        let transcript = Transcript::from_json(SAMPLE).unwrap();
        let line = &transcript.lines()[2];
        let exact = Segment::new(13.0, 15.0, None).unwrap();
        let wider = Segment::new(13.0, 15.5, None).unwrap();
        assert!(is_current_segment(line, Some(&exact)));
        assert!(!is_current_segment(line, Some(&wider)));
        assert!(!is_current_segment(line, None));
    }

    #[test]
    fn test_question_prompt_and_segment() {
        let transcript = Transcript::from_json(SAMPLE).unwrap();
        let (text, segment) = transcript.question_prompt(7).unwrap();
        assert_eq!(text, "What time is it?");
        assert_eq!((segment.start_time(), segment.end_time()), (10.0, 13.0));

        let whole = transcript.question_segment(9).unwrap();
        assert_eq!(whole.owner_id(), Some(9));
        assert!(transcript.question_segment(99).is_none());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lc.json");
        std::fs::write(&path, SAMPLE).unwrap();
        assert_eq!(Transcript::load(&path).unwrap().lines().len(), 5);
        assert!(Transcript::load(&dir.path().join("missing.json")).is_err());
    }
}
