// Precise playback engine
// Plays an exact frame range of the decoded buffer on the shared output and
// completes on the buffer's sample clock.

use std::ops::Range;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use super::engine::{ActivePlayback, EngineKind, SessionSignal, SessionSink, StartOutcome};
use super::error::PlaybackError;
use super::segment::Segment;
use crate::audio::output::{Voice, VoiceEvent, VoiceId, VoiceListener};
use crate::audio::{DecodedBuffer, OutputContext, OutputError, SharedOutput};

pub struct PreciseEngine {
    output: Arc<SharedOutput>,
    tick: Duration,
}

impl PreciseEngine {
    pub fn new(output: Arc<SharedOutput>, tick: Duration) -> Self {
        Self { output, tick }
    }

    pub fn output(&self) -> &Arc<SharedOutput> {
        &self.output
    }

    /// Prepare a segment without producing sound yet
    pub fn prepare(&self, buffer: Arc<DecodedBuffer>, segment: &Segment, sink: SessionSink) -> PreciseHandle {
        self.prepare_range(buffer, segment.start_time(), segment.duration(), sink)
    }

    /// Prepare `duration` seconds from `offset`. The range is clamped to the
    /// buffer's physical end.
    pub fn prepare_range(
        &self,
        buffer: Arc<DecodedBuffer>,
        offset: f64,
        duration: f64,
        sink: SessionSink,
    ) -> PreciseHandle {
        let frames = buffer.frame_range(offset, duration);
        PreciseHandle {
            output: Arc::clone(&self.output),
            buffer,
            frames,
            tick: self.tick,
            sink,
            voice: None,
        }
    }

    /// Prepare and start in one step
    pub fn play(
        &self,
        buffer: Arc<DecodedBuffer>,
        offset: f64,
        duration: f64,
        sink: SessionSink,
    ) -> Result<PreciseHandle, PlaybackError> {
        let mut handle = self.prepare_range(buffer, offset, duration, sink);
        handle.start()?;
        Ok(handle)
    }

    /// Resume the output context, opening it if needed
    pub fn resume_output(&self) -> Result<(), PlaybackError> {
        self.output.resume().map_err(PlaybackError::from)
    }
}

pub struct PreciseHandle {
    output: Arc<SharedOutput>,
    buffer: Arc<DecodedBuffer>,
    frames: Range<u64>,
    tick: Duration,
    sink: SessionSink,
    voice: Option<(Arc<OutputContext>, VoiceId)>,
}

impl PreciseHandle {
    /// Frames that will actually be played
    pub fn frames(&self) -> Range<u64> {
        self.frames.clone()
    }

    fn listener(&self) -> VoiceListener {
        let sink = self.sink.clone();
        Box::new(move |event| match event {
            VoiceEvent::Progress(position) => sink.send(SessionSignal::Progress(position)),
            VoiceEvent::Completed => sink.send(SessionSignal::Completed),
        })
    }
}

impl ActivePlayback for PreciseHandle {
    fn kind(&self) -> EngineKind {
        EngineKind::Precise
    }

    fn start(&mut self) -> Result<StartOutcome, PlaybackError> {
        if self.voice.is_some() {
            return Ok(StartOutcome::Started);
        }

        let context = self.output.get()?;
        let voice = Voice::new(
            Arc::clone(&self.buffer),
            self.frames.clone(),
            context.sample_rate(),
            self.tick,
            self.listener(),
        );

        let id = context.start_voice(voice).map_err(|e| match e {
            OutputError::Suspended => PlaybackError::EngineStart(e.to_string()),
            other => PlaybackError::OutputUnavailable(other),
        })?;

        info!(
            "Session {}: precise playback of frames {}..{} ({} Hz)",
            self.sink.session(),
            self.frames.start,
            self.frames.end,
            self.buffer.sample_rate()
        );
        self.voice = Some((context, id));
        Ok(StartOutcome::Started)
    }

    fn stop(&mut self) {
        if let Some((context, id)) = self.voice.take() {
            if context.stop_voice(id) {
                debug!("Session {}: precise voice stopped", self.sink.session());
            }
        }
    }
}

impl Drop for PreciseHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
