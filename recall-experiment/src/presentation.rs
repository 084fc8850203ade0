//! Collaborators the session runner drives: screen and keyboard, audio
//! capture and the session log.
//!
//! Implementations only provide the primitives. The timed operations are
//! default methods built on a [`PresentationClock`], so every implementation
//! reports onset and offset at the same points relative to the screen
//! change.

use std::fmt;
use std::path::{Path, PathBuf};

use recall_core::Result;
use recall_timing::{PresentationClock, Timer};

use crate::config::BeepConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge {
    Onset,
    Offset,
}

/// Receives each edge of a timed presentation with its local timestamp (ns).
pub type EdgeFn<'a> = dyn FnMut(Edge, u64) -> Result<()> + 'a;

/// Yes/no decisions put to the operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Question {
    /// Confirm that the right subject and session are about to run.
    SessionNumber {
        subject: String,
        session: usize,
        experiment: String,
        language: String,
    },
    /// A previous run of this session was interrupted.
    SkipSession { session: usize },
    SkipPractice,
}

impl fmt::Display for Question {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Question::SessionNumber {
                subject,
                session,
                experiment,
                language,
            } => write!(
                f,
                "Running {subject} in session {session} of {experiment} ({language}). Continue?"
            ),
            Question::SkipSession { session } => {
                write!(f, "Session {session} was previously started. Skip it?")
            }
            Question::SkipPractice => f.write_str("Skip the practice list?"),
        }
    }
}

pub trait Presenter {
    /// Puts `text` on screen, replacing whatever was there.
    fn show(&mut self, text: &str) -> Result<()>;

    fn clear(&mut self) -> Result<()>;

    /// Blocks until the subject or operator presses a key.
    fn wait_for_key(&mut self) -> Result<()>;

    fn confirm(&mut self, question: &Question) -> Result<bool>;

    /// Starts playback and returns the movie length in ms.
    fn start_movie(&mut self, path: &Path) -> Result<u64>;

    fn stop_movie(&mut self) -> Result<()>;

    /// Starts a tone; it ends by itself after `beep.duration_ms`.
    fn play_tone(&mut self, beep: &BeepConfig) -> Result<()>;

    /// Short record-and-playback check; `false` means the operator rejected it.
    fn mic_test(&mut self) -> Result<bool>;

    /// Shows an arithmetic problem and returns the typed response.
    fn answer(&mut self, problem: &str) -> Result<String>;

    /// Holds `text` on screen for `duration_ms` once the clock's pending
    /// delay has elapsed. Returns the onset and offset timestamps.
    fn flash<T: Timer>(
        &mut self,
        clock: &mut PresentationClock<T>,
        text: &str,
        duration_ms: u64,
        edges: &mut EdgeFn<'_>,
    ) -> Result<(u64, u64)> {
        clock.wait();
        self.show(text)?;
        let on = clock.now();
        edges(Edge::Onset, on)?;
        clock.delay(duration_ms, 0);
        clock.wait();
        self.clear()?;
        let off = clock.now();
        edges(Edge::Offset, off)?;
        Ok((on, off))
    }

    /// Shows `text` until a key press, which is also the offset edge.
    fn show_until_key<T: Timer>(
        &mut self,
        clock: &mut PresentationClock<T>,
        text: &str,
        edges: &mut EdgeFn<'_>,
    ) -> Result<u64> {
        clock.wait();
        self.show(text)?;
        edges(Edge::Onset, clock.now())?;
        self.wait_for_key()?;
        let pressed = clock.now();
        self.clear()?;
        edges(Edge::Offset, pressed)?;
        clock.tare();
        Ok(pressed)
    }

    fn play_whole_movie<T: Timer>(
        &mut self,
        clock: &mut PresentationClock<T>,
        path: &Path,
    ) -> Result<()> {
        self.clear()?;
        let length_ms = self.start_movie(path)?;
        clock.delay(length_ms, 0);
        clock.wait();
        self.stop_movie()
    }

    /// Returns the onset timestamp.
    fn beep<T: Timer>(
        &mut self,
        clock: &mut PresentationClock<T>,
        beep: &BeepConfig,
        edges: &mut EdgeFn<'_>,
    ) -> Result<u64> {
        clock.wait();
        self.play_tone(beep)?;
        let on = clock.now();
        edges(Edge::Onset, on)?;
        clock.delay(beep.duration_ms, 0);
        clock.wait();
        edges(Edge::Offset, clock.now())?;
        Ok(on)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recording {
    pub label: String,
    pub duration_ms: u64,
    pub path: Option<PathBuf>,
}

pub trait AudioRecorder {
    fn start(&mut self, label: &str) -> Result<()>;

    fn stop(&mut self) -> Result<Recording>;

    /// Captures exactly `duration_ms`. `on_start` sees the capture-start
    /// timestamp, which is also returned.
    fn record<T: Timer>(
        &mut self,
        clock: &mut PresentationClock<T>,
        duration_ms: u64,
        label: &str,
        on_start: &mut dyn FnMut(u64) -> Result<()>,
    ) -> Result<(Recording, u64)> {
        clock.wait();
        self.start(label)?;
        let started = clock.now();
        on_start(started)?;
        clock.delay(duration_ms, 0);
        clock.wait();
        let recording = self.stop()?;
        Ok((recording, started))
    }
}

/// Scientific session log. Timestamps are local presentation-clock ns.
pub trait LogSink {
    /// Called once the session number is known, before any message.
    fn begin_session(&mut self, _session: usize) -> Result<()> {
        Ok(())
    }

    fn log_message(&mut self, message: &str, timestamp_ns: u64) -> Result<()>;
}
