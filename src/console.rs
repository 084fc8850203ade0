//! Terminal stand-ins for the experiment display, keyboard and microphone,
//! for piloting a configuration on a machine without the lab hardware.

use std::io::{self, BufRead, Write};
use std::path::Path;
use std::time::Duration;

use recall_core::{Error, Result};
use recall_experiment::{AudioRecorder, BeepConfig, Presenter, Question, Recording};
use recall_timing::{HighPrecisionTimer, Timer};
use tracing::{debug, warn};

/// Nominal length of the countdown movie, which the console cannot play.
const MOVIE_MS: u64 = 10_000;

pub struct ConsolePresenter {
    input: io::StdinLock<'static>,
    output: io::Stdout,
}

impl ConsolePresenter {
    pub fn new() -> Self {
        Self {
            input: io::stdin().lock(),
            output: io::stdout(),
        }
    }

    fn read_line(&mut self) -> Result<String> {
        self.output.flush()?;
        let mut line = String::new();
        if self.input.read_line(&mut line)? == 0 {
            return Err(Error::OperatorAbort("input closed".into()));
        }
        Ok(line.trim().to_owned())
    }

    fn yes_no(&mut self, prompt: &str) -> Result<bool> {
        loop {
            write!(self.output, "{prompt} [y/n] ")?;
            match self.read_line()?.to_ascii_lowercase().as_str() {
                "y" | "yes" => return Ok(true),
                "n" | "no" => return Ok(false),
                _ => continue,
            }
        }
    }
}

impl Presenter for ConsolePresenter {
    fn show(&mut self, text: &str) -> Result<()> {
        writeln!(self.output, "{text}")?;
        Ok(self.output.flush()?)
    }

    fn clear(&mut self) -> Result<()> {
        writeln!(self.output)?;
        Ok(())
    }

    fn wait_for_key(&mut self) -> Result<()> {
        write!(self.output, "[enter] ")?;
        self.read_line().map(drop)
    }

    fn confirm(&mut self, question: &Question) -> Result<bool> {
        self.yes_no(&question.to_string())
    }

    fn start_movie(&mut self, path: &Path) -> Result<u64> {
        if !path.is_file() {
            return Err(Error::missing(path));
        }
        writeln!(self.output, "[countdown: {}]", path.display())?;
        Ok(MOVIE_MS)
    }

    fn stop_movie(&mut self) -> Result<()> {
        Ok(())
    }

    fn play_tone(&mut self, beep: &BeepConfig) -> Result<()> {
        debug!(freq_hz = beep.freq_hz, duration_ms = beep.duration_ms, "tone");
        write!(self.output, "\x07")?;
        Ok(self.output.flush()?)
    }

    fn mic_test(&mut self) -> Result<bool> {
        self.yes_no("Microphone working?")
    }

    fn answer(&mut self, problem: &str) -> Result<String> {
        write!(self.output, "{problem}")?;
        self.read_line()
    }
}

/// Keeps the capture timing without storing any audio.
pub struct NullRecorder {
    timer: HighPrecisionTimer,
    current: Option<(String, u64)>,
    warned: bool,
}

impl NullRecorder {
    pub fn new(timer: HighPrecisionTimer) -> Self {
        Self {
            timer,
            current: None,
            warned: false,
        }
    }
}

impl AudioRecorder for NullRecorder {
    fn start(&mut self, label: &str) -> Result<()> {
        if !self.warned {
            warn!("no audio device attached; recall periods are not recorded");
            self.warned = true;
        }
        self.current = Some((label.to_owned(), self.timer.now()));
        Ok(())
    }

    fn stop(&mut self) -> Result<Recording> {
        let (label, started) = self
            .current
            .take()
            .ok_or_else(|| Error::config("recording stopped before it started"))?;
        let elapsed: Duration = self.timer.elapsed(started);
        Ok(Recording {
            label,
            duration_ms: elapsed.as_millis() as u64,
            path: None,
        })
    }
}
