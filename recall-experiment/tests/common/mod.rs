#![allow(dead_code)]

use std::fs;
use std::path::Path;
use std::time::Duration;

use rand::SeedableRng;
use rand::rngs::StdRng;
use recall_core::Result;
use recall_experiment::{
    AudioRecorder, BeepConfig, Collaborators, ExperimentConfig, LogSink, MemoryStateStore,
    Presenter, Question, Recording, SessionRunner, SessionState, StateStore,
};
use recall_sync::{ControlLink, EventKind, SyncClient, SyncEvent};
use recall_timing::{PresentationClock, Timer, VirtualTimer};
use tempfile::TempDir;

pub const SUBJECT: &str = "R1001P";

/// Control PC whose clock runs one second ahead and answers instantly.
pub struct FakeLink {
    pub timer: VirtualTimer,
    pub sent: Vec<SyncEvent>,
    pub probes: usize,
    pub handshakes: usize,
    /// Raise EXIT once this many non-practice TRIAL events went out.
    pub exit_after_trials: Option<usize>,
}

impl FakeLink {
    pub fn new(timer: VirtualTimer) -> Self {
        Self {
            timer,
            sent: Vec::new(),
            probes: 0,
            handshakes: 0,
            exit_after_trials: None,
        }
    }

    pub fn states(&self) -> Vec<(&str, bool, f64)> {
        self.sent
            .iter()
            .filter(|e| e.kind == EventKind::State)
            .map(|e| {
                (
                    e.state_name().unwrap_or_default(),
                    e.payload["value"].as_bool().unwrap_or_default(),
                    e.timestamp,
                )
            })
            .collect()
    }

    pub fn of_kind(&self, kind: EventKind) -> Vec<&SyncEvent> {
        self.sent.iter().filter(|e| e.kind == kind).collect()
    }

    fn trials_started(&self) -> usize {
        self.of_kind(EventKind::Trial)
            .iter()
            .filter(|e| e.payload["trial"].as_i64().is_some_and(|t| t > 0))
            .count()
    }
}

impl ControlLink for FakeLink {
    fn handshake(&mut self, hello: SyncEvent) -> Result<()> {
        self.handshakes += 1;
        self.sent.push(hello);
        Ok(())
    }

    fn round_trip(&mut self, _probe: SyncEvent) -> Result<f64> {
        self.probes += 1;
        Ok(self.timer.now_ms() + 1000.0)
    }

    fn send(&mut self, event: SyncEvent) -> Result<()> {
        self.sent.push(event);
        Ok(())
    }

    fn poll_start(&mut self, _timeout: Duration) -> Result<bool> {
        Ok(true)
    }

    fn exit_requested(&self) -> bool {
        self.exit_after_trials
            .is_some_and(|n| self.trials_started() >= n)
    }
}

/// Screen, keyboard and operator with fixed answers. Keys and typed
/// answers take a little virtual time.
pub struct ScriptedPresenter {
    pub timer: VirtualTimer,
    pub shown: Vec<String>,
    pub questions: Vec<Question>,
    pub confirm_session: bool,
    pub skip_session: bool,
    pub skip_practice: bool,
    pub mic_ok: bool,
    pub keys: usize,
    pub tones: Vec<u32>,
}

impl ScriptedPresenter {
    pub fn new(timer: VirtualTimer) -> Self {
        Self {
            timer,
            shown: Vec::new(),
            questions: Vec::new(),
            confirm_session: true,
            skip_session: false,
            skip_practice: false,
            mic_ok: true,
            keys: 0,
            tones: Vec::new(),
        }
    }
}

impl Presenter for ScriptedPresenter {
    fn show(&mut self, text: &str) -> Result<()> {
        self.shown.push(text.to_owned());
        Ok(())
    }

    fn clear(&mut self) -> Result<()> {
        Ok(())
    }

    fn wait_for_key(&mut self) -> Result<()> {
        self.keys += 1;
        self.timer.advance(Duration::from_millis(300));
        Ok(())
    }

    fn confirm(&mut self, question: &Question) -> Result<bool> {
        self.questions.push(question.clone());
        Ok(match question {
            Question::SessionNumber { .. } => self.confirm_session,
            Question::SkipSession { .. } => self.skip_session,
            Question::SkipPractice => self.skip_practice,
        })
    }

    fn start_movie(&mut self, _path: &Path) -> Result<u64> {
        Ok(3000)
    }

    fn stop_movie(&mut self) -> Result<()> {
        Ok(())
    }

    fn play_tone(&mut self, beep: &BeepConfig) -> Result<()> {
        self.tones.push(beep.freq_hz);
        Ok(())
    }

    fn mic_test(&mut self) -> Result<bool> {
        Ok(self.mic_ok)
    }

    /// Always right, after five seconds of thought.
    fn answer(&mut self, problem: &str) -> Result<String> {
        self.timer.advance(Duration::from_secs(5));
        let mut total = 0i32;
        let mut sign = 1;
        for token in problem.split_whitespace() {
            match token {
                "+" => sign = 1,
                "-" => sign = -1,
                "=" => break,
                n => total += sign * n.parse::<i32>().unwrap_or(0),
            }
        }
        Ok(total.to_string())
    }
}

#[derive(Default)]
pub struct SilentRecorder {
    pub labels: Vec<String>,
    current: Option<String>,
}

impl AudioRecorder for SilentRecorder {
    fn start(&mut self, label: &str) -> Result<()> {
        self.labels.push(label.to_owned());
        self.current = Some(label.to_owned());
        Ok(())
    }

    fn stop(&mut self) -> Result<Recording> {
        Ok(Recording {
            label: self.current.take().unwrap_or_default(),
            duration_ms: 0,
            path: None,
        })
    }
}

#[derive(Default)]
pub struct MemoryLog {
    pub sessions: Vec<usize>,
    pub lines: Vec<(String, u64)>,
}

impl MemoryLog {
    pub fn messages(&self) -> Vec<&str> {
        self.lines.iter().map(|(m, _)| m.as_str()).collect()
    }

    pub fn contains(&self, message: &str) -> bool {
        self.lines.iter().any(|(m, _)| m == message)
    }
}

impl LogSink for MemoryLog {
    fn begin_session(&mut self, session: usize) -> Result<()> {
        self.sessions.push(session);
        Ok(())
    }

    fn log_message(&mut self, message: &str, timestamp_ns: u64) -> Result<()> {
        self.lines.push((message.to_owned(), timestamp_ns));
        Ok(())
    }
}

/// Resource tree for a small closed-loop experiment: `n_sources` session
/// sources of six lists (2 baseline, 2 stim, 2 control) of three words.
pub fn resources(n_sources: usize) -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    for sub in ["pools_EN/stim_lists", "fonts", "text_EN", "video"] {
        fs::create_dir_all(root.join(sub)).unwrap();
    }
    let mut pool = Vec::new();
    for s in 1..=n_sources {
        let mut lines = Vec::new();
        for l in 0..6 {
            let words: Vec<String> = (0..3).map(|w| format!("S{s}L{l}W{w}")).collect();
            pool.extend(words.iter().cloned());
            lines.push(words.join("\t"));
        }
        fs::write(
            root.join(format!("pools_EN/stim_lists/{s}.txt")),
            lines.join("\n"),
        )
        .unwrap();
    }
    fs::write(root.join("pools_EN/ram_wordpool.txt"), pool.join("\n")).unwrap();
    fs::write(root.join("pools_EN/practice_wordpool.txt"), "PA\nPB\nPC\n").unwrap();
    fs::write(root.join("fonts/Verdana.ttf"), b"").unwrap();
    fs::write(root.join("text_EN/intro.txt"), "Welcome").unwrap();
    fs::write(root.join("text_EN/post_practiceList.txt"), "Practice over").unwrap();
    fs::write(root.join("video/countdown.mpg"), b"").unwrap();
    dir
}

pub fn config(root: &Path, num_sessions: usize) -> ExperimentConfig {
    ExperimentConfig {
        resource_root: root.to_path_buf(),
        num_sessions,
        trials_per_session: 6,
        n_baseline_trials: 2,
        n_stim_trials: 2,
        n_control_trials: 2,
        list_length: 3,
        fast_config: true,
        do_math_distract: false,
        ..ExperimentConfig::fr3()
    }
}

pub type Runner<'a, S> =
    SessionRunner<'a, S, ScriptedPresenter, SilentRecorder, MemoryLog, FakeLink, VirtualTimer>;

pub fn sync(timer: &VirtualTimer, enabled: bool) -> SyncClient<FakeLink, VirtualTimer> {
    SyncClient::new(Some(FakeLink::new(timer.clone())), timer.clone(), enabled)
}

pub fn runner<'a, S: StateStore>(
    config: ExperimentConfig,
    store: S,
    sync: &'a mut SyncClient<FakeLink, VirtualTimer>,
) -> Runner<'a, S> {
    let presenter = ScriptedPresenter::new(sync.timer().clone());
    runner_with(config, store, sync, presenter)
}

pub fn runner_with<'a, S: StateStore>(
    config: ExperimentConfig,
    store: S,
    sync: &'a mut SyncClient<FakeLink, VirtualTimer>,
    presenter: ScriptedPresenter,
) -> Runner<'a, S> {
    let timer = sync.timer().clone();
    let parts = Collaborators {
        store,
        presenter,
        recorder: SilentRecorder::default(),
        log: MemoryLog::default(),
    };
    let clock = PresentationClock::with_rng(timer, StdRng::seed_from_u64(7));
    SessionRunner::new(config, SUBJECT, parts, sync, clock).with_math_rng(StdRng::seed_from_u64(8))
}

/// Allocates a fresh experiment and returns its first snapshot.
pub fn initialized(config: &ExperimentConfig) -> SessionState {
    let timer = VirtualTimer::new();
    let mut sync = sync(&timer, false);
    let mut runner = runner(config.clone(), MemoryStateStore::new(), &mut sync);
    runner.init_experiment().unwrap()
}

