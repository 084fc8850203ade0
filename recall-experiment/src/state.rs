use rand::SeedableRng;
use rand::rngs::StdRng;
use recall_core::{Error, Phase, Result, SessionPhase, StateName, Trial};
use recall_sync::{ConnectionSettings, ControlLink, SyncClient};
use recall_timing::{PresentationClock, Timer};
use tracing::{debug, info, warn};

use crate::allocation::{allocate, subject_rng};
use crate::config::ExperimentConfig;
use crate::distractor::MathProblem;
use crate::pool::load_allocation_input;
use crate::presentation::{AudioRecorder, Edge, LogSink, Presenter, Question};
use crate::session::{SessionState, SessionUpdate, StateStore, skip_current_session};
use crate::trial::{TrialDurations, TrialTimestamps};

/// How a `run_session` call ended without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    Completed,
    OutOfSessions,
    /// Nothing was persisted; the same session runs again next time.
    MicTestFailed,
}

/// Everything the runner talks to besides the control PC.
pub struct Collaborators<S, P, A, L> {
    pub store: S,
    pub presenter: P,
    pub recorder: A,
    pub log: L,
}

/// Drives one subject through one session per invocation.
///
/// Progress lives in the [`StateStore`]; the runner re-reads it at every
/// entry point and commits after every trial, so a restart repeats at most
/// the trial that was interrupted.
pub struct SessionRunner<'a, S, P, A, L, C, T>
where
    C: ControlLink,
    T: Timer,
{
    config: ExperimentConfig,
    subject: String,
    durations: TrialDurations,
    store: S,
    presenter: P,
    recorder: A,
    log: L,
    sync: &'a mut SyncClient<C, T>,
    clock: PresentationClock<T>,
    math_rng: StdRng,
    phase: SessionPhase,
}

impl<'a, S, P, A, L, C, T> SessionRunner<'a, S, P, A, L, C, T>
where
    S: StateStore,
    P: Presenter,
    A: AudioRecorder,
    L: LogSink,
    C: ControlLink,
    T: Timer,
{
    pub fn new(
        config: ExperimentConfig,
        subject: impl Into<String>,
        parts: Collaborators<S, P, A, L>,
        sync: &'a mut SyncClient<C, T>,
        clock: PresentationClock<T>,
    ) -> Self {
        Self {
            durations: TrialDurations::from_config(&config),
            config,
            subject: subject.into(),
            store: parts.store,
            presenter: parts.presenter,
            recorder: parts.recorder,
            log: parts.log,
            sync,
            clock,
            math_rng: StdRng::from_os_rng(),
            phase: SessionPhase::default(),
        }
    }

    /// Problems for the distractor come from `rng` instead of the OS.
    pub fn with_math_rng(mut self, rng: StdRng) -> Self {
        self.math_rng = rng;
        self
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn config(&self) -> &ExperimentConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn presenter(&self) -> &P {
        &self.presenter
    }

    pub fn recorder(&self) -> &A {
        &self.recorder
    }

    pub fn log(&self) -> &L {
        &self.log
    }

    pub fn clock(&self) -> &PresentationClock<T> {
        &self.clock
    }

    pub fn into_parts(self) -> Collaborators<S, P, A, L> {
        Collaborators {
            store: self.store,
            presenter: self.presenter,
            recorder: self.recorder,
            log: self.log,
        }
    }

    pub fn restore(&self) -> Result<SessionState> {
        self.store
            .restore()?
            .ok_or_else(|| Error::config("experiment has not been initialized"))
    }

    pub fn is_out_of_sessions(&self, state: &SessionState) -> bool {
        state.is_out_of_sessions()
    }

    /// Allocates every session for the subject and persists the fresh
    /// snapshot. Refuses to touch an experiment that already exists.
    pub fn init_experiment(&mut self) -> Result<SessionState> {
        if self.store.restore()?.is_some() {
            return Err(Error::config(format!(
                "experiment already in progress for {}",
                self.subject
            )));
        }
        let input = load_allocation_input(&self.config)?;
        let mut rng = subject_rng(&self.subject);
        let allocation = allocate(&input, &mut rng)?;
        let state = SessionState::new(allocation, self.config.language_name()?);
        self.store.replace(&state)?;
        info!(
            subject = %self.subject,
            sessions = state.session_lists.len(),
            "experiment initialized"
        );
        Ok(state)
    }

    /// Offers to skip a session a previous run left half done. `true` means
    /// the session was skipped and nothing else should run.
    pub fn should_skip_session(&mut self) -> Result<bool> {
        let state = self.restore()?;
        if !state.session_started {
            return Ok(false);
        }
        let session = state.session_num + 1;
        if !self.presenter.confirm(&Question::SkipSession { session })? {
            info!(session, "continuing interrupted session");
            return Ok(false);
        }
        self.skip_session()?;
        let notice = format!(
            "Session skipped\nRestart {} to run the next session",
            self.config.experiment
        );
        self.presenter
            .show_until_key(&mut self.clock, &notice, &mut |_, _| Ok(()))?;
        Ok(true)
    }

    pub fn skip_session(&mut self) -> Result<SessionState> {
        let state = self.restore()?;
        self.log.begin_session(state.session_num)?;
        self.log_now("SESSION_SKIPPED")?;
        skip_current_session(&mut self.store)
    }

    fn configure_sync(&mut self, session: usize) {
        self.sync.configure(ConnectionSettings {
            experiment: self.config.experiment.clone(),
            version: self.config.version.clone(),
            session,
            stim_mode: self.config.stim_type.clone(),
            subject: self.subject.clone(),
            vocabulary: self.config.vocabulary(),
        });
    }

    /// Handshake and start gate. `open` is only called when the host is
    /// enabled and no link was attached yet.
    pub fn connect(&mut self, open: impl FnOnce() -> Result<C>) -> Result<()> {
        self.config.validate()?;
        let state = self.restore()?;
        self.configure_sync(state.session_num);
        if !self.sync.is_enabled() {
            return self.sync.initiate_connection();
        }
        if self.sync.link().is_none() {
            let link = open()?;
            self.sync.attach(link);
        }
        self.presenter.clear()?;
        self.sync.initiate_connection()?;
        self.presenter.show("Waiting for start from control PC...")?;
        self.sync.wait_for_start(|| {})?;
        self.presenter.clear()
    }

    fn log_at(&mut self, message: &str, timestamp: u64) -> Result<()> {
        self.log.log_message(message, timestamp)
    }

    fn log_now(&mut self, message: &str) -> Result<()> {
        let now = self.clock.now();
        self.log.log_message(message, now)
    }

    /// Brackets `body` with `<STATE>_START`/`_END` log lines and the
    /// matching STATE events.
    fn in_state<R>(
        &mut self,
        state: StateName,
        body: impl FnOnce(&mut Self) -> Result<R>,
    ) -> Result<R> {
        let label = state.log_label();
        self.log_now(&format!("{label}_START"))?;
        self.sync.send_state(state, true, None)?;
        let out = body(self)?;
        self.sync.send_state(state, false, None)?;
        self.log_now(&format!("{label}_END"))?;
        Ok(out)
    }

    fn read_text(&self, pattern: &str) -> Result<String> {
        let path = self.config.resource(pattern);
        if !path.is_file() {
            return Err(Error::missing(path));
        }
        Ok(std::fs::read_to_string(path)?)
    }

    /// Instruction screen with INSTRUCT edges on show and key press.
    fn show_instructions(&mut self, pattern: &str) -> Result<u64> {
        let text = self.read_text(pattern)?;
        let sync = &mut *self.sync;
        self.presenter
            .show_until_key(&mut self.clock, &text, &mut |edge, ts| {
                sync.send_state(StateName::Instruct, edge == Edge::Onset, Some(ts))
            })
    }

    pub fn run_session(&mut self) -> Result<SessionOutcome> {
        let state = self.restore()?;
        if self.is_out_of_sessions(&state) {
            self.phase = SessionPhase::OutOfSessions;
            warn!(
                subject = %self.subject,
                sessions = state.session_lists.len(),
                "no sessions left to run"
            );
            return Ok(SessionOutcome::OutOfSessions);
        }
        // resources are re-checked on every run, not only at init
        self.config.validate()?;
        self.phase = SessionPhase::NotInitialized;
        self.configure_sync(state.session_num);
        self.log.begin_session(state.session_num)?;
        let session = state.session_num + 1;

        let question = Question::SessionNumber {
            subject: self.subject.clone(),
            session,
            experiment: self.config.experiment.clone(),
            language: state.language.clone(),
        };
        if !self.presenter.confirm(&question)? {
            return Err(Error::OperatorAbort(format!(
                "session {session} was not confirmed"
            )));
        }

        let intro = self.read_text(&self.config.intro_file)?;
        self.in_state(StateName::Instruct, |r| {
            r.presenter
                .show_until_key(&mut r.clock, &intro, &mut |_, _| Ok(()))
                .map(drop)
        })?;

        let start = format!(
            "SESS_START\t{session}\t{}_SESSION\tv_{}",
            self.config.session_type(),
            self.config.version
        );
        self.log_now(&start)?;
        info!(subject = %self.subject, session, "session starting");

        // resets the host's list counter
        self.sync.send_trial(-1)?;
        let session_type = self.config.session_type().to_owned();
        self.sync.send_session(session, &session_type)?;

        if !self.in_state(StateName::MicTest, |r| r.presenter.mic_test())? {
            warn!(session, "microphone test failed");
            return Ok(SessionOutcome::MicTestFailed);
        }

        if state.trial_num == 0 {
            self.phase = SessionPhase::PracticePending;
            if !state.practice_done {
                self.resynchronize(false)?;
                self.run_practice_list(&state)?;
                self.resynchronize(true)?;
            }
        }

        let state = self
            .store
            .save(&SessionUpdate::default().session_started(true))?;
        let state = self.run_all_lists(state)?;

        self.phase = SessionPhase::SessionComplete;
        self.store
            .save(&SessionUpdate::rollover(state.session_num + 1))?;
        self.phase = SessionPhase::Rollover;
        info!(session, "session complete");

        let ended = self.presenter.show_until_key(
            &mut self.clock,
            "Thank you!\nYou have completed the session.",
            &mut |_, _| Ok(()),
        )?;
        self.log_at("SESS_END", ended)?;
        self.sync.send_exit()?;
        self.clock.wait();
        Ok(SessionOutcome::Completed)
    }

    /// Runs the session's practice list unless the operator skips it.
    /// Either way the practice counts as done.
    pub fn run_practice_list(&mut self, state: &SessionState) -> Result<()> {
        let words = state.practice_list().cloned().ok_or_else(|| {
            Error::config(format!(
                "no practice list for session {}",
                state.session_num + 1
            ))
        })?;

        let ran = !self.presenter.confirm(&Question::SkipPractice)?;
        if ran {
            self.log_now("PRACTICE_TRIAL")?;
            self.in_state(StateName::Practice, |r| {
                r.clock.tare();
                r.run_encoding(&words, None, false, true).map(drop)
            })?;
        } else {
            info!("practice list skipped by operator");
        }

        self.store
            .save(&SessionUpdate::default().practice_done(true))?;

        if ran {
            let post = self.config.post_practice_file.clone();
            self.show_instructions(&post)?;
        }
        Ok(())
    }

    /// Runs every remaining trial of the current session, committing
    /// `trialNum` after each one. Returns the last committed snapshot.
    pub fn run_all_lists(&mut self, mut state: SessionState) -> Result<SessionState> {
        let lists: Vec<Trial> = state
            .current_lists()
            .map(<[Trial]>::to_vec)
            .ok_or_else(|| Error::config("no lists left in this session"))?;
        let stim: Vec<bool> = state
            .current_stim()
            .map(<[bool]>::to_vec)
            .unwrap_or_default();
        if stim.len() != lists.len() {
            return Err(Error::config("sessionStim is not parallel to sessionLists"));
        }

        while state.trial_num < lists.len() {
            if self.sync.exit_requested() {
                warn!(trial = state.trial_num, "control PC requested exit");
                return Err(Error::HostExit);
            }
            let i = state.trial_num;
            self.run_encoding(&lists[i].words, Some(&state), stim[i], false)?;
            state = self.store.save(&SessionUpdate::default().trial_num(i + 1))?;
            self.phase = SessionPhase::Recall(i)
                .next(lists.len())
                .unwrap_or(SessionPhase::SessionComplete);
            self.resynchronize(true)?;
        }
        Ok(state)
    }

    /// One full list: key gate, countdown, orient, words, optional
    /// distractor and recall. `state` is required unless `is_practice`.
    pub fn run_encoding(
        &mut self,
        words: &[String],
        state: Option<&SessionState>,
        is_stim: bool,
        is_practice: bool,
    ) -> Result<TrialTimestamps> {
        let trial = match (state, is_practice) {
            (_, true) => None,
            (Some(s), false) => Some(s.trial_num + 1),
            (None, false) => {
                return Err(Error::config("non-practice list run without session state"));
            }
        };
        let Some(last) = words.len().checked_sub(1) else {
            return Err(Error::config("cannot present an empty word list"));
        };
        let prefix = if is_practice { "PRACTICE_" } else { "" };
        if let Some(n) = trial {
            self.phase = SessionPhase::Encoding(n - 1);
        }
        debug!(
            trial = ?trial,
            words = words.len(),
            min_ms = self.durations.min_encoding_ms(words.len()),
            "list starting"
        );

        self.sync.send_trial(trial.map_or(-1, |n| n as i64))?;
        let started = if self.config.fast_config {
            self.clock.now()
        } else {
            let prompt = match trial {
                Some(n) => format!("Press any key for trial #{n}"),
                None => "Press any key for practice trial".to_owned(),
            };
            let sync = &mut *self.sync;
            self.presenter
                .show_until_key(&mut self.clock, &prompt, &mut |edge, ts| {
                    sync.send_state(StateName::Waiting, edge == Edge::Onset, Some(ts))
                })?
        };
        if let Some(n) = trial {
            let kind = if is_stim { "STIM" } else { "NONSTIM" };
            self.log_at(&format!("TRIAL\t{n}\t{kind}"), started)?;
        }

        self.resynchronize(false)?;

        self.presenter.clear()?;
        self.in_state(StateName::Countdown, |r| {
            let movie = r.config.resource(&r.config.countdown_movie);
            r.presenter.play_whole_movie(&mut r.clock, &movie)
        })?;

        let encoding = StateName::encoding(is_stim);
        let sync = &mut *self.sync;
        let orient = self.presenter.flash(
            &mut self.clock,
            &self.config.orient_text,
            self.durations.word_ms,
            &mut |edge, ts| match edge {
                Edge::Onset => sync.send_state(StateName::Orient, true, Some(ts)),
                Edge::Offset => {
                    sync.send_state(StateName::Orient, false, Some(ts))?;
                    sync.send_state(encoding, true, Some(ts))
                }
            },
        )?;
        self.log_at(&format!("{prefix}ORIENT"), orient.0)?;
        self.log_at(&format!("{prefix}ORIENT_OFF"), orient.1)?;

        self.clock.delay(
            self.durations.pre_words_ms,
            self.durations.pre_words_jitter_ms,
        );
        self.clock.wait();

        let mut word_times = Vec::with_capacity(words.len());
        for (i, word) in words.iter().enumerate() {
            // the encoding phase ends with the last word's offset
            let ends = (i == last).then_some(encoding);
            word_times.push(self.present_word(word, i, is_stim, is_practice, ends)?);
        }

        if self.config.do_math_distract
            && !self.config.continuous_distract
            && !self.config.fast_config
        {
            self.do_distractor()?;
        }

        let (recall_orient, recording) = self.run_recall(state, is_practice)?;
        let times = TrialTimestamps {
            started,
            orient,
            words: word_times,
            recall_orient,
            recording,
        };
        let encoding_ns = times
            .encoding_end()
            .map_or(0, |end| end.saturating_sub(orient.1));
        debug!(trial = ?trial, encoding_ms = encoding_ns / 1_000_000, "list finished");
        Ok(times)
    }

    /// Shows one word after the inter-stimulus interval. When `ends` is set,
    /// that phase's STATE(false) goes out at the word's offset.
    pub fn present_word(
        &mut self,
        word: &str,
        serial_pos: usize,
        is_stim: bool,
        is_practice: bool,
        ends: Option<StateName>,
    ) -> Result<(u64, u64)> {
        self.clock
            .delay(self.durations.isi_ms, self.durations.isi_jitter_ms);
        let sync = &mut *self.sync;
        let (on, off) = self.presenter.flash(
            &mut self.clock,
            word,
            self.durations.word_ms,
            &mut |edge, ts| match edge {
                Edge::Onset => sync.send_state(StateName::Word, true, Some(ts)),
                Edge::Offset => {
                    sync.send_state(StateName::Word, false, Some(ts))?;
                    match ends {
                        Some(phase) => sync.send_state(phase, false, Some(ts)),
                        None => Ok(()),
                    }
                }
            },
        )?;
        self.sync.send_word(word, serial_pos, is_stim, Some(on))?;

        if is_practice {
            self.log_at(&format!("PRACTICE_WORD\t{word}"), on)?;
            self.log_at("PRACTICE_WORD_OFF", off)?;
        } else {
            let kind = if is_stim { "STIM" } else { "NO_STIM" };
            self.log_at(&format!("WORD\ttext\t{word}\t{serial_pos}\t{kind}"), on)?;
            self.log_at("WORD_OFF", off)?;
        }
        debug!(word, serial_pos, on, off, "word presented");

        if self.config.continuous_distract {
            self.do_distractor()?;
        }
        Ok((on, off))
    }

    /// Recall indicator, start beep, recording window and stop beep.
    /// Returns the indicator onset and the recording start and end.
    pub fn run_recall(
        &mut self,
        state: Option<&SessionState>,
        is_practice: bool,
    ) -> Result<(u64, (u64, u64))> {
        let trial = state.filter(|_| !is_practice).map(|s| s.trial_num);
        if let Some(i) = trial {
            self.phase = SessionPhase::Recall(i);
        }
        self.clock.delay(
            self.durations.pre_recall_ms,
            self.durations.pre_recall_jitter_ms,
        );
        self.clock.wait();

        self.presenter.show(&self.config.recall_start_text)?;
        let shown = self.clock.now();
        self.sync.send_state(StateName::Orient, true, Some(shown))?;
        self.log_at("RETRIEVAL_ORIENT", shown)?;

        self.presenter
            .beep(&mut self.clock, &self.config.start_beep, &mut |_, _| Ok(()))?;
        self.presenter.clear()?;
        let hidden = self.clock.now();
        self.sync.send_state(StateName::Orient, false, Some(hidden))?;

        let label = trial.map_or_else(|| "p".to_owned(), |i| i.to_string());
        let sync = &mut *self.sync;
        let (recording, rec_start) = self.recorder.record(
            &mut self.clock,
            self.durations.recall_ms,
            &label,
            &mut |ts| sync.send_state(StateName::Retrieval, true, Some(ts)),
        )?;
        let sync = &mut *self.sync;
        let rec_end = self.presenter.beep(
            &mut self.clock,
            &self.config.stop_beep,
            &mut |edge, ts| match edge {
                Edge::Onset => sync.send_state(StateName::Retrieval, false, Some(ts)),
                Edge::Offset => Ok(()),
            },
        )?;

        let prefix = if is_practice { "PRACTICE_" } else { "" };
        self.log_at(&format!("{prefix}REC_START"), rec_start)?;
        self.log_at(&format!("{prefix}REC_END"), rec_end)?;
        debug!(label = %recording.label, rec_start, rec_end, "recall recorded");
        Ok((shown, (rec_start, rec_end)))
    }

    /// One DISTRACT period of arithmetic problems.
    pub fn do_distractor(&mut self) -> Result<()> {
        self.in_state(StateName::Distract, |r| r.math_period())
    }

    fn math_period(&mut self) -> Result<()> {
        let math = self.config.math.clone();
        let started = self.clock.now();
        let min_ns = math.min_duration_ms * 1_000_000;
        let mut asked = 0;
        while asked < math.max_probs && self.clock.now().saturating_sub(started) < min_ns {
            let problem = MathProblem::generate(&math, &mut self.math_rng);
            let text = problem.text();
            let shown = self.clock.now();
            let response = self.presenter.answer(&text)?;
            let rt_ms = self.clock.now().saturating_sub(shown) / 1_000_000;
            let correct = problem.is_correct(&response);
            self.sync
                .send_math(&text, response.trim(), correct, rt_ms, Some(shown))?;
            asked += 1;
        }
        self.presenter.clear()?;
        self.clock.tare();
        debug!(asked, "distractor finished");
        Ok(())
    }

    /// Clock alignment before a list. The first one of a session is silent.
    pub fn resynchronize(&mut self, show_indicator: bool) -> Result<()> {
        let presenter = &mut self.presenter;
        let clock = &mut self.clock;
        let aligned = self.sync.align_clocks(show_indicator, || {
            presenter
                .flash(clock, "Syncing...", 500, &mut |_, _| Ok(()))
                .map(drop)
        })?;
        if let Some(offset) = aligned {
            let now = self.clock.now();
            debug!(local_ns = now, host_ns = offset.to_remote(now), "host clock projected");
        }
        Ok(())
    }
}
