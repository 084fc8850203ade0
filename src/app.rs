use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use recall_experiment::{
    Collaborators, ExperimentConfig, JsonStateStore, SessionOutcome, SessionRunner, StateStore,
};
use recall_sync::{SyncClient, TcpLink, TcpOptions};
use recall_timing::{HighPrecisionTimer, PresentationClock};
use tracing::info;

use crate::console::{ConsolePresenter, NullRecorder};
use crate::session_log::FileLog;
use crate::{Cli, Preset};

type Runner<'a> = SessionRunner<
    'a,
    JsonStateStore,
    ConsolePresenter,
    NullRecorder,
    FileLog,
    TcpLink,
    HighPrecisionTimer,
>;

pub struct App {
    config: ExperimentConfig,
    subject: String,
    subject_dir: PathBuf,
    host: String,
    timer: HighPrecisionTimer,
}

impl App {
    pub fn new(cli: &Cli) -> Result<Self> {
        let base = match cli.preset {
            Preset::Fr1 => ExperimentConfig::fr1(),
            Preset::Fr3 => ExperimentConfig::fr3(),
        };
        let mut config = match &cli.config {
            Some(path) => ExperimentConfig::load_over(path, base)
                .with_context(|| format!("loading {}", path.display()))?,
            None => base,
        };
        if cli.no_host {
            config.control_pc = false;
        }
        config.check_counts()?;

        Ok(Self {
            subject_dir: cli.data_dir.join(&cli.subject),
            subject: cli.subject.clone(),
            host: cli.host.clone(),
            config,
            timer: HighPrecisionTimer::new(),
        })
    }

    fn runner<'a>(&self, sync: &'a mut SyncClient<TcpLink, HighPrecisionTimer>) -> Runner<'a> {
        let parts = Collaborators {
            store: JsonStateStore::new(self.subject_dir.join("state.json")),
            presenter: ConsolePresenter::new(),
            recorder: NullRecorder::new(self.timer.clone()),
            log: FileLog::new(&self.subject_dir),
        };
        let clock = PresentationClock::new(self.timer.clone());
        SessionRunner::new(self.config.clone(), &self.subject, parts, sync, clock)
    }

    fn tcp_options(&self) -> TcpOptions {
        let heartbeat = self.config.heartbeat_interval_ms;
        TcpOptions {
            heartbeat_interval: (heartbeat > 0).then(|| Duration::from_millis(heartbeat)),
            ..TcpOptions::default()
        }
    }

    /// Initializes the subject on first use, then runs the next session.
    pub fn run(&mut self) -> Result<()> {
        let mut sync = SyncClient::new(None, self.timer.clone(), self.config.control_pc)
            .with_sync_count(self.config.sync_count);
        let mut runner = self.runner(&mut sync);

        let state = match runner.store().restore()? {
            Some(state) => state,
            None => runner.init_experiment()?,
        };
        if state.is_out_of_sessions() {
            println!(
                "No more sessions for {}: all {} have been run",
                self.subject,
                state.session_lists.len()
            );
            return Ok(());
        }
        self.config.validate()?;
        if runner.should_skip_session()? {
            return Ok(());
        }

        let options = self.tcp_options();
        runner
            .connect(|| TcpLink::connect(self.host.as_str(), options, self.timer.clone()))
            .with_context(|| format!("control PC at {}", self.host))?;

        match runner.run_session()? {
            SessionOutcome::Completed => info!(subject = %self.subject, "session finished"),
            SessionOutcome::OutOfSessions => println!("No more sessions for {}", self.subject),
            SessionOutcome::MicTestFailed => {
                println!("Microphone test failed; fix the microphone and restart")
            }
        }
        Ok(())
    }

    /// Operator-driven skip outside of a session run.
    pub fn skip(&mut self) -> Result<()> {
        let mut sync = SyncClient::standalone(self.timer.clone());
        let mut runner = self.runner(&mut sync);
        let state = runner.restore()?;
        if state.is_out_of_sessions() {
            anyhow::bail!("{} has no session left to skip", self.subject);
        }
        let skipped = state.session_num + 1;
        let next = runner.skip_session()?;
        println!(
            "Skipped session {skipped} for {}; session {} runs next",
            self.subject,
            next.session_num + 1
        );
        Ok(())
    }
}
