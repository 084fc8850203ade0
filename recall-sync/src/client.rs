use std::time::Duration;

use recall_core::{Error, Result, StateName};
use recall_timing::{Timer, ns_to_ms};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::link::ControlLink;
use crate::offset::{ClockOffset, Probe};
use crate::protocol::{EventKind, SyncEvent};
use crate::vocabulary::PhaseVocabulary;

/// What the control PC is told about the session during the handshake.
#[derive(Debug, Clone, Default)]
pub struct ConnectionSettings {
    pub experiment: String,
    pub version: String,
    pub session: usize,
    pub stim_mode: String,
    pub subject: String,
    pub vocabulary: PhaseVocabulary,
}

/// Clock alignment and event delivery for one session process.
///
/// Built once at startup and handed to the session runner by reference.
pub struct SyncClient<C: ControlLink, T: Timer> {
    link: Option<C>,
    timer: T,
    enabled: bool,
    settings: ConnectionSettings,
    sync_count: usize,
    offset: Option<ClockOffset>,
    next_probe: u64,
}

impl<C: ControlLink, T: Timer> SyncClient<C, T> {
    pub fn new(link: Option<C>, timer: T, enabled: bool) -> Self {
        Self {
            link,
            timer,
            enabled,
            settings: ConnectionSettings::default(),
            sync_count: 5,
            offset: None,
            next_probe: 0,
        }
    }

    /// Client for piloting without a host: every network call is skipped.
    pub fn standalone(timer: T) -> Self {
        Self::new(None, timer, false)
    }

    pub fn with_sync_count(mut self, count: usize) -> Self {
        self.sync_count = count.max(1);
        self
    }

    /// Hands over a link opened after construction, once the session is
    /// known.
    pub fn attach(&mut self, link: C) {
        self.link = Some(link);
    }

    pub fn configure(&mut self, settings: ConnectionSettings) {
        self.settings = settings;
    }

    pub fn settings(&self) -> &ConnectionSettings {
        &self.settings
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn link(&self) -> Option<&C> {
        self.link.as_ref()
    }

    /// Latest alignment. Events carry local timestamps; the host maps them
    /// itself, so this is only read for diagnostics.
    pub fn offset(&self) -> Option<ClockOffset> {
        self.offset
    }

    pub fn timer(&self) -> &T {
        &self.timer
    }

    fn active_link(&mut self) -> Result<&mut C> {
        self.link
            .as_mut()
            .ok_or_else(|| Error::connection("control PC enabled but no link was opened"))
    }

    pub fn initiate_connection(&mut self) -> Result<()> {
        if !self.enabled {
            warn!("control PC disabled; running without synchronization");
            return Ok(());
        }
        let s = &self.settings;
        let hello = SyncEvent::new(EventKind::Connected, self.timer.now_ms())
            .with("experiment", s.experiment.as_str())
            .with("version", s.version.as_str())
            .with("session", s.session as u64)
            .with("stim_mode", s.stim_mode.as_str())
            .with("subject", s.subject.as_str())
            .with("states", s.vocabulary.names().to_vec());
        let experiment = s.experiment.clone();
        self.active_link()?.handshake(hello)?;
        info!(experiment = %experiment, "connected to control PC");
        Ok(())
    }

    /// Blocks until the host signals start, calling `on_poll` between polls.
    pub fn wait_for_start(&mut self, mut on_poll: impl FnMut()) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        let link = self.active_link()?;
        while !link.poll_start(Duration::from_millis(500))? {
            on_poll();
        }
        info!("start received from control PC");
        Ok(())
    }

    /// Runs `sync_count` probes and keeps the tightest estimate. Blocks the
    /// calling thread for every round trip. `indicator` runs first when
    /// `show_indicator` is set and the host is enabled.
    pub fn align_clocks(
        &mut self,
        show_indicator: bool,
        indicator: impl FnOnce() -> Result<()>,
    ) -> Result<Option<ClockOffset>> {
        if !self.enabled {
            return Ok(None);
        }
        if show_indicator {
            indicator()?;
        }

        let mut probes = Vec::with_capacity(self.sync_count);
        for _ in 0..self.sync_count {
            let id = self.next_probe;
            self.next_probe += 1;
            let sent_ns = self.timer.now();
            let probe = SyncEvent::new(EventKind::Sync, ns_to_ms(sent_ns)).with("id", id);
            let remote_ms = self.active_link()?.round_trip(probe)?;
            let received_ns = self.timer.now();
            probes.push(Probe {
                sent_ns,
                received_ns,
                remote_ns: (remote_ms * 1_000_000.0).round() as i64,
            });
        }

        let Some(mut estimate) = ClockOffset::best_of(&probes) else {
            return Ok(self.offset);
        };
        if let Some(previous) = &self.offset {
            estimate = estimate.with_drift_from(previous);
        }
        debug!(
            offset_ms = estimate.offset_ns as f64 / 1e6,
            rtt_ms = estimate.round_trip_ns as f64 / 1e6,
            drift = estimate.drift,
            "clocks aligned"
        );
        self.offset = Some(estimate);
        Ok(self.offset)
    }

    /// Fire-and-forget send. `timestamp` (local ns) pins the event to a
    /// screen transition; otherwise the event is stamped now.
    pub fn send_event(
        &mut self,
        kind: EventKind,
        payload: impl IntoIterator<Item = (&'static str, Value)>,
        timestamp: Option<u64>,
    ) -> Result<()> {
        let ts = timestamp.unwrap_or_else(|| self.timer.now());
        let mut event = SyncEvent::new(kind, ns_to_ms(ts));
        for (key, value) in payload {
            event = event.with(key, value);
        }
        if kind == EventKind::State {
            let name = event
                .state_name()
                .ok_or_else(|| Error::protocol("STATE event without a state name"))?;
            self.settings.vocabulary.check(name)?;
        }
        if !self.enabled {
            return Ok(());
        }
        debug!(kind = ?kind, payload = ?event.payload, "send");
        self.active_link()?.send(event)
    }

    pub fn send_state(&mut self, state: StateName, value: bool, timestamp: Option<u64>) -> Result<()> {
        self.send_event(
            EventKind::State,
            [
                ("state", Value::from(state.as_str())),
                ("value", Value::from(value)),
            ],
            timestamp,
        )
    }

    /// `trial` is 1-based; -1 marks the practice list and resets the host's
    /// list counter.
    pub fn send_trial(&mut self, trial: i64) -> Result<()> {
        self.send_event(EventKind::Trial, [("trial", Value::from(trial))], None)
    }

    pub fn send_session(&mut self, session: usize, session_type: &str) -> Result<()> {
        self.send_event(
            EventKind::Session,
            [
                ("session", Value::from(session as u64)),
                ("session_type", Value::from(session_type)),
            ],
            None,
        )
    }

    pub fn send_word(
        &mut self,
        word: &str,
        serial_pos: usize,
        is_stim: bool,
        timestamp: Option<u64>,
    ) -> Result<()> {
        self.send_event(
            EventKind::Word,
            [
                ("word", Value::from(word)),
                ("serial_pos", Value::from(serial_pos as u64)),
                ("stim", Value::from(is_stim)),
            ],
            timestamp,
        )
    }

    pub fn send_math(
        &mut self,
        problem: &str,
        response: &str,
        correct: bool,
        rt_ms: u64,
        timestamp: Option<u64>,
    ) -> Result<()> {
        self.send_event(
            EventKind::Math,
            [
                ("problem", Value::from(problem)),
                ("response", Value::from(response)),
                ("correct", Value::from(correct)),
                ("rt", Value::from(rt_ms)),
            ],
            timestamp,
        )
    }

    pub fn send_exit(&mut self) -> Result<()> {
        self.send_event(EventKind::Exit, [], None)
    }

    pub fn exit_requested(&self) -> bool {
        self.enabled && self.link.as_ref().is_some_and(|l| l.exit_requested())
    }
}
