//! Persisted session progress.
//!
//! The snapshot is the only thing that survives a restart. It is written as
//! a whole after every trial and at every session boundary, and re-read at
//! every session entry point.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use recall_core::{Error, PracticeList, Result, Trial};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::allocation::Allocation;

pub const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    pub schema_version: u32,
    pub session_num: usize,
    pub trial_num: usize,
    pub session_started: bool,
    pub practice_done: bool,
    pub session_lists: Vec<Vec<Trial>>,
    pub practice_lists: Vec<PracticeList>,
    /// Parallel to `session_lists`; the runner reads stim status from here.
    pub session_stim: Vec<Vec<bool>>,
    pub language: String,
    pub last_stim_time: u64,
}

impl SessionState {
    /// Fresh snapshot at session 0, trial 0.
    pub fn new(allocation: Allocation, language: &str) -> Self {
        let session_stim = allocation.session_stim();
        Self {
            schema_version: SCHEMA_VERSION,
            session_num: 0,
            trial_num: 0,
            session_started: false,
            practice_done: false,
            session_lists: allocation.session_lists,
            practice_lists: allocation.practice_lists,
            session_stim,
            language: language.to_owned(),
            last_stim_time: 0,
        }
    }

    pub fn is_out_of_sessions(&self) -> bool {
        self.session_num >= self.session_lists.len()
    }

    pub fn current_lists(&self) -> Option<&[Trial]> {
        self.session_lists.get(self.session_num).map(Vec::as_slice)
    }

    pub fn current_stim(&self) -> Option<&[bool]> {
        self.session_stim.get(self.session_num).map(Vec::as_slice)
    }

    pub fn practice_list(&self) -> Option<&PracticeList> {
        self.practice_lists.get(self.session_num)
    }

    pub fn trials_in_session(&self) -> usize {
        self.current_lists().map_or(0, <[Trial]>::len)
    }

    pub fn apply(&mut self, update: &SessionUpdate) {
        if let Some(v) = update.session_num {
            self.session_num = v;
        }
        if let Some(v) = update.trial_num {
            self.trial_num = v;
        }
        if let Some(v) = update.session_started {
            self.session_started = v;
        }
        if let Some(v) = update.practice_done {
            self.practice_done = v;
        }
    }

    /// Structural checks a loaded snapshot must pass before it is trusted.
    pub fn check(&self) -> Result<()> {
        if self.session_stim.len() != self.session_lists.len()
            || self
                .session_stim
                .iter()
                .zip(&self.session_lists)
                .any(|(stim, lists)| stim.len() != lists.len())
        {
            return Err(Error::config("sessionStim is not parallel to sessionLists"));
        }
        if !self.is_out_of_sessions() && self.trial_num > self.trials_in_session() {
            return Err(Error::config(format!(
                "trialNum {} beyond the {} trials of session {}",
                self.trial_num,
                self.trials_in_session(),
                self.session_num
            )));
        }
        Ok(())
    }

    /// Parses any known snapshot version, upgrading older layouts.
    pub fn from_json(mut value: Value) -> Result<Self> {
        let version = value
            .get("schemaVersion")
            .and_then(Value::as_u64)
            .unwrap_or(0) as u32;
        if version > SCHEMA_VERSION {
            return Err(Error::config(format!(
                "state schema v{version} is newer than supported v{SCHEMA_VERSION}"
            )));
        }
        if version == 0 {
            migrate_v0(&mut value)?;
        }
        let state: SessionState = serde_json::from_value(value)?;
        state.check()?;
        Ok(state)
    }
}

/// v0 snapshots spelled `session_started` in snake case and carried no
/// `sessionStim`, `lastStimTime` or version field.
fn migrate_v0(value: &mut Value) -> Result<()> {
    let obj = value
        .as_object_mut()
        .ok_or_else(|| Error::config("state snapshot is not an object"))?;
    if let Some(started) = obj.remove("session_started") {
        obj.entry("sessionStarted").or_insert(started);
    }
    if !obj.contains_key("sessionStim") {
        let stim: Vec<Value> = obj
            .get("sessionLists")
            .and_then(Value::as_array)
            .map(|sessions| {
                sessions
                    .iter()
                    .map(|trials| {
                        trials
                            .as_array()
                            .map(|ts| ts.iter().map(|t| t["isStim"].clone()).collect())
                            .unwrap_or_else(|| Value::Array(Vec::new()))
                    })
                    .collect()
            })
            .unwrap_or_default();
        obj.insert("sessionStim".into(), Value::Array(stim));
    }
    obj.entry("sessionStarted").or_insert(Value::Bool(false));
    obj.entry("practiceDone").or_insert(Value::Bool(false));
    obj.entry("lastStimTime").or_insert(Value::from(0u64));
    obj.insert("schemaVersion".into(), Value::from(SCHEMA_VERSION));
    Ok(())
}

/// Typed partial overrides; unset fields keep their stored value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionUpdate {
    pub session_num: Option<usize>,
    pub trial_num: Option<usize>,
    pub session_started: Option<bool>,
    pub practice_done: Option<bool>,
}

impl SessionUpdate {
    pub fn trial_num(mut self, v: usize) -> Self {
        self.trial_num = Some(v);
        self
    }

    pub fn session_started(mut self, v: bool) -> Self {
        self.session_started = Some(v);
        self
    }

    pub fn practice_done(mut self, v: bool) -> Self {
        self.practice_done = Some(v);
        self
    }

    /// Moves to `next_session` with all per-session progress cleared. Used
    /// by both completion and skip.
    pub fn rollover(next_session: usize) -> Self {
        Self {
            session_num: Some(next_session),
            trial_num: Some(0),
            session_started: Some(false),
            practice_done: Some(false),
        }
    }
}

/// Durable snapshot storage. One writer, one reader path.
pub trait StateStore {
    fn restore(&self) -> Result<Option<SessionState>>;

    /// Replaces the whole snapshot atomically.
    fn replace(&mut self, state: &SessionState) -> Result<()>;

    /// Merges `update` into the stored snapshot and returns the result.
    fn save(&mut self, update: &SessionUpdate) -> Result<SessionState> {
        let mut state = self
            .restore()?
            .ok_or_else(|| Error::config("no experiment state to update"))?;
        state.apply(update);
        self.replace(&state)?;
        Ok(state)
    }
}

/// Snapshot kept as pretty JSON in a single file.
pub struct JsonStateStore {
    path: PathBuf,
}

impl JsonStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StateStore for JsonStateStore {
    fn restore(&self) -> Result<Option<SessionState>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let contents = fs::read_to_string(&self.path)?;
        let value: Value = serde_json::from_str(&contents)?;
        SessionState::from_json(value).map(Some)
    }

    /// Temp file + rename, so a crash leaves either the old or the new
    /// snapshot and never a torn one. Both the file and the directory entry
    /// are flushed before returning.
    fn replace(&mut self, state: &SessionState) -> Result<()> {
        let json = serde_json::to_string_pretty(state)?;
        let tmp_path = self.path.with_extension("json.tmp");

        let parent = self.path.parent().filter(|p| !p.as_os_str().is_empty());
        if let Some(parent) = parent {
            fs::create_dir_all(parent)?;
        }

        let mut tmp = File::create(&tmp_path)?;
        tmp.write_all(json.as_bytes())?;
        tmp.sync_all()?;
        drop(tmp);
        fs::rename(&tmp_path, &self.path)?;
        if let Some(parent) = parent {
            sync_dir(parent)?;
        }
        debug!(
            path = %self.path.display(),
            session = state.session_num,
            trial = state.trial_num,
            "state saved"
        );
        Ok(())
    }
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> Result<()> {
    File::open(dir)?.sync_all()?;
    Ok(())
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> Result<()> {
    Ok(())
}

/// In-memory store; keeps every written snapshot so callers can inspect the
/// sequence of commits.
#[derive(Debug, Default, Clone)]
pub struct MemoryStateStore {
    pub history: Vec<SessionState>,
    seeded: usize,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(state: SessionState) -> Self {
        Self {
            history: vec![state],
            seeded: 1,
        }
    }

    /// Writes made after construction.
    pub fn writes(&self) -> usize {
        self.history.len().saturating_sub(self.seeded)
    }
}

impl StateStore for MemoryStateStore {
    fn restore(&self) -> Result<Option<SessionState>> {
        Ok(self.history.last().cloned())
    }

    fn replace(&mut self, state: &SessionState) -> Result<()> {
        self.history.push(state.clone());
        Ok(())
    }
}

/// Skip transition shared by the runner prompt and the standalone command.
pub fn skip_current_session(store: &mut impl StateStore) -> Result<SessionState> {
    let state = store
        .restore()?
        .ok_or_else(|| Error::config("experiment has not been initialized"))?;
    let skipped = state.session_num;
    let state = store.save(&SessionUpdate::rollover(skipped + 1))?;
    info!(session = skipped + 1, "session skipped");
    Ok(state)
}
