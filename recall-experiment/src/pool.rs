//! Word pools and per-session list sources on disk.
//!
//! A word pool is one word per line. A session source is a text file with
//! one candidate list per line, words separated by tabs or spaces; the first
//! `n_stim_trials` lines are the stim candidates, the rest non-stim.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use recall_core::{Error, Result, WordList};
use tracing::debug;

use crate::allocation::{AllocationInput, SessionSource, TrialCounts};
use crate::config::ExperimentConfig;

#[derive(Debug, Clone, Default)]
pub struct WordPool {
    words: Vec<String>,
    index: HashMap<String, usize>,
}

impl WordPool {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::from_words(read_word_pool(path)?))
    }

    pub fn from_words(words: Vec<String>) -> Self {
        let index = words
            .iter()
            .enumerate()
            .map(|(i, w)| (w.clone(), i))
            .collect();
        Self { words, index }
    }

    pub fn words(&self) -> &[String] {
        &self.words
    }

    /// Position of `name` in the pool file.
    pub fn lookup(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }
}

pub fn read_word_pool(path: impl AsRef<Path>) -> Result<Vec<String>> {
    let path = path.as_ref();
    if !path.is_file() {
        return Err(Error::missing(path));
    }
    let contents = std::fs::read_to_string(path)?;
    Ok(contents
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_owned)
        .collect())
}

fn read_session_source(path: &Path) -> Result<SessionSource> {
    let contents = std::fs::read_to_string(path)?;
    let lists: Vec<WordList> = contents
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| l.split_whitespace().map(str::to_owned).collect())
        .collect();
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    Ok(SessionSource { name, lists })
}

/// Numbered files sort numerically (`2.txt` before `10.txt`), anything else
/// after them by name.
fn source_order(path: &Path) -> (u8, u64, String) {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("");
    match stem.parse::<u64>() {
        Ok(n) => (0, n, name),
        Err(_) => (1, 0, name),
    }
}

pub fn load_session_sources(dir: impl AsRef<Path>) -> Result<Vec<SessionSource>> {
    let dir = dir.as_ref();
    if !dir.is_dir() {
        return Err(Error::missing(dir));
    }
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && p.extension().is_some_and(|e| e == "txt" || e == "lst"))
        .collect();
    files.sort_by_key(|p| source_order(p));
    debug!(dir = %dir.display(), count = files.len(), "session sources found");
    files.iter().map(|p| read_session_source(p)).collect()
}

/// Reads everything the allocation needs after the pre-flight check passed.
pub fn load_allocation_input(config: &ExperimentConfig) -> Result<AllocationInput> {
    config.validate()?;

    let pool = WordPool::load(config.resource(&config.word_pool))?;
    let sources = load_session_sources(config.resource(&config.word_list_dir))?;
    for source in &sources {
        for list in &source.lists {
            if list.len() != config.list_length {
                return Err(Error::config(format!(
                    "{}: list of {} words, expected {}",
                    source.name,
                    list.len(),
                    config.list_length
                )));
            }
            if let Some(stray) = list.iter().find(|w| pool.lookup(w).is_none()) {
                return Err(Error::config(format!(
                    "{}: word {stray:?} is not in the word pool",
                    source.name
                )));
            }
        }
    }

    Ok(AllocationInput {
        sources,
        practice_words: read_word_pool(config.resource(&config.practice_pool))?,
        counts: TrialCounts {
            baseline: config.n_baseline_trials,
            stim: config.n_stim_trials,
            control: config.n_control_trials,
        },
        num_sessions: config.num_sessions,
        counterbalance: config.is_stim_experiment(),
    })
}
