//! Deterministic, counterbalanced assignment of word lists to trials.
//!
//! Everything here is a pure function of the input and the generator it is
//! handed. Randomness is consumed in a fixed order: session-source selection
//! first, then each session's shuffles in session order, then the practice
//! lists. Changing that order changes every subject's lists.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use recall_core::{Error, PracticeList, Result, Trial, WordList};
use sha2::{Digest, Sha256};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrialCounts {
    pub baseline: usize,
    pub stim: usize,
    pub control: usize,
}

impl TrialCounts {
    pub fn total(&self) -> usize {
        self.baseline + self.stim + self.control
    }
}

/// Candidate lists for one session: the first `stim` entries are stim
/// candidates, the remaining `baseline + control` non-stim candidates.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSource {
    pub name: String,
    pub lists: Vec<WordList>,
}

#[derive(Debug, Clone)]
pub struct AllocationInput {
    pub sources: Vec<SessionSource>,
    pub practice_words: Vec<String>,
    pub counts: TrialCounts,
    pub num_sessions: usize,
    /// Pair sources for counterbalancing (stimulation variants).
    pub counterbalance: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Allocation {
    pub session_lists: Vec<Vec<Trial>>,
    pub practice_lists: Vec<PracticeList>,
}

impl Allocation {
    pub fn session_stim(&self) -> Vec<Vec<bool>> {
        self.session_lists
            .iter()
            .map(|s| s.iter().map(|t| t.is_stim).collect())
            .collect()
    }
}

/// Generator for everything a subject sees. Same subject, same stream.
pub fn subject_rng(subject: &str) -> StdRng {
    let seed: [u8; 32] = Sha256::digest(subject.as_bytes()).into();
    StdRng::from_seed(seed)
}

fn check_input(input: &AllocationInput) -> Result<()> {
    let total = input.counts.total();
    if total == 0 {
        return Err(Error::config("no trials configured"));
    }
    if input.sources.len() < input.num_sessions {
        return Err(Error::config(format!(
            "{} sessions configured but only {} session sources",
            input.num_sessions,
            input.sources.len()
        )));
    }
    if let Some(bad) = input.sources.iter().find(|s| s.lists.len() != total) {
        return Err(Error::config(format!(
            "{} holds {} lists, expected {} (baseline {} + stim {} + control {})",
            bad.name,
            bad.lists.len(),
            total,
            input.counts.baseline,
            input.counts.stim,
            input.counts.control
        )));
    }
    if input.practice_words.is_empty() {
        return Err(Error::config("practice word pool is empty"));
    }
    Ok(())
}

/// Source index for every session, in session order.
fn session_order<R: Rng + ?Sized>(n_sources: usize, counterbalance: bool, rng: &mut R) -> Vec<usize> {
    let indices: Vec<usize> = (0..n_sources).collect();
    if !counterbalance {
        let mut order = indices;
        order.shuffle(rng);
        return order;
    }
    let mut pairs: Vec<Vec<usize>> = indices.chunks(2).map(<[usize]>::to_vec).collect();
    pairs.shuffle(rng);
    for pair in &mut pairs {
        pair.shuffle(rng);
    }
    pairs.into_iter().flatten().collect()
}

/// Tags lists with a stim flag and shuffles them together.
fn interleave<R: Rng + ?Sized>(stim: Vec<WordList>, nonstim: Vec<WordList>, rng: &mut R) -> Vec<Trial> {
    let mut half: Vec<Trial> = stim
        .into_iter()
        .map(|w| Trial::new(w, true))
        .chain(nonstim.into_iter().map(|w| Trial::new(w, false)))
        .collect();
    half.shuffle(rng);
    half
}

fn allocate_session<R: Rng + ?Sized>(source: &SessionSource, counts: &TrialCounts, rng: &mut R) -> Vec<Trial> {
    let mut lists = source.lists.clone();
    for list in &mut lists {
        list.shuffle(rng);
    }

    let mut nonstim = lists.split_off(counts.stim);
    let mut stim = lists;
    stim.shuffle(rng);
    nonstim.shuffle(rng);

    let mut trials = Vec::with_capacity(counts.total());
    // baselines come off the tail, last list first
    let keep = nonstim.len() - counts.baseline;
    trials.extend(nonstim.drain(keep..).rev().map(|w| Trial::new(w, false)));

    // floor split: with odd counts the extra list lands in the second half
    let stim_late = stim.split_off(stim.len() / 2);
    let nonstim_late = nonstim.split_off(nonstim.len() / 2);
    trials.extend(interleave(stim, nonstim, rng));
    trials.extend(interleave(stim_late, nonstim_late, rng));
    trials
}

pub fn allocate<R: Rng + ?Sized>(input: &AllocationInput, rng: &mut R) -> Result<Allocation> {
    check_input(input)?;

    let order = session_order(input.sources.len(), input.counterbalance, rng);
    let session_lists: Vec<Vec<Trial>> = order
        .iter()
        .take(input.num_sessions)
        .map(|&i| allocate_session(&input.sources[i], &input.counts, rng))
        .collect();

    let practice_lists = (0..input.num_sessions)
        .map(|_| {
            let mut words = input.practice_words.clone();
            words.shuffle(rng);
            words
        })
        .collect();

    debug!(
        sessions = session_lists.len(),
        sources = ?order.iter().take(input.num_sessions).map(|&i| &input.sources[i].name).collect::<Vec<_>>(),
        "allocation complete"
    );
    Ok(Allocation {
        session_lists,
        practice_lists,
    })
}
