use crate::config::ExperimentConfig;

/// Timing of one list, taken from the configuration once per session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrialDurations {
    pub word_ms: u64,
    pub isi_ms: u64,
    pub isi_jitter_ms: u64,
    pub pre_words_ms: u64,
    pub pre_words_jitter_ms: u64,
    pub pre_recall_ms: u64,
    pub pre_recall_jitter_ms: u64,
    pub recall_ms: u64,
}

impl TrialDurations {
    pub fn from_config(config: &ExperimentConfig) -> Self {
        Self {
            word_ms: config.word_duration_ms,
            isi_ms: config.isi_ms,
            isi_jitter_ms: config.jitter_ms,
            pre_words_ms: config.pause_before_words_ms,
            pre_words_jitter_ms: config.jitter_before_words_ms,
            pre_recall_ms: config.pause_before_recall_ms,
            pre_recall_jitter_ms: config.jitter_before_recall_ms,
            recall_ms: config.recall_duration_ms,
        }
    }

    /// Shortest possible encoding period for a list of `words`.
    pub fn min_encoding_ms(&self, words: usize) -> u64 {
        self.word_ms + self.pre_words_ms + words as u64 * (self.isi_ms + self.word_ms)
    }
}

/// Screen-transition times of one list (local ns).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrialTimestamps {
    pub started: u64,
    pub orient: (u64, u64),
    pub words: Vec<(u64, u64)>,
    pub recall_orient: u64,
    pub recording: (u64, u64),
}

impl TrialTimestamps {
    /// Offset of the last word, where the encoding phase ends.
    pub fn encoding_end(&self) -> Option<u64> {
        self.words.last().map(|&(_, off)| off)
    }
}
