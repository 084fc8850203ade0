use serde::{Deserialize, Serialize};

/// Ordered word tokens shown in one trial.
pub type WordList = Vec<String>;

/// Shuffled copy of the practice vocabulary, one per session.
pub type PracticeList = Vec<String>;

/// One presented list plus its stimulation flag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trial {
    pub words: WordList,
    pub is_stim: bool,
}

impl Trial {
    pub fn new(words: WordList, is_stim: bool) -> Self {
        Self { words, is_stim }
    }
}
