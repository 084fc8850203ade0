use std::fmt;

use serde::{Deserialize, Serialize};

/// Defines session phases and how they follow each other
pub trait Phase: Copy + Clone + PartialEq + Send + Sync + std::fmt::Debug + Default {
    /// Successor in the normal flow of a session with `trials` lists.
    fn next(&self, trials: usize) -> Option<Self>;
}

/// States of the session runner for one invocation.
#[derive(Copy, Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionPhase {
    #[default]
    NotInitialized,
    PracticePending,
    Encoding(usize),
    Recall(usize),
    SessionComplete,
    Rollover,
    OutOfSessions,
}

impl Phase for SessionPhase {
    fn next(&self, trials: usize) -> Option<Self> {
        use SessionPhase::*;
        Some(match *self {
            NotInitialized => PracticePending,
            PracticePending if trials == 0 => SessionComplete,
            PracticePending => Encoding(0),
            Encoding(i) => Recall(i),
            Recall(i) if i + 1 < trials => Encoding(i + 1),
            Recall(_) => SessionComplete,
            SessionComplete => Rollover,
            // the next session starts from a fresh invocation
            Rollover => NotInitialized,
            OutOfSessions => return None,
        })
    }
}

/// Names carried by `STATE` events. Which of them a given experiment accepts
/// is decided by its configured vocabulary, not by this enum.
#[derive(Copy, Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StateName {
    #[serde(rename = "PRACTICE")]
    Practice,
    #[serde(rename = "STIM ENCODING")]
    StimEncoding,
    #[serde(rename = "NON-STIM ENCODING")]
    NonStimEncoding,
    #[serde(rename = "RETRIEVAL")]
    Retrieval,
    #[serde(rename = "DISTRACT")]
    Distract,
    #[serde(rename = "INSTRUCT")]
    Instruct,
    #[serde(rename = "COUNTDOWN")]
    Countdown,
    #[serde(rename = "WAITING")]
    Waiting,
    #[serde(rename = "WORD")]
    Word,
    #[serde(rename = "ORIENT")]
    Orient,
    #[serde(rename = "MIC TEST")]
    MicTest,
}

impl StateName {
    pub const ALL: [StateName; 11] = [
        StateName::Practice,
        StateName::StimEncoding,
        StateName::NonStimEncoding,
        StateName::Retrieval,
        StateName::Distract,
        StateName::Instruct,
        StateName::Countdown,
        StateName::Waiting,
        StateName::Word,
        StateName::Orient,
        StateName::MicTest,
    ];

    pub const fn as_str(&self) -> &'static str {
        match self {
            StateName::Practice => "PRACTICE",
            StateName::StimEncoding => "STIM ENCODING",
            StateName::NonStimEncoding => "NON-STIM ENCODING",
            StateName::Retrieval => "RETRIEVAL",
            StateName::Distract => "DISTRACT",
            StateName::Instruct => "INSTRUCT",
            StateName::Countdown => "COUNTDOWN",
            StateName::Waiting => "WAITING",
            StateName::Word => "WORD",
            StateName::Orient => "ORIENT",
            StateName::MicTest => "MIC TEST",
        }
    }

    /// Encoding phase name for a list with the given stim status.
    pub const fn encoding(is_stim: bool) -> Self {
        if is_stim {
            StateName::StimEncoding
        } else {
            StateName::NonStimEncoding
        }
    }

    /// Session-log label: spaces become underscores, e.g. `MIC_TEST_START`.
    pub fn log_label(&self) -> String {
        self.as_str().replace(' ', "_")
    }
}

impl fmt::Display for StateName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
