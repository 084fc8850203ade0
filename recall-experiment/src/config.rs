use std::path::{Path, PathBuf};

use recall_core::{Error, Result, StateName};
use recall_sync::PhaseVocabulary;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StimType {
    ClosedStim,
    NoStim,
}

impl StimType {
    pub const fn as_str(&self) -> &'static str {
        match self {
            StimType::ClosedStim => "CLOSED_STIM",
            StimType::NoStim => "NO_STIM",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BeepConfig {
    pub freq_hz: u32,
    pub duration_ms: u64,
    pub rise_fall_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MathConfig {
    pub num_vars: u32,
    pub max_probs: u32,
    pub plus_and_minus: bool,
    pub min_duration_ms: u64,
}

impl Default for MathConfig {
    fn default() -> Self {
        Self {
            num_vars: 3,
            max_probs: 50,
            plus_and_minus: false,
            min_duration_ms: 20_000,
        }
    }
}

/// Experiment configuration. Resource paths are relative to
/// `resource_root`; a `%s` in them is replaced by the language code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExperimentConfig {
    pub experiment: String,
    pub version: String,
    pub stim_type: String,
    pub control_pc: bool,
    pub heartbeat_interval_ms: u64,
    pub sync_count: usize,
    pub state_list: Vec<String>,

    pub num_sessions: usize,
    pub trials_per_session: usize,
    pub n_baseline_trials: usize,
    pub n_stim_trials: usize,
    pub n_control_trials: usize,
    pub list_length: usize,

    pub language: String,
    pub resource_root: PathBuf,
    pub word_pool: String,
    pub practice_pool: String,
    pub word_list_dir: String,
    pub default_font: String,
    pub intro_file: String,
    pub post_practice_file: String,
    pub countdown_movie: String,

    pub word_duration_ms: u64,
    pub isi_ms: u64,
    pub jitter_ms: u64,
    pub pause_before_words_ms: u64,
    pub jitter_before_words_ms: u64,
    pub pause_before_recall_ms: u64,
    pub jitter_before_recall_ms: u64,
    pub recall_duration_ms: u64,

    pub start_beep: BeepConfig,
    pub stop_beep: BeepConfig,

    /// Skips the key gate before each list and the end-of-list distractor.
    pub fast_config: bool,
    pub do_math_distract: bool,
    /// Distractor after every word instead of once per list.
    pub continuous_distract: bool,
    pub math: MathConfig,

    pub orient_text: String,
    pub recall_start_text: String,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self::fr1()
    }
}

const COMMON_STATES: [StateName; 9] = [
    StateName::Practice,
    StateName::Retrieval,
    StateName::Distract,
    StateName::Instruct,
    StateName::Countdown,
    StateName::Waiting,
    StateName::Word,
    StateName::Orient,
    StateName::MicTest,
];

fn vocabulary_with(encoding: &[StateName]) -> Vec<String> {
    let mut names: Vec<String> = encoding.iter().map(|s| s.as_str().to_owned()).collect();
    names.extend(COMMON_STATES.iter().map(|s| s.as_str().to_owned()));
    names
}

impl ExperimentConfig {
    /// Record-only free recall: every list is a control list.
    pub fn fr1() -> Self {
        Self {
            experiment: "FR1".into(),
            version: "1.0.0".into(),
            stim_type: StimType::NoStim.as_str().into(),
            control_pc: true,
            heartbeat_interval_ms: 1000,
            sync_count: 5,
            state_list: vocabulary_with(&[StateName::NonStimEncoding]),
            num_sessions: 18,
            trials_per_session: 25,
            n_baseline_trials: 0,
            n_stim_trials: 0,
            n_control_trials: 25,
            list_length: 12,
            language: "EN".into(),
            resource_root: PathBuf::from("."),
            word_pool: "pools_%s/ram_wordpool.txt".into(),
            practice_pool: "pools_%s/practice_wordpool.txt".into(),
            word_list_dir: "pools_%s/nonstim_lists".into(),
            default_font: "fonts/Verdana.ttf".into(),
            intro_file: "text_%s/intro.txt".into(),
            post_practice_file: "text_%s/post_practiceList.txt".into(),
            countdown_movie: "video/countdown.mpg".into(),
            word_duration_ms: 1600,
            isi_ms: 750,
            jitter_ms: 250,
            pause_before_words_ms: 1000,
            jitter_before_words_ms: 400,
            pause_before_recall_ms: 1200,
            jitter_before_recall_ms: 400,
            recall_duration_ms: 30_000,
            start_beep: BeepConfig {
                freq_hz: 800,
                duration_ms: 500,
                rise_fall_ms: 100,
            },
            stop_beep: BeepConfig {
                freq_hz: 400,
                duration_ms: 500,
                rise_fall_ms: 100,
            },
            fast_config: false,
            do_math_distract: true,
            continuous_distract: false,
            math: MathConfig::default(),
            orient_text: "+".into(),
            recall_start_text: "*******".into(),
        }
    }

    /// Closed-loop stimulation: baseline lists, then stim and control lists
    /// interleaved.
    pub fn fr3() -> Self {
        Self {
            experiment: "FR3".into(),
            version: "3.0".into(),
            stim_type: StimType::ClosedStim.as_str().into(),
            state_list: vocabulary_with(&[StateName::StimEncoding, StateName::NonStimEncoding]),
            num_sessions: 10,
            n_baseline_trials: 3,
            n_stim_trials: 11,
            n_control_trials: 11,
            word_list_dir: "pools_%s/stim_lists".into(),
            ..Self::fr1()
        }
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        Self::load_over(path, Self::default())
    }

    /// Reads a partial JSON file; keys it names replace those of `base`.
    pub fn load_over(path: impl AsRef<Path>, base: Self) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(Error::missing(path));
        }
        let contents = std::fs::read_to_string(path)?;
        let overrides: Value = serde_json::from_str(&contents)?;
        let Value::Object(overrides) = overrides else {
            return Err(Error::config(format!(
                "{}: configuration must be a JSON object",
                path.display()
            )));
        };
        let mut merged = serde_json::to_value(base)?;
        if let Value::Object(fields) = &mut merged {
            fields.extend(overrides);
        }
        Ok(serde_json::from_value(merged)?)
    }

    pub fn stim_type(&self) -> Result<StimType> {
        match self.stim_type.as_str() {
            "CLOSED_STIM" => Ok(StimType::ClosedStim),
            "NO_STIM" => Ok(StimType::NoStim),
            other => Err(Error::config(format!("STIM TYPE:{other} not recognized"))),
        }
    }

    /// Reported to the control PC with the `SESSION` event.
    pub fn session_type(&self) -> &str {
        &self.stim_type
    }

    pub fn is_stim_experiment(&self) -> bool {
        matches!(self.stim_type(), Ok(StimType::ClosedStim))
    }

    pub fn language_name(&self) -> Result<&'static str> {
        match self.language.as_str() {
            "EN" => Ok("english"),
            "SP" => Ok("spanish"),
            other => Err(Error::config(format!("unsupported language {other:?}"))),
        }
    }

    pub fn total_trials(&self) -> usize {
        self.n_baseline_trials + self.n_stim_trials + self.n_control_trials
    }

    pub fn resource(&self, pattern: &str) -> PathBuf {
        self.resource_root.join(pattern.replace("%s", &self.language))
    }

    pub fn vocabulary(&self) -> PhaseVocabulary {
        PhaseVocabulary::new(self.state_list.iter().cloned())
    }

    fn required_files(&self) -> [&str; 6] {
        [
            self.word_pool.as_str(),
            self.practice_pool.as_str(),
            self.default_font.as_str(),
            self.intro_file.as_str(),
            self.post_practice_file.as_str(),
            self.countdown_movie.as_str(),
        ]
    }

    /// Pre-flight check; nothing may be randomized before this passes.
    pub fn validate(&self) -> Result<()> {
        self.check_counts()?;
        for file in self.required_files() {
            let path = self.resource(file);
            if !path.is_file() {
                return Err(Error::missing(path));
            }
        }
        let lists = self.resource(&self.word_list_dir);
        if !lists.is_dir() {
            return Err(Error::missing(lists));
        }
        Ok(())
    }

    /// The part of [`validate`](Self::validate) that does not touch the
    /// filesystem.
    pub fn check_counts(&self) -> Result<()> {
        let stim = self.stim_type()?;
        self.language_name()?;
        if self.trials_per_session != self.total_trials() {
            return Err(Error::config(format!(
                "trials_per_session ({}) != n_baseline_trials ({}) + n_stim_trials ({}) + n_control_trials ({})",
                self.trials_per_session,
                self.n_baseline_trials,
                self.n_stim_trials,
                self.n_control_trials
            )));
        }
        if self.trials_per_session == 0 || self.num_sessions == 0 || self.list_length == 0 {
            return Err(Error::config(
                "sessions, trials per session and list length must be positive",
            ));
        }
        match stim {
            StimType::ClosedStim if self.n_stim_trials == 0 => Err(Error::config(
                "CLOSED_STIM experiment configured without stim trials",
            )),
            StimType::NoStim if self.n_stim_trials > 0 => Err(Error::config(
                "NO_STIM experiment configured with stim trials",
            )),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets_are_consistent() {
        ExperimentConfig::fr1().check_counts().unwrap();
        ExperimentConfig::fr3().check_counts().unwrap();
        assert!(ExperimentConfig::fr3().is_stim_experiment());
        assert!(!ExperimentConfig::fr1().is_stim_experiment());
    }

    #[test]
    fn fr1_vocabulary_has_no_stim_encoding() {
        let vocab = ExperimentConfig::fr1().vocabulary();
        assert!(vocab.contains("NON-STIM ENCODING"));
        assert!(!vocab.contains("STIM ENCODING"));
        assert!(ExperimentConfig::fr3().vocabulary().contains("STIM ENCODING"));
    }

    #[test]
    fn bad_trial_math_is_rejected() {
        let config = ExperimentConfig {
            trials_per_session: 24,
            ..ExperimentConfig::fr3()
        };
        assert!(matches!(config.check_counts(), Err(Error::Configuration(_))));
    }

    #[test]
    fn unknown_stim_type_and_language_are_rejected() {
        let config = ExperimentConfig {
            stim_type: "OPEN_STIM".into(),
            ..ExperimentConfig::fr1()
        };
        assert!(config.stim_type().is_err());
        let config = ExperimentConfig {
            language: "DE".into(),
            ..ExperimentConfig::fr1()
        };
        assert!(matches!(config.check_counts(), Err(Error::Configuration(_))));
    }

    #[test]
    fn language_is_substituted_into_paths() {
        let config = ExperimentConfig {
            language: "SP".into(),
            resource_root: PathBuf::from("/opt/fr"),
            ..ExperimentConfig::fr3()
        };
        assert_eq!(
            config.resource(&config.word_list_dir),
            PathBuf::from("/opt/fr/pools_SP/stim_lists")
        );
        assert_eq!(config.language_name().unwrap(), "spanish");
    }

    #[test]
    fn partial_json_overlays_defaults() {
        let config: ExperimentConfig =
            serde_json::from_str(r#"{"experiment": "FR1", "fast_config": true, "num_sessions": 2}"#)
                .unwrap();
        assert!(config.fast_config);
        assert_eq!(config.num_sessions, 2);
        assert_eq!(config.word_duration_ms, 1600);
    }

    #[test]
    fn file_overlays_the_chosen_preset() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fr3.json");
        std::fs::write(&path, r#"{"num_sessions": 4, "language": "SP"}"#).unwrap();
        let config = ExperimentConfig::load_over(&path, ExperimentConfig::fr3()).unwrap();
        assert_eq!(config.num_sessions, 4);
        assert_eq!(config.language, "SP");
        assert_eq!(config.n_stim_trials, 11);
        assert!(config.is_stim_experiment());

        std::fs::write(&path, "[1, 2]").unwrap();
        assert!(matches!(
            ExperimentConfig::load(&path),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn missing_resource_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let config = ExperimentConfig {
            resource_root: dir.path().to_path_buf(),
            ..ExperimentConfig::fr1()
        };
        assert!(matches!(config.validate(), Err(Error::MissingResource { .. })));
    }
}
