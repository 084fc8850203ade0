use recall_core::{Error, Result, StateName};

/// The fixed set of `STATE` names one experiment variant may emit.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PhaseVocabulary {
    names: Vec<String>,
}

impl PhaseVocabulary {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
        }
    }

    pub fn from_states(states: &[StateName]) -> Self {
        Self::new(states.iter().map(StateName::as_str))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name)
    }

    pub fn check(&self, name: &str) -> Result<()> {
        if self.contains(name) {
            Ok(())
        } else {
            Err(Error::protocol(format!(
                "improper state {name:?} not in list of states {:?}",
                self.names
            )))
        }
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}
