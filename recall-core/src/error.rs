use std::path::PathBuf;

use thiserror::Error;

/// Every failure a session can end with. None of these are retried: the
/// caller shows the message to the operator and terminates.
#[derive(Debug, Error)]
pub enum Error {
    /// Inconsistent configuration or a broken calling contract, caught
    /// before anything is presented.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("missing resource: {}", path.display())]
    MissingResource { path: PathBuf },

    /// The runner asked for a phase name the control PC does not know.
    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("cannot connect to control PC: {0}")]
    Connection(String),

    #[error("aborted by operator: {0}")]
    OperatorAbort(String),

    #[error("control PC requested exit")]
    HostExit,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("malformed state: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Configuration(msg.into())
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        Error::Protocol(msg.into())
    }

    pub fn connection(msg: impl Into<String>) -> Self {
        Error::Connection(msg.into())
    }

    pub fn missing(path: impl Into<PathBuf>) -> Self {
        Error::MissingResource { path: path.into() }
    }

    /// Graceful stops are still terminal, but are not reported as faults.
    pub fn is_graceful(&self) -> bool {
        matches!(self, Error::OperatorAbort(_) | Error::HostExit)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_resource_names_the_path() {
        let err = Error::missing("pools_EN/ram_wordpool.txt");
        assert_eq!(
            err.to_string(),
            "missing resource: pools_EN/ram_wordpool.txt"
        );
        assert!(!err.is_graceful());
    }

    #[test]
    fn operator_abort_is_graceful() {
        assert!(Error::OperatorAbort("declined session".into()).is_graceful());
        assert!(Error::HostExit.is_graceful());
        assert!(!Error::protocol("BOGUS").is_graceful());
    }
}
