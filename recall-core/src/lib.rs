pub mod error;
pub mod phase;
pub mod trial;

pub use error::{Error, Result};
pub use phase::{Phase, SessionPhase, StateName};
pub use trial::{PracticeList, Trial, WordList};
