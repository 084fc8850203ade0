pub mod allocation;
pub mod config;
pub mod distractor;
pub mod pool;
pub mod presentation;
pub mod session;
pub mod state;
pub mod trial;

pub use allocation::{Allocation, AllocationInput, SessionSource, TrialCounts, allocate, subject_rng};
pub use config::{BeepConfig, ExperimentConfig, MathConfig, StimType};
pub use presentation::{AudioRecorder, Edge, EdgeFn, LogSink, Presenter, Question, Recording};
pub use session::{JsonStateStore, MemoryStateStore, SessionState, SessionUpdate, StateStore};
pub use state::{Collaborators, SessionOutcome, SessionRunner};
pub use trial::{TrialDurations, TrialTimestamps};
