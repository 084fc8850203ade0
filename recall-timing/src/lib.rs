pub mod clock;
pub mod timer;

pub use clock::PresentationClock;
pub use timer::{HighPrecisionTimer, Timer, VirtualTimer, ns_to_ms};
