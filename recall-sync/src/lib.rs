//! Synchronization with the control PC.
//!
//! The client keeps an estimate of the offset between the local presentation
//! clock and the control PC's clock, and delivers the event stream that lets
//! recorded neural data be aligned with behavior afterwards. Alignment blocks
//! the caller for one round trip per probe; event sends only enqueue.
//!
//! With the control-PC switch off every network primitive is skipped, but
//! `STATE` names are still checked against the phase vocabulary so a drifted
//! vocabulary is caught while piloting.

pub mod client;
pub mod link;
pub mod offset;
pub mod protocol;
pub mod tcp;
pub mod vocabulary;

pub use client::{ConnectionSettings, SyncClient};
pub use link::ControlLink;
pub use offset::{ClockOffset, Probe};
pub use protocol::{EventKind, Inbound, SyncEvent};
pub use tcp::{TcpLink, TcpOptions};
pub use vocabulary::PhaseVocabulary;
