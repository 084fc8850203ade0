use std::time::Duration;

use recall_core::Result;

use crate::protocol::SyncEvent;

/// Transport to the control PC.
///
/// `round_trip` and `handshake` block until the host answers; `send` must
/// only enqueue.
pub trait ControlLink {
    fn handshake(&mut self, hello: SyncEvent) -> Result<()>;

    /// Sends a `SYNC` probe and returns the remote clock reading (ms) from
    /// the matching reply.
    fn round_trip(&mut self, probe: SyncEvent) -> Result<f64>;

    fn send(&mut self, event: SyncEvent) -> Result<()>;

    /// Waits up to `timeout` for the host's start signal.
    fn poll_start(&mut self, timeout: Duration) -> Result<bool>;

    fn exit_requested(&self) -> bool;
}
