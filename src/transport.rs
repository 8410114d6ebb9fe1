//! The `Transport` trait and connection-state types the orchestrator
//! consumes.
//!
//! Grounded on teacher's `AttClient`/`L2capManager` split between a
//! synchronous write and an asynchronous notification callback — this
//! crate never implements a concrete BLE transport (that's the explicit
//! "BLE transport primitives" Non-goal), just the seam.

use crate::error::Error;

/// High-level connection lifecycle, as tracked by [`crate::client::Flic2Client`].
///
/// `models.py::ConnectionState` has an extra `PAIRED` state between
/// `PAIRING` and `QUICK_VERIFYING`/`READY`; this crate follows the
/// distilled specification's simpler five-state version instead, since a
/// button only ever needs Quick Verify *or* a bare `READY` transition
/// after a Full Verify completes, not a separate paired-but-not-yet-ready
/// state in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Pairing,
    QuickVerifying,
    Ready,
}

/// A transport-level notification: either raw protocol bytes pushed from
/// the button, or the link going away.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    Data(Vec<u8>),
    Disconnected,
}

/// A BLE link to a single Flic 2 button. Implementations own GATT
/// connect/write/notify plumbing; this crate only calls through the trait.
pub trait Transport: Send + Sync {
    /// Open the link. Must not return until connected or failed.
    fn connect(&self) -> Result<(), Error>;

    fn disconnect(&self) -> Result<(), Error>;

    /// Write a framed packet to the button's write characteristic.
    fn write(&self, data: &[u8]) -> Result<(), Error>;

    /// Register a callback invoked from a transport-owned thread for every
    /// inbound notification and on disconnect. Only one subscriber is
    /// supported at a time, mirroring a single GATT notify callback slot.
    fn subscribe(&self, on_event: Box<dyn Fn(TransportEvent) + Send + Sync>);
}
