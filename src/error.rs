//! Error types for the Flic 2 client core.
//!
//! Mirrors the two-level shape used throughout this library: a narrow,
//! sub-domain error (`PairingError`) nested inside the crate-wide `Error`
//! via `#[from]`.

use thiserror::Error;

/// Reasons the button rejected a Full Verify (pairing) attempt.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FullVerifyFailReason {
    #[error("button rejected full verify for unknown reason {0}")]
    Unknown(u8),
    #[error("verifier did not match")]
    InvalidVerifier,
    #[error("button is not in public/pairing mode")]
    NotInPublicMode,
    #[error("button already holds the maximum number of pairings")]
    TooManyPairings,
    #[error("button is not in pairing mode")]
    NotInPairingMode,
}

impl FullVerifyFailReason {
    pub fn from_byte(value: u8) -> Self {
        match value {
            1 => Self::InvalidVerifier,
            2 => Self::NotInPublicMode,
            3 => Self::TooManyPairings,
            4 => Self::NotInPairingMode,
            other => Self::Unknown(other),
        }
    }
}

/// Reasons a Quick Verify (reconnection) attempt failed.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuickVerifyFailReason {
    #[error("button rejected quick verify for unknown reason {0}")]
    Unknown(u8),
    #[error("pairing id is not known to the button")]
    InvalidPairingId,
    #[error("session signature invalid")]
    InvalidSignature,
    #[error("button has no space left for this pairing")]
    NoSpace,
}

impl QuickVerifyFailReason {
    pub fn from_byte(value: u8) -> Self {
        match value {
            1 => Self::InvalidPairingId,
            2 => Self::InvalidSignature,
            3 => Self::NoSpace,
            other => Self::Unknown(other),
        }
    }
}

/// Reason the button gave for tearing down an established session.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    #[error("ping timeout")]
    PingTimeout,
    #[error("invalid signature")]
    InvalidSignature,
    #[error("button accepted a new connection")]
    NewConnection,
    #[error("disconnected by user")]
    ByUser,
    #[error("unknown disconnect reason {0}")]
    Unknown(u8),
}

impl DisconnectReason {
    pub fn from_byte(value: u8) -> Self {
        match value {
            0 => Self::PingTimeout,
            1 => Self::InvalidSignature,
            2 => Self::NewConnection,
            3 => Self::ByUser,
            other => Self::Unknown(other),
        }
    }
}

/// Errors specific to the pairing (Full Verify / Quick Verify) handshakes.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairingError {
    #[error("full verify failed: {0}")]
    FullVerify(FullVerifyFailReason),

    #[error("quick verify failed: {0}")]
    QuickVerify(QuickVerifyFailReason),

    #[error("no pairing exists on the button for the stored pairing id")]
    NoPairingExists,

    #[error("ed25519 or session signature verification failed")]
    InvalidSignature,

    #[error("button is not in public/pairing mode")]
    NotInPairingMode,

    #[error("unexpected opcode {opcode:#04x} while in state {state}")]
    UnexpectedOpcode { opcode: u8, state: &'static str },
}

/// Crate-wide error type.
#[derive(Error, Debug)]
pub enum Error {
    #[error("transport is not connected")]
    Connection,

    #[error("operation timed out")]
    Timeout,

    #[error("pairing error: {0}")]
    Pairing(#[from] PairingError),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("operation requires an established session")]
    NotPaired,

    #[error("credential store error: {0}")]
    Storage(String),

    #[error("the button closed the link: {0}")]
    Disconnected(DisconnectReason),
}

pub type Result<T> = std::result::Result<T, Error>;
