//! flic2 - a client core for the Flic 2 button's proprietary BLE protocol
//!
//! This crate implements packet framing, the Chaskey-LTS MAC, the Full
//! Verify (X25519/Ed25519) and Quick Verify pairing handshakes, the
//! post-session request/response/event protocol, and the button event
//! decoder. It does not implement BLE transport, discovery, or persistent
//! credential storage — those are consumed as the [`transport::Transport`]
//! and [`credentials::CredentialStore`] traits.

pub mod chaskey;
pub mod client;
pub mod credentials;
pub mod crypto;
pub mod error;
pub mod event;
pub mod packet;
pub mod pairing;
pub mod session;
pub mod transport;

pub use chaskey::ChaskeyKey;
pub use client::Flic2Client;
pub use credentials::{ButtonInfo, CredentialStore, MemoryCredentialStore, PairingCredentials};
pub use error::{DisconnectReason, Error, FullVerifyFailReason, PairingError, QuickVerifyFailReason, Result};
pub use event::{ButtonEvent, ButtonEventClass, ButtonEventType};
pub use packet::{opcode, Packet};
pub use pairing::PairingState;
pub use session::SessionState;
pub use transport::{ConnectionState, Transport};
