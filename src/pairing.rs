//! The Full Verify (pairing) and Quick Verify (reconnection) handshake
//! state machine.
//!
//! Grounded on `examples/original_source/.../protocol/state_machine.py`
//! and teacher's `smp/pairing.rs::PairingProcess`/`PairingState` for the
//! state-enum-plus-context shape. The Python original drives this with an
//! async `send_func`; this crate follows teacher's synchronous,
//! thread-and-callback model instead (no async runtime anywhere in the
//! dependency graph).

use log::{debug, error, info, warn};
use rand::RngCore;
use rand_core::OsRng;
use x25519_dalek::{PublicKey, StaticSecret};

use crate::credentials::{ButtonInfo, PairingCredentials};
use crate::crypto;
use crate::error::{Error, FullVerifyFailReason, PairingError, QuickVerifyFailReason};
use crate::packet::{opcode, Packet, PacketDecoder, PacketEncoder};

/// Pairing state machine states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairingState {
    Idle,
    FullVerifyRequest1Sent,
    FullVerifyRequest2Sent,
    FullVerifyComplete,
    QuickVerifyRequestSent,
    QuickVerifyComplete,
    Failed,
}

/// Mutable working state for one handshake attempt.
#[derive(Default)]
pub struct PairingContext {
    pub tmp_id: [u8; 4],
    pub our_private_key: Option<StaticSecret>,
    pub our_public_key: Option<PublicKey>,

    pub button_signature: Option<[u8; 64]>,
    pub button_address: Option<[u8; 6]>,
    pub button_address_type: Option<u8>,
    pub button_ecdh_pubkey: Option<[u8; 32]>,
    pub button_random: Option<[u8; 8]>,

    pub client_random: [u8; 8],

    pub sig_bits: Option<u8>,
    pub shared_secret: Option<[u8; 32]>,
    pub full_verify_secret: Option<[u8; 32]>,
    pub verifier: Option<[u8; 16]>,
    pub session_key: Option<[u8; 16]>,
    pub pairing_id: Option<[u8; 4]>,
    pub pairing_key: Option<[u8; 16]>,

    pub button_uuid: String,
    pub button_name: String,
    pub button_serial: String,
    pub button_firmware: u32,
    pub button_battery: u8,

    pub conn_id: u8,
    pub error_reason: Option<u8>,
}

impl PairingContext {
    fn fresh() -> Self {
        let mut tmp_id = [0u8; 4];
        OsRng.fill_bytes(&mut tmp_id);
        let mut client_random = [0u8; 8];
        OsRng.fill_bytes(&mut client_random);
        Self {
            tmp_id,
            client_random,
            ..Default::default()
        }
    }
}

/// Outcome of a completed Full Verify.
pub struct FullVerifyOutcome {
    pub credentials: PairingCredentials,
    pub button_info: ButtonInfo,
    pub session_key: [u8; 16],
}

/// Drives one Full Verify or Quick Verify attempt to completion.
///
/// Owns a [`PacketEncoder`]/[`PacketDecoder`] pair, wiring the negotiated
/// session key into both the instant it's derived, exactly as
/// `PairingStateMachine` does in the Python original.
pub struct PairingStateMachine<'a> {
    send: Box<dyn Fn(&[u8]) -> Result<(), Error> + 'a>,
    stored_credentials: Option<PairingCredentials>,

    pub state: PairingState,
    pub ctx: PairingContext,

    encoder: PacketEncoder,
    decoder: PacketDecoder,
}

impl<'a> PairingStateMachine<'a> {
    pub fn new(send: Box<dyn Fn(&[u8]) -> Result<(), Error> + 'a>, stored_credentials: Option<PairingCredentials>) -> Self {
        Self {
            send,
            stored_credentials,
            state: PairingState::Idle,
            ctx: PairingContext::default(),
            encoder: PacketEncoder::new(),
            decoder: PacketDecoder::new(),
        }
    }

    pub fn start_full_verify(&mut self) -> Result<(), Error> {
        debug!("starting full verify pairing");
        self.ctx = PairingContext::fresh();
        let (private_key, public_key) = crypto::generate_keypair();
        self.ctx.our_private_key = Some(private_key);
        self.ctx.our_public_key = Some(public_key);

        let packet = self.encoder.encode_full_verify_request_1(&self.ctx.tmp_id);
        (self.send)(&packet)?;

        self.state = PairingState::FullVerifyRequest1Sent;
        debug!("sent FullVerifyRequest1 tmp_id={}", hex::encode(self.ctx.tmp_id));
        Ok(())
    }

    pub fn start_quick_verify(&mut self) -> Result<(), Error> {
        let stored = self
            .stored_credentials
            .clone()
            .ok_or(Error::Pairing(PairingError::NoPairingExists))?;

        debug!("starting quick verify reconnection");
        self.ctx = PairingContext::fresh();

        let packet = self.encoder.encode_quick_verify_request(
            &stored.pairing_id,
            &self.ctx.client_random,
            &self.ctx.tmp_id,
            0,
        );
        (self.send)(&packet)?;

        self.state = PairingState::QuickVerifyRequestSent;
        debug!("sent QuickVerifyRequest pairing_id={}", hex::encode(stored.pairing_id));
        Ok(())
    }

    /// Feed an inbound packet to the state machine. Returns `Ok(true)` once
    /// the handshake has completed (Full Verify or Quick Verify).
    pub fn handle_packet(&mut self, data: &[u8]) -> Result<bool, Error> {
        let packet = self.decoder.decode(data, false)?;
        debug!("received packet opcode={:#04x} state={:?}", packet.opcode, self.state);

        match self.state {
            PairingState::FullVerifyRequest1Sent => self.handle_full_verify_response_1(&packet),
            PairingState::FullVerifyRequest2Sent => self.handle_full_verify_response_2(&packet),
            PairingState::QuickVerifyRequestSent => self.handle_quick_verify_response(&packet),
            _ => Ok(false),
        }
    }

    fn handle_full_verify_response_1(&mut self, packet: &Packet) -> Result<bool, Error> {
        if packet.opcode == opcode::FULL_VERIFY_FAIL_RESPONSE_1 {
            let reason = packet.payload.first().copied().unwrap_or(0);
            self.ctx.error_reason = Some(reason);
            self.state = PairingState::Failed;
            let reason = FullVerifyFailReason::from_byte(reason);
            error!("full verify failed at step 1: {reason}");
            return Err(Error::Pairing(PairingError::FullVerify(reason)));
        }

        if packet.opcode != opcode::FULL_VERIFY_RESPONSE_1 {
            warn!("unexpected opcode in state {:?}: {:#04x}", self.state, packet.opcode);
            return Err(Error::Pairing(PairingError::UnexpectedOpcode {
                opcode: packet.opcode,
                state: "FullVerifyRequest1Sent",
            }));
        }

        let response = self.decoder.decode_full_verify_response_1(&packet.payload)?;

        if response.is_public_mode == Some(false) {
            self.state = PairingState::Failed;
            error!("button is not in pairing mode");
            return Err(Error::Pairing(PairingError::NotInPairingMode));
        }

        let sig_bits = crypto::verify_button_identity(
            &response.signature,
            &response.address,
            response.address_type,
            &response.ecdh_pubkey,
        )?;
        debug!("ed25519 verified, sig_bits={sig_bits}");

        let our_private_key = self.ctx.our_private_key.as_ref().expect("keypair generated in start_full_verify");
        let shared_secret = crypto::compute_shared_secret(our_private_key, &response.ecdh_pubkey);

        let full_verify_secret =
            crypto::derive_full_verify_secret(&shared_secret, sig_bits, &response.button_random, &self.ctx.client_random);
        let verifier = crypto::derive_verifier(&full_verify_secret);
        let session_key = crypto::derive_session_key(&full_verify_secret);
        let (pairing_id, pairing_key) = crypto::derive_pairing_data(&full_verify_secret);

        self.ctx.button_signature = Some(response.signature);
        self.ctx.button_address = Some(response.address);
        self.ctx.button_address_type = Some(response.address_type);
        self.ctx.button_ecdh_pubkey = Some(response.ecdh_pubkey);
        self.ctx.button_random = Some(response.button_random);
        self.ctx.sig_bits = Some(sig_bits);
        self.ctx.shared_secret = Some(shared_secret);
        self.ctx.full_verify_secret = Some(full_verify_secret);
        self.ctx.verifier = Some(verifier);
        self.ctx.session_key = Some(session_key);
        self.ctx.pairing_id = Some(pairing_id);
        self.ctx.pairing_key = Some(pairing_key);
        self.ctx.conn_id = packet.conn_id;

        let our_public_key = self.ctx.our_public_key.as_ref().expect("keypair generated in start_full_verify");
        let request = self.encoder.encode_full_verify_request_2(
            our_public_key.as_bytes(),
            &self.ctx.client_random,
            &verifier,
            self.ctx.conn_id,
        );
        (self.send)(&request)?;

        self.encoder.set_session_key(&session_key);
        self.decoder.set_session_key(&session_key);

        self.state = PairingState::FullVerifyRequest2Sent;
        debug!("sent FullVerifyRequest2");
        Ok(false)
    }

    fn handle_full_verify_response_2(&mut self, packet: &Packet) -> Result<bool, Error> {
        if packet.opcode == opcode::FULL_VERIFY_FAIL_RESPONSE_2 {
            let reason = packet.payload.first().copied().unwrap_or(0);
            self.ctx.error_reason = Some(reason);
            self.state = PairingState::Failed;
            let reason = FullVerifyFailReason::from_byte(reason);
            error!("full verify failed at step 2: {reason}");
            return Err(Error::Pairing(PairingError::FullVerify(reason)));
        }

        let info = match self.decoder.decode_full_verify_response_2(&packet.payload) {
            Ok(info) => info,
            Err(e) => {
                warn!("failed to decode button info, using defaults: {e}");
                crate::packet::ButtonInfoWire {
                    uuid: String::new(),
                    name: "Flic 2".to_string(),
                    serial_number: String::new(),
                    firmware_version: 0,
                    battery_level: 0,
                }
            }
        };

        info!("paired with button: {} ({})", info.name, info.uuid);
        self.ctx.button_uuid = info.uuid;
        self.ctx.button_name = info.name;
        self.ctx.button_serial = info.serial_number;
        self.ctx.button_firmware = info.firmware_version;
        self.ctx.button_battery = info.battery_level;

        self.state = PairingState::FullVerifyComplete;
        Ok(true)
    }

    fn handle_quick_verify_response(&mut self, packet: &Packet) -> Result<bool, Error> {
        if packet.opcode == opcode::NO_PAIRING_EXISTS {
            self.state = PairingState::Failed;
            error!("quick verify failed: no pairing exists on button");
            return Err(Error::Pairing(PairingError::NoPairingExists));
        }

        if packet.opcode == opcode::QUICK_VERIFY_FAIL {
            let reason = packet.payload.first().copied().unwrap_or(0);
            self.ctx.error_reason = Some(reason);
            self.state = PairingState::Failed;
            let reason = QuickVerifyFailReason::from_byte(reason);
            error!("quick verify failed: {reason}");
            return Err(Error::Pairing(PairingError::QuickVerify(reason)));
        }

        if packet.opcode != opcode::QUICK_VERIFY_RESPONSE {
            warn!("unexpected opcode in state {:?}: {:#04x}", self.state, packet.opcode);
            return Err(Error::Pairing(PairingError::UnexpectedOpcode {
                opcode: packet.opcode,
                state: "QuickVerifyRequestSent",
            }));
        }

        let button_random = self.decoder.decode_quick_verify_response(&packet.payload)?;
        self.ctx.button_random = Some(button_random);
        self.ctx.conn_id = packet.conn_id;

        let stored = self
            .stored_credentials
            .as_ref()
            .expect("stored_credentials present: checked in start_quick_verify");
        let session_key = crypto::derive_quick_verify_session_key(&stored.pairing_key, &self.ctx.client_random, &button_random);

        self.ctx.session_key = Some(session_key);
        self.encoder.set_session_key(&session_key);
        self.decoder.set_session_key(&session_key);

        self.state = PairingState::QuickVerifyComplete;
        Ok(true)
    }

    pub fn is_complete(&self) -> bool {
        matches!(self.state, PairingState::FullVerifyComplete | PairingState::QuickVerifyComplete)
    }

    pub fn is_failed(&self) -> bool {
        self.state == PairingState::Failed
    }

    pub fn full_verify_outcome(&self) -> Option<FullVerifyOutcome> {
        if self.state != PairingState::FullVerifyComplete {
            return None;
        }
        let address = self
            .ctx
            .button_address
            .map(hex::encode)
            .unwrap_or_default();

        let credentials = PairingCredentials {
            address: address.clone(),
            pairing_id: self.ctx.pairing_id?,
            pairing_key: self.ctx.pairing_key?,
            button_uuid: self.ctx.button_uuid.clone(),
            name: self.ctx.button_name.clone(),
            serial_number: self.ctx.button_serial.clone(),
            firmware_version: self.ctx.button_firmware,
            last_boot_id: None,
            last_event_count: None,
        };

        let button_info = ButtonInfo {
            address,
            uuid: self.ctx.button_uuid.clone(),
            name: self.ctx.button_name.clone(),
            serial_number: self.ctx.button_serial.clone(),
            firmware_version: self.ctx.button_firmware,
            battery_level: Some(self.ctx.button_battery),
        };

        Some(FullVerifyOutcome {
            credentials,
            button_info,
            session_key: self.ctx.session_key?,
        })
    }

    pub fn session_key(&self) -> Option<[u8; 16]> {
        self.ctx.session_key
    }

    pub fn conn_id(&self) -> u8 {
        self.ctx.conn_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[test]
    fn start_full_verify_sends_request_1_and_advances_state() {
        let sent = RefCell::new(Vec::new());
        let mut machine = PairingStateMachine::new(
            Box::new(|data: &[u8]| {
                sent.borrow_mut().push(data.to_vec());
                Ok(())
            }),
            None,
        );

        machine.start_full_verify().unwrap();

        assert_eq!(machine.state, PairingState::FullVerifyRequest1Sent);
        assert_eq!(sent.borrow().len(), 1);
        assert_eq!(sent.borrow()[0][1], opcode::FULL_VERIFY_REQUEST_1);
    }

    #[test]
    fn quick_verify_requires_stored_credentials() {
        let mut machine = PairingStateMachine::new(Box::new(|_: &[u8]| Ok(())), None);
        let result = machine.start_quick_verify();
        assert!(matches!(result, Err(Error::Pairing(PairingError::NoPairingExists))));
    }

    #[test]
    fn full_verify_fail_response_1_surfaces_reason() {
        let mut machine = PairingStateMachine::new(Box::new(|_: &[u8]| Ok(())), None);
        machine.start_full_verify().unwrap();

        let fail_packet = [0u8, opcode::FULL_VERIFY_FAIL_RESPONSE_1, 2]; // NOT_IN_PUBLIC_MODE
        let result = machine.handle_packet(&fail_packet);
        assert!(matches!(
            result,
            Err(Error::Pairing(PairingError::FullVerify(FullVerifyFailReason::NotInPublicMode)))
        ));
        assert_eq!(machine.state, PairingState::Failed);
    }
}
