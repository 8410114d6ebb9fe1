//! Packet framing and opcode constants for the Flic 2 wire protocol.
//!
//! Grounded on `examples/original_source/.../protocol/packets.py` and
//! `protocol/opcodes.py`, and on the header byte layout documented in
//! `const.py`. Byte-field reads/writes use `byteorder`, the way teacher's
//! `l2cap/packet.rs` does for L2CAP framing.

use byteorder::{ByteOrder, LittleEndian};

use crate::chaskey::ChaskeyKey;
use crate::error::{Error, PairingError};

/// Flic 2 opcodes. Several values are reused across directions and protocol
/// phases (the button and client never speak both meanings of a colliding
/// opcode at once) — this mirrors the duplicate-valued `IntEnum` in
/// `protocol/opcodes.py`, which Python tolerates as aliasing. Rust allows
/// fieldless enums to share a discriminant too, but matching on a decoded
/// byte against two same-valued variants is ambiguous, so these are kept as
/// plain `u8` constants and interpreted by the caller's current phase —
/// exactly the shape teacher's `smp/constants.rs` uses for protocol bytes.
pub mod opcode {
    pub const FULL_VERIFY_REQUEST_1: u8 = 0x00;
    pub const FULL_VERIFY_RESPONSE_1: u8 = 0x00;
    pub const FULL_VERIFY_FAIL_RESPONSE_1: u8 = 0x01;
    pub const FULL_VERIFY_REQUEST_2: u8 = 0x02;
    pub const FULL_VERIFY_RESPONSE_2: u8 = 0x01;
    pub const FULL_VERIFY_FAIL_RESPONSE_2: u8 = 0x03;

    pub const QUICK_VERIFY_REQUEST: u8 = 0x05;
    pub const NO_PAIRING_EXISTS: u8 = 0x06;
    pub const QUICK_VERIFY_RESPONSE: u8 = 0x08;
    pub const QUICK_VERIFY_FAIL: u8 = 0x09;

    pub const INIT_BUTTON_EVENTS: u8 = 0x17;
    pub const INIT_BUTTON_EVENTS_RESPONSE: u8 = 0x0A;
    pub const INIT_BUTTON_EVENTS_NO_BOOT: u8 = 0x0B;
    pub const BUTTON_EVENT_NOTIFICATION: u8 = 0x0C;
    pub const DISCONNECTED_LINK: u8 = 0x09;

    pub const PING_REQUEST: u8 = 0x0E;
    pub const PING_RESPONSE: u8 = 0x0F;

    /// Event-listening-phase reuse of [`INIT_BUTTON_EVENTS`]: client tells
    /// the button how many queued events it has processed. Chosen because
    /// the two meanings never overlap in time — the init meaning only
    /// applies before the session reaches the event-listening phase.
    pub const ACK_BUTTON_EVENTS: u8 = INIT_BUTTON_EVENTS;
}

pub const SIGNATURE_LENGTH: usize = 5;
const CONN_ID_MASK: u8 = 0b0001_1111;
const NEWLY_ASSIGNED_BIT: u8 = 0b0010_0000;
const MULTI_BIT: u8 = 0b0100_0000;
const FRAGMENT_BIT: u8 = 0b1000_0000;

/// A decoded (or about-to-be-encoded) Flic 2 packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub conn_id: u8,
    pub newly_assigned: bool,
    pub is_multi: bool,
    pub is_fragment: bool,
    pub opcode: u8,
    pub payload: Vec<u8>,
    pub signature: Option<[u8; SIGNATURE_LENGTH]>,
}

impl Packet {
    pub fn header_byte(&self) -> u8 {
        let mut header = self.conn_id & CONN_ID_MASK;
        if self.newly_assigned {
            header |= NEWLY_ASSIGNED_BIT;
        }
        if self.is_multi {
            header |= MULTI_BIT;
        }
        if self.is_fragment {
            header |= FRAGMENT_BIT;
        }
        header
    }
}

/// Encodes outbound packets, signing them with the session's Chaskey key
/// once one has been negotiated.
pub struct PacketEncoder {
    chaskey: Option<ChaskeyKey>,
}

impl PacketEncoder {
    pub fn new() -> Self {
        Self { chaskey: None }
    }

    pub fn set_session_key(&mut self, key: &[u8; 16]) {
        self.chaskey = Some(ChaskeyKey::new(key));
    }

    /// Build a raw packet: header byte, opcode, payload, and (if `sign` and
    /// a session key is set) a trailing 5-byte Chaskey MAC.
    pub fn encode(&self, opcode: u8, payload: &[u8], conn_id: u8, newly_assigned: bool, sign: bool) -> Vec<u8> {
        let mut header = conn_id & CONN_ID_MASK;
        if newly_assigned {
            header |= NEWLY_ASSIGNED_BIT;
        }

        let mut packet = Vec::with_capacity(2 + payload.len() + SIGNATURE_LENGTH);
        packet.push(header);
        packet.push(opcode);
        packet.extend_from_slice(payload);

        if sign {
            if let Some(chaskey) = &self.chaskey {
                let signature = chaskey.mac5(&packet);
                packet.extend_from_slice(&signature);
            }
        }

        packet
    }

    /// `FullVerifyRequest1`: opcode + 4-byte tmp_id.
    pub fn encode_full_verify_request_1(&self, tmp_id: &[u8; 4]) -> Vec<u8> {
        self.encode(opcode::FULL_VERIFY_REQUEST_1, tmp_id, 0, false, false)
    }

    /// `FullVerifyRequest2`: pubkey(32) + client_random(8) + rfu(1) + verifier(16).
    pub fn encode_full_verify_request_2(
        &self,
        our_pubkey: &[u8; 32],
        client_random: &[u8; 8],
        verifier: &[u8; 16],
        conn_id: u8,
    ) -> Vec<u8> {
        let mut payload = Vec::with_capacity(32 + 8 + 1 + 16);
        payload.extend_from_slice(our_pubkey);
        payload.extend_from_slice(client_random);
        payload.push(0); // rfu
        payload.extend_from_slice(verifier);
        self.encode(opcode::FULL_VERIFY_REQUEST_2, &payload, conn_id, false, false)
    }

    /// `QuickVerifyRequest`: client_random(7) + flags(1) + tmp_id(4) + pairing_id(4).
    pub fn encode_quick_verify_request(
        &self,
        pairing_id: &[u8; 4],
        client_random: &[u8; 8],
        tmp_id: &[u8; 4],
        flags: u8,
    ) -> Vec<u8> {
        let mut payload = Vec::with_capacity(7 + 1 + 4 + 4);
        payload.extend_from_slice(&client_random[..7]);
        payload.push(flags);
        payload.extend_from_slice(tmp_id);
        payload.extend_from_slice(pairing_id);
        self.encode(opcode::QUICK_VERIFY_REQUEST, &payload, 0, false, false)
    }

    pub fn encode_ping(&self, conn_id: u8) -> Vec<u8> {
        self.encode(opcode::PING_REQUEST, &[], conn_id, false, true)
    }

    /// Event-listening-phase ACK: a plain 4-byte little-endian event count,
    /// reusing [`opcode::ACK_BUTTON_EVENTS`].
    pub fn encode_ack_button_events(&self, conn_id: u8, event_count: u32) -> Vec<u8> {
        let mut payload = [0u8; 4];
        LittleEndian::write_u32(&mut payload, event_count);
        self.encode(opcode::ACK_BUTTON_EVENTS, &payload, conn_id, false, true)
    }
}

impl Default for PacketEncoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Decodes inbound packets, verifying their trailing Chaskey MAC once a
/// session key has been set.
pub struct PacketDecoder {
    chaskey: Option<ChaskeyKey>,
}

impl PacketDecoder {
    pub fn new() -> Self {
        Self { chaskey: None }
    }

    pub fn set_session_key(&mut self, key: &[u8; 16]) {
        self.chaskey = Some(ChaskeyKey::new(key));
    }

    pub fn decode(&self, data: &[u8], verify_signature: bool) -> Result<Packet, Error> {
        if data.len() < 2 {
            return Err(Error::Protocol(format!("packet too short: {} bytes", data.len())));
        }

        let header = data[0];
        let opcode = data[1];

        let conn_id = header & CONN_ID_MASK;
        let newly_assigned = header & NEWLY_ASSIGNED_BIT != 0;
        let is_multi = header & MULTI_BIT != 0;
        let is_fragment = header & FRAGMENT_BIT != 0;

        let mut signature = None;
        let payload;

        if verify_signature && data.len() > SIGNATURE_LENGTH + 2 {
            let chaskey = self
                .chaskey
                .as_ref()
                .ok_or(Error::Pairing(PairingError::InvalidSignature))?;

            let split = data.len() - SIGNATURE_LENGTH;
            let (body, sig_bytes) = data.split_at(split);
            let expected = chaskey.mac5(body);
            if sig_bytes != expected {
                return Err(Error::Pairing(PairingError::InvalidSignature));
            }
            let mut sig = [0u8; SIGNATURE_LENGTH];
            sig.copy_from_slice(sig_bytes);
            signature = Some(sig);
            payload = data[2..split].to_vec();
        } else {
            payload = data[2..].to_vec();
        }

        Ok(Packet {
            conn_id,
            newly_assigned,
            is_multi,
            is_fragment,
            opcode,
            payload,
            signature,
        })
    }

    /// Verify and strip the 5-byte session MAC from an already-framed
    /// payload, binding `direction`/`counter` (used by the session engine
    /// for RX-counter enforcement rather than the pairing-time signature).
    pub fn verify_session_mac(&self, framed: &[u8], direction: u8, counter: u64) -> Result<(), Error> {
        let chaskey = self
            .chaskey
            .as_ref()
            .ok_or(Error::Pairing(PairingError::InvalidSignature))?;
        if framed.len() < SIGNATURE_LENGTH {
            return Err(Error::Pairing(PairingError::InvalidSignature));
        }
        let split = framed.len() - SIGNATURE_LENGTH;
        let (body, sig_bytes) = framed.split_at(split);
        let expected = chaskey.mac_with_dir_and_counter(body, direction, counter);
        if sig_bytes != expected {
            return Err(Error::Pairing(PairingError::InvalidSignature));
        }
        Ok(())
    }

    /// `FullVerifyResponse1`: tmp_id(4, echoed) + signature(64) + address(6)
    /// + address_type(1) + ecdh_pubkey(32) + button_random(8) [+ flags(1)].
    pub fn decode_full_verify_response_1(
        &self,
        payload: &[u8],
    ) -> Result<FullVerifyResponse1, Error> {
        if payload.len() < 115 {
            return Err(Error::Protocol(format!(
                "FullVerifyResponse1 too short: {} bytes, need at least 115",
                payload.len()
            )));
        }

        let mut offset = 4; // tmp_id echo
        let mut signature = [0u8; 64];
        signature.copy_from_slice(&payload[offset..offset + 64]);
        offset += 64;

        let mut address = [0u8; 6];
        address.copy_from_slice(&payload[offset..offset + 6]);
        offset += 6;

        let address_type = payload[offset];
        offset += 1;

        let mut ecdh_pubkey = [0u8; 32];
        ecdh_pubkey.copy_from_slice(&payload[offset..offset + 32]);
        offset += 32;

        let mut button_random = [0u8; 8];
        button_random.copy_from_slice(&payload[offset..offset + 8]);
        offset += 8;

        let is_public_mode = payload.get(offset).map(|flags| flags & 0b10 != 0);

        Ok(FullVerifyResponse1 {
            signature,
            address,
            address_type,
            ecdh_pubkey,
            button_random,
            is_public_mode,
        })
    }

    /// `FullVerifyResponse2`: uuid(16) + flags(1) + name_len(1) + name(24
    /// padded) + firmware(4) + battery(1) + serial (variable, terminated by
    /// a NUL or non-printable byte).
    pub fn decode_full_verify_response_2(&self, payload: &[u8]) -> Result<ButtonInfoWire, Error> {
        if payload.len() < 18 {
            return Err(Error::Protocol(format!(
                "FullVerifyResponse2 too short: {} bytes",
                payload.len()
            )));
        }

        let uuid_bytes = &payload[0..16];
        let uuid = format!(
            "{}-{}-{}-{}-{}",
            hex::encode(&uuid_bytes[0..4]),
            hex::encode(&uuid_bytes[4..6]),
            hex::encode(&uuid_bytes[6..8]),
            hex::encode(&uuid_bytes[8..10]),
            hex::encode(&uuid_bytes[10..16]),
        );

        let mut offset = 16;
        offset += 1; // flags

        let name_len = payload[offset] as usize;
        offset += 1;
        let name_raw = &payload[offset..(offset + name_len).min(payload.len())];
        let name = String::from_utf8_lossy(name_raw).trim_end_matches('\0').to_string();
        offset += name_len;

        let padding_len = 24usize.saturating_sub(name_len);
        offset += padding_len;

        let firmware_version = if offset + 4 <= payload.len() {
            let v = LittleEndian::read_u32(&payload[offset..offset + 4]);
            offset += 4;
            v
        } else {
            0
        };

        let battery_level = if offset < payload.len() {
            let v = payload[offset];
            offset += 1;
            v
        } else {
            0
        };

        if offset < payload.len() {
            offset += 1; // unused byte
        }

        let mut serial_number = String::new();
        if offset < payload.len() {
            let mut end = payload.len();
            for (i, &b) in payload[offset..].iter().enumerate() {
                if b == 0 || !(0x20..=0x7e).contains(&b) {
                    end = offset + i;
                    break;
                }
            }
            serial_number = String::from_utf8_lossy(&payload[offset..end]).to_string();
        }

        Ok(ButtonInfoWire {
            uuid,
            name,
            serial_number,
            firmware_version,
            battery_level,
        })
    }

    /// `QuickVerifyResponse`: button_random(8).
    pub fn decode_quick_verify_response(&self, payload: &[u8]) -> Result<[u8; 8], Error> {
        if payload.len() < 8 {
            return Err(Error::Protocol(format!(
                "QuickVerifyResponse too short: {} bytes",
                payload.len()
            )));
        }
        let mut random = [0u8; 8];
        random.copy_from_slice(&payload[..8]);
        Ok(random)
    }

    /// `InitButtonEventsResponse`: boot_id(4) + event_count(4) +
    /// timestamp_hi(4) + battery_level(1).
    pub fn decode_init_button_events_response(&self, payload: &[u8]) -> InitButtonEventsResponse {
        if payload.len() < 13 {
            return InitButtonEventsResponse::default();
        }
        InitButtonEventsResponse {
            boot_id: LittleEndian::read_u32(&payload[0..4]),
            event_count: LittleEndian::read_u32(&payload[4..8]),
            timestamp_hi: LittleEndian::read_u32(&payload[8..12]),
            battery_level: payload[12],
        }
    }

    pub fn decode_battery_status(&self, payload: &[u8]) -> Result<u8, Error> {
        payload
            .first()
            .copied()
            .ok_or_else(|| Error::Protocol("battery status payload empty".into()))
    }
}

impl Default for PacketDecoder {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone)]
pub struct FullVerifyResponse1 {
    pub signature: [u8; 64],
    pub address: [u8; 6],
    pub address_type: u8,
    pub ecdh_pubkey: [u8; 32],
    pub button_random: [u8; 8],
    /// `None` if the response was too short to carry the flags byte.
    pub is_public_mode: Option<bool>,
}

#[derive(Debug, Clone, Default)]
pub struct ButtonInfoWire {
    pub uuid: String,
    pub name: String,
    pub serial_number: String,
    pub firmware_version: u32,
    pub battery_level: u8,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct InitButtonEventsResponse {
    pub boot_id: u32,
    pub event_count: u32,
    pub timestamp_hi: u32,
    pub battery_level: u8,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_byte_round_trips_conn_id_and_flags() {
        let packet = Packet {
            conn_id: 7,
            newly_assigned: true,
            is_multi: false,
            is_fragment: true,
            opcode: opcode::PING_REQUEST,
            payload: vec![],
            signature: None,
        };
        let header = packet.header_byte();
        assert_eq!(header & CONN_ID_MASK, 7);
        assert_ne!(header & NEWLY_ASSIGNED_BIT, 0);
        assert_eq!(header & MULTI_BIT, 0);
        assert_ne!(header & FRAGMENT_BIT, 0);
    }

    #[test]
    fn encode_then_decode_plaintext_packet() {
        let encoder = PacketEncoder::new();
        let decoder = PacketDecoder::new();

        let raw = encoder.encode_full_verify_request_1(&[1, 2, 3, 4]);
        let decoded = decoder.decode(&raw, false).unwrap();

        assert_eq!(decoded.opcode, opcode::FULL_VERIFY_REQUEST_1);
        assert_eq!(decoded.payload, vec![1, 2, 3, 4]);
    }

    #[test]
    fn signed_packet_rejects_tampering() {
        let key = [0x5Au8; 16];
        let mut encoder = PacketEncoder::new();
        encoder.set_session_key(&key);
        let mut decoder = PacketDecoder::new();
        decoder.set_session_key(&key);

        let mut raw = encoder.encode_ping(3);
        let decoded = decoder.decode(&raw, true).unwrap();
        assert_eq!(decoded.opcode, opcode::PING_REQUEST);

        let last = raw.len() - 1;
        raw[last] ^= 0xFF;
        assert!(decoder.decode(&raw, true).is_err());
    }

    #[test]
    fn decode_init_button_events_response_reads_little_endian_fields() {
        let decoder = PacketDecoder::new();
        let mut payload = [0u8; 13];
        LittleEndian::write_u32(&mut payload[0..4], 42);
        LittleEndian::write_u32(&mut payload[4..8], 7);
        LittleEndian::write_u32(&mut payload[8..12], 1_000_000);
        payload[12] = 88;

        let decoded = decoder.decode_init_button_events_response(&payload);
        assert_eq!(decoded.boot_id, 42);
        assert_eq!(decoded.event_count, 7);
        assert_eq!(decoded.timestamp_hi, 1_000_000);
        assert_eq!(decoded.battery_level, 88);
    }
}
