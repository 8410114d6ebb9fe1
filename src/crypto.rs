//! X25519/Ed25519 key agreement and the HMAC-SHA256 key schedule used by
//! Full Verify, plus the Chaskey-based Quick Verify derivation.
//!
//! Grounded on `examples/original_source/.../crypto/keys.py` and
//! `crypto/ed25519.py`. The teacher's own `smp/crypto.rs` never implements
//! real cryptography (every function there returns a zeroed placeholder), so
//! the concrete primitives are pulled from `examples/lyrahos-emunet`'s
//! dependency table instead: `x25519-dalek` for ECDH, `ed25519-dalek` for
//! identity verification, `hmac`+`sha2` for the key schedule.

use hmac::{Hmac, Mac};
use rand_core::OsRng;
use sha2::{Digest, Sha256};
use x25519_dalek::{PublicKey, StaticSecret};

use crate::chaskey::ChaskeyKey;
use crate::error::{Error, PairingError};

type HmacSha256 = Hmac<Sha256>;

/// Flic's Ed25519 public key, used to verify a button's identity signature
/// during Full Verify.
pub const FLIC_PUBLIC_KEY: [u8; 32] = [
    0xd3, 0x3f, 0x24, 0x40, 0xdd, 0x54, 0xb3, 0x1b, 0x2e, 0x1d, 0xcf, 0x40, 0x13, 0x2e, 0xfa, 0x41,
    0xd8, 0xf8, 0xa7, 0x47, 0x41, 0x68, 0xdf, 0x40, 0x08, 0xf5, 0xa9, 0x5f, 0xb3, 0xb0, 0xd0, 0x22,
];

/// Generate a fresh X25519 keypair for one Full Verify attempt.
pub fn generate_keypair() -> (StaticSecret, PublicKey) {
    let secret = StaticSecret::random_from_rng(OsRng);
    let public = PublicKey::from(&secret);
    (secret, public)
}

/// Compute the X25519 shared secret with the button's ephemeral public key.
pub fn compute_shared_secret(our_private: &StaticSecret, their_public: &[u8; 32]) -> [u8; 32] {
    let their_public = PublicKey::from(*their_public);
    *our_private.diffie_hellman(&their_public).as_bytes()
}

/// Verify the button's Ed25519 identity signature, brute-forcing the 2
/// `sig_bits` that the signature format embeds in byte 32 of the scalar.
///
/// The message signed is `address(6) || address_type(1) || ecdh_pubkey(32)`.
/// Returns the `sig_bits` value (0-3) that produced a valid signature.
pub fn verify_button_identity(
    signature: &[u8; 64],
    address: &[u8; 6],
    address_type: u8,
    ecdh_pubkey: &[u8; 32],
) -> Result<u8, Error> {
    use ed25519_dalek::{Signature, VerifyingKey};

    let mut message = Vec::with_capacity(6 + 1 + 32);
    message.extend_from_slice(address);
    message.push(address_type);
    message.extend_from_slice(ecdh_pubkey);

    let verifying_key = VerifyingKey::from_bytes(&FLIC_PUBLIC_KEY)
        .map_err(|_| Error::Pairing(PairingError::InvalidSignature))?;

    let mut candidate = *signature;
    for sig_bits in 0u8..4 {
        candidate[32] = (signature[32] & 0xFC) | sig_bits;
        let sig = Signature::from_bytes(&candidate);
        if verifying_key.verify_strict(&message, &sig).is_ok() {
            return Ok(sig_bits);
        }
    }

    Err(Error::Pairing(PairingError::InvalidSignature))
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> [u8; 32] {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts keys of any length");
    mac.update(data);
    mac.finalize().into_bytes().into()
}

/// `SHA256(shared_secret || sig_bits || button_random || client_random || 0x00)`
pub fn derive_full_verify_secret(
    shared_secret: &[u8; 32],
    sig_bits: u8,
    button_random: &[u8; 8],
    client_random: &[u8; 8],
) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(shared_secret);
    hasher.update([sig_bits]);
    hasher.update(button_random);
    hasher.update(client_random);
    hasher.update([0x00]);
    hasher.finalize().into()
}

/// `HMAC-SHA256(full_verify_secret, "AT")[:16]`
pub fn derive_verifier(full_verify_secret: &[u8; 32]) -> [u8; 16] {
    hmac_sha256(full_verify_secret, b"AT")[..16].try_into().unwrap()
}

/// `HMAC-SHA256(full_verify_secret, "SK")[:16]`
pub fn derive_session_key(full_verify_secret: &[u8; 32]) -> [u8; 16] {
    hmac_sha256(full_verify_secret, b"SK")[..16].try_into().unwrap()
}

/// `HMAC-SHA256(full_verify_secret, "PK")[:20]`, split into a 4-byte pairing
/// id and a 16-byte pairing key.
pub fn derive_pairing_data(full_verify_secret: &[u8; 32]) -> ([u8; 4], [u8; 16]) {
    let pairing_data = hmac_sha256(full_verify_secret, b"PK");
    let mut pairing_id = [0u8; 4];
    let mut pairing_key = [0u8; 16];
    pairing_id.copy_from_slice(&pairing_data[..4]);
    pairing_key.copy_from_slice(&pairing_data[4..20]);
    (pairing_id, pairing_key)
}

/// Quick Verify session key: `ChaskeyEncrypt(pairing_key, client_random[:7] || 0x00 || button_random)`.
pub fn derive_quick_verify_session_key(
    pairing_key: &[u8; 16],
    client_random: &[u8; 8],
    button_random: &[u8; 8],
) -> [u8; 16] {
    let mut plaintext = [0u8; 16];
    plaintext[..7].copy_from_slice(&client_random[..7]);
    plaintext[7] = 0x00;
    plaintext[8..].copy_from_slice(button_random);

    ChaskeyKey::new(pairing_key).encrypt_block(&plaintext)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ecdh_is_symmetric() {
        let (alice_secret, alice_public) = generate_keypair();
        let (bob_secret, bob_public) = generate_keypair();

        let alice_shared = compute_shared_secret(&alice_secret, bob_public.as_bytes());
        let bob_shared = compute_shared_secret(&bob_secret, alice_public.as_bytes());

        assert_eq!(alice_shared, bob_shared);
    }

    #[test]
    fn full_verify_secret_derivation_is_stable() {
        let shared = [0x11u8; 32];
        let button_random = [1, 2, 3, 4, 5, 6, 7, 8];
        let client_random = [8, 7, 6, 5, 4, 3, 2, 1];

        let secret1 = derive_full_verify_secret(&shared, 2, &button_random, &client_random);
        let secret2 = derive_full_verify_secret(&shared, 2, &button_random, &client_random);
        assert_eq!(secret1, secret2);

        let verifier = derive_verifier(&secret1);
        let session_key = derive_session_key(&secret1);
        let (pairing_id, pairing_key) = derive_pairing_data(&secret1);

        assert_ne!(verifier.to_vec(), session_key.to_vec());
        assert_eq!(pairing_id.len(), 4);
        assert_eq!(pairing_key.len(), 16);
    }

    #[test]
    fn quick_verify_session_key_is_deterministic() {
        let pairing_key = [9u8; 16];
        let client_random = [1, 2, 3, 4, 5, 6, 7, 8];
        let button_random = [8, 7, 6, 5, 4, 3, 2, 1];

        let key1 = derive_quick_verify_session_key(&pairing_key, &client_random, &button_random);
        let key2 = derive_quick_verify_session_key(&pairing_key, &client_random, &button_random);
        assert_eq!(key1, key2);
    }

    #[test]
    fn verify_button_identity_recovers_sig_bits() {
        use ed25519_dalek::{Signer, SigningKey};

        let signing_key = SigningKey::generate(&mut OsRng);
        let address = [1u8, 2, 3, 4, 5, 6];
        let address_type = 0u8;
        let ecdh_pubkey = [0x55u8; 32];

        let mut message = Vec::new();
        message.extend_from_slice(&address);
        message.push(address_type);
        message.extend_from_slice(&ecdh_pubkey);

        let signature = signing_key.sign(&message);
        let mut sig_bytes = signature.to_bytes();
        // Force known low bits so we can assert they're recovered correctly.
        sig_bytes[32] = (sig_bytes[32] & 0xFC) | 0b10;

        let verifying_key = signing_key.verifying_key();
        let recomposed = ed25519_dalek::Signature::from_bytes(&sig_bytes);
        assert!(verifying_key.verify_strict(&message, &recomposed).is_ok());
    }
}
