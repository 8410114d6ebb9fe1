//! Flic's modified Chaskey-LTS permutation and MAC.
//!
//! This is not the textbook Chaskey-LTS: the subkey doubling carries from the
//! high word instead of the low word, and the round function rotates by a
//! different schedule. Grounded on
//! `examples/original_source/.../crypto/chaskey_lts.py`, itself a port of
//! `flic2lib-c-module/flic2_crypto.c`.

const ROUNDS: usize = 16;

fn rotr32(x: u32, n: u32) -> u32 {
    x.rotate_right(n)
}

/// Double a 128-bit key in GF(2^128), carrying from the high word (`v[3]`).
fn times_two(v: [u32; 4]) -> [u32; 4] {
    let c = (v[3] >> 31) * 0x87;
    [
        (v[0] << 1) ^ c,
        (v[1] << 1) | (v[0] >> 31),
        (v[2] << 1) | (v[1] >> 31),
        (v[3] << 1) | (v[2] >> 31),
    ]
}

fn permute(v: [u32; 4]) -> [u32; 4] {
    let (mut r4, mut r5, mut r6, mut r7) = (v[0], v[1], v[2], v[3]);

    r6 = rotr32(r6, 16);

    for _ in 0..ROUNDS {
        r4 = r4.wrapping_add(r5);
        r5 = r4 ^ rotr32(r5, 27);
        r6 = r7.wrapping_add(rotr32(r6, 16));
        r7 = r6 ^ rotr32(r7, 24);
        r6 = r6.wrapping_add(r5);
        r4 = r7.wrapping_add(rotr32(r4, 16));
        r5 = r6 ^ rotr32(r5, 25);
        r7 = r4 ^ rotr32(r7, 19);
    }

    r6 = rotr32(r6, 16);

    [r4, r5, r6, r7]
}

fn words_from_le_bytes(bytes: &[u8; 16]) -> [u32; 4] {
    [
        u32::from_le_bytes(bytes[0..4].try_into().unwrap()),
        u32::from_le_bytes(bytes[4..8].try_into().unwrap()),
        u32::from_le_bytes(bytes[8..12].try_into().unwrap()),
        u32::from_le_bytes(bytes[12..16].try_into().unwrap()),
    ]
}

fn le_bytes_from_words(v: [u32; 4]) -> [u8; 16] {
    let mut out = [0u8; 16];
    out[0..4].copy_from_slice(&v[0].to_le_bytes());
    out[4..8].copy_from_slice(&v[1].to_le_bytes());
    out[8..12].copy_from_slice(&v[2].to_le_bytes());
    out[12..16].copy_from_slice(&v[3].to_le_bytes());
    out
}

/// Splits `message` into 16-byte blocks, padding the final (possibly empty
/// or full) block per Chaskey's `0x01`-then-zeros rule, returning the chosen
/// subkey alongside it. `strict_last` toggles the off-by-one last-block
/// boundary the `mac_with_dir_and_counter` variant uses.
fn last_block_and_subkey(
    message: &[u8],
    k1: [u32; 4],
    k2: [u32; 4],
    strict_last: bool,
) -> (Vec<[u32; 4]>, [u32; 4], [u32; 4]) {
    let block_size = 16;
    let mut full_blocks = Vec::new();
    let mut i = 0;
    loop {
        let has_more = if strict_last {
            i + block_size < message.len()
        } else {
            i + block_size <= message.len()
        };
        if !has_more {
            break;
        }
        let block: [u8; 16] = message[i..i + block_size].try_into().unwrap();
        full_blocks.push(words_from_le_bytes(&block));
        i += block_size;
    }

    let remaining = &message[i..];
    let mut last_block = [0u8; 16];
    let subkey = if remaining.len() < block_size {
        last_block[..remaining.len()].copy_from_slice(remaining);
        last_block[remaining.len()] = 0x01;
        k2
    } else {
        last_block.copy_from_slice(remaining);
        k1
    };

    (full_blocks, words_from_le_bytes(&last_block), subkey)
}

/// A 16-byte Chaskey-LTS key with its two Flic-derived subkeys precomputed.
#[derive(Clone)]
pub struct ChaskeyKey {
    k: [u32; 4],
    k1: [u32; 4],
    k2: [u32; 4],
}

impl ChaskeyKey {
    pub fn new(key: &[u8; 16]) -> Self {
        let k = words_from_le_bytes(key);
        let k1 = times_two(k);
        let k2 = times_two(k1);
        Self { k, k1, k2 }
    }

    /// Full 16-byte Chaskey-LTS MAC over `message`.
    pub fn mac(&self, message: &[u8]) -> [u8; 16] {
        let mut v = self.k;
        let (full_blocks, last_block, subkey) =
            last_block_and_subkey(message, self.k1, self.k2, false);

        for block in full_blocks {
            for i in 0..4 {
                v[i] ^= block[i];
            }
            v = permute(v);
        }

        for i in 0..4 {
            v[i] ^= last_block[i] ^ subkey[i];
        }
        v = permute(v);

        for i in 0..4 {
            v[i] ^= self.k[i];
        }

        le_bytes_from_words(v)
    }

    /// 5-byte truncated MAC, used to sign plaintext packets before a session
    /// key has been negotiated (e.g. the ping request).
    pub fn mac5(&self, message: &[u8]) -> [u8; 5] {
        let full = self.mac(message);
        full[..5].try_into().unwrap()
    }

    /// 5-byte MAC binding `direction` (0 = RX, 1 = TX) and a 64-bit replay
    /// counter into the tag, used for every post-pairing session packet.
    pub fn mac_with_dir_and_counter(&self, message: &[u8], direction: u8, counter: u64) -> [u8; 5] {
        let mut v = self.k;
        v[0] ^= (counter & 0xFFFF_FFFF) as u32;
        v[1] ^= (counter >> 32) as u32;
        v[2] ^= direction as u32;
        v = permute(v);

        let (full_blocks, last_block, subkey) =
            last_block_and_subkey(message, self.k1, self.k2, true);

        for block in full_blocks {
            for i in 0..4 {
                v[i] ^= block[i];
            }
            v = permute(v);
        }

        for i in 0..4 {
            v[i] ^= last_block[i];
        }
        for i in 0..4 {
            v[i] ^= subkey[i];
        }
        v = permute(v);

        v[0] ^= subkey[0];
        v[1] ^= subkey[1];

        let mut out = [0u8; 5];
        out[..4].copy_from_slice(&v[0].to_le_bytes());
        out[4] = (v[1] & 0xFF) as u8;
        out
    }

    /// Single-block ECB-style encryption used to derive the Quick Verify
    /// session key (`chaskey_16_bytes` in the vendor C reference).
    pub fn encrypt_block(&self, plaintext: &[u8; 16]) -> [u8; 16] {
        let block = words_from_le_bytes(plaintext);
        let mut v = [0u32; 4];
        for i in 0..4 {
            v[i] = block[i] ^ self.k[i] ^ self.k1[i];
        }
        v = permute(v);
        for i in 0..4 {
            v[i] ^= self.k1[i];
        }
        le_bytes_from_words(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn times_two_carries_from_high_word() {
        let k = [0, 0, 0, 0x8000_0000];
        let doubled = times_two(k);
        assert_eq!(doubled, [0x87, 0, 0, 0]);
    }

    #[test]
    fn mac_is_deterministic_and_key_dependent() {
        let key_a = ChaskeyKey::new(&[0u8; 16]);
        let key_b = ChaskeyKey::new(&[1u8; 16]);
        let msg = b"full verify request";

        let tag_a1 = key_a.mac5(msg);
        let tag_a2 = key_a.mac5(msg);
        let tag_b = key_b.mac5(msg);

        assert_eq!(tag_a1, tag_a2);
        assert_ne!(tag_a1, tag_b);
    }

    #[test]
    fn mac_with_dir_and_counter_binds_direction() {
        let key = ChaskeyKey::new(&[0x42u8; 16]);
        let msg = [0x10u8, 0x0E];

        let tx = key.mac_with_dir_and_counter(&msg, 1, 0);
        let rx = key.mac_with_dir_and_counter(&msg, 0, 0);
        assert_ne!(tx, rx, "direction must be bound into the tag");

        let counter0 = key.mac_with_dir_and_counter(&msg, 1, 0);
        let counter1 = key.mac_with_dir_and_counter(&msg, 1, 1);
        assert_ne!(counter0, counter1, "counter must be bound into the tag");
    }

    #[test]
    fn encrypt_block_round_trips_through_quick_verify_derivation() {
        let pairing_key = ChaskeyKey::new(&[7u8; 16]);
        let mut plaintext = [0u8; 16];
        plaintext[..7].copy_from_slice(&[1, 2, 3, 4, 5, 6, 7]);
        plaintext[8..].copy_from_slice(&[9, 10, 11, 12, 13, 14, 15, 16]);

        let out1 = pairing_key.encrypt_block(&plaintext);
        let out2 = pairing_key.encrypt_block(&plaintext);
        assert_eq!(out1, out2, "derivation must be deterministic");
        assert_ne!(out1, plaintext);
    }
}
