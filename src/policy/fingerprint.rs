//! Triplet Fingerprinting
//!
//! A greylist record is keyed by a 64-bit CRC (ECMA polynomial, reflected,
//! `!0` initial value and final complement) of the lower-cased concatenation
//! of sender and recipient followed by the client address verbatim. Sender
//! and recipient are mailbox names and compare case-insensitively; the
//! client address is kept case-sensitive.
//!
//! A CRC is not collision-resistant, and does not need to be here: two
//! colliding triplets merely share a greylist record, which is a probabilistic
//! approximation the policy accepts. What matters is that the checksum is
//! deterministic and stable across restarts, since with the memcached backend
//! the fingerprint outlives the process.

/// CRC-64 ECMA polynomial in reflected form.
const CRC64_ECMA_POLY: u64 = 0xC96C_5795_D787_0F42;

static CRC64_TABLE: [u64; 256] = build_table();

const fn build_table() -> [u64; 256] {
    let mut table = [0u64; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = i as u64;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 1 == 1 {
                (crc >> 1) ^ CRC64_ECMA_POLY
            } else {
                crc >> 1
            };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

/// Computes the CRC-64 checksum of `data`.
pub fn checksum(data: &[u8]) -> u64 {
    let mut crc = !0u64;
    for &byte in data {
        crc = CRC64_TABLE[((crc ^ byte as u64) & 0xff) as usize] ^ (crc >> 8);
    }
    !crc
}

/// Fingerprints a (sender, recipient, client address) triplet.
pub fn triplet_fingerprint(sender: &str, recipient: &str, client_address: &str) -> u64 {
    let mut input = format!("{sender}{recipient}").to_lowercase();
    input.push_str(client_address);
    checksum(input.as_bytes())
}
