//! Seeded hash helpers shared by every dictionary in the runtime.
//!
//! String and buffer keys hash with SipHash-1-3 keyed by a process-lifetime
//! 64-bit oracle seed, so hashes are stable within a process but differ
//! across processes. Integer keys use an FNV-style mix, which is cheaper and
//! good enough for dense id spaces like symbols and slot indices.

use std::sync::OnceLock;

use rand::RngCore;

/// The process-lifetime oracle seed, drawn once on first use.
static ORACLE_SEED: OnceLock<u64> = OnceLock::new();

/// Returns the process-wide hash oracle seed.
///
/// The first caller draws it from the thread RNG; everyone afterwards sees
/// the same value, so a dictionary rehash always agrees with the original
/// insertion hash.
#[must_use]
pub fn oracle_seed() -> u64 {
    *ORACLE_SEED.get_or_init(|| rand::thread_rng().next_u64())
}

/// Hashes raw bytes with SipHash-1-3 under the process oracle seed.
#[must_use]
pub fn hash_bytes(bytes: &[u8]) -> u32 {
    let h = siphash13(oracle_seed(), bytes);
    // Fold to 32 bits; the dictionaries mask with their bucket count anyway.
    (h ^ (h >> 32)) as u32
}

/// Hashes UTF-8 string content. Equal strings hash equal regardless of
/// where their bytes live.
#[must_use]
pub fn hash_str(value: &str) -> u32 {
    hash_bytes(value.as_bytes())
}

/// FNV-1a-style mix for 32-bit integer keys.
///
/// Symbols and small-integer keys are often sequential; the multiply-xor
/// spreads them across buckets without the full SipHash cost.
#[must_use]
pub fn mix_int32(value: i32) -> u32 {
    let mut h = 0x811c_9dc5_u32 ^ (oracle_seed() as u32);
    for byte in value.to_le_bytes() {
        h ^= u32::from(byte);
        h = h.wrapping_mul(0x0100_0193);
    }
    h
}

/// Computes SipHash-1-3 over `bytes` with the seed supplying both key lanes.
#[must_use]
fn siphash13(seed: u64, bytes: &[u8]) -> u64 {
    let k0 = seed;
    let k1 = seed.rotate_left(32) ^ 0x9e37_79b9_7f4a_7c15;

    let mut v0 = k0 ^ 0x736f_6d65_7073_6575;
    let mut v1 = k1 ^ 0x646f_7261_6e64_6f6d;
    let mut v2 = k0 ^ 0x6c79_6765_6e65_7261;
    let mut v3 = k1 ^ 0x7465_6462_7974_6573;

    let mut chunks = bytes.chunks_exact(8);
    for chunk in &mut chunks {
        let mut block = [0_u8; 8];
        block.copy_from_slice(chunk);
        let message = u64::from_le_bytes(block);
        v3 ^= message;
        sip_round(&mut v0, &mut v1, &mut v2, &mut v3);
        v0 ^= message;
    }

    let mut tail = (bytes.len() as u64) << 56;
    for (index, byte) in chunks.remainder().iter().copied().enumerate() {
        tail |= u64::from(byte) << (index * 8);
    }

    v3 ^= tail;
    sip_round(&mut v0, &mut v1, &mut v2, &mut v3);
    v0 ^= tail;
    v2 ^= 0xff;
    sip_round(&mut v0, &mut v1, &mut v2, &mut v3);
    sip_round(&mut v0, &mut v1, &mut v2, &mut v3);
    sip_round(&mut v0, &mut v1, &mut v2, &mut v3);

    v0 ^ v1 ^ v2 ^ v3
}

/// Performs one SipHash round.
fn sip_round(v0: &mut u64, v1: &mut u64, v2: &mut u64, v3: &mut u64) {
    *v0 = v0.wrapping_add(*v1);
    *v1 = v1.rotate_left(13);
    *v1 ^= *v0;
    *v0 = v0.rotate_left(32);

    *v2 = v2.wrapping_add(*v3);
    *v3 = v3.rotate_left(16);
    *v3 ^= *v2;

    *v0 = v0.wrapping_add(*v3);
    *v3 = v3.rotate_left(21);
    *v3 ^= *v0;

    *v2 = v2.wrapping_add(*v1);
    *v1 = v1.rotate_left(17);
    *v1 ^= *v2;
    *v2 = v2.rotate_left(32);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_strings_hash_equal() {
        let a = String::from("escape-continuation");
        let b = a.clone();
        assert_eq!(hash_str(&a), hash_str(&b));
    }

    #[test]
    fn hash_is_stable_within_process() {
        let first = hash_bytes(b"stable");
        let second = hash_bytes(b"stable");
        assert_eq!(first, second);
    }

    #[test]
    fn int_mix_spreads_sequential_keys() {
        // Sequential ids must not collapse into the same low bits.
        let low_bits: Vec<u32> = (0..16).map(|i| mix_int32(i) & 15).collect();
        let distinct: std::collections::HashSet<u32> = low_bits.iter().copied().collect();
        assert!(distinct.len() > 4, "sequential keys collapsed: {low_bits:?}");
    }

    #[test]
    fn empty_input_is_permitted() {
        // Unlike the CPython convention there is no special-case for empty
        // keys; the dictionaries never store one, but the hash must not panic.
        let _ = hash_bytes(b"");
    }
}
