//! # xxHash64
//!
//! Thin, seed-zero wrapper over the `xxhash-rust` crate's classic 64-bit
//! variant (not xxh3 — the resolver's hash-combination rule depends on the
//! exact bit pattern xxHash64 produces, and must match the rest of the
//! xDS ecosystem this core ships alongside). Output is treated as signed
//! for propagation through the RPC hash, matching the upstream resolver's
//! `long` hash type.

use xxhash_rust::xxh64::xxh64;

const SEED: u64 = 0;

/// Hash of the ASCII/UTF-8 bytes of `s`.
pub fn hash_ascii_string(s: &str) -> i64 {
    xxh64(s.as_bytes(), SEED) as i64
}

/// Hash of the 8 little-endian bytes of `x`.
pub fn hash_long(x: i64) -> i64 {
    xxh64(&x.to_le_bytes(), SEED) as i64
}

/// 1-bit left rotation used to combine successive hash-policy outputs
/// (section 4.E step 8, section 9). Plain XOR would collapse identical
/// policies applied twice; rotating before each XOR keeps their
/// contributions distinct.
pub fn rotate_left_1(x: i64) -> i64 {
    (x as u64).rotate_left(1) as i64
}
