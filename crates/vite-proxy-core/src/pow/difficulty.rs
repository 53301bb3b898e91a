//! Difficulty and target conversions for Vite proof-of-work.
//!
//! A nonce is valid when `blake2b-256(nonce ‖ data)`, read big-endian, is at least the target.
//! The target for a difficulty `d` is `2^256 / (1 + 1/d)` truncated to its 16 leading hex
//! digits, which is the form PoW services accept as `threshold`.

use blake2::{digest::consts::U32, Blake2b, Digest};
use num_bigint::BigUint;
use num_traits::{One, Zero};

use super::PowError;

/// Fixed-point scale for `1/d`, matching the 20 decimal places nodes round to.
const SCALE_DIGITS: u32 = 20;
const TARGET_HEX_LEN: usize = 64;
const SIGNIFICANT_HEX_DIGITS: usize = 16;

fn two_pow_256() -> BigUint {
    BigUint::one() << 256
}

/// Parses a decimal difficulty string.
///
/// # Errors
/// Returns [`PowError::InvalidDifficulty`] unless `text` is a non-empty run of ASCII digits.
pub fn parse_difficulty(text: &str) -> Result<BigUint, PowError> {
    if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
        return Err(PowError::InvalidDifficulty(text.to_string()));
    }
    BigUint::parse_bytes(text.as_bytes(), 10).ok_or_else(|| PowError::InvalidDifficulty(text.to_string()))
}

/// 64-character hex target for `difficulty`. Difficulty 0 accepts any hash.
#[must_use]
pub fn difficulty_to_target(difficulty: &BigUint) -> String {
    if difficulty.is_zero() {
        return "0".repeat(TARGET_HEX_LEN);
    }

    let scale = BigUint::from(10u32).pow(SCALE_DIGITS);
    // round_half_up(scale / d)
    let reciprocal = (&scale * 2u32 + difficulty) / (difficulty * 2u32);
    let target = (two_pow_256() * &scale) / (scale + reciprocal);

    let hex = target.to_str_radix(16);
    let mut out: String = hex.chars().take(SIGNIFICANT_HEX_DIGITS).collect();
    out.extend(std::iter::repeat('0').take(TARGET_HEX_LEN - out.len()));
    out
}

/// `blake2b-256(nonce ‖ data)`.
#[must_use]
pub fn hash_pow(nonce: &[u8], data: &[u8]) -> [u8; 32] {
    let mut hasher = Blake2b::<U32>::new();
    hasher.update(nonce);
    hasher.update(data);
    hasher.finalize().into()
}

/// Checks `nonce` against a hex target.
///
/// # Errors
/// Returns [`PowError::InvalidTarget`] when the target is not hex or longer than 32 bytes.
pub fn check_pow_nonce(target: &str, nonce: &[u8], data: &[u8]) -> Result<bool, PowError> {
    if target.len() > TARGET_HEX_LEN {
        return Err(PowError::InvalidTarget(target.to_string()));
    }
    let padded = format!("{target:0>64}");
    let target_bytes =
        hex::decode(&padded).map_err(|_| PowError::InvalidTarget(target.to_string()))?;

    let hash = hash_pow(nonce, data);
    Ok(hash.as_slice() >= target_bytes.as_slice())
}
