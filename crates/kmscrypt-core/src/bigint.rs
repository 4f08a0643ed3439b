//! Arbitrary-precision integer helpers for FF1.
//!
//! FF1 treats strings over an arbitrary alphabet as big-endian numerals in base
//! `radix = alphabet.len()`. `num-bigint`'s `BigUint` (pulled in from the
//! corpus's own `num-bigint`/`num-traits` usage in `darkrenaissance-darkfi`,
//! e.g. `bin/darkfid/.../miner.rs` and `tests/vdf_eval.rs`) handles the
//! arithmetic; this module only handles translation to/from alphabet strings
//! and the "always-nonnegative mod" adjustment spec.md §9 calls out.

use crate::error::{Error, Result};
use num_bigint::BigUint;
use num_traits::{ToPrimitive, Zero};

/// Converts a string over `alphabet` (most significant character first) into a
/// `BigUint`, treating `alphabet.len()` as the radix.
pub fn string_to_biguint(s: &str, alphabet: &[char]) -> Result<BigUint> {
    let radix = alphabet.len() as u64;
    let mut n = BigUint::zero();
    let radix_big = BigUint::from(radix);
    for ch in s.chars() {
        let digit = alphabet
            .iter()
            .position(|&c| c == ch)
            .ok_or_else(|| Error::InputInvalid(format!("character '{ch}' not in alphabet")))?;
        n = n * &radix_big + BigUint::from(digit as u64);
    }
    Ok(n)
}

/// Renders `n` as a string of exactly `len` characters over `alphabet`,
/// left-padding with `alphabet[0]`. Errors with [`Error::FF1Overflow`] if `n`
/// needs more than `len` digits to represent.
pub fn biguint_to_string(mut n: BigUint, alphabet: &[char], len: usize) -> Result<String> {
    let radix = alphabet.len() as u64;
    let radix_big = BigUint::from(radix);
    let mut digits = Vec::with_capacity(len);
    if n.is_zero() {
        digits.push(0usize);
    }
    while !n.is_zero() {
        let (q, r) = (&n / &radix_big, &n % &radix_big);
        digits.push(r.to_usize().expect("digit fits in usize for any practical radix"));
        n = q;
    }
    if digits.len() > len {
        return Err(Error::FF1Overflow);
    }
    while digits.len() < len {
        digits.push(0);
    }
    digits.reverse();
    Ok(digits.into_iter().map(|d| alphabet[d]).collect())
}

/// `(a - b) mod modulus`, always returning a value in `[0, modulus)` the way
/// FF1 requires — `BigUint` subtraction panics on underflow, so this adds the
/// modulus back when `a < b` instead of relying on a signed/always-nonnegative
/// mod operator.
pub fn mod_sub(a: &BigUint, b: &BigUint, modulus: &BigUint) -> BigUint {
    let a = a % modulus;
    let b = b % modulus;
    if a >= b {
        (a - b) % modulus
    } else {
        (modulus + a - b) % modulus
    }
}

pub fn mod_add(a: &BigUint, b: &BigUint, modulus: &BigUint) -> BigUint {
    (a + b) % modulus
}

/// Exports `n` as exactly `b` big-endian bytes, left-padding with zeros. FF1's
/// CBC-MAC input requires a fixed-width field; `BigUint::to_bytes_be` strips
/// leading zero bytes (including the occasional high-bit "sign" byte), so this
/// re-pads to the caller's width.
pub fn to_bytes_be_padded(n: &BigUint, b: usize) -> Vec<u8> {
    let mut bytes = n.to_bytes_be();
    if bytes.len() > b {
        // Only possible if the caller picked `b` too small; keep the low-order
        // bytes, matching the big-endian truncation FF1's spec implies never
        // happens for valid (radix, length) pairs.
        let start = bytes.len() - b;
        bytes = bytes[start..].to_vec();
    }
    let mut out = vec![0u8; b - bytes.len()];
    out.extend_from_slice(&bytes);
    out
}

pub fn from_bytes_be(bytes: &[u8]) -> BigUint {
    BigUint::from_bytes_be(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn digits_alphabet() -> Vec<char> {
        "0123456789".chars().collect()
    }

    #[test]
    fn round_trips_decimal_strings() {
        let alpha = digits_alphabet();
        let n = string_to_biguint("0123456789", &alpha).unwrap();
        let s = biguint_to_string(n, &alpha, 10).unwrap();
        assert_eq!(s, "0123456789");
    }

    #[test]
    fn pads_short_values() {
        let alpha = digits_alphabet();
        let n = string_to_biguint("7", &alpha).unwrap();
        let s = biguint_to_string(n, &alpha, 5).unwrap();
        assert_eq!(s, "00007");
    }

    #[test]
    fn overflow_when_too_many_digits_needed() {
        let alpha = digits_alphabet();
        let n = string_to_biguint("12345", &alpha).unwrap();
        assert!(matches!(biguint_to_string(n, &alpha, 2), Err(Error::FF1Overflow)));
    }

    #[test]
    fn mod_sub_wraps_on_underflow() {
        let modulus = BigUint::from(10u32);
        let a = BigUint::from(2u32);
        let b = BigUint::from(5u32);
        assert_eq!(mod_sub(&a, &b, &modulus), BigUint::from(7u32));
    }

    #[test]
    fn byte_padding_round_trips() {
        let n = BigUint::from(0x1234u32);
        let bytes = to_bytes_be_padded(&n, 4);
        assert_eq!(bytes, vec![0x00, 0x00, 0x12, 0x34]);
        assert_eq!(from_bytes_be(&bytes), n);
    }
}
