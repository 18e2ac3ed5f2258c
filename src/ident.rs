//! Base-36 identifiers and the batches built from them.

use crate::{Error, Result, ID_PREFIX, STEP_SIZE};

const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Encodes `n` in lowercase base 36. Negative values get a leading `-`.
pub fn encode_base36(n: i64) -> String {
    let mut value = n.unsigned_abs();
    if value == 0 {
        return "0".to_string();
    }

    // u64::MAX needs 13 base-36 digits.
    let mut buf = Vec::with_capacity(14);
    while value > 0 {
        buf.push(DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    if n < 0 {
        buf.push(b'-');
    }
    buf.reverse();
    buf.into_iter().map(char::from).collect()
}

/// Decodes a base-36 identifier, case-insensitively.
pub fn decode_base36(s: &str) -> Result<i64> {
    let invalid = || Error::InvalidIdentifier(s.to_string());

    let (negative, digits) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s),
    };
    if digits.is_empty() {
        return Err(invalid());
    }

    let mut magnitude: u64 = 0;
    for c in digits.chars() {
        let digit = c.to_digit(36).ok_or_else(invalid)? as u64;
        magnitude = magnitude
            .checked_mul(36)
            .and_then(|m| m.checked_add(digit))
            .ok_or_else(invalid)?;
    }

    if negative {
        0i64.checked_sub_unsigned(magnitude).ok_or_else(invalid)
    } else {
        i64::try_from(magnitude).map_err(|_| invalid())
    }
}

/// The `STEP_SIZE` prefixed ids covered by the batch starting at `offset`.
pub fn batch_ids(offset: i64) -> Vec<String> {
    (0..STEP_SIZE)
        .map(|i| format!("{ID_PREFIX}{}", encode_base36(offset.saturating_add(i))))
        .collect()
}
