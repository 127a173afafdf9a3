//! Utility functions for hex validation and field-element encoding.

use crate::error::{RegistryError, RegistryResult};
use crate::types::{FieldBytes, HASH_SIZE};
use anyhow::{Context, Result};
use ark_ff::{BigInteger, PrimeField};
use num_bigint::BigUint;

fn is_valid_hex_string(s: &str) -> bool {
    s.chars().all(|c| c.is_ascii_hexdigit())
}

fn strip_hex_prefix(input: &str) -> &str {
    input
        .trim()
        .strip_prefix("0x")
        .or_else(|| input.trim().strip_prefix("0X"))
        .unwrap_or_else(|| input.trim())
}

/// Validates and strips hex prefix from a string.
///
/// # Arguments
///
/// * `input` - The hex string to validate (may include "0x" or "0X" prefix)
/// * `expected_len` - Expected length of the hex string after stripping prefix
///
/// # Errors
/// Returns an error if:
/// - The hex string has incorrect length
/// - The hex string contains non-hex characters
///
/// # Examples
///
/// ```
/// use cti_zk_registry::utils::validate_and_strip_hex;
///
/// let result = validate_and_strip_hex("0x1234abcd", 8).unwrap();
/// assert_eq!(result, "1234abcd");
/// ```
pub fn validate_and_strip_hex(input: &str, expected_len: usize) -> Result<String> {
    let stripped = strip_hex_prefix(input);

    if stripped.len() != expected_len {
        return Err(anyhow::anyhow!(
            "Invalid hex string: must be {} characters (got {})",
            expected_len,
            stripped.len()
        ));
    }

    if !is_valid_hex_string(stripped) {
        return Err(anyhow::anyhow!(
            "Invalid hex string: contains non-hex characters"
        ));
    }

    Ok(stripped.to_string())
}

/// Parses a 32-byte word written as 64 hex characters.
pub fn parse_bytes32(input: &str) -> Result<FieldBytes> {
    let stripped = validate_and_strip_hex(input, HASH_SIZE * 2)?;
    let bytes = hex::decode(stripped).context("Failed to decode 32-byte hex word")?;
    let mut out = [0u8; HASH_SIZE];
    out.copy_from_slice(&bytes);
    Ok(out)
}

/// Parses a 32-byte word given either as `0x`-prefixed hex or as a decimal
/// string, the two notations snarkjs tooling emits.
///
/// # Errors
///
/// Returns an error if the string is neither, or if the decimal value does
/// not fit in 256 bits.
///
/// # Examples
///
/// ```
/// use cti_zk_registry::utils::parse_word;
///
/// let from_dec = parse_word("258").unwrap();
/// let from_hex = parse_word("0x0000000000000000000000000000000000000000000000000000000000000102").unwrap();
/// assert_eq!(from_dec, from_hex);
/// ```
pub fn parse_word(input: &str) -> Result<FieldBytes> {
    let trimmed = input.trim();
    if trimmed.starts_with("0x") || trimmed.starts_with("0X") {
        return parse_bytes32(trimmed);
    }

    let value = BigUint::parse_bytes(trimmed.as_bytes(), 10)
        .with_context(|| format!("'{trimmed}' is neither 0x-hex nor a decimal integer"))?;
    let be = value.to_bytes_be();
    if be.len() > HASH_SIZE {
        return Err(anyhow::anyhow!(
            "Decimal value '{}' does not fit in {} bytes",
            trimmed,
            HASH_SIZE
        ));
    }

    let mut out = [0u8; HASH_SIZE];
    out[HASH_SIZE - be.len()..].copy_from_slice(&be);
    Ok(out)
}

/// Renders a 32-byte big-endian word as a decimal string.
#[must_use]
pub fn word_to_decimal(word: &FieldBytes) -> String {
    BigUint::from_bytes_be(word).to_str_radix(10)
}

/// Returns true when the big-endian word is strictly below the modulus of `F`.
#[must_use]
pub fn is_canonical<F: PrimeField>(word: &FieldBytes) -> bool {
    let modulus = F::MODULUS.to_bytes_be();
    // Both sides are 32-byte big-endian, so lexicographic order is numeric order.
    word.as_slice() < modulus.as_slice()
}

/// Converts a big-endian word into a field element, refusing values that are
/// not below the field modulus instead of reducing them.
///
/// # Errors
///
/// Returns [`RegistryError::MalformedInput`] naming `what` when the word is
/// out of range.
pub fn field_from_word<F: PrimeField>(word: &FieldBytes, what: &str) -> RegistryResult<F> {
    if !is_canonical::<F>(word) {
        return Err(RegistryError::MalformedInput(format!(
            "{what} 0x{} is not below the field modulus",
            hex::encode(word)
        )));
    }
    Ok(F::from_be_bytes_mod_order(word))
}

/// Big-endian 32-byte encoding of a field element.
#[must_use]
pub fn field_to_word<F: PrimeField>(field: F) -> FieldBytes {
    let be = field.into_bigint().to_bytes_be();
    let mut out = [0u8; HASH_SIZE];
    out[HASH_SIZE - be.len()..].copy_from_slice(&be);
    out
}
