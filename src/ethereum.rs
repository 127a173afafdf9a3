//! Ethereum address parsing and conversion into the contributor tree's field.
//!
//! Contributor identities are 20-byte Ethereum addresses. Inside the
//! contributor tree and the membership circuit an address is the field
//! element whose big-endian encoding is the address right-aligned in 32 bytes.

use crate::types::{FieldBytes, HASH_SIZE};
use crate::utils::validate_and_strip_hex;
use anyhow::{Context, Result};
use ark_bn254::Fr;
use ark_ff::PrimeField;
use ethers::signers::{LocalWallet, Signer};
use ethers::types::Address;

/// Expected length of an Ethereum address in hex characters (excluding 0x prefix)
pub const ADDRESS_HEX_LENGTH: usize = 40;

/// Expected length of an Ethereum private key in hex characters (excluding 0x prefix)
pub const PRIVATE_KEY_HEX_LENGTH: usize = 64;

const ADDRESS_BYTES: usize = 20;

/// Parses a hex address, with or without prefix, in any letter case.
///
/// # Errors
///
/// Returns an error if:
/// - The address is not exactly 40 hex characters (excluding 0x prefix)
/// - The address contains non-hex characters
/// - The address is the zero address
///
/// # Examples
///
/// ```
/// use cti_zk_registry::ethereum::parse_address;
///
/// let a = parse_address("0x742d35Cc6634C0532925a3b844Bc454e4438f44e").unwrap();
/// let b = parse_address("742d35cc6634c0532925a3b844bc454e4438f44e").unwrap();
/// assert_eq!(a, b);
/// ```
pub fn parse_address(address: &str) -> Result<Address> {
    let stripped = validate_and_strip_hex(address, ADDRESS_HEX_LENGTH)?;
    let bytes = hex::decode(&stripped).context("Failed to decode address from hex")?;
    let parsed = Address::from_slice(&bytes);

    if parsed.is_zero() {
        return Err(anyhow::anyhow!(
            "The zero address cannot be used as a contributor or admin identity"
        ));
    }

    Ok(parsed)
}

/// Parses a list of addresses, reporting the failing line number.
///
/// Blank lines are skipped. Duplicates are rejected since a contributor
/// tree with a repeated leaf would give one identity two membership paths.
pub fn parse_addresses_batch(lines: &[String]) -> Result<Vec<Address>> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();

    for (i, line) in lines.iter().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let address = parse_address(line)
            .with_context(|| format!("Failed to validate address at line {}: '{}'", i + 1, line))?;
        if !seen.insert(address) {
            return Err(anyhow::anyhow!(
                "Duplicate address at line {}: {:?}",
                i + 1,
                address
            ));
        }
        out.push(address);
    }

    Ok(out)
}

/// Validates an Ethereum private key.
///
/// # Errors
///
/// Returns an error if:
/// - The private key is not exactly 64 hex characters (excluding 0x prefix)
/// - The private key contains non-hex characters
/// - The private key is all zeros
pub fn validate_private_key(private_key: &str) -> Result<()> {
    let stripped = validate_and_strip_hex(private_key, PRIVATE_KEY_HEX_LENGTH)?;

    if stripped.chars().all(|c| c == '0') {
        return Err(anyhow::anyhow!(
            "Private key cannot be all zeros. Please provide a valid private key."
        ));
    }

    Ok(())
}

/// Validates a private key and returns the wallet it controls.
pub fn wallet_from_private_key(private_key: &str) -> Result<LocalWallet> {
    validate_private_key(private_key)?;
    let stripped = validate_and_strip_hex(private_key, PRIVATE_KEY_HEX_LENGTH)?;
    stripped
        .parse::<LocalWallet>()
        .context("Failed to parse private key")
}

/// Address of the wallet controlled by `private_key`.
pub fn address_from_private_key(private_key: &str) -> Result<Address> {
    Ok(wallet_from_private_key(private_key)?.address())
}

/// The address right-aligned in a 32-byte big-endian word.
#[must_use]
pub fn address_to_word(address: &Address) -> FieldBytes {
    let mut word = [0u8; HASH_SIZE];
    word[HASH_SIZE - ADDRESS_BYTES..].copy_from_slice(address.as_bytes());
    word
}

/// The address as a contributor-tree leaf.
///
/// A 160-bit value is always below the BN254 scalar modulus, so no
/// reduction takes place.
#[must_use]
pub fn address_to_field(address: &Address) -> Fr {
    Fr::from_be_bytes_mod_order(&address_to_word(address))
}
