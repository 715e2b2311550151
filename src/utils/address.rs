//! Contract address canonicalization.
//!
//! Every aggregate is keyed by the lowercase `0x`-prefixed hex form of the
//! contract address. Anything that cannot be parsed as a 20-byte address is
//! rejected rather than stored under a key nobody will ever look up.

use std::str::FromStr;

use alloy::primitives::Address;

use super::hex_encode;

/// Canonical key form of an already-decoded address.
pub fn address_key(address: &Address) -> String {
    hex_encode(address.as_slice())
}

/// Normalize an address string to its canonical key form.
///
/// Accepts mixed case (including EIP-55 checksummed input) and surrounding
/// whitespace. Returns `None` if the input is not a 20-byte hex address.
pub fn canonical_address(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    // Casing carries no meaning for the key, so a bad EIP-55 checksum is not
    // a reason to reject.
    let lowered = trimmed.to_ascii_lowercase();
    Address::from_str(&lowered).ok().map(|a| address_key(&a))
}
