//! Utility functions for the saleboard indexer.
//!
//! - [`address`] - Canonical contract address keys
//! - [`conversion`] - Type conversions (U256, f64, hex encoding)

mod address;
mod conversion;

// ============================================
// Common Constants
// ============================================

/// The Ethereum zero address (0x0000000000000000000000000000000000000000)
pub const ZERO_ADDRESS: &str = "0x0000000000000000000000000000000000000000";

// ============================================
// Re-exports
// ============================================

pub use address::{address_key, canonical_address};
pub use conversion::{hex_encode, u256_to_f64, u256_to_f64_safe, wei_to_volume, NATIVE_DECIMALS};
