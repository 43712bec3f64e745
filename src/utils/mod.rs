//! Utility functions shared by the ETL and the on-chain readers.
//!
//! - [`conversion`] - Fixed-point U256 to f64 conversion

mod conversion;

/// The Ethereum zero address (0x0000000000000000000000000000000000000000)
/// Registered as a rate provider for tokens that have none.
pub const ZERO_ADDRESS: &str = "0x0000000000000000000000000000000000000000";

pub use conversion::{u256_to_f64, wad_to_f64};
