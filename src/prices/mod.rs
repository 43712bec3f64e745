//! Historical token prices and block lookups.

mod defillama;

pub use defillama::{BlockAt, CoinPrice, DefiLlamaClient};

/// BAL token on Ethereum mainnet.
pub const BAL_ADDRESS: &str = "0xba100000625a3754423978a60c9317c58a424e3d";

/// Network the BAL price is quoted on.
pub const BAL_NETWORK: &str = "ethereum";
