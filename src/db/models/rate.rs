use chrono::{DateTime, Utc};

/// Rate provider registered for a pool token (PostgreSQL)
///
/// Unique Key: (pool_external_id, token_address)
/// Populated from the subgraph `priceRateProviders` entities. Tokens without
/// a rate provider never contribute token-yield APR.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateProvider {
    pub pool_external_id: String,
    pub token_address: String,
    pub network_slug: String,
    pub address: String,
}

/// Rate reported by a token's rate provider at UTC midnight (PostgreSQL)
///
/// Unique Key: (token_address, network_slug, timestamp)
/// `rate` is normalised from 18 decimals.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenRate {
    pub token_address: String,
    pub network_slug: String,
    pub timestamp: DateTime<Utc>,
    pub rate: f64,
}
