use chrono::{DateTime, Utc};

/// Historical USD price of a token at UTC midnight (PostgreSQL)
///
/// Unique Key: (token_address, network_slug, timestamp)
#[derive(Debug, Clone, PartialEq)]
pub struct TokenPrice {
    pub token_address: String,
    pub network_slug: String,
    pub timestamp: DateTime<Utc>,
    pub price_usd: f64,
}

/// Weekly BAL emission in effect at a snapshot timestamp (PostgreSQL)
///
/// Unique Key: timestamp
#[derive(Debug, Clone, PartialEq)]
pub struct BalEmission {
    pub timestamp: DateTime<Utc>,
    pub week_emission: f64,
}
