use chrono::{DateTime, Utc};

/// One pool-day row of the API statistics query.
///
/// `volume` is the day-over-day swap volume delta and is `None` on the first
/// day of a pool's history. `voting_share` comes from the preferred gauge's
/// snapshot for the round containing the day.
#[derive(Debug, Clone, PartialEq)]
pub struct PoolDayStats {
    pub pool_external_id: String,
    pub timestamp: DateTime<Utc>,
    pub symbol: Option<String>,
    pub network_slug: Option<String>,
    pub pool_type: Option<String>,
    pub liquidity: f64,
    pub volume: Option<f64>,
    pub vebal_apr: f64,
    pub swap_fee_apr: f64,
    pub collected_fees_usd: f64,
    pub bal_price_usd: Option<f64>,
    pub voting_share: Option<f64>,
}

/// Token of a pool with its display metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct PoolTokenInfo {
    pub pool_external_id: String,
    pub address: String,
    pub symbol: Option<String>,
    pub weight: Option<f64>,
    pub logo_uri: Option<String>,
}

/// Token-yield APR of one token of a pool on one day.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenYieldStat {
    pub pool_external_id: String,
    pub timestamp: DateTime<Utc>,
    pub token_address: String,
    pub symbol: Option<String>,
    pub value: f64,
}
