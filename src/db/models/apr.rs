use chrono::{DateTime, Utc};

/// Swap-fee APR of a pool for one day (PostgreSQL)
///
/// Unique Key: external_id (the daily pool snapshot's id)
/// Write-once: rows are inserted with `ON CONFLICT DO NOTHING`.
#[derive(Debug, Clone, PartialEq)]
pub struct SwapFeeApr {
    pub external_id: String,
    pub pool_external_id: String,
    pub timestamp: DateTime<Utc>,
    pub collected_fees_usd: f64,
    pub value: f64,
}

/// veBAL emission APR of a pool for one day (PostgreSQL)
///
/// Unique Key: external_id (the daily pool snapshot's id)
#[derive(Debug, Clone, PartialEq)]
pub struct VebalApr {
    pub external_id: String,
    pub pool_external_id: String,
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

/// Yield-bearing token APR contributed by one token of a pool for one day (PostgreSQL)
///
/// Unique Key: external_id = "{pool_external_id}-{token_address}-{timestamp}"
#[derive(Debug, Clone, PartialEq)]
pub struct TokenYieldApr {
    pub external_id: String,
    pub pool_external_id: String,
    pub token_address: String,
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

impl TokenYieldApr {
    pub fn external_id_for(
        pool_external_id: &str,
        token_address: &str,
        day: DateTime<Utc>,
    ) -> String {
        format!(
            "{}-{}-{}",
            pool_external_id,
            token_address,
            day.format("%Y-%m-%d %H:%M:%S")
        )
    }
}
