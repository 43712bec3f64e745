use chrono::{DateTime, Utc};

/// Balancer pool metadata (PostgreSQL)
///
/// Unique Key: external_id (the subgraph pool id)
/// Rows are upserted from the raw payload on every run; every mutable column
/// is overwritten so metadata drift heals itself on re-extraction.
#[derive(Debug, Clone, PartialEq)]
pub struct Pool {
    pub external_id: String,
    pub pool_type: Option<String>,
    pub address: Option<String>,
    pub symbol: Option<String>,
    pub total_liquidity: Option<f64>,
    pub network_slug: Option<String>,
    pub external_created_at: Option<DateTime<Utc>>,
}

/// Token membership of a pool (PostgreSQL)
///
/// Unique Key: (pool_external_id, token_address)
/// `token_index` is the 1-based position of the token in the pool's token
/// list and matches the order of a snapshot's `amounts` array.
#[derive(Debug, Clone, PartialEq)]
pub struct PoolToken {
    pub pool_external_id: String,
    pub token_address: String,
    pub network_slug: String,
    pub weight: Option<f64>,
    pub token_index: i32,
    pub is_exempt_from_yield_protocol_fee: bool,
}

impl Pool {
    /// Whether `token` is this pool's own BPT (composable pools list it as a token).
    pub fn is_own_bpt(&self, token: &str) -> bool {
        self.address
            .as_deref()
            .is_some_and(|address| address.eq_ignore_ascii_case(token))
    }
}
