use chrono::{DateTime, Utc};
use serde_json::Value;

/// Staging tables holding subgraph payloads exactly as extracted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StagingTable {
    Pools,
    PoolSnapshots,
    RateProviders,
}

impl StagingTable {
    pub fn table_name(&self) -> &'static str {
        match self {
            StagingTable::Pools => "balancer.pools_raw",
            StagingTable::PoolSnapshots => "balancer.pool_snapshots_raw",
            StagingTable::RateProviders => "balancer.rate_providers_raw",
        }
    }
}

/// One raw subgraph entity (PostgreSQL staging row).
///
/// Unique Key: external_id (the subgraph entity id)
/// `raw_data` is the entity JSON with the source `network` embedded, so the
/// transform steps can be re-run from staging alone.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRecord {
    pub external_id: String,
    pub raw_data: Value,
}

impl RawRecord {
    pub fn new(external_id: String, raw_data: Value) -> Self {
        Self {
            external_id,
            raw_data,
        }
    }
}

/// One entry of the veBAL voting list (PostgreSQL staging row).
///
/// Unique Key: (extracted_at, address, pool_external_id)
/// Each extraction run writes its own generation; the latest generation is
/// the authoritative gauge set used for pruning.
#[derive(Debug, Clone, PartialEq)]
pub struct RawGauge {
    pub extracted_at: DateTime<Utc>,
    pub address: String,
    pub pool_external_id: String,
    pub raw_data: Value,
}
