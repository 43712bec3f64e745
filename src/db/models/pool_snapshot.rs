use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_with::{serde_as, DisplayFromStr};

/// Pool snapshot as staged from the subgraph `poolSnapshots` query.
///
/// BigDecimal fields arrive as strings, `timestamp` as unix seconds. The
/// `network` field is the one embedded by the extractor.
#[serde_as]
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SubgraphPoolSnapshot {
    pub id: String,
    pub pool: SnapshotPool,
    #[serde_as(as = "Vec<DisplayFromStr>")]
    pub amounts: Vec<f64>,
    #[serde_as(as = "DisplayFromStr")]
    pub total_shares: f64,
    #[serde_as(as = "DisplayFromStr")]
    pub swap_volume: f64,
    #[serde_as(as = "DisplayFromStr")]
    pub swap_fees: f64,
    #[serde_as(as = "DisplayFromStr")]
    pub liquidity: f64,
    pub timestamp: i64,
    #[serde(default)]
    pub network: Option<String>,
}

#[serde_as]
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotPool {
    pub id: String,
    #[serde_as(as = "Option<DisplayFromStr>")]
    #[serde(default)]
    pub protocol_yield_fee_cache: Option<f64>,
    #[serde_as(as = "Option<DisplayFromStr>")]
    #[serde(default)]
    pub protocol_swap_fee_cache: Option<f64>,
}

impl SubgraphPoolSnapshot {
    pub fn time(&self) -> anyhow::Result<DateTime<Utc>> {
        DateTime::from_timestamp(self.timestamp, 0)
            .with_context(|| format!("Invalid timestamp {} for snapshot {}", self.timestamp, self.id))
    }
}

/// Daily pool state (PostgreSQL)
///
/// Unique Key: external_id = "{pool_external_id}-{YYYY-MM-DD HH:MM:SS}"
/// One row per pool per calendar day, forward-filled from the most recent raw
/// snapshot at or before that day.
#[derive(Debug, Clone, PartialEq)]
pub struct PoolSnapshot {
    pub external_id: String,
    pub pool_external_id: String,
    pub timestamp: DateTime<Utc>,
    pub amounts: Vec<f64>,
    pub total_shares: f64,
    pub swap_volume: f64,
    pub swap_fees: f64,
    pub liquidity: f64,
    pub protocol_yield_fee_cache: Option<f64>,
    pub protocol_swap_fee_cache: Option<f64>,
}

impl PoolSnapshot {
    /// Deterministic id of a pool's snapshot for a calendar day.
    pub fn external_id_for(pool_external_id: &str, day: DateTime<Utc>) -> String {
        format!("{}-{}", pool_external_id, day.format("%Y-%m-%d %H:%M:%S"))
    }

    /// Project a raw snapshot onto calendar day `day`.
    pub fn from_raw(raw: &SubgraphPoolSnapshot, day: DateTime<Utc>) -> Self {
        Self {
            external_id: Self::external_id_for(&raw.pool.id, day),
            pool_external_id: raw.pool.id.clone(),
            timestamp: day,
            amounts: raw.amounts.clone(),
            total_shares: raw.total_shares,
            swap_volume: raw.swap_volume,
            swap_fees: raw.swap_fees,
            liquidity: raw.liquidity,
            protocol_yield_fee_cache: raw.pool.protocol_yield_fee_cache,
            protocol_swap_fee_cache: raw.pool.protocol_swap_fee_cache,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_subgraph_snapshot() {
        let snapshot: SubgraphPoolSnapshot = serde_json::from_value(json!({
            "id": "0xabc-19000",
            "pool": {
                "id": "0xabc",
                "protocolYieldFeeCache": "0.5",
                "protocolSwapFeeCache": null
            },
            "amounts": ["1.5", "2"],
            "totalShares": "10",
            "swapVolume": "1000.25",
            "protocolFee": null,
            "swapFees": "3.5",
            "liquidity": "2500",
            "timestamp": 1_641_600_000,
            "network": "ethereum"
        }))
        .unwrap();

        assert_eq!(snapshot.amounts, vec![1.5, 2.0]);
        assert_eq!(snapshot.pool.protocol_yield_fee_cache, Some(0.5));
        assert_eq!(snapshot.pool.protocol_swap_fee_cache, None);
        assert_eq!(snapshot.liquidity, 2500.0);
        assert_eq!(snapshot.time().unwrap().timestamp(), 1_641_600_000);
    }

    #[test]
    fn test_external_id_matches_postgres_timestamp_text() {
        let day = DateTime::from_timestamp(1_641_600_000, 0).unwrap();
        assert_eq!(
            PoolSnapshot::external_id_for("0xabc", day),
            "0xabc-2022-01-08 00:00:00"
        );
    }
}
