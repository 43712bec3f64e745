use std::collections::HashSet;

use anyhow::Context;
use chrono::{DateTime, Utc};
use log::{error, warn};
use tokio_postgres::{
    types::{Json, ToSql},
    Row,
};

use crate::db::{
    models::{
        BalEmission, Gauge, GaugeSnapshot, Network, Pool, PoolSnapshot, PoolToken, RateProvider,
        RawGauge, RawRecord, StagingTable, SubgraphPoolSnapshot, SwapFeeApr, TokenPrice,
        TokenRate, TokenYieldApr, VebalApr, VebalRound,
    },
    postgres::PostgresClient,
    InsertRows,
};

type Param<'a> = &'a (dyn ToSql + Sync);

/// Build VALUES placeholders: ($1,$2,$3), ($4,$5,$6), ...
fn values_placeholders(rows: usize, cols_per_row: usize) -> String {
    (0..rows)
        .map(|i| {
            let start = i * cols_per_row + 1;
            let placeholders: Vec<String> = (start..start + cols_per_row)
                .map(|n| format!("${}", n))
                .collect();
            format!("({})", placeholders.join(", "))
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// Sanitize a string for PostgreSQL by removing null bytes (0x00)
/// which are invalid in UTF-8 text columns
fn sanitize_string(s: &str) -> String {
    s.replace('\0', "")
}

/// Staging table handle: raw records are written to the table of `kind`.
pub struct StagingWriter<'a> {
    client: &'a PostgresClient,
    kind: StagingTable,
}

impl PostgresClient {
    pub fn staging(&self, kind: StagingTable) -> StagingWriter<'_> {
        StagingWriter { client: self, kind }
    }

    /// Multi-row `INSERT ... ON CONFLICT DO NOTHING`, returns the inserted row count.
    async fn insert_ignore(
        &self,
        target: &str,
        cols_per_row: usize,
        params: &[Param<'_>],
    ) -> anyhow::Result<u64> {
        if params.is_empty() {
            return Ok(0);
        }

        let rows = params.len() / cols_per_row;
        let query = format!(
            "INSERT INTO {} VALUES {} ON CONFLICT DO NOTHING",
            target,
            values_placeholders(rows, cols_per_row)
        );

        let client = self.pool.get().await?;
        client.execute(&query, params).await.map_err(|e| {
            error!("Failed to batch insert {} rows into {}: {:?}", rows, target, e);
            anyhow::Error::new(e).context(format!("Insert into {} failed", target))
        })
    }

    // ==================== NETWORKS ====================

    /// Upsert the network seed table.
    pub async fn upsert_networks(&self, networks: &[Network]) -> anyhow::Result<()> {
        if networks.is_empty() {
            return Ok(());
        }

        const COLS_PER_ROW: usize = 3;

        let query = format!(
            r#"
            INSERT INTO balancer.networks (name, slug, chain_id) VALUES {}
            ON CONFLICT (slug) DO UPDATE SET
                chain_id = EXCLUDED.chain_id,
                updated_at = NOW()
            "#,
            values_placeholders(networks.len(), COLS_PER_ROW)
        );

        let mut params: Vec<Param> = Vec::with_capacity(networks.len() * COLS_PER_ROW);
        for network in networks {
            params.push(&network.name);
            params.push(&network.slug);
            params.push(&network.chain_id);
        }

        let client = self.pool.get().await?;
        client
            .execute(&query, &params)
            .await
            .context("Failed to upsert networks")?;

        Ok(())
    }

    // ==================== SNAPSHOTS ====================

    /// Pool ids that have at least one raw snapshot staged.
    pub async fn raw_snapshot_pool_ids(&self) -> anyhow::Result<Vec<String>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                r#"
                SELECT DISTINCT raw_data->'pool'->>'id' AS pool_id
                FROM balancer.pool_snapshots_raw
                ORDER BY pool_id
                "#,
                &[],
            )
            .await?;

        Ok(rows.iter().map(|row| row.get("pool_id")).collect())
    }

    /// Raw snapshots of `pool_ids`, ordered by pool then timestamp.
    ///
    /// Payloads that no longer decode are logged and skipped.
    pub async fn raw_snapshots_for(
        &self,
        pool_ids: &[String],
    ) -> anyhow::Result<Vec<SubgraphPoolSnapshot>> {
        if pool_ids.is_empty() {
            return Ok(vec![]);
        }

        let client = self.pool.get().await?;
        let rows = client
            .query(
                r#"
                SELECT external_id, raw_data
                FROM balancer.pool_snapshots_raw
                WHERE raw_data->'pool'->>'id' = ANY($1)
                ORDER BY raw_data->'pool'->>'id', (raw_data->>'timestamp')::BIGINT
                "#,
                &[&pool_ids],
            )
            .await?;

        let mut snapshots = Vec::with_capacity(rows.len());
        for row in rows {
            let external_id: String = row.get("external_id");
            let raw_data: serde_json::Value = row.get("raw_data");
            match serde_json::from_value::<SubgraphPoolSnapshot>(raw_data) {
                Ok(snapshot) => snapshots.push(snapshot),
                Err(e) => warn!("Skipping undecodable raw snapshot {}: {}", external_id, e),
            }
        }

        Ok(snapshots)
    }

    /// Pool ids present in the daily snapshot calendar.
    pub async fn daily_snapshot_pool_ids(&self) -> anyhow::Result<Vec<String>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                "SELECT DISTINCT pool_external_id FROM balancer.pool_snapshots ORDER BY pool_external_id",
                &[],
            )
            .await?;

        Ok(rows.iter().map(|row| row.get("pool_external_id")).collect())
    }

    /// Daily snapshots of `pool_ids`, ordered by pool then day.
    pub async fn daily_snapshots_for(
        &self,
        pool_ids: &[String],
    ) -> anyhow::Result<Vec<PoolSnapshot>> {
        if pool_ids.is_empty() {
            return Ok(vec![]);
        }

        let client = self.pool.get().await?;
        let rows = client
            .query(
                r#"
                SELECT
                    external_id, pool_external_id, timestamp, amounts, total_shares,
                    swap_volume, swap_fees, liquidity,
                    protocol_yield_fee_cache, protocol_swap_fee_cache
                FROM balancer.pool_snapshots
                WHERE pool_external_id = ANY($1)
                ORDER BY pool_external_id, timestamp
                "#,
                &[&pool_ids],
            )
            .await?;

        Ok(rows.iter().map(row_to_pool_snapshot).collect())
    }

    /// Distinct calendar days of the daily snapshots.
    pub async fn snapshot_days(&self) -> anyhow::Result<Vec<DateTime<Utc>>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                "SELECT DISTINCT timestamp FROM balancer.pool_snapshots ORDER BY timestamp",
                &[],
            )
            .await?;

        Ok(rows.iter().map(|row| row.get("timestamp")).collect())
    }

    // ==================== POOLS ====================

    pub async fn get_pools(&self, external_ids: &[String]) -> anyhow::Result<Vec<Pool>> {
        if external_ids.is_empty() {
            return Ok(vec![]);
        }

        let client = self.pool.get().await?;
        let rows = client
            .query(
                r#"
                SELECT
                    external_id, pool_type, address, symbol, total_liquidity,
                    network_slug, external_created_at
                FROM balancer.pools
                WHERE external_id = ANY($1)
                "#,
                &[&external_ids],
            )
            .await?;

        Ok(rows.iter().map(row_to_pool).collect())
    }

    /// Tokens of `pool_ids`, ordered by pool then token index.
    pub async fn get_pool_tokens(&self, pool_ids: &[String]) -> anyhow::Result<Vec<PoolToken>> {
        if pool_ids.is_empty() {
            return Ok(vec![]);
        }

        let client = self.pool.get().await?;
        let rows = client
            .query(
                r#"
                SELECT
                    pool_external_id, token_address, network_slug, weight,
                    token_index, is_exempt_from_yield_protocol_fee
                FROM balancer.pool_tokens
                WHERE pool_external_id = ANY($1)
                ORDER BY pool_external_id, token_index
                "#,
                &[&pool_ids],
            )
            .await?;

        Ok(rows
            .iter()
            .map(|row| PoolToken {
                pool_external_id: row.get("pool_external_id"),
                token_address: row.get("token_address"),
                network_slug: row.get("network_slug"),
                weight: row.get("weight"),
                token_index: row.get("token_index"),
                is_exempt_from_yield_protocol_fee: row.get("is_exempt_from_yield_protocol_fee"),
            })
            .collect())
    }

    // ==================== GAUGES ====================

    pub async fn get_gauges(&self) -> anyhow::Result<Vec<Gauge>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                r#"
                SELECT address, pool_external_id, is_killed, external_created_at, network_slug
                FROM balancer.gauges
                "#,
                &[],
            )
            .await?;

        Ok(rows
            .iter()
            .map(|row| Gauge {
                address: row.get("address"),
                pool_external_id: row.get("pool_external_id"),
                is_killed: row.get("is_killed"),
                external_created_at: row.get("external_created_at"),
                network_slug: row.get("network_slug"),
            })
            .collect())
    }

    pub async fn get_gauge_snapshots(&self) -> anyhow::Result<Vec<GaugeSnapshot>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                r#"
                SELECT gauge_address, timestamp, relative_weight, round_number
                FROM balancer.gauge_snapshots
                "#,
                &[],
            )
            .await?;

        Ok(rows
            .iter()
            .map(|row| GaugeSnapshot {
                gauge_address: row.get("gauge_address"),
                timestamp: row.get("timestamp"),
                relative_weight: row.get("relative_weight"),
                round_number: row.get("round_number"),
            })
            .collect())
    }

    /// (gauge, round) pairs still lacking a gauge snapshot.
    ///
    /// A pair qualifies when the round starts after the gauge was added and the
    /// gauge's pool has a daily snapshot at the round start.
    pub async fn missing_gauge_snapshot_pairs(&self) -> anyhow::Result<Vec<(String, VebalRound)>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                r#"
                SELECT DISTINCT g.address, vr.round_number, vr.start_date, vr.end_date
                FROM balancer.gauges g
                JOIN balancer.pool_snapshots ps ON ps.pool_external_id = g.pool_external_id
                JOIN balancer.vebal_rounds vr ON vr.start_date = ps.timestamp
                WHERE ps.timestamp > g.external_created_at
                  AND NOT EXISTS (
                      SELECT 1 FROM balancer.gauge_snapshots gs
                      WHERE gs.gauge_address = g.address
                        AND gs.round_number = vr.round_number
                  )
                ORDER BY vr.start_date, g.address
                "#,
                &[],
            )
            .await?;

        Ok(rows
            .iter()
            .map(|row| (row.get("address"), row_to_vebal_round(row)))
            .collect())
    }

    // ==================== PRICES & EMISSIONS ====================

    pub async fn get_token_prices(
        &self,
        token_address: &str,
        network_slug: &str,
    ) -> anyhow::Result<Vec<TokenPrice>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                r#"
                SELECT token_address, network_slug, timestamp, price_usd
                FROM balancer.token_prices
                WHERE token_address = $1 AND network_slug = $2
                ORDER BY timestamp
                "#,
                &[&token_address, &network_slug],
            )
            .await?;

        Ok(rows
            .iter()
            .map(|row| TokenPrice {
                token_address: row.get("token_address"),
                network_slug: row.get("network_slug"),
                timestamp: row.get("timestamp"),
                price_usd: row.get("price_usd"),
            })
            .collect())
    }

    /// Snapshot days that have no price yet for the given token.
    pub async fn days_missing_price(
        &self,
        token_address: &str,
        network_slug: &str,
    ) -> anyhow::Result<Vec<DateTime<Utc>>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                r#"
                SELECT DISTINCT ps.timestamp
                FROM balancer.pool_snapshots ps
                WHERE NOT EXISTS (
                    SELECT 1 FROM balancer.token_prices tp
                    WHERE tp.token_address = $1
                      AND tp.network_slug = $2
                      AND tp.timestamp = ps.timestamp
                )
                ORDER BY ps.timestamp
                "#,
                &[&token_address, &network_slug],
            )
            .await?;

        Ok(rows.iter().map(|row| row.get("timestamp")).collect())
    }

    pub async fn get_bal_emissions(&self) -> anyhow::Result<Vec<BalEmission>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                "SELECT timestamp, week_emission FROM balancer.bal_emission ORDER BY timestamp",
                &[],
            )
            .await?;

        Ok(rows
            .iter()
            .map(|row| BalEmission {
                timestamp: row.get("timestamp"),
                week_emission: row.get("week_emission"),
            })
            .collect())
    }

    // ==================== RATES ====================

    pub async fn get_rate_providers(&self) -> anyhow::Result<Vec<RateProvider>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                r#"
                SELECT pool_external_id, token_address, network_slug, address
                FROM balancer.pool_rate_providers
                ORDER BY network_slug, pool_external_id
                "#,
                &[],
            )
            .await?;

        Ok(rows
            .iter()
            .map(|row| RateProvider {
                pool_external_id: row.get("pool_external_id"),
                token_address: row.get("token_address"),
                network_slug: row.get("network_slug"),
                address: row.get("address"),
            })
            .collect())
    }

    /// Token rates recorded at or after `since`.
    pub async fn get_token_rates(&self, since: DateTime<Utc>) -> anyhow::Result<Vec<TokenRate>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                r#"
                SELECT token_address, network_slug, timestamp, rate
                FROM balancer.token_rates
                WHERE timestamp >= $1
                ORDER BY token_address, timestamp
                "#,
                &[&since],
            )
            .await?;

        Ok(rows
            .iter()
            .map(|row| TokenRate {
                token_address: row.get("token_address"),
                network_slug: row.get("network_slug"),
                timestamp: row.get("timestamp"),
                rate: row.get("rate"),
            })
            .collect())
    }

    /// (token, network, day) keys already present in `token_rates` since `since`.
    pub async fn token_rate_keys(
        &self,
        since: DateTime<Utc>,
    ) -> anyhow::Result<HashSet<(String, String, DateTime<Utc>)>> {
        Ok(self
            .get_token_rates(since)
            .await?
            .into_iter()
            .map(|rate| (rate.token_address, rate.network_slug, rate.timestamp))
            .collect())
    }
}

// ==================== INSERT-IGNORE ====================

impl InsertRows<RawRecord> for StagingWriter<'_> {
    async fn insert_rows(&self, rows: &[RawRecord]) -> anyhow::Result<u64> {
        let mut params: Vec<Param> = Vec::with_capacity(rows.len() * 2);
        for row in rows {
            params.push(&row.external_id);
            params.push(&row.raw_data);
        }

        let target = format!("{} (external_id, raw_data)", self.kind.table_name());
        self.client.insert_ignore(&target, 2, &params).await
    }
}

impl InsertRows<RawGauge> for PostgresClient {
    async fn insert_rows(&self, rows: &[RawGauge]) -> anyhow::Result<u64> {
        let mut params: Vec<Param> = Vec::with_capacity(rows.len() * 4);
        for row in rows {
            params.push(&row.extracted_at);
            params.push(&row.address);
            params.push(&row.pool_external_id);
            params.push(&row.raw_data);
        }

        self.insert_ignore(
            "balancer.gauges_raw (extracted_at, address, pool_external_id, raw_data)",
            4,
            &params,
        )
        .await
    }
}

impl InsertRows<VebalRound> for PostgresClient {
    async fn insert_rows(&self, rows: &[VebalRound]) -> anyhow::Result<u64> {
        let mut params: Vec<Param> = Vec::with_capacity(rows.len() * 3);
        for row in rows {
            params.push(&row.round_number);
            params.push(&row.start_date);
            params.push(&row.end_date);
        }

        self.insert_ignore(
            "balancer.vebal_rounds (round_number, start_date, end_date)",
            3,
            &params,
        )
        .await
    }
}

impl InsertRows<PoolSnapshot> for PostgresClient {
    async fn insert_rows(&self, rows: &[PoolSnapshot]) -> anyhow::Result<u64> {
        const COLS_PER_ROW: usize = 10;

        let amounts: Vec<Json<&Vec<f64>>> = rows.iter().map(|row| Json(&row.amounts)).collect();

        let mut params: Vec<Param> = Vec::with_capacity(rows.len() * COLS_PER_ROW);
        for (i, row) in rows.iter().enumerate() {
            params.push(&row.external_id);
            params.push(&row.pool_external_id);
            params.push(&row.timestamp);
            params.push(&amounts[i]);
            params.push(&row.total_shares);
            params.push(&row.swap_volume);
            params.push(&row.swap_fees);
            params.push(&row.liquidity);
            params.push(&row.protocol_yield_fee_cache);
            params.push(&row.protocol_swap_fee_cache);
        }

        self.insert_ignore(
            r#"balancer.pool_snapshots (
                external_id, pool_external_id, timestamp, amounts, total_shares,
                swap_volume, swap_fees, liquidity,
                protocol_yield_fee_cache, protocol_swap_fee_cache
            )"#,
            COLS_PER_ROW,
            &params,
        )
        .await
    }
}

impl InsertRows<GaugeSnapshot> for PostgresClient {
    async fn insert_rows(&self, rows: &[GaugeSnapshot]) -> anyhow::Result<u64> {
        let mut params: Vec<Param> = Vec::with_capacity(rows.len() * 4);
        for row in rows {
            params.push(&row.gauge_address);
            params.push(&row.round_number);
            params.push(&row.timestamp);
            params.push(&row.relative_weight);
        }

        self.insert_ignore(
            "balancer.gauge_snapshots (gauge_address, round_number, timestamp, relative_weight)",
            4,
            &params,
        )
        .await
    }
}

impl InsertRows<TokenPrice> for PostgresClient {
    async fn insert_rows(&self, rows: &[TokenPrice]) -> anyhow::Result<u64> {
        let mut params: Vec<Param> = Vec::with_capacity(rows.len() * 4);
        for row in rows {
            params.push(&row.token_address);
            params.push(&row.network_slug);
            params.push(&row.timestamp);
            params.push(&row.price_usd);
        }

        self.insert_ignore(
            "balancer.token_prices (token_address, network_slug, timestamp, price_usd)",
            4,
            &params,
        )
        .await
    }
}

impl InsertRows<BalEmission> for PostgresClient {
    async fn insert_rows(&self, rows: &[BalEmission]) -> anyhow::Result<u64> {
        let mut params: Vec<Param> = Vec::with_capacity(rows.len() * 2);
        for row in rows {
            params.push(&row.timestamp);
            params.push(&row.week_emission);
        }

        self.insert_ignore("balancer.bal_emission (timestamp, week_emission)", 2, &params)
            .await
    }
}

impl InsertRows<TokenRate> for PostgresClient {
    async fn insert_rows(&self, rows: &[TokenRate]) -> anyhow::Result<u64> {
        let mut params: Vec<Param> = Vec::with_capacity(rows.len() * 4);
        for row in rows {
            params.push(&row.token_address);
            params.push(&row.network_slug);
            params.push(&row.timestamp);
            params.push(&row.rate);
        }

        self.insert_ignore(
            "balancer.token_rates (token_address, network_slug, timestamp, rate)",
            4,
            &params,
        )
        .await
    }
}

impl InsertRows<SwapFeeApr> for PostgresClient {
    async fn insert_rows(&self, rows: &[SwapFeeApr]) -> anyhow::Result<u64> {
        let mut params: Vec<Param> = Vec::with_capacity(rows.len() * 5);
        for row in rows {
            params.push(&row.external_id);
            params.push(&row.pool_external_id);
            params.push(&row.timestamp);
            params.push(&row.collected_fees_usd);
            params.push(&row.value);
        }

        self.insert_ignore(
            "balancer.swap_fee_apr (external_id, pool_external_id, timestamp, collected_fees_usd, value)",
            5,
            &params,
        )
        .await
    }
}

impl InsertRows<VebalApr> for PostgresClient {
    async fn insert_rows(&self, rows: &[VebalApr]) -> anyhow::Result<u64> {
        let mut params: Vec<Param> = Vec::with_capacity(rows.len() * 4);
        for row in rows {
            params.push(&row.external_id);
            params.push(&row.pool_external_id);
            params.push(&row.timestamp);
            params.push(&row.value);
        }

        self.insert_ignore(
            "balancer.vebal_apr (external_id, pool_external_id, timestamp, value)",
            4,
            &params,
        )
        .await
    }
}

impl InsertRows<TokenYieldApr> for PostgresClient {
    async fn insert_rows(&self, rows: &[TokenYieldApr]) -> anyhow::Result<u64> {
        let mut params: Vec<Param> = Vec::with_capacity(rows.len() * 5);
        for row in rows {
            params.push(&row.external_id);
            params.push(&row.pool_external_id);
            params.push(&row.token_address);
            params.push(&row.timestamp);
            params.push(&row.value);
        }

        self.insert_ignore(
            "balancer.token_yield_apr (external_id, pool_external_id, token_address, timestamp, value)",
            5,
            &params,
        )
        .await
    }
}

// ==================== ROW MAPPERS ====================

fn row_to_pool(row: &Row) -> Pool {
    let symbol: Option<String> = row.get("symbol");
    Pool {
        external_id: row.get("external_id"),
        pool_type: row.get("pool_type"),
        address: row.get("address"),
        symbol: symbol.as_deref().map(sanitize_string),
        total_liquidity: row.get("total_liquidity"),
        network_slug: row.get("network_slug"),
        external_created_at: row.get("external_created_at"),
    }
}

fn row_to_pool_snapshot(row: &Row) -> PoolSnapshot {
    let amounts: Json<Vec<f64>> = row.get("amounts");
    PoolSnapshot {
        external_id: row.get("external_id"),
        pool_external_id: row.get("pool_external_id"),
        timestamp: row.get("timestamp"),
        amounts: amounts.0,
        total_shares: row.get("total_shares"),
        swap_volume: row.get("swap_volume"),
        swap_fees: row.get("swap_fees"),
        liquidity: row.get("liquidity"),
        protocol_yield_fee_cache: row.get("protocol_yield_fee_cache"),
        protocol_swap_fee_cache: row.get("protocol_swap_fee_cache"),
    }
}

fn row_to_vebal_round(row: &Row) -> VebalRound {
    VebalRound {
        round_number: row.get("round_number"),
        start_date: row.get("start_date"),
        end_date: row.get("end_date"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_values_placeholders_numbering() {
        assert_eq!(values_placeholders(2, 3), "($1, $2, $3), ($4, $5, $6)");
        assert_eq!(values_placeholders(1, 1), "($1)");
        assert_eq!(values_placeholders(0, 4), "");
    }

    #[test]
    fn test_sanitize_string_strips_nul() {
        assert_eq!(sanitize_string("B-\0stETH"), "B-stETH");
    }
}
