use anyhow::Context;
use chrono::{DateTime, Utc};
use log::debug;
use tokio_postgres::types::ToSql;

use crate::{
    db::{models::StagingTable, postgres::PostgresClient},
    etl::registry::network_slug_sql,
    utils::ZERO_ADDRESS,
};

/// Drops voting-list generations older than the one just applied.
const PRUNE_GAUGE_GENERATIONS: &str =
    "DELETE FROM balancer.gauges_raw WHERE extracted_at < $1";

/// Set-based normalisation of the staging tables into the typed tables.
///
/// Every statement is idempotent and may be re-run over the full staged history.
impl PostgresClient {
    async fn execute_step(
        &self,
        step: &str,
        query: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> anyhow::Result<u64> {
        let client = self.pool.get().await?;
        let affected = client
            .execute(query, params)
            .await
            .with_context(|| format!("Transform step '{}' failed", step))?;
        debug!("{}: {} rows affected", step, affected);
        Ok(affected)
    }

    /// Ensure every network named in `source` exists before rows reference it.
    pub async fn transform_networks(&self, source: StagingTable) -> anyhow::Result<u64> {
        let slug = network_slug_sql("raw_data->>'network'");
        let query = format!(
            r#"
            INSERT INTO balancer.networks (slug)
            SELECT DISTINCT {slug}
            FROM {table}
            WHERE raw_data->>'network' IS NOT NULL
            ON CONFLICT (slug) DO NOTHING
            "#,
            table = source.table_name(),
        );
        self.execute_step("networks", &query, &[]).await
    }

    /// Upsert typed pools, overwriting every mutable column.
    pub async fn transform_pools(&self) -> anyhow::Result<u64> {
        let slug = network_slug_sql("raw_data->>'network'");
        let query = format!(
            r#"
            INSERT INTO balancer.pools (
                external_id, address, symbol, pool_type, pool_type_version,
                external_created_at, network_slug, raw_data, updated_at
            )
            SELECT
                raw_data->>'id',
                LOWER(raw_data->>'address'),
                raw_data->>'symbol',
                raw_data->>'poolType',
                (raw_data->>'poolTypeVersion')::NUMERIC,
                to_timestamp((raw_data->>'createTime')::BIGINT),
                {slug},
                raw_data,
                NOW()
            FROM balancer.pools_raw
            ON CONFLICT (external_id) DO UPDATE SET
                address = EXCLUDED.address,
                symbol = EXCLUDED.symbol,
                pool_type = EXCLUDED.pool_type,
                pool_type_version = EXCLUDED.pool_type_version,
                external_created_at = EXCLUDED.external_created_at,
                network_slug = EXCLUDED.network_slug,
                raw_data = EXCLUDED.raw_data,
                updated_at = NOW()
            "#
        );
        self.execute_step("pools", &query, &[]).await
    }

    /// Explode each pool's token list into tokens and pool tokens.
    ///
    /// `token_index` is the 1-based position in the raw token array.
    pub async fn transform_pool_tokens(&self) -> anyhow::Result<u64> {
        let slug = network_slug_sql("raw_data->>'network'");
        let tokens = format!(
            r#"
            INSERT INTO balancer.tokens (address, symbol, network_slug)
            SELECT DISTINCT ON (address, network_slug) address, symbol, network_slug
            FROM (
                SELECT
                    LOWER(token->>'address') AS address,
                    token->>'symbol' AS symbol,
                    {slug} AS network_slug
                FROM balancer.pools_raw,
                     jsonb_array_elements(raw_data->'tokens') AS token
            ) exploded
            ON CONFLICT (address, network_slug) DO NOTHING
            "#
        );
        self.execute_step("tokens", &tokens, &[]).await?;

        let pool_tokens = format!(
            r#"
            INSERT INTO balancer.pool_tokens (
                pool_external_id, token_address, network_slug, weight,
                token_index, is_exempt_from_yield_protocol_fee
            )
            SELECT DISTINCT ON (pool_external_id, token_address)
                pool_external_id, token_address, network_slug, weight, token_index, is_exempt
            FROM (
                SELECT
                    raw_data->>'id' AS pool_external_id,
                    LOWER(token.value->>'address') AS token_address,
                    {slug} AS network_slug,
                    (token.value->>'weight')::DOUBLE PRECISION AS weight,
                    token.ordinality::INTEGER AS token_index,
                    COALESCE((token.value->>'isExemptFromYieldProtocolFee')::BOOLEAN, FALSE) AS is_exempt
                FROM balancer.pools_raw,
                     jsonb_array_elements(raw_data->'tokens') WITH ORDINALITY AS token(value, ordinality)
            ) exploded
            ORDER BY pool_external_id, token_address, token_index
            ON CONFLICT (pool_external_id, token_address) DO UPDATE SET
                weight = EXCLUDED.weight,
                is_exempt_from_yield_protocol_fee = EXCLUDED.is_exempt_from_yield_protocol_fee
            "#
        );
        self.execute_step("pool tokens", &pool_tokens, &[]).await
    }

    /// Insert placeholder pools for snapshots whose pool was never extracted.
    pub async fn ensure_snapshot_pools(&self) -> anyhow::Result<u64> {
        let slug = network_slug_sql("raw_data->>'network'");
        let query = format!(
            r#"
            INSERT INTO balancer.pools (external_id, network_slug)
            SELECT DISTINCT raw_data->'pool'->>'id', {slug}
            FROM balancer.pool_snapshots_raw
            ON CONFLICT (external_id) DO NOTHING
            "#
        );
        self.execute_step("snapshot pools", &query, &[]).await
    }

    /// Most recent voting-list generation.
    pub async fn latest_gauge_extraction(&self) -> anyhow::Result<Option<DateTime<Utc>>> {
        let client = self.pool.get().await?;
        let row = client
            .query_one("SELECT MAX(extracted_at) AS extracted_at FROM balancer.gauges_raw", &[])
            .await?;
        Ok(row.get("extracted_at"))
    }

    /// Normalise networks, ensure pools, upsert gauges from generation
    /// `extracted_at`, delete gauges absent from it and drop older staged
    /// generations.
    pub async fn transform_gauges(&self, extracted_at: DateTime<Utc>) -> anyhow::Result<()> {
        let slug = network_slug_sql("raw_data->>'chain'");

        let networks = format!(
            r#"
            INSERT INTO balancer.networks (slug)
            SELECT DISTINCT {slug}
            FROM balancer.gauges_raw
            WHERE extracted_at = $1 AND raw_data->>'chain' IS NOT NULL
            ON CONFLICT (slug) DO NOTHING
            "#
        );
        self.execute_step("gauge networks", &networks, &[&extracted_at])
            .await?;

        let pools = format!(
            r#"
            INSERT INTO balancer.pools (external_id, address, symbol, pool_type, network_slug)
            SELECT DISTINCT ON (pool_external_id)
                pool_external_id,
                LOWER(raw_data->>'address'),
                raw_data->>'symbol',
                raw_data->>'type',
                {slug}
            FROM balancer.gauges_raw
            WHERE extracted_at = $1
            ORDER BY pool_external_id
            ON CONFLICT (external_id) DO NOTHING
            "#
        );
        self.execute_step("gauge pools", &pools, &[&extracted_at]).await?;

        let gauges = format!(
            r#"
            INSERT INTO balancer.gauges (
                address, pool_external_id, is_killed, external_created_at, network_slug, updated_at
            )
            SELECT
                address,
                pool_external_id,
                COALESCE((raw_data->'gauge'->>'isKilled')::BOOLEAN, FALSE),
                to_timestamp((raw_data->'gauge'->>'addedTimestamp')::BIGINT),
                {slug},
                NOW()
            FROM balancer.gauges_raw
            WHERE extracted_at = $1
            ON CONFLICT (address, pool_external_id) DO UPDATE SET
                is_killed = EXCLUDED.is_killed,
                external_created_at = EXCLUDED.external_created_at,
                network_slug = EXCLUDED.network_slug,
                updated_at = NOW()
            "#
        );
        self.execute_step("gauges", &gauges, &[&extracted_at]).await?;

        let prune = r#"
            DELETE FROM balancer.gauges g
            WHERE NOT EXISTS (
                SELECT 1 FROM balancer.gauges_raw r
                WHERE r.extracted_at = $1
                  AND r.address = g.address
                  AND r.pool_external_id = g.pool_external_id
            )
        "#;
        self.execute_step("gauge prune", prune, &[&extracted_at]).await?;

        self.execute_step("gauge staging prune", PRUNE_GAUGE_GENERATIONS, &[&extracted_at])
            .await?;

        Ok(())
    }

    /// Ensure pools and upsert the rate provider of each pool token.
    pub async fn transform_rate_providers(&self) -> anyhow::Result<u64> {
        let slug = network_slug_sql("raw_data->>'network'");

        let pools = format!(
            r#"
            INSERT INTO balancer.pools (external_id, network_slug)
            SELECT DISTINCT raw_data->'poolId'->>'id', {slug}
            FROM balancer.rate_providers_raw
            ON CONFLICT (external_id) DO NOTHING
            "#
        );
        self.execute_step("rate provider pools", &pools, &[]).await?;

        let providers = format!(
            r#"
            INSERT INTO balancer.pool_rate_providers (
                pool_external_id, token_address, network_slug, address
            )
            SELECT DISTINCT ON (pool_external_id, token_address)
                pool_external_id, token_address, network_slug, address
            FROM (
                SELECT
                    raw_data->'poolId'->>'id' AS pool_external_id,
                    LOWER(raw_data->'token'->>'address') AS token_address,
                    {slug} AS network_slug,
                    LOWER(raw_data->>'address') AS address
                FROM balancer.rate_providers_raw
                WHERE LOWER(raw_data->>'address') <> '{ZERO_ADDRESS}'
            ) providers
            ORDER BY pool_external_id, token_address
            ON CONFLICT (pool_external_id, token_address) DO UPDATE SET
                address = EXCLUDED.address
            "#
        );
        self.execute_step("rate providers", &providers, &[]).await
    }
}
