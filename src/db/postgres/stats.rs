use chrono::{DateTime, Utc};

use crate::db::{
    models::{PoolDayStats, PoolTokenInfo, TokenYieldStat},
    postgres::PostgresClient,
};

/// Read side of the HTTP API.
impl PostgresClient {
    /// Per pool per day statistics between `start` and `end` (inclusive days).
    ///
    /// Without `pool_id` only pools that have a gauge are returned.
    pub async fn pool_day_stats(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        pool_id: Option<&str>,
        bal_address: &str,
    ) -> anyhow::Result<Vec<PoolDayStats>> {
        let client = self.pool.get().await?;
        let query = r#"
            WITH days AS (
                SELECT
                    ps.external_id,
                    ps.pool_external_id,
                    ps.timestamp,
                    ps.liquidity,
                    ps.swap_volume - LAG(ps.swap_volume) OVER (
                        PARTITION BY ps.pool_external_id ORDER BY ps.timestamp
                    ) AS volume
                FROM balancer.pool_snapshots ps
                WHERE ps.timestamp BETWEEN $1::TIMESTAMPTZ - INTERVAL '1 day' AND $2
                  AND ($3::VARCHAR IS NULL OR ps.pool_external_id = $3)
                  AND (
                      $3::VARCHAR IS NOT NULL
                      OR EXISTS (
                          SELECT 1 FROM balancer.gauges g
                          WHERE g.pool_external_id = ps.pool_external_id
                      )
                  )
            )
            SELECT
                d.pool_external_id,
                d.timestamp,
                p.symbol,
                p.network_slug,
                p.pool_type,
                d.liquidity,
                d.volume,
                COALESCE(v.value, 0) AS vebal_apr,
                COALESCE(s.value, 0) AS swap_fee_apr,
                COALESCE(s.collected_fees_usd, 0) AS collected_fees_usd,
                tp.price_usd AS bal_price_usd,
                gs.relative_weight AS voting_share
            FROM days d
            JOIN balancer.pools p ON p.external_id = d.pool_external_id
            LEFT JOIN balancer.vebal_apr v ON v.external_id = d.external_id
            LEFT JOIN balancer.swap_fee_apr s ON s.external_id = d.external_id
            LEFT JOIN balancer.token_prices tp
                ON tp.token_address = $4
               AND tp.network_slug = 'ethereum'
               AND tp.timestamp = d.timestamp
            LEFT JOIN LATERAL (
                SELECT g.address
                FROM balancer.gauges g
                WHERE g.pool_external_id = d.pool_external_id
                ORDER BY g.is_killed ASC, g.external_created_at DESC NULLS LAST
                LIMIT 1
            ) pg ON TRUE
            LEFT JOIN balancer.vebal_rounds vr
                ON d.timestamp BETWEEN vr.start_date AND vr.end_date
            LEFT JOIN balancer.gauge_snapshots gs
                ON gs.gauge_address = pg.address
               AND gs.round_number = vr.round_number
            WHERE d.timestamp >= $1
            ORDER BY d.timestamp, d.pool_external_id
        "#;

        let rows = client
            .query(query, &[&start, &end, &pool_id, &bal_address])
            .await?;

        Ok(rows
            .iter()
            .map(|row| PoolDayStats {
                pool_external_id: row.get("pool_external_id"),
                timestamp: row.get("timestamp"),
                symbol: row.get("symbol"),
                network_slug: row.get("network_slug"),
                pool_type: row.get("pool_type"),
                liquidity: row.get("liquidity"),
                volume: row.get("volume"),
                vebal_apr: row.get("vebal_apr"),
                swap_fee_apr: row.get("swap_fee_apr"),
                collected_fees_usd: row.get("collected_fees_usd"),
                bal_price_usd: row.get("bal_price_usd"),
                voting_share: row.get("voting_share"),
            })
            .collect())
    }

    /// Tokens of `pool_ids` in pool order.
    pub async fn pool_token_infos(&self, pool_ids: &[String]) -> anyhow::Result<Vec<PoolTokenInfo>> {
        if pool_ids.is_empty() {
            return Ok(vec![]);
        }

        let client = self.pool.get().await?;
        let rows = client
            .query(
                r#"
                SELECT pt.pool_external_id, pt.token_address, t.symbol, pt.weight, t.logo_uri
                FROM balancer.pool_tokens pt
                LEFT JOIN balancer.tokens t
                    ON t.address = pt.token_address AND t.network_slug = pt.network_slug
                WHERE pt.pool_external_id = ANY($1)
                ORDER BY pt.pool_external_id, pt.token_index
                "#,
                &[&pool_ids],
            )
            .await?;

        Ok(rows
            .iter()
            .map(|row| PoolTokenInfo {
                pool_external_id: row.get("pool_external_id"),
                address: row.get("token_address"),
                symbol: row.get("symbol"),
                weight: row.get("weight"),
                logo_uri: row.get("logo_uri"),
            })
            .collect())
    }

    /// Token-yield APR rows of `pool_ids` between `start` and `end`.
    pub async fn token_yield_stats(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        pool_ids: &[String],
    ) -> anyhow::Result<Vec<TokenYieldStat>> {
        if pool_ids.is_empty() {
            return Ok(vec![]);
        }

        let client = self.pool.get().await?;
        let rows = client
            .query(
                r#"
                SELECT ty.pool_external_id, ty.timestamp, ty.token_address, t.symbol, ty.value
                FROM balancer.token_yield_apr ty
                JOIN balancer.pools p ON p.external_id = ty.pool_external_id
                LEFT JOIN balancer.tokens t
                    ON t.address = ty.token_address AND t.network_slug = p.network_slug
                WHERE ty.timestamp BETWEEN $1 AND $2
                  AND ty.pool_external_id = ANY($3)
                ORDER BY ty.timestamp, ty.pool_external_id, ty.token_address
                "#,
                &[&start, &end, &pool_ids],
            )
            .await?;

        Ok(rows
            .iter()
            .map(|row| TokenYieldStat {
                pool_external_id: row.get("pool_external_id"),
                timestamp: row.get("timestamp"),
                token_address: row.get("token_address"),
                symbol: row.get("symbol"),
                value: row.get("value"),
            })
            .collect())
    }
}
