use std::future::Future;

use chrono::{NaiveDate, NaiveTime};
use rustc_hash::FxHashMap;

use crate::{
    api::{
        query::DateWindow,
        types::{AprData, PerDay, PoolStatsData, PoolTokenData, TokenYield},
    },
    db::{
        models::{PoolDayStats, PoolTokenInfo, TokenYieldStat},
        postgres::PostgresClient,
    },
    prices::BAL_ADDRESS,
};

/// Source of per-day pool statistics for the API.
pub trait PoolStatsRepository: Send + Sync + 'static {
    /// Stats of every day in `window`, for one pool or for every pool with a
    /// gauge.
    fn pool_stats(
        &self,
        pool_id: Option<&str>,
        window: DateWindow,
    ) -> impl Future<Output = anyhow::Result<PerDay>> + Send;

    fn ping(&self) -> impl Future<Output = anyhow::Result<()>> + Send;
}

fn midnight(day: NaiveDate) -> chrono::DateTime<chrono::Utc> {
    day.and_time(NaiveTime::MIN).and_utc()
}

impl PoolStatsRepository for PostgresClient {
    async fn pool_stats(&self, pool_id: Option<&str>, window: DateWindow) -> anyhow::Result<PerDay> {
        let (start, end) = (midnight(window.start), midnight(window.end));

        let days = self.pool_day_stats(start, end, pool_id, BAL_ADDRESS).await?;

        let mut pool_ids: Vec<String> = days
            .iter()
            .map(|day| day.pool_external_id.clone())
            .collect();
        pool_ids.sort_unstable();
        pool_ids.dedup();

        let (tokens, yields) = futures::try_join!(
            self.pool_token_infos(&pool_ids),
            self.token_yield_stats(start, end, &pool_ids),
        )?;

        Ok(assemble_per_day(days, tokens, yields))
    }

    async fn ping(&self) -> anyhow::Result<()> {
        self.health_check().await
    }
}

/// Join the three stats queries into [`PerDay`].
///
/// Missing prices, volumes and voting shares are reported as 0.
pub fn assemble_per_day(
    days: Vec<PoolDayStats>,
    tokens: Vec<PoolTokenInfo>,
    yields: Vec<TokenYieldStat>,
) -> PerDay {
    let mut tokens_by_pool: FxHashMap<String, Vec<PoolTokenData>> = FxHashMap::default();
    for token in tokens {
        tokens_by_pool
            .entry(token.pool_external_id)
            .or_default()
            .push(PoolTokenData {
                address: token.address,
                symbol: token.symbol.unwrap_or_default(),
                weight: token.weight,
                logo_uri: token.logo_uri,
            });
    }

    let mut yields_by_pool_day: FxHashMap<(String, i64), Vec<TokenYield>> = FxHashMap::default();
    for stat in yields {
        yields_by_pool_day
            .entry((stat.pool_external_id, stat.timestamp.timestamp()))
            .or_default()
            .push(TokenYield {
                symbol: stat.symbol.unwrap_or_else(|| stat.token_address.clone()),
                address: stat.token_address,
                yield_: stat.value,
            });
    }

    let mut per_day = PerDay::new();
    for day in days {
        let token_yields = yields_by_pool_day
            .remove(&(day.pool_external_id.clone(), day.timestamp.timestamp()))
            .unwrap_or_default();

        let stats = PoolStatsData {
            tokens: tokens_by_pool
                .get(&day.pool_external_id)
                .cloned()
                .unwrap_or_default(),
            pool_id: day.pool_external_id,
            symbol: day.symbol.unwrap_or_default(),
            network: day.network_slug.unwrap_or_default(),
            pool_type: day.pool_type.unwrap_or_default(),
            apr: AprData::new(day.vebal_apr, day.swap_fee_apr, token_yields),
            bal_price_usd: day.bal_price_usd.unwrap_or_default(),
            tvl: day.liquidity,
            volume: day.volume.unwrap_or_default(),
            voting_share: day.voting_share.unwrap_or_default(),
            collected_fees_usd: day.collected_fees_usd,
        };

        per_day
            .entry(day.timestamp.format("%Y-%m-%d").to_string())
            .or_default()
            .push(stats);
    }

    per_day
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn day_stats(pool: &str, day: u32, vebal: f64) -> PoolDayStats {
        PoolDayStats {
            pool_external_id: pool.to_string(),
            timestamp: Utc.with_ymd_and_hms(2023, 6, day, 0, 0, 0).unwrap(),
            symbol: Some("B-wstETH-WETH".to_string()),
            network_slug: Some("ethereum".to_string()),
            pool_type: Some("ComposableStable".to_string()),
            liquidity: 1000.0,
            volume: None,
            vebal_apr: vebal,
            swap_fee_apr: 1.0,
            collected_fees_usd: 2.0,
            bal_price_usd: Some(5.0),
            voting_share: None,
        }
    }

    #[test]
    fn test_assemble_per_day() {
        let tokens = vec![PoolTokenInfo {
            pool_external_id: "0xpool".to_string(),
            address: "0xwsteth".to_string(),
            symbol: Some("wstETH".to_string()),
            weight: None,
            logo_uri: None,
        }];
        let yields = vec![TokenYieldStat {
            pool_external_id: "0xpool".to_string(),
            timestamp: Utc.with_ymd_and_hms(2023, 6, 2, 0, 0, 0).unwrap(),
            token_address: "0xwsteth".to_string(),
            symbol: Some("wstETH".to_string()),
            value: 1.5,
        }];

        let per_day = assemble_per_day(
            vec![day_stats("0xpool", 1, 3.0), day_stats("0xpool", 2, 4.0)],
            tokens,
            yields,
        );

        assert_eq!(per_day.len(), 2);
        let first = &per_day["2023-06-01"][0];
        assert_eq!(first.apr.total, 4.0);
        assert!(first.apr.breakdown.tokens.breakdown.is_empty());
        assert_eq!(first.tokens[0].symbol, "wstETH");
        assert_eq!(first.volume, 0.0);
        assert_eq!(first.voting_share, 0.0);

        let second = &per_day["2023-06-02"][0];
        assert_eq!(second.apr.total, 6.5);
        assert_eq!(second.apr.breakdown.tokens.breakdown[0].yield_, 1.5);
        assert_eq!(second.tvl, 1000.0);
    }
}
