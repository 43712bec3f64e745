//! Averages of per-day pool statistics.
//!
//! Numeric fields are summed and divided by the number of entries folded in.
//! Token yields are the exception: a token is not present on every day, so
//! each token's yield is divided by the number of entries it appeared in.

use rustc_hash::FxHashMap;
use thiserror::Error;

use crate::api::types::{
    AprBreakdown, AprData, PerDay, PoolStatsData, PoolStatsWithoutVotingShareAndCollectedFees,
    TokenAprs, TokenYield,
};

#[derive(Debug, Error, PartialEq)]
pub enum AggregateError {
    #[error("pool {pool_id} has conflicting `{field}`: {first:?} vs {other:?}")]
    Mismatch {
        pool_id: String,
        field: &'static str,
        first: String,
        other: String,
    },
}

/// Summed yield of one token with the number of entries it appeared in.
#[derive(Debug, Clone)]
struct TokenYieldSum {
    token: TokenYield,
    occurrences: u32,
}

/// Token yields keyed by symbol, in order of first appearance.
#[derive(Debug, Default)]
struct TokenYieldSums {
    sums: Vec<TokenYieldSum>,
    index: FxHashMap<String, usize>,
}

impl TokenYieldSums {
    fn add(&mut self, tokens: &[TokenYield]) {
        for token in tokens {
            match self.index.get(&token.symbol) {
                Some(&i) => {
                    self.sums[i].token.yield_ += token.yield_;
                    self.sums[i].occurrences += 1;
                },
                None => {
                    self.index.insert(token.symbol.clone(), self.sums.len());
                    self.sums.push(TokenYieldSum {
                        token: token.clone(),
                        occurrences: 1,
                    });
                },
            }
        }
    }

    fn averages(&self) -> Vec<TokenYield> {
        self.sums
            .iter()
            .map(|sum| TokenYield {
                yield_: sum.token.yield_ / f64::from(sum.occurrences),
                ..sum.token.clone()
            })
            .collect()
    }
}

/// Field-by-field sum of [`PoolStatsData`].
#[derive(Debug, Default)]
struct StatsSum {
    apr_total: f64,
    vebal: f64,
    swap_fee: f64,
    tokens_total: f64,
    tokens: TokenYieldSums,
    bal_price_usd: f64,
    tvl: f64,
    volume: f64,
    voting_share: f64,
    collected_fees_usd: f64,
}

impl StatsSum {
    fn add(&mut self, stats: &PoolStatsData) {
        let breakdown = &stats.apr.breakdown;
        self.apr_total += stats.apr.total;
        self.vebal += breakdown.vebal;
        self.swap_fee += breakdown.swap_fee;
        self.tokens_total += breakdown.tokens.total;
        self.tokens.add(&breakdown.tokens.breakdown);
        self.bal_price_usd += stats.bal_price_usd;
        self.tvl += stats.tvl;
        self.volume += stats.volume;
        self.voting_share += stats.voting_share;
        self.collected_fees_usd += stats.collected_fees_usd;
    }

    fn apr(&self, divisor: f64) -> AprData {
        AprData {
            total: self.apr_total / divisor,
            breakdown: AprBreakdown {
                vebal: self.vebal / divisor,
                swap_fee: self.swap_fee / divisor,
                tokens: TokenAprs {
                    total: self.tokens_total / divisor,
                    breakdown: self.tokens.averages(),
                },
            },
        }
    }
}

/// Running average of one pool. Descriptive fields come from the first entry.
#[derive(Debug)]
struct PoolSum {
    first: PoolStatsData,
    sum: StatsSum,
}

impl PoolSum {
    fn new(stats: &PoolStatsData) -> Self {
        let mut sum = StatsSum::default();
        sum.add(stats);
        Self {
            first: stats.clone(),
            sum,
        }
    }

    fn add(&mut self, stats: &PoolStatsData) -> Result<(), AggregateError> {
        let fields = [
            ("symbol", &self.first.symbol, &stats.symbol),
            ("network", &self.first.network, &stats.network),
            ("type", &self.first.pool_type, &stats.pool_type),
        ];
        for (field, first, other) in fields {
            if first != other {
                return Err(AggregateError::Mismatch {
                    pool_id: stats.pool_id.clone(),
                    field,
                    first: first.clone(),
                    other: other.clone(),
                });
            }
        }

        self.sum.add(stats);
        Ok(())
    }

    fn average(self, divisor: f64) -> PoolStatsData {
        PoolStatsData {
            apr: self.sum.apr(divisor),
            bal_price_usd: self.sum.bal_price_usd / divisor,
            tvl: self.sum.tvl / divisor,
            volume: self.sum.volume / divisor,
            voting_share: self.sum.voting_share / divisor,
            collected_fees_usd: self.sum.collected_fees_usd / divisor,
            ..self.first
        }
    }
}

/// Average over every entry of `per_day`, plus one average per pool divided
/// by the number of days.
///
/// Pools keep the order in which they first appear.
pub fn compute_averages(
    per_day: &PerDay,
) -> Result<PoolStatsWithoutVotingShareAndCollectedFees, AggregateError> {
    let mut total = StatsSum::default();
    let mut count = 0u32;
    let mut pools: Vec<PoolSum> = Vec::new();
    let mut pool_index: FxHashMap<&str, usize> = FxHashMap::default();

    for stats in per_day.values().flatten() {
        total.add(stats);
        count += 1;

        match pool_index.get(stats.pool_id.as_str()) {
            Some(&i) => pools[i].add(stats)?,
            None => {
                pool_index.insert(&stats.pool_id, pools.len());
                pools.push(PoolSum::new(stats));
            },
        }
    }

    if count == 0 {
        return Ok(PoolStatsWithoutVotingShareAndCollectedFees::default());
    }

    let divisor = f64::from(count);
    let days = per_day.len() as f64;

    Ok(PoolStatsWithoutVotingShareAndCollectedFees {
        apr: total.apr(divisor),
        bal_price_usd: total.bal_price_usd / divisor,
        tvl: total.tvl / divisor,
        volume: total.volume / divisor,
        pool_average: pools.into_iter().map(|pool| pool.average(days)).collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token(symbol: &str, yield_: f64) -> TokenYield {
        TokenYield {
            address: format!("0x{}", symbol.to_lowercase()),
            symbol: symbol.to_string(),
            yield_,
        }
    }

    fn stats(pool_id: &str, tvl: f64, vebal: f64, tokens: Vec<TokenYield>) -> PoolStatsData {
        PoolStatsData {
            pool_id: pool_id.to_string(),
            symbol: "B-wstETH-WETH".to_string(),
            network: "ethereum".to_string(),
            pool_type: "ComposableStable".to_string(),
            tokens: vec![],
            apr: AprData::new(vebal, 1.0, tokens),
            bal_price_usd: 5.0,
            tvl,
            volume: 100.0,
            voting_share: 0.02,
            collected_fees_usd: 10.0,
        }
    }

    fn per_day(days: Vec<(&str, Vec<PoolStatsData>)>) -> PerDay {
        days.into_iter()
            .map(|(day, stats)| (day.to_string(), stats))
            .collect()
    }

    #[test]
    fn test_token_yield_divided_by_its_own_occurrences() {
        let data = per_day(vec![
            ("2023-06-01", vec![stats("0xpool", 1000.0, 3.0, vec![token("WETH", 2.0)])]),
            ("2023-06-02", vec![stats("0xpool", 1000.0, 3.0, vec![])]),
            ("2023-06-03", vec![stats("0xpool", 1000.0, 3.0, vec![token("WETH", 4.0)])]),
        ]);

        let averages = compute_averages(&data).unwrap();

        let weth = &averages.apr.breakdown.tokens.breakdown[0];
        assert_eq!(weth.symbol, "WETH");
        assert_eq!(weth.yield_, 3.0);
        assert_eq!(averages.apr.breakdown.tokens.total, 2.0);
        assert_eq!(averages.apr.breakdown.vebal, 3.0);
    }

    #[test]
    fn test_global_and_pool_averages() {
        let data = per_day(vec![
            (
                "2023-06-01",
                vec![stats("0xa", 100.0, 2.0, vec![]), stats("0xb", 300.0, 4.0, vec![])],
            ),
            ("2023-06-02", vec![stats("0xa", 200.0, 6.0, vec![])]),
        ]);

        let averages = compute_averages(&data).unwrap();

        assert_eq!(averages.tvl, 200.0);
        assert_eq!(averages.apr.breakdown.vebal, 4.0);
        assert_eq!(averages.bal_price_usd, 5.0);

        assert_eq!(averages.pool_average.len(), 2);
        let a = &averages.pool_average[0];
        assert_eq!(a.pool_id, "0xa");
        assert_eq!(a.tvl, 150.0);
        assert_eq!(a.apr.breakdown.vebal, 4.0);
        assert_eq!(a.symbol, "B-wstETH-WETH");
        // 0xb is present on one of two days
        assert_eq!(averages.pool_average[1].tvl, 150.0);
    }

    #[test]
    fn test_empty_input() {
        let averages = compute_averages(&PerDay::new()).unwrap();
        assert_eq!(averages, PoolStatsWithoutVotingShareAndCollectedFees::default());
    }

    #[test]
    fn test_conflicting_descriptive_fields() {
        let mut renamed = stats("0xa", 100.0, 2.0, vec![]);
        renamed.network = "polygon".to_string();
        let data = per_day(vec![
            ("2023-06-01", vec![stats("0xa", 100.0, 2.0, vec![])]),
            ("2023-06-02", vec![renamed]),
        ]);

        assert!(matches!(
            compute_averages(&data),
            Err(AggregateError::Mismatch { field: "network", .. })
        ));
    }
}
