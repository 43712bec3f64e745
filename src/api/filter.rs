//! Pool filters of the `/apr/api` query string.
//!
//! Parameters arrive as raw strings. If any of them cannot be parsed the
//! response is returned unfiltered rather than failing the request.

use log::warn;
use serde::Deserialize;

use crate::{
    api::types::{AprResponse, PoolStatsData},
    etl::registry::normalize_network_slug,
};

/// Filter parameters exactly as received.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PoolFilterParams {
    pub network: Option<String>,
    pub min_apr: Option<String>,
    pub max_apr: Option<String>,
    pub min_tvl: Option<String>,
    pub max_tvl: Option<String>,
    pub min_voting_share: Option<String>,
    pub max_voting_share: Option<String>,
    /// Comma-separated token symbols
    pub tokens: Option<String>,
    /// Comma-separated pool types
    pub types: Option<String>,
}

/// Parsed filters. `None` means the filter is not applied.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PoolFilter {
    pub network: Option<String>,
    pub min_apr: Option<f64>,
    pub max_apr: Option<f64>,
    pub min_tvl: Option<f64>,
    pub max_tvl: Option<f64>,
    /// Percent, compared against `votingShare * 100`
    pub min_voting_share: Option<f64>,
    pub max_voting_share: Option<f64>,
    pub tokens: Option<Vec<String>>,
    pub types: Option<Vec<String>>,
}

fn parse_number(name: &str, value: &Option<String>) -> anyhow::Result<Option<f64>> {
    let Some(value) = value.as_deref().map(str::trim).filter(|v| !v.is_empty()) else {
        return Ok(None);
    };
    let number: f64 = value
        .parse()
        .map_err(|_| anyhow::anyhow!("`{}` is not a number: {:?}", name, value))?;
    if number.is_nan() {
        anyhow::bail!("`{}` is not a number: {:?}", name, value);
    }
    Ok(Some(number))
}

fn parse_list(value: &Option<String>) -> Option<Vec<String>> {
    let items: Vec<String> = value
        .as_deref()?
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect();
    (!items.is_empty()).then_some(items)
}

impl PoolFilterParams {
    pub fn parse(&self) -> anyhow::Result<PoolFilter> {
        Ok(PoolFilter {
            network: self
                .network
                .as_deref()
                .map(str::trim)
                .filter(|network| !network.is_empty())
                .map(normalize_network_slug),
            min_apr: parse_number("minApr", &self.min_apr)?,
            max_apr: parse_number("maxApr", &self.max_apr)?,
            min_tvl: parse_number("minTvl", &self.min_tvl)?,
            max_tvl: parse_number("maxTvl", &self.max_tvl)?,
            min_voting_share: parse_number("minVotingShare", &self.min_voting_share)?,
            max_voting_share: parse_number("maxVotingShare", &self.max_voting_share)?,
            tokens: parse_list(&self.tokens),
            types: parse_list(&self.types),
        })
    }
}

impl PoolFilter {
    /// Whether `pool` satisfies every configured filter.
    pub fn should_include_pool(&self, pool: &PoolStatsData) -> bool {
        let at_least = |bound: Option<f64>, value: f64| bound.map_or(true, |min| value >= min);
        let at_most = |bound: Option<f64>, value: f64| bound.map_or(true, |max| value <= max);
        let voting_share = pool.voting_share * 100.0;

        self.network
            .as_ref()
            .map_or(true, |network| &pool.network == network)
            && at_least(self.min_apr, pool.apr.total)
            && at_most(self.max_apr, pool.apr.total)
            && at_least(self.min_tvl, pool.tvl)
            && at_most(self.max_tvl, pool.tvl)
            && at_least(self.min_voting_share, voting_share)
            && at_most(self.max_voting_share, voting_share)
            && self.tokens.as_ref().map_or(true, |symbols| {
                pool.tokens.iter().any(|token| symbols.contains(&token.symbol))
            })
            && self
                .types
                .as_ref()
                .map_or(true, |types| types.contains(&pool.pool_type))
    }
}

/// Keep only the pools matching `params`, per day and in the pool averages.
///
/// Unparseable parameters leave `response` untouched.
pub fn filter_pool_stats(mut response: AprResponse, params: &PoolFilterParams) -> AprResponse {
    let filter = match params.parse() {
        Ok(filter) => filter,
        Err(e) => {
            warn!("Ignoring pool filters {:?}: {:#}", params, e);
            return response;
        },
    };

    for pools in response.per_day.values_mut() {
        pools.retain(|pool| filter.should_include_pool(pool));
    }
    response
        .average
        .pool_average
        .retain(|pool| filter.should_include_pool(pool));

    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::types::{
        AprData, PerDay, PoolStatsWithoutVotingShareAndCollectedFees, PoolTokenData,
    };

    fn pool(pool_id: &str, tvl: f64, symbols: &[&str]) -> PoolStatsData {
        PoolStatsData {
            pool_id: pool_id.to_string(),
            symbol: pool_id.to_string(),
            network: "ethereum".to_string(),
            pool_type: "Weighted".to_string(),
            tokens: symbols
                .iter()
                .map(|symbol| PoolTokenData {
                    address: format!("0x{}", symbol.to_lowercase()),
                    symbol: symbol.to_string(),
                    weight: Some(0.5),
                    logo_uri: None,
                })
                .collect(),
            apr: AprData::new(5.0, 1.0, vec![]),
            bal_price_usd: 5.0,
            tvl,
            volume: 0.0,
            voting_share: 0.03,
            collected_fees_usd: 0.0,
        }
    }

    fn response(pools: Vec<PoolStatsData>) -> AprResponse {
        let per_day: PerDay = [("2023-06-01".to_string(), pools.clone())].into();
        AprResponse {
            per_day,
            average: PoolStatsWithoutVotingShareAndCollectedFees {
                pool_average: pools,
                ..Default::default()
            },
        }
    }

    #[test]
    fn test_filters_are_a_conjunction() {
        let params = PoolFilterParams {
            min_tvl: Some("1000".to_string()),
            tokens: Some("wstETH,rETH".to_string()),
            ..Default::default()
        };
        let filtered = filter_pool_stats(
            response(vec![
                pool("0xmatch", 5000.0, &["wstETH", "WETH"]),
                pool("0xrich-but-no-token", 5000.0, &["BAL", "WETH"]),
                pool("0xpoor", 10.0, &["rETH"]),
            ]),
            &params,
        );

        let ids: Vec<&str> = filtered.per_day["2023-06-01"]
            .iter()
            .map(|pool| pool.pool_id.as_str())
            .collect();
        assert_eq!(ids, vec!["0xmatch"]);
        assert_eq!(filtered.average.pool_average.len(), 1);
    }

    #[test]
    fn test_unparseable_filter_returns_input() {
        let params = PoolFilterParams {
            min_tvl: Some("lots".to_string()),
            network: Some("polygon".to_string()),
            ..Default::default()
        };
        let input = response(vec![pool("0xa", 1.0, &["BAL"]), pool("0xb", 2.0, &["WETH"])]);

        assert_eq!(filter_pool_stats(input.clone(), &params), input);
    }

    #[test]
    fn test_voting_share_is_percent_and_network_normalised() {
        let filter = PoolFilterParams {
            network: Some("Mainnet".to_string()),
            min_voting_share: Some("2".to_string()),
            max_voting_share: Some("5".to_string()),
            types: Some("Weighted, Stable".to_string()),
            ..Default::default()
        }
        .parse()
        .unwrap();

        assert_eq!(filter.network.as_deref(), Some("ethereum"));
        assert!(filter.should_include_pool(&pool("0xa", 1.0, &["BAL"])));

        let mut other_network = pool("0xb", 1.0, &["BAL"]);
        other_network.network = "arbitrum".to_string();
        assert!(!filter.should_include_pool(&other_network));
    }

    #[test]
    fn test_empty_params_keep_everything() {
        let filter = PoolFilterParams::default().parse().unwrap();
        assert_eq!(filter, PoolFilter::default());
        assert!(filter.should_include_pool(&pool("0xa", 0.0, &[])));
    }
}
