use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Statistics of one pool on one day, as served by `/apr/api`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PoolStatsData {
    pub pool_id: String,
    pub symbol: String,
    pub network: String,
    #[serde(rename = "type")]
    pub pool_type: String,
    pub tokens: Vec<PoolTokenData>,
    pub apr: AprData,
    #[serde(rename = "balPriceUSD")]
    pub bal_price_usd: f64,
    pub tvl: f64,
    pub volume: f64,
    pub voting_share: f64,
    #[serde(rename = "collectedFeesUSD")]
    pub collected_fees_usd: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PoolTokenData {
    pub address: String,
    pub symbol: String,
    pub weight: Option<f64>,
    #[serde(rename = "logoURI")]
    pub logo_uri: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AprData {
    pub total: f64,
    pub breakdown: AprBreakdown,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AprBreakdown {
    #[serde(rename = "veBAL")]
    pub vebal: f64,
    pub swap_fee: f64,
    pub tokens: TokenAprs,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TokenAprs {
    pub total: f64,
    pub breakdown: Vec<TokenYield>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TokenYield {
    pub address: String,
    pub symbol: String,
    #[serde(rename = "yield")]
    pub yield_: f64,
}

/// Averages over every pool and day of a response.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PoolStatsWithoutVotingShareAndCollectedFees {
    pub apr: AprData,
    #[serde(rename = "balPriceUSD")]
    pub bal_price_usd: f64,
    pub tvl: f64,
    pub volume: f64,
    pub pool_average: Vec<PoolStatsData>,
}

/// Per-day stats keyed by `YYYY-MM-DD`.
pub type PerDay = BTreeMap<String, Vec<PoolStatsData>>;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AprResponse {
    pub per_day: PerDay,
    pub average: PoolStatsWithoutVotingShareAndCollectedFees,
}

impl AprData {
    /// Build from the three components, `total` being their sum.
    pub fn new(vebal: f64, swap_fee: f64, tokens: Vec<TokenYield>) -> Self {
        let tokens_total: f64 = tokens.iter().map(|token| token.yield_).sum();
        Self {
            total: vebal + swap_fee + tokens_total,
            breakdown: AprBreakdown {
                vebal,
                swap_fee,
                tokens: TokenAprs {
                    total: tokens_total,
                    breakdown: tokens,
                },
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_pool_stats_wire_names() {
        let stats = PoolStatsData {
            pool_id: "0xpool".to_string(),
            symbol: "B-80BAL-20WETH".to_string(),
            network: "ethereum".to_string(),
            pool_type: "Weighted".to_string(),
            tokens: vec![PoolTokenData {
                address: "0xba10".to_string(),
                symbol: "BAL".to_string(),
                weight: Some(0.8),
                logo_uri: None,
            }],
            apr: AprData::new(
                1.0,
                2.0,
                vec![TokenYield {
                    address: "0xweth".to_string(),
                    symbol: "WETH".to_string(),
                    yield_: 0.5,
                }],
            ),
            bal_price_usd: 4.0,
            tvl: 1000.0,
            volume: 10.0,
            voting_share: 0.1,
            collected_fees_usd: 0.3,
        };

        let value = serde_json::to_value(&stats).unwrap();
        assert_eq!(value["poolId"], json!("0xpool"));
        assert_eq!(value["type"], json!("Weighted"));
        assert_eq!(value["balPriceUSD"], json!(4.0));
        assert_eq!(value["collectedFeesUSD"], json!(0.3));
        assert_eq!(value["tokens"][0]["logoURI"], json!(null));
        assert_eq!(value["apr"]["total"], json!(3.5));
        assert_eq!(value["apr"]["breakdown"]["veBAL"], json!(1.0));
        assert_eq!(value["apr"]["breakdown"]["swapFee"], json!(2.0));
        assert_eq!(value["apr"]["breakdown"]["tokens"]["breakdown"][0]["yield"], json!(0.5));
    }
}
