use std::{cmp::Ordering, str::FromStr};

use log::warn;

use crate::api::types::{PerDay, PoolStatsData};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Order {
    Asc,
    #[default]
    Desc,
}

impl FromStr for Order {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "asc" => Ok(Self::Asc),
            "desc" => Ok(Self::Desc),
            _ => Err(anyhow::anyhow!("{} is not a valid order", s)),
        }
    }
}

/// Field of [`PoolStatsData`] a day's pools can be sorted by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortField {
    /// Compares `apr.total`
    Apr,
    Tvl,
    Volume,
    VotingShare,
    BalPriceUsd,
    CollectedFeesUsd,
    Symbol,
    Network,
    Type,
    PoolId,
}

impl FromStr for SortField {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "apr" => Self::Apr,
            "tvl" => Self::Tvl,
            "volume" => Self::Volume,
            "votingShare" => Self::VotingShare,
            "balPriceUSD" => Self::BalPriceUsd,
            "collectedFeesUSD" => Self::CollectedFeesUsd,
            "symbol" => Self::Symbol,
            "network" => Self::Network,
            "type" => Self::Type,
            "poolId" => Self::PoolId,
            _ => anyhow::bail!("{} is not a sortable field", s),
        })
    }
}

enum SortValue<'a> {
    Number(f64),
    Text(&'a str),
}

impl SortField {
    fn value(self, pool: &PoolStatsData) -> SortValue<'_> {
        match self {
            Self::Apr => SortValue::Number(pool.apr.total),
            Self::Tvl => SortValue::Number(pool.tvl),
            Self::Volume => SortValue::Number(pool.volume),
            Self::VotingShare => SortValue::Number(pool.voting_share),
            Self::BalPriceUsd => SortValue::Number(pool.bal_price_usd),
            Self::CollectedFeesUsd => SortValue::Number(pool.collected_fees_usd),
            Self::Symbol => SortValue::Text(&pool.symbol),
            Self::Network => SortValue::Text(&pool.network),
            Self::Type => SortValue::Text(&pool.pool_type),
            Self::PoolId => SortValue::Text(&pool.pool_id),
        }
    }
}

/// NaN sorts last whatever the order.
fn compare(a: &PoolStatsData, b: &PoolStatsData, field: SortField, order: Order) -> Ordering {
    let ordering = match (field.value(a), field.value(b)) {
        (SortValue::Number(x), SortValue::Number(y)) => match (x.is_nan(), y.is_nan()) {
            (true, true) => return Ordering::Equal,
            (true, false) => return Ordering::Greater,
            (false, true) => return Ordering::Less,
            (false, false) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
        },
        (SortValue::Text(x), SortValue::Text(y)) => x.cmp(y),
        _ => Ordering::Equal,
    };

    match order {
        Order::Asc => ordering,
        Order::Desc => ordering.reverse(),
    }
}

/// Sort each day's pools by `sort` and keep `limit` of them from `offset`.
///
/// An unknown `sort` field leaves each day in its original order; paging is
/// still applied.
pub fn sort_and_limit(
    mut per_day: PerDay,
    sort: &str,
    order: Order,
    offset: usize,
    limit: Option<usize>,
) -> PerDay {
    let field = match sort.parse::<SortField>() {
        Ok(field) => Some(field),
        Err(e) => {
            warn!("Not sorting pools: {:#}", e);
            None
        },
    };

    for pools in per_day.values_mut() {
        if let Some(field) = field {
            pools.sort_by(|a, b| compare(a, b, field, order));
        }
        let page: Vec<PoolStatsData> = pools
            .drain(..)
            .skip(offset)
            .take(limit.unwrap_or(usize::MAX))
            .collect();
        *pools = page;
    }

    per_day
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::types::AprData;

    fn pool(pool_id: &str, apr: f64, tvl: f64) -> PoolStatsData {
        PoolStatsData {
            pool_id: pool_id.to_string(),
            symbol: pool_id.to_uppercase(),
            network: "ethereum".to_string(),
            pool_type: "Weighted".to_string(),
            tokens: vec![],
            apr: AprData {
                total: apr,
                ..Default::default()
            },
            bal_price_usd: 5.0,
            tvl,
            volume: 0.0,
            voting_share: 0.0,
            collected_fees_usd: 0.0,
        }
    }

    fn day(pools: Vec<PoolStatsData>) -> PerDay {
        [("2023-06-01".to_string(), pools)].into()
    }

    fn ids(per_day: &PerDay) -> Vec<&str> {
        per_day["2023-06-01"]
            .iter()
            .map(|pool| pool.pool_id.as_str())
            .collect()
    }

    #[test]
    fn test_nan_apr_sorts_last_in_both_orders() {
        let pools = vec![
            pool("0xa", 5.0, 1.0),
            pool("0xnan", f64::NAN, 1.0),
            pool("0xb", 9.0, 1.0),
        ];

        let desc = sort_and_limit(day(pools.clone()), "apr", Order::Desc, 0, None);
        assert_eq!(ids(&desc), vec!["0xb", "0xa", "0xnan"]);

        let asc = sort_and_limit(day(pools), "apr", Order::Asc, 0, None);
        assert_eq!(ids(&asc), vec!["0xa", "0xb", "0xnan"]);
    }

    #[test]
    fn test_offset_and_limit_per_day() {
        let pools = (0..5)
            .map(|i| pool(&format!("0x{i}"), 0.0, f64::from(i)))
            .collect();

        let page = sort_and_limit(day(pools), "tvl", Order::Asc, 1, Some(2));
        assert_eq!(ids(&page), vec!["0x1", "0x2"]);
    }

    #[test]
    fn test_text_fields_and_unknown_field() {
        let pools = vec![pool("0xb", 1.0, 1.0), pool("0xa", 2.0, 1.0), pool("0xc", 3.0, 1.0)];

        let by_symbol = sort_and_limit(day(pools.clone()), "symbol", Order::Asc, 0, None);
        assert_eq!(ids(&by_symbol), vec!["0xa", "0xb", "0xc"]);

        let unsorted = sort_and_limit(day(pools), "favourite", Order::Asc, 0, Some(2));
        assert_eq!(ids(&unsorted), vec!["0xb", "0xa"]);
    }

    #[test]
    fn test_parse_order() {
        assert_eq!("asc".parse::<Order>().unwrap(), Order::Asc);
        assert!("up".parse::<Order>().is_err());
        assert_eq!(Order::default(), Order::Desc);
    }
}
