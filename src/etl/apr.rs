//! Daily APR of a pool from its daily snapshots.
//!
//! Every APR is keyed by a deterministic external id and written once. A day
//! whose inputs are incomplete emits nothing rather than a zero.

use chrono::{DateTime, Duration, Utc};
use rustc_hash::{FxHashMap, FxHashSet};

use crate::db::models::{
    BalEmission, Gauge, GaugeSnapshot, Pool, PoolSnapshot, PoolToken, RateProvider, SwapFeeApr,
    TokenPrice, TokenRate, TokenYieldApr, VebalApr, VebalRound,
};

/// Protocol fee assumed when the subgraph has no fee cache for the pool.
const DEFAULT_PROTOCOL_FEE: f64 = 0.5;

/// Lookup tables shared by every pool of an APR run.
#[derive(Debug, Default)]
pub struct AprContext {
    /// Preferred gauge of each pool
    pub gauges: FxHashMap<String, Gauge>,
    /// (gauge address, round number) -> relative weight
    pub gauge_weights: FxHashMap<(String, i32), f64>,
    pub emissions: FxHashMap<DateTime<Utc>, f64>,
    pub bal_prices: FxHashMap<DateTime<Utc>, f64>,
    /// (pool external id, token address)
    pub rate_providers: FxHashSet<(String, String)>,
    /// (token address, network slug, day) -> rate
    pub token_rates: FxHashMap<(String, String, DateTime<Utc>), f64>,
}

impl AprContext {
    pub fn new(
        gauges: Vec<Gauge>,
        gauge_snapshots: Vec<GaugeSnapshot>,
        emissions: Vec<BalEmission>,
        bal_prices: Vec<TokenPrice>,
        rate_providers: Vec<RateProvider>,
        token_rates: Vec<TokenRate>,
    ) -> Self {
        let mut by_pool: FxHashMap<String, Vec<Gauge>> = FxHashMap::default();
        for gauge in gauges {
            by_pool
                .entry(gauge.pool_external_id.clone())
                .or_default()
                .push(gauge);
        }

        Self {
            gauges: by_pool
                .into_iter()
                .filter_map(|(pool, gauges)| Gauge::preferred(&gauges).cloned().map(|g| (pool, g)))
                .collect(),
            gauge_weights: gauge_snapshots
                .into_iter()
                .map(|s| ((s.gauge_address, s.round_number), s.relative_weight))
                .collect(),
            emissions: emissions
                .into_iter()
                .map(|e| (e.timestamp, e.week_emission))
                .collect(),
            bal_prices: bal_prices
                .into_iter()
                .map(|p| (p.timestamp, p.price_usd))
                .collect(),
            rate_providers: rate_providers
                .into_iter()
                .map(|p| (p.pool_external_id, p.token_address))
                .collect(),
            token_rates: token_rates
                .into_iter()
                .map(|r| ((r.token_address, r.network_slug, r.timestamp), r.rate))
                .collect(),
        }
    }
}

/// APR rows computed for one pool.
#[derive(Debug, Default)]
pub struct PoolAprs {
    pub swap_fee: Vec<SwapFeeApr>,
    pub vebal: Vec<VebalApr>,
    pub token_yield: Vec<TokenYieldApr>,
}

fn by_day(snapshots: &[PoolSnapshot]) -> FxHashMap<DateTime<Utc>, &PoolSnapshot> {
    snapshots.iter().map(|s| (s.timestamp, s)).collect()
}

/// `(fees[D] - fees[D-1]) * (1 - protocolSwapFee) / liquidity[D] * 365 * 100`.
pub fn swap_fee_aprs(snapshots: &[PoolSnapshot]) -> Vec<SwapFeeApr> {
    let by_day = by_day(snapshots);

    snapshots
        .iter()
        .filter_map(|today| {
            let yesterday = by_day.get(&(today.timestamp - Duration::days(1)))?;
            let collected_fees_usd = today.swap_fees - yesterday.swap_fees;
            let protocol_fee = today.protocol_swap_fee_cache.unwrap_or(DEFAULT_PROTOCOL_FEE);
            let value = if today.liquidity == 0.0 {
                0.0
            } else {
                collected_fees_usd * (1.0 - protocol_fee) / today.liquidity * 365.0 * 100.0
            };

            Some(SwapFeeApr {
                external_id: today.external_id.clone(),
                pool_external_id: today.pool_external_id.clone(),
                timestamp: today.timestamp,
                collected_fees_usd,
                value,
            })
        })
        .collect()
}

/// `52 * weeklyEmission * relativeWeight * balPrice / liquidity * 100`, using
/// the weight of the pool's gauge for the round containing the day.
pub fn vebal_aprs(snapshots: &[PoolSnapshot], ctx: &AprContext) -> Vec<VebalApr> {
    snapshots
        .iter()
        .filter_map(|snapshot| {
            let gauge = ctx.gauges.get(&snapshot.pool_external_id)?;
            let round = VebalRound::containing(snapshot.timestamp)?;
            let weight = ctx
                .gauge_weights
                .get(&(gauge.address.clone(), round.round_number))?;
            let emission = ctx.emissions.get(&snapshot.timestamp)?;
            let price = ctx.bal_prices.get(&snapshot.timestamp)?;

            let value = if snapshot.liquidity == 0.0 {
                0.0
            } else {
                52.0 * (emission * weight * price) / snapshot.liquidity * 100.0
            };

            Some(VebalApr {
                external_id: snapshot.external_id.clone(),
                pool_external_id: snapshot.pool_external_id.clone(),
                timestamp: snapshot.timestamp,
                value,
            })
        })
        .collect()
}

/// Share of the pool's value held in `token` on a given day.
///
/// Weighted pools use the token weight; other pools use the token's share of
/// the balances, ignoring the pool's own BPT.
fn token_share(
    pool: &Pool,
    tokens: &[PoolToken],
    token: &PoolToken,
    amounts: &[f64],
) -> Option<f64> {
    if let Some(weight) = token.weight {
        return Some(weight);
    }

    let amount_of = |t: &PoolToken| {
        usize::try_from(t.token_index - 1)
            .ok()
            .and_then(|i| amounts.get(i))
            .copied()
    };

    let total: f64 = tokens
        .iter()
        .filter(|t| !pool.is_own_bpt(&t.token_address))
        .filter_map(amount_of)
        .sum();
    if total <= 0.0 {
        return None;
    }

    Some(amount_of(token)? / total)
}

/// `(rate[D] / rate[D-1] - 1) * 365 * 100 * share * (1 - protocolYieldFee)`
/// for each token of the pool that has a rate provider.
pub fn token_yield_aprs(
    pool: &Pool,
    tokens: &[PoolToken],
    snapshots: &[PoolSnapshot],
    ctx: &AprContext,
) -> Vec<TokenYieldApr> {
    let mut aprs = Vec::new();

    for token in tokens {
        if pool.is_own_bpt(&token.token_address)
            || !ctx
                .rate_providers
                .contains(&(pool.external_id.clone(), token.token_address.clone()))
        {
            continue;
        }

        let rate_at = |day: DateTime<Utc>| {
            ctx.token_rates
                .get(&(token.token_address.clone(), token.network_slug.clone(), day))
                .copied()
        };

        for snapshot in snapshots {
            let (Some(rate), Some(previous_rate)) = (
                rate_at(snapshot.timestamp),
                rate_at(snapshot.timestamp - Duration::days(1)),
            ) else {
                continue;
            };
            if previous_rate == 0.0 {
                continue;
            }
            let Some(share) = token_share(pool, tokens, token, &snapshot.amounts) else {
                continue;
            };

            let protocol_fee = if token.is_exempt_from_yield_protocol_fee {
                0.0
            } else {
                snapshot.protocol_yield_fee_cache.unwrap_or(DEFAULT_PROTOCOL_FEE)
            };

            aprs.push(TokenYieldApr {
                external_id: TokenYieldApr::external_id_for(
                    &pool.external_id,
                    &token.token_address,
                    snapshot.timestamp,
                ),
                pool_external_id: pool.external_id.clone(),
                token_address: token.token_address.clone(),
                timestamp: snapshot.timestamp,
                value: (rate / previous_rate - 1.0) * 365.0 * 100.0 * share * (1.0 - protocol_fee),
            });
        }
    }

    aprs
}

/// Every APR of one pool. `snapshots` and `tokens` belong to `pool`.
pub fn pool_aprs(
    pool: &Pool,
    tokens: &[PoolToken],
    snapshots: &[PoolSnapshot],
    ctx: &AprContext,
) -> PoolAprs {
    PoolAprs {
        swap_fee: swap_fee_aprs(snapshots),
        vebal: vebal_aprs(snapshots, ctx),
        token_yield: token_yield_aprs(pool, tokens, snapshots, ctx),
    }
}
