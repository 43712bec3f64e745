//! The full ETL run and each of its steps.
//!
//! Every step is idempotent. A failing step aborts the run; failures of a
//! single network, gauge read, price day or rate read are logged and skipped.

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
    time::Instant,
};

use anyhow::Context;
use chrono::{DateTime, Duration, DurationRound, Utc};
use futures::{future, stream, StreamExt};
use log::{debug, error, info, warn};
use rustc_hash::FxHashMap;

use crate::{
    config::Settings,
    db::{
        models::{
            BalEmission, GaugeSnapshot, Pool, PoolSnapshot, PoolToken, RateProvider,
            StagingTable, TokenPrice, TokenRate, VebalRound,
        },
        Database, PostgresClient,
    },
    etl::{
        apr::{pool_aprs, swap_fee_aprs, vebal_aprs, AprContext, PoolAprs},
        calendar::calendar_start,
        emissions,
        extract::{
            extract_all_networks, extract_gauges, POOLS_SNAPSHOTS, POOLS_WITHOUT_GAUGE_QUERY,
            PRICE_RATE_PROVIDERS_QUERY,
        },
        graphql::HttpGraphQlClient,
        loader::add_to_table,
        paginate::PaginatedQuery,
        registry::{
            defillama_chain, network_endpoints, normalize_network_slug, NetworkEndpoint,
            NETWORK_SEEDS,
        },
        transform,
    },
    onchain::{RateReader, RelativeWeight, RelativeWeightError, RelativeWeightFetcher},
    prices::{DefiLlamaClient, BAL_ADDRESS, BAL_NETWORK},
};

/// Pools whose APRs are computed and written together.
const APR_POOL_CHUNK: usize = 100;

/// Concurrent `getRate()` reads per network.
const RATE_READ_CONCURRENCY: usize = 16;

/// A token rate still missing for one day.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateTask {
    pub token_address: String,
    pub network_slug: String,
    pub provider: String,
    pub day: DateTime<Utc>,
}

/// Runs the ETL against the database and the upstream sources.
pub struct Etl {
    pg: Arc<PostgresClient>,
    graphql: HttpGraphQlClient,
    weights: RelativeWeightFetcher,
    prices: DefiLlamaClient,
    networks: Vec<NetworkEndpoint>,
    token_yield_lookback_days: u32,
}

impl Etl {
    pub fn new(db: &Database, settings: &Settings) -> anyhow::Result<Self> {
        Ok(Self {
            pg: db.postgres.clone(),
            graphql: HttpGraphQlClient::new()?,
            weights: RelativeWeightFetcher::new(&settings.ethereum)?,
            prices: DefiLlamaClient::new(&settings.prices)?,
            networks: network_endpoints(settings)?,
            token_yield_lookback_days: settings.etl.token_yield_lookback_days,
        })
    }

    /// Run every step in dependency order.
    pub async fn run(&self) -> anyhow::Result<()> {
        let start = Instant::now();
        let now = Utc::now();
        info!("Starting ETL run");

        self.seed_networks().await.context("seed networks")?;
        self.seed_vebal_rounds(now).await.context("seed veBAL rounds")?;
        self.etl_pools().await.context("ETL pools")?;
        self.etl_snapshots(now).await.context("ETL snapshots")?;
        self.etl_gauges(now).await.context("ETL gauges")?;
        self.etl_rate_providers().await.context("ETL rate providers")?;
        self.seed_bal_emission().await.context("seed BAL emission")?;
        self.fetch_bal_prices().await.context("fetch BAL prices")?;
        self.etl_gauge_snapshots().await.context("ETL gauge snapshots")?;
        self.fetch_token_rates(now).await.context("fetch token rates")?;
        self.calculate_apr().await.context("calculate APR")?;

        info!("ETL run completed in {:?}", start.elapsed());
        Ok(())
    }

    pub async fn seed_networks(&self) -> anyhow::Result<()> {
        self.pg.upsert_networks(&NETWORK_SEEDS).await?;
        info!("Seeded {} networks", NETWORK_SEEDS.len());
        Ok(())
    }

    pub async fn seed_vebal_rounds(&self, now: DateTime<Utc>) -> anyhow::Result<()> {
        let rounds = VebalRound::generate_until(now);
        let inserted = add_to_table(self.pg.as_ref(), &rounds).await?;
        info!("Seeded veBAL rounds ({} total, {} new)", rounds.len(), inserted);
        Ok(())
    }

    async fn extract_to_staging(&self, kind: StagingTable, query: &PaginatedQuery) {
        let failed =
            extract_all_networks(&self.graphql, &self.pg.staging(kind), &self.networks, query)
                .await;
        if !failed.is_empty() {
            warn!(
                "`{}` extraction failed on {:?}, continuing with the other networks",
                query.root, failed
            );
        }
    }

    pub async fn etl_pools(&self) -> anyhow::Result<()> {
        self.extract_to_staging(StagingTable::Pools, &POOLS_WITHOUT_GAUGE_QUERY)
            .await;
        transform::transform_pools(&self.pg).await
    }

    pub async fn etl_snapshots(&self, now: DateTime<Utc>) -> anyhow::Result<()> {
        self.extract_to_staging(StagingTable::PoolSnapshots, &POOLS_SNAPSHOTS)
            .await;
        transform::transform_snapshots(&self.pg, now).await
    }

    pub async fn etl_gauges(&self, now: DateTime<Utc>) -> anyhow::Result<()> {
        let staged = extract_gauges(&self.graphql, self.pg.as_ref(), now).await?;
        info!("Extracted {} voting gauges", staged);
        transform::transform_gauges(&self.pg).await
    }

    pub async fn etl_rate_providers(&self) -> anyhow::Result<()> {
        self.extract_to_staging(StagingTable::RateProviders, &PRICE_RATE_PROVIDERS_QUERY)
            .await;
        transform::transform_rate_providers(&self.pg).await
    }

    pub async fn seed_bal_emission(&self) -> anyhow::Result<()> {
        let days = self.pg.snapshot_days().await?;
        let rows = bal_emission_rows(&days);
        let inserted = add_to_table(self.pg.as_ref(), &rows).await?;
        info!(
            "Seeded BAL emission for {} of {} snapshot days ({} new)",
            rows.len(),
            days.len(),
            inserted
        );
        Ok(())
    }

    pub async fn fetch_bal_prices(&self) -> anyhow::Result<()> {
        let days = self.pg.days_missing_price(BAL_ADDRESS, BAL_NETWORK).await?;
        let coin = format!("{}:{}", BAL_NETWORK, BAL_ADDRESS);
        info!("Fetching BAL price for {} days", days.len());

        let mut fetched = 0;
        for day in days {
            let prices = match self.prices.historical_prices(day, &[coin.as_str()]).await {
                Ok(prices) => prices,
                Err(e) => {
                    error!("Failed to fetch BAL price on {}: {:#}", day.date_naive(), e);
                    continue;
                },
            };

            let rows: Vec<TokenPrice> = prices
                .into_iter()
                .map(|price| TokenPrice {
                    token_address: price.address,
                    network_slug: normalize_network_slug(&price.network),
                    timestamp: day,
                    price_usd: price.price,
                })
                .collect();

            debug!("BAL price on {}: {:?}", day.date_naive(), rows);
            fetched += add_to_table(self.pg.as_ref(), &rows).await?;
        }

        info!("Stored {} BAL prices", fetched);
        Ok(())
    }

    pub async fn etl_gauge_snapshots(&self) -> anyhow::Result<()> {
        let pairs = self.pg.missing_gauge_snapshot_pairs().await?;
        if pairs.is_empty() {
            info!("Gauge snapshots are up to date");
            return Ok(());
        }

        let requests: Vec<(String, i64)> = pairs
            .iter()
            .map(|(gauge, round)| (gauge.clone(), round.start_date.timestamp()))
            .collect();
        let results = self.weights.fetch(&requests).await;

        let rows = gauge_snapshot_rows(&pairs, results);
        let inserted = add_to_table(self.pg.as_ref(), &rows).await?;
        info!(
            "Stored {} of {} missing gauge snapshots",
            inserted,
            pairs.len()
        );
        Ok(())
    }

    pub async fn fetch_token_rates(&self, now: DateTime<Utc>) -> anyhow::Result<()> {
        let readers: HashMap<&str, RateReader> = self
            .networks
            .iter()
            .filter_map(|network| {
                let rpc_url = network.rpc_url.clone()?;
                Some((network.slug, RateReader::new(rpc_url)))
            })
            .collect();
        if readers.is_empty() {
            info!("No network has an RPC configured, skipping token rates");
            return Ok(());
        }

        let days = lookback_days(now, self.token_yield_lookback_days);
        let Some(since) = days.first().copied() else {
            return Ok(());
        };

        let providers = self.pg.get_rate_providers().await?;
        let existing = self.pg.token_rate_keys(since).await?;
        let networks: HashSet<&str> = readers.keys().copied().collect();
        let tasks = rate_tasks(&providers, &networks, &days, &existing);
        info!("Reading {} missing token rates", tasks.len());

        let mut by_network: HashMap<String, Vec<RateTask>> = HashMap::new();
        for task in tasks {
            by_network
                .entry(task.network_slug.clone())
                .or_default()
                .push(task);
        }

        let mut stored = 0;
        for (slug, tasks) in by_network {
            let Some(reader) = readers.get(slug.as_str()) else {
                continue;
            };
            let rows = self.read_rates(&slug, reader, tasks).await;
            stored += add_to_table(self.pg.as_ref(), &rows).await?;
        }

        info!("Stored {} token rates", stored);
        Ok(())
    }

    async fn read_rates(
        &self,
        slug: &str,
        reader: &RateReader,
        tasks: Vec<RateTask>,
    ) -> Vec<TokenRate> {
        let chain = defillama_chain(slug);

        let days: HashSet<DateTime<Utc>> = tasks.iter().map(|task| task.day).collect();
        let mut blocks = HashMap::new();
        for day in days {
            match self.prices.block_at(chain, day.timestamp()).await {
                Ok(block) => {
                    blocks.insert(day, block.height);
                },
                Err(e) => error!("Failed to resolve {} block on {}: {:#}", slug, day.date_naive(), e),
            }
        }

        stream::iter(tasks)
            .map(|task| {
                let height = blocks.get(&task.day).copied();
                async move {
                    let height = height?;
                    match reader.rate_at(&task.provider, height).await {
                        Ok(rate) => Some(TokenRate {
                            token_address: task.token_address,
                            network_slug: task.network_slug,
                            timestamp: task.day,
                            rate,
                        }),
                        Err(e) => {
                            error!(
                                "Failed to read rate of {} on {} at {}: {:#}",
                                task.token_address,
                                slug,
                                task.day.date_naive(),
                                e
                            );
                            None
                        },
                    }
                }
            })
            .buffer_unordered(RATE_READ_CONCURRENCY)
            .filter_map(future::ready)
            .collect()
            .await
    }

    pub async fn calculate_apr(&self) -> anyhow::Result<()> {
        let ctx = AprContext::new(
            self.pg.get_gauges().await?,
            self.pg.get_gauge_snapshots().await?,
            self.pg.get_bal_emissions().await?,
            self.pg.get_token_prices(BAL_ADDRESS, BAL_NETWORK).await?,
            self.pg.get_rate_providers().await?,
            self.pg.get_token_rates(calendar_start()).await?,
        );

        let pool_ids = self.pg.daily_snapshot_pool_ids().await?;
        let (mut swap_fee, mut vebal, mut token_yield) = (0, 0, 0);

        for chunk in pool_ids.chunks(APR_POOL_CHUNK) {
            let pools = self.pg.get_pools(chunk).await?;
            let tokens = self.pg.get_pool_tokens(chunk).await?;
            let snapshots = self.pg.daily_snapshots_for(chunk).await?;

            let mut tokens_by_pool: FxHashMap<String, Vec<PoolToken>> = FxHashMap::default();
            for token in tokens {
                tokens_by_pool
                    .entry(token.pool_external_id.clone())
                    .or_default()
                    .push(token);
            }
            let pools_by_id: FxHashMap<&str, &Pool> =
                pools.iter().map(|pool| (pool.external_id.as_str(), pool)).collect();

            let mut aprs = PoolAprs::default();
            for (pool_id, pool_snapshots) in group_by_pool(&snapshots) {
                let computed = match pools_by_id.get(pool_id) {
                    Some(pool) => pool_aprs(
                        pool,
                        tokens_by_pool.get(pool_id).map_or(&[][..], Vec::as_slice),
                        pool_snapshots,
                        &ctx,
                    ),
                    None => PoolAprs {
                        swap_fee: swap_fee_aprs(pool_snapshots),
                        vebal: vebal_aprs(pool_snapshots, &ctx),
                        token_yield: vec![],
                    },
                };
                aprs.swap_fee.extend(computed.swap_fee);
                aprs.vebal.extend(computed.vebal);
                aprs.token_yield.extend(computed.token_yield);
            }

            swap_fee += add_to_table(self.pg.as_ref(), &aprs.swap_fee).await?;
            vebal += add_to_table(self.pg.as_ref(), &aprs.vebal).await?;
            token_yield += add_to_table(self.pg.as_ref(), &aprs.token_yield).await?;
        }

        info!(
            "Calculated APR for {} pools ({} swap fee, {} veBAL, {} token yield new rows)",
            pool_ids.len(),
            swap_fee,
            vebal,
            token_yield
        );
        Ok(())
    }
}

/// Split snapshots ordered by pool into one slice per pool.
fn group_by_pool(snapshots: &[PoolSnapshot]) -> Vec<(&str, &[PoolSnapshot])> {
    snapshots
        .chunk_by(|a, b| a.pool_external_id == b.pool_external_id)
        .filter_map(|group| Some((group.first()?.pool_external_id.as_str(), group)))
        .collect()
}

/// Weekly emission for each day. Days before emissions started are skipped.
fn bal_emission_rows(days: &[DateTime<Utc>]) -> Vec<BalEmission> {
    let mut skipped = 0;
    let rows = days
        .iter()
        .filter_map(|day| match emissions::weekly(day.timestamp()) {
            Ok(week_emission) => Some(BalEmission {
                timestamp: *day,
                week_emission,
            }),
            Err(e) => {
                debug!("{:#}", e);
                skipped += 1;
                None
            },
        })
        .collect();

    if skipped > 0 {
        warn!("{} snapshot days precede BAL emissions and have no emission", skipped);
    }
    rows
}

/// Gauge snapshot rows for the successful reads; failures are logged.
fn gauge_snapshot_rows(
    pairs: &[(String, VebalRound)],
    results: Vec<Result<RelativeWeight, RelativeWeightError>>,
) -> Vec<GaugeSnapshot> {
    pairs
        .iter()
        .zip(results)
        .filter_map(|((gauge, round), result)| match result {
            Ok(weight) => Some(GaugeSnapshot {
                gauge_address: gauge.clone(),
                timestamp: round.start_date,
                relative_weight: weight.weight,
                round_number: round.round_number,
            }),
            Err(e) => {
                error!("Skipping gauge snapshot of round {}: {}", round.round_number, e);
                None
            },
        })
        .collect()
}

/// UTC midnights of the last `lookback` days, today included.
fn lookback_days(now: DateTime<Utc>, lookback: u32) -> Vec<DateTime<Utc>> {
    let Ok(today) = now.duration_trunc(Duration::days(1)) else {
        return vec![];
    };
    (0..i64::from(lookback))
        .rev()
        .map(|offset| today - Duration::days(offset))
        .collect()
}

/// One read per (token, network, day) without a stored rate, on networks that
/// have an RPC. A token listed by several pools is read once, through the
/// first provider registered for it.
fn rate_tasks(
    providers: &[RateProvider],
    networks: &HashSet<&str>,
    days: &[DateTime<Utc>],
    existing: &HashSet<(String, String, DateTime<Utc>)>,
) -> Vec<RateTask> {
    let mut seen = HashSet::new();
    let mut tasks = Vec::new();

    for provider in providers {
        if !networks.contains(provider.network_slug.as_str())
            || !seen.insert((&provider.token_address, &provider.network_slug))
        {
            continue;
        }
        for day in days {
            let key = (
                provider.token_address.clone(),
                provider.network_slug.clone(),
                *day,
            );
            if existing.contains(&key) {
                continue;
            }
            tasks.push(RateTask {
                token_address: key.0,
                network_slug: key.1,
                provider: provider.address.clone(),
                day: *day,
            });
        }
    }

    tasks
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn day(n: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2023, 6, n, 0, 0, 0).unwrap()
    }

    fn provider(pool: &str, token: &str, network: &str, address: &str) -> RateProvider {
        RateProvider {
            pool_external_id: pool.to_string(),
            token_address: token.to_string(),
            network_slug: network.to_string(),
            address: address.to_string(),
        }
    }

    #[test]
    fn test_bal_emission_skips_days_before_start() {
        let before = DateTime::from_timestamp(emissions::START_EPOCH_TIME - 86_400, 0).unwrap();
        let rows = bal_emission_rows(&[before, day(1)]);

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].timestamp, day(1));
        assert!(rows[0].week_emission < 145_000.0);
    }

    #[test]
    fn test_gauge_snapshot_rows_keep_successes() {
        let pairs = vec![
            ("0xgauge1".to_string(), VebalRound::new(10)),
            ("0xgauge2".to_string(), VebalRound::new(10)),
        ];
        let start = VebalRound::new(10).start_date.timestamp();
        let results = vec![
            Ok(RelativeWeight {
                gauge: "0xgauge1".to_string(),
                timestamp: start,
                weight: 0.5,
            }),
            Err(RelativeWeightError {
                gauge: "0xgauge2".to_string(),
                timestamp: start,
                reason: "call reverted".to_string(),
            }),
        ];

        let rows = gauge_snapshot_rows(&pairs, results);

        assert_eq!(
            rows,
            vec![GaugeSnapshot {
                gauge_address: "0xgauge1".to_string(),
                timestamp: VebalRound::new(10).start_date,
                relative_weight: 0.5,
                round_number: 10,
            }]
        );
    }

    #[test]
    fn test_lookback_days_end_today() {
        let days = lookback_days(day(10) + Duration::hours(15), 3);
        assert_eq!(days, vec![day(8), day(9), day(10)]);
        assert!(lookback_days(day(10), 0).is_empty());
    }

    #[test]
    fn test_rate_tasks_only_missing_days() {
        let providers = vec![
            provider("0xpool1", "0xwsteth", "ethereum", "0xprovider1"),
            provider("0xpool2", "0xwsteth", "ethereum", "0xprovider2"),
            provider("0xpool3", "0xsavax", "avalanche", "0xprovider3"),
        ];
        let networks = HashSet::from(["ethereum"]);
        let existing = HashSet::from([("0xwsteth".to_string(), "ethereum".to_string(), day(1))]);

        let tasks = rate_tasks(&providers, &networks, &[day(1), day(2)], &existing);

        assert_eq!(
            tasks,
            vec![RateTask {
                token_address: "0xwsteth".to_string(),
                network_slug: "ethereum".to_string(),
                provider: "0xprovider1".to_string(),
                day: day(2),
            }]
        );
    }

    #[test]
    fn test_group_by_pool() {
        let snapshot = |pool: &str, n: u32| PoolSnapshot {
            external_id: PoolSnapshot::external_id_for(pool, day(n)),
            pool_external_id: pool.to_string(),
            timestamp: day(n),
            amounts: vec![],
            total_shares: 0.0,
            swap_volume: 0.0,
            swap_fees: 0.0,
            liquidity: 0.0,
            protocol_yield_fee_cache: None,
            protocol_swap_fee_cache: None,
        };
        let snapshots = vec![snapshot("0xa", 1), snapshot("0xa", 2), snapshot("0xb", 1)];

        let groups = group_by_pool(&snapshots);

        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].0, "0xa");
        assert_eq!(groups[0].1.len(), 2);
        assert_eq!(groups[1].1.len(), 1);
    }
}
