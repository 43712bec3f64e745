use std::{future::Future, sync::Arc, time::Duration};

use futures::{stream, StreamExt};
use log::{debug, error, warn};
use moka::future::Cache;

use crate::{
    api::{
        aggregate::compute_averages,
        filter::{filter_pool_stats, PoolFilterParams},
        query::{AprQuery, DateWindow},
        repository::PoolStatsRepository,
        sort::sort_and_limit,
        types::{AprResponse, PerDay},
    },
    config::ApiSettings,
};

pub const RETRY_ATTEMPTS: u32 = 3;
pub const RETRY_DELAY: Duration = Duration::from_secs(1);
const CONCURRENT_UNITS: usize = 4;

/// Run `f` until it succeeds, at most `attempts` times with `delay` between
/// attempts. `None` once every attempt has failed.
pub async fn with_retry<T, F, Fut>(label: &str, attempts: u32, delay: Duration, mut f: F) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    for attempt in 1..=attempts {
        match f().await {
            Ok(value) => return Some(value),
            Err(e) if attempt < attempts => {
                warn!("{} failed (attempt {}/{}): {:#}", label, attempt, attempts, e);
                tokio::time::sleep(delay).await;
            },
            Err(e) => error!("{} failed after {} attempts: {:#}", label, attempts, e),
        }
    }
    None
}

type CacheKey = (Option<String>, DateWindow);

/// Computes `/apr/api` responses.
///
/// Unfiltered responses are cached per pool and window; filters, sorting and
/// paging are applied to the cached value on every request.
pub struct AprService<R> {
    repository: Arc<R>,
    cache: Cache<CacheKey, AprResponse>,
    retry_delay: Duration,
}

impl<R: PoolStatsRepository> AprService<R> {
    pub fn new(repository: Arc<R>, settings: &ApiSettings) -> Self {
        Self {
            repository,
            cache: Cache::builder()
                .max_capacity(settings.cache_max_entries)
                .time_to_live(Duration::from_secs(settings.cache_ttl_secs))
                .build(),
            retry_delay: RETRY_DELAY,
        }
    }

    pub fn repository(&self) -> &R {
        &self.repository
    }

    pub async fn apr(&self, query: &AprQuery, filters: &PoolFilterParams) -> anyhow::Result<AprResponse> {
        let key = (query.pool_id.clone(), query.window);
        let response = match self.cache.get(&key).await {
            Some(response) => {
                debug!("Serving {:?} from cache", key);
                response
            },
            None => {
                let response = self.compute(query.pool_id.as_deref(), query.window).await?;
                self.cache.insert(key, response.clone()).await;
                response
            },
        };

        let AprResponse { per_day, average } = filter_pool_stats(response, filters);
        Ok(AprResponse {
            per_day: sort_and_limit(per_day, &query.sort, query.order, query.offset, query.limit),
            average,
        })
    }

    /// Fetch each round-aligned unit of `window` and average the union.
    async fn compute(&self, pool_id: Option<&str>, window: DateWindow) -> anyhow::Result<AprResponse> {
        let units: Vec<Option<PerDay>> = stream::iter(window.round_units())
            .map(|unit| {
                let label = format!(
                    "Pool stats {} {}..={}",
                    pool_id.unwrap_or("*"),
                    unit.start,
                    unit.end
                );
                async move {
                    with_retry(&label, RETRY_ATTEMPTS, self.retry_delay, || {
                        self.repository.pool_stats(pool_id, unit)
                    })
                    .await
                }
            })
            .buffered(CONCURRENT_UNITS)
            .collect()
            .await;

        let per_day: PerDay = units.into_iter().flatten().flatten().collect();
        let average = compute_averages(&per_day)?;

        Ok(AprResponse { per_day, average })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{
        sort::Order,
        types::{AprData, PoolStatsData},
    };
    use chrono::NaiveDate;
    use std::sync::{
        atomic::{AtomicU32, Ordering},
        Mutex,
    };

    struct FakeRepository {
        calls: AtomicU32,
        failing_unit_start: Option<NaiveDate>,
        requested: Mutex<Vec<DateWindow>>,
    }

    impl FakeRepository {
        fn new(failing_unit_start: Option<NaiveDate>) -> Self {
            Self {
                calls: AtomicU32::new(0),
                failing_unit_start,
                requested: Mutex::new(vec![]),
            }
        }
    }

    fn stats(pool_id: &str, apr: f64, tvl: f64) -> PoolStatsData {
        PoolStatsData {
            pool_id: pool_id.to_string(),
            symbol: pool_id.to_string(),
            network: "ethereum".to_string(),
            pool_type: "Weighted".to_string(),
            tokens: vec![],
            apr: AprData::new(apr, 0.0, vec![]),
            bal_price_usd: 5.0,
            tvl,
            volume: 0.0,
            voting_share: 0.0,
            collected_fees_usd: 0.0,
        }
    }

    impl PoolStatsRepository for FakeRepository {
        async fn pool_stats(&self, _pool_id: Option<&str>, window: DateWindow) -> anyhow::Result<PerDay> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.requested.lock().unwrap().push(window);
            if Some(window.start) == self.failing_unit_start {
                anyhow::bail!("database unavailable");
            }
            Ok(window
                .days()
                .map(|day| {
                    (
                        day.format("%Y-%m-%d").to_string(),
                        vec![stats("0xa", 1.0, 100.0), stats("0xb", 3.0, 300.0)],
                    )
                })
                .collect())
        }

        async fn ping(&self) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn service(repository: FakeRepository) -> AprService<FakeRepository> {
        let mut service = AprService::new(Arc::new(repository), &ApiSettings::default());
        service.retry_delay = Duration::from_millis(1);
        service
    }

    fn query(start: &str, end: &str) -> AprQuery {
        AprQuery {
            pool_id: None,
            window: DateWindow {
                start: date(start),
                end: date(end),
            },
            sort: "apr".to_string(),
            order: Order::Desc,
            offset: 0,
            limit: None,
        }
    }

    #[tokio::test]
    async fn test_retry_gives_up_after_three_attempts() {
        let attempts = AtomicU32::new(0);
        let result = with_retry("always failing", 3, Duration::from_millis(1), || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(anyhow::anyhow!("boom")) }
        })
        .await;

        assert!(result.is_none());
        assert_eq!(attempts.load(Ordering::SeqCst), 3);

        let recovered = with_retry("flaky", 3, Duration::from_millis(1), || {
            let attempt = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt < 4 {
                    anyhow::bail!("not yet");
                }
                Ok(attempt)
            }
        })
        .await;
        assert_eq!(recovered, Some(4));
    }

    #[tokio::test]
    async fn test_failed_unit_contributes_no_data() {
        // 2023-06-01 starts a round
        let service = service(FakeRepository::new(Some(date("2023-06-01"))));

        let response = service
            .apr(&query("2023-05-30", "2023-06-02"), &PoolFilterParams::default())
            .await
            .unwrap();

        let days: Vec<&str> = response.per_day.keys().map(String::as_str).collect();
        assert_eq!(days, vec!["2023-05-30", "2023-05-31"]);
        // one call for the healthy unit, three for the failing one
        assert_eq!(service.repository().calls.load(Ordering::SeqCst), 4);
        assert_eq!(response.average.tvl, 200.0);
    }

    #[tokio::test]
    async fn test_cache_then_filter_and_sort() {
        let service = service(FakeRepository::new(None));
        let mut query = query("2023-06-01", "2023-06-02");

        let all = service.apr(&query, &PoolFilterParams::default()).await.unwrap();
        assert_eq!(all.per_day["2023-06-01"][0].pool_id, "0xb");

        query.order = Order::Asc;
        query.limit = Some(1);
        let filters = PoolFilterParams {
            max_tvl: Some("200".to_string()),
            ..Default::default()
        };
        let filtered = service.apr(&query, &filters).await.unwrap();

        assert_eq!(service.repository().calls.load(Ordering::SeqCst), 1);
        assert_eq!(filtered.per_day["2023-06-02"].len(), 1);
        assert_eq!(filtered.per_day["2023-06-02"][0].pool_id, "0xa");
        assert_eq!(filtered.average.pool_average.len(), 1);
        // averages are computed before filtering
        assert_eq!(filtered.average.tvl, 200.0);
        assert_eq!(
            *service.repository().requested.lock().unwrap(),
            vec![query.window]
        );
    }
}
