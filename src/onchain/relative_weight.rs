use std::time::Duration;

use alloy::{
    primitives::{Address, U256},
    providers::{DynProvider, ProviderBuilder, MULTICALL3_ADDRESS},
    sol_types::SolCall,
};
use anyhow::Context;
use futures::{
    future::{join_all, BoxFuture},
    stream, FutureExt, StreamExt,
};
use log::{debug, warn};
use moka::future::Cache;
use thiserror::Error;

use crate::{
    abis::{Call3, IGaugeController, IMulticall3, McResult},
    config::EthereumSettings,
    utils::wad_to_f64,
};

/// Maximum retries for multicall
const MAX_RETRIES: u32 = 3;

/// Delay between retries (exponential backoff base)
const RETRY_DELAY_MS: u64 = 100;

/// Timeout for individual RPC calls (30 seconds)
const RPC_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Multicall batches in flight at once
const CONCURRENT_BATCHES: usize = 4;

/// Gauge controller weight of one gauge at one unix time.
#[derive(Debug, Clone, PartialEq)]
pub struct RelativeWeight {
    pub gauge: String,
    pub timestamp: i64,
    /// Fraction of total emissions, in [0, 1]
    pub weight: f64,
}

/// A `gauge_relative_weight` read that could not be completed.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("relative weight of gauge {gauge} at {timestamp}: {reason}")]
pub struct RelativeWeightError {
    pub gauge: String,
    pub timestamp: i64,
    pub reason: String,
}

impl RelativeWeightError {
    fn new(gauge: &str, timestamp: i64, reason: impl Into<String>) -> Self {
        Self {
            gauge: gauge.to_string(),
            timestamp,
            reason: reason.into(),
        }
    }
}

/// One pair with its gauge address already parsed.
#[derive(Debug, Clone)]
struct WeightRequest {
    gauge: String,
    address: Address,
    timestamp: i64,
}

impl WeightRequest {
    fn new(gauge: &str, timestamp: i64) -> Result<Self, RelativeWeightError> {
        let address = gauge.parse::<Address>().map_err(|e| {
            RelativeWeightError::new(gauge, timestamp, format!("invalid gauge address: {e}"))
        })?;
        if timestamp < 0 {
            return Err(RelativeWeightError::new(gauge, timestamp, "negative timestamp"));
        }
        Ok(Self {
            gauge: gauge.to_string(),
            address,
            timestamp,
        })
    }

    fn time(&self) -> U256 {
        U256::from(self.timestamp.unsigned_abs())
    }

    fn error(&self, reason: impl Into<String>) -> RelativeWeightError {
        RelativeWeightError::new(&self.gauge, self.timestamp, reason)
    }
}

/// Reads gauge relative weights from the gauge controller through multicall3.
///
/// Successful reads are cached by `(gauge, timestamp)`: a historical weight
/// never changes once the timestamp is in the past.
#[derive(Clone)]
pub struct RelativeWeightFetcher {
    provider: DynProvider,
    controller: Address,
    batch_size: usize,
    cache: Cache<(String, i64), f64>,
}

impl RelativeWeightFetcher {
    pub fn new(settings: &EthereumSettings) -> anyhow::Result<Self> {
        let controller = settings
            .gauge_controller
            .parse()
            .with_context(|| format!("Invalid gauge controller {}", settings.gauge_controller))?;

        let client = ProviderBuilder::new().connect_http(settings.rpc_url.clone());
        let provider = DynProvider::new(client);

        let cache = Cache::builder()
            .max_capacity(100_000)
            .time_to_live(Duration::from_secs(86_400))
            .build();

        Ok(Self {
            provider,
            controller,
            batch_size: settings.multicall_batch_size.max(1),
            cache,
        })
    }

    /// Fetch the relative weight of every `(gauge, unix timestamp)` pair.
    ///
    /// The output is aligned with `pairs`. A failed pair is returned as an
    /// error carrying its gauge and timestamp and does not affect the others.
    pub async fn fetch(
        &self,
        pairs: &[(String, i64)],
    ) -> Vec<Result<RelativeWeight, RelativeWeightError>> {
        let mut slots: Vec<Option<Result<RelativeWeight, RelativeWeightError>>> =
            Vec::with_capacity(pairs.len());
        let mut requests = Vec::new();
        let mut positions = Vec::new();

        for (gauge, timestamp) in pairs {
            if let Some(weight) = self.cache.get(&(gauge.clone(), *timestamp)).await {
                slots.push(Some(Ok(RelativeWeight {
                    gauge: gauge.clone(),
                    timestamp: *timestamp,
                    weight,
                })));
                continue;
            }
            match WeightRequest::new(gauge, *timestamp) {
                Ok(request) => {
                    positions.push(slots.len());
                    requests.push(request);
                    slots.push(None);
                },
                Err(e) => slots.push(Some(Err(e))),
            }
        }

        debug!(
            "Relative weights: {} pairs, {} to fetch",
            pairs.len(),
            requests.len()
        );

        let chunks: Vec<Vec<WeightRequest>> = requests
            .chunks(self.batch_size)
            .map(<[WeightRequest]>::to_vec)
            .collect();
        let fetched: Vec<Vec<Result<RelativeWeight, RelativeWeightError>>> =
            stream::iter(chunks)
                .map(|chunk| self.fetch_chunk_with_retry(chunk))
                .buffered(CONCURRENT_BATCHES)
                .collect()
                .await;

        for (position, result) in positions.into_iter().zip(fetched.into_iter().flatten()) {
            if let Ok(weight) = &result {
                self.cache
                    .insert((weight.gauge.clone(), weight.timestamp), weight.weight)
                    .await;
            }
            slots[position] = Some(result);
        }

        slots
            .into_iter()
            .zip(pairs)
            .map(|(slot, (gauge, timestamp))| {
                slot.unwrap_or_else(|| {
                    Err(RelativeWeightError::new(gauge, *timestamp, "no result returned"))
                })
            })
            .collect()
    }

    /// Fetch one chunk with retry logic, falling back to individual calls.
    ///
    /// Takes the chunk by value and returns a boxed future so the stream in
    /// [`Self::fetch`] stays `Send` inside spawned jobs.
    fn fetch_chunk_with_retry(
        &self,
        requests: Vec<WeightRequest>,
    ) -> BoxFuture<'_, Vec<Result<RelativeWeight, RelativeWeightError>>> {
        async move {
            for attempt in 0..MAX_RETRIES {
                match self.fetch_chunk(&requests).await {
                    Ok(weights) => return weights,
                    Err(e) => {
                        debug!("Multicall attempt {} failed: {:#}", attempt + 1, e);
                        if attempt < MAX_RETRIES - 1 {
                            let delay =
                                Duration::from_millis(RETRY_DELAY_MS * 2_u64.pow(attempt));
                            tokio::time::sleep(delay).await;
                        }
                    },
                }
            }

            warn!(
                "Multicall failed {} times, reading {} gauge weights individually",
                MAX_RETRIES,
                requests.len()
            );
            self.fetch_individually(&requests).await
        }
        .boxed()
    }

    async fn fetch_chunk(
        &self,
        requests: &[WeightRequest],
    ) -> anyhow::Result<Vec<Result<RelativeWeight, RelativeWeightError>>> {
        let multicall = IMulticall3::new(MULTICALL3_ADDRESS, &self.provider);
        let controller = IGaugeController::new(self.controller, &self.provider);

        let calls: Vec<Call3> = requests
            .iter()
            .map(|request| Call3 {
                target: self.controller,
                allowFailure: true,
                callData: controller
                    .gauge_relative_weight(request.address, request.time())
                    .calldata()
                    .to_vec()
                    .into(),
            })
            .collect();

        let results = tokio::time::timeout(RPC_CALL_TIMEOUT, multicall.aggregate3(calls).call())
            .await
            .context("Multicall timeout")?
            .context("Multicall aggregate3 failed")?;

        if results.len() != requests.len() {
            anyhow::bail!(
                "Multicall returned {} results for {} calls",
                results.len(),
                requests.len()
            );
        }

        Ok(collect_results(requests, &results))
    }

    /// Fallback: read weights one by one when multicall fails
    async fn fetch_individually(
        &self,
        requests: &[WeightRequest],
    ) -> Vec<Result<RelativeWeight, RelativeWeightError>> {
        let tasks = requests.iter().map(|request| self.fetch_single(request));
        join_all(tasks).await
    }

    async fn fetch_single(
        &self,
        request: &WeightRequest,
    ) -> Result<RelativeWeight, RelativeWeightError> {
        let controller = IGaugeController::new(self.controller, &self.provider);
        let call = controller.gauge_relative_weight(request.address, request.time());

        let raw = match tokio::time::timeout(RPC_CALL_TIMEOUT, call.call()).await {
            Ok(Ok(raw)) => raw,
            Ok(Err(e)) => return Err(request.error(e.to_string())),
            Err(_) => return Err(request.error("timed out")),
        };

        to_weight(request, raw)
    }
}

fn to_weight(request: &WeightRequest, raw: U256) -> Result<RelativeWeight, RelativeWeightError> {
    let weight = wad_to_f64(raw).ok_or_else(|| request.error(format!("weight {raw} out of range")))?;
    Ok(RelativeWeight {
        gauge: request.gauge.clone(),
        timestamp: request.timestamp,
        weight,
    })
}

/// Decode multicall results, index-aligned with `requests`.
fn collect_results(
    requests: &[WeightRequest],
    results: &[McResult],
) -> Vec<Result<RelativeWeight, RelativeWeightError>> {
    requests
        .iter()
        .zip(results)
        .map(|(request, result)| {
            if !result.success {
                return Err(request.error("call reverted"));
            }
            let raw =
                IGaugeController::gauge_relative_weightCall::abi_decode_returns(&result.returnData)
                    .map_err(|e| request.error(format!("undecodable return data: {e}")))?;
            to_weight(request, raw)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use alloy::sol_types::SolValue;

    use super::*;

    #[test]
    fn test_fetch_future_is_send() {
        fn assert_send<T: Send + 'static>(_: T) {}
        let _ = |fetcher: RelativeWeightFetcher, pairs: Vec<(String, i64)>| {
            assert_send(async move {
                fetcher.fetch(&pairs).await;
            })
        };
    }

    fn request(gauge: &str, timestamp: i64) -> WeightRequest {
        WeightRequest {
            gauge: gauge.to_string(),
            address: Address::ZERO,
            timestamp,
        }
    }

    #[test]
    fn test_request_validation() {
        let gauge = "0x27fd581e9d0b2690c2f808cd40f7fe667714b575";
        assert_eq!(WeightRequest::new(gauge, 1_681_430_400).unwrap().gauge, gauge);

        let invalid = WeightRequest::new("not-a-gauge", 1_681_430_400).unwrap_err();
        assert_eq!(invalid.gauge, "not-a-gauge");
        assert!(WeightRequest::new(gauge, -1).is_err());
    }

    fn success(raw: U256) -> McResult {
        McResult {
            success: true,
            returnData: raw.abi_encode().into(),
        }
    }

    #[test]
    fn test_weight_is_normalised() {
        let requests = [request("0xgauge", 1_681_430_400)];
        let results = [success(U256::from(500_000_000_000_000_000u128))];

        let weights = collect_results(&requests, &results);

        assert_eq!(
            weights,
            vec![Ok(RelativeWeight {
                gauge: "0xgauge".to_string(),
                timestamp: 1_681_430_400,
                weight: 0.5,
            })]
        );
    }

    #[test]
    fn test_failed_pair_keeps_context() {
        let requests = [
            request("0xgood", 1_681_430_400),
            request("0xbad", 1_682_035_200),
            request("0xgarbled", 1_682_035_200),
        ];
        let results = [
            success(U256::from(250_000_000_000_000_000u128)),
            McResult {
                success: false,
                returnData: Default::default(),
            },
            McResult {
                success: true,
                returnData: vec![1u8, 2, 3].into(),
            },
        ];

        let weights = collect_results(&requests, &results);

        assert_eq!(weights[0].as_ref().unwrap().weight, 0.25);

        let reverted = weights[1].as_ref().unwrap_err();
        assert_eq!(reverted.gauge, "0xbad");
        assert_eq!(reverted.timestamp, 1_682_035_200);
        assert!(reverted.to_string().contains("0xbad"));

        assert_eq!(weights[2].as_ref().unwrap_err().gauge, "0xgarbled");
    }
}
