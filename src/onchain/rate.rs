use std::time::Duration;

use alloy::{
    eips::BlockId,
    primitives::Address,
    providers::{DynProvider, ProviderBuilder},
};
use anyhow::Context;
use url::Url;

use crate::{abis::IRateProvider, utils::wad_to_f64};

/// Timeout for individual RPC calls (30 seconds)
const RPC_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Reads `getRate()` from rate providers on one network.
#[derive(Clone)]
pub struct RateReader {
    provider: DynProvider,
}

impl RateReader {
    pub fn new(rpc_url: Url) -> Self {
        let client = ProviderBuilder::new().connect_http(rpc_url);
        Self {
            provider: DynProvider::new(client),
        }
    }

    /// Rate reported by `rate_provider` at block `height`, normalised from 18 decimals.
    pub async fn rate_at(&self, rate_provider: &str, height: u64) -> anyhow::Result<f64> {
        let address: Address = rate_provider
            .parse()
            .with_context(|| format!("Invalid rate provider {}", rate_provider))?;
        let contract = IRateProvider::new(address, &self.provider);

        let raw = tokio::time::timeout(
            RPC_CALL_TIMEOUT,
            contract.getRate().block(BlockId::number(height)).call(),
        )
        .await
        .context("getRate timeout")?
        .with_context(|| format!("getRate on {} at block {} failed", rate_provider, height))?;

        wad_to_f64(raw).with_context(|| format!("Rate {} of {} out of range", raw, rate_provider))
    }
}
