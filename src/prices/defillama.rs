use std::{collections::HashMap, time::Duration};

use anyhow::{anyhow, Context};
use chrono::{DateTime, Utc};
use reqwest::{Client, Response};
use serde::{de::DeserializeOwned, Deserialize};

use crate::config::PriceSettings;

/// A historical price as reported by the coins API.
#[derive(Debug, Clone, PartialEq)]
pub struct CoinPrice {
    pub network: String,
    pub address: String,
    pub price: f64,
}

/// Block closest to a requested unix time.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct BlockAt {
    pub height: u64,
    pub timestamp: i64,
}

#[derive(Debug, Deserialize)]
struct HistoricalPrices {
    coins: HashMap<String, CoinEntry>,
}

#[derive(Debug, Deserialize)]
struct CoinEntry {
    price: f64,
}

impl HistoricalPrices {
    /// Split `network:address` keys; keys without a network are skipped.
    fn into_prices(self) -> Vec<CoinPrice> {
        self.coins
            .into_iter()
            .filter_map(|(key, entry)| {
                let (network, address) = key.split_once(':')?;
                Some(CoinPrice {
                    network: network.to_string(),
                    address: address.to_lowercase(),
                    price: entry.price,
                })
            })
            .collect()
    }
}

/// Client for the DefiLlama coins API.
#[derive(Clone)]
pub struct DefiLlamaClient {
    http: Client,
    base_url: String,
}

impl DefiLlamaClient {
    pub fn new(settings: &PriceSettings) -> anyhow::Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to build DefiLlama HTTP client")?;

        Ok(Self {
            http,
            base_url: settings.defillama_url.trim_end_matches('/').to_string(),
        })
    }

    /// Prices of `coins` (`network:address`) at `at`.
    pub async fn historical_prices(
        &self,
        at: DateTime<Utc>,
        coins: &[&str],
    ) -> anyhow::Result<Vec<CoinPrice>> {
        let url = format!(
            "{}/prices/historical/{}/{}",
            self.base_url,
            at.timestamp(),
            coins.join(",")
        );
        let prices: HistoricalPrices = self.get(&url).await?;
        Ok(prices.into_prices())
    }

    /// Block of `chain` (a DefiLlama chain name) at `unix`.
    pub async fn block_at(&self, chain: &str, unix: i64) -> anyhow::Result<BlockAt> {
        let url = format!("{}/block/{}/{}", self.base_url, chain, unix);
        self.get(&url).await
    }

    async fn get<T: DeserializeOwned>(&self, url: &str) -> anyhow::Result<T> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .with_context(|| format!("GET {} failed", url))?;
        check_status_code_and_deserialize(response)
            .await
            .with_context(|| format!("GET {} returned an unusable response", url))
    }
}

async fn check_status_code_and_deserialize<T: DeserializeOwned>(
    response: Response,
) -> anyhow::Result<T> {
    if !response.status().is_success() {
        return Err(anyhow!(
            "Request status not ok: {}, body: {:?}",
            response.status(),
            response.text().await
        ));
    }
    response.json::<T>().await.map_err(Into::into)
}
