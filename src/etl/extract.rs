//! Fetch-and-stage routines: one per subgraph entity type.
//!
//! Extractors never transform. Each raw entity is stored as received, with
//! the source network embedded so the transform steps can run from staging
//! alone.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use log::{debug, error, info};
use serde_json::{json, Value};
use url::Url;

use crate::{
    db::{
        models::{RawGauge, RawRecord},
        InsertRows,
    },
    etl::{
        graphql::GraphQlClient,
        loader::add_to_table,
        paginate::{paginated_fetch, Entity, PaginatedQuery},
        registry::{NetworkEndpoint, ENDPOINT_V3},
    },
};

pub const POOLS_WITHOUT_GAUGE_QUERY: PaginatedQuery = PaginatedQuery {
    root: "pools",
    text: r#"
query PoolsWherePoolType($latestId: String!) {
  pools(
    first: 1000,
    where: {
      id_gt: $latestId,
    }
  ) {
    id
    address
    symbol
    poolType
    createTime
    poolTypeVersion
    tokens {
      isExemptFromYieldProtocolFee
      address
      symbol
      weight
    }
  }
}
"#,
};

pub const POOLS_SNAPSHOTS: PaginatedQuery = PaginatedQuery {
    root: "poolSnapshots",
    text: r#"
query PoolSnapshots($latestId: String!) {
  poolSnapshots(
    first: 1000,
    where: {
      id_gt: $latestId,
    }
  ) {
    id
    pool {
      id
      protocolYieldFeeCache
      protocolSwapFeeCache
    }
    amounts
    totalShares
    swapVolume
    protocolFee
    swapFees
    liquidity
    timestamp
  }
}
"#,
};

pub const PRICE_RATE_PROVIDERS_QUERY: PaginatedQuery = PaginatedQuery {
    root: "priceRateProviders",
    text: r#"
query PriceRateProviders($latestId: String!) {
  priceRateProviders(
    first: 1000,
    where: {
      id_gt: $latestId,
    }
  ) {
    id
    address
    poolId {
      id
    }
    token {
      address
    }
  }
}
"#,
};

pub const VOTING_GAUGES_QUERY: &str = r#"
query VeBalGetVotingList {
    veBalGetVotingList {
        chain
        id
        address
        symbol
        type
        gauge {
            address
            isKilled
            addedTimestamp
            relativeWeightCap
        }
        tokens {
            address
            logoURI
            symbol
            weight
        }
    }
}
"#;

/// Embed `network` into each entity of a page.
fn stage(page: Vec<Entity>, network: &str) -> Vec<RawRecord> {
    page.into_iter()
        .map(|entity| {
            let external_id = entity.id.clone();
            let raw_data = entity.into_value_with(&[("network", json!(network))]);
            RawRecord::new(external_id, raw_data)
        })
        .collect()
}

/// Paginate `query` on one network and stage every page into `table`.
pub async fn extract_network<C, T>(
    client: &C,
    table: &T,
    network: &NetworkEndpoint,
    query: &PaginatedQuery,
) -> anyhow::Result<usize>
where
    C: GraphQlClient,
    T: InsertRows<RawRecord>,
{
    debug!("Extracting `{}` for network {}", query.root, network.slug);

    paginated_fetch(client, &network.subgraph_url, query, |page| async move {
        add_to_table(table, &stage(page, network.slug)).await?;
        Ok(())
    })
    .await
}

/// Run [`extract_network`] on every network concurrently.
///
/// A failing network is logged and does not affect the others. Returns the
/// slugs of the networks that failed.
pub async fn extract_all_networks<C, T>(
    client: &C,
    table: &T,
    networks: &[NetworkEndpoint],
    query: &PaginatedQuery,
) -> Vec<&'static str>
where
    C: GraphQlClient,
    T: InsertRows<RawRecord>,
{
    let results = join_all(
        networks
            .iter()
            .map(|network| extract_network(client, table, network, query)),
    )
    .await;

    let mut failed = Vec::new();
    for (network, result) in networks.iter().zip(results) {
        match result {
            Ok(count) => info!("Extracted {} `{}` from {}", count, query.root, network.slug),
            Err(e) => {
                error!("Failed to extract `{}` from {}: {:#}", query.root, network.slug, e);
                failed.push(network.slug);
            },
        }
    }
    failed
}

/// Stage the veBAL voting list as generation `extracted_at`.
///
/// Entries without a gauge are skipped.
pub async fn extract_gauges<C, T>(
    client: &C,
    table: &T,
    extracted_at: DateTime<Utc>,
) -> anyhow::Result<usize>
where
    C: GraphQlClient,
    T: InsertRows<RawGauge>,
{
    let endpoint = Url::parse(ENDPOINT_V3)?;
    let mut data = client.query(&endpoint, VOTING_GAUGES_QUERY, json!({})).await?;

    let entries = match data.get_mut("veBalGetVotingList").map(Value::take) {
        Some(Value::Array(entries)) => entries,
        _ => anyhow::bail!("Voting list response has no `veBalGetVotingList` array"),
    };

    let gauges: Vec<RawGauge> = entries
        .into_iter()
        .filter_map(|entry| {
            let address = entry["gauge"]["address"].as_str()?.to_lowercase();
            let pool_external_id = entry["id"].as_str()?.to_string();
            Some(RawGauge {
                extracted_at,
                address,
                pool_external_id,
                raw_data: entry,
            })
        })
        .collect();

    add_to_table(table, &gauges).await?;
    Ok(gauges.len())
}
