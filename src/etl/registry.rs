//! Static network registry.
//!
//! Maps each extracted network slug to its Balancer v2 subgraph endpoint and
//! owns the alias table used to normalise network names coming from the
//! subgraphs and the Balancer API.

use once_cell::sync::Lazy;
use url::Url;

use crate::{config::Settings, db::models::Network};

/// Balancer API v3, serves the veBAL voting list.
pub const ENDPOINT_V3: &str = "https://api-v3.balancer.fi/graphql";

const BASE_ENDPOINT_V2: &str = "https://api.thegraph.com/subgraphs/name/balancer-labs";

/// Network names that differ from their slug. Anything else is lower-cased.
const NETWORK_ALIASES: &[(&str, &str)] = &[("zkevm", "polygon-zkevm"), ("mainnet", "ethereum")];

/// Networks extracted from the subgraphs, in extraction order.
pub static NETWORK_ENDPOINTS: Lazy<Vec<(&'static str, String)>> = Lazy::new(|| {
    vec![
        ("ethereum", format!("{BASE_ENDPOINT_V2}/balancer-v2")),
        ("polygon", format!("{BASE_ENDPOINT_V2}/balancer-polygon-v2")),
        (
            "polygon-zkevm",
            "https://api.studio.thegraph.com/query/24660/balancer-polygon-zk-v2/version/latest"
                .to_string(),
        ),
        ("arbitrum", format!("{BASE_ENDPOINT_V2}/balancer-arbitrum-v2")),
        ("gnosis", format!("{BASE_ENDPOINT_V2}/balancer-gnosis-chain-v2")),
        ("optimism", format!("{BASE_ENDPOINT_V2}/balancer-optimism-v2")),
        (
            "base",
            "https://api.studio.thegraph.com/query/24660/balancer-base-v2/version/latest"
                .to_string(),
        ),
        ("avalanche", format!("{BASE_ENDPOINT_V2}/balancer-avalanche-v2")),
    ]
});

/// Seed rows for the networks table.
pub static NETWORK_SEEDS: Lazy<Vec<Network>> = Lazy::new(|| {
    vec![
        Network::new("Ethereum", "ethereum", 1),
        Network::new("Polygon", "polygon", 137),
        Network::new("Arbitrum", "arbitrum", 42161),
        Network::new("Gnosis", "gnosis", 100),
        Network::new("Optimism", "optimism", 10),
        Network::new("Goerli", "goerli", 5),
        Network::new("Sepolia", "sepolia", 11155111),
        Network::new("PolygonZKEVM", "polygon-zkevm", 1101),
        Network::new("Base", "base", 8453),
        Network::new("Avalanche", "avalanche", 43114),
    ]
});

/// An extraction target resolved against the configuration.
#[derive(Debug, Clone)]
pub struct NetworkEndpoint {
    pub slug: &'static str,
    pub subgraph_url: Url,
    pub rpc_url: Option<Url>,
}

/// Normalise a raw network name to its slug.
pub fn normalize_network_slug(raw: &str) -> String {
    let lower = raw.trim().to_lowercase();
    NETWORK_ALIASES
        .iter()
        .find(|(alias, _)| *alias == lower)
        .map(|(_, slug)| slug.to_string())
        .unwrap_or(lower)
}

/// SQL expression applying [`normalize_network_slug`] to `expr`.
pub fn network_slug_sql(expr: &str) -> String {
    let branches: String = NETWORK_ALIASES
        .iter()
        .map(|(alias, slug)| format!("WHEN LOWER(TRIM({expr})) = '{alias}' THEN '{slug}' "))
        .collect();
    format!("CASE {branches}ELSE LOWER(TRIM({expr})) END")
}

/// Registry endpoints with per-network overrides applied.
pub fn network_endpoints(settings: &Settings) -> anyhow::Result<Vec<NetworkEndpoint>> {
    NETWORK_ENDPOINTS
        .iter()
        .map(|(slug, default_url)| {
            let overrides = settings.network(slug);
            let subgraph_url = match overrides.and_then(|o| o.subgraph_url.clone()) {
                Some(url) => url,
                None => Url::parse(default_url)?,
            };
            Ok(NetworkEndpoint {
                slug,
                subgraph_url,
                rpc_url: overrides.and_then(|o| o.rpc_url.clone()),
            })
        })
        .collect()
}

/// DefiLlama chain name of a slug.
pub fn defillama_chain(slug: &str) -> &str {
    match slug {
        "gnosis" => "xdai",
        "polygon-zkevm" => "polygon_zkevm",
        other => other,
    }
}
