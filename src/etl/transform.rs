//! Transform steps: staged subgraph payloads into the typed tables.
//!
//! Networks are always ensured first so no row references an unknown slug.

use chrono::{DateTime, Utc};
use log::{info, warn};

use crate::{
    db::{models::StagingTable, PostgresClient},
    etl::{calendar::fill_daily_calendar, loader::add_to_table},
};

/// Pools whose raw snapshots are projected onto the calendar together.
const SNAPSHOT_POOL_CHUNK: usize = 100;

pub async fn transform_pools(pg: &PostgresClient) -> anyhow::Result<()> {
    pg.transform_networks(StagingTable::Pools).await?;
    let pools = pg.transform_pools().await?;
    let tokens = pg.transform_pool_tokens().await?;

    info!("Transformed {} pools ({} pool tokens)", pools, tokens);
    Ok(())
}

/// Build the daily snapshot calendar up to `now` from the staged snapshots.
pub async fn transform_snapshots(pg: &PostgresClient, now: DateTime<Utc>) -> anyhow::Result<()> {
    pg.transform_networks(StagingTable::PoolSnapshots).await?;
    pg.ensure_snapshot_pools().await?;

    let pool_ids = pg.raw_snapshot_pool_ids().await?;
    let mut inserted = 0;

    for chunk in pool_ids.chunks(SNAPSHOT_POOL_CHUNK) {
        let raw = pg.raw_snapshots_for(chunk).await?;
        let daily = fill_daily_calendar(raw, now);
        inserted += add_to_table(pg, &daily).await?;
    }

    info!(
        "Transformed snapshots of {} pools ({} new daily rows)",
        pool_ids.len(),
        inserted
    );
    Ok(())
}

/// Apply the latest voting-list generation to the gauges table.
pub async fn transform_gauges(pg: &PostgresClient) -> anyhow::Result<()> {
    let Some(extracted_at) = pg.latest_gauge_extraction().await? else {
        warn!("No voting list extracted yet, gauges left untouched");
        return Ok(());
    };

    pg.transform_gauges(extracted_at).await?;
    info!("Transformed gauges of extraction {}", extracted_at);
    Ok(())
}

pub async fn transform_rate_providers(pg: &PostgresClient) -> anyhow::Result<()> {
    pg.transform_networks(StagingTable::RateProviders).await?;
    let providers = pg.transform_rate_providers().await?;

    info!("Transformed {} rate providers", providers);
    Ok(())
}
