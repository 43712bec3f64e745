use std::{future::Future, sync::Arc};

use log::info;

use crate::config::Settings;

pub mod models;
pub mod postgres;

pub use postgres::{PostgresClient, StagingWriter};

/// Storage interface consumed by the ETL: insert a slice of rows, silently
/// ignoring rows that collide with a unique constraint.
///
/// Returns the number of rows actually inserted. Implementations must be
/// idempotent so a re-run after a partial failure only adds missing rows.
pub trait InsertRows<R>: Sync {
    fn insert_rows(&self, rows: &[R]) -> impl Future<Output = anyhow::Result<u64>> + Send;
}

/// Database handle shared by the ETL pipeline and the HTTP API.
#[derive(Clone)]
pub struct Database {
    pub postgres: Arc<PostgresClient>,
}

impl Database {
    /// Connect and bring the schema up to date.
    pub async fn new(settings: Arc<Settings>) -> anyhow::Result<Self> {
        let postgres = PostgresClient::new(settings.postgres.clone()).await?;
        postgres.migrate().await?;

        info!("Database ready");

        Ok(Self {
            postgres: Arc::new(postgres),
        })
    }
}
