use std::time::Duration;

use anyhow::Context;
use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod};
use log::{info, warn};
use tokio_postgres::NoTls;

use crate::config::PostgresSettings;

const SCHEMA: &str = include_str!("../../../schema/postgres.sql");
const MAX_CONNECT_ATTEMPTS: u32 = 3;

/// Split a SQL script into statements.
///
/// Semicolons inside `--` comments and `$$` bodies do not end a statement.
fn split_sql_statements(sql: &str) -> Vec<&str> {
    let bytes = sql.as_bytes();
    let mut statements = Vec::new();
    let mut start = 0;
    let mut in_dollar_quote = false;
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'$' if bytes.get(i + 1) == Some(&b'$') => {
                in_dollar_quote = !in_dollar_quote;
                i += 1;
            },
            b'-' if !in_dollar_quote && bytes.get(i + 1) == Some(&b'-') => {
                while i < bytes.len() && bytes[i] != b'\n' {
                    i += 1;
                }
            },
            b';' if !in_dollar_quote => {
                statements.push(&sql[start..i]);
                start = i + 1;
            },
            _ => {},
        }
        i += 1;
    }
    statements.push(&sql[start..]);

    statements
        .into_iter()
        .map(str::trim)
        .filter(|stmt| {
            stmt.lines()
                .any(|line| !line.trim().is_empty() && !line.trim_start().starts_with("--"))
        })
        .collect()
}

/// PostgreSQL client with connection pooling.
///
/// Owns every table of the APR pipeline: raw staging payloads, typed pools,
/// daily snapshots, gauges, prices and derived APR rows. Uses
/// `deadpool-postgres` so concurrent batch inserts each get a connection.
#[derive(Clone)]
pub struct PostgresClient {
    pub pool: Pool,
}

impl PostgresClient {
    /// Build the pool and wait for a first connection, retrying with
    /// exponential backoff.
    pub async fn new(settings: PostgresSettings) -> anyhow::Result<Self> {
        info!(
            "Connecting to PostgreSQL at {}:{}/{}",
            settings.host, settings.port, settings.database
        );

        let mut pg_config = tokio_postgres::Config::new();
        pg_config
            .host(&settings.host)
            .port(settings.port)
            .user(&settings.user)
            .password(&settings.password)
            .dbname(&settings.database);

        let manager = Manager::from_config(
            pg_config,
            NoTls,
            ManagerConfig {
                recycling_method: RecyclingMethod::Fast,
            },
        );
        let pool = Pool::builder(manager)
            .max_size(settings.pool_size)
            .build()
            .context("Failed to create PostgreSQL connection pool")?;

        let mut attempt = 1;
        loop {
            match pool.get().await {
                Ok(_conn) => break,
                Err(e) if attempt < MAX_CONNECT_ATTEMPTS => {
                    let delay = Duration::from_millis(100 * 2_u64.pow(attempt));
                    warn!(
                        "Failed to connect to PostgreSQL (attempt {}/{}), retrying in {:?}: {}",
                        attempt, MAX_CONNECT_ATTEMPTS, delay, e
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                },
                Err(e) => {
                    return Err(e).with_context(|| {
                        format!(
                            "Failed to connect to PostgreSQL after {} attempts",
                            MAX_CONNECT_ATTEMPTS
                        )
                    });
                },
            }
        }

        info!("Connected to PostgreSQL");
        Ok(Self { pool })
    }

    pub async fn health_check(&self) -> anyhow::Result<()> {
        let client = self.pool.get().await?;
        client
            .query_one("SELECT 1", &[])
            .await
            .context("PostgreSQL health check failed")?;
        Ok(())
    }

    /// Apply `schema/postgres.sql`. Every statement is idempotent.
    pub async fn migrate(&self) -> anyhow::Result<()> {
        let client = self.pool.get().await?;

        let statements = split_sql_statements(SCHEMA);
        for stmt in &statements {
            client
                .batch_execute(stmt)
                .await
                .with_context(|| format!("Failed to execute migration statement: {}", stmt))?;
        }

        info!("Applied {} schema statements", statements.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_keeps_dollar_quoted_bodies() {
        let sql = r#"
            -- tables; and indexes
            CREATE TABLE a (id INT);
            CREATE FUNCTION f() RETURNS INT AS $$ SELECT 1; $$ LANGUAGE SQL;
            CREATE INDEX i ON a (id)
        "#;

        let statements = split_sql_statements(sql);

        assert_eq!(statements.len(), 3);
        assert!(statements[0].ends_with("CREATE TABLE a (id INT)"));
        assert!(statements[1].contains("SELECT 1;"));
        assert!(statements[2].starts_with("CREATE INDEX"));
    }

    #[test]
    fn test_bundled_schema_splits() {
        let statements = split_sql_statements(SCHEMA);
        assert!(!statements.is_empty());
        assert!(statements
            .iter()
            .any(|stmt| stmt.contains("CREATE SCHEMA IF NOT EXISTS balancer")));
    }
}
