use futures::future::try_join_all;
use log::debug;

use crate::db::InsertRows;

/// Maximum rows per insert statement and per subgraph page.
pub const BATCH_SIZE: usize = 1_000;

/// Insert `rows` into `table` in chunks of [`BATCH_SIZE`], ignoring duplicates.
///
/// Chunks are inserted concurrently with no ordering between them. Returns
/// the number of rows that were actually new.
pub async fn add_to_table<R, T>(table: &T, rows: &[R]) -> anyhow::Result<u64>
where
    R: Sync,
    T: InsertRows<R>,
{
    if rows.is_empty() {
        return Ok(0);
    }

    let inserted = try_join_all(rows.chunks(BATCH_SIZE).map(|chunk| table.insert_rows(chunk)))
        .await?
        .into_iter()
        .sum();

    debug!("Inserted {} of {} rows", inserted, rows.len());
    Ok(inserted)
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    };

    use crate::db::InsertRows;

    /// In-memory table with a unique key, ignoring conflicting rows.
    pub struct MemoryTable<R> {
        key: fn(&R) -> String,
        pub rows: Mutex<Vec<R>>,
        pub statements: AtomicUsize,
    }

    impl<R: Clone> MemoryTable<R> {
        pub fn new(key: fn(&R) -> String) -> Self {
            Self {
                key,
                rows: Mutex::new(Vec::new()),
                statements: AtomicUsize::new(0),
            }
        }

        pub fn snapshot(&self) -> Vec<R> {
            self.rows.lock().unwrap().clone()
        }
    }

    impl<R: Clone + Send + Sync> InsertRows<R> for MemoryTable<R> {
        async fn insert_rows(&self, rows: &[R]) -> anyhow::Result<u64> {
            self.statements.fetch_add(1, Ordering::SeqCst);
            let mut stored = self.rows.lock().unwrap();
            let mut inserted = 0;
            for row in rows {
                let key = (self.key)(row);
                if !stored.iter().any(|existing| (self.key)(existing) == key) {
                    stored.push(row.clone());
                    inserted += 1;
                }
            }
            Ok(inserted)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use serde_json::json;

    use super::{testing::MemoryTable, *};
    use crate::db::models::RawRecord;

    fn records(n: usize) -> Vec<RawRecord> {
        (0..n)
            .map(|i| RawRecord::new(format!("0x{i:04x}"), json!({ "id": i })))
            .collect()
    }

    #[tokio::test]
    async fn test_add_to_table_is_idempotent() {
        let table = MemoryTable::new(|row: &RawRecord| row.external_id.clone());
        let rows = records(2_500);

        assert_eq!(add_to_table(&table, &rows).await.unwrap(), 2_500);
        assert_eq!(add_to_table(&table, &rows).await.unwrap(), 0);
        assert_eq!(table.snapshot().len(), 2_500);
        // 3 chunks per call
        assert_eq!(table.statements.load(Ordering::SeqCst), 6);
    }

    #[tokio::test]
    async fn test_add_to_table_only_adds_missing_rows() {
        let table = MemoryTable::new(|row: &RawRecord| row.external_id.clone());
        let rows = records(10);

        add_to_table(&table, &rows[..4]).await.unwrap();
        assert_eq!(add_to_table(&table, &rows).await.unwrap(), 6);
        assert_eq!(table.snapshot().len(), 10);
    }

    #[tokio::test]
    async fn test_add_to_table_empty_issues_no_statement() {
        let table = MemoryTable::new(|row: &RawRecord| row.external_id.clone());
        let empty: Vec<RawRecord> = Vec::new();
        assert_eq!(add_to_table(&table, &empty).await.unwrap(), 0);
        assert_eq!(table.statements.load(Ordering::SeqCst), 0);
    }
}
