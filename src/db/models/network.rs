use serde::{Deserialize, Serialize};

/// Blockchain network known to the APR pipeline (PostgreSQL).
///
/// Primary Key: slug
/// Every `network_slug` column in the other tables references this table, so
/// slugs are inserted before any row that mentions them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Network {
    pub slug: String,
    pub chain_id: i64,
    pub name: String,
}

impl Network {
    pub fn new(name: &str, slug: &str, chain_id: i64) -> Self {
        Self {
            slug: slug.to_string(),
            chain_id,
            name: name.to_string(),
        }
    }
}
