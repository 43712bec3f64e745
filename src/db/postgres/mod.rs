mod client;
mod ops;
mod stats;
mod transform;

pub use client::PostgresClient;
pub use ops::StagingWriter;
