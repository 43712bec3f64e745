//! HTTP API over the computed APR tables.
//!
//! - `query`: validation of the `/apr/api` parameters
//! - `repository`: per-day pool stats read from storage
//! - `service`: cached computation with retries per round-aligned unit
//! - `aggregate`, `filter`, `sort`: response shaping
//! - `server`: axum routes

pub mod aggregate;
pub mod filter;
pub mod query;
pub mod repository;
pub mod server;
pub mod service;
pub mod sort;
pub mod types;

pub use query::{AprParams, AprQuery, DateWindow, QueryError};
pub use repository::PoolStatsRepository;
pub use service::AprService;
