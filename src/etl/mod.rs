//! Extract, load and transform of Balancer subgraph data into daily APRs.
//!
//! - [`registry`] - Networks and their subgraph endpoints
//! - [`graphql`], [`paginate`] - Subgraph transport and cursor pagination
//! - [`extract`] - Fetch-and-stage per entity type
//! - [`loader`] - Chunked insert-ignore
//! - [`transform`], [`calendar`] - Staging to typed tables, daily calendar
//! - [`emissions`], [`apr`] - BAL emission schedule and APR formulas
//! - [`pipeline`] - The ordered ETL run

pub mod apr;
pub mod calendar;
pub mod emissions;
pub mod extract;
pub mod graphql;
pub mod loader;
pub mod paginate;
pub mod pipeline;
pub mod registry;
pub mod transform;

pub use pipeline::Etl;
