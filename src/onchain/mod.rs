//! Read-only contract calls: gauge controller weights and provider rates.

mod rate;
mod relative_weight;

pub use rate::RateReader;
pub use relative_weight::{RelativeWeight, RelativeWeightError, RelativeWeightFetcher};
