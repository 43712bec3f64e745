#[allow(clippy::module_inception)]
mod config;

pub use config::{
    ApiSettings, EthereumSettings, EtlSettings, NetworkOverride, PostgresSettings, PriceSettings,
    Settings,
};
