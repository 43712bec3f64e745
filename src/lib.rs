pub mod abis;
pub mod api;
pub mod config;
pub mod cron;
pub mod db;
pub mod etl;
pub mod onchain;
pub mod prices;
pub mod utils;

pub use api::AprService;
pub use config::Settings;
pub use cron::CronScheduler;
pub use db::Database;
pub use etl::Etl;
