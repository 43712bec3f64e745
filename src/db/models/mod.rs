mod apr;
mod gauge;
mod network;
mod pool;
mod pool_snapshot;
mod rate;
mod raw;
mod stats;
mod token_price;
mod vebal_round;

pub use apr::{SwapFeeApr, TokenYieldApr, VebalApr};
pub use gauge::{Gauge, GaugeSnapshot};
pub use network::Network;
pub use pool::{Pool, PoolToken};
pub use pool_snapshot::{PoolSnapshot, SnapshotPool, SubgraphPoolSnapshot};
pub use rate::{RateProvider, TokenRate};
pub use raw::{RawGauge, RawRecord, StagingTable};
pub use stats::{PoolDayStats, PoolTokenInfo, TokenYieldStat};
pub use token_price::{BalEmission, TokenPrice};
pub use vebal_round::VebalRound;
