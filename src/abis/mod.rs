pub mod gauge_controller;
pub mod multicall;
pub mod rate_provider;

pub use gauge_controller::IGaugeController;
pub use multicall::{Call3, IMulticall3, McResult};
pub use rate_provider::IRateProvider;
