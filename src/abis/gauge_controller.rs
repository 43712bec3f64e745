use alloy::sol;

sol! {
    #[sol(rpc)]
    interface IGaugeController {
        function gauge_relative_weight(address addr, uint256 time) external view returns (uint256);
    }
}
