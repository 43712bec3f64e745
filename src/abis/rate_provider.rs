use alloy::sol;

sol! {
    #[sol(rpc)]
    interface IRateProvider {
        function getRate() external view returns (uint256);
    }
}
