use alloy::sol;

sol! {
    event SaleLaunched(address indexed pool);
    event TokensBought(address indexed buyer, uint256 amount, uint256 totalRaised);
    event TokensSold(address indexed seller, uint256 amount, uint256 totalRaised);
    event MetaUpdated(string logoUrl, string description);
    event Claimed(address indexed claimant, uint256 amount);

    #[sol(rpc)]
    interface ISale {
        function balances(address account) external view returns (uint256);
    }
}
