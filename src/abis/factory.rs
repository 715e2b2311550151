use alloy::sol;

sol! {
    event SaleCreated(
        address indexed saleContract,
        address indexed creator,
        string name,
        string description,
        string logoUrl
    );
}
