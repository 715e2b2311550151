use crate::abis::ISale;
use crate::reconciler::BalanceOracle;
use crate::utils::canonical_address;
use alloy::primitives::{Address, U256};
use alloy::providers::{DynProvider, ProviderBuilder};
use anyhow::{Context, Result};
use async_trait::async_trait;
use moka::future::Cache;
use std::str::FromStr;
use std::time::Duration;
use url::Url;

/// Timeout for individual RPC calls (30 seconds)
const RPC_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Upper bound on cached (sale, wallet) balances
const BALANCE_CACHE_CAPACITY: u64 = 50_000;

/// Reads a wallet's balance from the sale contract's public `balances`
/// mapping over JSON-RPC.
///
/// A burst of comments on one sale asks for the same balances repeatedly.
/// With a non-zero ttl those answers are reused for that long; otherwise
/// every call goes to the chain.
#[derive(Clone)]
pub struct SaleBalanceOracle {
    provider: DynProvider,
    /// `None` when caching is disabled (ttl of 0)
    cache: Option<Cache<(String, String), U256>>,
}

impl SaleBalanceOracle {
    pub fn new(rpc_url: &str, cache_ttl_secs: u64) -> Result<Self> {
        let url = Url::parse(rpc_url).context("Invalid RPC URL")?;

        let client = ProviderBuilder::new().connect_http(url);
        let provider = DynProvider::new(client);

        let cache = (cache_ttl_secs > 0).then(|| {
            Cache::builder()
                .max_capacity(BALANCE_CACHE_CAPACITY)
                .time_to_live(Duration::from_secs(cache_ttl_secs))
                .build()
        });

        Ok(Self { provider, cache })
    }

    async fn fetch_balance(&self, contract: Address, wallet: Address) -> Result<U256> {
        let sale = ISale::new(contract, &self.provider);
        tokio::time::timeout(RPC_CALL_TIMEOUT, sale.balances(wallet).call())
            .await
            .context("balances() call timed out")?
            .context("balances() call failed")
    }
}

fn parse_address(raw: &str) -> Result<(String, Address)> {
    let key = canonical_address(raw).with_context(|| format!("Invalid address {:?}", raw))?;
    let address = Address::from_str(&key)?;
    Ok((key, address))
}

#[async_trait]
impl BalanceOracle for SaleBalanceOracle {
    async fn get_balance(&self, contract: &str, wallet: &str) -> Result<U256> {
        let (contract_key, contract) = parse_address(contract)?;
        let (wallet_key, wallet) = parse_address(wallet)?;
        let key = (contract_key, wallet_key);

        if let Some(cache) = &self.cache {
            if let Some(balance) = cache.get(&key).await {
                return Ok(balance);
            }
        }

        let balance = self.fetch_balance(contract, wallet).await?;

        if let Some(cache) = &self.cache {
            cache.insert(key, balance).await;
        }
        Ok(balance)
    }
}
