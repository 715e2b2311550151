//! In-memory doubles for the store and balance oracle seams.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use alloy::primitives::U256;
use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

use crate::db::models::{
    BestComment, CommentRecord, ContractMetadata, RawSample, Sample, VolumeAggregate,
};
use crate::db::store::{CommentStore, MetadataStore, VolumeStore};
use crate::reconciler::BalanceOracle;

pub const SALE_A: &str = "0x1111111111111111111111111111111111111111";
pub const SALE_B: &str = "0x2222222222222222222222222222222222222222";
pub const WALLET_1: &str = "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
pub const WALLET_2: &str = "0xbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";
pub const WALLET_3: &str = "0xcccccccccccccccccccccccccccccccccccccccc";

/// One ether in wei.
pub fn ether(n: u64) -> U256 {
    U256::from(n) * U256::from(1_000_000_000_000_000_000u128)
}

pub fn at(hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, hour, minute, 0).unwrap()
}

pub fn comment(
    id: i64,
    contract: &str,
    wallet: &str,
    content: &str,
    created_at: DateTime<Utc>,
) -> CommentRecord {
    CommentRecord {
        id,
        contract_address: contract.to_string(),
        wallet_address: wallet.to_string(),
        content: content.to_string(),
        created_at,
    }
}

/// Store double backed by hash maps, counting writes.
#[derive(Default)]
pub struct MemoryStore {
    pub metadata: Mutex<HashMap<String, ContractMetadata>>,
    pub volume: Mutex<HashMap<String, VolumeAggregate>>,
    pub comments: Mutex<Vec<CommentRecord>>,
    pub metadata_writes: AtomicUsize,
    pub volume_writes: AtomicUsize,
    /// When set, every call fails as an unreachable database would.
    pub fail: std::sync::atomic::AtomicBool,
    /// Number of upcoming `insert_volume_if_absent` calls that fail.
    pub failing_volume_inserts: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn fail_next_volume_inserts(&self, count: usize) {
        self.failing_volume_inserts.store(count, Ordering::SeqCst);
    }

    fn check(&self) -> anyhow::Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            Err(anyhow!("connection refused"))
        } else {
            Ok(())
        }
    }

    pub fn put_volume(&self, aggregate: VolumeAggregate) {
        self.volume
            .lock()
            .unwrap()
            .insert(aggregate.address.clone(), aggregate);
    }

    pub fn put_metadata(&self, metadata: ContractMetadata) {
        self.metadata
            .lock()
            .unwrap()
            .insert(metadata.address.clone(), metadata);
    }

    pub fn add_comment(&self, comment: CommentRecord) {
        self.comments.lock().unwrap().push(comment);
    }

    pub fn volume_of(&self, address: &str) -> Option<VolumeAggregate> {
        self.volume.lock().unwrap().get(address).cloned()
    }

    pub fn metadata_of(&self, address: &str) -> Option<ContractMetadata> {
        self.metadata.lock().unwrap().get(address).cloned()
    }

    pub fn volume_writes(&self) -> usize {
        self.volume_writes.load(Ordering::SeqCst)
    }

    pub fn metadata_writes(&self) -> usize {
        self.metadata_writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MetadataStore for MemoryStore {
    async fn get_metadata(&self, address: &str) -> anyhow::Result<Option<ContractMetadata>> {
        self.check()?;
        Ok(self.metadata_of(address))
    }

    async fn insert_metadata_if_absent(&self, metadata: &ContractMetadata) -> anyhow::Result<bool> {
        self.check()?;
        let mut map = self.metadata.lock().unwrap();
        if map.contains_key(&metadata.address) {
            return Ok(false);
        }
        map.insert(metadata.address.clone(), metadata.clone());
        self.metadata_writes.fetch_add(1, Ordering::SeqCst);
        Ok(true)
    }

    async fn set_launched(&self, address: &str) -> anyhow::Result<bool> {
        self.check()?;
        let mut map = self.metadata.lock().unwrap();
        let Some(record) = map.get_mut(address) else {
            return Ok(false);
        };
        record.is_launched = true;
        self.metadata_writes.fetch_add(1, Ordering::SeqCst);
        Ok(true)
    }

    async fn update_meta(
        &self,
        address: &str,
        image_url: &str,
        description: &str,
    ) -> anyhow::Result<bool> {
        self.check()?;
        let mut map = self.metadata.lock().unwrap();
        let Some(record) = map.get_mut(address) else {
            return Ok(false);
        };
        record.image_url = image_url.to_string();
        record.description = description.to_string();
        self.metadata_writes.fetch_add(1, Ordering::SeqCst);
        Ok(true)
    }

    async fn set_best_comment(&self, address: &str, best: &BestComment) -> anyhow::Result<bool> {
        self.check()?;
        let mut map = self.metadata.lock().unwrap();
        let Some(record) = map.get_mut(address) else {
            return Ok(false);
        };
        record.best_comment = Some(best.clone());
        self.metadata_writes.fetch_add(1, Ordering::SeqCst);
        Ok(true)
    }
}

#[async_trait]
impl VolumeStore for MemoryStore {
    async fn get_volume(&self, address: &str) -> anyhow::Result<Option<VolumeAggregate>> {
        self.check()?;
        Ok(self.volume_of(address))
    }

    async fn list_volume_addresses(&self) -> anyhow::Result<Vec<String>> {
        self.check()?;
        let mut addresses: Vec<String> = self.volume.lock().unwrap().keys().cloned().collect();
        addresses.sort();
        Ok(addresses)
    }

    async fn insert_volume_if_absent(&self, aggregate: &VolumeAggregate) -> anyhow::Result<bool> {
        self.check()?;
        let pending = self
            .failing_volume_inserts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if pending.is_ok() {
            return Err(anyhow!("statement timeout"));
        }
        let mut map = self.volume.lock().unwrap();
        if map.contains_key(&aggregate.address) {
            return Ok(false);
        }
        map.insert(aggregate.address.clone(), aggregate.clone());
        self.volume_writes.fetch_add(1, Ordering::SeqCst);
        Ok(true)
    }

    async fn update_volume(
        &self,
        address: &str,
        history: &[RawSample],
        current_volume: f64,
    ) -> anyhow::Result<()> {
        self.check()?;
        let mut map = self.volume.lock().unwrap();
        if let Some(record) = map.get_mut(address) {
            record.history = history.to_vec();
            record.current_volume = current_volume;
            record.revision += 1;
            self.volume_writes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn compare_and_set_volume(
        &self,
        address: &str,
        expected_revision: i64,
        history: &[Sample],
        current_volume: f64,
    ) -> anyhow::Result<bool> {
        self.check()?;
        let mut map = self.volume.lock().unwrap();
        let Some(record) = map.get_mut(address) else {
            return Ok(false);
        };
        if record.revision != expected_revision {
            return Ok(false);
        }
        record.history = history.iter().map(RawSample::from).collect();
        record.current_volume = current_volume;
        record.revision += 1;
        self.volume_writes.fetch_add(1, Ordering::SeqCst);
        Ok(true)
    }
}

#[async_trait]
impl CommentStore for MemoryStore {
    async fn list_comments(&self, contract_address: &str) -> anyhow::Result<Vec<CommentRecord>> {
        self.check()?;
        let mut comments: Vec<CommentRecord> = self
            .comments
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.contract_address.eq_ignore_ascii_case(contract_address))
            .cloned()
            .collect();
        comments.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(comments)
    }

    async fn comments_after(
        &self,
        after_id: i64,
        limit: i64,
    ) -> anyhow::Result<Vec<CommentRecord>> {
        self.check()?;
        let mut comments: Vec<CommentRecord> = self
            .comments
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.id > after_id)
            .cloned()
            .collect();
        comments.sort_by_key(|c| c.id);
        comments.truncate(limit.max(0) as usize);
        Ok(comments)
    }
}

/// Balance oracle double with fixed answers per wallet.
///
/// Wallets without an entry have a zero balance; wallets listed in
/// `failing` return an RPC error.
#[derive(Default)]
pub struct StaticBalanceOracle {
    pub balances: HashMap<String, U256>,
    pub failing: Vec<String>,
    pub calls: AtomicUsize,
}

impl StaticBalanceOracle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_balance(mut self, wallet: &str, balance: U256) -> Self {
        self.balances.insert(wallet.to_lowercase(), balance);
        self
    }

    pub fn with_failure(mut self, wallet: &str) -> Self {
        self.failing.push(wallet.to_lowercase());
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BalanceOracle for StaticBalanceOracle {
    async fn get_balance(&self, _contract: &str, wallet: &str) -> anyhow::Result<U256> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let wallet = wallet.to_lowercase();
        if self.failing.contains(&wallet) {
            return Err(anyhow!("execution reverted"));
        }
        Ok(self.balances.get(&wallet).copied().unwrap_or(U256::ZERO))
    }
}
