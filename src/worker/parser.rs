//! Log parsing module for HyperSync logs.
//!
//! Decodes factory and sale contract logs into [`SaleEvent`]s, preserving
//! the stream's block/log order.

use alloy::{
    primitives::{LogData, B256},
    sol_types::SolEvent,
};
use rustc_hash::FxHashMap;

use crate::{
    abis::{Claimed, MetaUpdated, SaleCreated, SaleLaunched, TokensBought, TokensSold},
    reconciler::SaleEvent,
    utils::{address_key, hex_encode, ZERO_ADDRESS},
};

/// topic0 of every log the indexer subscribes to.
pub fn event_signatures() -> [B256; 6] {
    [
        SaleCreated::SIGNATURE_HASH,
        SaleLaunched::SIGNATURE_HASH,
        TokensBought::SIGNATURE_HASH,
        TokensSold::SIGNATURE_HASH,
        MetaUpdated::SIGNATURE_HASH,
        Claimed::SIGNATURE_HASH,
    ]
}

/// Result of parsing logs from a HyperSync response.
pub struct ParseResult {
    /// Decoded events in sequential order
    pub events: Vec<SaleEvent>,
    /// Logs that matched a signature but were rejected or failed to decode
    pub skipped: usize,
}

/// Decode one log emitted by `log_address`.
///
/// `factories` are canonical addresses; when non-empty, `SaleCreated` is only
/// accepted from one of them. Returns `None` for unknown signatures, bodies
/// that fail to decode, and spoofed or zero sale addresses.
pub fn decode_log(
    log_address: &str,
    log_data: &LogData,
    block_timestamp: u64,
    factories: &[String],
) -> Option<SaleEvent> {
    let topic0 = log_data.topics().first()?;
    let timestamp_ms = (block_timestamp as i64).saturating_mul(1000);

    match topic0 {
        t if *t == SaleCreated::SIGNATURE_HASH => {
            // FACTORY FILTER: only sales deployed by our factories
            if !factories.is_empty() && !factories.iter().any(|f| f == log_address) {
                return None;
            }
            let event = SaleCreated::decode_log_data(log_data).ok()?;
            let address = address_key(&event.saleContract);
            // ANTI-SPOOFING: a sale at the zero address cannot exist
            if address == ZERO_ADDRESS {
                return None;
            }
            Some(SaleEvent::SaleCreated {
                address,
                timestamp_ms,
                name: event.name,
                description: event.description,
                logo_url: event.logoUrl,
            })
        },
        t if *t == SaleLaunched::SIGNATURE_HASH => {
            SaleLaunched::decode_log_data(log_data).ok()?;
            Some(SaleEvent::SaleLaunched {
                address: log_address.to_string(),
            })
        },
        t if *t == TokensBought::SIGNATURE_HASH => {
            let event = TokensBought::decode_log_data(log_data).ok()?;
            Some(SaleEvent::TokensBought {
                address: log_address.to_string(),
                cumulative_raised: event.totalRaised,
                timestamp_ms,
            })
        },
        t if *t == TokensSold::SIGNATURE_HASH => {
            let event = TokensSold::decode_log_data(log_data).ok()?;
            Some(SaleEvent::TokensSold {
                address: log_address.to_string(),
                cumulative_raised: event.totalRaised,
                timestamp_ms,
            })
        },
        t if *t == MetaUpdated::SIGNATURE_HASH => {
            let event = MetaUpdated::decode_log_data(log_data).ok()?;
            Some(SaleEvent::MetaUpdated {
                address: log_address.to_string(),
                logo_url: event.logoUrl,
                description: event.description,
            })
        },
        t if *t == Claimed::SIGNATURE_HASH => {
            let event = Claimed::decode_log_data(log_data).ok()?;
            Some(SaleEvent::Claimed {
                address: log_address.to_string(),
                claimant: address_key(&event.claimant),
            })
        },
        _ => None,
    }
}

/// Parse HyperSync logs into sale events.
///
/// Block timestamps come from the same response; a log whose block is
/// missing from it is stamped 0.
pub fn parse_logs(
    logs: impl Iterator<Item = hypersync_client::simple_types::Log>,
    block_timestamps: &FxHashMap<u64, u64>,
    factories: &[String],
    log_count_estimate: usize,
) -> ParseResult {
    let mut events: Vec<SaleEvent> = Vec::with_capacity(log_count_estimate);
    let mut skipped = 0usize;

    for log in logs {
        // Ignore logs without topics
        if log.topics.is_empty() {
            continue;
        }

        let data = log
            .data
            .as_ref()
            .map(|d| d.as_ref().to_vec())
            .unwrap_or_default()
            .into();

        let topics: Vec<B256> = log
            .topics
            .iter()
            .flatten()
            .map(|t| B256::from_slice(t.as_ref()))
            .collect();

        let log_data = LogData::new_unchecked(topics, data);

        let block_number: u64 = log.block_number.map(|x| x.into()).unwrap_or(0);
        let block_timestamp = block_timestamps.get(&block_number).copied().unwrap_or(0);

        let Some(log_address) = log.address.as_ref().map(|a| hex_encode(a.as_ref())) else {
            skipped += 1;
            continue;
        };

        match decode_log(&log_address, &log_data, block_timestamp, factories) {
            Some(event) => events.push(event),
            None => skipped += 1,
        }
    }

    ParseResult { events, skipped }
}
