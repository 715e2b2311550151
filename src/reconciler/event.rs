use std::fmt;

use alloy::primitives::U256;

/// Events the reconciler understands, decoded from factory and sale logs.
///
/// `address` is always the sale contract's canonical address: the aggregate
/// key every handler reads and writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaleEvent {
    SaleCreated {
        address: String,
        timestamp_ms: i64,
        name: String,
        description: String,
        logo_url: String,
    },
    SaleLaunched {
        address: String,
    },
    /// `cumulative_raised` is the running total after the trade, in wei.
    TokensBought {
        address: String,
        cumulative_raised: U256,
        timestamp_ms: i64,
    },
    TokensSold {
        address: String,
        cumulative_raised: U256,
        timestamp_ms: i64,
    },
    MetaUpdated {
        address: String,
        logo_url: String,
        description: String,
    },
    Claimed {
        address: String,
        claimant: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    SaleCreated,
    SaleLaunched,
    TokensBought,
    TokensSold,
    MetaUpdated,
    Claimed,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::SaleCreated => "SaleCreated",
            EventKind::SaleLaunched => "SaleLaunched",
            EventKind::TokensBought => "TokensBought",
            EventKind::TokensSold => "TokensSold",
            EventKind::MetaUpdated => "MetaUpdated",
            EventKind::Claimed => "Claimed",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl SaleEvent {
    pub fn address(&self) -> &str {
        match self {
            SaleEvent::SaleCreated { address, .. }
            | SaleEvent::SaleLaunched { address }
            | SaleEvent::TokensBought { address, .. }
            | SaleEvent::TokensSold { address, .. }
            | SaleEvent::MetaUpdated { address, .. }
            | SaleEvent::Claimed { address, .. } => address,
        }
    }

    pub fn kind(&self) -> EventKind {
        match self {
            SaleEvent::SaleCreated { .. } => EventKind::SaleCreated,
            SaleEvent::SaleLaunched { .. } => EventKind::SaleLaunched,
            SaleEvent::TokensBought { .. } => EventKind::TokensBought,
            SaleEvent::TokensSold { .. } => EventKind::TokensSold,
            SaleEvent::MetaUpdated { .. } => EventKind::MetaUpdated,
            SaleEvent::Claimed { .. } => EventKind::Claimed,
        }
    }
}
