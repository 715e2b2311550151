use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};

/// A persisted numeric field as it may actually be found in storage.
///
/// History entries have been written by several generations of writers, so
/// `time` and `volume` show up as JSON numbers, numeric strings, nulls, or
/// worse. This type reads all of them without failing; [`Sample::from_raw`]
/// decides what is usable.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LooseValue {
    Number(Number),
    Text(String),
    #[default]
    Null,
    Other(Value),
}

impl LooseValue {
    fn from_f64(value: f64) -> Self {
        Number::from_f64(value).map(Self::Number).unwrap_or(Self::Null)
    }
}

// Numbers compare by value so that `1` and `1.0` are the same sample, the
// way the serialized JSON documents compare once parsed.
impl PartialEq for LooseValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Number(a), Self::Number(b)) => a.as_f64() == b.as_f64(),
            (Self::Text(a), Self::Text(b)) => a == b,
            (Self::Null, Self::Null) => true,
            (Self::Other(a), Self::Other(b)) => a == b,
            _ => false,
        }
    }
}

/// One history entry exactly as stored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawSample {
    #[serde(default)]
    pub time: LooseValue,
    #[serde(default)]
    pub volume: LooseValue,
}

impl RawSample {
    /// Decode one element of a stored history array.
    ///
    /// Elements that are not objects become an all-null sample, which the
    /// repair pass then drops.
    pub fn from_json(value: Value) -> Self {
        serde_json::from_value(value).unwrap_or_default()
    }
}

impl From<&Sample> for RawSample {
    fn from(sample: &Sample) -> Self {
        Self {
            time: LooseValue::Number(Number::from(sample.time)),
            volume: LooseValue::from_f64(sample.volume),
        }
    }
}

/// A validated volume sample: millisecond timestamp and cumulative raised
/// volume in native units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub time: i64,
    pub volume: f64,
}

impl Sample {
    pub fn new(time: i64, volume: f64) -> Self {
        Self { time, volume }
    }

    /// Parse a stored entry into a strict sample.
    ///
    /// Rejects:
    /// - a missing or null volume
    /// - a textual volume with more than one `.` (two values glued together)
    /// - a textual volume that does not parse to a finite number
    /// - a time that does not coerce to a finite number
    ///
    /// Numeric volumes are taken as-is. Fractional times are truncated.
    pub fn from_raw(raw: &RawSample) -> Option<Self> {
        let volume = match &raw.volume {
            LooseValue::Number(n) => n.as_f64()?,
            LooseValue::Text(s) => {
                if s.matches('.').count() > 1 {
                    return None;
                }
                parse_finite(s)?
            },
            LooseValue::Null | LooseValue::Other(_) => return None,
        };

        let time = match &raw.time {
            LooseValue::Number(n) => n.as_f64()?,
            LooseValue::Text(s) => parse_finite(s)?,
            LooseValue::Null | LooseValue::Other(_) => return None,
        };
        if !time.is_finite() {
            return None;
        }

        Some(Self {
            time: time.trunc() as i64,
            volume,
        })
    }
}

fn parse_finite(s: &str) -> Option<f64> {
    s.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Per-contract cumulative raised volume time series (PostgreSQL)
///
/// Primary Key: address
/// Query Pattern: "Get raised volume chart for sale X"
///
/// `history` is append-only on the live path and bounded only by the repair
/// pass, so it is kept in its raw stored form until repaired.
#[derive(Debug, Clone, PartialEq)]
pub struct VolumeAggregate {
    pub address: String,
    pub current_volume: f64,
    pub history: Vec<RawSample>,
    /// Bumped by every write; compare-and-swap updates are keyed on it.
    pub revision: i64,
}

impl VolumeAggregate {
    /// Empty aggregate created alongside a new sale.
    pub fn empty(address: String) -> Self {
        Self {
            address,
            current_volume: 0.0,
            history: Vec::new(),
            revision: 0,
        }
    }

    /// Aggregate whose first observation is a buy/sell.
    pub fn with_first_sample(address: String, sample: Sample) -> Self {
        Self {
            address,
            current_volume: sample.volume,
            history: vec![RawSample::from(&sample)],
            revision: 0,
        }
    }
}
