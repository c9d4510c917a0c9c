//! Line-oriented wire format: one JSON object per line.
//!
//! Every connection opens with a [`Hello`] from each side, then carries one
//! [`MerchantRecord`] per migrating merchant.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::agents::Merchant;
use crate::error::WireError;
use crate::types::{CityName, Good, Price, Quantity};

pub const PROTOCOL_VERSION: u32 = 1;

/// Which ways merchants may travel over a connection. The dialer decides;
/// the listener's own value is ignored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Both cities get an inbound and an outbound link.
    #[default]
    Both,
    /// Only dialer to listener.
    OneWay,
}

/// First line on every connection, sent by both sides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hello {
    pub city: CityName,
    pub version: u32,
    #[serde(default)]
    pub direction: Direction,
}

impl Hello {
    pub fn new(city: CityName) -> Self {
        Self {
            city,
            version: PROTOCOL_VERSION,
            direction: Direction::Both,
        }
    }

    pub fn with_direction(mut self, direction: Direction) -> Self {
        self.direction = direction;
        self
    }
}

/// A merchant as it travels. Location is left out: the receiving city
/// always stamps its own name on arrival.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MerchantRecord {
    pub money: Price,
    pub buys_sells: Good,
    pub carrying_capacity: Quantity,
    pub owned: Quantity,
    pub expected_prices: BTreeMap<Good, BTreeMap<CityName, Price>>,
}

impl From<&Merchant> for MerchantRecord {
    fn from(merchant: &Merchant) -> Self {
        Self {
            money: merchant.money,
            buys_sells: merchant.good,
            carrying_capacity: merchant.carrying_capacity,
            owned: merchant.owned,
            expected_prices: merchant.expected.clone(),
        }
    }
}

impl MerchantRecord {
    pub fn into_merchant(self, location: CityName) -> Result<Merchant, WireError> {
        if !self.buys_sells.is_tradable() {
            return Err(WireError::Invalid("merchant deals in a non-tradable good"));
        }
        if self.owned > self.carrying_capacity {
            return Err(WireError::Invalid("merchant carries more than its capacity"));
        }
        Ok(Merchant {
            money: self.money,
            location,
            good: self.buys_sells,
            carrying_capacity: self.carrying_capacity,
            owned: self.owned,
            expected: self.expected_prices,
        })
    }
}

pub fn encode_hello(hello: &Hello) -> Result<String, WireError> {
    Ok(serde_json::to_string(hello)?)
}

pub fn decode_hello(line: &str) -> Result<Hello, WireError> {
    Ok(serde_json::from_str(line)?)
}

/// Serialize a merchant to a single line (no trailing newline).
pub fn encode_merchant(merchant: &Merchant) -> Result<String, WireError> {
    Ok(serde_json::to_string(&MerchantRecord::from(merchant))?)
}

/// Parse one line into a merchant now standing in `location`.
pub fn decode_merchant(line: &str, location: &CityName) -> Result<Merchant, WireError> {
    let record: MerchantRecord = serde_json::from_str(line)?;
    record.into_merchant(location.clone())
}
