use serde::{Deserialize, Serialize};
use slotmap::new_key_type;
use std::fmt;

// ============================================================================
// Scalars
// ============================================================================

/// Money-denominated amount.
pub type Price = f64;
/// Utility-denominated amount. Comparable across production and trade options.
pub type Value = f64;
/// Whole units of a good. Unsigned so holdings can never go negative.
pub type Quantity = u32;

// ============================================================================
// IDs - Using slotmap for stable handles into the city's agent arena
// ============================================================================

new_key_type! {
    pub struct LocalId;
    pub struct MerchantId;
}

/// Tagged handle for any agent living in a city.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AgentRef {
    Local(LocalId),
    Merchant(MerchantId),
}

// ============================================================================
// Goods - The fixed commodity set of a deployment
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Good {
    Wood,
    Chair,
    Thread,
    Bed,
    /// Not tradable. Holdings count consecutive idle activations.
    Leisure,
}

impl Good {
    pub const COUNT: usize = 5;

    pub const ALL: [Good; Good::COUNT] = [
        Good::Wood,
        Good::Chair,
        Good::Thread,
        Good::Bed,
        Good::Leisure,
    ];

    /// Dense index, used to address per-good arrays.
    pub const fn index(self) -> usize {
        match self {
            Good::Wood => 0,
            Good::Chair => 1,
            Good::Thread => 2,
            Good::Bed => 3,
            Good::Leisure => 4,
        }
    }

    pub fn from_index(index: usize) -> Option<Good> {
        Self::ALL.get(index).copied()
    }

    /// Returns an iterator over all goods, leisure included
    pub fn all() -> impl Iterator<Item = Good> {
        Self::ALL.into_iter()
    }

    /// Goods that can change hands between agents
    pub fn tradable() -> impl Iterator<Item = Good> {
        Self::ALL.into_iter().filter(|g| g.is_tradable())
    }

    pub const fn is_tradable(self) -> bool {
        !matches!(self, Good::Leisure)
    }

    pub const fn name(self) -> &'static str {
        match self {
            Good::Wood => "wood",
            Good::Chair => "chair",
            Good::Thread => "thread",
            Good::Bed => "bed",
            Good::Leisure => "leisure",
        }
    }
}

impl fmt::Display for Good {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// City names - Identity of a city across links and processes
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CityName(String);

impl CityName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CityName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CityName {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for CityName {
    fn from(name: String) -> Self {
        Self(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn good_index_round_trips() {
        for good in Good::all() {
            assert_eq!(Good::from_index(good.index()), Some(good));
        }
        assert_eq!(Good::from_index(Good::COUNT), None);
    }

    #[test]
    fn leisure_is_not_tradable() {
        assert!(Good::tradable().all(|g| g != Good::Leisure));
        assert_eq!(Good::tradable().count(), Good::COUNT - 1);
    }

    #[test]
    fn goods_serialize_lowercase() {
        let json = serde_json::to_string(&Good::Thread).unwrap();
        assert_eq!(json, "\"thread\"");
    }
}
