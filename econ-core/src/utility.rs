// === UTILITY ===
//
// Converts holdings into utility (value) and translates between value and money.

use serde::{Deserialize, Serialize};

use crate::types::{Price, Quantity, Value};

/// Diminishing-returns curve for one good.
///
/// `value(q) = base_value / ((q / half_value_quantity)^3 + 1)`, so the first unit
/// is worth `base_value`, the unit at `half_value_quantity` is worth exactly half,
/// and every further unit is worth strictly less than the one before.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UtilityCurve {
    pub base_value: Value,
    pub half_value_quantity: f64,
}

impl UtilityCurve {
    pub fn new(base_value: Value, half_value_quantity: f64) -> Self {
        Self {
            base_value,
            half_value_quantity,
        }
    }

    /// Value of holding the `quantity`-th unit.
    pub fn personal_value(&self, quantity: Quantity) -> Value {
        let ratio = f64::from(quantity) / self.half_value_quantity;
        self.base_value / (ratio.powi(3) + 1.0)
    }

    /// What one more unit would be worth.
    pub fn potential_value(&self, owned: Quantity) -> Value {
        self.personal_value(owned.saturating_add(1))
    }

    /// What the unit currently held is worth (what selling one gives up).
    pub fn current_value(&self, owned: Quantity) -> Value {
        self.personal_value(owned)
    }

    /// Combined value of the next `units` units.
    pub fn gain_value(&self, owned: Quantity, units: Quantity) -> Value {
        (1..=units.max(1))
            .map(|k| self.personal_value(owned.saturating_add(k)))
            .sum()
    }

    /// Fixed belief step for this good.
    pub fn belief_step(&self, divisor: f64) -> Price {
        self.base_value / divisor
    }
}

/// Money has diminishing utility too: richer agents discount a price more.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MoneyUtility {
    /// `K` in `K / (money + 1)`.
    pub scale: f64,
}

impl Default for MoneyUtility {
    fn default() -> Self {
        Self { scale: 1000.0 }
    }
}

impl MoneyUtility {
    pub fn utility_per_dollar(&self, money: Price) -> f64 {
        self.scale / (money.max(0.0) + 1.0)
    }

    pub fn price_to_value(&self, money: Price, price: Price) -> Value {
        price * self.utility_per_dollar(money)
    }

    pub fn value_to_price(&self, money: Price, value: Value) -> Price {
        value / self.utility_per_dollar(money)
    }
}
