// Per-good market state held by every agent: holdings, belief price, and how long
// it has been since the agent last traded.

pub mod exchange;

pub use exchange::*;

use serde::{Deserialize, Serialize};

use crate::config::MarketConfig;
use crate::types::{Good, Price, Quantity, Value};
use crate::utility::{MoneyUtility, UtilityCurve};

// ============================================================================
// Roles
// ============================================================================

/// Implicit state of a market, derived from belief versus personal value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MarketRole {
    Seller,
    Buyer,
    Neutral,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

// ============================================================================
// Market
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct Market {
    pub good: Good,
    pub curve: UtilityCurve,
    pub owned: Quantity,
    belief: Price,
    pub last_trade_age: u32,
    pub max_idle_age: u32,
    pub gossip_probability: f64,
    pub volatility: Price,
}

impl Market {
    pub fn new(good: Good, curve: UtilityCurve, params: &MarketConfig) -> Self {
        Self {
            good,
            curve,
            owned: 0,
            belief: 0.0,
            last_trade_age: 0,
            max_idle_age: params.max_idle_age,
            gossip_probability: params.gossip_probability,
            volatility: curve.belief_step(params.volatility_divisor),
        }
    }

    pub fn with_owned(mut self, owned: Quantity) -> Self {
        self.owned = owned;
        self
    }

    /// Starting belief. After construction the belief only moves through
    /// trades, gossip and idle drift.
    pub fn with_belief(mut self, belief: Price) -> Self {
        self.belief = belief.max(0.0);
        self
    }

    pub fn with_volatility(mut self, volatility: Price) -> Self {
        self.volatility = volatility;
        self
    }

    pub fn belief(&self) -> Price {
        self.belief
    }

    pub fn current_value(&self) -> Value {
        self.curve.current_value(self.owned)
    }

    pub fn potential_value(&self) -> Value {
        self.curve.potential_value(self.owned)
    }

    fn belief_value(&self, money: Price, utility: &MoneyUtility) -> Value {
        utility.price_to_value(money, self.belief)
    }

    /// Belief is worth more than the unit held: happy to part with it.
    pub fn leans_seller(&self, money: Price, utility: &MoneyUtility) -> bool {
        self.belief_value(money, utility) > self.current_value()
    }

    /// Belief is worth less than another unit would be: happy to pay it.
    pub fn leans_buyer(&self, money: Price, utility: &MoneyUtility) -> bool {
        self.belief_value(money, utility) < self.potential_value()
    }

    pub fn role(&self, money: Price, utility: &MoneyUtility) -> MarketRole {
        if self.owned > 0 && self.leans_seller(money, utility) {
            MarketRole::Seller
        } else if money >= self.belief && self.leans_buyer(money, utility) {
            MarketRole::Buyer
        } else {
            MarketRole::Neutral
        }
    }

    /// Gossip: step toward `other` by one volatility without passing it.
    /// Returns whether the belief moved.
    pub fn hear(&mut self, other: Price) -> bool {
        if other > self.belief {
            self.belief = (self.belief + self.volatility).min(other);
            true
        } else if other < self.belief {
            self.belief = (self.belief - self.volatility).max(other).max(0.0);
            true
        } else {
            false
        }
    }

    /// Could have traded this activation but did not (yet).
    pub fn note_missed_trade(&mut self) {
        self.last_trade_age = self.last_trade_age.saturating_add(1);
    }

    /// Bought one unit: next time, offer less.
    ///
    /// The belief drops by one volatility, except that it never goes below
    /// zero: a belief already under the step lands on exactly 0.
    pub fn record_purchase(&mut self) {
        self.owned = self.owned.saturating_add(1);
        self.last_trade_age = 0;
        self.belief = (self.belief - self.volatility).max(0.0);
    }

    /// Sold one unit: next time, ask more. Returns false if nothing was held.
    pub fn record_sale(&mut self) -> bool {
        if !self.take(1) {
            return false;
        }
        self.last_trade_age = 0;
        self.belief += self.volatility;
        true
    }

    /// After too long without a trade, move the belief toward a deal.
    /// Returns the side that drifted. A downward drift is floored at 0 like
    /// [`Market::record_purchase`].
    pub fn drift(&mut self, money: Price, utility: &MoneyUtility) -> Option<Side> {
        if self.last_trade_age <= self.max_idle_age {
            return None;
        }
        self.last_trade_age = 0;
        if self.leans_buyer(money, utility) {
            self.belief += self.volatility;
            Some(Side::Buy)
        } else if self.leans_seller(money, utility) {
            self.belief = (self.belief - self.volatility).max(0.0);
            Some(Side::Sell)
        } else {
            None
        }
    }

    pub fn add(&mut self, quantity: Quantity) {
        self.owned = self.owned.saturating_add(quantity);
    }

    /// Remove `quantity` units if held. Holdings never go negative.
    pub fn take(&mut self, quantity: Quantity) -> bool {
        match self.owned.checked_sub(quantity) {
            Some(rest) => {
                self.owned = rest;
                true
            }
            None => false,
        }
    }
}
