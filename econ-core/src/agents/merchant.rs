use std::collections::BTreeMap;

use rand::Rng;
use rand::seq::IndexedRandom;

use crate::agents::Trader;
use crate::config::MerchantConfig;
use crate::market::Side;
use crate::types::{CityName, Good, Price, Quantity};

// === ROUTES ===

/// Where a merchant standing in a city can get to, and what the trip costs.
///
/// Built by the city from its outbound links at the start of each tick.
#[derive(Debug, Clone)]
pub struct Routes {
    here: CityName,
    destinations: Vec<CityName>,
    default_cost: Price,
    costs: BTreeMap<CityName, Price>,
}

impl Routes {
    pub fn new(here: CityName, default_cost: Price) -> Self {
        Self {
            here,
            destinations: Vec::new(),
            default_cost,
            costs: BTreeMap::new(),
        }
    }

    pub fn with_destination(mut self, city: CityName) -> Self {
        if city != self.here && !self.destinations.contains(&city) {
            self.destinations.push(city);
            self.destinations.sort();
        }
        self
    }

    pub fn with_cost(mut self, city: CityName, cost: Price) -> Self {
        self.costs.insert(city, cost);
        self
    }

    pub fn here(&self) -> &CityName {
        &self.here
    }

    pub fn destinations(&self) -> &[CityName] {
        &self.destinations
    }

    pub fn reaches(&self, city: &CityName) -> bool {
        *city == self.here || self.destinations.contains(city)
    }

    /// Friction of a deal that ends by selling in `to`.
    pub fn moving_cost(&self, to: &CityName) -> Price {
        self.costs.get(to).copied().unwrap_or(self.default_cost)
    }

    /// Next hop toward `target`: the direct link when there is one, any
    /// outbound link otherwise.
    pub fn toward<R: Rng>(&self, target: &CityName, rng: &mut R) -> Option<CityName> {
        if self.destinations.contains(target) {
            return Some(target.clone());
        }
        self.random_destination(rng)
    }

    pub fn random_destination<R: Rng>(&self, rng: &mut R) -> Option<CityName> {
        self.destinations.choose(rng).cloned()
    }
}

// === DEAL ===

/// Best known arbitrage for one good.
#[derive(Debug, Clone, PartialEq)]
pub struct Deal {
    pub buy: CityName,
    pub sell: CityName,
    pub profit: Price,
}

// === MERCHANT ===

/// Mobile single-good arbitrageur.
#[derive(Debug, Clone, PartialEq)]
pub struct Merchant {
    pub money: Price,
    pub location: CityName,
    pub good: Good,
    pub carrying_capacity: Quantity,
    pub owned: Quantity,
    /// Smoothed belief per good per city the merchant has heard of.
    pub expected: BTreeMap<Good, BTreeMap<CityName, Price>>,
}

impl Merchant {
    /// A merchant only knows its home city to begin with.
    pub fn new(home: CityName, config: &MerchantConfig) -> Self {
        let expected = Good::tradable()
            .map(|good| (good, BTreeMap::from([(home.clone(), 0.0)])))
            .collect();
        Self {
            money: config.starting_money,
            location: home,
            good: config.initial_good,
            carrying_capacity: config.carrying_capacity,
            owned: 0,
            expected,
        }
    }

    pub fn with_good(mut self, good: Good) -> Self {
        self.good = good;
        self
    }

    pub fn with_money(mut self, money: Price) -> Self {
        self.money = money;
        self
    }

    pub fn with_owned(mut self, owned: Quantity) -> Self {
        self.owned = owned.min(self.carrying_capacity);
        self
    }

    pub fn with_belief(mut self, good: Good, city: CityName, price: Price) -> Self {
        self.expected.entry(good).or_default().insert(city, price);
        self
    }

    pub fn belief_at(&self, good: Good, city: &CityName) -> Option<Price> {
        self.expected.get(&good)?.get(city).copied()
    }

    pub fn knows(&self, good: Good, city: &CityName) -> bool {
        self.belief_at(good, city).is_some()
    }

    pub fn is_full(&self) -> bool {
        self.owned >= self.carrying_capacity
    }

    /// Smooth an observed price into the belief for `city`. A city heard of for
    /// the first time takes the observation as is.
    pub fn observe(&mut self, good: Good, city: &CityName, price: Price, retention: f64) {
        let beliefs = self.expected.entry(good).or_default();
        match beliefs.get_mut(city) {
            Some(belief) => *belief = retention * *belief + (1.0 - retention) * price,
            None => {
                beliefs.insert(city.clone(), price);
            }
        }
    }

    /// Adopt another merchant's belief about a city we know nothing about.
    pub fn learn(&mut self, good: Good, city: &CityName, price: Price) {
        self.expected
            .entry(good)
            .or_default()
            .entry(city.clone())
            .or_insert(price);
    }

    /// Most profitable reachable (buy, sell) pair for `good`. With nothing
    /// profitable the merchant stays put: buy and sell are the current city.
    pub fn best_deal(&self, good: Good, routes: &Routes) -> Deal {
        let mut best = Deal {
            buy: routes.here().clone(),
            sell: routes.here().clone(),
            profit: 0.0,
        };
        let Some(beliefs) = self.expected.get(&good) else {
            return best;
        };
        let known: Vec<(&CityName, Price)> = beliefs
            .iter()
            .filter(|(city, _)| routes.reaches(city))
            .map(|(city, &price)| (city, price))
            .collect();
        for &(buy, buy_price) in &known {
            for &(sell, sell_price) in &known {
                let profit = sell_price - (buy_price + routes.moving_cost(sell));
                if profit > best.profit {
                    best = Deal {
                        buy: buy.clone(),
                        sell: sell.clone(),
                        profit,
                    };
                }
            }
        }
        best
    }

    /// At zero inventory, switch to the good with the best deal if it beats
    /// the current one. Returns the new good when it changed.
    pub fn reconsider_trade(&mut self, routes: &Routes) -> Option<Good> {
        if self.owned > 0 {
            return None;
        }
        let current = self.best_deal(self.good, routes).profit;
        let mut best = (self.good, current);
        for good in Good::tradable() {
            let profit = self.best_deal(good, routes).profit;
            if profit > best.1 {
                best = (good, profit);
            }
        }
        if best.0 == self.good {
            return None;
        }
        self.good = best.0;
        Some(best.0)
    }
}

impl Trader for Merchant {
    fn money(&self) -> Price {
        self.money
    }

    /// Merchants only sell in the city their best deal sells in, at their
    /// belief for that city.
    fn asking_price(&self, good: Good, routes: &Routes) -> Option<Price> {
        if good != self.good || self.owned == 0 {
            return None;
        }
        let deal = self.best_deal(good, routes);
        if deal.sell != self.location {
            return None;
        }
        self.belief_at(good, &self.location)
    }

    fn quoted_belief(&self, good: Good) -> Option<Price> {
        self.belief_at(good, &self.location)
    }

    fn settle(&mut self, good: Good, side: Side, price: Price) -> bool {
        if good != self.good {
            return false;
        }
        match side {
            Side::Buy => {
                if self.is_full() {
                    return false;
                }
                self.money -= price;
                self.owned += 1;
            }
            Side::Sell => {
                let Some(rest) = self.owned.checked_sub(1) else {
                    return false;
                };
                self.owned = rest;
                self.money += price;
            }
        }
        true
    }
}
