use rand::Rng;

use crate::agents::{Routes, Trader};
use crate::config::SimConfig;
use crate::market::{Market, MarketRole, Side};
use crate::production::ProductionRules;
use crate::types::{Good, Price, Quantity, Value};
use crate::utility::{MoneyUtility, UtilityCurve};

// === ACTIONS ===

/// The exclusive things a Local can do with one activation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Idle,
    Produce(Good),
    /// Index into the city's recipe list.
    Craft(usize),
}

// === LOCAL ===

/// Stationary producer-consumer holding one market per good.
#[derive(Debug, Clone)]
pub struct Local {
    pub money: Price,
    pub money_utility: MoneyUtility,
    markets: [Market; Good::COUNT],
}

impl Local {
    /// `markets` must be indexed by [`Good::index`].
    pub fn new(money: Price, money_utility: MoneyUtility, markets: [Market; Good::COUNT]) -> Self {
        debug_assert!(markets.iter().enumerate().all(|(i, m)| m.good.index() == i));
        Self {
            money,
            money_utility,
            markets,
        }
    }

    /// Draw holdings and curves from the configured ranges. Initial beliefs
    /// are the price of the unit currently held.
    pub fn random<R: Rng>(rng: &mut R, config: &SimConfig) -> Self {
        let money = config.local.starting_money;
        let utility = config.economy.money_utility;
        let markets = Good::ALL.map(|good| {
            let (curve, owned) = match config.economy.profile(good) {
                Some(profile) => {
                    let base = if profile.base_value_max > profile.base_value_min {
                        rng.random_range(profile.base_value_min..profile.base_value_max)
                    } else {
                        profile.base_value_min
                    };
                    let owned = if profile.initial_owned_max > 0 {
                        rng.random_range(0..profile.initial_owned_max)
                    } else {
                        0
                    };
                    (UtilityCurve::new(base, profile.half_value_quantity), owned)
                }
                None => (UtilityCurve::new(1.0, 1.0), 0),
            };
            let belief = utility.value_to_price(money, curve.current_value(owned));
            Market::new(good, curve, &config.market)
                .with_owned(owned)
                .with_belief(belief)
        });
        Self::new(money, utility, markets)
    }

    pub fn market(&self, good: Good) -> &Market {
        &self.markets[good.index()]
    }

    pub fn market_mut(&mut self, good: Good) -> &mut Market {
        &mut self.markets[good.index()]
    }

    pub fn markets(&self) -> impl Iterator<Item = &Market> {
        self.markets.iter()
    }

    pub fn owned(&self, good: Good) -> Quantity {
        self.market(good).owned
    }

    pub fn holdings(&self) -> [Quantity; Good::COUNT] {
        self.markets.each_ref().map(|m| m.owned)
    }

    pub fn role(&self, good: Good) -> MarketRole {
        self.market(good).role(self.money, &self.money_utility)
    }

    pub fn price_to_value(&self, price: Price) -> Value {
        self.money_utility.price_to_value(self.money, price)
    }

    pub fn value_to_price(&self, value: Value) -> Price {
        self.money_utility.value_to_price(self.money, value)
    }

    /// What the market would give for `good`, in value terms.
    fn market_value(&self, good: Good) -> Value {
        self.price_to_value(self.market(good).belief())
    }

    /// Best action and its value.
    ///
    /// Candidates are ranked in a fixed priority order (idle, raw goods in good
    /// order, then recipes in declaration order) and a later candidate only
    /// wins when strictly better, so equal values never depend on float
    /// equality checks.
    pub fn evaluate(&self, rules: &ProductionRules, allow_production: bool) -> (Action, Value) {
        let mut best = (Action::Idle, self.market(Good::Leisure).potential_value());
        if !allow_production {
            return best;
        }

        for &good in rules.raw_goods() {
            let market = self.market(good);
            let units = rules.yield_of(good);
            let value = market
                .curve
                .gain_value(market.owned, units)
                .max(self.market_value(good) * f64::from(units));
            if value > best.1 {
                best = (Action::Produce(good), value);
            }
        }

        for (index, recipe) in rules.recipes().iter().enumerate() {
            if !recipe.is_available(|good| self.owned(good)) {
                continue;
            }
            let material_cost: Value = recipe
                .inputs
                .iter()
                .map(|&(good, count)| {
                    let input = self.market(good).current_value().max(self.market_value(good));
                    input * f64::from(count)
                })
                .sum();
            let value = self.market(recipe.output).potential_value() - material_cost;
            if value > 0.0 && value > best.1 {
                best = (Action::Craft(index), value);
            }
        }

        best
    }

    /// Carry out `action`. Anything but idling resets leisure.
    pub fn perform(&mut self, action: Action, rules: &ProductionRules) {
        match action {
            Action::Idle => {
                self.market_mut(Good::Leisure).add(1);
                return;
            }
            Action::Produce(good) => {
                let units = rules.yield_of(good);
                self.market_mut(good).add(units);
            }
            Action::Craft(index) => {
                let Some(recipe) = rules.recipes().get(index) else {
                    return;
                };
                if !recipe.is_available(|good| self.owned(good)) {
                    return;
                }
                for &(good, count) in &recipe.inputs {
                    self.market_mut(good).take(count);
                }
                self.market_mut(recipe.output).add(1);
            }
        }
        self.market_mut(Good::Leisure).owned = 0;
    }

    /// Each breakable good loses a unit with its breakage probability.
    /// Returns the goods that broke.
    pub fn wear<R: Rng>(&mut self, rules: &ProductionRules, rng: &mut R) -> Vec<Good> {
        let mut broken = Vec::new();
        for good in Good::all() {
            let p = rules.breakage_of(good);
            if p > 0.0 && rng.random_bool(p) && self.market_mut(good).take(1) {
                broken.push(good);
            }
        }
        broken
    }
}

impl Trader for Local {
    fn money(&self) -> Price {
        self.money
    }

    fn asking_price(&self, good: Good, _routes: &Routes) -> Option<Price> {
        (good.is_tradable() && self.role(good) == MarketRole::Seller)
            .then(|| self.market(good).belief())
    }

    fn quoted_belief(&self, good: Good) -> Option<Price> {
        good.is_tradable().then(|| self.market(good).belief())
    }

    fn settle(&mut self, good: Good, side: Side, price: Price) -> bool {
        match side {
            Side::Buy => {
                self.money -= price;
                self.market_mut(good).record_purchase();
                true
            }
            Side::Sell => {
                if !self.market_mut(good).record_sale() {
                    return false;
                }
                self.money += price;
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MarketConfig, default_good_profiles};
    use crate::production::default_recipes;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn local_with(owned: [Quantity; Good::COUNT], base: [f64; Good::COUNT]) -> Local {
        let params = MarketConfig::default();
        let markets = Good::ALL.map(|good| {
            let i = good.index();
            Market::new(good, UtilityCurve::new(base[i], 10.0), &params).with_owned(owned[i])
        });
        Local::new(999.0, MoneyUtility::default(), markets)
    }

    fn rules() -> ProductionRules {
        ProductionRules::new(&default_good_profiles(), &default_recipes(), &[])
    }

    #[test]
    fn idle_wins_when_leisure_dominates() {
        let local = local_with([0; Good::COUNT], [1.0, 1.0, 1.0, 1.0, 100.0]);
        assert_eq!(local.evaluate(&rules(), true).0, Action::Idle);
    }

    #[test]
    fn ties_go_to_the_earlier_candidate() {
        // wood and thread tie on value; wood comes first
        let local = local_with([0; Good::COUNT], [5.0, 1.0, 5.0, 1.0, 1.0]);
        assert_eq!(local.evaluate(&rules(), true).0, Action::Produce(Good::Wood));
    }

    #[test]
    fn crafting_needs_strictly_more_than_the_recipe() {
        let mut owned = [0; Good::COUNT];
        owned[Good::Wood.index()] = 4;
        let local = local_with(owned, [0.1, 500.0, 0.1, 1.0, 0.1]);
        assert_ne!(local.evaluate(&rules(), true).0, Action::Craft(0));

        owned[Good::Wood.index()] = 5;
        let local = local_with(owned, [0.1, 500.0, 0.1, 1.0, 0.1]);
        assert_eq!(local.evaluate(&rules(), true).0, Action::Craft(0));
    }

    #[test]
    fn acting_resets_leisure_and_idling_accumulates_it() {
        let mut owned = [0; Good::COUNT];
        owned[Good::Wood.index()] = 5;
        let mut local = local_with(owned, [1.0; Good::COUNT]);
        let rules = rules();

        local.perform(Action::Idle, &rules);
        local.perform(Action::Idle, &rules);
        assert_eq!(local.owned(Good::Leisure), 2);

        local.perform(Action::Craft(0), &rules);
        assert_eq!(local.owned(Good::Leisure), 0);
        assert_eq!(local.owned(Good::Wood), 1);
        assert_eq!(local.owned(Good::Chair), 1);
    }

    #[test]
    fn production_can_be_held_back() {
        let local = local_with([0; Good::COUNT], [50.0, 1.0, 1.0, 1.0, 1.0]);
        assert_eq!(local.evaluate(&rules(), false).0, Action::Idle);
    }

    #[test]
    fn random_locals_respect_profile_ranges() {
        let mut rng = StdRng::seed_from_u64(7);
        let config = SimConfig::default();
        for _ in 0..50 {
            let local = Local::random(&mut rng, &config);
            assert_eq!(local.owned(Good::Leisure), 0);
            assert!(local.owned(Good::Bed) < 2);
            let wood = local.market(Good::Wood);
            assert!((4.0..8.0).contains(&wood.curve.base_value));
            let expected = local.value_to_price(wood.current_value());
            assert!((wood.belief() - expected).abs() < 1e-9);
        }
    }

    #[test]
    fn selling_without_stock_fails_without_moving_money() {
        let mut local = local_with([0; Good::COUNT], [1.0; Good::COUNT]);
        assert!(!local.settle(Good::Wood, Side::Sell, 3.0));
        assert_eq!(local.money, 999.0);
    }
}
