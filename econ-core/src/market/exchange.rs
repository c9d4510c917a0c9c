// Population of one city and the decentralized exchange that runs over it:
// gossip, first-fit matching, and settlement between two agents.

use rand::Rng;
use rand::seq::SliceRandom;
use slotmap::SlotMap;

use crate::agents::{Local, Merchant, Routes, Trader};
use crate::config::{LocalConfig, MerchantConfig};
use crate::market::{MarketRole, Side};
use crate::production::ProductionRules;
use crate::stats::TradeTally;
use crate::types::{AgentRef, CityName, Good, LocalId, MerchantId, Price};

// ============================================================================
// Step context
// ============================================================================

/// Everything an activation needs that does not live in the population.
#[derive(Debug, Clone, Copy)]
pub struct StepContext<'a> {
    pub city: &'a CityName,
    pub tick: u64,
    pub rules: &'a ProductionRules,
    pub routes: &'a Routes,
    pub local: &'a LocalConfig,
    pub merchant: &'a MerchantConfig,
    /// Chance a Local considers production at all this tick.
    pub production_chance: f64,
}

// ============================================================================
// Population
// ============================================================================

/// Arena of every agent living in a city, addressed by stable handles.
#[derive(Debug, Default)]
pub struct Population {
    locals: SlotMap<LocalId, Local>,
    merchants: SlotMap<MerchantId, Merchant>,
    tally: TradeTally,
}

impl Population {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_local(&mut self, local: Local) -> LocalId {
        self.locals.insert(local)
    }

    pub fn add_merchant(&mut self, merchant: Merchant) -> MerchantId {
        self.merchants.insert(merchant)
    }

    pub fn remove_merchant(&mut self, id: MerchantId) -> Option<Merchant> {
        self.merchants.remove(id)
    }

    pub fn local(&self, id: LocalId) -> Option<&Local> {
        self.locals.get(id)
    }

    pub fn local_mut(&mut self, id: LocalId) -> Option<&mut Local> {
        self.locals.get_mut(id)
    }

    pub fn merchant(&self, id: MerchantId) -> Option<&Merchant> {
        self.merchants.get(id)
    }

    pub fn merchant_mut(&mut self, id: MerchantId) -> Option<&mut Merchant> {
        self.merchants.get_mut(id)
    }

    pub fn locals(&self) -> impl Iterator<Item = (LocalId, &Local)> {
        self.locals.iter()
    }

    pub fn locals_mut(&mut self) -> impl Iterator<Item = (LocalId, &mut Local)> {
        self.locals.iter_mut()
    }

    pub fn merchants(&self) -> impl Iterator<Item = (MerchantId, &Merchant)> {
        self.merchants.iter()
    }

    pub fn merchants_mut(&mut self) -> impl Iterator<Item = (MerchantId, &mut Merchant)> {
        self.merchants.iter_mut()
    }

    pub fn local_count(&self) -> usize {
        self.locals.len()
    }

    pub fn merchant_count(&self) -> usize {
        self.merchants.len()
    }

    /// Every agent once, in a fresh random order.
    pub fn roster<R: Rng>(&self, rng: &mut R) -> Vec<AgentRef> {
        let mut roster: Vec<AgentRef> = self
            .locals
            .keys()
            .map(AgentRef::Local)
            .chain(self.merchants.keys().map(AgentRef::Merchant))
            .collect();
        roster.shuffle(rng);
        roster
    }

    pub fn tally(&self) -> &TradeTally {
        &self.tally
    }

    pub fn take_tally(&mut self) -> TradeTally {
        std::mem::take(&mut self.tally)
    }

    pub fn total_money(&self) -> Price {
        let locals: Price = self.locals.values().map(|l| l.money).sum();
        let merchants: Price = self.merchants.values().map(|m| m.money).sum();
        locals + merchants
    }

    /// Units of each good held by anyone in the city.
    pub fn total_goods(&self) -> [u64; Good::COUNT] {
        let mut totals = [0u64; Good::COUNT];
        for local in self.locals.values() {
            for (total, owned) in totals.iter_mut().zip(local.holdings()) {
                *total += u64::from(owned);
            }
        }
        for merchant in self.merchants.values() {
            totals[merchant.good.index()] += u64::from(merchant.owned);
        }
        totals
    }

    // === DISPATCH ===

    pub fn asking_price(&self, agent: AgentRef, good: Good, routes: &Routes) -> Option<Price> {
        match agent {
            AgentRef::Local(id) => self.locals.get(id)?.asking_price(good, routes),
            AgentRef::Merchant(id) => self.merchants.get(id)?.asking_price(good, routes),
        }
    }

    pub fn quoted_belief(&self, agent: AgentRef, good: Good) -> Option<Price> {
        match agent {
            AgentRef::Local(id) => self.locals.get(id)?.quoted_belief(good),
            AgentRef::Merchant(id) => self.merchants.get(id)?.quoted_belief(good),
        }
    }

    fn money_of(&self, agent: AgentRef) -> Option<Price> {
        match agent {
            AgentRef::Local(id) => self.locals.get(id).map(Trader::money),
            AgentRef::Merchant(id) => self.merchants.get(id).map(Trader::money),
        }
    }

    fn settle(&mut self, agent: AgentRef, good: Good, side: Side, price: Price) -> bool {
        match agent {
            AgentRef::Local(id) => self
                .locals
                .get_mut(id)
                .is_some_and(|l| l.settle(good, side, price)),
            AgentRef::Merchant(id) => self
                .merchants
                .get_mut(id)
                .is_some_and(|m| m.settle(good, side, price)),
        }
    }

    /// Move one unit of `good` from `seller` to `buyer` for `price`.
    ///
    /// The seller is settled first; if it cannot deliver nothing changes.
    /// Returns whether the trade happened.
    pub fn trade(&mut self, buyer: AgentRef, seller: AgentRef, good: Good, price: Price) -> bool {
        if buyer == seller || price < 0.0 {
            return false;
        }
        match self.money_of(buyer) {
            Some(money) if money >= price => {}
            _ => return false,
        }
        if !self.settle(seller, good, Side::Sell, price) {
            return false;
        }
        if !self.settle(buyer, good, Side::Buy, price) {
            // undo the sale so goods and money stay conserved
            self.refund(seller, good, price);
            return false;
        }
        self.tally.record(good, price);
        true
    }

    fn refund(&mut self, seller: AgentRef, good: Good, price: Price) {
        match seller {
            AgentRef::Local(id) => {
                if let Some(local) = self.locals.get_mut(id) {
                    local.money -= price;
                    local.market_mut(good).add(1);
                }
            }
            AgentRef::Merchant(id) => {
                if let Some(merchant) = self.merchants.get_mut(id) {
                    merchant.money -= price;
                    merchant.owned += 1;
                }
            }
        }
    }

    /// A Local hears `speaker`'s belief about `good`. Returns whether the
    /// listener's belief moved.
    pub fn gossip(&mut self, listener: LocalId, speaker: AgentRef, good: Good) -> bool {
        if speaker == AgentRef::Local(listener) {
            return false;
        }
        let Some(heard) = self.quoted_belief(speaker, good) else {
            return false;
        };
        self.locals
            .get_mut(listener)
            .is_some_and(|l| l.market_mut(good).hear(heard))
    }

    /// First agent willing to sell `good` at or below `limit`, scanning the
    /// roster in a fresh random order for this buyer. No price comparison
    /// beyond that.
    pub fn find_seller<R: Rng>(
        &self,
        buyer: AgentRef,
        good: Good,
        limit: Price,
        roster: &[AgentRef],
        routes: &Routes,
        rng: &mut R,
    ) -> Option<(AgentRef, Price)> {
        shuffled(roster, buyer, rng)
            .into_iter()
            .find_map(|agent| {
                let price = self.asking_price(agent, good, routes)?;
                (price <= limit).then_some((agent, price))
            })
    }

    fn sample_other<R: Rng>(&self, me: AgentRef, roster: &[AgentRef], rng: &mut R) -> Option<AgentRef> {
        let others = roster.iter().filter(|&&a| a != me).count();
        if others == 0 {
            return None;
        }
        let pick = rng.random_range(0..others);
        roster.iter().copied().filter(|&a| a != me).nth(pick)
    }

    // === LOCAL ACTIVATION ===

    /// One micro-step for a Local: maybe act, then work every tradable market.
    pub fn step_local<R: Rng>(
        &mut self,
        id: LocalId,
        roster: &[AgentRef],
        ctx: &StepContext<'_>,
        rng: &mut R,
    ) {
        if !rng.random_bool(ctx.local.activation_probability) {
            return;
        }
        let Some(local) = self.locals.get_mut(id) else {
            return;
        };

        local.wear(ctx.rules, rng);
        let allow_production =
            ctx.production_chance >= 1.0 || rng.random_bool(ctx.production_chance.max(0.0));
        let (action, _) = local.evaluate(ctx.rules, allow_production);
        local.perform(action, ctx.rules);

        for good in Good::tradable() {
            self.work_market(id, good, roster, ctx, rng);
        }
    }

    /// Gossip, idle tracking, matching, stale drift, in that order.
    fn work_market<R: Rng>(
        &mut self,
        id: LocalId,
        good: Good,
        roster: &[AgentRef],
        ctx: &StepContext<'_>,
        rng: &mut R,
    ) {
        let me = AgentRef::Local(id);
        let Some(local) = self.locals.get(id) else {
            return;
        };

        if rng.random_bool(local.market(good).gossip_probability) {
            if let Some(speaker) = self.sample_other(me, roster, rng) {
                self.gossip(id, speaker, good);
            }
        }

        let Some(local) = self.locals.get_mut(id) else {
            return;
        };
        let role = local.role(good);
        if role != MarketRole::Neutral {
            local.market_mut(good).note_missed_trade();
        }

        if role == MarketRole::Buyer {
            let limit = local.market(good).belief().min(local.money);
            if let Some((seller, price)) = self.find_seller(me, good, limit, roster, ctx.routes, rng) {
                if self.trade(me, seller, good, price) {
                    #[cfg(feature = "instrument")]
                    tracing::info!(
                        target: "trade",
                        tick = ctx.tick,
                        city = ctx.city.as_str(),
                        good = good.name(),
                        price = price,
                        buyer = "local",
                        seller = kind(seller),
                    );
                }
            }
        }

        if let Some(local) = self.locals.get_mut(id) {
            let money = local.money;
            let utility = local.money_utility;
            local.market_mut(good).drift(money, &utility);
        }
    }

    // === MERCHANT ACTIVATION ===

    /// One micro-step for a Merchant. Returns the city it wants to leave for.
    pub fn step_merchant<R: Rng>(
        &mut self,
        id: MerchantId,
        roster: &[AgentRef],
        ctx: &StepContext<'_>,
        rng: &mut R,
    ) -> Option<CityName> {
        if !rng.random_bool(ctx.merchant.activation_probability) {
            return None;
        }
        let me = AgentRef::Merchant(id);
        let here = ctx.routes.here();

        // Listen to everyone in town.
        let merchant = self.merchants.get(id)?;
        let mut observed = Vec::new();
        let mut rumours = Vec::new();
        for &agent in roster.iter().filter(|&&a| a != me) {
            for good in Good::tradable() {
                if let Some(price) = self.quoted_belief(agent, good) {
                    observed.push((good, price));
                }
            }
            if let AgentRef::Merchant(other) = agent {
                let Some(other) = self.merchants.get(other) else {
                    continue;
                };
                for (&good, beliefs) in &other.expected {
                    for (city, &price) in beliefs {
                        if !merchant.knows(good, city) {
                            rumours.push((good, city.clone(), price));
                        }
                    }
                }
            }
        }

        let merchant = self.merchants.get_mut(id)?;
        for (good, price) in observed {
            merchant.observe(good, here, price, ctx.merchant.belief_retention);
        }
        for (good, city, price) in rumours {
            merchant.learn(good, &city, price);
        }

        // Buy low here if somewhere else pays more.
        let good = merchant.good;
        let deal = merchant.best_deal(good, ctx.routes);
        if deal.sell != *here && !merchant.is_full() {
            let willing = merchant.belief_at(good, here).unwrap_or(0.0);
            let limit = willing.min(merchant.money);
            let resale = merchant.belief_at(good, &deal.sell).unwrap_or(0.0);
            let seller = shuffled(roster, me, rng)
                .into_iter()
                .filter(|agent| matches!(agent, AgentRef::Local(_)))
                .find_map(|agent| {
                    let price = self.asking_price(agent, good, ctx.routes)?;
                    (price <= limit && resale - price > 0.0).then_some((agent, price))
                });
            if let Some((seller, price)) = seller {
                if self.trade(me, seller, good, price) {
                    #[cfg(feature = "instrument")]
                    tracing::info!(
                        target: "trade",
                        tick = ctx.tick,
                        city = ctx.city.as_str(),
                        good = good.name(),
                        price = price,
                        buyer = "merchant",
                        seller = kind(seller),
                    );
                }
            }
        }

        // Wander off now and then, and head out once the cart is full.
        if rng.random_bool(ctx.merchant.relocation_probability) {
            if let Some(destination) = ctx.routes.random_destination(rng) {
                return Some(destination);
            }
        }
        let merchant = self.merchants.get_mut(id)?;
        if merchant.is_full() && deal.sell != *here {
            if let Some(destination) = ctx.routes.toward(&deal.sell, rng) {
                return Some(destination);
            }
        }

        merchant.reconsider_trade(ctx.routes);
        None
    }
}

/// Everyone but `me`, in an order of their own.
fn shuffled<R: Rng>(roster: &[AgentRef], me: AgentRef, rng: &mut R) -> Vec<AgentRef> {
    let mut order: Vec<AgentRef> = roster.iter().copied().filter(|&a| a != me).collect();
    order.shuffle(rng);
    order
}

#[cfg(feature = "instrument")]
fn kind(agent: AgentRef) -> &'static str {
    match agent {
        AgentRef::Local(_) => "local",
        AgentRef::Merchant(_) => "merchant",
    }
}
