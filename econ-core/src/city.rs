// A city: one closed economy of Locals and Merchants plus its links to other
// cities. Everything here runs on the thread that owns the city.

use std::collections::BTreeMap;

use crossbeam_channel::{Receiver, Sender, unbounded};
use rand::SeedableRng;
use rand::rngs::StdRng;

use crate::agents::{Local, Merchant, Routes};
use crate::config::SimConfig;
use crate::error::{ConfigError, LinkError};
use crate::market::{Population, StepContext};
use crate::production::ProductionRules;
use crate::stats::{CitySnapshot, LinkStats};
use crate::transport::{InboundLink, LinkClosed, LinkEvent, LinkRegistrar, OutboundLink};
use crate::types::{AgentRef, CityName, LocalId, MerchantId, Price};

pub struct City {
    name: CityName,
    config: SimConfig,
    rules: ProductionRules,
    population: Population,
    inbound: BTreeMap<CityName, Box<dyn InboundLink>>,
    outbound: BTreeMap<CityName, Box<dyn OutboundLink>>,
    moving_costs: BTreeMap<CityName, Price>,
    events_tx: Sender<LinkEvent>,
    events_rx: Receiver<LinkEvent>,
    rng: StdRng,
    tick: u64,
    links: LinkStats,
    last_snapshot: Option<CitySnapshot>,
}

impl City {
    /// A city populated from `config`, seeded from the OS.
    pub fn new(name: impl Into<CityName>, config: SimConfig) -> Result<Self, ConfigError> {
        Self::build(name.into(), config, StdRng::from_os_rng(), true)
    }

    /// A populated city with a reproducible random stream.
    pub fn with_seed(
        name: impl Into<CityName>,
        config: SimConfig,
        seed: u64,
    ) -> Result<Self, ConfigError> {
        Self::build(name.into(), config, StdRng::seed_from_u64(seed), true)
    }

    /// A city with no agents, for hand-built scenarios.
    pub fn empty(
        name: impl Into<CityName>,
        config: SimConfig,
        seed: u64,
    ) -> Result<Self, ConfigError> {
        Self::build(name.into(), config, StdRng::seed_from_u64(seed), false)
    }

    fn build(
        name: CityName,
        config: SimConfig,
        rng: StdRng,
        populate: bool,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let rules = ProductionRules::new(
            &config.economy.goods,
            &config.economy.recipes,
            &config.city.specializations,
        );
        let (events_tx, events_rx) = unbounded();
        let mut city = Self {
            name,
            config,
            rules,
            population: Population::new(),
            inbound: BTreeMap::new(),
            outbound: BTreeMap::new(),
            moving_costs: BTreeMap::new(),
            events_tx,
            events_rx,
            rng,
            tick: 0,
            links: LinkStats::default(),
            last_snapshot: None,
        };
        if populate {
            city.populate();
        }
        Ok(city)
    }

    fn populate(&mut self) {
        for _ in 0..self.config.city.locals {
            let local = Local::random(&mut self.rng, &self.config);
            self.population.add_local(local);
        }
        for _ in 0..self.config.city.merchant_count() {
            let merchant = Merchant::new(self.name.clone(), &self.config.merchant);
            self.population.add_merchant(merchant);
        }
    }

    pub fn name(&self) -> &CityName {
        &self.name
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    pub fn rules(&self) -> &ProductionRules {
        &self.rules
    }

    pub fn population(&self) -> &Population {
        &self.population
    }

    pub fn population_mut(&mut self) -> &mut Population {
        &mut self.population
    }

    pub fn add_local(&mut self, local: Local) -> LocalId {
        self.population.add_local(local)
    }

    /// Place a merchant here directly, without tax.
    pub fn add_merchant(&mut self, mut merchant: Merchant) -> MerchantId {
        merchant.location = self.name.clone();
        self.population.add_merchant(merchant)
    }

    pub fn last_snapshot(&self) -> Option<&CitySnapshot> {
        self.last_snapshot.as_ref()
    }

    pub fn link_stats(&self) -> LinkStats {
        LinkStats {
            open_inbound: self.inbound.len(),
            open_outbound: self.outbound.len(),
            ..self.links
        }
    }

    // === LINKS ===

    /// Handle for network tasks to hand this city links and merchants.
    pub fn registrar(&self) -> LinkRegistrar {
        LinkRegistrar::new(self.name.clone(), self.events_tx.clone())
    }

    pub fn add_inbound(&mut self, link: Box<dyn InboundLink>) -> Result<(), LinkError> {
        let remote = link.remote().clone();
        self.check_remote(&remote, self.inbound.contains_key(&remote))?;
        self.inbound.insert(remote, link);
        Ok(())
    }

    pub fn add_outbound(&mut self, link: Box<dyn OutboundLink>) -> Result<(), LinkError> {
        let remote = link.remote().clone();
        self.check_remote(&remote, self.outbound.contains_key(&remote))?;
        self.outbound.insert(remote, link);
        Ok(())
    }

    fn check_remote(&self, remote: &CityName, taken: bool) -> Result<(), LinkError> {
        if *remote == self.name {
            return Err(LinkError::SelfLink(remote.clone()));
        }
        if taken {
            return Err(LinkError::Duplicate {
                local: self.name.clone(),
                remote: remote.clone(),
            });
        }
        Ok(())
    }

    /// Close and forget both links to `remote`. Merchants already waiting on
    /// the inbound link are admitted first.
    pub fn remove_links(&mut self, remote: &CityName) {
        if let Some(link) = self.outbound.remove(remote) {
            link.close();
        }
        if let Some(link) = self.inbound.remove(remote) {
            link.close();
            self.admit_remaining(link, remote);
        }
    }

    fn admit_remaining(&mut self, mut link: Box<dyn InboundLink>, remote: &CityName) {
        while let Ok(Some(merchant)) = link.try_receive() {
            self.admit(merchant, remote);
        }
    }

    /// Forget outbound links the far end has closed.
    fn prune_closed_outbound(&mut self) {
        let city = &self.name;
        self.outbound.retain(|remote, link| {
            let open = !link.is_closed();
            if !open {
                tracing::debug!(%city, %remote, "outbound link closed");
            }
            open
        });
    }

    pub fn has_inbound(&self, remote: &CityName) -> bool {
        self.inbound.contains_key(remote)
    }

    pub fn has_outbound(&self, remote: &CityName) -> bool {
        self.outbound.contains_key(remote)
    }

    pub fn outbound_remotes(&self) -> impl Iterator<Item = &CityName> {
        self.outbound.keys()
    }

    pub fn inbound_remotes(&self) -> impl Iterator<Item = &CityName> {
        self.inbound.keys()
    }

    /// Override the friction merchants here charge for selling in `remote`.
    pub fn set_moving_cost(&mut self, remote: impl Into<CityName>, cost: Price) {
        self.moving_costs.insert(remote.into(), cost);
    }

    /// Reachable cities as seen from here right now.
    pub fn routes(&self) -> Routes {
        let mut routes = Routes::new(self.name.clone(), self.config.merchant.moving_cost);
        for remote in self.outbound.keys() {
            routes = routes.with_destination(remote.clone());
        }
        for (remote, &cost) in &self.moving_costs {
            routes = routes.with_cost(remote.clone(), cost);
        }
        routes
    }

    /// Apply link changes reported by network tasks.
    pub fn process_link_events(&mut self) {
        while let Ok(event) = self.events_rx.try_recv() {
            match event {
                LinkEvent::Connected {
                    remote,
                    inbound,
                    outbound,
                } => {
                    let clash = remote == self.name
                        || (inbound.is_some() && self.inbound.contains_key(&remote))
                        || (outbound.is_some() && self.outbound.contains_key(&remote));
                    if clash {
                        tracing::warn!(city = %self.name, %remote, "refusing duplicate link");
                        if let Some(link) = inbound {
                            link.close();
                        }
                        if let Some(link) = outbound {
                            link.close();
                        }
                        continue;
                    }
                    tracing::debug!(
                        city = %self.name,
                        %remote,
                        inbound = inbound.is_some(),
                        outbound = outbound.is_some(),
                        "link registered"
                    );
                    if let Some(link) = inbound {
                        self.inbound.insert(remote.clone(), link);
                    }
                    if let Some(link) = outbound {
                        self.outbound.insert(remote, link);
                    }
                }
                LinkEvent::Disconnected {
                    remote,
                    inbound,
                    outbound,
                } => {
                    if inbound.is_some() && self.inbound.get(&remote).map(|l| l.id()) == inbound {
                        if let Some(link) = self.inbound.remove(&remote) {
                            // Merchants already read off the wire still arrive.
                            self.admit_remaining(link, &remote);
                        }
                    }
                    if outbound.is_some() && self.outbound.get(&remote).map(|l| l.id()) == outbound
                    {
                        self.outbound.remove(&remote);
                    }
                    tracing::debug!(city = %self.name, %remote, "link removed");
                }
                LinkEvent::Delivered { remote, merchant } => {
                    self.admit(merchant, &remote);
                }
                LinkEvent::Undelivered { remote, merchants } => {
                    tracing::info!(
                        city = %self.name,
                        %remote,
                        count = merchants.len(),
                        "merchants returned by a dropped link"
                    );
                    for merchant in merchants {
                        self.links.returned += 1;
                        self.add_merchant(merchant);
                    }
                }
            }
        }
    }

    // === MIGRATION ===

    /// Take in every merchant waiting on an inbound link. Returns how many
    /// arrived.
    pub fn admit_arrivals(&mut self) -> usize {
        let limit = self.config.transport.queue_capacity.max(1);
        let mut arrivals = Vec::new();
        let mut closed = Vec::new();
        for (remote, link) in self.inbound.iter_mut() {
            for _ in 0..limit {
                match link.try_receive() {
                    Ok(Some(merchant)) => arrivals.push((remote.clone(), merchant)),
                    Ok(None) => break,
                    Err(LinkClosed) => {
                        closed.push(remote.clone());
                        break;
                    }
                }
            }
        }
        for remote in closed {
            tracing::debug!(city = %self.name, %remote, "inbound link closed");
            self.inbound.remove(&remote);
        }

        let count = arrivals.len();
        for (from, merchant) in arrivals {
            self.admit(merchant, &from);
        }
        count
    }

    /// Settle an arriving merchant: stamp the location and levy the wealth tax,
    /// shared equally among the Locals.
    pub fn admit(&mut self, mut merchant: Merchant, from: &CityName) -> MerchantId {
        let locals = self.population.local_count();
        let tax = if locals > 0 {
            self.config.city.tax.levy(merchant.money)
        } else {
            0.0
        };
        if tax > 0.0 {
            merchant.money -= tax;
            let share = tax / locals as f64;
            for (_, local) in self.population.locals_mut() {
                local.money += share;
            }
            self.links.taxes_collected += tax;

            #[cfg(feature = "instrument")]
            tracing::info!(
                target: "tax",
                tick = self.tick,
                city = self.name.as_str(),
                amount = tax,
                share = share,
                locals = locals as u64,
            );
        }
        self.links.arrivals += 1;

        #[cfg(feature = "instrument")]
        tracing::info!(
            target: "migration",
            tick = self.tick,
            city = self.name.as_str(),
            remote = from.as_str(),
            direction = "arrival",
            good = merchant.good.name(),
            money = merchant.money,
            owned = merchant.owned as u64,
        );
        tracing::trace!(city = %self.name, remote = %from, "merchant arrived");

        self.add_merchant(merchant)
    }

    /// Send a merchant down the outbound link to `destination`. A refused
    /// merchant stays in this city and the refusal is counted.
    pub fn relocate(&mut self, id: MerchantId, destination: &CityName) -> bool {
        send_off(
            &mut self.population,
            &mut self.outbound,
            &mut self.links,
            &self.name,
            self.tick,
            id,
            destination,
        )
    }

    // === TICK ===

    /// One tick: link changes, arrivals, micro-steps, snapshot.
    pub fn step(&mut self) -> CitySnapshot {
        self.tick += 1;
        self.process_link_events();
        self.admit_arrivals();
        self.prune_closed_outbound();

        let routes = self.routes();
        let production_chance = match self.config.local.production_warmup_ticks {
            0 => 1.0,
            warmup => (self.tick as f64 / warmup as f64).min(1.0),
        };
        for _ in 0..self.config.city.micro_steps {
            self.micro_step(&routes, production_chance);
        }

        let tally = self.population.take_tally();
        let snapshot = CitySnapshot::capture(
            &self.name,
            self.tick,
            &self.population,
            &tally,
            self.link_stats(),
        );

        #[cfg(feature = "instrument")]
        {
            for stats in &snapshot.goods {
                tracing::info!(
                    target: "good_stats",
                    tick = self.tick,
                    city = self.name.as_str(),
                    good = stats.good.name(),
                    min_belief = stats.min_belief,
                    max_belief = stats.max_belief,
                    mean_belief = stats.mean_belief,
                    trades = stats.trades,
                    volume = stats.volume,
                );
            }
        }

        self.last_snapshot = Some(snapshot.clone());
        snapshot
    }

    /// Activate every agent once, in a fresh random order.
    fn micro_step(&mut self, routes: &Routes, production_chance: f64) {
        let roster = self.population.roster(&mut self.rng);
        let ctx = StepContext {
            city: &self.name,
            tick: self.tick,
            rules: &self.rules,
            routes,
            local: &self.config.local,
            merchant: &self.config.merchant,
            production_chance,
        };
        for &agent in &roster {
            match agent {
                AgentRef::Local(id) => {
                    self.population.step_local(id, &roster, &ctx, &mut self.rng);
                }
                AgentRef::Merchant(id) => {
                    let wants = self
                        .population
                        .step_merchant(id, &roster, &ctx, &mut self.rng);
                    if let Some(destination) = wants {
                        send_off(
                            &mut self.population,
                            &mut self.outbound,
                            &mut self.links,
                            &self.name,
                            self.tick,
                            id,
                            &destination,
                        );
                    }
                }
            }
        }
    }
}

/// Move a merchant from the population onto a link, or keep it on refusal.
/// A link that refuses because it is closed is dropped.
fn send_off(
    population: &mut Population,
    outbound: &mut BTreeMap<CityName, Box<dyn OutboundLink>>,
    links: &mut LinkStats,
    city: &CityName,
    tick: u64,
    id: MerchantId,
    destination: &CityName,
) -> bool {
    let Some(link) = outbound.get(destination) else {
        links.refused += 1;
        return false;
    };
    let Some(merchant) = population.remove_merchant(id) else {
        return false;
    };

    #[cfg(feature = "instrument")]
    let (good, money, owned) = (merchant.good, merchant.money, merchant.owned);

    match link.try_send(merchant) {
        Ok(()) => {
            links.departures += 1;
            #[cfg(feature = "instrument")]
            tracing::info!(
                target: "migration",
                tick = tick,
                city = city.as_str(),
                remote = destination.as_str(),
                direction = "departure",
                good = good.name(),
                money = money,
                owned = owned as u64,
            );
            tracing::trace!(%city, %destination, tick, "merchant departed");
            true
        }
        Err(refused) => {
            links.refused += 1;
            tracing::debug!(%city, %destination, closed = refused.is_closed(), "relocation refused");
            if refused.is_closed() {
                outbound.remove(destination);
            }
            population.add_merchant(refused.into_merchant());
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::queue_link;

    fn config() -> SimConfig {
        SimConfig::default().with_locals(8).with_micro_steps(5)
    }

    #[test]
    fn populates_locals_and_a_quarter_as_many_merchants() {
        let city = City::with_seed("riverwood", config(), 1).unwrap();
        assert_eq!(city.population().local_count(), 8);
        assert_eq!(city.population().merchant_count(), 2);
        assert!(city.population().merchants().all(|(_, m)| m.location == *city.name()));
    }

    #[test]
    fn invalid_config_is_rejected() {
        let mut bad = config();
        bad.local.activation_probability = 1.5;
        assert!(matches!(
            City::empty("a", bad, 1),
            Err(ConfigError::Invalid {
                field: "local.activation_probability",
                ..
            })
        ));
    }

    #[test]
    fn removing_links_admits_merchants_already_queued() {
        let mut city = City::empty("b", config(), 1).unwrap();
        let (tx, rx) = queue_link(CityName::new("a"), CityName::new("b"), 4);
        city.add_inbound(Box::new(rx)).unwrap();
        tx.try_send(Merchant::new(CityName::new("a"), &config().merchant)).unwrap();

        city.remove_links(&CityName::new("a"));
        assert!(!city.has_inbound(&CityName::new("a")));
        assert!(tx.is_closed());
        assert_eq!(city.population().merchant_count(), 1);
        assert_eq!(city.link_stats().arrivals, 1);
    }

    #[test]
    fn rejects_self_and_duplicate_links() {
        let mut city = City::empty("a", config(), 1).unwrap();
        let (tx, _rx) = queue_link(CityName::new("a"), CityName::new("a"), 4);
        assert_eq!(
            city.add_outbound(Box::new(tx)),
            Err(LinkError::SelfLink(CityName::new("a")))
        );

        let (tx, _rx) = queue_link(CityName::new("a"), CityName::new("b"), 4);
        city.add_outbound(Box::new(tx)).unwrap();
        let (tx, _rx) = queue_link(CityName::new("a"), CityName::new("b"), 4);
        assert!(matches!(
            city.add_outbound(Box::new(tx)),
            Err(LinkError::Duplicate { .. })
        ));
    }

    #[test]
    fn relocation_without_a_link_is_refused() {
        let mut city = City::empty("a", config(), 1).unwrap();
        let id = city.add_merchant(Merchant::new(CityName::new("a"), &config().merchant));
        assert!(!city.relocate(id, &CityName::new("nowhere")));
        assert_eq!(city.population().merchant_count(), 1);
        assert_eq!(city.link_stats().refused, 1);
    }

    #[test]
    fn routes_include_outbound_links_and_overrides() {
        let mut city = City::empty("a", config(), 1).unwrap();
        let (tx, _rx) = queue_link(CityName::new("a"), CityName::new("b"), 4);
        city.add_outbound(Box::new(tx)).unwrap();
        city.set_moving_cost("b", 3.5);
        let routes = city.routes();
        assert_eq!(routes.destinations(), &[CityName::new("b")]);
        assert_eq!(routes.moving_cost(&CityName::new("b")), 3.5);
        assert_eq!(routes.moving_cost(&CityName::new("a")), 1.0);
    }

    #[test]
    fn step_records_a_snapshot() {
        let mut city = City::with_seed("a", config(), 5).unwrap();
        let snapshot = city.step();
        assert_eq!(snapshot.tick, 1);
        assert_eq!(snapshot.locals.len(), 8);
        assert_eq!(snapshot.goods.len(), 4);
        assert_eq!(city.last_snapshot(), Some(&snapshot));
    }
}
