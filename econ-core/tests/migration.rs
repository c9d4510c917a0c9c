//! Merchants crossing in-process links between cities.

use approx::assert_relative_eq;

use econ_core::config::{MarketConfig, MerchantConfig};
use econ_core::transport::{LinkId, OutboundLink, queue_link};
use econ_core::{AgentRef, City, CityName, Good, Local, Market, Merchant, Scheduler, SimConfig, UtilityCurve};

// === TEST FIXTURES ===

fn name(s: &str) -> CityName {
    CityName::new(s)
}

/// Merchants act every micro-step and never wander at random.
fn config() -> SimConfig {
    SimConfig {
        merchant: MerchantConfig {
            activation_probability: 1.0,
            relocation_probability: 0.0,
            ..MerchantConfig::default()
        },
        ..SimConfig::default().with_micro_steps(1)
    }
}

/// A full cart of chairs, bought cheap in `a` and worth more in `b`.
fn loaded_trader() -> Merchant {
    Merchant::new(name("a"), &config().merchant)
        .with_owned(20)
        .with_belief(Good::Chair, name("a"), 10.0)
        .with_belief(Good::Chair, name("b"), 30.0)
}

fn two_cities(capacity: usize) -> Scheduler {
    let mut scheduler = Scheduler::new();
    scheduler.add_city(City::empty("a", config(), 1).unwrap()).unwrap();
    scheduler.add_city(City::empty("b", config(), 2).unwrap()).unwrap();
    scheduler.connect_local(&name("a"), &name("b"), capacity).unwrap();
    scheduler
}

fn local_with_belief(belief: f64) -> Local {
    let params = MarketConfig::default();
    let markets = Good::ALL.map(|good| {
        Market::new(good, UtilityCurve::new(10.0, 5.0), &params)
            .with_belief(belief)
            .with_volatility(0.1)
    });
    Local::new(1000.0, Default::default(), markets)
}

// === SCENARIOS ===

#[test]
fn full_merchant_heads_for_the_better_city() {
    let mut scheduler = two_cities(10);
    scheduler.city_mut(&name("a")).unwrap().add_merchant(loaded_trader());

    let snapshots = scheduler.run_tick();
    assert_eq!(snapshots[0].merchants.len(), 0);
    assert_eq!(snapshots[1].merchants.len(), 1);

    let a = scheduler.city(&name("a")).unwrap();
    let b = scheduler.city(&name("b")).unwrap();
    assert_eq!(a.link_stats().departures, 1);
    assert_eq!(b.link_stats().arrivals, 1);

    let (_, merchant) = b.population().merchants().next().unwrap();
    assert_eq!(merchant.location, name("b"));
    assert_eq!(merchant.owned, 20);
    assert_eq!(merchant.belief_at(Good::Chair, &name("b")), Some(30.0));
    // no Locals in b, so no tax
    assert_eq!(merchant.money, 1000.0);
}

#[test]
fn full_link_refuses_and_the_merchant_stays() {
    let mut scheduler = two_cities(1);
    {
        let a = scheduler.city_mut(&name("a")).unwrap();
        a.add_merchant(loaded_trader());
        a.add_merchant(loaded_trader());
        a.step();
        assert_eq!(a.population().merchant_count(), 1);
        let stats = a.link_stats();
        assert_eq!((stats.departures, stats.refused), (1, 1));
    }

    // once b drains its inbound queue the second merchant gets through
    scheduler.city_mut(&name("b")).unwrap().step();
    let a = scheduler.city_mut(&name("a")).unwrap();
    a.step();
    assert_eq!(a.population().merchant_count(), 0);
    assert_eq!(a.link_stats().departures, 2);

    let b = scheduler.city_mut(&name("b")).unwrap();
    b.step();
    assert_eq!(b.population().merchant_count(), 2);
}

#[test]
fn send_hands_the_merchant_back_when_full() {
    let (tx, _rx) = queue_link(name("a"), name("b"), 1);
    tx.try_send(loaded_trader()).unwrap();
    let refused = tx.try_send(loaded_trader().with_money(7.0)).unwrap_err();
    assert!(!refused.is_closed());
    assert_eq!(refused.into_merchant().money, 7.0);
}

#[test]
fn arrivals_through_a_link_pay_the_tax() {
    let mut city = City::empty("b", config(), 1).unwrap();
    let locals: Vec<_> = (0..4).map(|_| city.add_local(local_with_belief(5.0))).collect();
    let (tx, rx) = queue_link(name("a"), name("b"), 4);
    city.add_inbound(Box::new(rx)).unwrap();

    tx.try_send(loaded_trader().with_money(1500.0)).unwrap();
    assert_eq!(city.admit_arrivals(), 1);

    let (_, merchant) = city.population().merchants().next().unwrap();
    assert_relative_eq!(merchant.money, 1450.0);
    for id in locals {
        assert_relative_eq!(city.population().local(id).unwrap().money, 1012.5);
    }
}

#[test]
fn gossip_nudges_the_listener_only() {
    let mut city = City::empty("a", config(), 1).unwrap();
    let listener = city.add_local(local_with_belief(10.0));
    let speaker = city.add_local(local_with_belief(14.0));

    let pop = city.population_mut();
    assert!(pop.gossip(listener, AgentRef::Local(speaker), Good::Wood));
    assert_relative_eq!(pop.local(listener).unwrap().market(Good::Wood).belief(), 10.1, epsilon = 1e-12);
    assert_eq!(pop.local(speaker).unwrap().market(Good::Wood).belief(), 14.0);
}

#[test]
fn merchants_returned_by_a_dropped_link_are_not_taxed() {
    let mut city = City::empty("a", config(), 1).unwrap();
    city.add_local(local_with_belief(5.0));
    city.registrar()
        .undelivered(name("b"), vec![loaded_trader().with_money(2000.0)])
        .unwrap();
    city.process_link_events();

    let (_, merchant) = city.population().merchants().next().unwrap();
    assert_eq!(merchant.money, 2000.0);
    assert_eq!(city.link_stats().returned, 1);
    assert_eq!(city.link_stats().taxes_collected, 0.0);
}

#[test]
fn stale_teardown_leaves_a_newer_link_alone() {
    let mut city = City::empty("a", config(), 1).unwrap();
    let (tx, _rx) = queue_link(name("a"), name("b"), 4);
    city.add_outbound(Box::new(tx)).unwrap();

    city.registrar()
        .disconnected(name("b"), Some(LinkId::next()), Some(LinkId::next()))
        .unwrap();
    city.process_link_events();
    assert!(city.has_outbound(&name("b")));
}

#[test]
fn moving_cost_override_keeps_merchants_home() {
    let mut scheduler = two_cities(10);
    let a = scheduler.city_mut(&name("a")).unwrap();
    a.set_moving_cost("b", 25.0);
    a.add_merchant(loaded_trader());
    a.step();
    assert_eq!(a.population().merchant_count(), 1);
    assert_eq!(a.link_stats().departures, 0);
}

#[test]
fn closed_link_is_dropped_after_one_refusal() {
    let mut a = City::empty("a", config(), 1).unwrap();
    let (tx, rx) = queue_link(name("a"), name("b"), 4);
    a.add_outbound(Box::new(tx)).unwrap();
    drop(rx);
    a.add_merchant(loaded_trader());

    for _ in 0..5 {
        a.step();
    }
    assert!(!a.has_outbound(&name("b")));
    assert_eq!(a.link_stats().refused, 1);
    assert_eq!(a.population().merchant_count(), 1);
}

#[test]
fn links_closed_by_the_far_city_are_forgotten() {
    let mut scheduler = two_cities(4);
    scheduler.city_mut(&name("b")).unwrap().remove_links(&name("a"));

    let a = scheduler.city_mut(&name("a")).unwrap();
    assert!(a.has_outbound(&name("b")) && a.has_inbound(&name("b")));
    a.step();
    assert!(!a.has_outbound(&name("b")));
    assert!(!a.has_inbound(&name("b")));
    assert!(a.routes().destinations().is_empty());
}

#[test]
fn merchants_read_after_the_link_stopped_are_still_taxed() {
    let mut city = City::empty("b", config(), 1).unwrap();
    city.add_local(local_with_belief(5.0));
    city.registrar()
        .delivered(name("a"), loaded_trader().with_money(1500.0))
        .unwrap();
    city.process_link_events();

    let (_, merchant) = city.population().merchants().next().unwrap();
    assert_relative_eq!(merchant.money, 1450.0);
    assert_eq!(city.link_stats().arrivals, 1);
}
