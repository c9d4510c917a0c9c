//! Invariants that must hold for any run: no negative balances, exact belief
//! moves on a match, conservation when nothing is produced, and the arrival
//! tax split.

use approx::assert_relative_eq;

use econ_core::config::MarketConfig;
use econ_core::{
    AgentRef, City, CityName, Good, Local, Market, MarketRole, Merchant, MoneyUtility, SimConfig,
    UtilityCurve,
};

// === TEST FIXTURES ===

/// A Local whose only stake is wood; every other market is neutral.
fn wood_holder(money: f64, owned: u32, belief: f64) -> Local {
    let params = MarketConfig {
        gossip_probability: 0.0,
        ..MarketConfig::default()
    };
    let utility = MoneyUtility::default();
    let markets = Good::ALL.map(|good| {
        let curve = UtilityCurve::new(10.0, 5.0);
        let market = Market::new(good, curve, &params).with_volatility(0.1);
        if good == Good::Wood {
            market.with_owned(owned).with_belief(belief)
        } else {
            market.with_belief(utility.value_to_price(money, curve.current_value(0)))
        }
    });
    Local::new(money, utility, markets)
}

/// Nothing is produced, crafted, or broken: Locals can only idle and trade.
fn trade_only(mut config: SimConfig) -> SimConfig {
    for profile in &mut config.economy.goods {
        profile.producible = false;
        profile.breakage_probability = 0.0;
    }
    config.economy.recipes.clear();
    config
}

fn tradable_totals(city: &City) -> Vec<u64> {
    let totals = city.population().total_goods();
    Good::tradable().map(|g| totals[g.index()]).collect()
}

// === MATCHING ===

#[test]
fn match_moves_beliefs_by_exactly_one_volatility() {
    let mut city = City::empty("riverwood", SimConfig::default(), 1).unwrap();
    let buyer = city.add_local(wood_holder(1000.0, 0, 5.0));
    let seller = city.add_local(wood_holder(1000.0, 10, 4.0));

    let pop = city.population_mut();
    assert_eq!(pop.local(buyer).unwrap().role(Good::Wood), MarketRole::Buyer);
    assert_eq!(pop.local(seller).unwrap().role(Good::Wood), MarketRole::Seller);

    for id in [buyer, seller] {
        pop.local_mut(id).unwrap().market_mut(Good::Wood).last_trade_age = 7;
    }
    assert!(pop.trade(AgentRef::Local(buyer), AgentRef::Local(seller), Good::Wood, 4.0));

    let b = pop.local(buyer).unwrap().market(Good::Wood);
    let s = pop.local(seller).unwrap().market(Good::Wood);
    assert_relative_eq!(b.belief(), 4.9, epsilon = 1e-12);
    assert_relative_eq!(s.belief(), 4.1, epsilon = 1e-12);
    assert_eq!((b.last_trade_age, s.last_trade_age), (0, 0));
    assert_eq!((b.owned, s.owned), (1, 9));
    assert_relative_eq!(pop.local(buyer).unwrap().money, 996.0);
    assert_relative_eq!(pop.local(seller).unwrap().money, 1004.0);
}

#[test]
fn unaffordable_match_changes_nothing() {
    let mut city = City::empty("riverwood", SimConfig::default(), 1).unwrap();
    let buyer = city.add_local(wood_holder(3.0, 0, 5.0));
    let seller = city.add_local(wood_holder(1000.0, 10, 4.0));

    let pop = city.population_mut();
    assert!(!pop.trade(AgentRef::Local(buyer), AgentRef::Local(seller), Good::Wood, 4.0));
    assert_eq!(pop.local(buyer).unwrap().owned(Good::Wood), 0);
    assert_eq!(pop.local(seller).unwrap().owned(Good::Wood), 10);
    assert_eq!(pop.local(buyer).unwrap().money, 3.0);
    assert_eq!(pop.tally().total_trades(), 0);
}

#[test]
fn long_run_never_goes_negative() {
    let config = SimConfig::default().with_locals(16).with_micro_steps(20);
    let mut city = City::with_seed("riverwood", config, 42).unwrap();
    for _ in 0..40 {
        let snapshot = city.step();
        for agent in snapshot.locals.iter().chain(&snapshot.merchants) {
            assert!(agent.money >= 0.0, "negative money: {}", agent.money);
        }
        for stats in &snapshot.goods {
            assert!(stats.min_belief >= 0.0);
            assert!(stats.min_belief <= stats.max_belief);
        }
    }
}

// === CONSERVATION ===

#[test]
fn trade_only_ticks_conserve_goods_and_money() {
    let config = trade_only(SimConfig::default().with_locals(12).with_micro_steps(25));
    let mut city = City::with_seed("riverwood", config, 7).unwrap();
    let money = city.population().total_money();
    let goods = tradable_totals(&city);

    for _ in 0..30 {
        city.step();
        assert_eq!(tradable_totals(&city), goods);
        assert_relative_eq!(city.population().total_money(), money, max_relative = 1e-9);
    }
    assert_eq!(city.link_stats().arrivals, 0);
}

#[test]
fn a_forced_trade_is_counted_once() {
    let config = SimConfig {
        local: econ_core::config::LocalConfig {
            activation_probability: 1.0,
            ..Default::default()
        },
        ..trade_only(SimConfig::default().with_micro_steps(1))
    };
    let mut city = City::empty("riverwood", config, 3).unwrap();
    let buyer = city.add_local(wood_holder(1000.0, 0, 5.0));
    let seller = city.add_local(wood_holder(1000.0, 10, 4.0));

    let snapshot = city.step();
    let wood = snapshot.good(Good::Wood).unwrap();
    assert_eq!(wood.trades, 1);
    assert_relative_eq!(wood.volume, 4.0);
    assert_eq!(city.population().local(buyer).unwrap().owned(Good::Wood), 1);
    assert_eq!(city.population().local(seller).unwrap().owned(Good::Wood), 9);
}

// === TAX ===

#[test]
fn arrival_tax_is_shared_equally() {
    let mut city = City::empty("winterhold", SimConfig::default(), 1).unwrap();
    let locals: Vec<_> = (0..4)
        .map(|_| city.add_local(wood_holder(1000.0, 0, 5.0)))
        .collect();

    let traveller =
        Merchant::new(CityName::new("riverwood"), &SimConfig::default().merchant).with_money(1500.0);
    let id = city.admit(traveller, &CityName::new("riverwood"));

    let pop = city.population();
    let merchant = pop.merchant(id).unwrap();
    assert_relative_eq!(merchant.money, 1450.0);
    assert_eq!(merchant.location, CityName::new("winterhold"));
    for local in locals {
        assert_relative_eq!(pop.local(local).unwrap().money, 1012.5);
    }
    assert_relative_eq!(city.link_stats().taxes_collected, 50.0);
    assert_eq!(city.link_stats().arrivals, 1);
}

#[test]
fn no_tax_below_threshold_or_without_locals() {
    let mut empty = City::empty("ghost", SimConfig::default(), 1).unwrap();
    let rich = Merchant::new(CityName::new("a"), &SimConfig::default().merchant).with_money(5000.0);
    let id = empty.admit(rich, &CityName::new("a"));
    assert_eq!(empty.population().merchant(id).unwrap().money, 5000.0);

    let mut city = City::empty("winterhold", SimConfig::default(), 1).unwrap();
    let local = city.add_local(wood_holder(1000.0, 0, 5.0));
    let modest = Merchant::new(CityName::new("a"), &SimConfig::default().merchant).with_money(1000.0);
    let id = city.admit(modest, &CityName::new("a"));
    assert_eq!(city.population().merchant(id).unwrap().money, 1000.0);
    assert_eq!(city.population().local(local).unwrap().money, 1000.0);
}
