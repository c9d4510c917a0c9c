// Per-tick observation of a city, handed out read-only to whoever drives the
// simulation (plots, logs, tests).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::market::Population;
use crate::types::{CityName, Good, Price, Quantity};

// ============================================================================
// Counters
// ============================================================================

/// Trades settled since the last snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TradeTally {
    pub trades: [u64; Good::COUNT],
    pub volume: [Price; Good::COUNT],
}

impl TradeTally {
    pub fn record(&mut self, good: Good, price: Price) {
        self.trades[good.index()] += 1;
        self.volume[good.index()] += price;
    }

    pub fn total_trades(&self) -> u64 {
        self.trades.iter().sum()
    }
}

/// Migration counters, cumulative over the city's life.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LinkStats {
    pub arrivals: u64,
    pub departures: u64,
    /// Relocations refused by a full or closed link.
    pub refused: u64,
    /// Merchants handed back by a dropped network link.
    pub returned: u64,
    pub taxes_collected: Price,
    pub open_outbound: usize,
    pub open_inbound: usize,
}

// ============================================================================
// Snapshot
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoodStats {
    pub good: Good,
    pub min_belief: Price,
    pub max_belief: Price,
    pub mean_belief: Price,
    pub trades: u64,
    pub volume: Price,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentHoldings {
    pub money: Price,
    pub holdings: [Quantity; Good::COUNT],
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CitySnapshot {
    pub city: CityName,
    pub tick: u64,
    /// Belief spread over the Locals, one entry per tradable good.
    pub goods: Vec<GoodStats>,
    pub locals: Vec<AgentHoldings>,
    pub merchants: Vec<AgentHoldings>,
    pub merchants_by_good: BTreeMap<Good, usize>,
    /// `(leisure, money)` for every Local.
    pub leisure_vs_wealth: Vec<(Quantity, Price)>,
    pub links: LinkStats,
}

impl CitySnapshot {
    pub fn capture(
        city: &CityName,
        tick: u64,
        population: &Population,
        tally: &TradeTally,
        links: LinkStats,
    ) -> Self {
        let goods = Good::tradable()
            .map(|good| {
                let beliefs: Vec<Price> = population
                    .locals()
                    .map(|(_, local)| local.market(good).belief())
                    .collect();
                let (min_belief, max_belief, mean_belief) = if beliefs.is_empty() {
                    (0.0, 0.0, 0.0)
                } else {
                    let min = beliefs.iter().copied().fold(f64::INFINITY, f64::min);
                    let max = beliefs.iter().copied().fold(f64::NEG_INFINITY, f64::max);
                    let mean = beliefs.iter().sum::<f64>() / beliefs.len() as f64;
                    (min, max, mean)
                };
                GoodStats {
                    good,
                    min_belief,
                    max_belief,
                    mean_belief,
                    trades: tally.trades[good.index()],
                    volume: tally.volume[good.index()],
                }
            })
            .collect();

        let locals = population
            .locals()
            .map(|(_, local)| AgentHoldings {
                money: local.money,
                holdings: local.holdings(),
            })
            .collect();

        let mut merchants_by_good = BTreeMap::new();
        let merchants = population
            .merchants()
            .map(|(_, merchant)| {
                *merchants_by_good.entry(merchant.good).or_insert(0) += 1;
                let mut holdings = [0; Good::COUNT];
                holdings[merchant.good.index()] = merchant.owned;
                AgentHoldings {
                    money: merchant.money,
                    holdings,
                }
            })
            .collect();

        let leisure_vs_wealth = population
            .locals()
            .map(|(_, local)| (local.owned(Good::Leisure), local.money))
            .collect();

        Self {
            city: city.clone(),
            tick,
            goods,
            locals,
            merchants,
            merchants_by_good,
            leisure_vs_wealth,
            links,
        }
    }

    pub fn good(&self, good: Good) -> Option<&GoodStats> {
        self.goods.iter().find(|s| s.good == good)
    }

    pub fn total_money(&self) -> Price {
        self.locals
            .iter()
            .chain(&self.merchants)
            .map(|a| a.money)
            .sum()
    }
}
