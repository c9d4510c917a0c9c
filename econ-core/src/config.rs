// Simulation configuration
//
// Every knob has a default matching the reference deployment, so an empty JSON
// object is a valid config.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::production::{Recipe, Specialization, default_recipes};
use crate::types::{Good, Price, Quantity};
use crate::utility::MoneyUtility;

// ============================================================================
// Goods
// ============================================================================

/// How a good's curve and starting holdings are drawn for each new Local.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoodProfile {
    pub good: Good,
    /// Starting holdings are uniform in `0..initial_owned_max` (zero when 0).
    pub initial_owned_max: Quantity,
    pub base_value_min: f64,
    pub base_value_max: f64,
    pub half_value_quantity: f64,
    /// Whether a Local can produce it from nothing.
    #[serde(default)]
    pub producible: bool,
    /// Chance per activation of losing one held unit.
    #[serde(default)]
    pub breakage_probability: f64,
}

impl GoodProfile {
    fn new(good: Good, initial_owned_max: Quantity, base: (f64, f64), half: f64) -> Self {
        Self {
            good,
            initial_owned_max,
            base_value_min: base.0,
            base_value_max: base.1,
            half_value_quantity: half,
            producible: false,
            breakage_probability: 0.0,
        }
    }

    fn producible(mut self) -> Self {
        self.producible = true;
        self
    }

    fn breaks(mut self, probability: f64) -> Self {
        self.breakage_probability = probability;
        self
    }
}

pub fn default_good_profiles() -> Vec<GoodProfile> {
    vec![
        GoodProfile::new(Good::Wood, 20, (4.0, 8.0), 15.0).producible(),
        GoodProfile::new(Good::Chair, 10, (30.0, 50.0), 5.0).breaks(0.01),
        GoodProfile::new(Good::Thread, 30, (2.0, 4.0), 50.0).producible(),
        GoodProfile::new(Good::Bed, 2, (50.0, 60.0), 2.0).breaks(0.01),
        GoodProfile::new(Good::Leisure, 0, (2.0, 6.0), 50.0),
    ]
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EconomyConfig {
    pub money_utility: MoneyUtility,
    pub goods: Vec<GoodProfile>,
    pub recipes: Vec<Recipe>,
}

impl Default for EconomyConfig {
    fn default() -> Self {
        Self {
            money_utility: MoneyUtility::default(),
            goods: default_good_profiles(),
            recipes: default_recipes(),
        }
    }
}

impl EconomyConfig {
    pub fn profile(&self, good: Good) -> Option<&GoodProfile> {
        self.goods.iter().find(|p| p.good == good)
    }
}

// ============================================================================
// Agents
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketConfig {
    /// Activations without a trade before the belief drifts toward a deal.
    pub max_idle_age: u32,
    pub gossip_probability: f64,
    /// Belief step is `base_value / volatility_divisor`.
    pub volatility_divisor: f64,
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            max_idle_age: 10,
            gossip_probability: 0.01,
            volatility_divisor: 50.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalConfig {
    pub starting_money: Price,
    /// Chance a Local acts in a given micro-step.
    pub activation_probability: f64,
    /// Ramp production in over this many ticks (0 disables the ramp).
    pub production_warmup_ticks: u64,
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            starting_money: 1000.0,
            activation_probability: 0.1,
            production_warmup_ticks: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MerchantConfig {
    pub starting_money: Price,
    pub carrying_capacity: Quantity,
    pub activation_probability: f64,
    /// Chance per activation of wandering off through a random link.
    pub relocation_probability: f64,
    /// Friction charged by the best-deal search for any move.
    pub moving_cost: Price,
    /// Weight of the old belief when smoothing in an observation.
    pub belief_retention: f64,
    pub initial_good: Good,
}

impl Default for MerchantConfig {
    fn default() -> Self {
        Self {
            starting_money: 1000.0,
            carrying_capacity: 20,
            activation_probability: 0.1,
            relocation_probability: 0.01,
            moving_cost: 1.0,
            belief_retention: 0.9,
            initial_good: Good::Chair,
        }
    }
}

// ============================================================================
// City
// ============================================================================

/// Progressive tax on rich arrivals, shared out among the Locals.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaxConfig {
    pub threshold: Price,
    pub rate: f64,
}

impl Default for TaxConfig {
    fn default() -> Self {
        Self {
            threshold: 1000.0,
            rate: 0.1,
        }
    }
}

impl TaxConfig {
    /// Tax owed on arrival with `money`.
    pub fn levy(&self, money: Price) -> Price {
        if money > self.threshold {
            (money - self.threshold) * self.rate
        } else {
            0.0
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CityConfig {
    pub locals: usize,
    /// Defaults to a quarter of the Locals.
    pub merchants: Option<usize>,
    pub micro_steps: u32,
    pub tax: TaxConfig,
    pub specializations: Vec<Specialization>,
}

impl Default for CityConfig {
    fn default() -> Self {
        Self {
            locals: 20,
            merchants: None,
            micro_steps: 100,
            tax: TaxConfig::default(),
            specializations: Vec::new(),
        }
    }
}

impl CityConfig {
    pub fn merchant_count(&self) -> usize {
        self.merchants.unwrap_or(self.locals / 4)
    }
}

// ============================================================================
// Transport
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Bounded queue size of every link, in merchants.
    pub queue_capacity: usize,
    pub connect_timeout_ms: u64,
    pub handshake_timeout_ms: u64,
    /// Longest accepted line on the wire.
    pub max_record_bytes: usize,
    /// Extra ports tried after the requested one is taken.
    pub port_search_span: u16,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 100,
            connect_timeout_ms: 5_000,
            handshake_timeout_ms: 5_000,
            max_record_bytes: 64 * 1024,
            port_search_span: 16,
        }
    }
}

impl TransportConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }
}

// ============================================================================
// Root
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    pub economy: EconomyConfig,
    pub market: MarketConfig,
    pub local: LocalConfig,
    pub merchant: MerchantConfig,
    pub city: CityConfig,
    pub transport: TransportConfig,
}

impl SimConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn with_locals(mut self, locals: usize) -> Self {
        self.city.locals = locals;
        self
    }

    pub fn with_merchants(mut self, merchants: usize) -> Self {
        self.city.merchants = Some(merchants);
        self
    }

    pub fn with_micro_steps(mut self, micro_steps: u32) -> Self {
        self.city.micro_steps = micro_steps;
        self
    }

    /// Reject values that would make the tick panic or loop forever.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let probabilities = [
            ("market.gossip_probability", self.market.gossip_probability),
            ("local.activation_probability", self.local.activation_probability),
            ("merchant.activation_probability", self.merchant.activation_probability),
            ("merchant.relocation_probability", self.merchant.relocation_probability),
            ("merchant.belief_retention", self.merchant.belief_retention),
            ("city.tax.rate", self.city.tax.rate),
        ];
        for (field, p) in probabilities {
            if !(0.0..=1.0).contains(&p) {
                return Err(invalid(field, format!("{p} is outside [0, 1]")));
            }
        }

        for profile in &self.economy.goods {
            if !(0.0..=1.0).contains(&profile.breakage_probability) {
                return Err(invalid(
                    "economy.goods.breakage_probability",
                    format!("{} for {}", profile.breakage_probability, profile.good),
                ));
            }
            if profile.half_value_quantity <= 0.0 {
                return Err(invalid(
                    "economy.goods.half_value_quantity",
                    format!("must be positive for {}", profile.good),
                ));
            }
            if profile.base_value_min <= 0.0 || profile.base_value_max < profile.base_value_min {
                return Err(invalid(
                    "economy.goods.base_value",
                    format!("bad range for {}", profile.good),
                ));
            }
        }
        for good in Good::all() {
            if self.economy.profile(good).is_none() {
                return Err(invalid("economy.goods", format!("missing profile for {good}")));
            }
        }

        if self.market.volatility_divisor <= 0.0 {
            return Err(invalid("market.volatility_divisor", "must be positive".into()));
        }
        if self.economy.money_utility.scale <= 0.0 {
            return Err(invalid("economy.money_utility.scale", "must be positive".into()));
        }
        if self.city.micro_steps == 0 {
            return Err(invalid("city.micro_steps", "must be at least 1".into()));
        }
        if self.transport.queue_capacity == 0 {
            return Err(invalid("transport.queue_capacity", "must be at least 1".into()));
        }
        if self.merchant.carrying_capacity == 0 {
            return Err(invalid("merchant.carrying_capacity", "must be at least 1".into()));
        }
        Ok(())
    }
}

fn invalid(field: &'static str, reason: String) -> ConfigError {
    ConfigError::Invalid { field, reason }
}
