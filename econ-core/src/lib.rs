// Decentralized price discovery between market towns.
//
// Module structure:
// - types        Goods, agent handles, city names
// - utility      Diminishing-returns value curves and money utility
// - market/      Per-good belief state machine and the in-city exchange
// - agents/      Locals (producer-consumers) and Merchants (arbitrageurs)
// - production   Recipes, raw goods, city specializations
// - city         One economy: population, links, tax, tick
// - scheduler    Steps several cities and wires in-process links
// - transport/   Links between cities (in-process queue or TCP)
// - stats        Per-tick snapshots and counters
// - config       Tunables, loadable from JSON
// - error        Error types

pub mod agents;
pub mod city;
pub mod config;
pub mod error;
pub mod market;
pub mod production;
pub mod scheduler;
pub mod stats;
pub mod transport;
pub mod types;
pub mod utility;

pub use agents::{Action, Deal, Local, Merchant, Routes, Trader};
pub use city::City;
pub use config::SimConfig;
pub use error::{ConfigError, LinkError, TransportError, WireError};
pub use market::{Market, MarketRole, Population, Side};
pub use scheduler::Scheduler;
pub use stats::{CitySnapshot, GoodStats, LinkStats};
pub use transport::{InboundLink, NetworkPort, OutboundLink, SendError};
pub use types::{AgentRef, CityName, Good, LocalId, MerchantId, Price, Quantity, Value};
pub use utility::{MoneyUtility, UtilityCurve};
