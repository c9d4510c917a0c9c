pub mod local;
pub mod merchant;

pub use local::*;
pub use merchant::*;

use crate::market::Side;
use crate::types::{Good, Price};

/// What every agent in a city exposes to gossip and matching.
///
/// Hot loops dispatch on [`AgentRef`](crate::types::AgentRef) rather than
/// through trait objects; the trait keeps both agent kinds honest about the
/// same contract.
pub trait Trader {
    fn money(&self) -> Price;

    /// Price this agent would sell one unit of `good` for right now, if any.
    fn asking_price(&self, good: Good, routes: &Routes) -> Option<Price>;

    /// Belief shared when someone gossips with this agent.
    fn quoted_belief(&self, good: Good) -> Option<Price>;

    /// Apply one side of a trade. Returns false if this agent cannot honor it.
    fn settle(&mut self, good: Good, side: Side, price: Price) -> bool;
}
