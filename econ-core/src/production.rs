// Recipes and city specializations for the production side of a Local's decision

use serde::{Deserialize, Serialize};

use crate::config::GoodProfile;
use crate::types::{Good, Quantity};

// === RECIPE ===

/// Crafting formula: consume `inputs` to produce one unit of `output`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipe {
    pub output: Good,
    pub inputs: Vec<(Good, Quantity)>,
}

impl Recipe {
    pub fn new(output: Good) -> Self {
        Self {
            output,
            inputs: Vec::new(),
        }
    }

    pub fn with_input(mut self, good: Good, count: Quantity) -> Self {
        self.inputs.push((good, count));
        self
    }

    /// A recipe is only available when every input holding strictly exceeds its requirement.
    pub fn is_available(&self, owned: impl Fn(Good) -> Quantity) -> bool {
        self.inputs.iter().all(|&(good, count)| owned(good) > count)
    }
}

/// The chair and bed recipes of the default deployment.
pub fn default_recipes() -> Vec<Recipe> {
    vec![
        Recipe::new(Good::Chair).with_input(Good::Wood, 4),
        Recipe::new(Good::Bed)
            .with_input(Good::Wood, 2)
            .with_input(Good::Thread, 10),
    ]
}

// === SPECIALIZATION ===

/// Local advantage a city grants its Locals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Specialization {
    /// Producing `good` yields `units` per action instead of one.
    Yield { good: Good, units: Quantity },
    /// Crafting `output` uses these inputs instead of the recipe's.
    Materials {
        output: Good,
        inputs: Vec<(Good, Quantity)>,
    },
}

/// Resolved production rules for one city.
#[derive(Debug, Clone, Default)]
pub struct ProductionRules {
    raw: Vec<Good>,
    yields: [Quantity; Good::COUNT],
    breakage: [f64; Good::COUNT],
    recipes: Vec<Recipe>,
}

impl ProductionRules {
    pub fn new(
        goods: &[GoodProfile],
        recipes: &[Recipe],
        specializations: &[Specialization],
    ) -> Self {
        let mut raw: Vec<Good> = goods.iter().filter(|p| p.producible).map(|p| p.good).collect();
        raw.sort();
        raw.dedup();

        let mut breakage = [0.0; Good::COUNT];
        for profile in goods {
            breakage[profile.good.index()] = profile.breakage_probability;
        }

        let mut yields = [1; Good::COUNT];
        let mut recipes = recipes.to_vec();
        for spec in specializations {
            match spec {
                Specialization::Yield { good, units } => {
                    yields[good.index()] = (*units).max(1);
                }
                Specialization::Materials { output, inputs } => {
                    for recipe in recipes.iter_mut().filter(|r| r.output == *output) {
                        recipe.inputs = inputs.clone();
                    }
                }
            }
        }
        Self {
            raw,
            yields,
            breakage,
            recipes,
        }
    }

    /// Goods a Local can produce from nothing, in good order.
    pub fn raw_goods(&self) -> &[Good] {
        &self.raw
    }

    /// Units produced per production action.
    pub fn yield_of(&self, good: Good) -> Quantity {
        self.yields[good.index()]
    }

    pub fn breakage_of(&self, good: Good) -> f64 {
        self.breakage[good.index()]
    }

    pub fn recipes(&self) -> &[Recipe] {
        &self.recipes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::default_good_profiles;

    #[test]
    fn recipe_requires_strictly_more_than_inputs() {
        let chair = Recipe::new(Good::Chair).with_input(Good::Wood, 4);
        assert!(!chair.is_available(|_| 4));
        assert!(chair.is_available(|_| 5));
    }

    #[test]
    fn specializations_override_defaults() {
        let rules = ProductionRules::new(
            &default_good_profiles(),
            &default_recipes(),
            &[
                Specialization::Yield {
                    good: Good::Wood,
                    units: 2,
                },
                Specialization::Materials {
                    output: Good::Chair,
                    inputs: vec![(Good::Wood, 2)],
                },
            ],
        );
        assert_eq!(rules.yield_of(Good::Wood), 2);
        assert_eq!(rules.yield_of(Good::Thread), 1);
        let chair = rules
            .recipes()
            .iter()
            .find(|r| r.output == Good::Chair)
            .unwrap();
        assert_eq!(chair.inputs, vec![(Good::Wood, 2)]);
    }

    #[test]
    fn raw_goods_and_breakage_come_from_profiles() {
        let rules = ProductionRules::new(&default_good_profiles(), &default_recipes(), &[]);
        assert_eq!(rules.raw_goods(), &[Good::Wood, Good::Thread]);
        assert_eq!(rules.breakage_of(Good::Chair), 0.01);
        assert_eq!(rules.breakage_of(Good::Wood), 0.0);
    }
}
