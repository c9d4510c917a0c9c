//! Property-based tests for the value model and the merchant wire record.

use approx::assert_relative_eq;
use proptest::prelude::*;

use econ_core::config::MerchantConfig;
use econ_core::transport::{decode_merchant, encode_merchant};
use econ_core::{CityName, Good, Merchant, MoneyUtility, UtilityCurve};

// === TEST FIXTURES ===

fn tradable_good() -> impl Strategy<Value = Good> {
    prop_oneof![
        Just(Good::Wood),
        Just(Good::Chair),
        Just(Good::Thread),
        Just(Good::Bed),
    ]
}

prop_compose! {
    fn any_merchant()(
        good in tradable_good(),
        money in 0.0f64..1e7,
        capacity in 1u32..100,
        fill in 0.0f64..=1.0,
        beliefs in prop::collection::vec(("[a-z]{1,8}", 0.0f64..1e4), 0..6),
    ) -> Merchant {
        let owned = (capacity as f64 * fill) as u32;
        let config = MerchantConfig { carrying_capacity: capacity, ..MerchantConfig::default() };
        let mut merchant = Merchant::new(CityName::new("home"), &config)
            .with_good(good)
            .with_money(money)
            .with_owned(owned);
        for (city, price) in beliefs {
            merchant = merchant.with_belief(good, CityName::new(city), price);
        }
        merchant
    }
}

// === VALUE MODEL ===

proptest! {
    #[test]
    fn personal_value_strictly_decreases(
        base in 0.1f64..1000.0,
        half in 0.5f64..100.0,
        q in 0u32..500,
    ) {
        let curve = UtilityCurve::new(base, half);
        prop_assert!(curve.personal_value(q) > curve.personal_value(q + 1));
        prop_assert!(curve.personal_value(q) > 0.0);
    }

    #[test]
    fn value_is_exactly_half_at_half_quantity(base in 0.1f64..1000.0, half in 1u32..1000) {
        let curve = UtilityCurve::new(base, half as f64);
        prop_assert_eq!(curve.personal_value(half), base / 2.0);
    }

    #[test]
    fn potential_is_the_next_unit(base in 0.1f64..1000.0, half in 0.5f64..100.0, owned in 0u32..200) {
        let curve = UtilityCurve::new(base, half);
        prop_assert_eq!(curve.potential_value(owned), curve.personal_value(owned + 1));
        prop_assert_eq!(curve.current_value(owned), curve.personal_value(owned));
    }

    #[test]
    fn money_conversion_inverts(money in 0.0f64..1e6, price in 0.0f64..1e4) {
        let utility = MoneyUtility::default();
        let back = utility.value_to_price(money, utility.price_to_value(money, price));
        assert_relative_eq!(back, price, epsilon = 1e-9, max_relative = 1e-12);
    }

    #[test]
    fn richer_agents_value_money_less(money in 0.0f64..1e6, extra in 1.0f64..1e6) {
        let utility = MoneyUtility::default();
        prop_assert!(utility.utility_per_dollar(money + extra) < utility.utility_per_dollar(money));
    }
}

// === WIRE RECORD ===

proptest! {
    #[test]
    fn merchant_record_survives_the_wire(merchant in any_merchant()) {
        let line = encode_merchant(&merchant).unwrap();
        prop_assert!(!line.contains('\n'));

        let there = CityName::new("elsewhere");
        let arrived = decode_merchant(&line, &there).unwrap();
        prop_assert_eq!(&arrived.location, &there);
        prop_assert_eq!(arrived.money, merchant.money);
        prop_assert_eq!(arrived.good, merchant.good);
        prop_assert_eq!(arrived.carrying_capacity, merchant.carrying_capacity);
        prop_assert_eq!(arrived.owned, merchant.owned);
        prop_assert_eq!(&arrived.expected, &merchant.expected);
    }
}
