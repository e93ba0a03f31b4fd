//! Property tests for cart arithmetic and intent limits.

use ap2_mandate::{CartItem, CartMandate, IntentMandate, ReceivingAgent};
use chrono::{Duration, Utc};
use proptest::prelude::*;
use rust_decimal::Decimal;

fn empty_cart() -> CartMandate {
    CartMandate::builder()
        .id("cart-p")
        .requesting_agent("agent")
        .merchant("merchant")
        .parent_intent("intent-p")
        .currency("USD")
        .expires_at(Utc::now() + Duration::hours(1))
        .build()
        .unwrap()
}

fn item_strategy() -> impl Strategy<Value = (i64, u32)> {
    (0i64..10_000_000, 1u32..1000)
}

proptest! {
    #[test]
    fn test_add_remove_restores_total(
        existing in prop::collection::vec(item_strategy(), 0..8),
        (cents, quantity) in item_strategy(),
    ) {
        let mut cart = empty_cart();
        for (i, (c, q)) in existing.iter().enumerate() {
            cart.add_item(CartItem::new(format!("sku-{i}"), "x", Decimal::new(*c, 2), *q).unwrap())
                .unwrap();
        }
        let before = cart.amount();

        cart.add_item(CartItem::new("extra", "y", Decimal::new(cents, 2), quantity).unwrap())
            .unwrap();
        prop_assert_eq!(
            cart.amount(),
            before + Decimal::new(cents, 2) * Decimal::from(quantity)
        );

        cart.remove_item("extra").unwrap();
        prop_assert_eq!(cart.amount(), before);
        prop_assert_eq!(cart.amount().to_string(), before.to_string());
    }

    #[test]
    fn test_amount_over_limit_never_permitted(
        limit_cents in 0i64..100_000_000,
        excess_cents in 1i64..100_000,
    ) {
        let intent = IntentMandate::builder()
            .id("intent-p")
            .requesting_agent("agent")
            .receiving_agent(ReceivingAgent::Unrestricted)
            .max_amount_per_payment(Decimal::new(limit_cents, 2))
            .build()
            .unwrap();

        let over = Decimal::new(limit_cents + excess_cents, 2);
        prop_assert!(!intent.permits("merchant", over, None));
        prop_assert!(intent.permits("merchant", Decimal::new(limit_cents, 2), None));
    }
}
