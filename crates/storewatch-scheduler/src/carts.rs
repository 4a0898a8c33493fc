//! Abandoned cart lifecycle: snapshot, recover, look up by token.

use std::sync::Arc;

use rand::RngCore;
use rand::rngs::OsRng;
use storewatch_core::error::{Result, StoreWatchError};
use storewatch_core::traits::Clock;
use storewatch_core::types::{AbandonedCart, CartItem, CustomerIdentity};

use crate::persistence::EngineDb;

/// Tracks carts from the storefront until they turn into an order or expire.
pub struct CartLifecycleTracker {
    db: Arc<EngineDb>,
    clock: Arc<dyn Clock>,
}

impl CartLifecycleTracker {
    pub fn new(db: Arc<EngineDb>, clock: Arc<dyn Clock>) -> Self {
        Self { db, clock }
    }

    /// Record (or refresh) the customer's active cart snapshot.
    pub fn track_cart(
        &self,
        identity: &CustomerIdentity,
        items: &[CartItem],
        total: f64,
    ) -> Result<AbandonedCart> {
        let email = normalize_email(&identity.email)?;
        validate_snapshot(items, total)?;

        let identity = CustomerIdentity {
            email,
            name: identity
                .name
                .as_deref()
                .map(str::trim)
                .filter(|n| !n.is_empty())
                .map(String::from),
            user_id: identity.user_id.clone(),
        };

        let cart = self.db.upsert_active_cart(
            &identity,
            items,
            total,
            &new_recovery_token(),
            self.clock.now(),
        )?;
        tracing::debug!(
            "🛒 Cart tracked for {} ({} items, total {:.2})",
            cart.user_email,
            cart.items.len(),
            cart.total
        );
        Ok(cart)
    }

    /// Close every active cart for `email` after an order. Never fails the
    /// caller: problems are logged.
    pub fn mark_recovered(&self, email: &str, order_id: &str) {
        let email = email.trim().to_lowercase();
        match self
            .db
            .close_active_carts(&email, order_id, self.clock.now())
        {
            Ok(0) => {}
            Ok(1) => tracing::info!("✅ Cart recovered for {email} (order {order_id})"),
            Ok(n) => tracing::warn!(
                "{}",
                StoreWatchError::ConcurrencyAnomaly(format!(
                    "{n} active carts closed for {email} (order {order_id})"
                ))
            ),
            Err(e) => tracing::error!("Failed to mark cart recovered for {email}: {e}"),
        }
    }

    /// Resolve a recovery link to its cart, whatever its status.
    pub fn find_by_recovery_token(&self, token: &str) -> Result<AbandonedCart> {
        let token = token.trim();
        if token.is_empty() {
            return Err(StoreWatchError::Validation("empty recovery token".into()));
        }
        self.db
            .get_cart_by_token(token)?
            .ok_or_else(|| StoreWatchError::NotFound("recovery token".into()))
    }
}

/// 256 bits from the OS CSPRNG, hex encoded.
pub fn new_recovery_token() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

fn normalize_email(raw: &str) -> Result<String> {
    let email = raw.trim().to_lowercase();
    let plausible = match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !domain.contains('@')
                && !email.contains(char::is_whitespace)
        }
        None => false,
    };
    if plausible {
        Ok(email)
    } else {
        Err(StoreWatchError::Validation(format!("invalid email: '{raw}'")))
    }
}

fn validate_snapshot(items: &[CartItem], total: f64) -> Result<()> {
    if !total.is_finite() || total < 0.0 {
        return Err(StoreWatchError::Validation(format!("invalid cart total: {total}")));
    }
    for item in items {
        if item.product_id.trim().is_empty() {
            return Err(StoreWatchError::Validation("cart item without product id".into()));
        }
        if item.quantity == 0 {
            return Err(StoreWatchError::Validation(format!(
                "cart item {} has zero quantity",
                item.product_id
            )));
        }
        if !item.price.is_finite() || item.price < 0.0 {
            return Err(StoreWatchError::Validation(format!(
                "cart item {} has invalid price",
                item.product_id
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::tests::t0;
    use chrono::Duration;
    use storewatch_core::traits::ManualClock;
    use storewatch_core::types::CartStatus;

    fn setup() -> (CartLifecycleTracker, Arc<EngineDb>, Arc<ManualClock>) {
        let db = Arc::new(EngineDb::open_in_memory().unwrap());
        let clock = Arc::new(ManualClock::new(t0()));
        (CartLifecycleTracker::new(db.clone(), clock.clone()), db, clock)
    }

    fn items() -> Vec<CartItem> {
        vec![CartItem {
            product_id: "p1".into(),
            name: "Monitor".into(),
            image: None,
            quantity: 2,
            price: 25_000.0,
        }]
    }

    #[test]
    fn test_track_cart_is_idempotent_per_email() {
        let (tracker, db, clock) = setup();
        let who = CustomerIdentity {
            email: "Alice@Example.com ".into(),
            name: Some("Alice".into()),
            user_id: None,
        };

        let first = tracker.track_cart(&who, &items(), 50_000.0).unwrap();
        clock.advance(Duration::minutes(10));
        let second = tracker.track_cart(&who, &items()[..0], 0.0).unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(first.recovery_token, second.recovery_token);
        assert_eq!(second.user_email, "alice@example.com");
        assert_eq!(second.abandoned_at, t0() + Duration::minutes(10));
        assert_eq!(second.total, 0.0);
        assert_eq!(db.carts_for_email("alice@example.com").unwrap().len(), 1);
    }

    #[test]
    fn test_track_cart_validation() {
        let (tracker, _, _) = setup();
        let who = CustomerIdentity::guest("alice@example.com");

        for bad in ["", "alice", "alice@", "@example.com", "a b@example.com", "a@b"] {
            let err = tracker
                .track_cart(&CustomerIdentity::guest(bad), &items(), 1.0)
                .unwrap_err();
            assert_eq!(err.kind(), "validation", "{bad}");
        }
        assert!(tracker.track_cart(&who, &items(), -1.0).is_err());
        assert!(tracker.track_cart(&who, &items(), f64::NAN).is_err());

        let mut zero = items();
        zero[0].quantity = 0;
        assert!(tracker.track_cart(&who, &zero, 1.0).is_err());
    }

    #[test]
    fn test_mark_recovered_then_new_cart() {
        let (tracker, db, _) = setup();
        let who = CustomerIdentity::guest("bob@example.com");
        let old = tracker.track_cart(&who, &items(), 50_000.0).unwrap();

        tracker.mark_recovered("BOB@example.com", "order-77");
        let closed = db.get_cart(&old.id).unwrap().unwrap();
        assert_eq!(closed.status, CartStatus::Recovered);
        assert_eq!(closed.recovered_order_id.as_deref(), Some("order-77"));
        assert_eq!(closed.recovered_at, Some(t0()));

        let fresh = tracker.track_cart(&who, &items(), 50_000.0).unwrap();
        assert_ne!(fresh.id, old.id);
        assert_ne!(fresh.recovery_token, old.recovery_token);

        // No active cart: nothing happens, nothing fails.
        tracker.mark_recovered("nobody@example.com", "order-78");
    }

    #[test]
    fn test_find_by_recovery_token() {
        let (tracker, _, _) = setup();
        let cart = tracker
            .track_cart(&CustomerIdentity::guest("c@example.com"), &items(), 1.0)
            .unwrap();
        assert_eq!(
            tracker.find_by_recovery_token(&cart.recovery_token).unwrap().id,
            cart.id
        );
        assert_eq!(
            tracker.find_by_recovery_token("nope").unwrap_err().kind(),
            "not_found"
        );
        assert_eq!(tracker.find_by_recovery_token("  ").unwrap_err().kind(), "validation");
    }

    #[test]
    fn test_recovery_token_shape() {
        let a = new_recovery_token();
        let b = new_recovery_token();
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(a, a.to_lowercase());
        assert_eq!(hex::decode(&a).unwrap().len(), 32);
        assert_ne!(a, b);
    }
}
