//! Subscription Registry
//!
//! In-memory set of active subscriptions with quota accounting. The registry
//! is a plain data structure; callers own the locking.

use std::collections::HashMap;

use super::SubscriptionKey;

/// Set of active subscriptions, remembered in registration order.
#[derive(Debug)]
pub struct SubscriptionRegistry {
    entries: HashMap<SubscriptionKey, u64>,
    next_seq: u64,
    limit: usize,
}

impl SubscriptionRegistry {
    /// Create an empty registry with the given quota ceiling.
    #[must_use]
    pub fn new(limit: usize) -> Self {
        Self {
            entries: HashMap::new(),
            next_seq: 0,
            limit,
        }
    }

    /// Quota ceiling.
    #[must_use]
    pub const fn limit(&self) -> usize {
        self.limit
    }

    /// Check whether a subscription is active.
    #[must_use]
    pub fn contains(&self, key: &SubscriptionKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Sum of weights of all active subscriptions.
    #[must_use]
    pub fn used_weight(&self) -> usize {
        self.entries.keys().map(SubscriptionKey::weight).sum()
    }

    /// Check whether adding `key` would push usage over the ceiling.
    #[must_use]
    pub fn would_exceed(&self, key: &SubscriptionKey) -> bool {
        self.used_weight() + key.weight() > self.limit
    }

    /// Add a subscription.
    ///
    /// Returns `false` if it was already active.
    pub fn insert(&mut self, key: SubscriptionKey) -> bool {
        if self.entries.contains_key(&key) {
            return false;
        }
        self.entries.insert(key, self.next_seq);
        self.next_seq += 1;
        true
    }

    /// Remove a subscription.
    ///
    /// Returns `false` if it was not active.
    pub fn remove(&mut self, key: &SubscriptionKey) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Active subscriptions in registration order.
    #[must_use]
    pub fn keys(&self) -> Vec<SubscriptionKey> {
        let mut ordered: Vec<_> = self.entries.iter().collect();
        ordered.sort_by_key(|(_, seq)| **seq);
        ordered.into_iter().map(|(key, _)| key.clone()).collect()
    }

    /// Number of active subscriptions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if no subscription is active.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn last_price(ids: &[&str]) -> SubscriptionKey {
        SubscriptionKey::LastPrice {
            instrument_ids: ids.iter().map(ToString::to_string).collect(),
        }
    }

    #[test]
    fn insert_is_idempotent() {
        let mut registry = SubscriptionRegistry::new(300);

        assert!(registry.insert(last_price(&["a"])));
        assert!(!registry.insert(last_price(&["a"])));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn remove_unknown_key_is_noop() {
        let mut registry = SubscriptionRegistry::new(300);
        registry.insert(last_price(&["a"]));

        assert!(!registry.remove(&last_price(&["b"])));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn keys_keep_registration_order() {
        let mut registry = SubscriptionRegistry::new(300);
        registry.insert(last_price(&["z"]));
        registry.insert(last_price(&["a"]));
        registry.insert(last_price(&["m"]));
        registry.remove(&last_price(&["a"]));
        registry.insert(last_price(&["a"]));

        assert_eq!(
            registry.keys(),
            vec![last_price(&["z"]), last_price(&["m"]), last_price(&["a"])]
        );
    }

    #[test]
    fn quota_accounts_weights() {
        let mut registry = SubscriptionRegistry::new(3);
        registry.insert(last_price(&["a", "b"]));
        registry.insert(SubscriptionKey::Info {
            instrument_ids: vec!["a".to_string(), "b".to_string()],
        });

        assert_eq!(registry.used_weight(), 2);
        assert!(!registry.would_exceed(&last_price(&["c"])));
        assert!(registry.would_exceed(&last_price(&["c", "d"])));
    }
}
