//! # Subscription Registry
//!
//! Three views over the same set of subscriptions:
//!
//! 1. `by_id`: id to subscription plus its insertion sequence
//! 2. `by_event`: event type to subscriber ids, for candidate lookup
//! 3. `sorted`: priority order, rebuilt lazily after a mutation
//!
//! Every mutation updates all three before returning. `check_consistency`
//! verifies they agree.

use super::edge::{EdgeEvent, EdgeSubscription};
use crate::GraphError;
use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::OnceLock;

#[derive(Debug, Clone)]
struct Entry {
    seq: u64,
    subscription: EdgeSubscription,
}

#[derive(Debug, Clone, Default)]
pub struct EdgeSubscriptionRegistry {
    by_id: BTreeMap<String, Entry>,
    by_event: BTreeMap<String, BTreeSet<String>>,
    sorted: OnceLock<Vec<String>>,
    next_seq: u64,
}

impl EdgeSubscriptionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a subscription. Fails without side effects on a duplicate id.
    pub fn register(&mut self, subscription: EdgeSubscription) -> Result<(), GraphError> {
        if self.by_id.contains_key(subscription.id()) {
            return Err(GraphError::DuplicateSubscription(subscription.id().to_string()));
        }

        let id = subscription.id().to_string();
        for event_type in subscription.event_types() {
            self.by_event
                .entry(event_type.to_string())
                .or_default()
                .insert(id.clone());
        }

        tracing::debug!(
            subscription_id = %id,
            priority = subscription.priority(),
            "registered subscription"
        );

        let seq = self.next_seq;
        self.next_seq = self.next_seq.saturating_add(1);
        self.by_id.insert(id, Entry { seq, subscription });
        self.sorted = OnceLock::new();
        Ok(())
    }

    /// Remove a subscription from every index.
    pub fn unregister(&mut self, id: &str) -> Option<EdgeSubscription> {
        let entry = self.by_id.remove(id)?;
        for event_type in entry.subscription.event_types() {
            if let Some(ids) = self.by_event.get_mut(event_type) {
                ids.remove(id);
                if ids.is_empty() {
                    self.by_event.remove(event_type);
                }
            }
        }
        self.sorted = OnceLock::new();
        tracing::debug!(subscription_id = %id, "unregistered subscription");
        Some(entry.subscription)
    }

    /// Subscriptions matching `event`, highest priority first.
    ///
    /// Equal priorities keep registration order. Cost depends on the number
    /// of subscribers to the event type, not on the registry size.
    #[must_use]
    pub fn find_matching(&self, event: &EdgeEvent) -> Vec<&EdgeSubscription> {
        let Some(ids) = self.by_event.get(&event.event_type) else {
            return Vec::new();
        };

        let mut matched: Vec<&Entry> = ids
            .iter()
            .filter_map(|id| self.by_id.get(id))
            .filter(|entry| entry.subscription.matches(event))
            .collect();
        matched.sort_by_key(|entry| (Reverse(entry.subscription.priority()), entry.seq));

        tracing::trace!(
            event_type = %event.event_type,
            candidates = ids.len(),
            matched = matched.len(),
            "matched subscriptions"
        );

        matched.into_iter().map(|entry| &entry.subscription).collect()
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<&EdgeSubscription> {
        self.by_id.get(id).map(|entry| &entry.subscription)
    }

    /// Mutable access for metadata updates. Identity fields cannot change.
    pub fn get_mut(&mut self, id: &str) -> Option<&mut EdgeSubscription> {
        self.by_id.get_mut(id).map(|entry| &mut entry.subscription)
    }

    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.by_id.contains_key(id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// Subscribers to `event_type` in registration order.
    #[must_use]
    pub fn by_event_type(&self, event_type: &str) -> Vec<&EdgeSubscription> {
        let mut entries: Vec<&Entry> = self
            .by_event
            .get(event_type)
            .into_iter()
            .flatten()
            .filter_map(|id| self.by_id.get(id))
            .collect();
        entries.sort_by_key(|entry| entry.seq);
        entries.into_iter().map(|entry| &entry.subscription).collect()
    }

    /// All subscriptions, highest priority first.
    #[must_use]
    pub fn by_priority(&self) -> Vec<&EdgeSubscription> {
        self.sorted_ids()
            .iter()
            .filter_map(|id| self.get(id))
            .collect()
    }

    fn sorted_ids(&self) -> &[String] {
        self.sorted.get_or_init(|| {
            let mut entries: Vec<&Entry> = self.by_id.values().collect();
            entries.sort_by_key(|entry| (Reverse(entry.subscription.priority()), entry.seq));
            entries
                .into_iter()
                .map(|entry| entry.subscription.id().to_string())
                .collect()
        })
    }

    pub fn clear(&mut self) {
        self.by_id.clear();
        self.by_event.clear();
        self.sorted = OnceLock::new();
    }

    /// Verify that the id map, event index, and priority view agree.
    pub fn check_consistency(&self) -> Result<(), GraphError> {
        for (id, entry) in &self.by_id {
            if entry.subscription.id() != id.as_str() {
                return Err(GraphError::Consistency(format!(
                    "entry '{}' holds subscription '{}'",
                    id,
                    entry.subscription.id()
                )));
            }
            for event_type in entry.subscription.event_types() {
                let indexed = self
                    .by_event
                    .get(event_type)
                    .is_some_and(|ids| ids.contains(id));
                if !indexed {
                    return Err(GraphError::Consistency(format!(
                        "'{}' missing from event index '{}'",
                        id, event_type
                    )));
                }
            }
        }

        for (event_type, ids) in &self.by_event {
            if ids.is_empty() {
                return Err(GraphError::Consistency(format!(
                    "empty event index '{}'",
                    event_type
                )));
            }
            for id in ids {
                let subscribed = self.by_id.get(id).is_some_and(|entry| {
                    entry
                        .subscription
                        .event_types()
                        .any(|t| t == event_type.as_str())
                });
                if !subscribed {
                    return Err(GraphError::Consistency(format!(
                        "event index '{}' references '{}'",
                        event_type, id
                    )));
                }
            }
        }

        if let Some(sorted) = self.sorted.get() {
            let listed: BTreeSet<&str> = sorted.iter().map(String::as_str).collect();
            if sorted.len() != self.by_id.len()
                || listed.len() != sorted.len()
                || !listed.iter().all(|id| self.by_id.contains_key(*id))
            {
                return Err(GraphError::Consistency(
                    "priority view is stale".to_string(),
                ));
            }
        }

        Ok(())
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subscription::SubscriptionRecord;

    fn sub(id: &str, events: &[&str], priority: i64) -> EdgeSubscription {
        EdgeSubscription::from_record(
            SubscriptionRecord::new(id, events.iter().copied()).priority(priority),
        )
        .expect("valid subscription")
    }

    fn ids(subs: Vec<&EdgeSubscription>) -> Vec<&str> {
        subs.into_iter().map(|s| s.id()).collect()
    }

    #[test]
    fn priority_order_with_stable_ties() {
        let mut registry = EdgeSubscriptionRegistry::new();
        registry.register(sub("edge-sub-low", &["Foo"], 20)).expect("register");
        registry.register(sub("edge-sub-high", &["Foo"], 80)).expect("register");
        registry.register(sub("edge-sub-tie-b", &["Foo"], 50)).expect("register");
        registry.register(sub("edge-sub-tie-a", &["Foo"], 50)).expect("register");

        let matched = registry.find_matching(&EdgeEvent::new("Foo"));
        assert_eq!(
            ids(matched),
            vec!["edge-sub-high", "edge-sub-tie-b", "edge-sub-tie-a", "edge-sub-low"]
        );
    }

    #[test]
    fn duplicate_id_leaves_size_unchanged() {
        let mut registry = EdgeSubscriptionRegistry::new();
        registry.register(sub("edge-sub-a", &["Foo"], 50)).expect("register");

        let err = registry.register(sub("edge-sub-a", &["Bar"], 10));
        assert!(matches!(err, Err(GraphError::DuplicateSubscription(_))));
        assert_eq!(registry.len(), 1);
        assert!(registry.by_event_type("Bar").is_empty());
        registry.check_consistency().expect("consistent");
    }

    #[test]
    fn unregister_clears_every_index() {
        let mut registry = EdgeSubscriptionRegistry::new();
        registry.register(sub("edge-sub-a", &["Foo", "Bar"], 50)).expect("register");
        registry.register(sub("edge-sub-b", &["Foo"], 60)).expect("register");
        assert_eq!(registry.by_priority().len(), 2);

        let removed = registry.unregister("edge-sub-a").expect("removed");
        assert_eq!(removed.id(), "edge-sub-a");
        assert!(registry.unregister("edge-sub-a").is_none());

        assert_eq!(ids(registry.by_priority()), vec!["edge-sub-b"]);
        assert!(registry.find_matching(&EdgeEvent::new("Bar")).is_empty());
        assert_eq!(ids(registry.find_matching(&EdgeEvent::new("Foo"))), vec!["edge-sub-b"]);
        registry.check_consistency().expect("consistent");
    }

    #[test]
    fn filters_apply_after_candidate_lookup() {
        let mut registry = EdgeSubscriptionRegistry::new();
        registry
            .register(
                EdgeSubscription::from_record(
                    SubscriptionRecord::new("edge-sub-src", ["Linked"]).source("node-a"),
                )
                .expect("valid"),
            )
            .expect("register");
        registry.register(sub("edge-sub-any", &["Linked"], 10)).expect("register");

        let from_b = registry.find_matching(&EdgeEvent::new("Linked").with_source("node-b"));
        assert_eq!(ids(from_b), vec!["edge-sub-any"]);

        let from_a = registry.find_matching(&EdgeEvent::new("Linked").with_source("node-a"));
        assert_eq!(ids(from_a), vec!["edge-sub-src", "edge-sub-any"]);
    }

    #[test]
    fn metadata_updates_through_registry() {
        let mut registry = EdgeSubscriptionRegistry::new();
        registry.register(sub("edge-sub-a", &["Foo"], 50)).expect("register");

        let entry = registry.get_mut("edge-sub-a").expect("present");
        assert!(entry.add_tag("ui"));
        assert_eq!(registry.get("edge-sub-a").map(|s| s.metadata().tags.len()), Some(1));
    }

    #[test]
    fn clear_resets_everything() {
        let mut registry = EdgeSubscriptionRegistry::new();
        registry.register(sub("edge-sub-a", &["Foo"], 50)).expect("register");
        let _ = registry.by_priority();
        registry.clear();

        assert!(registry.is_empty());
        assert!(registry.by_priority().is_empty());
        registry.check_consistency().expect("consistent");
    }
}
