// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Registered policy observers.
//!
//! Guarded by its own lock, separate from the engine state, and delivered
//! from a snapshot so a slow observer never holds up registration or policy
//! writes.

use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::error::{NetPolicyError, Result};
use crate::domain::events::PolicyNotification;
use crate::domain::observer::PolicyObserver;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(Uuid);

impl ObserverId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for ObserverId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ObserverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

type Entry = (ObserverId, Arc<dyn PolicyObserver>);

pub struct ObserverRegistry {
    observers: RwLock<Vec<Entry>>,
    max_registered: usize,
}

impl ObserverRegistry {
    pub fn new(max_registered: usize) -> Self {
        Self {
            observers: RwLock::new(Vec::new()),
            max_registered,
        }
    }

    pub fn register(&self, observer: Arc<dyn PolicyObserver>) -> Result<ObserverId> {
        let mut observers = self.observers.write();
        if observers.iter().any(|(_, existing)| same_observer(existing, &observer)) {
            warn!("Observer registered twice");
            return Err(NetPolicyError::ObserverAlreadyRegistered);
        }
        if observers.len() >= self.max_registered {
            warn!(limit = self.max_registered, "Observer capacity reached");
            return Err(NetPolicyError::CapacityExceeded {
                what: "observer",
                limit: self.max_registered,
            });
        }
        let id = ObserverId::new();
        observers.push((id, observer));
        info!(observer_id = %id, total = observers.len(), "Observer registered");
        Ok(id)
    }

    /// Returns false if `id` was not registered.
    pub fn unregister(&self, id: ObserverId) -> bool {
        let mut observers = self.observers.write();
        let before = observers.len();
        observers.retain(|(existing, _)| *existing != id);
        let removed = observers.len() != before;
        if removed {
            info!(observer_id = %id, "Observer unregistered");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.observers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.read().is_empty()
    }

    /// Deliver each notification to every observer, in order.
    pub fn notify(&self, notifications: &[PolicyNotification]) {
        if notifications.is_empty() {
            return;
        }
        let snapshot: Vec<Arc<dyn PolicyObserver>> =
            self.observers.read().iter().map(|(_, observer)| observer.clone()).collect();
        debug!(
            notifications = notifications.len(),
            observers = snapshot.len(),
            "Delivering policy notifications"
        );
        for notification in notifications {
            for observer in &snapshot {
                notification.deliver_to(observer.as_ref());
            }
        }
    }
}

fn same_observer(a: &Arc<dyn PolicyObserver>, b: &Arc<dyn PolicyObserver>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::uid_policy::{NetUidRule, Uid};
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder {
        rules: Mutex<Vec<(Uid, NetUidRule)>>,
    }

    impl PolicyObserver for Recorder {
        fn on_uid_rule_changed(&self, uid: Uid, rule: NetUidRule) {
            self.rules.lock().push((uid, rule));
        }
    }

    #[test]
    fn test_register_rejects_duplicates_and_enforces_cap() {
        let registry = ObserverRegistry::new(2);
        let first: Arc<dyn PolicyObserver> = Arc::new(Recorder::default());
        registry.register(first.clone()).unwrap();
        assert!(matches!(
            registry.register(first),
            Err(NetPolicyError::ObserverAlreadyRegistered)
        ));

        registry.register(Arc::new(Recorder::default())).unwrap();
        assert!(matches!(
            registry.register(Arc::new(Recorder::default())),
            Err(NetPolicyError::CapacityExceeded { limit: 2, .. })
        ));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_notify_and_unregister() {
        let registry = ObserverRegistry::new(200);
        let recorder = Arc::new(Recorder::default());
        let id = registry.register(recorder.clone()).unwrap();

        let notifications = vec![PolicyNotification::UidRuleChanged {
            uid: 5,
            rule: NetUidRule::RejectAll,
        }];
        registry.notify(&notifications);
        assert_eq!(*recorder.rules.lock(), vec![(5, NetUidRule::RejectAll)]);

        assert!(registry.unregister(id));
        assert!(!registry.unregister(id));
        registry.notify(&notifications);
        assert_eq!(recorder.rules.lock().len(), 1);
        assert!(registry.is_empty());
    }
}
