// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Policy Event Bus - Fan-out relay between policy engines
//
// Single-threaded: the owning core pulls envelopes one at a time and hands
// each to every registered engine except the sender. Events published while
// an envelope is being delivered queue behind it, so delivery is FIFO in
// publish order. Delayed events wait in one queue per delay class and are
// only ordered relative to their own class.

use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::domain::events::PolicyEvent;

/// Registered participants. `System` publishes external triggers and never
/// receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CoreKind {
    RuleEngine,
    Firewall,
    Quota,
    System,
}

impl fmt::Display for CoreKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CoreKind::RuleEngine => "rule_engine",
            CoreKind::Firewall => "firewall",
            CoreKind::Quota => "quota",
            CoreKind::System => "system",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub sender: CoreKind,
    pub event: PolicyEvent,
}

#[derive(Debug)]
struct DelayedEnvelope {
    due: Instant,
    envelope: Envelope,
}

#[derive(Debug, Default)]
pub struct PolicyEventBus {
    subscribers: Vec<CoreKind>,
    pending: VecDeque<Envelope>,
    delayed: BTreeMap<Duration, VecDeque<DelayedEnvelope>>,
}

impl PolicyEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a subscriber. Registration order is delivery order.
    pub fn register(&mut self, kind: CoreKind) -> bool {
        if kind == CoreKind::System {
            warn!("System cannot subscribe to the policy event bus");
            return false;
        }
        if self.subscribers.contains(&kind) {
            return false;
        }
        self.subscribers.push(kind);
        true
    }

    pub fn subscribers(&self) -> &[CoreKind] {
        &self.subscribers
    }

    pub fn publish(&mut self, sender: CoreKind, event: PolicyEvent) {
        debug!(sender = %sender, event = event.kind(), "Publishing policy event");
        self.pending.push_back(Envelope { sender, event });
    }

    /// Hold `event` back until `delay` has elapsed from `now`.
    pub fn publish_delayed(&mut self, sender: CoreKind, event: PolicyEvent, delay: Duration, now: Instant) {
        debug!(sender = %sender, event = event.kind(), delay_ms = delay.as_millis() as u64, "Scheduling policy event");
        self.delayed.entry(delay).or_default().push_back(DelayedEnvelope {
            due: now + delay,
            envelope: Envelope { sender, event },
        });
    }

    /// Move every delayed event that is due into the pending queue.
    ///
    /// Classes are drained in ascending delay order; within a class the head
    /// blocks anything queued behind it.
    pub fn release_due(&mut self, now: Instant) -> usize {
        let mut released = 0;
        for queue in self.delayed.values_mut() {
            while queue.front().is_some_and(|head| head.due <= now) {
                if let Some(head) = queue.pop_front() {
                    self.pending.push_back(head.envelope);
                    released += 1;
                }
            }
        }
        self.delayed.retain(|_, queue| !queue.is_empty());
        released
    }

    /// Earliest instant a delayed event becomes due.
    pub fn next_due(&self) -> Option<Instant> {
        self.delayed.values().filter_map(|queue| queue.front()).map(|head| head.due).min()
    }

    pub fn has_delayed(&self) -> bool {
        !self.delayed.is_empty()
    }

    pub fn pop(&mut self) -> Option<Envelope> {
        self.pending.pop_front()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Subscribers that receive an event from `sender`, in registration order.
    pub fn recipients(&self, sender: CoreKind) -> Vec<CoreKind> {
        self.subscribers.iter().copied().filter(|kind| *kind != sender).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bus() -> PolicyEventBus {
        let mut bus = PolicyEventBus::new();
        bus.register(CoreKind::RuleEngine);
        bus.register(CoreKind::Firewall);
        bus.register(CoreKind::Quota);
        bus
    }

    #[test]
    fn test_recipients_skip_sender_and_keep_order() {
        let bus = bus();
        assert_eq!(bus.recipients(CoreKind::Firewall), vec![CoreKind::RuleEngine, CoreKind::Quota]);
        assert_eq!(
            bus.recipients(CoreKind::System),
            vec![CoreKind::RuleEngine, CoreKind::Firewall, CoreKind::Quota]
        );
    }

    #[test]
    fn test_duplicate_and_system_registration_rejected() {
        let mut bus = bus();
        assert!(!bus.register(CoreKind::Quota));
        assert!(!bus.register(CoreKind::System));
        assert_eq!(bus.subscribers().len(), 3);
    }

    #[test]
    fn test_pending_is_fifo() {
        let mut bus = bus();
        bus.publish(CoreKind::System, PolicyEvent::UidRemoved { uid: 1 });
        bus.publish(CoreKind::Firewall, PolicyEvent::ResyncAll);
        bus.publish(CoreKind::System, PolicyEvent::UidRemoved { uid: 2 });
        assert_eq!(bus.pop().unwrap().event, PolicyEvent::UidRemoved { uid: 1 });
        assert_eq!(bus.pop().unwrap().sender, CoreKind::Firewall);
        assert_eq!(bus.pop().unwrap().event, PolicyEvent::UidRemoved { uid: 2 });
        assert!(bus.pop().is_none());
    }

    #[test]
    fn test_delayed_release_per_class() {
        let mut bus = bus();
        let start = Instant::now();
        let short = Duration::from_millis(10);
        let long = Duration::from_millis(500);
        bus.publish_delayed(CoreKind::System, PolicyEvent::UidRemoved { uid: 1 }, long, start);
        bus.publish_delayed(CoreKind::System, PolicyEvent::UidRemoved { uid: 2 }, short, start);
        bus.publish_delayed(CoreKind::System, PolicyEvent::UidRemoved { uid: 3 }, short, start);
        assert_eq!(bus.next_due(), Some(start + short));

        assert_eq!(bus.release_due(start), 0);
        assert_eq!(bus.release_due(start + short), 2);
        assert_eq!(bus.pop().unwrap().event, PolicyEvent::UidRemoved { uid: 2 });
        assert_eq!(bus.pop().unwrap().event, PolicyEvent::UidRemoved { uid: 3 });
        assert!(bus.has_delayed());

        assert_eq!(bus.release_due(start + long), 1);
        assert_eq!(bus.pop().unwrap().event, PolicyEvent::UidRemoved { uid: 1 });
        assert!(!bus.has_delayed());
        assert_eq!(bus.next_due(), None);
    }
}
