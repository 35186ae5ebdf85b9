// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Policy Core
//!
//! Owns the three engines and the [`PolicyEventBus`] that links them. The
//! engines never reference each other; they leave events in the shared
//! [`Effects`] outbox and the core re-publishes them under the engine's
//! [`CoreKind`] tag, then pumps the bus until it is quiet.
//!
//! The core is single-threaded. `NetPolicyService` serializes access to it.

use std::time::{Duration, Instant};
use tracing::{debug, trace};

use crate::application::effects::Effects;
use crate::application::firewall_manager::FirewallChainManager;
use crate::application::quota_accountant::QuotaAccountant;
use crate::application::rule_engine::PolicyRuleEngine;
use crate::domain::events::PolicyEvent;
use crate::infrastructure::event_bus::{CoreKind, PolicyEventBus};

pub struct PolicyCore {
    bus: PolicyEventBus,
    rule_engine: PolicyRuleEngine,
    firewall: FirewallChainManager,
    quota: QuotaAccountant,
}

impl PolicyCore {
    pub fn new(rule_engine: PolicyRuleEngine, firewall: FirewallChainManager, quota: QuotaAccountant) -> Self {
        let mut bus = PolicyEventBus::new();
        // delivery order follows registration order
        for kind in [CoreKind::RuleEngine, CoreKind::Firewall, CoreKind::Quota] {
            bus.register(kind);
        }
        Self {
            bus,
            rule_engine,
            firewall,
            quota,
        }
    }

    pub fn rule_engine(&self) -> &PolicyRuleEngine {
        &self.rule_engine
    }

    pub fn rule_engine_mut(&mut self) -> &mut PolicyRuleEngine {
        &mut self.rule_engine
    }

    pub fn firewall(&self) -> &FirewallChainManager {
        &self.firewall
    }

    pub fn firewall_mut(&mut self) -> &mut FirewallChainManager {
        &mut self.firewall
    }

    pub fn quota(&self) -> &QuotaAccountant {
        &self.quota
    }

    pub fn quota_mut(&mut self) -> &mut QuotaAccountant {
        &mut self.quota
    }

    /// Publish an external trigger and deliver everything it causes.
    pub fn publish(&mut self, event: PolicyEvent, fx: &mut Effects) {
        debug!(kind = event.kind(), "System event published");
        self.bus.publish(CoreKind::System, event);
        self.pump(fx);
    }

    /// Publish events an engine produced during a direct call as `sender`,
    /// then deliver them.
    pub fn flush(&mut self, sender: CoreKind, fx: &mut Effects) {
        for event in fx.events.drain(..) {
            self.bus.publish(sender, event);
        }
        self.pump(fx);
    }

    pub fn publish_delayed(&mut self, event: PolicyEvent, delay: Duration, now: Instant) {
        self.bus.publish_delayed(CoreKind::System, event, delay, now);
    }

    /// Move due delayed events onto the bus and deliver them.
    pub fn release_due(&mut self, now: Instant, fx: &mut Effects) -> usize {
        let released = self.bus.release_due(now);
        if released > 0 {
            self.pump(fx);
        }
        released
    }

    pub fn next_due(&self) -> Option<Instant> {
        self.bus.next_due()
    }

    /// Reset uid policies, both firewall chains and the quota policies
    /// matching `identity`.
    pub fn reset_policies(&mut self, identity: &str, fx: &mut Effects) -> usize {
        self.rule_engine.reset_all(fx);
        self.flush(CoreKind::RuleEngine, fx);
        self.firewall.reset(fx);
        self.flush(CoreKind::Firewall, fx);
        let reset = self.quota.reset_policies(identity, fx);
        self.flush(CoreKind::Quota, fx);
        reset
    }

    /// Everything a newly attached netsys handle needs to match our state.
    pub fn replay(&mut self, fx: &mut Effects) {
        self.rule_engine.replay(fx);
        self.firewall.replay(fx);
        self.quota.replay(fx);
    }

    fn pump(&mut self, fx: &mut Effects) {
        while let Some(envelope) = self.bus.pop() {
            for recipient in self.bus.recipients(envelope.sender) {
                trace!(
                    kind = envelope.event.kind(),
                    sender = %envelope.sender,
                    recipient = %recipient,
                    "Delivering policy event"
                );
                match recipient {
                    CoreKind::RuleEngine => self.rule_engine.handle_event(&envelope.event, fx),
                    CoreKind::Firewall => self.firewall.handle_event(&envelope.event, fx),
                    CoreKind::Quota => self.quota.handle_event(&envelope.event, fx),
                    CoreKind::System => {}
                }
                for event in fx.events.drain(..) {
                    self.bus.publish(recipient, event);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::firewall::ChainType;
    use crate::domain::netsys::NetsysCommand;
    use crate::domain::uid_policy::{NetUidRule, NetsysDirective};
    use crate::infrastructure::clock::SystemClock;
    use crate::infrastructure::network_center::StaticNetworkCenter;
    use crate::infrastructure::repositories::InMemoryPolicyRepository;
    use std::sync::Arc;

    fn core() -> PolicyCore {
        let repo = Arc::new(InMemoryPolicyRepository::new());
        PolicyCore::new(
            PolicyRuleEngine::new(repo.clone()),
            FirewallChainManager::new(repo.clone()),
            QuotaAccountant::new(repo, Arc::new(StaticNetworkCenter::new()), Arc::new(SystemClock)),
        )
    }

    #[test]
    fn test_trustlist_update_reaches_rule_engine() {
        let mut core = core();
        let mut fx = Effects::new();
        core.firewall_mut()
            .set_trustlist(ChainType::DeviceIdle, &[42], true, &mut fx)
            .unwrap();
        core.flush(CoreKind::Firewall, &mut fx);
        core.firewall_mut()
            .set_chain_active(ChainType::DeviceIdle, true, &mut fx)
            .unwrap();
        core.flush(CoreKind::Firewall, &mut fx);

        assert!(core.rule_engine().mode().device_idle_active);
        assert_eq!(core.rule_engine().rule_of(42), NetUidRule::AllowMetered);
        assert!(fx.events.is_empty());
    }

    #[test]
    fn test_power_mode_flows_through_firewall_to_rule_engine() {
        let mut core = core();
        let mut fx = Effects::new();
        core.publish(PolicyEvent::PowerModeChanged { mode: 601 }, &mut fx);

        assert!(core.firewall().is_active(ChainType::PowerSave));
        assert!(core.rule_engine().mode().power_save_active);
        assert!(fx.commands.contains(&NetsysCommand::SetChainEnforcement {
            chain: ChainType::PowerSave,
            enabled: true
        }));
    }

    #[test]
    fn test_uid_removal_reaches_every_engine() {
        let mut core = core();
        let mut fx = Effects::new();
        core.firewall_mut()
            .set_trustlist(ChainType::PowerSave, &[7], true, &mut fx)
            .unwrap();
        core.flush(CoreKind::Firewall, &mut fx);

        let mut fx = Effects::new();
        core.publish(PolicyEvent::UidRemoved { uid: 7 }, &mut fx);
        assert!(core.firewall().trustlist(ChainType::PowerSave).allowed.is_empty());
        assert!(core.rule_engine().record(7).is_none());
        assert!(fx.commands.contains(&NetsysCommand::UidDirective {
            uid: 7,
            directive: NetsysDirective::RemoveAll
        }));
    }

    #[test]
    fn test_delayed_event_released_when_due() {
        let mut core = core();
        let start = Instant::now();
        core.publish_delayed(
            PolicyEvent::UidForegroundChanged { uid: 3, foreground: true },
            Duration::from_millis(50),
            start,
        );

        let mut fx = Effects::new();
        assert_eq!(core.release_due(start, &mut fx), 0);
        assert!(!core.rule_engine().mode().foreground_uids.contains(&3));

        assert_eq!(core.release_due(start + Duration::from_millis(50), &mut fx), 1);
        assert!(core.rule_engine().mode().foreground_uids.contains(&3));
        assert!(core.next_due().is_none());
    }
}
