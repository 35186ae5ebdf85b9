// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Network Policy Service
//!
//! Thread-safe facade over [`PolicyCore`] and the full operation surface
//! exposed to callers.
//!
//! Every mutation runs under the core's write lock, which makes the engines
//! a single serial worker. Netsys commands produced by a transition are
//! dispatched before the lock is released so the kernel sees them in
//! transition order. Observer notifications, quota broadcasts and network
//! toggles are delivered after the lock is released.
//!
//! Queries take the read lock and therefore always observe one completed
//! transition.

use parking_lot::RwLock;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::application::policy_core::PolicyCore;
use crate::application::effects::Effects;
use crate::application::netsys_link::NetsysLink;
use crate::application::observer_registry::{ObserverId, ObserverRegistry};
use crate::domain::error::Result;
use crate::domain::events::PolicyEvent;
use crate::domain::firewall::{ChainType, FirewallRuleSet};
use crate::domain::netsys::{NetsysController, NetworkCenter};
use crate::domain::observer::PolicyObserver;
use crate::domain::quota::{NetBearType, QuotaPolicy, QuotaPolicyRequest};
use crate::domain::uid_policy::{NetBackgroundPolicy, NetUidPolicy, NetUidRule, Uid, UidPolicyRecord};
use crate::infrastructure::broadcast::{QuotaBroadcastChannel, QuotaReceiver};
use crate::infrastructure::event_bus::CoreKind;

pub struct NetPolicyService {
    core: RwLock<PolicyCore>,
    netsys: NetsysLink,
    observers: ObserverRegistry,
    broadcasts: QuotaBroadcastChannel,
    network_center: Arc<dyn NetworkCenter>,
}

impl NetPolicyService {
    pub fn new(core: PolicyCore, network_center: Arc<dyn NetworkCenter>, max_observers: usize) -> Self {
        Self {
            core: RwLock::new(core),
            netsys: NetsysLink::new(),
            observers: ObserverRegistry::new(max_observers),
            broadcasts: QuotaBroadcastChannel::with_default_capacity(),
            network_center,
        }
    }

    // ========================================================================
    // Uid policy
    // ========================================================================

    pub fn set_uid_policy(&self, uid: Uid, policy: u32) -> Result<NetUidRule> {
        let policy = NetUidPolicy::try_from(policy)?;
        Ok(self.mutate(|core, fx| {
            let rule = core.rule_engine_mut().set_policy(uid, policy, fx);
            core.flush(CoreKind::RuleEngine, fx);
            rule
        }))
    }

    pub fn uid_policy(&self, uid: Uid) -> NetUidPolicy {
        self.core.read().rule_engine().policy_of(uid)
    }

    pub fn uid_rule(&self, uid: Uid) -> NetUidRule {
        self.core.read().rule_engine().rule_of(uid)
    }

    pub fn uids_by_policy(&self, policy: u32) -> Result<Vec<Uid>> {
        let policy = NetUidPolicy::try_from(policy)?;
        Ok(self.core.read().rule_engine().uids_by_policy(policy))
    }

    pub fn uid_records(&self) -> Vec<UidPolicyRecord> {
        self.core.read().rule_engine().records().cloned().collect()
    }

    pub fn is_uid_net_allowed(&self, uid: Uid, metered: bool) -> bool {
        self.core.read().rule_engine().is_network_allowed(uid, metered)
    }

    /// Metered-ness comes from the current metered interface set.
    pub fn is_uid_net_allowed_on_iface(&self, uid: Uid, iface: &str) -> bool {
        let core = self.core.read();
        let metered = core.quota().is_interface_metered(iface);
        core.rule_engine().is_network_allowed(uid, metered)
    }

    // ========================================================================
    // Observers
    // ========================================================================

    pub fn register_observer(&self, observer: Arc<dyn PolicyObserver>) -> Result<ObserverId> {
        self.observers.register(observer)
    }

    pub fn unregister_observer(&self, id: ObserverId) -> bool {
        self.observers.unregister(id)
    }

    // ========================================================================
    // Quota
    // ========================================================================

    /// Replace the quota policy set, dropping invalid entries.
    pub fn set_quota_policies(&self, requests: Vec<QuotaPolicyRequest>) -> Result<usize> {
        self.replace_quota_policies(requests, false)
    }

    /// Replace the quota policy set, rejecting the call if any entry is invalid.
    pub fn set_quota_policies_strict(&self, requests: Vec<QuotaPolicyRequest>) -> Result<usize> {
        self.replace_quota_policies(requests, true)
    }

    fn replace_quota_policies(&self, requests: Vec<QuotaPolicyRequest>, strict: bool) -> Result<usize> {
        self.mutate(|core, fx| {
            let kept = core.quota_mut().set_quota_policies(requests, strict, fx)?;
            core.flush(CoreKind::Quota, fx);
            Ok(kept)
        })
    }

    pub fn quota_policies(&self) -> Vec<QuotaPolicy> {
        self.core.read().quota().quota_policies().to_vec()
    }

    pub fn update_remind_policy(&self, net_type: i32, identity: &str, remind: u32) -> Result<()> {
        self.mutate(|core, fx| {
            core.quota_mut().update_remind_policy(net_type, identity, remind, fx)?;
            core.flush(CoreKind::Quota, fx);
            Ok(())
        })
    }

    /// Reset uid policies, firewall chains and the quota policies matching
    /// `identity` (all of them when empty).
    pub fn reset_policies(&self, identity: &str) -> usize {
        info!(identity, "Resetting policies");
        self.mutate(|core, fx| core.reset_policies(identity, fx))
    }

    pub fn evaluate_quota(&self) {
        self.mutate(|core, fx| {
            core.quota_mut().evaluate(fx);
            core.flush(CoreKind::Quota, fx);
        })
    }

    /// Kernel reported that the quota alert on `iface` fired.
    pub fn interface_quota_reached(&self, iface: &str) {
        self.publish(PolicyEvent::InterfaceQuotaReached {
            iface: iface.to_string(),
        });
    }

    pub fn metered_ifaces(&self) -> Vec<String> {
        self.core.read().quota().metered_ifaces()
    }

    pub fn subscribe_quota_broadcasts(&self) -> QuotaReceiver {
        self.broadcasts.subscribe()
    }

    pub fn subscribe_quota_identity(&self, net_type: NetBearType, identity: &str) -> QuotaReceiver {
        self.broadcasts.subscribe_identity(net_type, identity)
    }

    // ========================================================================
    // Background data
    // ========================================================================

    /// Returns false if the flag already had this value.
    pub fn set_background_policy(&self, allowed: bool) -> bool {
        self.mutate(|core, fx| {
            let changed = core.rule_engine_mut().set_background_allowed(allowed, fx);
            core.flush(CoreKind::RuleEngine, fx);
            changed
        })
    }

    pub fn background_policy(&self) -> bool {
        self.core.read().rule_engine().background_allowed()
    }

    pub fn background_policy_by_uid(&self, uid: Uid) -> NetBackgroundPolicy {
        self.core.read().rule_engine().background_policy_for(uid)
    }

    // ========================================================================
    // Firewall chains
    // ========================================================================

    pub fn set_trustlist(&self, chain: ChainType, uids: &[Uid], allowed: bool) -> Result<()> {
        self.mutate(|core, fx| {
            core.firewall_mut().set_trustlist(chain, uids, allowed, fx)?;
            core.flush(CoreKind::Firewall, fx);
            Ok(())
        })
    }

    pub fn trustlist(&self, chain: ChainType) -> FirewallRuleSet {
        self.core.read().firewall().trustlist(chain).clone()
    }

    pub fn set_chain_policy(&self, chain: ChainType, active: bool) -> Result<()> {
        self.mutate(|core, fx| {
            core.firewall_mut().set_chain_active(chain, active, fx)?;
            core.flush(CoreKind::Firewall, fx);
            Ok(())
        })
    }

    pub fn chain_policy(&self, chain: ChainType) -> bool {
        self.core.read().firewall().is_active(chain)
    }

    pub fn set_device_idle_trustlist(&self, uids: &[Uid], allowed: bool) -> Result<()> {
        self.set_trustlist(ChainType::DeviceIdle, uids, allowed)
    }

    pub fn device_idle_trustlist(&self) -> FirewallRuleSet {
        self.trustlist(ChainType::DeviceIdle)
    }

    pub fn set_device_idle_policy(&self, enable: bool) -> Result<()> {
        self.set_chain_policy(ChainType::DeviceIdle, enable)
    }

    pub fn device_idle_policy(&self) -> bool {
        self.chain_policy(ChainType::DeviceIdle)
    }

    pub fn set_power_save_trustlist(&self, uids: &[Uid], allowed: bool) -> Result<()> {
        self.set_trustlist(ChainType::PowerSave, uids, allowed)
    }

    pub fn power_save_trustlist(&self) -> FirewallRuleSet {
        self.trustlist(ChainType::PowerSave)
    }

    pub fn set_power_save_policy(&self, enable: bool) -> Result<()> {
        self.set_chain_policy(ChainType::PowerSave, enable)
    }

    pub fn power_save_policy(&self) -> bool {
        self.chain_policy(ChainType::PowerSave)
    }

    // ========================================================================
    // System triggers
    // ========================================================================

    /// The app owning `uid` was removed.
    pub fn delete_uid(&self, uid: Uid) {
        info!(uid, "Deleting uid");
        self.publish(PolicyEvent::UidRemoved { uid });
    }

    pub fn set_uid_foreground(&self, uid: Uid, foreground: bool) {
        self.publish(PolicyEvent::UidForegroundChanged { uid, foreground });
    }

    pub fn power_mode_changed(&self, mode: i32) {
        self.publish(PolicyEvent::PowerModeChanged { mode });
    }

    /// Recompute every uid and re-evaluate quotas from current state.
    pub fn resync(&self) {
        self.publish(PolicyEvent::ResyncAll);
    }

    pub fn publish(&self, event: PolicyEvent) {
        self.mutate(|core, fx| core.publish(event, fx))
    }

    pub fn schedule_event(&self, event: PolicyEvent, delay: Duration) {
        self.core.write().publish_delayed(event, delay, Instant::now());
    }

    pub fn release_due_events(&self) -> usize {
        self.mutate(|core, fx| core.release_due(Instant::now(), fx))
    }

    pub fn next_due_event(&self) -> Option<Instant> {
        self.core.read().next_due()
    }

    // ========================================================================
    // Netsys
    // ========================================================================

    /// Attach a controller and replay the current state into it.
    pub fn attach_netsys(&self, controller: Arc<dyn NetsysController>) {
        self.mutate(|core, fx| {
            self.netsys.attach(controller);
            core.replay(fx);
            debug!(commands = fx.commands.len(), "Replaying state into netsys");
        })
    }

    pub fn netsys_attached(&self) -> bool {
        self.netsys.is_attached()
    }

    // ========================================================================
    // Dispatch
    // ========================================================================

    fn mutate<R>(&self, f: impl FnOnce(&mut PolicyCore, &mut Effects) -> R) -> R {
        let mut fx = Effects::new();
        let result = {
            let mut core = self.core.write();
            let result = f(&mut *core, &mut fx);
            self.netsys.dispatch(&fx.commands);
            result
        };
        self.deliver(fx);
        result
    }

    fn deliver(&self, fx: Effects) {
        self.observers.notify(&fx.notifications);
        for broadcast in fx.broadcasts {
            self.broadcasts.publish(broadcast);
        }
        for toggle in fx.toggles {
            self.network_center
                .set_network_enabled(toggle.net_type, &toggle.identity, toggle.enabled);
        }
    }
}
