// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Policy Rule Engine
//!
//! Owns every [`UidPolicyRecord`] and the mirrored [`SystemModeState`].
//! Any trigger that can change a uid's facts ends in [`PolicyRuleEngine::recompute`],
//! which resolves the live condition mask against the rule table and
//! emits at most one netsys directive plus a rule-change notification when
//! the outcome moved.
//!
//! ## Record lifecycle
//!
//! A record is created the first time a uid is recomputed and dropped again
//! once it carries nothing but defaults and no mode fact refers to it. Only
//! non-default policies are persisted.

use metrics::{counter, gauge};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::application::effects::Effects;
use crate::domain::condition::{self, SystemModeState};
use crate::domain::events::{PolicyEvent, PolicyNotification};
use crate::domain::netsys::NetsysCommand;
use crate::domain::repository::{PolicyRepository, PolicyState};
use crate::domain::uid_policy::{
    NetBackgroundPolicy, NetUidPolicy, NetUidRule, NetsysDirective, Uid, UidPolicyRecord,
};

pub struct PolicyRuleEngine {
    records: BTreeMap<Uid, UidPolicyRecord>,
    mode: SystemModeState,
    repository: Arc<dyn PolicyRepository>,
}

impl PolicyRuleEngine {
    /// Build the engine from persisted state. Nothing is recomputed until a
    /// resync or trigger arrives.
    pub fn new(repository: Arc<dyn PolicyRepository>) -> Self {
        let state = repository.load_policy_state().unwrap_or_else(|e| {
            warn!("Failed to load uid policies, starting empty: {}", e);
            PolicyState::default()
        });
        let records = state
            .uid_policies
            .iter()
            .filter(|(_, policy)| !policy.is_none())
            .map(|(uid, policy)| (*uid, UidPolicyRecord::new(*uid, *policy)))
            .collect();
        let mode = SystemModeState {
            background_allowed: state.background_allowed,
            ..SystemModeState::default()
        };
        info!(
            uids = state.uid_policies.len(),
            background_allowed = state.background_allowed,
            "Rule engine loaded"
        );
        Self {
            records,
            mode,
            repository,
        }
    }

    // ===== Queries =====

    pub fn policy_of(&self, uid: Uid) -> NetUidPolicy {
        self.records.get(&uid).map(|record| record.policy).unwrap_or_default()
    }

    pub fn rule_of(&self, uid: Uid) -> NetUidRule {
        self.records
            .get(&uid)
            .map(UidPolicyRecord::effective_rule)
            .unwrap_or_default()
    }

    pub fn record(&self, uid: Uid) -> Option<&UidPolicyRecord> {
        self.records.get(&uid)
    }

    pub fn records(&self) -> impl Iterator<Item = &UidPolicyRecord> {
        self.records.values()
    }

    /// Uids whose declared policy equals `policy` exactly.
    pub fn uids_by_policy(&self, policy: NetUidPolicy) -> Vec<Uid> {
        self.records
            .values()
            .filter(|record| record.policy == policy)
            .map(|record| record.uid)
            .collect()
    }

    /// Evaluate the stored rule. Never recomputes.
    pub fn is_network_allowed(&self, uid: Uid, metered: bool) -> bool {
        let rule = self.rule_of(uid);
        if rule == NetUidRule::RejectAll {
            return false;
        }
        if !metered {
            return true;
        }
        match rule {
            NetUidRule::RejectMetered => false,
            NetUidRule::AllowMetered | NetUidRule::AllowMeteredForeground => true,
            _ => self.mode.background_allowed,
        }
    }

    pub fn background_allowed(&self) -> bool {
        self.mode.background_allowed
    }

    pub fn background_policy_for(&self, uid: Uid) -> NetBackgroundPolicy {
        NetBackgroundPolicy::for_uid(self.policy_of(uid), self.mode.background_allowed)
    }

    pub fn mode(&self) -> &SystemModeState {
        &self.mode
    }

    // ===== Mutations =====

    /// Store a uid's declared policy and recompute it.
    pub fn set_policy(&mut self, uid: Uid, policy: NetUidPolicy, fx: &mut Effects) -> NetUidRule {
        let previous = self.policy_of(uid);
        if previous != policy {
            info!(uid, from = %previous, to = %policy, "Uid policy changed");
            fx.notify(PolicyNotification::UidPolicyChanged { uid, policy });
        }
        self.records
            .entry(uid)
            .or_insert_with(|| UidPolicyRecord::new(uid, policy))
            .policy = policy;
        let rule = self.recompute(uid, fx);
        self.persist();
        rule
    }

    /// Flip the global background-data flag. Returns false if unchanged.
    pub fn set_background_allowed(&mut self, allowed: bool, fx: &mut Effects) -> bool {
        if self.mode.background_allowed == allowed {
            debug!(allowed, "Background policy unchanged");
            return false;
        }
        info!(allowed, "Background policy changed");
        fx.notify(PolicyNotification::BackgroundPolicyChanged { allowed });
        self.mode.background_allowed = allowed;
        self.recompute_all(fx);
        self.persist();
        fx.command(NetsysCommand::EnableDataSaver { enabled: !allowed });
        true
    }

    /// Forget a uid and clear it from both bandwidth lists.
    pub fn delete_uid(&mut self, uid: Uid, fx: &mut Effects) {
        let existed = self.records.remove(&uid).is_some();
        self.mode.foreground_uids.remove(&uid);
        fx.command(NetsysCommand::UidDirective {
            uid,
            directive: NetsysDirective::RemoveAll,
        });
        info!(uid, existed, "Uid deleted from rule engine");
        self.persist();
        gauge!("netpolicy_tracked_uids").set(self.records.len() as f64);
    }

    /// Every known uid back to the default policy, then allow background data.
    pub fn reset_all(&mut self, fx: &mut Effects) {
        let uids: Vec<Uid> = self.records.keys().copied().collect();
        info!(count = uids.len(), "Resetting uid policies");
        for uid in uids {
            if let Some(record) = self.records.get_mut(&uid) {
                if !record.policy.is_none() {
                    record.policy = NetUidPolicy::None;
                    fx.notify(PolicyNotification::UidPolicyChanged {
                        uid,
                        policy: NetUidPolicy::None,
                    });
                }
            }
            self.recompute(uid, fx);
        }
        self.persist();
        self.set_background_allowed(true, fx);
    }

    pub fn handle_event(&mut self, event: &PolicyEvent, fx: &mut Effects) {
        match event {
            PolicyEvent::ChainModeChanged { chain, active } => {
                if self.mode.set_chain_active(*chain, *active) {
                    debug!(chain = %chain, active, "Chain mode mirrored");
                    self.recompute_all(fx);
                }
            }
            PolicyEvent::TrustlistUpdated {
                chain,
                rules,
                changed,
                added,
            } => {
                self.mode.set_chain(*chain, rules.clone());
                for uid in changed {
                    // a removal must not resurrect a uid nobody tracks
                    if *added || self.records.contains_key(uid) {
                        self.recompute(*uid, fx);
                    }
                }
            }
            PolicyEvent::UidForegroundChanged { uid, foreground } => {
                let changed = if *foreground {
                    self.mode.foreground_uids.insert(*uid)
                } else {
                    self.mode.foreground_uids.remove(uid)
                };
                if changed {
                    self.recompute(*uid, fx);
                }
            }
            PolicyEvent::UidRemoved { uid } => self.delete_uid(*uid, fx),
            PolicyEvent::ResyncAll => self.recompute_all(fx),
            PolicyEvent::PowerModeChanged { .. } | PolicyEvent::InterfaceQuotaReached { .. } => {}
        }
    }

    /// Re-issue the last directive of every record, for a fresh netsys handle.
    pub fn replay(&self, fx: &mut Effects) {
        for record in self.records.values() {
            if let Some(directive) = record.net_control {
                fx.command(NetsysCommand::UidDirective {
                    uid: record.uid,
                    directive,
                });
            }
        }
        fx.command(NetsysCommand::EnableDataSaver {
            enabled: !self.mode.background_allowed,
        });
    }

    // ===== Recomputation =====

    /// Resolve `uid` against the rule table and apply the outcome.
    pub fn recompute(&mut self, uid: Uid, fx: &mut Effects) -> NetUidRule {
        let policy = self.policy_of(uid);
        let live = self.mode.inputs_for(uid, policy).to_mask();
        let entry = condition::resolve(live);
        debug!(
            uid,
            policy = %policy,
            conditions = live.bits(),
            row = condition::resolve_index(live),
            "Recomputed uid rule"
        );

        let record = self
            .records
            .entry(uid)
            .or_insert_with(|| UidPolicyRecord::new(uid, policy));

        if record.net_control != Some(entry.directive) {
            record.net_control = Some(entry.directive);
            fx.command(NetsysCommand::UidDirective {
                uid,
                directive: entry.directive,
            });
            counter!("netpolicy_netsys_directives_total", "directive" => entry.directive.as_str()).increment(1);
        }

        if record.rule != Some(entry.rule) {
            record.rule = Some(entry.rule);
            info!(uid, rule = %entry.rule, "Uid rule changed");
            fx.notify(PolicyNotification::UidRuleChanged { uid, rule: entry.rule });
            counter!("netpolicy_rule_changes_total").increment(1);
        }

        if record.is_default() && !self.mode.references(uid) {
            self.records.remove(&uid);
        }
        gauge!("netpolicy_tracked_uids").set(self.records.len() as f64);
        entry.rule
    }

    fn recompute_all(&mut self, fx: &mut Effects) {
        let mut uids = self.mode.referenced_uids();
        uids.extend(self.records.keys().copied());
        debug!(count = uids.len(), "Recomputing all uids");
        for uid in uids {
            self.recompute(uid, fx);
        }
    }

    fn persist(&self) {
        let state = PolicyState {
            uid_policies: self
                .records
                .values()
                .filter(|record| !record.policy.is_none())
                .map(|record| (record.uid, record.policy))
                .collect(),
            background_allowed: self.mode.background_allowed,
        };
        if let Err(e) = self.repository.save_policy_state(&state) {
            warn!("Failed to persist uid policies: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::firewall::{ChainType, FirewallRuleSet};
    use crate::infrastructure::repositories::InMemoryPolicyRepository;
    use std::collections::BTreeSet;

    fn engine() -> (PolicyRuleEngine, Arc<InMemoryPolicyRepository>) {
        let repo = Arc::new(InMemoryPolicyRepository::new());
        (PolicyRuleEngine::new(repo.clone()), repo)
    }

    fn directives(fx: &Effects) -> Vec<(Uid, NetsysDirective)> {
        fx.commands
            .iter()
            .filter_map(|command| match command {
                NetsysCommand::UidDirective { uid, directive } => Some((*uid, *directive)),
                _ => None,
            })
            .collect()
    }

    fn idle_trustlist(uids: &[Uid]) -> PolicyEvent {
        let mut rules = FirewallRuleSet::default();
        let changed: BTreeSet<Uid> = uids.iter().copied().collect();
        rules.apply(&changed, true);
        PolicyEvent::TrustlistUpdated {
            chain: ChainType::DeviceIdle,
            rules,
            changed,
            added: true,
        }
    }

    #[test]
    fn test_untracked_uid_follows_background_flag() {
        let (engine, _) = engine();
        assert!(engine.is_network_allowed(42, true));
        assert!(engine.is_network_allowed(42, false));
        assert_eq!(engine.policy_of(42), NetUidPolicy::None);
    }

    #[test]
    fn test_set_policy_notifies_and_issues_single_directive() {
        let (mut engine, repo) = engine();
        let mut fx = Effects::new();
        let rule = engine.set_policy(42, NetUidPolicy::RejectAll, &mut fx);

        assert_eq!(rule, NetUidRule::RejectAll);
        assert_eq!(directives(&fx), vec![(42, NetsysDirective::AddDenylist)]);
        assert_eq!(
            fx.notifications,
            vec![
                PolicyNotification::UidPolicyChanged {
                    uid: 42,
                    policy: NetUidPolicy::RejectAll
                },
                PolicyNotification::UidRuleChanged {
                    uid: 42,
                    rule: NetUidRule::RejectAll
                },
            ]
        );
        assert_eq!(
            repo.load_policy_state().unwrap().uid_policies.get(&42),
            Some(&NetUidPolicy::RejectAll)
        );
    }

    #[test]
    fn test_repeated_set_policy_is_quiet() {
        let (mut engine, _) = engine();
        let mut fx = Effects::new();
        engine.set_policy(42, NetUidPolicy::AllowAll, &mut fx);

        let mut fx = Effects::new();
        engine.set_policy(42, NetUidPolicy::AllowAll, &mut fx);
        assert!(fx.commands.is_empty());
        assert!(fx.notifications.is_empty());
    }

    #[test]
    fn test_reject_metered_background_with_restriction() {
        let (mut engine, _) = engine();
        let mut fx = Effects::new();
        engine.set_policy(42, NetUidPolicy::RejectMeteredBackground, &mut fx);
        assert!(engine.set_background_allowed(false, &mut fx));

        assert!(!engine.is_network_allowed(42, true));
        assert!(engine.is_network_allowed(42, false));
        assert!(fx.commands.contains(&NetsysCommand::EnableDataSaver { enabled: true }));
    }

    #[test]
    fn test_background_unchanged_is_noop() {
        let (mut engine, _) = engine();
        let mut fx = Effects::new();
        assert!(!engine.set_background_allowed(true, &mut fx));
        assert!(fx.is_empty());
    }

    #[test]
    fn test_idle_allow_list_beats_background_restriction() {
        let (mut engine, _) = engine();
        let mut fx = Effects::new();
        engine.set_background_allowed(false, &mut fx);
        engine.handle_event(&idle_trustlist(&[42]), &mut fx);
        engine.handle_event(
            &PolicyEvent::ChainModeChanged {
                chain: ChainType::DeviceIdle,
                active: true,
            },
            &mut fx,
        );

        assert_eq!(engine.rule_of(42), NetUidRule::AllowMetered);
        assert!(engine.is_network_allowed(42, true));
    }

    #[test]
    fn test_idle_mode_cuts_off_tracked_uids() {
        let (mut engine, _) = engine();
        let mut fx = Effects::new();
        engine.set_policy(7, NetUidPolicy::AllowMeteredBackground, &mut fx);
        engine.handle_event(
            &PolicyEvent::ChainModeChanged {
                chain: ChainType::DeviceIdle,
                active: true,
            },
            &mut fx,
        );
        assert_eq!(engine.rule_of(7), NetUidRule::RejectAll);
        assert!(!engine.is_network_allowed(7, false));
    }

    #[test]
    fn test_reject_all_ignores_background_flag() {
        let (mut engine, _) = engine();
        let mut fx = Effects::new();
        engine.set_policy(9, NetUidPolicy::RejectAll, &mut fx);
        for allowed in [false, true] {
            engine.set_background_allowed(allowed, &mut fx);
            assert!(!engine.is_network_allowed(9, true));
            assert!(!engine.is_network_allowed(9, false));
        }
    }

    #[test]
    fn test_foreground_transition() {
        let (mut engine, _) = engine();
        let mut fx = Effects::new();
        engine.set_policy(11, NetUidPolicy::RejectMeteredBackground, &mut fx);
        engine.set_background_allowed(false, &mut fx);
        assert!(!engine.is_network_allowed(11, true));

        engine.handle_event(&PolicyEvent::UidForegroundChanged { uid: 11, foreground: true }, &mut fx);
        assert_eq!(engine.rule_of(11), NetUidRule::AllowMeteredForeground);
        assert!(engine.is_network_allowed(11, true));

        engine.handle_event(&PolicyEvent::UidForegroundChanged { uid: 11, foreground: false }, &mut fx);
        assert_eq!(engine.rule_of(11), NetUidRule::RejectMetered);
    }

    #[test]
    fn test_trustlist_removal_does_not_track_unknown_uid() {
        let (mut engine, _) = engine();
        let mut fx = Effects::new();
        engine.handle_event(
            &PolicyEvent::TrustlistUpdated {
                chain: ChainType::PowerSave,
                rules: FirewallRuleSet::default(),
                changed: [99].into_iter().collect(),
                added: false,
            },
            &mut fx,
        );
        assert!(engine.record(99).is_none());
        assert!(fx.commands.is_empty());
    }

    #[test]
    fn test_delete_uid_always_clears_lists() {
        let (mut engine, repo) = engine();
        let mut fx = Effects::new();
        engine.set_policy(5, NetUidPolicy::AllowAll, &mut fx);

        let mut fx = Effects::new();
        engine.delete_uid(5, &mut fx);
        assert_eq!(directives(&fx), vec![(5, NetsysDirective::RemoveAll)]);
        assert!(engine.record(5).is_none());
        assert!(repo.load_policy_state().unwrap().uid_policies.is_empty());

        let mut fx = Effects::new();
        engine.delete_uid(1234, &mut fx);
        assert_eq!(directives(&fx), vec![(1234, NetsysDirective::RemoveAll)]);
    }

    #[test]
    fn test_reset_all() {
        let (mut engine, _) = engine();
        let mut fx = Effects::new();
        engine.set_policy(1, NetUidPolicy::RejectAll, &mut fx);
        engine.set_policy(2, NetUidPolicy::AllowMetered, &mut fx);
        engine.set_background_allowed(false, &mut fx);

        let mut fx = Effects::new();
        engine.reset_all(&mut fx);
        assert!(engine.background_allowed());
        assert_eq!(engine.policy_of(1), NetUidPolicy::None);
        assert_eq!(engine.policy_of(2), NetUidPolicy::None);
        assert!(engine.is_network_allowed(1, true));
        assert!(fx
            .notifications
            .contains(&PolicyNotification::BackgroundPolicyChanged { allowed: true }));
    }

    #[test]
    fn test_uids_by_policy_exact_match() {
        let (mut engine, _) = engine();
        let mut fx = Effects::new();
        engine.set_policy(1, NetUidPolicy::AllowMetered, &mut fx);
        engine.set_policy(2, NetUidPolicy::AllowMetered, &mut fx);
        engine.set_policy(3, NetUidPolicy::AllowAll, &mut fx);
        assert_eq!(engine.uids_by_policy(NetUidPolicy::AllowMetered), vec![1, 2]);
        assert!(engine.uids_by_policy(NetUidPolicy::RejectAll).is_empty());
    }

    #[test]
    fn test_policies_reload_from_repository() {
        let repo = Arc::new(InMemoryPolicyRepository::new());
        {
            let mut engine = PolicyRuleEngine::new(repo.clone());
            let mut fx = Effects::new();
            engine.set_policy(8, NetUidPolicy::RejectMetered, &mut fx);
            engine.set_background_allowed(false, &mut fx);
        }
        let engine = PolicyRuleEngine::new(repo);
        assert_eq!(engine.policy_of(8), NetUidPolicy::RejectMetered);
        assert!(!engine.background_allowed());
        // rule is unknown until the first resync
        assert!(engine.record(8).unwrap().rule.is_none());
    }

    #[test]
    fn test_background_policy_for_uid() {
        let (mut engine, _) = engine();
        let mut fx = Effects::new();
        engine.set_policy(3, NetUidPolicy::AllowMeteredBackground, &mut fx);
        assert_eq!(engine.background_policy_for(3), NetBackgroundPolicy::Enable);
        engine.set_background_allowed(false, &mut fx);
        assert_eq!(engine.background_policy_for(3), NetBackgroundPolicy::AllowedList);
        assert_eq!(engine.background_policy_for(4), NetBackgroundPolicy::Disable);
    }
}
