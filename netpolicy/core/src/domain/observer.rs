// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Policy change observers

use crate::domain::events::PolicyNotification;
use crate::domain::quota::QuotaPolicy;
use crate::domain::uid_policy::{NetUidPolicy, NetUidRule, Uid};

/// Receives policy change notifications. Every method defaults to a no-op so
/// observers implement only what they care about.
pub trait PolicyObserver: Send + Sync {
    fn on_uid_policy_changed(&self, _uid: Uid, _policy: NetUidPolicy) {}

    fn on_uid_rule_changed(&self, _uid: Uid, _rule: NetUidRule) {}

    fn on_background_policy_changed(&self, _allowed: bool) {}

    fn on_quota_policy_changed(&self, _policies: &[QuotaPolicy]) {}

    fn on_metered_ifaces_changed(&self, _ifaces: &[String]) {}
}

impl PolicyNotification {
    pub fn deliver_to(&self, observer: &dyn PolicyObserver) {
        match self {
            PolicyNotification::UidPolicyChanged { uid, policy } => observer.on_uid_policy_changed(*uid, *policy),
            PolicyNotification::UidRuleChanged { uid, rule } => observer.on_uid_rule_changed(*uid, *rule),
            PolicyNotification::BackgroundPolicyChanged { allowed } => {
                observer.on_background_policy_changed(*allowed)
            }
            PolicyNotification::QuotaPolicyChanged { policies } => observer.on_quota_policy_changed(policies),
            PolicyNotification::MeteredIfacesChanged { ifaces } => observer.on_metered_ifaces_changed(ifaces),
        }
    }
}
