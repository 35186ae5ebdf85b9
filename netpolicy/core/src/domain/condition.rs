// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Rule condition algebra
//!
//! The live facts about a uid are folded into a [`PolicyConditions`] mask and
//! looked up in [`RULE_TABLE`]. A row matches when every bit of its
//! condition is present in the live mask; the first matching row wins. Row
//! order is therefore part of the decision contract. The final row has an
//! empty condition and matches everything.
//!
//! Priority, highest first:
//!
//! 1. explicit reject-all / allow-all / reject-metered policies
//! 2. device-idle allow-list members while idle is active
//! 3. admin restriction
//! 4. device-idle mode for everyone else
//! 5. foreground uids holding a background-level policy or none
//! 6. power-save mode
//! 7. explicit metered grants
//! 8. the global background restriction
//! 9. the remaining background-level policies

use bitflags::bitflags;
use std::collections::BTreeSet;

use crate::domain::firewall::{ChainType, FirewallRuleSet};
use crate::domain::uid_policy::{NetUidPolicy, NetUidRule, NetsysDirective, Uid};

bitflags! {
    /// Live condition mask for one uid.
    ///
    /// Bits 0..=7 carry the declared policy, exactly one of which is set.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PolicyConditions: u32 {
        const POLICY_NONE = 1 << 0;
        const POLICY_ALLOW_METERED_BACKGROUND = 1 << 1;
        const POLICY_TEMPORARY_ALLOW_METERED = 1 << 2;
        const POLICY_REJECT_METERED_BACKGROUND = 1 << 3;
        const POLICY_ALLOW_METERED = 1 << 4;
        const POLICY_REJECT_METERED = 1 << 5;
        const POLICY_ALLOW_ALL = 1 << 6;
        const POLICY_REJECT_ALL = 1 << 7;

        const IDLE_MODE = 1 << 8;
        const IDLE_ALLOWED = 1 << 9;
        /// Reserved device-admin restriction. Always false: there is no
        /// restriction source, so [`ConditionInputs::to_mask`] never sets it.
        const ADMIN_RESTRICT = 1 << 10;
        const POWER_SAVE_MODE = 1 << 11;
        /// Part of the live mask, but no row keys on it.
        const POWER_SAVE_ALLOWED = 1 << 12;
        const BACKGROUND_RESTRICT = 1 << 13;
        const FOREGROUND = 1 << 14;
    }
}

impl PolicyConditions {
    /// Condition bit for a declared policy.
    pub const fn for_policy(policy: NetUidPolicy) -> Self {
        match policy {
            NetUidPolicy::None => PolicyConditions::POLICY_NONE,
            // remaining policies sit one bit above their wire value
            other => PolicyConditions::from_bits_retain(other.bits() << 1),
        }
    }
}

/// Everything the engine knows about a uid at recomputation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConditionInputs {
    pub policy: NetUidPolicy,
    pub device_idle_active: bool,
    pub device_idle_allowed: bool,
    pub admin_restricted: bool,
    pub power_save_active: bool,
    pub power_save_allowed: bool,
    pub background_allowed: bool,
    pub foreground: bool,
}

impl ConditionInputs {
    pub fn to_mask(&self) -> PolicyConditions {
        let mut mask = PolicyConditions::for_policy(self.policy);
        mask.set(PolicyConditions::IDLE_MODE, self.device_idle_active);
        mask.set(PolicyConditions::IDLE_ALLOWED, self.device_idle_allowed);
        mask.set(PolicyConditions::POWER_SAVE_MODE, self.power_save_active);
        mask.set(PolicyConditions::POWER_SAVE_ALLOWED, self.power_save_allowed);
        mask.set(PolicyConditions::BACKGROUND_RESTRICT, !self.background_allowed);
        mask.set(PolicyConditions::FOREGROUND, self.foreground);
        mask
    }
}

/// Process-wide mode facts mirrored by the rule engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemModeState {
    pub background_allowed: bool,
    pub device_idle_active: bool,
    pub device_idle: FirewallRuleSet,
    pub power_save_active: bool,
    pub power_save: FirewallRuleSet,
    pub foreground_uids: BTreeSet<Uid>,
}

impl Default for SystemModeState {
    fn default() -> Self {
        Self {
            background_allowed: true,
            device_idle_active: false,
            device_idle: FirewallRuleSet::default(),
            power_save_active: false,
            power_save: FirewallRuleSet::default(),
            foreground_uids: BTreeSet::new(),
        }
    }
}

impl SystemModeState {
    pub fn inputs_for(&self, uid: Uid, policy: NetUidPolicy) -> ConditionInputs {
        ConditionInputs {
            policy,
            device_idle_active: self.device_idle_active,
            device_idle_allowed: self.device_idle.allowed.contains(&uid),
            admin_restricted: false,
            power_save_active: self.power_save_active,
            power_save_allowed: self.power_save.allowed.contains(&uid),
            background_allowed: self.background_allowed,
            foreground: self.foreground_uids.contains(&uid),
        }
    }

    pub fn chain(&self, chain: ChainType) -> &FirewallRuleSet {
        match chain {
            ChainType::DeviceIdle => &self.device_idle,
            ChainType::PowerSave => &self.power_save,
        }
    }

    pub fn set_chain(&mut self, chain: ChainType, rules: FirewallRuleSet) {
        match chain {
            ChainType::DeviceIdle => self.device_idle = rules,
            ChainType::PowerSave => self.power_save = rules,
        }
    }

    /// Returns true if the flag changed.
    pub fn set_chain_active(&mut self, chain: ChainType, active: bool) -> bool {
        let flag = match chain {
            ChainType::DeviceIdle => &mut self.device_idle_active,
            ChainType::PowerSave => &mut self.power_save_active,
        };
        std::mem::replace(flag, active) != active
    }

    /// Uids any mode fact refers to.
    pub fn referenced_uids(&self) -> BTreeSet<Uid> {
        self.foreground_uids
            .iter()
            .chain(self.device_idle.allowed.iter())
            .chain(self.power_save.allowed.iter())
            .copied()
            .collect()
    }

    pub fn references(&self, uid: Uid) -> bool {
        self.foreground_uids.contains(&uid)
            || self.device_idle.allowed.contains(&uid)
            || self.power_save.allowed.contains(&uid)
    }
}

/// One row of the rule table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuleTableEntry {
    pub condition: PolicyConditions,
    pub rule: NetUidRule,
    pub directive: NetsysDirective,
}

impl RuleTableEntry {
    const fn new(condition: PolicyConditions, rule: NetUidRule, directive: NetsysDirective) -> Self {
        Self {
            condition,
            rule,
            directive,
        }
    }

    pub fn matches(&self, live: PolicyConditions) -> bool {
        live.contains(self.condition)
    }
}

const FOREGROUND_NONE: PolicyConditions = PolicyConditions::FOREGROUND.union(PolicyConditions::POLICY_NONE);
const FOREGROUND_ALLOW_BACKGROUND: PolicyConditions =
    PolicyConditions::FOREGROUND.union(PolicyConditions::POLICY_ALLOW_METERED_BACKGROUND);
const FOREGROUND_REJECT_BACKGROUND: PolicyConditions =
    PolicyConditions::FOREGROUND.union(PolicyConditions::POLICY_REJECT_METERED_BACKGROUND);
const RESTRICTED_NONE: PolicyConditions = PolicyConditions::BACKGROUND_RESTRICT.union(PolicyConditions::POLICY_NONE);
const RESTRICTED_ALLOW_BACKGROUND: PolicyConditions =
    PolicyConditions::BACKGROUND_RESTRICT.union(PolicyConditions::POLICY_ALLOW_METERED_BACKGROUND);

pub const RULE_TABLE: [RuleTableEntry; 17] = [
    RuleTableEntry::new(PolicyConditions::POLICY_REJECT_ALL, NetUidRule::RejectAll, NetsysDirective::AddDenylist),
    RuleTableEntry::new(PolicyConditions::POLICY_ALLOW_ALL, NetUidRule::AllowMetered, NetsysDirective::AddAllowlist),
    RuleTableEntry::new(PolicyConditions::POLICY_REJECT_METERED, NetUidRule::RejectMetered, NetsysDirective::AddDenylist),
    // chain enforcement decides while idle, the bandwidth lists stay as they are
    RuleTableEntry::new(
        PolicyConditions::IDLE_MODE.union(PolicyConditions::IDLE_ALLOWED),
        NetUidRule::AllowMetered,
        NetsysDirective::None,
    ),
    RuleTableEntry::new(PolicyConditions::ADMIN_RESTRICT, NetUidRule::RejectMetered, NetsysDirective::AddDenylist),
    RuleTableEntry::new(PolicyConditions::IDLE_MODE, NetUidRule::RejectAll, NetsysDirective::None),
    RuleTableEntry::new(FOREGROUND_ALLOW_BACKGROUND, NetUidRule::AllowMetered, NetsysDirective::AddAllowlist),
    RuleTableEntry::new(
        FOREGROUND_REJECT_BACKGROUND,
        NetUidRule::AllowMeteredForeground,
        NetsysDirective::AddAllowlist,
    ),
    RuleTableEntry::new(FOREGROUND_NONE, NetUidRule::AllowMeteredForeground, NetsysDirective::AddAllowlist),
    RuleTableEntry::new(PolicyConditions::POWER_SAVE_MODE, NetUidRule::RejectAll, NetsysDirective::None),
    RuleTableEntry::new(PolicyConditions::POLICY_ALLOW_METERED, NetUidRule::AllowMetered, NetsysDirective::AddAllowlist),
    RuleTableEntry::new(
        PolicyConditions::POLICY_TEMPORARY_ALLOW_METERED,
        NetUidRule::AllowMetered,
        NetsysDirective::AddAllowlist,
    ),
    RuleTableEntry::new(RESTRICTED_ALLOW_BACKGROUND, NetUidRule::AllowMetered, NetsysDirective::AddAllowlist),
    RuleTableEntry::new(RESTRICTED_NONE, NetUidRule::RejectMetered, NetsysDirective::AddDenylist),
    RuleTableEntry::new(PolicyConditions::POLICY_NONE, NetUidRule::None, NetsysDirective::RemoveAll),
    RuleTableEntry::new(
        PolicyConditions::POLICY_REJECT_METERED_BACKGROUND,
        NetUidRule::RejectMetered,
        NetsysDirective::AddDenylist,
    ),
    RuleTableEntry::new(PolicyConditions::empty(), NetUidRule::None, NetsysDirective::RemoveAll),
];

/// First row of [`RULE_TABLE`] whose condition is contained in `live`.
pub fn resolve(live: PolicyConditions) -> &'static RuleTableEntry {
    RULE_TABLE
        .iter()
        .find(|entry| entry.matches(live))
        .unwrap_or(&RULE_TABLE[RULE_TABLE.len() - 1])
}

/// Index of the matching row, for diagnostics.
pub fn resolve_index(live: PolicyConditions) -> usize {
    RULE_TABLE
        .iter()
        .position(|entry| entry.matches(live))
        .unwrap_or(RULE_TABLE.len() - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs(policy: NetUidPolicy) -> ConditionInputs {
        ConditionInputs {
            policy,
            background_allowed: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_policy_condition_bits_are_disjoint() {
        let mut seen = PolicyConditions::empty();
        for policy in NetUidPolicy::ALL {
            let bit = PolicyConditions::for_policy(policy);
            assert_eq!(bit.bits().count_ones(), 1, "{policy}");
            assert!(!seen.intersects(bit));
            seen |= bit;
        }
        assert_eq!(seen.bits(), 0xff);
    }

    #[test]
    fn test_catch_all_row_is_last_and_empty() {
        let last = RULE_TABLE.last().unwrap();
        assert!(last.condition.is_empty());
        assert!(last.matches(PolicyConditions::empty()));
    }

    #[test]
    fn test_admin_restriction_is_never_set() {
        let mut live = inputs(NetUidPolicy::AllowAll);
        live.admin_restricted = true;
        assert!(!live.to_mask().contains(PolicyConditions::ADMIN_RESTRICT));
    }

    #[test]
    fn test_default_uid_resolves_to_none() {
        let entry = resolve(inputs(NetUidPolicy::None).to_mask());
        assert_eq!(entry.rule, NetUidRule::None);
        assert_eq!(entry.directive, NetsysDirective::RemoveAll);
    }

    #[test]
    fn test_reject_metered_background_under_restriction() {
        let mut live = inputs(NetUidPolicy::RejectMeteredBackground);
        live.background_allowed = false;
        let entry = resolve(live.to_mask());
        assert_eq!(entry.rule, NetUidRule::RejectMetered);
        assert_eq!(entry.directive, NetsysDirective::AddDenylist);
    }

    #[test]
    fn test_idle_allow_list_beats_background_restriction() {
        let mut live = inputs(NetUidPolicy::None);
        live.background_allowed = false;
        live.device_idle_active = true;
        live.device_idle_allowed = true;
        assert_eq!(resolve(live.to_mask()).rule, NetUidRule::AllowMetered);

        live.device_idle_allowed = false;
        assert_eq!(resolve(live.to_mask()).rule, NetUidRule::RejectAll);
    }

    #[test]
    fn test_reject_all_beats_every_mode() {
        let live = ConditionInputs {
            policy: NetUidPolicy::RejectAll,
            device_idle_active: true,
            device_idle_allowed: true,
            power_save_active: true,
            power_save_allowed: true,
            background_allowed: true,
            foreground: true,
            admin_restricted: false,
        };
        assert_eq!(resolve(live.to_mask()).rule, NetUidRule::RejectAll);
    }

    #[test]
    fn test_foreground_beats_background_rows() {
        let mut live = inputs(NetUidPolicy::RejectMeteredBackground);
        live.foreground = true;
        let entry = resolve(live.to_mask());
        assert_eq!(entry.rule, NetUidRule::AllowMeteredForeground);
        assert_eq!(entry.directive, NetsysDirective::AddAllowlist);
    }

    #[test]
    fn test_foreground_survives_power_save() {
        for policy in [
            NetUidPolicy::None,
            NetUidPolicy::AllowMeteredBackground,
            NetUidPolicy::RejectMeteredBackground,
        ] {
            let mut live = inputs(policy);
            live.foreground = true;
            live.power_save_active = true;
            assert_ne!(resolve(live.to_mask()).rule, NetUidRule::RejectAll, "{policy}");
        }

        // idle still outranks foreground
        let mut live = inputs(NetUidPolicy::None);
        live.foreground = true;
        live.device_idle_active = true;
        assert_eq!(resolve(live.to_mask()).rule, NetUidRule::RejectAll);
    }

    #[test]
    fn test_expected_outcome_per_row() {
        struct Case {
            name: &'static str,
            live: ConditionInputs,
            rule: NetUidRule,
            directive: NetsysDirective,
        }

        let with = |policy: NetUidPolicy, f: fn(&mut ConditionInputs)| {
            let mut live = inputs(policy);
            f(&mut live);
            live
        };

        let cases = [
            Case {
                name: "reject all",
                live: inputs(NetUidPolicy::RejectAll),
                rule: NetUidRule::RejectAll,
                directive: NetsysDirective::AddDenylist,
            },
            Case {
                name: "allow all",
                live: inputs(NetUidPolicy::AllowAll),
                rule: NetUidRule::AllowMetered,
                directive: NetsysDirective::AddAllowlist,
            },
            Case {
                name: "reject metered",
                live: inputs(NetUidPolicy::RejectMetered),
                rule: NetUidRule::RejectMetered,
                directive: NetsysDirective::AddDenylist,
            },
            Case {
                name: "idle and allowed",
                live: with(NetUidPolicy::None, |l| {
                    l.device_idle_active = true;
                    l.device_idle_allowed = true;
                }),
                rule: NetUidRule::AllowMetered,
                directive: NetsysDirective::None,
            },
            Case {
                name: "idle",
                live: with(NetUidPolicy::AllowMeteredBackground, |l| l.device_idle_active = true),
                rule: NetUidRule::RejectAll,
                directive: NetsysDirective::None,
            },
            Case {
                name: "foreground allow background",
                live: with(NetUidPolicy::AllowMeteredBackground, |l| l.foreground = true),
                rule: NetUidRule::AllowMetered,
                directive: NetsysDirective::AddAllowlist,
            },
            Case {
                name: "foreground reject background",
                live: with(NetUidPolicy::RejectMeteredBackground, |l| l.foreground = true),
                rule: NetUidRule::AllowMeteredForeground,
                directive: NetsysDirective::AddAllowlist,
            },
            Case {
                name: "foreground none",
                live: with(NetUidPolicy::None, |l| l.foreground = true),
                rule: NetUidRule::AllowMeteredForeground,
                directive: NetsysDirective::AddAllowlist,
            },
            Case {
                name: "power save",
                live: with(NetUidPolicy::None, |l| l.power_save_active = true),
                rule: NetUidRule::RejectAll,
                directive: NetsysDirective::None,
            },
            Case {
                name: "power save allow list alone does not exempt",
                live: with(NetUidPolicy::None, |l| {
                    l.power_save_active = true;
                    l.power_save_allowed = true;
                }),
                rule: NetUidRule::RejectAll,
                directive: NetsysDirective::None,
            },
            Case {
                name: "allow metered",
                live: inputs(NetUidPolicy::AllowMetered),
                rule: NetUidRule::AllowMetered,
                directive: NetsysDirective::AddAllowlist,
            },
            Case {
                name: "temporary allow metered",
                live: inputs(NetUidPolicy::TemporaryAllowMetered),
                rule: NetUidRule::AllowMetered,
                directive: NetsysDirective::AddAllowlist,
            },
            Case {
                name: "restricted allow background",
                live: with(NetUidPolicy::AllowMeteredBackground, |l| l.background_allowed = false),
                rule: NetUidRule::AllowMetered,
                directive: NetsysDirective::AddAllowlist,
            },
            Case {
                name: "restricted none",
                live: with(NetUidPolicy::None, |l| l.background_allowed = false),
                rule: NetUidRule::RejectMetered,
                directive: NetsysDirective::AddDenylist,
            },
            Case {
                name: "none",
                live: inputs(NetUidPolicy::None),
                rule: NetUidRule::None,
                directive: NetsysDirective::RemoveAll,
            },
            Case {
                name: "reject background",
                live: inputs(NetUidPolicy::RejectMeteredBackground),
                rule: NetUidRule::RejectMetered,
                directive: NetsysDirective::AddDenylist,
            },
            Case {
                name: "allow background unrestricted",
                live: inputs(NetUidPolicy::AllowMeteredBackground),
                rule: NetUidRule::None,
                directive: NetsysDirective::RemoveAll,
            },
        ];

        for case in cases {
            let entry = resolve(case.live.to_mask());
            assert_eq!(entry.rule, case.rule, "{}", case.name);
            assert_eq!(entry.directive, case.directive, "{}", case.name);
        }
    }

    #[test]
    fn test_admin_row_rejects_metered() {
        let live = inputs(NetUidPolicy::None).to_mask() | PolicyConditions::ADMIN_RESTRICT;
        let entry = resolve(live);
        assert_eq!(entry.rule, NetUidRule::RejectMetered);
        assert_eq!(entry.directive, NetsysDirective::AddDenylist);
    }

    #[test]
    fn test_superset_resolves_to_first_contained_row() {
        // every live mask lands on the first row it contains, never a later one
        for bits in 0u32..(1 << 15) {
            let live = PolicyConditions::from_bits_truncate(bits);
            let index = resolve_index(live);
            assert!(RULE_TABLE[index].matches(live));
            assert!(RULE_TABLE[..index].iter().all(|entry| !entry.matches(live)));
        }
    }

    #[test]
    fn test_resolution_is_deterministic() {
        for policy in NetUidPolicy::ALL {
            for flags in 0u8..64 {
                let live = ConditionInputs {
                    policy,
                    device_idle_active: flags & 1 != 0,
                    device_idle_allowed: flags & 2 != 0,
                    admin_restricted: false,
                    power_save_active: flags & 4 != 0,
                    power_save_allowed: flags & 8 != 0,
                    background_allowed: flags & 16 != 0,
                    foreground: flags & 32 != 0,
                };
                assert_eq!(resolve(live.to_mask()), resolve(live.to_mask()));
            }
        }
    }
}
