// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Firewall chains
//!
//! Two chains exist: device-idle and power-save. Each carries an allow set
//! and a deny set that are kept disjoint. Only the allow set is enforced by
//! the kernel; the deny set is bookkeeping.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::domain::uid_policy::Uid;

/// Upper bound on a chain's allow set.
pub const MAX_TRUSTLIST_SIZE: usize = 1000;

/// Power modes that count as power-save.
pub const POWER_MODE_SAVE: i32 = 601;
pub const POWER_MODE_LOW_POWER: i32 = 603;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainType {
    DeviceIdle,
    PowerSave,
}

impl ChainType {
    pub const ALL: [ChainType; 2] = [ChainType::DeviceIdle, ChainType::PowerSave];

    /// Kernel chain identifier.
    pub const fn chain_id(self) -> u32 {
        match self {
            ChainType::DeviceIdle => 16,
            ChainType::PowerSave => 17,
        }
    }
}

impl fmt::Display for ChainType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChainType::DeviceIdle => f.write_str("device_idle"),
            ChainType::PowerSave => f.write_str("power_save"),
        }
    }
}

/// Whether a reported power mode means power-save is on.
pub fn is_power_save_mode(mode: i32) -> bool {
    mode == POWER_MODE_SAVE || mode == POWER_MODE_LOW_POWER
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirewallRuleSet {
    #[serde(rename = "allowedList", default)]
    pub allowed: BTreeSet<Uid>,
    #[serde(rename = "deniedList", default)]
    pub denied: BTreeSet<Uid>,
}

impl FirewallRuleSet {
    /// Allow-set size after applying `uids` with `allowed`.
    pub fn allowed_len_after(&self, uids: &BTreeSet<Uid>, allowed: bool) -> usize {
        if allowed {
            self.allowed.len() + uids.difference(&self.allowed).count()
        } else {
            self.allowed.len() - uids.intersection(&self.allowed).count()
        }
    }

    /// Move `uids` into the allow set or the deny set.
    pub fn apply(&mut self, uids: &BTreeSet<Uid>, allowed: bool) {
        for uid in uids {
            if allowed {
                self.denied.remove(uid);
                self.allowed.insert(*uid);
            } else {
                self.allowed.remove(uid);
                self.denied.insert(*uid);
            }
        }
    }

    /// Forget a uid entirely. Returns true if it was tracked.
    pub fn forget(&mut self, uid: Uid) -> bool {
        let was_allowed = self.allowed.remove(&uid);
        let was_denied = self.denied.remove(&uid);
        was_allowed || was_denied
    }

    /// Adopt a loaded rule set, resolving overlap in favour of the allow set.
    pub fn sanitized(mut self) -> Self {
        let allowed = self.allowed.clone();
        self.denied.retain(|uid| !allowed.contains(uid));
        self
    }

    pub fn is_disjoint(&self) -> bool {
        self.allowed.is_disjoint(&self.denied)
    }

    pub fn clear(&mut self) {
        self.allowed.clear();
        self.denied.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(uids: &[Uid]) -> BTreeSet<Uid> {
        uids.iter().copied().collect()
    }

    #[test]
    fn test_apply_keeps_sets_disjoint() {
        let mut rules = FirewallRuleSet::default();
        rules.apply(&set(&[1, 2, 3]), true);
        rules.apply(&set(&[2, 4]), false);
        assert_eq!(rules.allowed, set(&[1, 3]));
        assert_eq!(rules.denied, set(&[2, 4]));
        rules.apply(&set(&[4]), true);
        assert!(rules.is_disjoint());
        assert_eq!(rules.allowed, set(&[1, 3, 4]));
    }

    #[test]
    fn test_allowed_len_after() {
        let mut rules = FirewallRuleSet::default();
        rules.apply(&set(&[1, 2]), true);
        assert_eq!(rules.allowed_len_after(&set(&[2, 3, 4]), true), 4);
        assert_eq!(rules.allowed_len_after(&set(&[2, 9]), false), 1);
    }

    #[test]
    fn test_sanitized_drops_overlap() {
        let rules = FirewallRuleSet {
            allowed: set(&[1, 2]),
            denied: set(&[2, 3]),
        }
        .sanitized();
        assert!(rules.is_disjoint());
        assert_eq!(rules.denied, set(&[3]));
    }

    #[test]
    fn test_power_save_modes() {
        assert!(is_power_save_mode(601));
        assert!(is_power_save_mode(603));
        assert!(!is_power_save_mode(600));
        assert!(!is_power_save_mode(602));
    }
}
