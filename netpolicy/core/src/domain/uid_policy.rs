// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Per-uid policy values
//!
//! A uid's declared policy is a closed enumeration carried on the wire as a
//! single bit. The rule and directive are derived from it by
//! [`crate::domain::condition`] and never written directly.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::error::NetPolicyError;

/// Numeric application identity.
pub type Uid = u32;

/// Declared capability grant for a uid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetUidPolicy {
    #[default]
    None,
    AllowMeteredBackground,
    TemporaryAllowMetered,
    RejectMeteredBackground,
    AllowMetered,
    RejectMetered,
    AllowAll,
    RejectAll,
}

impl NetUidPolicy {
    pub const ALL: [NetUidPolicy; 8] = [
        NetUidPolicy::None,
        NetUidPolicy::AllowMeteredBackground,
        NetUidPolicy::TemporaryAllowMetered,
        NetUidPolicy::RejectMeteredBackground,
        NetUidPolicy::AllowMetered,
        NetUidPolicy::RejectMetered,
        NetUidPolicy::AllowAll,
        NetUidPolicy::RejectAll,
    ];

    /// Wire value of the policy.
    pub const fn bits(self) -> u32 {
        match self {
            NetUidPolicy::None => 0,
            NetUidPolicy::AllowMeteredBackground => 1 << 0,
            NetUidPolicy::TemporaryAllowMetered => 1 << 1,
            NetUidPolicy::RejectMeteredBackground => 1 << 2,
            NetUidPolicy::AllowMetered => 1 << 3,
            NetUidPolicy::RejectMetered => 1 << 4,
            NetUidPolicy::AllowAll => 1 << 5,
            NetUidPolicy::RejectAll => 1 << 6,
        }
    }

    pub fn is_none(self) -> bool {
        self == NetUidPolicy::None
    }

    pub fn as_str(self) -> &'static str {
        match self {
            NetUidPolicy::None => "none",
            NetUidPolicy::AllowMeteredBackground => "allow_metered_background",
            NetUidPolicy::TemporaryAllowMetered => "temporary_allow_metered",
            NetUidPolicy::RejectMeteredBackground => "reject_metered_background",
            NetUidPolicy::AllowMetered => "allow_metered",
            NetUidPolicy::RejectMetered => "reject_metered",
            NetUidPolicy::AllowAll => "allow_all",
            NetUidPolicy::RejectAll => "reject_all",
        }
    }
}

impl TryFrom<u32> for NetUidPolicy {
    type Error = NetPolicyError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        NetUidPolicy::ALL
            .into_iter()
            .find(|policy| policy.bits() == value)
            .ok_or(NetPolicyError::InvalidPolicy(value))
    }
}

impl std::str::FromStr for NetUidPolicy {
    type Err = NetPolicyError;

    /// Accepts either the snake_case name or the numeric wire value.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(value) = s.parse::<u32>() {
            return NetUidPolicy::try_from(value);
        }
        NetUidPolicy::ALL
            .into_iter()
            .find(|policy| policy.as_str() == s)
            .ok_or_else(|| NetPolicyError::UnknownPolicyName(s.to_string()))
    }
}

impl fmt::Display for NetUidPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Enforcement outcome derived for a uid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetUidRule {
    #[default]
    None,
    AllowMeteredForeground,
    AllowMetered,
    RejectMetered,
    RejectAll,
}

impl NetUidRule {
    pub const fn bits(self) -> u32 {
        match self {
            NetUidRule::None => 0,
            NetUidRule::AllowMeteredForeground => 1 << 0,
            NetUidRule::AllowMetered => 1 << 1,
            NetUidRule::RejectMetered => 1 << 2,
            NetUidRule::RejectAll => 1 << 6,
        }
    }
}

impl fmt::Display for NetUidRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NetUidRule::None => "none",
            NetUidRule::AllowMeteredForeground => "allow_metered_foreground",
            NetUidRule::AllowMetered => "allow_metered",
            NetUidRule::RejectMetered => "reject_metered",
            NetUidRule::RejectAll => "reject_all",
        };
        f.write_str(name)
    }
}

/// Low-level bandwidth list directive issued to netsys for a uid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetsysDirective {
    /// Leave both lists untouched.
    None,
    /// Remove the uid from both the denylist and the allowlist.
    RemoveAll,
    /// Add to the denylist, clearing any allowlist entry.
    AddDenylist,
    /// Add to the allowlist, clearing any denylist entry.
    AddAllowlist,
}

impl NetsysDirective {
    pub const fn bits(self) -> u32 {
        match self {
            NetsysDirective::None => 0b000,
            NetsysDirective::RemoveAll => 0b001,
            NetsysDirective::AddDenylist => 0b010,
            NetsysDirective::AddAllowlist => 0b100,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            NetsysDirective::None => "none",
            NetsysDirective::RemoveAll => "remove_all",
            NetsysDirective::AddDenylist => "add_denylist",
            NetsysDirective::AddAllowlist => "add_allowlist",
        }
    }
}

impl fmt::Display for NetsysDirective {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tracked policy state for one uid.
///
/// `rule` and `net_control` are `None` until the first recomputation, so the
/// first pass for a uid always issues a directive and a rule notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UidPolicyRecord {
    pub uid: Uid,
    pub policy: NetUidPolicy,
    pub rule: Option<NetUidRule>,
    pub net_control: Option<NetsysDirective>,
}

impl UidPolicyRecord {
    pub fn new(uid: Uid, policy: NetUidPolicy) -> Self {
        Self {
            uid,
            policy,
            rule: None,
            net_control: None,
        }
    }

    /// Current rule, treating a never-computed record as `None`.
    pub fn effective_rule(&self) -> NetUidRule {
        self.rule.unwrap_or_default()
    }

    /// A record carrying nothing but defaults can be dropped.
    pub fn is_default(&self) -> bool {
        self.policy.is_none()
            && self.effective_rule() == NetUidRule::None
            && matches!(self.net_control, Some(NetsysDirective::RemoveAll) | None)
    }
}

/// Background data verdict for a single uid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetBackgroundPolicy {
    Enable,
    AllowedList,
    Disable,
}

impl NetBackgroundPolicy {
    pub fn for_uid(policy: NetUidPolicy, background_allowed: bool) -> Self {
        if policy == NetUidPolicy::RejectMeteredBackground {
            NetBackgroundPolicy::Disable
        } else if background_allowed {
            NetBackgroundPolicy::Enable
        } else if policy == NetUidPolicy::AllowMeteredBackground {
            NetBackgroundPolicy::AllowedList
        } else {
            NetBackgroundPolicy::Disable
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_from_wire_value() {
        assert_eq!(NetUidPolicy::try_from(0).unwrap(), NetUidPolicy::None);
        assert_eq!(NetUidPolicy::try_from(4).unwrap(), NetUidPolicy::RejectMeteredBackground);
        assert_eq!(NetUidPolicy::try_from(64).unwrap(), NetUidPolicy::RejectAll);
    }

    #[test]
    fn test_policy_rejects_combinations_and_unknown_bits() {
        assert!(matches!(NetUidPolicy::try_from(3), Err(NetPolicyError::InvalidPolicy(3))));
        assert!(matches!(NetUidPolicy::try_from(128), Err(NetPolicyError::InvalidPolicy(128))));
    }

    #[test]
    fn test_policy_parses_names_and_numbers() {
        assert_eq!("allow_all".parse::<NetUidPolicy>().unwrap(), NetUidPolicy::AllowAll);
        assert_eq!("16".parse::<NetUidPolicy>().unwrap(), NetUidPolicy::RejectMetered);
        assert!("sometimes".parse::<NetUidPolicy>().is_err());
    }

    #[test]
    fn test_background_policy_for_uid() {
        use NetBackgroundPolicy::*;
        assert_eq!(NetBackgroundPolicy::for_uid(NetUidPolicy::RejectMeteredBackground, true), Disable);
        assert_eq!(NetBackgroundPolicy::for_uid(NetUidPolicy::None, true), Enable);
        assert_eq!(NetBackgroundPolicy::for_uid(NetUidPolicy::AllowMeteredBackground, false), AllowedList);
        assert_eq!(NetBackgroundPolicy::for_uid(NetUidPolicy::AllowAll, false), Disable);
    }

    #[test]
    fn test_fresh_record_is_default() {
        let record = UidPolicyRecord::new(7, NetUidPolicy::None);
        assert!(record.is_default());
        let record = UidPolicyRecord::new(7, NetUidPolicy::RejectAll);
        assert!(!record.is_default());
    }
}
