// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Domain events
//!
//! [`PolicyEvent`]s travel between the engines over the policy event bus.
//! [`PolicyNotification`]s leave the core for registered observers.
//! [`QuotaBroadcast`]s announce quota threshold crossings.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::domain::firewall::{ChainType, FirewallRuleSet};
use crate::domain::quota::{NetBearType, QuotaPolicy};
use crate::domain::uid_policy::{NetUidPolicy, NetUidRule, Uid};

/// Engine-to-engine event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PolicyEvent {
    /// A chain's enforcement was switched on or off.
    ChainModeChanged { chain: ChainType, active: bool },
    /// A chain's membership changed. `changed` are the uids the request named.
    TrustlistUpdated {
        chain: ChainType,
        rules: FirewallRuleSet,
        changed: BTreeSet<Uid>,
        added: bool,
    },
    /// Power manager reported a new power mode.
    PowerModeChanged { mode: i32 },
    UidForegroundChanged { uid: Uid, foreground: bool },
    /// The app owning `uid` was removed.
    UidRemoved { uid: Uid },
    /// Kernel reported that an interface quota alert fired.
    InterfaceQuotaReached { iface: String },
    /// Recompute everything from current state.
    ResyncAll,
}

impl PolicyEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            PolicyEvent::ChainModeChanged { .. } => "chain_mode_changed",
            PolicyEvent::TrustlistUpdated { .. } => "trustlist_updated",
            PolicyEvent::PowerModeChanged { .. } => "power_mode_changed",
            PolicyEvent::UidForegroundChanged { .. } => "uid_foreground_changed",
            PolicyEvent::UidRemoved { .. } => "uid_removed",
            PolicyEvent::InterfaceQuotaReached { .. } => "interface_quota_reached",
            PolicyEvent::ResyncAll => "resync_all",
        }
    }
}

/// Observer-facing change notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PolicyNotification {
    UidPolicyChanged { uid: Uid, policy: NetUidPolicy },
    UidRuleChanged { uid: Uid, rule: NetUidRule },
    BackgroundPolicyChanged { allowed: bool },
    QuotaPolicyChanged { policies: Vec<QuotaPolicy> },
    MeteredIfacesChanged { ifaces: Vec<String> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuotaReminder {
    Warning,
    Limit,
    LimitReminded,
}

impl QuotaReminder {
    pub fn as_str(self) -> &'static str {
        match self {
            QuotaReminder::Warning => "warning",
            QuotaReminder::Limit => "limit",
            QuotaReminder::LimitReminded => "limit_reminded",
        }
    }
}

/// Quota threshold announcement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaBroadcast {
    pub reminder: QuotaReminder,
    pub net_type: NetBearType,
    pub identity: String,
    pub used_bytes: i64,
    pub at: DateTime<Utc>,
}
