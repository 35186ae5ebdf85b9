// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Quota Accountant
//!
//! Tracks one [`QuotaPolicy`] per (network type, identity) and evaluates it
//! against interface usage for the current billing period.
//!
//! Evaluation runs in two passes over the same policy set:
//!
//! 1. **update**: resolve each identity to an interface, push the remaining
//!    quota for metered interfaces to netsys, and rebuild the metered
//!    interface set (dropping kernel quotas for interfaces that left it).
//! 2. **notify**: decide limit / already-reminded / warning broadcasts,
//!    stamping remind timestamps and switching networks off on a fresh
//!    limit crossing.
//!
//! The policy set is persisted after every evaluation.

use metrics::counter;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::application::effects::Effects;
use crate::domain::clock::Clock;
use crate::domain::error::{NetPolicyError, Result};
use crate::domain::events::{PolicyEvent, PolicyNotification, QuotaBroadcast, QuotaReminder};
use crate::domain::netsys::{NetsysCommand, NetworkCenter, NetworkToggle};
use crate::domain::quota::{LimitAction, NetBearType, QuotaPolicy, QuotaPolicyRequest, RemindType};
use crate::domain::repository::PolicyRepository;

pub struct QuotaAccountant {
    policies: Vec<QuotaPolicy>,
    metered_ifaces: BTreeSet<String>,
    repository: Arc<dyn PolicyRepository>,
    network_center: Arc<dyn NetworkCenter>,
    clock: Arc<dyn Clock>,
}

impl QuotaAccountant {
    pub fn new(
        repository: Arc<dyn PolicyRepository>,
        network_center: Arc<dyn NetworkCenter>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let policies = repository.load_quota_policies().unwrap_or_else(|e| {
            warn!("Failed to load quota policies, starting empty: {}", e);
            Vec::new()
        });
        info!(count = policies.len(), "Quota accountant loaded");
        Self {
            policies,
            metered_ifaces: BTreeSet::new(),
            repository,
            network_center,
            clock,
        }
    }

    pub fn quota_policies(&self) -> &[QuotaPolicy] {
        &self.policies
    }

    pub fn metered_ifaces(&self) -> Vec<String> {
        self.metered_ifaces.iter().cloned().collect()
    }

    pub fn is_interface_metered(&self, iface: &str) -> bool {
        self.metered_ifaces.contains(iface)
    }

    /// Replace the whole policy set.
    ///
    /// Invalid entries are dropped unless `strict` is set, in which case any
    /// dropped entry rejects the call. Later duplicates of a key win. A
    /// non-strict call whose entries are all invalid leaves an empty set.
    /// Returns the number of policies kept.
    pub fn set_quota_policies(
        &mut self,
        requests: Vec<QuotaPolicyRequest>,
        strict: bool,
        fx: &mut Effects,
    ) -> Result<usize> {
        if requests.is_empty() {
            return Err(NetPolicyError::InvalidQuotaPolicy("empty quota policy list".to_string()));
        }

        let mut accepted: Vec<QuotaPolicy> = Vec::with_capacity(requests.len());
        let mut dropped = 0usize;
        for request in requests {
            match request.into_policy() {
                Ok(policy) => {
                    match accepted
                        .iter_mut()
                        .find(|existing| existing.matches(policy.net_type, &policy.identity))
                    {
                        Some(existing) => *existing = policy,
                        None => accepted.push(policy),
                    }
                }
                Err(e) => {
                    warn!("Dropping quota policy: {}", e);
                    dropped += 1;
                }
            }
        }

        if strict && dropped > 0 {
            return Err(NetPolicyError::InvalidQuotaPolicy(format!(
                "{dropped} quota policies rejected"
            )));
        }
        let count = accepted.len();
        info!(count, dropped, "Quota policies replaced");
        self.policies = accepted;
        self.refresh(true, fx);
        Ok(count)
    }

    /// Stamp a remind timestamp with now and re-evaluate.
    pub fn update_remind_policy(
        &mut self,
        net_type: i32,
        identity: &str,
        remind: u32,
        fx: &mut Effects,
    ) -> Result<()> {
        let net_type = NetBearType::try_from(net_type)?;
        let remind = RemindType::try_from(remind)?;
        let now = self.clock.now_secs();
        let policy = self
            .policies
            .iter_mut()
            .find(|policy| policy.matches(net_type, identity))
            .ok_or_else(|| NetPolicyError::PolicyNotFound {
                net_type,
                identity: identity.to_string(),
            })?;
        policy.stamp_remind(remind, now);
        info!(net_type = %net_type, identity, ?remind, "Remind policy updated");
        self.refresh(true, fx);
        Ok(())
    }

    /// Reset matching policies to default thresholds. An empty identity
    /// matches every policy. Returns how many were reset.
    pub fn reset_policies(&mut self, identity: &str, fx: &mut Effects) -> usize {
        let mut count = 0;
        for policy in self
            .policies
            .iter_mut()
            .filter(|policy| identity.is_empty() || policy.identity == identity)
        {
            policy.reset();
            count += 1;
        }
        info!(identity, count, "Quota policies reset");
        self.refresh(count > 0, fx);
        count
    }

    /// Periodic or manual evaluation of the current policy set.
    pub fn evaluate(&mut self, fx: &mut Effects) {
        self.refresh(false, fx);
    }

    pub fn handle_event(&mut self, event: &PolicyEvent, fx: &mut Effects) {
        match event {
            PolicyEvent::InterfaceQuotaReached { iface } => {
                if self.metered_ifaces.contains(iface) {
                    debug!(iface, "Interface quota alert");
                    self.notify_pass(fx);
                    self.persist();
                } else {
                    debug!(iface, "Quota alert for unmetered interface ignored");
                }
            }
            PolicyEvent::ResyncAll => self.refresh(false, fx),
            _ => {}
        }
    }

    /// Re-push interface quotas for a fresh netsys handle.
    pub fn replay(&mut self, fx: &mut Effects) {
        if self.update_pass(fx) {
            fx.notify(PolicyNotification::MeteredIfacesChanged {
                ifaces: self.metered_ifaces(),
            });
        }
    }

    fn refresh(&mut self, policies_changed: bool, fx: &mut Effects) {
        let metered_changed = self.update_pass(fx);
        self.notify_pass(fx);
        self.persist();
        if policies_changed {
            fx.notify(PolicyNotification::QuotaPolicyChanged {
                policies: self.policies.clone(),
            });
        }
        if metered_changed {
            fx.notify(PolicyNotification::MeteredIfacesChanged {
                ifaces: self.metered_ifaces(),
            });
        }
    }

    /// Returns true if the metered interface set changed.
    fn update_pass(&mut self, fx: &mut Effects) -> bool {
        let now = self.clock.now();
        let end = now.timestamp();
        let mut metered = BTreeSet::new();

        for policy in &self.policies {
            let Some(iface) = self
                .network_center
                .resolve_interface_name(policy.net_type, &policy.identity)
            else {
                debug!(net_type = %policy.net_type, identity = %policy.identity, "No interface for quota policy");
                continue;
            };
            if !policy.metered {
                continue;
            }
            let start = policy.period_start_secs(now);
            let used = self.network_center.interface_usage(&iface, start, end);
            let remaining = policy.remaining(used, start);
            debug!(iface = %iface, used, remaining, "Interface quota computed");
            fx.command(NetsysCommand::SetInterfaceQuota {
                iface: iface.clone(),
                remaining_bytes: remaining,
            });
            metered.insert(iface);
        }

        for stale in self.metered_ifaces.difference(&metered) {
            fx.command(NetsysCommand::RemoveInterfaceQuota { iface: stale.clone() });
        }
        let changed = metered != self.metered_ifaces;
        if changed {
            info!(ifaces = ?metered, "Metered interfaces changed");
        }
        self.metered_ifaces = metered;
        changed
    }

    fn notify_pass(&mut self, fx: &mut Effects) {
        let now = self.clock.now();
        let now_secs = now.timestamp();

        for policy in self.policies.iter_mut() {
            let Some(iface) = self
                .network_center
                .resolve_interface_name(policy.net_type, &policy.identity)
            else {
                continue;
            };
            let start = policy.period_start_secs(now);
            let used = self.network_center.interface_usage(&iface, start, now_secs);

            let reminder = if policy.is_over_limit(used) {
                if policy.limit_reminded_since(start) {
                    QuotaReminder::LimitReminded
                } else {
                    policy.stamp_remind(RemindType::Limit, now_secs);
                    if policy.metered || policy.limit_action == LimitAction::AccessDisabled {
                        fx.toggles.push(NetworkToggle {
                            net_type: policy.net_type,
                            identity: policy.identity.clone(),
                            enabled: false,
                        });
                    }
                    counter!("netpolicy_quota_limit_reached_total").increment(1);
                    QuotaReminder::Limit
                }
            } else if policy.is_over_warning(used) && !policy.warning_reminded_since(start) {
                policy.stamp_remind(RemindType::Warning, now_secs);
                QuotaReminder::Warning
            } else {
                continue;
            };

            info!(
                reminder = reminder.as_str(),
                net_type = %policy.net_type,
                identity = %policy.identity,
                used,
                "Quota threshold reached"
            );
            fx.broadcasts.push(QuotaBroadcast {
                reminder,
                net_type: policy.net_type,
                identity: policy.identity.clone(),
                used_bytes: used,
                at: now,
            });
        }
    }

    fn persist(&self) {
        if let Err(e) = self.repository.save_quota_policies(&self.policies) {
            warn!("Failed to persist quota policies: {}", e);
        }
    }
}
