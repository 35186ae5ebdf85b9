// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Firewall Chain Manager
//!
//! Owns the device-idle and power-save chains: their allow/deny sets and
//! whether each chain is enforced. Every membership or mode change is
//! persisted, turned into netsys commands, and announced on the policy bus
//! so the rule engine can re-evaluate the uids involved.

use metrics::counter;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::application::effects::Effects;
use crate::domain::error::{NetPolicyError, Result};
use crate::domain::events::PolicyEvent;
use crate::domain::firewall::{is_power_save_mode, ChainType, FirewallRuleSet, MAX_TRUSTLIST_SIZE};
use crate::domain::netsys::NetsysCommand;
use crate::domain::repository::PolicyRepository;
use crate::domain::uid_policy::Uid;

#[derive(Debug, Clone, Default)]
struct ChainState {
    rules: FirewallRuleSet,
    active: bool,
}

pub struct FirewallChainManager {
    chains: BTreeMap<ChainType, ChainState>,
    repository: Arc<dyn PolicyRepository>,
}

impl FirewallChainManager {
    pub fn new(repository: Arc<dyn PolicyRepository>) -> Self {
        let chains = ChainType::ALL
            .iter()
            .map(|chain| {
                let rules = repository
                    .load_firewall_rules(*chain)
                    .map(FirewallRuleSet::sanitized)
                    .unwrap_or_else(|e| {
                        warn!(chain = %chain, "Failed to load firewall rules: {}", e);
                        FirewallRuleSet::default()
                    });
                debug!(chain = %chain, allowed = rules.allowed.len(), denied = rules.denied.len(), "Chain loaded");
                (*chain, ChainState { rules, active: false })
            })
            .collect();
        Self { chains, repository }
    }

    pub fn trustlist(&self, chain: ChainType) -> &FirewallRuleSet {
        &self.state(chain).rules
    }

    pub fn is_active(&self, chain: ChainType) -> bool {
        self.state(chain).active
    }

    /// Add `uids` to the allow set (or move them to the deny set).
    pub fn set_trustlist(&mut self, chain: ChainType, uids: &[Uid], allowed: bool, fx: &mut Effects) -> Result<()> {
        let changed: BTreeSet<Uid> = uids.iter().copied().collect();
        let state = self.state_mut(chain);
        if state.rules.allowed_len_after(&changed, allowed) > MAX_TRUSTLIST_SIZE {
            warn!(chain = %chain, requested = changed.len(), "Trustlist capacity exceeded");
            return Err(NetPolicyError::CapacityExceeded {
                what: "trustlist",
                limit: MAX_TRUSTLIST_SIZE,
            });
        }
        state.rules.apply(&changed, allowed);
        let rules = state.rules.clone();

        self.persist(chain);
        let command_uids: Vec<Uid> = if allowed {
            rules.allowed.iter().copied().collect()
        } else {
            changed.iter().copied().collect()
        };
        fx.command(NetsysCommand::SetChainAllowlist {
            chain,
            uids: command_uids,
            allowed,
        });
        info!(chain = %chain, count = changed.len(), allowed, "Trustlist updated");
        counter!("netpolicy_trustlist_updates_total", "chain" => chain_label(chain)).increment(1);
        fx.publish(PolicyEvent::TrustlistUpdated {
            chain,
            rules,
            changed,
            added: allowed,
        });
        Ok(())
    }

    /// Switch enforcement of a chain. Fails if it is already in that state.
    pub fn set_chain_active(&mut self, chain: ChainType, active: bool, fx: &mut Effects) -> Result<()> {
        if self.state(chain).active == active {
            debug!(chain = %chain, active, "Chain already in requested state");
            return Err(NetPolicyError::AlreadyInState(chain));
        }
        self.switch_chain(chain, active, fx);
        Ok(())
    }

    fn switch_chain(&mut self, chain: ChainType, active: bool, fx: &mut Effects) {
        let state = self.state_mut(chain);
        state.active = active;
        if active {
            let uids = state.rules.allowed.iter().copied().collect();
            fx.command(NetsysCommand::SetChainAllowlist {
                chain,
                uids,
                allowed: true,
            });
        }
        fx.command(NetsysCommand::SetChainEnforcement { chain, enabled: active });
        info!(chain = %chain, active, "Chain mode changed");
        fx.publish(PolicyEvent::ChainModeChanged { chain, active });
    }

    /// Drop `uid` from both chains and from the kernel chain rules.
    pub fn remove_uid(&mut self, uid: Uid, fx: &mut Effects) {
        for chain in ChainType::ALL {
            if self.state(chain).rules.allowed.contains(&uid) {
                if let Err(e) = self.set_trustlist(chain, &[uid], false, fx) {
                    warn!(chain = %chain, uid, "Failed to revoke trustlist entry: {}", e);
                }
            }
            if self.state_mut(chain).rules.forget(uid) {
                self.persist(chain);
            }
            fx.command(NetsysCommand::RemoveChainUid { chain, uid });
        }
        debug!(uid, "Uid removed from firewall chains");
    }

    /// Empty both chains and switch enforcement off.
    pub fn reset(&mut self, fx: &mut Effects) {
        for chain in ChainType::ALL {
            let state = self.state_mut(chain);
            let changed = state.rules.allowed.clone();
            state.rules.clear();
            self.persist(chain);
            if !changed.is_empty() {
                fx.command(NetsysCommand::SetChainAllowlist {
                    chain,
                    uids: changed.iter().copied().collect(),
                    allowed: false,
                });
            }
            fx.publish(PolicyEvent::TrustlistUpdated {
                chain,
                rules: FirewallRuleSet::default(),
                changed,
                added: false,
            });
            if self.is_active(chain) {
                self.switch_chain(chain, false, fx);
            }
        }
        info!("Firewall chains reset");
    }

    pub fn handle_event(&mut self, event: &PolicyEvent, fx: &mut Effects) {
        match event {
            PolicyEvent::PowerModeChanged { mode } => {
                let active = is_power_save_mode(*mode);
                debug!(mode, active, "Power mode reported");
                match self.set_chain_active(ChainType::PowerSave, active, fx) {
                    Ok(()) | Err(NetPolicyError::AlreadyInState(_)) => {}
                    Err(e) => warn!("Failed to apply power mode {}: {}", mode, e),
                }
            }
            PolicyEvent::UidRemoved { uid } => self.remove_uid(*uid, fx),
            PolicyEvent::ResyncAll => {
                for chain in ChainType::ALL {
                    let rules = self.state(chain).rules.clone();
                    fx.publish(PolicyEvent::TrustlistUpdated {
                        chain,
                        changed: rules.allowed.clone(),
                        rules,
                        added: true,
                    });
                }
            }
            _ => {}
        }
    }

    /// Re-issue chain membership and enforcement for a fresh netsys handle.
    pub fn replay(&self, fx: &mut Effects) {
        for (chain, state) in &self.chains {
            if !state.rules.allowed.is_empty() {
                fx.command(NetsysCommand::SetChainAllowlist {
                    chain: *chain,
                    uids: state.rules.allowed.iter().copied().collect(),
                    allowed: true,
                });
            }
            fx.command(NetsysCommand::SetChainEnforcement {
                chain: *chain,
                enabled: state.active,
            });
        }
    }

    fn state(&self, chain: ChainType) -> &ChainState {
        // both chains are inserted in new()
        &self.chains[&chain]
    }

    fn state_mut(&mut self, chain: ChainType) -> &mut ChainState {
        self.chains.entry(chain).or_default()
    }

    fn persist(&self, chain: ChainType) {
        if let Err(e) = self.repository.save_firewall_rules(chain, &self.state(chain).rules) {
            warn!(chain = %chain, "Failed to persist firewall rules: {}", e);
        }
    }
}

fn chain_label(chain: ChainType) -> &'static str {
    match chain {
        ChainType::DeviceIdle => "device_idle",
        ChainType::PowerSave => "power_save",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::repositories::InMemoryPolicyRepository;

    fn manager() -> (FirewallChainManager, Arc<InMemoryPolicyRepository>) {
        let repo = Arc::new(InMemoryPolicyRepository::new());
        (FirewallChainManager::new(repo.clone()), repo)
    }

    fn set(uids: &[Uid]) -> BTreeSet<Uid> {
        uids.iter().copied().collect()
    }

    #[test]
    fn test_add_sends_full_allow_list() {
        let (mut manager, repo) = manager();
        let mut fx = Effects::new();
        manager.set_trustlist(ChainType::DeviceIdle, &[3, 1], true, &mut fx).unwrap();
        manager.set_trustlist(ChainType::DeviceIdle, &[2], true, &mut fx).unwrap();

        assert_eq!(
            fx.commands.last(),
            Some(&NetsysCommand::SetChainAllowlist {
                chain: ChainType::DeviceIdle,
                uids: vec![1, 2, 3],
                allowed: true
            })
        );
        assert_eq!(repo.load_firewall_rules(ChainType::DeviceIdle).unwrap().allowed, set(&[1, 2, 3]));
        assert!(matches!(
            fx.events.last(),
            Some(PolicyEvent::TrustlistUpdated { added: true, .. })
        ));
    }

    #[test]
    fn test_remove_moves_to_deny_set() {
        let (mut manager, _) = manager();
        let mut fx = Effects::new();
        manager.set_trustlist(ChainType::PowerSave, &[1, 2], true, &mut fx).unwrap();

        let mut fx = Effects::new();
        manager.set_trustlist(ChainType::PowerSave, &[2], false, &mut fx).unwrap();
        let rules = manager.trustlist(ChainType::PowerSave);
        assert_eq!(rules.allowed, set(&[1]));
        assert_eq!(rules.denied, set(&[2]));
        assert!(rules.is_disjoint());
        assert_eq!(
            fx.commands,
            vec![NetsysCommand::SetChainAllowlist {
                chain: ChainType::PowerSave,
                uids: vec![2],
                allowed: false
            }]
        );
    }

    #[test]
    fn test_capacity_exceeded_leaves_state_untouched() {
        let (mut manager, _) = manager();
        let mut fx = Effects::new();
        let uids: Vec<Uid> = (0..MAX_TRUSTLIST_SIZE as Uid).collect();
        manager.set_trustlist(ChainType::DeviceIdle, &uids, true, &mut fx).unwrap();

        let mut fx = Effects::new();
        let err = manager
            .set_trustlist(ChainType::DeviceIdle, &[50_000], true, &mut fx)
            .unwrap_err();
        assert!(matches!(err, NetPolicyError::CapacityExceeded { limit: 1000, .. }));
        assert!(fx.is_empty());
        assert_eq!(manager.trustlist(ChainType::DeviceIdle).allowed.len(), MAX_TRUSTLIST_SIZE);
    }

    #[test]
    fn test_chain_mode_is_not_idempotent() {
        let (mut manager, _) = manager();
        let mut fx = Effects::new();
        manager.set_trustlist(ChainType::DeviceIdle, &[7], true, &mut fx).unwrap();

        let mut fx = Effects::new();
        manager.set_chain_active(ChainType::DeviceIdle, true, &mut fx).unwrap();
        assert_eq!(
            fx.commands,
            vec![
                NetsysCommand::SetChainAllowlist {
                    chain: ChainType::DeviceIdle,
                    uids: vec![7],
                    allowed: true
                },
                NetsysCommand::SetChainEnforcement {
                    chain: ChainType::DeviceIdle,
                    enabled: true
                },
            ]
        );

        let mut fx = Effects::new();
        let err = manager.set_chain_active(ChainType::DeviceIdle, true, &mut fx).unwrap_err();
        assert!(matches!(err, NetPolicyError::AlreadyInState(ChainType::DeviceIdle)));
        assert!(fx.is_empty());
    }

    #[test]
    fn test_power_mode_event_drives_power_save_chain() {
        let (mut manager, _) = manager();
        let mut fx = Effects::new();
        manager.handle_event(&PolicyEvent::PowerModeChanged { mode: 601 }, &mut fx);
        assert!(manager.is_active(ChainType::PowerSave));
        assert!(fx.events.contains(&PolicyEvent::ChainModeChanged {
            chain: ChainType::PowerSave,
            active: true
        }));

        let mut fx = Effects::new();
        manager.handle_event(&PolicyEvent::PowerModeChanged { mode: 603 }, &mut fx);
        assert!(fx.is_empty());

        manager.handle_event(&PolicyEvent::PowerModeChanged { mode: 600 }, &mut fx);
        assert!(!manager.is_active(ChainType::PowerSave));
    }

    #[test]
    fn test_remove_uid_clears_every_chain() {
        let (mut manager, _) = manager();
        let mut fx = Effects::new();
        manager.set_trustlist(ChainType::DeviceIdle, &[4], true, &mut fx).unwrap();
        manager.set_trustlist(ChainType::PowerSave, &[4], false, &mut fx).unwrap();

        let mut fx = Effects::new();
        manager.remove_uid(4, &mut fx);
        for chain in ChainType::ALL {
            assert!(!manager.trustlist(chain).allowed.contains(&4));
            assert!(!manager.trustlist(chain).denied.contains(&4));
            assert!(fx.commands.contains(&NetsysCommand::RemoveChainUid { chain, uid: 4 }));
        }
    }

    #[test]
    fn test_rules_survive_restart() {
        let repo = Arc::new(InMemoryPolicyRepository::new());
        {
            let mut manager = FirewallChainManager::new(repo.clone());
            let mut fx = Effects::new();
            manager.set_trustlist(ChainType::PowerSave, &[10, 11], true, &mut fx).unwrap();
            manager.set_chain_active(ChainType::PowerSave, true, &mut fx).unwrap();
        }
        let manager = FirewallChainManager::new(repo);
        assert_eq!(manager.trustlist(ChainType::PowerSave).allowed, set(&[10, 11]));
        // enforcement is runtime state
        assert!(!manager.is_active(ChainType::PowerSave));
    }

    #[test]
    fn test_reset_clears_and_deactivates() {
        let (mut manager, _) = manager();
        let mut fx = Effects::new();
        manager.set_trustlist(ChainType::DeviceIdle, &[1], true, &mut fx).unwrap();
        manager.set_chain_active(ChainType::DeviceIdle, true, &mut fx).unwrap();

        let mut fx = Effects::new();
        manager.reset(&mut fx);
        assert!(manager.trustlist(ChainType::DeviceIdle).allowed.is_empty());
        assert!(!manager.is_active(ChainType::DeviceIdle));
        assert!(fx.events.contains(&PolicyEvent::ChainModeChanged {
            chain: ChainType::DeviceIdle,
            active: false
        }));
        assert!(fx.commands.contains(&NetsysCommand::SetChainEnforcement {
            chain: ChainType::DeviceIdle,
            enabled: false
        }));
        // an inactive chain is left alone
        assert!(!fx.events.contains(&PolicyEvent::ChainModeChanged {
            chain: ChainType::PowerSave,
            active: false
        }));
        assert!(!manager.is_active(ChainType::PowerSave));
    }
}
