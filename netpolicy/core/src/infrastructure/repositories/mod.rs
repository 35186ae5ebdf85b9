// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Repository Implementations
//!
//! Infrastructure implementations of [`PolicyRepository`], following the
//! Repository pattern from DDD.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure
//! - **Purpose:** Persist and retrieve policy state
//! - **Pattern:** Repository (DDD), Adapter (Hexagonal Architecture)
//!
//! # Available Implementations
//!
//! - **InMemoryPolicyRepository** - Lock-guarded, process-lifetime storage
//!   for tests and ephemeral nodes
//! - **JsonFilePolicyRepository** - Single JSON document with atomic
//!   replace and a `.bak` copy of the previous version

pub mod json_file;

use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::domain::firewall::{ChainType, FirewallRuleSet};
use crate::domain::quota::QuotaPolicy;
use crate::domain::repository::{PolicyRepository, PolicyState, RepositoryError, StorageBackend};

pub use json_file::JsonFilePolicyRepository;

#[derive(Debug, Default)]
struct StoredPolicies {
    state: PolicyState,
    quota: Vec<QuotaPolicy>,
    firewall: BTreeMap<ChainType, FirewallRuleSet>,
}

#[derive(Debug, Default)]
pub struct InMemoryPolicyRepository {
    inner: RwLock<StoredPolicies>,
}

impl InMemoryPolicyRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PolicyRepository for InMemoryPolicyRepository {
    fn load_policy_state(&self) -> Result<PolicyState, RepositoryError> {
        Ok(self.inner.read().state.clone())
    }

    fn save_policy_state(&self, state: &PolicyState) -> Result<(), RepositoryError> {
        self.inner.write().state = state.clone();
        Ok(())
    }

    fn load_quota_policies(&self) -> Result<Vec<QuotaPolicy>, RepositoryError> {
        Ok(self.inner.read().quota.clone())
    }

    fn save_quota_policies(&self, policies: &[QuotaPolicy]) -> Result<(), RepositoryError> {
        self.inner.write().quota = policies.to_vec();
        Ok(())
    }

    fn load_firewall_rules(&self, chain: ChainType) -> Result<FirewallRuleSet, RepositoryError> {
        Ok(self.inner.read().firewall.get(&chain).cloned().unwrap_or_default())
    }

    fn save_firewall_rules(&self, chain: ChainType, rules: &FirewallRuleSet) -> Result<(), RepositoryError> {
        self.inner.write().firewall.insert(chain, rules.clone());
        Ok(())
    }
}

/// Build the repository selected by configuration.
pub fn create_repository(backend: &StorageBackend) -> Arc<dyn PolicyRepository> {
    match backend {
        StorageBackend::InMemory => Arc::new(InMemoryPolicyRepository::new()),
        StorageBackend::JsonFile { path } => Arc::new(JsonFilePolicyRepository::new(path.clone())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::quota::NetBearType;
    use crate::domain::uid_policy::NetUidPolicy;

    #[test]
    fn test_in_memory_round_trip() {
        let repo = InMemoryPolicyRepository::new();
        assert!(repo.load_policy_state().unwrap().background_allowed);

        let mut state = PolicyState::default();
        state.uid_policies.insert(42, NetUidPolicy::RejectAll);
        state.background_allowed = false;
        repo.save_policy_state(&state).unwrap();
        assert_eq!(repo.load_policy_state().unwrap(), state);

        repo.save_quota_policies(&[QuotaPolicy::new(NetBearType::Wifi, "home")]).unwrap();
        assert_eq!(repo.load_quota_policies().unwrap().len(), 1);

        let mut rules = FirewallRuleSet::default();
        rules.allowed.insert(7);
        repo.save_firewall_rules(ChainType::PowerSave, &rules).unwrap();
        assert_eq!(repo.load_firewall_rules(ChainType::PowerSave).unwrap(), rules);
        assert_eq!(repo.load_firewall_rules(ChainType::DeviceIdle).unwrap(), FirewallRuleSet::default());
    }
}
