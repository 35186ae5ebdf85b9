// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Service assembly
//!
//! Builds the engines from a repository, wires them into a [`PolicyCore`]
//! and wraps that in a [`NetPolicyService`]. A full resync is published
//! before the service is handed out so every tracked uid has a computed rule.

use std::sync::Arc;
use tracing::info;

use crate::application::firewall_manager::FirewallChainManager;
use crate::application::policy_core::PolicyCore;
use crate::application::policy_service::NetPolicyService;
use crate::application::quota_accountant::QuotaAccountant;
use crate::application::rule_engine::PolicyRuleEngine;
use crate::domain::clock::Clock;
use crate::domain::config::NetPolicyConfigManifest;
use crate::domain::error::{NetPolicyError, Result};
use crate::domain::netsys::NetworkCenter;
use crate::domain::repository::PolicyRepository;
use crate::infrastructure::clock::SystemClock;
use crate::infrastructure::network_center::StaticNetworkCenter;
use crate::infrastructure::repositories::create_repository;

pub fn assemble_policy_service(
    repository: Arc<dyn PolicyRepository>,
    network_center: Arc<dyn NetworkCenter>,
    clock: Arc<dyn Clock>,
    max_observers: usize,
) -> Arc<NetPolicyService> {
    let core = PolicyCore::new(
        PolicyRuleEngine::new(repository.clone()),
        FirewallChainManager::new(repository.clone()),
        QuotaAccountant::new(repository, network_center.clone(), clock),
    );
    let service = Arc::new(NetPolicyService::new(core, network_center, max_observers));
    service.resync();
    service
}

/// Build a service from configuration with the static network center and
/// the system clock.
pub fn build_policy_service(config: &NetPolicyConfigManifest) -> Result<Arc<NetPolicyService>> {
    config
        .validate()
        .map_err(|e| NetPolicyError::Config(e.to_string()))?;
    let backend = config.spec.storage.backend();
    info!(backend = ?backend, interfaces = config.spec.interfaces.len(), "Building policy service");

    let repository = create_repository(&backend);
    let network_center = Arc::new(StaticNetworkCenter::from_bindings(&config.spec.interfaces));
    Ok(assemble_policy_service(
        repository,
        network_center,
        Arc::new(SystemClock),
        config.spec.observers.max_registered,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::config::StorageKind;

    #[test]
    fn test_default_config_builds_in_memory_service() {
        let config = NetPolicyConfigManifest::default();
        let service = build_policy_service(&config).unwrap();
        assert!(service.background_policy());
        assert!(!service.netsys_attached());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = NetPolicyConfigManifest::default();
        config.spec.storage.backend = StorageKind::JsonFile;
        config.spec.storage.path = None;
        assert!(matches!(build_policy_service(&config), Err(NetPolicyError::Config(_))));
    }

    #[test]
    fn test_json_storage_survives_rebuild() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = NetPolicyConfigManifest::default();
        config.spec.storage.backend = StorageKind::JsonFile;
        config.spec.storage.path = Some(dir.path().join("policy.json"));

        let service = build_policy_service(&config).unwrap();
        service.set_uid_policy(42, 64).unwrap();
        service.set_device_idle_trustlist(&[7], true).unwrap();
        drop(service);

        let service = build_policy_service(&config).unwrap();
        assert_eq!(service.uid_policy(42).bits(), 64);
        assert!(!service.is_uid_net_allowed(42, false));
        assert!(service.device_idle_trustlist().allowed.contains(&7));
    }
}
