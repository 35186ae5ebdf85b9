// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Domain Repository Interface
//!
//! Persistence contract for the policy engine. The domain layer defines it;
//! `crate::infrastructure::repositories` implements it.
//!
//! | Operation | Owner | Payload |
//! |-----------|-------|---------|
//! | `load_policy_state` / `save_policy_state` | `PolicyRuleEngine` | uid → policy table, background flag |
//! | `load_quota_policies` / `save_quota_policies` | `QuotaAccountant` | quota policy list |
//! | `load_firewall_rules` / `save_firewall_rules` | `FirewallChainManager` | per-chain allow/deny sets |
//!
//! Saves are fire-and-forget from the engines' point of view: a failed save
//! is logged and the in-memory model stays authoritative.

use std::collections::BTreeMap;

use crate::domain::firewall::{ChainType, FirewallRuleSet};
use crate::domain::quota::QuotaPolicy;
use crate::domain::uid_policy::{NetUidPolicy, Uid};

/// Storage backend selection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageBackend {
    InMemory,
    JsonFile { path: std::path::PathBuf },
}

/// Persisted rule-engine state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyState {
    /// Only non-default policies are kept.
    pub uid_policies: BTreeMap<Uid, NetUidPolicy>,
    pub background_allowed: bool,
}

impl Default for PolicyState {
    fn default() -> Self {
        Self {
            uid_policies: BTreeMap::new(),
            background_allowed: true,
        }
    }
}

pub trait PolicyRepository: Send + Sync {
    fn load_policy_state(&self) -> Result<PolicyState, RepositoryError>;

    fn save_policy_state(&self, state: &PolicyState) -> Result<(), RepositoryError>;

    fn load_quota_policies(&self) -> Result<Vec<QuotaPolicy>, RepositoryError>;

    fn save_quota_policies(&self, policies: &[QuotaPolicy]) -> Result<(), RepositoryError>;

    fn load_firewall_rules(&self, chain: ChainType) -> Result<FirewallRuleSet, RepositoryError>;

    fn save_firewall_rules(&self, chain: ChainType, rules: &FirewallRuleSet) -> Result<(), RepositoryError>;
}

/// Repository errors
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Corrupt document: {0}")]
    Corrupt(String),
}

impl From<serde_json::Error> for RepositoryError {
    fn from(err: serde_json::Error) -> Self {
        RepositoryError::Serialization(err.to_string())
    }
}
