// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! JSON file policy repository
//!
//! Every save rewrites the whole document: the new content goes to
//! `<path>.tmp`, the current document is copied to `<path>.bak`, then the
//! temporary file is renamed over `<path>`. Loads fall back to the backup
//! when the main document is missing or unreadable.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::domain::firewall::{ChainType, FirewallRuleSet};
use crate::domain::quota::QuotaPolicy;
use crate::domain::repository::{PolicyRepository, PolicyState, RepositoryError};
use crate::domain::uid_policy::{NetUidPolicy, Uid};

const DOCUMENT_VERSION: &str = "1.0";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct UidPolicyEntry {
    uid: Uid,
    policy: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
enum BackgroundStatus {
    Allow,
    Reject,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct BackgroundEntry {
    status: BackgroundStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PolicyDocument {
    #[serde(rename = "hosVersion")]
    version: String,
    #[serde(rename = "uidPolicy", default)]
    uid_policy: Vec<UidPolicyEntry>,
    #[serde(rename = "backgroundPolicy")]
    background_policy: BackgroundEntry,
    #[serde(rename = "quotaPolicy", default)]
    quota_policy: Vec<QuotaPolicy>,
    #[serde(rename = "firewallList", default)]
    firewall_list: BTreeMap<ChainType, FirewallRuleSet>,
}

impl Default for PolicyDocument {
    fn default() -> Self {
        Self {
            version: DOCUMENT_VERSION.to_string(),
            uid_policy: Vec::new(),
            background_policy: BackgroundEntry {
                status: BackgroundStatus::Allow,
            },
            quota_policy: Vec::new(),
            firewall_list: BTreeMap::new(),
        }
    }
}

impl PolicyDocument {
    fn policy_state(&self) -> PolicyState {
        let uid_policies = self
            .uid_policy
            .iter()
            .filter_map(|entry| match NetUidPolicy::try_from(entry.policy) {
                Ok(policy) if !policy.is_none() => Some((entry.uid, policy)),
                Ok(_) => None,
                Err(e) => {
                    warn!("Dropping stored policy for uid {}: {}", entry.uid, e);
                    None
                }
            })
            .collect();
        PolicyState {
            uid_policies,
            background_allowed: self.background_policy.status == BackgroundStatus::Allow,
        }
    }

    fn set_policy_state(&mut self, state: &PolicyState) {
        self.uid_policy = state
            .uid_policies
            .iter()
            .filter(|(_, policy)| !policy.is_none())
            .map(|(uid, policy)| UidPolicyEntry {
                uid: *uid,
                policy: policy.bits(),
            })
            .collect();
        self.background_policy.status = if state.background_allowed {
            BackgroundStatus::Allow
        } else {
            BackgroundStatus::Reject
        };
    }
}

pub struct JsonFilePolicyRepository {
    path: PathBuf,
    document: Mutex<Option<PolicyDocument>>,
}

impl JsonFilePolicyRepository {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            document: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn backup_path(&self) -> PathBuf {
        sibling(&self.path, "bak")
    }

    fn read_document(path: &Path) -> Result<Option<PolicyDocument>, RepositoryError> {
        match std::fs::read_to_string(path) {
            Ok(content) => serde_json::from_str(&content)
                .map(Some)
                .map_err(|e| RepositoryError::Corrupt(format!("{}: {}", path.display(), e))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn load_from_disk(&self) -> Result<PolicyDocument, RepositoryError> {
        match Self::read_document(&self.path) {
            Ok(Some(document)) => Ok(document),
            Ok(None) => Ok(Self::read_document(&self.backup_path())?.unwrap_or_default()),
            Err(e) => {
                warn!("Policy document unreadable, trying backup: {}", e);
                match Self::read_document(&self.backup_path())? {
                    Some(document) => Ok(document),
                    None => Err(e),
                }
            }
        }
    }

    /// Run `f` against the cached document, loading it on first use.
    fn with_document<R>(
        &self,
        f: impl FnOnce(&mut PolicyDocument) -> R,
    ) -> Result<R, RepositoryError> {
        let mut guard = self.document.lock();
        if guard.is_none() {
            *guard = Some(self.load_from_disk()?);
        }
        match guard.as_mut() {
            Some(document) => Ok(f(document)),
            None => Err(RepositoryError::Corrupt("document cache empty".to_string())),
        }
    }

    fn update(&self, f: impl FnOnce(&mut PolicyDocument)) -> Result<(), RepositoryError> {
        let content = self.with_document(|document| {
            f(document);
            serde_json::to_string_pretty(document)
        })??;
        self.write_atomically(&content)
    }

    fn write_atomically(&self, content: &str) -> Result<(), RepositoryError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let tmp = sibling(&self.path, "tmp");
        std::fs::write(&tmp, content)?;
        if self.path.exists() {
            std::fs::copy(&self.path, self.backup_path())?;
        }
        std::fs::rename(&tmp, &self.path)?;
        debug!("Policy document written to {}", self.path.display());
        Ok(())
    }
}

fn sibling(path: &Path, extension: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".");
    name.push(extension);
    PathBuf::from(name)
}

impl PolicyRepository for JsonFilePolicyRepository {
    fn load_policy_state(&self) -> Result<PolicyState, RepositoryError> {
        self.with_document(|document| document.policy_state())
    }

    fn save_policy_state(&self, state: &PolicyState) -> Result<(), RepositoryError> {
        self.update(|document| document.set_policy_state(state))
    }

    fn load_quota_policies(&self) -> Result<Vec<QuotaPolicy>, RepositoryError> {
        self.with_document(|document| document.quota_policy.clone())
    }

    fn save_quota_policies(&self, policies: &[QuotaPolicy]) -> Result<(), RepositoryError> {
        self.update(|document| document.quota_policy = policies.to_vec())
    }

    fn load_firewall_rules(&self, chain: ChainType) -> Result<FirewallRuleSet, RepositoryError> {
        self.with_document(|document| document.firewall_list.get(&chain).cloned().unwrap_or_default())
    }

    fn save_firewall_rules(&self, chain: ChainType, rules: &FirewallRuleSet) -> Result<(), RepositoryError> {
        self.update(|document| {
            document.firewall_list.insert(chain, rules.clone());
        })
    }
}
