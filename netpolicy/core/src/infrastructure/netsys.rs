// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Netsys controller adapters
//!
//! [`TracingNetsysController`] stands in for the kernel bridge on hosts
//! without one: every call is logged and mirrored into an inspectable
//! [`NetsysSnapshot`]. [`LocalNetsysConnector`] hands it out, optionally
//! failing the first few attempts.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

use crate::domain::firewall::ChainType;
use crate::domain::netsys::{NetsysConnector, NetsysController, NetsysError};
use crate::domain::uid_policy::Uid;

/// Kernel-side state as the controller believes it to be.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NetsysSnapshot {
    pub denylist: BTreeSet<Uid>,
    pub allowlist: BTreeSet<Uid>,
    pub interface_quota: BTreeMap<String, i64>,
    pub chain_enforcement: BTreeMap<ChainType, bool>,
    pub chain_allowlist: BTreeMap<ChainType, BTreeSet<Uid>>,
    pub data_saver: bool,
}

#[derive(Debug, Default)]
pub struct TracingNetsysController {
    state: RwLock<NetsysSnapshot>,
}

impl TracingNetsysController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> NetsysSnapshot {
        self.state.read().clone()
    }
}

impl NetsysController for TracingNetsysController {
    fn set_interface_quota(&self, iface: &str, remaining_bytes: i64) -> Result<(), NetsysError> {
        debug!(iface, remaining_bytes, "netsys: set interface quota");
        self.state.write().interface_quota.insert(iface.to_string(), remaining_bytes);
        Ok(())
    }

    fn remove_interface_quota(&self, iface: &str) -> Result<(), NetsysError> {
        debug!(iface, "netsys: remove interface quota");
        self.state.write().interface_quota.remove(iface);
        Ok(())
    }

    fn add_to_denylist(&self, uid: Uid) -> Result<(), NetsysError> {
        debug!(uid, "netsys: add to denylist");
        self.state.write().denylist.insert(uid);
        Ok(())
    }

    fn remove_from_denylist(&self, uid: Uid) -> Result<(), NetsysError> {
        debug!(uid, "netsys: remove from denylist");
        self.state.write().denylist.remove(&uid);
        Ok(())
    }

    fn add_to_allowlist(&self, uid: Uid) -> Result<(), NetsysError> {
        debug!(uid, "netsys: add to allowlist");
        self.state.write().allowlist.insert(uid);
        Ok(())
    }

    fn remove_from_allowlist(&self, uid: Uid) -> Result<(), NetsysError> {
        debug!(uid, "netsys: remove from allowlist");
        self.state.write().allowlist.remove(&uid);
        Ok(())
    }

    fn set_chain_enforcement(&self, chain: ChainType, enabled: bool) -> Result<(), NetsysError> {
        info!(chain = %chain, chain_id = chain.chain_id(), enabled, "netsys: chain enforcement");
        self.state.write().chain_enforcement.insert(chain, enabled);
        Ok(())
    }

    fn set_chain_allowlist(&self, chain: ChainType, uids: &[Uid], allowed: bool) -> Result<(), NetsysError> {
        debug!(chain = %chain, count = uids.len(), allowed, "netsys: chain allowlist");
        let mut state = self.state.write();
        let members = state.chain_allowlist.entry(chain).or_default();
        if allowed {
            members.extend(uids.iter().copied());
        } else {
            for uid in uids {
                members.remove(uid);
            }
        }
        Ok(())
    }

    fn remove_chain_uid(&self, chain: ChainType, uid: Uid) -> Result<(), NetsysError> {
        debug!(chain = %chain, uid, "netsys: remove chain uid");
        if let Some(members) = self.state.write().chain_allowlist.get_mut(&chain) {
            members.remove(&uid);
        }
        Ok(())
    }

    fn enable_data_saver(&self, enabled: bool) -> Result<(), NetsysError> {
        info!(enabled, "netsys: data saver");
        self.state.write().data_saver = enabled;
        Ok(())
    }
}

/// Connector that returns a shared [`TracingNetsysController`].
pub struct LocalNetsysConnector {
    controller: Arc<TracingNetsysController>,
    failures_left: AtomicU32,
    attempts: AtomicU32,
}

impl LocalNetsysConnector {
    pub fn new(controller: Arc<TracingNetsysController>) -> Self {
        Self::failing_first(controller, 0)
    }

    /// Fail the first `failures` connection attempts.
    pub fn failing_first(controller: Arc<TracingNetsysController>, failures: u32) -> Self {
        Self {
            controller,
            failures_left: AtomicU32::new(failures),
            attempts: AtomicU32::new(0),
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl NetsysConnector for LocalNetsysConnector {
    async fn connect(&self) -> Result<Arc<dyn NetsysController>, NetsysError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let failed = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failed {
            return Err(NetsysError::Unavailable("netsys service not registered yet".to_string()));
        }
        Ok(self.controller.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_controller_tracks_lists() {
        let controller = TracingNetsysController::new();
        controller.add_to_denylist(5).unwrap();
        controller.add_to_allowlist(6).unwrap();
        controller.remove_from_denylist(5).unwrap();
        controller.set_chain_allowlist(ChainType::DeviceIdle, &[1, 2, 3], true).unwrap();
        controller.set_chain_allowlist(ChainType::DeviceIdle, &[2], false).unwrap();
        controller.remove_chain_uid(ChainType::DeviceIdle, 3).unwrap();

        let snapshot = controller.snapshot();
        assert!(snapshot.denylist.is_empty());
        assert!(snapshot.allowlist.contains(&6));
        let expected: BTreeSet<Uid> = [1].into_iter().collect();
        assert_eq!(snapshot.chain_allowlist[&ChainType::DeviceIdle], expected);
    }

    #[test]
    fn test_connector_fails_first_attempts() {
        let connector = LocalNetsysConnector::failing_first(Arc::new(TracingNetsysController::new()), 2);
        assert!(tokio_test::block_on(connector.connect()).is_err());
        assert!(tokio_test::block_on(connector.connect()).is_err());
        assert!(tokio_test::block_on(connector.connect()).is_ok());
        assert_eq!(connector.attempts(), 3);
    }
}
