// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Static network center
//!
//! Resolves network identities against a fixed interface table taken from
//! configuration. Cellular identities are SIM iccids and match interface
//! idents of the form `simId<iccid>`; every other type matches the ident
//! directly. An empty identity matches the first interface of that type.

use parking_lot::RwLock;
use std::collections::BTreeMap;
use tracing::{debug, info};

use crate::domain::config::InterfaceBinding;
use crate::domain::netsys::NetworkCenter;
use crate::domain::quota::NetBearType;

const CELLULAR_IDENT_PREFIX: &str = "simId";

#[derive(Debug, Clone)]
struct InterfaceEntry {
    net_type: NetBearType,
    ident: String,
    interface: String,
    enabled: bool,
}

#[derive(Debug, Default)]
pub struct StaticNetworkCenter {
    interfaces: RwLock<Vec<InterfaceEntry>>,
    usage: RwLock<BTreeMap<String, i64>>,
}

impl StaticNetworkCenter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_bindings(bindings: &[InterfaceBinding]) -> Self {
        let center = Self::new();
        for binding in bindings {
            center.add_interface(binding.net_type, &binding.identity, &binding.interface);
            center.set_usage(&binding.interface, binding.usage_bytes);
        }
        center
    }

    /// Register an interface. Cellular identities are stored as `simId<iccid>`.
    pub fn add_interface(&self, net_type: NetBearType, identity: &str, interface: &str) {
        let ident = Self::ident_for(net_type, identity);
        self.interfaces.write().push(InterfaceEntry {
            net_type,
            ident,
            interface: interface.to_string(),
            enabled: true,
        });
    }

    /// Set the byte counter reported for an interface.
    pub fn set_usage(&self, interface: &str, bytes: i64) {
        self.usage.write().insert(interface.to_string(), bytes);
    }

    pub fn is_enabled(&self, net_type: NetBearType, identity: &str) -> bool {
        let ident = Self::ident_for(net_type, identity);
        self.interfaces
            .read()
            .iter()
            .filter(|entry| entry.net_type == net_type && entry.ident == ident)
            .all(|entry| entry.enabled)
    }

    fn ident_for(net_type: NetBearType, identity: &str) -> String {
        match net_type {
            NetBearType::Cellular => format!("{CELLULAR_IDENT_PREFIX}{identity}"),
            _ => identity.to_string(),
        }
    }

    fn matches(entry: &InterfaceEntry, net_type: NetBearType, identity: &str) -> bool {
        entry.net_type == net_type && (identity.is_empty() || entry.ident == Self::ident_for(net_type, identity))
    }
}

impl NetworkCenter for StaticNetworkCenter {
    fn resolve_interface_name(&self, net_type: NetBearType, identity: &str) -> Option<String> {
        let resolved = self
            .interfaces
            .read()
            .iter()
            .find(|entry| Self::matches(entry, net_type, identity))
            .map(|entry| entry.interface.clone());
        debug!(net_type = %net_type, identity, ?resolved, "Resolved interface");
        resolved
    }

    fn interface_usage(&self, iface: &str, _start: i64, _end: i64) -> i64 {
        self.usage.read().get(iface).copied().unwrap_or(0).max(0)
    }

    fn set_network_enabled(&self, net_type: NetBearType, identity: &str, enabled: bool) {
        info!(net_type = %net_type, identity, enabled, "Setting network enable status");
        for entry in self.interfaces.write().iter_mut() {
            if Self::matches(entry, net_type, identity) {
                entry.enabled = enabled;
            }
        }
    }
}
