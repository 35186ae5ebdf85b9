// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Kernel-facing collaborator contracts
//!
//! The engines never call netsys themselves. They emit [`NetsysCommand`]s
//! that the application layer dispatches once the state transition that
//! produced them is complete.

use async_trait::async_trait;
use std::sync::Arc;

use crate::domain::firewall::ChainType;
use crate::domain::quota::NetBearType;
use crate::domain::uid_policy::{NetsysDirective, Uid};

#[derive(Debug, thiserror::Error)]
pub enum NetsysError {
    #[error("Netsys service unavailable: {0}")]
    Unavailable(String),

    #[error("Netsys call {call} failed: {reason}")]
    CallFailed { call: &'static str, reason: String },
}

/// Kernel enforcement interface. Every call is best-effort.
pub trait NetsysController: Send + Sync {
    fn set_interface_quota(&self, iface: &str, remaining_bytes: i64) -> Result<(), NetsysError>;
    fn remove_interface_quota(&self, iface: &str) -> Result<(), NetsysError>;
    fn add_to_denylist(&self, uid: Uid) -> Result<(), NetsysError>;
    fn remove_from_denylist(&self, uid: Uid) -> Result<(), NetsysError>;
    fn add_to_allowlist(&self, uid: Uid) -> Result<(), NetsysError>;
    fn remove_from_allowlist(&self, uid: Uid) -> Result<(), NetsysError>;
    fn set_chain_enforcement(&self, chain: ChainType, enabled: bool) -> Result<(), NetsysError>;
    fn set_chain_allowlist(&self, chain: ChainType, uids: &[Uid], allowed: bool) -> Result<(), NetsysError>;
    /// Drop any chain rule held for `uid`, tracked or not.
    fn remove_chain_uid(&self, chain: ChainType, uid: Uid) -> Result<(), NetsysError>;
    fn enable_data_saver(&self, enabled: bool) -> Result<(), NetsysError>;
}

/// Obtains a [`NetsysController`] handle. Startup retries this.
#[async_trait]
pub trait NetsysConnector: Send + Sync {
    async fn connect(&self) -> Result<Arc<dyn NetsysController>, NetsysError>;
}

/// Deferred kernel call produced by an engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetsysCommand {
    /// Bandwidth list directive for a single uid.
    UidDirective { uid: Uid, directive: NetsysDirective },
    SetInterfaceQuota { iface: String, remaining_bytes: i64 },
    RemoveInterfaceQuota { iface: String },
    SetChainEnforcement { chain: ChainType, enabled: bool },
    SetChainAllowlist { chain: ChainType, uids: Vec<Uid>, allowed: bool },
    RemoveChainUid { chain: ChainType, uid: Uid },
    EnableDataSaver { enabled: bool },
}

impl NetsysCommand {
    pub fn name(&self) -> &'static str {
        match self {
            NetsysCommand::UidDirective { directive, .. } => directive.as_str(),
            NetsysCommand::SetInterfaceQuota { .. } => "set_interface_quota",
            NetsysCommand::RemoveInterfaceQuota { .. } => "remove_interface_quota",
            NetsysCommand::SetChainEnforcement { .. } => "set_chain_enforcement",
            NetsysCommand::SetChainAllowlist { .. } => "set_chain_allowlist",
            NetsysCommand::RemoveChainUid { .. } => "remove_chain_uid",
            NetsysCommand::EnableDataSaver { .. } => "enable_data_saver",
        }
    }

    /// Run the command against a controller.
    ///
    /// A uid directive expands into the pair of list calls it stands for.
    pub fn apply(&self, controller: &dyn NetsysController) -> Result<(), NetsysError> {
        match self {
            NetsysCommand::UidDirective { uid, directive } => match directive {
                NetsysDirective::None => Ok(()),
                NetsysDirective::RemoveAll => {
                    controller.remove_from_denylist(*uid)?;
                    controller.remove_from_allowlist(*uid)
                }
                NetsysDirective::AddDenylist => {
                    controller.remove_from_allowlist(*uid)?;
                    controller.add_to_denylist(*uid)
                }
                NetsysDirective::AddAllowlist => {
                    controller.remove_from_denylist(*uid)?;
                    controller.add_to_allowlist(*uid)
                }
            },
            NetsysCommand::SetInterfaceQuota { iface, remaining_bytes } => {
                controller.set_interface_quota(iface, *remaining_bytes)
            }
            NetsysCommand::RemoveInterfaceQuota { iface } => controller.remove_interface_quota(iface),
            NetsysCommand::SetChainEnforcement { chain, enabled } => {
                controller.set_chain_enforcement(*chain, *enabled)
            }
            NetsysCommand::SetChainAllowlist { chain, uids, allowed } => {
                controller.set_chain_allowlist(*chain, uids, *allowed)
            }
            NetsysCommand::RemoveChainUid { chain, uid } => controller.remove_chain_uid(*chain, *uid),
            NetsysCommand::EnableDataSaver { enabled } => controller.enable_data_saver(*enabled),
        }
    }
}

/// Switch a network identity on or off after a quota limit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkToggle {
    pub net_type: NetBearType,
    pub identity: String,
    pub enabled: bool,
}

/// Interface lookup, traffic statistics and data-enable control.
pub trait NetworkCenter: Send + Sync {
    /// Interface currently carrying `identity`, if any.
    fn resolve_interface_name(&self, net_type: NetBearType, identity: &str) -> Option<String>;

    /// Bytes moved over `iface` between the two unix timestamps.
    fn interface_usage(&self, iface: &str, start: i64, end: i64) -> i64;

    fn set_network_enabled(&self, net_type: NetBearType, identity: &str, enabled: bool);
}
