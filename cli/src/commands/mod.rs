// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Command implementations for the netpolicy CLI

pub mod chain;
pub mod config;
pub mod daemon;
pub mod quota;
pub mod uid;

pub use self::chain::ChainCommand;
pub use self::config::ConfigCommand;
pub use self::daemon::DaemonArgs;
pub use self::quota::QuotaCommand;
pub use self::uid::{BackgroundCommand, UidCommand};

use anyhow::{Context, Result};
use colored::Colorize;
use std::path::PathBuf;
use std::sync::Arc;

use netpolicy_core::application::build_policy_service;
use netpolicy_core::domain::config::{NetPolicyConfigManifest, StorageKind};
use netpolicy_core::NetPolicyService;

/// Load configuration and build a service over its policy store.
///
/// `mutating` commands warn when the store does not outlive the process.
pub(crate) fn open_service(config_override: Option<PathBuf>, mutating: bool) -> Result<Arc<NetPolicyService>> {
    let config = NetPolicyConfigManifest::load_or_default(config_override).context("Failed to load configuration")?;
    if mutating && config.spec.storage.backend == StorageKind::Memory {
        eprintln!(
            "{}",
            "WARNING: storage backend is 'memory', this change is discarded on exit.".yellow()
        );
    }
    build_policy_service(&config).context("Failed to build policy service")
}
