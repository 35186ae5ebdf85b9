// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Firewall chain commands, shared by `idle` and `powersave`
//!
//! Commands: trust, show
//!
//! Chain enforcement is runtime state owned by the daemon; see
//! `netpolicy daemon --device-idle --power-save`.

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::PathBuf;

use super::open_service;
use netpolicy_core::domain::firewall::ChainType;
use netpolicy_core::Uid;

#[derive(Subcommand)]
pub enum ChainCommand {
    /// Add uids to the chain's allow list
    Trust {
        #[arg(required = true, num_args = 1..)]
        uids: Vec<Uid>,

        /// Move the uids to the deny list instead
        #[arg(long)]
        revoke: bool,
    },

    /// Show both lists
    Show,
}

pub async fn handle_command(chain: ChainType, command: ChainCommand, config_override: Option<PathBuf>) -> Result<()> {
    match command {
        ChainCommand::Trust { uids, revoke } => {
            let service = open_service(config_override, true)?;
            service
                .set_trustlist(chain, &uids, !revoke)
                .with_context(|| format!("Failed to update {} trustlist", chain))?;
            let verb = if revoke { "revoked from" } else { "trusted on" };
            println!("{}", format!("✓ {} uid(s) {} {}", uids.len(), verb, chain).green());
            Ok(())
        }
        ChainCommand::Show => {
            let service = open_service(config_override, false)?;
            let rules = service.trustlist(chain);
            println!("{}", format!("{} chain", chain).bold());
            println!("  Allowed ({}): {}", rules.allowed.len(), join(rules.allowed.iter()));
            println!("  Denied ({}): {}", rules.denied.len(), join(rules.denied.iter()));
            Ok(())
        }
    }
}

fn join<'a>(uids: impl Iterator<Item = &'a Uid>) -> String {
    let joined: Vec<String> = uids.map(|uid| uid.to_string()).collect();
    if joined.is_empty() {
        "-".to_string()
    } else {
        joined.join(", ")
    }
}
