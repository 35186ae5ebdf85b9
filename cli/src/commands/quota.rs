// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Quota policy commands
//!
//! Commands: set, list, remind, reset

use anyhow::{Context, Result};
use clap::{Subcommand, ValueEnum};
use colored::Colorize;
use std::path::PathBuf;

use super::open_service;
use netpolicy_core::domain::quota::{
    LimitAction, NetBearType, QuotaPolicy, QuotaPolicyRequest, DATA_USAGE_UNKNOWN, DATA_USAGE_UNLIMITED, REMIND_NEVER,
};

#[derive(Clone, Copy, ValueEnum)]
pub enum ActionArg {
    AlertOnly,
    AutoBill,
    AccessDisabled,
}

impl From<ActionArg> for LimitAction {
    fn from(value: ActionArg) -> Self {
        match value {
            ActionArg::AlertOnly => LimitAction::AlertOnly,
            ActionArg::AutoBill => LimitAction::AutoBill,
            ActionArg::AccessDisabled => LimitAction::AccessDisabled,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
pub enum RemindArg {
    Warning,
    Limit,
}

impl RemindArg {
    fn wire_value(self) -> u32 {
        match self {
            RemindArg::Warning => 1,
            RemindArg::Limit => 2,
        }
    }
}

#[derive(Subcommand)]
pub enum QuotaCommand {
    /// Add or replace one quota policy, or load a whole set from a file
    Set {
        /// Network type (cellular, wifi, ethernet, ... or wire value)
        #[arg(long, default_value = "cellular", conflicts_with = "file")]
        net_type: String,

        /// Network identity (SIM iccid for cellular)
        #[arg(long, default_value = "")]
        identity: String,

        /// Billing period, e.g. M1 or D0
        #[arg(long, default_value = "M1")]
        period: String,

        /// Limit in bytes
        #[arg(long)]
        limit: Option<i64>,

        /// Warning threshold in bytes (default: 90% of the limit)
        #[arg(long)]
        warning: Option<i64>,

        /// Treat the network as metered
        #[arg(long)]
        metered: bool,

        /// What happens at the limit
        #[arg(long, value_enum, default_value = "alert-only")]
        action: ActionArg,

        /// JSON or YAML list of policies replacing the whole set
        #[arg(long, value_name = "FILE")]
        file: Option<PathBuf>,

        /// Reject the file if any entry is invalid
        #[arg(long, requires = "file")]
        strict: bool,
    },

    /// List quota policies and metered interfaces
    List,

    /// Mark a reminder as shown now
    Remind {
        /// Network type (name or wire value)
        net_type: String,

        identity: String,

        #[arg(value_enum)]
        remind: RemindArg,
    },

    /// Reset quota policies to defaults (all of them without an identity)
    Reset {
        #[arg(default_value = "")]
        identity: String,
    },
}

pub async fn handle_command(command: QuotaCommand, config_override: Option<PathBuf>) -> Result<()> {
    match command {
        QuotaCommand::Set {
            file: Some(file), strict, ..
        } => set_from_file(file, strict, config_override).await,
        QuotaCommand::Set {
            net_type,
            identity,
            period,
            limit,
            warning,
            metered,
            action,
            ..
        } => {
            let net_type: NetBearType = net_type.parse().context("Invalid network type")?;
            let request = QuotaPolicyRequest {
                period_duration: period,
                limit_bytes: limit.unwrap_or(DATA_USAGE_UNKNOWN),
                warning_bytes: warning.unwrap_or(DATA_USAGE_UNKNOWN),
                metered,
                limit_action: action.into(),
                ..QuotaPolicyRequest::new(net_type, identity)
            };
            set_one(request, config_override).await
        }
        QuotaCommand::List => list(config_override).await,
        QuotaCommand::Remind {
            net_type,
            identity,
            remind,
        } => {
            let net_type: NetBearType = net_type.parse().context("Invalid network type")?;
            let service = open_service(config_override, true)?;
            service
                .update_remind_policy(net_type.as_i32(), &identity, remind.wire_value())
                .context("Failed to update remind policy")?;
            println!("{}", "✓ Remind time updated".green());
            Ok(())
        }
        QuotaCommand::Reset { identity } => {
            let service = open_service(config_override, true)?;
            let count = service.reset_policies(&identity);
            println!(
                "{}",
                format!("✓ Policies reset ({} quota polic{})", count, if count == 1 { "y" } else { "ies" }).green()
            );
            Ok(())
        }
    }
}

/// Merge one policy into the current set; a matching key is replaced.
async fn set_one(request: QuotaPolicyRequest, config_override: Option<PathBuf>) -> Result<()> {
    let service = open_service(config_override, true)?;
    let mut requests: Vec<QuotaPolicyRequest> = service.quota_policies().into_iter().map(Into::into).collect();
    requests.push(request);
    let kept = service
        .set_quota_policies_strict(requests)
        .context("Failed to set quota policy")?;
    println!("{}", format!("✓ Quota policy saved ({} total)", kept).green());
    Ok(())
}

async fn set_from_file(file: PathBuf, strict: bool, config_override: Option<PathBuf>) -> Result<()> {
    let content = std::fs::read_to_string(&file).with_context(|| format!("Failed to read {:?}", file))?;
    let requests: Vec<QuotaPolicyRequest> = if file.extension().is_some_and(|ext| ext == "json") {
        serde_json::from_str(&content).context("Failed to parse quota policies")?
    } else {
        serde_yaml::from_str(&content).context("Failed to parse quota policies")?
    };
    let submitted = requests.len();

    let service = open_service(config_override, true)?;
    let kept = if strict {
        service.set_quota_policies_strict(requests)
    } else {
        service.set_quota_policies(requests)
    }
    .context("Failed to set quota policies")?;

    println!("{}", format!("✓ {} of {} quota policies accepted", kept, submitted).green());
    Ok(())
}

async fn list(config_override: Option<PathBuf>) -> Result<()> {
    let service = open_service(config_override, false)?;
    let policies = service.quota_policies();
    if policies.is_empty() {
        println!("{}", "No quota policies".dimmed());
    }
    for policy in &policies {
        print_policy(policy);
    }

    let metered = service.metered_ifaces();
    println!(
        "{} {}",
        "Metered interfaces:".bold(),
        if metered.is_empty() { "-".to_string() } else { metered.join(", ") }
    );
    Ok(())
}

fn print_policy(policy: &QuotaPolicy) {
    let identity = if policy.identity.is_empty() { "*" } else { &policy.identity };
    println!("{}", format!("{} {}", policy.net_type, identity).bold());
    println!("  Period: {}", policy.period);
    println!("  Limit: {}", bytes(policy.limit_bytes));
    println!("  Warning: {}", bytes(policy.warning_bytes));
    println!("  Metered: {}", policy.metered);
    println!("  Action: {:?}", policy.limit_action);
    println!("  Last warning remind: {}", remind(policy.last_warning_remind));
    println!("  Last limit remind: {}", remind(policy.last_limit_remind));
}

fn bytes(value: i64) -> String {
    match value {
        DATA_USAGE_UNLIMITED => "unlimited".to_string(),
        DATA_USAGE_UNKNOWN => "unknown".to_string(),
        other => format!("{} B", other),
    }
}

fn remind(value: i64) -> String {
    if value == REMIND_NEVER {
        "never".to_string()
    } else {
        value.to_string()
    }
}
