// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Uid policy commands
//!
//! Commands: uid set|get|list, check, background get|set, remove-uid

use anyhow::{Context, Result};
use clap::{ArgAction, Subcommand};
use colored::Colorize;
use std::path::PathBuf;

use super::open_service;
use netpolicy_core::{NetBackgroundPolicy, NetUidPolicy, NetUidRule, Uid};

#[derive(Subcommand)]
pub enum UidCommand {
    /// Set the policy for a uid
    Set {
        uid: Uid,

        /// Policy name (e.g. reject_metered_background) or wire value
        #[arg(value_name = "POLICY")]
        policy: String,
    },

    /// Show the policy and computed rule for a uid
    Get { uid: Uid },

    /// List tracked uids
    List {
        /// Only uids holding this policy
        #[arg(long, value_name = "POLICY")]
        policy: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum BackgroundCommand {
    /// Show the global background data switch
    Get {
        /// Also show the verdict for one uid
        #[arg(long)]
        uid: Option<Uid>,
    },

    /// Allow (true) or restrict (false) background data
    Set {
        #[arg(action = ArgAction::Set, value_name = "ALLOW")]
        allow: bool,
    },
}

pub async fn handle_command(command: UidCommand, config_override: Option<PathBuf>) -> Result<()> {
    match command {
        UidCommand::Set { uid, policy } => set(uid, &policy, config_override).await,
        UidCommand::Get { uid } => get(uid, config_override).await,
        UidCommand::List { policy } => list(policy.as_deref(), config_override).await,
    }
}

pub async fn handle_background(command: BackgroundCommand, config_override: Option<PathBuf>) -> Result<()> {
    match command {
        BackgroundCommand::Get { uid } => {
            let service = open_service(config_override, false)?;
            let allowed = service.background_policy();
            println!("Background data: {}", on_off(allowed));
            if let Some(uid) = uid {
                println!("  uid {}: {}", uid, background_label(service.background_policy_by_uid(uid)));
            }
            Ok(())
        }
        BackgroundCommand::Set { allow } => {
            let service = open_service(config_override, true)?;
            if service.set_background_policy(allow) {
                println!("{}", format!("✓ Background data {}", on_off(allow)).green());
            } else {
                println!("Background data already {}", on_off(allow));
            }
            Ok(())
        }
    }
}

async fn set(uid: Uid, policy: &str, config_override: Option<PathBuf>) -> Result<()> {
    let policy: NetUidPolicy = policy.parse().context("Invalid policy")?;
    let service = open_service(config_override, true)?;
    let rule = service
        .set_uid_policy(uid, policy.bits())
        .with_context(|| format!("Failed to set policy for uid {}", uid))?;
    println!(
        "{}",
        format!("✓ uid {} set to {} (rule: {})", uid, policy, rule).green()
    );
    Ok(())
}

async fn get(uid: Uid, config_override: Option<PathBuf>) -> Result<()> {
    let service = open_service(config_override, false)?;
    println!("{}", format!("uid {}", uid).bold());
    println!("  Policy: {}", service.uid_policy(uid));
    println!("  Rule: {}", rule_label(service.uid_rule(uid)));
    println!("  Background: {}", background_label(service.background_policy_by_uid(uid)));
    Ok(())
}

async fn list(policy: Option<&str>, config_override: Option<PathBuf>) -> Result<()> {
    let service = open_service(config_override, false)?;

    if let Some(policy) = policy {
        let policy: NetUidPolicy = policy.parse().context("Invalid policy")?;
        let uids = service.uids_by_policy(policy.bits())?;
        println!("{}", format!("Uids with policy {} ({}):", policy, uids.len()).bold());
        for uid in uids {
            println!("  {}", uid);
        }
        return Ok(());
    }

    let records = service.uid_records();
    if records.is_empty() {
        println!("{}", "No tracked uids".dimmed());
        return Ok(());
    }
    println!("{}", format!("{:>8}  {:<28} {}", "UID", "POLICY", "RULE").bold());
    for record in records {
        println!(
            "{:>8}  {:<28} {}",
            record.uid,
            record.policy.to_string(),
            rule_label(record.effective_rule())
        );
    }
    Ok(())
}

pub async fn check(uid: Uid, metered: bool, iface: Option<String>, config_override: Option<PathBuf>) -> Result<()> {
    let service = open_service(config_override, false)?;
    let (allowed, target) = match iface {
        Some(iface) => (service.is_uid_net_allowed_on_iface(uid, &iface), format!("interface {}", iface)),
        None => {
            let kind = if metered { "metered" } else { "unmetered" };
            (service.is_uid_net_allowed(uid, metered), format!("{} networks", kind))
        }
    };

    if allowed {
        println!("{}", format!("✓ uid {} may use {}", uid, target).green());
    } else {
        println!("{}", format!("✗ uid {} is blocked on {}", uid, target).red());
    }
    Ok(())
}

pub async fn remove(uid: Uid, config_override: Option<PathBuf>) -> Result<()> {
    let service = open_service(config_override, true)?;
    service.delete_uid(uid);
    println!("{}", format!("✓ uid {} removed", uid).green());
    Ok(())
}

fn on_off(allowed: bool) -> colored::ColoredString {
    if allowed {
        "allowed".green()
    } else {
        "restricted".yellow()
    }
}

fn rule_label(rule: NetUidRule) -> colored::ColoredString {
    match rule {
        NetUidRule::RejectAll => rule.to_string().red(),
        NetUidRule::RejectMetered => rule.to_string().yellow(),
        NetUidRule::None => rule.to_string().dimmed(),
        _ => rule.to_string().green(),
    }
}

fn background_label(policy: NetBackgroundPolicy) -> &'static str {
    match policy {
        NetBackgroundPolicy::Enable => "enabled",
        NetBackgroundPolicy::AllowedList => "allowed list",
        NetBackgroundPolicy::Disable => "disabled",
    }
}
