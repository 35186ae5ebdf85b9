// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # netpolicy CLI
//!
//! The `netpolicy` binary inspects and edits the policy store described by
//! the configuration manifest, and runs the policy worker as a daemon.
//!
//! ## Commands
//!
//! - `netpolicy uid set|get|list` - Per-uid policies
//! - `netpolicy check <uid>` - Network access verdict for a uid
//! - `netpolicy background get|set` - Global background data switch
//! - `netpolicy idle|powersave trust|show` - Firewall chain lists
//! - `netpolicy quota set|list|remind|reset` - Data quota policies
//! - `netpolicy config show|validate|generate` - Configuration management
//! - `netpolicy daemon` - Run the policy worker until interrupted; chain
//!   enforcement is switched on here with `--device-idle` / `--power-save`

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;

mod commands;

use commands::{BackgroundCommand, ChainCommand, ConfigCommand, DaemonArgs, QuotaCommand, UidCommand};
use netpolicy_core::domain::config::NetPolicyConfigManifest;
use netpolicy_core::domain::firewall::ChainType;
use netpolicy_core::Uid;

/// Network access policy engine
#[derive(Parser)]
#[command(name = "netpolicy")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file (overrides discovery)
    #[arg(short, long, global = true, env = "NETPOLICY_CONFIG_PATH", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Per-uid network policies
    #[command(name = "uid")]
    Uid {
        #[command(subcommand)]
        command: UidCommand,
    },

    /// Check whether a uid may use the network
    #[command(name = "check")]
    Check {
        uid: Uid,

        /// Ask about a metered network
        #[arg(long, conflicts_with = "iface")]
        metered: bool,

        /// Ask about a specific interface
        #[arg(long)]
        iface: Option<String>,
    },

    /// Global background data policy
    #[command(name = "background")]
    Background {
        #[command(subcommand)]
        command: BackgroundCommand,
    },

    /// Device-idle firewall chain
    #[command(name = "idle")]
    Idle {
        #[command(subcommand)]
        command: ChainCommand,
    },

    /// Power-save firewall chain
    #[command(name = "powersave")]
    Powersave {
        #[command(subcommand)]
        command: ChainCommand,
    },

    /// Data quota policies
    #[command(name = "quota")]
    Quota {
        #[command(subcommand)]
        command: QuotaCommand,
    },

    /// Forget everything held for an uninstalled uid
    #[command(name = "remove-uid")]
    RemoveUid { uid: Uid },

    /// Configuration management
    #[command(name = "config")]
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },

    /// Run the policy worker until interrupted
    #[command(name = "daemon")]
    Daemon {
        #[command(flatten)]
        args: DaemonArgs,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let Some(command) = cli.command else {
        eprintln!("{}", "No command specified. Use --help for usage.".yellow());
        std::process::exit(1);
    };

    // one-shot commands stay quiet unless asked; the daemon follows its config
    let (level, format) = match &command {
        Commands::Daemon { .. } => {
            let config = NetPolicyConfigManifest::load_or_default(cli.config.clone())
                .context("Failed to load configuration")?;
            (
                cli.log_level.clone().unwrap_or(config.spec.logging.level),
                config.spec.logging.format,
            )
        }
        _ => (cli.log_level.clone().unwrap_or_else(|| "warn".to_string()), "pretty".to_string()),
    };
    init_logging(&level, &format)?;

    match command {
        Commands::Uid { command } => commands::uid::handle_command(command, cli.config).await,
        Commands::Check { uid, metered, iface } => commands::uid::check(uid, metered, iface, cli.config).await,
        Commands::Background { command } => commands::uid::handle_background(command, cli.config).await,
        Commands::Idle { command } => {
            commands::chain::handle_command(ChainType::DeviceIdle, command, cli.config).await
        }
        Commands::Powersave { command } => {
            commands::chain::handle_command(ChainType::PowerSave, command, cli.config).await
        }
        Commands::Quota { command } => commands::quota::handle_command(command, cli.config).await,
        Commands::RemoveUid { uid } => commands::uid::remove(uid, cli.config).await,
        Commands::Config { command } => commands::config::handle_command(command, cli.config).await,
        Commands::Daemon { args } => commands::daemon::run(args, cli.config).await,
    }
}

/// Initialize tracing subscriber for logging
fn init_logging(level: &str, format: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .context("Failed to create log filter")?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr);

    if format == "json" {
        builder.json().init();
    } else {
        builder.compact().init();
    }

    Ok(())
}
