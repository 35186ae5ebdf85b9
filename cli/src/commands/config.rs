// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Configuration management commands
//!
//! Commands: show, validate, generate

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::PathBuf;

use netpolicy_core::domain::config::{NetPolicyConfigManifest, StorageKind, CONFIG_PATH_ENV};

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Show config file paths checked
        #[arg(long)]
        paths: bool,
    },

    /// Validate configuration file
    Validate {
        /// Path to config file (default: discover)
        #[arg(value_name = "FILE")]
        file: Option<PathBuf>,
    },

    /// Generate a configuration file with every default spelled out
    Generate {
        /// Output path
        #[arg(short, long, default_value = "./netpolicy-config.yaml")]
        output: PathBuf,
    },
}

pub async fn handle_command(command: ConfigCommand, config_override: Option<PathBuf>) -> Result<()> {
    match command {
        ConfigCommand::Show { paths } => show(config_override, paths).await,
        ConfigCommand::Validate { file } => validate(file.or(config_override)).await,
        ConfigCommand::Generate { output } => generate(output).await,
    }
}

async fn show(config_override: Option<PathBuf>, show_paths: bool) -> Result<()> {
    if show_paths {
        println!("{}", "Configuration discovery paths:".bold());
        match &config_override {
            Some(path) => println!("  1. --config flag: {}", path.display()),
            None => println!("  1. --config flag: {}", "(not set)".dimmed()),
        }
        for (index, path) in NetPolicyConfigManifest::search_paths().iter().enumerate() {
            let marker = if path.exists() { "✓".green() } else { "-".dimmed() };
            println!("  {}. {} {}", index + 2, marker, path.display());
        }
        println!("  ({} is honoured when set)", CONFIG_PATH_ENV);
        println!();
    }

    let config = NetPolicyConfigManifest::load_or_default(config_override).context("Failed to load configuration")?;

    println!("{}", "Current configuration:".bold());
    println!("  Name: {}", config.metadata.name);
    println!();

    println!("{}", "Storage:".bold());
    match config.spec.storage.backend {
        StorageKind::Memory => println!("  Backend: memory"),
        StorageKind::JsonFile => println!(
            "  Backend: json_file ({})",
            config
                .spec
                .storage
                .path
                .as_ref()
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "no path".to_string())
        ),
    }
    println!();

    println!("{}", "Netsys:".bold());
    println!(
        "  Connect: {} attempts, {} ms apart",
        config.spec.netsys.connect_retries, config.spec.netsys.retry_interval_ms
    );
    println!("  Quota evaluation: every {} s", config.spec.quota.evaluation_interval_secs);
    println!("  Observer cap: {}", config.spec.observers.max_registered);
    println!();

    println!("{}", "Interfaces:".bold());
    if config.spec.interfaces.is_empty() {
        println!("  {}", "(none)".dimmed());
    }
    for binding in &config.spec.interfaces {
        println!("  {} {} -> {}", binding.net_type, binding.identity, binding.interface);
    }
    println!();

    println!("{}", "Logging:".bold());
    println!("  Level: {} ({})", config.spec.logging.level, config.spec.logging.format);
    match &config.spec.metrics {
        Some(metrics) if metrics.enabled => println!("  Metrics: {}", metrics.listen_address),
        _ => println!("  Metrics: {}", "disabled".dimmed()),
    }

    Ok(())
}

async fn validate(config_path: Option<PathBuf>) -> Result<()> {
    println!("Validating configuration...");

    let config = NetPolicyConfigManifest::load_or_default(config_path).context("Failed to load configuration")?;
    config.validate().context("Configuration validation failed")?;

    println!("{}", "✓ Configuration is valid".green());
    Ok(())
}

async fn generate(output: PathBuf) -> Result<()> {
    let config = NetPolicyConfigManifest::default();
    config
        .to_yaml_file(&output)
        .with_context(|| format!("Failed to write config to {:?}", output))?;

    println!("{}", format!("✓ Configuration generated: {}", output.display()).green());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_generated_config_validates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("netpolicy-config.yaml");
        generate(path.clone()).await.unwrap();
        validate(Some(path)).await.unwrap();
    }

    #[tokio::test]
    async fn test_validate_rejects_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(validate(Some(dir.path().join("absent.yaml"))).await.is_err());
    }
}
