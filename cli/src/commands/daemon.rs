// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Daemon mode
//!
//! Builds the service from configuration, starts the policy worker against
//! the local netsys controller and runs until Ctrl+C or SIGTERM.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};

use netpolicy_core::application::{build_policy_service, PolicyWorker, WorkerSettings};
use netpolicy_core::domain::config::NetPolicyConfigManifest;
use netpolicy_core::domain::firewall::ChainType;
use netpolicy_core::domain::observer::PolicyObserver;
use netpolicy_core::domain::quota::QuotaPolicy;
use netpolicy_core::infrastructure::broadcast::EventBusError;
use netpolicy_core::infrastructure::netsys::{LocalNetsysConnector, TracingNetsysController};
use netpolicy_core::{NetPolicyService, NetUidPolicy, NetUidRule, Uid};

#[derive(Args)]
pub struct DaemonArgs {
    /// Prometheus listen address (overrides spec.metrics.listen_address)
    #[arg(long, value_name = "ADDR")]
    metrics_listen: Option<SocketAddr>,

    /// Do not start the Prometheus exporter
    #[arg(long, conflicts_with = "metrics_listen")]
    no_metrics: bool,

    /// Start with device-idle chain enforcement on
    #[arg(long)]
    device_idle: bool,

    /// Start with power-save chain enforcement on
    #[arg(long)]
    power_save: bool,
}

/// Logs every policy notification.
struct LoggingObserver;

impl PolicyObserver for LoggingObserver {
    fn on_uid_policy_changed(&self, uid: Uid, policy: NetUidPolicy) {
        info!(uid, policy = %policy, "Uid policy changed");
    }

    fn on_uid_rule_changed(&self, uid: Uid, rule: NetUidRule) {
        info!(uid, rule = %rule, "Uid rule changed");
    }

    fn on_background_policy_changed(&self, allowed: bool) {
        info!(allowed, "Background policy changed");
    }

    fn on_quota_policy_changed(&self, policies: &[QuotaPolicy]) {
        info!(count = policies.len(), "Quota policies changed");
    }

    fn on_metered_ifaces_changed(&self, ifaces: &[String]) {
        info!(?ifaces, "Metered interfaces changed");
    }
}

pub async fn run(args: DaemonArgs, config_path: Option<PathBuf>) -> Result<()> {
    let config = NetPolicyConfigManifest::load_or_default(config_path).context("Failed to load configuration")?;
    config.validate().context("Configuration validation failed")?;
    info!(name = %config.metadata.name, pid = std::process::id(), "netpolicy daemon starting");

    if let Some(addr) = metrics_address(&args, &config)? {
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .context("Failed to install Prometheus exporter")?;
        info!(%addr, "Prometheus exporter listening");
    }

    let service = build_policy_service(&config).context("Failed to build policy service")?;
    service
        .register_observer(Arc::new(LoggingObserver))
        .context("Failed to register logging observer")?;
    apply_chain_modes(&service, &args)?;

    let mut broadcasts = service.subscribe_quota_broadcasts();
    let broadcast_task = tokio::spawn(async move {
        loop {
            match broadcasts.recv().await {
                Ok(broadcast) => warn!(
                    reminder = broadcast.reminder.as_str(),
                    net_type = %broadcast.net_type,
                    identity = %broadcast.identity,
                    used_bytes = broadcast.used_bytes,
                    "Quota reminder"
                ),
                Err(EventBusError::Closed) => break,
                // lag is already logged by the receiver
                Err(_) => continue,
            }
        }
    });

    let connector = Arc::new(LocalNetsysConnector::new(Arc::new(TracingNetsysController::new())));
    let handle = PolicyWorker::new(service, connector, WorkerSettings::from_config(&config)).start();

    println!("{}", "✓ netpolicy daemon running, press Ctrl+C to stop".green());
    shutdown_signal().await;

    handle.shutdown().await;
    broadcast_task.abort();
    info!("netpolicy daemon stopped");
    Ok(())
}

/// Chain enforcement lives only as long as the daemon, so it is set here.
fn apply_chain_modes(service: &NetPolicyService, args: &DaemonArgs) -> Result<()> {
    for (chain, enabled) in [(ChainType::DeviceIdle, args.device_idle), (ChainType::PowerSave, args.power_save)] {
        if enabled {
            service
                .set_chain_policy(chain, true)
                .with_context(|| format!("Failed to enable {} chain", chain))?;
            info!(chain = %chain, "Chain enforcement enabled at startup");
        }
    }
    Ok(())
}

fn metrics_address(args: &DaemonArgs, config: &NetPolicyConfigManifest) -> Result<Option<SocketAddr>> {
    if args.no_metrics {
        return Ok(None);
    }
    if let Some(addr) = args.metrics_listen {
        return Ok(Some(addr));
    }
    match &config.spec.metrics {
        Some(metrics) if metrics.enabled => metrics
            .listen_address
            .parse()
            .map(Some)
            .with_context(|| format!("Invalid metrics listen_address '{}'", metrics.listen_address)),
        _ => Ok(None),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received SIGTERM signal");
        },
    }
}
