// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Policy Worker
//!
//! Background task that drives a [`NetPolicyService`]:
//!
//! - acquires the netsys handle at startup with bounded retries, then keeps
//!   retrying in the background while running degraded
//! - applies system triggers submitted through [`PolicyWorkerHandle`] one at
//!   a time, in submission order
//! - runs the periodic quota evaluation
//! - releases delayed bus events once they are due

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::application::policy_service::NetPolicyService;
use crate::domain::config::NetPolicyConfigManifest;
use crate::domain::error::{NetPolicyError, Result};
use crate::domain::netsys::{NetsysConnector, NetsysController};
use crate::domain::uid_policy::Uid;

/// External trigger queued for the worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyTrigger {
    PowerModeChanged(i32),
    UidForeground { uid: Uid, foreground: bool },
    UidRemoved(Uid),
    InterfaceQuotaReached(String),
    EvaluateQuota,
    Resync,
}

#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub quota_interval: Duration,
    pub connect_retries: u32,
    pub retry_interval: Duration,
    /// Pause between background reconnect attempts while degraded.
    pub degraded_retry_interval: Duration,
    pub event_poll_interval: Duration,
}

impl WorkerSettings {
    pub fn from_config(config: &NetPolicyConfigManifest) -> Self {
        let retry_interval = Duration::from_millis(config.spec.netsys.retry_interval_ms);
        Self {
            quota_interval: Duration::from_secs(config.spec.quota.evaluation_interval_secs),
            connect_retries: config.spec.netsys.connect_retries,
            retry_interval,
            degraded_retry_interval: retry_interval * config.spec.netsys.connect_retries.max(1),
            event_poll_interval: Duration::from_millis(100),
        }
    }
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self::from_config(&NetPolicyConfigManifest::default())
    }
}

/// Try `connector` up to `retries` times, `interval` apart.
pub async fn acquire_netsys(
    connector: &dyn NetsysConnector,
    retries: u32,
    interval: Duration,
) -> Result<Arc<dyn NetsysController>> {
    for attempt in 1..=retries {
        match connector.connect().await {
            Ok(controller) => {
                info!(attempt, "Netsys handle acquired");
                return Ok(controller);
            }
            Err(e) => {
                warn!(attempt, retries, "Netsys connection attempt failed: {}", e);
                if attempt < retries {
                    tokio::time::sleep(interval).await;
                }
            }
        }
    }
    Err(NetPolicyError::CollaboratorUnavailable("netsys"))
}

pub struct PolicyWorker {
    service: Arc<NetPolicyService>,
    connector: Arc<dyn NetsysConnector>,
    settings: WorkerSettings,
}

impl PolicyWorker {
    pub fn new(service: Arc<NetPolicyService>, connector: Arc<dyn NetsysConnector>, settings: WorkerSettings) -> Self {
        Self {
            service,
            connector,
            settings,
        }
    }

    /// Spawn the worker task.
    pub fn start(self) -> PolicyWorkerHandle {
        let (triggers, trigger_rx) = mpsc::unbounded_channel();
        let (shutdown, shutdown_rx) = watch::channel(false);
        let join = tokio::spawn(self.run(trigger_rx, shutdown_rx));
        PolicyWorkerHandle {
            triggers,
            shutdown,
            join,
        }
    }

    async fn run(self, mut triggers: mpsc::UnboundedReceiver<PolicyTrigger>, mut shutdown: watch::Receiver<bool>) {
        info!("Policy worker started");

        match acquire_netsys(
            self.connector.as_ref(),
            self.settings.connect_retries,
            self.settings.retry_interval,
        )
        .await
        {
            Ok(controller) => self.service.attach_netsys(controller),
            Err(e) => warn!("Running degraded, decisions will not reach the kernel: {}", e),
        }

        let mut quota_tick = tokio::time::interval(self.settings.quota_interval);
        quota_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // first tick completes immediately
        quota_tick.tick().await;
        let mut event_tick = tokio::time::interval(self.settings.event_poll_interval);
        event_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut reconnect_tick = tokio::time::interval(self.settings.degraded_retry_interval);
        reconnect_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut processed = 0u64;

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                trigger = triggers.recv() => match trigger {
                    Some(trigger) => {
                        processed += 1;
                        self.apply(trigger);
                    }
                    None => break,
                },
                _ = quota_tick.tick() => {
                    debug!("Periodic quota evaluation");
                    self.service.evaluate_quota();
                }
                _ = event_tick.tick() => {
                    let released = self.service.release_due_events();
                    if released > 0 {
                        debug!(released, "Delayed policy events delivered");
                    }
                }
                _ = reconnect_tick.tick(), if !self.service.netsys_attached() => {
                    match self.connector.connect().await {
                        Ok(controller) => self.service.attach_netsys(controller),
                        Err(e) => debug!("Netsys still unavailable: {}", e),
                    }
                }
            }
        }

        info!(processed, "Policy worker stopped");
    }

    fn apply(&self, trigger: PolicyTrigger) {
        debug!(?trigger, "Applying trigger");
        match trigger {
            PolicyTrigger::PowerModeChanged(mode) => self.service.power_mode_changed(mode),
            PolicyTrigger::UidForeground { uid, foreground } => self.service.set_uid_foreground(uid, foreground),
            PolicyTrigger::UidRemoved(uid) => self.service.delete_uid(uid),
            PolicyTrigger::InterfaceQuotaReached(iface) => self.service.interface_quota_reached(&iface),
            PolicyTrigger::EvaluateQuota => self.service.evaluate_quota(),
            PolicyTrigger::Resync => self.service.resync(),
        }
    }
}

pub struct PolicyWorkerHandle {
    triggers: mpsc::UnboundedSender<PolicyTrigger>,
    shutdown: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl PolicyWorkerHandle {
    pub fn submit(&self, trigger: PolicyTrigger) -> Result<()> {
        self.triggers.send(trigger).map_err(|_| NetPolicyError::WorkerStopped)
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Stop the worker and wait for it to exit.
    pub async fn shutdown(self) {
        if self.shutdown.send(true).is_err() {
            debug!("Policy worker already stopped, shutdown signal not delivered");
        }
        if let Err(e) = self.join.await {
            error!("Policy worker task failed: {}", e);
        }
    }
}
