// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Application layer
//!
//! The three policy engines, the core that links them over the policy event
//! bus, and the thread-safe service and background worker built on top.
//!
//! # Architecture
//!
//! - **Layer:** Application
//! - **Purpose:** Coordinate engines and dispatch their side effects

pub mod effects;
pub mod firewall_manager;
pub mod netsys_link;
pub mod observer_registry;
pub mod policy_core;
pub mod policy_service;
pub mod quota_accountant;
pub mod rule_engine;
pub mod service_factory;
pub mod worker;

pub use observer_registry::ObserverId;
pub use policy_service::NetPolicyService;
pub use service_factory::{assemble_policy_service, build_policy_service};
pub use worker::{PolicyTrigger, PolicyWorker, PolicyWorkerHandle, WorkerSettings};
