// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Network access policy engine
//!
//! Decides, per uid, whether an application may use metered or unmetered
//! networks under the current background-data, device-idle and power-save
//! modes, and enforces per-network data quotas.
//!
//! # Architecture
//!
//! - **Layer:** Core System
//! - **Purpose:** Re-exports the domain model and the service entry points

pub mod application;
pub mod domain;
pub mod infrastructure;

pub use application::{NetPolicyService, ObserverId, PolicyTrigger, PolicyWorker};
pub use domain::*;
