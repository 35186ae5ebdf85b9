// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Domain layer for the network policy engine.
//!
//! Value types, the rule condition table, quota arithmetic, firewall rule
//! sets, domain events, error taxonomy and the collaborator contracts the
//! application layer drives.
//!
//! # Architecture
//!
//! - **Layer:** Domain
//! - **Purpose:** Pure policy model with no I/O

pub mod clock;
pub mod condition;
pub mod config;
pub mod error;
pub mod events;
pub mod firewall;
pub mod netsys;
pub mod observer;
pub mod quota;
pub mod repository;
pub mod uid_policy;

pub use error::NetPolicyError;
pub use uid_policy::{NetBackgroundPolicy, NetUidPolicy, NetUidRule, NetsysDirective, Uid, UidPolicyRecord};
