// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Infrastructure
//!
//! Adapters behind the domain contracts: the policy event bus, the quota
//! broadcast channel, repositories, netsys and network-center adapters, and
//! clocks.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure
//! - **Purpose:** Implements infrastructure

pub mod broadcast;
pub mod clock;
pub mod event_bus;
pub mod netsys;
pub mod network_center;
pub mod repositories;
