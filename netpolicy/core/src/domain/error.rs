// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Caller-visible error taxonomy
//!
//! Invalid input is rejected before any state is touched. Collaborator
//! failures never surface here; they are logged where they happen.

use crate::domain::firewall::ChainType;
use crate::domain::quota::NetBearType;
use crate::domain::repository::RepositoryError;

#[derive(Debug, thiserror::Error)]
pub enum NetPolicyError {
    #[error("Invalid uid policy value: {0}")]
    InvalidPolicy(u32),

    #[error("Unknown uid policy name: {0}")]
    UnknownPolicyName(String),

    #[error("Invalid quota policy: {0}")]
    InvalidQuotaPolicy(String),

    #[error("Invalid network type: {0}")]
    InvalidNetworkType(i32),

    #[error("{what} capacity of {limit} exceeded")]
    CapacityExceeded { what: &'static str, limit: usize },

    #[error("{0} chain is already in the requested state")]
    AlreadyInState(ChainType),

    #[error("No quota policy for {net_type} identity '{identity}'")]
    PolicyNotFound { net_type: NetBearType, identity: String },

    #[error("Observer already registered")]
    ObserverAlreadyRegistered,

    #[error("Collaborator unavailable: {0}")]
    CollaboratorUnavailable(&'static str),

    #[error("Worker stopped")]
    WorkerStopped,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

pub type Result<T> = std::result::Result<T, NetPolicyError>;
