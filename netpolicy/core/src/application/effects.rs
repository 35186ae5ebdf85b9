// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Side effects collected during a state transition.
//!
//! Engines only mutate their own state and append here. The service
//! dispatches everything once the transition is complete.

use crate::domain::events::{PolicyEvent, PolicyNotification, QuotaBroadcast};
use crate::domain::netsys::{NetsysCommand, NetworkToggle};

#[derive(Debug, Default)]
pub struct Effects {
    /// Events for the bus; drained by the core after each handler.
    pub events: Vec<PolicyEvent>,
    pub commands: Vec<NetsysCommand>,
    pub notifications: Vec<PolicyNotification>,
    pub broadcasts: Vec<QuotaBroadcast>,
    pub toggles: Vec<NetworkToggle>,
}

impl Effects {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&mut self, event: PolicyEvent) {
        self.events.push(event);
    }

    pub fn command(&mut self, command: NetsysCommand) {
        self.commands.push(command);
    }

    pub fn notify(&mut self, notification: PolicyNotification) {
        self.notifications.push(notification);
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
            && self.commands.is_empty()
            && self.notifications.is_empty()
            && self.broadcasts.is_empty()
            && self.toggles.is_empty()
    }
}
