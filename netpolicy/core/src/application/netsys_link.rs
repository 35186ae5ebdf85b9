// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Netsys handle shared by the service and the worker.
//!
//! Until a controller is attached the link runs degraded: commands are
//! dropped and the next replay after attachment brings the kernel back in
//! line.

use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::domain::netsys::{NetsysCommand, NetsysController};

#[derive(Default)]
pub struct NetsysLink {
    controller: RwLock<Option<Arc<dyn NetsysController>>>,
}

impl NetsysLink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&self, controller: Arc<dyn NetsysController>) {
        *self.controller.write() = Some(controller);
        info!("Netsys controller attached");
    }

    pub fn is_attached(&self) -> bool {
        self.controller.read().is_some()
    }

    /// Apply commands in order. Returns how many succeeded.
    pub fn dispatch(&self, commands: &[NetsysCommand]) -> usize {
        if commands.is_empty() {
            return 0;
        }
        let guard = self.controller.read();
        let Some(controller) = guard.as_ref() else {
            debug!(dropped = commands.len(), "Netsys unavailable, commands dropped");
            return 0;
        };
        let mut applied = 0;
        for command in commands {
            match command.apply(controller.as_ref()) {
                Ok(()) => applied += 1,
                Err(e) => warn!(call = command.name(), "Netsys command failed: {}", e),
            }
        }
        applied
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::uid_policy::NetsysDirective;
    use crate::infrastructure::netsys::TracingNetsysController;

    #[test]
    fn test_degraded_link_drops_commands() {
        let link = NetsysLink::new();
        let commands = vec![NetsysCommand::EnableDataSaver { enabled: true }];
        assert!(!link.is_attached());
        assert_eq!(link.dispatch(&commands), 0);

        let controller = Arc::new(TracingNetsysController::new());
        link.attach(controller.clone());
        assert_eq!(link.dispatch(&commands), 1);
        assert!(controller.snapshot().data_saver);
    }

    #[test]
    fn test_directive_expands_to_list_calls() {
        let link = NetsysLink::new();
        let controller = Arc::new(TracingNetsysController::new());
        link.attach(controller.clone());
        link.dispatch(&[
            NetsysCommand::UidDirective {
                uid: 1,
                directive: NetsysDirective::AddAllowlist,
            },
            NetsysCommand::UidDirective {
                uid: 1,
                directive: NetsysDirective::AddDenylist,
            },
        ]);
        let snapshot = controller.snapshot();
        assert!(snapshot.denylist.contains(&1));
        assert!(!snapshot.allowlist.contains(&1));
    }
}
