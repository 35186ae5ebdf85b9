// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Quota Broadcast Channel - Pub/Sub for quota reminders
//
// Streams warning / limit / limit-reminded announcements to async consumers
// (daemon logging, CLI watchers) over a tokio broadcast channel. In-memory
// only: a receiver that subscribes late sees nothing from before.

use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::domain::events::QuotaBroadcast;
use crate::domain::quota::NetBearType;

#[derive(Clone)]
pub struct QuotaBroadcastChannel {
    sender: Arc<broadcast::Sender<QuotaBroadcast>>,
}

impl QuotaBroadcastChannel {
    /// Capacity is how many broadcasts are buffered before the oldest drop.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Channel with default capacity (1000)
    pub fn with_default_capacity() -> Self {
        Self::new(1000)
    }

    pub fn publish(&self, broadcast: QuotaBroadcast) {
        debug!("Publishing quota broadcast: {:?}", broadcast);
        let receiver_count = self.sender.send(broadcast).unwrap_or(0);
        if receiver_count == 0 {
            debug!("No subscribers listening to quota broadcasts");
        }
    }

    pub fn subscribe(&self) -> QuotaReceiver {
        QuotaReceiver {
            receiver: self.sender.subscribe(),
            filter: None,
        }
    }

    /// Subscribe to broadcasts for one network identity only
    pub fn subscribe_identity(&self, net_type: NetBearType, identity: impl Into<String>) -> QuotaReceiver {
        QuotaReceiver {
            receiver: self.sender.subscribe(),
            filter: Some((net_type, identity.into())),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for QuotaBroadcastChannel {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

pub struct QuotaReceiver {
    receiver: broadcast::Receiver<QuotaBroadcast>,
    filter: Option<(NetBearType, String)>,
}

impl QuotaReceiver {
    /// Receive the next broadcast (waits until one is available)
    pub async fn recv(&mut self) -> Result<QuotaBroadcast, EventBusError> {
        loop {
            let broadcast = self.receiver.recv().await.map_err(|e| match e {
                broadcast::error::RecvError::Closed => EventBusError::Closed,
                broadcast::error::RecvError::Lagged(n) => {
                    warn!("Quota receiver lagged by {} broadcasts", n);
                    EventBusError::Lagged(n)
                }
            })?;
            if self.accepts(&broadcast) {
                return Ok(broadcast);
            }
        }
    }

    /// Receive without waiting
    pub fn try_recv(&mut self) -> Result<QuotaBroadcast, EventBusError> {
        loop {
            let broadcast = self.receiver.try_recv().map_err(|e| match e {
                broadcast::error::TryRecvError::Empty => EventBusError::Empty,
                broadcast::error::TryRecvError::Closed => EventBusError::Closed,
                broadcast::error::TryRecvError::Lagged(n) => {
                    warn!("Quota receiver lagged by {} broadcasts", n);
                    EventBusError::Lagged(n)
                }
            })?;
            if self.accepts(&broadcast) {
                return Ok(broadcast);
            }
        }
    }

    fn accepts(&self, broadcast: &QuotaBroadcast) -> bool {
        match &self.filter {
            Some((net_type, identity)) => broadcast.net_type == *net_type && broadcast.identity == *identity,
            None => true,
        }
    }
}

/// Errors that can occur when receiving broadcasts
#[derive(Debug, thiserror::Error)]
pub enum EventBusError {
    #[error("Broadcast channel is closed")]
    Closed,

    #[error("No broadcasts available")]
    Empty,

    #[error("Receiver lagged by {0} broadcasts (broadcasts were dropped)")]
    Lagged(u64),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::events::QuotaReminder;
    use chrono::Utc;

    fn broadcast(reminder: QuotaReminder, identity: &str) -> QuotaBroadcast {
        QuotaBroadcast {
            reminder,
            net_type: NetBearType::Cellular,
            identity: identity.to_string(),
            used_bytes: 5_000,
            at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_publish_subscribe() {
        let channel = QuotaBroadcastChannel::new(10);
        let mut receiver = channel.subscribe();

        channel.publish(broadcast(QuotaReminder::Limit, "8986"));

        let received = receiver.recv().await.unwrap();
        assert_eq!(received.reminder, QuotaReminder::Limit);
        assert_eq!(received.identity, "8986");
    }

    #[tokio::test]
    async fn test_identity_filtering() {
        let channel = QuotaBroadcastChannel::new(10);
        let mut receiver = channel.subscribe_identity(NetBearType::Cellular, "8986");

        channel.publish(broadcast(QuotaReminder::Warning, "other-sim"));
        channel.publish(broadcast(QuotaReminder::LimitReminded, "8986"));

        let received = receiver.recv().await.unwrap();
        assert_eq!(received.reminder, QuotaReminder::LimitReminded);
    }

    #[test]
    fn test_try_recv_empty_and_subscriber_count() {
        let channel = QuotaBroadcastChannel::new(10);
        let mut first = channel.subscribe();
        let _second = channel.subscribe();
        assert_eq!(channel.subscriber_count(), 2);
        assert!(matches!(first.try_recv(), Err(EventBusError::Empty)));
    }
}
