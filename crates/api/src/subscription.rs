//! Subscription fan-out.
//!
//! [`SubscriptionHub`] keeps one broadcast channel per [`Channel`]. Events
//! reach only receivers that exist at publish time: there is no backlog and
//! no replay. A subscriber that falls more than the channel capacity behind
//! skips the missed events and keeps receiving.

use std::{collections::HashMap, fmt, sync::Arc};

use tokio::sync::broadcast::{self, error::RecvError};

use crate::model::DataPoint;

/// Events buffered per channel before slow subscribers start lagging.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Subscription field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// `onCreateDataPoint`: every committed `createDataPoint`.
    OnCreateDataPoint,
}

impl Channel {
    /// Every channel.
    pub const ALL: [Channel; 1] = [Channel::OnCreateDataPoint];

    /// Schema field name.
    #[must_use]
    pub fn field(self) -> &'static str {
        match self {
            Self::OnCreateDataPoint => "onCreateDataPoint",
        }
    }

    /// Channel of a subscription field.
    #[must_use]
    pub fn from_field(field: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|channel| channel.field() == field)
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.field())
    }
}

/// Best-effort event fan-out. Clones share the same channels.
#[derive(Debug, Clone)]
pub struct SubscriptionHub {
    senders: Arc<HashMap<Channel, broadcast::Sender<DataPoint>>>,
}

impl Default for SubscriptionHub {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }
}

impl SubscriptionHub {
    /// Creates a hub buffering `capacity` events per channel (at least 1).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let senders = Channel::ALL
            .into_iter()
            .map(|channel| (channel, broadcast::channel(capacity).0))
            .collect();
        Self { senders: Arc::new(senders) }
    }

    /// Delivers `point` to the current subscribers of `channel` and returns
    /// how many there were.
    pub fn publish(&self, channel: Channel, point: &DataPoint) -> usize {
        let Some(sender) = self.senders.get(&channel) else {
            tracing::warn!(%channel, "publish to unknown channel dropped");
            return 0;
        };
        match sender.send(point.clone()) {
            Ok(receivers) => {
                tracing::debug!(%channel, receivers, "event published");
                receivers
            },
            Err(_) => {
                tracing::debug!(%channel, "event dropped (no subscribers)");
                0
            },
        }
    }

    /// Subscribes to `channel`, optionally only to points of one series.
    #[must_use]
    pub fn subscribe(&self, channel: Channel, name: Option<String>) -> Subscription {
        let receiver = match self.senders.get(&channel) {
            Some(sender) => sender.subscribe(),
            // Every channel has a sender; an unknown one yields a closed stream.
            None => broadcast::channel(1).1,
        };
        Subscription { channel, name, receiver }
    }

    /// Current subscriber count of `channel`.
    #[must_use]
    pub fn subscriber_count(&self, channel: Channel) -> usize {
        self.senders.get(&channel).map_or(0, broadcast::Sender::receiver_count)
    }
}

/// Receiving end of a subscription.
#[derive(Debug)]
pub struct Subscription {
    channel: Channel,
    name: Option<String>,
    receiver: broadcast::Receiver<DataPoint>,
}

impl Subscription {
    /// Subscribed channel.
    #[must_use]
    pub fn channel(&self) -> Channel {
        self.channel
    }

    /// Next matching event, or `None` once the hub is gone.
    pub async fn recv(&mut self) -> Option<DataPoint> {
        loop {
            match self.receiver.recv().await {
                Ok(point) if self.accepts(&point) => return Some(point),
                Ok(_) => {},
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(channel = %self.channel, skipped, "subscriber lagged");
                },
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Next matching event already buffered, without waiting.
    pub fn try_recv(&mut self) -> Option<DataPoint> {
        use broadcast::error::TryRecvError;
        loop {
            match self.receiver.try_recv() {
                Ok(point) if self.accepts(&point) => return Some(point),
                Ok(_) | Err(TryRecvError::Lagged(_)) => {},
                Err(TryRecvError::Empty | TryRecvError::Closed) => return None,
            }
        }
    }

    fn accepts(&self, point: &DataPoint) -> bool {
        self.name.as_deref().is_none_or(|name| name == point.name)
    }
}
