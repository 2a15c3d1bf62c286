//! In-memory message bus for tests/dev.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::bus::{BusError, MessageSource, RawMessage};
use crate::topic::Topic;

type Delivery = Result<RawMessage, BusError>;

#[derive(Debug, Default)]
struct BusState {
    /// Next offset per `(topic, partition)`.
    offsets: HashMap<(String, i32), i64>,
    /// Last acknowledged offset per `(topic, partition)`.
    acknowledged: HashMap<(String, i32), i64>,
    subscribers: Vec<Subscriber>,
}

#[derive(Debug)]
struct Subscriber {
    topics: Vec<String>,
    tx: mpsc::UnboundedSender<Delivery>,
}

/// In-memory topic bus.
///
/// - Offsets advance per `(topic, partition)` whether or not anyone listens
/// - Subscribers only see messages published after they subscribed
/// - Faults can be injected to exercise consumer-level failure paths
#[derive(Debug, Clone, Default)]
pub struct InMemoryBus {
    state: Arc<Mutex<BusState>>,
}

impl InMemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// A fresh, unconnected source reading from this bus.
    pub fn source(&self) -> InMemoryMessageSource {
        InMemoryMessageSource {
            bus: self.clone(),
            connected: false,
            rx: None,
        }
    }

    /// Append a message and return the offset it was assigned.
    pub fn publish(
        &self,
        topic: &str,
        partition: i32,
        payload: impl Into<Vec<u8>>,
    ) -> Result<i64, BusError> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| BusError::Client("in-memory bus lock poisoned".to_string()))?;

        let next = state.offsets.entry((topic.to_string(), partition)).or_insert(0);
        let offset = *next;
        *next += 1;

        let message = RawMessage {
            topic: topic.to_string(),
            partition,
            offset,
            payload: payload.into(),
        };

        // Drop any dead subscribers while publishing.
        state.subscribers.retain(|sub| {
            if !sub.topics.iter().any(|t| t == topic) {
                return !sub.tx.is_closed();
            }
            sub.tx.send(Ok(message.clone())).is_ok()
        });

        Ok(offset)
    }

    /// Deliver `error` to every live subscriber in place of a message.
    pub fn inject_fault(&self, error: BusError) {
        if let Ok(mut state) = self.state.lock() {
            state.subscribers.retain(|sub| sub.tx.send(Err(error.clone())).is_ok());
        }
    }

    /// Last offset acknowledged on `(topic, partition)`, if any.
    pub fn acknowledged(&self, topic: &str, partition: i32) -> Option<i64> {
        self.state
            .lock()
            .ok()?
            .acknowledged
            .get(&(topic.to_string(), partition))
            .copied()
    }

    /// Number of subscriptions still attached.
    pub fn subscriber_count(&self) -> usize {
        self.state
            .lock()
            .map(|mut state| {
                state.subscribers.retain(|sub| !sub.tx.is_closed());
                state.subscribers.len()
            })
            .unwrap_or(0)
    }
}

/// `MessageSource` backed by an [`InMemoryBus`].
#[derive(Debug)]
pub struct InMemoryMessageSource {
    bus: InMemoryBus,
    connected: bool,
    rx: Option<mpsc::UnboundedReceiver<Delivery>>,
}

#[async_trait]
impl MessageSource for InMemoryMessageSource {
    async fn connect(&mut self) -> Result<(), BusError> {
        self.connected = true;
        Ok(())
    }

    async fn subscribe(&mut self, topics: &[Topic]) -> Result<(), BusError> {
        if !self.connected {
            return Err(BusError::Subscription("not connected".to_string()));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self
            .bus
            .state
            .lock()
            .map_err(|_| BusError::Client("in-memory bus lock poisoned".to_string()))?;
        state.subscribers.push(Subscriber {
            topics: topics.iter().map(|t| t.name().to_string()).collect(),
            tx,
        });
        self.rx = Some(rx);
        Ok(())
    }

    async fn next_message(&mut self) -> Result<Option<RawMessage>, BusError> {
        let rx = self
            .rx
            .as_mut()
            .ok_or_else(|| BusError::Client("not subscribed".to_string()))?;

        // `UnboundedReceiver::recv` is cancel-safe.
        match rx.recv().await {
            Some(delivery) => delivery.map(Some),
            None => Ok(None),
        }
    }

    async fn acknowledge(
        &mut self,
        topic: &str,
        partition: i32,
        offset: i64,
    ) -> Result<(), BusError> {
        if self.rx.is_none() {
            return Err(BusError::Client("not subscribed".to_string()));
        }

        let mut state = self
            .bus
            .state
            .lock()
            .map_err(|_| BusError::Client("in-memory bus lock poisoned".to_string()))?;
        let stored = state
            .acknowledged
            .entry((topic.to_string(), partition))
            .or_insert(offset);
        *stored = (*stored).max(offset);
        Ok(())
    }

    async fn close(&mut self) -> Result<(), BusError> {
        self.rx = None;
        self.connected = false;
        Ok(())
    }
}
