use crate::bus::RawMessage;
use crate::topic::{Topic, UnknownTopic};

/// A delivered bus message whose topic is one the worker handles.
///
/// Notes:
/// - `offset` is monotonically increasing per `(topic, partition)`.
/// - `payload` is still raw bytes; JSON decoding and schema validation happen
///   later in the pipeline so their failures can be told apart.
/// - Consumed once and discarded after processing, whatever the outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    topic: Topic,
    partition: i32,
    offset: i64,
    payload: Vec<u8>,
}

impl Envelope {
    pub fn new(topic: Topic, partition: i32, offset: i64, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic,
            partition,
            offset,
            payload: payload.into(),
        }
    }

    pub fn topic(&self) -> Topic {
        self.topic
    }

    pub fn partition(&self) -> i32 {
        self.partition
    }

    pub fn offset(&self) -> i64 {
        self.offset
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Payload rendered for diagnostics (lossy for non UTF-8 bytes).
    pub fn payload_lossy(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }

    /// Decode the payload as JSON (envelope-level, before any schema applies).
    pub fn decode_json(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::from_slice(&self.payload)
    }
}

impl TryFrom<RawMessage> for Envelope {
    type Error = UnknownTopic;

    fn try_from(raw: RawMessage) -> Result<Self, Self::Error> {
        let topic = raw.topic.parse::<Topic>()?;
        Ok(Self {
            topic,
            partition: raw.partition,
            offset: raw.offset,
            payload: raw.payload,
        })
    }
}
