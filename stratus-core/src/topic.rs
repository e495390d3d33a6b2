//! Topic subscription stream events.
//!
//! A topic subscription is a server stream of [`SubscriptionEvent`]s. Channel
//! implementations decode wire messages into these types; the client's
//! subscription manager consumes them, tracks the resume position, and
//! forwards items to the caller.

use bytes::Bytes;

/// A value published to a topic, either UTF-8 text or raw bytes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TopicValue {
    Text(String),
    Binary(Bytes),
}

impl TopicValue {
    /// Return the text payload, if this is a text value.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            TopicValue::Text(text) => Some(text),
            TopicValue::Binary(_) => None,
        }
    }

    /// Return the payload as bytes regardless of kind.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            TopicValue::Text(text) => text.as_bytes(),
            TopicValue::Binary(bytes) => bytes,
        }
    }
}

impl From<String> for TopicValue {
    fn from(text: String) -> Self {
        TopicValue::Text(text)
    }
}

impl From<&str> for TopicValue {
    fn from(text: &str) -> Self {
        TopicValue::Text(text.to_string())
    }
}

impl From<Bytes> for TopicValue {
    fn from(bytes: Bytes) -> Self {
        TopicValue::Binary(bytes)
    }
}

impl From<Vec<u8>> for TopicValue {
    fn from(bytes: Vec<u8>) -> Self {
        TopicValue::Binary(Bytes::from(bytes))
    }
}

/// A single published item delivered on a subscription stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TopicItem {
    /// Server-assigned sequence position of this item within the topic.
    pub sequence: u64,
    /// Identifier of the publisher, when the server provides one.
    pub publisher_id: Option<String>,
    /// The published value.
    pub value: TopicValue,
}

impl TopicItem {
    /// Create a new item.
    pub fn new(sequence: u64, value: impl Into<TopicValue>) -> Self {
        Self {
            sequence,
            publisher_id: None,
            value: value.into(),
        }
    }

    /// Attach a publisher id.
    pub fn with_publisher_id(mut self, publisher_id: impl Into<String>) -> Self {
        self.publisher_id = Some(publisher_id.into());
        self
    }
}

/// An event delivered on a subscription stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SubscriptionEvent {
    /// A published item.
    Item(TopicItem),
    /// The server skipped a range of sequence positions. The consumer should
    /// resume from `new_sequence`; items in between will never be delivered.
    Discontinuity {
        last_sequence: u64,
        new_sequence: u64,
    },
    /// Keepalive. Carries no data; resets the consumer's inactivity timer.
    Heartbeat,
}

impl SubscriptionEvent {
    /// The sequence position this event advances the subscription to, if any.
    pub fn sequence(&self) -> Option<u64> {
        match self {
            SubscriptionEvent::Item(item) => Some(item.sequence),
            SubscriptionEvent::Discontinuity { new_sequence, .. } => Some(*new_sequence),
            SubscriptionEvent::Heartbeat => None,
        }
    }
}
