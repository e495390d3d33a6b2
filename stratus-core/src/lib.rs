//! Core protocol types for the Stratus SDK.
//!
//! This crate holds the types shared between the resilience core
//! (`stratus-client`) and channel implementations (the generated stub layer
//! that owns the wire encoding):
//!
//! - [`Code`]: gRPC status codes, with retryability classification
//! - [`Status`]: the result of a failed RPC call
//! - [`TopicValue`], [`TopicItem`], [`SubscriptionEvent`]: the events carried
//!   by a topic subscription stream
//!
//! The crate is a leaf: it performs no I/O and depends on no runtime.

mod error;
mod topic;

pub use error::{Code, ParseCodeError, Status};
pub use topic::{SubscriptionEvent, TopicItem, TopicValue};
