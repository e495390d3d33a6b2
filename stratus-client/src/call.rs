//! Call descriptors.
//!
//! A [`CallDescriptor`] captures everything the resilience core needs to know
//! about a logical operation without understanding its payload: which RPC it
//! is, whether re-issuing it is safe, how long the caller is willing to wait,
//! and whether retries are allowed at all. The facade constructs one fresh
//! descriptor per request; it is immutable and consumed once.

use std::time::Duration;

/// The RPC methods the service exposes, with their wire paths.
///
/// The idempotency classification mirrors the service's retry-eligibility
/// table: anything that can be re-executed with the same observable effect is
/// `Idempotent`; counters, conditional writes, list pushes/pops, publishes
/// and token issuance are not.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Get,
    Set,
    Delete,
    Increment,
    SetIfNotExists,
    DictionaryGet,
    DictionaryFetch,
    DictionarySet,
    DictionaryIncrement,
    DictionaryDelete,
    SortedSetPut,
    SortedSetFetch,
    SortedSetGetScore,
    SortedSetIncrement,
    SortedSetRemove,
    ListPushFront,
    ListPushBack,
    ListPopFront,
    ListPopBack,
    ListFetch,
    ListRemove,
    ListLength,
    TopicPublish,
    TopicSubscribe,
    GenerateDisposableToken,
}

impl OperationKind {
    /// The full gRPC method path dispatched to the channel.
    pub fn method_path(&self) -> &'static str {
        match self {
            OperationKind::Get => "cache_client.Scs/Get",
            OperationKind::Set => "cache_client.Scs/Set",
            OperationKind::Delete => "cache_client.Scs/Delete",
            OperationKind::Increment => "cache_client.Scs/Increment",
            OperationKind::SetIfNotExists => "cache_client.Scs/SetIfNotExists",
            OperationKind::DictionaryGet => "cache_client.Scs/DictionaryGet",
            OperationKind::DictionaryFetch => "cache_client.Scs/DictionaryFetch",
            OperationKind::DictionarySet => "cache_client.Scs/DictionarySet",
            OperationKind::DictionaryIncrement => "cache_client.Scs/DictionaryIncrement",
            OperationKind::DictionaryDelete => "cache_client.Scs/DictionaryDelete",
            OperationKind::SortedSetPut => "cache_client.Scs/SortedSetPut",
            OperationKind::SortedSetFetch => "cache_client.Scs/SortedSetFetch",
            OperationKind::SortedSetGetScore => "cache_client.Scs/SortedSetGetScore",
            OperationKind::SortedSetIncrement => "cache_client.Scs/SortedSetIncrement",
            OperationKind::SortedSetRemove => "cache_client.Scs/SortedSetRemove",
            OperationKind::ListPushFront => "cache_client.Scs/ListPushFront",
            OperationKind::ListPushBack => "cache_client.Scs/ListPushBack",
            OperationKind::ListPopFront => "cache_client.Scs/ListPopFront",
            OperationKind::ListPopBack => "cache_client.Scs/ListPopBack",
            OperationKind::ListFetch => "cache_client.Scs/ListFetch",
            OperationKind::ListRemove => "cache_client.Scs/ListRemove",
            OperationKind::ListLength => "cache_client.Scs/ListLength",
            OperationKind::TopicPublish => "cache_client.pubsub.Pubsub/Publish",
            OperationKind::TopicSubscribe => "cache_client.pubsub.Pubsub/Subscribe",
            OperationKind::GenerateDisposableToken => "token.Token/GenerateDisposableToken",
        }
    }

    /// Default idempotency classification for this method.
    pub fn idempotency(&self) -> Idempotency {
        match self {
            OperationKind::Get
            | OperationKind::Set
            | OperationKind::Delete
            | OperationKind::DictionaryGet
            | OperationKind::DictionaryFetch
            | OperationKind::DictionarySet
            | OperationKind::DictionaryDelete
            | OperationKind::SortedSetPut
            | OperationKind::SortedSetFetch
            | OperationKind::SortedSetGetScore
            | OperationKind::SortedSetRemove
            | OperationKind::ListFetch
            | OperationKind::ListRemove
            | OperationKind::ListLength
            | OperationKind::TopicSubscribe => Idempotency::Idempotent,

            OperationKind::Increment
            | OperationKind::SetIfNotExists
            | OperationKind::DictionaryIncrement
            | OperationKind::SortedSetIncrement
            | OperationKind::ListPushFront
            | OperationKind::ListPushBack
            | OperationKind::ListPopFront
            | OperationKind::ListPopBack
            | OperationKind::TopicPublish
            | OperationKind::GenerateDisposableToken => Idempotency::NonIdempotent,
        }
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.method_path())
    }
}

/// Whether re-executing an operation has the same observable effect as
/// executing it once.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Idempotency {
    Idempotent,
    NonIdempotent,
}

/// Per-call override of retry eligibility.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RetryEligibility {
    /// Let the retry policy and idempotency classification decide.
    #[default]
    Auto,
    /// Never retry this call, regardless of policy.
    Disabled,
}

/// Immutable description of one logical call.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use stratus_client::{CallDescriptor, OperationKind};
///
/// let descriptor = CallDescriptor::new(OperationKind::Get)
///     .deadline(Duration::from_millis(500));
/// ```
#[derive(Clone, Debug)]
pub struct CallDescriptor {
    kind: OperationKind,
    idempotency: Idempotency,
    deadline: Option<Duration>,
    eligibility: RetryEligibility,
}

impl CallDescriptor {
    /// Create a descriptor for the given operation with its default
    /// idempotency classification, no per-call deadline override, and
    /// policy-driven retry eligibility.
    pub fn new(kind: OperationKind) -> Self {
        Self {
            kind,
            idempotency: kind.idempotency(),
            deadline: None,
            eligibility: RetryEligibility::Auto,
        }
    }

    /// Override the caller's deadline for this call. The effective deadline
    /// is the minimum of this and the client's default request timeout.
    pub fn deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Override the idempotency classification. Marking a call idempotent
    /// widens what the retry engine will re-issue; use only when the caller
    /// knows the payload makes the operation safe to repeat.
    pub fn idempotency(mut self, idempotency: Idempotency) -> Self {
        self.idempotency = idempotency;
        self
    }

    /// Disable retries for this call.
    pub fn no_retries(mut self) -> Self {
        self.eligibility = RetryEligibility::Disabled;
        self
    }

    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    pub fn idempotency_class(&self) -> Idempotency {
        self.idempotency
    }

    pub fn deadline_override(&self) -> Option<Duration> {
        self.deadline
    }

    pub fn eligibility(&self) -> RetryEligibility {
        self.eligibility
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_classification() {
        assert_eq!(OperationKind::Get.idempotency(), Idempotency::Idempotent);
        assert_eq!(OperationKind::Set.idempotency(), Idempotency::Idempotent);
        assert_eq!(OperationKind::Delete.idempotency(), Idempotency::Idempotent);
        assert_eq!(
            OperationKind::TopicSubscribe.idempotency(),
            Idempotency::Idempotent
        );

        assert_eq!(
            OperationKind::Increment.idempotency(),
            Idempotency::NonIdempotent
        );
        assert_eq!(
            OperationKind::SetIfNotExists.idempotency(),
            Idempotency::NonIdempotent
        );
        assert_eq!(
            OperationKind::ListPushBack.idempotency(),
            Idempotency::NonIdempotent
        );
        assert_eq!(
            OperationKind::TopicPublish.idempotency(),
            Idempotency::NonIdempotent
        );
        assert_eq!(
            OperationKind::GenerateDisposableToken.idempotency(),
            Idempotency::NonIdempotent
        );
    }

    #[test]
    fn test_descriptor_defaults() {
        let descriptor = CallDescriptor::new(OperationKind::Get);
        assert_eq!(descriptor.kind(), OperationKind::Get);
        assert_eq!(descriptor.idempotency_class(), Idempotency::Idempotent);
        assert!(descriptor.deadline_override().is_none());
        assert_eq!(descriptor.eligibility(), RetryEligibility::Auto);
    }

    #[test]
    fn test_descriptor_overrides() {
        let descriptor = CallDescriptor::new(OperationKind::Increment)
            .deadline(Duration::from_secs(2))
            .idempotency(Idempotency::Idempotent)
            .no_retries();

        assert_eq!(descriptor.deadline_override(), Some(Duration::from_secs(2)));
        assert_eq!(descriptor.idempotency_class(), Idempotency::Idempotent);
        assert_eq!(descriptor.eligibility(), RetryEligibility::Disabled);
    }

    #[test]
    fn test_method_paths() {
        assert_eq!(OperationKind::Get.method_path(), "cache_client.Scs/Get");
        assert_eq!(
            OperationKind::TopicSubscribe.method_path(),
            "cache_client.pubsub.Pubsub/Subscribe"
        );
        assert_eq!(
            OperationKind::GenerateDisposableToken.method_path(),
            "token.Token/GenerateDisposableToken"
        );
    }
}
