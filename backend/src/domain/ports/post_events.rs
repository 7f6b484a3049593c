//! Ports for the partitioned post event log: producing and consuming
//! `PostCreated` events.
//!
//! Events are keyed by author id. Adapters route every key to exactly one
//! partition, and each partition is delivered in order to at most one member
//! of a consumer group at a time, which preserves per-author ordering.
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::{Post, UserId};

use super::define_port_error;

/// Event emitted after a post has been durably stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostCreatedEvent {
    /// The stored post.
    pub post: Post,
}

impl PostCreatedEvent {
    /// Wrap a freshly stored post.
    pub fn new(post: Post) -> Self {
        Self { post }
    }

    /// Author whose id routes the event to a partition.
    pub fn author_id(&self) -> UserId {
        self.post.author_id
    }

    /// Partition key shared by all events of one author.
    pub fn partition_key(&self) -> String {
        self.post.author_id.to_string()
    }

    /// Encode the event as a JSON payload.
    pub fn to_payload(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Decode a payload produced by [`PostCreatedEvent::to_payload`].
    pub fn from_payload(payload: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(payload)
    }
}

define_port_error! {
    /// Errors raised while publishing events.
    pub enum PublishError {
        /// The log could not be reached.
        Unavailable { message: String } => "post event log unavailable: {message}",
        /// The log refused the event.
        Rejected { message: String } => "post event log rejected the event: {message}",
        /// The event could not be encoded.
        Serialization { message: String } => "post event could not be encoded: {message}",
    }
}

/// Where a published or delivered record lives in the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RecordPosition {
    /// Partition index.
    pub partition: u32,
    /// Zero-based offset within the partition.
    pub offset: u64,
}

/// Append `PostCreated` events to the log.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PostEventPublisher: Send + Sync {
    /// Append one event, returning its position once durable.
    async fn publish(&self, event: &PostCreatedEvent) -> Result<RecordPosition, PublishError>;
}

define_port_error! {
    /// Errors raised by event subscriptions.
    pub enum EventSourceError {
        /// The log could not be reached.
        Unavailable { message: String } => "post event log unavailable: {message}",
        /// The member no longer owns the partition it tried to commit.
        LostClaim { partition: u32 } => "partition {partition} is no longer claimed by this member",
        /// The subscription has already been closed.
        Closed => "subscription is closed",
    }
}

/// One undecoded record delivered to a consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostEventRecord {
    /// Where the record lives; commit this once handled.
    pub position: RecordPosition,
    /// Partition key the record was published with.
    pub key: String,
    /// Encoded event body.
    pub payload: Vec<u8>,
}

/// Outcome of one poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// Records from owned partitions, each partition in offset order.
    Records(Vec<PostEventRecord>),
    /// Partition ownership changed; the new assignment is listed.
    Rebalanced { assigned: Vec<u32> },
    /// Nothing arrived before the poll interval elapsed.
    Idle,
}

/// Entry point for joining a consumer group.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PostEventSource: Send + Sync {
    /// Join `group` as `member` and start receiving records.
    async fn subscribe(
        &self,
        group: &str,
        member: &str,
    ) -> Result<Box<dyn PostEventSubscription>, EventSourceError>;
}

/// A live consumer group membership.
///
/// Records are delivered at least once: a record that is not committed
/// before its partition moves to another member is redelivered there.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PostEventSubscription: Send {
    /// Wait for the next batch of records or an ownership change.
    async fn poll(&mut self) -> Result<Delivery, EventSourceError>;

    /// Mark every record up to and including `position` as processed.
    async fn commit(&mut self, position: RecordPosition) -> Result<(), EventSourceError>;

    /// Release partition claims and leave the group.
    async fn close(&mut self) -> Result<(), EventSourceError>;
}
