//! The `persistence` module defines the storage collaborator of the broker.
//!
//! The registry and the queue engine only ever talk to the [`Storage`]
//! trait. `sled_store` provides the embedded implementation used by the
//! binary: topics, bindings, the durable message log and the queue
//! checkpoint written at shutdown all live in `sled` trees.

pub mod sled_store;

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::broker::message::Message;
use crate::utils::Result;

pub use sled_store::SledStore;

pub type PublisherId = i64;
pub type SubscriberId = i64;

/// What the store knows about a publisher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublisherRecord {
    /// No row for this publisher.
    Missing,
    /// A row exists but its binding was cleared.
    Unbound,
    Bound(String),
}

impl PublisherRecord {
    pub fn topic_id(&self) -> Option<&str> {
        match self {
            PublisherRecord::Bound(id) => Some(id),
            _ => None,
        }
    }
}

/// One queued message in a shutdown checkpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointRow {
    pub queue_id: String,
    pub topic_id: String,
    pub message: Message,
}

/// Queue contents read back from the last checkpoint, grouped by topic id
/// with per-topic order preserved.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueSnapshot {
    pub live: HashMap<String, Vec<Message>>,
    pub dead: HashMap<String, Vec<Message>>,
}

impl QueueSnapshot {
    pub fn is_empty(&self) -> bool {
        self.live.is_empty() && self.dead.is_empty()
    }
}

/// Storage collaborator used by the registry and the queue engine.
///
/// Implementations must be safe for concurrent calls; each call is expected
/// to be consistent on its own.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn fetch_all_topics(&self) -> Result<Vec<String>>;

    /// Creates a topic and returns its id. Existing names keep their id.
    async fn insert_topic(&self, topic_name: &str) -> Result<String>;

    async fn get_topic_id_from_topic(&self, topic_name: &str) -> Result<Option<String>>;

    async fn get_topic_id_from_publisher(&self, publisher_id: PublisherId)
    -> Result<PublisherRecord>;

    async fn insert_publisher(&self, publisher_id: PublisherId, topic_id: &str) -> Result<()>;

    async fn update_topic_id_into_publisher(
        &self,
        publisher_id: PublisherId,
        topic_id: &str,
    ) -> Result<()>;

    async fn remove_topic_id_from_publisher(&self, publisher_id: PublisherId) -> Result<()>;

    async fn insert_message_into_message(
        &self,
        publisher_id: PublisherId,
        topic_id: &str,
        message: &Message,
    ) -> Result<()>;

    /// Names of the topics the subscriber is mapped to.
    async fn get_subscribed_topics(&self, subscriber_id: SubscriberId) -> Result<Vec<String>>;

    /// No-op when the subscriber already has a record.
    async fn insert_subscriber_id_into_subscriber(&self, subscriber_id: SubscriberId)
    -> Result<()>;

    async fn insert_into_subscriber_topic_map(
        &self,
        subscriber_id: SubscriberId,
        topic_id: &str,
    ) -> Result<()>;

    async fn remove_topic_id_from_subscriber_topic_map(
        &self,
        subscriber_id: SubscriberId,
        topic_id: &str,
    ) -> Result<()>;

    async fn fetch_queues(&self) -> Result<QueueSnapshot>;

    /// Replaces the stored checkpoint with the given rows.
    async fn save_queues(&self, live: &[CheckpointRow], dead: &[CheckpointRow]) -> Result<()>;

    /// Drops the stored checkpoint.
    async fn remove_messages_from_queue(&self) -> Result<()>;
}

#[cfg(test)]
mod tests;
