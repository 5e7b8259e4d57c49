//! Topic registry
//!
//! Turns client intents into storage and queue operations while keeping the
//! registration invariants:
//! - a publisher is bound to at most one topic; binding again replaces the
//!   old binding wholesale
//! - a subscriber may hold many bindings; subscribing twice to the same
//!   topic is a successful no-op
//! - publishing requires a binding, and both the enqueue and the durable
//!   message write must succeed. There is no rollback when only the enqueue
//!   went through.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::broker::clock::Clock;
use crate::broker::engine::QueueHandle;
use crate::broker::message::{Message, format_timestamp, parse_timestamp};
use crate::persistence::{PublisherId, PublisherRecord, Storage, SubscriberId};
use crate::utils::{BrokerError, Result};

/// A message as submitted by a publisher, before the broker assigns an id.
///
/// Missing timestamps are filled in on publish: `created_at` with the
/// current time and `expires_at` with `created_at` plus the default TTL.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageDraft {
    pub data: String,
    pub created_at: Option<String>,
    pub expires_at: Option<String>,
}

/// Operations the request router dispatches to.
#[async_trait]
pub trait TopicService: Send + Sync {
    async fn list_topics(&self) -> Result<Vec<String>>;

    async fn register_publisher(&self, publisher_id: PublisherId, topic_name: &str) -> Result<()>;

    async fn deregister_publisher(&self, publisher_id: PublisherId) -> Result<()>;

    /// Returns the id assigned to the published message.
    async fn publish_message(&self, publisher_id: PublisherId, draft: MessageDraft)
    -> Result<String>;

    async fn register_subscriber(&self, subscriber_id: SubscriberId, topic_name: &str)
    -> Result<()>;

    async fn deregister_subscriber(
        &self,
        subscriber_id: SubscriberId,
        topic_name: &str,
    ) -> Result<()>;

    async fn list_subscriptions(&self, subscriber_id: SubscriberId) -> Result<Vec<String>>;

    async fn read_message(
        &self,
        subscriber_id: SubscriberId,
        topic_name: &str,
    ) -> Result<Option<Message>>;
}

pub struct TopicRegistry {
    storage: Arc<dyn Storage>,
    queue: QueueHandle,
    clock: Arc<dyn Clock>,
    default_ttl: Duration,
}

impl TopicRegistry {
    pub fn new(
        storage: Arc<dyn Storage>,
        queue: QueueHandle,
        clock: Arc<dyn Clock>,
        default_ttl_secs: u64,
    ) -> Self {
        let default_ttl = i64::try_from(default_ttl_secs)
            .ok()
            .and_then(Duration::try_seconds)
            .unwrap_or(Duration::MAX);
        Self {
            storage,
            queue,
            clock,
            default_ttl,
        }
    }

    async fn resolve_topic(&self, topic_name: &str) -> Result<String> {
        self.storage
            .get_topic_id_from_topic(topic_name)
            .await?
            .ok_or_else(|| BrokerError::not_found(format!("topic '{topic_name}' not found")))
    }

    /// Assigns an id and normalizes the timestamps of `draft`.
    fn stamp(&self, draft: MessageDraft) -> Result<Message> {
        let created_at = match draft.created_at.filter(|s| !s.trim().is_empty()) {
            Some(raw) => parse_timestamp(&raw)?,
            None => self.clock.now(),
        };
        let expires_at = match draft.expires_at.filter(|s| !s.trim().is_empty()) {
            Some(raw) => parse_timestamp(&raw)?,
            None => created_at
                .checked_add_signed(self.default_ttl)
                .ok_or_else(|| BrokerError::invalid_argument("message ttl out of range"))?,
        };

        Ok(Message {
            message_id: Uuid::new_v4().to_string(),
            payload: draft.data,
            created_at: format_timestamp(created_at),
            expires_at: format_timestamp(expires_at),
        })
    }
}

#[async_trait]
impl TopicService for TopicRegistry {
    async fn list_topics(&self) -> Result<Vec<String>> {
        self.storage.fetch_all_topics().await
    }

    async fn register_publisher(&self, publisher_id: PublisherId, topic_name: &str) -> Result<()> {
        let topic_id = self.resolve_topic(topic_name).await.inspect_err(|err| {
            warn!(publisher_id, "register publisher: {err}");
        })?;

        match self.storage.get_topic_id_from_publisher(publisher_id).await? {
            PublisherRecord::Missing => {
                self.storage.insert_publisher(publisher_id, &topic_id).await?;
            }
            PublisherRecord::Bound(previous) if previous != topic_id => {
                debug!(publisher_id, "replacing binding to topic id {previous}");
                self.storage
                    .update_topic_id_into_publisher(publisher_id, &topic_id)
                    .await?;
            }
            PublisherRecord::Bound(_) | PublisherRecord::Unbound => {
                self.storage
                    .update_topic_id_into_publisher(publisher_id, &topic_id)
                    .await?;
            }
        }

        info!(publisher_id, "publisher bound to topic {topic_name}");
        Ok(())
    }

    async fn deregister_publisher(&self, publisher_id: PublisherId) -> Result<()> {
        let record = self.storage.get_topic_id_from_publisher(publisher_id).await?;
        if record.topic_id().is_none() {
            warn!(publisher_id, "deregister requested without a binding");
            return Err(BrokerError::not_found(
                "publisher is not registered with any topic",
            ));
        }

        self.storage.remove_topic_id_from_publisher(publisher_id).await?;
        info!(publisher_id, "publisher unbound");
        Ok(())
    }

    async fn publish_message(
        &self,
        publisher_id: PublisherId,
        draft: MessageDraft,
    ) -> Result<String> {
        let record = self.storage.get_topic_id_from_publisher(publisher_id).await?;
        let Some(topic_id) = record.topic_id() else {
            warn!(publisher_id, "publish without a topic binding");
            return Err(BrokerError::failed_precondition(
                "not registered to any topic",
            ));
        };

        let message = self.stamp(draft)?;
        let message_id = message.message_id.clone();

        self.queue
            .enqueue(topic_id, message.clone())
            .await
            .inspect_err(|err| warn!(publisher_id, "failed to enqueue message: {err}"))?;

        self.storage
            .insert_message_into_message(publisher_id, topic_id, &message)
            .await
            .inspect_err(|err| {
                warn!(publisher_id, "message {message_id} queued but not recorded: {err}")
            })?;

        debug!(publisher_id, "published message {message_id}");
        Ok(message_id)
    }

    async fn register_subscriber(
        &self,
        subscriber_id: SubscriberId,
        topic_name: &str,
    ) -> Result<()> {
        let subscribed = self.storage.get_subscribed_topics(subscriber_id).await?;
        if subscribed.iter().any(|name| name == topic_name) {
            debug!(subscriber_id, "already subscribed to {topic_name}");
            return Ok(());
        }

        let topic_id = self.resolve_topic(topic_name).await.inspect_err(|err| {
            warn!(subscriber_id, "register subscriber: {err}");
        })?;

        self.storage
            .insert_subscriber_id_into_subscriber(subscriber_id)
            .await?;
        self.storage
            .insert_into_subscriber_topic_map(subscriber_id, &topic_id)
            .await?;

        info!(subscriber_id, "subscribed to topic {topic_name}");
        Ok(())
    }

    async fn deregister_subscriber(
        &self,
        subscriber_id: SubscriberId,
        topic_name: &str,
    ) -> Result<()> {
        let topic_id = self.resolve_topic(topic_name).await?;
        self.storage
            .remove_topic_id_from_subscriber_topic_map(subscriber_id, &topic_id)
            .await?;

        info!(subscriber_id, "unsubscribed from topic {topic_name}");
        Ok(())
    }

    async fn list_subscriptions(&self, subscriber_id: SubscriberId) -> Result<Vec<String>> {
        self.storage.get_subscribed_topics(subscriber_id).await
    }

    async fn read_message(
        &self,
        subscriber_id: SubscriberId,
        topic_name: &str,
    ) -> Result<Option<Message>> {
        let topic_id = self.resolve_topic(topic_name).await?;
        let message = self.queue.retrieve(&topic_id).await?;

        if message.is_none() {
            debug!(subscriber_id, "no message available on {topic_name}");
        }
        Ok(message)
    }
}
