//! Storage backed by `sled`
//!
//! Each table of the broker lives in its own tree:
//! - `topics`: topic name -> topic id, plus `topic_ids` for the reverse lookup
//! - `publishers`: publisher id -> bound topic id (empty when unbound)
//! - `subscribers` and `subscriber_topics`: subscriber records and the
//!   `<subscriber>/<topic id>` mapping rows
//! - `messages`: the durable log of every published message
//! - `queue_live` / `queue_dead`: the checkpoint written at shutdown. Keys
//!   are zero-padded sequence numbers so iteration yields rows in the order
//!   they were saved.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sled::{Db, Tree};
use tracing::debug;
use uuid::Uuid;

use super::{CheckpointRow, PublisherId, PublisherRecord, QueueSnapshot, Storage, SubscriberId};
use crate::broker::message::Message;
use crate::utils::Result;

const TOPICS: &str = "topics";
const TOPIC_IDS: &str = "topic_ids";
const PUBLISHERS: &str = "publishers";
const SUBSCRIBERS: &str = "subscribers";
const SUBSCRIBER_TOPICS: &str = "subscriber_topics";
const MESSAGES: &str = "messages";
const QUEUE_LIVE: &str = "queue_live";
const QUEUE_DEAD: &str = "queue_dead";

/// A row of the durable message log.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct StoredMessage {
    pub message_id: String,
    pub publisher_id: PublisherId,
    pub topic_id: String,
    pub data: String,
    pub created_at: String,
    pub expires_at: String,
}

#[derive(Clone)]
pub struct SledStore {
    db: Db,
}

impl SledStore {
    /// Open or create a sled database at `path`.
    pub fn open(path: &str) -> Result<Self> {
        let db = sled::open(path)?;
        Ok(Self { db })
    }

    fn tree(&self, name: &str) -> Result<Tree> {
        Ok(self.db.open_tree(name)?)
    }

    /// Looks up a single message from the durable log.
    pub fn stored_message(&self, message_id: &str) -> Result<Option<StoredMessage>> {
        match self.tree(MESSAGES)?.get(message_id.as_bytes())? {
            Some(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            None => Ok(None),
        }
    }

    /// Flushes dirty pages to disk.
    pub async fn flush_async(&self) -> Result<()> {
        self.db.flush_async().await?;
        Ok(())
    }

    fn subscriber_key(subscriber_id: SubscriberId) -> String {
        format!("{subscriber_id:020}/")
    }

    fn write_rows(tree: &Tree, rows: &[CheckpointRow]) -> Result<()> {
        tree.clear()?;
        for (seq, row) in rows.iter().enumerate() {
            let key = format!("{seq:020}");
            tree.insert(key.as_bytes(), serde_json::to_vec(row)?)?;
        }
        Ok(())
    }

    fn read_rows(tree: &Tree) -> Result<Vec<CheckpointRow>> {
        let mut rows = Vec::with_capacity(tree.len());
        for entry in tree.iter() {
            let (_, raw) = entry?;
            rows.push(serde_json::from_slice(&raw)?);
        }
        Ok(rows)
    }
}

#[async_trait]
impl Storage for SledStore {
    async fn fetch_all_topics(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in self.tree(TOPICS)?.iter() {
            let (key, _) = entry?;
            names.push(String::from_utf8_lossy(&key).into_owned());
        }
        Ok(names)
    }

    async fn insert_topic(&self, topic_name: &str) -> Result<String> {
        let topics = self.tree(TOPICS)?;
        if let Some(id) = topics.get(topic_name.as_bytes())? {
            return Ok(String::from_utf8_lossy(&id).into_owned());
        }

        let topic_id = Uuid::new_v4().to_string();
        topics.insert(topic_name.as_bytes(), topic_id.as_bytes())?;
        self.tree(TOPIC_IDS)?
            .insert(topic_id.as_bytes(), topic_name.as_bytes())?;
        debug!("created topic {topic_name} with id {topic_id}");
        Ok(topic_id)
    }

    async fn get_topic_id_from_topic(&self, topic_name: &str) -> Result<Option<String>> {
        Ok(self
            .tree(TOPICS)?
            .get(topic_name.as_bytes())?
            .map(|id| String::from_utf8_lossy(&id).into_owned()))
    }

    async fn get_topic_id_from_publisher(
        &self,
        publisher_id: PublisherId,
    ) -> Result<PublisherRecord> {
        let record = match self.tree(PUBLISHERS)?.get(publisher_id.to_be_bytes())? {
            None => PublisherRecord::Missing,
            Some(topic_id) if topic_id.is_empty() => PublisherRecord::Unbound,
            Some(topic_id) => PublisherRecord::Bound(String::from_utf8_lossy(&topic_id).into_owned()),
        };
        Ok(record)
    }

    async fn insert_publisher(&self, publisher_id: PublisherId, topic_id: &str) -> Result<()> {
        self.tree(PUBLISHERS)?
            .insert(publisher_id.to_be_bytes(), topic_id.as_bytes())?;
        Ok(())
    }

    async fn update_topic_id_into_publisher(
        &self,
        publisher_id: PublisherId,
        topic_id: &str,
    ) -> Result<()> {
        self.tree(PUBLISHERS)?
            .insert(publisher_id.to_be_bytes(), topic_id.as_bytes())?;
        Ok(())
    }

    async fn remove_topic_id_from_publisher(&self, publisher_id: PublisherId) -> Result<()> {
        let publishers = self.tree(PUBLISHERS)?;
        if publishers.contains_key(publisher_id.to_be_bytes())? {
            publishers.insert(publisher_id.to_be_bytes(), &[] as &[u8])?;
        }
        Ok(())
    }

    async fn insert_message_into_message(
        &self,
        publisher_id: PublisherId,
        topic_id: &str,
        message: &Message,
    ) -> Result<()> {
        let stored = StoredMessage {
            message_id: message.message_id.clone(),
            publisher_id,
            topic_id: topic_id.to_string(),
            data: message.payload.clone(),
            created_at: message.created_at.clone(),
            expires_at: message.expires_at.clone(),
        };
        self.tree(MESSAGES)?
            .insert(stored.message_id.as_bytes(), serde_json::to_vec(&stored)?)?;
        Ok(())
    }

    async fn get_subscribed_topics(&self, subscriber_id: SubscriberId) -> Result<Vec<String>> {
        let topic_ids = self.tree(TOPIC_IDS)?;
        let prefix = Self::subscriber_key(subscriber_id);

        let mut names = Vec::new();
        for entry in self.tree(SUBSCRIBER_TOPICS)?.scan_prefix(prefix.as_bytes()) {
            let (key, _) = entry?;
            let topic_id = &key[prefix.len()..];
            // a mapping whose topic vanished is skipped
            if let Some(name) = topic_ids.get(topic_id)? {
                names.push(String::from_utf8_lossy(&name).into_owned());
            }
        }
        Ok(names)
    }

    async fn insert_subscriber_id_into_subscriber(
        &self,
        subscriber_id: SubscriberId,
    ) -> Result<()> {
        let subscribers = self.tree(SUBSCRIBERS)?;
        if !subscribers.contains_key(subscriber_id.to_be_bytes())? {
            subscribers.insert(subscriber_id.to_be_bytes(), &[] as &[u8])?;
        }
        Ok(())
    }

    async fn insert_into_subscriber_topic_map(
        &self,
        subscriber_id: SubscriberId,
        topic_id: &str,
    ) -> Result<()> {
        let key = format!("{}{topic_id}", Self::subscriber_key(subscriber_id));
        self.tree(SUBSCRIBER_TOPICS)?
            .insert(key.as_bytes(), &[] as &[u8])?;
        Ok(())
    }

    async fn remove_topic_id_from_subscriber_topic_map(
        &self,
        subscriber_id: SubscriberId,
        topic_id: &str,
    ) -> Result<()> {
        let key = format!("{}{topic_id}", Self::subscriber_key(subscriber_id));
        self.tree(SUBSCRIBER_TOPICS)?.remove(key.as_bytes())?;
        Ok(())
    }

    async fn fetch_queues(&self) -> Result<QueueSnapshot> {
        let mut snapshot = QueueSnapshot::default();

        for row in Self::read_rows(&self.tree(QUEUE_LIVE)?)? {
            snapshot.live.entry(row.topic_id).or_default().push(row.message);
        }
        for row in Self::read_rows(&self.tree(QUEUE_DEAD)?)? {
            snapshot.dead.entry(row.topic_id).or_default().push(row.message);
        }

        Ok(snapshot)
    }

    async fn save_queues(&self, live: &[CheckpointRow], dead: &[CheckpointRow]) -> Result<()> {
        Self::write_rows(&self.tree(QUEUE_LIVE)?, live)?;
        Self::write_rows(&self.tree(QUEUE_DEAD)?, dead)?;
        self.flush_async().await
    }

    async fn remove_messages_from_queue(&self) -> Result<()> {
        self.tree(QUEUE_LIVE)?.clear()?;
        self.tree(QUEUE_DEAD)?.clear()?;
        self.flush_async().await
    }
}

impl std::fmt::Debug for SledStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SledStore")
            .field("db", &"sled::Db")
            .finish()
    }
}
