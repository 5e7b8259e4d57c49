//! Shared fixtures for the crate's tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tempfile::{TempDir, tempdir};
use tokio::sync::Notify;

use crate::broker::message::{Message, parse_timestamp};
use crate::broker::{Clock, MessageDraft, QueueEngine, QueueHandle, TopicRegistry, TopicService};
use crate::persistence::{
    CheckpointRow, PublisherId, PublisherRecord, QueueSnapshot, SledStore, Storage, SubscriberId,
};
use crate::utils::{BrokerError, Result};

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn at(raw: &str) -> Arc<Self> {
        Arc::new(Self {
            now: Mutex::new(parse_timestamp(raw).unwrap()),
        })
    }

    pub fn advance_secs(&self, secs: i64) {
        let mut now = self.now.lock().unwrap();
        *now += chrono::Duration::seconds(secs);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

/// `SledStore` in a temp dir with switches for injecting failures and
/// counters for observing checkpoint traffic.
pub struct TestStorage {
    inner: SledStore,
    pub fail_message_log: AtomicBool,
    pub save_delay: Mutex<Option<Duration>>,
    pub fetch_calls: AtomicUsize,
    pub clear_calls: AtomicUsize,
    _dir: TempDir,
}

impl TestStorage {
    pub fn new() -> Arc<Self> {
        let dir = tempdir().unwrap();
        let inner = SledStore::open(dir.path().to_str().unwrap()).unwrap();
        Arc::new(Self {
            inner,
            fail_message_log: AtomicBool::new(false),
            save_delay: Mutex::new(None),
            fetch_calls: AtomicUsize::new(0),
            clear_calls: AtomicUsize::new(0),
            _dir: dir,
        })
    }

    pub async fn seeded(topics: &[&str]) -> Arc<Self> {
        let storage = Self::new();
        for topic in topics {
            storage.inner.insert_topic(topic).await.unwrap();
        }
        storage
    }

    pub fn store(&self) -> &SledStore {
        &self.inner
    }
}

#[async_trait]
impl Storage for TestStorage {
    async fn fetch_all_topics(&self) -> Result<Vec<String>> {
        self.inner.fetch_all_topics().await
    }

    async fn insert_topic(&self, topic_name: &str) -> Result<String> {
        self.inner.insert_topic(topic_name).await
    }

    async fn get_topic_id_from_topic(&self, topic_name: &str) -> Result<Option<String>> {
        self.inner.get_topic_id_from_topic(topic_name).await
    }

    async fn get_topic_id_from_publisher(
        &self,
        publisher_id: PublisherId,
    ) -> Result<PublisherRecord> {
        self.inner.get_topic_id_from_publisher(publisher_id).await
    }

    async fn insert_publisher(&self, publisher_id: PublisherId, topic_id: &str) -> Result<()> {
        self.inner.insert_publisher(publisher_id, topic_id).await
    }

    async fn update_topic_id_into_publisher(
        &self,
        publisher_id: PublisherId,
        topic_id: &str,
    ) -> Result<()> {
        self.inner
            .update_topic_id_into_publisher(publisher_id, topic_id)
            .await
    }

    async fn remove_topic_id_from_publisher(&self, publisher_id: PublisherId) -> Result<()> {
        self.inner.remove_topic_id_from_publisher(publisher_id).await
    }

    async fn insert_message_into_message(
        &self,
        publisher_id: PublisherId,
        topic_id: &str,
        message: &Message,
    ) -> Result<()> {
        if self.fail_message_log.load(Ordering::SeqCst) {
            return Err(BrokerError::internal("message log unavailable"));
        }
        self.inner
            .insert_message_into_message(publisher_id, topic_id, message)
            .await
    }

    async fn get_subscribed_topics(&self, subscriber_id: SubscriberId) -> Result<Vec<String>> {
        self.inner.get_subscribed_topics(subscriber_id).await
    }

    async fn insert_subscriber_id_into_subscriber(
        &self,
        subscriber_id: SubscriberId,
    ) -> Result<()> {
        self.inner
            .insert_subscriber_id_into_subscriber(subscriber_id)
            .await
    }

    async fn insert_into_subscriber_topic_map(
        &self,
        subscriber_id: SubscriberId,
        topic_id: &str,
    ) -> Result<()> {
        self.inner
            .insert_into_subscriber_topic_map(subscriber_id, topic_id)
            .await
    }

    async fn remove_topic_id_from_subscriber_topic_map(
        &self,
        subscriber_id: SubscriberId,
        topic_id: &str,
    ) -> Result<()> {
        self.inner
            .remove_topic_id_from_subscriber_topic_map(subscriber_id, topic_id)
            .await
    }

    async fn fetch_queues(&self) -> Result<QueueSnapshot> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.fetch_queues().await
    }

    async fn save_queues(&self, live: &[CheckpointRow], dead: &[CheckpointRow]) -> Result<()> {
        let delay = *self.save_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.inner.save_queues(live, dead).await
    }

    async fn remove_messages_from_queue(&self) -> Result<()> {
        self.clear_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.remove_messages_from_queue().await
    }
}

/// Queue engine plus registry wired to `storage` and `clock`.
pub fn registry_with(
    storage: Arc<TestStorage>,
    clock: Arc<dyn Clock>,
) -> (Arc<TopicRegistry>, QueueHandle) {
    let (queue, _task) = QueueEngine::spawn(storage.clone(), clock.clone(), 64);
    let registry = TopicRegistry::new(storage, queue.clone(), clock, 3600);
    (Arc::new(registry), queue)
}

pub fn message(id: &str, data: &str, created_at: &str, expires_at: &str) -> Message {
    Message {
        message_id: id.to_string(),
        payload: data.to_string(),
        created_at: created_at.to_string(),
        expires_at: expires_at.to_string(),
    }
}

/// A `TopicService` that records calls and returns canned answers.
///
/// Topic `missing` is unknown and topic `empty` never has a message.
#[derive(Default)]
pub struct SpyService {
    pub calls: AtomicUsize,
    pub delay: Mutex<Option<Duration>>,
    entered: Notify,
    pub published: Mutex<Vec<(PublisherId, MessageDraft)>>,
}

impl SpyService {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn slow(delay: Duration) -> Arc<Self> {
        let spy = Self::default();
        *spy.delay.lock().unwrap() = Some(delay);
        Arc::new(spy)
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Resolves once at least `n` calls have started.
    pub async fn wait_for_calls(&self, n: usize) {
        loop {
            let entered = self.entered.notified();
            tokio::pin!(entered);
            entered.as_mut().enable();
            if self.call_count() >= n {
                return;
            }
            entered.await;
        }
    }

    async fn record(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.entered.notify_waiters();
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }

    fn known(topic_name: &str) -> Result<()> {
        if topic_name == "missing" {
            return Err(BrokerError::not_found(format!(
                "topic '{topic_name}' not found"
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl TopicService for SpyService {
    async fn list_topics(&self) -> Result<Vec<String>> {
        self.record().await;
        Ok(vec!["golang".to_string(), "rust".to_string()])
    }

    async fn register_publisher(&self, _publisher_id: PublisherId, topic_name: &str) -> Result<()> {
        self.record().await;
        Self::known(topic_name)
    }

    async fn deregister_publisher(&self, _publisher_id: PublisherId) -> Result<()> {
        self.record().await;
        Ok(())
    }

    async fn publish_message(
        &self,
        publisher_id: PublisherId,
        draft: MessageDraft,
    ) -> Result<String> {
        self.record().await;
        self.published.lock().unwrap().push((publisher_id, draft));
        Ok("msg-1".to_string())
    }

    async fn register_subscriber(
        &self,
        _subscriber_id: SubscriberId,
        topic_name: &str,
    ) -> Result<()> {
        self.record().await;
        Self::known(topic_name)
    }

    async fn deregister_subscriber(
        &self,
        _subscriber_id: SubscriberId,
        topic_name: &str,
    ) -> Result<()> {
        self.record().await;
        Self::known(topic_name)
    }

    async fn list_subscriptions(&self, _subscriber_id: SubscriberId) -> Result<Vec<String>> {
        self.record().await;
        Ok(vec!["rust".to_string()])
    }

    async fn read_message(
        &self,
        _subscriber_id: SubscriberId,
        topic_name: &str,
    ) -> Result<Option<Message>> {
        self.record().await;
        Self::known(topic_name)?;
        if topic_name == "empty" {
            return Ok(None);
        }
        Ok(Some(message(
            "m-1",
            "hello",
            "2021-02-27 20:03:09",
            "2021-02-27 21:03:09",
        )))
    }
}
