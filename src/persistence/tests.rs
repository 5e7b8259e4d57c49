use super::{CheckpointRow, PublisherRecord, SledStore, Storage};
use crate::broker::message::Message;
use tempfile::{TempDir, tempdir};

fn create_test_store() -> (SledStore, TempDir) {
    let dir = tempdir().unwrap();
    let store = SledStore::open(dir.path().to_str().unwrap()).unwrap();
    (store, dir)
}

fn message(id: &str, data: &str) -> Message {
    Message {
        message_id: id.to_string(),
        payload: data.to_string(),
        created_at: "2021-02-27 20:03:09".to_string(),
        expires_at: "2021-02-27 20:04:09".to_string(),
    }
}

fn row(topic_id: &str, msg: Message) -> CheckpointRow {
    CheckpointRow {
        queue_id: uuid::Uuid::new_v4().to_string(),
        topic_id: topic_id.to_string(),
        message: msg,
    }
}

#[tokio::test]
async fn test_insert_topic_is_idempotent() {
    let (store, _dir) = create_test_store();

    let first = store.insert_topic("golang").await.unwrap();
    let second = store.insert_topic("golang").await.unwrap();
    assert_eq!(first, second);

    let topics = store.fetch_all_topics().await.unwrap();
    assert_eq!(topics, vec!["golang"]);
    assert_eq!(
        store.get_topic_id_from_topic("golang").await.unwrap(),
        Some(first)
    );
    assert_eq!(store.get_topic_id_from_topic("java").await.unwrap(), None);
}

#[tokio::test]
async fn test_publisher_record_lifecycle() {
    let (store, _dir) = create_test_store();
    let golang = store.insert_topic("golang").await.unwrap();
    let rust = store.insert_topic("rust").await.unwrap();

    assert_eq!(
        store.get_topic_id_from_publisher(5001).await.unwrap(),
        PublisherRecord::Missing
    );

    store.insert_publisher(5001, &golang).await.unwrap();
    assert_eq!(
        store.get_topic_id_from_publisher(5001).await.unwrap(),
        PublisherRecord::Bound(golang.clone())
    );

    store.update_topic_id_into_publisher(5001, &rust).await.unwrap();
    assert_eq!(
        store.get_topic_id_from_publisher(5001).await.unwrap(),
        PublisherRecord::Bound(rust)
    );

    store.remove_topic_id_from_publisher(5001).await.unwrap();
    assert_eq!(
        store.get_topic_id_from_publisher(5001).await.unwrap(),
        PublisherRecord::Unbound
    );
}

#[tokio::test]
async fn test_subscriber_topic_map() {
    let (store, _dir) = create_test_store();
    let golang = store.insert_topic("golang").await.unwrap();
    let rust = store.insert_topic("rust").await.unwrap();

    store.insert_subscriber_id_into_subscriber(6001).await.unwrap();
    store.insert_subscriber_id_into_subscriber(6001).await.unwrap();
    store.insert_into_subscriber_topic_map(6001, &golang).await.unwrap();
    store.insert_into_subscriber_topic_map(6001, &rust).await.unwrap();
    store.insert_into_subscriber_topic_map(6002, &rust).await.unwrap();

    let mut topics = store.get_subscribed_topics(6001).await.unwrap();
    topics.sort();
    assert_eq!(topics, vec!["golang", "rust"]);

    store
        .remove_topic_id_from_subscriber_topic_map(6001, &golang)
        .await
        .unwrap();
    assert_eq!(store.get_subscribed_topics(6001).await.unwrap(), vec!["rust"]);
    assert_eq!(store.get_subscribed_topics(6002).await.unwrap(), vec!["rust"]);
}

#[tokio::test]
async fn test_message_log_records_publisher_and_topic() {
    let (store, _dir) = create_test_store();
    let topic_id = store.insert_topic("golang").await.unwrap();

    store
        .insert_message_into_message(5001, &topic_id, &message("m1", "hi"))
        .await
        .unwrap();

    let stored = store.stored_message("m1").unwrap().expect("message logged");
    assert_eq!(stored.publisher_id, 5001);
    assert_eq!(stored.topic_id, topic_id);
    assert_eq!(stored.data, "hi");
    assert!(store.stored_message("m2").unwrap().is_none());
}

#[tokio::test]
async fn test_checkpoint_preserves_order_and_can_be_cleared() {
    let (store, _dir) = create_test_store();

    let live = vec![
        row("t1", message("m1", "one")),
        row("t2", message("m2", "two")),
        row("t1", message("m3", "three")),
    ];
    let dead = vec![row("t1", message("m0", "zero"))];
    store.save_queues(&live, &dead).await.unwrap();

    let snapshot = store.fetch_queues().await.unwrap();
    let t1: Vec<_> = snapshot.live["t1"].iter().map(|m| m.message_id.as_str()).collect();
    assert_eq!(t1, vec!["m1", "m3"]);
    assert_eq!(snapshot.live["t2"][0].payload, "two");
    assert_eq!(snapshot.dead["t1"][0].message_id, "m0");

    store.remove_messages_from_queue().await.unwrap();
    assert!(store.fetch_queues().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_save_queues_replaces_previous_checkpoint() {
    let (store, _dir) = create_test_store();

    store
        .save_queues(&[row("t1", message("m1", "one"))], &[])
        .await
        .unwrap();
    store
        .save_queues(&[row("t2", message("m2", "two"))], &[])
        .await
        .unwrap();

    let snapshot = store.fetch_queues().await.unwrap();
    assert!(!snapshot.live.contains_key("t1"));
    assert_eq!(snapshot.live["t2"].len(), 1);
}

#[tokio::test]
async fn test_store_survives_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().to_str().unwrap().to_string();

    {
        let store = SledStore::open(&path).unwrap();
        store.insert_topic("golang").await.unwrap();
        store.flush_async().await.unwrap();
    }

    let store = SledStore::open(&path).unwrap();
    assert_eq!(store.fetch_all_topics().await.unwrap(), vec!["golang"]);
}
