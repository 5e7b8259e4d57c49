//! Queue engine
//!
//! The engine is the only owner of per-topic message state. It runs as a
//! single task looping over a bounded mailbox; every request carries a
//! one-shot reply channel. Callers hold a cheap, cloneable [`QueueHandle`]
//! and never see the maps themselves, so enqueue/retrieve calls coming from
//! different connections are linearized by the mailbox without any lock.
//!
//! Lifecycle:
//! - `load_from_storage` once at startup: restores the last checkpoint and
//!   asks storage to drop it, so a checkpoint is never read twice
//! - `enqueue` / `retrieve` while the server runs
//! - `flush` at shutdown, bounded by the grace deadline

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::broker::clock::Clock;
use crate::broker::message::Message;
use crate::persistence::{CheckpointRow, Storage};
use crate::utils::{BrokerError, Result};

#[derive(Debug, Default)]
struct TopicQueue {
    live: VecDeque<Message>,
    dead: Vec<Message>,
}

/// Live and dead-letter counts for one topic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub live: usize,
    pub dead: usize,
}

enum Command {
    Enqueue {
        topic_id: String,
        message: Message,
        reply: oneshot::Sender<Result<()>>,
    },
    Retrieve {
        topic_id: String,
        reply: oneshot::Sender<Option<Message>>,
    },
    Load {
        reply: oneshot::Sender<Result<usize>>,
    },
    Flush {
        reply: oneshot::Sender<Result<()>>,
    },
    Stats {
        reply: oneshot::Sender<HashMap<String, QueueStats>>,
    },
    DeadLetters {
        topic_id: String,
        reply: oneshot::Sender<Vec<Message>>,
    },
}

pub struct QueueEngine {
    topics: HashMap<String, TopicQueue>,
    storage: Arc<dyn Storage>,
    clock: Arc<dyn Clock>,
    loaded: bool,
}

impl QueueEngine {
    /// Spawns the engine task and returns the handle used to reach it.
    ///
    /// The task ends once every handle has been dropped.
    pub fn spawn(
        storage: Arc<dyn Storage>,
        clock: Arc<dyn Clock>,
        mailbox_capacity: usize,
    ) -> (QueueHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(mailbox_capacity.max(1));
        let engine = Self {
            topics: HashMap::new(),
            storage,
            clock,
            loaded: false,
        };
        let task = tokio::spawn(engine.run(rx));
        (QueueHandle { tx }, task)
    }

    async fn run(mut self, mut rx: mpsc::Receiver<Command>) {
        while let Some(cmd) = rx.recv().await {
            match cmd {
                Command::Enqueue {
                    topic_id,
                    message,
                    reply,
                } => {
                    let _ = reply.send(self.enqueue(topic_id, message));
                }
                Command::Retrieve { topic_id, reply } => {
                    let _ = reply.send(self.retrieve(&topic_id));
                }
                Command::Load { reply } => {
                    let _ = reply.send(self.load().await);
                }
                Command::Flush { reply } => {
                    let _ = reply.send(self.flush().await);
                }
                Command::Stats { reply } => {
                    let _ = reply.send(self.stats());
                }
                Command::DeadLetters { topic_id, reply } => {
                    let dead = self
                        .topics
                        .get(&topic_id)
                        .map(|q| q.dead.clone())
                        .unwrap_or_default();
                    let _ = reply.send(dead);
                }
            }
        }
        debug!("queue engine mailbox closed");
    }

    fn enqueue(&mut self, topic_id: String, message: Message) -> Result<()> {
        if topic_id.is_empty() {
            return Err(BrokerError::invalid_argument("topicId cannot be empty"));
        }
        if message.message_id.is_empty() || message.payload.is_empty() {
            return Err(BrokerError::invalid_argument("message cannot be empty"));
        }

        debug!("enqueue {} on topic {topic_id}", message.message_id);
        self.topics
            .entry(topic_id)
            .or_default()
            .live
            .push_back(message);
        Ok(())
    }

    /// Pops expired heads into the dead list and hands out the first live
    /// message, removing it from the queue.
    fn retrieve(&mut self, topic_id: &str) -> Option<Message> {
        let now = self.clock.now();
        let queue = self.topics.get_mut(topic_id)?;

        while let Some(head) = queue.live.pop_front() {
            if head.is_expired_at(now) {
                debug!("message {} on topic {topic_id} expired", head.message_id);
                queue.dead.push(head);
            } else {
                return Some(head);
            }
        }
        None
    }

    async fn load(&mut self) -> Result<usize> {
        if self.loaded {
            return Err(BrokerError::failed_precondition(
                "queue already loaded from storage",
            ));
        }

        let snapshot = self.storage.fetch_queues().await?;
        let mut restored = 0;

        for (topic_id, messages) in snapshot.live {
            restored += messages.len();
            let queue = self.topics.entry(topic_id).or_default();
            // checkpointed messages are older than anything enqueued since
            let mut live: VecDeque<Message> = messages.into();
            live.append(&mut queue.live);
            queue.live = live;
        }
        for (topic_id, mut messages) in snapshot.dead {
            let queue = self.topics.entry(topic_id).or_default();
            messages.append(&mut queue.dead);
            queue.dead = messages;
        }
        self.loaded = true;

        self.storage.remove_messages_from_queue().await?;
        info!("restored {restored} queued messages from the last checkpoint");
        Ok(restored)
    }

    async fn flush(&mut self) -> Result<()> {
        let (live, dead) = self.checkpoint_rows();
        self.storage.save_queues(&live, &dead).await?;
        info!(
            "queue checkpoint written: {} live, {} dead",
            live.len(),
            dead.len()
        );
        Ok(())
    }

    fn checkpoint_rows(&self) -> (Vec<CheckpointRow>, Vec<CheckpointRow>) {
        let row = |topic_id: &str, message: &Message| CheckpointRow {
            queue_id: Uuid::new_v4().to_string(),
            topic_id: topic_id.to_string(),
            message: message.clone(),
        };

        // sorted so checkpoints are stable across runs
        let ordered: BTreeMap<_, _> = self.topics.iter().collect();
        let mut live = Vec::new();
        let mut dead = Vec::new();
        for (topic_id, queue) in ordered {
            live.extend(queue.live.iter().map(|m| row(topic_id.as_str(), m)));
            dead.extend(queue.dead.iter().map(|m| row(topic_id.as_str(), m)));
        }
        (live, dead)
    }

    fn stats(&self) -> HashMap<String, QueueStats> {
        self.topics
            .iter()
            .map(|(topic_id, q)| {
                (
                    topic_id.clone(),
                    QueueStats {
                        live: q.live.len(),
                        dead: q.dead.len(),
                    },
                )
            })
            .collect()
    }
}

/// Cloneable mailbox into the queue engine.
#[derive(Debug, Clone)]
pub struct QueueHandle {
    tx: mpsc::Sender<Command>,
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Command::Enqueue { .. } => "Enqueue",
            Command::Retrieve { .. } => "Retrieve",
            Command::Load { .. } => "Load",
            Command::Flush { .. } => "Flush",
            Command::Stats { .. } => "Stats",
            Command::DeadLetters { .. } => "DeadLetters",
        };
        f.write_str(name)
    }
}

impl QueueHandle {
    async fn call<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(make(reply))
            .await
            .map_err(|_| BrokerError::internal("queue engine is not running"))?;
        rx.await
            .map_err(|_| BrokerError::internal("queue engine dropped the request"))
    }

    /// Appends `message` to the live queue of `topic_id`.
    pub async fn enqueue(&self, topic_id: &str, message: Message) -> Result<()> {
        self.call(|reply| Command::Enqueue {
            topic_id: topic_id.to_string(),
            message,
            reply,
        })
        .await?
    }

    /// Takes the first unexpired message of `topic_id`, or `None` when the
    /// queue is empty or everything in it has expired.
    pub async fn retrieve(&self, topic_id: &str) -> Result<Option<Message>> {
        self.call(|reply| Command::Retrieve {
            topic_id: topic_id.to_string(),
            reply,
        })
        .await
    }

    /// Restores the last checkpoint. Returns the number of live messages
    /// restored.
    pub async fn load_from_storage(&self) -> Result<usize> {
        self.call(|reply| Command::Load { reply }).await?
    }

    /// Writes the live and dead lists to storage, giving up at `deadline`.
    pub async fn flush(&self, deadline: Instant) -> Result<()> {
        match tokio::time::timeout_at(deadline, self.call(|reply| Command::Flush { reply })).await
        {
            Ok(result) => result?,
            Err(_) => {
                warn!("queue flush did not finish before the shutdown deadline");
                Err(BrokerError::DeadlineExceeded(
                    "queue flush did not finish in time".to_string(),
                ))
            }
        }
    }

    pub async fn stats(&self) -> Result<HashMap<String, QueueStats>> {
        self.call(|reply| Command::Stats { reply }).await
    }

    pub async fn dead_letters(&self, topic_id: &str) -> Result<Vec<Message>> {
        self.call(|reply| Command::DeadLetters {
            topic_id: topic_id.to_string(),
            reply,
        })
        .await
    }
}
