//! CLI for imq
//!
//! Subcommands:
//! - `server`: run the broker
//! - `client`: publish one message and read it back (useful for smoke tests)

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use imq::broker::{QueueEngine, SystemClock, TopicRegistry};
use imq::client::Connection;
use imq::config::load_config;
use imq::persistence::{SledStore, Storage};
use imq::transport::message::*;
use imq::transport::{RequestRouter, Server, ServerConfig};
use imq::utils::logging;
use tokio::time::Instant;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "imq")]
enum Command {
    /// Start the broker
    Server,
    /// Publish a message to a topic and read it back
    Client {
        /// Broker address
        #[arg(long, default_value = "127.0.0.1:8080")]
        addr: SocketAddr,
        /// Topic to publish to; must already exist on the broker
        #[arg(long, default_value = "rust")]
        topic: String,
        /// Message payload
        #[arg(long, default_value = "hello from imq")]
        data: String,
        /// Local port for the publisher connection
        #[arg(long, default_value_t = 5001)]
        publisher_port: u16,
        /// Local port for the subscriber connection
        #[arg(long, default_value_t = 6001)]
        subscriber_port: u16,
    },
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    logging::init("info");

    match Command::parse() {
        Command::Server => {
            if let Err(e) = run_server().await {
                error!("Server failed: {e}");
            }
        }
        Command::Client {
            addr,
            topic,
            data,
            publisher_port,
            subscriber_port,
        } => {
            if let Err(e) = run_client(addr, &topic, data, publisher_port, subscriber_port).await {
                error!("Client failed: {e}");
            }
        }
    }
}

async fn run_server() -> Result<(), Box<dyn std::error::Error>> {
    let settings = load_config()?;
    let store = Arc::new(SledStore::open(&settings.storage.path)?);
    for topic in &settings.storage.seed_topics {
        store.insert_topic(topic).await?;
    }

    let storage: Arc<dyn Storage> = store.clone();
    let clock = Arc::new(SystemClock);
    let (queue, _engine_task) =
        QueueEngine::spawn(storage.clone(), clock.clone(), settings.broker.mailbox_capacity);

    queue.load_from_storage().await?;

    let registry = TopicRegistry::new(
        storage,
        queue.clone(),
        clock,
        settings.broker.message_ttl_secs,
    );
    let router = Arc::new(RequestRouter::new(Arc::new(registry)));
    let addr = format!("{}:{}", settings.server.host, settings.server.port);
    let server = Server::bind(&addr, ServerConfig::from(&settings), router).await?;

    wait_for_signal().await;
    info!("Shutdown signal received. Draining connections.");

    let deadline = Instant::now() + Duration::from_secs(settings.server.shutdown_grace_secs);
    if let Err(e) = server.shutdown(deadline).await {
        warn!("listener shutdown: {e}");
    }
    match queue.stats().await {
        Ok(stats) => {
            for (topic_id, counts) in &stats {
                info!("topic {topic_id}: {} live, {} dead", counts.live, counts.dead);
            }
        }
        Err(e) => warn!("queue stats: {e}"),
    }
    if let Err(e) = queue.flush(deadline).await {
        warn!("queue flush: {e}");
    }
    if let Err(e) = store.flush_async().await {
        warn!("storage flush: {e}");
    }

    info!("Broker stopped.");
    Ok(())
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
                return;
            }
            Err(e) => warn!("cannot listen for SIGTERM: {e}"),
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("cannot listen for ctrl-c: {e}");
    }
}

async fn run_client(
    addr: SocketAddr,
    topic: &str,
    data: String,
    publisher_port: u16,
    subscriber_port: u16,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut publisher = Connection::dial(addr, Some(publisher_port)).await?;
    let publisher_id = i64::from(publisher.local_addr().port());

    let topics: ShowTopicResponse = publisher
        .request("showTopicRequest", &ShowTopicRequest::default())
        .await?;
    println!("Topics: {:?}", topics.topics);

    let connected: ConnectToTopicResponse = publisher
        .request(
            "connectToTopicRequest",
            &ConnectToTopicRequest {
                publisher_id,
                topic_name: topic.to_string(),
            },
        )
        .await?;
    println!("Connect: {}", connected.status);

    let published: PublishMessageResponse = publisher
        .request(
            "publishMessageRequest",
            &PublishMessageRequest {
                publisher_id,
                message: MessageBody {
                    data,
                    ..MessageBody::default()
                },
            },
        )
        .await?;
    println!("Publish: {} ({})", published.status, published.message_id);

    let mut subscriber = Connection::dial(addr, Some(subscriber_port)).await?;
    let subscriber_id = i64::from(subscriber.local_addr().port());

    let subscribed: SubscribeToTopicResponse = subscriber
        .request(
            "subscribeToTopicRequest",
            &SubscribeToTopicRequest {
                subscriber_id,
                topic_name: topic.to_string(),
            },
        )
        .await?;
    println!("Subscribe: {}", subscribed.status);

    let received: GetMessageFromTopicResponse = subscriber
        .request(
            "getMessageFromTopicRequest",
            &GetMessageFromTopicRequest {
                subscriber_id,
                topic_name: topic.to_string(),
            },
        )
        .await?;
    match received.message {
        Some(message) => println!("Incoming: {}", message.data),
        None => println!("Incoming: <none>"),
    }

    Ok(())
}
