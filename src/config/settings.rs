use serde::Deserialize;

/// Top-level configuration settings for the application.
///
/// Includes settings for the listener, the worker pools, the queue engine
/// and the embedded store.
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub pools: PoolSettings,
    pub broker: BrokerSettings,
    pub storage: StorageSettings,
}

/// Configuration settings for the server.
///
/// Defines the bind address plus the accept-cycle timeout and the shutdown
/// grace period, both in seconds.
#[derive(Debug, Deserialize, Clone)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub accept_timeout_secs: u64,
    pub shutdown_grace_secs: u64,
}

/// Worker pool sizes and the remote port ranges that select a pool.
///
/// Ranges are half-open: `start..end`.
#[derive(Debug, Deserialize, Clone)]
pub struct PoolSettings {
    pub publisher_workers: usize,
    pub subscriber_workers: usize,
    pub publisher_port_start: u16,
    pub publisher_port_end: u16,
    pub subscriber_port_start: u16,
    pub subscriber_port_end: u16,
}

/// Configuration settings for the broker.
///
/// `message_ttl_secs` is applied to published messages that carry no
/// expiry of their own.
#[derive(Debug, Deserialize, Clone)]
pub struct BrokerSettings {
    pub message_ttl_secs: u64,
    pub mailbox_capacity: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageSettings {
    pub path: String,
    pub seed_topics: Vec<String>,
}

/// Partial configuration settings loaded from files or environment.
///
/// Allows partial specification of settings. Missing values can be filled using defaults.
#[derive(Debug, Deserialize)]
pub struct PartialSettings {
    pub server: Option<PartialServerSettings>,
    pub pools: Option<PartialPoolSettings>,
    pub broker: Option<PartialBrokerSettings>,
    pub storage: Option<PartialStorageSettings>,
}

#[derive(Debug, Deserialize)]
pub struct PartialServerSettings {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub accept_timeout_secs: Option<u64>,
    pub shutdown_grace_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct PartialPoolSettings {
    pub publisher_workers: Option<usize>,
    pub subscriber_workers: Option<usize>,
    pub publisher_port_start: Option<u16>,
    pub publisher_port_end: Option<u16>,
    pub subscriber_port_start: Option<u16>,
    pub subscriber_port_end: Option<u16>,
}

#[derive(Debug, Deserialize)]
pub struct PartialBrokerSettings {
    pub message_ttl_secs: Option<u64>,
    pub mailbox_capacity: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct PartialStorageSettings {
    pub path: Option<String>,
    pub seed_topics: Option<Vec<String>>,
}

/// Provides default values for `Settings`.
///
/// Ensures the application has sensible defaults if no configuration is provided.
impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerSettings {
                host: "127.0.0.1".to_string(),
                port: 8080,
                accept_timeout_secs: 5,
                shutdown_grace_secs: 10,
            },
            pools: PoolSettings {
                publisher_workers: 2,
                subscriber_workers: 2,
                publisher_port_start: 5000,
                publisher_port_end: 6000,
                subscriber_port_start: 6000,
                subscriber_port_end: 7000,
            },
            broker: BrokerSettings {
                message_ttl_secs: 3600,
                mailbox_capacity: 1024,
            },
            storage: StorageSettings {
                path: "imq_db".to_string(),
                seed_topics: Vec::new(),
            },
        }
    }
}

impl PartialSettings {
    /// Fills every missing value from `default`.
    pub fn merge(self, default: Settings) -> Settings {
        let server = self.server;
        let pools = self.pools;
        let broker = self.broker;
        let storage = self.storage;

        Settings {
            server: ServerSettings {
                host: server
                    .as_ref()
                    .and_then(|s| s.host.clone())
                    .unwrap_or(default.server.host),
                port: server
                    .as_ref()
                    .and_then(|s| s.port)
                    .unwrap_or(default.server.port),
                accept_timeout_secs: server
                    .as_ref()
                    .and_then(|s| s.accept_timeout_secs)
                    .unwrap_or(default.server.accept_timeout_secs),
                shutdown_grace_secs: server
                    .as_ref()
                    .and_then(|s| s.shutdown_grace_secs)
                    .unwrap_or(default.server.shutdown_grace_secs),
            },
            pools: PoolSettings {
                publisher_workers: pools
                    .as_ref()
                    .and_then(|p| p.publisher_workers)
                    .unwrap_or(default.pools.publisher_workers),
                subscriber_workers: pools
                    .as_ref()
                    .and_then(|p| p.subscriber_workers)
                    .unwrap_or(default.pools.subscriber_workers),
                publisher_port_start: pools
                    .as_ref()
                    .and_then(|p| p.publisher_port_start)
                    .unwrap_or(default.pools.publisher_port_start),
                publisher_port_end: pools
                    .as_ref()
                    .and_then(|p| p.publisher_port_end)
                    .unwrap_or(default.pools.publisher_port_end),
                subscriber_port_start: pools
                    .as_ref()
                    .and_then(|p| p.subscriber_port_start)
                    .unwrap_or(default.pools.subscriber_port_start),
                subscriber_port_end: pools
                    .as_ref()
                    .and_then(|p| p.subscriber_port_end)
                    .unwrap_or(default.pools.subscriber_port_end),
            },
            broker: BrokerSettings {
                message_ttl_secs: broker
                    .as_ref()
                    .and_then(|b| b.message_ttl_secs)
                    .unwrap_or(default.broker.message_ttl_secs),
                mailbox_capacity: broker
                    .as_ref()
                    .and_then(|b| b.mailbox_capacity)
                    .unwrap_or(default.broker.mailbox_capacity),
            },
            storage: StorageSettings {
                path: storage
                    .as_ref()
                    .and_then(|s| s.path.clone())
                    .unwrap_or(default.storage.path),
                seed_topics: storage
                    .and_then(|s| s.seed_topics)
                    .unwrap_or(default.storage.seed_topics),
            },
        }
    }
}
