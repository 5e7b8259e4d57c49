use std::net::SocketAddr;
use std::ops::Range;

use tokio::net::TcpStream;

use crate::config::PoolSettings;

/// Which side of the broker a connection speaks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Publisher,
    Subscriber,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Publisher => f.write_str("publisher"),
            Role::Subscriber => f.write_str("subscriber"),
        }
    }
}

/// Remote port ranges that select a role. Both are half-open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleRanges {
    pub publisher: Range<u16>,
    pub subscriber: Range<u16>,
}

impl RoleRanges {
    /// Maps a remote port to a role; `None` means the client is not
    /// authorised to talk to the broker.
    pub fn classify(&self, port: u16) -> Option<Role> {
        if self.publisher.contains(&port) {
            Some(Role::Publisher)
        } else if self.subscriber.contains(&port) {
            Some(Role::Subscriber)
        } else {
            None
        }
    }
}

impl Default for RoleRanges {
    fn default() -> Self {
        Self {
            publisher: 5000..6000,
            subscriber: 6000..7000,
        }
    }
}

impl From<&PoolSettings> for RoleRanges {
    fn from(pools: &PoolSettings) -> Self {
        Self {
            publisher: pools.publisher_port_start..pools.publisher_port_end,
            subscriber: pools.subscriber_port_start..pools.subscriber_port_end,
        }
    }
}

/// An accepted connection after classification.
#[derive(Debug)]
pub struct ClientSession {
    pub stream: TcpStream,
    pub peer: SocketAddr,
    pub role: Role,
    /// The client's remote port, which is also its identity.
    pub client_id: u16,
}

impl ClientSession {
    pub fn new(stream: TcpStream, peer: SocketAddr, role: Role) -> Self {
        Self {
            stream,
            peer,
            role,
            client_id: peer.port(),
        }
    }
}
