//! The `transport` module carries requests between clients and the broker.
//!
//! It defines the line-delimited wire protocol, the body codecs, the
//! request router that maps method tags onto topic operations, and the TCP
//! server that classifies connections and serves them from worker pools.

pub mod codec;
pub mod message;
pub mod router;
pub mod tcp;

pub use codec::ContentType;
pub use router::{Method, RequestRouter};
pub use tcp::{Server, ServerConfig};
