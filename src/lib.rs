//! # imq
//!
//! `imq` is a small topic-based message broker. Publishers and subscribers
//! speak a line-delimited JSON protocol over TCP, and the role of each
//! connection is decided by the port it connects from. Messages carry an
//! expiry time; expired messages are moved to a per-topic dead list instead
//! of being delivered.
//!
//! ## Core Modules
//!
//! - `broker`: the queue engine that owns all per-topic queues, and the
//!   topic registry that enforces publisher and subscriber bindings.
//! - `client`: connection roles and a small line-protocol client.
//! - `config`: layered configuration loading and validation.
//! - `persistence`: the `Storage` trait and its `sled` implementation.
//! - `transport`: wire types, body codecs, the request router and the TCP
//!   server with its worker pools.
//! - `utils`: the error taxonomy and logging setup.

pub mod broker;
pub mod client;
pub mod config;
pub mod persistence;
pub mod transport;
pub mod utils;

#[cfg(test)]
mod tests;
