//! The `client` module covers both ends of a broker connection.
//!
//! `session` is the server-side view: the role a connection was classified
//! into from its remote port, fixed for the connection's lifetime.
//! `connection` is a small line-protocol client used by the `imq client`
//! smoke command and by the end-to-end tests.

pub mod connection;
pub mod session;

pub use connection::Connection;
pub use session::{ClientSession, Role, RoleRanges};

#[cfg(test)]
mod tests;
