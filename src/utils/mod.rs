//! The `utils` module provides shared definitions used across the `imq`
//! broker: the error taxonomy reported to clients and the logging setup.

pub mod error;
pub mod logging;

pub use error::{BrokerError, Result};
