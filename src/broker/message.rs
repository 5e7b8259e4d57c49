//! Message definitions for the broker
//!
//! `Message` is the internal representation of a published message, as held
//! by the queue engine and written to storage.
//!
//! Notes on fields:
//! - `message_id`: opaque id assigned by the registry on publish
//! - `payload`: the publisher's data, passed through untouched
//! - `created_at` / `expires_at`: UTC wall-clock strings in
//!   [`TIMESTAMP_FORMAT`]; a message whose `expires_at` is at or before the
//!   current time is expired

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::utils::{BrokerError, Result};

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub message_id: String,
    pub payload: String,
    pub created_at: String,
    pub expires_at: String,
}

impl Message {
    /// True when `expires_at` is at or before `now`.
    ///
    /// An unparseable expiry counts as expired so the message is dead-lettered
    /// instead of being served forever.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        match parse_timestamp(&self.expires_at) {
            Ok(expires_at) => expires_at <= now,
            Err(_) => true,
        }
    }
}

pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.format(TIMESTAMP_FORMAT).to_string()
}

pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(raw.trim(), TIMESTAMP_FORMAT)
        .map(|naive| naive.and_utc())
        .map_err(|e| BrokerError::invalid_argument(format!("bad timestamp '{raw}': {e}")))
}
