//! Body codecs, selected by the header's `contentType` tag.
//!
//! The envelope itself is always JSON; only the `body` string is encoded
//! with the negotiated codec. Decode failures are the client's fault
//! (`InvalidArgument`), encode failures are ours (`Internal`).

use std::str::FromStr;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::utils::{BrokerError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentType {
    Json,
    Xml,
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Json => "json",
            ContentType::Xml => "xml",
        }
    }

    pub fn encode<T: Serialize>(&self, value: &T) -> Result<String> {
        match self {
            ContentType::Json => serde_json::to_string(value)
                .map_err(|e| BrokerError::internal(format!("failed to encode json body: {e}"))),
            ContentType::Xml => quick_xml::se::to_string(value)
                .map_err(|e| BrokerError::internal(format!("failed to encode xml body: {e}"))),
        }
    }

    pub fn decode<T: DeserializeOwned>(&self, raw: &str) -> Result<T> {
        match self {
            ContentType::Json => serde_json::from_str(raw).map_err(|e| {
                BrokerError::invalid_argument(format!("failed to decode json body: {e}"))
            }),
            ContentType::Xml => quick_xml::de::from_str(raw).map_err(|e| {
                BrokerError::invalid_argument(format!("failed to decode xml body: {e}"))
            }),
        }
    }
}

impl FromStr for ContentType {
    type Err = BrokerError;

    fn from_str(tag: &str) -> Result<Self> {
        match tag {
            "json" => Ok(ContentType::Json),
            "xml" => Ok(ContentType::Xml),
            _ => Err(BrokerError::invalid_argument("unsupported content-type")),
        }
    }
}

impl std::fmt::Display for ContentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
