//! Wire types.
//!
//! Every frame is one JSON object on one line. A request carries a header
//! and a `body` string holding one of the records below, encoded with the
//! header's content type. A response carries either a non-empty `error` or
//! a `body` encoded the same way as the request, sent as base64 bytes.

use serde::{Deserialize, Serialize};

use crate::broker::Message;
use crate::transport::codec::ContentType;
use crate::utils::{BrokerError, Result};

pub const PROTOCOL_VERSION: &str = "1.0";

pub const STATUS_CONNECTED: &str = "connected";
pub const STATUS_DISCONNECTED: &str = "disconnected";
pub const STATUS_SUCCESSFUL: &str = "successful";
pub const STATUS_SUBSCRIBED: &str = "subscribed";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Header {
    pub version: String,
    #[serde(default)]
    pub remote_addr: String,
    pub content_type: String,
    pub method: String,
}

impl Header {
    pub fn new(content_type: ContentType, method: &str) -> Self {
        Self {
            version: PROTOCOL_VERSION.to_string(),
            remote_addr: String::new(),
            content_type: content_type.as_str().to_string(),
            method: method.to_string(),
        }
    }

    /// Checks the version and returns the negotiated content type.
    pub fn validate(&self) -> Result<ContentType> {
        if self.version != PROTOCOL_VERSION {
            return Err(BrokerError::invalid_argument("invalid header version"));
        }
        self.content_type.parse()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    pub header: Header,
    #[serde(default)]
    pub body: String,
}

/// `body` is raw bytes and travels base64-encoded inside the JSON frame.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    #[serde(default)]
    pub error: String,
    #[serde(default, with = "base64_body")]
    pub body: Vec<u8>,
}

impl Response {
    pub fn ok(body: Vec<u8>) -> Self {
        Self {
            error: String::new(),
            body,
        }
    }

    pub fn error(err: &BrokerError) -> Self {
        Self {
            error: err.to_string(),
            body: Vec::new(),
        }
    }

    /// The acknowledgement written when a worker picks up a connection.
    pub fn connected() -> Self {
        Self::ok(STATUS_CONNECTED.as_bytes().to_vec())
    }

    pub fn is_error(&self) -> bool {
        !self.error.is_empty()
    }

    /// The body as text, for handing to a codec.
    pub fn body_str(&self) -> Result<&str> {
        std::str::from_utf8(&self.body)
            .map_err(|e| BrokerError::internal(format!("response body is not utf-8: {e}")))
    }
}

/// A missing or `null` body reads as empty.
mod base64_body {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(body: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(body))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        match Option::<String>::deserialize(deserializer)? {
            Some(raw) => STANDARD
                .decode(raw.as_bytes())
                .map_err(serde::de::Error::custom),
            None => Ok(Vec::new()),
        }
    }
}

/// A message as it appears on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageBody {
    pub data: String,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub expires_at: String,
}

impl From<Message> for MessageBody {
    fn from(msg: Message) -> Self {
        Self {
            data: msg.payload,
            created_at: msg.created_at,
            expires_at: msg.expires_at,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShowTopicRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publisher_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscriber_id: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShowTopicResponse {
    #[serde(default)]
    pub topics: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectToTopicRequest {
    pub publisher_id: i64,
    pub topic_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisconnectFromTopicRequest {
    pub publisher_id: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishMessageRequest {
    pub publisher_id: i64,
    pub message: MessageBody,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishMessageResponse {
    pub status: String,
    #[serde(default)]
    pub message_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckMessageStatusRequest {
    pub publisher_id: i64,
    pub message: MessageBody,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeToTopicRequest {
    pub subscriber_id: i64,
    pub topic_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnsubscribeFromTopicRequest {
    pub subscriber_id: i64,
    pub topic_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetSubscribedTopicsRequest {
    pub subscriber_id: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetSubscribedTopicsResponse {
    #[serde(default)]
    pub topics: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetMessageFromTopicRequest {
    pub subscriber_id: i64,
    pub topic_name: String,
}

/// `message` is absent when the topic had nothing deliverable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetMessageFromTopicResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<MessageBody>,
}

/// Shared shape of the responses that only report a status word.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: String,
}

impl StatusResponse {
    pub fn new(status: &str) -> Self {
        Self {
            status: status.to_string(),
        }
    }
}

pub type ConnectToTopicResponse = StatusResponse;
pub type DisconnectFromTopicResponse = StatusResponse;
pub type SubscribeToTopicResponse = StatusResponse;
pub type UnsubscribeFromTopicResponse = StatusResponse;
