//! Request router
//!
//! Parses a request frame, validates its header, decodes the body with the
//! negotiated codec and hands it to the matching [`TopicService`] call. The
//! result is encoded back with the same codec. Every outcome, success or
//! failure, becomes a [`Response`]; the router never fails a connection.

use std::future::Future;
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::broker::{MessageDraft, TopicService};
use crate::client::Role;
use crate::transport::codec::ContentType;
use crate::transport::message::*;
use crate::utils::{BrokerError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    ShowTopic,
    ConnectToTopic,
    DisconnectFromTopic,
    PublishMessage,
    CheckMessageStatus,
    SubscribeToTopic,
    UnsubscribeFromTopic,
    GetSubscribedTopics,
    GetMessageFromTopic,
}

/// Wire tag, bare alias, method.
const METHODS: &[(&str, &str, Method)] = &[
    ("showTopicRequest", "showTopic", Method::ShowTopic),
    ("connectToTopicRequest", "connectToTopic", Method::ConnectToTopic),
    ("disconnectFromTopicRequest", "disconnectFromTopic", Method::DisconnectFromTopic),
    ("publishMessageRequest", "publishMessage", Method::PublishMessage),
    ("checkMessageStatusRequest", "checkMessageStatus", Method::CheckMessageStatus),
    ("subscribeToTopicRequest", "subscribeToTopic", Method::SubscribeToTopic),
    ("unsubscribeFromTopicRequest", "unsubscribeFromTopic", Method::UnsubscribeFromTopic),
    ("getSubscribedTopicsRequest", "getSubscribedTopics", Method::GetSubscribedTopics),
    ("getMessageFromTopicRequest", "getMessageFromTopic", Method::GetMessageFromTopic),
];

impl Method {
    pub fn from_tag(tag: &str) -> Option<Self> {
        METHODS
            .iter()
            .find(|(wire, bare, _)| *wire == tag || *bare == tag)
            .map(|(_, _, method)| *method)
    }

    pub fn tag(&self) -> &'static str {
        METHODS
            .iter()
            .find(|(_, _, method)| method == self)
            .map(|(wire, _, _)| *wire)
            .unwrap_or("unknown")
    }

    /// `showTopicRequest` is open to both roles.
    pub fn allowed_for(&self, role: Role) -> bool {
        match self {
            Method::ShowTopic => true,
            Method::ConnectToTopic
            | Method::DisconnectFromTopic
            | Method::PublishMessage
            | Method::CheckMessageStatus => role == Role::Publisher,
            Method::SubscribeToTopic
            | Method::UnsubscribeFromTopic
            | Method::GetSubscribedTopics
            | Method::GetMessageFromTopic => role == Role::Subscriber,
        }
    }
}

pub struct RequestRouter {
    service: Arc<dyn TopicService>,
}

impl RequestRouter {
    pub fn new(service: Arc<dyn TopicService>) -> Self {
        Self { service }
    }

    /// Routes one raw frame. `role` is `None` only for callers outside a
    /// classified session, in which case no role check is made.
    pub async fn route(&self, role: Option<Role>, frame: &str) -> Response {
        match self.dispatch(role, frame).await {
            Ok(body) => Response::ok(body.into_bytes()),
            Err(err) => {
                debug!("request failed: {err}");
                Response::error(&err)
            }
        }
    }

    async fn dispatch(&self, role: Option<Role>, frame: &str) -> Result<String> {
        let request: Request = serde_json::from_str(frame)
            .map_err(|e| BrokerError::invalid_argument(format!("malformed request: {e}")))?;
        let codec = request.header.validate()?;

        let method = Method::from_tag(&request.header.method).ok_or_else(|| {
            BrokerError::Unimplemented(format!("unknown method '{}'", request.header.method))
        })?;

        if let Some(role) = role {
            if !method.allowed_for(role) {
                return Err(BrokerError::failed_precondition(format!(
                    "{} is not available to a {role}",
                    method.tag()
                )));
            }
        }

        debug!(method = method.tag(), content_type = %codec, "dispatching request");
        let body = request.body.as_str();
        let service = self.service.as_ref();

        match method {
            Method::ShowTopic => {
                handle(codec, body, |_: ShowTopicRequest| async move {
                    service
                        .list_topics()
                        .await
                        .map(|topics| ShowTopicResponse { topics })
                })
                .await
            }
            Method::ConnectToTopic => {
                handle(codec, body, |req: ConnectToTopicRequest| async move {
                    service
                        .register_publisher(req.publisher_id, &req.topic_name)
                        .await
                        .map(|()| ConnectToTopicResponse::new(STATUS_CONNECTED))
                })
                .await
            }
            Method::DisconnectFromTopic => {
                handle(codec, body, |req: DisconnectFromTopicRequest| async move {
                    service
                        .deregister_publisher(req.publisher_id)
                        .await
                        .map(|()| DisconnectFromTopicResponse::new(STATUS_DISCONNECTED))
                })
                .await
            }
            Method::PublishMessage => {
                handle(codec, body, |req: PublishMessageRequest| async move {
                    let draft = MessageDraft {
                        data: req.message.data,
                        created_at: Some(req.message.created_at),
                        expires_at: Some(req.message.expires_at),
                    };
                    service
                        .publish_message(req.publisher_id, draft)
                        .await
                        .map(|message_id| PublishMessageResponse {
                            status: STATUS_SUCCESSFUL.to_string(),
                            message_id,
                        })
                })
                .await
            }
            Method::CheckMessageStatus => {
                handle(codec, body, |_: CheckMessageStatusRequest| async {
                    Err::<StatusResponse, _>(BrokerError::Unimplemented(
                        "checkMessageStatusRequest is not supported".to_string(),
                    ))
                })
                .await
            }
            Method::SubscribeToTopic => {
                handle(codec, body, |req: SubscribeToTopicRequest| async move {
                    service
                        .register_subscriber(req.subscriber_id, &req.topic_name)
                        .await
                        .map(|()| SubscribeToTopicResponse::new(STATUS_SUBSCRIBED))
                })
                .await
            }
            Method::UnsubscribeFromTopic => {
                handle(codec, body, |req: UnsubscribeFromTopicRequest| async move {
                    service
                        .deregister_subscriber(req.subscriber_id, &req.topic_name)
                        .await
                        .map(|()| UnsubscribeFromTopicResponse::new(STATUS_SUCCESSFUL))
                })
                .await
            }
            Method::GetSubscribedTopics => {
                handle(codec, body, |req: GetSubscribedTopicsRequest| async move {
                    service
                        .list_subscriptions(req.subscriber_id)
                        .await
                        .map(|topics| GetSubscribedTopicsResponse { topics })
                })
                .await
            }
            Method::GetMessageFromTopic => {
                handle(codec, body, |req: GetMessageFromTopicRequest| async move {
                    service
                        .read_message(req.subscriber_id, &req.topic_name)
                        .await
                        .map(|message| GetMessageFromTopicResponse {
                            message: message.map(MessageBody::from),
                        })
                })
                .await
            }
        }
    }
}

/// Decode, call, encode. Decode errors never reach `call`.
async fn handle<Req, Resp, F, Fut>(codec: ContentType, body: &str, call: F) -> Result<String>
where
    Req: DeserializeOwned,
    Resp: Serialize,
    F: FnOnce(Req) -> Fut,
    Fut: Future<Output = Result<Resp>>,
{
    let request: Req = codec.decode(body)?;
    let response = call(request).await?;
    codec.encode(&response)
}
