use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::TcpSocket;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tracing::debug;

use crate::transport::codec::ContentType;
use crate::transport::message::{Header, Request, Response, STATUS_CONNECTED};
use crate::utils::{BrokerError, Result};

/// Client end of a broker connection.
///
/// The broker derives the role from the client's source port, so callers
/// that want a role pick `local_port` from the matching range.
pub struct Connection {
    reader: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
    content_type: ContentType,
    local_addr: SocketAddr,
}

impl Connection {
    /// Connects and waits for the broker's acknowledgement frame.
    pub async fn dial(addr: SocketAddr, local_port: Option<u16>) -> Result<Self> {
        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        if let Some(port) = local_port {
            let unspecified = if addr.is_ipv4() {
                Ipv4Addr::UNSPECIFIED.into()
            } else {
                Ipv6Addr::UNSPECIFIED.into()
            };
            socket.set_reuseaddr(true)?;
            socket.bind(SocketAddr::new(unspecified, port))?;
        }

        let stream = socket.connect(addr).await?;
        let local_addr = stream.local_addr()?;
        let (read_half, writer) = stream.into_split();

        let mut conn = Self {
            reader: BufReader::new(read_half).lines(),
            writer,
            content_type: ContentType::Json,
            local_addr,
        };

        let ack = conn.read_response().await?;
        if ack.is_error() {
            return Err(BrokerError::from_wire(&ack.error));
        }
        let status = ack.body_str()?;
        if status != STATUS_CONNECTED {
            return Err(BrokerError::internal(format!(
                "unexpected acknowledgement: {status}"
            )));
        }

        debug!("connected to {addr} from {local_addr}");
        Ok(conn)
    }

    pub fn with_content_type(mut self, content_type: ContentType) -> Self {
        self.content_type = content_type;
        self
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Writes one raw frame and reads the reply.
    pub async fn send_frame(&mut self, frame: &str) -> Result<Response> {
        self.writer.write_all(frame.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await?;
        self.read_response().await
    }

    /// Sends `body` as-is under `method`, returning the raw response.
    pub async fn call(&mut self, method: &str, body: String) -> Result<Response> {
        let request = Request {
            header: Header {
                remote_addr: self.local_addr.to_string(),
                ..Header::new(self.content_type, method)
            },
            body,
        };
        let frame = serde_json::to_string(&request)?;
        self.send_frame(&frame).await
    }

    /// Typed request: encodes `req`, and decodes the reply or turns its
    /// error text back into a `BrokerError`.
    pub async fn request<Req, Resp>(&mut self, method: &str, req: &Req) -> Result<Resp>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        let body = self.content_type.encode(req)?;
        let response = self.call(method, body).await?;
        if response.is_error() {
            return Err(BrokerError::from_wire(&response.error));
        }
        self.content_type.decode(response.body_str()?)
    }

    async fn read_response(&mut self) -> Result<Response> {
        let line = self
            .reader
            .next_line()
            .await?
            .ok_or_else(|| BrokerError::internal("connection closed by broker"))?;
        Ok(serde_json::from_str(&line)?)
    }
}
