//! TCP listener, role classification and the two worker pools.
//!
//! One accept task classifies each connection by its remote port and pushes
//! it onto the publisher or subscriber work queue. A fixed number of workers
//! per pool pull sessions off their queue and serve them one frame at a
//! time. A connection for a busy pool is handed off to its own task so the
//! accept loop keeps serving the other pool. Shutdown stops the accept task
//! and any pending hand-offs, which closes both queues, and asks workers to
//! stop after the frame they are handling.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, timeout, timeout_at};
use tracing::{debug, info, warn};

use crate::client::{ClientSession, Role, RoleRanges};
use crate::config::Settings;
use crate::transport::message::Response;
use crate::transport::router::RequestRouter;
use crate::utils::{BrokerError, Result};

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub accept_timeout: Duration,
    pub publisher_workers: usize,
    pub subscriber_workers: usize,
    pub ranges: RoleRanges,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            accept_timeout: Duration::from_secs(5),
            publisher_workers: 2,
            subscriber_workers: 2,
            ranges: RoleRanges::default(),
        }
    }
}

impl From<&Settings> for ServerConfig {
    fn from(settings: &Settings) -> Self {
        Self {
            accept_timeout: Duration::from_secs(settings.server.accept_timeout_secs),
            publisher_workers: settings.pools.publisher_workers,
            subscriber_workers: settings.pools.subscriber_workers,
            ranges: RoleRanges::from(&settings.pools),
        }
    }
}

type WorkQueue = Arc<Mutex<mpsc::Receiver<ClientSession>>>;

/// A running listener and its worker pools.
pub struct Server {
    local_addr: SocketAddr,
    shutdown_tx: watch::Sender<bool>,
    accept_task: JoinHandle<()>,
    workers: Vec<JoinHandle<()>>,
}

impl Server {
    pub async fn bind(addr: &str, config: ServerConfig, router: Arc<RequestRouter>) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        let (shutdown_tx, _) = watch::channel(false);

        let (publisher_tx, publisher_rx) = mpsc::channel(config.publisher_workers.max(1));
        let (subscriber_tx, subscriber_rx) = mpsc::channel(config.subscriber_workers.max(1));

        let mut workers = Vec::with_capacity(config.publisher_workers + config.subscriber_workers);
        let pools = [
            (Role::Publisher, config.publisher_workers, publisher_rx),
            (Role::Subscriber, config.subscriber_workers, subscriber_rx),
        ];
        for (role, size, rx) in pools {
            let queue: WorkQueue = Arc::new(Mutex::new(rx));
            for worker_id in 0..size {
                workers.push(tokio::spawn(run_worker(
                    worker_id,
                    role,
                    queue.clone(),
                    router.clone(),
                    shutdown_tx.subscribe(),
                )));
            }
        }

        let accept_task = tokio::spawn(accept_loop(
            listener,
            config,
            publisher_tx,
            subscriber_tx,
            shutdown_tx.subscribe(),
        ));

        info!("broker listening on {local_addr}");
        Ok(Self {
            local_addr,
            shutdown_tx,
            accept_task,
            workers,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stops accepting and waits for every worker to finish, bounded by
    /// `deadline`.
    pub async fn shutdown(self, deadline: Instant) -> Result<()> {
        info!("shutting down listener on {}", self.local_addr);
        // Fails only when every task already exited.
        let _ = self.shutdown_tx.send(true);

        let accept_task = self.accept_task;
        let workers = self.workers;
        let drain = async move {
            if let Err(err) = accept_task.await {
                warn!("accept task ended abnormally: {err}");
            }
            for result in join_all(workers).await {
                if let Err(err) = result {
                    warn!("worker ended abnormally: {err}");
                }
            }
        };

        timeout_at(deadline, drain).await.map_err(|_| {
            BrokerError::DeadlineExceeded("workers did not drain before the deadline".to_string())
        })?;

        info!("listener stopped");
        Ok(())
    }
}

async fn accept_loop(
    listener: TcpListener,
    config: ServerConfig,
    publisher_tx: mpsc::Sender<ClientSession>,
    subscriber_tx: mpsc::Sender<ClientSession>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        if *shutdown.borrow_and_update() {
            break;
        }

        let accepted = tokio::select! {
            _ = shutdown.changed() => break,
            accepted = timeout(config.accept_timeout, listener.accept()) => accepted,
        };

        let (stream, peer) = match accepted {
            Err(_) => continue,
            Ok(Err(err)) => {
                warn!("accept failed: {err}");
                continue;
            }
            Ok(Ok(pair)) => pair,
        };

        let Some(role) = config.ranges.classify(peer.port()) else {
            reject(stream, peer).await;
            continue;
        };

        debug!(client_id = peer.port(), "accepted {role} connection from {peer}");
        let queue = match role {
            Role::Publisher => &publisher_tx,
            Role::Subscriber => &subscriber_tx,
        };

        match queue.try_send(ClientSession::new(stream, peer, role)) {
            Ok(()) => {}
            Err(TrySendError::Full(session)) => {
                debug!(client_id = peer.port(), "{role} pool is busy, queueing connection");
                tokio::spawn(hand_off(queue.clone(), session, shutdown.clone()));
            }
            Err(TrySendError::Closed(_)) => {
                warn!("{role} pool is gone, stopping accept loop");
                break;
            }
        }
    }

    info!("accept loop stopped");
}

/// Waits for room in a busy pool's queue without holding up the accept loop.
async fn hand_off(
    queue: mpsc::Sender<ClientSession>,
    session: ClientSession,
    mut shutdown: watch::Receiver<bool>,
) {
    let peer = session.peer;
    tokio::select! {
        _ = shutdown.changed() => debug!("dropping queued connection from {peer} on shutdown"),
        sent = queue.send(session) => {
            if sent.is_err() {
                debug!("pool closed before connection from {peer} was picked up");
            }
        }
    }
}

async fn reject(mut stream: TcpStream, peer: SocketAddr) {
    warn!("rejecting connection from unrecognised port {}", peer.port());
    if let Err(err) = write_frame(&mut stream, &Response::error(&BrokerError::Unauthorized)).await {
        debug!("failed to notify {peer} of rejection: {err}");
    }
    let _ = stream.shutdown().await;
}

async fn run_worker(
    worker_id: usize,
    role: Role,
    queue: WorkQueue,
    router: Arc<RequestRouter>,
    mut shutdown: watch::Receiver<bool>,
) {
    debug!(worker_id, "{role} worker started");
    loop {
        let session = {
            let mut rx = queue.lock().await;
            rx.recv().await
        };
        let Some(session) = session else {
            break;
        };

        let peer = session.peer;
        let client_id = session.client_id;
        match serve(session, &router, &mut shutdown).await {
            Ok(()) => debug!(worker_id, client_id, "connection from {peer} closed"),
            Err(err) => warn!(worker_id, client_id, "connection from {peer} failed: {err}"),
        }
    }
    debug!(worker_id, "{role} worker stopped");
}

/// Serves one session until EOF, a transport error or shutdown.
async fn serve(
    session: ClientSession,
    router: &RequestRouter,
    shutdown: &mut watch::Receiver<bool>,
) -> Result<()> {
    let ClientSession {
        stream,
        role,
        client_id,
        ..
    } = session;
    let (read_half, mut writer) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();

    write_frame(&mut writer, &Response::connected()).await?;

    loop {
        if *shutdown.borrow_and_update() {
            break;
        }

        let line = tokio::select! {
            _ = shutdown.changed() => break,
            line = lines.next_line() => line?,
        };
        let Some(line) = line else {
            break;
        };
        if line.trim().is_empty() {
            continue;
        }

        debug!(client_id, "received frame");
        let response = router.route(Some(role), &line).await;
        write_frame(&mut writer, &response).await?;
    }

    Ok(())
}

async fn write_frame<W>(writer: &mut W, response: &Response) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut frame = serde_json::to_string(response)?;
    frame.push('\n');
    writer.write_all(frame.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}
