//! UDP request/response plumbing.
//!
//! Every call binds its own socket on an ephemeral port and drops it before
//! returning, on success, timeout and error paths alike. Concurrent calls
//! never share a socket.

use std::net::SocketAddr;
use std::sync::Arc;

use log::{debug, trace, warn};
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::codec::{self, Method};
use crate::config::{Config, EchoFilter};
use crate::errors::Error;
use crate::history::{Direction, MessageHistory};
use crate::runtime::{self, AsyncUdpSocket, Instant, Mutex, UdpSocket};

type Result<T> = std::result::Result<T, Error>;

const RECV_BUFFER: usize = 4096;

/// A decoded `result` and the address it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub result: Value,
    pub from: SocketAddr,
}

/// Sends requests and collects replies according to a [`Config`].
///
/// Cloning is cheap; clones share the configuration and the message history.
#[derive(Debug, Clone)]
pub struct Transport {
    config: Arc<Config>,
    history: Arc<Mutex<MessageHistory>>,
}

impl Transport {
    pub fn new(config: Config) -> Self {
        Transport {
            config: Arc::new(config),
            history: Arc::new(Mutex::new(MessageHistory::new())),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub async fn history(&self) -> MessageHistory {
        self.history.lock().await.clone()
    }

    pub async fn clear_history(&self) {
        self.history.lock().await.clear();
    }

    pub(crate) async fn record_error(&self, err: &Error) {
        self.history.lock().await.record_error(&err.to_string());
    }

    /// Send one request to `target` and wait for its reply.
    ///
    /// Returns `Ok(None)` when nothing arrives from `target` within the
    /// response timeout. Datagrams from other addresses are ignored.
    pub async fn request<P: Serialize>(
        &self,
        target: SocketAddr,
        method: Method,
        params: &P,
    ) -> Result<Option<Reply>> {
        let (request, logged) = prepare(method, params, None)?;
        let socket = self.bind().await?;
        self.send(&socket, method, &request, logged, target).await?;

        let start = Instant::now();
        let mut buffer = [0u8; RECV_BUFFER];

        loop {
            let Some(remaining) = self.config.response_timeout.checked_sub(start.elapsed()) else {
                break;
            };
            let (size, from) = match runtime::timeout(remaining, socket.recv_from(&mut buffer)).await {
                Ok(received) => received.map_err(|e| Error::socket("recv_from", e))?,
                Err(_) => break,
            };
            if from.ip() != target.ip() {
                debug!("ignoring datagram from {from} while waiting for {target}");
                continue;
            }
            let result = codec::decode(&buffer[..size])?;
            self.log_received(method, &result, from).await;
            return Ok(Some(Reply { result, from }));
        }

        debug!("no reply to {method} from {target} within {:?}", self.config.response_timeout);
        Ok(None)
    }

    /// Send one request to `target` and close the socket without waiting.
    pub async fn notify<P: Serialize>(&self, target: SocketAddr, method: Method, params: &P) -> Result<()> {
        let (request, logged) = prepare(method, params, None)?;
        let socket = self.bind().await?;
        self.send(&socket, method, &request, logged, target).await
    }

    /// Broadcast one request and collect every reply for the whole discovery window.
    ///
    /// The request's own echo is discarded according to [`Config::echo_filter`].
    /// Replies that fail to decode are logged and skipped.
    pub async fn broadcast<P: Serialize>(&self, method: Method, params: &P) -> Result<Vec<Reply>> {
        let id = Uuid::new_v4().to_string();
        let nonce = match self.config.echo_filter {
            EchoFilter::RequestId => Some(id.as_str()),
            EchoFilter::ByteLength => None,
        };
        let (request, logged) = prepare(method, params, nonce)?;

        let socket = self.bind().await?;
        socket
            .set_broadcast(true)
            .map_err(|e| Error::socket("set_broadcast", e))?;
        self.send(&socket, method, &request, logged, self.config.broadcast_target())
            .await?;

        let replies = self.collect(&socket, method, &request, &id).await;
        debug!("{method} broadcast collected {} replies", replies.len());
        Ok(replies)
    }

    /// Gather replies on `socket` until the discovery window closes.
    async fn collect<S: AsyncUdpSocket>(
        &self,
        socket: &S,
        method: Method,
        request: &[u8],
        id: &str,
    ) -> Vec<Reply> {
        let window = self.config.discovery_window;
        let start = Instant::now();
        let mut buffer = [0u8; RECV_BUFFER];
        let mut replies = Vec::new();

        while let Some(remaining) = window.checked_sub(start.elapsed()) {
            let (size, from) = match runtime::timeout(remaining, socket.recv_from(&mut buffer)).await {
                Ok(Ok(received)) => received,
                Ok(Err(e)) => {
                    warn!("receive failed during {method} broadcast: {e}");
                    continue;
                }
                Err(_) => break,
            };
            let datagram = &buffer[..size];
            if self.is_echo(datagram, request, id) {
                trace!("dropping echo of own {method} broadcast from {from}");
                continue;
            }
            match codec::decode(datagram) {
                Ok(result) => {
                    self.log_received(method, &result, from).await;
                    replies.push(Reply { result, from });
                }
                Err(e) => warn!("discarding reply from {from}: {e}"),
            }
        }
        replies
    }

    fn is_echo(&self, datagram: &[u8], request: &[u8], id: &str) -> bool {
        match self.config.echo_filter {
            EchoFilter::ByteLength => datagram.len() == request.len(),
            EchoFilter::RequestId => datagram == request || codec::is_request_echo(datagram, id),
        }
    }

    async fn bind(&self) -> Result<UdpSocket> {
        let socket = UdpSocket::bind(self.config.local_addr())
            .await
            .map_err(|e| Error::socket("bind", e))?;
        if let Ok(local) = socket.local_addr() {
            trace!("bound exchange socket {local}");
        }
        Ok(socket)
    }

    /// Send `request` and log `params` as sent once the datagram is out.
    async fn send(
        &self,
        socket: &UdpSocket,
        method: Method,
        request: &[u8],
        params: Value,
        target: SocketAddr,
    ) -> Result<()> {
        socket
            .send_to(request, target)
            .await
            .map_err(|e| Error::socket("send_to", e))?;
        trace!("sent {} bytes to {target}", request.len());
        self.history
            .lock()
            .await
            .record(Direction::Sent, method, params);
        Ok(())
    }

    async fn log_received(&self, method: Method, result: &Value, from: SocketAddr) {
        trace!("{method} reply from {from}: {result}");
        self.history
            .lock()
            .await
            .record(Direction::Received, method, result.clone());
    }
}

/// Encode a request, also returning its params for the history.
fn prepare<P: Serialize>(method: Method, params: &P, id: Option<&str>) -> Result<(Vec<u8>, Value)> {
    let params = serde_json::to_value(params).map_err(Error::JsonDump)?;
    let request = match id {
        Some(id) => codec::encode_with_id(method, &params, id)?,
        None => codec::encode(method, &params)?,
    };
    Ok((request, params))
}
