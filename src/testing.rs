//! Scripted stand-in for a bulb, used by the socket tests.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{Value, json};
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;

use crate::config::Config;

/// Short windows so the socket tests stay fast.
pub(crate) fn test_config(port: u16) -> Config {
    Config::new()
        .with_port(port)
        .with_bind_addr(Ipv4Addr::LOCALHOST.into())
        .with_broadcast_addr(Ipv4Addr::LOCALHOST)
        .with_response_timeout(Duration::from_millis(200))
        .with_discovery_window(Duration::from_millis(300))
        .with_retry_delay(Duration::from_millis(10))
}

type Responder = Box<dyn FnMut(&Value) -> Vec<Vec<u8>> + Send>;

/// A UDP socket on 127.0.0.1 that records every request and answers with
/// whatever its responder returns.
pub(crate) struct FakeBulb {
    addr: SocketAddr,
    requests: Arc<Mutex<Vec<Value>>>,
    responder: Arc<Mutex<Responder>>,
    task: JoinHandle<()>,
}

impl FakeBulb {
    pub(crate) async fn spawn<F>(responder: F) -> Self
    where
        F: FnMut(&Value) -> Vec<Vec<u8>> + Send + 'static,
    {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let responder: Arc<Mutex<Responder>> = Arc::new(Mutex::new(Box::new(responder)));

        let task = tokio::spawn({
            let requests = Arc::clone(&requests);
            let responder = Arc::clone(&responder);
            async move {
                let mut buffer = [0u8; 4096];
                while let Ok((size, from)) = socket.recv_from(&mut buffer).await {
                    let request: Value =
                        serde_json::from_slice(&buffer[..size]).unwrap_or(Value::Null);
                    requests.lock().unwrap().push(request.clone());
                    let replies = (responder.lock().unwrap())(&request);
                    for reply in replies {
                        let _ = socket.send_to(&reply, from).await;
                    }
                }
            }
        });

        FakeBulb {
            addr,
            requests,
            responder,
            task,
        }
    }

    /// Records requests and never answers.
    pub(crate) async fn silent() -> Self {
        Self::spawn(|_| Vec::new()).await
    }

    /// Answers `getPilot` with its current state and applies `setPilot`
    /// params, acknowledging with `success`.
    pub(crate) async fn with_state(state: Value) -> Self {
        let state = Arc::new(Mutex::new(state));
        Self::spawn(move |request| {
            let mut state = state.lock().unwrap();
            let reply = match request["method"].as_str() {
                Some("getPilot") => json!({"method": "getPilot", "env": "pro", "result": *state}),
                Some("setPilot") => {
                    *state = request["params"].clone();
                    json!({"method": "setPilot", "env": "pro", "result": {"success": true}})
                }
                _ => json!({"method": request["method"], "result": {"mac": "a8bb50aa0000"}}),
            };
            vec![serde_json::to_vec(&reply).unwrap()]
        })
        .await
    }

    /// Swap the responder for requests that arrive from now on.
    pub(crate) fn respond_with<F>(&self, responder: F)
    where
        F: FnMut(&Value) -> Vec<Vec<u8>> + Send + 'static,
    {
        *self.responder.lock().unwrap() = Box::new(responder);
    }

    pub(crate) fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub(crate) fn port(&self) -> u16 {
        self.addr.port()
    }

    pub(crate) fn requests(&self) -> Vec<Value> {
        self.requests.lock().unwrap().clone()
    }

    pub(crate) fn methods(&self) -> Vec<String> {
        self.requests()
            .iter()
            .filter_map(|r| r["method"].as_str().map(String::from))
            .collect()
    }

    /// Wait (up to a second) until at least `count` requests arrived.
    pub(crate) async fn wait_for_requests(&self, count: usize) {
        for _ in 0..100 {
            if self.requests.lock().unwrap().len() >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("expected {count} requests, got {:?}", self.requests());
    }
}

impl Drop for FakeBulb {
    fn drop(&mut self) {
        self.task.abort();
    }
}
