//! Ordered delivery of mirror snapshots to a device.
//!
//! Each synchronizer owns one worker task fed by a bounded queue. The worker
//! pushes snapshots one at a time, in the order they were queued, retrying
//! unacknowledged pushes according to [`Config`](crate::Config).

use std::net::{IpAddr, SocketAddr};

use futures::channel::{mpsc, oneshot};
use futures::{SinkExt, StreamExt};
use log::{debug, warn};
use serde::Deserialize;

use crate::codec::Method;
use crate::config::PushMode;
use crate::errors::Error;
use crate::runtime::{self, TaskHandle};
use crate::state::DeviceState;
use crate::transport::Transport;

type Result<T> = std::result::Result<T, Error>;

/// Completion signal for one queued push.
///
/// Await [`PushHandle::wait`] to learn whether the device took the update, or
/// drop the handle to let the push finish in the background.
#[derive(Debug)]
#[must_use = "dropping the handle detaches the push; call `wait` to observe the result"]
pub struct PushHandle {
    ip: IpAddr,
    done: oneshot::Receiver<Result<()>>,
}

impl PushHandle {
    /// Wait until the worker has delivered (or given up on) this push.
    pub async fn wait(self) -> Result<()> {
        self.done.await.map_err(|_| Error::WorkerGone(self.ip))?
    }
}

enum PushJob {
    Push {
        state: DeviceState,
        done: oneshot::Sender<Result<()>>,
    },
    /// Signals once every job queued before it has finished.
    Flush(oneshot::Sender<()>),
}

/// Sending side of a device's push queue.
#[derive(Debug)]
pub(crate) struct Pusher {
    target: SocketAddr,
    jobs: mpsc::Sender<PushJob>,
}

impl std::fmt::Debug for PushJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PushJob::Push { state, .. } => f.debug_struct("Push").field("state", state).finish(),
            PushJob::Flush(_) => f.write_str("Flush"),
        }
    }
}

impl Pusher {
    /// Start the worker for `target`.
    pub(crate) fn spawn(transport: Transport, target: SocketAddr) -> Self {
        let (jobs, queue) = mpsc::channel(transport.config().push_queue);
        runtime::spawn(run(transport, target, queue)).detach();
        Pusher { target, jobs }
    }

    /// Queue a snapshot. Waits while the queue is full.
    pub(crate) async fn enqueue(&mut self, state: DeviceState) -> Result<PushHandle> {
        let (done, signal) = oneshot::channel();
        self.jobs
            .send(PushJob::Push { state, done })
            .await
            .map_err(|_| Error::WorkerGone(self.target.ip()))?;
        Ok(PushHandle {
            ip: self.target.ip(),
            done: signal,
        })
    }

    /// Wait until every snapshot queued so far has been delivered or given up on.
    pub(crate) async fn flush(&mut self) -> Result<()> {
        let (done, signal) = oneshot::channel();
        self.jobs
            .send(PushJob::Flush(done))
            .await
            .map_err(|_| Error::WorkerGone(self.target.ip()))?;
        signal.await.map_err(|_| Error::WorkerGone(self.target.ip()))
    }
}

async fn run(transport: Transport, target: SocketAddr, mut queue: mpsc::Receiver<PushJob>) {
    while let Some(job) = queue.next().await {
        match job {
            PushJob::Push { state, done } => {
                let result = push(&transport, target, &state).await;
                if let Err(e) = &result {
                    transport.record_error(e).await;
                }
                // The caller may have dropped its handle.
                let _ = done.send(result);
            }
            PushJob::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
    debug!("push worker for {target} stopped");
}

/// `setPilot` acknowledgement.
#[derive(Debug, Deserialize)]
struct Ack {
    success: bool,
}

async fn push(transport: &Transport, target: SocketAddr, state: &DeviceState) -> Result<()> {
    let config = transport.config();
    if config.push_mode == PushMode::FireAndForget {
        return transport.notify(target, Method::SetPilot, state).await;
    }

    let attempts = config.push_attempts.max(1);
    let mut attempt = 1;
    loop {
        let err = match push_once(transport, target, state).await {
            Ok(()) => return Ok(()),
            // A garbled acknowledgement is not retried.
            Err(e @ Error::MalformedResponse(_)) => return Err(e),
            Err(e) => e,
        };
        warn!("push {attempt}/{attempts} to {target} failed: {err}");
        if attempt >= attempts {
            return Err(Error::PushFailed {
                ip: target.ip(),
                attempts,
                source: Box::new(err),
            });
        }
        attempt += 1;
        runtime::sleep(config.retry_delay).await;
    }
}

async fn push_once(transport: &Transport, target: SocketAddr, state: &DeviceState) -> Result<()> {
    let reply = transport
        .request(target, Method::SetPilot, state)
        .await?
        .ok_or(Error::NoDeviceResponse { ip: target.ip() })?;
    let ack: Ack = serde_json::from_value(reply.result).map_err(Error::malformed)?;
    if ack.success {
        Ok(())
    } else {
        Err(Error::RemoteRejected { ip: target.ip() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeBulb, test_config};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn dimmed(level: u8) -> DeviceState {
        DeviceState {
            on: true,
            dimming: Some(level),
            ..DeviceState::default()
        }
    }

    #[tokio::test]
    async fn test_acknowledged_push() {
        let bulb = FakeBulb::with_state(serde_json::json!({"state": false})).await;
        let mut pusher = Pusher::spawn(Transport::new(test_config(bulb.port())), bulb.addr());

        pusher.enqueue(dimmed(40)).await.unwrap().wait().await.unwrap();

        assert_eq!(bulb.methods(), vec!["setPilot"]);
        assert_eq!(
            bulb.requests()[0]["params"],
            serde_json::json!({"state": true, "dimming": 40})
        );
    }

    #[tokio::test]
    async fn test_pushes_arrive_in_queue_order() {
        let bulb = FakeBulb::with_state(serde_json::json!({})).await;
        let mut pusher = Pusher::spawn(Transport::new(test_config(bulb.port())), bulb.addr());

        let mut handles = Vec::new();
        for level in [10, 20, 30] {
            handles.push(pusher.enqueue(dimmed(level)).await.unwrap());
        }
        for handle in handles {
            handle.wait().await.unwrap();
        }

        let levels: Vec<_> = bulb
            .requests()
            .iter()
            .map(|r| r["params"]["dimming"].as_u64().unwrap())
            .collect();
        assert_eq!(levels, vec![10, 20, 30]);
    }

    #[tokio::test]
    async fn test_rejected_push_retries_then_fails() {
        let bulb = FakeBulb::spawn(|_| vec![br#"{"result":{"success":false}}"#.to_vec()]).await;
        let config = test_config(bulb.port()).with_push_attempts(3);
        let mut pusher = Pusher::spawn(Transport::new(config), bulb.addr());

        let err = pusher.enqueue(dimmed(50)).await.unwrap().wait().await.unwrap_err();

        match err {
            Error::PushFailed { attempts, source, .. } => {
                assert_eq!(attempts, 3);
                assert!(matches!(*source, Error::RemoteRejected { .. }));
            }
            other => panic!("unexpected error {other}"),
        }
        assert_eq!(bulb.methods().len(), 3);
    }

    #[tokio::test]
    async fn test_silent_device_recovers_on_retry() {
        let calls = Arc::new(AtomicUsize::new(0));
        let bulb = FakeBulb::spawn({
            let calls = Arc::clone(&calls);
            move |_| {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    Vec::new()
                } else {
                    vec![br#"{"result":{"success":true}}"#.to_vec()]
                }
            }
        })
        .await;
        let mut pusher = Pusher::spawn(Transport::new(test_config(bulb.port())), bulb.addr());

        pusher.enqueue(dimmed(70)).await.unwrap().wait().await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_malformed_ack_is_not_retried() {
        let bulb = FakeBulb::spawn(|_| vec![br#"{"result":{"ok":1}}"#.to_vec()]).await;
        let mut pusher = Pusher::spawn(Transport::new(test_config(bulb.port())), bulb.addr());

        let err = pusher.enqueue(dimmed(70)).await.unwrap().wait().await.unwrap_err();

        assert!(matches!(err, Error::MalformedResponse(_)));
        assert_eq!(bulb.methods().len(), 1);
    }

    #[tokio::test]
    async fn test_fire_and_forget_ignores_silence() {
        let bulb = FakeBulb::silent().await;
        let config = test_config(bulb.port()).with_push_mode(PushMode::FireAndForget);
        let mut pusher = Pusher::spawn(Transport::new(config), bulb.addr());

        pusher.enqueue(dimmed(90)).await.unwrap().wait().await.unwrap();

        bulb.wait_for_requests(1).await;
        assert_eq!(bulb.methods(), vec!["setPilot"]);
    }

    #[tokio::test]
    async fn test_flush_waits_for_queued_pushes() {
        let bulb = FakeBulb::with_state(serde_json::json!({})).await;
        let mut pusher = Pusher::spawn(Transport::new(test_config(bulb.port())), bulb.addr());

        let first = pusher.enqueue(dimmed(10)).await.unwrap();
        let second = pusher.enqueue(dimmed(20)).await.unwrap();
        pusher.flush().await.unwrap();

        assert_eq!(bulb.methods(), vec!["setPilot", "setPilot"]);
        first.wait().await.unwrap();
        second.wait().await.unwrap();
    }
}
