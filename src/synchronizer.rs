//! Keeps one device and its local mirror in step.

use std::future::Future;
use std::net::{IpAddr, SocketAddr};

use log::{debug, warn};
use serde_json::Value;

use crate::codec::{self, Method};
use crate::config::Config;
use crate::discovery::{self, DiscoveryRecord};
use crate::errors::Error;
use crate::history::MessageHistory;
use crate::mirror::{Change, Field, Rejection, StateMirror, Steps};
use crate::push::{PushHandle, Pusher};
use crate::runtime::{self, Mutex};
use crate::state::{DeviceInfo, DeviceState, Pilot};
use crate::transport::Transport;

type Result<T> = std::result::Result<T, Error>;

/// Result of a [`Synchronizer::mutate`] call that reached the mirror.
#[derive(Debug)]
#[must_use]
pub enum Outcome {
    /// The mirror changed and a push of the full snapshot was queued.
    Applied(PushHandle),
    /// The change was refused; the mirror is untouched and nothing was sent.
    Rejected(Rejection),
}

impl Outcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, Outcome::Applied(_))
    }

    pub fn rejection(&self) -> Option<&Rejection> {
        match self {
            Outcome::Applied(_) => None,
            Outcome::Rejected(rejection) => Some(rejection),
        }
    }

    /// Treat a rejection as [`Error::InvalidFieldValue`].
    pub fn applied(self) -> Result<PushHandle> {
        match self {
            Outcome::Applied(handle) => Ok(handle),
            Outcome::Rejected(rejection) => Err(Error::InvalidFieldValue(rejection)),
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    /// `None` until the first successful pull.
    mirror: Option<StateMirror>,
    info: Option<DeviceInfo>,
    pusher: Option<Pusher>,
}

/// Client for a single bulb.
///
/// The synchronizer owns the only mirror of its device. All mutations go
/// through one async lock, so concurrent calls apply one after another in
/// the order they acquire it, and the resulting pushes reach the device in
/// that same order.
///
/// # Example
///
/// ```ignore
/// use wiz_sync::{Change, Config, Field, Synchronizer};
///
/// let bulb = Synchronizer::connect("192.168.1.40".parse()?, Config::default()).await?;
/// bulb.mutate(Field::Dimming, Change::set(50)).await?.applied()?.wait().await?;
/// ```
#[derive(Debug)]
pub struct Synchronizer {
    target: SocketAddr,
    transport: Transport,
    steps: Steps,
    inner: Mutex<Inner>,
}

impl Synchronizer {
    /// Create an unsynchronized client. The first mutation pulls the device state.
    pub fn new(ip: IpAddr, config: Config) -> Self {
        Synchronizer {
            target: config.device_addr(ip),
            steps: Steps::from(&config),
            transport: Transport::new(config),
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Create a client and pull the device state, failing if the device is silent.
    pub async fn connect(ip: IpAddr, config: Config) -> Result<Self> {
        let synchronizer = Self::new(ip, config);
        synchronizer.pull().await?;
        Ok(synchronizer)
    }

    /// Broadcast a status query and list the devices that answered.
    pub async fn discover(config: &Config) -> Result<Vec<DiscoveryRecord>> {
        discovery::discover(config).await
    }

    pub fn ip(&self) -> IpAddr {
        self.target.ip()
    }

    pub fn config(&self) -> &Config {
        self.transport.config()
    }

    /// True once a pull has succeeded.
    pub async fn is_synced(&self) -> bool {
        self.inner.lock().await.mirror.is_some()
    }

    /// The mirror as it stands, without touching the network.
    pub async fn snapshot(&self) -> Option<DeviceState> {
        self.inner
            .lock()
            .await
            .mirror
            .as_ref()
            .map(|mirror| mirror.state().clone())
    }

    /// Read-only details from the last pull.
    pub async fn device_info(&self) -> Option<DeviceInfo> {
        self.inner.lock().await.info.clone()
    }

    pub async fn history(&self) -> MessageHistory {
        self.transport.history().await
    }

    pub async fn clear_history(&self) {
        self.transport.clear_history().await;
    }

    /// Refresh the mirror from the device and return the new state.
    ///
    /// Waits for pushes already queued by [`mutate`](Self::mutate) before
    /// reading, so a pull never rolls back an earlier mutation.
    pub async fn pull(&self) -> Result<DeviceState> {
        let mut inner = self.inner.lock().await;
        self.pull_locked(&mut inner).await
    }

    /// [`pull`](Self::pull), abandoned with [`Error::Cancelled`] when `cancel` resolves first.
    pub async fn pull_until<C>(&self, cancel: C) -> Result<DeviceState>
    where
        C: Future<Output = ()>,
    {
        runtime::until(cancel, self.pull()).await?
    }

    /// Apply `change` to `field` and queue a push of the whole mirror.
    ///
    /// Pulls first if the mirror has never been synchronized; if that pull
    /// gets no reply the call fails with [`Error::NoDeviceResponse`] and the
    /// next call pulls again. A change the mirror refuses comes back as
    /// [`Outcome::Rejected`] and sends nothing.
    pub async fn mutate(&self, field: Field, change: Change) -> Result<Outcome> {
        let mut inner = self.inner.lock().await;
        if inner.mirror.is_none() {
            self.pull_locked(&mut inner).await?;
        }

        let mut candidate = inner.mirror.clone().unwrap_or_default();
        if let Err(rejection) = candidate.apply(field, change, self.steps) {
            debug!("{}: rejected {field} {change}: {rejection}", self.ip());
            return Ok(Outcome::Rejected(rejection));
        }
        debug!("{}: applied {field} {change}", self.ip());

        let transport = &self.transport;
        let target = self.target;
        let pusher = inner
            .pusher
            .get_or_insert_with(|| Pusher::spawn(transport.clone(), target));
        let handle = pusher.enqueue(candidate.state().clone()).await?;

        // Only committed once the push is queued, so a cancelled call leaves
        // the mirror as it was.
        inner.mirror = Some(candidate);
        Ok(Outcome::Applied(handle))
    }

    /// [`mutate`](Self::mutate), abandoned with [`Error::Cancelled`] when `cancel` resolves first.
    pub async fn mutate_until<C>(&self, field: Field, change: Change, cancel: C) -> Result<Outcome>
    where
        C: Future<Output = ()>,
    {
        runtime::until(cancel, self.mutate(field, change)).await?
    }

    /// Raw `getSystemConfig` result (module name, firmware, MAC).
    pub async fn system_config(&self) -> Result<Value> {
        let reply = self
            .transport
            .request(self.target, Method::GetSystemConfig, &codec::no_params())
            .await?
            .ok_or(Error::NoDeviceResponse { ip: self.ip() })?;
        Ok(reply.result)
    }

    async fn pull_locked(&self, inner: &mut Inner) -> Result<DeviceState> {
        // Queued pushes must land first or the pull would read them back stale.
        if let Some(pusher) = inner.pusher.as_mut() {
            pusher.flush().await?;
        }

        let pilot = match self.fetch().await {
            Ok(pilot) => pilot,
            Err(e) => {
                warn!("{}: pull failed: {e}", self.ip());
                self.transport.record_error(&e).await;
                return Err(e);
            }
        };

        let state = pilot.state.clone();
        match inner.mirror.as_mut() {
            Some(mirror) => mirror.set_from_snapshot(pilot.state),
            None => inner.mirror = Some(StateMirror::from_snapshot(pilot.state)),
        }
        inner.info = Some(pilot.info);
        Ok(state)
    }

    async fn fetch(&self) -> Result<Pilot> {
        let reply = self
            .transport
            .request(self.target, Method::GetPilot, &codec::no_params())
            .await?
            .ok_or(Error::NoDeviceResponse { ip: self.ip() })?;
        serde_json::from_value(reply.result).map_err(Error::malformed)
    }
}
