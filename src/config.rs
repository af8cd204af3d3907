//! Driver configuration.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_with::{DurationMilliSeconds, serde_as};

/// How a [`Synchronizer`](crate::Synchronizer) delivers the mirror to the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PushMode {
    /// Wait for `{"success": true}` and retry on silence or rejection.
    #[default]
    Acknowledged,
    /// Send once and close the socket without waiting for a reply.
    FireAndForget,
}

/// How broadcast collection tells the request's own echo apart from replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EchoFilter {
    /// The request carries a random id; request envelopes carrying it are dropped.
    #[default]
    RequestId,
    /// Any datagram exactly as long as the request is dropped.
    ByteLength,
}

/// Settings shared by the transport, the synchronizer and discovery.
///
/// Every field has a default, so a partial document deserializes:
///
/// ```
/// use std::time::Duration;
/// use wiz_sync::Config;
///
/// let config: Config = serde_json::from_str(r#"{"response_timeout": 500}"#).unwrap();
/// assert_eq!(config.response_timeout, Duration::from_millis(500));
/// assert_eq!(config.port, 38899);
/// ```
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// UDP port the devices listen on.
    pub port: u16,
    /// Local address sockets bind to. The port is always ephemeral.
    pub bind_addr: IpAddr,
    /// Destination of discovery broadcasts.
    pub broadcast_addr: Ipv4Addr,
    /// How long a unicast request waits for its reply.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub response_timeout: Duration,
    /// How long a broadcast collects replies. Always waited out in full.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub discovery_window: Duration,
    /// Increase/decrease step for the r, g and b channels.
    pub byte_step: u16,
    /// Increase/decrease step for dimming and white.
    pub percent_step: u16,
    /// Increase/decrease step for temp, in Kelvin.
    pub kelvin_step: u16,
    /// Increase/decrease step for sceneId.
    pub scene_step: u16,
    pub push_mode: PushMode,
    /// Attempts per push before giving up with [`Error::PushFailed`](crate::Error::PushFailed).
    pub push_attempts: u32,
    /// Pause between push attempts.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub retry_delay: Duration,
    pub echo_filter: EchoFilter,
    /// Pushes that may wait in a device's queue before `mutate` blocks.
    pub push_queue: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            port: Self::DEFAULT_PORT,
            bind_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            broadcast_addr: Ipv4Addr::BROADCAST,
            response_timeout: Duration::from_millis(2000),
            discovery_window: Duration::from_millis(2000),
            byte_step: 17,
            percent_step: 10,
            kelvin_step: 100,
            scene_step: 1,
            push_mode: PushMode::default(),
            push_attempts: 5,
            retry_delay: Duration::from_millis(250),
            echo_filter: EchoFilter::default(),
            push_queue: 8,
        }
    }
}

impl Config {
    pub const DEFAULT_PORT: u16 = 38899;

    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_bind_addr(mut self, addr: IpAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    pub fn with_broadcast_addr(mut self, addr: Ipv4Addr) -> Self {
        self.broadcast_addr = addr;
        self
    }

    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    pub fn with_discovery_window(mut self, window: Duration) -> Self {
        self.discovery_window = window;
        self
    }

    pub fn with_push_mode(mut self, mode: PushMode) -> Self {
        self.push_mode = mode;
        self
    }

    /// Set the number of push attempts. Zero is treated as one.
    pub fn with_push_attempts(mut self, attempts: u32) -> Self {
        self.push_attempts = attempts.max(1);
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn with_echo_filter(mut self, filter: EchoFilter) -> Self {
        self.echo_filter = filter;
        self
    }

    /// Socket address of a device at `ip` on the configured port.
    pub fn device_addr(&self, ip: IpAddr) -> SocketAddr {
        SocketAddr::new(ip, self.port)
    }

    pub(crate) fn local_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_addr, 0)
    }

    pub(crate) fn broadcast_target(&self) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(self.broadcast_addr), self.port)
    }
}
