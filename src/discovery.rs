//! Device discovery via UDP broadcast.

use std::net::IpAddr;

use log::debug;
use serde_json::Value;

use crate::codec::{self, Method};
use crate::config::Config;
use crate::errors::Error;
use crate::synchronizer::Synchronizer;
use crate::transport::{Reply, Transport};

type Result<T> = std::result::Result<T, Error>;

/// A device that answered a discovery broadcast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryRecord {
    pub ip: IpAddr,
    /// Power state from the reply, if it carried one.
    pub is_on: Option<bool>,
}

impl DiscoveryRecord {
    /// Build an unsynchronized [`Synchronizer`] for this device.
    ///
    /// ```ignore
    /// for record in wiz_sync::discover(&config).await? {
    ///     let bulb = record.into_synchronizer(config.clone());
    /// }
    /// ```
    pub fn into_synchronizer(self, config: Config) -> Synchronizer {
        Synchronizer::new(self.ip, config)
    }
}

/// Broadcast a `getPilot` and list every device that answered within
/// [`Config::discovery_window`].
///
/// Silence is not an error: with no devices on the network the list is
/// empty. Replies are keyed by sender address; a device that answers twice
/// keeps its first position with its latest power state.
pub async fn discover(config: &Config) -> Result<Vec<DiscoveryRecord>> {
    let transport = Transport::new(config.clone());
    let replies = transport
        .broadcast(Method::GetPilot, &codec::no_params())
        .await?;
    let records = collect(replies);
    debug!("discovered {} device(s)", records.len());
    Ok(records)
}

fn collect(replies: Vec<Reply>) -> Vec<DiscoveryRecord> {
    let mut records: Vec<DiscoveryRecord> = Vec::new();
    for reply in replies {
        let ip = reply.from.ip();
        let is_on = reply.result.get("state").and_then(Value::as_bool);
        match records.iter_mut().find(|r| r.ip == ip) {
            Some(record) => record.is_on = is_on,
            None => records.push(DiscoveryRecord { ip, is_on }),
        }
    }
    records
}
