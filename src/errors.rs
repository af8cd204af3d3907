use std::net::IpAddr;

use crate::mirror::Rejection;

/// All error types that can occur while synchronizing with a Wiz light.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Failed to serialize a request to JSON.
    #[error("failed to dump json: {0:?}")]
    JsonDump(serde_json::Error),

    /// A network socket operation failed.
    #[error("socket {action} error: {err:?}")]
    Socket { action: String, err: std::io::Error },

    /// A received datagram is not the expected `{"result": ...}` envelope.
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// The device did not answer a query within the response window.
    #[error("no response from device {ip}")]
    NoDeviceResponse { ip: IpAddr },

    /// A mutation was rejected by the mirror's range checks.
    #[error("invalid field value: {0}")]
    InvalidFieldValue(Rejection),

    /// The device acknowledged a push with `success: false`.
    #[error("device {ip} rejected the update")]
    RemoteRejected { ip: IpAddr },

    /// Every push attempt failed.
    #[error("push to {ip} failed after {attempts} attempts: {source}")]
    PushFailed {
        ip: IpAddr,
        attempts: u32,
        #[source]
        source: Box<Error>,
    },

    /// The caller's cancel signal fired before the operation finished.
    #[error("operation cancelled")]
    Cancelled,

    /// The per-device push worker stopped before reporting a result.
    #[error("push worker for {0} is gone")]
    WorkerGone(IpAddr),
}

impl Error {
    /// Create a new socket error
    pub fn socket(action: &str, err: std::io::Error) -> Self {
        Error::Socket {
            action: action.to_string(),
            err,
        }
    }

    /// Create a new malformed response error
    pub fn malformed(reason: impl std::fmt::Display) -> Self {
        Error::MalformedResponse(reason.to_string())
    }
}

impl From<crate::runtime::Cancelled> for Error {
    fn from(_: crate::runtime::Cancelled) -> Self {
        Error::Cancelled
    }
}

/// Hacky implementation of PartialEq for testing
#[cfg(test)]
impl PartialEq for Error {
    fn eq(&self, other: &Self) -> bool {
        self.to_string() == other.to_string()
    }
}
