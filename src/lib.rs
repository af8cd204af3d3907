//! # wiz_sync
//!
//! An async client that keeps a local mirror of a Wiz smart bulb in step with
//! the device itself, over the bulb's JSON-over-UDP protocol.
//!
//! This crate provides a **runtime-agnostic** async API. A [`Synchronizer`]
//! pulls the bulb's state the first time it is needed, applies validated
//! changes to its [`StateMirror`], and pushes the whole mirror back to the
//! device in the order the changes were made.
//!
//! ## Quick Start
//!
//! ```ignore
//! use wiz_sync::{Change, Config, Field, Synchronizer};
//!
//! async fn dim() -> Result<(), Box<dyn std::error::Error>> {
//!     let bulb = Synchronizer::new("192.168.1.40".parse()?, Config::default());
//!
//!     // Pulls the current state, sets dimming to 50 and queues a push.
//!     let handle = bulb.mutate(Field::Dimming, Change::set(50)).await?.applied()?;
//!     handle.wait().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - **Lazy synchronization**: the first mutation pulls `getPilot`; later ones work from the mirror
//! - **Validated changes**: out-of-range values come back as a [`Rejection`] and nothing is sent
//! - **Ordered pushes**: one worker per device delivers snapshots in mutation order, see [`PushHandle`]
//! - **Discovery**: find bulbs with a broadcast [`discover`]
//! - **Diagnostics**: every message is kept in a bounded [`MessageHistory`]
//!
//! ## Communication
//!
//! Bulbs listen on UDP port 38899. Requests are single JSON datagrams such as
//! `{"method":"getPilot","params":{}}`; the device answers with an object
//! carrying a `result`. See [`codec`] for the framing and [`Config`] for the
//! timeouts and retry policy.
//!
//! ## Feature Flags
//!
//! - `runtime-tokio` (default): Use the tokio async runtime
//! - `runtime-async-std`: Use the async-std runtime
//! - `runtime-smol`: Use the smol runtime

pub mod codec;
mod config;
mod discovery;
mod errors;
mod history;
mod mirror;
mod push;
pub mod runtime;
mod state;
mod synchronizer;
pub mod transport;

#[cfg(test)]
mod testing;

// Re-export public API
pub use config::{Config, EchoFilter, PushMode};
pub use discovery::{DiscoveryRecord, discover};
pub use errors::Error;
pub use history::{Direction, HistoryEntry, MessageHistory};
pub use mirror::{Change, Field, FieldValue, RejectReason, Rejection, StateMirror, Steps};
pub use push::PushHandle;
pub use state::{DeviceInfo, DeviceState, Pilot};
pub use synchronizer::{Outcome, Synchronizer};
pub use transport::{Reply, Transport};
