//! teamsync: keeps one team's view of a facilitated session in step with
//! the host.
//!
//! ARCHITECTURE
//! ============
//! - `engine`: per-(session, team) actor, connection supervision, published view
//! - `sync`: slide, decision, metric and adjustment synchronizers plus
//!   request sequencing and timer slots
//! - `event`: typed change notifications from the transport
//! - `model`: session, slide, decision, record and adjustment types
//! - `catalog`: static slide definitions
//! - `store`: durable-store trait and Postgres adapter
//! - `transport`: push-channel trait and WebSocket adapter
//! - `config`, `error`: environment knobs and error codes

pub mod catalog;
pub mod config;
pub mod engine;
pub mod error;
pub mod event;
pub mod model;
pub mod store;
pub mod sync;
pub mod transport;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use catalog::SlideCatalog;
pub use config::SyncConfig;
pub use engine::supervisor::ConnectionState;
pub use engine::{OpenError, SyncClient, SyncHandle, SyncView};
pub use error::ErrorCode;
pub use event::SessionEvent;
