//! A cached query client with caller-owned fetch keys and atomic recovery
//! from payloads a consumer cannot handle.
//!
//! - [`cache::ResultCache`] stores payloads per (query identity, fetch key)
//! - [`fetch::FetchCoordinator`] serves fresh entries or issues one request per slot
//! - [`recovery::RecoveryController`] invalidates, advances the key and clears
//!   the fault as one transition
//! - [`ui::Boundary`] mounts a consumer and renders the recovery affordance

pub mod cache;
pub mod config;
pub mod fault;
pub mod fetch;
pub mod network;
pub mod operation;
pub mod recovery;
pub mod ui;

pub use fault::Fault;
pub use operation::{FetchKey, Operation, QueryIdentity};
