//! Core forwarding engine for the single-account channel relay.
//!
//! This crate is intentionally framework-agnostic. Telegram lives behind the
//! [`transport::Transport`] port implemented in the adapter crate.

pub mod config;
pub mod cron;
pub mod delivery;
pub mod domain;
pub mod engine;
pub mod errors;
pub mod logging;
pub mod selector;
pub mod state;
pub mod store;
pub mod transport;
pub mod window;

pub use errors::{Error, Result};
