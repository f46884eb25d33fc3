//! Core domain + application logic for the Telegram ↔ assistant relay.
//!
//! This crate is intentionally framework-agnostic. Telegram and the hosted
//! assistant API live behind ports (traits) implemented in adapter crates.

pub mod assistant;
pub mod config;
pub mod dispatcher;
pub mod domain;
pub mod errors;
pub mod keepalive;
pub mod logging;
pub mod messaging;
pub mod thread_store;
pub mod utils;

pub use errors::{Error, Result};
