//! order-api: the HTTP surface for the Producer Transaction.
//!
//! This crate's only job is atomically persisting a domain row and its
//! outbox event. Publishing to the broker is entirely the relay's job
//! (`outbox-relay`), not this service's.

pub mod config;
pub mod handlers;
pub mod models;
pub mod producer;
