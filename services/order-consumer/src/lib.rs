//! order-consumer: the idempotent consumer dedup gate.
//!
//! This crate's only job is absorbing at-least-once redelivery from the
//! broker into at-most-once business effect, via the transactional
//! dedup gate in `idempotent-consumer`. It never talks to the outbox
//! table directly — that's the relay's job, entirely out of band.

pub mod config;
pub mod error;
pub mod handlers;
pub mod models;
