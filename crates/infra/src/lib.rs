//! Infrastructure: stores, queue adapter, command runner, projection worker.
//!
//! Every durable concern is behind a trait with a production AWS-backed
//! implementation and an in-memory implementation for tests and
//! single-process mode:
//!
//! - events + snapshots: blob store (S3) via [`event_store::EventStore`]
//! - event fan-out: message queue (SQS) via [`queue::EventQueue`]
//! - read side + idempotency: document store (DynamoDB) via
//!   [`projection::ProjectionStore`] and [`idempotency::IdempotencyStore`]

pub mod blob;
pub mod config;
pub mod event_store;
pub mod idempotency;
pub mod projection;
pub mod projector;
pub mod queue;
pub mod runner;
pub mod worker;

#[cfg(test)]
mod integration_tests;
