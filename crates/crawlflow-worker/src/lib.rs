//! Crawlflow Worker
//!
//! Consumes fetch outcomes from a queue and advances crawl workflows.
//!
//! This crate provides:
//! - Queue transport trait with NATS JetStream and in-memory implementations
//! - Queue bridge with all-or-nothing routing per fetch outcome
//! - Worker loop with concurrency limit and graceful shutdown
//! - Seeding and environment configuration

pub mod bridge;
pub mod config;
pub mod queue;
pub mod seed;
pub mod worker;

pub use bridge::{Handled, QueueBridge, RoutingPlan};
pub use config::WorkerConfig;
pub use queue::{MemoryQueue, MessageQueue, NatsQueue, QueueNames};
pub use worker::Worker;
