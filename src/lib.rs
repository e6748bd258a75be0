//! Cardkeep - resilient fetch and incremental artifact generation
//!
//! The resilience and incrementality layer for a scheduled pipeline that
//! pulls third-party API data into static JSON snapshots and rendered cards:
//!
//! - [`retry::BackoffExecutor`] retries a fallible fetch with exponential delay
//! - [`circuit::CircuitBreakerStore`] skips dependencies that keep failing
//! - [`cache::ResponseCache`] keeps TTL-bounded copies of good responses
//! - [`change::ChangeDetector`] skips regeneration when nothing changed
//! - [`artifact::AtomicArtifactWriter`] never lets a bad write replace a good artifact
//!
//! [`pipeline::Pipeline`] wires them together per data source.

pub mod artifact;
pub mod cache;
pub mod change;
pub mod circuit;
pub mod cli;
pub mod config;
pub mod error;
pub mod naming;
pub mod pipeline;
pub mod retry;
pub mod runlog;

pub use error::{CardkeepError, CardkeepResult};
