//! jobdl Core Library
//!
//! Client-side resilience for a job-based remote download API: create a job,
//! poll its status, fetch its result. Calls go through three layers before
//! reaching the network.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`api`] - Job data model, the [`JobApi`] seam and the HTTP implementation
//! - [`cache`] - TTL + LRU response cache
//! - [`resilience`] - Circuit breakers (per named resource) and backoff
//! - [`pool`] - Bounded-concurrency priority pool with retry and timeouts
//! - [`client`] - [`OptimizedClient`], composing the layers with request deduplication
//! - [`config`] - TOML-loadable [`ClientConfig`]
//! - [`clock`] - Injectable time source

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod api;
pub mod cache;
pub mod client;
pub mod clock;
pub mod config;
pub mod error;
pub mod pool;
pub mod resilience;

// Re-export commonly used types
pub use api::{CreateJobRequest, HttpJobClient, Job, JobApi, JobStatus};
pub use cache::{CacheStats, ResponseCache};
pub use client::{ClientStats, JobRequest, JobResponse, OptimizedClient};
pub use clock::{Clock, MockClock, SharedClock, SystemClock};
pub use config::{ClientConfig, ConfigError, load_config};
pub use error::{FailureType, JobError, classify_error};
pub use pool::{ConnectionPool, PoolStats};
pub use resilience::{CircuitBreaker, CircuitBreakerRegistry, CircuitState, CircuitStats};
