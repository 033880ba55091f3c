//! Aggregates GitHub profile statistics into a single cached payload.
//!
//! This crate is the engine behind a portfolio site's metrics endpoint. Given an
//! account name it fetches the profile and the complete repository listing, fans
//! out per-repository language and commit lookups under a fixed concurrency
//! ceiling, polls the eventually-consistent statistics endpoint with exponential
//! backoff, and caches the assembled payload per account for a short TTL.
//!
//! The entry point is [`metrics::aggregator::MetricsService::get_metrics`].

/// Result type alias using `ohno::AppError` as the default error type.
pub type Result<T, E = ohno::AppError> = core::result::Result<T, E>;

pub mod error;

pub mod github;

pub mod metrics;
