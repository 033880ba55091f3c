//! Thin GitHub API plumbing: the HTTP client, cursor pagination, exponential
//! backoff for eventually-consistent endpoints, and bounded-concurrency
//! batching. Nothing here knows about the aggregate payload; these pieces are
//! composed by [`crate::metrics::aggregator`].

pub mod backoff;
pub mod batch;
pub mod client;
pub mod pagination;
