//! The aggregation pipeline, its payload types, and the per-identity cache.

pub mod aggregator;
pub mod cache;
pub mod payload;
