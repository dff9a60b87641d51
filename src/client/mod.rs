//! HTTP transport for the extraction engine
//!
//! This module contains:
//! - Per-source rate limiting
//! - An on-disk response cache keyed by canonicalized request
//! - A retrying client with exponential backoff on transient failures

mod cache;
mod http;
mod rate_limit;

pub use cache::ResponseCache;
pub use http::{ApiClient, RequestAttributes, DEFAULT_MAX_ATTEMPTS};
pub use rate_limit::RateLimiter;
