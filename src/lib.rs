//! Quotagate - Request Admission Rate Limiting
//!
//! This crate implements per-caller, per-endpoint-category rate limiting for
//! HTTP services. Counters live in process memory or in Redis, and a tower
//! layer decides for every request whether it proceeds or is rejected with
//! a 429.

pub mod clock;
pub mod config;
pub mod error;
pub mod http;
pub mod ratelimit;
