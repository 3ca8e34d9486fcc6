//! Common utilities shared by the scheduler client and CDN manager

pub mod retry;

pub use retry::{execute_with_retry, with_retry, with_retry_if, RetryConfig};
