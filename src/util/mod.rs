//! Shared helpers: structured logging setup and retry with backoff

pub mod backoff;
pub mod logging;

pub use backoff::{ExponentialBackoff, RetryPolicy};
pub use logging::{init_default, init_from_env, init_logging, LoggingConfig};
