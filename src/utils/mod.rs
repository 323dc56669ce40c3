pub mod error;
pub mod limiters;
pub mod rate_limiter;
pub mod token_estimator;
