#![doc = include_str!("../README.md")]
#![warn(missing_docs)]

pub mod breaker;
pub mod limiter;
pub mod retry;
pub mod singleflight;

pub use breaker::{BreakerConfig, BreakerRegistry, CircuitBreaker, CircuitOpen, CircuitState};
pub use limiter::{RateLimitExceeded, TokenBucket};
pub use retry::RetryPolicy;
pub use singleflight::{FlightError, SingleFlight};
