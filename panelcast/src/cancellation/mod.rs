//! Cooperative cancellation for pipeline runs.
//!
//! A run owns one [`CancellationToken`]; the stage runner races every
//! inference call, gate wait and backoff sleep against it.

mod token;

pub use token::CancellationToken;
