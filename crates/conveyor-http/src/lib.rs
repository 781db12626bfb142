//! Session-aware HTTP requests.
//!
//! A [`SessionClient`] issues requests with a per-attempt timeout and a
//! fixed-delay retry policy, and keeps the cookie jar stored in an
//! [`conveyor_state::ExecutionContext`] up to date across requests.

mod client;
mod error;
mod request;
mod response;

pub use client::SessionClient;
pub use error::SessionError;
pub use request::{CaptureToken, RequestBody, RequestSpec, parse_method};
pub use reqwest::Method;
pub use response::SessionResponse;
