//! Blocking HTTP client for the Google REST endpoints.

mod client;

pub use client::{ApiClient, USER_AGENT};
