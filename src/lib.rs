//! Shared plumbing for Google Drive, Sheets and Gmail integrations.
//!
//! Each integration is a lazily connected service handle (see [`service`])
//! built from a service-account key and a [`config::ServiceConfig`]. API
//! calls go through [`retry`] so transient failures are retried with
//! exponential backoff and a fresh connection.

pub mod auth;
pub mod commands;
pub mod config;
pub mod drive;
pub mod error;
pub mod http;
pub mod mail;
pub mod retry;
pub mod runtime;
pub mod service;
pub mod sheets;

pub use config::ServiceConfig;
pub use error::{GapiError, Result};
pub use retry::{ErrorClass, RetryPolicy};
