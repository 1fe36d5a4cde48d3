use std::sync::Arc;

use crate::auth::{Credentials, TokenSource};
use crate::config::ServiceConfig;
use crate::error::Result;
use crate::http::ApiClient;
use crate::runtime::{RealRuntime, Runtime};
use crate::service::{Connector, HandleState, ServiceHandle};

pub const DRIVE_API_BASE: &str = "https://www.googleapis.com";

pub const DRIVE_SCOPES: &[&str] = &[
    "https://mail.google.com/",
    "https://www.googleapis.com/auth/drive",
    "https://www.googleapis.com/auth/drive.metadata",
    "https://www.googleapis.com/auth/drive.metadata.readonly",
    "https://www.googleapis.com/auth/drive.readonly",
    "https://www.googleapis.com/auth/drive.appdata",
    "https://www.googleapis.com/auth/drive.file",
];

/// Builds Drive v3 clients.
#[derive(Debug, Default, Clone, Copy)]
pub struct DriveConnector;

impl Connector for DriveConnector {
    type Client = ApiClient;

    fn name(&self) -> &'static str {
        "drive"
    }

    fn scopes(&self) -> &'static [&'static str] {
        DRIVE_SCOPES
    }

    fn connect<R: Runtime>(
        &self,
        credentials: &Credentials,
        config: &ServiceConfig,
        _runtime: &R,
    ) -> Result<ApiClient> {
        ApiClient::new(config.api_base_or(DRIVE_API_BASE), credentials)
    }
}

/// Drive service handle, optionally delegated to a user.
pub struct DriveService<R: Runtime = RealRuntime> {
    pub(super) handle: ServiceHandle<DriveConnector, R>,
}

impl<R: Runtime> DriveService<R> {
    pub fn new(runtime: R, tokens: Arc<dyn TokenSource>) -> Self {
        Self {
            handle: ServiceHandle::new(DriveConnector, runtime, tokens),
        }
    }

    pub fn configure(&self, config: ServiceConfig) {
        self.handle.configure(config)
    }

    /// A handle acting on behalf of `user`, sharing this one's configuration.
    pub fn for_user(&self, user: impl Into<String>) -> Self {
        Self {
            handle: self.handle.for_user(user),
        }
    }

    pub fn get_service(&self) -> Result<Arc<ApiClient>> {
        self.handle.get_service()
    }

    pub fn reset(&self) {
        self.handle.reset()
    }

    pub fn state(&self) -> HandleState {
        self.handle.state()
    }

    pub fn handle(&self) -> &ServiceHandle<DriveConnector, R> {
        &self.handle
    }
}
