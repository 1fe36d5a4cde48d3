use anyhow::{Result, bail};
use log::debug;

use std::path::PathBuf;
use std::sync::Arc;

use crate::{auth::TokenSource, config::ServiceConfig, runtime::Runtime};

/// Everything a command needs to build its service handles.
pub struct Config<R: Runtime> {
    pub runtime: R,
    pub tokens: Arc<dyn TokenSource>,
    pub service: ServiceConfig,
}

impl<R: Runtime> Config<R> {
    pub fn new(
        runtime: R,
        tokens: Arc<dyn TokenSource>,
        credentials: PathBuf,
        api_url: Option<String>,
        retry_delay: Option<f64>,
    ) -> Result<Self> {
        if !runtime.is_file(&credentials) {
            bail!("Credentials file {} does not exist", credentials.display());
        }

        let mut service = ServiceConfig::new(credentials).with_api_base(api_url);
        if let Some(delay) = retry_delay {
            if !delay.is_finite() || delay < 0.0 {
                bail!("Retry delay must be a non-negative number of seconds");
            }
            service = service.with_retry_delay(delay);
        }
        debug!("Using {:?}", service);

        Ok(Self {
            runtime,
            tokens,
            service,
        })
    }
}
