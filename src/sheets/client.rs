use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock};

use serde_json::Value;

use crate::auth::{Credentials, TokenSource};
use crate::config::ServiceConfig;
use crate::error::{GapiError, Result};
use crate::http::ApiClient;
use crate::retry::RetryExecutor;
use crate::runtime::{RealRuntime, Runtime};
use crate::service::{Connector, HandleState, ServiceHandle};

pub const SHEETS_API_BASE: &str = "https://sheets.googleapis.com";

/// Host serving CSV exports of spreadsheets.
pub const EXPORT_BASE: &str = "https://docs.google.com";

pub const SHEETS_SCOPES: &[&str] = &[
    "https://www.googleapis.com/auth/drive",
    "https://spreadsheets.google.com/feeds",
    "https://docs.google.com/feeds",
];

/// A sheet identified by spreadsheet ID and tab name, with an optional known
/// tab ID (`gid`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SheetRef {
    pub spreadsheet_id: String,
    pub tab_name: String,
    pub tab_id: Option<i64>,
}

impl SheetRef {
    pub fn new(spreadsheet_id: impl Into<String>, tab_name: impl Into<String>) -> Self {
        Self {
            spreadsheet_id: spreadsheet_id.into(),
            tab_name: tab_name.into(),
            tab_id: None,
        }
    }

    pub fn with_tab_id(mut self, tab_id: i64) -> Self {
        self.tab_id = Some(tab_id);
        self
    }
}

/// Sheets-specific settings.
#[derive(Debug, Clone, PartialEq)]
pub struct SheetsConfig {
    /// Sheet read when connecting, and written instead of the real target
    /// when `force_test_spreadsheet` is set.
    pub test_sheet: SheetRef,
    /// Directory where downloaded sheets are stored.
    pub backup_location: Option<PathBuf>,
    /// Directory where spreadsheet metadata is cached.
    pub cache_location: Option<PathBuf>,
    pub force_test_spreadsheet: bool,
}

impl SheetsConfig {
    pub fn new(test_sheet: SheetRef) -> Self {
        Self {
            test_sheet,
            backup_location: None,
            cache_location: None,
            force_test_spreadsheet: false,
        }
    }

    pub fn with_backup_location(mut self, path: impl Into<PathBuf>) -> Self {
        self.backup_location = Some(path.into());
        self
    }

    pub fn with_cache_location(mut self, path: impl Into<PathBuf>) -> Self {
        self.cache_location = Some(path.into());
        self
    }

    pub fn with_force_test_spreadsheet(mut self, force: bool) -> Self {
        self.force_test_spreadsheet = force;
        self
    }
}

/// Authenticated Sheets client plus the export host.
pub struct SheetsClient {
    pub api: ApiClient,
    pub export_base: String,
}

impl SheetsClient {
    /// URL of the CSV export of one tab.
    pub fn export_url(&self, spreadsheet_id: &str) -> String {
        format!("{}/spreadsheets/d/{}/export", self.export_base, spreadsheet_id)
    }
}

/// Builds Sheets v4 clients and checks them against the test spreadsheet
/// before handing them out.
pub struct SheetsConnector {
    settings: Arc<RwLock<Option<SheetsConfig>>>,
}

impl Connector for SheetsConnector {
    type Client = SheetsClient;

    fn name(&self) -> &'static str {
        "sheets"
    }

    fn scopes(&self) -> &'static [&'static str] {
        SHEETS_SCOPES
    }

    fn connect<R: Runtime>(
        &self,
        credentials: &Credentials,
        config: &ServiceConfig,
        runtime: &R,
    ) -> Result<SheetsClient> {
        let test_id = self
            .settings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|s| s.test_sheet.spreadsheet_id.clone())
            .ok_or_else(GapiError::not_configured)?;

        let api = ApiClient::new(config.api_base_or(SHEETS_API_BASE), credentials)?;
        let check = format!("v4/spreadsheets/{}", test_id);

        // A client that cannot read the test spreadsheet is never cached.
        RetryExecutor::new(runtime, config.retry)
            .with_logger(&config.logger)
            .run(
                || api.get_json::<Value>(&check, &[("fields", "spreadsheetId")]),
                GapiError::class,
            )?;

        Ok(SheetsClient {
            api,
            export_base: config.api_base_or(EXPORT_BASE).to_string(),
        })
    }
}

/// Sheets service handle.
pub struct SheetsService<R: Runtime = RealRuntime> {
    pub(super) handle: ServiceHandle<SheetsConnector, R>,
    settings: Arc<RwLock<Option<SheetsConfig>>>,
}

impl<R: Runtime> SheetsService<R> {
    pub fn new(runtime: R, tokens: Arc<dyn TokenSource>) -> Self {
        let settings = Arc::new(RwLock::new(None));
        let connector = SheetsConnector {
            settings: Arc::clone(&settings),
        };
        Self {
            handle: ServiceHandle::new(connector, runtime, tokens),
            settings,
        }
    }

    pub fn configure(&self, config: ServiceConfig, sheets: SheetsConfig) {
        *self.settings.write().unwrap_or_else(PoisonError::into_inner) = Some(sheets);
        self.handle.configure(config);
    }

    pub fn sheets_config(&self) -> Result<SheetsConfig> {
        self.settings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(GapiError::not_configured)
    }

    pub fn get_service(&self) -> Result<Arc<SheetsClient>> {
        self.handle.get_service()
    }

    pub fn reset(&self) {
        self.handle.reset()
    }

    pub fn state(&self) -> HandleState {
        self.handle.state()
    }

    pub fn handle(&self) -> &ServiceHandle<SheetsConnector, R> {
        &self.handle
    }

    /// Directory for downloaded sheets. Must be configured and exist.
    pub fn backup_location(&self) -> Result<PathBuf> {
        self.existing_dir(self.sheets_config().ok().and_then(|c| c.backup_location), "Backup")
    }

    /// Directory for cached spreadsheet metadata. Must be configured and
    /// exist.
    pub fn cache_location(&self) -> Result<PathBuf> {
        self.existing_dir(self.sheets_config().ok().and_then(|c| c.cache_location), "Cache")
    }

    fn existing_dir(&self, path: Option<PathBuf>, what: &str) -> Result<PathBuf> {
        match path {
            Some(path) if self.handle.runtime().is_dir(&path) => Ok(path),
            _ => Err(GapiError::NotConfigured(format!(
                "{} location is not configured",
                what
            ))),
        }
    }

    pub fn force_test_spreadsheet(&self) -> bool {
        self.sheets_config()
            .map(|c| c.force_test_spreadsheet)
            .unwrap_or(false)
    }
}
