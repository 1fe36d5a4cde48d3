use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde_json::{Value, json};

use tracing::info;

use super::client::SheetsService;
use super::operations::{BulkUpdate, SheetTarget, SpreadsheetInfo, WriteOptions};
use crate::drive::{File, Folder, Role, SPREADSHEET_MIME_TYPE};
use crate::error::{GapiError, Result};
use crate::runtime::Runtime;

/// Tab name of the sheet handed out by a dry-run [`Spreadsheet::create_sheet`].
pub const STUB_TAB_NAME: &str = "Stubbed";

/// ID of the spreadsheet a dry-run [`Spreadsheet::dump_in`] or
/// [`Spreadsheet::copy_in`] pretends to create.
pub const STUB_SPREADSHEET_ID: &str = "stubbed";

/// A spreadsheet and the tabs registered on it.
///
/// Tabs are not discovered up front: register them with
/// [`add_sheet`](Self::add_sheet), or let [`load_infos`](Self::load_infos)
/// register every tab it finds.
pub struct Spreadsheet<'a, R: Runtime> {
    service: &'a SheetsService<R>,
    pub id: String,
    name: Option<String>,
    tabs: BTreeMap<String, Option<i64>>,
    loaded: bool,
}

impl<'a, R: Runtime> Spreadsheet<'a, R> {
    pub fn new(service: &'a SheetsService<R>, id: impl Into<String>) -> Self {
        Self {
            service,
            id: id.into(),
            name: None,
            tabs: BTreeMap::new(),
            loaded: false,
        }
    }

    /// Uses `name` instead of the title on Google Sheets, e.g. to keep
    /// backup file names free of special characters.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Registered tab names and their IDs, when known.
    pub fn tabs(&self) -> impl Iterator<Item = (&str, Option<i64>)> {
        self.tabs.iter().map(|(name, id)| (name.as_str(), *id))
    }

    /// Loads the title and tab IDs, once unless `force` is set.
    pub fn load_infos(&mut self, force: bool) -> Result<&mut Self> {
        if self.loaded && !force {
            return Ok(self);
        }
        let infos = self.service.load_infos(&self.id, force)?;
        self.apply(infos);
        Ok(self)
    }

    /// Forgets the cached metadata, locally and in the cache location.
    pub fn clear_infos(&mut self) -> Result<&mut Self> {
        self.service.clear_infos(&self.id)?;
        self.loaded = false;
        Ok(self)
    }

    fn apply(&mut self, infos: SpreadsheetInfo) {
        if self.name.is_none() {
            self.name = Some(infos.properties.title);
        }
        for sheet in infos.sheets {
            self.tabs
                .insert(sheet.properties.title, Some(sheet.properties.sheet_id));
        }
        self.loaded = true;
    }

    /// Registers a tab. A known `tab_id` is kept even if the tab is later
    /// renamed on Google Sheets.
    pub fn add_sheet(&mut self, tab_name: &str, tab_id: Option<i64>) -> &mut Self {
        let entry = self.tabs.entry(tab_name.to_string()).or_insert(None);
        if entry.is_none() {
            *entry = tab_id;
        }
        self
    }

    /// Registers a tab already resolved elsewhere, unless one with the same
    /// name is known.
    pub fn add_known_sheet(&mut self, sheet: &Sheet<'_, R>) -> Result<Sheet<'a, R>> {
        if sheet.target.spreadsheet_id != self.id {
            return Err(GapiError::InvalidInput(format!(
                "sheet {} belongs to {}, not {}",
                sheet.target.tab_name, sheet.target.spreadsheet_id, self.id
            )));
        }
        self.add_sheet(&sheet.target.tab_name, Some(sheet.target.tab_id));
        self.sheet(&sheet.target.tab_name)
    }

    fn target(&self, tab_name: &str, tab_id: i64) -> SheetTarget {
        SheetTarget {
            spreadsheet_id: self.id.clone(),
            spreadsheet_name: self.name.clone().unwrap_or_else(|| self.id.clone()),
            tab_id,
            tab_name: tab_name.to_string(),
        }
    }

    /// A handle on one registered (or discoverable) tab.
    pub fn sheet(&mut self, tab_name: &str) -> Result<Sheet<'a, R>> {
        if self.tabs.get(tab_name).copied().flatten().is_none() || self.name.is_none() {
            self.load_infos(false)?;
            if self.tabs.get(tab_name).copied().flatten().is_none() {
                self.load_infos(true)?;
            }
        }
        let tab_id = self
            .tabs
            .get(tab_name)
            .copied()
            .flatten()
            .ok_or_else(|| GapiError::Unexpected(format!("no sheet named {} in {}", tab_name, self.id)))?;
        Ok(Sheet {
            service: self.service,
            target: self.target(tab_name, tab_id),
        })
    }

    /// Adds a new tab, or returns the existing one with that name.
    ///
    /// With `dryrun`, nothing is registered and the returned sheet is a
    /// stub named [`STUB_TAB_NAME`].
    pub fn create_sheet(
        &mut self,
        tab_name: &str,
        tab_id: Option<i64>,
        properties: Value,
        dryrun: bool,
    ) -> Result<Sheet<'a, R>> {
        self.load_infos(false)?;
        if self.tabs.get(tab_name).copied().flatten().is_some() {
            return self.sheet(tab_name);
        }
        let created = self
            .service
            .create_sheet(&self.id, tab_name, tab_id, properties, dryrun)?;
        if dryrun {
            return Ok(Sheet {
                service: self.service,
                target: self.target(STUB_TAB_NAME, created.sheet_id),
            });
        }
        self.tabs.insert(created.title.clone(), Some(created.sheet_id));
        self.sheet(&created.title)
    }

    /// Copies the values of every tab into `destination`, creating tabs
    /// there as needed. Formulas are exported as their values.
    pub fn dump_to(&mut self, destination: &mut Spreadsheet<'_, R>, dryrun: bool) -> Result<()> {
        self.load_infos(false)?;
        let names: Vec<String> = self.tabs.keys().cloned().collect();
        for name in names {
            let source = self.sheet(&name)?;
            let rows = source.rows()?;
            let target = destination.create_sheet(
                &name,
                None,
                json!({ "gridProperties": { "rowCount": 1, "columnCount": 1 } }),
                dryrun,
            )?;
            target.bulk_write(
                &rows,
                0,
                0,
                WriteOptions::dryrun(dryrun).with_remove_filter(false),
            )?;
        }
        Ok(())
    }

    /// Creates a spreadsheet named `name` in `folder` and dumps the values
    /// of this one into it. See [`dump_to`](Self::dump_to).
    ///
    /// The new file is shared as writer with the service account, so it
    /// stays writable when `folder` belongs to a delegated user.
    pub fn dump_in<D: Runtime>(
        &mut self,
        folder: &Folder<'_, D>,
        name: &str,
        dryrun: bool,
    ) -> Result<Spreadsheet<'a, R>> {
        info!(
            logger = %self.service.handle().logger(),
            "Dumping {} into {} in {} ({})...",
            self.id,
            name,
            folder.name,
            folder.id
        );
        let mut destination = if dryrun {
            let mut stub = Spreadsheet::new(self.service, STUB_SPREADSHEET_ID).with_name(name);
            stub.loaded = true;
            stub
        } else {
            let file = folder.insert_file(name, SPREADSHEET_MIME_TYPE)?;
            self.share_with_service_account(&file)?;
            Spreadsheet::new(self.service, file.id).with_name(name)
        };
        self.dump_to(&mut destination, dryrun)?;
        Ok(destination)
    }

    /// Clones this spreadsheet, formulas included, as `name` in `folder`.
    /// Forms attached to it are cloned by Drive next to the original form.
    pub fn copy_in<D: Runtime>(
        &mut self,
        folder: &Folder<'_, D>,
        name: &str,
        dryrun: bool,
    ) -> Result<Spreadsheet<'a, R>> {
        self.load_infos(false)?;
        info!(
            logger = %self.service.handle().logger(),
            "Copying {} ({}) as {} into {} ({})...",
            self.name.as_deref().unwrap_or_default(),
            self.id,
            name,
            folder.name,
            folder.id
        );
        if dryrun {
            return Ok(Spreadsheet::new(self.service, STUB_SPREADSHEET_ID).with_name(name));
        }
        let copied = folder.service().copy_file(&self.id, name, Some(&folder.id))?;
        let file = File::new(name, copied.id, folder.service());
        self.share_with_service_account(&file)?;
        Ok(Spreadsheet::new(self.service, file.id).with_name(name))
    }

    fn share_with_service_account<D: Runtime>(&self, file: &File<'_, D>) -> Result<()> {
        let email = self.service.handle().credentials()?.key.client_email;
        file.share(&email, Role::Writer, false)?;
        Ok(())
    }
}

/// One tab of a spreadsheet, with everything needed to address it.
pub struct Sheet<'a, R: Runtime> {
    service: &'a SheetsService<R>,
    target: SheetTarget,
}

impl<'a, R: Runtime> Sheet<'a, R> {
    pub fn target(&self) -> &SheetTarget {
        &self.target
    }

    pub fn tab_name(&self) -> &str {
        &self.target.tab_name
    }

    pub fn tab_id(&self) -> i64 {
        self.target.tab_id
    }

    /// Backup file for this tab at `timestamp` (typically `YYYY-MM-DD`).
    pub fn file_path(&self, timestamp: &str) -> Result<PathBuf> {
        let dir = self.service.backup_location()?;
        Ok(dir.join(format!(
            "{} - {}-{}.csv",
            self.target.spreadsheet_name, self.target.tab_name, timestamp
        )))
    }

    /// Saves the tab as CSV at `path`.
    pub fn download(&self, path: &Path) -> Result<()> {
        self.service
            .download_csv(&self.target.spreadsheet_id, self.target.tab_id, path)
    }

    /// Current rows of the tab.
    pub fn rows(&self) -> Result<Vec<Vec<String>>> {
        self.service
            .read_rows(&self.target.spreadsheet_id, self.target.tab_id)
    }

    pub fn remove_filter(&self, dryrun: bool) -> Result<()> {
        self.service.remove_filter(&self.target, dryrun)
    }

    pub fn bulk_update(&self, update: &BulkUpdate<'_>, dryrun: bool) -> Result<Vec<(i64, String)>> {
        self.service
            .bulk_update(&self.target, update, WriteOptions::dryrun(dryrun))
    }

    pub fn bulk_clean(&self, range: &str, dryrun: bool) -> Result<()> {
        self.service
            .bulk_clean(&self.target, range, WriteOptions::dryrun(dryrun))
    }

    pub fn bulk_write<I, Row, S>(
        &self,
        rows: I,
        row_index: i64,
        column_index: i64,
        options: WriteOptions,
    ) -> Result<()>
    where
        I: IntoIterator<Item = Row>,
        Row: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.service
            .bulk_write(&self.target, rows, row_index, column_index, options)
    }

    pub fn bulk_append(&self, rows: &[Vec<String>], range: &str, dryrun: bool) -> Result<()> {
        self.service.bulk_append(
            &self.target,
            rows,
            range,
            WriteOptions::dryrun(dryrun).with_remove_filter(false),
        )
    }
}
