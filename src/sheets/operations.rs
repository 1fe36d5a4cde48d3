//! Spreadsheet operations.
//!
//! Writes are expressed as `batchUpdate` requests. Every call goes through
//! the handle's retry executor; with `force_test_spreadsheet` set, the
//! target of every write is replaced by the configured test sheet.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::info;

use super::client::SheetsService;
use super::csv;
use crate::error::{GapiError, Result};
use crate::runtime::Runtime;

/// A fully resolved sheet: both IDs and both names known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SheetTarget {
    pub spreadsheet_id: String,
    pub spreadsheet_name: String,
    pub tab_id: i64,
    pub tab_name: String,
}

/// Flags shared by the write operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteOptions {
    /// Log what would be done without writing anything.
    pub dryrun: bool,
    /// Clear any basic filter on the tab first.
    pub remove_filter: bool,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            dryrun: false,
            remove_filter: true,
        }
    }
}

impl WriteOptions {
    pub fn dryrun(dryrun: bool) -> Self {
        Self {
            dryrun,
            ..Self::default()
        }
    }

    pub fn with_remove_filter(mut self, remove_filter: bool) -> Self {
        self.remove_filter = remove_filter;
        self
    }
}

/// Value written next to each matching key by [`SheetsService::bulk_update`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateValue {
    /// The same value for every key.
    Same(String),
    /// One value per key; keys without an entry are left untouched.
    PerKey(HashMap<String, String>),
}

impl UpdateValue {
    fn for_key(&self, key: &str) -> Option<&str> {
        match self {
            UpdateValue::Same(value) => Some(value),
            UpdateValue::PerKey(values) => values.get(key).map(String::as_str),
        }
    }
}

/// Parameters of [`SheetsService::bulk_update`].
#[derive(Debug, Clone)]
pub struct BulkUpdate<'a> {
    pub keys: &'a [&'a str],
    /// Column holding the keys, e.g. `Z3:Z` or `'Contracts'!Z3:Z`.
    pub source_range: &'a str,
    /// Row index (0-based) of the first row of `source_range`.
    pub destination_row_offset: i64,
    /// Column (0-based) receiving the values.
    pub destination_column: i64,
    pub value: UpdateValue,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SheetProperties {
    pub sheet_id: i64,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpreadsheetProperties {
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SheetInfo {
    pub properties: SheetProperties,
}

/// Spreadsheet metadata as returned by `spreadsheets.get`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpreadsheetInfo {
    pub properties: SpreadsheetProperties,
    #[serde(default)]
    pub sheets: Vec<SheetInfo>,
}

impl SpreadsheetInfo {
    pub fn sheet_named(&self, tab_name: &str) -> Option<&SheetProperties> {
        self.sheets
            .iter()
            .map(|s| &s.properties)
            .find(|p| p.title == tab_name)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BatchGet {
    #[serde(default)]
    value_ranges: Vec<ValueRange>,
}

#[derive(Debug, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<Value>>,
}

/// Prefixes `range` with the quoted tab name unless it already names one.
pub fn full_range(tab_name: &str, range: &str) -> String {
    if range.contains('!') {
        range.to_string()
    } else {
        format!("'{}'!{}", tab_name.replace('\'', "''"), range)
    }
}

fn paste_request(tab_id: i64, row_index: i64, column_index: i64, data: &str) -> Value {
    json!({
        "pasteData": {
            "data": data,
            "type": "PASTE_NORMAL",
            "delimiter": ",",
            "coordinate": {
                "sheetId": tab_id,
                "rowIndex": row_index,
                "columnIndex": column_index,
            },
        }
    })
}

fn cell_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

impl<R: Runtime> SheetsService<R> {
    fn logger(&self) -> String {
        self.handle.logger()
    }

    /// The configured test sheet with its IDs and names resolved.
    pub fn test_sheet(&self) -> Result<SheetTarget> {
        let test = self
            .sheets_config()
            .map_err(|_| GapiError::NotConfigured("Test spreadsheet is not configured".to_string()))?
            .test_sheet;
        self.resolve(&test.spreadsheet_id, &test.tab_name, test.tab_id)
    }

    /// Looks up whatever is missing from a sheet description in the
    /// spreadsheet's metadata, reloading it once if the tab is unknown.
    pub fn resolve(&self, spreadsheet_id: &str, tab_name: &str, tab_id: Option<i64>) -> Result<SheetTarget> {
        let mut infos = self.load_infos(spreadsheet_id, false)?;
        let tab_id = match tab_id {
            Some(id) => id,
            None => match infos.sheet_named(tab_name) {
                Some(props) => props.sheet_id,
                None => {
                    infos = self.load_infos(spreadsheet_id, true)?;
                    infos
                        .sheet_named(tab_name)
                        .map(|p| p.sheet_id)
                        .ok_or_else(|| {
                            GapiError::Unexpected(format!(
                                "no sheet named {} in {}",
                                tab_name, spreadsheet_id
                            ))
                        })?
                }
            },
        };
        Ok(SheetTarget {
            spreadsheet_id: spreadsheet_id.to_string(),
            spreadsheet_name: infos.properties.title,
            tab_id,
            tab_name: tab_name.to_string(),
        })
    }

    /// Where writes aimed at `target` actually go.
    fn redirect(&self, target: &SheetTarget) -> Result<SheetTarget> {
        if self.force_test_spreadsheet() {
            self.test_sheet()
        } else {
            Ok(target.clone())
        }
    }

    fn batch_update(&self, spreadsheet_id: &str, requests: &[Value]) -> Result<Value> {
        let body = json!({ "requests": requests });
        let path = format!("v4/spreadsheets/{}:batchUpdate", spreadsheet_id);
        self.handle
            .call(|client| client.api.send_json(Method::POST, &path, &[], &body))
    }

    /// Clears any basic filter on the tab.
    pub fn remove_filter(&self, target: &SheetTarget, dryrun: bool) -> Result<()> {
        let target = self.redirect(target)?;
        self.clear_filter(&target, dryrun)
    }

    fn clear_filter(&self, target: &SheetTarget, dryrun: bool) -> Result<()> {
        info!(
            logger = %self.logger(),
            "Removing filter in {} ({})",
            target.spreadsheet_id,
            target.tab_id
        );
        if !dryrun {
            self.batch_update(
                &target.spreadsheet_id,
                &[json!({ "clearBasicFilter": { "sheetId": target.tab_id } })],
            )?;
        }
        Ok(())
    }

    /// Writes a value next to every row whose first cell in `source_range`
    /// is one of the keys.
    ///
    /// Returns the `(row index, value)` pairs written.
    pub fn bulk_update(
        &self,
        target: &SheetTarget,
        update: &BulkUpdate<'_>,
        options: WriteOptions,
    ) -> Result<Vec<(i64, String)>> {
        let target = self.redirect(target)?;
        if options.remove_filter {
            self.clear_filter(&target, options.dryrun)?;
        }
        let range = full_range(&target.tab_name, update.source_range);
        let logger = self.logger();

        self.handle.call(|client| {
            info!(
                logger = %logger,
                "Getting values from {} {} ({}) in {} ({})...",
                range,
                target.spreadsheet_id,
                target.spreadsheet_name,
                target.tab_id,
                target.tab_name
            );
            let result: BatchGet = client.api.get_json(
                &format!("v4/spreadsheets/{}/values:batchGet", target.spreadsheet_id),
                &[("ranges", range.as_str())],
            )?;
            let rows = result
                .value_ranges
                .into_iter()
                .next()
                .map(|r| r.values)
                .unwrap_or_default();
            if rows.is_empty() {
                info!(logger = %logger, "No input data to update");
                return Ok(Vec::new());
            }

            let mut index = Vec::new();
            for (idx, row) in rows.iter().enumerate() {
                let Some(first) = row.first() else { continue };
                let key = cell_text(first);
                if !update.keys.iter().any(|k| *k == key) {
                    continue;
                }
                if let Some(value) = update.value.for_key(&key) {
                    index.push((idx as i64 + update.destination_row_offset, value.to_string()));
                }
            }

            if index.is_empty() {
                info!(logger = %logger, "Nothing to update");
                return Ok(index);
            }

            info!(
                logger = %logger,
                "Writing to {} ({}) in {} ({})...",
                target.spreadsheet_id,
                target.spreadsheet_name,
                target.tab_id,
                target.tab_name
            );
            if options.dryrun {
                info!(logger = %logger, "Stubbed");
            } else {
                let requests: Vec<Value> = index
                    .iter()
                    .map(|(row, value)| {
                        paste_request(target.tab_id, *row, update.destination_column, value)
                    })
                    .collect();
                client.api.send_json::<_, Value>(
                    Method::POST,
                    &format!("v4/spreadsheets/{}:batchUpdate", target.spreadsheet_id),
                    &[],
                    &json!({ "requests": requests }),
                )?;
            }
            Ok(index)
        })
    }

    /// Empties every cell of `range`.
    pub fn bulk_clean(&self, target: &SheetTarget, range: &str, options: WriteOptions) -> Result<()> {
        let target = self.redirect(target)?;
        if options.remove_filter {
            self.clear_filter(&target, options.dryrun)?;
        }
        let range = full_range(&target.tab_name, range);
        info!(
            logger = %self.logger(),
            "Cleaning {} {} ({}) in {} ({})...",
            range,
            target.spreadsheet_id,
            target.spreadsheet_name,
            target.tab_id,
            target.tab_name
        );
        if options.dryrun {
            return Ok(());
        }
        let path = format!("v4/spreadsheets/{}/values:batchClear", target.spreadsheet_id);
        let body = json!({ "ranges": [range] });
        self.handle
            .call(|client| client.api.send_json::<_, Value>(Method::POST, &path, &[], &body))?;
        Ok(())
    }

    /// Pastes `rows` starting at the given cell (both indices 0-based).
    ///
    /// Retries start after a randomized delay so that concurrent writers do
    /// not hit the API in lockstep.
    pub fn bulk_write<I, Row, S>(
        &self,
        target: &SheetTarget,
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
        let target = self.redirect(target)?;
        let data = csv::write_rows(rows);
        if options.remove_filter {
            self.clear_filter(&target, options.dryrun)?;
        }
        info!(
            logger = %self.logger(),
            "Writing to {} ({}) in {} ({})...",
            target.spreadsheet_id,
            target.spreadsheet_name,
            target.tab_id,
            target.tab_name
        );
        if options.dryrun {
            return Ok(());
        }

        let policy = self.handle.config()?.retry.jittered();
        let path = format!("v4/spreadsheets/{}:batchUpdate", target.spreadsheet_id);
        let body = json!({
            "requests": [paste_request(target.tab_id, row_index, column_index, &data)]
        });
        self.handle.call_with_policy(policy, |client| {
            client.api.send_json::<_, Value>(Method::POST, &path, &[], &body)
        })?;
        Ok(())
    }

    /// Appends `rows` after the last non-empty row of `range`.
    pub fn bulk_append(
        &self,
        target: &SheetTarget,
        rows: &[Vec<String>],
        range: &str,
        options: WriteOptions,
    ) -> Result<()> {
        let target = self.redirect(target)?;
        if options.remove_filter {
            self.clear_filter(&target, options.dryrun)?;
        }
        let range = full_range(&target.tab_name, range);
        info!(
            logger = %self.logger(),
            "Appending to {} ({}) in {} ({})...",
            target.spreadsheet_id,
            target.spreadsheet_name,
            target.tab_id,
            target.tab_name
        );
        if options.dryrun {
            return Ok(());
        }
        let body = json!({
            "range": range,
            "majorDimension": "ROWS",
            "values": rows,
        });
        let append = format!("{}:append", range);
        self.handle.call(|client| {
            let url = client.api.segment_url(&[
                "v4",
                "spreadsheets",
                target.spreadsheet_id.as_str(),
                "values",
                append.as_str(),
            ])?;
            client.api.send_json::<_, Value>(
                Method::POST,
                &url,
                &[
                    ("valueInputOption", "USER_ENTERED"),
                    ("insertDataOption", "INSERT_ROWS"),
                ],
                &body,
            )
        })?;
        Ok(())
    }

    fn cache_file(&self, spreadsheet_id: &str) -> Option<PathBuf> {
        self.cache_location()
            .ok()
            .map(|dir| dir.join(format!("gs_infos-{}.json", spreadsheet_id)))
    }

    /// Spreadsheet title and tabs.
    ///
    /// When a cache location is configured, metadata is read from there
    /// unless `force` is set, and refreshed there after each download.
    pub fn load_infos(&self, spreadsheet_id: &str, force: bool) -> Result<SpreadsheetInfo> {
        let runtime = self.handle.runtime();
        let cache = self.cache_file(spreadsheet_id);

        if let Some(path) = cache.as_deref().filter(|p| !force && runtime.is_file(p)) {
            let contents = runtime.read_to_string(path)?;
            return Ok(serde_json::from_str(&contents)?);
        }

        let logger = self.logger();
        let path = format!("v4/spreadsheets/{}", spreadsheet_id);
        let infos: SpreadsheetInfo = self.handle.call(|client| {
            info!(logger = %logger, "Downloading cache info for {}...", spreadsheet_id);
            client.api.get_json(
                &path,
                &[("fields", "properties.title,sheets.properties(sheetId,title)")],
            )
        })?;

        if let Some(path) = cache {
            runtime.write(&path, &serde_json::to_vec(&infos)?)?;
        }
        Ok(infos)
    }

    /// Drops the cached metadata of `spreadsheet_id`, if any.
    pub fn clear_infos(&self, spreadsheet_id: &str) -> Result<()> {
        let runtime = self.handle.runtime();
        if let Some(path) = self.cache_file(spreadsheet_id).filter(|p| runtime.is_file(p)) {
            runtime.remove_file(&path)?;
        }
        Ok(())
    }

    /// Adds a tab. `properties` are extra `SheetProperties` fields such as
    /// `gridProperties`.
    pub fn create_sheet(
        &self,
        spreadsheet_id: &str,
        tab_name: &str,
        tab_id: Option<i64>,
        properties: Value,
        dryrun: bool,
    ) -> Result<SheetProperties> {
        info!(
            logger = %self.logger(),
            "Creating sheet {} in {}...",
            tab_name,
            spreadsheet_id
        );
        if dryrun {
            return Ok(SheetProperties {
                sheet_id: tab_id.unwrap_or_default(),
                title: tab_name.to_string(),
            });
        }

        let mut props = match properties {
            Value::Object(map) => map,
            _ => serde_json::Map::new(),
        };
        props.insert("title".to_string(), json!(tab_name));
        if let Some(id) = tab_id {
            props.insert("sheetId".to_string(), json!(id));
        }

        let reply = self.batch_update(spreadsheet_id, &[json!({ "addSheet": { "properties": props } })])?;
        let created = reply
            .pointer("/replies/0/addSheet/properties")
            .cloned()
            .ok_or_else(|| GapiError::Unexpected("addSheet returned no properties".to_string()))?;
        Ok(serde_json::from_value(created)?)
    }

    /// Raw CSV export of one tab.
    pub fn export_csv(&self, spreadsheet_id: &str, tab_id: i64) -> Result<Vec<u8>> {
        let gid = tab_id.to_string();
        self.handle.call(|client| {
            let mut buffer = Vec::new();
            let (_, content_type) = client.api.download(
                &client.export_url(spreadsheet_id),
                &[("format", "csv"), ("gid", gid.as_str())],
                &mut buffer,
            )?;
            if !content_type.is_some_and(|t| t.starts_with("text/csv")) {
                return Err(GapiError::Unexpected("Bad format received".to_string()));
            }
            Ok(buffer)
        })
    }

    /// Saves the CSV export of one tab to `to`.
    pub fn download_csv(&self, spreadsheet_id: &str, tab_id: i64, to: &Path) -> Result<()> {
        info!(logger = %self.logger(), "Downloading {}...", to.display());
        let data = self.export_csv(spreadsheet_id, tab_id)?;
        self.handle.runtime().write(to, &data)?;
        Ok(())
    }

    /// Rows of the CSV export of one tab.
    pub fn read_rows(&self, spreadsheet_id: &str, tab_id: i64) -> Result<Vec<Vec<String>>> {
        let data = self.export_csv(spreadsheet_id, tab_id)?;
        Ok(csv::parse(&String::from_utf8_lossy(&data)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::MockRuntime;
    use crate::service::tests::key_runtime;
    use crate::sheets::client::tests::{TEST_SPREADSHEET, connection_check_mock, sheets_config, sheets_service};
    use mockall::predicate::eq;
    use mockito::Matcher;

    fn target() -> SheetTarget {
        SheetTarget {
            spreadsheet_id: "ss1".to_string(),
            spreadsheet_name: "Budget".to_string(),
            tab_id: 3,
            tab_name: "Data".to_string(),
        }
    }

    fn service(server: &mut mockito::Server, runtime: MockRuntime) -> crate::sheets::SheetsService<MockRuntime> {
        connection_check_mock(server);
        sheets_service(&server.url(), runtime, sheets_config())
    }

    #[test]
    fn test_full_range() {
        assert_eq!(full_range("Data", "A2:C"), "'Data'!A2:C");
        assert_eq!(full_range("Bob's", "A1"), "'Bob''s'!A1");
        assert_eq!(full_range("Data", "'Other'!Z3:Z"), "'Other'!Z3:Z");
    }

    #[test]
    fn test_remove_filter() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("POST", "/v4/spreadsheets/ss1:batchUpdate")
            .match_body(Matcher::Json(json!({
                "requests": [{"clearBasicFilter": {"sheetId": 3}}]
            })))
            .with_status(200)
            .with_body("{}")
            .create();

        let service = service(&mut server, key_runtime());
        service.remove_filter(&target(), false).unwrap();
        mock.assert();
    }

    #[test]
    fn test_dryrun_does_not_write() {
        let mut server = mockito::Server::new();
        let writes = server
            .mock("POST", Matcher::Any)
            .expect(0)
            .create();

        let service = service(&mut server, key_runtime());
        let options = WriteOptions::dryrun(true);
        service.remove_filter(&target(), true).unwrap();
        service.bulk_clean(&target(), "A2:C", options).unwrap();
        service
            .bulk_write(&target(), vec![vec!["a"]], 0, 0, options)
            .unwrap();
        service
            .bulk_append(&target(), &[vec!["x".to_string()]], "A1:B", options)
            .unwrap();

        writes.assert();
    }

    #[test]
    fn test_bulk_update_writes_matching_keys() {
        let mut server = mockito::Server::new();
        let read = server
            .mock("GET", "/v4/spreadsheets/ss1/values:batchGet")
            .match_query(Matcher::UrlEncoded("ranges".into(), "'Data'!Z3:Z".into()))
            .with_status(200)
            .with_body(r#"{"valueRanges": [{"values": [["k1"], [], ["k2"], ["other"], [7]]}]}"#)
            .create();
        let write = server
            .mock("POST", "/v4/spreadsheets/ss1:batchUpdate")
            .match_body(Matcher::Json(json!({
                "requests": [
                    {"pasteData": {"data": "done", "type": "PASTE_NORMAL", "delimiter": ",",
                        "coordinate": {"sheetId": 3, "rowIndex": 2, "columnIndex": 4}}},
                    {"pasteData": {"data": "done", "type": "PASTE_NORMAL", "delimiter": ",",
                        "coordinate": {"sheetId": 3, "rowIndex": 4, "columnIndex": 4}}},
                    {"pasteData": {"data": "done", "type": "PASTE_NORMAL", "delimiter": ",",
                        "coordinate": {"sheetId": 3, "rowIndex": 6, "columnIndex": 4}}},
                ]
            })))
            .with_status(200)
            .with_body("{}")
            .create();

        let service = service(&mut server, key_runtime());
        let update = BulkUpdate {
            keys: &["k1", "k2", "7"],
            source_range: "Z3:Z",
            destination_row_offset: 2,
            destination_column: 4,
            value: UpdateValue::Same("done".to_string()),
        };
        let written = service
            .bulk_update(&target(), &update, WriteOptions::default().with_remove_filter(false))
            .unwrap();

        read.assert();
        write.assert();
        assert_eq!(
            written,
            vec![
                (2, "done".to_string()),
                (4, "done".to_string()),
                (6, "done".to_string())
            ]
        );
    }

    #[test]
    fn test_bulk_update_per_key_skips_unknown_keys() {
        let mut server = mockito::Server::new();
        let _read = server
            .mock("GET", "/v4/spreadsheets/ss1/values:batchGet")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"valueRanges": [{"values": [["a"], ["b"]]}]}"#)
            .create();
        let write = server
            .mock("POST", "/v4/spreadsheets/ss1:batchUpdate")
            .match_body(Matcher::Regex(r#""data":"A-value""#.to_string()))
            .with_status(200)
            .with_body("{}")
            .create();

        let service = service(&mut server, key_runtime());
        let values = HashMap::from([("a".to_string(), "A-value".to_string())]);
        let update = BulkUpdate {
            keys: &["a", "b"],
            source_range: "A1:A",
            destination_row_offset: 0,
            destination_column: 1,
            value: UpdateValue::PerKey(values),
        };
        let written = service
            .bulk_update(&target(), &update, WriteOptions::default().with_remove_filter(false))
            .unwrap();

        write.assert();
        assert_eq!(written, vec![(0, "A-value".to_string())]);
    }

    #[test]
    fn test_bulk_update_without_data() {
        let mut server = mockito::Server::new();
        let _read = server
            .mock("GET", "/v4/spreadsheets/ss1/values:batchGet")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"valueRanges": [{}]}"#)
            .create();
        let write = server
            .mock("POST", "/v4/spreadsheets/ss1:batchUpdate")
            .expect(0)
            .create();

        let service = service(&mut server, key_runtime());
        let update = BulkUpdate {
            keys: &["a"],
            source_range: "A1:A",
            destination_row_offset: 0,
            destination_column: 1,
            value: UpdateValue::Same("x".to_string()),
        };
        let written = service
            .bulk_update(&target(), &update, WriteOptions::default().with_remove_filter(false))
            .unwrap();

        write.assert();
        assert!(written.is_empty());
    }

    #[test]
    fn test_bulk_clean_removes_filter_first() {
        let mut server = mockito::Server::new();
        let filter = server
            .mock("POST", "/v4/spreadsheets/ss1:batchUpdate")
            .match_body(Matcher::Json(json!({
                "requests": [{"clearBasicFilter": {"sheetId": 3}}]
            })))
            .with_status(200)
            .with_body("{}")
            .create();
        let clear = server
            .mock("POST", "/v4/spreadsheets/ss1/values:batchClear")
            .match_body(Matcher::Json(json!({"ranges": ["'Data'!A2:C"]})))
            .with_status(200)
            .with_body("{}")
            .create();

        let service = service(&mut server, key_runtime());
        service
            .bulk_clean(&target(), "A2:C", WriteOptions::default())
            .unwrap();

        filter.assert();
        clear.assert();
    }

    #[test]
    fn test_bulk_write_pastes_csv() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("POST", "/v4/spreadsheets/ss1:batchUpdate")
            .match_body(Matcher::Json(json!({
                "requests": [{"pasteData": {
                    "data": "a,\"b,c\"\r\n1,2\r\n",
                    "type": "PASTE_NORMAL",
                    "delimiter": ",",
                    "coordinate": {"sheetId": 3, "rowIndex": 1, "columnIndex": 0},
                }}]
            })))
            .with_status(200)
            .with_body("{}")
            .create();

        let service = service(&mut server, key_runtime());
        service
            .bulk_write(
                &target(),
                vec![vec!["a", "b,c"], vec!["1", "2"]],
                1,
                0,
                WriteOptions::default().with_remove_filter(false),
            )
            .unwrap();

        mock.assert();
    }

    #[test]
    fn test_bulk_write_retries_after_jittered_delay() {
        let mut server = mockito::Server::new();
        let failing = server
            .mock("POST", "/v4/spreadsheets/ss1:batchUpdate")
            .with_status(500)
            .expect(1)
            .create();
        let ok = server
            .mock("POST", "/v4/spreadsheets/ss1:batchUpdate")
            .with_status(200)
            .with_body("{}")
            .expect(1)
            .create();

        let mut runtime = MockRuntime::new();
        runtime
            .expect_read_to_string()
            .returning(|_| Ok(crate::auth::tests::KEY_JSON.to_string()));
        // configured delay is 0, so the jittered one is the 2 second floor
        // or up to 5 seconds
        runtime
            .expect_sleep()
            .withf(|d| d.as_secs_f64() >= 2.0 && d.as_secs_f64() <= 5.0)
            .times(1)
            .return_const(());

        let service = service(&mut server, runtime);
        service
            .bulk_write(
                &target(),
                vec![vec!["a"]],
                0,
                0,
                WriteOptions::default().with_remove_filter(false),
            )
            .unwrap();

        failing.assert();
        ok.assert();
    }

    #[test]
    fn test_bulk_append() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("POST", "/v4/spreadsheets/ss1/values/'Data'!A1:B:append")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("valueInputOption".into(), "USER_ENTERED".into()),
                Matcher::UrlEncoded("insertDataOption".into(), "INSERT_ROWS".into()),
            ]))
            .match_body(Matcher::Json(json!({
                "range": "'Data'!A1:B",
                "majorDimension": "ROWS",
                "values": [["x", "y"]],
            })))
            .with_status(200)
            .with_body("{}")
            .create();

        let service = service(&mut server, key_runtime());
        service
            .bulk_append(
                &target(),
                &[vec!["x".to_string(), "y".to_string()]],
                "A1:B",
                WriteOptions::default().with_remove_filter(false),
            )
            .unwrap();

        mock.assert();
    }

    #[test]
    fn test_forced_test_spreadsheet_redirects_writes() {
        let mut server = mockito::Server::new();
        connection_check_mock(&mut server);
        let infos = server
            .mock("GET", format!("/v4/spreadsheets/{}", TEST_SPREADSHEET).as_str())
            .match_query(Matcher::UrlEncoded(
                "fields".into(),
                "properties.title,sheets.properties(sheetId,title)".into(),
            ))
            .with_status(200)
            .with_body(r#"{"properties": {"title": "Sandbox"}, "sheets": []}"#)
            .create();
        let redirected = server
            .mock("POST", format!("/v4/spreadsheets/{}:batchUpdate", TEST_SPREADSHEET).as_str())
            .match_body(Matcher::Json(json!({
                "requests": [{"clearBasicFilter": {"sheetId": 7}}]
            })))
            .with_status(200)
            .with_body("{}")
            .create();
        let original = server
            .mock("POST", "/v4/spreadsheets/ss1:batchUpdate")
            .expect(0)
            .create();

        let service = sheets_service(
            &server.url(),
            key_runtime(),
            sheets_config().with_force_test_spreadsheet(true),
        );
        service.remove_filter(&target(), false).unwrap();

        infos.assert();
        redirected.assert();
        original.assert();
    }

    #[test]
    fn test_load_infos_and_resolve() {
        let mut server = mockito::Server::new();
        let infos = server
            .mock("GET", "/v4/spreadsheets/ss1")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(
                r#"{"properties": {"title": "Budget"},
                    "sheets": [{"properties": {"sheetId": 0, "title": "Summary"}},
                               {"properties": {"sheetId": 42, "title": "Data"}}]}"#,
            )
            .expect(1)
            .create();

        let service = service(&mut server, key_runtime());
        let resolved = service.resolve("ss1", "Data", None).unwrap();

        infos.assert();
        assert_eq!(
            resolved,
            SheetTarget {
                spreadsheet_id: "ss1".to_string(),
                spreadsheet_name: "Budget".to_string(),
                tab_id: 42,
                tab_name: "Data".to_string(),
            }
        );
    }

    #[test]
    fn test_resolve_unknown_tab_reloads_once() {
        let mut server = mockito::Server::new();
        let infos = server
            .mock("GET", "/v4/spreadsheets/ss1")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"properties": {"title": "Budget"}, "sheets": []}"#)
            .expect(2)
            .create();

        let service = service(&mut server, key_runtime());
        let err = service.resolve("ss1", "Nope", None).unwrap_err();

        infos.assert();
        assert!(err.to_string().contains("Nope"));
    }

    #[test]
    fn test_load_infos_uses_cache() {
        let server = mockito::Server::new();
        let mut runtime = MockRuntime::new();
        runtime.expect_is_dir().return_const(true);
        runtime
            .expect_is_file()
            .with(eq(PathBuf::from("/cache/gs_infos-ss1.json")))
            .return_const(true);
        runtime
            .expect_read_to_string()
            .with(eq(PathBuf::from("/cache/gs_infos-ss1.json")))
            .returning(|_| {
                Ok(r#"{"properties": {"title": "Cached"}, "sheets": []}"#.to_string())
            });

        let service = sheets_service(
            &server.url(),
            runtime,
            sheets_config().with_cache_location("/cache"),
        );
        let infos = service.load_infos("ss1", false).unwrap();
        assert_eq!(infos.properties.title, "Cached");
    }

    #[test]
    fn test_load_infos_force_refreshes_cache() {
        let mut server = mockito::Server::new();
        let fetch = server
            .mock("GET", "/v4/spreadsheets/ss1")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"properties": {"title": "Fresh"}, "sheets": []}"#)
            .create();

        let mut runtime = key_runtime();
        runtime.expect_is_dir().return_const(true);
        runtime
            .expect_write()
            .withf(|path, contents| {
                path == Path::new("/cache/gs_infos-ss1.json")
                    && String::from_utf8_lossy(contents).contains("Fresh")
            })
            .times(1)
            .returning(|_, _| Ok(()));

        let service = service(&mut server, runtime);
        service.configure(
            crate::config::ServiceConfig::new("/keys/sa.json")
                .with_retry_delay(0.0)
                .with_api_base(Some(server.url())),
            sheets_config().with_cache_location("/cache"),
        );
        let infos = service.load_infos("ss1", true).unwrap();

        fetch.assert();
        assert_eq!(infos.properties.title, "Fresh");
    }

    #[test]
    fn test_clear_infos_removes_cache_file() {
        let server = mockito::Server::new();
        let mut runtime = MockRuntime::new();
        runtime.expect_is_dir().return_const(true);
        runtime
            .expect_is_file()
            .with(eq(PathBuf::from("/cache/gs_infos-ss1.json")))
            .return_const(true);
        runtime
            .expect_remove_file()
            .with(eq(PathBuf::from("/cache/gs_infos-ss1.json")))
            .times(1)
            .returning(|_| Ok(()));

        let service = sheets_service(
            &server.url(),
            runtime,
            sheets_config().with_cache_location("/cache"),
        );
        service.clear_infos("ss1").unwrap();
    }

    #[test]
    fn test_clear_infos_without_cache_does_nothing() {
        let server = mockito::Server::new();
        let mut runtime = MockRuntime::new();
        runtime.expect_remove_file().never();

        let service = sheets_service(&server.url(), runtime, sheets_config());
        service.clear_infos("ss1").unwrap();
    }

    #[test]
    fn test_create_sheet() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("POST", "/v4/spreadsheets/ss1:batchUpdate")
            .match_body(Matcher::Json(json!({
                "requests": [{"addSheet": {"properties": {
                    "title": "New",
                    "gridProperties": {"rowCount": 1, "columnCount": 1},
                }}}]
            })))
            .with_status(200)
            .with_body(
                r#"{"replies": [{"addSheet": {"properties": {"sheetId": 99, "title": "New", "index": 2}}}]}"#,
            )
            .create();

        let service = service(&mut server, key_runtime());
        let created = service
            .create_sheet(
                "ss1",
                "New",
                None,
                json!({"gridProperties": {"rowCount": 1, "columnCount": 1}}),
                false,
            )
            .unwrap();

        mock.assert();
        assert_eq!(
            created,
            SheetProperties {
                sheet_id: 99,
                title: "New".to_string()
            }
        );
    }

    #[test]
    fn test_download_csv() {
        let mut server = mockito::Server::new();
        let export = server
            .mock("GET", "/spreadsheets/d/ss1/export")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("format".into(), "csv".into()),
                Matcher::UrlEncoded("gid".into(), "3".into()),
            ]))
            .match_header("authorization", "Bearer sheets-token")
            .with_status(200)
            .with_header("content-type", "text/csv")
            .with_body("a,b\n1,2\n")
            .create();

        let mut runtime = key_runtime();
        runtime
            .expect_write()
            .withf(|path, contents| path == Path::new("/backups/out.csv") && contents == b"a,b\n1,2\n")
            .times(1)
            .returning(|_, _| Ok(()));

        let service = service(&mut server, runtime);
        service
            .download_csv("ss1", 3, Path::new("/backups/out.csv"))
            .unwrap();

        export.assert();
    }

    #[test]
    fn test_export_rejects_non_csv() {
        let mut server = mockito::Server::new();
        let export = server
            .mock("GET", "/spreadsheets/d/ss1/export")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_header("content-type", "text/html")
            .with_body("<html>login</html>")
            .expect(2)
            .create();

        let service = service(&mut server, key_runtime());
        service.configure(
            crate::config::ServiceConfig::new("/keys/sa.json")
                .with_retry(crate::retry::RetryPolicy::new(1, 0.0))
                .with_api_base(Some(server.url())),
            sheets_config(),
        );
        let err = service.export_csv("ss1", 3).unwrap_err();

        export.assert();
        assert_eq!(err.to_string(), "Bad format received");
    }

    #[test]
    fn test_read_rows() {
        let mut server = mockito::Server::new();
        let _export = server
            .mock("GET", "/spreadsheets/d/ss1/export")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_header("content-type", "text/csv")
            .with_body("name,n\r\n\"Doe, J\",1\r\n")
            .create();

        let service = service(&mut server, key_runtime());
        let rows = service.read_rows("ss1", 3).unwrap();
        assert_eq!(rows, vec![vec!["name", "n"], vec!["Doe, J", "1"]]);
    }
}
