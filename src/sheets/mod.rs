//! Google Sheets integration.

mod client;
pub mod csv;
mod operations;
mod range;
mod spreadsheet;

pub use client::{
    EXPORT_BASE, SHEETS_API_BASE, SHEETS_SCOPES, SheetRef, SheetsClient, SheetsConfig,
    SheetsConnector, SheetsService,
};
pub use operations::{
    BulkUpdate, SheetInfo, SheetProperties, SheetTarget, SpreadsheetInfo, SpreadsheetProperties,
    UpdateValue, WriteOptions, full_range,
};
pub use range::{Range, column_name};
pub use spreadsheet::{STUB_SPREADSHEET_ID, STUB_TAB_NAME, Sheet, Spreadsheet};
