use anyhow::{Context, Result, bail};
use std::path::Path;

use super::Config;
use crate::{
    runtime::Runtime,
    sheets::{Range, SheetRef, SheetsConfig, SheetsService, Spreadsheet, csv},
};

/// A service whose connection check reads the spreadsheet being worked on.
fn service<R: Runtime>(
    config: Config<R>,
    spreadsheet_id: &str,
    cache_dir: Option<&Path>,
) -> SheetsService<R> {
    let mut sheets = SheetsConfig::new(SheetRef::new(spreadsheet_id, ""));
    if let Some(dir) = cache_dir {
        sheets = sheets.with_cache_location(dir);
    }
    let service = SheetsService::new(config.runtime, config.tokens);
    service.configure(config.service, sheets);
    service
}

/// Print the tabs of a spreadsheet, one `gid<TAB>title` line each
#[tracing::instrument(skip(config))]
pub fn tabs<R: Runtime>(config: Config<R>, spreadsheet_id: &str, cache_dir: Option<&Path>) -> Result<()> {
    let service = service(config, spreadsheet_id, cache_dir);
    let mut spreadsheet = Spreadsheet::new(&service, spreadsheet_id);
    spreadsheet
        .load_infos(false)
        .with_context(|| format!("Failed to load spreadsheet {}", spreadsheet_id))?;

    println!("{}", spreadsheet.name().unwrap_or(spreadsheet_id));
    for (title, gid) in spreadsheet.tabs() {
        if let Some(gid) = gid {
            println!("{}\t{}", gid, title);
        }
    }
    Ok(())
}

/// Save one tab as CSV
#[tracing::instrument(skip(config))]
pub fn download<R: Runtime>(
    config: Config<R>,
    spreadsheet_id: &str,
    tab_name: &str,
    destination: &Path,
    cache_dir: Option<&Path>,
) -> Result<()> {
    let service = service(config, spreadsheet_id, cache_dir);
    let mut spreadsheet = Spreadsheet::new(&service, spreadsheet_id);
    let sheet = spreadsheet
        .sheet(tab_name)
        .with_context(|| format!("Failed to find tab {} in {}", tab_name, spreadsheet_id))?;
    sheet
        .download(destination)
        .with_context(|| format!("Failed to download {}", tab_name))?;
    println!("{}", destination.display());
    Ok(())
}

/// Append the rows of a local CSV file after the table found in `range`
///
/// Rows wider than a range with a last column are refused before anything
/// is sent.
#[tracing::instrument(skip(config))]
pub fn append<R: Runtime>(
    config: Config<R>,
    spreadsheet_id: &str,
    tab_name: &str,
    range: &str,
    source: &Path,
    dryrun: bool,
) -> Result<()> {
    let service = service(config, spreadsheet_id, None);
    let text = service
        .handle()
        .runtime()
        .read_to_string(source)
        .with_context(|| format!("Failed to read {}", source.display()))?;
    let rows = csv::parse(&text);
    check_width(range, &rows)?;

    let mut spreadsheet = Spreadsheet::new(&service, spreadsheet_id);
    let sheet = spreadsheet
        .sheet(tab_name)
        .with_context(|| format!("Failed to find tab {} in {}", tab_name, spreadsheet_id))?;
    sheet
        .bulk_append(&rows, range, dryrun)
        .with_context(|| format!("Failed to append to {}", tab_name))?;
    println!("Appended {} row(s) to {}.", rows.len(), tab_name);
    Ok(())
}

fn check_width(range: &str, rows: &[Vec<String>]) -> Result<()> {
    // A tab prefix such as 'Data'!A1:C does not change the shape.
    let cells = range.rsplit('!').next().unwrap_or(range);
    let bounds: Range = cells.parse().with_context(|| format!("Invalid range {}", range))?;
    let width = rows.iter().map(Vec::len).max().unwrap_or(0) as u32;
    if width == 0 {
        return Ok(());
    }
    let data = Range::new(bounds.start_col, bounds.start_row, Some(bounds.start_col + width - 1), None);
    if !bounds.matches(&data) {
        bail!(
            "Rows are {} column(s) wide but {} spans {}",
            width,
            range,
            bounds.width().unwrap_or_default()
        );
    }
    Ok(())
}
