//! Cell ranges in A1 notation.
//!
//! Ranges may be open-ended: `A1:R` has no last row, `A1:5` no last
//! column, and `A1:*` (or a lone `A1`) neither.

use std::fmt;
use std::str::FromStr;

use crate::error::GapiError;

/// A block of cells. Indices are 0-based and inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Range {
    pub start_col: u32,
    pub start_row: u32,
    pub end_col: Option<u32>,
    pub end_row: Option<u32>,
}

impl Range {
    pub fn new(start_col: u32, start_row: u32, end_col: Option<u32>, end_row: Option<u32>) -> Self {
        Self {
            start_col,
            start_row,
            end_col,
            end_row,
        }
    }

    /// Number of columns, if bounded.
    pub fn width(&self) -> Option<u32> {
        self.end_col.map(|end| (end + 1).saturating_sub(self.start_col))
    }

    /// Number of rows, if bounded.
    pub fn height(&self) -> Option<u32> {
        self.end_row.map(|end| (end + 1).saturating_sub(self.start_row))
    }

    /// Whether both ranges have the same shape. Unbounded dimensions match
    /// anything.
    pub fn matches(&self, other: &Range) -> bool {
        let same = |a: Option<u32>, b: Option<u32>| match (a, b) {
            (Some(a), Some(b)) => a == b,
            _ => true,
        };
        same(self.width(), other.width()) && same(self.height(), other.height())
    }
}

/// `0` is `A`, `25` is `Z`, `26` is `AA`.
pub fn column_name(index: u32) -> String {
    let mut name = Vec::new();
    let mut n = index + 1;
    while n > 0 {
        let rem = (n - 1) % 26;
        name.push(b'A' + rem as u8);
        n = (n - 1) / 26;
    }
    name.iter().rev().map(|&b| b as char).collect()
}

fn column_index(letters: &str) -> Option<u32> {
    let n = letters.chars().try_fold(0u32, |acc, c| {
        let letter = c.to_ascii_uppercase();
        if !letter.is_ascii_uppercase() {
            return None;
        }
        acc.checked_mul(26)?.checked_add(letter as u32 - 'A' as u32 + 1)
    })?;
    n.checked_sub(1)
}

// 1-based row label to 0-based index.
fn row_index(digits: &str) -> Option<u32> {
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse::<u32>().ok()?.checked_sub(1)
}

/// Splits `AB12` into its column and row parts; either may be empty.
fn split_cell(cell: &str) -> (&str, &str) {
    let at = cell
        .find(|c: char| !c.is_ascii_alphabetic())
        .unwrap_or(cell.len());
    cell.split_at(at)
}

impl FromStr for Range {
    type Err = GapiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || GapiError::InvalidInput(format!("invalid A1 range '{}'", s));

        let (start, end) = match s.trim().split_once(':') {
            Some((start, end)) => (start, Some(end)),
            None => (s.trim(), None),
        };
        let (col, row) = split_cell(start);
        if col.is_empty() || row.is_empty() {
            return Err(invalid());
        }
        let start_col = column_index(col).ok_or_else(invalid)?;
        let start_row = row_index(row).ok_or_else(invalid)?;

        let (end_col, end_row) = match end {
            None | Some("*") => (None, None),
            Some(end) => {
                let (col, row) = split_cell(end);
                let end_col = match col {
                    "" => None,
                    col => Some(column_index(col).ok_or_else(invalid)?),
                };
                let end_row = match row {
                    "" => None,
                    row => Some(row_index(row).ok_or_else(invalid)?),
                };
                if end_col.is_none() && end_row.is_none() {
                    return Err(invalid());
                }
                (end_col, end_row)
            }
        };

        if end_col.is_some_and(|c| c < start_col) || end_row.is_some_and(|r| r < start_row) {
            return Err(invalid());
        }
        Ok(Range::new(start_col, start_row, end_col, end_row))
    }
}

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}:", column_name(self.start_col), self.start_row + 1)?;
        match (self.end_col, self.end_row) {
            (Some(col), Some(row)) => write!(f, "{}{}", column_name(col), row + 1),
            (Some(col), None) => write!(f, "{}", column_name(col)),
            (None, Some(row)) => write!(f, "{}", row + 1),
            (None, None) => write!(f, "*"),
        }
    }
}
