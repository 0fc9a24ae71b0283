//! Generic HTML table extraction.
//!
//! The portal returns almost everything as `<table>` markup whose shape varies
//! from page to page: some tables have a `<thead>` of `<th>`, some a `<thead>`
//! of `<td>`, some no `<thead>` at all, and body rows freely mix `<th>` and
//! `<td>`. [`extract_table`] normalises all of these into header-keyed records
//! so that the markup assumptions live in one place.

use std::collections::HashMap;

use scraper::{ElementRef, Html, Selector};
use serde::Serialize;

use crate::text_manipulators::{extract_text, first_href};

/// One table cell: its trimmed text and the first link found inside it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Cell {
    pub text: String,
    pub url: Option<String>,
}

impl Cell {
    fn from_element(cell: ElementRef) -> Self {
        Self {
            text: extract_text(cell),
            url: first_href(cell),
        }
    }
}

/// One body row keyed by column header.
///
/// Records are sparse: a row shorter than the header row simply has no entry
/// for the missing columns.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct TableRecord {
    cells: HashMap<String, Cell>,
}

impl TableRecord {
    pub fn get(&self, header: &str) -> Option<&Cell> {
        self.cells.get(header)
    }

    pub fn text(&self, header: &str) -> Option<&str> {
        self.get(header).map(|cell| cell.text.as_str())
    }

    /// Text of the column, `None` when absent or blank.
    pub fn non_empty(&self, header: &str) -> Option<&str> {
        self.text(header).filter(|text| !text.is_empty())
    }

    pub fn url(&self, header: &str) -> Option<&str> {
        self.get(header).and_then(|cell| cell.url.as_deref())
    }

    pub fn headers(&self) -> impl Iterator<Item = &str> {
        self.cells.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

impl FromIterator<(String, Cell)> for TableRecord {
    fn from_iter<I: IntoIterator<Item = (String, Cell)>>(iter: I) -> Self {
        Self {
            cells: iter.into_iter().collect(),
        }
    }
}

fn child_elements<'a>(
    parent: ElementRef<'a>,
    names: &'static [&'static str],
) -> impl Iterator<Item = ElementRef<'a>> {
    parent
        .children()
        .filter_map(ElementRef::wrap)
        .filter(move |el| names.contains(&el.value().name()))
}

fn section_rows<'a>(
    table: ElementRef<'a>,
    section: &'static [&'static str],
) -> impl Iterator<Item = ElementRef<'a>> {
    child_elements(table, section).flat_map(|section| child_elements(section, &["tr"]))
}

/// Body rows of `table` as positional cells, in document order.
///
/// Header-styled cells inside the body are kept: the portal marks up label
/// columns with `<th>` in the middle of data rows.
pub fn table_rows(table: ElementRef) -> Vec<Vec<Cell>> {
    section_rows(table, &["tbody"])
        .map(|row| child_elements(row, &["td", "th"]).map(Cell::from_element).collect())
        .collect()
}

fn thead_names(table: ElementRef, cell: &'static [&'static str]) -> Vec<String> {
    section_rows(table, &["thead"])
        .flat_map(|row| child_elements(row, cell).map(extract_text))
        .collect()
}

/// Converts a `<table>` element into records keyed by column header.
///
/// Headers come from the first non-empty of: the `<thead>` `<th>` cells, the
/// `<thead>` `<td>` cells, or the first body row (which is then not a record).
/// Duplicate header names keep the last cell of the row.
pub fn extract_table(table: ElementRef) -> Vec<TableRecord> {
    let mut rows = table_rows(table);

    let mut headers = thead_names(table, &["th"]);
    if headers.is_empty() {
        headers = thead_names(table, &["td"]);
    }
    if headers.is_empty() && !rows.is_empty() {
        headers = rows.remove(0).into_iter().map(|cell| cell.text).collect();
    }

    rows.into_iter()
        .map(|row| headers.iter().cloned().zip(row).collect())
        .collect()
}

/// Extracts the first table of `document` matching `selector`, or `None` when
/// the page has no such table.
pub fn extract_first(document: &Html, selector: &Selector) -> Option<Vec<TableRecord>> {
    document
        .select(selector)
        .find(|el| el.value().name() == "table")
        .map(extract_table)
}
