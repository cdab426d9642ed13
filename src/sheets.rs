use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use anyhow::Context;
use calamine::{open_workbook_auto, Data, Reader, Sheets};

/// One sheet row, keyed by the header-row column names.
pub type RawRow = HashMap<String, String>;

/// An ordered set of worksheets, one per student group.
///
/// Two on-disk shapes are accepted:
/// - a directory of `*.csv` files: one sheet per file, title = file stem,
///   order = filename sort;
/// - a spreadsheet file (xlsx/xls/ods) read through calamine, keeping the
///   workbook's own sheet order.
pub struct Workbook {
    inner: Inner,
}

enum Inner {
    CsvDir { sheets: Vec<(String, PathBuf)> },
    Spreadsheet { book: Box<Sheets<BufReader<File>>>, titles: Vec<String> },
}

impl Workbook {
    pub fn open(path: &Path) -> anyhow::Result<Workbook> {
        if path.is_dir() {
            let mut sheets: Vec<(String, PathBuf)> = Vec::new();
            for ent in std::fs::read_dir(path)
                .with_context(|| format!("cannot read workbook folder {}", path.display()))?
            {
                let p = ent?.path();
                if !p.is_file() {
                    continue;
                }
                let is_csv = p
                    .extension()
                    .and_then(|e| e.to_str())
                    .map(|e| e.eq_ignore_ascii_case("csv"))
                    .unwrap_or(false);
                if !is_csv {
                    continue;
                }
                let title = p
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .unwrap_or("")
                    .to_string();
                sheets.push((title, p));
            }
            anyhow::ensure!(
                !sheets.is_empty(),
                "no .csv sheets found in {}",
                path.display()
            );
            sheets.sort_by(|a, b| a.1.cmp(&b.1));
            Ok(Workbook {
                inner: Inner::CsvDir { sheets },
            })
        } else {
            let book = open_workbook_auto(path)
                .with_context(|| format!("cannot open workbook {}", path.display()))?;
            let titles = book.sheet_names().to_owned();
            Ok(Workbook {
                inner: Inner::Spreadsheet {
                    book: Box::new(book),
                    titles,
                },
            })
        }
    }

    pub fn sheet_titles(&self) -> Vec<String> {
        match &self.inner {
            Inner::CsvDir { sheets } => sheets.iter().map(|(t, _)| t.clone()).collect(),
            Inner::Spreadsheet { titles, .. } => titles.clone(),
        }
    }

    /// Materializes one sheet's data rows as header->value maps. The header
    /// row itself is consumed here, so callers see data rows only.
    pub fn rows(&mut self, title: &str) -> anyhow::Result<Vec<RawRow>> {
        match &mut self.inner {
            Inner::CsvDir { sheets } => {
                let path = sheets
                    .iter()
                    .find(|(t, _)| t == title)
                    .map(|(_, p)| p.clone())
                    .with_context(|| format!("no such sheet: {title}"))?;
                read_csv_rows(&path)
            }
            Inner::Spreadsheet { book, .. } => {
                let range = book
                    .worksheet_range(title)
                    .with_context(|| format!("cannot read sheet {title}"))?;
                let mut rows = range.rows();
                let Some(header_cells) = rows.next() else {
                    return Ok(Vec::new());
                };
                let headers: Vec<String> = header_cells
                    .iter()
                    .map(|c| cell_to_string(c).trim().to_string())
                    .collect();
                let mut out = Vec::new();
                for cells in rows {
                    let mut row = RawRow::new();
                    for (i, h) in headers.iter().enumerate() {
                        if h.is_empty() {
                            continue;
                        }
                        let v = cells.get(i).map(cell_to_string).unwrap_or_default();
                        row.insert(h.clone(), v);
                    }
                    out.push(row);
                }
                Ok(out)
            }
        }
    }
}

fn read_csv_rows(path: &Path) -> anyhow::Result<Vec<RawRow>> {
    let mut rdr = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("cannot open sheet {}", path.display()))?;
    let headers: Vec<String> = rdr
        .headers()
        .with_context(|| format!("cannot read header row of {}", path.display()))?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();

    let mut out = Vec::new();
    for rec in rdr.records() {
        let rec = rec.with_context(|| format!("cannot read row of {}", path.display()))?;
        let mut row = RawRow::new();
        for (i, h) in headers.iter().enumerate() {
            if h.is_empty() {
                continue;
            }
            row.insert(h.clone(), rec.get(i).unwrap_or("").to_string());
        }
        out.push(row);
    }
    Ok(out)
}

// Sheets store room numbers and the like as numeric cells; render integral
// floats without the trailing ".0".
fn cell_to_string(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.clone(),
        Data::Int(i) => i.to_string(),
        Data::Float(f) => {
            if f.fract() == 0.0 && f.abs() < 1e15 {
                format!("{}", *f as i64)
            } else {
                f.to_string()
            }
        }
        Data::Bool(b) => b.to_string(),
        other => other.to_string(),
    }
}
