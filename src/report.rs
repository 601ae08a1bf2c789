use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rust_xlsxwriter::{Color, Format, Workbook};
use serde::Serialize;
use tracing::info;

use crate::analysis::extract::CompetitionTable;
use crate::analysis::merge::MergedTable;
use crate::analysis::{Analysis, Threshold};

const SHEET_ZOOM: u16 = 130;
const FIRST_SEEN_FILL: u32 = 0xC6EFCE;
const FIRST_SEEN_FONT: u32 = 0x006100;

#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Text(String),
    Number(f64),
    Blank,
}

impl Cell {
    fn number(value: Option<f64>) -> Self {
        value.map_or(Cell::Blank, Cell::Number)
    }

    fn display(&self) -> String {
        match self {
            Cell::Text(s) => s.clone(),
            Cell::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => format!("{:.0}", n),
            Cell::Number(n) => format!("{:.3}", n),
            Cell::Blank => "-".to_string(),
        }
    }
}

/// A result table laid out for export. The first cell of every record is the
/// grouping value.
pub trait Sheet {
    fn title(&self) -> String;
    fn header(&self) -> Vec<String>;
    fn records(&self) -> Vec<Vec<Cell>>;
}

impl Sheet for CompetitionTable {
    fn title(&self) -> String {
        format!("Competing by {}", self.metric.label)
    }

    fn header(&self) -> Vec<String> {
        self.columns()
    }

    fn records(&self) -> Vec<Vec<Cell>> {
        self.rows
            .iter()
            .map(|r| {
                vec![
                    Cell::Text(r.group.clone()),
                    Cell::Text(r.secondary.clone()),
                    Cell::Number(r.value),
                    Cell::number(r.rate),
                    Cell::number(r.position),
                    Cell::Number(r.group_share),
                    Cell::Number(r.row_percentile),
                ]
            })
            .collect()
    }
}

impl Sheet for MergedTable {
    fn title(&self) -> String {
        format!("Competing by {}", self.label)
    }

    fn header(&self) -> Vec<String> {
        self.columns()
    }

    fn records(&self) -> Vec<Vec<Cell>> {
        self.rows
            .iter()
            .map(|r| {
                vec![
                    Cell::Text(r.group.clone()),
                    Cell::Text(r.secondary.clone()),
                    Cell::Number(r.left.value),
                    Cell::number(r.rate),
                    Cell::number(r.position),
                    Cell::Number(r.left.group_share),
                    Cell::Number(r.left.row_percentile),
                    Cell::Number(r.right.value),
                    Cell::Number(r.right.group_share),
                    Cell::Number(r.right.row_percentile),
                ]
            })
            .collect()
    }
}

impl Analysis {
    /// Sheets in workbook order: primary, secondary, merged.
    pub fn sheets(&self) -> [&dyn Sheet; 3] {
        [&self.primary, &self.secondary, &self.merged]
    }
}

/// Marks the first record of each grouping value.
pub fn first_seen(records: &[Vec<Cell>]) -> Vec<bool> {
    let mut seen = HashSet::new();
    records
        .iter()
        .map(|cells| {
            let key = cells.first().map(Cell::display).unwrap_or_default();
            seen.insert(key)
        })
        .collect()
}

pub fn default_output(threshold: Threshold) -> PathBuf {
    PathBuf::from(format!(
        "cannibalization_data_threshold_{}.xlsx",
        threshold.percent()
    ))
}

/// Write one worksheet per sheet, highlighting the first row of every query.
pub fn write_workbook(path: &Path, sheets: &[&dyn Sheet]) -> Result<()> {
    let mut workbook = Workbook::new();
    let header_format = Format::new().set_bold();
    let first_seen_format = Format::new()
        .set_background_color(Color::RGB(FIRST_SEEN_FILL))
        .set_font_color(Color::RGB(FIRST_SEEN_FONT));

    for sheet in sheets {
        let title = sheet.title();
        let worksheet = workbook.add_worksheet();
        worksheet
            .set_name(title.as_str())
            .with_context(|| format!("Invalid sheet name '{}'", title))?;
        worksheet.set_zoom(SHEET_ZOOM);

        for (col, name) in sheet.header().iter().enumerate() {
            worksheet.write_string_with_format(0, col as u16, name.as_str(), &header_format)?;
        }

        let records = sheet.records();
        let highlights = first_seen(&records);
        for (i, (cells, highlight)) in records.iter().zip(highlights).enumerate() {
            let row = i as u32 + 1;
            for (col, cell) in cells.iter().enumerate() {
                let col = col as u16;
                match (cell, highlight) {
                    (Cell::Text(s), true) => {
                        worksheet.write_string_with_format(row, col, s.as_str(), &first_seen_format)?
                    }
                    (Cell::Text(s), false) => worksheet.write_string(row, col, s.as_str())?,
                    (Cell::Number(n), true) => {
                        worksheet.write_number_with_format(row, col, *n, &first_seen_format)?
                    }
                    (Cell::Number(n), false) => worksheet.write_number(row, col, *n)?,
                    (Cell::Blank, true) => worksheet.write_blank(row, col, &first_seen_format)?,
                    (Cell::Blank, false) => continue,
                };
            }
        }
        info!("Sheet '{}': {} rows", title, records.len());
    }

    workbook
        .save(path)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

/// Print a sheet as a compact console table.
pub fn print_table(sheet: &dyn Sheet, limit: usize) {
    const MAX_WIDTH: usize = 40;

    let header = sheet.header();
    let records = sheet.records();
    let shown: Vec<Vec<String>> = records
        .iter()
        .take(limit)
        .map(|cells| cells.iter().map(|c| clip(&c.display(), MAX_WIDTH)).collect())
        .collect();

    let widths: Vec<usize> = header
        .iter()
        .enumerate()
        .map(|(col, name)| {
            shown
                .iter()
                .filter_map(|r| r.get(col))
                .map(|s| s.chars().count())
                .chain(std::iter::once(name.chars().count()))
                .max()
                .unwrap_or(0)
                .min(MAX_WIDTH + 1)
        })
        .collect();

    println!("{}", sheet.title());
    let line = |cells: &[String]| {
        cells
            .iter()
            .zip(&widths)
            .map(|(c, w)| format!("{:<w$}", c, w = *w))
            .collect::<Vec<_>>()
            .join(" | ")
    };
    println!("{}", line(&header[..]));
    println!("{}", "-".repeat(widths.iter().sum::<usize>() + 3 * widths.len().saturating_sub(1)));
    for row in &shown {
        println!("{}", line(&row[..]));
    }

    let groups: HashSet<String> = records
        .iter()
        .filter_map(|r| r.first().map(Cell::display))
        .collect();
    println!(
        "\n{} of {} rows | {} distinct {} values",
        shown.len(),
        records.len(),
        groups.len(),
        header.first().map(String::as_str).unwrap_or("group")
    );
}

/// Cut a cell to `max` characters, marking the cut with an ellipsis.
fn clip(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((cut, _)) => format!("{}\u{2026}", &text[..cut]),
        None => text.to_string(),
    }
}

#[derive(Serialize)]
pub struct SheetCount {
    pub title: String,
    pub rows: usize,
}

/// Machine-readable run summary, printed with `--json`.
#[derive(Serialize)]
pub struct SummaryReport<'a> {
    pub generated_at: DateTime<Utc>,
    pub input: String,
    pub source: &'static str,
    pub threshold_percent: u8,
    pub output: Option<String>,
    pub summary: &'a [String],
    pub sheets: Vec<SheetCount>,
}

impl<'a> SummaryReport<'a> {
    pub fn new(analysis: &'a Analysis, input: &Path, output: Option<&Path>) -> Self {
        Self {
            generated_at: Utc::now(),
            input: input.display().to_string(),
            source: analysis.source.name(),
            threshold_percent: analysis.threshold.percent(),
            output: output.map(|p| p.display().to_string()),
            summary: analysis.summary.lines(),
            sheets: analysis
                .sheets()
                .iter()
                .map(|s| SheetCount {
                    title: s.title(),
                    rows: s.records().len(),
                })
                .collect(),
        }
    }
}
