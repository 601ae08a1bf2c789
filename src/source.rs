use std::collections::HashMap;
use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result};
use csv::{ReaderBuilder, StringRecord};
use tracing::info;

use crate::error::AnalysisError;

/// A performance metric column and the label used for its sheet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Metric {
    pub column: &'static str,
    pub label: &'static str,
}

/// The (grouping, secondary) column pair competition is measured over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dimensions {
    pub grouping: &'static str,
    pub secondary: &'static str,
}

/// Which export the input came from. Detected once from the header row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    /// Search Console query + page export.
    FirstParty,
    /// Keyword research export (keyword + url).
    ThirdParty,
}

const GSC_METRICS: [Metric; 2] = [
    Metric { column: "clicks", label: "Clicks" },
    Metric { column: "impressions", label: "Impressions" },
];

const SEMRUSH_METRICS: [Metric; 2] = [
    Metric { column: "traffic", label: "Traffic" },
    Metric { column: "search volume", label: "Volume" },
];

impl Source {
    pub fn detect(headers: &[String]) -> Result<Self, AnalysisError> {
        let has = |name: &str| headers.iter().any(|h| h == name);

        if has("query") && has("clicks") {
            if has("page") {
                Ok(Self::FirstParty)
            } else {
                Err(AnalysisError::MissingPageColumn)
            }
        } else if has("keyword") && has("url") {
            Ok(Self::ThirdParty)
        } else {
            Err(AnalysisError::UnknownSchema {
                found: headers.join(", "),
            })
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::FirstParty => "Search Console",
            Self::ThirdParty => "Keyword research",
        }
    }

    pub fn dimensions(self) -> Dimensions {
        match self {
            Self::FirstParty => Dimensions { grouping: "query", secondary: "page" },
            Self::ThirdParty => Dimensions { grouping: "keyword", secondary: "url" },
        }
    }

    /// Per-row cost/rate column carried into the output: ctr or cpc.
    pub fn rate_column(self) -> &'static str {
        match self {
            Self::FirstParty => "ctr",
            Self::ThirdParty => "cpc",
        }
    }

    pub fn metrics(self) -> [Metric; 2] {
        match self {
            Self::FirstParty => GSC_METRICS,
            Self::ThirdParty => SEMRUSH_METRICS,
        }
    }

    /// Metric whose value must be positive for a row to be analysed.
    pub fn primary(self) -> Metric {
        self.metrics()[0]
    }

    /// Label of the table holding pairs competing under both metrics.
    pub fn merge_label(self) -> &'static str {
        match self {
            Self::FirstParty => "Impr. & Clicks",
            Self::ThirdParty => "Traffic & Volume",
        }
    }

    /// Plural noun for the grouping field, used in summary lines.
    pub fn noun(self) -> &'static str {
        match self {
            Self::FirstParty => "queries",
            Self::ThirdParty => "keywords",
        }
    }
}

/// One (query, page) observation from the export.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub group: String,
    pub secondary: String,
    pub metrics: HashMap<&'static str, f64>,
    pub rate: Option<f64>,
    pub position: Option<f64>,
}

impl Row {
    /// Missing metric cells read as zero.
    pub fn metric(&self, column: &str) -> f64 {
        self.metrics.get(column).copied().unwrap_or(0.0)
    }
}

#[derive(Debug)]
pub struct Dataset {
    pub source: Source,
    pub rows: Vec<Row>,
}

/// Column positions resolved from the header row.
struct Columns {
    group: usize,
    secondary: usize,
    metrics: Vec<(&'static str, usize)>,
    rate: Option<usize>,
    position: Option<usize>,
}

impl Columns {
    fn locate(source: Source, headers: &[String]) -> Result<Self, AnalysisError> {
        let find = |name: &str| headers.iter().position(|h| h == name);
        let dims = source.dimensions();

        // detect() already guarantees both dimension columns exist
        let missing = || AnalysisError::UnknownSchema {
            found: headers.join(", "),
        };
        let group = find(dims.grouping).ok_or_else(missing)?;
        let secondary = find(dims.secondary).ok_or_else(missing)?;

        let metrics = source
            .metrics()
            .iter()
            .map(|m| {
                find(m.column)
                    .map(|idx| (m.column, idx))
                    .ok_or(AnalysisError::MissingMetricColumn { column: m.column })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            group,
            secondary,
            metrics,
            rate: find(source.rate_column()),
            position: find("position"),
        })
    }

    fn row(&self, record: &StringRecord) -> Row {
        let text = |idx: usize| record.get(idx).unwrap_or("").trim().to_string();
        let number = |idx: Option<usize>| idx.and_then(|i| record.get(i)).and_then(parse_number);

        Row {
            group: text(self.group),
            secondary: text(self.secondary),
            metrics: self
                .metrics
                .iter()
                .map(|(name, idx)| (*name, number(Some(*idx)).unwrap_or(0.0)))
                .collect(),
            rate: number(self.rate),
            position: number(self.position),
        }
    }
}

/// Load and classify a CSV export from disk.
pub fn load(path: &Path) -> Result<Dataset> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;
    let dataset = read(file).with_context(|| format!("Failed to read {}", path.display()))?;
    info!(
        "Loaded {} rows from {} ({} export)",
        dataset.rows.len(),
        path.display(),
        dataset.source.name()
    );
    Ok(dataset)
}

/// Parse a CSV export. Header names are trimmed and lower-cased before
/// the schema is detected.
pub fn read<R: Read>(input: R) -> Result<Dataset> {
    let mut reader = ReaderBuilder::new().flexible(true).from_reader(input);

    let headers: Vec<String> = reader
        .headers()
        .context("Failed to read CSV header")?
        .iter()
        .map(|h| h.trim_start_matches('\u{feff}').trim().to_lowercase())
        .collect();

    let source = Source::detect(&headers)?;
    let columns = Columns::locate(source, &headers)?;

    let mut rows = Vec::new();
    for (i, record) in reader.records().enumerate() {
        // +2: header line plus one-based numbering
        let record = record.with_context(|| format!("Failed to parse CSV line {}", i + 2))?;
        rows.push(columns.row(&record));
    }

    Ok(Dataset { source, rows })
}

/// Parse a numeric cell, tolerating thousands separators and a trailing `%`.
pub fn parse_number(cell: &str) -> Option<f64> {
    let cleaned = cell.trim().replace(',', "");
    if cleaned.is_empty() {
        return None;
    }
    let value = match cleaned.strip_suffix('%') {
        Some(pct) => pct.trim().parse::<f64>().ok().map(|v| v / 100.0),
        None => cleaned.parse::<f64>().ok(),
    };
    // "NaN" and "inf" parse as floats but would poison every group total
    value.filter(|v| v.is_finite())
}
