use std::collections::{HashMap, HashSet};

use super::extract::{percentile_column, share_column, CompetitionRow, CompetitionTable};
use super::retain_competing;
use crate::source::{Metric, Source};

/// One metric's figures for a merged (query, page) pair.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricFigures {
    pub value: f64,
    pub group_share: f64,
    pub row_percentile: f64,
}

impl From<&CompetitionRow> for MetricFigures {
    fn from(row: &CompetitionRow) -> Self {
        Self {
            value: row.value,
            group_share: row.group_share,
            row_percentile: row.row_percentile,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MergedRow {
    pub group: String,
    pub secondary: String,
    /// Taken from the left table; both tables carry the same source row.
    pub rate: Option<f64>,
    pub position: Option<f64>,
    pub left: MetricFigures,
    pub right: MetricFigures,
}

/// Pairs competing under both metrics at once.
#[derive(Debug, Clone)]
pub struct MergedTable {
    pub source: Source,
    pub label: &'static str,
    pub left: Metric,
    pub right: Metric,
    pub rows: Vec<MergedRow>,
}

impl MergedTable {
    pub fn unique_groups(&self) -> usize {
        self.rows
            .iter()
            .map(|r| r.group.as_str())
            .collect::<HashSet<_>>()
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn columns(&self) -> Vec<String> {
        let dims = self.source.dimensions();
        vec![
            dims.grouping.to_string(),
            dims.secondary.to_string(),
            self.left.column.to_string(),
            self.source.rate_column().to_string(),
            "position".to_string(),
            share_column(self.source, self.left),
            percentile_column(self.source, self.left),
            self.right.column.to_string(),
            share_column(self.source, self.right),
            percentile_column(self.source, self.right),
        ]
    }
}

/// Inner-join two competition tables on (grouping, secondary), keeping the
/// left table's row order, then drop groups the join left with one page.
pub fn merge(left: &CompetitionTable, right: &CompetitionTable) -> MergedTable {
    let index: HashMap<(&str, &str), &CompetitionRow> = right
        .rows
        .iter()
        .map(|r| ((r.group.as_str(), r.secondary.as_str()), r))
        .collect();

    let mut rows: Vec<MergedRow> = left
        .rows
        .iter()
        .filter_map(|l| {
            let r = index.get(&(l.group.as_str(), l.secondary.as_str()))?;
            Some(MergedRow {
                group: l.group.clone(),
                secondary: l.secondary.clone(),
                rate: l.rate,
                position: l.position,
                left: MetricFigures::from(l),
                right: MetricFigures::from(*r),
            })
        })
        .collect();

    retain_competing(&mut rows, |r| r.group.as_str());

    MergedTable {
        source: left.source,
        label: left.source.merge_label(),
        left: left.metric,
        right: right.metric,
        rows,
    }
}
