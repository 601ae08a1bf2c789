use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use tracing::debug;

use super::{retain_competing, Threshold};
use crate::source::{Metric, Row, Source};

/// Pages contributing less than this share of their query's total are noise,
/// not competition.
pub const MIN_ROW_PERCENTILE: f64 = 0.10;

#[derive(Debug, Clone, PartialEq)]
pub struct CompetitionRow {
    pub group: String,
    pub secondary: String,
    pub value: f64,
    pub rate: Option<f64>,
    pub position: Option<f64>,
    /// Sum of the metric over every row of the group.
    pub group_total: f64,
    /// Group total over the grand total of all groups.
    pub group_share: f64,
    /// This row's value over its group total.
    pub row_percentile: f64,
}

/// Pages competing for the same queries under one metric.
#[derive(Debug, Clone)]
pub struct CompetitionTable {
    pub source: Source,
    pub metric: Metric,
    pub rows: Vec<CompetitionRow>,
}

impl CompetitionTable {
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

    /// Output column names, in emission order.
    pub fn columns(&self) -> Vec<String> {
        let dims = self.source.dimensions();
        vec![
            dims.grouping.to_string(),
            dims.secondary.to_string(),
            self.metric.column.to_string(),
            self.source.rate_column().to_string(),
            "position".to_string(),
            share_column(self.source, self.metric),
            percentile_column(self.source, self.metric),
        ]
    }
}

pub fn share_column(source: Source, metric: Metric) -> String {
    format!("{}_percent_all_{}", metric.column, source.dimensions().grouping)
}

pub fn percentile_column(source: Source, metric: Metric) -> String {
    format!("{}_percentile_{}", source.dimensions().grouping, metric.column)
}

/// Find the pages competing for the head of the query distribution under
/// `metric`.
///
/// Queries are ranked by their share of the metric and kept while the running
/// share stays at or below `threshold`. Within each kept query, pages below
/// [`MIN_ROW_PERCENTILE`] of the query total are discarded, (query, page)
/// pairs are deduplicated, and queries left with a single page are dropped.
pub fn extract(rows: &[Row], source: Source, metric: Metric, threshold: Threshold) -> CompetitionTable {
    let column = metric.column;

    // Partition by group, remembering first-seen order.
    let mut order: Vec<&str> = Vec::new();
    let mut groups: HashMap<&str, Vec<usize>> = HashMap::new();
    for (idx, row) in rows.iter().enumerate() {
        groups
            .entry(row.group.as_str())
            .or_insert_with(|| {
                order.push(row.group.as_str());
                Vec::new()
            })
            .push(idx);
    }
    for members in groups.values_mut() {
        members.sort_by(|&a, &b| rows[b].metric(column).total_cmp(&rows[a].metric(column)));
    }

    let totals: HashMap<&str, f64> = groups
        .iter()
        .map(|(group, members)| {
            (*group, members.iter().map(|&i| rows[i].metric(column)).sum::<f64>())
        })
        .collect();

    let retained = top_groups(&totals, threshold);
    debug!(
        "{}: {} of {} groups within {}% of total",
        column,
        retained.len(),
        totals.len(),
        threshold.percent()
    );

    let mut candidates = Vec::new();
    for group in &order {
        let Some(&share) = retained.get(group) else {
            continue;
        };
        let total = totals[group];
        for &idx in &groups[group] {
            let row = &rows[idx];
            candidates.push(CompetitionRow {
                group: row.group.clone(),
                secondary: row.secondary.clone(),
                value: row.metric(column),
                rate: row.rate,
                position: row.position,
                group_total: total,
                group_share: share,
                row_percentile: 0.0,
            });
        }
    }

    candidates.sort_by(by_total_then_value);
    for row in &mut candidates {
        row.row_percentile = if row.group_total > 0.0 {
            row.value / row.group_total
        } else {
            0.0
        };
    }
    candidates.sort_by(by_total_then_value);

    candidates.retain(|r| r.row_percentile >= MIN_ROW_PERCENTILE);

    let mut seen = HashSet::new();
    candidates.retain(|r| seen.insert((r.group.clone(), r.secondary.clone())));

    retain_competing(&mut candidates, |r| r.group.as_str());

    candidates.sort_by(|a, b| {
        b.group_total
            .total_cmp(&a.group_total)
            .then_with(|| a.group.cmp(&b.group))
            .then_with(|| b.value.total_cmp(&a.value))
            .then_with(|| cmp_position(a.position, b.position))
    });

    CompetitionTable {
        source,
        metric,
        rows: candidates,
    }
}

/// Rank groups by share and keep the prefix whose cumulative share stays
/// `<= threshold`. Returns each kept group's share of the grand total.
fn top_groups<'a>(totals: &HashMap<&'a str, f64>, threshold: Threshold) -> HashMap<&'a str, f64> {
    let mut ranked: Vec<(&'a str, f64)> = totals.iter().map(|(g, t)| (*g, *t)).collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(b.0)));

    // Summed in ranked order so the final cumulative equals the grand total
    // exactly and a threshold of 1.0 keeps every group.
    let grand_total: f64 = ranked.iter().map(|(_, t)| t).sum();
    let cutoff = threshold.fraction() * grand_total;

    let mut retained = HashMap::new();
    let mut cumulative = 0.0;
    for (group, total) in ranked {
        cumulative += total;
        if cumulative > cutoff {
            break;
        }
        let share = if grand_total > 0.0 { total / grand_total } else { 0.0 };
        retained.insert(group, share);
    }
    retained
}

fn by_total_then_value(a: &CompetitionRow, b: &CompetitionRow) -> Ordering {
    b.group_total
        .total_cmp(&a.group_total)
        .then_with(|| b.value.total_cmp(&a.value))
}

/// Ascending, with missing positions last.
fn cmp_position(a: Option<f64>, b: Option<f64>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.total_cmp(&b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::tests::{pairs, row, CLICKS, IMPRESSIONS};

    fn scenario() -> Vec<Row> {
        vec![
            row("shoes", "/a", 100.0),
            row("shoes", "/b", 50.0),
            row("hats", "/c", 10.0),
        ]
    }

    fn clicks(rows: &[Row], percent: u8) -> CompetitionTable {
        extract(rows, Source::FirstParty, CLICKS, Threshold::from_percent(percent))
    }

    #[test]
    fn full_threshold_keeps_competing_query() {
        let table = clicks(&scenario(), 100);
        assert_eq!(table.rows.len(), 2);
        assert!(table.rows.iter().all(|r| r.group == "shoes"));
        assert_eq!(table.rows[0].secondary, "/a");
        assert_eq!(table.rows[0].group_total, 150.0);
        assert!((table.rows[0].group_share - 150.0 / 160.0).abs() < 1e-12);
        assert!((table.rows[1].row_percentile - 1.0 / 3.0).abs() < 1e-12);
        assert_eq!(table.unique_groups(), 1);
    }

    #[test]
    fn zero_threshold_keeps_nothing() {
        let table = clicks(&scenario(), 0);
        assert!(table.is_empty());
        assert_eq!(table.unique_groups(), 0);
    }

    #[test]
    fn empty_input_gives_empty_table() {
        assert!(clicks(&[], 80).is_empty());
    }

    #[test]
    fn cutoff_is_inclusive() {
        let rows = vec![
            row("a", "/1", 25.0),
            row("a", "/2", 25.0),
            row("b", "/1", 15.0),
            row("b", "/2", 15.0),
            row("c", "/1", 10.0),
            row("c", "/2", 10.0),
        ];
        // a = 50%, a + b = exactly 80%
        let table = clicks(&rows, 80);
        let groups: HashSet<&str> = table.rows.iter().map(|r| r.group.as_str()).collect();
        assert_eq!(groups, HashSet::from(["a", "b"]));

        let table = clicks(&rows, 70);
        assert!(table.rows.iter().all(|r| r.group == "a"));
    }

    #[test]
    fn minor_pages_are_not_competing() {
        let rows = vec![
            row("shoes", "/a", 95.0),
            row("shoes", "/b", 5.0),
            row("boots", "/c", 60.0),
            row("boots", "/d", 40.0),
        ];
        let table = clicks(&rows, 100);
        // /b holds 5% of "shoes", leaving a single page
        assert_eq!(pairs(&table.rows), vec![("boots", "/c"), ("boots", "/d")]);
    }

    #[test]
    fn duplicate_pairs_keep_highest_value() {
        let rows = vec![
            row("shoes", "/a", 20.0),
            row("shoes", "/b", 40.0),
            row("shoes", "/a", 60.0),
        ];
        let table = clicks(&rows, 100);
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.rows[0].secondary, "/a");
        assert_eq!(table.rows[0].value, 60.0);
        // totals include the duplicate
        assert_eq!(table.rows[0].group_total, 120.0);
    }

    #[test]
    fn final_order() {
        let mut rows = vec![
            row("beta", "/1", 30.0),
            row("beta", "/2", 30.0),
            row("alpha", "/1", 20.0),
            row("alpha", "/2", 40.0),
            row("big", "/x", 50.0),
            row("big", "/y", 50.0),
        ];
        rows[0].position = Some(7.0);
        rows[1].position = Some(2.0);
        rows[4].position = None;
        rows[5].position = Some(9.0);
        let table = clicks(&rows, 100);
        assert_eq!(
            pairs(&table.rows),
            vec![
                ("big", "/y"),
                ("big", "/x"),
                ("alpha", "/2"),
                ("alpha", "/1"),
                ("beta", "/2"),
                ("beta", "/1"),
            ]
        );
    }

    #[test]
    fn every_group_has_two_pages() {
        let rows = vec![
            row("a", "/1", 10.0),
            row("a", "/1", 9.0),
            row("b", "/1", 50.0),
            row("b", "/2", 6.0),
            row("c", "/1", 30.0),
            row("c", "/2", 30.0),
            row("c", "/3", 1.0),
        ];
        let table = clicks(&rows, 100);
        let mut pages: HashMap<&str, HashSet<&str>> = HashMap::new();
        for r in &table.rows {
            pages
                .entry(r.group.as_str())
                .or_default()
                .insert(r.secondary.as_str());
        }
        assert!(!pages.is_empty());
        assert!(pages.values().all(|p| p.len() >= 2));
    }

    #[test]
    fn rerun_on_own_output_is_stable() {
        let rows = vec![
            row("shoes", "/a", 120.0),
            row("shoes", "/b", 60.0),
            row("shoes", "/c", 5.0),
            row("boots", "/a", 40.0),
            row("boots", "/d", 30.0),
            row("hats", "/e", 10.0),
        ];
        let first = clicks(&rows, 100);
        let again: Vec<Row> = first
            .rows
            .iter()
            .map(|r| row(&r.group, &r.secondary, r.value))
            .collect();
        let second = clicks(&again, 100);
        let mut a = pairs(&first.rows);
        let mut b = pairs(&second.rows);
        a.sort();
        b.sort();
        assert_eq!(a, b);
    }

    #[test]
    fn secondary_metric_with_zero_totals() {
        let mut rows = scenario();
        for r in &mut rows {
            r.metrics.insert(IMPRESSIONS.column, 0.0);
        }
        let table = extract(&rows, Source::FirstParty, IMPRESSIONS, Threshold::from_percent(100));
        assert!(table.is_empty());
    }

    #[test]
    fn columns_follow_source() {
        let table = clicks(&scenario(), 100);
        assert_eq!(
            table.columns(),
            vec![
                "query",
                "page",
                "clicks",
                "ctr",
                "position",
                "clicks_percent_all_query",
                "query_percentile_clicks",
            ]
        );

        let metric = Source::ThirdParty.primary();
        let empty = extract(&[], Source::ThirdParty, metric, Threshold::from_percent(80));
        assert_eq!(
            empty.columns(),
            vec![
                "keyword",
                "url",
                "traffic",
                "cpc",
                "position",
                "traffic_percent_all_keyword",
                "keyword_percentile_traffic",
            ]
        );
    }
}
