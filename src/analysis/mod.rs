pub mod extract;
pub mod filter;
pub mod merge;
pub mod summary;

use std::collections::HashMap;

use tracing::info;

use crate::error::AnalysisError;
use crate::source::{Dataset, Row, Source};
use extract::CompetitionTable;
use merge::MergedTable;
use summary::Summary;

/// Cumulative-share cutoff selecting the head of the query distribution.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Threshold(f64);

impl Threshold {
    pub fn from_percent(percent: u8) -> Self {
        Self(f64::from(percent.min(100)) / 100.0)
    }

    pub fn fraction(self) -> f64 {
        self.0
    }

    pub fn percent(self) -> u8 {
        (self.0 * 100.0).round() as u8
    }
}

/// Everything one run produces.
pub struct Analysis {
    pub source: Source,
    pub threshold: Threshold,
    pub primary: CompetitionTable,
    pub secondary: CompetitionTable,
    pub merged: MergedTable,
    pub summary: Summary,
}

impl Analysis {
    /// Fails on the first table with nothing left in it; a threshold that low
    /// leaves nothing worth exporting.
    pub fn ensure_competing(&self) -> Result<(), AnalysisError> {
        let empty = [
            (self.primary.is_empty(), self.primary.metric.label),
            (self.secondary.is_empty(), self.secondary.metric.label),
            (self.merged.is_empty(), self.merged.label),
        ]
        .into_iter()
        .find(|(empty, _)| *empty);

        match empty {
            Some((_, label)) => Err(AnalysisError::EmptyResult {
                label: label.to_string(),
            }),
            None => Ok(()),
        }
    }
}

/// Filter a freshly loaded dataset and analyse it.
pub fn run(dataset: Dataset, threshold: Threshold) -> Analysis {
    let source = dataset.source;
    let rows = filter::filter_rows(dataset.rows, source.primary().column);
    info!("{} rows left after filtering", rows.len());
    analyze(&rows, source, threshold)
}

/// Extract both metrics in parallel, then merge them. Summary lines are
/// recorded in fixed order (primary, secondary, merged) whatever finishes
/// first.
pub fn analyze(rows: &[Row], source: Source, threshold: Threshold) -> Analysis {
    let [first, second] = source.metrics();

    let (primary, secondary) = rayon::join(
        || extract::extract(rows, source, first, threshold),
        || extract::extract(rows, source, second, threshold),
    );
    let merged = merge::merge(&primary, &secondary);

    let mut summary = Summary::default();
    summary.record(source, primary.unique_groups(), primary.metric.column);
    summary.record(source, secondary.unique_groups(), secondary.metric.column);
    summary.record(source, merged.unique_groups(), merged.label);

    info!(
        "{} competing rows by {}, {} by {}, {} by {}",
        primary.rows.len(),
        primary.metric.column,
        secondary.rows.len(),
        secondary.metric.column,
        merged.rows.len(),
        merged.label
    );

    Analysis {
        source,
        threshold,
        primary,
        secondary,
        merged,
        summary,
    }
}

/// Keep only rows whose group still appears at least twice.
pub(crate) fn retain_competing<T, F>(rows: &mut Vec<T>, group: F)
where
    F: Fn(&T) -> &str,
{
    let mut counts: HashMap<String, usize> = HashMap::new();
    for row in rows.iter() {
        *counts.entry(group(row).to_string()).or_default() += 1;
    }
    rows.retain(|row| counts.get(group(row)).is_some_and(|&n| n >= 2));
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::source::Metric;

    pub const CLICKS: Metric = Metric { column: "clicks", label: "Clicks" };
    pub const IMPRESSIONS: Metric = Metric { column: "impressions", label: "Impressions" };

    /// A search console row with ten impressions per click.
    pub fn row(group: &str, page: &str, clicks: f64) -> Row {
        Row {
            group: group.to_string(),
            secondary: page.to_string(),
            metrics: HashMap::from([(CLICKS.column, clicks), (IMPRESSIONS.column, clicks * 10.0)]),
            rate: None,
            position: None,
        }
    }

    pub trait Pair {
        fn pair(&self) -> (&str, &str);
    }

    impl Pair for extract::CompetitionRow {
        fn pair(&self) -> (&str, &str) {
            (self.group.as_str(), self.secondary.as_str())
        }
    }

    impl Pair for merge::MergedRow {
        fn pair(&self) -> (&str, &str) {
            (self.group.as_str(), self.secondary.as_str())
        }
    }

    pub fn pairs<T: Pair>(rows: &[T]) -> Vec<(&str, &str)> {
        rows.iter().map(Pair::pair).collect()
    }

    fn fixture(name: &str) -> Dataset {
        let file = std::fs::File::open(format!("tests/fixtures/{}.csv", name)).unwrap();
        crate::source::read(file).unwrap()
    }

    #[test]
    fn threshold_from_percent() {
        assert_eq!(Threshold::from_percent(80).fraction(), 0.8);
        assert_eq!(Threshold::from_percent(0).fraction(), 0.0);
        assert_eq!(Threshold::from_percent(250).fraction(), 1.0);
        assert_eq!(Threshold::from_percent(70).percent(), 70);
    }

    #[test]
    fn retain_competing_drops_singletons() {
        let mut rows = vec![("a", 1), ("b", 2), ("a", 3), ("c", 4)];
        retain_competing(&mut rows, |r| r.0);
        assert_eq!(rows, vec![("a", 1), ("a", 3)]);
    }

    #[test]
    fn search_console_export_at_full_threshold() {
        let analysis = run(fixture("gsc"), Threshold::from_percent(100));

        assert_eq!(
            pairs(&analysis.primary.rows),
            vec![
                ("running shoes", "https://example.com/shoes"),
                ("running shoes", "https://example.com/blog/best-running-shoes"),
                ("trail shoes", "https://example.com/trail"),
                ("trail shoes", "https://example.com/shoes"),
            ]
        );
        assert_eq!(analysis.secondary.rows.len(), 5);
        assert_eq!(analysis.merged.rows.len(), 4);

        let top = &analysis.merged.rows[0];
        assert_eq!(top.left.value, 120.0);
        assert_eq!(top.right.value, 2400.0);
        assert_eq!(top.rate, Some(0.05));
        assert_eq!(top.position, Some(3.1));

        assert_eq!(
            analysis.summary.lines(),
            &[
                "2 unique queries competing by clicks.",
                "2 unique queries competing by impressions.",
                "2 unique queries competing by Impr. & Clicks.",
            ]
        );
        assert!(analysis.ensure_competing().is_ok());
    }

    #[test]
    fn search_console_export_at_default_threshold() {
        let analysis = run(fixture("gsc"), Threshold::from_percent(80));
        assert!(analysis.primary.rows.iter().all(|r| r.group == "running shoes"));
        assert_eq!(analysis.primary.rows.len(), 2);
        assert_eq!(analysis.secondary.rows.len(), 3);
        assert_eq!(analysis.merged.unique_groups(), 1);
    }

    #[test]
    fn low_threshold_is_reported() {
        let analysis = run(fixture("gsc"), Threshold::from_percent(70));
        assert!(analysis.primary.is_empty());
        assert_eq!(analysis.summary.lines()[0], "0 unique queries competing by clicks.");
        let err = analysis.ensure_competing().unwrap_err();
        assert!(matches!(err, AnalysisError::EmptyResult { ref label } if label == "Clicks"));
        assert!(err.to_string().starts_with("Threshold is too low"));
    }

    #[test]
    fn zero_threshold_scenario() {
        let rows = vec![
            row("shoes", "/a", 100.0),
            row("shoes", "/b", 50.0),
            row("hats", "/c", 10.0),
        ];
        let analysis = analyze(&rows, Source::FirstParty, Threshold::from_percent(0));
        assert!(analysis.primary.is_empty());
        assert!(analysis.merged.is_empty());
        assert_eq!(analysis.summary.lines()[0], "0 unique queries competing by clicks.");
    }

    #[test]
    fn non_finite_metric_does_not_disable_cutoff() {
        let csv = "query,page,clicks,impressions\n\
                   a,/1,50,NaN\n\
                   a,/2,50,100\n\
                   b,/1,50,500\n\
                   b,/2,50,500\n\
                   c,/1,50,500\n\
                   c,/2,50,500\n\
                   d,/1,50,500\n\
                   d,/2,50,500\n";
        let dataset = crate::source::read(csv.as_bytes()).unwrap();

        let analysis = run(dataset, Threshold::from_percent(10));
        assert!(analysis.secondary.unique_groups() <= 1);
        assert!(analysis.secondary.rows.iter().all(|r| r.value.is_finite()));
        assert!(analysis.secondary.rows.iter().all(|r| r.group_share.is_finite()));
    }

    #[test]
    fn keyword_research_export() {
        let analysis = run(fixture("semrush"), Threshold::from_percent(100));

        assert_eq!(analysis.primary.rows.len(), 4);
        assert_eq!(
            pairs(&analysis.secondary.rows)[..3],
            [
                ("crm software", "https://acme.io/crm"),
                ("crm software", "https://acme.io/blog/what-is-crm"),
                ("crm software", "https://acme.io/pricing"),
            ]
        );
        assert_eq!(analysis.merged.rows.len(), 4);
        assert_eq!(analysis.primary.rows[0].rate, Some(25.1));
        assert_eq!(
            analysis.summary.lines(),
            &[
                "2 unique keywords competing by traffic.",
                "2 unique keywords competing by search volume.",
                "2 unique keywords competing by Traffic & Volume.",
            ]
        );
    }
}
