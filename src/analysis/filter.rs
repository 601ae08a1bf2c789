use tracing::debug;

use crate::source::Row;

/// Drop rows whose grouping text is not plain ASCII or whose primary metric
/// is not positive. Surviving rows keep their input order.
pub fn filter_rows(rows: Vec<Row>, primary: &str) -> Vec<Row> {
    let total = rows.len();
    let mut non_ascii = 0usize;
    let mut non_positive = 0usize;

    let kept: Vec<Row> = rows
        .into_iter()
        .filter(|row| {
            if !row.group.is_ascii() {
                non_ascii += 1;
                return false;
            }
            let value = row.metric(primary);
            if value <= 0.0 || value.is_nan() {
                non_positive += 1;
                return false;
            }
            true
        })
        .collect();

    debug!(
        "Row filter: kept {}/{} ({} non-ascii, {} with no {})",
        kept.len(),
        total,
        non_ascii,
        non_positive,
        primary
    );
    kept
}
