use thiserror::Error;

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("Data must contain a \"page\" column.")]
    MissingPageColumn,

    #[error("Data must contain a \"{column}\" column.")]
    MissingMetricColumn { column: &'static str },

    #[error("Data file is invalid: expected query/clicks/page or keyword/url columns, found [{found}]")]
    UnknownSchema { found: String },

    #[error("Threshold is too low. Please increase the threshold. (no rows competing by {label})")]
    EmptyResult { label: String },
}
