use std::fmt;

use serde::Serialize;

use crate::source::Source;

/// Ordered, append-only record of what each stage found.
#[derive(Debug, Default, Clone, Serialize)]
#[serde(transparent)]
pub struct Summary {
    lines: Vec<String>,
}

impl Summary {
    pub fn record(&mut self, source: Source, unique: usize, competing_by: &str) {
        self.lines.push(format!(
            "{} unique {} competing by {}.",
            unique,
            source.noun(),
            competing_by
        ));
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for line in &self.lines {
            writeln!(f, "{}", line)?;
        }
        Ok(())
    }
}
