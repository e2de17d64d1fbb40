//! Error types for metamer.
//!
//! All fatal conditions funnel into [`MetamerError`]; pipelines propagate it
//! with `?` and `main` renders it to stderr (and the log file, when one is
//! configured) before exiting non-zero. Non-fatal conditions (sequences
//! discarded for length) are counted and reported as summary warnings
//! instead of surfacing here.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur in metamer operations.
#[derive(Debug, Error)]
pub enum MetamerError {
    /// Malformed FASTA/FASTQ input.
    #[error("invalid input in '{path}': {details}")]
    InputFormat { path: PathBuf, details: String },

    /// Illegal character inside sequence data.
    #[error("illegal character {symbol} in sequence data in '{path}'")]
    IllegalCharacter { symbol: String, path: PathBuf },

    /// FASTQ quality score outside the configured `[qmin, qmax]` window.
    #[error("FASTQ quality value ({q}) outside range [{qmin}, {qmax}]; \
             adjust --fastq_qmin/--fastq_qmax or check --fastq_ascii")]
    QualityOutOfRange { q: i32, qmin: i64, qmax: i64 },

    /// A `size=` annotation that is zero or negative.
    #[error("invalid (non-positive) abundance annotation in header '{header}'")]
    InvalidAbundance { header: String },

    /// Paired-end input files with different record counts.
    #[error("more {longer} reads than {shorter} reads")]
    UnpairedReads {
        longer: &'static str,
        shorter: &'static str,
    },

    /// Incompatible or missing options, discovered before any I/O.
    #[error("{0}")]
    OptionConflict(String),

    /// Word length outside the supported window.
    #[error("word length {w} is out of range: must be between {min} and {max}")]
    InvalidWordLength { w: usize, min: usize, max: usize },

    /// Failed to read an input file.
    #[error("unable to read input file '{path}': {source}")]
    Read {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Failed to parse sequence records.
    #[error("unable to parse '{path}': {details}")]
    Parse { path: PathBuf, details: String },

    /// Failed to open an output file for writing.
    #[error("unable to open output file '{path}' for writing: {source}")]
    Create {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Failed to write output.
    #[error("unable to write output: {source}")]
    Write {
        #[source]
        source: std::io::Error,
    },

    /// Failed to serialize JSON output (BIOM tables).
    #[error("unable to serialize JSON: {source}")]
    Json {
        #[source]
        source: serde_json::Error,
    },

    /// Internal invariant violation; indicates a bug.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<std::io::Error> for MetamerError {
    fn from(source: std::io::Error) -> Self {
        MetamerError::Write { source }
    }
}

impl From<serde_json::Error> for MetamerError {
    fn from(source: serde_json::Error) -> Self {
        MetamerError::Json { source }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quality_error_display() {
        let err = MetamerError::QualityOutOfRange {
            q: 60,
            qmin: 0,
            qmax: 41,
        };
        assert!(err.to_string().contains("(60)"));
        assert!(err.to_string().contains("[0, 41]"));
    }

    #[test]
    fn word_length_error_display() {
        let err = MetamerError::InvalidWordLength {
            w: 17,
            min: 3,
            max: 15,
        };
        assert_eq!(
            err.to_string(),
            "word length 17 is out of range: must be between 3 and 15"
        );
    }

    #[test]
    fn option_conflict_passthrough() {
        let err = MetamerError::OptionConflict("--id is required".into());
        assert_eq!(err.to_string(), "--id is required");
    }
}
