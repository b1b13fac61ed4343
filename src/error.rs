use std::path::PathBuf;

use thiserror::Error;

/// Convenience result type for harvesting operations.
pub type HarvestResult<T> = Result<T, HarvestError>;

/// Error type returned by harvesting functions.
///
/// One enum is shared by detection, remapping, conversion and the harvest state machine; every
/// failure is scoped to the file being harvested.
#[derive(Debug, Error)]
pub enum HarvestError {
    /// Underlying I/O error (e.g. file not found, permission denied).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV reading error.
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    /// Parquet writing/reading error.
    #[error("parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    /// JSON (de)serialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// No format capability accepted the file.
    #[error("unsupported file type: {}", path.display())]
    UnsupportedFormat { path: PathBuf },

    /// The delimited-text sniffer gave up after exhausting its preamble budget.
    #[error("could not determine delimiter and header status after {max_lines} lines")]
    DetectionExhausted { max_lines: usize },

    /// Two raw columns would end up under the same target name.
    #[error("mapping collision: column '{column}' would be renamed to '{target}', which already exists")]
    MappingCollision { column: String, target: String },

    /// A value mapped to a timestamp column could not be parsed.
    #[error("failed to parse timestamp in column '{column}' (raw='{raw}')")]
    TimestampParse { column: String, raw: String },

    /// The reporting service gave no usable response to a required call.
    #[error("{step} failed: {reason}")]
    NoResponse { step: String, reason: String },

    /// Every attempted partition upload failed.
    #[error("failed to upload all {partition_count} partitions to server")]
    TotalUploadFailure { partition_count: usize },

    /// A capability failed while reading its file after it was selected.
    #[error("{capability} could not read file: {message}")]
    Capability { capability: String, message: String },

    /// Settings could not be loaded or are invalid.
    #[error("configuration error: {message}")]
    Config { message: String },

    /// The visualization artifact could not be produced.
    #[error("plot error: {message}")]
    Plot { message: String },
}

impl HarvestError {
    /// Stable kind name used when a failure is reported to the remote service.
    pub fn kind(&self) -> &'static str {
        match self {
            HarvestError::Io(_) => "IoError",
            HarvestError::Csv(_) => "CsvError",
            HarvestError::Parquet(_) => "ParquetError",
            HarvestError::Json(_) => "JsonError",
            HarvestError::UnsupportedFormat { .. } => "UnsupportedFormat",
            HarvestError::DetectionExhausted { .. } => "DetectionExhausted",
            HarvestError::MappingCollision { .. }
            | HarvestError::TimestampParse { .. } => "ConversionError",
            HarvestError::NoResponse { .. } => "TransportError",
            HarvestError::TotalUploadFailure { .. } => "TotalUploadFailure",
            HarvestError::Capability { .. } => "CapabilityError",
            HarvestError::Config { .. } => "ConfigError",
            HarvestError::Plot { .. } => "PlotError",
        }
    }

    /// `true` for outcomes that mean "skip this file", not "something went wrong".
    pub fn is_unsupported(&self) -> bool {
        matches!(
            self,
            HarvestError::UnsupportedFormat { .. } | HarvestError::DetectionExhausted { .. }
        )
    }
}

/// Why a capability declined a file.
#[derive(Debug, Error)]
pub enum ProbeError {
    /// The file is not in this capability's format.
    #[error("not applicable: {reason}")]
    NotApplicable { reason: String },

    /// The capability failed unexpectedly while probing.
    #[error(transparent)]
    Failed(#[from] HarvestError),
}

impl ProbeError {
    /// Shorthand for [`ProbeError::NotApplicable`].
    pub fn not_applicable(reason: impl Into<String>) -> Self {
        ProbeError::NotApplicable {
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversion_failures_share_a_kind() {
        let collision = HarvestError::MappingCollision {
            column: "V".to_string(),
            target: "Voltage_V".to_string(),
        };
        let ts = HarvestError::TimestampParse {
            column: "t".to_string(),
            raw: "yesterday".to_string(),
        };
        assert_eq!(collision.kind(), "ConversionError");
        assert_eq!(ts.kind(), "ConversionError");
        assert!(collision.to_string().contains("'Voltage_V'"));
    }

    #[test]
    fn detection_exhausted_counts_as_unsupported() {
        assert!(HarvestError::DetectionExhausted { max_lines: 500 }.is_unsupported());
        assert!(!HarvestError::Plot { message: "x".into() }.is_unsupported());
    }
}
