use std::path::PathBuf;
use thiserror::Error;

/// Problems with run configuration. These abort the affected dataset pass only.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid tile size {width}x{height}: both sides must be positive")]
    InvalidTileSize { width: u32, height: u32 },
    #[error("overlap ratio {0} is outside [0, 1)")]
    InvalidOverlap(f64),
    #[error("retention threshold {0} is outside [0, 1]")]
    InvalidThreshold(f64),
    #[error("background ratio {0} is outside (0, 1)")]
    InvalidBackgroundRatio(f64),
    #[error("source directory does not exist: {}", .0.display())]
    MissingRoot(PathBuf),
    #[error("failed to read class map {}", .path.display())]
    ClassMapRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse class map {}", .path.display())]
    ClassMapParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// A single annotation line that could not be understood.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecordError {
    #[error("expected {expected} fields, found {found}")]
    FieldCount { expected: usize, found: usize },
    #[error("invalid {field} value '{value}'")]
    InvalidField { field: &'static str, value: String },
    #[error("line is not valid UTF-8")]
    InvalidEncoding,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn class_map_errors_keep_their_cause() {
        let err = ConfigError::ClassMapRead {
            path: PathBuf::from("classes.json"),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        };
        assert_eq!(err.to_string(), "failed to read class map classes.json");
        assert_eq!(err.source().map(|s| s.to_string()), Some("gone".to_string()));
    }

    #[test]
    fn record_errors_render_field_details() {
        let err = RecordError::InvalidField {
            field: "width",
            value: "abc".to_string(),
        };
        assert_eq!(err.to_string(), "invalid width value 'abc'");
        assert!(RecordError::InvalidEncoding.source().is_none());
    }
}
