use tcp_perf_abstract::Link;
use thiserror::Error;

/// Errors raised while reading a trace.
#[derive(Debug, Error)]
pub enum TraceError {
    #[error("I/O error reading trace: {0}")]
    Io(#[from] std::io::Error),

    #[error("line {line}: expected at least {expected} columns, found {found}")]
    MalformedLine {
        line: usize,
        expected: usize,
        found: usize,
    },

    #[error("line {line}: invalid {field} value {value:?}")]
    InvalidField {
        line: usize,
        field: &'static str,
        value: String,
    },
}

/// Errors raised by the estimators. Every variant except `InvalidWindow`
/// means the metric is undefined for this trace, not that it is zero.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum AnalysisError {
    #[error("{metric} undefined on link {link}: {qualifying} qualifying events")]
    InsufficientData {
        metric: &'static str,
        link: Link,
        qualifying: usize,
    },

    #[error("throughput undefined: observed span {span}s does not exceed the {window}s window")]
    SpanTooShort { span: f64, window: f64 },

    #[error("throughput window must be positive and finite, got {0}")]
    InvalidWindow(f64),
}

impl AnalysisError {
    pub fn is_undefined(&self) -> bool {
        !matches!(self, AnalysisError::InvalidWindow(_))
    }
}
