use tcp_perf_core::{AnalysisError, TraceError};
use thiserror::Error;

/// Failures of a trial or of the configuration running it.
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("failed to start `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{program}` exited with {status}: {stderr}")]
    ExitStatus {
        program: String,
        status: String,
        stderr: String,
    },

    #[error("`{program}` did not finish within {secs}s")]
    Timeout { program: String, secs: u64 },

    #[error("simulator produced no trace at {0}")]
    MissingTrace(String),

    #[error("unknown placeholder {{{0}}} in argument template")]
    Template(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("trace error: {0}")]
    Trace(#[from] TraceError),

    #[error("analysis error: {0}")]
    Analysis(#[from] AnalysisError),

    #[error("{trial}: {metric} of flow {flow} is undefined: {source}")]
    Undefined {
        trial: String,
        flow: String,
        metric: &'static str,
        #[source]
        source: AnalysisError,
    },

    #[error("trial task failed: {0}")]
    Join(String),
}
