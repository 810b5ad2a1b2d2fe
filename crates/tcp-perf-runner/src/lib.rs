pub mod aggregator;
pub mod error;
pub mod experiment;
pub mod report;
pub mod runner;
pub mod trial;

pub use aggregator::{
    AggregateRow, Aggregator, ConfigurationOutcome, ConfigurationReport, FlowSeries, FlowSummary,
    FlowTrial, TrialResult,
};
pub use error::RunnerError;
pub use experiment::{ExperimentOverride, load_experiment, parse_experiment};
pub use runner::{CommandRunner, TRACE_PLACEHOLDER, TrialRunner, render_args};
pub use trial::{Param, TraceSource, TrialSpec};
