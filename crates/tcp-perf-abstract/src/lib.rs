pub mod config;
pub mod event;
pub mod experiment;

pub use event::{EventKind, FlowId, Link, NodeId, PacketClass, PacketId, TraceEvent};
// Re-export the field bits so callers can test `TraceEvent::defaulted`
pub use event::fields;

pub use config::{
    AnalysisOptions, AnalysisOverride, EvictionTick, MatchStrategy, ParsePolicy, TraceFormat,
};
pub use experiment::{
    Configuration, ExperimentSpec, FlowSpec, Metric, SeriesSpec, Sweep, UndefinedPolicy,
    agent_suffix, file_stem,
};
