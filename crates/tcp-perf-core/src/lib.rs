pub mod analysis;
pub mod drops;
pub mod error;
pub mod filter;
pub mod latency;
pub mod parser;
pub mod stats;
pub mod throughput;

pub use analysis::{Analyzer, FlowAnalysis, FlowSelector, analyze_trace};
pub use drops::{count_drops, count_flow_drops};
pub use error::{AnalysisError, TraceError};
pub use filter::{TraceFilter, by_class, by_flow, on_link, without_class};
pub use latency::{LatencyMatcher, LatencySample, LatencySeries};
pub use parser::{ParseStats, TraceReader, parse_filtered, parse_line, parse_trace};
pub use stats::MeanStd;
pub use throughput::{BYTES_PER_MEGABIT, ThroughputEstimator, ThroughputSeries, ThroughputTick};
