use serde::{Deserialize, Serialize};

/// Column layout of a trace line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TraceFormat {
    /// Twelve columns as written by ns-2:
    /// `kind time from to class size flags flow src dst seq id`.
    Ns2,
    /// Eleven columns: `kind time from to class size - - flow seq id`.
    Compact,
    /// Pick per line from the number of columns.
    #[default]
    Auto,
}

/// What to do when a numeric column does not parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ParsePolicy {
    /// Substitute zero and mark the field on the event.
    #[default]
    Lenient,
    /// Reject the trace.
    Strict,
}

/// Which timestamp an eviction tick of the throughput series is placed at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EvictionTick {
    /// Time of the evicted receive.
    WindowStart,
    /// Time of the evicted receive plus the window size.
    #[default]
    WindowEnd,
}

/// How send and receive events are paired for latency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MatchStrategy {
    /// Pair by packet id over the whole sequence; a drop on the link
    /// removes that id.
    #[default]
    ById,
    /// Reverse scan where a drop also discards the two events preceding it.
    /// Only correct when every drop sits next to its send/receive pair.
    PositionalSkip,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisOptions {
    /// Throughput window in seconds.
    pub window: f64,
    pub eviction_tick: EvictionTick,
    /// Keep evicting after the last admission so the series ends at zero.
    pub drain: bool,
    pub matching: MatchStrategy,
    pub format: TraceFormat,
    pub parse_policy: ParsePolicy,
}

impl Default for AnalysisOptions {
    fn default() -> Self {
        Self {
            window: 0.2,
            eviction_tick: EvictionTick::default(),
            drain: false,
            matching: MatchStrategy::default(),
            format: TraceFormat::default(),
            parse_policy: ParsePolicy::default(),
        }
    }
}

/// Partial [`AnalysisOptions`] as written in an experiment file.
#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct AnalysisOverride {
    pub window: Option<f64>,
    pub eviction_tick: Option<EvictionTick>,
    pub drain: Option<bool>,
    pub matching: Option<MatchStrategy>,
    pub format: Option<TraceFormat>,
    pub parse_policy: Option<ParsePolicy>,
}

impl AnalysisOverride {
    pub fn apply_to(&self, options: &mut AnalysisOptions) {
        if let Some(v) = self.window {
            options.window = v;
        }
        if let Some(v) = self.eviction_tick {
            options.eviction_tick = v;
        }
        if let Some(v) = self.drain {
            options.drain = v;
        }
        if let Some(v) = self.matching {
            options.matching = v;
        }
        if let Some(v) = self.format {
            options.format = v;
        }
        if let Some(v) = self.parse_policy {
            options.parse_policy = v;
        }
    }
}
