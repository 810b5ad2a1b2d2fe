use crate::config::AnalysisOverride;
use crate::event::{FlowId, Link, NodeId, PacketClass};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Two sweep points closer than this are the same point.
pub const SWEEP_TOLERANCE: f64 = 1e-6;

/// Sweep points are rounded to this many steps per unit.
const SWEEP_RESOLUTION: f64 = 1e6;

/// An experiment file: one simulator command line swept over a control
/// parameter and repeated over a trial parameter, for every configuration.
#[derive(Deserialize, Debug, Clone)]
pub struct ExperimentSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Simulator executable, e.g. `ns`.
    pub program: String,
    /// Argument template; `{name}` is replaced by the configuration
    /// variable, sweep parameter or trial parameter of that name, and
    /// `{trace}` by the per-trial trace path.
    pub args: Vec<String>,
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_parallel_trials")]
    pub max_parallel_trials: usize,
    #[serde(default)]
    pub keep_traces: bool,
    #[serde(default)]
    pub undefined: UndefinedPolicy,
    #[serde(default)]
    pub analysis: AnalysisOverride,
    /// Control parameter; each value produces one summary row.
    pub sweep: Option<Sweep>,
    /// Repetition parameter; each value is one trial of a row.
    pub trials: Option<Sweep>,
    pub configurations: Vec<Configuration>,
    pub flows: Vec<FlowSpec>,
    pub series: Option<SeriesSpec>,
}

fn default_work_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("results")
}

fn default_timeout_secs() -> u64 {
    600
}

fn default_max_parallel_trials() -> usize {
    4
}

/// A named parameter stepped from `start` to `end` inclusive.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct Sweep {
    pub name: String,
    pub start: f64,
    pub end: f64,
    #[serde(default = "default_step")]
    pub step: f64,
}

fn default_step() -> f64 {
    1.0
}

impl Sweep {
    /// Points are computed by index so repeated addition cannot add or
    /// lose the final point.
    pub fn values(&self) -> Vec<f64> {
        if !(self.step > 0.0) || self.end < self.start {
            return vec![self.start];
        }
        let count = ((self.end - self.start) / self.step + SWEEP_TOLERANCE).floor() as usize + 1;
        (0..count)
            .map(|i| round_point(self.start + i as f64 * self.step))
            .collect()
    }

    pub fn contains(&self, value: f64) -> bool {
        self.values()
            .iter()
            .any(|v| (v - value).abs() < SWEEP_TOLERANCE)
    }
}

/// Strip representation noise such as `0.7000000000000001` so points print
/// the way they were written.
fn round_point(value: f64) -> f64 {
    (value * SWEEP_RESOLUTION).round() / SWEEP_RESOLUTION
}

/// One algorithm variant / queue discipline combination under test.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct Configuration {
    pub label: Option<String>,
    #[serde(default)]
    pub vars: BTreeMap<String, String>,
}

impl Configuration {
    /// Explicit label, or one derived from the variable values
    /// (`Agent/TCP/Reno` becomes `Reno`).
    pub fn label(&self) -> String {
        if let Some(label) = &self.label {
            return label.clone();
        }
        let parts: Vec<String> = self.vars.values().map(|v| agent_suffix(v)).collect();
        if parts.is_empty() {
            "default".to_string()
        } else {
            parts.join("_")
        }
    }
}

/// File-name-safe form of a label: anything outside `[A-Za-z0-9_-]`
/// becomes `-`.
pub fn file_stem(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '-' })
        .collect()
}

/// Short name of an ns-2 agent class. The bare `Agent/TCP` agent is Tahoe.
pub fn agent_suffix(agent: &str) -> String {
    match agent.rsplit('/').next() {
        Some("TCP") => "Tahoe".to_string(),
        Some(last) if !last.is_empty() => last.to_string(),
        _ => agent.to_string(),
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    Throughput,
    Latency,
    Drops,
}

impl Metric {
    pub const ALL: [Metric; 3] = [Metric::Throughput, Metric::Latency, Metric::Drops];

    pub fn name(&self) -> &'static str {
        match self {
            Metric::Throughput => "throughput",
            Metric::Latency => "latency",
            Metric::Drops => "drops",
        }
    }
}

/// A flow to observe in every trial.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct FlowSpec {
    /// Column suffix in the summary, e.g. `1` for `avg_throughput1`.
    #[serde(default)]
    pub label: String,
    pub flow_id: FlowId,
    pub class: Option<PacketClass>,
    pub from: NodeId,
    pub to: NodeId,
    #[serde(default = "default_metrics")]
    pub metrics: Vec<Metric>,
}

fn default_metrics() -> Vec<Metric> {
    Metric::ALL.to_vec()
}

impl FlowSpec {
    pub fn link(&self) -> Link {
        Link::new(self.from, self.to)
    }
}

/// Trial whose throughput series is exported alongside the summary.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct SeriesSpec {
    pub control: Option<f64>,
    pub trial: Option<f64>,
}

impl SeriesSpec {
    pub fn selects(&self, control: Option<f64>, trial: Option<f64>) -> bool {
        point_matches(self.control, control) && point_matches(self.trial, trial)
    }
}

fn point_matches(wanted: Option<f64>, actual: Option<f64>) -> bool {
    match (wanted, actual) {
        (None, _) => true,
        (Some(w), Some(a)) => (w - a).abs() < SWEEP_TOLERANCE,
        (Some(_), None) => false,
    }
}

/// Whether an undefined trial metric fails the configuration.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum UndefinedPolicy {
    /// Leave the trial out of that metric's statistics.
    #[default]
    Skip,
    Fail,
}
