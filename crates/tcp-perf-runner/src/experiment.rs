use crate::runner::TRACE_PLACEHOLDER;
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tcp_perf_abstract::{AnalysisOptions, ExperimentSpec, Sweep, file_stem};

/// Read and validate an experiment file.
pub fn load_experiment(path: &Path) -> Result<ExperimentSpec> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read experiment file {}", path.display()))?;
    let spec = parse_experiment(&content)
        .with_context(|| format!("Invalid experiment file {}", path.display()))?;
    Ok(spec)
}

pub fn parse_experiment(content: &str) -> Result<ExperimentSpec> {
    let spec: ExperimentSpec = toml::from_str(content).context("Failed to parse experiment")?;
    validate(&spec)?;
    Ok(spec)
}

fn validate(spec: &ExperimentSpec) -> Result<()> {
    if spec.configurations.is_empty() {
        anyhow::bail!("experiment '{}' has no configurations", spec.name);
    }
    if spec.flows.is_empty() {
        anyhow::bail!("experiment '{}' observes no flows", spec.name);
    }
    let placeholder = format!("{{{TRACE_PLACEHOLDER}}}");
    if !spec.args.iter().any(|a| a.contains(&placeholder)) {
        anyhow::bail!("simulator arguments must contain {placeholder} for the trace path");
    }
    for sweep in spec.sweep.iter().chain(spec.trials.iter()) {
        check_sweep(sweep)?;
    }
    check_unique(
        "configuration",
        spec.configurations.iter().map(|c| c.label()),
    )?;
    check_unique("flow", spec.flows.iter().map(|f| f.label.clone()))?;
    if let Some(series) = &spec.series {
        check_series_point("control", series.control, spec.sweep.as_ref())?;
        check_series_point("trial", series.trial, spec.trials.as_ref())?;
    }
    let mut options = AnalysisOptions::default();
    spec.analysis.apply_to(&mut options);
    if !(options.window.is_finite() && options.window > 0.0) {
        anyhow::bail!("analysis window must be positive, got {}", options.window);
    }
    Ok(())
}

fn check_sweep(sweep: &Sweep) -> Result<()> {
    if !(sweep.step > 0.0) {
        anyhow::bail!("sweep '{}' needs a positive step", sweep.name);
    }
    if sweep.end < sweep.start {
        anyhow::bail!("sweep '{}' ends before it starts", sweep.name);
    }
    Ok(())
}

/// Labels name trace and output files, so they must stay distinct once
/// reduced to file names. Compared case-insensitively.
fn check_unique(kind: &str, labels: impl Iterator<Item = String>) -> Result<()> {
    let mut seen: HashMap<String, String> = HashMap::new();
    for label in labels {
        let key = file_stem(&label).to_ascii_lowercase();
        if let Some(previous) = seen.insert(key, label.clone()) {
            anyhow::bail!(
                "{kind} labels '{previous}' and '{label}' map to the same file name"
            );
        }
    }
    Ok(())
}

/// The series names one trial, so every swept parameter needs a value
/// taken from its sweep.
fn check_series_point(field: &str, wanted: Option<f64>, sweep: Option<&Sweep>) -> Result<()> {
    match (wanted, sweep) {
        (None, None) => Ok(()),
        (None, Some(sweep)) => {
            anyhow::bail!("[series] must set {field} because '{}' is swept", sweep.name)
        }
        (Some(value), None) => {
            anyhow::bail!("[series] sets {field} = {value} but no parameter is swept for it")
        }
        (Some(value), Some(sweep)) if sweep.contains(value) => Ok(()),
        (Some(value), Some(sweep)) => {
            anyhow::bail!("[series] {field} = {value} is not a value of sweep '{}'", sweep.name)
        }
    }
}

/// Command-line adjustments applied on top of an experiment file.
#[derive(Debug, Clone, Default)]
pub struct ExperimentOverride {
    pub output_dir: Option<PathBuf>,
    pub work_dir: Option<PathBuf>,
    pub max_parallel_trials: Option<usize>,
    pub keep_traces: Option<bool>,
}

impl ExperimentOverride {
    pub fn apply_to(&self, spec: &mut ExperimentSpec) {
        if let Some(v) = &self.output_dir {
            spec.output_dir = v.clone();
        }
        if let Some(v) = &self.work_dir {
            spec.work_dir = v.clone();
        }
        if let Some(v) = self.max_parallel_trials {
            spec.max_parallel_trials = v;
        }
        if let Some(v) = self.keep_traces {
            spec.keep_traces = v;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tcp_perf_abstract::{MatchStrategy, Metric, PacketClass, UndefinedPolicy};

    const EXP02: &str = r#"
name = "exp02"
program = "ns"
args = ["../ns2/simulation02.tcl", "{agent1}", "{agent2}", "{tcp2_start}", "0", "{cbr_rate}", "{trace}", "False"]
undefined = "fail"

[analysis]
window = 0.2
matching = "positional_skip"

[sweep]
name = "cbr_rate"
start = 1
end = 9

[trials]
name = "tcp2_start"
start = 0.0
end = 5.0
step = 0.05

[[configurations]]
vars = { agent1 = "Agent/TCP/Reno", agent2 = "Agent/TCP/Reno" }

[[configurations]]
label = "Newreno_Vegas"
vars = { agent1 = "Agent/TCP/Newreno", agent2 = "Agent/TCP/Vegas" }

[[flows]]
label = "1"
flow_id = 1
class = "tcp"
from = 1
to = 2

[[flows]]
label = "2"
flow_id = 2
class = "tcp"
from = 1
to = 2
metrics = ["throughput"]
"#;

    #[test]
    fn test_parse_experiment() {
        let spec = parse_experiment(EXP02).unwrap();
        assert_eq!(spec.name, "exp02");
        assert_eq!(spec.configurations.len(), 2);
        assert_eq!(spec.configurations[0].label(), "Reno_Reno");
        assert_eq!(spec.configurations[1].label(), "Newreno_Vegas");
        assert_eq!(spec.sweep.as_ref().unwrap().values().len(), 9);
        assert_eq!(spec.trials.as_ref().unwrap().values().len(), 101);
        assert_eq!(spec.flows[0].class, Some(PacketClass::Tcp));
        assert_eq!(spec.flows[0].metrics, Metric::ALL.to_vec());
        assert_eq!(spec.flows[1].metrics, vec![Metric::Throughput]);
        assert_eq!(spec.undefined, UndefinedPolicy::Fail);
        assert_eq!(spec.analysis.matching, Some(MatchStrategy::PositionalSkip));
        assert_eq!(spec.max_parallel_trials, 4);
    }

    #[test]
    fn test_trace_placeholder_required() {
        let content = EXP02.replace("\"{trace}\", ", "");
        let err = parse_experiment(&content).unwrap_err();
        assert!(err.to_string().contains("{trace}"));
    }

    #[test]
    fn test_bad_sweep_rejected() {
        let content = EXP02.replace("step = 0.05", "step = 0.0");
        assert!(parse_experiment(&content).is_err());
    }

    #[test]
    fn test_override() {
        let mut spec = parse_experiment(EXP02).unwrap();
        ExperimentOverride {
            output_dir: Some(PathBuf::from("out")),
            max_parallel_trials: Some(1),
            ..Default::default()
        }
        .apply_to(&mut spec);
        assert_eq!(spec.output_dir, PathBuf::from("out"));
        assert_eq!(spec.max_parallel_trials, 1);
    }

    #[test]
    fn test_bundled_experiments_parse() {
        let exp01 = parse_experiment(include_str!("../../../experiments/exp01.toml")).unwrap();
        assert_eq!(exp01.configurations[0].label(), "Tahoe");
        assert_eq!(exp01.trials.as_ref().unwrap().values().len(), 51);

        let exp03 = parse_experiment(include_str!("../../../experiments/exp03.toml")).unwrap();
        assert!(exp03.sweep.is_none());
        assert_eq!(exp03.flows[1].class, Some(PacketClass::Cbr));
        assert_eq!(exp03.series.as_ref().unwrap().trial, Some(10.0));
    }

    #[test]
    fn test_duplicate_configuration_label_rejected() {
        let content = EXP02.replace(
            "label = \"Newreno_Vegas\"",
            "label = \"Reno_Reno\"",
        );
        let err = parse_experiment(&content).unwrap_err();
        assert!(err.to_string().contains("same file name"));
    }

    #[test]
    fn test_labels_colliding_as_file_names_rejected() {
        let content = EXP02
            .replace(
                "[[configurations]]\nvars = { agent1",
                "[[configurations]]\nlabel = \"New Reno\"\nvars = { agent1",
            )
            .replace("label = \"Newreno_Vegas\"", "label = \"New/Reno\"");
        let err = parse_experiment(&content).unwrap_err();
        assert!(err.to_string().contains("'New Reno' and 'New/Reno'"));
    }

    #[test]
    fn test_duplicate_flow_label_rejected() {
        let content = EXP02.replace("label = \"2\"", "label = \"1\"");
        assert!(parse_experiment(&content).is_err());
    }

    #[test]
    fn test_series_must_name_swept_points() {
        let with_series = |series: &str| format!("{EXP02}\n[series]\n{series}\n");

        assert!(parse_experiment(&with_series("control = 3.0\ntrial = 2.5")).is_ok());
        // Leaving out a swept parameter would select one trial per value.
        assert!(parse_experiment(&with_series("trial = 2.5")).is_err());
        assert!(parse_experiment(&with_series("control = 3.0")).is_err());
        // Not a point of the sweep.
        assert!(parse_experiment(&with_series("control = 3.5\ntrial = 2.5")).is_err());
        assert!(parse_experiment(&with_series("control = 3.0\ntrial = 2.52")).is_err());
    }

    #[test]
    fn test_series_without_sweep_needs_no_control() {
        let content = EXP02.replace("[sweep]\nname = \"cbr_rate\"\nstart = 1\nend = 9\n", "");
        assert!(parse_experiment(&format!("{content}\n[series]\ntrial = 5.0\n")).is_ok());
        assert!(
            parse_experiment(&format!("{content}\n[series]\ncontrol = 1.0\ntrial = 5.0\n"))
                .is_err()
        );
    }
}
