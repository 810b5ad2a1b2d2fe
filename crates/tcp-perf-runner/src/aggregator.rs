use crate::error::RunnerError;
use crate::runner::TrialRunner;
use crate::trial::{Param, TrialSpec};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tcp_perf_abstract::{
    AnalysisOptions, Configuration, ExperimentSpec, Metric, SeriesSpec, Sweep, UndefinedPolicy,
};
use tcp_perf_core::{
    AnalysisError, Analyzer, FlowAnalysis, FlowSelector, MeanStd, ParseStats, analyze_trace,
};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Scalars measured for one flow in one trial. `None` means undefined.
#[derive(Debug, Clone, Serialize)]
pub struct FlowTrial {
    pub label: String,
    pub throughput: Option<f64>,
    pub latency: Option<f64>,
    pub drops: usize,
}

/// Throughput series of one flow, kept for the designated trial only.
#[derive(Debug, Clone, Serialize)]
pub struct FlowSeries {
    pub label: String,
    pub control: Option<f64>,
    pub trial: Option<f64>,
    pub ticks: Vec<(f64, f64)>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TrialResult {
    pub control_index: usize,
    pub trial_index: usize,
    pub control: Option<f64>,
    pub trial: Option<f64>,
    pub flows: Vec<FlowTrial>,
    pub series: Vec<FlowSeries>,
    pub parse: ParseStats,
}

/// Cross-trial statistics of one flow. A metric is `None` when it was not
/// requested or no trial defined it.
#[derive(Debug, Clone, Serialize)]
pub struct FlowSummary {
    pub label: String,
    pub throughput: Option<MeanStd>,
    pub latency: Option<MeanStd>,
    pub drops: Option<MeanStd>,
    /// Requested trial metrics that were undefined and left out.
    pub undefined: usize,
}

/// One summary row: every trial sharing a control value.
#[derive(Debug, Clone, Serialize)]
pub struct AggregateRow {
    pub control: Option<f64>,
    pub trials: usize,
    pub flows: Vec<FlowSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConfigurationReport {
    pub label: String,
    pub rows: Vec<AggregateRow>,
    pub series: Vec<FlowSeries>,
    pub elapsed_secs: f64,
}

/// Result of one configuration; a failed configuration has no rows.
#[derive(Debug)]
pub struct ConfigurationOutcome {
    pub label: String,
    pub result: Result<ConfigurationReport, RunnerError>,
}

#[derive(Debug)]
struct FlowPlan {
    selector: FlowSelector,
    metrics: Vec<Metric>,
}

#[derive(Debug)]
struct Plan {
    experiment: String,
    options: AnalysisOptions,
    analyzer: Analyzer,
    flows: Vec<FlowPlan>,
    control: Option<Sweep>,
    trials: Option<Sweep>,
    undefined: UndefinedPolicy,
    max_parallel: usize,
    keep_traces: bool,
    series: Option<SeriesSpec>,
}

fn points(sweep: &Option<Sweep>) -> Vec<Option<Param>> {
    match sweep {
        Some(sweep) => sweep
            .values()
            .into_iter()
            .map(|v| Some(Param::new(sweep.name.clone(), v)))
            .collect(),
        None => vec![None],
    }
}

/// Runs every trial of an experiment and reduces them to summary rows.
pub struct Aggregator<R> {
    runner: Arc<R>,
    plan: Arc<Plan>,
}

impl<R> Clone for Aggregator<R> {
    fn clone(&self) -> Self {
        Self {
            runner: Arc::clone(&self.runner),
            plan: Arc::clone(&self.plan),
        }
    }
}

impl<R: TrialRunner> Aggregator<R> {
    pub fn new(runner: R, spec: &ExperimentSpec) -> Result<Self, RunnerError> {
        let mut options = AnalysisOptions::default();
        spec.analysis.apply_to(&mut options);
        let analyzer = Analyzer::new(&options)?;
        let flows = spec
            .flows
            .iter()
            .map(|flow| FlowPlan {
                selector: FlowSelector::from(flow),
                metrics: flow.metrics.clone(),
            })
            .collect();
        Ok(Self {
            runner: Arc::new(runner),
            plan: Arc::new(Plan {
                experiment: spec.name.clone(),
                options,
                analyzer,
                flows,
                control: spec.sweep.clone(),
                trials: spec.trials.clone(),
                undefined: spec.undefined,
                max_parallel: spec.max_parallel_trials.max(1),
                keep_traces: spec.keep_traces,
                series: spec.series.clone(),
            }),
        })
    }

    /// Run all configurations concurrently. Outcomes keep the order of
    /// `configurations`.
    pub async fn run_experiment(&self, configurations: &[Configuration]) -> Vec<ConfigurationOutcome> {
        let mut set = JoinSet::new();
        for (index, configuration) in configurations.iter().enumerate() {
            let this = self.clone();
            let configuration = configuration.clone();
            set.spawn(async move {
                let label = configuration.label();
                let result = this.run_configuration(&configuration).await;
                (index, ConfigurationOutcome { label, result })
            });
        }

        let mut slots: Vec<Option<ConfigurationOutcome>> =
            configurations.iter().map(|_| None).collect();
        let mut failures = Vec::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((index, outcome)) => slots[index] = Some(outcome),
                Err(e) => {
                    error!("Configuration task failed: {}", e);
                    failures.push(e.to_string());
                }
            }
        }

        // A task that panicked or was cancelled left its slot empty.
        slots
            .into_iter()
            .zip(configurations)
            .map(|(slot, configuration)| {
                slot.unwrap_or_else(|| ConfigurationOutcome {
                    label: configuration.label(),
                    result: Err(RunnerError::Join(failures.join("; "))),
                })
            })
            .collect()
    }

    /// Run every trial of one configuration. The first failing trial aborts
    /// the rest and fails the configuration.
    pub async fn run_configuration(
        &self,
        configuration: &Configuration,
    ) -> Result<ConfigurationReport, RunnerError> {
        let label = configuration.label();
        let started = Instant::now();
        info!("Starting {} / {}", self.plan.experiment, label);

        let semaphore = Arc::new(Semaphore::new(self.plan.max_parallel));
        let mut set = JoinSet::new();
        let mut trials = Vec::new();
        for (control_index, control) in points(&self.plan.control).into_iter().enumerate() {
            for (trial_index, trial) in points(&self.plan.trials).into_iter().enumerate() {
                let spec = TrialSpec {
                    experiment: self.plan.experiment.clone(),
                    configuration: label.clone(),
                    vars: configuration.vars.clone(),
                    control: control.clone(),
                    trial,
                    control_index,
                    trial_index,
                };
                trials.push(spec.clone());
                let this = self.clone();
                let semaphore = Arc::clone(&semaphore);
                set.spawn(async move {
                    let _permit = semaphore
                        .acquire_owned()
                        .await
                        .map_err(|e| RunnerError::Join(e.to_string()))?;
                    this.run_trial(spec).await
                });
            }
        }

        let mut results = Vec::new();
        while let Some(joined) = set.join_next().await {
            let outcome = joined.map_err(|e| RunnerError::Join(e.to_string())).and_then(|r| r);
            match outcome {
                Ok(result) => results.push(result),
                Err(e) => {
                    error!("{} / {} failed: {}", self.plan.experiment, label, e);
                    set.abort_all();
                    // Wait for cancelled trials so their simulators are gone
                    // before their traces are removed.
                    while set.join_next().await.is_some() {}
                    self.discard_traces(trials).await;
                    return Err(e);
                }
            }
        }
        results.sort_by_key(|r| (r.control_index, r.trial_index));

        let series = results
            .iter()
            .flat_map(|r| r.series.iter().cloned())
            .collect();
        let rows = self.reduce(&label, &results);
        let elapsed = started.elapsed();
        info!(
            "Finished {} / {}: {} trials in {:.1}s",
            self.plan.experiment,
            label,
            results.len(),
            elapsed.as_secs_f64()
        );
        Ok(ConfigurationReport {
            label,
            rows,
            series,
            elapsed_secs: elapsed.as_secs_f64(),
        })
    }

    /// Remove every trace a failed configuration may have left in place.
    async fn discard_traces(&self, trials: Vec<TrialSpec>) {
        if self.plan.keep_traces {
            return;
        }
        let runner = Arc::clone(&self.runner);
        let swept = tokio::task::spawn_blocking(move || {
            for trial in &trials {
                runner.discard(trial);
            }
        })
        .await;
        if let Err(e) = swept {
            warn!("Failed to clean up traces: {}", e);
        }
    }

    async fn run_trial(&self, spec: TrialSpec) -> Result<TrialResult, RunnerError> {
        let source = self.runner.run(&spec).await?;

        let plan = Arc::clone(&self.plan);
        let analyzed = tokio::task::spawn_blocking(move || {
            let selectors: Vec<FlowSelector> =
                plan.flows.iter().map(|f| f.selector.clone()).collect();
            let analyzed = source
                .open()
                .map_err(RunnerError::from)
                .and_then(|reader| {
                    analyze_trace(reader, &plan.options, &plan.analyzer, &selectors)
                        .map_err(RunnerError::from)
                });
            if !plan.keep_traces {
                source.remove();
            }
            analyzed
        })
        .await
        .map_err(|e| RunnerError::Join(e.to_string()))?;
        let (analyses, parse) = analyzed?;

        let mut flows = Vec::with_capacity(analyses.len());
        let mut series = Vec::new();
        let selected = self.plan.series.as_ref().is_some_and(|s| {
            s.selects(
                spec.control.as_ref().map(|p| p.value),
                spec.trial.as_ref().map(|p| p.value),
            )
        });
        for (flow, analysis) in self.plan.flows.iter().zip(&analyses) {
            flows.push(self.flow_trial(&spec, flow, analysis)?);
            if selected {
                series.push(FlowSeries {
                    label: flow.selector.label.clone(),
                    control: spec.control.as_ref().map(|p| p.value),
                    trial: spec.trial.as_ref().map(|p| p.value),
                    ticks: analysis.throughput.pairs(),
                });
            }
        }
        debug!("[{}] analyzed {} events", spec.describe(), parse.retained);

        Ok(TrialResult {
            control_index: spec.control_index,
            trial_index: spec.trial_index,
            control: spec.control.map(|p| p.value),
            trial: spec.trial.map(|p| p.value),
            flows,
            series,
            parse,
        })
    }

    fn flow_trial(
        &self,
        spec: &TrialSpec,
        flow: &FlowPlan,
        analysis: &FlowAnalysis,
    ) -> Result<FlowTrial, RunnerError> {
        let throughput = self.defined(spec, flow, Metric::Throughput, analysis.throughput_mbps())?;
        let latency = self.defined(spec, flow, Metric::Latency, analysis.latency_secs())?;
        Ok(FlowTrial {
            label: flow.selector.label.clone(),
            throughput,
            latency,
            drops: analysis.drops,
        })
    }

    /// Apply the undefined-metric policy to one estimate.
    fn defined(
        &self,
        spec: &TrialSpec,
        flow: &FlowPlan,
        metric: Metric,
        estimate: Result<f64, AnalysisError>,
    ) -> Result<Option<f64>, RunnerError> {
        match estimate {
            Ok(value) => Ok(Some(value)),
            Err(source) if !flow.metrics.contains(&metric) => {
                debug!("[{}] unrequested {}: {}", spec.describe(), metric.name(), source);
                Ok(None)
            }
            Err(source) if self.plan.undefined == UndefinedPolicy::Fail || !source.is_undefined() => {
                Err(RunnerError::Undefined {
                    trial: spec.describe(),
                    flow: flow.selector.label.clone(),
                    metric: metric.name(),
                    source,
                })
            }
            Err(source) => {
                debug!("[{}] {}", spec.describe(), source);
                Ok(None)
            }
        }
    }

    /// Group sorted trial results by control value and summarize each group.
    fn reduce(&self, label: &str, results: &[TrialResult]) -> Vec<AggregateRow> {
        let mut groups: BTreeMap<usize, Vec<&TrialResult>> = BTreeMap::new();
        for result in results {
            groups.entry(result.control_index).or_default().push(result);
        }

        groups
            .into_values()
            .map(|trials| {
                let control = trials.first().and_then(|t| t.control);
                let flows = self
                    .plan
                    .flows
                    .iter()
                    .enumerate()
                    .map(|(i, flow)| summarize_flow(flow, i, &trials))
                    .collect::<Vec<_>>();
                for summary in flows.iter().filter(|f| f.undefined > 0) {
                    warn!(
                        "{} control={:?} flow {}: {} undefined metric values skipped",
                        label, control, summary.label, summary.undefined
                    );
                }
                AggregateRow {
                    control,
                    trials: trials.len(),
                    flows,
                }
            })
            .collect()
    }
}

fn summarize_flow(flow: &FlowPlan, index: usize, trials: &[&TrialResult]) -> FlowSummary {
    let values = |pick: fn(&FlowTrial) -> Option<f64>| -> Vec<Option<f64>> {
        trials.iter().map(|t| pick(&t.flows[index])).collect()
    };
    let mut undefined = 0;
    let mut summarize = |metric: Metric, samples: Vec<Option<f64>>| -> Option<MeanStd> {
        if !flow.metrics.contains(&metric) {
            return None;
        }
        undefined += samples.iter().filter(|s| s.is_none()).count();
        let defined: Vec<f64> = samples.into_iter().flatten().collect();
        MeanStd::of(&defined)
    };

    let throughput = summarize(Metric::Throughput, values(|f| f.throughput));
    let latency = summarize(Metric::Latency, values(|f| f.latency));
    let drops = summarize(Metric::Drops, values(|f| Some(f.drops as f64)));
    FlowSummary {
        label: flow.selector.label.clone(),
        throughput,
        latency,
        drops,
        undefined,
    }
}
