//! CSV and JSON output of configuration reports.
//!
//! One summary file per configuration, named `{experiment}_{label}.csv`:
//! an optional control column, then `avg_`/`std_` columns for every
//! requested metric of every flow, suffixed with the flow label. The
//! designated trial's throughput series goes to
//! `{experiment}_{label}_{flow}_series.csv`.

use crate::aggregator::{AggregateRow, ConfigurationOutcome, ConfigurationReport, FlowSeries};
use anyhow::{Context, Result};
use serde::Serialize;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tcp_perf_abstract::{ExperimentSpec, FlowSpec, Metric, file_stem};
use tcp_perf_core::MeanStd;
use tracing::{error, info};

/// Decimal places of every statistic column.
const PRECISION: usize = 10;

pub fn summary_header(control: Option<&str>, flows: &[FlowSpec]) -> Vec<String> {
    let mut header: Vec<String> = control.map(str::to_string).into_iter().collect();
    for flow in flows {
        for metric in &flow.metrics {
            header.push(format!("avg_{}{}", metric.name(), flow.label));
            header.push(format!("std_{}{}", metric.name(), flow.label));
        }
    }
    header
}

/// Integral control values print without a fraction, like `3`.
fn format_control(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{value:.0}")
    } else {
        value.to_string()
    }
}

fn format_stat(stat: Option<f64>) -> String {
    match stat {
        Some(v) => format!("{v:.PRECISION$}"),
        None => "NaN".to_string(),
    }
}

fn row_cells(row: &AggregateRow, flows: &[FlowSpec]) -> Vec<String> {
    let mut cells: Vec<String> = row.control.map(format_control).into_iter().collect();
    for (spec, summary) in flows.iter().zip(&row.flows) {
        for metric in &spec.metrics {
            let stat: Option<&MeanStd> = match metric {
                Metric::Throughput => summary.throughput.as_ref(),
                Metric::Latency => summary.latency.as_ref(),
                Metric::Drops => summary.drops.as_ref(),
            };
            cells.push(format_stat(stat.map(|s| s.mean)));
            cells.push(format_stat(stat.map(|s| s.std_dev)));
        }
    }
    cells
}

pub fn write_summary<W: Write>(
    out: &mut W,
    report: &ConfigurationReport,
    control: Option<&str>,
    flows: &[FlowSpec],
) -> std::io::Result<()> {
    writeln!(out, "{}", summary_header(control, flows).join(","))?;
    for row in &report.rows {
        writeln!(out, "{}", row_cells(row, flows).join(","))?;
    }
    Ok(())
}

pub fn write_series<W: Write>(out: &mut W, ticks: &[(f64, f64)]) -> std::io::Result<()> {
    writeln!(out, "time_ticks,throughput_ticks")?;
    for (time, value) in ticks {
        writeln!(out, "{time:.PRECISION$},{value:.PRECISION$}")?;
    }
    Ok(())
}

fn create(path: &Path) -> Result<BufWriter<File>> {
    let file = File::create(path)
        .with_context(|| format!("Failed to create output file {}", path.display()))?;
    Ok(BufWriter::new(file))
}

/// Write the summary and series files of one configuration, returning
/// the paths written.
pub fn write_configuration(
    spec: &ExperimentSpec,
    report: &ConfigurationReport,
) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(&spec.output_dir).with_context(|| {
        format!("Failed to create output directory {}", spec.output_dir.display())
    })?;
    let stem = format!("{}_{}", file_stem(&spec.name), file_stem(&report.label));
    let mut written = Vec::new();

    let path = spec.output_dir.join(format!("{stem}.csv"));
    let mut out = create(&path)?;
    let control = spec.sweep.as_ref().map(|s| s.name.as_str());
    write_summary(&mut out, report, control, &spec.flows)
        .and_then(|_| out.flush())
        .with_context(|| format!("Failed to write {}", path.display()))?;
    written.push(path);

    for FlowSeries { label, ticks, .. } in &report.series {
        let path = spec
            .output_dir
            .join(format!("{stem}_{}_series.csv", file_stem(label)));
        let mut out = create(&path)?;
        write_series(&mut out, ticks)
            .and_then(|_| out.flush())
            .with_context(|| format!("Failed to write {}", path.display()))?;
        written.push(path);
    }

    for path in &written {
        info!("Wrote {}", path.display());
    }
    Ok(written)
}

/// Write the files of every successful configuration, carrying on past
/// failures. Returns the labels of configurations that failed to run or
/// whose files could not be written.
pub fn write_outcomes<'a>(
    spec: &ExperimentSpec,
    outcomes: &'a [ConfigurationOutcome],
) -> Vec<&'a str> {
    let mut failed = Vec::new();
    for outcome in outcomes {
        let result = match &outcome.result {
            Ok(report) => write_configuration(spec, report).map(|_| ()),
            Err(e) => Err(anyhow::anyhow!("{e}")),
        };
        if let Err(e) = result {
            error!("Configuration {} failed: {:#}", outcome.label, e);
            failed.push(outcome.label.as_str());
        }
    }
    failed
}

#[derive(Serialize)]
struct JsonOutcome<'a> {
    label: &'a str,
    report: Option<&'a ConfigurationReport>,
    error: Option<String>,
}

#[derive(Serialize)]
struct JsonReport<'a> {
    experiment: &'a str,
    configurations: Vec<JsonOutcome<'a>>,
}

/// Serialize every outcome, failed ones carrying their error message.
pub fn write_json(path: &Path, spec: &ExperimentSpec, outcomes: &[ConfigurationOutcome]) -> Result<()> {
    let report = JsonReport {
        experiment: &spec.name,
        configurations: outcomes
            .iter()
            .map(|o| JsonOutcome {
                label: &o.label,
                report: o.result.as_ref().ok(),
                error: o.result.as_ref().err().map(|e| e.to_string()),
            })
            .collect(),
    };
    let data = serde_json::to_vec_pretty(&report).context("Failed to serialize report")?;
    fs::write(path, &data)
        .with_context(|| format!("Failed to write report file {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::FlowSummary;
    use tcp_perf_abstract::PacketClass;

    fn flow(label: &str, metrics: Vec<Metric>) -> FlowSpec {
        FlowSpec {
            label: label.into(),
            flow_id: 1,
            class: Some(PacketClass::Tcp),
            from: 1,
            to: 2,
            metrics,
        }
    }

    fn stat(mean: f64, std_dev: f64) -> Option<MeanStd> {
        Some(MeanStd {
            mean,
            std_dev,
            samples: 2,
        })
    }

    #[test]
    fn test_single_flow_header() {
        let header = summary_header(Some("cbr_rate"), &[flow("", vec![Metric::Throughput])]);
        assert_eq!(header.join(","), "cbr_rate,avg_throughput,std_throughput");
    }

    #[test]
    fn test_two_flow_header() {
        let flows = vec![flow("1", Metric::ALL.to_vec()), flow("2", Metric::ALL.to_vec())];
        let header = summary_header(None, &flows);
        assert_eq!(
            header.join(","),
            "avg_throughput1,std_throughput1,avg_latency1,std_latency1,avg_drops1,std_drops1,\
             avg_throughput2,std_throughput2,avg_latency2,std_latency2,avg_drops2,std_drops2"
        );
    }

    #[test]
    fn test_write_summary() {
        let flows = vec![flow("", vec![Metric::Throughput, Metric::Latency])];
        let report = ConfigurationReport {
            label: "Reno".into(),
            rows: vec![
                AggregateRow {
                    control: Some(3.0),
                    trials: 2,
                    flows: vec![FlowSummary {
                        label: String::new(),
                        throughput: stat(1.5, 0.25),
                        latency: None,
                        drops: stat(4.0, 0.0),
                        undefined: 2,
                    }],
                },
                AggregateRow {
                    control: Some(0.5),
                    trials: 2,
                    flows: vec![FlowSummary {
                        label: String::new(),
                        throughput: stat(2.0, 0.0),
                        latency: stat(0.1, 0.0),
                        drops: None,
                        undefined: 0,
                    }],
                },
            ],
            series: Vec::new(),
            elapsed_secs: 0.0,
        };
        let mut out = Vec::new();
        write_summary(&mut out, &report, Some("rate"), &flows).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "rate,avg_throughput,std_throughput,avg_latency,std_latency");
        assert_eq!(lines[1], "3,1.5000000000,0.2500000000,NaN,NaN");
        assert_eq!(lines[2], "0.5,2.0000000000,0.0000000000,0.1000000000,0.0000000000");
    }

    #[test]
    fn test_write_series() {
        let mut out = Vec::new();
        write_series(&mut out, &[(0.0, 0.04), (0.2, 0.0)]).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "time_ticks,throughput_ticks\n0.0000000000,0.0400000000\n0.2000000000,0.0000000000\n"
        );
    }

    fn report(label: &str) -> ConfigurationReport {
        ConfigurationReport {
            label: label.into(),
            rows: Vec::new(),
            series: Vec::new(),
            elapsed_secs: 0.0,
        }
    }

    #[test]
    fn test_write_outcomes_continues_past_failures() {
        let dir = std::env::temp_dir().join(format!("tcp-perf-outcomes-{}", std::process::id()));
        let spec = crate::experiment::parse_experiment(&format!(
            r#"
name = "exp"
program = "ns"
args = ["{{trace}}"]
output_dir = '{}'

[[configurations]]
label = "Reno"

[[configurations]]
label = "Vegas"

[[configurations]]
label = "Sack1"

[[flows]]
flow_id = 1
from = 1
to = 2
"#,
            dir.display()
        ))
        .unwrap();
        // A directory where Reno's summary belongs makes its write fail.
        fs::create_dir_all(dir.join("exp_Reno.csv")).unwrap();

        let outcomes = vec![
            ConfigurationOutcome {
                label: "Reno".into(),
                result: Ok(report("Reno")),
            },
            ConfigurationOutcome {
                label: "Vegas".into(),
                result: Err(crate::RunnerError::MissingTrace("exp_Vegas_0_0.tr".into())),
            },
            ConfigurationOutcome {
                label: "Sack1".into(),
                result: Ok(report("Sack1")),
            },
        ];
        let failed = write_outcomes(&spec, &outcomes);

        assert_eq!(failed, vec!["Reno", "Vegas"]);
        assert!(dir.join("exp_Sack1.csv").is_file());
        fs::remove_dir_all(&dir).unwrap();
    }
}
