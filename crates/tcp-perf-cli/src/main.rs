use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use tcp_perf_abstract::{
    AnalysisOptions, AnalysisOverride, Link, MatchStrategy, PacketClass, ParsePolicy, TraceFormat,
};
use tcp_perf_core::{Analyzer, FlowAnalysis, FlowSelector, analyze_trace};
use tcp_perf_runner::report::{write_json, write_outcomes, write_series};
use tcp_perf_runner::{Aggregator, CommandRunner, ExperimentOverride, load_experiment};

#[derive(Parser, Debug)]
#[command(author, version, about = "Throughput, latency and drop analytics for ns-2 TCP experiments")]
struct Cli {
    /// Log at debug level unless RUST_LOG is set.
    #[arg(short, long, global = true, default_value_t = false)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run every trial of an experiment file and write its summaries.
    Run(RunArgs),
    /// Analyze one flow of an existing trace file.
    Analyze(AnalyzeArgs),
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Experiment definition (TOML).
    #[arg(short, long)]
    experiment: PathBuf,

    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Directory the simulator runs in and writes traces to.
    #[arg(long)]
    work_dir: Option<PathBuf>,

    /// Maximum simulator processes per configuration.
    #[arg(short, long)]
    jobs: Option<usize>,

    #[arg(long, default_value_t = false)]
    keep_traces: bool,

    /// Write a JSON report of every configuration.
    #[arg(long)]
    json: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct AnalyzeArgs {
    #[arg(short, long)]
    trace: PathBuf,

    #[arg(long)]
    flow: u32,

    /// Packet class of the flow, e.g. `tcp`. All classes when omitted.
    #[arg(long)]
    class: Option<String>,

    #[arg(long)]
    from: u32,

    #[arg(long)]
    to: u32,

    /// Sliding window in seconds.
    #[arg(long)]
    window: Option<f64>,

    #[arg(long, value_enum)]
    strategy: Option<Strategy>,

    #[arg(long, value_enum)]
    format: Option<Format>,

    /// Reject unparsable fields instead of reading them as zero.
    #[arg(long, default_value_t = false)]
    strict: bool,

    /// Write the throughput series as CSV.
    #[arg(long)]
    series_out: Option<PathBuf>,
}

#[derive(ValueEnum, Debug, Clone, Copy)]
enum Strategy {
    ById,
    PositionalSkip,
}

impl From<Strategy> for MatchStrategy {
    fn from(value: Strategy) -> Self {
        match value {
            Strategy::ById => MatchStrategy::ById,
            Strategy::PositionalSkip => MatchStrategy::PositionalSkip,
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy)]
enum Format {
    Auto,
    Ns2,
    Compact,
}

impl From<Format> for TraceFormat {
    fn from(value: Format) -> Self {
        match value {
            Format::Auto => TraceFormat::Auto,
            Format::Ns2 => TraceFormat::Ns2,
            Format::Compact => TraceFormat::Compact,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Command::Run(args) => run(args).await,
        Command::Analyze(args) => analyze(args),
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn run(args: RunArgs) -> Result<()> {
    let mut spec = load_experiment(&args.experiment)?;
    ExperimentOverride {
        output_dir: args.output_dir,
        work_dir: args.work_dir,
        max_parallel_trials: args.jobs,
        keep_traces: args.keep_traces.then_some(true),
    }
    .apply_to(&mut spec);

    fs::create_dir_all(&spec.work_dir).with_context(|| {
        format!("Failed to create work directory {}", spec.work_dir.display())
    })?;
    info!(
        "Experiment {}: {} configurations, {} flows",
        spec.name,
        spec.configurations.len(),
        spec.flows.len()
    );

    let runner = CommandRunner::from_spec(&spec);
    let aggregator = Aggregator::new(runner, &spec).context("Invalid analysis options")?;
    let outcomes = aggregator.run_experiment(&spec.configurations).await;

    let failed = write_outcomes(&spec, &outcomes);

    if let Some(path) = &args.json {
        write_json(path, &spec, &outcomes)?;
        info!("Wrote {}", path.display());
    }

    if !failed.is_empty() {
        bail!(
            "{} of {} configurations failed: {}",
            failed.len(),
            outcomes.len(),
            failed.join(", ")
        );
    }
    Ok(())
}

fn analyze(args: AnalyzeArgs) -> Result<()> {
    let mut options = AnalysisOptions::default();
    AnalysisOverride {
        window: args.window,
        matching: args.strategy.map(MatchStrategy::from),
        format: args.format.map(TraceFormat::from),
        parse_policy: args.strict.then_some(ParsePolicy::Strict),
        ..Default::default()
    }
    .apply_to(&mut options);
    let analyzer = Analyzer::new(&options).context("Invalid analysis options")?;

    let mut selector = FlowSelector::new(args.flow, Link::new(args.from, args.to));
    if let Some(class) = args.class.as_deref() {
        selector = selector.class(PacketClass::from(class));
    }

    let file = File::open(&args.trace)
        .with_context(|| format!("Failed to open trace {}", args.trace.display()))?;
    let (analyses, stats) = analyze_trace(
        BufReader::new(file),
        &options,
        &analyzer,
        std::slice::from_ref(&selector),
    )
    .with_context(|| format!("Failed to analyze trace {}", args.trace.display()))?;
    info!(
        "Parsed {} lines, {} events, {} kept",
        stats.lines, stats.events, stats.retained
    );

    for analysis in &analyses {
        log_analysis(analysis);
        if let Some(path) = &args.series_out {
            let file = File::create(path)
                .with_context(|| format!("Failed to create {}", path.display()))?;
            let mut out = BufWriter::new(file);
            write_series(&mut out, &analysis.throughput.pairs())
                .and_then(|_| out.flush())
                .with_context(|| format!("Failed to write {}", path.display()))?;
            info!("Wrote {}", path.display());
        }
    }
    Ok(())
}

fn log_analysis(analysis: &FlowAnalysis) {
    let selector = &analysis.selector;
    info!(
        "Flow {} on {}: {} events, {} drops",
        selector.flow_id, selector.link, analysis.events, analysis.drops
    );
    match analysis.throughput_mbps() {
        Ok(mbps) => info!("  throughput: {:.6} Mbit/s", mbps),
        Err(e) => warn!("  throughput undefined: {}", e),
    }
    match analysis.latency_secs() {
        Ok(secs) => info!(
            "  latency: {:.6} s over {} packets ({} unmatched)",
            secs,
            analysis.latency.samples.len(),
            analysis.latency.unmatched
        ),
        Err(e) => warn!("  latency undefined: {}", e),
    }
}
