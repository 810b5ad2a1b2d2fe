use crate::error::RunnerError;
use crate::trial::{TraceSource, TrialSpec};
use std::collections::BTreeMap;
use std::future::Future;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tcp_perf_abstract::ExperimentSpec;
use tokio::process::Command;
use tracing::{debug, warn};

/// Name of the placeholder replaced by the per-trial trace file.
pub const TRACE_PLACEHOLDER: &str = "trace";

/// Produces the raw trace of one trial.
pub trait TrialRunner: Send + Sync + 'static {
    fn run(&self, trial: &TrialSpec)
    -> impl Future<Output = Result<TraceSource, RunnerError>> + Send;

    /// Remove whatever an interrupted or failed `run` may have left behind.
    /// Must tolerate trials that left nothing.
    fn discard(&self, _trial: &TrialSpec) {}
}

/// Fill `{name}` placeholders from `vars`.
pub fn render_args(
    template: &[String],
    vars: &BTreeMap<String, String>,
) -> Result<Vec<String>, RunnerError> {
    template.iter().map(|arg| render(arg, vars)).collect()
}

fn render(template: &str, vars: &BTreeMap<String, String>) -> Result<String, RunnerError> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let Some(close) = after.find('}') else {
            out.push_str(&rest[open..]);
            return Ok(out);
        };
        let key = &after[..close];
        let value = vars
            .get(key)
            .ok_or_else(|| RunnerError::Template(key.to_string()))?;
        out.push_str(value);
        rest = &after[close + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

/// Runs an external simulator, e.g. `ns simulation01.tcl ...`, once per
/// trial. The process runs inside `work_dir` and writes its trace there.
#[derive(Debug, Clone)]
pub struct CommandRunner {
    program: String,
    args: Vec<String>,
    work_dir: PathBuf,
    timeout: Duration,
}

impl CommandRunner {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            work_dir: PathBuf::from("."),
            timeout: Duration::from_secs(600),
        }
    }

    pub fn from_spec(spec: &ExperimentSpec) -> Self {
        Self::new(spec.program.clone(), spec.args.clone())
            .work_dir(spec.work_dir.clone())
            .timeout(Duration::from_secs(spec.timeout_secs))
    }

    pub fn work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.work_dir = dir.into();
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl TrialRunner for CommandRunner {
    async fn run(&self, trial: &TrialSpec) -> Result<TraceSource, RunnerError> {
        let file_name = trial.trace_file_name();
        let trace_path = self.work_dir.join(&file_name);
        let mut vars = trial.variables();
        vars.insert(TRACE_PLACEHOLDER.to_string(), file_name);
        let args = render_args(&self.args, &vars)?;

        debug!("[{}] {} {}", trial.describe(), self.program, args.join(" "));
        let mut command = Command::new(&self.program);
        command
            .args(&args)
            .current_dir(&self.work_dir)
            .stdin(Stdio::null())
            .kill_on_drop(true);

        let output = tokio::time::timeout(self.timeout, command.output())
            .await
            .map_err(|_| RunnerError::Timeout {
                program: self.program.clone(),
                secs: self.timeout.as_secs(),
            })?
            .map_err(|source| RunnerError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        if !output.stdout.is_empty() {
            debug!(
                "[{}] simulator output: {}",
                trial.describe(),
                String::from_utf8_lossy(&output.stdout).trim_end()
            );
        }
        if !output.status.success() {
            return Err(RunnerError::ExitStatus {
                program: self.program.clone(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        if !tokio::fs::try_exists(&trace_path).await? {
            return Err(RunnerError::MissingTrace(trace_path.display().to_string()));
        }
        Ok(TraceSource::File(trace_path))
    }

    fn discard(&self, trial: &TrialSpec) {
        let path = self.work_dir.join(trial.trace_file_name());
        match std::fs::remove_file(&path) {
            Ok(()) => debug!("[{}] removed partial trace {}", trial.describe(), path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove trace {}: {}", path.display(), e),
        }
    }
}
