use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader, Cursor};
use std::path::PathBuf;
use tcp_perf_abstract::file_stem;
use tracing::warn;

/// A swept parameter bound to one of its values.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Param {
    pub name: String,
    pub value: f64,
}

impl Param {
    pub fn new(name: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}

/// Everything needed to run one simulation.
#[derive(Debug, Clone)]
pub struct TrialSpec {
    pub experiment: String,
    pub configuration: String,
    pub vars: BTreeMap<String, String>,
    pub control: Option<Param>,
    pub trial: Option<Param>,
    pub control_index: usize,
    pub trial_index: usize,
}

impl TrialSpec {
    /// Configuration variables plus the control and trial parameters, the
    /// parameters taking precedence.
    pub fn variables(&self) -> BTreeMap<String, String> {
        let mut vars = self.vars.clone();
        for param in self.control.iter().chain(self.trial.iter()) {
            vars.insert(param.name.clone(), param.value.to_string());
        }
        vars
    }

    /// Unique per trial so that trials of one configuration never share a
    /// trace file.
    pub fn trace_file_name(&self) -> String {
        let stem = file_stem(&format!(
            "{}_{}_{}_{}",
            self.experiment, self.configuration, self.control_index, self.trial_index
        ));
        format!("{stem}.tr")
    }

    pub fn describe(&self) -> String {
        let mut parts = vec![self.configuration.clone()];
        for param in self.control.iter().chain(self.trial.iter()) {
            parts.push(format!("{}={}", param.name, param.value));
        }
        parts.join(" ")
    }
}

/// Where a finished trial's trace can be read from.
#[derive(Debug, Clone)]
pub enum TraceSource {
    File(PathBuf),
    Memory(String),
}

impl TraceSource {
    pub fn open(&self) -> std::io::Result<Box<dyn BufRead + '_>> {
        match self {
            TraceSource::File(path) => Ok(Box::new(BufReader::new(File::open(path)?))),
            TraceSource::Memory(text) => Ok(Box::new(Cursor::new(text.as_bytes()))),
        }
    }

    /// Delete a file-backed trace. Failures are logged, not returned.
    pub fn remove(&self) {
        if let TraceSource::File(path) = self
            && let Err(e) = std::fs::remove_file(path)
        {
            warn!("Failed to remove trace {}: {}", path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> TrialSpec {
        let mut vars = BTreeMap::new();
        vars.insert("agent".to_string(), "Agent/TCP/Reno".to_string());
        vars.insert("cbr_rate".to_string(), "0".to_string());
        TrialSpec {
            experiment: "exp01".into(),
            configuration: "Reno".into(),
            vars,
            control: Some(Param::new("cbr_rate", 3.0)),
            trial: Some(Param::new("tcp_start", 0.7)),
            control_index: 2,
            trial_index: 2,
        }
    }

    #[test]
    fn test_variables_prefer_parameters() {
        let vars = spec().variables();
        assert_eq!(vars["cbr_rate"], "3");
        assert_eq!(vars["tcp_start"], "0.7");
        assert_eq!(vars["agent"], "Agent/TCP/Reno");
    }

    #[test]
    fn test_trace_file_name_is_unique_and_safe() {
        let a = spec();
        let mut b = spec();
        b.trial_index = 3;
        assert_ne!(a.trace_file_name(), b.trace_file_name());
        let mut c = spec();
        c.configuration = "Agent/TCP Vegas".into();
        assert_eq!(c.trace_file_name(), "exp01_Agent-TCP-Vegas_2_2.tr");
    }

    #[test]
    fn test_memory_source_reads() {
        let source = TraceSource::Memory("line one\nline two\n".into());
        let lines: Vec<String> = source.open().unwrap().lines().map(|l| l.unwrap()).collect();
        assert_eq!(lines, vec!["line one", "line two"]);
        source.remove();
    }

    #[test]
    fn test_describe() {
        assert_eq!(spec().describe(), "Reno cbr_rate=3 tcp_start=0.7");
    }
}
