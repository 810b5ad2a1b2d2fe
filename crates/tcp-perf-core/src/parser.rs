use crate::error::TraceError;
use crate::filter::TraceFilter;
use serde::Serialize;
use std::io::{BufRead, Lines};
use std::str::FromStr;
use tcp_perf_abstract::{
    AnalysisOptions, EventKind, PacketClass, ParsePolicy, TraceEvent, TraceFormat, fields,
};
use tracing::{debug, warn};

/// Column positions for one trace layout.
#[derive(Debug, Clone, Copy)]
struct Columns {
    min_len: usize,
    flow: usize,
    seq: usize,
    packet_id: usize,
}

const NS2_COLUMNS: Columns = Columns {
    min_len: 12,
    flow: 7,
    seq: 10,
    packet_id: 11,
};

const COMPACT_COLUMNS: Columns = Columns {
    min_len: 11,
    flow: 8,
    seq: 9,
    packet_id: 10,
};

fn columns_for(format: TraceFormat, found: usize) -> Columns {
    match format {
        TraceFormat::Ns2 => NS2_COLUMNS,
        TraceFormat::Compact => COMPACT_COLUMNS,
        TraceFormat::Auto if found >= NS2_COLUMNS.min_len => NS2_COLUMNS,
        TraceFormat::Auto => COMPACT_COLUMNS,
    }
}

/// Counters collected over one pass of a trace.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ParseStats {
    pub lines: usize,
    pub blank_lines: usize,
    pub events: usize,
    /// Events kept after filtering.
    pub retained: usize,
    /// Events with at least one zero-substituted field.
    pub defaulted_events: usize,
    pub defaulted_fields: usize,
}

impl ParseStats {
    fn record(&mut self, event: &TraceEvent) {
        self.events += 1;
        if event.has_defaults() {
            self.defaulted_events += 1;
            self.defaulted_fields += event.defaulted.count_ones() as usize;
        }
    }
}

struct LineParser {
    line: usize,
    policy: ParsePolicy,
    defaulted: u16,
}

impl LineParser {
    fn field<T: FromStr + Default>(
        &mut self,
        raw: &str,
        bit: u16,
    ) -> Result<T, TraceError> {
        match raw.parse::<T>() {
            Ok(value) => Ok(value),
            Err(_) => self.fallback(raw, bit),
        }
    }

    fn time(&mut self, raw: &str) -> Result<f64, TraceError> {
        match raw.parse::<f64>() {
            Ok(value) if value.is_finite() && value >= 0.0 => Ok(value),
            _ => self.fallback(raw, fields::TIME),
        }
    }

    fn fallback<T: Default>(&mut self, raw: &str, bit: u16) -> Result<T, TraceError> {
        match self.policy {
            ParsePolicy::Lenient => {
                self.defaulted |= bit;
                Ok(T::default())
            }
            ParsePolicy::Strict => Err(TraceError::InvalidField {
                line: self.line,
                field: fields::name(bit),
                value: raw.to_string(),
            }),
        }
    }
}

/// Parse one trace line. `line` is 1-based and only used for errors.
/// Returns `None` for blank lines.
pub fn parse_line(
    text: &str,
    line: usize,
    format: TraceFormat,
    policy: ParsePolicy,
) -> Result<Option<TraceEvent>, TraceError> {
    let cols: Vec<&str> = text.split_whitespace().collect();
    if cols.is_empty() {
        return Ok(None);
    }
    let layout = columns_for(format, cols.len());
    if cols.len() < layout.min_len {
        return Err(TraceError::MalformedLine {
            line,
            expected: layout.min_len,
            found: cols.len(),
        });
    }

    let mut parser = LineParser {
        line,
        policy,
        defaulted: 0,
    };
    let time = parser.time(cols[1])?;
    let from = parser.field(cols[2], fields::FROM)?;
    let to = parser.field(cols[3], fields::TO)?;
    let size = parser.field(cols[5], fields::SIZE)?;
    let flow_id = parser.field(cols[layout.flow], fields::FLOW)?;
    let seq = parser.field(cols[layout.seq], fields::SEQ)?;
    let packet_id = parser.field(cols[layout.packet_id], fields::PACKET_ID)?;

    Ok(Some(TraceEvent {
        kind: EventKind::from_code(cols[0]),
        time,
        from,
        to,
        class: PacketClass::from(cols[4]),
        size,
        flow_id,
        seq,
        packet_id,
        defaulted: parser.defaulted,
    }))
}

/// Streaming reader yielding one event per non-blank line, in input order.
pub struct TraceReader<R> {
    lines: Lines<R>,
    line: usize,
    format: TraceFormat,
    policy: ParsePolicy,
    stats: ParseStats,
}

impl<R: BufRead> TraceReader<R> {
    pub fn new(reader: R, format: TraceFormat, policy: ParsePolicy) -> Self {
        Self {
            lines: reader.lines(),
            line: 0,
            format,
            policy,
            stats: ParseStats::default(),
        }
    }

    pub fn with_options(reader: R, options: &AnalysisOptions) -> Self {
        Self::new(reader, options.format, options.parse_policy)
    }

    pub fn stats(&self) -> &ParseStats {
        &self.stats
    }
}

impl<R: BufRead> Iterator for TraceReader<R> {
    type Item = Result<TraceEvent, TraceError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let text = match self.lines.next()? {
                Ok(text) => text,
                Err(e) => return Some(Err(e.into())),
            };
            self.line += 1;
            self.stats.lines += 1;
            match parse_line(&text, self.line, self.format, self.policy) {
                Ok(Some(event)) => {
                    self.stats.record(&event);
                    return Some(Ok(event));
                }
                Ok(None) => self.stats.blank_lines += 1,
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

/// Read a whole trace, keeping every event.
pub fn parse_trace<R: BufRead>(
    reader: R,
    options: &AnalysisOptions,
) -> Result<Vec<TraceEvent>, TraceError> {
    parse_filtered(reader, options, &TraceFilter::default()).map(|(events, _)| events)
}

/// Read a trace in one pass, keeping only events accepted by `filter`.
pub fn parse_filtered<R: BufRead>(
    reader: R,
    options: &AnalysisOptions,
    filter: &TraceFilter,
) -> Result<(Vec<TraceEvent>, ParseStats), TraceError> {
    let mut trace = TraceReader::with_options(reader, options);
    let mut events = Vec::new();
    for event in trace.by_ref() {
        let event = event?;
        if filter.matches(&event) {
            events.push(event);
        }
    }

    let mut stats = trace.stats().clone();
    stats.retained = events.len();
    if stats.defaulted_events > 0 {
        warn!(
            "{} of {} trace events had unparsable fields substituted with zero",
            stats.defaulted_events, stats.events
        );
    }
    debug!(
        "Parsed {} lines: {} events, {} retained",
        stats.lines, stats.events, stats.retained
    );
    Ok((events, stats))
}
