use crate::drops::count_drops;
use crate::error::{AnalysisError, TraceError};
use crate::filter::{TraceFilter, by_class, by_flow};
use crate::latency::{LatencyMatcher, LatencySeries};
use crate::parser::{ParseStats, parse_filtered};
use crate::throughput::{ThroughputEstimator, ThroughputSeries};
use serde::Serialize;
use std::io::BufRead;
use tcp_perf_abstract::{AnalysisOptions, FlowId, FlowSpec, Link, PacketClass, TraceEvent};

/// Which events make up one observed flow.
#[derive(Debug, Clone, Serialize)]
pub struct FlowSelector {
    pub label: String,
    pub flow_id: FlowId,
    pub class: Option<PacketClass>,
    /// Link throughput and latency are measured on.
    pub link: Link,
}

impl FlowSelector {
    pub fn new(flow_id: FlowId, link: Link) -> Self {
        Self {
            label: flow_id.to_string(),
            flow_id,
            class: None,
            link,
        }
    }

    pub fn class(mut self, class: PacketClass) -> Self {
        self.class = Some(class);
        self
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// This flow's events, in trace order.
    pub fn select(&self, events: &[TraceEvent]) -> Vec<TraceEvent> {
        let flow = by_flow(events, self.flow_id);
        match &self.class {
            Some(class) => by_class(&flow, class),
            None => flow,
        }
    }
}

impl From<&FlowSpec> for FlowSelector {
    fn from(spec: &FlowSpec) -> Self {
        Self {
            label: spec.label.clone(),
            flow_id: spec.flow_id,
            class: spec.class.clone(),
            link: spec.link(),
        }
    }
}

/// Everything measured for one flow in one trace.
#[derive(Debug, Clone, Serialize)]
pub struct FlowAnalysis {
    pub selector: FlowSelector,
    pub events: usize,
    pub throughput: ThroughputSeries,
    pub latency: LatencySeries,
    pub drops: usize,
}

impl FlowAnalysis {
    pub fn throughput_mbps(&self) -> Result<f64, AnalysisError> {
        self.throughput.average_mbps()
    }

    pub fn latency_secs(&self) -> Result<f64, AnalysisError> {
        self.latency.mean()
    }
}

/// Runs the estimators configured by one set of [`AnalysisOptions`].
#[derive(Debug, Clone, Copy)]
pub struct Analyzer {
    throughput: ThroughputEstimator,
    latency: LatencyMatcher,
}

impl Analyzer {
    pub fn new(options: &AnalysisOptions) -> Result<Self, AnalysisError> {
        Ok(Self {
            throughput: ThroughputEstimator::from_options(options)?,
            latency: LatencyMatcher::from_options(options),
        })
    }

    pub fn analyze_flow(&self, events: &[TraceEvent], selector: &FlowSelector) -> FlowAnalysis {
        let flow = selector.select(events);
        FlowAnalysis {
            selector: selector.clone(),
            events: flow.len(),
            throughput: self.throughput.estimate(&flow, selector.link),
            latency: self.latency.match_packets(&flow, selector.link),
            drops: count_drops(&flow),
        }
    }
}

/// Parse a trace once, keeping only the selected flows, and analyze each.
pub fn analyze_trace<R: BufRead>(
    reader: R,
    options: &AnalysisOptions,
    analyzer: &Analyzer,
    selectors: &[FlowSelector],
) -> Result<(Vec<FlowAnalysis>, ParseStats), TraceError> {
    let filter = selectors
        .iter()
        .fold(TraceFilter::new(), |filter, s| filter.flow(s.flow_id));
    let (events, stats) = parse_filtered(reader, options, &filter)?;
    let flows = selectors
        .iter()
        .map(|selector| analyzer.analyze_flow(&events, selector))
        .collect();
    Ok((flows, stats))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const TRACE: &str = "\
+ 0.0 1 2 tcp 1000 ------- 1 0.0 3.0 1 10
+ 0.0 1 2 cbr 500 ------- 2 1.0 3.1 1 11
- 0.0 1 2 tcp 1000 ------- 1 0.0 3.0 1 10
r 0.1 1 2 tcp 1000 ------- 1 0.0 3.0 1 10
r 0.1 1 2 cbr 500 ------- 2 1.0 3.1 1 11
+ 0.2 1 2 tcp 1000 ------- 1 0.0 3.0 2 12
d 0.2 1 2 tcp 1000 ------- 1 0.0 3.0 2 12
+ 0.4 1 2 tcp 1000 ------- 1 0.0 3.0 2 13
+ 0.4 1 2 cbr 500 ------- 2 1.0 3.1 2 14
r 0.5 1 2 tcp 1000 ------- 1 0.0 3.0 2 13
r 0.6 1 2 cbr 500 ------- 2 1.0 3.1 2 14
+ 0.7 1 2 tcp 1000 ------- 1 0.0 3.0 3 15
r 0.9 1 2 tcp 1000 ------- 1 0.0 3.0 3 15
";

    #[test]
    fn test_analyze_two_flows() {
        let options = AnalysisOptions::default();
        let analyzer = Analyzer::new(&options).unwrap();
        let link = Link::new(1, 2);
        let selectors = vec![
            FlowSelector::new(1, link).class(PacketClass::Tcp),
            FlowSelector::new(2, link).class(PacketClass::Cbr),
        ];
        let (flows, stats) =
            analyze_trace(Cursor::new(TRACE), &options, &analyzer, &selectors).unwrap();
        assert_eq!(stats.events, 13);

        let tcp = &flows[0];
        assert_eq!(tcp.drops, 1);
        assert_eq!(tcp.throughput.receives, 3);
        assert_eq!(tcp.latency.samples.len(), 3);
        let expected = 3000.0 / (0.9 - 0.1 - 0.2) / 125_000.0;
        assert!((tcp.throughput_mbps().unwrap() - expected).abs() < 1e-9);

        let cbr = &flows[1];
        assert_eq!(cbr.drops, 0);
        assert_eq!(cbr.throughput.receives, 2);
        let latency = cbr.latency_secs().unwrap();
        assert!((latency - 0.15).abs() < 1e-9);
    }

    #[test]
    fn test_selector_without_class_keeps_all_classes() {
        let options = AnalysisOptions::default();
        let events = crate::parser::parse_trace(Cursor::new(TRACE), &options).unwrap();
        let selector = FlowSelector::new(2, Link::new(1, 2));
        assert_eq!(selector.select(&events).len(), 4);
    }
}
