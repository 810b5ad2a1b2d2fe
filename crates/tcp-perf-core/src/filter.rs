use tcp_perf_abstract::{FlowId, Link, PacketClass, TraceEvent};

/// Events of one flow, in their original order.
pub fn by_flow(events: &[TraceEvent], flow_id: FlowId) -> Vec<TraceEvent> {
    events
        .iter()
        .filter(|e| e.flow_id == flow_id)
        .cloned()
        .collect()
}

/// Events of one packet class, in their original order.
pub fn by_class(events: &[TraceEvent], class: &PacketClass) -> Vec<TraceEvent> {
    events
        .iter()
        .filter(|e| &e.class == class)
        .cloned()
        .collect()
}

/// Everything except one packet class, e.g. to strip `cbr` background traffic.
pub fn without_class(events: &[TraceEvent], class: &PacketClass) -> Vec<TraceEvent> {
    events
        .iter()
        .filter(|e| &e.class != class)
        .cloned()
        .collect()
}

/// Events observed on one directed link.
pub fn on_link(events: &[TraceEvent], link: Link) -> Vec<TraceEvent> {
    events.iter().filter(|e| e.on_link(link)).cloned().collect()
}

/// Predicate applied while streaming a trace so that only the events of
/// interest are kept in memory. An empty filter accepts everything.
#[derive(Debug, Clone, Default)]
pub struct TraceFilter {
    flows: Vec<FlowId>,
    class: Option<PacketClass>,
}

impl TraceFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept this flow id. May be called repeatedly to accept several.
    pub fn flow(mut self, flow_id: FlowId) -> Self {
        if !self.flows.contains(&flow_id) {
            self.flows.push(flow_id);
        }
        self
    }

    pub fn class(mut self, class: PacketClass) -> Self {
        self.class = Some(class);
        self
    }

    pub fn matches(&self, event: &TraceEvent) -> bool {
        (self.flows.is_empty() || self.flows.contains(&event.flow_id))
            && self.class.as_ref().is_none_or(|c| c == &event.class)
    }
}
