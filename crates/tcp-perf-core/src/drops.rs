use tcp_perf_abstract::{FlowId, TraceEvent};

/// Drop events in a sequence already restricted to one flow.
pub fn count_drops(events: &[TraceEvent]) -> usize {
    events.iter().filter(|e| e.is_drop()).count()
}

/// Drop events of `flow_id` in an unfiltered sequence.
pub fn count_flow_drops(events: &[TraceEvent], flow_id: FlowId) -> usize {
    events
        .iter()
        .filter(|e| e.flow_id == flow_id && e.is_drop())
        .count()
}
