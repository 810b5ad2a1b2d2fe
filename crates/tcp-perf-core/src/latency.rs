use crate::error::AnalysisError;
use crate::stats;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use tcp_perf_abstract::{AnalysisOptions, Link, MatchStrategy, PacketId, TraceEvent};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LatencySample {
    /// Receive time of the packet.
    pub time: f64,
    /// Seconds between send and receive on the link.
    pub latency: f64,
    pub packet_id: PacketId,
}

#[derive(Debug, Clone, Serialize)]
pub struct LatencySeries {
    pub link: Link,
    /// Samples ordered by receive time.
    pub samples: Vec<LatencySample>,
    /// Received packets with no recorded send.
    pub unmatched: usize,
    /// Pairs rejected because the receive preceded the send.
    pub discarded: usize,
}

impl LatencySeries {
    /// Mean latency in seconds; undefined without samples.
    pub fn mean(&self) -> Result<f64, AnalysisError> {
        stats::mean(&self.latencies()).ok_or(AnalysisError::InsufficientData {
            metric: "latency",
            link: self.link,
            qualifying: 0,
        })
    }

    pub fn latencies(&self) -> Vec<f64> {
        self.samples.iter().map(|s| s.latency).collect()
    }

    pub fn pairs(&self) -> Vec<(f64, f64)> {
        self.samples.iter().map(|s| (s.time, s.latency)).collect()
    }
}

/// Pairs each packet's send with its receive on one link.
#[derive(Debug, Clone, Copy, Default)]
pub struct LatencyMatcher {
    strategy: MatchStrategy,
}

impl LatencyMatcher {
    pub fn new(strategy: MatchStrategy) -> Self {
        Self { strategy }
    }

    pub fn from_options(options: &AnalysisOptions) -> Self {
        Self::new(options.matching)
    }

    /// `events` should hold one flow in trace order.
    pub fn match_packets(&self, events: &[TraceEvent], link: Link) -> LatencySeries {
        let (sends, receives) = match self.strategy {
            MatchStrategy::ById => collect_by_id(events, link),
            MatchStrategy::PositionalSkip => collect_positional(events, link),
        };

        let mut samples = Vec::with_capacity(receives.len());
        let mut unmatched = 0;
        let mut discarded = 0;
        for (&packet_id, &received) in &receives {
            let Some(&sent) = sends.get(&packet_id) else {
                unmatched += 1;
                continue;
            };
            if received < sent {
                debug!(
                    "Discarding packet {} received at {} before its send at {}",
                    packet_id, received, sent
                );
                discarded += 1;
                continue;
            }
            samples.push(LatencySample {
                time: received,
                latency: received - sent,
                packet_id,
            });
        }
        samples.sort_by(|a, b| {
            a.time
                .total_cmp(&b.time)
                .then_with(|| a.packet_id.cmp(&b.packet_id))
        });

        LatencySeries {
            link,
            samples,
            unmatched,
            discarded,
        }
    }
}

type Times = HashMap<PacketId, f64>;

/// Forward scan keeping the first send and receive of each id. Ids dropped
/// on the link are excluded outright, so a copy that reuses a dropped id
/// cannot pair with the original's send.
fn collect_by_id(events: &[TraceEvent], link: Link) -> (Times, Times) {
    let mut sends = Times::new();
    let mut receives = Times::new();
    let mut dropped = HashSet::new();
    for event in events.iter().filter(|e| e.on_link(link)) {
        if event.is_send() {
            sends.entry(event.packet_id).or_insert(event.time);
        } else if event.is_receive() {
            receives.entry(event.packet_id).or_insert(event.time);
        } else if event.is_drop() {
            dropped.insert(event.packet_id);
        }
    }
    receives.retain(|id, _| !dropped.contains(id));
    (sends, receives)
}

/// Reverse scan where each drop also discards the two events before it.
/// Later writes in the scan are earlier in the trace, so each map ends up
/// with the first occurrence.
fn collect_positional(events: &[TraceEvent], link: Link) -> (Times, Times) {
    let mut sends = Times::new();
    let mut receives = Times::new();
    let mut i = events.len();
    while i > 0 {
        i -= 1;
        let event = &events[i];
        if event.is_drop() {
            i = i.saturating_sub(2);
            continue;
        }
        if !event.on_link(link) {
            continue;
        }
        if event.is_send() {
            sends.insert(event.packet_id, event.time);
        } else if event.is_receive() {
            receives.insert(event.packet_id, event.time);
        }
    }
    (sends, receives)
}
