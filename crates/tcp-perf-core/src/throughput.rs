use crate::error::AnalysisError;
use serde::Serialize;
use tcp_perf_abstract::{AnalysisOptions, EvictionTick, Link, TraceEvent};

/// Bytes per megabit; converts bytes/s to Mbit/s.
pub const BYTES_PER_MEGABIT: f64 = 125_000.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ThroughputTick {
    pub time: f64,
    /// Throughput of the current window in Mbit/s.
    pub mbps: f64,
}

/// Output of one sliding-window pass over a flow's receives on a link.
#[derive(Debug, Clone, Serialize)]
pub struct ThroughputSeries {
    pub link: Link,
    pub window: f64,
    pub ticks: Vec<ThroughputTick>,
    /// Bytes admitted over the whole pass.
    pub total_bytes: u64,
    /// Number of receive events on the link.
    pub receives: usize,
    pub first_receive: Option<f64>,
    pub last_receive: Option<f64>,
    /// Times the head cursor advanced.
    pub admitted: usize,
    /// Times the tail cursor advanced.
    pub evicted: usize,
}

impl ThroughputSeries {
    /// Average throughput in Mbit/s over the observed span less one window,
    /// since a full window is needed before the first valid sample.
    pub fn average_mbps(&self) -> Result<f64, AnalysisError> {
        let (Some(first), Some(last)) = (self.first_receive, self.last_receive) else {
            return Err(self.insufficient());
        };
        if self.receives < 2 {
            return Err(self.insufficient());
        }
        let span = last - first;
        let denominator = span - self.window;
        if !(denominator > 0.0) {
            return Err(AnalysisError::SpanTooShort {
                span,
                window: self.window,
            });
        }
        Ok(self.total_bytes as f64 / denominator / BYTES_PER_MEGABIT)
    }

    fn insufficient(&self) -> AnalysisError {
        AnalysisError::InsufficientData {
            metric: "throughput",
            link: self.link,
            qualifying: self.receives,
        }
    }

    /// `(time, mbps)` pairs in tick order.
    pub fn pairs(&self) -> Vec<(f64, f64)> {
        self.ticks.iter().map(|t| (t.time, t.mbps)).collect()
    }
}

/// Sliding-window throughput over receive events.
#[derive(Debug, Clone, Copy)]
pub struct ThroughputEstimator {
    window: f64,
    eviction_tick: EvictionTick,
    drain: bool,
}

impl ThroughputEstimator {
    pub fn new(window: f64) -> Result<Self, AnalysisError> {
        if !(window.is_finite() && window > 0.0) {
            return Err(AnalysisError::InvalidWindow(window));
        }
        Ok(Self {
            window,
            eviction_tick: EvictionTick::default(),
            drain: false,
        })
    }

    pub fn from_options(options: &AnalysisOptions) -> Result<Self, AnalysisError> {
        Ok(Self::new(options.window)?
            .eviction_tick(options.eviction_tick)
            .drain(options.drain))
    }

    pub fn eviction_tick(mut self, tick: EvictionTick) -> Self {
        self.eviction_tick = tick;
        self
    }

    pub fn drain(mut self, drain: bool) -> Self {
        self.drain = drain;
        self
    }

    pub fn window(&self) -> f64 {
        self.window
    }

    fn rate(&self, window_bytes: u64) -> f64 {
        window_bytes as f64 / self.window / BYTES_PER_MEGABIT
    }

    fn eviction_time(&self, evicted: f64) -> f64 {
        match self.eviction_tick {
            EvictionTick::WindowStart => evicted,
            EvictionTick::WindowEnd => evicted + self.window,
        }
    }

    /// Run the window over every receive on `link` in `events`. The events
    /// should already be restricted to one flow.
    pub fn estimate(&self, events: &[TraceEvent], link: Link) -> ThroughputSeries {
        let mut receives: Vec<(f64, u32)> = events
            .iter()
            .filter(|e| e.is_receive() && e.on_link(link))
            .map(|e| (e.time, e.size))
            .collect();
        receives.sort_by(|a, b| a.0.total_cmp(&b.0));

        let n = receives.len();
        let mut ticks = Vec::with_capacity(n * 2);
        let mut head = 0;
        let mut tail = 0;
        let mut window_bytes: u64 = 0;
        let mut total_bytes: u64 = 0;
        let mut evicted = 0;

        while head < n {
            let (time, size) = receives[head];
            let (tail_time, tail_size) = receives[tail];
            let bound = tail_time + self.window;

            // An empty window always admits.
            if tail == head || time < bound {
                window_bytes += u64::from(size);
                total_bytes += u64::from(size);
                head += 1;
                ticks.push(ThroughputTick {
                    time,
                    mbps: self.rate(window_bytes),
                });
            } else if time > bound {
                window_bytes -= u64::from(tail_size);
                tail += 1;
                evicted += 1;
                ticks.push(ThroughputTick {
                    time: self.eviction_time(tail_time),
                    mbps: self.rate(window_bytes),
                });
            } else {
                window_bytes = window_bytes + u64::from(size) - u64::from(tail_size);
                total_bytes += u64::from(size);
                head += 1;
                tail += 1;
                evicted += 1;
                ticks.push(ThroughputTick {
                    time,
                    mbps: self.rate(window_bytes),
                });
            }
        }

        if self.drain {
            while tail < head {
                let (tail_time, tail_size) = receives[tail];
                window_bytes -= u64::from(tail_size);
                tail += 1;
                evicted += 1;
                ticks.push(ThroughputTick {
                    time: self.eviction_time(tail_time),
                    mbps: self.rate(window_bytes),
                });
            }
        }

        ThroughputSeries {
            link,
            window: self.window,
            ticks,
            total_bytes,
            receives: n,
            first_receive: receives.first().map(|r| r.0),
            last_receive: receives.last().map(|r| r.0),
            admitted: head,
            evicted,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tcp_perf_abstract::{EventKind, PacketClass};

    const LINK: Link = Link { from: 1, to: 2 };

    fn receive(time: f64, size: u32) -> TraceEvent {
        TraceEvent::new(EventKind::Receive, time, LINK, PacketClass::Tcp, size).with_flow(1, 0, 0)
    }

    fn assert_close(a: f64, b: f64) {
        assert!((a - b).abs() < 1e-9, "{a} != {b}");
    }

    #[test]
    fn test_even_spacing_average() {
        let events: Vec<TraceEvent> = (0..=100).map(|i| receive(i as f64 * 0.01, 1000)).collect();
        let series = ThroughputEstimator::new(0.2).unwrap().estimate(&events, LINK);
        assert_eq!(series.total_bytes, 101_000);
        let expected = 101_000.0 / (1.0 - 0.2) / BYTES_PER_MEGABIT;
        assert_close(series.average_mbps().unwrap(), expected);
    }

    #[test]
    fn test_cursor_visits_with_drain() {
        let times = [0.0, 0.05, 0.11, 0.2, 0.31, 0.32, 0.6, 0.61, 1.4];
        let events: Vec<TraceEvent> = times
            .iter()
            .enumerate()
            .map(|(i, t)| receive(*t, 100 + i as u32))
            .collect();
        let series = ThroughputEstimator::new(0.2)
            .unwrap()
            .drain(true)
            .estimate(&events, LINK);
        assert_eq!(series.admitted, times.len());
        assert_eq!(series.evicted, times.len());
        assert_eq!(series.ticks.last().unwrap().mbps, 0.0);
    }

    #[test]
    fn test_boundary_admits_and_evicts_together() {
        let events = vec![receive(0.0, 1000), receive(0.2, 1000)];
        let series = ThroughputEstimator::new(0.2).unwrap().estimate(&events, LINK);
        assert_eq!(series.ticks.len(), 2);
        assert_eq!(series.admitted, 2);
        assert_eq!(series.evicted, 1);
        assert_close(series.ticks[1].time, 0.2);
        assert_close(series.ticks[1].mbps, 1000.0 / 0.2 / BYTES_PER_MEGABIT);
    }

    #[test]
    fn test_eviction_tick_variants() {
        let events = vec![receive(0.0, 1000), receive(0.5, 1000)];
        let end = ThroughputEstimator::new(0.2).unwrap().estimate(&events, LINK);
        let times: Vec<f64> = end.ticks.iter().map(|t| t.time).collect();
        assert_eq!(times, vec![0.0, 0.2, 0.5]);
        assert_eq!(end.ticks[1].mbps, 0.0);

        let start = ThroughputEstimator::new(0.2)
            .unwrap()
            .eviction_tick(EvictionTick::WindowStart)
            .estimate(&events, LINK);
        let times: Vec<f64> = start.ticks.iter().map(|t| t.time).collect();
        assert_eq!(times, vec![0.0, 0.0, 0.5]);
    }

    #[test]
    fn test_unsorted_input_and_other_links_ignored() {
        let mut events = vec![receive(0.3, 500), receive(0.1, 700)];
        events.push(
            TraceEvent::new(EventKind::Receive, 0.2, Link::new(2, 3), PacketClass::Tcp, 9000)
                .with_flow(1, 0, 0),
        );
        events.push(
            TraceEvent::new(EventKind::Send, 0.15, LINK, PacketClass::Tcp, 9000).with_flow(1, 0, 0),
        );
        let series = ThroughputEstimator::new(0.1).unwrap().estimate(&events, LINK);
        assert_eq!(series.receives, 2);
        assert_eq!(series.first_receive, Some(0.1));
        assert_eq!(series.total_bytes, 1200);
    }

    #[test]
    fn test_insufficient_data_is_distinct() {
        let estimator = ThroughputEstimator::new(0.2).unwrap();
        let empty = estimator.estimate(&[], LINK);
        assert!(empty.ticks.is_empty());
        assert!(matches!(
            empty.average_mbps(),
            Err(AnalysisError::InsufficientData { qualifying: 0, .. })
        ));

        let single = estimator.estimate(&[receive(1.0, 1000)], LINK);
        assert_eq!(single.ticks.len(), 1);
        assert!(matches!(
            single.average_mbps(),
            Err(AnalysisError::InsufficientData { qualifying: 1, .. })
        ));

        let short = estimator.estimate(&[receive(1.0, 1000), receive(1.1, 1000)], LINK);
        assert!(matches!(
            short.average_mbps(),
            Err(AnalysisError::SpanTooShort { .. })
        ));
    }

    #[test]
    fn test_invalid_window() {
        assert!(ThroughputEstimator::new(0.0).is_err());
        assert!(ThroughputEstimator::new(f64::NAN).is_err());
    }
}
