use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::time::Duration;

use churnscore_core::ScoreResult;
use parking_lot::Mutex;

pub const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

#[derive(Debug, Default, Clone)]
struct LatencyMetric {
    total_ms: f64,
    count: u64,
    max_ms: f64,
}

#[derive(Debug, Default, Clone)]
struct MetricsRegistry {
    requests: BTreeMap<(&'static str, u16), u64>,
    latency: BTreeMap<&'static str, LatencyMetric>,
    items_scored: u64,
    reasons: BTreeMap<&'static str, u64>,
}

/// In-process counters exposed on `GET /metrics`.
#[derive(Debug, Default)]
pub struct Metrics {
    registry: Mutex<MetricsRegistry>,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_request(&self, route: &'static str, status: u16, elapsed: Duration) {
        let latency_ms = elapsed.as_secs_f64() * 1_000.0;
        let mut locked = self.registry.lock();
        let count = locked.requests.entry((route, status)).or_default();
        *count = count.saturating_add(1);
        let latency = locked.latency.entry(route).or_default();
        latency.total_ms += latency_ms;
        latency.count = latency.count.saturating_add(1);
        latency.max_ms = latency.max_ms.max(latency_ms);
    }

    pub fn record_scored(&self, results: &[ScoreResult]) {
        let mut locked = self.registry.lock();
        locked.items_scored = locked.items_scored.saturating_add(results.len() as u64);
        for reason in results.iter().flat_map(|r| r.reasons.iter()) {
            let count = locked.reasons.entry(reason.as_str()).or_default();
            *count = count.saturating_add(1);
        }
    }

    pub fn requests_total(&self) -> u64 {
        self.registry.lock().requests.values().sum()
    }

    pub fn items_scored(&self) -> u64 {
        self.registry.lock().items_scored
    }

    pub fn render_text(&self) -> String {
        let snapshot = self.registry.lock().clone();
        let mut out = String::new();

        out.push_str("# TYPE churnscore_http_requests_total counter\n");
        for ((route, status), count) in &snapshot.requests {
            let _ = writeln!(
                out,
                "churnscore_http_requests_total{{route=\"{route}\",status=\"{status}\"}} {count}"
            );
        }

        out.push_str("# TYPE churnscore_http_latency_ms_sum counter\n");
        out.push_str("# TYPE churnscore_http_latency_ms_count counter\n");
        out.push_str("# TYPE churnscore_http_latency_ms_max gauge\n");
        for (route, m) in &snapshot.latency {
            let _ = writeln!(
                out,
                "churnscore_http_latency_ms_sum{{route=\"{route}\"}} {:.3}",
                m.total_ms
            );
            let _ = writeln!(
                out,
                "churnscore_http_latency_ms_count{{route=\"{route}\"}} {}",
                m.count
            );
            let _ = writeln!(
                out,
                "churnscore_http_latency_ms_max{{route=\"{route}\"}} {:.3}",
                m.max_ms
            );
        }

        out.push_str("# TYPE churnscore_items_scored_total counter\n");
        let _ = writeln!(out, "churnscore_items_scored_total {}", snapshot.items_scored);

        out.push_str("# TYPE churnscore_reasons_total counter\n");
        for (reason, count) in &snapshot.reasons {
            let _ = writeln!(out, "churnscore_reasons_total{{reason=\"{reason}\"}} {count}");
        }
        out
    }
}
