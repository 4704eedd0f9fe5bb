use common::ActionKind;
use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Metrics collector for Prometheus-compatible output
pub struct MetricsCollector {
    dispatches: Arc<DashMap<ActionKind, AtomicU64>>,
    rejections: Arc<DashMap<ActionKind, AtomicU64>>,
    failures: Arc<DashMap<ActionKind, AtomicU64>>,
    poll_requests: Arc<AtomicU64>,
    poll_timeouts: Arc<AtomicU64>,
    tracked_jobs: Arc<AtomicU64>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            dispatches: Arc::new(DashMap::new()),
            rejections: Arc::new(DashMap::new()),
            failures: Arc::new(DashMap::new()),
            poll_requests: Arc::new(AtomicU64::new(0)),
            poll_timeouts: Arc::new(AtomicU64::new(0)),
            tracked_jobs: Arc::new(AtomicU64::new(0)),
        }
    }

    fn bump(map: &DashMap<ActionKind, AtomicU64>, kind: ActionKind) {
        map.entry(kind)
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dispatch(&self, kind: ActionKind) {
        Self::bump(&self.dispatches, kind);
    }

    pub fn record_rejection(&self, kind: ActionKind) {
        Self::bump(&self.rejections, kind);
    }

    pub fn record_failure(&self, kind: ActionKind) {
        Self::bump(&self.failures, kind);
    }

    pub fn record_poll(&self) {
        self.poll_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_poll_timeout(&self) {
        self.poll_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_tracked_jobs(&self, count: u64) {
        self.tracked_jobs.store(count, Ordering::Relaxed);
    }

    pub fn dispatch_count(&self, kind: ActionKind) -> u64 {
        self.dispatches.get(&kind).map(|c| c.load(Ordering::Relaxed)).unwrap_or(0)
    }

    pub fn poll_count(&self) -> u64 {
        self.poll_requests.load(Ordering::Relaxed)
    }

    fn export_per_action(output: &mut String, name: &str, help: &str, map: &DashMap<ActionKind, AtomicU64>) {
        output.push_str(&format!("# HELP {} {}\n", name, help));
        output.push_str(&format!("# TYPE {} counter\n", name));
        // Stable order for scrapers and tests
        for kind in ActionKind::ALL {
            if let Some(count) = map.get(&kind) {
                output.push_str(&format!(
                    "{}{{action=\"{}\"}} {}\n",
                    name,
                    kind.verb(),
                    count.load(Ordering::Relaxed)
                ));
            }
        }
        output.push('\n');
    }

    /// Generate Prometheus-compatible metrics output
    pub fn export(&self) -> String {
        let mut output = String::new();

        Self::export_per_action(&mut output, "capiops_dispatches_total", "Actions dispatched", &self.dispatches);
        Self::export_per_action(&mut output, "capiops_rejections_total", "Actions rejected as already in progress", &self.rejections);
        Self::export_per_action(&mut output, "capiops_failures_total", "Actions that ended failed without a backend job", &self.failures);

        output.push_str("# HELP capiops_poll_requests_total Job status requests issued by the poller\n");
        output.push_str("# TYPE capiops_poll_requests_total counter\n");
        output.push_str(&format!(
            "capiops_poll_requests_total {}\n\n",
            self.poll_requests.load(Ordering::Relaxed)
        ));

        output.push_str("# HELP capiops_poll_timeouts_total Jobs marked failed after exhausting poll attempts\n");
        output.push_str("# TYPE capiops_poll_timeouts_total counter\n");
        output.push_str(&format!(
            "capiops_poll_timeouts_total {}\n\n",
            self.poll_timeouts.load(Ordering::Relaxed)
        ));

        output.push_str("# HELP capiops_tracked_jobs Jobs currently being polled\n");
        output.push_str("# TYPE capiops_tracked_jobs gauge\n");
        output.push_str(&format!(
            "capiops_tracked_jobs {}\n",
            self.tracked_jobs.load(Ordering::Relaxed)
        ));

        output
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}
