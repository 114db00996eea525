//! Performance monitoring: per-tool latency windows and rule-based alerts.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use smol_str::SmolStr;
use tokio::sync::mpsc;
use tracing::warn;

use opsbox_core::RollingWindow;

/// Capacity of the bounded alert channel. When consumers fall behind,
/// further alerts are dropped, not buffered.
const ALERT_CHANNEL_CAPACITY: usize = 64;

/// Alerting thresholds.
#[derive(Debug, Clone)]
pub struct AlertRules {
    /// Alert when a tool's p95 exceeds this.
    pub p95_latency: Duration,
    /// Alert when a tool's error rate exceeds this fraction.
    pub error_rate: f64,
    /// Minimum samples before rules fire.
    pub min_samples: usize,
}

impl Default for AlertRules {
    fn default() -> Self {
        Self {
            p95_latency: Duration::from_millis(2000),
            error_rate: 0.25,
            min_samples: 20,
        }
    }
}

/// A rule violation published on the alert channel.
#[derive(Debug, Clone, Serialize)]
pub struct PerfAlert {
    /// Tool the rule fired for.
    pub tool: SmolStr,
    /// Which rule fired.
    pub rule: &'static str,
    /// Observed value (milliseconds or rate).
    pub observed: f64,
    /// Configured threshold.
    pub threshold: f64,
    /// When the rule fired.
    pub at: DateTime<Utc>,
}

struct ToolStats {
    window: RollingWindow,
    invocations: AtomicU64,
    errors: AtomicU64,
    cache_hits: AtomicU64,
}

impl ToolStats {
    fn new() -> Self {
        Self {
            window: RollingWindow::new(512),
            invocations: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
        }
    }
}

/// Per-tool latency report entry.
#[derive(Debug, Clone, Serialize)]
pub struct ToolReport {
    /// Total invocations.
    pub invocations: u64,
    /// Failed invocations.
    pub errors: u64,
    /// Cache hits.
    pub cache_hits: u64,
    /// Average latency (ms) over the rolling window.
    pub avg_latency_ms: f64,
    /// Median latency (ms).
    pub p50_latency_ms: f64,
    /// 95th percentile latency (ms).
    pub p95_latency_ms: f64,
    /// Success rate over the rolling window.
    pub success_rate: f64,
}

/// Rolling performance report across all tools.
#[derive(Debug, Clone, Serialize)]
pub struct PerformanceReport {
    /// Per-tool entries, keyed by tool name.
    pub tools: BTreeMap<SmolStr, ToolReport>,
    /// When the report was taken.
    pub taken_at: DateTime<Utc>,
}

/// Internally synchronized latency and outcome tracker.
///
/// Consumers subscribe to rule-based alerts by taking the bounded channel
/// receiver; the monitor never blocks on a slow consumer.
pub struct PerformanceMonitor {
    tools: DashMap<SmolStr, Arc<ToolStats>>,
    rules: AlertRules,
    alert_tx: mpsc::Sender<PerfAlert>,
    alert_rx: std::sync::Mutex<Option<mpsc::Receiver<PerfAlert>>>,
}

impl PerformanceMonitor {
    /// Creates a monitor with the given rules.
    pub fn new(rules: AlertRules) -> Self {
        let (alert_tx, alert_rx) = mpsc::channel(ALERT_CHANNEL_CAPACITY);
        Self {
            tools: DashMap::new(),
            rules,
            alert_tx,
            alert_rx: std::sync::Mutex::new(Some(alert_rx)),
        }
    }

    /// Takes the alert receiver. Only the first caller gets it.
    pub fn subscribe(&self) -> Option<mpsc::Receiver<PerfAlert>> {
        self.alert_rx.lock().ok().and_then(|mut rx| rx.take())
    }

    fn stats(&self, tool: &str) -> Arc<ToolStats> {
        self.tools
            .entry(SmolStr::new(tool))
            .or_insert_with(|| Arc::new(ToolStats::new()))
            .clone()
    }

    /// Records one tool invocation.
    pub fn record(&self, tool: &str, latency: Duration, success: bool, cache_hit: bool) {
        let stats = self.stats(tool);
        stats.window.record(latency, success);
        stats.invocations.fetch_add(1, Ordering::Relaxed);
        if !success {
            stats.errors.fetch_add(1, Ordering::Relaxed);
        }
        if cache_hit {
            stats.cache_hits.fetch_add(1, Ordering::Relaxed);
        }
        self.evaluate_rules(tool, &stats);
    }

    fn evaluate_rules(&self, tool: &str, stats: &ToolStats) {
        if stats.window.len() < self.rules.min_samples {
            return;
        }
        let p95 = stats.window.percentile_ms(0.95);
        let threshold_ms = self.rules.p95_latency.as_secs_f64() * 1000.0;
        if p95 > threshold_ms {
            self.publish(PerfAlert {
                tool: SmolStr::new(tool),
                rule: "p95_latency",
                observed: p95,
                threshold: threshold_ms,
                at: Utc::now(),
            });
        }
        let error_rate = 1.0 - stats.window.success_rate();
        if error_rate > self.rules.error_rate {
            self.publish(PerfAlert {
                tool: SmolStr::new(tool),
                rule: "error_rate",
                observed: error_rate,
                threshold: self.rules.error_rate,
                at: Utc::now(),
            });
        }
    }

    fn publish(&self, alert: PerfAlert) {
        // Bounded channel: losing alerts under pressure is acceptable.
        if let Err(mpsc::error::TrySendError::Closed(alert)) = self.alert_tx.try_send(alert) {
            warn!(tool = %alert.tool, rule = alert.rule, "alert channel closed");
        }
    }

    /// Point-in-time report over every tool seen so far.
    pub fn report(&self) -> PerformanceReport {
        let tools = self
            .tools
            .iter()
            .map(|entry| {
                let stats = entry.value();
                (
                    entry.key().clone(),
                    ToolReport {
                        invocations: stats.invocations.load(Ordering::Relaxed),
                        errors: stats.errors.load(Ordering::Relaxed),
                        cache_hits: stats.cache_hits.load(Ordering::Relaxed),
                        avg_latency_ms: stats.window.avg_latency_ms(),
                        p50_latency_ms: stats.window.percentile_ms(0.5),
                        p95_latency_ms: stats.window.percentile_ms(0.95),
                        success_rate: stats.window.success_rate(),
                    },
                )
            })
            .collect();
        PerformanceReport {
            tools,
            taken_at: Utc::now(),
        }
    }
}

impl Default for PerformanceMonitor {
    fn default() -> Self {
        Self::new(AlertRules::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn report_aggregates_invocations() {
        let monitor = PerformanceMonitor::default();
        monitor.record("search_runbooks", Duration::from_millis(20), true, false);
        monitor.record("search_runbooks", Duration::from_millis(40), true, true);
        monitor.record("search_runbooks", Duration::from_millis(60), false, false);

        let report = monitor.report();
        let tool = &report.tools[&SmolStr::new("search_runbooks")];
        assert_eq!(tool.invocations, 3);
        assert_eq!(tool.errors, 1);
        assert_eq!(tool.cache_hits, 1);
        assert!((tool.avg_latency_ms - 40.0).abs() < 1.0);
    }

    #[tokio::test]
    async fn error_rate_rule_publishes_alert() {
        let monitor = PerformanceMonitor::new(AlertRules {
            p95_latency: Duration::from_secs(60),
            error_rate: 0.5,
            min_samples: 4,
        });
        let mut alerts = monitor.subscribe().unwrap();
        for _ in 0..4 {
            monitor.record("get_procedure", Duration::from_millis(1), false, false);
        }
        let alert = alerts.recv().await.unwrap();
        assert_eq!(alert.rule, "error_rate");
        assert_eq!(alert.tool.as_str(), "get_procedure");
        assert!(alert.observed > alert.threshold);
    }

    #[tokio::test]
    async fn subscribe_is_single_shot() {
        let monitor = PerformanceMonitor::default();
        assert!(monitor.subscribe().is_some());
        assert!(monitor.subscribe().is_none());
    }
}
