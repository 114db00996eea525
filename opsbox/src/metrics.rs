//! Metrics declaration and recording.
//!
//! Enable the `metrics` cargo feature to emit through the [`metrics`]
//! facade; with the feature disabled every helper is a no-op the compiler
//! eliminates.

use std::time::Duration;

#[cfg(feature = "metrics")]
use lazy_static::lazy_static;

#[cfg(feature = "metrics")]
lazy_static! {
    /// Track number of tool invocations by tool and status.
    pub static ref TOOL_INVOCATIONS: &'static str = {
        metrics::describe_counter!(
            "opsbox_tool_invocations_total",
            "Total number of tool invocations by tool and status."
        );
        "opsbox_tool_invocations_total"
    };
    /// Tool execution latency histogram.
    pub static ref TOOL_DURATION: &'static str = {
        metrics::describe_histogram!(
            "opsbox_tool_duration_seconds",
            metrics::Unit::Seconds,
            "Tool execution latencies in seconds."
        );
        "opsbox_tool_duration_seconds"
    };
    /// Track number of tool-level cache hits.
    pub static ref TOOL_CACHE_HITS: &'static str = {
        metrics::describe_counter!(
            "opsbox_tool_cache_hits_total",
            "Total number of tool invocations answered from cache."
        );
        "opsbox_tool_cache_hits_total"
    };
    /// Track per-adapter fan-out failures.
    pub static ref ADAPTER_FAILURES: &'static str = {
        metrics::describe_counter!(
            "opsbox_adapter_failures_total",
            "Total number of per-adapter fan-out failures by adapter and code."
        );
        "opsbox_adapter_failures_total"
    };
}

/// Records one completed tool invocation.
#[cfg(feature = "metrics")]
pub fn record_tool(tool: &str, success: bool, cache_hit: bool, duration: Duration) {
    let status = if success { "ok" } else { "error" };
    metrics::counter!(*TOOL_INVOCATIONS, "tool" => tool.to_owned(), "status" => status)
        .increment(1);
    metrics::histogram!(*TOOL_DURATION, "tool" => tool.to_owned()).record(duration.as_secs_f64());
    if cache_hit {
        metrics::counter!(*TOOL_CACHE_HITS, "tool" => tool.to_owned()).increment(1);
    }
}

/// No-op when the `metrics` feature is disabled.
#[cfg(not(feature = "metrics"))]
pub fn record_tool(_tool: &str, _success: bool, _cache_hit: bool, _duration: Duration) {}

/// Records one per-adapter fan-out failure.
#[cfg(feature = "metrics")]
pub fn record_adapter_failure(adapter: &str, code: &str) {
    metrics::counter!(
        *ADAPTER_FAILURES,
        "adapter" => adapter.to_owned(),
        "code" => code.to_owned()
    )
    .increment(1);
}

/// No-op when the `metrics` feature is disabled.
#[cfg(not(feature = "metrics"))]
pub fn record_adapter_failure(_adapter: &str, _code: &str) {}
