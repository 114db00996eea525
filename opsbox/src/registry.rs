//! Adapter registry: lifecycle, routing, and bounded parallel fan-out.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{FuturesUnordered, StreamExt};
use serde::Serialize;
use smol_str::SmolStr;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use opsbox_core::{SourceAdapter, SourceError};
use opsbox_resilience::{BreakerConfig, BreakerRegistry};

use crate::error::{ErrorCode, source_error_code};

/// Registry limits and breaker defaults.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Global ceiling on concurrent outbound adapter calls.
    pub global_concurrency: usize,
    /// Per-adapter ceiling.
    pub per_adapter_concurrency: usize,
    /// How long a call may queue for a permit before failing `Overloaded`.
    pub queue_wait: Duration,
    /// Breaker defaults applied per adapter.
    pub breaker: BreakerConfig,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            global_concurrency: 50,
            per_adapter_concurrency: 8,
            queue_wait: Duration::from_millis(500),
            breaker: BreakerConfig::default(),
        }
    }
}

/// A per-adapter failure annotation attached to response metadata.
#[derive(Debug, Clone, Serialize)]
pub struct AdapterFailure {
    /// Adapter name.
    pub adapter: SmolStr,
    /// Caller-facing error code.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
}

/// Outcome of one fan-out: per-adapter successes and failure annotations.
pub struct FanOut<T> {
    /// Successful results paired with the producing adapter.
    pub ok: Vec<(Arc<dyn SourceAdapter>, T)>,
    /// Per-adapter failure annotations (including breaker skips).
    pub failures: Vec<AdapterFailure>,
    /// The overall deadline fired with calls still outstanding.
    pub degraded: bool,
}

impl<T> FanOut<T> {
    /// Whether no adapter produced a result.
    pub fn all_failed(&self) -> bool {
        self.ok.is_empty() && !self.failures.is_empty()
    }
}

/// Holds the configured adapters in priority order and fans calls out to
/// them under the global and per-adapter concurrency ceilings.
///
/// Every adapter call runs through that adapter's circuit breaker: while
/// the breaker is open the adapter is skipped entirely (zero outbound
/// calls) and reported in the failure annotations.
pub struct AdapterRegistry {
    adapters: Vec<Arc<dyn SourceAdapter>>,
    breakers: BreakerRegistry,
    global: Arc<Semaphore>,
    per_adapter: HashMap<SmolStr, Arc<Semaphore>>,
    config: RegistryConfig,
}

impl AdapterRegistry {
    /// Creates an empty registry.
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            adapters: Vec::new(),
            breakers: BreakerRegistry::new(config.breaker),
            global: Arc::new(Semaphore::new(config.global_concurrency.max(1))),
            per_adapter: HashMap::new(),
            config,
        }
    }

    /// Registers an adapter, keeping the list sorted by priority.
    pub fn register(&mut self, adapter: Arc<dyn SourceAdapter>) {
        self.per_adapter.insert(
            SmolStr::new(adapter.name()),
            Arc::new(Semaphore::new(self.config.per_adapter_concurrency.max(1))),
        );
        self.adapters.push(adapter);
        self.adapters.sort_by_key(|a| a.priority());
    }

    /// The registered adapters, in priority order.
    pub fn adapters(&self) -> &[Arc<dyn SourceAdapter>] {
        &self.adapters
    }

    /// Looks up an adapter by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn SourceAdapter>> {
        self.adapters.iter().find(|a| a.name() == name).cloned()
    }

    /// The breaker guarding the named adapter.
    pub fn breaker_state(&self, name: &str) -> opsbox_resilience::CircuitState {
        self.breakers.breaker(&breaker_key(name)).state()
    }

    /// Initializes every adapter, tolerating individual failures.
    ///
    /// Returns the names of adapters that failed to initialize; they stay
    /// registered and may recover on a later refresh.
    pub async fn initialize_all(&self) -> Vec<(SmolStr, SourceError)> {
        let mut failed = Vec::new();
        for adapter in &self.adapters {
            match adapter.initialize().await {
                Ok(()) => {
                    info!(adapter = adapter.name(), "adapter initialized");
                }
                Err(err) => {
                    warn!(adapter = adapter.name(), error = %err, "adapter failed to initialize");
                    failed.push((SmolStr::new(adapter.name()), err));
                }
            }
        }
        failed
    }

    /// Releases every adapter's resources.
    pub async fn cleanup_all(&self) {
        for adapter in &self.adapters {
            adapter.cleanup().await;
        }
    }

    /// Fans `call` out to `eligible` adapters in parallel.
    ///
    /// Each call runs under the per-adapter soft deadline; the whole fan-out
    /// runs under the overall hard deadline. A hard deadline firing cancels
    /// in-flight calls, annotates them `REQUEST_TIMEOUT`, and marks the
    /// outcome degraded - completed results are kept.
    pub async fn fan_out<T, F, Fut>(
        &self,
        eligible: &[Arc<dyn SourceAdapter>],
        soft_deadline: Duration,
        hard_deadline: Duration,
        call: F,
    ) -> FanOut<T>
    where
        T: Send,
        F: Fn(Arc<dyn SourceAdapter>) -> Fut,
        Fut: std::future::Future<Output = Result<T, SourceError>> + Send,
    {
        let mut out = FanOut {
            ok: Vec::new(),
            failures: Vec::new(),
            degraded: false,
        };

        let mut in_flight = FuturesUnordered::new();
        for adapter in eligible {
            let breaker = self.breakers.breaker(&breaker_key(adapter.name()));
            if let Err(open) = breaker.try_call() {
                debug!(adapter = adapter.name(), "skipped, breaker open");
                out.failures.push(AdapterFailure {
                    adapter: SmolStr::new(adapter.name()),
                    code: ErrorCode::CircuitOpen,
                    message: open.to_string(),
                });
                continue;
            }

            let adapter = Arc::clone(adapter);
            let semaphore = self.per_adapter.get(adapter.name()).cloned();
            let global = Arc::clone(&self.global);
            let queue_wait = self.config.queue_wait;
            let fut = call(Arc::clone(&adapter));
            in_flight.push(async move {
                let name = SmolStr::new(adapter.name());
                let permits = async {
                    let global_permit = global
                        .acquire_owned()
                        .await
                        .map_err(|_| ())?;
                    let local_permit = match &semaphore {
                        Some(semaphore) => {
                            Some(Arc::clone(semaphore).acquire_owned().await.map_err(|_| ())?)
                        }
                        None => None,
                    };
                    Ok::<_, ()>((global_permit, local_permit))
                };
                let permits = match tokio::time::timeout(queue_wait, permits).await {
                    Ok(Ok(permits)) => permits,
                    _ => {
                        return (
                            adapter,
                            Err(AdapterFailure {
                                adapter: name,
                                code: ErrorCode::Overloaded,
                                message: "queued past the concurrency ceiling".to_owned(),
                            }),
                        );
                    }
                };

                let result = tokio::time::timeout(soft_deadline, fut).await;
                drop(permits);
                match result {
                    Ok(Ok(value)) => (adapter, Ok(value)),
                    Ok(Err(err)) => {
                        let failure = AdapterFailure {
                            adapter: name,
                            code: source_error_code(&err),
                            message: err.to_string(),
                        };
                        (adapter, Err(failure))
                    }
                    Err(_) => (
                        adapter,
                        Err(AdapterFailure {
                            adapter: name,
                            code: ErrorCode::RequestTimeout,
                            message: format!("adapter deadline of {soft_deadline:?} exceeded"),
                        }),
                    ),
                }
            });
        }

        let hard_sleep = tokio::time::sleep(hard_deadline);
        tokio::pin!(hard_sleep);
        let mut outstanding = in_flight.len();

        while outstanding > 0 {
            tokio::select! {
                biased;
                _ = &mut hard_sleep => {
                    out.degraded = true;
                    break;
                }
                Some((adapter, result)) = in_flight.next() => {
                    outstanding -= 1;
                    let breaker = self.breakers.breaker(&breaker_key(adapter.name()));
                    match result {
                        Ok(value) => {
                            breaker.record_success();
                            out.ok.push((adapter, value));
                        }
                        Err(failure) => {
                            // Overloaded is back-pressure on us, not a sign
                            // of adapter ill health.
                            if failure.code != ErrorCode::Overloaded {
                                breaker.record_failure();
                            }
                            out.failures.push(failure);
                        }
                    }
                }
            }
        }

        if out.degraded {
            // Annotate and cancel whatever was still running.
            let completed: std::collections::HashSet<SmolStr> = out
                .ok
                .iter()
                .map(|(a, _)| SmolStr::new(a.name()))
                .chain(out.failures.iter().map(|f| f.adapter.clone()))
                .collect();
            for adapter in eligible {
                let name = SmolStr::new(adapter.name());
                if !completed.contains(&name) {
                    self.breakers.breaker(&breaker_key(adapter.name())).record_failure();
                    out.failures.push(AdapterFailure {
                        adapter: name,
                        code: ErrorCode::RequestTimeout,
                        message: format!("overall deadline of {hard_deadline:?} exceeded"),
                    });
                }
            }
            drop(in_flight);
        }

        out
    }

    /// Resets breaker state. Used only by tests.
    pub fn reset_breakers(&self) {
        self.breakers.reset();
    }
}

fn breaker_key(adapter_name: &str) -> String {
    format!("adapter:{adapter_name}")
}
