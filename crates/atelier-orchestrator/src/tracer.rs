//! Observability tracer.
//!
//! Wraps routed executions in trace spans and counters and forwards them
//! to an external sink. Strictly side-effect only: emission is
//! fire-and-forget through a bounded queue with a bounded retry, and a
//! sink failure can never fail the task that produced the event.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use atelier_core::{AgentId, TraceSpan};

use crate::config::TracerConfig;

/// One observability event bound for the external sink.
#[derive(Debug, Clone, PartialEq)]
pub enum TraceEvent {
    /// A finished execution span.
    Span(TraceSpan),
    /// A counter increment.
    Counter {
        name: String,
        labels: Vec<(String, String)>,
        value: u64,
    },
}

/// External observability sink. Implementations may fail; the tracer
/// retries a bounded number of times and then logs and moves on.
pub trait TraceSink: Send + Sync {
    /// Deliver one event.
    fn emit(&self, event: &TraceEvent) -> Result<(), String>;
}

/// Default sink: writes events to the process log.
#[derive(Default)]
pub struct LoggingSink;

impl TraceSink for LoggingSink {
    fn emit(&self, event: &TraceEvent) -> Result<(), String> {
        match event {
            TraceEvent::Span(span) => debug!(
                span_id = %span.span_id,
                name = %span.name,
                duration_ms = ?span.duration_ms(),
                "trace span"
            ),
            TraceEvent::Counter { name, value, .. } => {
                debug!(counter = %name, value, "trace counter")
            }
        }
        Ok(())
    }
}

#[derive(Default)]
struct AgentMetrics {
    dispatches: u64,
    failures: u64,
    latency_ms_sum: u64,
    latency_ms_count: u64,
}

#[derive(Default)]
struct Metrics {
    dispatches_total: AtomicU64,
    failures_total: AtomicU64,
    per_agent: Mutex<HashMap<AgentId, AgentMetrics>>,
}

/// Point-in-time view of the tracer's internal counters.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricsSnapshot {
    /// Total dispatches across all agents.
    pub dispatches_total: u64,
    /// Total terminal failures across all agents.
    pub failures_total: u64,
    /// Per-agent (dispatches, failures, latency sum ms, latency count).
    pub per_agent: Vec<(AgentId, u64, u64, u64, u64)>,
}

enum TracerCommand {
    Event(TraceEvent),
    Flush(oneshot::Sender<()>),
}

/// Best-effort span and metrics emitter.
pub struct Tracer {
    tx: mpsc::Sender<TracerCommand>,
    metrics: Arc<Metrics>,
}

impl Tracer {
    /// Create a tracer over the given sink and spawn its forwarder task.
    /// Must be called within a tokio runtime.
    pub fn new(sink: Arc<dyn TraceSink>, config: TracerConfig) -> Self {
        let (tx, rx) = mpsc::channel(config.queue_capacity);
        tokio::spawn(forward(sink, rx, config));
        Self {
            tx,
            metrics: Arc::new(Metrics::default()),
        }
    }

    /// Record a dispatch against an agent.
    pub fn record_dispatch(&self, agent_id: &AgentId) {
        self.metrics.dispatches_total.fetch_add(1, Ordering::Relaxed);
        {
            let mut per_agent = self
                .metrics
                .per_agent
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            per_agent.entry(agent_id.clone()).or_default().dispatches += 1;
        }
        self.emit(TraceEvent::Counter {
            name: "dispatches_total".into(),
            labels: vec![("agent".into(), agent_id.as_str().into())],
            value: 1,
        });
    }

    /// Record a terminal execution outcome and its latency.
    pub fn record_outcome(&self, agent_id: &AgentId, latency_ms: u64, failed: bool) {
        {
            let mut per_agent = self
                .metrics
                .per_agent
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            let entry = per_agent.entry(agent_id.clone()).or_default();
            entry.latency_ms_sum += latency_ms;
            entry.latency_ms_count += 1;
            if failed {
                entry.failures += 1;
            }
        }
        if failed {
            self.metrics.failures_total.fetch_add(1, Ordering::Relaxed);
            self.emit(TraceEvent::Counter {
                name: "failures_total".into(),
                labels: vec![("agent".into(), agent_id.as_str().into())],
                value: 1,
            });
        }
    }

    /// Forward a finished span to the sink.
    pub fn emit_span(&self, span: TraceSpan) {
        self.emit(TraceEvent::Span(span));
    }

    /// Wait until every queued event was delivered (or given up on).
    /// Intended for tests and shutdown.
    pub async fn flush(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.tx.send(TracerCommand::Flush(ack_tx)).await.is_ok() {
            let _ = ack_rx.await;
        }
    }

    /// Current internal counters, independent of sink health.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let per_agent = self
            .metrics
            .per_agent
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        let mut rows: Vec<_> = per_agent
            .iter()
            .map(|(id, m)| {
                (
                    id.clone(),
                    m.dispatches,
                    m.failures,
                    m.latency_ms_sum,
                    m.latency_ms_count,
                )
            })
            .collect();
        rows.sort_by(|a, b| a.0.cmp(&b.0));

        MetricsSnapshot {
            dispatches_total: self.metrics.dispatches_total.load(Ordering::Relaxed),
            failures_total: self.metrics.failures_total.load(Ordering::Relaxed),
            per_agent: rows,
        }
    }

    /// Render internal counters in Prometheus text exposition format.
    pub fn render_prometheus(&self) -> String {
        let snapshot = self.snapshot();
        let mut output = String::new();

        writeln!(
            output,
            "# HELP atelier_dispatches_total Total task dispatches"
        )
        .ok();
        writeln!(output, "# TYPE atelier_dispatches_total counter").ok();
        writeln!(output, "atelier_dispatches_total {}", snapshot.dispatches_total).ok();

        writeln!(output).ok();
        writeln!(
            output,
            "# HELP atelier_failures_total Total terminal task failures"
        )
        .ok();
        writeln!(output, "# TYPE atelier_failures_total counter").ok();
        writeln!(output, "atelier_failures_total {}", snapshot.failures_total).ok();

        writeln!(output).ok();
        writeln!(
            output,
            "# HELP atelier_agent_latency_ms Execution latency per agent"
        )
        .ok();
        writeln!(output, "# TYPE atelier_agent_latency_ms summary").ok();
        for (agent, _dispatches, _failures, latency_sum, latency_count) in &snapshot.per_agent {
            writeln!(
                output,
                "atelier_agent_latency_ms_sum{{agent=\"{agent}\"}} {latency_sum}"
            )
            .ok();
            writeln!(
                output,
                "atelier_agent_latency_ms_count{{agent=\"{agent}\"}} {latency_count}"
            )
            .ok();
        }

        output
    }

    fn emit(&self, event: TraceEvent) {
        // try_send keeps the hot path non-blocking; a full queue loses the
        // event, not the task.
        if let Err(e) = self.tx.try_send(TracerCommand::Event(event)) {
            warn!(error = %e, "Trace queue full or closed, event dropped");
        }
    }
}

async fn forward(
    sink: Arc<dyn TraceSink>,
    mut rx: mpsc::Receiver<TracerCommand>,
    config: TracerConfig,
) {
    while let Some(command) = rx.recv().await {
        match command {
            TracerCommand::Event(event) => {
                let mut attempt = 0u32;
                loop {
                    match sink.emit(&event) {
                        Ok(()) => break,
                        Err(e) if attempt < config.emit_retries => {
                            attempt += 1;
                            debug!(attempt, error = %e, "Sink emit failed, retrying");
                            tokio::time::sleep(config.retry_delay).await;
                        }
                        Err(e) => {
                            warn!(error = %e, "Sink emit failed, event dropped");
                            break;
                        }
                    }
                }
            }
            TracerCommand::Flush(ack) => {
                let _ = ack.send(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    /// Sink that records everything it receives.
    #[derive(Default)]
    struct CollectingSink {
        events: Mutex<Vec<TraceEvent>>,
    }

    impl TraceSink for CollectingSink {
        fn emit(&self, event: &TraceEvent) -> Result<(), String> {
            self.events
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(event.clone());
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_spans_reach_the_sink() {
        let sink = Arc::new(CollectingSink::default());
        let tracer = Tracer::new(sink.clone(), TracerConfig::default());

        let mut span = TraceSpan::start("route_task");
        span.end();
        tracer.emit_span(span.clone());
        tracer.flush().await;

        let events = sink.events.lock().unwrap();
        assert_eq!(events.as_slice(), &[TraceEvent::Span(span)]);
    }

    #[tokio::test]
    async fn test_failing_sink_is_retried_then_dropped() {
        struct FailingSink {
            calls: AtomicU32,
        }

        impl TraceSink for FailingSink {
            fn emit(&self, _event: &TraceEvent) -> Result<(), String> {
                self.calls.fetch_add(1, Ordering::SeqCst);
                Err("sink unreachable".into())
            }
        }

        let sink = Arc::new(FailingSink {
            calls: AtomicU32::new(0),
        });
        let config = TracerConfig {
            emit_retries: 2,
            retry_delay: std::time::Duration::from_millis(1),
            ..TracerConfig::default()
        };
        let tracer = Tracer::new(sink.clone(), config);

        let mut span = TraceSpan::start("route_task");
        span.end();
        tracer.emit_span(span);
        tracer.flush().await;

        // Initial attempt plus two bounded retries.
        assert_eq!(sink.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_metrics_snapshot_and_prometheus_render() {
        let tracer = Tracer::new(Arc::new(LoggingSink), TracerConfig::default());
        let a1 = AgentId::new("a1");

        tracer.record_dispatch(&a1);
        tracer.record_outcome(&a1, 120, false);
        tracer.record_dispatch(&a1);
        tracer.record_outcome(&a1, 80, true);

        let snapshot = tracer.snapshot();
        assert_eq!(snapshot.dispatches_total, 2);
        assert_eq!(snapshot.failures_total, 1);
        assert_eq!(snapshot.per_agent, vec![(a1.clone(), 2, 1, 200, 2)]);

        let text = tracer.render_prometheus();
        assert!(text.contains("atelier_dispatches_total 2"));
        assert!(text.contains("atelier_failures_total 1"));
        assert!(text.contains("atelier_agent_latency_ms_sum{agent=\"a1\"} 200"));
    }
}
