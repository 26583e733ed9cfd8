//! Audit trail for classification attempts.
//!
//! One append-only row per attempt, written through a bounded channel with a
//! background consumer so a slow or failing sink never adds latency or
//! failure to the classification path. Rows carry a digest of the input, not
//! the input itself.

use super::Category;
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;

/// One classification attempt, never mutated after append.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: String,
    pub identifier: String,
    pub input_digest: String,
    pub category: Category,
    pub confidence: f64,
    pub latency_ms: u64,
    pub used_fallback: bool,
    pub cache_hit: bool,
    pub circuit_state: String,
    pub rate_limited: bool,
    /// Seconds since the Unix epoch.
    pub timestamp: u64,
}

impl AuditRecord {
    pub fn now_timestamp() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }
}

/// Append-only destination for audit rows. Implementations must tolerate
/// being called concurrently; errors are logged and swallowed upstream.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn append(&self, record: AuditRecord) -> Result<()>;
}

/// Fire-and-forget audit writer.
///
/// `record` never blocks and never fails the caller: a full queue drops the
/// row with a warning. Dropping the log closes the channel and lets the
/// consumer drain what remains.
pub struct AuditLog {
    tx: mpsc::Sender<AuditRecord>,
    dropped: Arc<AtomicU64>,
    handle: tokio::task::JoinHandle<()>,
}

impl AuditLog {
    /// Spawn the background consumer with a bounded queue.
    pub fn spawn(sink: Arc<dyn AuditSink>, capacity: usize) -> Self {
        let (tx, mut rx) = mpsc::channel::<AuditRecord>(capacity.max(1));
        let handle = tokio::spawn(async move {
            while let Some(record) = rx.recv().await {
                if let Err(e) = sink.append(record).await {
                    tracing::warn!(error = %e, "audit sink write failed, row lost");
                }
            }
        });
        Self {
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
            handle,
        }
    }

    /// Enqueue a row without waiting.
    pub fn record(&self, record: AuditRecord) {
        if let Err(e) = self.tx.try_send(record) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(error = %e, "audit queue full, row dropped");
        }
    }

    /// Rows dropped due to backpressure.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Close the queue and wait for the consumer to drain. Test and shutdown
    /// helper; normal operation just drops the log.
    pub async fn shutdown(self) {
        drop(self.tx);
        let _ = self.handle.await;
    }
}

/// Aggregate view over a trailing window of audit rows.
#[derive(Debug, Clone, Default)]
pub struct AuditStats {
    pub total: u64,
    pub fallback_rate: f64,
    pub cache_hit_rate: f64,
    pub rate_limited_rate: f64,
    pub avg_latency_ms: f64,
}

/// Sink that emits each row as a structured log event. The default when no
/// external sink is configured.
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn append(&self, record: AuditRecord) -> Result<()> {
        tracing::info!(
            id = %record.id,
            identifier = %record.identifier,
            input_digest = %record.input_digest,
            category = record.category.as_str(),
            confidence = record.confidence,
            latency_ms = record.latency_ms,
            used_fallback = record.used_fallback,
            cache_hit = record.cache_hit,
            circuit_state = %record.circuit_state,
            rate_limited = record.rate_limited,
            "classification audited"
        );
        Ok(())
    }
}

/// In-memory sink retaining a bounded trailing window. Backs tests and the
/// aggregate statistics surface.
pub struct MemoryAuditSink {
    capacity: usize,
    rows: Mutex<VecDeque<AuditRecord>>,
}

impl MemoryAuditSink {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            rows: Mutex::new(VecDeque::new()),
        }
    }

    pub fn rows(&self) -> Vec<AuditRecord> {
        self.rows.lock().unwrap().iter().cloned().collect()
    }

    pub fn stats(&self) -> AuditStats {
        let rows = self.rows.lock().unwrap();
        let total = rows.len() as u64;
        if total == 0 {
            return AuditStats::default();
        }
        let count = |pred: fn(&AuditRecord) -> bool| {
            rows.iter().filter(|r| pred(r)).count() as f64 / total as f64
        };
        AuditStats {
            total,
            fallback_rate: count(|r| r.used_fallback),
            cache_hit_rate: count(|r| r.cache_hit),
            rate_limited_rate: count(|r| r.rate_limited),
            avg_latency_ms: rows.iter().map(|r| r.latency_ms as f64).sum::<f64>() / total as f64,
        }
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn append(&self, record: AuditRecord) -> Result<()> {
        let mut rows = self.rows.lock().unwrap();
        if rows.len() >= self.capacity {
            rows.pop_front();
        }
        rows.push_back(record);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use std::time::Duration;

    fn row(cache_hit: bool, used_fallback: bool, rate_limited: bool) -> AuditRecord {
        AuditRecord {
            id: uuid::Uuid::new_v4().to_string(),
            identifier: "user-1".into(),
            input_digest: "abcd1234".into(),
            category: Category::Conversation,
            confidence: 0.5,
            latency_ms: 10,
            used_fallback,
            cache_hit,
            circuit_state: "closed".into(),
            rate_limited,
            timestamp: AuditRecord::now_timestamp(),
        }
    }

    #[tokio::test]
    async fn records_flow_to_sink() {
        let sink = Arc::new(MemoryAuditSink::new(100));
        let log = AuditLog::spawn(sink.clone(), 16);
        log.record(row(false, false, false));
        log.record(row(true, false, false));
        log.shutdown().await;
        assert_eq!(sink.rows().len(), 2);
    }

    #[tokio::test]
    async fn stats_aggregate_rates() {
        let sink = MemoryAuditSink::new(100);
        sink.append(row(true, false, false)).await.unwrap();
        sink.append(row(false, true, false)).await.unwrap();
        sink.append(row(false, true, true)).await.unwrap();
        sink.append(row(false, false, false)).await.unwrap();
        let stats = sink.stats();
        assert_eq!(stats.total, 4);
        assert!((stats.cache_hit_rate - 0.25).abs() < 1e-9);
        assert!((stats.fallback_rate - 0.5).abs() < 1e-9);
        assert!((stats.rate_limited_rate - 0.25).abs() < 1e-9);
        assert!((stats.avg_latency_ms - 10.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn trailing_window_is_bounded() {
        let sink = MemoryAuditSink::new(3);
        for _ in 0..10 {
            sink.append(row(false, false, false)).await.unwrap();
        }
        assert_eq!(sink.stats().total, 3);
    }

    struct FailingSink;

    #[async_trait]
    impl AuditSink for FailingSink {
        async fn append(&self, _: AuditRecord) -> Result<()> {
            Err(Error::Io(std::io::Error::other("disk full")))
        }
    }

    #[tokio::test]
    async fn sink_failures_are_swallowed() {
        let log = AuditLog::spawn(Arc::new(FailingSink), 4);
        log.record(row(false, false, false));
        // Give the consumer a beat; the failure must not surface anywhere.
        tokio::time::sleep(Duration::from_millis(20)).await;
        log.shutdown().await;
    }

    #[tokio::test]
    async fn full_queue_drops_with_count() {
        // Capacity 1 with a sink that never completes quickly.
        struct SlowSink;
        #[async_trait]
        impl AuditSink for SlowSink {
            async fn append(&self, _: AuditRecord) -> Result<()> {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok(())
            }
        }
        let log = AuditLog::spawn(Arc::new(SlowSink), 1);
        for _ in 0..10 {
            log.record(row(false, false, false));
        }
        assert!(log.dropped() > 0);
    }
}
