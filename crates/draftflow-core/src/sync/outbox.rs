//! Outgoing write queue with per-key coalescing and backoff.

use std::collections::{BTreeSet, VecDeque};

use super::store::SharedSceneStore;
use crate::config::SyncConfig;

/// A pending store operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundOp {
    Set(String),
    Delete,
}

#[derive(Debug, Clone)]
struct OutboundWrite {
    key: String,
    op: OutboundOp,
    /// Failed attempts so far.
    attempts: u32,
    next_attempt_at: u64,
}

/// What one flush did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub sent: usize,
    pub retried: usize,
    /// Keys given up on during this flush.
    pub dropped: Vec<String>,
}

/// Writes waiting to reach the store.
///
/// At most one write per key is pending: enqueueing a key that is already
/// queued replaces the older value, so a retry can never overwrite a newer
/// write to the same key.
#[derive(Debug, Default)]
pub struct Outbox {
    queue: VecDeque<OutboundWrite>,
    /// Keys whose writes were abandoned and must be republished.
    stale: BTreeSet<String>,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&mut self, key: String, op: OutboundOp, now: u64) {
        self.stale.remove(&key);
        if let Some(pending) = self.queue.iter_mut().find(|w| w.key == key) {
            pending.op = op;
            pending.attempts = 0;
            pending.next_attempt_at = now;
            return;
        }
        self.queue.push_back(OutboundWrite {
            key,
            op,
            attempts: 0,
            next_attempt_at: now,
        });
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub fn has_stale(&self) -> bool {
        !self.stale.is_empty()
    }

    /// Remove and return the abandoned keys.
    pub fn take_stale(&mut self) -> Vec<String> {
        std::mem::take(&mut self.stale).into_iter().collect()
    }

    /// Try every write that is due.
    pub fn flush(
        &mut self,
        store: &mut dyn SharedSceneStore,
        now: u64,
        config: &SyncConfig,
    ) -> FlushReport {
        let mut report = FlushReport::default();
        let mut remaining = VecDeque::with_capacity(self.queue.len());

        while let Some(mut write) = self.queue.pop_front() {
            if write.next_attempt_at > now {
                remaining.push_back(write);
                continue;
            }
            let result = match &write.op {
                OutboundOp::Set(value) => store.set(&write.key, value),
                OutboundOp::Delete => store.delete(&write.key),
            };
            match result {
                Ok(()) => report.sent += 1,
                Err(e) if e.is_transient() => {
                    write.attempts += 1;
                    if write.attempts >= config.publish_max_attempts {
                        log::error!(
                            "Giving up on {} after {} attempts: {}",
                            write.key,
                            write.attempts,
                            e
                        );
                        self.stale.insert(write.key.clone());
                        report.dropped.push(write.key);
                    } else {
                        let delay = config.backoff_ms(write.attempts);
                        log::warn!(
                            "Publish of {} failed (attempt {}), retrying in {}ms: {}",
                            write.key,
                            write.attempts,
                            delay,
                            e
                        );
                        write.next_attempt_at = now.saturating_add(delay);
                        report.retried += 1;
                        remaining.push_back(write);
                    }
                }
                Err(e) => {
                    log::error!("Publish of {} rejected: {}", write.key, e);
                    self.stale.insert(write.key.clone());
                    report.dropped.push(write.key);
                }
            }
        }

        self.queue = remaining;
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::sync::store::MemoryHub;

    fn config() -> SyncConfig {
        SyncConfig {
            publish_max_attempts: 3,
            ..SyncConfig::default()
        }
    }

    #[test]
    fn test_coalesces_per_key() {
        let hub = MemoryHub::new();
        let mut store = hub.connect();
        let mut outbox = Outbox::new();

        outbox.enqueue("k".to_string(), OutboundOp::Set("old".to_string()), 0);
        outbox.enqueue("k".to_string(), OutboundOp::Set("new".to_string()), 0);
        assert_eq!(outbox.pending(), 1);

        let report = outbox.flush(&mut store, 0, &config());
        assert_eq!(report.sent, 1);
        assert_eq!(hub.get("k").as_deref(), Some("new"));
        assert!(outbox.is_empty());
    }

    #[test]
    fn test_transient_failure_backs_off() {
        let hub = MemoryHub::new();
        let mut store = hub.connect();
        let mut outbox = Outbox::new();
        store.fail_next(StoreError::Transient("timeout".to_string()));

        outbox.enqueue("k".to_string(), OutboundOp::Set("v".to_string()), 0);
        let report = outbox.flush(&mut store, 0, &config());
        assert_eq!(report.retried, 1);
        assert!(hub.get("k").is_none());

        // Not yet due.
        let report = outbox.flush(&mut store, 100, &config());
        assert_eq!(report, FlushReport::default());

        let report = outbox.flush(&mut store, 200, &config());
        assert_eq!(report.sent, 1);
        assert_eq!(hub.get("k").as_deref(), Some("v"));
    }

    #[test]
    fn test_exhausted_retries_become_stale() {
        let hub = MemoryHub::new();
        let mut store = hub.connect();
        store.set_offline(true);
        let mut outbox = Outbox::new();

        outbox.enqueue("k".to_string(), OutboundOp::Delete, 0);
        let mut now = 0;
        let mut dropped = Vec::new();
        for _ in 0..3 {
            let report = outbox.flush(&mut store, now, &config());
            dropped.extend(report.dropped);
            now += 10_000;
        }
        assert_eq!(dropped, vec!["k".to_string()]);
        assert!(outbox.is_empty());
        assert!(outbox.has_stale());
        assert_eq!(outbox.take_stale(), vec!["k".to_string()]);
        assert!(!outbox.has_stale());
    }

    #[test]
    fn test_rejection_skips_retries() {
        let hub = MemoryHub::new();
        let mut store = hub.connect();
        store.fail_next(StoreError::Rejected("denied".to_string()));
        let mut outbox = Outbox::new();

        outbox.enqueue("k".to_string(), OutboundOp::Set("v".to_string()), 0);
        let report = outbox.flush(&mut store, 0, &config());
        assert_eq!(report.dropped, vec!["k".to_string()]);
        assert!(outbox.is_empty());
    }

    #[test]
    fn test_newer_write_clears_stale_key() {
        let hub = MemoryHub::new();
        let mut store = hub.connect();
        store.fail_next(StoreError::Rejected("denied".to_string()));
        let mut outbox = Outbox::new();

        outbox.enqueue("k".to_string(), OutboundOp::Set("v1".to_string()), 0);
        outbox.flush(&mut store, 0, &config());
        assert!(outbox.has_stale());

        outbox.enqueue("k".to_string(), OutboundOp::Set("v2".to_string()), 1);
        assert!(!outbox.has_stale());
    }
}
