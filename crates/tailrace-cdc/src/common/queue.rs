//! Bounded change event queue
//!
//! The handoff point between ingestion and publishing. Capacity is fixed at
//! construction; a full queue blocks the producer (backpressure) instead of
//! dropping or growing. Consumers drain in batches without blocking.
//!
//! With more than one queue configured, events are routed by a stable hash of
//! the source table identity so one table's events always land on the same
//! queue, preserving per-table ordering while letting downstream consumers
//! work in parallel.

use std::collections::VecDeque;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::common::schema::TableId;

/// Counters observable while the queue runs.
#[derive(Debug, Default)]
struct QueueStats {
    offered: AtomicU64,
    polled: AtomicU64,
    producer_blocks: AtomicU64,
}

/// Snapshot of queue counters.
#[derive(Debug, Clone)]
pub struct QueueStatsSnapshot {
    pub offered: u64,
    pub polled: u64,
    pub producer_blocks: u64,
}

/// Bounded FIFO with explicit capacity accounting.
#[derive(Debug)]
pub struct ChangeEventQueue<T> {
    capacity: usize,
    items: Mutex<VecDeque<T>>,
    space: Notify,
    stats: QueueStats,
}

impl<T> ChangeEventQueue<T> {
    /// Create a queue with a fixed capacity. Capacity is clamped to at
    /// least 1.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            items: Mutex::new(VecDeque::with_capacity(capacity)),
            space: Notify::new(),
            stats: QueueStats::default(),
        }
    }

    /// Enqueue one event, waiting while the queue is full. Events are never
    /// dropped.
    pub async fn offer(&self, event: T) {
        let mut pending = event;
        loop {
            let notified = self.space.notified();
            tokio::pin!(notified);
            // Register the waiter before checking capacity so a poll landing
            // between the check and the await cannot be missed.
            notified.as_mut().enable();
            match self.try_offer(pending) {
                Ok(()) => return,
                Err(back) => {
                    pending = back;
                    self.stats.producer_blocks.fetch_add(1, Ordering::Relaxed);
                    notified.await;
                }
            }
        }
    }

    /// Enqueue without waiting. Returns the event back if the queue is full.
    pub fn try_offer(&self, event: T) -> std::result::Result<(), T> {
        let mut items = self.items.lock();
        if items.len() < self.capacity {
            items.push_back(event);
            self.stats.offered.fetch_add(1, Ordering::Relaxed);
            Ok(())
        } else {
            Err(event)
        }
    }

    /// Drain and return everything currently buffered. Never blocks; returns
    /// an empty batch when nothing is waiting.
    pub fn poll(&self) -> Vec<T> {
        let drained: Vec<T> = {
            let mut items = self.items.lock();
            items.drain(..).collect()
        };
        if !drained.is_empty() {
            self.stats
                .polled
                .fetch_add(drained.len() as u64, Ordering::Relaxed);
            self.space.notify_waiters();
        }
        drained
    }

    /// Fixed capacity set at construction.
    pub fn total_capacity(&self) -> usize {
        self.capacity
    }

    /// Free slots right now: `total_capacity - len`.
    pub fn remaining_capacity(&self) -> usize {
        self.capacity - self.items.lock().len()
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    pub fn stats(&self) -> QueueStatsSnapshot {
        QueueStatsSnapshot {
            offered: self.stats.offered.load(Ordering::Relaxed),
            polled: self.stats.polled.load(Ordering::Relaxed),
            producer_blocks: self.stats.producer_blocks.load(Ordering::Relaxed),
        }
    }
}

/// Stable queue index for a table. Same table, same queue, for any fixed
/// queue count.
pub fn queue_index_for(table: &TableId, queue_count: usize) -> usize {
    if queue_count <= 1 {
        return 0;
    }
    let mut hasher = DefaultHasher::new();
    table.keyspace.hash(&mut hasher);
    table.table.hash(&mut hasher);
    (murmur3_finalize(hasher.finish()) as usize) % queue_count
}

/// Murmur3 finalization for better distribution.
fn murmur3_finalize(mut h: u64) -> u32 {
    h ^= h >> 33;
    h = h.wrapping_mul(0xff51afd7ed558ccd);
    h ^= h >> 33;
    h = h.wrapping_mul(0xc4ceb9fe1a85ec53);
    h ^= h >> 33;
    h as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_starts_empty_with_full_capacity() {
        let queue: ChangeEventQueue<u32> = ChangeEventQueue::new(8);
        assert_eq!(queue.total_capacity(), 8);
        assert_eq!(queue.remaining_capacity(), queue.total_capacity());
        assert!(queue.is_empty());
        assert!(queue.poll().is_empty());
    }

    #[tokio::test]
    async fn test_offer_then_poll_preserves_order() {
        let queue = ChangeEventQueue::new(16);
        for i in 0..5u32 {
            queue.offer(i).await;
        }
        assert_eq!(queue.len(), 5);
        assert_eq!(queue.remaining_capacity(), 11);

        let batch = queue.poll();
        assert_eq!(batch, vec![0, 1, 2, 3, 4]);
        assert_eq!(queue.remaining_capacity(), queue.total_capacity());
    }

    #[tokio::test]
    async fn test_try_offer_full_returns_event() {
        let queue = ChangeEventQueue::new(1);
        assert!(queue.try_offer(1u32).is_ok());
        assert_eq!(queue.try_offer(2u32), Err(2));
        assert_eq!(queue.remaining_capacity(), 0);
    }

    #[tokio::test]
    async fn test_offer_blocks_until_poll_frees_space() {
        let queue = Arc::new(ChangeEventQueue::new(2));
        queue.offer(1u32).await;
        queue.offer(2u32).await;

        let producer = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move {
                queue.offer(3u32).await;
            })
        };

        // Give the producer a chance to park on the full queue.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!producer.is_finished());
        assert_eq!(queue.stats().producer_blocks, 1);

        let batch = queue.poll();
        assert_eq!(batch, vec![1, 2]);

        producer.await.unwrap();
        assert_eq!(queue.poll(), vec![3]);
    }

    #[tokio::test]
    async fn test_capacity_invariant_under_load() {
        let queue = Arc::new(ChangeEventQueue::new(4));
        let producer = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move {
                for i in 0..100u32 {
                    queue.offer(i).await;
                }
            })
        };

        let mut seen = Vec::new();
        while seen.len() < 100 {
            assert_eq!(
                queue.remaining_capacity() + queue.len(),
                queue.total_capacity()
            );
            let batch = queue.poll();
            if batch.is_empty() {
                tokio::time::sleep(Duration::from_millis(1)).await;
            } else {
                assert!(batch.len() <= queue.total_capacity());
                seen.extend(batch);
            }
        }
        producer.await.unwrap();

        let expected: Vec<u32> = (0..100).collect();
        assert_eq!(seen, expected);
    }

    #[test]
    fn test_queue_index_stable() {
        let t1 = TableId::new("ks1", "tbl1");
        let t2 = TableId::new("ks1", "tbl2");

        let i1 = queue_index_for(&t1, 4);
        assert_eq!(i1, queue_index_for(&t1, 4));
        assert!(i1 < 4);
        assert!(queue_index_for(&t2, 4) < 4);
    }

    #[test]
    fn test_queue_index_single_queue() {
        let t1 = TableId::new("ks1", "tbl1");
        assert_eq!(queue_index_for(&t1, 1), 0);
        assert_eq!(queue_index_for(&t1, 0), 0);
    }

    #[test]
    fn test_queue_index_spreads_tables() {
        // With enough tables, more than one queue index must be hit.
        let mut hit = std::collections::HashSet::new();
        for i in 0..64 {
            let table = TableId::new("ks1", format!("tbl{i}"));
            hit.insert(queue_index_for(&table, 4));
        }
        assert!(hit.len() > 1);
    }
}
