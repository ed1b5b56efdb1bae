//! Polling helpers and event assertions

use std::time::{Duration, Instant};

use tailrace_cdc::{ChangeEvent, ChangeEventQueue, Operation, SourcePosition};

/// Poll a queue until `want` events arrived or `timeout` elapsed. Also checks
/// the queue never reports more buffered events than its capacity.
pub async fn collect_events(
    queue: &ChangeEventQueue<ChangeEvent>,
    want: usize,
    timeout: Duration,
) -> Vec<ChangeEvent> {
    let deadline = Instant::now() + timeout;
    let mut collected = Vec::new();
    while collected.len() < want && Instant::now() < deadline {
        assert!(queue.len() <= queue.total_capacity());
        collected.extend(queue.poll());
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    collected
}

/// Poll `condition` until it holds, panicking with `what` on timeout.
pub async fn wait_for<F: FnMut() -> bool>(what: &str, timeout: Duration, mut condition: F) {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

/// Assertion helpers over collected change events.
pub trait ChangeEventVecExt {
    fn ops(&self) -> Vec<Operation>;
    fn positions(&self) -> Vec<SourcePosition>;
    /// Panics unless positions are strictly increasing.
    fn assert_ordered(&self);
}

impl ChangeEventVecExt for [ChangeEvent] {
    fn ops(&self) -> Vec<Operation> {
        self.iter().map(|e| e.op).collect()
    }

    fn positions(&self) -> Vec<SourcePosition> {
        self.iter().map(|e| e.position).collect()
    }

    fn assert_ordered(&self) {
        for pair in self.windows(2) {
            assert!(
                pair[0].position < pair[1].position,
                "events out of order: {} then {}",
                pair[0].position,
                pair[1].position
            );
        }
    }
}
