//! Bounded work queue — spec §5, §9.
//!
//! Replaces the source's "timer at 0" fire-and-forget pattern (spawn a task
//! per write/alarm, no backpressure) with a bounded queue drained by a small
//! worker pool. On saturation the oldest item is dropped — telemetry is
//! best-effort (§1 Non-goals) and request latency must never wait on it.
//!
//! A `VecDeque` guarded by an async `Mutex`, with a `Notify` so drain workers
//! block on empty instead of polling.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, Notify};
use tracing::warn;

struct Inner<T> {
    items: Mutex<VecDeque<T>>,
    notify: Notify,
    capacity: usize,
    dropped: AtomicU64,
}

/// A bounded, multi-producer multi-consumer queue with drop-oldest overflow
/// semantics. Cheaply `Clone`able; clones share the same backing queue.
pub struct WorkQueue<T> {
    inner: Arc<Inner<T>>,
    name: &'static str,
}

impl<T> Clone for WorkQueue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            name: self.name,
        }
    }
}

impl<T: Send + 'static> WorkQueue<T> {
    pub fn new(name: &'static str, capacity: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                items: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
                notify: Notify::new(),
                capacity,
                dropped: AtomicU64::new(0),
            }),
            name,
        }
    }

    /// Enqueue an item. If the queue is at capacity, the oldest item is
    /// dropped to make room — never blocks the caller.
    pub async fn push(&self, item: T) {
        let mut items = self.inner.items.lock().await;
        if items.len() >= self.inner.capacity {
            items.pop_front();
            let total = self.inner.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            warn!(
                "[queue:{}] capacity={} reached — dropped oldest item (total dropped={total})",
                self.name, self.inner.capacity
            );
        }
        items.push_back(item);
        drop(items);
        self.inner.notify.notify_one();
    }

    async fn pop(&self) -> T {
        loop {
            {
                let mut items = self.inner.items.lock().await;
                if let Some(item) = items.pop_front() {
                    return item;
                }
            }
            self.inner.notify.notified().await;
        }
    }

    pub async fn len(&self) -> usize {
        self.inner.items.lock().await.len()
    }

    pub fn dropped_count(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }
}

/// Spawn `workers` tasks draining `queue`, each invoking `handler` per item.
/// Workers run until the process exits; there is no shutdown signal because
/// dropped telemetry/alarms on restart are acceptable (§1 Non-goals).
pub fn spawn_workers<T, F, Fut>(queue: WorkQueue<T>, workers: usize, handler: F)
where
    T: Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + Clone + 'static,
    Fut: Future<Output = ()> + Send,
{
    for _ in 0..workers {
        let queue = queue.clone();
        let handler = handler.clone();
        tokio::spawn(async move {
            loop {
                let item = queue.pop().await;
                handler(item).await;
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test]
    async fn push_and_pop_preserve_order_under_capacity() {
        let q: WorkQueue<i32> = WorkQueue::new("test", 10);
        q.push(1).await;
        q.push(2).await;
        q.push(3).await;
        assert_eq!(q.pop().await, 1);
        assert_eq!(q.pop().await, 2);
        assert_eq!(q.pop().await, 3);
    }

    #[tokio::test]
    async fn overflow_drops_oldest() {
        let q: WorkQueue<i32> = WorkQueue::new("test", 2);
        q.push(1).await;
        q.push(2).await;
        q.push(3).await; // drops 1
        assert_eq!(q.pop().await, 2);
        assert_eq!(q.pop().await, 3);
        assert_eq!(q.dropped_count(), 1);
    }

    #[tokio::test]
    async fn workers_drain_pushed_items() {
        let q: WorkQueue<i32> = WorkQueue::new("test", 16);
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_clone = seen.clone();
        spawn_workers(q.clone(), 2, move |_item: i32| {
            let seen = seen_clone.clone();
            async move {
                seen.fetch_add(1, Ordering::SeqCst);
            }
        });

        for i in 0..20 {
            q.push(i).await;
        }
        // Give the worker tasks a chance to drain.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(seen.load(Ordering::SeqCst), 20);
    }
}
