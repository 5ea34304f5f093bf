//! Bounded FIFO between the producer and the worker pool.
//!
//! Capacity is fixed at construction; `enqueue` suspends while the queue is
//! full. Every enqueued item stays "pending" until a worker calls
//! [`QueueReceiver::task_done`], and [`QueueReceiver::join`] resolves only
//! once nothing is pending, so "queue empty" and "all work finished" are not
//! confused while a worker is still executing a dequeued item.

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};
use thiserror::Error;
use tokio::sync::{mpsc, Mutex, Notify};

#[derive(Debug, Default)]
struct Pending {
    count: AtomicUsize,
    idle: Notify,
}

impl Pending {
    fn add(&self) {
        self.count.fetch_add(1, Ordering::SeqCst);
    }

    fn done(&self) {
        let prev = self.count.fetch_sub(1, Ordering::SeqCst);
        debug_assert!(prev > 0, "task_done called more times than enqueue");
        if prev == 1 {
            self.idle.notify_waiters();
        }
    }
}

/// Error returned when every receiver has been dropped.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("work queue closed")]
pub struct QueueClosed;

/// Producer half. Dropping it closes the queue once drained.
pub struct QueueSender<T> {
    tx: mpsc::Sender<T>,
    pending: Arc<Pending>,
}

/// Consumer half, shared by all workers.
pub struct QueueReceiver<T> {
    rx: Arc<Mutex<mpsc::Receiver<T>>>,
    pending: Arc<Pending>,
    capacity: usize,
}

impl<T> Clone for QueueReceiver<T> {
    fn clone(&self) -> Self {
        Self {
            rx: self.rx.clone(),
            pending: self.pending.clone(),
            capacity: self.capacity,
        }
    }
}

/// Create a queue holding at most `capacity` items at once.
pub fn bounded<T>(capacity: usize) -> (QueueSender<T>, QueueReceiver<T>) {
    let capacity = capacity.max(1);
    let (tx, rx) = mpsc::channel(capacity);
    let pending = Arc::new(Pending::default());
    (
        QueueSender {
            tx,
            pending: pending.clone(),
        },
        QueueReceiver {
            rx: Arc::new(Mutex::new(rx)),
            pending,
            capacity,
        },
    )
}

impl<T> QueueSender<T> {
    /// Enqueue, suspending while the queue is full. Cancel-safe.
    pub async fn enqueue(&self, item: T) -> Result<(), QueueClosed> {
        let permit = self.tx.reserve().await.map_err(|_| QueueClosed)?;
        self.pending.add();
        permit.send(item);
        Ok(())
    }

    /// Blocking variant for producers running off the async runtime.
    ///
    /// Must not be called from within an async task.
    pub fn enqueue_blocking(&self, item: T) -> Result<(), QueueClosed> {
        futures::executor::block_on(self.enqueue(item))
    }

    /// Items currently buffered (not yet dequeued).
    pub fn len(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> QueueReceiver<T> {
    /// Dequeue the next item; `None` once the sender is gone and the queue is empty.
    pub async fn dequeue(&self) -> Option<T> {
        self.rx.lock().await.recv().await
    }

    /// Mark one dequeued item as fully processed.
    pub fn task_done(&self) {
        self.pending.done();
    }

    /// Wait until every enqueued item has been dequeued and marked done.
    pub async fn join(&self) {
        loop {
            let idle = self.pending.idle.notified();
            if self.pending.count.load(Ordering::SeqCst) == 0 {
                return;
            }
            idle.await;
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Items enqueued but not yet marked done, including in-flight ones.
    pub fn pending(&self) -> usize {
        self.pending.count.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn fifo_order() {
        let (tx, rx) = bounded(3);
        for i in 0..3 {
            tx.enqueue(i).await.unwrap();
        }
        drop(tx);
        let mut seen = Vec::new();
        while let Some(i) = rx.dequeue().await {
            seen.push(i);
            rx.task_done();
        }
        assert_eq!(seen, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn enqueue_blocks_when_full() {
        let (tx, rx) = bounded(2);
        tx.enqueue(1).await.unwrap();
        tx.enqueue(2).await.unwrap();
        assert_eq!(tx.len(), 2);

        let blocked = timeout(Duration::from_millis(50), tx.enqueue(3)).await;
        assert!(blocked.is_err(), "third enqueue should wait for space");
        assert_eq!(tx.len(), 2);

        assert_eq!(rx.dequeue().await, Some(1));
        timeout(Duration::from_millis(500), tx.enqueue(3))
            .await
            .expect("space was freed")
            .unwrap();
        assert_eq!(tx.len(), 2);
    }

    #[tokio::test]
    async fn join_waits_for_in_flight_work() {
        let (tx, rx) = bounded(1);
        tx.enqueue("job").await.unwrap();
        let item = rx.dequeue().await.unwrap();
        assert_eq!(item, "job");
        assert_eq!(tx.len(), 0);

        // Queue is empty but the item is still being processed.
        assert!(timeout(Duration::from_millis(50), rx.join()).await.is_err());
        assert_eq!(rx.pending(), 1);

        rx.task_done();
        timeout(Duration::from_millis(500), rx.join())
            .await
            .expect("join resolves after task_done");
    }

    #[tokio::test]
    async fn join_resolves_immediately_when_idle() {
        let (_tx, rx) = bounded::<u8>(4);
        timeout(Duration::from_millis(100), rx.join()).await.unwrap();
        assert_eq!(rx.capacity(), 4);
    }

    #[tokio::test]
    async fn closed_queue_rejects_and_keeps_accounting() {
        let (tx, rx) = bounded(1);
        drop(rx);
        assert_eq!(tx.enqueue(1).await, Err(QueueClosed));
        assert_eq!(tx.pending.count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn blocking_producer_feeds_async_consumer() {
        let (tx, rx) = bounded(2);
        let producer = tokio::task::spawn_blocking(move || {
            for i in 0..10 {
                tx.enqueue_blocking(i).unwrap();
            }
        });
        let mut sum = 0;
        while let Some(i) = rx.dequeue().await {
            sum += i;
            rx.task_done();
        }
        producer.await.unwrap();
        assert_eq!(sum, 45);
        rx.join().await;
    }

    #[test]
    fn zero_capacity_is_raised_to_one() {
        let (_tx, rx) = bounded::<u8>(0);
        assert_eq!(rx.capacity(), 1);
    }
}
