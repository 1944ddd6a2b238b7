use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, Notify};

/// Outcome of a `take` call: an id to dispatch, a timeout (caller should re-check
/// shutdown and loop), or `Closed` once the queue has been drained after `close()`.
pub enum Taken {
    Id(i64),
    Timeout,
    Closed,
}

enum Sender {
    Bounded(mpsc::Sender<i64>),
    Unbounded(mpsc::UnboundedSender<i64>),
}

impl Sender {
    fn try_offer(&self, id: i64) -> bool {
        match self {
            Sender::Bounded(tx) => tx.try_send(id).is_ok(),
            Sender::Unbounded(tx) => tx.send(id).is_ok(),
        }
    }
}

enum Receiver {
    Bounded(mpsc::Receiver<i64>),
    Unbounded(mpsc::UnboundedReceiver<i64>),
}

/// A bounded in-memory channel of event identifiers used as wake-up hints. The
/// database remains authoritative: a dropped or stale id here never means a lost
/// event, only a delayed one (recovered by the next poll or notification).
pub struct HandOffQueue {
    sender: Mutex<Option<Sender>>,
    receiver: tokio::sync::Mutex<Receiver>,
    size: Arc<AtomicI64>,
    dropped: Arc<AtomicI64>,
    in_flight: Arc<AtomicUsize>,
    empty_notify: Arc<Notify>,
}

impl HandOffQueue {
    /// `maxsize == 0` yields an unbounded channel. An unbounded queue can never drop
    /// a hint under backpressure, but it also removes the bounded-channel contract's
    /// memory ceiling, so callers should prefer a bounded size in production.
    pub fn new(maxsize: usize) -> Self {
        let (sender, receiver) = if maxsize == 0 {
            let (tx, rx) = mpsc::unbounded_channel();
            (Sender::Unbounded(tx), Receiver::Unbounded(rx))
        } else {
            let (tx, rx) = mpsc::channel(maxsize);
            (Sender::Bounded(tx), Receiver::Bounded(rx))
        };

        Self {
            sender: Mutex::new(Some(sender)),
            receiver: tokio::sync::Mutex::new(receiver),
            size: Arc::new(AtomicI64::new(0)),
            dropped: Arc::new(AtomicI64::new(0)),
            in_flight: Arc::new(AtomicUsize::new(0)),
            empty_notify: Arc::new(Notify::new()),
        }
    }

    /// Non-blocking. If full (or closed), the identifier is dropped and `dropped_count`
    /// increments; the event remains `Pending` in the database and will be recovered
    /// by the next back-fill scan, notification, or empty-queue poll.
    pub fn offer(&self, id: i64) {
        let sent = match self.sender.lock().unwrap().as_ref() {
            Some(sender) => sender.try_offer(id),
            None => false,
        };

        if sent {
            self.size.fetch_add(1, Ordering::SeqCst);
        } else {
            self.dropped.fetch_add(1, Ordering::SeqCst);
            tracing::warn!(event_id = id, "hand-off queue full, dropping notification hint");
        }
    }

    /// Blocks up to `timeout`, yielding `Taken::Timeout` so the caller can re-check
    /// shutdown, or `Taken::Closed` once a closed queue has fully drained.
    pub async fn take(&self, timeout: Duration) -> Taken {
        let mut receiver = self.receiver.lock().await;
        let recv = async {
            match &mut *receiver {
                Receiver::Bounded(rx) => rx.recv().await,
                Receiver::Unbounded(rx) => rx.recv().await,
            }
        };

        match tokio::time::timeout(timeout, recv).await {
            Ok(Some(id)) => {
                self.size.fetch_sub(1, Ordering::SeqCst);
                if self.size.load(Ordering::SeqCst) == 0 {
                    self.empty_notify.notify_waiters();
                }
                Taken::Id(id)
            }
            Ok(None) => Taken::Closed,
            Err(_) => Taken::Timeout,
        }
    }

    pub fn qsize(&self) -> i64 {
        self.size.load(Ordering::SeqCst).max(0)
    }

    pub fn empty(&self) -> bool {
        self.qsize() == 0
    }

    pub fn dropped_count(&self) -> i64 {
        self.dropped.load(Ordering::SeqCst)
    }

    /// Called by a worker when it claims a row (whether or not the id originated from
    /// this queue) and again when it finalizes, so `wait_until_empty` can distinguish
    /// "queue empty" from "queue empty but work still in flight".
    pub fn mark_in_flight(&self) {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
    }

    pub fn mark_finished(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        if self.qsize() == 0 && self.in_flight.load(Ordering::SeqCst) == 0 {
            self.empty_notify.notify_waiters();
        }
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Completes when `qsize() == 0` and no worker is mid-dispatch, or when `timeout`
    /// elapses first.
    pub async fn wait_until_empty(&self, timeout: Duration) {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.qsize() == 0 && self.in_flight_count() == 0 {
                return;
            }
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return;
            }
            let _ = tokio::time::timeout(remaining, self.empty_notify.notified()).await;
        }
    }

    /// Idempotent. After close, `take` yields `Taken::Closed` once drained.
    pub fn close(&self) {
        self.sender.lock().unwrap().take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn offer_then_take_round_trips_the_id() {
        let queue = HandOffQueue::new(4);
        queue.offer(42);
        assert_eq!(queue.qsize(), 1);

        match queue.take(Duration::from_millis(100)).await {
            Taken::Id(id) => assert_eq!(id, 42),
            _ => panic!("expected an id"),
        }
        assert!(queue.empty());
    }

    #[tokio::test]
    async fn take_times_out_on_an_empty_queue() {
        let queue = HandOffQueue::new(4);
        match queue.take(Duration::from_millis(20)).await {
            Taken::Timeout => {}
            _ => panic!("expected a timeout"),
        }
    }

    #[tokio::test]
    async fn offer_past_capacity_drops_and_counts() {
        let queue = HandOffQueue::new(1);
        queue.offer(1);
        queue.offer(2); // dropped: capacity is 1 and nothing has been taken yet

        assert_eq!(queue.qsize(), 1);
        assert_eq!(queue.dropped_count(), 1);
    }

    #[tokio::test]
    async fn close_drains_then_reports_closed() {
        let queue = HandOffQueue::new(4);
        queue.offer(1);
        queue.close();

        match queue.take(Duration::from_millis(100)).await {
            Taken::Id(1) => {}
            _ => panic!("expected the queued id before closed"),
        }
        match queue.take(Duration::from_millis(100)).await {
            Taken::Closed => {}
            _ => panic!("expected closed"),
        }
    }

    #[tokio::test]
    async fn wait_until_empty_returns_once_drained_and_not_in_flight() {
        let queue = HandOffQueue::new(4);
        queue.offer(1);
        queue.mark_in_flight();

        let queue2 = &queue;
        let waiter = async {
            queue2.wait_until_empty(Duration::from_secs(2)).await;
        };

        let drain = async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            let _ = queue.take(Duration::from_millis(100)).await;
            queue.mark_finished();
        };

        tokio::join!(waiter, drain);
        assert_eq!(queue.qsize(), 0);
        assert_eq!(queue.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn unbounded_queue_never_drops() {
        let queue = HandOffQueue::new(0);
        for id in 0..10_000 {
            queue.offer(id);
        }
        assert_eq!(queue.dropped_count(), 0);
        assert_eq!(queue.qsize(), 10_000);
    }
}
