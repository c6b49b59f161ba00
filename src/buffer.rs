//! Bounded, byte-budgeted message buffer with a forward-only lifecycle.
//!
//! One primitive serves both directions: the read path queues response
//! frames (`MessageBuffer<DataFrame>`), the write path acts as the message
//! supplier (`MessageBuffer<IngestMessage>`).  Capacity is measured in
//! accounting bytes, not messages, so a producer stalls in proportion to
//! payload size; the stall propagates to the network through the RPC
//! flow-control window.
//!
//! # Lifecycle
//!
//! ```text
//!         activate()           offer*               shutdown()
//!   New ────────────▶ Accepting ─────▶ Accepting ──────────────▶ Draining
//!                                                                   │
//!                                                          drained  ▼
//!                                                                Closed
//! ```
//!
//! `shutdown_now()` jumps straight to `Closed`, discarding queued items.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::Notify;

/// Items carry their own accounting size.
pub trait ByteSized {
    fn byte_size(&self) -> u64;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferState {
    New,
    Accepting,
    Draining,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum BufferError {
    #[error("operation not valid in state {0:?}")]
    InvalidState(BufferState),
    #[error("buffer is shutting down")]
    ShuttingDown,
    #[error("buffer is full and offer blocking is disabled")]
    Full,
}

#[derive(Debug, Clone)]
pub struct BufferConfig {
    /// High watermark: `offer` admits while used bytes are below this.
    pub capacity_bytes: u64,
    /// When false, `offer` on a full buffer fails with `Full` instead of
    /// suspending.
    pub allow_offer_block: bool,
    /// Poll cadence of `await_closed`.
    pub shutdown_poll_interval: Duration,
}

impl Default for BufferConfig {
    fn default() -> Self {
        BufferConfig {
            capacity_bytes: 8 * 1024 * 1024,
            allow_offer_block: true,
            shutdown_poll_interval: Duration::from_millis(10),
        }
    }
}

#[derive(Debug)]
struct Inner<T> {
    state: BufferState,
    queue: VecDeque<T>,
    bytes_used: u64,
}

/// Single-mutex queue with two wake signals (not-full, not-empty).  One
/// producer and many consumers are safe; so are many producers.
#[derive(Debug)]
pub struct MessageBuffer<T> {
    inner: Mutex<Inner<T>>,
    not_full: Notify,
    not_empty: Notify,
    config: BufferConfig,
}

impl<T: ByteSized> MessageBuffer<T> {
    pub fn new(config: BufferConfig) -> Self {
        MessageBuffer {
            inner: Mutex::new(Inner {
                state: BufferState::New,
                queue: VecDeque::new(),
                bytes_used: 0,
            }),
            not_full: Notify::new(),
            not_empty: Notify::new(),
            config,
        }
    }

    pub fn config(&self) -> &BufferConfig {
        &self.config
    }

    /// `New -> Accepting`.  Any other state is an error.
    pub fn activate(&self) -> Result<(), BufferError> {
        let mut inner = self.inner.lock().expect("buffer mutex");
        match inner.state {
            BufferState::New => {
                inner.state = BufferState::Accepting;
                Ok(())
            }
            other => Err(BufferError::InvalidState(other)),
        }
    }

    /// Enqueue one item, suspending while the byte budget is exhausted
    /// (unless `allow_offer_block` is off, in which case a full buffer is
    /// an immediate `Full` error).
    pub async fn offer(&self, item: T) -> Result<(), BufferError> {
        let mut item = Some(item);
        loop {
            // Register interest before re-checking, so a take() between the
            // unlock and the await leaves a stored permit rather than a
            // missed wakeup.
            let notified = self.not_full.notified();
            {
                let mut inner = self.inner.lock().expect("buffer mutex");
                match inner.state {
                    BufferState::New => {
                        return Err(BufferError::InvalidState(BufferState::New));
                    }
                    BufferState::Draining | BufferState::Closed => {
                        return Err(BufferError::ShuttingDown);
                    }
                    BufferState::Accepting => {}
                }
                if inner.bytes_used < self.config.capacity_bytes {
                    let item = item.take().expect("item consumed once");
                    inner.bytes_used += item.byte_size();
                    inner.queue.push_back(item);
                    drop(inner);
                    self.not_empty.notify_one();
                    return Ok(());
                }
                if !self.config.allow_offer_block {
                    return Err(BufferError::Full);
                }
            }
            notified.await;
        }
    }

    /// Dequeue one item, suspending while empty and not shut down.
    /// `Ok(None)` is the end-of-stream signal: the buffer is closed and
    /// fully drained.
    pub async fn take(&self) -> Result<Option<T>, BufferError> {
        loop {
            let notified = self.not_empty.notified();
            {
                let mut inner = self.inner.lock().expect("buffer mutex");
                if let Some(item) = inner.queue.pop_front() {
                    inner.bytes_used = inner.bytes_used.saturating_sub(item.byte_size());
                    let drained =
                        inner.state == BufferState::Draining && inner.queue.is_empty();
                    if drained {
                        inner.state = BufferState::Closed;
                    }
                    drop(inner);
                    self.not_full.notify_one();
                    if drained {
                        // Release any sibling consumers parked on empty.
                        self.not_empty.notify_waiters();
                    }
                    return Ok(Some(item));
                }
                match inner.state {
                    BufferState::New => {
                        return Err(BufferError::InvalidState(BufferState::New));
                    }
                    BufferState::Draining => {
                        inner.state = BufferState::Closed;
                        return Ok(None);
                    }
                    BufferState::Closed => return Ok(None),
                    BufferState::Accepting => {}
                }
            }
            notified.await;
        }
    }

    /// Soft shutdown: stop accepting, keep draining.  Idempotent once the
    /// buffer has left `Accepting`.
    pub fn shutdown(&self) -> Result<(), BufferError> {
        {
            let mut inner = self.inner.lock().expect("buffer mutex");
            match inner.state {
                BufferState::New => {
                    return Err(BufferError::InvalidState(BufferState::New));
                }
                BufferState::Accepting => {
                    inner.state = if inner.queue.is_empty() {
                        BufferState::Closed
                    } else {
                        BufferState::Draining
                    };
                }
                BufferState::Draining | BufferState::Closed => {}
            }
        }
        self.not_empty.notify_waiters();
        self.not_full.notify_waiters();
        Ok(())
    }

    /// Hard shutdown: discard queued items, close immediately.  Returns
    /// the number of items discarded.
    pub fn shutdown_now(&self) -> usize {
        let discarded;
        {
            let mut inner = self.inner.lock().expect("buffer mutex");
            discarded = inner.queue.len();
            inner.queue.clear();
            inner.bytes_used = 0;
            inner.state = BufferState::Closed;
        }
        self.not_empty.notify_waiters();
        self.not_full.notify_waiters();
        discarded
    }

    /// True while a consumer loop should keep calling `take`: the buffer
    /// is accepting or draining, or still holds items.
    pub fn is_supplying(&self) -> bool {
        let inner = self.inner.lock().expect("buffer mutex");
        matches!(inner.state, BufferState::Accepting | BufferState::Draining)
            || !inner.queue.is_empty()
    }

    pub fn state(&self) -> BufferState {
        self.inner.lock().expect("buffer mutex").state
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("buffer mutex").queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().expect("buffer mutex").queue.is_empty()
    }

    pub fn bytes_used(&self) -> u64 {
        self.inner.lock().expect("buffer mutex").bytes_used
    }

    /// Wait until the buffer reaches `Closed`, polling at the configured
    /// shutdown interval.
    pub async fn await_closed(&self) {
        loop {
            if self.state() == BufferState::Closed {
                return;
            }
            tokio::time::sleep(self.config.shutdown_poll_interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::time::timeout;

    #[derive(Debug, PartialEq)]
    struct Msg(u32, u64);

    impl ByteSized for Msg {
        fn byte_size(&self) -> u64 {
            self.1
        }
    }

    fn buffer(capacity: u64) -> MessageBuffer<Msg> {
        MessageBuffer::new(BufferConfig {
            capacity_bytes: capacity,
            ..BufferConfig::default()
        })
    }

    #[tokio::test]
    async fn offer_and_take_fail_before_activation() {
        let buf = buffer(100);
        assert_eq!(
            buf.offer(Msg(1, 1)).await,
            Err(BufferError::InvalidState(BufferState::New))
        );
        assert_eq!(
            buf.take().await,
            Err(BufferError::InvalidState(BufferState::New))
        );
    }

    #[tokio::test]
    async fn activate_twice_is_an_error() {
        let buf = buffer(100);
        buf.activate().unwrap();
        assert_eq!(
            buf.activate(),
            Err(BufferError::InvalidState(BufferState::Accepting))
        );
    }

    #[tokio::test]
    async fn fifo_order_is_preserved() {
        let buf = buffer(1_000);
        buf.activate().unwrap();
        for i in 0..10 {
            buf.offer(Msg(i, 1)).await.unwrap();
        }
        buf.shutdown().unwrap();
        let mut taken = Vec::new();
        while let Some(msg) = buf.take().await.unwrap() {
            taken.push(msg.0);
        }
        assert_eq!(taken, (0..10).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn offer_blocks_on_full_until_a_take_frees_budget() {
        let buf = Arc::new(buffer(10));
        buf.activate().unwrap();
        buf.offer(Msg(1, 10)).await.unwrap();

        let producer = {
            let buf = Arc::clone(&buf);
            tokio::spawn(async move { buf.offer(Msg(2, 5)).await })
        };
        // The producer must be parked: capacity is exhausted.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!producer.is_finished());

        assert_eq!(buf.take().await.unwrap(), Some(Msg(1, 10)));
        timeout(Duration::from_secs(1), producer)
            .await
            .expect("producer unblocked")
            .unwrap()
            .unwrap();
        assert_eq!(buf.take().await.unwrap(), Some(Msg(2, 5)));
    }

    #[tokio::test]
    async fn non_blocking_offer_fails_fast_when_full() {
        let buf: MessageBuffer<Msg> = MessageBuffer::new(BufferConfig {
            capacity_bytes: 4,
            allow_offer_block: false,
            ..BufferConfig::default()
        });
        buf.activate().unwrap();
        buf.offer(Msg(1, 4)).await.unwrap();
        assert_eq!(buf.offer(Msg(2, 1)).await, Err(BufferError::Full));
    }

    #[tokio::test]
    async fn shutdown_rejects_offers_but_drains_takes() {
        let buf = buffer(100);
        buf.activate().unwrap();
        buf.offer(Msg(1, 1)).await.unwrap();
        buf.offer(Msg(2, 1)).await.unwrap();
        buf.shutdown().unwrap();

        assert_eq!(buf.offer(Msg(3, 1)).await, Err(BufferError::ShuttingDown));
        assert_eq!(buf.state(), BufferState::Draining);
        assert!(buf.is_supplying());

        assert_eq!(buf.take().await.unwrap(), Some(Msg(1, 1)));
        assert_eq!(buf.take().await.unwrap(), Some(Msg(2, 1)));
        assert_eq!(buf.take().await.unwrap(), None);
        assert_eq!(buf.state(), BufferState::Closed);
        assert!(!buf.is_supplying());
    }

    #[tokio::test]
    async fn shutdown_on_empty_buffer_closes_immediately() {
        let buf = buffer(100);
        buf.activate().unwrap();
        buf.shutdown().unwrap();
        assert_eq!(buf.state(), BufferState::Closed);
        assert_eq!(buf.take().await.unwrap(), None);
    }

    #[tokio::test]
    async fn shutdown_now_discards_and_reports_count() {
        let buf = buffer(100);
        buf.activate().unwrap();
        for i in 0..5 {
            buf.offer(Msg(i, 2)).await.unwrap();
        }
        assert_eq!(buf.shutdown_now(), 5);
        assert_eq!(buf.state(), BufferState::Closed);
        assert_eq!(buf.bytes_used(), 0);
        assert_eq!(buf.take().await.unwrap(), None);
    }

    #[tokio::test]
    async fn shutdown_now_unblocks_a_parked_consumer() {
        let buf = Arc::new(buffer(100));
        buf.activate().unwrap();
        let consumer = {
            let buf = Arc::clone(&buf);
            tokio::spawn(async move { buf.take().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        buf.shutdown_now();
        let taken = timeout(Duration::from_secs(1), consumer)
            .await
            .expect("consumer unblocked")
            .unwrap();
        assert_eq!(taken.unwrap(), None);
    }

    #[tokio::test]
    async fn take_yields_every_offer_before_end_of_stream_under_concurrency() {
        let buf = Arc::new(buffer(64));
        buf.activate().unwrap();
        let producer = {
            let buf = Arc::clone(&buf);
            tokio::spawn(async move {
                for i in 0..100u32 {
                    buf.offer(Msg(i, 8)).await.unwrap();
                }
                buf.shutdown().unwrap();
            })
        };
        let mut taken = Vec::new();
        while let Some(msg) = buf.take().await.unwrap() {
            taken.push(msg.0);
        }
        producer.await.unwrap();
        assert_eq!(taken, (0..100).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn await_closed_returns_once_drained() {
        let buf = Arc::new(buffer(100));
        buf.activate().unwrap();
        buf.offer(Msg(1, 1)).await.unwrap();
        buf.shutdown().unwrap();
        let waiter = {
            let buf = Arc::clone(&buf);
            tokio::spawn(async move { buf.await_closed().await })
        };
        assert_eq!(buf.take().await.unwrap(), Some(Msg(1, 1)));
        timeout(Duration::from_secs(1), waiter)
            .await
            .expect("await_closed returned")
            .unwrap();
    }

    #[tokio::test]
    async fn oversized_item_is_admitted_into_an_empty_buffer() {
        // High-watermark semantics: admission only checks the budget before
        // the offer, so a single item larger than the capacity still flows.
        let buf = buffer(4);
        buf.activate().unwrap();
        buf.offer(Msg(1, 1_000)).await.unwrap();
        assert_eq!(buf.bytes_used(), 1_000);
        assert_eq!(buf.take().await.unwrap(), Some(Msg(1, 1_000)));
    }
}
