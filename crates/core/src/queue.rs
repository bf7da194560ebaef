use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::metrics::Metrics;

/// Result of posting a trigger value.
///
/// # Example
/// ```rust
/// use cadence_core::prelude::{latest, SendOutcome};
///
/// let (tx, _rx) = latest::<u8>();
/// assert_eq!(tx.send(1), SendOutcome::Ok);
/// assert_eq!(tx.send(2), SendOutcome::Superseded);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Value was accepted into an empty slot.
    Ok,
    /// Value was accepted and replaced an unconsumed one.
    Superseded,
    /// Mailbox is closed.
    Closed,
}

/// Result of waiting for a trigger value.
///
/// # Example
/// ```rust
/// use std::time::Duration;
/// use cadence_core::prelude::{latest, RecvOutcome};
///
/// let (_tx, rx) = latest::<u8>();
/// assert!(matches!(rx.recv_for(Duration::from_millis(1)), RecvOutcome::Empty));
/// ```
#[derive(Debug)]
pub enum RecvOutcome<T> {
    /// Received value.
    Data(T),
    /// Wait timed out with nothing pending.
    Empty,
    /// Mailbox has been closed and drained.
    Closed,
}

struct MailboxInner<T> {
    slot: Mutex<Option<T>>,
    available: Condvar,
    closed: AtomicBool,
    metrics: Metrics,
}

/// Sender half of a latest-wins mailbox.
///
/// # Example
/// ```rust
/// use cadence_core::prelude::{latest, SendOutcome};
///
/// let (tx, _rx) = latest::<u64>();
/// assert_eq!(tx.send(7), SendOutcome::Ok);
/// ```
pub struct MailboxTx<T> {
    inner: Arc<MailboxInner<T>>,
}

impl<T> Clone for MailboxTx<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> MailboxTx<T> {
    /// Post a value, replacing any unconsumed one.
    pub fn send(&self, value: T) -> SendOutcome {
        if self.inner.closed.load(Ordering::Acquire) {
            return SendOutcome::Closed;
        }
        let superseded = {
            let mut slot = self.inner.slot.lock();
            let superseded = slot.replace(value).is_some();
            self.inner.available.notify_one();
            superseded
        };
        self.inner.metrics.signal();
        if superseded {
            self.inner.metrics.supersede();
            SendOutcome::Superseded
        } else {
            SendOutcome::Ok
        }
    }

    /// Close the mailbox; receivers observe `Closed` once drained.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
        let _slot = self.inner.slot.lock();
        self.inner.available.notify_all();
    }

    /// Counters for this mailbox (signals, supersessions).
    pub fn metrics(&self) -> &Metrics {
        &self.inner.metrics
    }
}

/// Receiver half of a latest-wins mailbox.
///
/// # Example
/// ```rust
/// use std::time::Duration;
/// use cadence_core::prelude::{latest, RecvOutcome};
///
/// let (tx, rx) = latest::<u8>();
/// let _ = tx.send(1);
/// let _ = tx.send(2);
/// match rx.recv_for(Duration::from_millis(10)) {
///     RecvOutcome::Data(v) => assert_eq!(v, 2),
///     _ => unreachable!(),
/// }
/// ```
pub struct MailboxRx<T> {
    inner: Arc<MailboxInner<T>>,
}

impl<T> MailboxRx<T> {
    /// Take the pending value if any, without blocking.
    pub fn try_recv(&self) -> RecvOutcome<T> {
        let mut slot = self.inner.slot.lock();
        match slot.take() {
            Some(value) => RecvOutcome::Data(value),
            None if self.inner.closed.load(Ordering::Acquire) => RecvOutcome::Closed,
            None => RecvOutcome::Empty,
        }
    }

    /// Wait up to `timeout` for a value.
    ///
    /// `Empty` means the wait timed out; callers treat that as a retry,
    /// never an error.
    pub fn recv_for(&self, timeout: Duration) -> RecvOutcome<T> {
        let mut slot = self.inner.slot.lock();
        loop {
            if let Some(value) = slot.take() {
                return RecvOutcome::Data(value);
            }
            if self.inner.closed.load(Ordering::Acquire) {
                return RecvOutcome::Closed;
            }
            if self.inner.available.wait_for(&mut slot, timeout).timed_out() {
                return match slot.take() {
                    Some(value) => RecvOutcome::Data(value),
                    None if self.inner.closed.load(Ordering::Acquire) => RecvOutcome::Closed,
                    None => RecvOutcome::Empty,
                };
            }
        }
    }

    /// Mark the mailbox as closed from the receiving side.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
        let _slot = self.inner.slot.lock();
        self.inner.available.notify_all();
    }
}

/// Create a latest-wins mailbox.
///
/// Holds at most one pending value; a second send before the first is
/// consumed silently supersedes it. This is the trigger channel between
/// pipeline stages: a slow consumer skips intermediate ticks instead of
/// queueing unbounded work.
///
/// # Example
/// ```rust
/// use std::time::Duration;
/// use cadence_core::prelude::{latest, RecvOutcome, SendOutcome};
///
/// let (tx, rx) = latest::<i64>();
/// assert_eq!(tx.send(41), SendOutcome::Ok);
/// assert_eq!(tx.send(42), SendOutcome::Superseded);
/// assert!(matches!(rx.recv_for(Duration::from_millis(5)), RecvOutcome::Data(42)));
/// ```
pub fn latest<T>() -> (MailboxTx<T>, MailboxRx<T>) {
    let inner = Arc::new(MailboxInner {
        slot: Mutex::new(None),
        available: Condvar::new(),
        closed: AtomicBool::new(false),
        metrics: Metrics::default(),
    });
    (
        MailboxTx {
            inner: inner.clone(),
        },
        MailboxRx { inner },
    )
}
