//! A single-cell mailbox holding at most one current value.
//!
//! Overwriting the cell wakes anyone waiting for an update; closing it
//! wakes anyone waiting for a close. Built on `tokio::sync::Notify`
//! rather than a hand-rolled list of waiters.

use std::sync::Mutex;
use tokio::sync::Notify;

/// A mailbox for at most one value of type `T`. Overwriting the cell
/// notifies waiters of `wait_for_update`; dropping the slot notifies
/// waiters of `wait_for_close`. The slot is not a queue: a producer
/// faster than its consumer simply overwrites, and only the latest
/// value survives.
pub struct Slot<T> {
    cell: Mutex<Option<T>>,
    updated: Notify,
    closed: Notify,
}

impl<T> Default for Slot<T> {
    fn default() -> Self {
        Slot {
            cell: Mutex::new(None),
            updated: Notify::new(),
            closed: Notify::new(),
        }
    }
}

impl<T: Clone> Slot<T> {
    pub fn new() -> Self {
        Slot::default()
    }

    /// Returns the currently held value, if any.
    pub fn get(&self) -> Option<T> {
        self.cell.lock().unwrap().clone()
    }

    /// Publishes a new value, discarding whatever was there before, and
    /// wakes every task waiting on `wait_for_update`.
    pub fn set(&self, value: T) {
        *self.cell.lock().unwrap() = Some(value);
        self.updated.notify_waiters();
    }

    /// Resolves the next time `set` is called after this call begins
    /// waiting. Does not return the current value if one is already
    /// present -- callers that want "latest or wait" should `get()` first.
    pub async fn wait_for_update(&self) {
        self.updated.notified().await;
    }

    /// Wakes every task waiting on `wait_for_update` without changing the
    /// held value. Used to propagate an abort signal through the same
    /// channel a normal update would use.
    pub fn notify_update(&self) {
        self.updated.notify_waiters();
    }

    /// Signals that this slot is being torn down. Safe to call more than
    /// once; idempotent from the waiter's point of view since
    /// `notify_waiters` simply wakes whoever is currently registered.
    pub fn close(&self) {
        self.closed.notify_waiters();
    }

    /// Resolves when `close` is called.
    pub async fn wait_for_close(&self) {
        self.closed.notified().await;
    }
}
