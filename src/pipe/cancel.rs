// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Cooperative cancellation for blocked pipe calls.
//!
//! A [`CancelToken`] is handed to `read_cancellable`/`write_cancellable`.
//! While such a call is suspended, the token holds a weak reference to the
//! device's wake state; `cancel()` raises the flag and broadcasts both of
//! the device's conditions, so the waiter observes the flag at its next
//! condition recheck and returns `Interrupted` without touching the buffer.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::pipe::stream::PipeShared;

/// Cloneable cancellation flag. One token may interrupt any number of
/// blocked calls across any number of pipes; cancellation is permanent.
#[derive(Clone, Default)]
pub struct CancelToken {
    inner: Arc<CancelInner>,
}

#[derive(Default)]
struct CancelInner {
    cancelled: AtomicBool,
    next_attach: AtomicU64,
    waiters: Mutex<Vec<(u64, Weak<PipeShared>)>>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Raise the flag and wake every call currently blocked on it.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        // Snapshot first; never hold the waiter list while taking a device
        // lock (attach/detach run with the device lock held).
        let targets: Vec<Arc<PipeShared>> = self
            .inner
            .waiters
            .lock()
            .iter()
            .filter_map(|(_, w)| w.upgrade())
            .collect();
        for dev in targets {
            // Signalling under the device lock closes the window between a
            // waiter's flag check and its suspension.
            let _guard = dev.state.lock();
            dev.data_avail.notify_all();
            dev.space_avail.notify_all();
        }
    }

    /// Register `dev` as a wake target until the returned guard drops.
    /// Called with the device lock held, immediately before suspending.
    pub(crate) fn attach(&self, dev: &Arc<PipeShared>) -> Attached<'_> {
        let id = self.inner.next_attach.fetch_add(1, Ordering::Relaxed);
        self.inner.waiters.lock().push((id, Arc::downgrade(dev)));
        Attached { token: self, id }
    }
}

pub(crate) struct Attached<'a> {
    token: &'a CancelToken,
    id: u64,
}

impl Drop for Attached<'_> {
    fn drop(&mut self) {
        self.token
            .inner
            .waiters
            .lock()
            .retain(|(id, _)| *id != self.id);
    }
}
