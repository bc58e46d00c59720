//! Stream pipe device — a fixed-capacity circular byte buffer.
//!
//! ```text
//!               capacity bytes (one slot reserved)
//!   ┌─────────────────────────────────────────────┐
//!   │ consumed │████ readable ████│  free         │
//!   └─────────────────────────────────────────────┘
//!              ▲                  ▲
//!             rpos              wpos        (both wrap to 0 at the end)
//! ```
//!
//! Empty ⇔ `rpos == wpos`; one slot always stays unused so a full buffer is
//! distinguishable from an empty one. The buffer is allocated on the first
//! open and freed when the last opener closes; the device itself persists.
//!
//! One mutex serialises all access. Blocking reads wait on `data_avail`,
//! blocking writes on `space_avail` — two separate conditions, so readers
//! are only woken by write progress and vice versa. Wakeups are broadcast
//! and every waiter revalidates its condition after waking. A single call
//! never copies across the physical end of the buffer: a transfer that
//! logically wraps takes two calls. That keeps the copy contiguous and is
//! the documented contract, not an oversight.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::error::{DevError, Result};
use crate::pipe::cancel::CancelToken;

/// Access requested when opening a pipe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    Read,
    Write,
    ReadWrite,
}

impl OpenMode {
    fn reads(self) -> bool {
        matches!(self, OpenMode::Read | OpenMode::ReadWrite)
    }

    fn writes(self) -> bool {
        matches!(self, OpenMode::Write | OpenMode::ReadWrite)
    }
}

/// Non-blocking readiness snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Readiness {
    /// A read would return at least one byte right now.
    pub readable: bool,
    /// A write would accept at least one byte right now.
    pub writable: bool,
}

/// Notification target for asynchronous readers.
///
/// `data_ready` fires after every successful write, outside the device
/// lock. It must not block; whatever it does with the notification is its
/// own business and failures are never escalated.
pub trait PipeListener: Send + Sync {
    fn data_ready(&self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

pub(crate) struct PipeState {
    /// Allocated on first open, freed on last close.
    buffer: Option<Box<[u8]>>,
    rpos: usize,
    wpos: usize,
    readers: usize,
    writers: usize,
}

impl PipeState {
    fn has_data(&self) -> bool {
        self.rpos != self.wpos
    }

    /// Free space, wrap-aware. The reserved slot is already subtracted.
    fn space_free(&self, capacity: usize) -> usize {
        if self.rpos == self.wpos {
            return capacity - 1;
        }
        (self.rpos + capacity - self.wpos) % capacity - 1
    }

    fn pending_bytes(&self, capacity: usize) -> usize {
        (self.wpos + capacity - self.rpos) % capacity
    }
}

pub(crate) struct PipeShared {
    /// Immutable after construction; readable without the state lock.
    capacity: usize,
    pub(crate) state: Mutex<PipeState>,
    pub(crate) data_avail: Condvar,
    pub(crate) space_avail: Condvar,
    listeners: Mutex<Vec<(ListenerId, Arc<dyn PipeListener>)>>,
    next_listener: AtomicU64,
}

impl PipeShared {
    fn add_listener(&self, target: Arc<dyn PipeListener>) -> ListenerId {
        let id = ListenerId(self.next_listener.fetch_add(1, Ordering::Relaxed));
        self.listeners.lock().push((id, target));
        id
    }

    fn remove_listener(&self, id: ListenerId) {
        self.listeners.lock().retain(|(lid, _)| *lid != id);
    }

    /// Fan out to every registered listener, outside the registry lock so a
    /// listener may call back into the pipe.
    fn notify_listeners(&self) {
        let targets: Vec<Arc<dyn PipeListener>> =
            self.listeners.lock().iter().map(|(_, l)| l.clone()).collect();
        for target in targets {
            target.data_ready();
        }
    }
}

/// Suspend on `cond` until signalled. The device lock is released while
/// suspended and is re-acquired before this returns, on the error path too.
/// Cancellation is observed here and only here: a cancelled token yields
/// `Interrupted` with nothing consumed or produced.
fn wait_for_signal(
    shared: &Arc<PipeShared>,
    cond: &Condvar,
    state: &mut MutexGuard<'_, PipeState>,
    cancel: Option<&CancelToken>,
) -> Result<()> {
    match cancel {
        None => cond.wait(state),
        Some(token) => {
            // Attach before the flag check: a cancel landing in between is
            // then guaranteed to either be seen here or wake the wait.
            let _attached = token.attach(shared);
            if token.is_cancelled() {
                return Err(DevError::Interrupted);
            }
            cond.wait(state);
            if token.is_cancelled() {
                return Err(DevError::Interrupted);
            }
        }
    }
    Ok(())
}

/// A circular stream pipe device. Cheap to share; all opens go through it.
pub struct StreamPipe {
    shared: Arc<PipeShared>,
}

impl StreamPipe {
    /// Create a pipe with `capacity` physical bytes (`capacity - 1` usable).
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity < 2 {
            return Err(DevError::InvalidArgument(
                "pipe capacity must be >= 2 (one slot is reserved)".into(),
            ));
        }
        info!(capacity, "Stream pipe created");
        Ok(StreamPipe {
            shared: Arc::new(PipeShared {
                capacity,
                state: Mutex::new(PipeState {
                    buffer: None,
                    rpos: 0,
                    wpos: 0,
                    readers: 0,
                    writers: 0,
                }),
                data_avail: Condvar::new(),
                space_avail: Condvar::new(),
                listeners: Mutex::new(Vec::new()),
                next_listener: AtomicU64::new(0),
            }),
        })
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    /// Open the pipe, allocating the buffer if no opener currently holds it.
    /// Positions reset to the start on (re)allocation only. Never blocks.
    pub fn open(&self, mode: OpenMode) -> Result<PipeHandle> {
        let capacity = self.shared.capacity;
        let mut state = self.shared.state.lock();
        if state.buffer.is_none() {
            let mut buf: Vec<u8> = Vec::new();
            buf.try_reserve_exact(capacity)?;
            buf.resize(capacity, 0);
            state.buffer = Some(buf.into_boxed_slice());
            state.rpos = 0;
            state.wpos = 0;
            debug!(capacity, "pipe buffer allocated");
        }
        if mode.reads() {
            state.readers += 1;
        }
        if mode.writes() {
            state.writers += 1;
        }
        Ok(PipeHandle {
            shared: self.shared.clone(),
            mode,
            listener: None,
            closed: false,
        })
    }
}

/// One opener of a [`StreamPipe`]. Closing (explicitly or by drop) releases
/// the opener's reader/writer count and deregisters its listener; the last
/// close frees the buffer.
pub struct PipeHandle {
    shared: Arc<PipeShared>,
    mode: OpenMode,
    listener: Option<ListenerId>,
    closed: bool,
}

impl PipeHandle {
    /// Blocking read: suspends while the buffer is empty.
    pub fn read(&self, buf: &mut [u8]) -> Result<usize> {
        self.read_impl(buf, false, None)
    }

    /// Non-blocking read: `WouldBlock` instead of suspending.
    pub fn try_read(&self, buf: &mut [u8]) -> Result<usize> {
        self.read_impl(buf, true, None)
    }

    /// Blocking read that `token` can interrupt. Interruption yields
    /// `Interrupted` with no bytes consumed.
    pub fn read_cancellable(&self, buf: &mut [u8], token: &CancelToken) -> Result<usize> {
        self.read_impl(buf, false, Some(token))
    }

    /// Blocking write: suspends while no free space exists.
    pub fn write(&self, data: &[u8]) -> Result<usize> {
        self.write_impl(data, false, None)
    }

    /// Non-blocking write: `WouldBlock` instead of suspending.
    pub fn try_write(&self, data: &[u8]) -> Result<usize> {
        self.write_impl(data, true, None)
    }

    /// Blocking write that `token` can interrupt. Interruption yields
    /// `Interrupted` with no bytes produced and positions unchanged.
    pub fn write_cancellable(&self, data: &[u8], token: &CancelToken) -> Result<usize> {
        self.write_impl(data, false, Some(token))
    }

    /// Readiness snapshot under the device lock. Never blocks.
    pub fn poll(&self) -> Readiness {
        let state = self.shared.state.lock();
        Readiness {
            readable: state.has_data(),
            writable: state.space_free(self.shared.capacity) > 0,
        }
    }

    /// Register `target` for post-write notification. A handle carries at
    /// most one registration; registering again replaces the previous one.
    pub fn register_listener(&mut self, target: Arc<dyn PipeListener>) -> ListenerId {
        if let Some(old) = self.listener.take() {
            self.shared.remove_listener(old);
        }
        let id = self.shared.add_listener(target);
        self.listener = Some(id);
        id
    }

    pub fn unregister_listener(&mut self) {
        if let Some(id) = self.listener.take() {
            self.shared.remove_listener(id);
        }
    }

    /// Close this opener. Equivalent to dropping the handle.
    pub fn close(mut self) {
        self.close_inner();
    }

    fn read_impl(
        &self,
        buf: &mut [u8],
        nonblocking: bool,
        cancel: Option<&CancelToken>,
    ) -> Result<usize> {
        if !self.mode.reads() {
            return Err(DevError::InvalidArgument(
                "handle not open for reading".into(),
            ));
        }
        if buf.is_empty() {
            return Ok(0);
        }

        let mut state = self.shared.state.lock();
        while !state.has_data() {
            if nonblocking {
                return Err(DevError::WouldBlock);
            }
            wait_for_signal(&self.shared, &self.shared.data_avail, &mut state, cancel)?;
        }

        // Contiguous run only: stop at wpos, or at the physical end if the
        // writer has wrapped.
        let capacity = self.shared.capacity;
        let run = if state.wpos > state.rpos {
            state.wpos - state.rpos
        } else {
            capacity - state.rpos
        };
        let n = run.min(buf.len());
        let rpos = state.rpos;
        {
            let data = state.buffer.as_ref().ok_or_else(|| {
                DevError::InvalidArgument("pipe buffer is not allocated".into())
            })?;
            buf[..n].copy_from_slice(&data[rpos..rpos + n]);
        }
        state.rpos = (rpos + n) % capacity;
        drop(state);

        self.shared.space_avail.notify_all();
        debug!(bytes = n, "pipe read");
        Ok(n)
    }

    fn write_impl(
        &self,
        data: &[u8],
        nonblocking: bool,
        cancel: Option<&CancelToken>,
    ) -> Result<usize> {
        if !self.mode.writes() {
            return Err(DevError::InvalidArgument(
                "handle not open for writing".into(),
            ));
        }
        if data.is_empty() {
            return Ok(0);
        }

        let capacity = self.shared.capacity;
        let mut state = self.shared.state.lock();
        while state.space_free(capacity) == 0 {
            if nonblocking {
                return Err(DevError::WouldBlock);
            }
            wait_for_signal(&self.shared, &self.shared.space_avail, &mut state, cancel)?;
        }

        // Clamp to total free space, then to the contiguous run up to the
        // physical end (writer not wrapped) or up to rpos - 1 (wrapped).
        let mut n = data.len().min(state.space_free(capacity));
        n = n.min(if state.wpos >= state.rpos {
            capacity - state.wpos
        } else {
            state.rpos - state.wpos - 1
        });
        let wpos = state.wpos;
        {
            let buffer = state.buffer.as_mut().ok_or_else(|| {
                DevError::InvalidArgument("pipe buffer is not allocated".into())
            })?;
            buffer[wpos..wpos + n].copy_from_slice(&data[..n]);
        }
        state.wpos = (wpos + n) % capacity;
        drop(state);

        self.shared.data_avail.notify_all();
        self.shared.notify_listeners();
        debug!(bytes = n, "pipe write");
        Ok(n)
    }

    fn close_inner(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Some(id) = self.listener.take() {
            self.shared.remove_listener(id);
        }
        let mut state = self.shared.state.lock();
        if self.mode.reads() {
            state.readers -= 1;
        }
        if self.mode.writes() {
            state.writers -= 1;
        }
        if state.readers + state.writers == 0 {
            if state.has_data() {
                warn!(
                    bytes_dropped = state.pending_bytes(self.shared.capacity),
                    "Last opener closed with unread data"
                );
            }
            state.buffer = None;
            debug!("pipe buffer freed");
        }
    }
}

impl Drop for PipeHandle {
    fn drop(&mut self) {
        self.close_inner();
    }
}
