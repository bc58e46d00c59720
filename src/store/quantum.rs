//! Quantum store device — a growable, sparsely allocated linear byte store.
//!
//! Storage is a two-level structure: an index-addressed vector of slabs
//! ("quantum sets"), each slab holding `qset_size` optional quantum buffers
//! of `quantum_size` bytes. Slabs and quanta are created on first write;
//! regions that were addressed but never written stay absent ("holes") and
//! read back as no data, never as zeroes.
//!
//! ```text
//! offset ──► slab index ──► slot index ──► byte offset in quantum
//!
//! slabs: [ Slab 0 ]  [ Slab 1 ]  [ Slab 2 ] …
//!           │
//!           ▼ slots (qset_size entries, each optional)
//!         [ quantum ] [ ∅ hole ] [ quantum ] …
//!              │
//!              ▼ quantum_size bytes
//! ```
//!
//! One mutex protects the whole device and is held for the duration of a
//! single call; no operation on the store ever suspends.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::error::{DevError, Result};
use crate::store::handle::StoreHandle;

/// Quantum and slab sizing for one device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreGeometry {
    /// Bytes per quantum — the smallest allocation unit.
    pub quantum_size: usize,
    /// Quantum slots per slab.
    pub qset_size: usize,
}

impl Default for StoreGeometry {
    fn default() -> Self {
        Self { quantum_size: 4000, qset_size: 1000 }
    }
}

impl StoreGeometry {
    /// Bytes addressed by one slab.
    fn item_size(&self) -> u64 {
        self.quantum_size as u64 * self.qset_size as u64
    }

    fn validate(&self) -> Result<()> {
        if self.quantum_size == 0 || self.qset_size == 0 {
            return Err(DevError::InvalidArgument(
                "quantum_size and qset_size must be > 0".into(),
            ));
        }
        Ok(())
    }
}

/// Allocation statistics, for status output and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreStats {
    /// Exact logical byte length (highest written offset + 1 past the end).
    pub logical_size: u64,
    /// Slab records currently linked.
    pub slabs: usize,
    /// Quantum buffers actually allocated.
    pub quanta: usize,
    /// Bytes of quantum storage backing the device.
    pub allocated_bytes: u64,
}

/// One slab: a fixed array of optional quantum buffers.
/// An empty `slots` vector means the slot array itself was never allocated.
struct Slab {
    slots: Vec<Option<Box<[u8]>>>,
}

impl Slab {
    fn unallocated() -> Self {
        Slab { slots: Vec::new() }
    }
}

struct StoreInner {
    /// Geometry the current slab chain was built with.
    geometry: StoreGeometry,
    /// Defaults installed by the next `reset()`. May differ from `geometry`
    /// after `set_default_geometry`.
    defaults: StoreGeometry,
    /// Exact logical length; never inferred from allocated storage.
    size: u64,
    slabs: Vec<Slab>,
}

/// A sparse, offset-addressed byte device.
pub struct QuantumDevice {
    inner: Mutex<StoreInner>,
}

/// Target of an offset within the two-level structure.
fn locate(geometry: StoreGeometry, offset: u64) -> (usize, usize, usize) {
    let item_size = geometry.item_size();
    let item = (offset / item_size) as usize;
    let rest = offset % item_size;
    let slot = (rest / geometry.quantum_size as u64) as usize;
    let byte = (rest % geometry.quantum_size as u64) as usize;
    (item, slot, byte)
}

impl QuantumDevice {
    pub fn new(geometry: StoreGeometry) -> Result<Self> {
        geometry.validate()?;
        info!(
            quantum_size = geometry.quantum_size,
            qset_size = geometry.qset_size,
            "Quantum store created"
        );
        Ok(QuantumDevice {
            inner: Mutex::new(StoreInner {
                geometry,
                defaults: geometry,
                size: 0,
                slabs: Vec::new(),
            }),
        })
    }

    /// Open a cursor over this device. Never blocks, allocates nothing.
    pub fn open(self: &Arc<Self>) -> StoreHandle {
        StoreHandle::new(self.clone())
    }

    /// Exact logical byte length of the device.
    pub fn len(&self) -> u64 {
        self.inner.lock().size
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Geometry the current slab chain was built with.
    pub fn geometry(&self) -> StoreGeometry {
        self.inner.lock().geometry
    }

    /// Change the defaults the next `reset()` installs. The live chain keeps
    /// its current geometry until then.
    pub fn set_default_geometry(&self, geometry: StoreGeometry) -> Result<()> {
        geometry.validate()?;
        self.inner.lock().defaults = geometry;
        Ok(())
    }

    /// Read up to `buf.len()` bytes at `offset`.
    ///
    /// Returns 0 at or past the end of the device and 0 when `offset` lands
    /// in a hole. A single call never reads across a quantum boundary;
    /// callers wanting more re-issue with an advanced offset.
    pub fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let inner = self.inner.lock();
        if offset >= inner.size || buf.is_empty() {
            return Ok(0);
        }
        let mut count = (buf.len() as u64).min(inner.size - offset) as usize;

        let (item, slot, byte) = locate(inner.geometry, offset);
        // Never cross past the end of one quantum.
        count = count.min(inner.geometry.quantum_size - byte);

        let Some(slab) = inner.slabs.get(item) else {
            return Ok(0); // hole: slab never allocated
        };
        let Some(quantum) = slab.slots.get(slot).and_then(|s| s.as_ref()) else {
            return Ok(0); // hole: slot array or quantum absent
        };
        buf[..count].copy_from_slice(&quantum[byte..byte + count]);
        debug!(offset, item, slot, byte, count, "store read");
        Ok(count)
    }

    /// Write up to `data.len()` bytes at `offset`, allocating the slab, its
    /// slot array, and the target quantum as needed.
    ///
    /// The write is clamped to the end of the current quantum. On allocation
    /// failure the logical size is not updated and no bytes are copied;
    /// already-extended slab records remain as unused capacity.
    pub fn write_at(&self, offset: u64, data: &[u8]) -> Result<usize> {
        if data.is_empty() {
            return Ok(0);
        }
        let mut inner = self.inner.lock();
        let geometry = inner.geometry;
        let (item, slot, byte) = locate(geometry, offset);
        let count = data.len().min(geometry.quantum_size - byte);

        // Extend the slab vector up to `item`, zero slabs in between.
        if inner.slabs.len() <= item {
            let missing = item + 1 - inner.slabs.len();
            inner.slabs.try_reserve(missing)?;
            inner.slabs.resize_with(item + 1, Slab::unallocated);
        }
        let slab = &mut inner.slabs[item];

        // Lazily allocate the slot array for this slab.
        if slab.slots.is_empty() {
            slab.slots.try_reserve_exact(geometry.qset_size)?;
            slab.slots.resize_with(geometry.qset_size, || None);
        }

        // Lazily allocate the target quantum.
        let quantum = match &mut slab.slots[slot] {
            Some(quantum) => quantum,
            empty => {
                let mut buf: Vec<u8> = Vec::new();
                buf.try_reserve_exact(geometry.quantum_size)?;
                buf.resize(geometry.quantum_size, 0);
                empty.insert(buf.into_boxed_slice())
            }
        };

        quantum[byte..byte + count].copy_from_slice(&data[..count]);
        inner.size = inner.size.max(offset + count as u64);
        debug!(offset, item, slot, byte, count, size = inner.size, "store write");
        Ok(count)
    }

    /// Release every slab and quantum, zero the logical size, and install
    /// the currently configured default geometry.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        let freed = inner.slabs.len();
        inner.slabs = Vec::new();
        inner.size = 0;
        inner.geometry = inner.defaults;
        info!(slabs_freed = freed, "Quantum store reset");
    }

    /// Snapshot of allocation state.
    pub fn stats(&self) -> StoreStats {
        let inner = self.inner.lock();
        let quanta: usize = inner
            .slabs
            .iter()
            .map(|s| s.slots.iter().filter(|q| q.is_some()).count())
            .sum();
        StoreStats {
            logical_size: inner.size,
            slabs: inner.slabs.len(),
            quanta,
            allocated_bytes: quanta as u64 * inner.geometry.quantum_size as u64,
        }
    }
}
