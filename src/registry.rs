//! Fixed device pool — the piece a host dispatch layer would own.
//!
//! Devices are created once from a validated [`Config`] and live for the
//! process lifetime; callers look them up by index and open handles. No
//! OS-level registration happens here: the set is plain in-process glue.

use std::sync::Arc;

use tracing::info;

use crate::config::Config;
use crate::error::Result;
use crate::pipe::stream::StreamPipe;
use crate::store::quantum::QuantumDevice;

pub struct DeviceSet {
    stores: Vec<Arc<QuantumDevice>>,
    pipes: Vec<Arc<StreamPipe>>,
}

impl DeviceSet {
    /// Build the full device set from a validated [`Config`].
    pub fn from_config(config: &Config) -> Result<Self> {
        let mut stores = Vec::with_capacity(config.store.devices);
        for _ in 0..config.store.devices {
            stores.push(Arc::new(QuantumDevice::new(config.store.geometry())?));
        }

        let mut pipes = Vec::with_capacity(config.pipe.devices);
        for _ in 0..config.pipe.devices {
            pipes.push(Arc::new(StreamPipe::new(config.pipe.buffer_size)?));
        }

        info!(
            stores = stores.len(),
            pipes = pipes.len(),
            quantum_size = config.store.quantum_size,
            qset_size = config.store.qset_size,
            pipe_buffer = config.pipe.buffer_size,
            "Device set created"
        );
        Ok(DeviceSet { stores, pipes })
    }

    pub fn store(&self, idx: usize) -> Option<&Arc<QuantumDevice>> {
        self.stores.get(idx)
    }

    pub fn pipe(&self, idx: usize) -> Option<&Arc<StreamPipe>> {
        self.pipes.get(idx)
    }

    pub fn store_count(&self) -> usize {
        self.stores.len()
    }

    pub fn pipe_count(&self) -> usize {
        self.pipes.len()
    }
}

impl Drop for DeviceSet {
    fn drop(&mut self) {
        // Stores keep their chains until explicitly reset; release them on
        // teardown so shared references do not pin dead storage.
        for store in &self.stores {
            store.reset();
        }
        info!("Device set torn down");
    }
}
