//! Negotiated buffers for payloads too large for the status channel

use std::sync::{
    atomic::{AtomicU8, Ordering},
    Arc,
};

/// A fixed-size byte buffer shared between host and compute.
///
/// The size is agreed during a two-phase handshake and never changes.
/// Writes are published by the status-word store that follows them, so the
/// byte accesses themselves can stay relaxed.
#[derive(Debug, Clone)]
pub struct SharedBuffer {
    bytes: Arc<[AtomicU8]>,
}

impl SharedBuffer {
    pub fn new(len: usize) -> Self {
        Self {
            bytes: (0..len).map(|_| AtomicU8::new(0)).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Copies `data` into the start of the buffer, returning the bytes written
    pub fn write(&self, data: &[u8]) -> usize {
        let n = data.len().min(self.bytes.len());
        for (slot, byte) in self.bytes.iter().zip(&data[..n]) {
            slot.store(*byte, Ordering::Relaxed);
        }
        n
    }

    /// Copies the first `len` bytes out of the buffer
    pub fn read(&self, len: usize) -> Vec<u8> {
        self.bytes
            .iter()
            .take(len)
            .map(|b| b.load(Ordering::Relaxed))
            .collect()
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.read(self.bytes.len())
    }

    /// Whether both handles refer to the same allocation
    pub fn same_buffer(&self, other: &SharedBuffer) -> bool {
        Arc::ptr_eq(&self.bytes, &other.bytes)
    }
}
