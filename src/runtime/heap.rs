use crate::language::types::checked_align_up;
use crate::runtime::error::{RuntimeError, RuntimeResult};
use std::collections::BTreeMap;

/// Lowest valid address; everything below it reads as null.
const HEAP_BASE: u64 = 16;
const BLOCK_ALIGN: u64 = 8;

/// Byte-addressed memory backing every pointer the module language can form.
pub struct Heap {
    bytes: Vec<u8>,
    blocks: BTreeMap<u64, u64>,
    free: Vec<(u64, u64)>,
    limit: u64,
}

impl Heap {
    pub fn with_limit(limit: u64) -> Self {
        Self {
            bytes: vec![0; HEAP_BASE as usize],
            blocks: BTreeMap::new(),
            free: Vec::new(),
            limit,
        }
    }

    /// Returns a zero-filled block. Running past the configured limit terminates the process:
    /// there is no recovery path for out-of-memory.
    pub fn alloc(&mut self, size: u64) -> u64 {
        let Some(size) = block_size(size) else {
            allocation_failure(size, self.limit);
        };
        let addr = match self.free.iter().position(|(_, len)| *len >= size) {
            Some(idx) => {
                let (addr, len) = self.free.swap_remove(idx);
                if len > size {
                    self.free.push((addr + size, len - size));
                }
                addr
            }
            None => {
                let addr = self.bytes.len() as u64;
                let end = match addr.checked_add(size) {
                    Some(end) if end <= self.limit => end,
                    _ => allocation_failure(size, self.limit),
                };
                self.bytes.resize(end as usize, 0);
                addr
            }
        };
        self.bytes[addr as usize..(addr + size) as usize].fill(0);
        self.blocks.insert(addr, size);
        addr
    }

    pub fn free(&mut self, addr: u64) -> RuntimeResult<()> {
        let size = self
            .blocks
            .remove(&addr)
            .ok_or(RuntimeError::InvalidFree { addr })?;
        self.free.push((addr, size));
        Ok(())
    }

    pub fn read(&self, addr: u64, len: u64) -> RuntimeResult<&[u8]> {
        let range = self.range(addr, len)?;
        Ok(&self.bytes[range])
    }

    pub fn write(&mut self, addr: u64, data: &[u8]) -> RuntimeResult<()> {
        let range = self.range(addr, data.len() as u64)?;
        self.bytes[range].copy_from_slice(data);
        Ok(())
    }

    pub fn copy(&mut self, dst: u64, src: u64, len: u64) -> RuntimeResult<()> {
        let from = self.range(src, len)?;
        self.range(dst, len)?;
        self.bytes.copy_within(from, dst as usize);
        Ok(())
    }

    pub fn fill(&mut self, addr: u64, len: u64, byte: u8) -> RuntimeResult<()> {
        let range = self.range(addr, len)?;
        self.bytes[range].fill(byte);
        Ok(())
    }

    pub fn live_blocks(&self) -> usize {
        self.blocks.len()
    }

    pub fn live_bytes(&self) -> u64 {
        self.blocks.values().sum()
    }

    pub fn is_live(&self, addr: u64) -> bool {
        self.blocks.contains_key(&addr)
    }

    // Only the heap's own extent is checked; reads that stray past a block into a
    // neighbour are not detected.
    fn range(&self, addr: u64, len: u64) -> RuntimeResult<std::ops::Range<usize>> {
        let end = addr.checked_add(len);
        match end {
            Some(end) if addr >= HEAP_BASE && end <= self.bytes.len() as u64 => {
                Ok(addr as usize..end as usize)
            }
            _ => Err(RuntimeError::BadAddress { addr, len }),
        }
    }
}

fn block_size(requested: u64) -> Option<u64> {
    checked_align_up(requested.max(1), BLOCK_ALIGN)
}

fn allocation_failure(size: u64, limit: u64) -> ! {
    log::error!("allocation of {size} bytes exceeds the heap limit of {limit} bytes");
    std::process::abort()
}
