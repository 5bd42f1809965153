//! Logical→physical indirection with online compaction
//!
//! [`BlockMap`] presents a fixed array of `logical_size` blocks on top of the
//! append log. Physical storage is bounded: at most `2 × logical_size` slots
//! are ever live, and on every overwrite one surviving block is relocated
//! forward (`clean_one`), so the log can keep deleting chunks that fall below
//! `top - 2L` without ever losing live data.
//!
//! Live slots are tracked window-compressed: `slot = physical % 2L`, with the
//! absolute address reconstructed from `top` on the way back out. The map has
//! no persistence of its own; it is rebuilt from the log on every open.

use std::fmt;

use bytes::Bytes;

use crate::aead::AeadKey;
use crate::bitset::LiveBits;
use crate::error::{Result, VaultError};
use crate::layout::Geometry;
use crate::log::ChunkLog;

const UNMAPPED: u32 = u32::MAX;

pub struct BlockMap {
    logical_size: u32,
    /// Retention window in blocks, always `2 * logical_size`.
    window: u32,
    log: ChunkLog,
    /// Window-compressed physical slot per logical id, or `UNMAPPED`.
    physical: Vec<u32>,
    /// Which slots of the window hold live data.
    in_use: LiveBits,
}

impl fmt::Debug for BlockMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockMap")
            .field("logical_size", &self.logical_size)
            .field("window", &self.window)
            .field("log", &self.log)
            .finish_non_exhaustive()
    }
}

impl BlockMap {
    /// Open a storage directory and rebuild the mapping by replaying the
    /// append log in physical order; later records supersede earlier ones
    /// for the same logical id.
    pub fn open<P: AsRef<std::path::Path>>(
        dir: P,
        geo: Geometry,
        key: &AeadKey,
        logical_size: u32,
    ) -> Result<Self> {
        // The window is twice the logical size; anything larger than half
        // the id space cannot be represented.
        if logical_size > u32::MAX / 2 {
            return Err(VaultError::Consistency(format!(
                "logical size {logical_size} exceeds the {} block maximum",
                u32::MAX / 2
            )));
        }
        let window = 2 * logical_size;
        let mut log = ChunkLog::open(dir, geo, key)?;
        let mut physical = vec![UNMAPPED; logical_size as usize];
        let mut in_use = LiveBits::new(window as usize);
        log.scan(|phys, logical| {
            if logical >= logical_size {
                return Err(VaultError::Consistency(format!(
                    "replayed logical id {logical} outside device of {logical_size} blocks"
                )));
            }
            let slot = (phys % window as u64) as u32;
            let old = physical[logical as usize];
            if old != UNMAPPED {
                in_use.set(old as usize, false);
            }
            in_use.set(slot as usize, true);
            physical[logical as usize] = slot;
            Ok(())
        })?;
        Ok(BlockMap {
            logical_size,
            window,
            log,
            physical,
            in_use,
        })
    }

    pub fn logical_size(&self) -> u32 {
        self.logical_size
    }

    pub fn geometry(&self) -> &Geometry {
        self.log.geometry()
    }

    /// Write one block. Frees the previous location first, performs one
    /// compaction step, appends, then trims chunks that fell out of the
    /// retention window.
    pub fn write(&mut self, logical: u32, data: &[u8]) -> Result<()> {
        self.check_id(logical)?;
        let prev = self.physical[logical as usize];
        if prev != UNMAPPED {
            self.in_use.set(prev as usize, false);
            self.clean_one()?;
        }
        let phys = self.log.write_block(logical, data)?;
        let slot = self.contract(phys);
        self.in_use.set(slot as usize, true);
        self.physical[logical as usize] = slot;

        if self.log.top() > self.window as u64 {
            self.log.remove_old(self.log.top() - self.window as u64)?;
        }
        Ok(())
    }

    /// Read one block. Never-written blocks read as zeroes.
    pub fn read(&mut self, logical: u32) -> Result<Bytes> {
        self.check_id(logical)?;
        let slot = self.physical[logical as usize];
        if slot == UNMAPPED {
            return Ok(Bytes::from(vec![
                0u8;
                self.geometry().bytes_per_block as usize
            ]));
        }
        let (data, stored) = self.log.read_block(self.expand(slot))?;
        if stored != logical {
            return Err(VaultError::Consistency(format!(
                "block mapped to logical {logical} carries logical id {stored}"
            )));
        }
        Ok(data)
    }

    /// Relocate the oldest surviving block forward, if any.
    ///
    /// The oldest live slot is the first in-use bit at or after the window
    /// position of the log's tail. Rewriting it as a fresh append moves it
    /// ahead of the retention cutoff, which is what keeps the total live
    /// footprint within the window.
    fn clean_one(&mut self) -> Result<()> {
        let slot = self.in_use.find_set(self.contract(self.log.top()) as usize);
        if slot == self.window as usize {
            return Ok(());
        }
        let (data, logical) = self.log.read_block(self.expand(slot as u32))?;
        self.check_id(logical)?;
        self.in_use.set(slot, false);
        let phys = self.log.write_block(logical, &data)?;
        let new_slot = self.contract(phys);
        self.in_use.set(new_slot as usize, true);
        self.physical[logical as usize] = new_slot;
        Ok(())
    }

    /// Reconstruct the absolute physical address in `[top - window, top)`
    /// whose residue is `slot`.
    fn expand(&self, slot: u32) -> u64 {
        let window = self.window as u64;
        let laps = self.log.top() / window;
        let mut phys = laps * window + slot as u64;
        if phys >= self.log.top() {
            phys -= window;
        }
        phys
    }

    fn contract(&self, phys: u64) -> u32 {
        (phys % self.window as u64) as u32
    }

    fn check_id(&self, logical: u32) -> Result<()> {
        if logical >= self.logical_size {
            return Err(VaultError::InvalidBlockId {
                id: logical,
                limit: self.logical_size,
            });
        }
        Ok(())
    }
}
