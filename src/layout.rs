//! On-disk geometry and address arithmetic
//!
//! Physical block addresses are linear u64 values decomposed into
//! chunk / region / block coordinates. Every derived byte offset and every
//! IV comes from the arithmetic here, so the rest of the crate never touches
//! raw offsets directly.
//!
//! Layout of one chunk file:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │ region 0: block records ... │ region footer              │
//! │ region 1: block records ... │ region footer              │
//! │ ...                                                      │
//! │ chunk footer                                             │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! A block record is `tag(16) || logical_id(4, big-endian) || payload`.
//! A region footer is `tag(16) || logical_id[blocks_per_region]`.
//! A chunk footer is `tag(16) || logical_id[blocks_per_chunk]`.

use serde::{Deserialize, Serialize};

/// AEAD authentication tag size in bytes.
pub const TAG_SIZE: u64 = 16;

/// Size of the big-endian logical id stored in each block record.
pub const LOGICAL_ID_SIZE: u64 = 4;

/// Shape of the storage units.
///
/// Recorded in the store metadata at create time and honored on every open,
/// so a directory is always read with the geometry it was written with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Geometry {
    /// Payload bytes per block.
    pub bytes_per_block: u64,
    /// Blocks per region.
    pub blocks_per_region: u64,
    /// Regions per chunk (one chunk = one file on disk).
    pub regions_per_chunk: u64,
}

impl Default for Geometry {
    fn default() -> Self {
        Geometry {
            bytes_per_block: 4096,
            blocks_per_region: 4096,
            regions_per_chunk: 256,
        }
    }
}

impl Geometry {
    pub fn blocks_per_chunk(&self) -> u64 {
        self.blocks_per_region * self.regions_per_chunk
    }

    /// Full on-disk size of one block record.
    pub fn block_record_size(&self) -> u64 {
        TAG_SIZE + LOGICAL_ID_SIZE + self.bytes_per_block
    }

    pub fn region_footer_size(&self) -> u64 {
        TAG_SIZE + LOGICAL_ID_SIZE * self.blocks_per_region
    }

    /// Byte offset of the region footer within its region.
    pub fn region_footer_off(&self) -> u64 {
        self.blocks_per_region * self.block_record_size()
    }

    pub fn region_size(&self) -> u64 {
        self.region_footer_off() + self.region_footer_size()
    }

    pub fn chunk_footer_size(&self) -> u64 {
        TAG_SIZE + LOGICAL_ID_SIZE * self.blocks_per_chunk()
    }

    /// Byte offset of the chunk footer within its chunk file.
    pub fn chunk_footer_off(&self) -> u64 {
        self.regions_per_chunk * self.region_size()
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_footer_off() + self.chunk_footer_size()
    }

    /// IV slots consumed by one region: its blocks plus the region footer.
    pub fn ivs_per_region(&self) -> u64 {
        self.blocks_per_region + 1
    }

    /// IV slots consumed by one chunk: its regions plus the chunk footer.
    pub fn ivs_per_chunk(&self) -> u64 {
        self.regions_per_chunk * self.ivs_per_region() + 1
    }

    /// IV of the footer that closes `region_id` of `chunk_id`.
    pub fn region_footer_iv(&self, chunk_id: u64, region_id: u64) -> u64 {
        chunk_id * self.ivs_per_chunk() + (region_id + 1) * self.ivs_per_region() - 1
    }

    /// IV of the footer that closes `chunk_id`.
    pub fn chunk_footer_iv(&self, chunk_id: u64) -> u64 {
        (chunk_id + 1) * self.ivs_per_chunk() - 1
    }
}

/// A physical address broken down into its on-disk coordinates.
#[derive(Debug, Clone, Copy)]
pub struct Coords {
    pub physical: u64,
    /// Which chunk file the block lives in.
    pub chunk_id: u64,
    /// Block index within the entire chunk.
    pub block_in_chunk: u64,
    /// Region index within the chunk.
    pub region_id: u64,
    /// Block index within the region.
    pub block_in_region: u64,
    /// Byte offset of the region within the chunk file.
    pub region_offset: u64,
    /// Byte offset of the block record within the chunk file.
    pub block_offset: u64,
    /// IV of the block record itself.
    pub iv: u64,
}

impl Coords {
    pub fn new(geo: &Geometry, physical: u64) -> Self {
        let chunk_id = physical / geo.blocks_per_chunk();
        let block_in_chunk = physical % geo.blocks_per_chunk();
        let region_id = block_in_chunk / geo.blocks_per_region;
        let block_in_region = block_in_chunk % geo.blocks_per_region;
        let region_offset = region_id * geo.region_size();
        let block_offset = region_offset + block_in_region * geo.block_record_size();
        let iv = chunk_id * geo.ivs_per_chunk() + region_id * geo.ivs_per_region() + block_in_region;
        Coords {
            physical,
            chunk_id,
            block_in_chunk,
            region_id,
            block_in_region,
            region_offset,
            block_offset,
            iv,
        }
    }
}

/// Encode a logical id into slot `which` of a footer/record body.
///
/// The only place host byte order is converted to the fixed on-disk order.
pub fn put_logical(body: &mut [u8], which: usize, logical: u32) {
    let at = which * LOGICAL_ID_SIZE as usize;
    body[at..at + 4].copy_from_slice(&logical.to_be_bytes());
}

/// Decode the logical id in slot `which` of a footer/record body.
pub fn get_logical(body: &[u8], which: usize) -> u32 {
    let at = which * LOGICAL_ID_SIZE as usize;
    u32::from_be_bytes([body[at], body[at + 1], body[at + 2], body[at + 3]])
}
