//! Chunked, crash-recoverable append log of encrypted blocks
//!
//! The log is a sequence of fixed-size chunk files named `file_<N>`. Blocks
//! are appended strictly in physical order; when a region fills, an
//! authenticated footer listing the region's logical ids follows it, and when
//! a chunk fills, a chunk-wide footer closes the file and a fresh chunk file
//! is started. Footers exist purely to make replay cheap: a complete chunk is
//! recovered with a single decrypt instead of one per block.
//!
//! Recovery never needs a write-ahead log. A crash can only tear the tail of
//! the newest file, so `open` binary-searches the chunk's block boundaries
//! for the largest record-aligned offset that fits and truncates the rest.
//! Footers are written after the blocks they index, so a missing footer never
//! references missing data.

use std::collections::BTreeMap;
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use bytes::{Bytes, BytesMut};

use crate::aead::{AeadKey, BlockCipher};
use crate::error::{Result, VaultError};
use crate::layout::{get_logical, put_logical, Coords, Geometry, LOGICAL_ID_SIZE, TAG_SIZE};

/// Companion files the store keeps next to the chunk files. The log skips
/// them during directory validation; anything else unexpected is fatal.
pub const RESERVED_FILES: [&str; 2] = ["salt", "meta"];

struct ChunkFile {
    file: File,
    /// Bytes known to be valid in this file. Reads beyond this are refused
    /// rather than allowed to come back short.
    size: u64,
}

/// Append log over one storage directory.
///
/// Single-writer, synchronous. All chunk file handles are owned here and
/// closed when the log (or an evicted entry) is dropped.
pub struct ChunkLog {
    geo: Geometry,
    cipher: BlockCipher,
    dir: PathBuf,
    chunks: BTreeMap<u64, ChunkFile>,
    /// Chunk id currently open for appends.
    head: u64,
    /// Next physical address to be written. Monotonic.
    top: u64,
    /// Logical ids of the region in progress, flushed as the region footer.
    region_ids: Vec<u32>,
    /// Logical ids of the chunk in progress, flushed as the chunk footer.
    chunk_ids: Vec<u32>,
}

impl fmt::Debug for ChunkLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChunkLog")
            .field("dir", &self.dir)
            .field("head", &self.head)
            .field("top", &self.top)
            .field("chunks", &self.chunks.len())
            .finish_non_exhaustive()
    }
}

impl ChunkLog {
    /// Open a storage directory, creating it if absent, and recover the
    /// append position from whatever files are present.
    pub fn open<P: AsRef<Path>>(dir: P, geo: Geometry, key: &AeadKey) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        let mut found: Vec<u64> = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with('.') || RESERVED_FILES.contains(&name.as_ref()) {
                continue;
            }
            let num = name
                .strip_prefix("file_")
                .and_then(|s| s.parse::<u64>().ok())
                .ok_or_else(|| {
                    VaultError::Consistency(format!("unexpected entry in storage directory: {name}"))
                })?;
            found.push(num);
        }
        found.sort_unstable();
        if let Some(gap) = found.windows(2).find(|w| w[1] != w[0] + 1) {
            return Err(VaultError::Consistency(format!(
                "chunk files are not contiguous: file_{} follows file_{}",
                gap[1], gap[0]
            )));
        }

        let head = found.last().copied().unwrap_or(0);
        let mut log = ChunkLog {
            geo,
            cipher: BlockCipher::new(key),
            dir,
            chunks: BTreeMap::new(),
            head,
            top: 0,
            region_ids: vec![0; geo.blocks_per_region as usize],
            chunk_ids: vec![0; geo.blocks_per_chunk() as usize],
        };

        // Every file below the head must be exactly one whole chunk.
        for &chunk in found.iter().filter(|&&c| c < head) {
            let file = File::open(log.file_name(chunk))?;
            let len = file.metadata()?.len();
            if len != geo.chunk_size() {
                return Err(VaultError::Consistency(format!(
                    "chunk file file_{chunk} is {len} bytes, expected {}",
                    geo.chunk_size()
                )));
            }
            log.chunks.insert(chunk, ChunkFile { file, size: len });
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(log.file_name(head))?;
        let len = file.metadata()?.len();

        if len == geo.chunk_size() {
            // The head chunk is itself complete; appends go to a fresh file.
            log.chunks.insert(head, ChunkFile { file, size: len });
            log.rotate(head)?;
            log.top = (head + 1) * geo.blocks_per_chunk();
            return Ok(log);
        }

        // Binary-search the largest record-aligned offset that fits in the
        // file, then cut any torn tail behind it.
        let mut low = head * geo.blocks_per_chunk();
        let mut high = (head + 1) * geo.blocks_per_chunk();
        while low + 1 < high {
            let mid = (low + high) / 2;
            if Coords::new(&geo, mid).block_offset > len {
                high = mid;
            } else {
                low = mid;
            }
        }
        let resume = Coords::new(&geo, low);
        if len > resume.block_offset {
            tracing::warn!(
                chunk = head,
                found = len,
                keeping = resume.block_offset,
                "truncating torn tail of newest chunk file"
            );
            file.set_len(resume.block_offset)?;
        }
        log.chunks.insert(
            head,
            ChunkFile {
                file,
                size: resume.block_offset,
            },
        );
        log.top = low;
        Ok(log)
    }

    /// Next physical address to be written.
    pub fn top(&self) -> u64 {
        self.top
    }

    pub fn geometry(&self) -> &Geometry {
        &self.geo
    }

    /// Replay every physical→logical mapping in physical order.
    ///
    /// Complete chunks are resolved from their chunk footer with a single
    /// decrypt; the chunk in progress falls back to region footers, then to
    /// the raw block records of the region in progress. Any authentication
    /// failure aborts the replay.
    ///
    /// Replaying also repopulates the in-memory footer buffers for the
    /// region and chunk in progress, so it must run once after `open` and
    /// before the first `write_block` on a reopened directory.
    pub fn scan(&mut self, mut callback: impl FnMut(u64, u32) -> Result<()>) -> Result<()> {
        let geo = self.geo;
        let c = Coords::new(&geo, self.top);

        // Complete chunks: one footer each.
        for (&chunk, cf) in self.chunks.range_mut(..c.chunk_id) {
            let mut buf = read_at(&mut cf.file, geo.chunk_footer_off(), geo.chunk_footer_size())?;
            let tag = buf.split_to(TAG_SIZE as usize);
            self.cipher.open(geo.chunk_footer_iv(chunk), &mut buf, &tag)?;
            let base = chunk * geo.blocks_per_chunk();
            for boff in 0..geo.blocks_per_chunk() {
                callback(base + boff, get_logical(&buf, boff as usize))?;
            }
        }

        let Some(cf) = self.chunks.get_mut(&c.chunk_id) else {
            return Ok(());
        };

        // Completed regions of the chunk in progress.
        for region in 0..c.region_id {
            let off = region * geo.region_size() + geo.region_footer_off();
            let mut buf = read_at(&mut cf.file, off, geo.region_footer_size())?;
            let tag = buf.split_to(TAG_SIZE as usize);
            self.cipher
                .open(geo.region_footer_iv(c.chunk_id, region), &mut buf, &tag)?;
            let rbase = region * geo.blocks_per_region;
            let base = c.chunk_id * geo.blocks_per_chunk() + rbase;
            for boff in 0..geo.blocks_per_region {
                let logical = get_logical(&buf, boff as usize);
                callback(base + boff, logical)?;
                self.chunk_ids[(rbase + boff) as usize] = logical;
            }
        }

        // Raw block records of the region in progress.
        let base = c.chunk_id * geo.blocks_per_chunk() + c.region_id * geo.blocks_per_region;
        let off_base = c.region_id * geo.region_size();
        let iv_base = c.chunk_id * geo.ivs_per_chunk() + c.region_id * geo.ivs_per_region();
        for block in 0..c.block_in_region {
            let off = off_base + block * geo.block_record_size();
            let mut buf = read_at(&mut cf.file, off, geo.block_record_size())?;
            let tag = buf.split_to(TAG_SIZE as usize);
            self.cipher.open(iv_base + block, &mut buf, &tag)?;
            let logical = get_logical(&buf, 0);
            callback(base + block, logical)?;
            self.chunk_ids[(c.region_id * geo.blocks_per_region + block) as usize] = logical;
            self.region_ids[block as usize] = logical;
        }
        Ok(())
    }

    /// Append one block, returning the physical address it landed at.
    pub fn write_block(&mut self, logical: u32, payload: &[u8]) -> Result<u64> {
        if payload.len() != self.geo.bytes_per_block as usize {
            return Err(VaultError::InvalidBlockSize {
                expected: self.geo.bytes_per_block as usize,
                actual: payload.len(),
            });
        }
        let geo = self.geo;
        let c = Coords::new(&geo, self.top);
        debug_assert_eq!(c.chunk_id, self.head);

        self.region_ids[c.block_in_region as usize] = logical;
        self.chunk_ids[c.block_in_chunk as usize] = logical;

        // record = tag || logical_id || payload, sealed under the block IV.
        let mut body = Vec::with_capacity((LOGICAL_ID_SIZE + geo.bytes_per_block) as usize);
        body.extend_from_slice(&[0u8; LOGICAL_ID_SIZE as usize]);
        put_logical(&mut body, 0, logical);
        body.extend_from_slice(payload);
        let tag = self.cipher.seal(c.iv, &mut body)?;

        // Footers close the region/chunk this block completes; each consumes
        // the IV slot after the block's.
        let ends_region = c.block_in_region + 1 == geo.blocks_per_region;
        let ends_chunk = c.block_in_chunk + 1 == geo.blocks_per_chunk();
        let region_footer = if ends_region {
            Some(sealed_ids(&self.cipher, &self.region_ids, c.iv + 1)?)
        } else {
            None
        };
        let chunk_footer = if ends_chunk {
            Some(sealed_ids(&self.cipher, &self.chunk_ids, c.iv + 2)?)
        } else {
            None
        };

        let cf = self
            .chunks
            .get_mut(&self.head)
            .ok_or_else(|| VaultError::Consistency(format!("head chunk {} missing", self.head)))?;
        debug_assert_eq!(cf.size, c.block_offset);
        seek_to(&mut cf.file, c.block_offset)?;
        cf.file.write_all(&tag)?;
        cf.file.write_all(&body)?;
        cf.size += geo.block_record_size();

        if let Some(footer) = region_footer {
            cf.file.write_all(&footer)?;
            cf.size += geo.region_footer_size();
        }
        if let Some(footer) = chunk_footer {
            cf.file.write_all(&footer)?;
            cf.size += geo.chunk_footer_size();
        }
        if ends_chunk {
            self.rotate(c.chunk_id)?;
        }

        let physical = self.top;
        self.top += 1;
        Ok(physical)
    }

    /// Read the record at `physical`, returning its payload and the logical
    /// id it was written for.
    pub fn read_block(&mut self, physical: u64) -> Result<(Bytes, u32)> {
        let geo = self.geo;
        let c = Coords::new(&geo, physical);
        let cf = self.chunks.get_mut(&c.chunk_id).ok_or_else(|| {
            VaultError::Consistency(format!("block {physical} is in deleted chunk {}", c.chunk_id))
        })?;
        if c.block_offset + geo.block_record_size() > cf.size {
            return Err(VaultError::Consistency(format!(
                "block {physical} lies past the end of chunk {} ({} > {})",
                c.chunk_id,
                c.block_offset + geo.block_record_size(),
                cf.size
            )));
        }
        let mut buf = read_at(&mut cf.file, c.block_offset, geo.block_record_size())?;
        let tag = buf.split_to(TAG_SIZE as usize);
        self.cipher.open(c.iv, &mut buf, &tag)?;
        let logical = get_logical(&buf, 0);
        let payload = buf.freeze().slice(LOGICAL_ID_SIZE as usize..);
        Ok((payload, logical))
    }

    /// Delete every chunk file lying wholly below `keep_after`.
    pub fn remove_old(&mut self, keep_after: u64) -> Result<()> {
        let cutoff = Coords::new(&self.geo, keep_after).chunk_id;
        while let Some((&chunk, _)) = self.chunks.first_key_value() {
            if chunk >= cutoff {
                break;
            }
            // Drop the handle before unlinking.
            self.chunks.remove(&chunk);
            fs::remove_file(self.file_name(chunk))?;
            tracing::debug!(chunk, "removed retired chunk file");
        }
        Ok(())
    }

    /// Reopen the finished chunk read-only and start the next file.
    fn rotate(&mut self, chunk: u64) -> Result<()> {
        let readonly = File::open(self.file_name(chunk))?;
        if let Some(cf) = self.chunks.get_mut(&chunk) {
            cf.file = readonly;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(self.file_name(chunk + 1))?;
        self.chunks.insert(chunk + 1, ChunkFile { file, size: 0 });
        self.head = chunk + 1;
        tracing::debug!(chunk = chunk + 1, "starting new chunk file");
        Ok(())
    }

    fn file_name(&self, chunk: u64) -> PathBuf {
        self.dir.join(format!("file_{chunk}"))
    }
}

/// Serialize a footer id array and seal it, tag first.
fn sealed_ids(cipher: &BlockCipher, ids: &[u32], iv: u64) -> Result<Vec<u8>> {
    let mut body = vec![0u8; ids.len() * LOGICAL_ID_SIZE as usize];
    for (i, &id) in ids.iter().enumerate() {
        put_logical(&mut body, i, id);
    }
    let tag = cipher.seal(iv, &mut body)?;
    let mut out = Vec::with_capacity(TAG_SIZE as usize + body.len());
    out.extend_from_slice(&tag);
    out.extend_from_slice(&body);
    Ok(out)
}

fn seek_to(file: &mut File, off: u64) -> Result<()> {
    let at = file.seek(SeekFrom::Start(off))?;
    if at != off {
        return Err(VaultError::Consistency(format!(
            "seek landed at {at}, wanted {off}"
        )));
    }
    Ok(())
}

fn read_at(file: &mut File, off: u64, len: u64) -> Result<BytesMut> {
    seek_to(file, off)?;
    let mut buf = BytesMut::zeroed(len as usize);
    file.read_exact(&mut buf)?;
    Ok(buf)
}
