//! Tamper detection: any flipped byte surfaces as an authentication error,
//! never as silently altered data.

use std::fs::OpenOptions;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use blockvault::{BlockMap, Geometry, VaultError};
use tempfile::TempDir;

const BLOCK: usize = 64;

fn geometry() -> Geometry {
    Geometry {
        bytes_per_block: BLOCK as u64,
        blocks_per_region: 4,
        regions_per_chunk: 2,
    }
}

fn flip_byte(path: &Path, offset: u64) {
    let mut file = OpenOptions::new().read(true).write(true).open(path).unwrap();
    file.seek(SeekFrom::Start(offset)).unwrap();
    let mut byte = [0u8; 1];
    file.read_exact(&mut byte).unwrap();
    byte[0] ^= 0x01;
    file.seek(SeekFrom::Start(offset)).unwrap();
    file.write_all(&byte).unwrap();
}

#[test]
fn flipped_block_record_fails_read() {
    let dir = TempDir::new().unwrap();
    let geo = geometry();
    let key = [5u8; 32];
    let mut map = BlockMap::open(dir.path(), geo, &key, 8).unwrap();
    map.write(0, &[0x42; BLOCK]).unwrap();
    map.write(1, &[0x43; BLOCK]).unwrap();

    // A byte in the middle of the first record's payload, altered behind
    // the open map's back.
    flip_byte(&dir.path().join("file_0"), 40);

    let err = map.read(0).unwrap_err();
    assert!(matches!(err, VaultError::Auth(_)));
    // The untouched record is unaffected.
    assert_eq!(&map.read(1).unwrap()[..], &[0x43; BLOCK][..]);
}

#[test]
fn flipped_record_tag_fails_read() {
    let dir = TempDir::new().unwrap();
    let geo = geometry();
    let key = [5u8; 32];
    let mut map = BlockMap::open(dir.path(), geo, &key, 8).unwrap();
    map.write(0, &[0x42; BLOCK]).unwrap();

    flip_byte(&dir.path().join("file_0"), 0); // first tag byte

    assert!(matches!(map.read(0).unwrap_err(), VaultError::Auth(_)));
}

#[test]
fn flipped_region_footer_aborts_recovery() {
    let dir = TempDir::new().unwrap();
    let geo = geometry();
    let key = [6u8; 32];
    {
        let mut map = BlockMap::open(dir.path(), geo, &key, 8).unwrap();
        // Fill region 0 and start region 1, so recovery reads the region
        // footer instead of the raw records.
        for l in 0..6u32 {
            map.write(l, &[l as u8; BLOCK]).unwrap();
        }
    }
    flip_byte(&dir.path().join("file_0"), geo.region_footer_off() + 3);

    let err = BlockMap::open(dir.path(), geo, &key, 8).unwrap_err();
    assert!(matches!(err, VaultError::Auth(_)));
}

#[test]
fn flipped_chunk_footer_aborts_recovery() {
    let dir = TempDir::new().unwrap();
    let geo = geometry();
    let key = [7u8; 32];
    {
        let mut map = BlockMap::open(dir.path(), geo, &key, 8).unwrap();
        // Complete chunk 0 and move on, so recovery resolves it from the
        // chunk footer alone.
        for i in 0..(geo.blocks_per_chunk() + 1) {
            map.write((i % 8) as u32, &[i as u8; BLOCK]).unwrap();
        }
    }
    flip_byte(
        &dir.path().join("file_0"),
        geo.chunk_footer_off() + geo.chunk_footer_size() - 1,
    );

    let err = BlockMap::open(dir.path(), geo, &key, 8).unwrap_err();
    assert!(matches!(err, VaultError::Auth(_)));
}
