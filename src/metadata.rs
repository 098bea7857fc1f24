//! Metablock framing: the 8 KiB compressed chunks every SquashFS metadata
//! table (inode table, directory table, fragment table, id table) is split
//! into.

use std::io;

use crate::compressor::compress;

/// Maximum uncompressed payload of one metadata block.
pub(crate) const METADATA_MAXSIZE: usize = 8192;

const METADATA_COMPRESSED_BIT: u16 = 1 << 15;

/// Frame one metadata block: a little-endian `u16` header followed by the
/// payload. If compression doesn't shrink the block, the block is stored
/// raw and the header's top bit is set, carrying the uncompressed length
/// instead (`spec.md` §4.B).
pub(crate) fn frame_block(block: &[u8]) -> Vec<u8> {
    let compressed = compress(block);
    let mut out = Vec::with_capacity(block.len() + 2);
    if compressed.len() < block.len() {
        out.extend_from_slice(&(compressed.len() as u16).to_le_bytes());
        out.extend_from_slice(&compressed);
    } else {
        let header = block.len() as u16 | METADATA_COMPRESSED_BIT;
        out.extend_from_slice(&header.to_le_bytes());
        out.extend_from_slice(block);
    }
    out
}

/// Frames `bytes` into a sequence of independently-compressed ≤8 KiB
/// metablocks, without accumulating into a [`MetadataWriter`]. Used for
/// the fragment-entry and id tables, which are referenced by an external
/// index of block pointers rather than by a `(start, offset)` pair into
/// a single running table (`spec.md` §4.H/§4.I step 6-7).
pub(crate) fn frame_table(bytes: &[u8]) -> Vec<Vec<u8>> {
    if bytes.is_empty() {
        return vec![];
    }
    bytes.chunks(METADATA_MAXSIZE).map(frame_block).collect()
}

/// Accumulates bytes for one metadata table and streams out framed,
/// compressed 8 KiB blocks as soon as enough bytes have arrived.
///
/// `metadata_start` is the number of framed bytes already flushed into
/// [`MetadataWriter::out`] — stable the moment it's read, since a flushed
/// block's size never changes afterwards. Capturing `(metadata_start,
/// uncompressed_bytes.len())` before writing some piece of content gives
/// that content's exact `(start_block, offset)` pair with no need to patch
/// it up later once the whole table is known.
#[derive(Debug, Default)]
pub(crate) struct MetadataWriter {
    pub(crate) metadata_start: u32,
    pub(crate) uncompressed_bytes: Vec<u8>,
    out: Vec<u8>,
}

impl MetadataWriter {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.uncompressed_bytes.extend_from_slice(bytes);
        while self.uncompressed_bytes.len() >= METADATA_MAXSIZE {
            let tail = self.uncompressed_bytes.split_off(METADATA_MAXSIZE);
            let block = std::mem::replace(&mut self.uncompressed_bytes, tail);
            let framed = frame_block(&block);
            self.metadata_start += framed.len() as u32;
            self.out.extend_from_slice(&framed);
        }
        Ok(())
    }

    /// Flush any remaining partial block and return the full framed byte
    /// stream for this table.
    pub(crate) fn finalize(mut self) -> Vec<u8> {
        if !self.uncompressed_bytes.is_empty() {
            let framed = frame_block(&self.uncompressed_bytes);
            self.out.extend_from_slice(&framed);
            self.uncompressed_bytes.clear();
        }
        self.out
    }
}
