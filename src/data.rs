//! File data: the data-block pipeline and the fragment pool.

use std::io::Write;

use deku::prelude::*;
use rayon::prelude::*;
use tracing::instrument;

use crate::compressor::compress;
use crate::fragment::Fragment;

/// bit 24 of a data-block size word marks the block as stored raw.
const DATA_STORED_UNCOMPRESSED: u32 = 1 << 24;

/// One data block's on-disk size word: low 24 bits are the stored size,
/// bit 24 marks an uncompressed (stored raw) block.
#[derive(Copy, Clone, Debug, PartialEq, Eq, DekuRead, DekuWrite)]
#[deku(endian = "endian", ctx = "endian: deku::ctx::Endian")]
pub struct DataSize(u32);

impl DataSize {
    fn new(size: u32, uncompressed: bool) -> Self {
        let mut value = size;
        if uncompressed {
            value |= DATA_STORED_UNCOMPRESSED;
        }
        Self(value)
    }
}

/// Large files (`size >= block_size`) with a nonzero tail never fall back
/// to the fragment pool: the tail is emitted as one more (short) data
/// block instead. Only files entirely smaller than one block are
/// fragment-eligible. `spec.md` §4.F exposes no CLI flag for this.
const NO_TAIL_ENDS: bool = true;

pub(crate) enum Added {
    Data {
        blocks_start: u32,
        block_sizes: Vec<DataSize>,
    },
    Fragment {
        frag_index: u32,
        block_offset: u32,
    },
}

/// Compress one block, falling back to storing it raw if compression
/// didn't shrink it (`spec.md` §4.C).
fn compress_block(block: &[u8]) -> (Vec<u8>, bool) {
    let compressed = compress(block);
    if compressed.len() < block.len() {
        (compressed, false)
    } else {
        (block.to_vec(), true)
    }
}

#[derive(Debug)]
pub(crate) struct DataWriter {
    block_size: u32,
    data_start: u32,
    pub(crate) data_bytes: Vec<u8>,
    /// Un-flushed fragment-pool bytes, shared by every fragment-eligible
    /// file until a full block accumulates or [`DataWriter::finalize`] runs.
    pub(crate) fragment_bytes: Vec<u8>,
    pub(crate) fragment_table: Vec<Fragment>,
}

impl DataWriter {
    pub fn new(data_start: u32, block_size: u32) -> Self {
        Self {
            block_size,
            data_start,
            data_bytes: vec![],
            fragment_bytes: vec![],
            fragment_table: vec![],
        }
    }

    /// Add one file's content, in parallel across its full-size blocks,
    /// returning either its data-block run or its fragment-pool slot.
    #[instrument(skip_all)]
    pub(crate) fn add_bytes(&mut self, bytes: &[u8]) -> Added {
        let block_size = self.block_size as usize;

        // entirely smaller than one block: fragment-eligible (NoTailEnds).
        if !bytes.is_empty() && bytes.len() < block_size {
            if !NO_TAIL_ENDS || bytes.len() + self.fragment_bytes.len() > block_size {
                self.flush_fragment();
            }
            let frag_index = self.fragment_table.len() as u32;
            let block_offset = self.fragment_bytes.len() as u32;
            self.fragment_bytes.write_all(bytes).unwrap();
            return Added::Fragment {
                frag_index,
                block_offset,
            };
        }

        // one or more full blocks, possibly with a short final block as
        // the file's tail (NoTailEnds): never touches the fragment pool.
        let blocks_start = self.data_bytes.len() as u32 + self.data_start;
        let chunks: Vec<&[u8]> = bytes.chunks(block_size).collect();
        let compressed: Vec<(Vec<u8>, bool)> = chunks.par_iter().map(|c| compress_block(c)).collect();

        let mut block_sizes = Vec::with_capacity(compressed.len());
        for (bytes, uncompressed) in compressed {
            block_sizes.push(DataSize::new(bytes.len() as u32, uncompressed));
            self.data_bytes.write_all(&bytes).unwrap();
        }

        Added::Data {
            blocks_start,
            block_sizes,
        }
    }

    fn flush_fragment(&mut self) {
        if self.fragment_bytes.is_empty() {
            return;
        }
        let start = self.data_bytes.len() as u64 + self.data_start as u64;
        let (compressed, uncompressed) = compress_block(&self.fragment_bytes);
        let size = if uncompressed {
            compressed.len() as u32 | DATA_STORED_UNCOMPRESSED
        } else {
            compressed.len() as u32
        };
        self.fragment_table.push(Fragment {
            start,
            size,
            unused: 0,
        });
        self.data_bytes.write_all(&compressed).unwrap();
        self.fragment_bytes.clear();
    }

    /// Flush any remaining fragment-pool bytes into a final fragment-table
    /// entry. A no-op if no file ever used the fragment pool.
    pub fn finalize(&mut self) {
        self.flush_fragment();
    }
}
