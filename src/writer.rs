//! The image assembler: sequences every write, owns the running
//! `block_offset`, and produces the final super block (`spec.md` §4.I).

use std::fs::{self, File};
use std::io::{Seek, SeekFrom, Write};
use std::path::Path;

use tracing::{info, instrument, warn};

use crate::data::{Added, DataWriter};
use crate::entry::Entry;
use crate::error::OpackError;
use crate::inode::{
    BasicDirectory, BasicFile, BasicSymlink, Inode, InodeHeader, InodeId, InodeInner, NO_FRAGMENT,
};
use crate::metadata::{frame_table, MetadataWriter};
use crate::scan::{self, Node};
use crate::squashfs::{SuperBlock, BLOCK_SIZE, NOT_PRESENT_64};

const SUPER_BLOCK_SIZE: u64 = 96;
const PAD_ALIGN: u64 = 4096;

/// Visits one node and every descendant already committed (post-order:
/// children before their parent, the "equivalent, clearer design" `spec.md`
/// §9 invites in place of the source's reverse-array walk — see
/// `DESIGN.md` Open Question 3). Returns the directory-entry material the
/// caller needs to list this node in its parent, or `None` if the node was
/// dropped (`spec.md` §4.J: an unreadable leaf is non-fatal).
fn write_node(
    idx: usize,
    name: &[u8],
    nodes: &[Node],
    data_writer: &mut DataWriter,
    inode_writer: &mut MetadataWriter,
    dir_writer: &mut MetadataWriter,
    total_written: &mut u32,
) -> Option<Entry> {
    match &nodes[idx] {
        Node::File { inode, source_path, .. } => {
            let bytes = match fs::read(source_path) {
                Ok(b) => b,
                Err(e) => {
                    warn!(path = %source_path.display(), error = %e, "failed to open file, dropping");
                    return None;
                },
            };

            let added = data_writer.add_bytes(&bytes);
            let basic_file = match added {
                Added::Data { blocks_start, block_sizes } => BasicFile {
                    blocks_start,
                    frag_index: NO_FRAGMENT,
                    block_offset: 0,
                    file_size: bytes.len() as u32,
                    block_sizes,
                },
                Added::Fragment { frag_index, block_offset } => BasicFile {
                    blocks_start: 0,
                    frag_index,
                    block_offset,
                    file_size: bytes.len() as u32,
                    block_sizes: vec![],
                },
            };

            let file_inode = Inode {
                id: InodeId::BasicFile,
                header: InodeHeader { inode_number: *inode, ..Default::default() },
                inner: InodeInner::BasicFile(basic_file),
            };
            let entry = file_inode.to_bytes(name, inode_writer);
            *total_written += 1;
            Some(entry)
        },

        Node::Symlink { inode, target } => {
            let sym_inode = Inode {
                id: InodeId::BasicSymlink,
                header: InodeHeader { inode_number: *inode, ..Default::default() },
                inner: InodeInner::BasicSymlink(BasicSymlink {
                    link_count: 1,
                    target_size: target.len() as u32,
                    target_path: target.as_bytes().to_vec(),
                }),
            };
            let entry = sym_inode.to_bytes(name, inode_writer);
            *total_written += 1;
            Some(entry)
        },

        Node::Directory { inode, parent_inode, children } => {
            let mut child_entries = Vec::with_capacity(children.len());
            for (child_name, child_idx) in children {
                if let Some(e) = write_node(
                    *child_idx,
                    child_name.as_bytes(),
                    nodes,
                    data_writer,
                    inode_writer,
                    dir_writer,
                    total_written,
                ) {
                    child_entries.push(e);
                }
            }

            // captured before this directory's own listing is appended:
            // stable forever after, since already-flushed metablocks
            // never change size (`DESIGN.md` Open Question 5).
            let block_index = dir_writer.metadata_start;
            let block_offset = dir_writer.uncompressed_bytes.len() as u16;

            let runs = Entry::into_dir(child_entries);
            let mut file_size: u32 = 3;
            for run in &runs {
                file_size += 12; // dir_header: count + start + inode_num
                for e in &run.dir_entries {
                    file_size += 8 + e.name.len() as u32;
                }
                let bytes = run.to_bytes().expect("dir run encodes");
                dir_writer.write_all(&bytes).expect("in-memory write cannot fail");
            }

            let dir_inode = Inode {
                id: InodeId::BasicDirectory,
                header: InodeHeader { inode_number: *inode, ..Default::default() },
                inner: InodeInner::BasicDirectory(BasicDirectory {
                    block_index,
                    link_count: 2,
                    file_size: file_size as u16,
                    block_offset,
                    parent_inode: *parent_inode,
                }),
            };
            let entry = dir_inode.to_bytes(name, inode_writer);
            *total_written += 1;
            Some(entry)
        },
    }
}

/// Writes a sequence of already-framed metablocks to `out`, returning the
/// absolute file offset each one starts at (`spec.md` §4.I steps 6-7's
/// "index" of block pointers).
fn write_framed_blocks(
    out: &mut File,
    block_offset: &mut u64,
    framed: &[Vec<u8>],
) -> Result<Vec<u64>, OpackError> {
    let mut offsets = Vec::with_capacity(framed.len());
    for block in framed {
        offsets.push(*block_offset);
        out.write_all(block)?;
        *block_offset += block.len() as u64;
    }
    Ok(offsets)
}

/// Writes the little-endian `u64` index of block offsets immediately
/// after its blocks, returning the offset the index itself starts at —
/// this is the value a fragment/id-table super-block field actually
/// points to (one indirection beyond the metablocks themselves).
fn write_index(out: &mut File, block_offset: &mut u64, offsets: &[u64]) -> Result<u64, OpackError> {
    let index_start = *block_offset;
    for offset in offsets {
        out.write_all(&offset.to_le_bytes())?;
        *block_offset += 8;
    }
    Ok(index_start)
}

/// Packs `input_dir` into a SquashFS 4.0 image at `output_path`
/// (`spec.md` §6 CLI contract, §4.I assembly order).
#[instrument(skip_all, fields(input = %input_dir.display(), output = %output_path.display()))]
pub fn pack(input_dir: &Path, output_path: &Path) -> Result<(), OpackError> {
    let scanned = scan::scan(input_dir).map_err(|source| OpackError::Scan {
        path: input_dir.to_path_buf(),
        source,
    })?;

    let mut out = File::create(output_path).map_err(OpackError::OutputOpen)?;

    // reserve the super block's region; patched with real values last.
    out.write_all(&[0u8; SUPER_BLOCK_SIZE as usize])?;
    let mut block_offset = SUPER_BLOCK_SIZE;

    let mut data_writer = DataWriter::new(block_offset as u32, BLOCK_SIZE);
    let mut inode_writer = MetadataWriter::new();
    let mut dir_writer = MetadataWriter::new();
    let mut total_written = 0u32;

    let root_entry = write_node(
        scanned.root,
        b"/",
        &scanned.nodes,
        &mut data_writer,
        &mut inode_writer,
        &mut dir_writer,
        &mut total_written,
    )
    .expect("the root directory always writes successfully");

    data_writer.finalize();
    out.write_all(&data_writer.data_bytes)?;
    block_offset += data_writer.data_bytes.len() as u64;
    info!(bytes = data_writer.data_bytes.len(), "wrote data + fragment blocks");

    let inode_table_start = block_offset;
    let inode_bytes = inode_writer.finalize();
    out.write_all(&inode_bytes)?;
    block_offset += inode_bytes.len() as u64;

    let directory_table_start = block_offset;
    let dir_bytes = dir_writer.finalize();
    out.write_all(&dir_bytes)?;
    block_offset += dir_bytes.len() as u64;

    let (frag_table_start, frag_count) = if data_writer.fragment_table.is_empty() {
        (NOT_PRESENT_64, 0u32)
    } else {
        let mut raw = Vec::with_capacity(data_writer.fragment_table.len() * crate::fragment::FRAGMENT_SIZE);
        for frag in &data_writer.fragment_table {
            raw.extend_from_slice(&frag.to_bytes().expect("fragment entry encodes"));
        }
        let framed = frame_table(&raw);
        let offsets = write_framed_blocks(&mut out, &mut block_offset, &framed)?;
        let index_start = write_index(&mut out, &mut block_offset, &offsets)?;
        (index_start, data_writer.fragment_table.len() as u32)
    };

    // single-entry id table, always present (`spec.md` §4.I step 7).
    let id_bytes = 0u32.to_le_bytes();
    let framed = frame_table(&id_bytes);
    let offsets = write_framed_blocks(&mut out, &mut block_offset, &framed)?;
    let id_table_start = write_index(&mut out, &mut block_offset, &offsets)?;

    let mut sb = SuperBlock::new();
    sb.inode_count = total_written;
    sb.frag_count = frag_count;
    sb.id_count = 1;
    sb.root_inode = (u64::from(root_entry.start) << 16) | u64::from(root_entry.offset);
    sb.bytes_used = block_offset;
    sb.id_table = id_table_start;
    sb.inode_table = inode_table_start;
    sb.dir_table = directory_table_start;
    sb.frag_table = frag_table_start;
    sb.export_table = NOT_PRESENT_64;

    out.seek(SeekFrom::Start(0))?;
    out.write_all(&sb.to_bytes()?)?;

    let aligned_len = (block_offset + PAD_ALIGN - 1) / PAD_ALIGN * PAD_ALIGN;
    out.set_len(aligned_len)?;

    info!(bytes_used = block_offset, padded_to = aligned_len, inodes = total_written, "image complete");
    Ok(())
}
