//! The super block: the 96-byte header every SquashFS 4.0 image opens
//! with, naming the byte offset of every other section (`spec.md` §4.I
//! step 8).

use deku::bitvec::{BitVec, Msb0};
use deku::prelude::*;

use crate::compressor::COMPRESSOR_ZLIB;

/// `0x73717368`, little-endian on disk -> `b"hsqs"` as the first four bytes
/// of the image (`spec.md` §8 Property 1).
const MAGIC: u32 = 0x7371_7368;

/// `opack` advertises `DUPLICATES` without deduplicating (`spec.md` §4.I
/// step 8, `DESIGN.md` Open Question 6); every other flag bit stays clear
/// since every non-goal they'd name (compressed-data-uncompressed flags,
/// NFS export, xattrs) doesn't apply here.
#[repr(u16)]
pub(crate) enum Flags {
    Duplicates = 0b0000_0000_0100_0000,
}

/// No section present; used for the export table (always absent) and the
/// fragment table when the image has no fragments at all.
pub(crate) const NOT_PRESENT_64: u64 = 0xffff_ffff_ffff_ffff;

#[derive(Debug, Copy, Clone, DekuWrite)]
#[deku(endian = "little")]
pub(crate) struct SuperBlock {
    pub magic: u32,
    pub inode_count: u32,
    pub mod_time: u32,
    pub block_size: u32,
    pub frag_count: u32,
    pub compressor: u16,
    pub block_log: u16,
    pub flags: u16,
    pub id_count: u16,
    pub version_major: u16,
    pub version_minor: u16,
    pub root_inode: u64,
    pub bytes_used: u64,
    pub id_table: u64,
    pub xattr_table: u64,
    pub inode_table: u64,
    pub dir_table: u64,
    pub frag_table: u64,
    pub export_table: u64,
}

/// SquashFS 4.0's fixed data-block size: 128 KiB (`spec.md` §2, §6).
pub(crate) const BLOCK_SIZE: u32 = 0x0002_0000;
/// `log2(BLOCK_SIZE)`, stored alongside it so readers can avoid a divide.
pub(crate) const BLOCK_LOG: u16 = 17;

impl SuperBlock {
    /// A super block with every section marked absent; callers fill in
    /// section offsets as they become known during assembly.
    pub(crate) fn new() -> Self {
        Self {
            magic: MAGIC,
            inode_count: 0,
            mod_time: 0,
            block_size: BLOCK_SIZE,
            frag_count: 0,
            compressor: COMPRESSOR_ZLIB,
            block_log: BLOCK_LOG,
            flags: Flags::Duplicates as u16,
            id_count: 0,
            version_major: 4,
            version_minor: 0,
            root_inode: 0,
            bytes_used: 0,
            id_table: 0,
            xattr_table: NOT_PRESENT_64,
            inode_table: 0,
            dir_table: 0,
            frag_table: NOT_PRESENT_64,
            export_table: NOT_PRESENT_64,
        }
    }

    pub(crate) fn to_bytes(&self) -> Result<Vec<u8>, deku::DekuError> {
        let mut v = BitVec::<u8, Msb0>::new();
        self.write(&mut v, ())?;
        Ok(v.as_raw_slice().to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn magic_bytes_are_hsqs() {
        let sb = SuperBlock::new();
        let bytes = sb.to_bytes().unwrap();
        assert_eq!(&bytes[0..4], b"hsqs");
    }

    #[test]
    fn version_is_four_zero() {
        let sb = SuperBlock::new();
        let bytes = sb.to_bytes().unwrap();
        // version_major/minor sit right after root_inode's leading fields;
        // easiest checked via the struct itself rather than byte math here.
        assert_eq!(sb.version_major, 4);
        assert_eq!(sb.version_minor, 0);
        assert_eq!(bytes.len(), 96);
    }
}
