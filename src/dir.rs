//! [`Dir`] and [`DirEntry`] — the directory table's on-disk records.

use deku::bitvec::{BitVec, Msb0};
use deku::prelude::*;

/// One `dir_header` + its run of `dir_entries`. A SquashFS directory
/// listing is a sequence of these, split whenever a run would otherwise
/// exceed 256 entries, or some entry's inode number would fall outside
/// `inode_num ± 32767` (`spec.md` §4.G; see `DESIGN.md` Open Question 2).
#[derive(Debug, DekuRead, DekuWrite, Clone, PartialEq, Eq)]
#[deku(endian = "little")]
pub struct Dir {
    /// On disk this is `entries.len() - 1`; callers build via [`Dir::new`]
    /// and [`Dir::push`] so the stored count always reflects that.
    pub(crate) count: u32,
    /// Offset, relative to `inode_table_start`, of the metadata block
    /// holding every entry's inode in this run.
    pub(crate) start: u32,
    pub(crate) inode_num: u32,
    #[deku(count = "*count + 1")]
    pub(crate) dir_entries: Vec<DirEntry>,
}

impl Dir {
    pub(crate) fn new(inode_num: u32, start: u32) -> Self {
        Self {
            count: 0,
            start,
            inode_num,
            dir_entries: vec![],
        }
    }

    pub(crate) fn push(&mut self, entry: DirEntry) {
        self.dir_entries.push(entry);
        self.count = self.dir_entries.len() as u32 - 1;
    }

    pub(crate) fn to_bytes(&self) -> Result<Vec<u8>, deku::DekuError> {
        let mut v = BitVec::<u8, Msb0>::new();
        self.write(&mut v, ())?;
        Ok(v.as_raw_slice().to_vec())
    }
}

#[derive(Debug, DekuRead, DekuWrite, Clone, PartialEq, Eq)]
#[deku(endian = "endian", ctx = "endian: deku::ctx::Endian")]
pub struct DirEntry {
    pub(crate) offset: u16,
    pub(crate) inode_offset: i16,
    pub(crate) t: u16,
    pub(crate) name_size: u16,
    #[deku(count = "*name_size + 1")]
    pub(crate) name: Vec<u8>,
}

impl DirEntry {
    pub fn name(&self) -> String {
        std::str::from_utf8(&self.name).unwrap().to_string()
    }
}
