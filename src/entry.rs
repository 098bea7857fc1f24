//! [`Entry`]: one inode table row, plus the per-directory `dir_header` run
//! builder (`spec.md` §4.G).

use std::fmt;

use crate::dir::{Dir, DirEntry};
use crate::inode::InodeId;

/// A single child's directory-entry material, captured at the moment its
/// inode was written to the inode table.
#[derive(Clone)]
pub(crate) struct Entry {
    pub start: u32,
    pub offset: u16,
    pub inode: u32,
    pub t: InodeId,
    pub name: Vec<u8>,
}

impl Entry {
    pub fn name(&self) -> String {
        String::from_utf8_lossy(&self.name).into_owned()
    }
}

impl fmt::Debug for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entry")
            .field("start", &self.start)
            .field("offset", &self.offset)
            .field("inode", &self.inode)
            .field("t", &self.t)
            .field("name", &self.name())
            .finish()
    }
}

impl Entry {
    fn create_dir(run: &[&Entry], start: u32, lowest_inode: u32) -> Dir {
        let mut dir = Dir::new(lowest_inode, start);
        for e in run {
            let name_size = e.name.len() as u16 - 1;
            dir.push(DirEntry {
                offset: e.offset,
                inode_offset: (e.inode as i64 - lowest_inode as i64) as i16,
                t: e.t as u16,
                name_size,
                name: e.name.clone(),
            });
        }
        dir
    }

    /// Groups one directory's children into `Dir` runs: a run is closed
    /// (and a new one opened) whenever the next entry would push the run
    /// past 256 entries, would be written to a different inode-table
    /// metablock than the run's current entries, or would push some
    /// entry's inode number more than 32767 away from the run's lowest
    /// (`spec.md` §4.G limitation, `DESIGN.md` Open Question 2 — fixed,
    /// not left as the source's silent TODO).
    #[tracing::instrument(skip_all)]
    pub(crate) fn into_dir(mut entries: Vec<Entry>) -> Vec<Dir> {
        if entries.is_empty() {
            return vec![];
        }
        entries.sort_unstable_by(|a, b| a.name.cmp(&b.name));

        let mut dirs = vec![];
        let mut run: Vec<&Entry> = vec![];
        let mut run_start = entries[0].start;
        let mut run_min = entries[0].inode;
        let mut run_max = entries[0].inode;

        for e in &entries {
            let candidate_min = run_min.min(e.inode);
            let candidate_max = run_max.max(e.inode);
            let fits_delta = (candidate_max - candidate_min) as i64 <= i16::MAX as i64;
            let fits_count = run.len() < 256;
            let same_block = run.is_empty() || e.start == run_start;

            if !run.is_empty() && (!same_block || !fits_count || !fits_delta) {
                dirs.push(Self::create_dir(&run, run_start, run_min));
                run = vec![];
                run_start = e.start;
                run_min = e.inode;
                run_max = e.inode;
            } else {
                run_min = candidate_min;
                run_max = candidate_max;
            }
            run.push(e);
        }
        if !run.is_empty() {
            dirs.push(Self::create_dir(&run, run_start, run_min));
        }

        dirs
    }
}
