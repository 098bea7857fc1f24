//! Walks a host directory tree and builds the in-memory [`Node`] tree the
//! assembler consumes, assigning final inode numbers per the two-pass
//! protocol (`spec.md` §3, `DESIGN.md` Open Question 1).

use std::fs;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

use tracing::{instrument, warn};

/// One filesystem entity, already classified. `inode` holds the
/// *provisional* number during the scan and the *final* number once
/// [`renumber`] has run.
#[derive(Debug)]
pub(crate) enum Node {
    File {
        inode: u32,
        source_path: PathBuf,
        size: u64,
    },
    Symlink {
        inode: u32,
        target: String,
    },
    Directory {
        inode: u32,
        parent_inode: u32,
        /// `(name, child_index)` pairs, sorted by name; `child_index`
        /// indexes into the flat node array built by [`scan`].
        children: Vec<(String, usize)>,
    },
}

impl Node {
    pub(crate) fn inode(&self) -> u32 {
        match self {
            Node::File { inode, .. } => *inode,
            Node::Symlink { inode, .. } => *inode,
            Node::Directory { inode, .. } => *inode,
        }
    }

    fn set_inode(&mut self, new: u32) {
        match self {
            Node::File { inode, .. } => *inode = new,
            Node::Symlink { inode, .. } => *inode = new,
            Node::Directory { inode, .. } => *inode = new,
        }
    }
}

/// Result of a successful scan: a flat array of nodes (not yet in any
/// particular traversal order relative to each other beyond parent/child
/// linkage via indices) plus the root's index.
pub(crate) struct Scanned {
    pub(crate) nodes: Vec<Node>,
    pub(crate) root: usize,
}

/// Normalizes a symlink target to forward slashes (`spec.md` §3, §8
/// Property 3). Host symlink targets on Unix are already `/`-separated,
/// but a target copied in from a foreign (Windows-authored) tree may
/// carry backslashes; this is the only normalization the format requires.
fn normalize_target(target: &Path) -> String {
    target.to_string_lossy().replace('\\', "/")
}

struct Scanner {
    nodes: Vec<Node>,
    next_leaf: u32,
    next_dir: u32,
}

impl Scanner {
    /// Recursively scans `path`, returning the index of the node created
    /// for it (always a `Directory` variant) or `None` if the directory
    /// itself could not be enumerated (`spec.md` §7 `ScanError`, fatal for
    /// this subtree but not necessarily the whole scan at depth 0).
    #[instrument(skip(self))]
    fn scan_dir(&mut self, path: &Path, parent_placeholder: usize) -> Result<usize, std::io::Error> {
        let read_dir = fs::read_dir(path)?;

        // reserve this directory's slot now so children can reference it
        // as their parent, but its inode number isn't assigned until
        // every descendant directory has taken one (post-order).
        let dir_index = self.nodes.len();
        self.nodes.push(Node::Directory {
            inode: 0,
            parent_inode: parent_placeholder as u32,
            children: vec![],
        });

        let mut entries: Vec<fs::DirEntry> = match read_dir.collect::<Result<_, _>>() {
            Ok(entries) => entries,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to enumerate directory, skipping subtree");
                // drop the placeholder: it never took a directory number
                // and must not occupy a node slot (spec.md §7 ScanError).
                self.nodes.truncate(dir_index);
                return Err(e);
            },
        };
        // deterministic traversal; final ordering is re-sorted by name below.
        entries.sort_by_key(|e| e.file_name());

        let mut children = Vec::with_capacity(entries.len());
        for entry in entries {
            let name = entry.file_name().to_string_lossy().into_owned();
            let meta = match entry.metadata() {
                Ok(m) => m,
                Err(e) => {
                    warn!(path = %entry.path().display(), error = %e, "failed to stat entry, dropping");
                    continue;
                },
            };

            let child_index = if meta.is_dir() {
                match self.scan_dir(&entry.path(), dir_index) {
                    Ok(idx) => idx,
                    Err(_) => continue,
                }
            } else if meta.file_type().is_symlink() {
                let target = match fs::read_link(entry.path()) {
                    Ok(t) => t,
                    Err(e) => {
                        warn!(path = %entry.path().display(), error = %e, "failed to read symlink, dropping");
                        continue;
                    },
                };
                let idx = self.nodes.len();
                self.nodes.push(Node::Symlink {
                    inode: self.next_leaf,
                    target: normalize_target(&target),
                });
                self.next_leaf += 1;
                idx
            } else if meta.is_file() {
                let idx = self.nodes.len();
                self.nodes.push(Node::File {
                    inode: self.next_leaf,
                    source_path: entry.path(),
                    size: meta.size(),
                });
                self.next_leaf += 1;
                idx
            } else {
                // device/fifo/socket: out of scope (spec.md §1 non-goals).
                warn!(path = %entry.path().display(), "unsupported entry type, dropping");
                continue;
            };

            children.push((name, child_index));
        }

        children.sort_by(|a, b| a.0.cmp(&b.0));

        self.next_dir += 1;
        let dir_inode = self.next_dir;
        if let Node::Directory { inode, children: c, .. } = &mut self.nodes[dir_index] {
            *inode = dir_inode;
            *c = children;
        }

        Ok(dir_index)
    }
}

/// Renumbers every leaf's provisional inode by the directory count `R`
/// (`spec.md` §3 Pass 2), fixes up every directory's child list and
/// parent-inode reference to final numbers, and gives the root its own
/// inode as `parent_inode` (`DESIGN.md` Open Question 7).
fn renumber(mut nodes: Vec<Node>, root: usize) -> Vec<Node> {
    let r = nodes
        .iter()
        .filter(|n| matches!(n, Node::Directory { .. }))
        .count() as u32;

    // provisional leaf inode -> final inode
    let shift_leaf = |provisional: u32| provisional + r;

    for node in &mut nodes {
        match node {
            Node::File { inode, .. } | Node::Symlink { inode, .. } => {
                *inode = shift_leaf(*inode);
            },
            Node::Directory { .. } => {},
        }
    }

    // parent_inode was stashed as a node index during scan (see
    // scan_dir's `parent_placeholder`); resolve it to a final inode
    // number now that every node holds its final number.
    let parent_index_of: Vec<Option<usize>> = {
        let mut v = vec![None; nodes.len()];
        for (i, node) in nodes.iter().enumerate() {
            if let Node::Directory { children, .. } = node {
                for (_, child_idx) in children {
                    v[*child_idx] = Some(i);
                }
            }
        }
        v
    };

    for i in 0..nodes.len() {
        if matches!(nodes[i], Node::Directory { .. }) {
            let new_parent = if i == root {
                nodes[root].inode()
            } else {
                let parent_idx = parent_index_of[i].expect("every non-root directory has a parent");
                nodes[parent_idx].inode()
            };
            if let Node::Directory { parent_inode, .. } = &mut nodes[i] {
                *parent_inode = new_parent;
            }
        }
    }

    nodes
}

/// Scans `root_path` and returns the fully renumbered node tree.
pub(crate) fn scan(root_path: &Path) -> Result<Scanned, std::io::Error> {
    let mut scanner = Scanner {
        nodes: vec![],
        next_leaf: 1,
        next_dir: 0,
    };
    let root = scanner.scan_dir(root_path, 0)?;
    let nodes = renumber(scanner.nodes, root);
    Ok(Scanned { nodes, root })
}
