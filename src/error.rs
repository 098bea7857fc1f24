//! Errors

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors generated by the packer.
///
/// Every fatal condition in `spec.md` §7 maps to one variant here; a single
/// unreadable file under the input tree is *not* one of these — it's
/// recovered locally in [`crate::scan`] and logged, not propagated, since
/// one bad leaf shouldn't sink the whole pack.
#[derive(Error, Debug)]
pub enum OpackError {
    #[error("failed to open output file: {0}")]
    OutputOpen(#[source] io::Error),

    #[error("failed to scan {path}: {source}")]
    Scan {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("deku error: {0:?}")]
    Deku(#[from] deku::DekuError),

    #[error("io error: {0}")]
    Io(#[from] io::Error),
}
