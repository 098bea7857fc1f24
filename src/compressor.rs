//! The zlib codec.
//!
//! `spec.md` treats the compressor as an external, pure byte-in/byte-out
//! collaborator: given a block of bytes, produce a zlib stream, nothing
//! more. No other compressor is supported (`spec.md`'s non-goals).

use std::io::Read;

use flate2::read::ZlibEncoder;
use flate2::Compression;

/// SquashFS's `compression` super-block field value for zlib.
pub(crate) const COMPRESSOR_ZLIB: u16 = 1;

/// Compress `block` with zlib at the best-compression level.
///
/// Returns the compressed bytes regardless of whether they're smaller than
/// `block` — callers compare lengths themselves (`spec.md` §4.B/§4.C: a
/// block is only stored raw when compression doesn't help).
pub(crate) fn compress(block: &[u8]) -> Vec<u8> {
    let mut encoder = ZlibEncoder::new(block, Compression::best());
    let mut out = Vec::with_capacity(block.len());
    encoder
        .read_to_end(&mut out)
        .expect("in-memory zlib compression cannot fail");
    out
}
