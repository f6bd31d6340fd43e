//! C4 Primary Vector Index and C5 Multi-Vector Index.
//!
//! Both hold an exact brute-force cosine index over an in-memory matrix
//! (§4.4's informative note: exact search is an acceptable substitute for
//! an approximate index at this core's scale) guarded by an in-process
//! `RwLock` and persisted via temp-file-then-rename, per the resolved
//! open question in SPEC_FULL.md §10.7.

pub mod multi;
pub mod primary;

pub use multi::MultiVectorIndex;
pub use primary::PrimaryVectorIndex;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("vector/id count mismatch: {vectors} vectors, {ids} ids")]
    CountMismatch { vectors: usize, ids: usize },
    #[error("dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] Box<bincode::ErrorKind>),
}

pub type Result<T> = std::result::Result<T, IndexError>;

/// Writes `bytes` to `path` atomically: write to a sibling `.tmp` file,
/// then rename over the destination. POSIX rename is atomic within the
/// same filesystem, satisfying the "temp file + rename" persistence
/// contract named in §4.4/§4.5.
pub(crate) fn atomic_write(path: &std::path::Path, bytes: &[u8]) -> Result<()> {
    let tmp_path = path.with_extension("tmp");
    std::fs::write(&tmp_path, bytes)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

/// Converts a raw L2 distance to a similarity monotonic in cosine, per
/// §4.4: `sim = 1/(1+d)`.
pub fn l2_distance_to_similarity(d: f32) -> f32 {
    1.0 / (1.0 + d)
}
