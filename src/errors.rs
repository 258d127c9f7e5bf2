use core::fmt;

/// Non-success outcomes of region and transaction operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxError {
    /// The transaction observed a conflict and rolled back. The caller is
    /// expected to retry.
    Abort,
    /// A segment could not be allocated, or the region's slot table is
    /// exhausted.
    OutOfMemory,
    /// The requested region geometry is unusable: zero size, alignment not
    /// a power of two, or size not a multiple of the alignment.
    InvalidLayout,
}

impl fmt::Display for TxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TxError::Abort => write!(f, "transaction aborted, retry required"),
            TxError::OutOfMemory => write!(f, "segment allocation failed"),
            TxError::InvalidLayout => write!(f, "invalid region size or alignment"),
        }
    }
}

impl std::error::Error for TxError {}
