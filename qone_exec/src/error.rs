use thiserror::Error;

/// Result type alias for execution setup and scheduling.
pub type Result<T> = std::result::Result<T, ExecError>;

/// Errors raised while configuring kernels or submitting work.
///
/// Nothing inside a running batch loop produces these; they are checked
/// before any row is touched.
#[derive(Debug, Error)]
pub enum ExecError {
    /// Group key domain does not fit the compile-time bound.
    #[error("group domain of {size} keys exceeds MAX_GROUPS ({max})")]
    DomainTooLarge {
        /// Product of both column widths.
        size: usize,
        /// The bound.
        max: usize,
    },
    /// Batch width unsupported by the scratch buffers.
    #[error("vector size {0} must be a multiple of 32 in [32, 8192]")]
    VectorSize(usize),
    /// Morsel width unsupported by the push-down bitmap.
    #[error("morsel size {0} must be a non-zero multiple of 32")]
    MorselSize(usize),
    /// Worker pool would be empty.
    #[error("worker thread count must be at least 1")]
    NoWorkers,
    /// Requested row range is not inside the table.
    #[error("row range {offset}..{end} exceeds table cardinality {cardinality}")]
    RangeOutOfBounds {
        /// First row.
        offset: usize,
        /// One past the last row.
        end: usize,
        /// Table size.
        cardinality: usize,
    },
    /// Push-down rows must start on a bitmap word.
    #[error("push-down range starting at row {0} is not 32-row aligned")]
    PushdownAlignment(usize),
    /// `spawn` while an earlier query has not been waited for.
    #[error("a query is already in flight")]
    QueryInFlight,
    /// The OS refused a worker thread.
    #[error("failed to spawn worker: {0}")]
    Spawn(#[from] std::io::Error),
    /// Unknown name for a strategy enum.
    #[error("unknown {kind} '{value}'")]
    UnknownVariant {
        /// Enum being parsed.
        kind: &'static str,
        /// Input text.
        value: String,
    },
}
