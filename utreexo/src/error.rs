use readerwriter::{ReadError, WriteError};

/// Represents an error in accumulator proof creation, verification or state upkeep.
#[derive(Fail, Clone, Debug, Eq, PartialEq)]
pub enum UtreexoError {
    /// This error occurs when the proof carries too few or too many hashes
    /// for the targets it covers.
    #[fail(display = "Proof has the wrong number of hashes.")]
    MalformedProof,

    /// This error occurs when a caller-supplied argument is inconsistent,
    /// e.g. the same leaf is requested twice.
    #[fail(display = "Input arguments are malformed.")]
    MalformedInput,

    /// This error occurs when the roots computed from a proof disagree with
    /// the stored roots.
    #[fail(display = "Computed roots do not match the stored roots.")]
    RootMismatch,

    /// This error occurs when a leaf requested for proving is not cached.
    #[fail(display = "Requested leaf is not cached in the accumulator.")]
    MissingCachedLeaf,

    /// This error occurs when a leaf requested for pruning is not cached.
    #[fail(display = "Leaf to prune is not cached.")]
    NotCached,

    /// This error occurs when an internal invariant is violated. It indicates
    /// a bug rather than a user error; the accumulator must be discarded.
    #[fail(display = "Accumulator state is corrupted.")]
    CorruptedState,

    /// This error occurs when a snapshot cannot be decoded.
    #[fail(display = "Failed to read a snapshot: {:?}", _0)]
    Read(ReadError),

    /// This error occurs when a snapshot cannot be written out.
    #[fail(display = "Failed to write a snapshot: {:?}", _0)]
    Write(WriteError),
}

impl From<ReadError> for UtreexoError {
    fn from(err: ReadError) -> Self {
        UtreexoError::Read(err)
    }
}

impl From<WriteError> for UtreexoError {
    fn from(err: WriteError) -> Self {
        UtreexoError::Write(err)
    }
}
