use thiserror::Error;

/// Checked failure for an ownership precondition that was not met.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum OwnershipError {
    #[error("access through an empty handle")]
    Empty,

    #[error("cannot release a resource still shared by {owners} owners")]
    Shared { owners: usize },
}

pub type Result<T, E = OwnershipError> = std::result::Result<T, E>;
