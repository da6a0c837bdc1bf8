use thiserror::Error;

use sidearm_common::VirtualAddress;
use sidearm_macho::MachError;

/// An error returned by the analysis layer.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum AnalysisError {
    /// A branch-only API was called on an instruction that is not a branch.
    #[error("instruction at {0} is not a branch")]
    NotABranch(VirtualAddress),
    /// A branch destination does not resolve to any callable symbol.
    #[error("no callable symbol at branch destination {0}")]
    UnknownBranchTarget(VirtualAddress),
    /// The given address is not a known function entry point.
    #[error("no function with entry point {0}")]
    UnknownFunction(VirtualAddress),
    /// A structural error in the underlying image.
    #[error(transparent)]
    Macho(#[from] MachError),
}

/// Shorthand for results with an [`AnalysisError`].
pub type Result<T> = std::result::Result<T, AnalysisError>;
