use std::error::Error;

use thiserror::Error;

use sidearm_common::{FileOffset, VirtualAddress};

/// The error kind for a [`MachError`].
#[non_exhaustive]
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum MachErrorKind {
    /// The magic number or top-level header fields are not a Mach-O image.
    #[error("malformed Mach-O header")]
    MalformedHeader,
    /// A load command declares a size that escapes the load command region.
    #[error("truncated load command")]
    TruncatedLoadCommand,
    /// The image's CPU architecture is not supported for analysis.
    #[error("unsupported architecture")]
    UnsupportedArch,
    /// A segment's file range escapes the underlying buffer.
    #[error("segment file range escapes the image")]
    InconsistentSegment,
    /// A virtual address does not fall into any mapped segment.
    #[error("virtual address {0} is not mapped by any segment")]
    UnmappedAddress(VirtualAddress),
    /// A file offset does not fall into any segment's file range.
    #[error("file offset {0} is not covered by any segment")]
    UnmappedOffset(FileOffset),
    /// The dyld bind stream contains an opcode this decoder does not know.
    #[error("unknown dyld bind opcode {0:#04x}")]
    UnknownBindOpcode(u8),
    /// A dyld bind record's target escapes its segment, or the stream is cut short.
    #[error("dyld bind record escapes its segment")]
    BindOverflow,
    /// The dyld export trie has an edge or node that escapes its range.
    #[error("malformed dyld export trie")]
    MalformedExportTrie,
    /// A C string read ran off the mapped image or is not valid UTF-8.
    #[error("malformed string in image")]
    MalformedString,
    /// The input file could not be read or mapped.
    #[error("failed to read image")]
    Io,
}

/// An error returned when parsing or querying a Mach-O image.
#[derive(Debug, Error)]
#[error("{kind}")]
pub struct MachError {
    kind: MachErrorKind,
    #[source]
    source: Option<Box<dyn Error + Send + Sync + 'static>>,
}

impl MachError {
    /// Creates a new error from a known kind and an arbitrary payload.
    pub(crate) fn new<E>(kind: MachErrorKind, source: E) -> Self
    where
        E: Into<Box<dyn Error + Send + Sync>>,
    {
        let source = Some(source.into());
        Self { kind, source }
    }

    /// Returns the corresponding [`MachErrorKind`] for this error.
    pub fn kind(&self) -> MachErrorKind {
        self.kind
    }
}

impl From<MachErrorKind> for MachError {
    fn from(kind: MachErrorKind) -> Self {
        Self { kind, source: None }
    }
}

/// Shorthand for results with a [`MachError`].
pub type Result<T> = std::result::Result<T, MachError>;

impl MachErrorKind {
    /// Attaches a source error to this kind.
    pub(crate) fn with_source<E>(self, source: E) -> MachError
    where
        E: Into<Box<dyn Error + Send + Sync>>,
    {
        MachError::new(self, source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use similar_asserts::assert_eq;

    #[test]
    fn test_error_display() {
        let err = MachError::from(MachErrorKind::UnmappedAddress(VirtualAddress(0xdeadbeef)));
        assert_eq!(
            err.to_string(),
            "virtual address 0xdeadbeef is not mapped by any segment"
        );
        assert_eq!(
            err.kind(),
            MachErrorKind::UnmappedAddress(VirtualAddress(0xdeadbeef))
        );
    }

    #[test]
    fn test_error_source() {
        let err = MachErrorKind::BindOverflow.with_source("uleb ran off stream");
        assert!(std::error::Error::source(&err).is_some());
    }
}
