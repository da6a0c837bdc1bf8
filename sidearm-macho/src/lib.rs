//! Mach-O parsing for `sidearm`.
//!
//! This crate turns the bytes of an ARM64 Mach-O image (or a fat container
//! of images) into the structural model the analysis layer queries:
//!
//!  - [`MachBinary`]: header, load commands, segments, sections, symbol
//!    tables, dylib commands, and virtual↔file address translation.
//!  - [`MachArchive`] / [`MachContainer`] / [`MachImage`]: fat-slice
//!    enumeration and owned, shareable images.
//!  - [`DyldInfo`]: the decoded bind, lazy-bind, rebase and export-trie
//!    streams — the ground truth for dyld-populated pointer slots.
//!  - [`ObjcRuntime`]: classes, selectors, selector references and class
//!    references reconstructed from the `__objc_*` sections.
//!  - [`SymbolIndex`]: imports, stubs and bound pointers unified into one
//!    callable-symbol index.
//!
//! Function-level analysis (boundaries, dataflow, code search) lives in
//! `sidearm-analyze`, which drives this crate through a memoized analyzer.

#![warn(missing_docs)]

mod archive;
mod binary;
mod dyld_info;
mod error;
mod objc;
mod symbols;

#[allow(missing_docs)]
pub mod raw;

pub use crate::archive::*;
pub use crate::binary::*;
pub use crate::dyld_info::*;
pub use crate::error::*;
pub use crate::objc::*;
pub use crate::symbols::*;
