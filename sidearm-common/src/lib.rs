//! Common functionality for `sidearm`.
//!
//! This crate exposes the foundation types shared by the Mach-O parsing and
//! analysis crates:
//!
//!  - [`ByteView`]: Gives access to binary data in-memory or on the file system.
//!  - [`SelfCell`]: Allows to create self-referential types, used to keep an
//!    image's backing bytes alive next to the structures parsed out of them.
//!  - [`Arch`] and [`CpuFamily`]: CPU architectures as found in Mach headers.
//!  - [`VirtualAddress`] and [`FileOffset`]: The two address spaces of a
//!    mapped image, kept apart at the type level.

#![warn(missing_docs)]

mod byteview;
mod cell;
mod types;

pub use crate::byteview::*;
pub use crate::cell::*;
pub use crate::types::*;
