//! `sidearm` is a static analysis library for ARM64 Mach-O binaries with
//! first-class understanding of Objective-C runtime metadata and
//! per-function register-level dataflow.
//!
//! It consists of largely independent crates bundled under this namespace:
//!
//! - [`common`]: byte views, self-referential cells, architectures and the
//!   virtual/file address newtypes.
//! - [`macho`]: Mach-O and fat container parsing, dyld bind/rebase/export
//!   decoding, Objective-C runtime reconstruction and the callable-symbol
//!   index.
//! - [`analyze`]: function boundaries, per-function instruction analysis,
//!   register dataflow, msgSend cross-references and code search, driven by
//!   a caller-supplied disassembler.
//!
//! A typical session opens an image once and asks the memoized analyzer
//! questions:
//!
//! ```no_run
//! use std::sync::Arc;
//! use sidearm::analyze::MachAnalyzer;
//! use sidearm::macho::MachContainer;
//! # fn decoder() -> Arc<dyn sidearm::analyze::InstructionDecoder> { unimplemented!() }
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let container = MachContainer::open("MyApp")?;
//! let image = container.arm64_image().expect("no ARM64 slice");
//! let analyzer = MachAnalyzer::get_analyzer(image, decoder())?;
//!
//! for class in analyzer.objc().classes() {
//!     println!("{} ({} selectors)", class.name, class.selectors.len());
//! }
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

#[doc(inline)]
pub use sidearm_analyze as analyze;
#[doc(inline)]
pub use sidearm_common as common;
#[doc(inline)]
pub use sidearm_macho as macho;
