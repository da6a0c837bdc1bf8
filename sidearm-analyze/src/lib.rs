//! ARM64 function analysis for `sidearm`.
//!
//! This crate sits on top of `sidearm-macho` and answers the code-level
//! questions: where functions begin and end, which instructions call which
//! targets, what a register holds at a given instruction, and which call
//! sites invoke `objc_msgSend` with which class and selector references.
//!
//! Disassembly is consumed, not performed: callers supply an
//! [`InstructionDecoder`] and the analysis layer treats its output as an
//! oracle.
//!
//! The entry point is [`MachAnalyzer::get_analyzer`], which memoizes one
//! analyzer per live image:
//!
//! ```no_run
//! use std::sync::Arc;
//! use sidearm_common::VirtualAddress;
//! use sidearm_macho::MachContainer;
//! use sidearm_analyze::{Instruction, InstructionDecoder, MachAnalyzer};
//!
//! struct MyDecoder;
//!
//! impl InstructionDecoder for MyDecoder {
//!     fn decode(&self, _bytes: &[u8], _base: VirtualAddress) -> Vec<Instruction> {
//!         // hand the bytes to a real disassembler backend
//!         Vec::new()
//!     }
//! }
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let container = MachContainer::open("MyApp")?;
//! let image = container.arm64_image().expect("no ARM64 slice");
//! let analyzer = MachAnalyzer::get_analyzer(image, Arc::new(MyDecoder))?;
//!
//! for &(entry, end) in analyzer.get_function_boundaries() {
//!     println!("function {entry} .. {end}");
//! }
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

mod analyzer;
mod dataflow;
mod error;
mod function;
mod instruction;
mod search;

pub use crate::analyzer::*;
pub use crate::dataflow::{get_register_contents_at_instruction, track_register, RegisterContents};
pub use crate::error::*;
pub use crate::function::*;
pub use crate::instruction::*;
pub use crate::search::*;
