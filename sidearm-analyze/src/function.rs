//! Per-function analysis: the decoded instruction slice, branch enumeration
//! and classification, and selref/classref recovery at message-send sites.

use std::fmt;

use sidearm_common::VirtualAddress;
use sidearm_macho::{CallableSymbolKind, MethodInfo, SymbolIndex};

use crate::dataflow::{
    get_register_contents_at_instruction, track_register, RegisterContents,
};
use crate::error::{AnalysisError, Result};
use crate::instruction::Instruction;
use crate::search::{CodeSearch, CodeSearchResult};

/// Imported names of the `objc_msgSend` family, including the selector-less
/// fast paths introduced with iOS 13.
pub const MSGSEND_SYMBOLS: &[&str] = &["_objc_msgSend", "_objc_msgSendSuper2"];

/// The selector-less message-send fast paths; the class travels in `x0` and
/// no selref is loaded.
pub const MSGSEND_OPT_SYMBOLS: &[&str] = &["_objc_opt_new", "_objc_opt_class"];

/// One branch instruction within a function, annotated with everything the
/// symbol and ObjC layers know about its destination.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BranchTarget {
    /// Index of the branch instruction in the function.
    pub instruction_index: usize,
    /// Address of the branch instruction.
    pub address: VirtualAddress,
    /// The immediate destination; absent for indirect branches.
    pub destination_address: Option<VirtualAddress>,
    /// Whether the destination is an `objc_msgSend`-family import.
    pub is_msgsend_call: bool,
    /// Whether the call leaves the image through the ObjC runtime.
    pub is_external_objc_call: bool,
    /// Whether the call leaves the image through a non-ObjC stub.
    pub is_external_c_call: bool,
    /// The imported symbol name for external calls.
    pub symbol: Option<String>,
    /// The recovered selref slot loaded into `x1`, for msgSend sites.
    pub selref: Option<VirtualAddress>,
    /// The recovered classref slot loaded into `x0`, for msgSend sites.
    pub classref: Option<VirtualAddress>,
}

/// Analysis of a single function: its instructions and branch targets.
///
/// Built by [`MachAnalyzer::function_analyzer`](crate::MachAnalyzer::function_analyzer);
/// self-contained once constructed.
pub struct FunctionAnalyzer {
    entry: VirtualAddress,
    end: VirtualAddress,
    instructions: Vec<Instruction>,
    call_targets: Vec<BranchTarget>,
    method: Option<MethodInfo>,
}

impl FunctionAnalyzer {
    pub(crate) fn new(
        entry: VirtualAddress,
        end: VirtualAddress,
        instructions: Vec<Instruction>,
        symbols: &SymbolIndex,
        method: Option<MethodInfo>,
    ) -> Self {
        let call_targets = build_call_targets(&instructions, symbols);
        FunctionAnalyzer {
            entry,
            end,
            instructions,
            call_targets,
            method,
        }
    }

    /// The function's entry address.
    pub fn entry_address(&self) -> VirtualAddress {
        self.entry
    }

    /// The function's exclusive end address.
    pub fn end_address(&self) -> VirtualAddress {
        self.end
    }

    /// The decoded instructions, in address order.
    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    /// The instruction at the given index.
    pub fn instruction_at_index(&self, index: usize) -> Option<&Instruction> {
        self.instructions.get(index)
    }

    /// The index of the instruction at the given address.
    pub fn index_of_address(&self, address: VirtualAddress) -> Option<usize> {
        self.instructions
            .binary_search_by_key(&address, |instruction| instruction.address)
            .ok()
    }

    /// The ObjC method implemented by this function, if its entry point is a
    /// known IMP.
    pub fn method_info(&self) -> Option<&MethodInfo> {
        self.method.as_ref()
    }

    /// Every branch instruction in the function, in address order.
    pub fn call_targets(&self) -> &[BranchTarget] {
        &self.call_targets
    }

    /// The first branch at or after instruction index `index`, or `None` if
    /// no branch remains.
    pub fn next_branch_after_instruction_index(&self, index: usize) -> Option<&BranchTarget> {
        self.call_targets
            .iter()
            .find(|branch| branch.instruction_index >= index)
    }

    /// The contents of `register` immediately before the instruction at
    /// `index`.
    pub fn register_contents_at_index(&self, register: &str, index: usize) -> RegisterContents {
        get_register_contents_at_instruction(&self.instructions, register, index)
    }

    /// The contents of `register` immediately before the given instruction.
    /// Instructions outside this function resolve to
    /// [`RegisterContents::Unknown`].
    pub fn get_register_contents_at_instruction(
        &self,
        register: &str,
        instruction: &Instruction,
    ) -> RegisterContents {
        match self.index_of_address(instruction.address) {
            Some(index) => self.register_contents_at_index(register, index),
            None => RegisterContents::Unknown,
        }
    }

    /// The selref pointer loaded into `x1` at a branch instruction.
    ///
    /// Fails with [`AnalysisError::NotABranch`] when the instruction is not a
    /// branch; returns `None` when the dataflow engine cannot recover a
    /// concrete pointer.
    pub fn get_selref_ptr(&self, instruction: &Instruction) -> Result<Option<VirtualAddress>> {
        if !instruction.is_branch {
            return Err(AnalysisError::NotABranch(instruction.address));
        }
        let index = self
            .index_of_address(instruction.address)
            .ok_or(AnalysisError::NotABranch(instruction.address))?;
        Ok(match self.register_contents_at_index("x1", index) {
            RegisterContents::Immediate(value) => Some(VirtualAddress(value)),
            _ => None,
        })
    }

    /// The registers still carrying the value of `register` from the
    /// function entry, following move chains forward. Includes `register`
    /// itself.
    pub fn track_reg(&self, register: &str) -> Vec<String> {
        track_register(&self.instructions, register)
    }

    /// Matches a code search against this function's instructions.
    pub fn search_call_graph(&self, search: &CodeSearch) -> Vec<CodeSearchResult> {
        search.run(self)
    }
}

impl fmt::Debug for FunctionAnalyzer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionAnalyzer")
            .field("entry", &self.entry)
            .field("end", &self.end)
            .field("instructions", &self.instructions.len())
            .field("call_targets", &self.call_targets.len())
            .field("method", &self.method)
            .finish()
    }
}

fn build_call_targets(instructions: &[Instruction], symbols: &SymbolIndex) -> Vec<BranchTarget> {
    let mut targets = Vec::new();

    for (index, instruction) in instructions.iter().enumerate() {
        if !instruction.is_branch {
            continue;
        }

        // An immediate destination names a stub or a local label directly.
        // An indirect branch may still resolve through dataflow to a
        // dyld-bound pointer slot holding an imported function.
        let symbol_name = match instruction.branch_target {
            Some(destination) => symbols
                .callable_symbol_for_address(destination)
                .filter(|symbol| symbol.kind == CallableSymbolKind::Stub)
                .map(|symbol| symbol.name.clone()),
            None => branch_register(instruction)
                .map(|register| {
                    get_register_contents_at_instruction(instructions, &register, index)
                })
                .and_then(|contents| match contents {
                    RegisterContents::Immediate(slot) => symbols
                        .dyld_bound_symbols()
                        .get(&VirtualAddress(slot))
                        .map(|symbol| symbol.name.clone()),
                    _ => None,
                }),
        };

        let is_msgsend = symbol_name
            .as_deref()
            .is_some_and(|name| MSGSEND_SYMBOLS.contains(&name) || MSGSEND_OPT_SYMBOLS.contains(&name));
        let is_opt_msgsend = symbol_name
            .as_deref()
            .is_some_and(|name| MSGSEND_OPT_SYMBOLS.contains(&name));
        let is_external_c_call = symbol_name.is_some() && !is_msgsend;

        // Best effort selref/classref recovery; the branch is reported even
        // when the argument registers do not resolve.
        let (selref, classref) = if is_msgsend {
            let classref = match get_register_contents_at_instruction(instructions, "x0", index) {
                RegisterContents::Immediate(value) => Some(VirtualAddress(value)),
                _ => None,
            };
            let selref = if is_opt_msgsend {
                None
            } else {
                match get_register_contents_at_instruction(instructions, "x1", index) {
                    RegisterContents::Immediate(value) => Some(VirtualAddress(value)),
                    _ => None,
                }
            };
            (selref, classref)
        } else {
            (None, None)
        };

        targets.push(BranchTarget {
            instruction_index: index,
            address: instruction.address,
            destination_address: instruction.branch_target,
            is_msgsend_call: is_msgsend,
            is_external_objc_call: is_msgsend,
            is_external_c_call,
            symbol: symbol_name,
            selref,
            classref,
        });
    }

    targets
}

/// The register an indirect branch jumps through (`br x8`, `blr x16`).
fn branch_register(instruction: &Instruction) -> Option<String> {
    match instruction.mnemonic.as_str() {
        "br" | "blr" => instruction
            .operands
            .first()
            .and_then(|operand| operand.as_register())
            .map(crate::dataflow::normalize_register),
        _ => None,
    }
}
