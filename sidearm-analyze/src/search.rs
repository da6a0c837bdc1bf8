//! Code search: matching term conjunctions and disjunctions against a
//! function's instructions and dataflow-resolved register contents.

use std::collections::BTreeMap;

use sidearm_common::VirtualAddress;

use crate::dataflow::RegisterContents;
use crate::function::FunctionAnalyzer;
use crate::instruction::{Instruction, Operand};

/// One predicate of a [`CodeSearch`].
#[derive(Clone, Debug, PartialEq)]
pub enum CodeSearchTerm {
    /// Matches a branch instruction with the given immediate destination.
    CallDestination {
        /// The required destination address.
        address: VirtualAddress,
    },
    /// Matches the instruction at the given index of the function.
    InstructionIndex {
        /// The required instruction index.
        index: usize,
    },
    /// Matches instructions with the given mnemonic.
    InstructionMnemonic {
        /// The required mnemonic.
        mnemonic: String,
    },
    /// Matches instructions whose i-th operand equals the given operand.
    InstructionOperand {
        /// Index of the operand to compare.
        index: usize,
        /// The required operand value.
        operand: Operand,
    },
    /// Matches instructions where the dataflow-resolved contents of a
    /// register equal the given value.
    RegisterContents {
        /// The register to resolve.
        register: String,
        /// The required contents.
        contents: RegisterContents,
    },
    /// Matches calls to `address` whose argument registers resolve to the
    /// given contents. Matching results carry the full resolved argument
    /// map.
    FunctionCallWithArguments {
        /// The required call destination.
        address: VirtualAddress,
        /// Required `(register, contents)` pairs.
        arguments: Vec<(String, RegisterContents)>,
    },
}

/// A search over function instructions: a conjunction (when
/// `requires_all_terms_matched`) or disjunction of terms.
#[derive(Clone, Debug, PartialEq)]
pub struct CodeSearch {
    /// The search terms.
    pub terms: Vec<CodeSearchTerm>,
    /// Whether every term must match at the same instruction.
    pub requires_all_terms_matched: bool,
}

impl CodeSearch {
    /// A conjunction: every term must match at the same instruction.
    pub fn requiring_all(terms: Vec<CodeSearchTerm>) -> Self {
        CodeSearch {
            terms,
            requires_all_terms_matched: true,
        }
    }

    /// A disjunction: any matching term yields a result.
    pub fn requiring_any(terms: Vec<CodeSearchTerm>) -> Self {
        CodeSearch {
            terms,
            requires_all_terms_matched: false,
        }
    }

    pub(crate) fn run(&self, function: &FunctionAnalyzer) -> Vec<CodeSearchResult> {
        let mut results = Vec::new();

        for (index, instruction) in function.instructions().iter().enumerate() {
            let mut matched_terms = Vec::new();
            let mut arguments = None;

            for (term_index, term) in self.terms.iter().enumerate() {
                match evaluate_term(term, function, index, instruction) {
                    Some(captures) => {
                        matched_terms.push(term_index);
                        if captures.is_some() {
                            arguments = captures;
                        }
                    }
                    None if self.requires_all_terms_matched => {
                        matched_terms.clear();
                        arguments = None;
                        break;
                    }
                    None => {}
                }
            }

            if matched_terms.is_empty() {
                continue;
            }
            if self.requires_all_terms_matched && matched_terms.len() != self.terms.len() {
                continue;
            }

            results.push(CodeSearchResult {
                function_entry: function.entry_address(),
                instruction_index: index,
                found_instruction: instruction.clone(),
                matched_terms,
                arguments,
            });
        }

        results
    }
}

/// One match of a [`CodeSearch`].
#[derive(Clone, Debug)]
pub struct CodeSearchResult {
    /// Entry address of the function containing the match.
    pub function_entry: VirtualAddress,
    /// Index of the matched instruction in the function.
    pub instruction_index: usize,
    /// The matched instruction.
    pub found_instruction: Instruction,
    /// Indexes into the search's terms that matched at this instruction.
    pub matched_terms: Vec<usize>,
    /// For [`CodeSearchTerm::FunctionCallWithArguments`] matches, the full
    /// resolved argument map.
    pub arguments: Option<BTreeMap<String, RegisterContents>>,
}

/// Evaluates one term. `Some(None)` is a plain match, `Some(Some(map))` a
/// match carrying captured arguments.
#[allow(clippy::type_complexity)]
fn evaluate_term(
    term: &CodeSearchTerm,
    function: &FunctionAnalyzer,
    index: usize,
    instruction: &Instruction,
) -> Option<Option<BTreeMap<String, RegisterContents>>> {
    match term {
        CodeSearchTerm::CallDestination { address } => {
            (instruction.is_branch && instruction.branch_target == Some(*address)).then_some(None)
        }
        CodeSearchTerm::InstructionIndex { index: required } => (index == *required).then_some(None),
        CodeSearchTerm::InstructionMnemonic { mnemonic } => {
            (instruction.mnemonic == *mnemonic).then_some(None)
        }
        CodeSearchTerm::InstructionOperand { index, operand } => {
            (instruction.operands.get(*index) == Some(operand)).then_some(None)
        }
        CodeSearchTerm::RegisterContents { register, contents } => {
            (function.register_contents_at_index(register, index) == *contents).then_some(None)
        }
        CodeSearchTerm::FunctionCallWithArguments { address, arguments } => {
            if !instruction.is_branch || instruction.branch_target != Some(*address) {
                return None;
            }

            let mut resolved = BTreeMap::new();
            for (register, expected) in arguments {
                let contents = function.register_contents_at_index(register, index);
                if contents != *expected {
                    return None;
                }
                resolved.insert(register.clone(), contents);
            }
            Some(Some(resolved))
        }
    }
}
