//! Register-level dataflow over a function's decoded instructions.
//!
//! [`get_register_contents_at_instruction`] computes what a register holds
//! at the program point immediately before an instruction, by walking
//! backwards from the query site and following register definitions. The
//! walk is deliberately linear: it scans the decoded instruction list and
//! does not model control-flow joins, so a value that is only correct on the
//! fall-through path may be reported for instructions reachable through
//! other paths. Any operation outside the recognized set degrades safely to
//! [`RegisterContents::Unknown`].

use sidearm_common::{ARM64_ARGUMENT_REGISTERS, ARM64_FP_ARGUMENT_REGISTERS};

use crate::instruction::{Instruction, Operand};

/// The abstract contents of a register at a program point.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RegisterContents {
    /// A concrete value was computed.
    Immediate(u64),
    /// The value transitively derives, unmodified, from the i-th argument
    /// register at function entry.
    FunctionArg(u8),
    /// The engine could not decide.
    Unknown,
}

/// Computes the contents of `register` immediately before the instruction at
/// `index`.
///
/// At the function entry boundary, the argument registers `x0..x7` and
/// `d0..d7` map to [`RegisterContents::FunctionArg`]; everything else is
/// [`RegisterContents::Unknown`]. The result is a pure function of
/// `(instructions, register, index)`.
pub fn get_register_contents_at_instruction(
    instructions: &[Instruction],
    register: &str,
    index: usize,
) -> RegisterContents {
    resolve(instructions, &normalize_register(register), index)
}

fn resolve(instructions: &[Instruction], register: &str, index: usize) -> RegisterContents {
    let mut register = register.to_string();
    let mut index = index.min(instructions.len());

    'walk: loop {
        if is_zero_register(&register) {
            return RegisterContents::Immediate(0);
        }

        let mut i = index;
        while i > 0 {
            i -= 1;
            let instruction = &instructions[i];
            if !defines(instruction, &register) {
                continue;
            }

            match instruction.mnemonic.as_str() {
                "mov" | "fmov" => match instruction.operands.get(1) {
                    Some(Operand::Register(source)) => {
                        // Follow the copy chain without growing the stack.
                        register = normalize_register(source);
                        index = i;
                        continue 'walk;
                    }
                    Some(Operand::Immediate(value)) => {
                        return RegisterContents::Immediate(*value as u64)
                    }
                    _ => return RegisterContents::Unknown,
                },
                "movz" => return immediate_operand(instruction, 1),
                "movk" => {
                    let (value, shift) = match shifted_immediate(instruction, 1) {
                        Some(pair) => pair,
                        None => return RegisterContents::Unknown,
                    };
                    // movk patches 16 bits of an existing value.
                    return match resolve(instructions, &register, i) {
                        RegisterContents::Immediate(base) => RegisterContents::Immediate(
                            (base & !(0xffff << shift)) | ((value as u64 & 0xffff) << shift),
                        ),
                        _ => RegisterContents::Unknown,
                    };
                }
                "adrp" | "adr" => return immediate_operand(instruction, 1),
                "add" | "sub" => {
                    let base_register = match instruction.operands.get(1) {
                        Some(Operand::Register(name)) => normalize_register(name),
                        _ => return RegisterContents::Unknown,
                    };
                    let (value, shift) = match shifted_immediate(instruction, 2) {
                        Some(pair) => pair,
                        None => return RegisterContents::Unknown,
                    };
                    let operand = (value as u64) << shift;

                    return match resolve(instructions, &base_register, i) {
                        RegisterContents::Immediate(base) => {
                            RegisterContents::Immediate(if instruction.mnemonic == "add" {
                                base.wrapping_add(operand)
                            } else {
                                base.wrapping_sub(operand)
                            })
                        }
                        _ => RegisterContents::Unknown,
                    };
                }
                "ldr" | "ldur" => {
                    let (base, displacement) = match instruction.operands.get(1) {
                        Some(Operand::Memory { base, displacement }) => {
                            (normalize_register(base), *displacement)
                        }
                        _ => return RegisterContents::Unknown,
                    };
                    // The load itself is not modeled; the result is the
                    // symbolic pointer the load reads through, which callers
                    // may follow through the image.
                    return match resolve(instructions, &base, i) {
                        RegisterContents::Immediate(address) => RegisterContents::Immediate(
                            address.wrapping_add(displacement as u64),
                        ),
                        _ => RegisterContents::Unknown,
                    };
                }
                _ => return RegisterContents::Unknown,
            }
        }

        // Reached the function entry without a local definition.
        return argument_register_index(&register)
            .map(RegisterContents::FunctionArg)
            .unwrap_or(RegisterContents::Unknown);
    }
}

/// The set of registers transitively aliased with `register` through
/// move/copy chains, walking forward from the function entry. The result
/// includes `register` itself; a register leaves the set when something
/// other than a copy of a member redefines it.
pub fn track_register(instructions: &[Instruction], register: &str) -> Vec<String> {
    let mut aliases = vec![normalize_register(register)];

    for instruction in instructions {
        let is_copy = matches!(instruction.mnemonic.as_str(), "mov" | "fmov");
        let copy_source = instruction
            .operands
            .get(1)
            .and_then(Operand::as_register)
            .map(normalize_register);

        let Some(destination) = instruction.destination_register() else {
            continue;
        };
        let destination = normalize_register(destination);

        if is_copy && copy_source.as_deref().is_some_and(|src| aliases.iter().any(|r| r == src)) {
            if !aliases.iter().any(|r| r == &destination) {
                aliases.push(destination);
            }
        } else if writes_destination(instruction) {
            aliases.retain(|r| r != &destination);
        }
    }

    aliases
}

/// Whether the instruction (syntactically) writes its first register
/// operand. Comparison and store mnemonics read their first operand instead.
fn writes_destination(instruction: &Instruction) -> bool {
    !matches!(
        instruction.mnemonic.as_str(),
        "cmp" | "cmn" | "tst" | "str" | "stur" | "strb" | "strh" | "stp" | "cbz" | "cbnz"
            | "tbz" | "tbnz"
    ) && !instruction.is_branch
}

fn defines(instruction: &Instruction, register: &str) -> bool {
    if !writes_destination(instruction) {
        return false;
    }
    let defines_first = instruction
        .destination_register()
        .map(normalize_register)
        .is_some_and(|r| r == register);
    if defines_first {
        return true;
    }
    // ldp writes its first two register operands.
    instruction.mnemonic == "ldp"
        && instruction
            .operands
            .get(1)
            .and_then(Operand::as_register)
            .map(normalize_register)
            .is_some_and(|r| r == register)
}

fn immediate_operand(instruction: &Instruction, index: usize) -> RegisterContents {
    match shifted_immediate(instruction, index) {
        Some((value, shift)) => RegisterContents::Immediate((value as u64) << shift),
        None => RegisterContents::Unknown,
    }
}

/// Reads an immediate operand plus an optional trailing `lsl` shift.
fn shifted_immediate(instruction: &Instruction, index: usize) -> Option<(i64, u32)> {
    let value = instruction.operands.get(index)?.as_immediate()?;
    let shift = match instruction.operands.get(index + 1) {
        Some(Operand::Shift(amount)) => *amount,
        _ => 0,
    };
    Some((value, shift))
}

/// Lowercases a register name and widens 32-bit views (`w5`) to their full
/// register (`x5`), since both name the same storage.
pub(crate) fn normalize_register(register: &str) -> String {
    let register = register.to_ascii_lowercase();
    match register.strip_prefix('w') {
        Some(rest) if rest.chars().all(|c| c.is_ascii_digit()) => format!("x{rest}"),
        Some("zr") => "xzr".to_string(),
        _ => register,
    }
}

fn is_zero_register(register: &str) -> bool {
    register == "xzr" || register == "wzr"
}

fn argument_register_index(register: &str) -> Option<u8> {
    ARM64_ARGUMENT_REGISTERS
        .iter()
        .chain(ARM64_FP_ARGUMENT_REGISTERS.iter())
        .position(|&name| name == register)
        .map(|position| (position % ARM64_ARGUMENT_REGISTERS.len()) as u8)
}
