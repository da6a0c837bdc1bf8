//! The instruction model and the disassembler oracle boundary.
//!
//! `sidearm` does not disassemble; it consumes decoded instructions from an
//! [`InstructionDecoder`] supplied by the caller (Capstone, LLVM, a scripted
//! decoder in tests). The model below is the narrow contract between that
//! backend and the analysis layer: address, mnemonic, operands and branch
//! classification, nothing backend-specific.

use std::fmt;

use smallvec::SmallVec;

use sidearm_common::VirtualAddress;

/// One operand of a decoded instruction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Operand {
    /// A register, by its lowercase name (`"x0"`, `"w8"`, `"sp"`).
    Register(String),
    /// An immediate value. For `adrp` this is the absolute page address.
    Immediate(i64),
    /// A left-shift applied to the preceding immediate (`lsl #16`).
    Shift(u32),
    /// A base-plus-displacement memory reference (`[x8, #0x18]`).
    Memory {
        /// The base register name.
        base: String,
        /// The signed displacement in bytes.
        displacement: i64,
    },
}

impl Operand {
    /// Convenience constructor for a register operand.
    pub fn reg(name: &str) -> Self {
        Operand::Register(name.to_string())
    }

    /// Convenience constructor for an immediate operand.
    pub fn imm(value: i64) -> Self {
        Operand::Immediate(value)
    }

    /// Convenience constructor for a memory operand.
    pub fn mem(base: &str, displacement: i64) -> Self {
        Operand::Memory {
            base: base.to_string(),
            displacement,
        }
    }

    /// The register name if this is a register operand.
    pub fn as_register(&self) -> Option<&str> {
        match self {
            Operand::Register(name) => Some(name),
            _ => None,
        }
    }

    /// The value if this is an immediate operand.
    pub fn as_immediate(&self) -> Option<i64> {
        match self {
            Operand::Immediate(value) => Some(*value),
            _ => None,
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Register(name) => f.write_str(name),
            Operand::Immediate(value) => write!(f, "#{value:#x}"),
            Operand::Shift(amount) => write!(f, "lsl #{amount}"),
            Operand::Memory { base, displacement } => {
                write!(f, "[{base}, #{displacement:#x}]")
            }
        }
    }
}

/// A decoded ARM64 instruction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Instruction {
    /// The instruction's virtual address.
    pub address: VirtualAddress,
    /// The lowercase mnemonic (`"mov"`, `"bl"`, `"ldr"`).
    pub mnemonic: String,
    /// The operands, in assembly order.
    pub operands: SmallVec<[Operand; 4]>,
    /// Whether the instruction transfers control.
    pub is_branch: bool,
    /// Whether the branch is conditional (`b.ne`, `cbz`, ...).
    pub is_conditional: bool,
    /// The immediate branch destination, absent for indirect branches.
    pub branch_target: Option<VirtualAddress>,
}

impl Instruction {
    /// Creates a non-branch instruction.
    pub fn new(address: u64, mnemonic: &str, operands: Vec<Operand>) -> Self {
        Instruction {
            address: VirtualAddress(address),
            mnemonic: mnemonic.to_string(),
            operands: operands.into_iter().collect(),
            is_branch: false,
            is_conditional: false,
            branch_target: None,
        }
    }

    /// Creates an unconditional branch with an immediate destination.
    pub fn branch(address: u64, mnemonic: &str, target: u64) -> Self {
        Instruction {
            address: VirtualAddress(address),
            mnemonic: mnemonic.to_string(),
            operands: [Operand::Immediate(target as i64)].into_iter().collect(),
            is_branch: true,
            is_conditional: false,
            branch_target: Some(VirtualAddress(target)),
        }
    }

    /// Creates a conditional branch with an immediate destination.
    pub fn conditional_branch(address: u64, mnemonic: &str, target: u64) -> Self {
        let mut instruction = Self::branch(address, mnemonic, target);
        instruction.is_conditional = true;
        instruction
    }

    /// Creates an indirect branch through a register (`br x8`, `ret`).
    pub fn indirect_branch(address: u64, mnemonic: &str, operands: Vec<Operand>) -> Self {
        Instruction {
            address: VirtualAddress(address),
            mnemonic: mnemonic.to_string(),
            operands: operands.into_iter().collect(),
            is_branch: true,
            is_conditional: false,
            branch_target: None,
        }
    }

    /// The destination register of a data-processing instruction, by ARM64
    /// convention the first register operand.
    pub fn destination_register(&self) -> Option<&str> {
        self.operands.first().and_then(Operand::as_register)
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}: {}", self.address.get(), self.mnemonic)?;
        for (index, operand) in self.operands.iter().enumerate() {
            if index == 0 {
                write!(f, " {operand}")?;
            } else {
                write!(f, ", {operand}")?;
            }
        }
        Ok(())
    }
}

/// The disassembler oracle.
///
/// Implementations turn the bytes at a base address into decoded
/// instructions in address order. The analysis layer never interprets raw
/// instruction bytes itself and makes no assumption about the backend beyond
/// this contract.
pub trait InstructionDecoder: Send + Sync {
    /// Decodes the instructions contained in `bytes`, which start at
    /// `base_address` in the image's virtual address space.
    fn decode(&self, bytes: &[u8], base_address: VirtualAddress) -> Vec<Instruction>;
}
