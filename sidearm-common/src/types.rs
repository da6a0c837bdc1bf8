//! CPU architectures and address space types used across `sidearm`.

use std::fmt;
use std::ops::{Add, AddAssign, Sub};
use std::str::FromStr;

/// Names of the ARM64 general purpose argument registers, in calling
/// convention order. The index into this table is the argument number.
pub static ARM64_ARGUMENT_REGISTERS: &[&str] = &["x0", "x1", "x2", "x3", "x4", "x5", "x6", "x7"];

/// Names of the ARM64 floating point argument registers.
pub static ARM64_FP_ARGUMENT_REGISTERS: &[&str] = &["d0", "d1", "d2", "d3", "d4", "d5", "d6", "d7"];

/// Represents a family of CPUs.
///
/// This is strongly connected to the [`Arch`] type, but reduces the selection
/// to a range of families with distinct properties, such as a generally
/// common instruction set and pointer size.
#[non_exhaustive]
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum CpuFamily {
    /// Any other CPU family that is not explicitly supported.
    #[default]
    Unknown,
    /// 32-bit little-endian CPUs using the Intel 8086 instruction set, also known as `x86`.
    Intel32,
    /// 64-bit little-endian, also known as `x86_64`, now widely used by Intel and AMD.
    Amd64,
    /// 32-bit ARM.
    Arm32,
    /// 64-bit ARM (e.g. ARMv8-A).
    Arm64,
    /// ILP32 ABI on 64-bit ARM.
    Arm64_32,
}

impl CpuFamily {
    /// Returns the native pointer size in bytes.
    ///
    /// This defines the size of all pointers on the platform, and with it the
    /// stride of pointer arrays such as `__objc_selrefs`. Returns `None` if
    /// the CPU family is unknown.
    pub fn pointer_size(self) -> Option<usize> {
        match self {
            CpuFamily::Unknown => None,
            CpuFamily::Amd64 | CpuFamily::Arm64 => Some(8),
            CpuFamily::Intel32 | CpuFamily::Arm32 | CpuFamily::Arm64_32 => Some(4),
        }
    }

    /// Returns instruction alignment if fixed.
    ///
    /// ARM uses fixed length instructions, Intel does not. Function ends and
    /// branch targets are always aligned to this on fixed-width families.
    pub fn instruction_alignment(self) -> Option<u64> {
        match self {
            CpuFamily::Arm32 => Some(2),
            CpuFamily::Arm64 | CpuFamily::Arm64_32 => Some(4),
            CpuFamily::Intel32 | CpuFamily::Amd64 | CpuFamily::Unknown => None,
        }
    }
}

/// An error returned for an invalid [`Arch`].
#[derive(Debug)]
pub struct UnknownArchError;

impl fmt::Display for UnknownArchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown architecture")
    }
}

impl std::error::Error for UnknownArchError {}

/// An enumeration of CPU architectures and variants.
///
/// The architectures are grouped into families, which can be retrieved by
/// [`cpu_family`](Arch::cpu_family). There are `*Unknown` variants for each
/// family to support slices where the family is known but the subtype is not.
#[non_exhaustive]
#[allow(missing_docs)]
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Arch {
    #[default]
    Unknown,
    X86,
    Amd64,
    Arm,
    ArmUnknown,
    Arm64,
    Arm64V8,
    Arm64e,
    Arm64Unknown,
    Arm64_32,
    Arm64_32Unknown,
}

impl Arch {
    /// Returns the CPU family of the architecture.
    pub fn cpu_family(self) -> CpuFamily {
        match self {
            Arch::Unknown => CpuFamily::Unknown,
            Arch::X86 => CpuFamily::Intel32,
            Arch::Amd64 => CpuFamily::Amd64,
            Arch::Arm | Arch::ArmUnknown => CpuFamily::Arm32,
            Arch::Arm64 | Arch::Arm64V8 | Arch::Arm64e | Arch::Arm64Unknown => CpuFamily::Arm64,
            Arch::Arm64_32 | Arch::Arm64_32Unknown => CpuFamily::Arm64_32,
        }
    }

    /// Returns the canonical name of the architecture.
    pub fn name(self) -> &'static str {
        match self {
            Arch::Unknown => "unknown",
            Arch::X86 => "x86",
            Arch::Amd64 => "x86_64",
            Arch::Arm => "arm",
            Arch::ArmUnknown => "arm_unknown",
            Arch::Arm64 => "arm64",
            Arch::Arm64V8 => "arm64v8",
            Arch::Arm64e => "arm64e",
            Arch::Arm64Unknown => "arm64_unknown",
            Arch::Arm64_32 => "arm64_32",
            Arch::Arm64_32Unknown => "arm64_32_unknown",
        }
    }

    /// Returns whether this architecture runs the 64-bit ARM instruction set
    /// analyzed by `sidearm`.
    pub fn is_arm64(self) -> bool {
        self.cpu_family() == CpuFamily::Arm64
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Arch {
    type Err = UnknownArchError;

    fn from_str(string: &str) -> Result<Arch, UnknownArchError> {
        Ok(match string {
            "x86" | "i386" => Arch::X86,
            "x86_64" | "amd64" => Arch::Amd64,
            "arm" => Arch::Arm,
            "arm64" => Arch::Arm64,
            "arm64v8" => Arch::Arm64V8,
            "arm64e" => Arch::Arm64e,
            "arm64_32" => Arch::Arm64_32,
            _ => return Err(UnknownArchError),
        })
    }
}

/// An address in the virtual address space of a loaded image.
///
/// Virtual addresses are what load commands, symbol tables and pointers
/// embedded in an image talk about. They only convert to positions in the
/// file through the segment map of a parsed image; see
/// `MachBinary::file_offset_for_virtual_address` in `sidearm-macho`.
#[derive(Clone, Copy, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct VirtualAddress(pub u64);

/// A byte position in the on-disk representation of an image.
///
/// Kept distinct from [`VirtualAddress`] so the two address spaces cannot be
/// mixed up without going through a segment map.
#[derive(Clone, Copy, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct FileOffset(pub u64);

macro_rules! impl_address {
    ($type:ty) => {
        impl $type {
            /// Returns the raw numeric value.
            #[inline]
            pub fn get(self) -> u64 {
                self.0
            }

            /// Returns the value as `usize`, for indexing into buffers.
            #[inline]
            pub fn as_usize(self) -> usize {
                self.0 as usize
            }

            /// Checked addition of a byte count.
            #[inline]
            pub fn checked_add(self, rhs: u64) -> Option<Self> {
                self.0.checked_add(rhs).map(Self)
            }
        }

        impl From<u64> for $type {
            fn from(value: u64) -> Self {
                Self(value)
            }
        }

        impl From<$type> for u64 {
            fn from(value: $type) -> Self {
                value.0
            }
        }

        impl Add<u64> for $type {
            type Output = Self;

            fn add(self, rhs: u64) -> Self {
                Self(self.0 + rhs)
            }
        }

        impl AddAssign<u64> for $type {
            fn add_assign(&mut self, rhs: u64) {
                self.0 += rhs;
            }
        }

        impl Sub<u64> for $type {
            type Output = Self;

            fn sub(self, rhs: u64) -> Self {
                Self(self.0 - rhs)
            }
        }

        impl Sub<$type> for $type {
            type Output = u64;

            fn sub(self, rhs: $type) -> u64 {
                self.0 - rhs.0
            }
        }

        impl fmt::Debug for $type {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({:#x})", stringify!($type), self.0)
            }
        }

        impl fmt::Display for $type {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{:#x}", self.0)
            }
        }

        impl fmt::LowerHex for $type {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::LowerHex::fmt(&self.0, f)
            }
        }
    };
}

impl_address!(VirtualAddress);
impl_address!(FileOffset);
