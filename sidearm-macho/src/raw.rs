//! Raw on-disk Mach-O structures and constants.
//!
//! Everything in this module mirrors the layouts consumed bit-exactly from
//! `<mach-o/loader.h>`, `<mach-o/nlist.h>`, `<mach-o/fat.h>` and the
//! Objective-C runtime. All multi-byte fields are read with the endianness
//! determined by the image's magic; on ARM64 that is always little-endian.

use scroll::{Pread, Pwrite, SizeWith};

/// 32-bit Mach-O magic.
pub const MH_MAGIC: u32 = 0xfeed_face;
/// Byte-swapped 32-bit Mach-O magic.
pub const MH_CIGAM: u32 = 0xcefa_edfe;
/// 64-bit Mach-O magic.
pub const MH_MAGIC_64: u32 = 0xfeed_facf;
/// Byte-swapped 64-bit Mach-O magic.
pub const MH_CIGAM_64: u32 = 0xcffa_edfe;
/// Fat container magic (big-endian on disk).
pub const FAT_MAGIC: u32 = 0xcafe_babe;
/// Byte-swapped fat container magic.
pub const FAT_CIGAM: u32 = 0xbeba_feca;

/// Flag marking a 64-bit ABI variant of a CPU type.
pub const CPU_ARCH_ABI64: u32 = 0x0100_0000;
/// Flag marking the ILP32 ABI on 64-bit hardware.
pub const CPU_ARCH_ABI64_32: u32 = 0x0200_0000;
/// Intel x86.
pub const CPU_TYPE_X86: u32 = 7;
/// Intel x86-64.
pub const CPU_TYPE_X86_64: u32 = CPU_TYPE_X86 | CPU_ARCH_ABI64;
/// 32-bit ARM.
pub const CPU_TYPE_ARM: u32 = 12;
/// 64-bit ARM.
pub const CPU_TYPE_ARM64: u32 = CPU_TYPE_ARM | CPU_ARCH_ABI64;
/// ILP32 ARM64.
pub const CPU_TYPE_ARM64_32: u32 = CPU_TYPE_ARM | CPU_ARCH_ABI64_32;

/// Mask for the subtype proper; the high byte carries capability bits.
pub const CPU_SUBTYPE_MASK: u32 = 0x00ff_ffff;
/// Generic ARM64.
pub const CPU_SUBTYPE_ARM64_ALL: u32 = 0;
/// ARMv8-A.
pub const CPU_SUBTYPE_ARM64_V8: u32 = 1;
/// arm64e (pointer authentication).
pub const CPU_SUBTYPE_ARM64E: u32 = 2;

/// Relocatable object file.
pub const MH_OBJECT: u32 = 0x1;
/// Executable image.
pub const MH_EXECUTE: u32 = 0x2;
/// Dynamic library.
pub const MH_DYLIB: u32 = 0x6;
/// Dynamic linker.
pub const MH_DYLINKER: u32 = 0x7;
/// Loadable bundle.
pub const MH_BUNDLE: u32 = 0x8;
/// Debug companion (dSYM).
pub const MH_DSYM: u32 = 0xa;
/// Position-independent executable flag in the header's `flags` field.
pub const MH_PIE: u32 = 0x0020_0000;

/// Set on load commands the dynamic linker is required to understand.
pub const LC_REQ_DYLD: u32 = 0x8000_0000;
/// 32-bit segment.
pub const LC_SEGMENT: u32 = 0x1;
/// Symbol table.
pub const LC_SYMTAB: u32 = 0x2;
/// Dynamic symbol table.
pub const LC_DYSYMTAB: u32 = 0xb;
/// Load a dynamic library.
pub const LC_LOAD_DYLIB: u32 = 0xc;
/// Identify this image as a dynamic library.
pub const LC_ID_DYLIB: u32 = 0xd;
/// Load a dynamic library, tolerating its absence.
pub const LC_LOAD_WEAK_DYLIB: u32 = 0x18 | LC_REQ_DYLD;
/// 64-bit segment.
pub const LC_SEGMENT_64: u32 = 0x19;
/// Re-export a dependent dynamic library.
pub const LC_REEXPORT_DYLIB: u32 = 0x1f | LC_REQ_DYLD;
/// Compressed dyld information.
pub const LC_DYLD_INFO: u32 = 0x22;
/// Compressed dyld information the linker must understand.
pub const LC_DYLD_INFO_ONLY: u32 = 0x22 | LC_REQ_DYLD;
/// Main thread entry point.
pub const LC_MAIN: u32 = 0x28 | LC_REQ_DYLD;

/// Symbol table entry is a debugging (stab) entry.
pub const N_STAB: u8 = 0xe0;
/// Mask for the type bits of `n_type`.
pub const N_TYPE: u8 = 0x0e;
/// Undefined symbol.
pub const N_UNDF: u8 = 0x0;
/// Symbol defined in a section.
pub const N_SECT: u8 = 0xe;
/// `n_sect` value for symbols not defined in any section.
pub const NO_SECT: u8 = 0;

/// Mask for the section type in a section's `flags` field.
pub const SECTION_TYPE: u32 = 0x0000_00ff;
/// Section of non-lazy symbol pointers.
pub const S_NON_LAZY_SYMBOL_POINTERS: u32 = 0x6;
/// Section of lazy symbol pointers.
pub const S_LAZY_SYMBOL_POINTERS: u32 = 0x7;
/// Section of symbol stubs; `reserved2` holds the stub size.
pub const S_SYMBOL_STUBS: u32 = 0x8;
/// Section contains only machine instructions.
pub const S_ATTR_PURE_INSTRUCTIONS: u32 = 0x8000_0000;
/// Section contains some machine instructions.
pub const S_ATTR_SOME_INSTRUCTIONS: u32 = 0x0000_0400;

/// Indirect symbol table entry for a local symbol.
pub const INDIRECT_SYMBOL_LOCAL: u32 = 0x8000_0000;
/// Indirect symbol table entry for an absolute symbol.
pub const INDIRECT_SYMBOL_ABS: u32 = 0x4000_0000;

/// Mask for the opcode bits of a dyld bind opcode byte.
pub const BIND_OPCODE_MASK: u8 = 0xf0;
/// Mask for the immediate bits of a dyld bind opcode byte.
pub const BIND_IMMEDIATE_MASK: u8 = 0x0f;
#[allow(missing_docs)]
pub const BIND_OPCODE_DONE: u8 = 0x00;
#[allow(missing_docs)]
pub const BIND_OPCODE_SET_DYLIB_ORDINAL_IMM: u8 = 0x10;
#[allow(missing_docs)]
pub const BIND_OPCODE_SET_DYLIB_ORDINAL_ULEB: u8 = 0x20;
#[allow(missing_docs)]
pub const BIND_OPCODE_SET_DYLIB_SPECIAL_IMM: u8 = 0x30;
#[allow(missing_docs)]
pub const BIND_OPCODE_SET_SYMBOL_TRAILING_FLAGS_IMM: u8 = 0x40;
#[allow(missing_docs)]
pub const BIND_OPCODE_SET_TYPE_IMM: u8 = 0x50;
#[allow(missing_docs)]
pub const BIND_OPCODE_SET_ADDEND_SLEB: u8 = 0x60;
#[allow(missing_docs)]
pub const BIND_OPCODE_SET_SEGMENT_AND_OFFSET_ULEB: u8 = 0x70;
#[allow(missing_docs)]
pub const BIND_OPCODE_ADD_ADDR_ULEB: u8 = 0x80;
#[allow(missing_docs)]
pub const BIND_OPCODE_DO_BIND: u8 = 0x90;
#[allow(missing_docs)]
pub const BIND_OPCODE_DO_BIND_ADD_ADDR_ULEB: u8 = 0xa0;
#[allow(missing_docs)]
pub const BIND_OPCODE_DO_BIND_ADD_ADDR_IMM_SCALED: u8 = 0xb0;
#[allow(missing_docs)]
pub const BIND_OPCODE_DO_BIND_ULEB_TIMES_SKIPPING_ULEB: u8 = 0xc0;
/// Bind target is a pointer slot.
pub const BIND_TYPE_POINTER: u8 = 1;
/// Weak-import flag on `SET_SYMBOL_TRAILING_FLAGS_IMM`.
pub const BIND_SYMBOL_FLAGS_WEAK_IMPORT: u8 = 0x1;

#[allow(missing_docs)]
pub const REBASE_OPCODE_MASK: u8 = 0xf0;
#[allow(missing_docs)]
pub const REBASE_IMMEDIATE_MASK: u8 = 0x0f;
#[allow(missing_docs)]
pub const REBASE_OPCODE_DONE: u8 = 0x00;
#[allow(missing_docs)]
pub const REBASE_OPCODE_SET_TYPE_IMM: u8 = 0x10;
#[allow(missing_docs)]
pub const REBASE_OPCODE_SET_SEGMENT_AND_OFFSET_ULEB: u8 = 0x20;
#[allow(missing_docs)]
pub const REBASE_OPCODE_ADD_ADDR_ULEB: u8 = 0x30;
#[allow(missing_docs)]
pub const REBASE_OPCODE_ADD_ADDR_IMM_SCALED: u8 = 0x40;
#[allow(missing_docs)]
pub const REBASE_OPCODE_DO_REBASE_IMM_TIMES: u8 = 0x50;
#[allow(missing_docs)]
pub const REBASE_OPCODE_DO_REBASE_ULEB_TIMES: u8 = 0x60;
#[allow(missing_docs)]
pub const REBASE_OPCODE_DO_REBASE_ADD_ADDR_ULEB: u8 = 0x70;
#[allow(missing_docs)]
pub const REBASE_OPCODE_DO_REBASE_ULEB_TIMES_SKIPPING_ULEB: u8 = 0x80;

/// Mask for the kind bits of an export trie terminal's flags.
pub const EXPORT_SYMBOL_FLAGS_KIND_MASK: u64 = 0x03;
/// Export is a re-export from a dependent library.
pub const EXPORT_SYMBOL_FLAGS_REEXPORT: u64 = 0x08;
/// Export carries a stub offset and a resolver offset.
pub const EXPORT_SYMBOL_FLAGS_STUB_AND_RESOLVER: u64 = 0x10;

/// Mask clearing the Swift/isRealized flag bits of a class `data` pointer and
/// the small-flag bits of an arm64e method `imp`.
pub const OBJC_POINTER_FLAG_MASK: u64 = 0x3;
/// Mask for the entry size of a method list header; the remaining bits are
/// list flags (relative methods, direct selectors).
pub const OBJC_METHOD_LIST_ENTSIZE_MASK: u32 = 0x0000_fffc;

/// The 32-bit Mach header.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pread, Pwrite, SizeWith)]
pub struct MachHeader {
    pub magic: u32,
    pub cputype: u32,
    pub cpusubtype: u32,
    pub filetype: u32,
    pub ncmds: u32,
    pub sizeofcmds: u32,
    pub flags: u32,
}

/// The 64-bit Mach header.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pread, Pwrite, SizeWith)]
pub struct MachHeader64 {
    pub magic: u32,
    pub cputype: u32,
    pub cpusubtype: u32,
    pub filetype: u32,
    pub ncmds: u32,
    pub sizeofcmds: u32,
    pub flags: u32,
    pub reserved: u32,
}

/// The fat container header. Stored big-endian on disk.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pread, Pwrite, SizeWith)]
pub struct FatHeader {
    pub magic: u32,
    pub nfat_arch: u32,
}

/// One fat slice descriptor. Stored big-endian on disk.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pread, Pwrite, SizeWith)]
pub struct FatArch {
    pub cputype: u32,
    pub cpusubtype: u32,
    pub offset: u32,
    pub size: u32,
    pub align: u32,
}

/// The common prefix of every load command.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pread, Pwrite, SizeWith)]
pub struct LoadCommandHeader {
    pub cmd: u32,
    pub cmdsize: u32,
}

/// `LC_SEGMENT`.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pread, Pwrite, SizeWith)]
pub struct SegmentCommand {
    pub cmd: u32,
    pub cmdsize: u32,
    pub segname: [u8; 16],
    pub vmaddr: u32,
    pub vmsize: u32,
    pub fileoff: u32,
    pub filesize: u32,
    pub maxprot: u32,
    pub initprot: u32,
    pub nsects: u32,
    pub flags: u32,
}

/// `LC_SEGMENT_64`.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pread, Pwrite, SizeWith)]
pub struct SegmentCommand64 {
    pub cmd: u32,
    pub cmdsize: u32,
    pub segname: [u8; 16],
    pub vmaddr: u64,
    pub vmsize: u64,
    pub fileoff: u64,
    pub filesize: u64,
    pub maxprot: u32,
    pub initprot: u32,
    pub nsects: u32,
    pub flags: u32,
}

/// A 32-bit section header, following its segment command.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pread, Pwrite, SizeWith)]
pub struct SectionHeader {
    pub sectname: [u8; 16],
    pub segname: [u8; 16],
    pub addr: u32,
    pub size: u32,
    pub offset: u32,
    pub align: u32,
    pub reloff: u32,
    pub nreloc: u32,
    pub flags: u32,
    pub reserved1: u32,
    pub reserved2: u32,
}

/// A 64-bit section header, following its segment command.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pread, Pwrite, SizeWith)]
pub struct SectionHeader64 {
    pub sectname: [u8; 16],
    pub segname: [u8; 16],
    pub addr: u64,
    pub size: u64,
    pub offset: u32,
    pub align: u32,
    pub reloff: u32,
    pub nreloc: u32,
    pub flags: u32,
    pub reserved1: u32,
    pub reserved2: u32,
    pub reserved3: u32,
}

/// `LC_SYMTAB`.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pread, Pwrite, SizeWith)]
pub struct SymtabCommand {
    pub cmd: u32,
    pub cmdsize: u32,
    pub symoff: u32,
    pub nsyms: u32,
    pub stroff: u32,
    pub strsize: u32,
}

/// `LC_DYSYMTAB`.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pread, Pwrite, SizeWith)]
pub struct DysymtabCommand {
    pub cmd: u32,
    pub cmdsize: u32,
    pub ilocalsym: u32,
    pub nlocalsym: u32,
    pub iextdefsym: u32,
    pub nextdefsym: u32,
    pub iundefsym: u32,
    pub nundefsym: u32,
    pub tocoff: u32,
    pub ntoc: u32,
    pub modtaboff: u32,
    pub nmodtab: u32,
    pub extrefsymoff: u32,
    pub nextrefsyms: u32,
    pub indirectsymoff: u32,
    pub nindirectsyms: u32,
    pub extreloff: u32,
    pub nextrel: u32,
    pub locreloff: u32,
    pub nlocrel: u32,
}

/// `LC_LOAD_DYLIB` and variants. The install name is a load-command-relative
/// string offset.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pread, Pwrite, SizeWith)]
pub struct DylibCommand {
    pub cmd: u32,
    pub cmdsize: u32,
    pub name_offset: u32,
    pub timestamp: u32,
    pub current_version: u32,
    pub compatibility_version: u32,
}

/// `LC_DYLD_INFO[_ONLY]`.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pread, Pwrite, SizeWith)]
pub struct DyldInfoCommand {
    pub cmd: u32,
    pub cmdsize: u32,
    pub rebase_off: u32,
    pub rebase_size: u32,
    pub bind_off: u32,
    pub bind_size: u32,
    pub weak_bind_off: u32,
    pub weak_bind_size: u32,
    pub lazy_bind_off: u32,
    pub lazy_bind_size: u32,
    pub export_off: u32,
    pub export_size: u32,
}

/// `LC_MAIN`. `entryoff` is a file offset into the `__TEXT` segment.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pread, Pwrite, SizeWith)]
pub struct EntryPointCommand {
    pub cmd: u32,
    pub cmdsize: u32,
    pub entryoff: u64,
    pub stacksize: u64,
}

/// A 32-bit symbol table entry.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pread, Pwrite, SizeWith)]
pub struct Nlist {
    pub n_strx: u32,
    pub n_type: u8,
    pub n_sect: u8,
    pub n_desc: u16,
    pub n_value: u32,
}

/// A 64-bit symbol table entry.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pread, Pwrite, SizeWith)]
pub struct Nlist64 {
    pub n_strx: u32,
    pub n_type: u8,
    pub n_sect: u8,
    pub n_desc: u16,
    pub n_value: u64,
}

/// A 64-bit `__objc_class` structure, pointed to by `__objc_classlist`.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pread, Pwrite, SizeWith)]
pub struct ObjcClassRaw64 {
    pub metaclass: u64,
    pub superclass: u64,
    pub cache: u64,
    pub vtable: u64,
    /// Pointer to the class's `__objc_data`; the low two bits are flags.
    pub data: u64,
}

/// A 32-bit `__objc_class` structure.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pread, Pwrite, SizeWith)]
pub struct ObjcClassRaw {
    pub metaclass: u32,
    pub superclass: u32,
    pub cache: u32,
    pub vtable: u32,
    pub data: u32,
}

/// The prefix of a 64-bit `__objc_data` (`class_ro_t`) structure. Fields past
/// `base_methods` exist on disk but are not consumed.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pread, Pwrite, SizeWith)]
pub struct ObjcDataRaw64 {
    pub flags: u32,
    pub instance_start: u32,
    pub instance_size: u32,
    pub reserved: u32,
    pub ivar_layout: u64,
    pub name: u64,
    pub base_methods: u64,
}

/// The prefix of a 32-bit `__objc_data` structure.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pread, Pwrite, SizeWith)]
pub struct ObjcDataRaw {
    pub flags: u32,
    pub instance_start: u32,
    pub instance_size: u32,
    pub ivar_layout: u32,
    pub name: u32,
    pub base_methods: u32,
}

/// The header of an ObjC method list.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pread, Pwrite, SizeWith)]
pub struct ObjcMethodListRaw {
    /// Entry size in the low bits, list flags in the remaining bits.
    pub entsize_and_flags: u32,
    pub count: u32,
}

impl ObjcMethodListRaw {
    /// The size of one method entry in bytes, with the flag bits cleared.
    pub fn entsize(&self) -> u32 {
        self.entsize_and_flags & OBJC_METHOD_LIST_ENTSIZE_MASK
    }
}

/// A 64-bit ObjC method entry: selector name pointer, type encoding pointer
/// and implementation address.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pread, Pwrite, SizeWith)]
pub struct ObjcMethodRaw64 {
    pub name: u64,
    pub types: u64,
    /// Implementation address; the low two bits are flag storage on arm64e.
    pub imp: u64,
}

/// A 32-bit ObjC method entry.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pread, Pwrite, SizeWith)]
pub struct ObjcMethodRaw {
    pub name: u32,
    pub types: u32,
    pub imp: u32,
}

/// Returns the name stored in a fixed-size `segname`/`sectname` field,
/// truncated at the first NUL.
pub fn name_from_field(field: &[u8; 16]) -> &str {
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    std::str::from_utf8(&field[..end]).unwrap_or("")
}

#[cfg(test)]
mod tests {
    use super::*;
    use scroll::ctx::SizeWith;
    use scroll::LE;
    use similar_asserts::assert_eq;

    #[test]
    fn test_struct_sizes() {
        assert_eq!(MachHeader64::size_with(&LE), 32);
        assert_eq!(MachHeader::size_with(&LE), 28);
        assert_eq!(SegmentCommand64::size_with(&LE), 72);
        assert_eq!(SectionHeader64::size_with(&LE), 80);
        assert_eq!(Nlist64::size_with(&LE), 16);
        assert_eq!(ObjcClassRaw64::size_with(&LE), 40);
        assert_eq!(ObjcMethodRaw64::size_with(&LE), 24);
    }

    #[test]
    fn test_name_from_field() {
        let mut field = [0u8; 16];
        field[..6].copy_from_slice(b"__TEXT");
        assert_eq!(name_from_field(&field), "__TEXT");

        let full = *b"__sixteen_chars_";
        assert_eq!(name_from_field(&full), "__sixteen_chars_");
    }

    #[test]
    fn test_methlist_entsize() {
        let list = ObjcMethodListRaw {
            entsize_and_flags: 24 | 0x8000_0000,
            count: 2,
        };
        assert_eq!(list.entsize(), 24);
    }
}
