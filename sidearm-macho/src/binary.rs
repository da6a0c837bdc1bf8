//! Parsing of a single Mach-O image: header, load commands, segments and
//! sections, symbol tables, dylib commands and dyld-info ranges, plus the
//! virtual↔file address translation every other component builds on.

use std::fmt;

use scroll::ctx::SizeWith;
use scroll::{Endian, Pread};

use sidearm_common::{Arch, CpuFamily, FileOffset, VirtualAddress};

use crate::error::{MachErrorKind, Result};
use crate::raw;

/// A segment loaded by `LC_SEGMENT[_64]`.
#[derive(Clone, Debug)]
pub struct Segment {
    /// Segment name, e.g. `__TEXT`.
    pub name: String,
    /// Start of the segment's virtual memory range.
    pub vmaddr: VirtualAddress,
    /// Size of the virtual memory range in bytes.
    pub vmsize: u64,
    /// Start of the segment's file range.
    pub fileoff: FileOffset,
    /// Size of the file range in bytes.
    pub filesize: u64,
    /// Maximum virtual memory protection.
    pub maxprot: u32,
    /// Initial virtual memory protection.
    pub initprot: u32,
}

impl Segment {
    /// Whether the given virtual address falls into this segment's VM range.
    pub fn contains_address(&self, addr: VirtualAddress) -> bool {
        addr >= self.vmaddr && addr.get() < self.vmaddr.get() + self.vmsize
    }

    /// Whether the given file offset falls into this segment's file range.
    pub fn contains_offset(&self, offset: FileOffset) -> bool {
        offset >= self.fileoff && offset.get() < self.fileoff.get() + self.filesize
    }
}

/// A section within a segment.
#[derive(Clone, Debug)]
pub struct Section {
    /// Section name, e.g. `__objc_selrefs`.
    pub name: String,
    /// Name of the containing segment.
    pub segment_name: String,
    /// Virtual address of the section start.
    pub addr: VirtualAddress,
    /// Section size in bytes.
    pub size: u64,
    /// File offset of the section contents.
    pub offset: u32,
    /// Section type and attribute flags.
    pub flags: u32,
    /// Type-specific field; for stub and symbol-pointer sections this is the
    /// base index into the indirect symbol table.
    pub reserved1: u32,
    /// Type-specific field; for stub sections this is the stub entry size.
    pub reserved2: u32,
}

impl Section {
    /// Exclusive end address of the section.
    pub fn end_address(&self) -> VirtualAddress {
        self.addr + self.size
    }

    /// Whether the given virtual address falls into this section.
    pub fn contains_address(&self, addr: VirtualAddress) -> bool {
        addr >= self.addr && addr < self.end_address()
    }

    /// The section type from the flags field.
    pub fn section_type(&self) -> u32 {
        self.flags & raw::SECTION_TYPE
    }

    /// Whether this section is flagged as containing machine instructions.
    pub fn is_code(&self) -> bool {
        self.flags & (raw::S_ATTR_PURE_INSTRUCTIONS | raw::S_ATTR_SOME_INSTRUCTIONS) != 0
    }
}

/// A unified 32/64-bit symbol table entry.
#[derive(Clone, Copy, Debug)]
pub struct SymtabEntry {
    /// Offset of the symbol name in the string table.
    pub strx: u32,
    /// Type bits (`N_STAB`/`N_TYPE`/`N_EXT`).
    pub n_type: u8,
    /// 1-based section ordinal, or `NO_SECT`.
    pub n_sect: u8,
    /// Description bits; for undefined symbols the high byte holds the
    /// 1-based library ordinal.
    pub n_desc: u16,
    /// Symbol value; an address for defined symbols.
    pub value: u64,
}

impl SymtabEntry {
    /// Whether this entry is a debugging (stab) entry.
    pub fn is_stab(&self) -> bool {
        self.n_type & raw::N_STAB != 0
    }

    /// Whether this entry is defined in a section.
    pub fn is_defined_in_section(&self) -> bool {
        !self.is_stab() && self.n_type & raw::N_TYPE == raw::N_SECT && self.n_sect != raw::NO_SECT
    }

    /// The 1-based dylib ordinal for undefined symbols.
    pub fn library_ordinal(&self) -> u8 {
        ((self.n_desc >> 8) & 0xff) as u8
    }
}

/// A parsed Mach-O image.
///
/// Borrows the image bytes for its lifetime; all virtual↔file translation and
/// typed reads of other components go through this type. Construction fails
/// with [`MachErrorKind::MalformedHeader`] for non-Mach-O input (including
/// fat containers, which are handled by
/// [`MachArchive`](crate::MachArchive)), [`MachErrorKind::TruncatedLoadCommand`]
/// for load commands escaping their region, and
/// [`MachErrorKind::InconsistentSegment`] for segments escaping the buffer.
pub struct MachBinary<'d> {
    data: &'d [u8],
    endian: Endian,
    is_64: bool,
    cputype: u32,
    cpusubtype: u32,
    filetype: u32,
    header_flags: u32,
    virtual_base: VirtualAddress,
    segments: Vec<Segment>,
    sections: Vec<Section>,
    symtab: Option<raw::SymtabCommand>,
    dysymtab: Option<raw::DysymtabCommand>,
    dyld_info: Option<raw::DyldInfoCommand>,
    dylibs: Vec<String>,
    entry_offset: Option<u64>,
}

impl<'d> MachBinary<'d> {
    /// Tests whether the buffer looks like a thin Mach-O image.
    pub fn test(data: &[u8]) -> bool {
        matches!(
            data.pread_with::<u32>(0, scroll::LE),
            Ok(raw::MH_MAGIC | raw::MH_CIGAM | raw::MH_MAGIC_64 | raw::MH_CIGAM_64)
        )
    }

    /// Parses a thin Mach-O image from the given buffer.
    pub fn parse(data: &'d [u8]) -> Result<Self> {
        let magic: u32 = data
            .pread_with(0, scroll::LE)
            .map_err(|e| MachErrorKind::MalformedHeader.with_source(e))?;

        let (is_64, endian) = match magic {
            raw::MH_MAGIC_64 => (true, scroll::LE),
            raw::MH_CIGAM_64 => (true, scroll::BE),
            raw::MH_MAGIC => (false, scroll::LE),
            raw::MH_CIGAM => (false, scroll::BE),
            _ => return Err(MachErrorKind::MalformedHeader.into()),
        };

        let mut binary = if is_64 {
            let header: raw::MachHeader64 = data
                .pread_with(0, endian)
                .map_err(|e| MachErrorKind::MalformedHeader.with_source(e))?;
            MachBinary {
                data,
                endian,
                is_64,
                cputype: header.cputype,
                cpusubtype: header.cpusubtype,
                filetype: header.filetype,
                header_flags: header.flags,
                virtual_base: VirtualAddress(0),
                segments: Vec::new(),
                sections: Vec::new(),
                symtab: None,
                dysymtab: None,
                dyld_info: None,
                dylibs: Vec::new(),
                entry_offset: None,
            }
        } else {
            let header: raw::MachHeader = data
                .pread_with(0, endian)
                .map_err(|e| MachErrorKind::MalformedHeader.with_source(e))?;
            MachBinary {
                data,
                endian,
                is_64,
                cputype: header.cputype,
                cpusubtype: header.cpusubtype,
                filetype: header.filetype,
                header_flags: header.flags,
                virtual_base: VirtualAddress(0),
                segments: Vec::new(),
                sections: Vec::new(),
                symtab: None,
                dysymtab: None,
                dyld_info: None,
                dylibs: Vec::new(),
                entry_offset: None,
            }
        };

        binary.parse_load_commands()?;
        binary.virtual_base = binary.find_virtual_base();
        Ok(binary)
    }

    fn header_size(&self) -> usize {
        if self.is_64 {
            raw::MachHeader64::size_with(&self.endian)
        } else {
            raw::MachHeader::size_with(&self.endian)
        }
    }

    fn parse_load_commands(&mut self) -> Result<()> {
        let (ncmds, sizeofcmds) = {
            let off = 4 + 4 * 3; // magic, cputype, cpusubtype, filetype
            let ncmds: u32 = self
                .data
                .pread_with(off, self.endian)
                .map_err(|e| MachErrorKind::MalformedHeader.with_source(e))?;
            let sizeofcmds: u32 = self
                .data
                .pread_with(off + 4, self.endian)
                .map_err(|e| MachErrorKind::MalformedHeader.with_source(e))?;
            (ncmds, sizeofcmds)
        };

        let commands_end = self.header_size() + sizeofcmds as usize;
        let mut offset = self.header_size();

        for _ in 0..ncmds {
            let lc: raw::LoadCommandHeader = self
                .data
                .pread_with(offset, self.endian)
                .map_err(|e| MachErrorKind::TruncatedLoadCommand.with_source(e))?;

            let cmdsize = lc.cmdsize as usize;
            if cmdsize < raw::LoadCommandHeader::size_with(&self.endian)
                || offset + cmdsize > commands_end
            {
                return Err(MachErrorKind::TruncatedLoadCommand.into());
            }

            match lc.cmd {
                raw::LC_SEGMENT => self.parse_segment32(offset)?,
                raw::LC_SEGMENT_64 => self.parse_segment64(offset)?,
                raw::LC_SYMTAB => {
                    self.symtab = Some(
                        self.data
                            .pread_with(offset, self.endian)
                            .map_err(|e| MachErrorKind::TruncatedLoadCommand.with_source(e))?,
                    );
                }
                raw::LC_DYSYMTAB => {
                    self.dysymtab = Some(
                        self.data
                            .pread_with(offset, self.endian)
                            .map_err(|e| MachErrorKind::TruncatedLoadCommand.with_source(e))?,
                    );
                }
                raw::LC_DYLD_INFO | raw::LC_DYLD_INFO_ONLY => {
                    self.dyld_info = Some(
                        self.data
                            .pread_with(offset, self.endian)
                            .map_err(|e| MachErrorKind::TruncatedLoadCommand.with_source(e))?,
                    );
                }
                raw::LC_LOAD_DYLIB | raw::LC_LOAD_WEAK_DYLIB | raw::LC_REEXPORT_DYLIB => {
                    let dylib: raw::DylibCommand = self
                        .data
                        .pread_with(offset, self.endian)
                        .map_err(|e| MachErrorKind::TruncatedLoadCommand.with_source(e))?;

                    let name_off = offset + dylib.name_offset as usize;
                    if name_off >= offset + cmdsize {
                        return Err(MachErrorKind::TruncatedLoadCommand.into());
                    }
                    let name: &str = self
                        .data
                        .pread(name_off)
                        .map_err(|e| MachErrorKind::TruncatedLoadCommand.with_source(e))?;
                    self.dylibs.push(name.to_string());
                }
                raw::LC_MAIN => {
                    let entry: raw::EntryPointCommand = self
                        .data
                        .pread_with(offset, self.endian)
                        .map_err(|e| MachErrorKind::TruncatedLoadCommand.with_source(e))?;
                    self.entry_offset = Some(entry.entryoff);
                }
                _ => {}
            }

            offset += cmdsize;
        }

        Ok(())
    }

    fn parse_segment32(&mut self, offset: usize) -> Result<()> {
        let seg: raw::SegmentCommand = self
            .data
            .pread_with(offset, self.endian)
            .map_err(|e| MachErrorKind::TruncatedLoadCommand.with_source(e))?;

        self.push_segment(
            raw::name_from_field(&seg.segname).to_string(),
            seg.vmaddr as u64,
            seg.vmsize as u64,
            seg.fileoff as u64,
            seg.filesize as u64,
            seg.maxprot,
            seg.initprot,
        )?;

        let mut section_off = offset + raw::SegmentCommand::size_with(&self.endian);
        for _ in 0..seg.nsects {
            let sect: raw::SectionHeader = self
                .data
                .pread_with(section_off, self.endian)
                .map_err(|e| MachErrorKind::TruncatedLoadCommand.with_source(e))?;
            self.sections.push(Section {
                name: raw::name_from_field(&sect.sectname).to_string(),
                segment_name: raw::name_from_field(&sect.segname).to_string(),
                addr: VirtualAddress(sect.addr as u64),
                size: sect.size as u64,
                offset: sect.offset,
                flags: sect.flags,
                reserved1: sect.reserved1,
                reserved2: sect.reserved2,
            });
            section_off += raw::SectionHeader::size_with(&self.endian);
        }

        Ok(())
    }

    fn parse_segment64(&mut self, offset: usize) -> Result<()> {
        let seg: raw::SegmentCommand64 = self
            .data
            .pread_with(offset, self.endian)
            .map_err(|e| MachErrorKind::TruncatedLoadCommand.with_source(e))?;

        self.push_segment(
            raw::name_from_field(&seg.segname).to_string(),
            seg.vmaddr,
            seg.vmsize,
            seg.fileoff,
            seg.filesize,
            seg.maxprot,
            seg.initprot,
        )?;

        let mut section_off = offset + raw::SegmentCommand64::size_with(&self.endian);
        for _ in 0..seg.nsects {
            let sect: raw::SectionHeader64 = self
                .data
                .pread_with(section_off, self.endian)
                .map_err(|e| MachErrorKind::TruncatedLoadCommand.with_source(e))?;
            self.sections.push(Section {
                name: raw::name_from_field(&sect.sectname).to_string(),
                segment_name: raw::name_from_field(&sect.segname).to_string(),
                addr: VirtualAddress(sect.addr),
                size: sect.size,
                offset: sect.offset,
                flags: sect.flags,
                reserved1: sect.reserved1,
                reserved2: sect.reserved2,
            });
            section_off += raw::SectionHeader64::size_with(&self.endian);
        }

        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn push_segment(
        &mut self,
        name: String,
        vmaddr: u64,
        vmsize: u64,
        fileoff: u64,
        filesize: u64,
        maxprot: u32,
        initprot: u32,
    ) -> Result<()> {
        if fileoff.checked_add(filesize).map_or(true, |end| {
            end > self.data.len() as u64
        }) {
            return Err(MachErrorKind::InconsistentSegment.into());
        }

        self.segments.push(Segment {
            name,
            vmaddr: VirtualAddress(vmaddr),
            vmsize,
            fileoff: FileOffset(fileoff),
            filesize,
            maxprot,
            initprot,
        });
        Ok(())
    }

    /// The VM address the image was linked at: the address of the `__TEXT`
    /// segment, or for position-independent images the segment containing the
    /// Mach header (file offset zero).
    fn find_virtual_base(&self) -> VirtualAddress {
        if self.header_flags & raw::MH_PIE != 0 {
            if let Some(seg) = self
                .segments
                .iter()
                .find(|s| s.filesize > 0 && s.fileoff.get() == 0)
            {
                return seg.vmaddr;
            }
        }
        self.segments
            .iter()
            .find(|s| s.name == "__TEXT")
            .map(|s| s.vmaddr)
            .unwrap_or(VirtualAddress(0))
    }

    /// The raw bytes of the whole image.
    pub fn data(&self) -> &'d [u8] {
        self.data
    }

    /// The byte order of the image.
    pub fn endian(&self) -> Endian {
        self.endian
    }

    /// Whether this is a 64-bit image.
    pub fn is_64(&self) -> bool {
        self.is_64
    }

    /// The pointer size in bytes.
    pub fn pointer_size(&self) -> u64 {
        if self.is_64 {
            8
        } else {
            4
        }
    }

    /// The raw Mach CPU type.
    pub fn cputype(&self) -> u32 {
        self.cputype
    }

    /// The raw Mach CPU subtype, with capability bits masked off.
    pub fn cpusubtype(&self) -> u32 {
        self.cpusubtype & raw::CPU_SUBTYPE_MASK
    }

    /// The CPU architecture of this image, as specified in the Mach header.
    pub fn arch(&self) -> Arch {
        match (self.cputype(), self.cpusubtype()) {
            (raw::CPU_TYPE_X86, _) => Arch::X86,
            (raw::CPU_TYPE_X86_64, _) => Arch::Amd64,
            (raw::CPU_TYPE_ARM64, raw::CPU_SUBTYPE_ARM64_ALL) => Arch::Arm64,
            (raw::CPU_TYPE_ARM64, raw::CPU_SUBTYPE_ARM64_V8) => Arch::Arm64V8,
            (raw::CPU_TYPE_ARM64, raw::CPU_SUBTYPE_ARM64E) => Arch::Arm64e,
            (raw::CPU_TYPE_ARM64, _) => Arch::Arm64Unknown,
            (raw::CPU_TYPE_ARM64_32, _) => Arch::Arm64_32,
            (raw::CPU_TYPE_ARM, _) => Arch::Arm,
            (_, _) => Arch::Unknown,
        }
    }

    /// The CPU family of this image.
    pub fn cpu_family(&self) -> CpuFamily {
        self.arch().cpu_family()
    }

    /// The Mach file type (`MH_EXECUTE`, `MH_DYLIB`, ...).
    pub fn filetype(&self) -> u32 {
        self.filetype
    }

    /// The VM address the image was linked at.
    pub fn virtual_base(&self) -> VirtualAddress {
        self.virtual_base
    }

    /// The segments of the image, in load command order.
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// The sections of the image, in load command order. Section ordinals in
    /// symbol table entries (`n_sect`) are 1-based indexes into this list.
    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    /// Looks up a section by name, e.g. `__objc_selrefs`.
    ///
    /// If multiple segments carry a section of the same name, a qualified
    /// `__TEXT,__text` style name picks the one in the named segment.
    pub fn section_by_name(&self, name: &str) -> Option<&Section> {
        if let Some((segment, section)) = name.split_once(',') {
            return self
                .sections
                .iter()
                .find(|s| s.segment_name == segment && s.name == section);
        }
        self.sections.iter().find(|s| s.name == name)
    }

    /// The section with the given 1-based ordinal from a symbol's `n_sect`.
    pub fn section_by_ordinal(&self, ordinal: u8) -> Option<&Section> {
        if ordinal == raw::NO_SECT {
            return None;
        }
        self.sections.get(ordinal as usize - 1)
    }

    /// The symbol table descriptor, if an `LC_SYMTAB` was present.
    pub fn symtab(&self) -> Option<&raw::SymtabCommand> {
        self.symtab.as_ref()
    }

    /// The dynamic symbol table descriptor, if an `LC_DYSYMTAB` was present.
    pub fn dysymtab(&self) -> Option<&raw::DysymtabCommand> {
        self.dysymtab.as_ref()
    }

    /// The dyld-info ranges, if an `LC_DYLD_INFO[_ONLY]` was present.
    pub fn dyld_info(&self) -> Option<&raw::DyldInfoCommand> {
        self.dyld_info.as_ref()
    }

    /// Install names of the loaded dylibs, in load command order. Library
    /// ordinals in symbol entries and bind records are 1-based indexes into
    /// this list.
    pub fn dylibs(&self) -> &[String] {
        &self.dylibs
    }

    /// The install name of the dylib with the given 1-based ordinal.
    pub fn dylib_by_ordinal(&self, ordinal: u8) -> Option<&str> {
        if ordinal == 0 {
            return None;
        }
        self.dylibs.get(ordinal as usize - 1).map(String::as_str)
    }

    /// The image entry point from `LC_MAIN`, as a virtual address.
    pub fn entry_point(&self) -> Option<VirtualAddress> {
        let offset = FileOffset(self.entry_offset?);
        self.virtual_address_for_file_offset(offset).ok()
    }

    /// Translates a virtual address to its file offset through the segment
    /// map. Fails with [`MachErrorKind::UnmappedAddress`] for addresses
    /// outside all segments.
    pub fn file_offset_for_virtual_address(&self, addr: VirtualAddress) -> Result<FileOffset> {
        let segment = self
            .segments
            .iter()
            .find(|seg| seg.filesize > 0 && seg.contains_address(addr))
            .ok_or(MachErrorKind::UnmappedAddress(addr))?;
        Ok(segment.fileoff + (addr - segment.vmaddr))
    }

    /// Translates a file offset to its virtual address through the segment
    /// map. Fails with [`MachErrorKind::UnmappedOffset`] for offsets outside
    /// all segments.
    pub fn virtual_address_for_file_offset(&self, offset: FileOffset) -> Result<VirtualAddress> {
        let segment = self
            .segments
            .iter()
            .find(|seg| seg.contains_offset(offset))
            .ok_or(MachErrorKind::UnmappedOffset(offset))?;
        Ok(segment.vmaddr + (offset - segment.fileoff))
    }

    /// Returns `len` bytes of image content at a virtual address.
    pub fn bytes_at(&self, addr: VirtualAddress, len: u64) -> Result<&'d [u8]> {
        let offset = self.file_offset_for_virtual_address(addr)?;
        self.bytes_at_offset(offset, len)
    }

    /// Returns `len` bytes of image content at a file offset.
    pub fn bytes_at_offset(&self, offset: FileOffset, len: u64) -> Result<&'d [u8]> {
        let start = offset.as_usize();
        let end = start
            .checked_add(len as usize)
            .filter(|&end| end <= self.data.len())
            .ok_or(MachErrorKind::UnmappedOffset(offset))?;
        Ok(&self.data[start..end])
    }

    /// Reads a typed structure at a virtual address.
    pub fn read_at<T>(&self, addr: VirtualAddress) -> Result<T>
    where
        T: scroll::ctx::TryFromCtx<'d, Endian, [u8], Error = scroll::Error>,
    {
        let offset = self.file_offset_for_virtual_address(addr)?;
        self.read_at_offset(offset)
    }

    /// Reads a typed structure at a file offset.
    pub fn read_at_offset<T>(&self, offset: FileOffset) -> Result<T>
    where
        T: scroll::ctx::TryFromCtx<'d, Endian, [u8], Error = scroll::Error>,
    {
        self.data
            .pread_with(offset.as_usize(), self.endian)
            .map_err(|e| MachErrorKind::UnmappedOffset(offset).with_source(e))
    }

    /// Reads a pointer-sized word at a virtual address, widened to `u64`.
    pub fn read_word(&self, addr: VirtualAddress) -> Result<u64> {
        if self.is_64 {
            self.read_at::<u64>(addr)
        } else {
            self.read_at::<u32>(addr).map(u64::from)
        }
    }

    /// Reads the NUL-terminated string starting at a virtual address.
    ///
    /// Fails with [`MachErrorKind::MalformedString`] when the string runs off
    /// the mapped image or is not valid UTF-8. Empty strings are valid.
    pub fn cstr_at(&self, addr: VirtualAddress) -> Result<&'d str> {
        let offset = self.file_offset_for_virtual_address(addr)?;
        self.cstr_at_offset(offset)
    }

    /// Reads the NUL-terminated string starting at a file offset.
    pub fn cstr_at_offset(&self, offset: FileOffset) -> Result<&'d str> {
        if offset.as_usize() >= self.data.len() {
            return Err(MachErrorKind::MalformedString.into());
        }
        self.data
            .pread(offset.as_usize())
            .map_err(|e| MachErrorKind::MalformedString.with_source(e))
    }

    /// The unified symbol table entries, in table order.
    pub fn symtab_entries(&self) -> Result<Vec<SymtabEntry>> {
        let Some(symtab) = self.symtab else {
            return Ok(Vec::new());
        };

        // The count is untrusted; cap the pre-allocation.
        let mut entries = Vec::with_capacity(symtab.nsyms.min(4096) as usize);
        let mut offset = symtab.symoff as usize;
        for _ in 0..symtab.nsyms {
            let entry = if self.is_64 {
                let nlist: raw::Nlist64 = self
                    .data
                    .gread_with(&mut offset, self.endian)
                    .map_err(|e| MachErrorKind::UnmappedOffset(FileOffset(offset as u64)).with_source(e))?;
                SymtabEntry {
                    strx: nlist.n_strx,
                    n_type: nlist.n_type,
                    n_sect: nlist.n_sect,
                    n_desc: nlist.n_desc,
                    value: nlist.n_value,
                }
            } else {
                let nlist: raw::Nlist = self
                    .data
                    .gread_with(&mut offset, self.endian)
                    .map_err(|e| MachErrorKind::UnmappedOffset(FileOffset(offset as u64)).with_source(e))?;
                SymtabEntry {
                    strx: nlist.n_strx,
                    n_type: nlist.n_type,
                    n_sect: nlist.n_sect,
                    n_desc: nlist.n_desc,
                    value: nlist.n_value as u64,
                }
            };
            entries.push(entry);
        }
        Ok(entries)
    }

    /// The name of a symbol table entry, from the string table.
    pub fn symbol_name(&self, entry: &SymtabEntry) -> Result<&'d str> {
        let symtab = self.symtab.ok_or(MachErrorKind::MalformedString)?;
        self.cstr_at_offset(FileOffset(symtab.stroff as u64 + entry.strx as u64))
    }

    /// The indirect symbol table: symbol-table indexes for the entries of
    /// stub and symbol-pointer sections.
    pub fn indirect_symbols(&self) -> Result<Vec<u32>> {
        let Some(dysymtab) = self.dysymtab else {
            return Ok(Vec::new());
        };

        let mut entries = Vec::with_capacity(dysymtab.nindirectsyms.min(4096) as usize);
        let mut offset = dysymtab.indirectsymoff as usize;
        for _ in 0..dysymtab.nindirectsyms {
            let value: u32 = self
                .data
                .gread_with(&mut offset, self.endian)
                .map_err(|e| MachErrorKind::UnmappedOffset(FileOffset(offset as u64)).with_source(e))?;
            entries.push(value);
        }
        Ok(entries)
    }
}

impl fmt::Debug for MachBinary<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MachBinary")
            .field("arch", &self.arch())
            .field("filetype", &self.filetype)
            .field("virtual_base", &self.virtual_base)
            .field("segments", &self.segments.len())
            .field("sections", &self.sections.len())
            .field("dylibs", &self.dylibs.len())
            .finish()
    }
}
