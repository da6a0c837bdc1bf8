//! Decoding of the compressed dyld information: the bind and lazy-bind
//! opcode streams, the rebase stream, and the export trie.
//!
//! The bind decoders are strict state machines over the ULEB/SLEB encoded
//! streams described by `LC_DYLD_INFO[_ONLY]`. Their output is the ground
//! truth for what an imported pointer slot will hold at runtime.

use std::collections::BTreeMap;

use scroll::{Pread, Sleb128, Uleb128};

use sidearm_common::VirtualAddress;

use crate::binary::MachBinary;
use crate::error::{MachErrorKind, Result};
use crate::raw;

/// One record decoded from a bind or lazy-bind stream: dyld will store the
/// address of `symbol_name` (resolved in the dylib with `library_ordinal`)
/// at `address`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BindRecord {
    /// The pointer slot populated by dyld.
    pub address: VirtualAddress,
    /// 1-based dylib ordinal; zero or negative values are the special
    /// self/main-executable/flat-lookup ordinals.
    pub library_ordinal: i16,
    /// The imported symbol name.
    pub symbol_name: String,
    /// Value added to the resolved address.
    pub addend: i64,
    /// The bind type (`BIND_TYPE_POINTER` for all pointer slots).
    pub bind_type: u8,
    /// Whether the import is weak.
    pub weak: bool,
    /// Whether the record came from the lazy-bind stream.
    pub lazy: bool,
}

/// One record decoded from the rebase stream: the pointer at `address` is
/// slid by the image's load delta at launch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RebaseRecord {
    /// The rebased pointer slot.
    pub address: VirtualAddress,
    /// The rebase type.
    pub rebase_type: u8,
}

/// One exported symbol from the export trie.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExportRecord {
    /// The exported symbol name.
    pub name: String,
    /// The symbol's virtual address.
    pub address: VirtualAddress,
    /// The raw export flags.
    pub flags: u64,
}

/// The fully decoded dyld information of one image.
#[derive(Clone, Debug, Default)]
pub struct DyldInfo {
    /// Bind records from the bind and lazy-bind streams, in stream order.
    pub binds: Vec<BindRecord>,
    /// Rebase records, in stream order.
    pub rebases: Vec<RebaseRecord>,
    /// Exported symbols, in trie order.
    pub exports: Vec<ExportRecord>,
}

impl DyldInfo {
    /// Decodes all dyld information of the given binary. An image without
    /// `LC_DYLD_INFO` yields empty tables.
    pub fn parse(binary: &MachBinary<'_>) -> Result<Self> {
        let Some(command) = binary.dyld_info().copied() else {
            return Ok(DyldInfo::default());
        };

        let mut info = DyldInfo::default();

        let bind = stream(binary, command.bind_off, command.bind_size)?;
        run_bind_machine(bind, binary, false, &mut info.binds)?;

        let lazy_bind = stream(binary, command.lazy_bind_off, command.lazy_bind_size)?;
        run_bind_machine(lazy_bind, binary, true, &mut info.binds)?;

        let rebase = stream(binary, command.rebase_off, command.rebase_size)?;
        run_rebase_machine(rebase, binary, &mut info.rebases)?;

        let export = stream(binary, command.export_off, command.export_size)?;
        walk_export_trie(export, binary, &mut info.exports)?;

        Ok(info)
    }

    /// The dyld-bound pointer slot index: `{pointer address → record}`.
    pub fn bound_slots(&self) -> BTreeMap<VirtualAddress, &BindRecord> {
        self.binds
            .iter()
            .map(|record| (record.address, record))
            .collect()
    }
}

fn stream<'d>(binary: &MachBinary<'d>, off: u32, size: u32) -> Result<&'d [u8]> {
    if size == 0 {
        return Ok(&[]);
    }
    binary.bytes_at_offset(sidearm_common::FileOffset(off as u64), size as u64)
}

/// The mutable state of the bind state machine.
struct BindState {
    segment_index: u8,
    segment_offset: u64,
    library_ordinal: i16,
    symbol_name: String,
    symbol_flags: u8,
    addend: i64,
    bind_type: u8,
}

impl BindState {
    fn new(lazy: bool) -> Self {
        BindState {
            segment_index: 0,
            segment_offset: 0,
            library_ordinal: 0,
            symbol_name: String::new(),
            symbol_flags: 0,
            addend: 0,
            // The lazy stream leaves the type implicit.
            bind_type: if lazy { raw::BIND_TYPE_POINTER } else { 0 },
        }
    }

    /// The virtual address of the current pointer slot, bounds-checked
    /// against its segment the way dyld does.
    fn slot_address(&self, binary: &MachBinary<'_>) -> Result<VirtualAddress> {
        let segment = binary
            .segments()
            .get(self.segment_index as usize)
            .ok_or(MachErrorKind::BindOverflow)?;
        if self.segment_offset >= segment.vmsize {
            return Err(MachErrorKind::BindOverflow.into());
        }
        Ok(segment.vmaddr + self.segment_offset)
    }

    fn emit(&self, binary: &MachBinary<'_>, lazy: bool, out: &mut Vec<BindRecord>) -> Result<()> {
        out.push(BindRecord {
            address: self.slot_address(binary)?,
            library_ordinal: self.library_ordinal,
            symbol_name: self.symbol_name.clone(),
            addend: self.addend,
            bind_type: self.bind_type,
            weak: self.symbol_flags & raw::BIND_SYMBOL_FLAGS_WEAK_IMPORT != 0,
            lazy,
        });
        Ok(())
    }
}

fn read_uleb(data: &[u8], offset: &mut usize) -> Result<u64> {
    Uleb128::read(data, offset).map_err(|e| MachErrorKind::BindOverflow.with_source(e))
}

fn read_sleb(data: &[u8], offset: &mut usize) -> Result<i64> {
    Sleb128::read(data, offset).map_err(|e| MachErrorKind::BindOverflow.with_source(e))
}

fn run_bind_machine(
    data: &[u8],
    binary: &MachBinary<'_>,
    lazy: bool,
    out: &mut Vec<BindRecord>,
) -> Result<()> {
    let pointer_size = binary.pointer_size();
    let mut state = BindState::new(lazy);
    let mut offset = 0;

    while offset < data.len() {
        let byte: u8 = data
            .gread(&mut offset)
            .map_err(|e| MachErrorKind::BindOverflow.with_source(e))?;
        let opcode = byte & raw::BIND_OPCODE_MASK;
        let immediate = byte & raw::BIND_IMMEDIATE_MASK;

        match opcode {
            raw::BIND_OPCODE_DONE => {
                // The lazy stream uses DONE as a record separator; the
                // non-lazy stream ends with it.
                state = BindState::new(lazy);
                if !lazy {
                    break;
                }
            }
            raw::BIND_OPCODE_SET_DYLIB_ORDINAL_IMM => {
                state.library_ordinal = immediate as i16;
            }
            raw::BIND_OPCODE_SET_DYLIB_ORDINAL_ULEB => {
                state.library_ordinal = read_uleb(data, &mut offset)? as i16;
            }
            raw::BIND_OPCODE_SET_DYLIB_SPECIAL_IMM => {
                // Special ordinals are the sign-extended immediate:
                // 0 = self, -1 = main executable, -2 = flat lookup.
                state.library_ordinal = if immediate == 0 {
                    0
                } else {
                    (immediate | raw::BIND_OPCODE_MASK) as i8 as i16
                };
            }
            raw::BIND_OPCODE_SET_SYMBOL_TRAILING_FLAGS_IMM => {
                let name: &str = data
                    .pread(offset)
                    .map_err(|e| MachErrorKind::BindOverflow.with_source(e))?;
                // pread does not consume the trailing NUL
                offset += name.len() + 1;
                state.symbol_name = name.to_string();
                state.symbol_flags = immediate;
            }
            raw::BIND_OPCODE_SET_TYPE_IMM => {
                state.bind_type = immediate;
            }
            raw::BIND_OPCODE_SET_ADDEND_SLEB => {
                state.addend = read_sleb(data, &mut offset)?;
            }
            raw::BIND_OPCODE_SET_SEGMENT_AND_OFFSET_ULEB => {
                state.segment_index = immediate;
                state.segment_offset = read_uleb(data, &mut offset)?;
            }
            raw::BIND_OPCODE_ADD_ADDR_ULEB => {
                let delta = read_uleb(data, &mut offset)?;
                state.segment_offset = state.segment_offset.wrapping_add(delta);
            }
            raw::BIND_OPCODE_DO_BIND => {
                state.emit(binary, lazy, out)?;
                state.segment_offset = state.segment_offset.wrapping_add(pointer_size);
            }
            raw::BIND_OPCODE_DO_BIND_ADD_ADDR_ULEB => {
                state.emit(binary, lazy, out)?;
                let delta = read_uleb(data, &mut offset)?;
                state.segment_offset = state
                    .segment_offset
                    .wrapping_add(delta)
                    .wrapping_add(pointer_size);
            }
            raw::BIND_OPCODE_DO_BIND_ADD_ADDR_IMM_SCALED => {
                state.emit(binary, lazy, out)?;
                state.segment_offset = state
                    .segment_offset
                    .wrapping_add(immediate as u64 * pointer_size)
                    .wrapping_add(pointer_size);
            }
            raw::BIND_OPCODE_DO_BIND_ULEB_TIMES_SKIPPING_ULEB => {
                let count = read_uleb(data, &mut offset)?;
                let skip = read_uleb(data, &mut offset)?;
                for _ in 0..count {
                    state.emit(binary, lazy, out)?;
                    state.segment_offset = state
                        .segment_offset
                        .wrapping_add(skip)
                        .wrapping_add(pointer_size);
                }
            }
            _ => return Err(MachErrorKind::UnknownBindOpcode(byte).into()),
        }
    }

    Ok(())
}

fn run_rebase_machine(
    data: &[u8],
    binary: &MachBinary<'_>,
    out: &mut Vec<RebaseRecord>,
) -> Result<()> {
    let pointer_size = binary.pointer_size();
    let mut segment_index = 0u8;
    let mut segment_offset = 0u64;
    let mut rebase_type = 0u8;
    let mut offset = 0;

    let slot = |segment_index: u8, segment_offset: u64| -> Result<VirtualAddress> {
        let segment = binary
            .segments()
            .get(segment_index as usize)
            .ok_or(MachErrorKind::BindOverflow)?;
        if segment_offset >= segment.vmsize {
            return Err(MachErrorKind::BindOverflow.into());
        }
        Ok(segment.vmaddr + segment_offset)
    };

    while offset < data.len() {
        let byte: u8 = data
            .gread(&mut offset)
            .map_err(|e| MachErrorKind::BindOverflow.with_source(e))?;
        let opcode = byte & raw::REBASE_OPCODE_MASK;
        let immediate = byte & raw::REBASE_IMMEDIATE_MASK;

        match opcode {
            raw::REBASE_OPCODE_DONE => break,
            raw::REBASE_OPCODE_SET_TYPE_IMM => rebase_type = immediate,
            raw::REBASE_OPCODE_SET_SEGMENT_AND_OFFSET_ULEB => {
                segment_index = immediate;
                segment_offset = read_uleb(data, &mut offset)?;
            }
            raw::REBASE_OPCODE_ADD_ADDR_ULEB => {
                segment_offset = segment_offset.wrapping_add(read_uleb(data, &mut offset)?);
            }
            raw::REBASE_OPCODE_ADD_ADDR_IMM_SCALED => {
                segment_offset = segment_offset.wrapping_add(immediate as u64 * pointer_size);
            }
            raw::REBASE_OPCODE_DO_REBASE_IMM_TIMES => {
                for _ in 0..immediate {
                    out.push(RebaseRecord {
                        address: slot(segment_index, segment_offset)?,
                        rebase_type,
                    });
                    segment_offset = segment_offset.wrapping_add(pointer_size);
                }
            }
            raw::REBASE_OPCODE_DO_REBASE_ULEB_TIMES => {
                let count = read_uleb(data, &mut offset)?;
                for _ in 0..count {
                    out.push(RebaseRecord {
                        address: slot(segment_index, segment_offset)?,
                        rebase_type,
                    });
                    segment_offset = segment_offset.wrapping_add(pointer_size);
                }
            }
            raw::REBASE_OPCODE_DO_REBASE_ADD_ADDR_ULEB => {
                out.push(RebaseRecord {
                    address: slot(segment_index, segment_offset)?,
                    rebase_type,
                });
                let delta = read_uleb(data, &mut offset)?;
                segment_offset = segment_offset
                    .wrapping_add(delta)
                    .wrapping_add(pointer_size);
            }
            raw::REBASE_OPCODE_DO_REBASE_ULEB_TIMES_SKIPPING_ULEB => {
                let count = read_uleb(data, &mut offset)?;
                let skip = read_uleb(data, &mut offset)?;
                for _ in 0..count {
                    out.push(RebaseRecord {
                        address: slot(segment_index, segment_offset)?,
                        rebase_type,
                    });
                    segment_offset = segment_offset
                        .wrapping_add(skip)
                        .wrapping_add(pointer_size);
                }
            }
            _ => return Err(MachErrorKind::UnknownBindOpcode(byte).into()),
        }
    }

    Ok(())
}

fn walk_export_trie(
    data: &[u8],
    binary: &MachBinary<'_>,
    out: &mut Vec<ExportRecord>,
) -> Result<()> {
    if data.is_empty() {
        return Ok(());
    }
    let mut visited = vec![false; data.len()];
    walk_export_node(data, binary, 0, String::new(), &mut visited, out)
}

fn walk_export_node(
    data: &[u8],
    binary: &MachBinary<'_>,
    node_offset: usize,
    prefix: String,
    visited: &mut [bool],
    out: &mut Vec<ExportRecord>,
) -> Result<()> {
    // A malformed trie can alias or cycle node offsets; each node is
    // visited at most once.
    let flag = visited
        .get_mut(node_offset)
        .ok_or(MachErrorKind::MalformedExportTrie)?;
    if std::mem::replace(flag, true) {
        return Err(MachErrorKind::MalformedExportTrie.into());
    }

    let mut offset = node_offset;
    let terminal_size = Uleb128::read(data, &mut offset)
        .map_err(|e| MachErrorKind::MalformedExportTrie.with_source(e))?;

    if terminal_size > 0 {
        let mut terminal = offset;
        let flags = Uleb128::read(data, &mut terminal)
            .map_err(|e| MachErrorKind::MalformedExportTrie.with_source(e))?;

        // Re-exports carry an ordinal and imported name instead of an
        // address; they are enumerated with address zero.
        let address = if flags & raw::EXPORT_SYMBOL_FLAGS_REEXPORT != 0 {
            VirtualAddress(0)
        } else {
            let image_offset = Uleb128::read(data, &mut terminal)
                .map_err(|e| MachErrorKind::MalformedExportTrie.with_source(e))?;
            binary.virtual_base() + image_offset
        };

        out.push(ExportRecord {
            name: prefix.clone(),
            address,
            flags,
        });
    }

    let mut offset = offset
        .checked_add(terminal_size as usize)
        .filter(|&end| end < data.len())
        .ok_or(MachErrorKind::MalformedExportTrie)?;

    let child_count: u8 = data
        .gread(&mut offset)
        .map_err(|e| MachErrorKind::MalformedExportTrie.with_source(e))?;

    for _ in 0..child_count {
        let edge: &str = data
            .pread(offset)
            .map_err(|e| MachErrorKind::MalformedExportTrie.with_source(e))?;
        // pread does not consume the trailing NUL
        offset += edge.len() + 1;
        let child_offset = Uleb128::read(data, &mut offset)
            .map_err(|e| MachErrorKind::MalformedExportTrie.with_source(e))?;

        let mut name = prefix.clone();
        name.push_str(edge);
        walk_export_node(data, binary, child_offset as usize, name, visited, out)?;
    }

    Ok(())
}
