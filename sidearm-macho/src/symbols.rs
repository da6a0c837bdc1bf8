//! The callable-symbol index: locally defined code symbols, imports, branch
//! stubs and dyld-bound pointer slots unified under one address-keyed map.

use std::collections::{BTreeMap, HashMap};

use smallvec::SmallVec;
use tracing::warn;

use sidearm_common::VirtualAddress;

use crate::binary::{MachBinary, Section};
use crate::dyld_info::DyldInfo;
use crate::error::Result;
use crate::raw;

/// The role a callable symbol plays in the image.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CallableSymbolKind {
    /// A symbol defined in a code section of this image.
    LocalDefined,
    /// An imported symbol without a local address.
    Imported,
    /// A branch stub standing in for an imported function.
    Stub,
    /// A pointer slot populated by dyld at load time.
    DyldBoundPointer,
}

/// A symbol a branch can reach: a local function, a stub, or a bound slot.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CallableSymbol {
    /// The symbol name. Stubs and bound slots carry the imported name.
    pub name: String,
    /// The symbol's address in this image.
    pub address: VirtualAddress,
    /// What the address points at.
    pub kind: CallableSymbolKind,
}

impl CallableSymbol {
    /// Whether the symbol resolves to code outside this image.
    pub fn is_imported(&self) -> bool {
        !matches!(self.kind, CallableSymbolKind::LocalDefined)
    }
}

/// One entry of the `__stubs` section, linked to the dyld-bound pointer slot
/// it dereferences and the imported symbol both resolve to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StubEntry {
    /// Address of the stub trampoline.
    pub stub_address: VirtualAddress,
    /// Address of the pointer slot the stub jumps through.
    pub destination_address: VirtualAddress,
    /// The imported symbol backing the stub.
    pub symbol_name: String,
}

/// The unified symbol indexes of one image.
#[derive(Clone, Debug, Default)]
pub struct SymbolIndex {
    imported_symbols: Vec<String>,
    dyld_bound_symbols: BTreeMap<VirtualAddress, CallableSymbol>,
    stubs: Vec<StubEntry>,
    callable_by_address: HashMap<VirtualAddress, CallableSymbol>,
    callable_by_name: HashMap<String, VirtualAddress>,
    exported_pointers_to_names: BTreeMap<VirtualAddress, String>,
    exported_names_to_pointers: BTreeMap<String, VirtualAddress>,
    local_code_symbols: Vec<CallableSymbol>,
}

impl SymbolIndex {
    /// Builds the symbol indexes from the symbol tables and the decoded dyld
    /// information.
    pub fn build(binary: &MachBinary<'_>, dyld: &DyldInfo) -> Result<Self> {
        let mut index = SymbolIndex::default();

        index.collect_imported_symbols(binary)?;
        index.collect_bound_symbols(dyld);
        index.collect_local_symbols(binary)?;
        index.collect_stubs(binary)?;
        index.collect_exports(dyld);
        index.build_callable_index();

        Ok(index)
    }

    fn collect_imported_symbols(&mut self, binary: &MachBinary<'_>) -> Result<()> {
        let Some(dysymtab) = binary.dysymtab().copied() else {
            return Ok(());
        };
        let entries = binary.symtab_entries()?;

        let start = dysymtab.iundefsym as usize;
        let end = start + dysymtab.nundefsym as usize;
        for entry in entries.get(start..end).unwrap_or(&[]) {
            match binary.symbol_name(entry) {
                Ok(name) => self.imported_symbols.push(name.to_string()),
                Err(error) => warn!(%error, "skipping import with unreadable name"),
            }
        }
        Ok(())
    }

    fn collect_bound_symbols(&mut self, dyld: &DyldInfo) {
        for record in &dyld.binds {
            self.dyld_bound_symbols.insert(
                record.address,
                CallableSymbol {
                    name: record.symbol_name.clone(),
                    address: record.address,
                    kind: CallableSymbolKind::DyldBoundPointer,
                },
            );
        }
    }

    fn collect_local_symbols(&mut self, binary: &MachBinary<'_>) -> Result<()> {
        for entry in binary.symtab_entries()? {
            if !entry.is_defined_in_section() {
                continue;
            }
            let in_code_section = binary
                .section_by_ordinal(entry.n_sect)
                .map_or(false, Section::is_code);
            if !in_code_section {
                continue;
            }

            let name = match binary.symbol_name(&entry) {
                Ok(name) => name.to_string(),
                Err(error) => {
                    warn!(%error, "skipping local symbol with unreadable name");
                    continue;
                }
            };

            self.local_code_symbols.push(CallableSymbol {
                name,
                address: VirtualAddress(entry.value),
                kind: CallableSymbolKind::LocalDefined,
            });
        }
        Ok(())
    }

    /// Pairs each stub with the pointer slot it dereferences.
    ///
    /// Stub `i` of a `S_SYMBOL_STUBS` section and entry `j` of a symbol
    /// pointer section refer into the indirect symbol table; a shared
    /// symbol-table index links the two. The pointer slot must also appear in
    /// the dyld-bound slot index under the same name, which cross-checks the
    /// indirect-table path against the bind-stream path.
    fn collect_stubs(&mut self, binary: &MachBinary<'_>) -> Result<()> {
        // There is rarely more than one stub section per image.
        let stub_sections: SmallVec<[Section; 2]> = binary
            .sections()
            .iter()
            .filter(|s| s.section_type() == raw::S_SYMBOL_STUBS)
            .cloned()
            .collect();
        if stub_sections.is_empty() {
            return Ok(());
        }

        let indirect = binary.indirect_symbols()?;
        let entries = binary.symtab_entries()?;
        let pointer_size = binary.pointer_size();

        // symbol table index -> pointer slot address
        let mut slot_for_symbol: HashMap<u32, VirtualAddress> = HashMap::new();
        for section in binary.sections() {
            let section_type = section.section_type();
            if section_type != raw::S_LAZY_SYMBOL_POINTERS
                && section_type != raw::S_NON_LAZY_SYMBOL_POINTERS
            {
                continue;
            }
            let count = section.size / pointer_size;
            for slot in 0..count {
                let indirect_index = section.reserved1 as usize + slot as usize;
                let Some(&symbol_index) = indirect.get(indirect_index) else {
                    continue;
                };
                if symbol_index & (raw::INDIRECT_SYMBOL_LOCAL | raw::INDIRECT_SYMBOL_ABS) != 0 {
                    continue;
                }
                slot_for_symbol
                    .entry(symbol_index)
                    .or_insert(section.addr + slot * pointer_size);
            }
        }

        for section in stub_sections {
            let stride = section.reserved2 as u64;
            if stride == 0 {
                warn!(section = %section.name, "stub section without entry size, skipping");
                continue;
            }

            let count = section.size / stride;
            for stub in 0..count {
                let stub_address = section.addr + stub * stride;
                let indirect_index = section.reserved1 as usize + stub as usize;
                let Some(&symbol_index) = indirect.get(indirect_index) else {
                    warn!(%stub_address, "stub has no indirect symbol entry, skipping");
                    continue;
                };
                if symbol_index & (raw::INDIRECT_SYMBOL_LOCAL | raw::INDIRECT_SYMBOL_ABS) != 0 {
                    continue;
                }

                let Some(entry) = entries.get(symbol_index as usize) else {
                    warn!(%stub_address, "stub indirect entry escapes the symbol table, skipping");
                    continue;
                };
                let symbol_name = match binary.symbol_name(entry) {
                    Ok(name) => name.to_string(),
                    Err(error) => {
                        warn!(%stub_address, %error, "stub symbol name unreadable, skipping");
                        continue;
                    }
                };

                let Some(&destination_address) = slot_for_symbol.get(&symbol_index) else {
                    warn!(
                        %stub_address,
                        symbol = symbol_name,
                        "stub has no symbol pointer slot, skipping"
                    );
                    continue;
                };

                match self.dyld_bound_symbols.get(&destination_address) {
                    Some(bound) if bound.name == symbol_name => {}
                    Some(bound) => warn!(
                        %stub_address,
                        indirect_name = symbol_name,
                        bound_name = bound.name,
                        "stub symbol disagrees with dyld bind record"
                    ),
                    None => warn!(
                        %stub_address,
                        symbol = symbol_name,
                        "stub pointer slot is not dyld-bound"
                    ),
                }

                self.stubs.push(StubEntry {
                    stub_address,
                    destination_address,
                    symbol_name,
                });
            }
        }

        Ok(())
    }

    fn collect_exports(&mut self, dyld: &DyldInfo) {
        for export in &dyld.exports {
            if export.flags & raw::EXPORT_SYMBOL_FLAGS_REEXPORT != 0 {
                continue;
            }
            self.exported_pointers_to_names
                .insert(export.address, export.name.clone());
            self.exported_names_to_pointers
                .insert(export.name.clone(), export.address);
        }
    }

    /// Builds the address- and name-keyed callable maps. On name collisions,
    /// locally defined symbols shadow stubs, which shadow bound pointers.
    fn build_callable_index(&mut self) {
        let bound: Vec<CallableSymbol> = self.dyld_bound_symbols.values().cloned().collect();
        for symbol in bound {
            self.insert_callable(symbol);
        }
        let stubs: Vec<CallableSymbol> = self
            .stubs
            .iter()
            .map(|stub| CallableSymbol {
                name: stub.symbol_name.clone(),
                address: stub.stub_address,
                kind: CallableSymbolKind::Stub,
            })
            .collect();
        for symbol in stubs {
            self.insert_callable(symbol);
        }
        for symbol in self.local_code_symbols.clone() {
            self.insert_callable(symbol);
        }
    }

    fn insert_callable(&mut self, symbol: CallableSymbol) {
        self.callable_by_name
            .insert(symbol.name.clone(), symbol.address);
        self.callable_by_address.insert(symbol.address, symbol);
    }

    /// Names of all imported (undefined) symbols, in symbol table order.
    pub fn imported_symbols(&self) -> &[String] {
        &self.imported_symbols
    }

    /// The dyld-bound pointer slot index: what each imported pointer will
    /// hold at runtime.
    pub fn dyld_bound_symbols(&self) -> &BTreeMap<VirtualAddress, CallableSymbol> {
        &self.dyld_bound_symbols
    }

    /// The stub entries, in section order.
    pub fn imp_stubs(&self) -> &[StubEntry] {
        &self.stubs
    }

    /// Convenience map from stub addresses to imported symbol names.
    pub fn imp_stubs_to_symbol_names(&self) -> BTreeMap<VirtualAddress, String> {
        self.stubs
            .iter()
            .map(|stub| (stub.stub_address, stub.symbol_name.clone()))
            .collect()
    }

    /// The callable symbol at the given address, if any.
    pub fn callable_symbol_for_address(&self, address: VirtualAddress) -> Option<&CallableSymbol> {
        self.callable_by_address.get(&address)
    }

    /// The callable symbol with the given name, if any.
    pub fn callable_symbol_for_symbol_name(&self, name: &str) -> Option<&CallableSymbol> {
        let address = self.callable_by_name.get(name)?;
        self.callable_by_address.get(address)
    }

    /// Exported symbols by address, from the export trie.
    pub fn exported_symbol_pointers_to_names(&self) -> &BTreeMap<VirtualAddress, String> {
        &self.exported_pointers_to_names
    }

    /// Exported symbols by name, from the export trie.
    pub fn exported_symbol_names_to_pointers(&self) -> &BTreeMap<String, VirtualAddress> {
        &self.exported_names_to_pointers
    }

    /// Locally defined symbols in code sections, in symbol table order.
    pub fn local_code_symbols(&self) -> &[CallableSymbol] {
        &self.local_code_symbols
    }
}
