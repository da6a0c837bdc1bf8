//! Reconstruction of the Objective-C runtime metadata: selector references,
//! class references, classes and their method lists.
//!
//! The parse runs in three passes over the `__objc_selrefs`,
//! `__objc_classlist` and `__objc_classrefs` sections, cross-referencing the
//! structures they point into (`__objc_data`, method lists, name literals in
//! `__objc_methname`). Individual malformed entries are skipped with a
//! warning; only structural failures of the image abort the parse.

use std::collections::{BTreeMap, HashMap};

use tracing::{debug, warn};

use sidearm_common::VirtualAddress;

use crate::binary::MachBinary;
use crate::dyld_info::BindRecord;
use crate::error::Result;
use crate::raw;

/// Selref sections above this entry count have historically taken minutes to
/// cross-reference; flag them so callers know what they are in for.
const LONG_PARSE_SELREF_COUNT: usize = 1000;

/// A selector reference: a pointer in `__objc_selrefs` whose value is the
/// address of a selector name literal.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjcSelref {
    /// Address of the selref slot itself.
    pub source: VirtualAddress,
    /// Address of the name literal in `__objc_methname`.
    pub destination: VirtualAddress,
    /// The selector name literal. May be empty.
    pub literal: String,
}

/// A class reference: a pointer in `__objc_classrefs` to a class structure,
/// or a dyld-bound slot importing an external class.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjcClassref {
    /// Address of the classref slot itself.
    pub source: VirtualAddress,
    /// Address of the class structure, or zero for dyld-bound imports.
    pub destination: VirtualAddress,
    /// The class name; for imports this is the bound symbol name
    /// (`_OBJC_CLASS_$_...`).
    pub class_name: String,
}

/// A selector, possibly attached to a selref and/or a local implementation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjcSelector {
    /// The selector name.
    pub name: String,
    /// The selref slot loading this selector, if any call site references it.
    pub selref: Option<VirtualAddress>,
    /// The local implementation address, absent for selectors implemented
    /// outside this image.
    pub implementation: Option<VirtualAddress>,
}

impl ObjcSelector {
    /// A selector is external iff no local implementation backs it.
    pub fn is_external(&self) -> bool {
        self.implementation.is_none()
    }
}

/// A class defined in the image, with its selectors in method list order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjcClass {
    /// The class name.
    pub name: String,
    /// Selectors in the order they appear in the method list. Duplicates are
    /// preserved if the binary contains them.
    pub selectors: Vec<ObjcSelector>,
}

/// The canonical entry-point descriptor joining a class, a selector and the
/// implementation address.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MethodInfo {
    /// Name of the implementing class.
    pub class_name: String,
    /// The implemented selector.
    pub selector: ObjcSelector,
    /// The implementation entry point.
    pub implementation: VirtualAddress,
}

/// The parsed Objective-C runtime metadata of one image.
#[derive(Clone, Debug, Default)]
pub struct ObjcRuntime {
    selrefs: Vec<ObjcSelref>,
    classrefs: Vec<ObjcClassref>,
    classes: Vec<ObjcClass>,
    selref_index_by_source: HashMap<VirtualAddress, usize>,
    imp_by_selref_source: HashMap<VirtualAddress, VirtualAddress>,
    selector_by_selref_source: HashMap<VirtualAddress, (usize, usize)>,
    method_by_imp: HashMap<VirtualAddress, MethodInfo>,
    classref_by_name: HashMap<String, VirtualAddress>,
    dylib_for_symbol: HashMap<String, String>,
}

impl ObjcRuntime {
    /// Parses the runtime metadata of the given binary. `bound_slots` is the
    /// dyld-bound pointer slot index used to name imported classrefs.
    pub fn parse(
        binary: &MachBinary<'_>,
        bound_slots: &BTreeMap<VirtualAddress, &BindRecord>,
    ) -> Result<Self> {
        let mut runtime = ObjcRuntime::default();

        debug!("parsing __objc_selrefs");
        runtime.parse_selrefs(binary)?;
        debug!("parsing __objc_classlist");
        runtime.parse_classes(binary)?;
        debug!("parsing __objc_classrefs");
        runtime.parse_classrefs(binary, bound_slots)?;
        runtime.parse_undefined_symbols(binary)?;

        Ok(runtime)
    }

    fn parse_selrefs(&mut self, binary: &MachBinary<'_>) -> Result<()> {
        let Some(section) = binary.section_by_name("__objc_selrefs") else {
            return Ok(());
        };
        let section = section.clone();

        let pointer_size = binary.pointer_size();
        let entry_count = (section.size / pointer_size) as usize;
        if entry_count > LONG_PARSE_SELREF_COUNT {
            warn!(
                selref_count = entry_count,
                "large ObjC selref section, cross-referencing may take minutes"
            );
        }

        for index in 0..entry_count {
            let source = section.addr + index as u64 * pointer_size;
            let destination = VirtualAddress(binary.read_word(source)?);
            let literal = match binary.cstr_at(destination) {
                Ok(literal) => literal.to_string(),
                Err(error) => {
                    warn!(%source, %destination, %error, "skipping unreadable selref literal");
                    continue;
                }
            };

            self.selref_index_by_source.insert(source, self.selrefs.len());
            self.selrefs.push(ObjcSelref {
                source,
                destination,
                literal,
            });
        }

        Ok(())
    }

    fn parse_classes(&mut self, binary: &MachBinary<'_>) -> Result<()> {
        let Some(section) = binary.section_by_name("__objc_classlist") else {
            return Ok(());
        };
        let section = section.clone();

        // Selref lookup by name-literal address, to attach selrefs to the
        // methods whose name pointer aliases the literal.
        let selref_by_destination: HashMap<VirtualAddress, usize> = self
            .selrefs
            .iter()
            .enumerate()
            .map(|(index, selref)| (selref.destination, index))
            .collect();

        let pointer_size = binary.pointer_size();
        let entry_count = (section.size / pointer_size) as usize;

        for index in 0..entry_count {
            let entry_addr = section.addr + index as u64 * pointer_size;
            let class_addr = VirtualAddress(binary.read_word(entry_addr)?);

            match self.parse_class(binary, class_addr, &selref_by_destination) {
                Ok(Some(class)) => {
                    let class_index = self.classes.len();
                    for (selector_index, selector) in class.selectors.iter().enumerate() {
                        let Some(implementation) = selector.implementation else {
                            continue;
                        };
                        let info = MethodInfo {
                            class_name: class.name.clone(),
                            selector: selector.clone(),
                            implementation,
                        };
                        self.method_by_imp.entry(implementation).or_insert(info);
                        if let Some(selref) = selector.selref {
                            self.imp_by_selref_source
                                .entry(selref)
                                .or_insert(implementation);
                            self.selector_by_selref_source
                                .entry(selref)
                                .or_insert((class_index, selector_index));
                        }
                    }
                    self.classes.push(class);
                }
                Ok(None) => {}
                Err(error) => {
                    warn!(%class_addr, %error, "skipping malformed ObjC class entry");
                }
            }
        }

        Ok(())
    }

    fn parse_class(
        &self,
        binary: &MachBinary<'_>,
        class_addr: VirtualAddress,
        selref_by_destination: &HashMap<VirtualAddress, usize>,
    ) -> Result<Option<ObjcClass>> {
        let data_addr = if binary.is_64() {
            let class: raw::ObjcClassRaw64 = binary.read_at(class_addr)?;
            // The low two bits carry the Swift and isRealized flags.
            VirtualAddress(class.data & !raw::OBJC_POINTER_FLAG_MASK)
        } else {
            let class: raw::ObjcClassRaw = binary.read_at(class_addr)?;
            VirtualAddress(class.data as u64 & !raw::OBJC_POINTER_FLAG_MASK)
        };

        let (name_addr, base_methods) = if binary.is_64() {
            let data: raw::ObjcDataRaw64 = binary.read_at(data_addr)?;
            (VirtualAddress(data.name), VirtualAddress(data.base_methods))
        } else {
            let data: raw::ObjcDataRaw = binary.read_at(data_addr)?;
            (
                VirtualAddress(data.name as u64),
                VirtualAddress(data.base_methods as u64),
            )
        };

        // Observed 32-bit degeneracy: an __objc_method entry masquerading as
        // __objc_data puts a small integer where the name pointer belongs.
        if name_addr < binary.virtual_base() {
            warn!(
                %class_addr,
                %data_addr,
                %name_addr,
                "ObjC data entry has name pointer below the image base, skipping class"
            );
            return Ok(None);
        }

        let name = binary.cstr_at(name_addr)?.to_string();

        let selectors = if base_methods.get() != 0 {
            self.parse_method_list(binary, base_methods, selref_by_destination)?
        } else {
            Vec::new()
        };

        Ok(Some(ObjcClass { name, selectors }))
    }

    fn parse_method_list(
        &self,
        binary: &MachBinary<'_>,
        list_addr: VirtualAddress,
        selref_by_destination: &HashMap<VirtualAddress, usize>,
    ) -> Result<Vec<ObjcSelector>> {
        let header: raw::ObjcMethodListRaw = binary.read_at(list_addr)?;
        let entsize = header.entsize().max(1) as u64;

        // The count is untrusted; size the allocation from the bytes that can
        // actually back it.
        let mut selectors = Vec::with_capacity(header.count.min(1024) as usize);
        let mut entry_addr = list_addr + std::mem::size_of::<raw::ObjcMethodListRaw>() as u64;

        for index in 0..header.count {
            let method = if binary.is_64() {
                binary.read_at::<raw::ObjcMethodRaw64>(entry_addr).map(|m| {
                    (VirtualAddress(m.name), m.imp & !raw::OBJC_POINTER_FLAG_MASK)
                })
            } else {
                binary.read_at::<raw::ObjcMethodRaw>(entry_addr).map(|m| {
                    (
                        VirtualAddress(m.name as u64),
                        m.imp as u64 & !raw::OBJC_POINTER_FLAG_MASK,
                    )
                })
            };

            let (name_addr, imp) = match method {
                Ok(method) => method,
                Err(error) => {
                    warn!(
                        %list_addr,
                        declared = header.count,
                        available = index,
                        %error,
                        "ObjC method list shorter than its declared count, truncating"
                    );
                    break;
                }
            };

            let name = match binary.cstr_at(name_addr) {
                Ok(name) => name.to_string(),
                Err(error) => {
                    warn!(
                        %list_addr,
                        %name_addr,
                        %error,
                        "method entry with unreadable name, truncating list"
                    );
                    break;
                }
            };
            // A method with no selref has no call site in this binary.
            let selref = selref_by_destination
                .get(&name_addr)
                .map(|&index| self.selrefs[index].source);

            selectors.push(ObjcSelector {
                name,
                selref,
                implementation: Some(VirtualAddress(imp)),
            });

            entry_addr += entsize;
        }

        Ok(selectors)
    }

    fn parse_classrefs(
        &mut self,
        binary: &MachBinary<'_>,
        bound_slots: &BTreeMap<VirtualAddress, &BindRecord>,
    ) -> Result<()> {
        let Some(section) = binary.section_by_name("__objc_classrefs") else {
            return Ok(());
        };
        let section = section.clone();

        let pointer_size = binary.pointer_size();
        let entry_count = (section.size / pointer_size) as usize;

        for index in 0..entry_count {
            let source = section.addr + index as u64 * pointer_size;
            let destination = VirtualAddress(binary.read_word(source)?);

            let class_name = if let Some(record) = bound_slots.get(&source) {
                // dyld fills this slot with an imported class at load time.
                record.symbol_name.clone()
            } else {
                match self.class_name_at(binary, destination) {
                    Ok(name) => name,
                    Err(error) => {
                        warn!(%source, %destination, %error, "skipping unreadable classref");
                        continue;
                    }
                }
            };

            self.classref_by_name
                .entry(class_name.clone())
                .or_insert(source);
            self.classrefs.push(ObjcClassref {
                source,
                destination,
                class_name,
            });
        }

        Ok(())
    }

    fn class_name_at(&self, binary: &MachBinary<'_>, class_addr: VirtualAddress) -> Result<String> {
        let data_addr = if binary.is_64() {
            let class: raw::ObjcClassRaw64 = binary.read_at(class_addr)?;
            VirtualAddress(class.data & !raw::OBJC_POINTER_FLAG_MASK)
        } else {
            let class: raw::ObjcClassRaw = binary.read_at(class_addr)?;
            VirtualAddress(class.data as u64 & !raw::OBJC_POINTER_FLAG_MASK)
        };

        let name_addr = if binary.is_64() {
            let data: raw::ObjcDataRaw64 = binary.read_at(data_addr)?;
            VirtualAddress(data.name)
        } else {
            let data: raw::ObjcDataRaw = binary.read_at(data_addr)?;
            VirtualAddress(data.name as u64)
        };

        Ok(binary.cstr_at(name_addr)?.to_string())
    }

    fn parse_undefined_symbols(&mut self, binary: &MachBinary<'_>) -> Result<()> {
        let Some(dysymtab) = binary.dysymtab().copied() else {
            return Ok(());
        };
        let entries = binary.symtab_entries()?;

        let start = dysymtab.iundefsym as usize;
        let end = start + dysymtab.nundefsym as usize;
        for entry in entries.get(start..end).unwrap_or(&[]) {
            let name = match binary.symbol_name(entry) {
                Ok(name) => name.to_string(),
                Err(error) => {
                    warn!(%error, "skipping undefined symbol with unreadable name");
                    continue;
                }
            };
            let ordinal = entry.library_ordinal();
            if let Some(dylib) = binary.dylib_by_ordinal(ordinal) {
                self.dylib_for_symbol.insert(name, dylib.to_string());
            }
        }

        Ok(())
    }

    /// The selector references, in section order.
    pub fn selrefs(&self) -> &[ObjcSelref] {
        &self.selrefs
    }

    /// The class references, in section order.
    pub fn classrefs(&self) -> &[ObjcClassref] {
        &self.classrefs
    }

    /// The locally defined classes, in classlist order.
    pub fn classes(&self) -> &[ObjcClass] {
        &self.classes
    }

    /// Resolves a selref slot address to its selector.
    ///
    /// If the selref's selector is implemented locally, the local selector is
    /// returned. If the selref exists but no local implementation backs it, a
    /// synthetic external selector bearing the literal name is returned. For
    /// unknown addresses this returns `None`.
    pub fn selector_for_selref(&self, selref_addr: VirtualAddress) -> Option<ObjcSelector> {
        if let Some(&(class_index, selector_index)) =
            self.selector_by_selref_source.get(&selref_addr)
        {
            return Some(self.classes[class_index].selectors[selector_index].clone());
        }

        let index = *self.selref_index_by_source.get(&selref_addr)?;
        let selref = &self.selrefs[index];
        Some(ObjcSelector {
            name: selref.literal.clone(),
            selref: Some(selref.source),
            implementation: None,
        })
    }

    /// The implementation address behind a selref, or `None` when the selref
    /// is unknown or its selector is implemented outside this image.
    pub fn imp_for_selref(&self, selref_addr: VirtualAddress) -> Option<VirtualAddress> {
        self.imp_by_selref_source.get(&selref_addr).copied()
    }

    /// Reverse lookup from a method entry point to its method descriptor.
    pub fn method_info_for_entry_point(&self, entry: VirtualAddress) -> Option<&MethodInfo> {
        self.method_by_imp.get(&entry)
    }

    /// Every implementation of the named selector, in class list order.
    pub fn get_imps_for_sel(&self, selector_name: &str) -> Vec<MethodInfo> {
        let mut infos = Vec::new();
        for class in &self.classes {
            for selector in &class.selectors {
                if selector.name != selector_name {
                    continue;
                }
                if let Some(implementation) = selector.implementation {
                    infos.push(MethodInfo {
                        class_name: class.name.clone(),
                        selector: selector.clone(),
                        implementation,
                    });
                }
            }
        }
        infos
    }

    /// The classref slot for a class name.
    ///
    /// Locally defined classes are recorded under their plain name, imported
    /// classes under the bound `_OBJC_CLASS_$_` symbol name; queries in
    /// either spelling resolve.
    pub fn classref_for_class_name(&self, class_name: &str) -> Option<VirtualAddress> {
        if let Some(&source) = self.classref_by_name.get(class_name) {
            return Some(source);
        }
        match class_name.strip_prefix("_OBJC_CLASS_$_") {
            Some(stripped) => self.classref_by_name.get(stripped).copied(),
            None => self
                .classref_by_name
                .get(&format!("_OBJC_CLASS_$_{class_name}"))
                .copied(),
        }
    }

    /// All entry points of locally implemented ObjC methods.
    pub fn implementation_addresses(&self) -> Vec<VirtualAddress> {
        let mut addresses: Vec<VirtualAddress> = self.method_by_imp.keys().copied().collect();
        addresses.sort_unstable();
        addresses
    }

    /// The install name of the dylib an undefined symbol is bound from.
    pub fn path_for_external_symbol(&self, symbol: &str) -> Option<&str> {
        self.dylib_for_symbol.get(symbol).map(String::as_str)
    }
}
