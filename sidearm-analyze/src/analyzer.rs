//! The memoized per-image analyzer: function boundaries, per-function
//! analyzers, and whole-image cross-reference sweeps.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, OnceLock, Weak};

use tracing::debug;

use sidearm_common::VirtualAddress;
use sidearm_macho::{
    CallableSymbol, DyldInfo, MachBinary, MachErrorKind, MachImage, MethodInfo, ObjcRuntime,
    ObjcSelector, StubEntry, SymbolIndex,
};

use crate::error::{AnalysisError, Result};
use crate::function::FunctionAnalyzer;
use crate::instruction::{Instruction, InstructionDecoder};

/// A call-site cross reference to a destination address.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Xref {
    /// Entry address of the calling function.
    pub caller_func_start_address: VirtualAddress,
    /// Address of the call instruction.
    pub caller_addr: VirtualAddress,
    /// The call destination.
    pub destination: VirtualAddress,
}

/// A recovered `objc_msgSend`-family call site. At least one of `classref`
/// and `selref` is nonzero.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ObjcMsgSendXref {
    /// Entry address of the calling function.
    pub caller_func_start_address: VirtualAddress,
    /// Address of the call instruction.
    pub caller_addr: VirtualAddress,
    /// The branch destination (the msgSend stub), or zero when indirect.
    pub destination_addr: VirtualAddress,
    /// The recovered classref slot, or zero.
    pub classref: VirtualAddress,
    /// The recovered selref slot, or zero.
    pub selref: VirtualAddress,
}

/// The canonical function boundary table of one image.
///
/// Entry points are the union of ObjC method implementations, code-section
/// symbols, stub entries and the image entry point. Each entry's exclusive
/// end is the next entry, clamped to the end of the containing code section;
/// any code gap between two entries is attributed to the earlier entry, and
/// non-contiguous functions are not detected.
#[derive(Clone, Debug, Default)]
pub struct FunctionBoundaries {
    boundaries: Vec<(VirtualAddress, VirtualAddress)>,
}

impl FunctionBoundaries {
    fn build(binary: &MachBinary<'_>, symbols: &SymbolIndex, objc: &ObjcRuntime) -> Self {
        let mut entries: Vec<VirtualAddress> = Vec::new();
        entries.extend(objc.implementation_addresses());
        entries.extend(symbols.local_code_symbols().iter().map(|s| s.address));
        entries.extend(symbols.imp_stubs().iter().map(|s| s.stub_address));
        entries.extend(binary.entry_point());

        dmsort::sort(&mut entries);
        entries.dedup();

        let code_sections: Vec<_> = binary
            .sections()
            .iter()
            .filter(|section| section.is_code())
            .cloned()
            .collect();

        let mut boundaries = Vec::with_capacity(entries.len());
        for (index, &entry) in entries.iter().enumerate() {
            // Entries outside any code section (e.g. the Mach header symbol)
            // have no function body.
            let Some(section) = code_sections.iter().find(|s| s.contains_address(entry)) else {
                continue;
            };

            let mut end = section.end_address();
            if let Some(&next) = entries.get(index + 1) {
                if section.contains_address(next) {
                    end = next;
                }
            }
            boundaries.push((entry, end));
        }

        FunctionBoundaries { boundaries }
    }

    /// The sorted `(entry, exclusive end)` pairs.
    pub fn boundaries(&self) -> &[(VirtualAddress, VirtualAddress)] {
        &self.boundaries
    }

    /// The exclusive end address of the function starting at `entry`.
    pub fn end_of_function(&self, entry: VirtualAddress) -> Option<VirtualAddress> {
        self.boundaries
            .binary_search_by_key(&entry, |&(start, _)| start)
            .ok()
            .map(|index| self.boundaries[index].1)
    }
}

type AnalyzerRegistry = Mutex<HashMap<(usize, usize), Weak<MachAnalyzer>>>;

fn registry() -> &'static AnalyzerRegistry {
    static REGISTRY: OnceLock<AnalyzerRegistry> = OnceLock::new();
    REGISTRY.get_or_init(Default::default)
}

/// The analysis facade over one ARM64 image.
///
/// Analyzers are memoized process-wide: [`MachAnalyzer::get_analyzer`] returns
/// the same instance for the same live image, and the registry entry is
/// evicted once every strong reference (and with it the image) is dropped.
/// The image's backing bytes are treated as immutable for the analyzer's
/// lifetime.
pub struct MachAnalyzer {
    image: Arc<MachImage>,
    decoder: Arc<dyn InstructionDecoder>,
    dyld: DyldInfo,
    symbols: SymbolIndex,
    objc: ObjcRuntime,
    boundaries: FunctionBoundaries,
    functions: Mutex<HashMap<VirtualAddress, Arc<FunctionAnalyzer>>>,
}

impl MachAnalyzer {
    /// Returns the canonical analyzer for the given image, constructing it on
    /// first use.
    ///
    /// Only ARM64 images can be analyzed; other architectures fail with
    /// [`MachErrorKind::UnsupportedArch`]. The decoder of the first call
    /// wins; subsequent calls for a live image return the existing instance.
    pub fn get_analyzer(
        image: &Arc<MachImage>,
        decoder: Arc<dyn InstructionDecoder>,
    ) -> Result<Arc<MachAnalyzer>> {
        let mut registry = registry().lock().expect("analyzer registry poisoned");
        registry.retain(|_, weak| weak.strong_count() > 0);

        if let Some(existing) = registry.get(&image.identity()).and_then(Weak::upgrade) {
            return Ok(existing);
        }

        let analyzer = Arc::new(Self::build(image, decoder)?);
        registry.insert(image.identity(), Arc::downgrade(&analyzer));
        Ok(analyzer)
    }

    fn build(image: &Arc<MachImage>, decoder: Arc<dyn InstructionDecoder>) -> Result<Self> {
        if !image.arch().is_arm64() {
            return Err(AnalysisError::Macho(MachErrorKind::UnsupportedArch.into()));
        }

        let binary = image.binary();
        debug!(arch = %image.arch(), "building analyzer");

        let dyld = DyldInfo::parse(binary)?;
        let symbols = SymbolIndex::build(binary, &dyld)?;
        let objc = ObjcRuntime::parse(binary, &dyld.bound_slots())?;
        let boundaries = FunctionBoundaries::build(binary, &symbols, &objc);
        debug!(
            functions = boundaries.boundaries().len(),
            classes = objc.classes().len(),
            "analyzer ready"
        );

        Ok(MachAnalyzer {
            image: Arc::clone(image),
            decoder,
            dyld,
            symbols,
            objc,
            boundaries,
            functions: Mutex::new(HashMap::new()),
        })
    }

    /// The analyzed image.
    pub fn image(&self) -> &Arc<MachImage> {
        &self.image
    }

    /// The decoded dyld information.
    pub fn dyld_info(&self) -> &DyldInfo {
        &self.dyld
    }

    /// The unified symbol indexes.
    pub fn symbols(&self) -> &SymbolIndex {
        &self.symbols
    }

    /// The Objective-C runtime metadata.
    pub fn objc(&self) -> &ObjcRuntime {
        &self.objc
    }

    /// The implementation address behind a selref, or `None` when unknown or
    /// implemented outside the image.
    pub fn imp_for_selref(&self, selref: VirtualAddress) -> Option<VirtualAddress> {
        self.objc.imp_for_selref(selref)
    }

    /// The selector behind a selref; synthesizes an external selector for
    /// selrefs without a local implementation.
    pub fn selector_for_selref(&self, selref: VirtualAddress) -> Option<ObjcSelector> {
        self.objc.selector_for_selref(selref)
    }

    /// The method descriptor whose implementation starts at `entry`.
    pub fn method_info_for_entry_point(&self, entry: VirtualAddress) -> Option<MethodInfo> {
        self.objc.method_info_for_entry_point(entry).cloned()
    }

    /// Every implementation of the named selector.
    pub fn get_imps_for_sel(&self, selector_name: &str) -> Vec<MethodInfo> {
        self.objc.get_imps_for_sel(selector_name)
    }

    /// The classref slot for a class name (plain or `_OBJC_CLASS_$_` form).
    pub fn classref_for_class_name(&self, class_name: &str) -> Option<VirtualAddress> {
        self.objc.classref_for_class_name(class_name)
    }

    /// Names of all imported symbols.
    pub fn imported_symbols(&self) -> &[String] {
        self.symbols.imported_symbols()
    }

    /// The dyld-bound pointer slots: `{address → symbol}`.
    pub fn dyld_bound_symbols(
        &self,
    ) -> &std::collections::BTreeMap<VirtualAddress, CallableSymbol> {
        self.symbols.dyld_bound_symbols()
    }

    /// The stub entries of the image.
    pub fn imp_stubs(&self) -> &[StubEntry] {
        self.symbols.imp_stubs()
    }

    /// Map from stub addresses to the imported symbol names they stand for.
    pub fn imp_stubs_to_symbol_names(
        &self,
    ) -> std::collections::BTreeMap<VirtualAddress, String> {
        self.symbols.imp_stubs_to_symbol_names()
    }

    /// Exported symbols by address.
    pub fn exported_symbol_pointers_to_names(
        &self,
    ) -> &std::collections::BTreeMap<VirtualAddress, String> {
        self.symbols.exported_symbol_pointers_to_names()
    }

    /// Exported symbols by name.
    pub fn exported_symbol_names_to_pointers(
        &self,
    ) -> &std::collections::BTreeMap<String, VirtualAddress> {
        self.symbols.exported_symbol_names_to_pointers()
    }

    /// The install name of the dylib an undefined symbol is bound from.
    pub fn path_for_external_symbol(&self, symbol: &str) -> Option<&str> {
        self.objc.path_for_external_symbol(symbol)
    }

    /// The callable symbol at an address: a local function entry, a stub, or
    /// a dyld-bound pointer slot.
    pub fn callable_symbol_for_address(&self, address: VirtualAddress) -> Option<&CallableSymbol> {
        self.symbols.callable_symbol_for_address(address)
    }

    /// The callable symbol with the given name. Locally defined symbols
    /// shadow stubs, which shadow bound pointer slots.
    pub fn callable_symbol_for_symbol_name(&self, name: &str) -> Option<&CallableSymbol> {
        self.symbols.callable_symbol_for_symbol_name(name)
    }

    /// The symbol name behind a branch destination.
    ///
    /// This is the sole sanctioned lookup for naming branch targets; it fails
    /// with [`AnalysisError::UnknownBranchTarget`] for addresses without a
    /// callable symbol.
    pub fn symbol_name_for_branch_destination(&self, address: VirtualAddress) -> Result<&str> {
        self.symbols
            .callable_symbol_for_address(address)
            .map(|symbol| symbol.name.as_str())
            .ok_or(AnalysisError::UnknownBranchTarget(address))
    }

    /// The canonical sorted function boundary table.
    pub fn get_function_boundaries(&self) -> &[(VirtualAddress, VirtualAddress)] {
        self.boundaries.boundaries()
    }

    /// The exclusive end address of the function starting at `entry`.
    pub fn get_function_end_address(&self, entry: VirtualAddress) -> Result<VirtualAddress> {
        self.boundaries
            .end_of_function(entry)
            .ok_or(AnalysisError::UnknownFunction(entry))
    }

    /// The analyzer for the function starting at `entry`. Analyzers are
    /// cached per entry point.
    pub fn function_analyzer(&self, entry: VirtualAddress) -> Result<Arc<FunctionAnalyzer>> {
        if let Some(existing) = self
            .functions
            .lock()
            .expect("function cache poisoned")
            .get(&entry)
        {
            return Ok(Arc::clone(existing));
        }

        let end = self.get_function_end_address(entry)?;
        let bytes = self.image.binary().bytes_at(entry, end - entry)?;
        let instructions = self.decoder.decode(bytes, entry);
        let method = self.objc.method_info_for_entry_point(entry).cloned();

        let analyzer = Arc::new(FunctionAnalyzer::new(
            entry,
            end,
            instructions,
            &self.symbols,
            method,
        ));

        self.functions
            .lock()
            .expect("function cache poisoned")
            .insert(entry, Arc::clone(&analyzer));
        Ok(analyzer)
    }

    /// The analyzer for the function implementing the given method.
    pub fn function_analyzer_for_method(
        &self,
        method: &MethodInfo,
    ) -> Result<Arc<FunctionAnalyzer>> {
        self.function_analyzer(method.implementation)
    }

    /// The decoded instructions of the function starting at `entry`.
    pub fn get_function_instructions(&self, entry: VirtualAddress) -> Result<Vec<Instruction>> {
        Ok(self.function_analyzer(entry)?.instructions().to_vec())
    }

    /// Every call site whose immediate destination is `address`, across all
    /// functions of the image.
    pub fn calls_to(&self, address: VirtualAddress) -> Result<Vec<Xref>> {
        let mut xrefs = Vec::new();

        for &(entry, _) in self.boundaries.boundaries() {
            let function = self.function_analyzer(entry)?;
            for branch in function.call_targets() {
                if branch.destination_address == Some(address) {
                    xrefs.push(Xref {
                        caller_func_start_address: entry,
                        caller_addr: branch.address,
                        destination: address,
                    });
                }
            }
        }

        Ok(xrefs)
    }

    /// Every recovered msgSend-family call site referencing one of the given
    /// classref and/or selref slots.
    ///
    /// With `requires_class_and_sel_found`, a site must match one of each;
    /// otherwise a match on either list suffices. Empty lists never match.
    pub fn objc_calls_to(
        &self,
        objc_classrefs: &[VirtualAddress],
        objc_selrefs: &[VirtualAddress],
        requires_class_and_sel_found: bool,
    ) -> Result<Vec<ObjcMsgSendXref>> {
        let mut xrefs = Vec::new();

        for &(entry, _) in self.boundaries.boundaries() {
            let function = self.function_analyzer(entry)?;
            for branch in function.call_targets() {
                if !branch.is_msgsend_call {
                    continue;
                }

                let classref = branch.classref.unwrap_or(VirtualAddress(0));
                let selref = branch.selref.unwrap_or(VirtualAddress(0));
                let class_found =
                    classref.get() != 0 && objc_classrefs.contains(&classref);
                let sel_found = selref.get() != 0 && objc_selrefs.contains(&selref);

                let matched = if requires_class_and_sel_found {
                    class_found && sel_found
                } else {
                    class_found || sel_found
                };
                if !matched {
                    continue;
                }

                xrefs.push(ObjcMsgSendXref {
                    caller_func_start_address: entry,
                    caller_addr: branch.address,
                    destination_addr: branch.destination_address.unwrap_or(VirtualAddress(0)),
                    classref,
                    selref,
                });
            }
        }

        Ok(xrefs)
    }
}

impl fmt::Debug for MachAnalyzer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MachAnalyzer")
            .field("image", &self.image)
            .field("functions", &self.boundaries.boundaries().len())
            .field("classes", &self.objc.classes().len())
            .field("stubs", &self.symbols.imp_stubs().len())
            .finish()
    }
}
