//! Analyzer-level tests against the synthetic image: memoization, function
//! boundaries, symbol naming and whole-image cross references.

mod common;

use std::sync::Arc;

use similar_asserts::assert_eq;

use sidearm_analyze::{AnalysisError, MachAnalyzer, ObjcMsgSendXref};
use sidearm_common::VirtualAddress;

use common::{sample_analyzer, scripted_decoder};

#[test]
fn test_analyzer_is_memoized() {
    let (sample, image, analyzer) = sample_analyzer();

    let again = MachAnalyzer::get_analyzer(&image, scripted_decoder(&sample)).unwrap();
    assert!(Arc::ptr_eq(&analyzer, &again));

    // A second parse of equal bytes is a different image and gets its own
    // analyzer.
    let other_image = sidearm_macho::MachImage::parse(sidearm_common::ByteView::from_vec(
        sample.data.clone(),
    ))
    .unwrap();
    let other = MachAnalyzer::get_analyzer(&other_image, scripted_decoder(&sample)).unwrap();
    assert!(!Arc::ptr_eq(&analyzer, &other));
}

#[test]
fn test_function_boundaries() {
    let (sample, _image, analyzer) = sample_analyzer();

    let expected: Vec<(VirtualAddress, VirtualAddress)> = vec![
        (sample.f_main, sample.f_configure),
        (sample.f_configure, sample.f_log),
        (sample.f_log, sample.f_view_configure),
        (sample.f_view_configure, sample.text_end),
        (sample.stub_msgsend, sample.stub_opt_new),
        (sample.stub_opt_new, sample.stub_nslog),
        (sample.stub_nslog, sample.stub_sectrust),
        (sample.stub_sectrust, sample.stubs_end),
    ]
    .into_iter()
    .map(|(entry, end)| (VirtualAddress(entry), VirtualAddress(end)))
    .collect();

    assert_eq!(analyzer.get_function_boundaries(), expected.as_slice());

    // Consecutive boundaries are adjacent; the last in each code section
    // ends at the section end.
    for window in analyzer.get_function_boundaries().windows(2) {
        let (_, end) = window[0];
        let (next_entry, _) = window[1];
        assert!(end == next_entry || end <= next_entry);
    }
}

#[test]
fn test_function_end_address() {
    let (sample, _image, analyzer) = sample_analyzer();

    assert_eq!(
        analyzer
            .get_function_end_address(VirtualAddress(sample.f_main))
            .unwrap(),
        VirtualAddress(sample.f_configure)
    );

    let error = analyzer
        .get_function_end_address(VirtualAddress(0xdead_beef))
        .unwrap_err();
    assert!(matches!(error, AnalysisError::UnknownFunction(_)));
}

#[test]
fn test_function_instructions() {
    let (sample, _image, analyzer) = sample_analyzer();

    let instructions = analyzer
        .get_function_instructions(VirtualAddress(sample.f_main))
        .unwrap();
    assert_eq!(instructions.len(), 16);
    assert_eq!(instructions[0].address, VirtualAddress(sample.f_main));
    assert!(instructions.last().unwrap().address < VirtualAddress(sample.f_configure));
}

#[test]
fn test_symbol_name_for_branch_destination() {
    let (sample, _image, analyzer) = sample_analyzer();

    assert_eq!(
        analyzer
            .symbol_name_for_branch_destination(VirtualAddress(sample.stub_nslog))
            .unwrap(),
        "_NSLog"
    );

    let error = analyzer
        .symbol_name_for_branch_destination(VirtualAddress(0xdead_beef))
        .unwrap_err();
    assert!(matches!(error, AnalysisError::UnknownBranchTarget(_)));
}

#[test]
fn test_callable_symbols() {
    let (sample, _image, analyzer) = sample_analyzer();

    let header = analyzer
        .callable_symbol_for_address(VirtualAddress(sidearm_testutils::BASE))
        .unwrap();
    assert!(!header.is_imported());
    assert_eq!(header.name, "__mh_execute_header");

    let msgsend = analyzer
        .callable_symbol_for_address(VirtualAddress(sample.stub_msgsend))
        .unwrap();
    assert!(msgsend.is_imported());
    assert_eq!(msgsend.name, "_objc_msgSend");

    // Name lookups prefer the stub over the bound pointer slot, and round
    // trip back to the same address.
    let by_name = analyzer
        .callable_symbol_for_symbol_name("_objc_msgSend")
        .unwrap();
    assert_eq!(by_name.address, VirtualAddress(sample.stub_msgsend));
    assert_eq!(
        analyzer
            .callable_symbol_for_symbol_name(&header.name.clone())
            .unwrap()
            .address,
        VirtualAddress(sidearm_testutils::BASE)
    );

    assert!(analyzer.callable_symbol_for_symbol_name("_fake_symbol").is_none());
    assert!(analyzer
        .callable_symbol_for_address(VirtualAddress(sample.f_configure + 4))
        .is_none());
}

#[test]
fn test_calls_to() {
    let (sample, _image, analyzer) = sample_analyzer();

    let xrefs = analyzer.calls_to(VirtualAddress(sample.f_configure)).unwrap();
    assert_eq!(xrefs.len(), 2);

    assert_eq!(
        xrefs[0].caller_func_start_address,
        VirtualAddress(sample.f_main)
    );
    assert_eq!(xrefs[0].caller_addr, VirtualAddress(sample.f_main + 0x28));

    assert_eq!(
        xrefs[1].caller_func_start_address,
        VirtualAddress(sample.f_log)
    );
    assert_eq!(xrefs[1].caller_addr, VirtualAddress(sample.f_log + 0x04));

    // The caller of the second xref is a known ObjC method.
    let method = analyzer
        .method_info_for_entry_point(xrefs[1].caller_func_start_address)
        .unwrap();
    assert_eq!(method.class_name, "DTLabel");
    assert_eq!(method.selector.name, "logLabel");
}

#[test]
fn test_objc_calls_to_classref_only() {
    let (sample, _image, analyzer) = sample_analyzer();

    // The objc_opt_new fast path carries a classref and no selref.
    let classref = analyzer.classref_for_class_name("DTLabel").unwrap();
    assert_eq!(classref, VirtualAddress(sample.classref_dtlabel));

    let xrefs = analyzer.objc_calls_to(&[classref], &[], false).unwrap();
    assert_eq!(
        xrefs,
        vec![ObjcMsgSendXref {
            caller_func_start_address: VirtualAddress(sample.f_main),
            caller_addr: VirtualAddress(sample.f_main + 0x20),
            destination_addr: VirtualAddress(sample.stub_opt_new),
            classref,
            selref: VirtualAddress(0),
        }]
    );
}

#[test]
fn test_objc_calls_to_selref_only() {
    let (sample, _image, analyzer) = sample_analyzer();

    let xrefs = analyzer
        .objc_calls_to(&[], &[VirtualAddress(sample.selref_configure)], false)
        .unwrap();
    assert_eq!(xrefs.len(), 1);
    assert_eq!(
        xrefs[0].caller_func_start_address,
        VirtualAddress(sample.f_configure)
    );
    assert_eq!(xrefs[0].caller_addr, VirtualAddress(sample.f_configure + 0x14));
    assert_eq!(xrefs[0].classref, VirtualAddress(0));
}

#[test]
fn test_objc_calls_to_requiring_both() {
    let (sample, _image, analyzer) = sample_analyzer();

    let uifont = analyzer
        .classref_for_class_name("_OBJC_CLASS_$_UIFont")
        .unwrap();
    assert_eq!(uifont, VirtualAddress(sample.classref_uifont));

    let xrefs = analyzer
        .objc_calls_to(&[uifont], &[VirtualAddress(sample.selref_sysfont)], true)
        .unwrap();
    assert_eq!(xrefs.len(), 1);
    assert_eq!(xrefs[0].caller_addr, VirtualAddress(sample.f_main + 0x14));
    assert_eq!(xrefs[0].classref, uifont);
    assert_eq!(xrefs[0].selref, VirtualAddress(sample.selref_sysfont));

    // Mismatched pairs do not satisfy the conjunction.
    let none = analyzer
        .objc_calls_to(
            &[VirtualAddress(sample.classref_dtlabel)],
            &[VirtualAddress(sample.selref_sysfont)],
            true,
        )
        .unwrap();
    assert!(none.is_empty());
}

#[test]
fn test_exports_and_dylib_paths() {
    let (_sample, _image, analyzer) = sample_analyzer();

    assert_eq!(
        analyzer.exported_symbol_names_to_pointers().get("_main"),
        Some(&VirtualAddress(sidearm_testutils::BASE + 0x1000))
    );
    assert_eq!(
        analyzer
            .exported_symbol_pointers_to_names()
            .get(&VirtualAddress(sidearm_testutils::BASE)),
        Some(&"__mh_execute_header".to_string())
    );

    assert_eq!(
        analyzer.path_for_external_symbol("_NSLog"),
        Some(sidearm_testutils::DYLIBS[1])
    );
    assert_eq!(
        analyzer.path_for_external_symbol("_objc_msgSend"),
        Some(sidearm_testutils::DYLIBS[0])
    );
    assert_eq!(analyzer.path_for_external_symbol("_nope"), None);
}

#[test]
fn test_non_arm64_image_is_rejected() {
    let sample = sidearm_testutils::build_sample_image();
    let mut data = sample.data.clone();
    // Rewrite the header's cputype to x86_64.
    data[4..8].copy_from_slice(&sidearm_testutils::CPUTYPE_X86_64.to_le_bytes());

    let image =
        sidearm_macho::MachImage::parse(sidearm_common::ByteView::from_vec(data)).unwrap();
    let error = MachAnalyzer::get_analyzer(&image, scripted_decoder(&sample)).unwrap_err();
    match error {
        AnalysisError::Macho(inner) => {
            assert_eq!(inner.kind(), sidearm_macho::MachErrorKind::UnsupportedArch)
        }
        other => panic!("unexpected error: {other}"),
    }
}
