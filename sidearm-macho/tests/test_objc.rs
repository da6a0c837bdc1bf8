//! Tests for the Objective-C runtime reconstruction: selrefs, classes,
//! method lists, classrefs and the selector/IMP queries.

use similar_asserts::assert_eq;

use sidearm_common::VirtualAddress;
use sidearm_macho::{DyldInfo, MachBinary, ObjcRuntime};
use sidearm_testutils::build_sample_image;

fn parsed_runtime(data: &[u8]) -> ObjcRuntime {
    let binary = MachBinary::parse(data).unwrap();
    let dyld = DyldInfo::parse(&binary).unwrap();
    ObjcRuntime::parse(&binary, &dyld.bound_slots()).unwrap()
}

#[test]
fn test_selrefs() {
    let sample = build_sample_image();
    let runtime = parsed_runtime(&sample.data);

    let selrefs = runtime.selrefs();
    assert_eq!(selrefs.len(), 3);
    assert_eq!(selrefs[0].source, VirtualAddress(sample.selref_configure));
    assert_eq!(selrefs[0].destination, VirtualAddress(sample.methname_configure));
    assert_eq!(selrefs[0].literal, "configureLabel");
    assert_eq!(selrefs[2].literal, "systemFontOfSize:");

    // Every selref resolves to a selector bearing its literal name.
    for selref in selrefs {
        let selector = runtime.selector_for_selref(selref.source).unwrap();
        assert_eq!(selector.name, selref.literal);
    }
}

#[test]
fn test_classes() {
    let sample = build_sample_image();
    let runtime = parsed_runtime(&sample.data);

    let classes = runtime.classes();
    assert_eq!(classes.len(), 2);

    let dtlabel = &classes[0];
    assert_eq!(dtlabel.name, "DTLabel");
    let selector_names: Vec<&str> = dtlabel
        .selectors
        .iter()
        .map(|s| s.name.as_str())
        .collect();
    // method list order is preserved
    assert_eq!(selector_names, vec!["configureLabel", "logLabel"]);

    // the arm64e flag bit on the imp is masked off
    assert_eq!(
        dtlabel.selectors[0].implementation,
        Some(VirtualAddress(sample.f_configure))
    );
    assert_eq!(
        dtlabel.selectors[0].selref,
        Some(VirtualAddress(sample.selref_configure))
    );
    assert!(!dtlabel.selectors[0].is_external());

    let dtview = &classes[1];
    assert_eq!(dtview.name, "DTView");
    assert_eq!(dtview.selectors.len(), 1);
    assert_eq!(
        dtview.selectors[0].implementation,
        Some(VirtualAddress(sample.f_view_configure))
    );
}

#[test]
fn test_imp_for_selref() {
    let sample = build_sample_image();
    let runtime = parsed_runtime(&sample.data);

    // a selref whose selector is implemented locally
    assert_eq!(
        runtime.imp_for_selref(VirtualAddress(sample.selref_configure)),
        Some(VirtualAddress(sample.f_configure))
    );
    assert_eq!(
        runtime.imp_for_selref(VirtualAddress(sample.selref_log)),
        Some(VirtualAddress(sample.f_log))
    );

    // a selref for a method implemented outside the image
    assert_eq!(
        runtime.imp_for_selref(VirtualAddress(sample.selref_sysfont)),
        None
    );

    // an address that is not a selref at all
    assert_eq!(runtime.imp_for_selref(VirtualAddress(0xdead_beef)), None);
}

#[test]
fn test_selector_for_selref_external() {
    let sample = build_sample_image();
    let runtime = parsed_runtime(&sample.data);

    let external = runtime
        .selector_for_selref(VirtualAddress(sample.selref_sysfont))
        .unwrap();
    assert_eq!(external.name, "systemFontOfSize:");
    assert!(external.is_external());
    assert_eq!(external.selref, Some(VirtualAddress(sample.selref_sysfont)));

    assert!(runtime.selector_for_selref(VirtualAddress(0x1234)).is_none());
}

#[test]
fn test_method_info_for_entry_point() {
    let sample = build_sample_image();
    let runtime = parsed_runtime(&sample.data);

    let info = runtime
        .method_info_for_entry_point(VirtualAddress(sample.f_log))
        .unwrap();
    assert_eq!(info.class_name, "DTLabel");
    assert_eq!(info.selector.name, "logLabel");
    assert_eq!(info.implementation, VirtualAddress(sample.f_log));

    assert!(runtime
        .method_info_for_entry_point(VirtualAddress(sample.f_log + 4))
        .is_none());
}

#[test]
fn test_get_imps_for_sel() {
    let sample = build_sample_image();
    let runtime = parsed_runtime(&sample.data);

    // both classes implement configureLabel, in class list order
    let imps = runtime.get_imps_for_sel("configureLabel");
    assert_eq!(imps.len(), 2);
    assert_eq!(imps[0].class_name, "DTLabel");
    assert_eq!(imps[0].implementation, VirtualAddress(sample.f_configure));
    assert_eq!(imps[1].class_name, "DTView");
    assert_eq!(imps[1].implementation, VirtualAddress(sample.f_view_configure));

    assert!(runtime.get_imps_for_sel("nonexistentSelector").is_empty());
}

#[test]
fn test_classrefs() {
    let sample = build_sample_image();
    let runtime = parsed_runtime(&sample.data);

    let classrefs = runtime.classrefs();
    assert_eq!(classrefs.len(), 2);
    assert_eq!(classrefs[0].class_name, "DTLabel");
    assert_eq!(classrefs[0].destination, VirtualAddress(sample.class_dtlabel));
    assert_eq!(classrefs[1].class_name, "_OBJC_CLASS_$_UIFont");
    assert_eq!(classrefs[1].destination, VirtualAddress(0));

    // both naming conventions resolve
    assert_eq!(
        runtime.classref_for_class_name("DTLabel"),
        Some(VirtualAddress(sample.classref_dtlabel))
    );
    assert_eq!(
        runtime.classref_for_class_name("_OBJC_CLASS_$_DTLabel"),
        Some(VirtualAddress(sample.classref_dtlabel))
    );
    assert_eq!(
        runtime.classref_for_class_name("_OBJC_CLASS_$_UIFont"),
        Some(VirtualAddress(sample.classref_uifont))
    );
    assert_eq!(
        runtime.classref_for_class_name("UIFont"),
        Some(VirtualAddress(sample.classref_uifont))
    );
    assert_eq!(runtime.classref_for_class_name("NSBogus"), None);
}

#[test]
fn test_degenerate_class_is_skipped() {
    let sample = build_sample_image();
    let mut data = sample.data.clone();

    // Point DTView's data.name below the image base; the class must be
    // skipped without failing the parse.
    let data_dtview_off = (sample.class_dtview - sidearm_testutils::BASE) as usize + 40 * 2;
    let name_field = data_dtview_off + 24;
    data[name_field..name_field + 8].copy_from_slice(&0x10u64.to_le_bytes());

    let runtime = parsed_runtime(&data);
    let names: Vec<&str> = runtime.classes().iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["DTLabel"]);
}

#[test]
fn test_truncated_method_list() {
    let sample = build_sample_image();
    let mut data = sample.data.clone();

    // Claim far more methods than the section holds; the parse truncates at
    // the available bytes instead of failing.
    let methlist_off = {
        // DTLabel's method list follows the two class and two data structs
        (sample.class_dtlabel - sidearm_testutils::BASE) as usize + 40 * 4
    };
    data[methlist_off + 4..methlist_off + 8].copy_from_slice(&100_000u32.to_le_bytes());

    let runtime = parsed_runtime(&data);
    let dtlabel = &runtime.classes()[0];
    assert!(dtlabel.selectors.len() >= 2);
    assert_eq!(dtlabel.selectors[0].name, "configureLabel");
}

#[test]
fn test_path_for_external_symbol() {
    let sample = build_sample_image();
    let runtime = parsed_runtime(&sample.data);

    assert_eq!(
        runtime.path_for_external_symbol("_objc_msgSend"),
        Some(sidearm_testutils::DYLIBS[0])
    );
    assert_eq!(
        runtime.path_for_external_symbol("_SecTrustEvaluate"),
        Some(sidearm_testutils::DYLIBS[2])
    );
    assert_eq!(runtime.path_for_external_symbol("_unknown"), None);
}

#[test]
fn test_reparse_is_deterministic() {
    let sample = build_sample_image();
    let first = parsed_runtime(&sample.data);
    let second = parsed_runtime(&sample.data);

    assert_eq!(first.selrefs(), second.selrefs());
    assert_eq!(first.classrefs(), second.classrefs());
    assert_eq!(first.classes(), second.classes());
}
