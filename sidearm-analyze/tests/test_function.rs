//! Function-level tests: branch classification, dataflow queries, register
//! tracking and code search against the scripted instruction streams.

mod common;

use similar_asserts::assert_eq;

use sidearm_analyze::{
    AnalysisError, CodeSearch, CodeSearchTerm, RegisterContents,
};
use sidearm_common::VirtualAddress;

use common::sample_analyzer;

#[test]
fn test_call_targets_classification() {
    let (sample, _image, analyzer) = sample_analyzer();
    let function = analyzer
        .function_analyzer(VirtualAddress(sample.f_main))
        .unwrap();

    let branches = function.call_targets();
    assert_eq!(branches.len(), 5);

    // objc_msgSend with both argument registers recovered
    let msgsend = &branches[0];
    assert_eq!(msgsend.destination_address, Some(VirtualAddress(sample.stub_msgsend)));
    assert!(msgsend.is_msgsend_call);
    assert!(msgsend.is_external_objc_call);
    assert!(!msgsend.is_external_c_call);
    assert_eq!(msgsend.symbol.as_deref(), Some("_objc_msgSend"));
    assert_eq!(msgsend.selref, Some(VirtualAddress(sample.selref_sysfont)));
    assert_eq!(msgsend.classref, Some(VirtualAddress(sample.classref_uifont)));

    // objc_opt_new: classref only, never a selref
    let opt_new = &branches[1];
    assert!(opt_new.is_msgsend_call);
    assert_eq!(opt_new.symbol.as_deref(), Some("_objc_opt_new"));
    assert_eq!(opt_new.selref, None);
    assert_eq!(opt_new.classref, Some(VirtualAddress(sample.classref_dtlabel)));

    // a local call has a destination but no symbol
    let local = &branches[2];
    assert_eq!(local.destination_address, Some(VirtualAddress(sample.f_configure)));
    assert!(!local.is_msgsend_call);
    assert!(!local.is_external_c_call);
    assert_eq!(local.symbol, None);

    // a plain C import
    let nslog = &branches[3];
    assert!(nslog.is_external_c_call);
    assert!(!nslog.is_external_objc_call);
    assert_eq!(nslog.symbol.as_deref(), Some("_NSLog"));

    // the epilogue ret is a branch without destination or symbol
    let ret = &branches[4];
    assert_eq!(ret.destination_address, None);
    assert_eq!(ret.symbol, None);
}

#[test]
fn test_indirect_branch_through_bound_pointer() {
    let (sample, _image, analyzer) = sample_analyzer();

    // The msgSend stub itself ends in `br x16` with x16 loaded from the
    // dyld-bound lazy pointer slot; dataflow names the target.
    let stub = analyzer
        .function_analyzer(VirtualAddress(sample.stub_msgsend))
        .unwrap();
    let branches = stub.call_targets();
    assert_eq!(branches.len(), 1);
    assert_eq!(branches[0].destination_address, None);
    assert_eq!(branches[0].symbol.as_deref(), Some("_objc_msgSend"));
    assert!(branches[0].is_msgsend_call);
}

#[test]
fn test_next_branch_after_instruction_index() {
    let (sample, _image, analyzer) = sample_analyzer();
    let function = analyzer
        .function_analyzer(VirtualAddress(sample.f_main))
        .unwrap();

    let first = function.next_branch_after_instruction_index(0).unwrap();
    assert_eq!(first.instruction_index, 5);
    assert!(first.is_msgsend_call);

    let after = function.next_branch_after_instruction_index(6).unwrap();
    assert_eq!(after.instruction_index, 8);

    let last = function.next_branch_after_instruction_index(13).unwrap();
    assert_eq!(last.instruction_index, 15);

    assert!(function.next_branch_after_instruction_index(16).is_none());

    // Every branch reported at or after an index is classified as a branch.
    for index in 0..function.instructions().len() {
        if let Some(branch) = function.next_branch_after_instruction_index(index) {
            assert!(branch.instruction_index >= index);
            assert!(function.instructions()[branch.instruction_index].is_branch);
        }
    }
}

#[test]
fn test_register_contents() {
    let (sample, _image, analyzer) = sample_analyzer();
    let function = analyzer
        .function_analyzer(VirtualAddress(sample.f_main))
        .unwrap();

    // Argument registers at the first instruction
    let first = function.instruction_at_index(0).unwrap();
    assert_eq!(
        function.get_register_contents_at_instruction("x4", first),
        RegisterContents::FunctionArg(4)
    );

    // The selref pointer loaded for the msgSend call
    let call = function.instruction_at_index(5).unwrap().clone();
    assert_eq!(
        function.get_register_contents_at_instruction("x1", &call),
        RegisterContents::Immediate(sample.selref_sysfont)
    );
    assert_eq!(
        function.get_register_contents_at_instruction("x0", &call),
        RegisterContents::Immediate(sample.classref_uifont)
    );
}

#[test]
fn test_get_selref_ptr() {
    let (sample, _image, analyzer) = sample_analyzer();
    let function = analyzer
        .function_analyzer(VirtualAddress(sample.f_main))
        .unwrap();

    let call = function.instruction_at_index(5).unwrap().clone();
    assert_eq!(
        function.get_selref_ptr(&call).unwrap(),
        Some(VirtualAddress(sample.selref_sysfont))
    );

    let not_a_branch = function.instruction_at_index(4).unwrap().clone();
    assert!(matches!(
        function.get_selref_ptr(&not_a_branch),
        Err(AnalysisError::NotABranch(_))
    ));
}

#[test]
fn test_track_reg() {
    let (sample, _image, analyzer) = sample_analyzer();
    let function = analyzer
        .function_analyzer(VirtualAddress(sample.f_configure))
        .unwrap();

    // x0 is saved into x19 and later restored into x0.
    let mut tracked = function.track_reg("x0");
    tracked.sort();
    assert_eq!(tracked, vec!["x0", "x19"]);
}

#[test]
fn test_method_info() {
    let (sample, _image, analyzer) = sample_analyzer();

    let method = analyzer
        .method_info_for_entry_point(VirtualAddress(sample.f_configure))
        .unwrap();
    assert_eq!(method.class_name, "DTLabel");
    assert_eq!(method.selector.name, "configureLabel");

    let function = analyzer.function_analyzer_for_method(&method).unwrap();
    assert_eq!(function.entry_address(), VirtualAddress(sample.f_configure));
    assert_eq!(
        function.method_info().map(|info| info.class_name.as_str()),
        Some("DTLabel")
    );
}

#[test]
fn test_search_call_destination() {
    let (sample, _image, analyzer) = sample_analyzer();
    let function = analyzer
        .function_analyzer(VirtualAddress(sample.f_configure))
        .unwrap();

    // external call
    let search = CodeSearch::requiring_all(vec![CodeSearchTerm::CallDestination {
        address: VirtualAddress(sample.stub_sectrust),
    }]);
    let results = function.search_call_graph(&search);
    assert_eq!(results.len(), 1);
    assert_eq!(
        results[0].found_instruction.address,
        VirtualAddress(sample.f_configure + 0x20)
    );

    // local branch
    let view = analyzer
        .function_analyzer(VirtualAddress(sample.f_view_configure))
        .unwrap();
    let search = CodeSearch::requiring_all(vec![CodeSearchTerm::CallDestination {
        address: VirtualAddress(sample.f_view_configure + 0x18),
    }]);
    let results = view.search_call_graph(&search);
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].instruction_index, 0);

    // fake destination
    let search = CodeSearch::requiring_all(vec![CodeSearchTerm::CallDestination {
        address: VirtualAddress(0xdead_beef),
    }]);
    assert!(function.search_call_graph(&search).is_empty());
}

#[test]
fn test_search_conjunction_and_disjunction() {
    let (sample, _image, analyzer) = sample_analyzer();
    let function = analyzer
        .function_analyzer(VirtualAddress(sample.f_main))
        .unwrap();

    // Conjunction: the msgSend call with the sysfont selref in x1.
    let search = CodeSearch::requiring_all(vec![
        CodeSearchTerm::InstructionMnemonic {
            mnemonic: "bl".to_string(),
        },
        CodeSearchTerm::RegisterContents {
            register: "x1".to_string(),
            contents: RegisterContents::Immediate(sample.selref_sysfont),
        },
    ]);
    let results = function.search_call_graph(&search);
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].instruction_index, 5);
    assert_eq!(results[0].matched_terms, vec![0, 1]);

    // Disjunction: every bl plus the instruction at index 0.
    let search = CodeSearch::requiring_any(vec![
        CodeSearchTerm::InstructionMnemonic {
            mnemonic: "bl".to_string(),
        },
        CodeSearchTerm::InstructionIndex { index: 0 },
    ]);
    let results = function.search_call_graph(&search);
    let indexes: Vec<usize> = results.iter().map(|result| result.instruction_index).collect();
    assert_eq!(indexes, vec![0, 5, 8, 10, 12]);
}

#[test]
fn test_search_function_call_with_arguments() {
    let (sample, _image, analyzer) = sample_analyzer();
    let function = analyzer
        .function_analyzer(VirtualAddress(sample.f_main))
        .unwrap();

    let search = CodeSearch::requiring_all(vec![CodeSearchTerm::FunctionCallWithArguments {
        address: VirtualAddress(sample.stub_msgsend),
        arguments: vec![
            ("x0".to_string(), RegisterContents::Immediate(sample.classref_uifont)),
            ("x1".to_string(), RegisterContents::Immediate(sample.selref_sysfont)),
        ],
    }]);
    let results = function.search_call_graph(&search);
    assert_eq!(results.len(), 1);

    let arguments = results[0].arguments.as_ref().unwrap();
    assert_eq!(
        arguments.get("x0"),
        Some(&RegisterContents::Immediate(sample.classref_uifont))
    );
    assert_eq!(
        arguments.get("x1"),
        Some(&RegisterContents::Immediate(sample.selref_sysfont))
    );

    // Wrong argument expectation: no match.
    let search = CodeSearch::requiring_all(vec![CodeSearchTerm::FunctionCallWithArguments {
        address: VirtualAddress(sample.stub_msgsend),
        arguments: vec![("x0".to_string(), RegisterContents::FunctionArg(0))],
    }]);
    assert!(function.search_call_graph(&search).is_empty());
}

#[test]
fn test_search_operand_term() {
    let (sample, _image, analyzer) = sample_analyzer();
    let function = analyzer
        .function_analyzer(VirtualAddress(sample.f_configure))
        .unwrap();

    let search = CodeSearch::requiring_all(vec![
        CodeSearchTerm::InstructionMnemonic {
            mnemonic: "mov".to_string(),
        },
        CodeSearchTerm::InstructionOperand {
            index: 0,
            operand: sidearm_analyze::Operand::reg("x19"),
        },
    ]);
    let results = function.search_call_graph(&search);
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].instruction_index, 0);
}
