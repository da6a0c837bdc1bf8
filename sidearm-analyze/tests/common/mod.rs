//! Shared test support: a scripted stand-in for the disassembler oracle.
//!
//! The synthetic image's `__text` bytes are zeros; instruction semantics
//! enter the tests exclusively through the scripts below, keyed by function
//! entry address.

use std::collections::HashMap;
use std::sync::Arc;

use sidearm_analyze::{Instruction, InstructionDecoder, MachAnalyzer, Operand};
use sidearm_common::{ByteView, VirtualAddress};
use sidearm_macho::MachImage;
use sidearm_testutils::SyntheticImage;

/// A decoder that replays pre-scripted instruction lists per base address.
pub struct ScriptedDecoder {
    scripts: HashMap<u64, Vec<Instruction>>,
}

impl InstructionDecoder for ScriptedDecoder {
    fn decode(&self, _bytes: &[u8], base_address: VirtualAddress) -> Vec<Instruction> {
        self.scripts
            .get(&base_address.get())
            .cloned()
            .unwrap_or_default()
    }
}

fn reg(name: &str) -> Operand {
    Operand::reg(name)
}

fn imm(value: i64) -> Operand {
    Operand::imm(value)
}

fn mem(base: &str, displacement: i64) -> Operand {
    Operand::mem(base, displacement)
}

fn ins(address: u64, mnemonic: &str, operands: Vec<Operand>) -> Instruction {
    Instruction::new(address, mnemonic, operands)
}

/// A three-instruction stub trampoline: load the lazy pointer slot, jump
/// through it.
fn stub_script(entry: u64, slot: u64) -> Vec<Instruction> {
    let page = slot & !0xfff;
    let offset = (slot & 0xfff) as i64;
    vec![
        ins(entry, "adrp", vec![reg("x16"), imm(page as i64)]),
        ins(entry + 4, "ldr", vec![reg("x16"), mem("x16", offset)]),
        Instruction::indirect_branch(entry + 8, "br", vec![reg("x16")]),
    ]
}

/// Builds the instruction scripts matching the synthetic image's layout.
pub fn scripted_decoder(image: &SyntheticImage) -> Arc<ScriptedDecoder> {
    let mut scripts = HashMap::new();
    let data_page = 0x1_0000_4000u64;

    // _main: a msgSend with class and selector, an objc_opt_new, a local
    // call and a plain C call.
    let entry = image.f_main;
    scripts.insert(
        entry,
        vec![
            ins(entry, "stp", vec![reg("x29"), reg("x30"), mem("sp", -16)]),
            ins(entry + 0x04, "adrp", vec![reg("x0"), imm(data_page as i64)]),
            ins(
                entry + 0x08,
                "ldr",
                vec![reg("x0"), mem("x0", (image.classref_uifont - data_page) as i64)],
            ),
            ins(entry + 0x0c, "adrp", vec![reg("x1"), imm(data_page as i64)]),
            ins(
                entry + 0x10,
                "ldr",
                vec![reg("x1"), mem("x1", (image.selref_sysfont - data_page) as i64)],
            ),
            Instruction::branch(entry + 0x14, "bl", image.stub_msgsend),
            ins(entry + 0x18, "adrp", vec![reg("x0"), imm(data_page as i64)]),
            ins(
                entry + 0x1c,
                "ldr",
                vec![reg("x0"), mem("x0", (image.classref_dtlabel - data_page) as i64)],
            ),
            Instruction::branch(entry + 0x20, "bl", image.stub_opt_new),
            ins(entry + 0x24, "mov", vec![reg("x0"), imm(0)]),
            Instruction::branch(entry + 0x28, "bl", image.f_configure),
            ins(entry + 0x2c, "adrp", vec![reg("x0"), imm(0x1_0000_1000)]),
            Instruction::branch(entry + 0x30, "bl", image.stub_nslog),
            ins(entry + 0x34, "nop", vec![]),
            ins(entry + 0x38, "ldp", vec![reg("x29"), reg("x30"), mem("sp", 0)]),
            Instruction::indirect_branch(entry + 0x3c, "ret", vec![]),
        ],
    );

    // -[DTLabel configureLabel]: a msgSend whose receiver is the function's
    // own first argument, then a SecTrustEvaluate call.
    let entry = image.f_configure;
    scripts.insert(
        entry,
        vec![
            ins(entry, "mov", vec![reg("x19"), reg("x0")]),
            ins(entry + 0x04, "adrp", vec![reg("x8"), imm(data_page as i64)]),
            ins(
                entry + 0x08,
                "add",
                vec![
                    reg("x8"),
                    reg("x8"),
                    imm((image.selref_configure - data_page) as i64),
                ],
            ),
            ins(entry + 0x0c, "ldr", vec![reg("x1"), mem("x8", 0)]),
            ins(entry + 0x10, "mov", vec![reg("x0"), reg("x19")]),
            Instruction::branch(entry + 0x14, "bl", image.stub_msgsend),
            ins(entry + 0x18, "nop", vec![]),
            ins(entry + 0x1c, "mov", vec![reg("x2"), imm(0x10)]),
            Instruction::branch(entry + 0x20, "bl", image.stub_sectrust),
            ins(entry + 0x24, "nop", vec![]),
            ins(entry + 0x28, "nop", vec![]),
            ins(entry + 0x2c, "nop", vec![]),
            ins(entry + 0x30, "nop", vec![]),
            ins(entry + 0x34, "nop", vec![]),
            ins(entry + 0x38, "nop", vec![]),
            Instruction::indirect_branch(entry + 0x3c, "ret", vec![]),
        ],
    );

    // -[DTLabel logLabel]: calls configureLabel, then a msgSend with only
    // the selector recovered.
    let entry = image.f_log;
    scripts.insert(
        entry,
        vec![
            ins(entry, "stp", vec![reg("x29"), reg("x30"), mem("sp", -16)]),
            Instruction::branch(entry + 0x04, "bl", image.f_configure),
            ins(entry + 0x08, "adrp", vec![reg("x1"), imm(data_page as i64)]),
            ins(
                entry + 0x0c,
                "add",
                vec![
                    reg("x1"),
                    reg("x1"),
                    imm((image.selref_log - data_page) as i64),
                ],
            ),
            ins(entry + 0x10, "ldr", vec![reg("x1"), mem("x1", 0)]),
            Instruction::branch(entry + 0x14, "bl", image.stub_msgsend),
            ins(entry + 0x18, "nop", vec![]),
            ins(entry + 0x1c, "nop", vec![]),
            ins(entry + 0x20, "nop", vec![]),
            ins(entry + 0x24, "nop", vec![]),
            ins(entry + 0x28, "nop", vec![]),
            ins(entry + 0x2c, "nop", vec![]),
            ins(entry + 0x30, "nop", vec![]),
            ins(entry + 0x34, "nop", vec![]),
            ins(entry + 0x38, "ldp", vec![reg("x29"), reg("x30"), mem("sp", 0)]),
            Instruction::indirect_branch(entry + 0x3c, "ret", vec![]),
        ],
    );

    // -[DTView configureLabel]: a local conditional branch, no calls.
    let entry = image.f_view_configure;
    let mut view = vec![Instruction::conditional_branch(entry, "cbz", entry + 0x18)];
    view.push(ins(entry + 0x04, "nop", vec![]));
    view.push(ins(entry + 0x08, "mov", vec![reg("w5"), imm(7)]));
    view.push(ins(entry + 0x0c, "mov", vec![reg("x3"), reg("x5")]));
    for index in 4..15 {
        view.push(ins(entry + index * 4, "nop", vec![]));
    }
    view.push(Instruction::indirect_branch(entry + 0x3c, "ret", vec![]));
    scripts.insert(entry, view);

    scripts.insert(image.stub_msgsend, stub_script(image.stub_msgsend, image.la_msgsend));
    scripts.insert(image.stub_opt_new, stub_script(image.stub_opt_new, image.la_opt_new));
    scripts.insert(image.stub_nslog, stub_script(image.stub_nslog, image.la_nslog));
    scripts.insert(
        image.stub_sectrust,
        stub_script(image.stub_sectrust, image.la_sectrust),
    );

    Arc::new(ScriptedDecoder { scripts })
}

/// Parses the sample image and returns its memoized analyzer.
pub fn sample_analyzer() -> (SyntheticImage, Arc<MachImage>, Arc<MachAnalyzer>) {
    let sample = sidearm_testutils::build_sample_image();
    let view = ByteView::from_vec(sample.data.clone());
    let image = MachImage::parse(view).expect("synthetic image must parse");
    let analyzer = MachAnalyzer::get_analyzer(&image, scripted_decoder(&sample))
        .expect("synthetic image must analyze");
    (sample, image, analyzer)
}
