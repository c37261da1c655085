//! Black-box end-to-end assembly scenarios, exercised through the public
//! API the way an external caller of this crate would use it.

use clrx_asm_core::config::{AsmConfig, BinaryFormat};
use clrx_asm_core::format::RawCodeHandler;
use clrx_asm_core::gpu::GpuDevice;
use clrx_asm_core::lexer::FileSource;
use clrx_asm_core::Assembler;

struct NoIncludes;

impl FileSource for NoIncludes {
    fn read_file(&mut self, _path: &str, _include_paths: &[String]) -> std::io::Result<String> {
        Err(std::io::Error::new(std::io::ErrorKind::NotFound, "no includes in this test"))
    }
}

fn raw_code_assembler() -> Assembler {
    let config = AsmConfig::new(GpuDevice::Bonaire, BinaryFormat::RawCode);
    Assembler::new(config, Box::new(RawCodeHandler::default()))
}

/// `.text\nstart: .int 3,5,6\nlabel1: vx0=start\nvx2=label1+6` ⇒ three
/// little-endian words plus four symbols at the expected addresses.
#[test]
fn raw_code_forward_labels_and_data_directive() {
    let mut asm = raw_code_assembler();
    let mut files = NoIncludes;
    let src = ".text\nstart: .int 3,5,6\nlabel1: vx0=start\nvx2=label1+6\n";
    let good = asm.assemble("s1.s", src, &mut files, None).unwrap();
    assert!(good, "diagnostics: {:?}", asm.diagnostics().diagnostics());

    let text = asm.sections().iter().find(|s| s.name == ".text").unwrap();
    let mut expected = Vec::new();
    expected.extend_from_slice(&3u32.to_le_bytes());
    expected.extend_from_slice(&5u32.to_le_bytes());
    expected.extend_from_slice(&6u32.to_le_bytes());
    assert_eq!(text.content, expected);

    let value_of = |asm: &Assembler, name: &str| -> i64 {
        let id = asm.symbols().lookup(name).expect("symbol defined");
        asm.symbols().get(id).value
    };
    assert_eq!(value_of(&asm, "start"), 0);
    assert_eq!(value_of(&asm, "label1"), 12);
    assert_eq!(value_of(&asm, "vx0"), 0);
    assert_eq!(value_of(&asm, "vx2"), 18);
}

/// `.fillq 5,8,0x907856453412cdba` ⇒ 40 bytes, the full 64-bit value
/// (little-endian) repeated five times.
#[test]
fn fillq_preserves_the_full_64_bit_value() {
    let mut asm = raw_code_assembler();
    let mut files = NoIncludes;
    let good = asm
        .assemble("s6.s", ".text\n.fillq 5,8,0x907856453412cdba\n", &mut files, None)
        .unwrap();
    assert!(good, "diagnostics: {:?}", asm.diagnostics().diagnostics());

    let text = asm.sections().iter().find(|s| s.name == ".text").unwrap();
    let mut expected = Vec::new();
    let word: u64 = 0x907856453412cdba;
    for _ in 0..5 {
        expected.extend_from_slice(&word.to_le_bytes());
    }
    assert_eq!(text.content, expected);
}

/// `.eqv` freezes the value of the right-hand side at definition time; a
/// later reassignment of a symbol it referenced does not change it, while
/// a plain `=` does the same eager-evaluation-at-definition freeze.
#[test]
fn eqv_and_plain_assignment_both_evaluate_eagerly_at_definition() {
    let mut asm = raw_code_assembler();
    let mut files = NoIncludes;
    let src = "x = 3\n.eqv y, x+1\nz = x+1\nx = 10\n";
    let good = asm.assemble("eqv.s", src, &mut files, None).unwrap();
    assert!(good, "diagnostics: {:?}", asm.diagnostics().diagnostics());

    let value_of = |asm: &Assembler, name: &str| -> i64 {
        let id = asm.symbols().lookup(name).expect("symbol defined");
        asm.symbols().get(id).value
    };
    assert_eq!(value_of(&asm, "y"), 4);
    assert_eq!(value_of(&asm, "z"), 4);
    assert_eq!(value_of(&asm, "x"), 10);
}

/// Two symbols defined only in terms of each other never resolve, and
/// produce exactly one diagnostic per symbol.
#[test]
fn mutually_dependent_assignments_never_resolve() {
    let mut asm = raw_code_assembler();
    let mut files = NoIncludes;
    let good = asm.assemble("cycle.s", "a = b+1\nb = a+1\n", &mut files, None).unwrap();
    assert!(!good);
    assert_eq!(asm.diagnostics().diagnostics().len(), 2);
    assert!(asm.symbols().lookup("a").map_or(true, |id| !asm.symbols().get(id).is_resolved()));
    assert!(asm.symbols().lookup("b").map_or(true, |id| !asm.symbols().get(id).is_resolved()));
}
