//! End-to-end scenarios from the specification's testable-properties
//! section: assemble a literal source string and drive [`Cpu::execute`] to
//! completion, inspecting the resulting GPU buffer, register file, or
//! returned [`AssembleError`] variant.

use evil_vm::{assembler, AccessPolicy, AssembleError, Cpu, Gpu, Memory, Outcome, Register, TypeRegistry, VmConfig};

fn small_types() -> TypeRegistry {
    // 2-byte words/addrs keep the generated programs short for these tests.
    TypeRegistry::new(2, 2, 2, 2, 8)
}

/// S1 — Hello via loop: `"Hello\0"` lives in the program image; the CLI's
/// `-m ram=program` aliasing (exercised here by cloning the assembled
/// image into RAM directly) lets `ldb.r` walk it as though it were data.
#[test]
fn s1_hello_via_loop() {
    let types = small_types();
    let source = r#"
        jmp main
        msg:
        db "Hello", 0
        main:
        movw.i2r C, 0
        loop_top:
        movw.i2r B, msg
        add.r B, C
        ldb.r A, B
        je done
        out
        add.b C, 1
        jmp loop_top
        done:
        halt
    "#;
    let program = assembler::assemble(source, &types).unwrap();
    let ram = Memory::from_cells(types.char_bit(), program.cells().to_vec(), AccessPolicy::Plain);
    let stack = Memory::zeroed(types.char_bit(), 16, AccessPolicy::Plain);
    let gpu = Gpu::new(80, 1, Vec::new());
    let mut cpu = Cpu::new(&types, program, ram, stack, gpu);
    assert_eq!(cpu.execute(Some(10_000)), Outcome::Halted);

    let gpu = cpu.into_gpu();
    let text: String = gpu.cells()[..5].iter().filter_map(|&c| char::from_u32(c)).collect();
    assert_eq!(text, "Hello");
}

/// S2 — call/ret balance: `call f; halt; f: ret` must return with RP
/// restored to its initial value and terminate via `halt`.
#[test]
fn s2_call_ret_balance() {
    let types = small_types();
    let source = "call f\nhalt\nf:\nret";
    let program = assembler::assemble(source, &types).unwrap();
    let stack_len = 16;
    let ram = Memory::zeroed(types.char_bit(), 16, AccessPolicy::Plain);
    let stack = Memory::zeroed(types.char_bit(), stack_len, AccessPolicy::Plain);
    let gpu = Gpu::new(8, 1, Vec::new());
    let mut cpu = Cpu::new(&types, program, ram, stack, gpu);
    assert_eq!(cpu.execute(Some(1_000)), Outcome::Halted);
    assert_eq!(cpu.registers().get(Register::Rp), stack_len as i128);
}

/// S3 — a label redefined (or a label colliding with a constant name)
/// must fail `DuplicateSymbol` before any bytecode is emitted.
#[test]
fn s3_duplicate_symbol_fails_before_emission() {
    let types = small_types();
    let err = assembler::assemble("foo:\nfoo:\nhalt", &types).unwrap_err();
    assert!(matches!(err, AssembleError::DuplicateSymbol { name, .. } if name == "foo"));

    let err = assembler::assemble("foo:\nfoo = 1\nhalt", &types).unwrap_err();
    assert!(matches!(err, AssembleError::DuplicateSymbol { name, .. } if name == "foo"));
}

/// S4 — `A = B` and `B = A` must fail `CircularConstant`.
#[test]
fn s4_circular_constant_fails() {
    let types = small_types();
    let err = assembler::assemble("A = B\nB = A\nhalt", &types).unwrap_err();
    assert!(matches!(err, AssembleError::CircularConstant { .. }));
}

/// S5 — with default alignment, `movw.r2m 3, A` on a `StrictlyAligned`
/// RAM raises `Unaligned` at runtime; the fault is tolerated and execution
/// proceeds to the following instruction.
#[test]
fn s5_unaligned_access_is_tolerated() {
    let config = VmConfig::default();
    let types = config.type_registry();
    let source = "movw.r2m 3, A\nhalt";
    let program = assembler::assemble(source, &types).unwrap();
    let ram = Memory::zeroed(types.char_bit(), 32, AccessPolicy::StrictlyAligned);
    let stack = Memory::zeroed(types.char_bit(), 16, AccessPolicy::Plain);
    let gpu = Gpu::new(8, 1, Vec::new());
    let mut cpu = Cpu::new(&types, program, ram, stack, gpu);
    // The faulting instruction is skipped over (IP already advanced before
    // the handler ran), so execution reaches `halt` and terminates cleanly.
    assert_eq!(cpu.execute(Some(10)), Outcome::Halted);
}

/// S6 — bit-exact program image: with `char_bit = 9` and default word/addr
/// sizes, `movw.i2r A, 1` must produce the opcode byte followed by the
/// register ordinal and a 7-cell encoding of `1` in base `2^9`, ordered
/// per the opcode's parity (even opcode -> Big-endian).
#[test]
fn s6_bit_exact_program_image() {
    let config = VmConfig::default();
    let types = config.type_registry();
    let program = assembler::assemble("movw.i2r A, 1", &types).unwrap();

    let op = evil_vm::isa::by_mnemonic("movw.i2r").unwrap();
    assert_eq!(op.opcode % 2, 0, "movw.i2r is expected to be an even opcode");

    assert_eq!(program.len(), 1 + 1 + 7);
    assert_eq!(program.get(0).unwrap(), op.opcode as u64);
    assert_eq!(program.get(1).unwrap(), Register::A.ordinal() as u64);
    for i in 2..8 {
        assert_eq!(program.get(i).unwrap(), 0, "leading bytes of a big-endian 1 must be zero");
    }
    assert_eq!(program.get(8).unwrap(), 1);
}
