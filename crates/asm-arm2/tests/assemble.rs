//! Assembler integration tests: encodings, pools, directives, diagnostics.

use asm_arm2::{AsmErrorKind, Assembler, Program, TEXT_BASE};

fn assemble(src: &str) -> Program {
    Assembler::new()
        .assemble_source(src, "test.s")
        .expect("source should assemble")
}

fn assemble_err(src: &str) -> Vec<asm_arm2::AsmError> {
    Assembler::new()
        .assemble_source(src, "test.s")
        .expect_err("source should fail")
}

fn word(program: &Program, addr: u32) -> u32 {
    program.word_at(addr).unwrap_or_else(|| panic!("no word at {addr:#X}"))
}

#[test]
fn mov_immediate_encoding() {
    let p = assemble("MOV R0, #42\n");
    assert_eq!(word(&p, TEXT_BASE), 0xE3A0_002A);
}

#[test]
fn rotated_immediate_encoding() {
    let p = assemble("MOV R0, #0x8000\nMOV R1, #0xFF000000\n");
    // 0x8000 = 0x02 ror 18 (rotate field 9)
    assert_eq!(word(&p, TEXT_BASE), 0xE3A0_0902);
    // 0xFF000000 = 0xFF ror 8 (rotate field 4)
    assert_eq!(word(&p, TEXT_BASE + 4), 0xE3A0_14FF);
}

#[test]
fn mov_unencodable_becomes_mvn() {
    // 0xFFFFFFFE is not a rotated immediate, but its complement 1 is
    let p = assemble("MOV R0, #0xFFFFFFFE\n");
    assert_eq!(word(&p, TEXT_BASE), 0xE3E0_0001, "MVN R0, #1");
}

#[test]
fn mvn_unencodable_becomes_mov() {
    let p = assemble("MVN R0, #0xFFFFFFFE\n");
    assert_eq!(word(&p, TEXT_BASE), 0xE3A0_0001, "MOV R0, #1");
}

#[test]
fn unrepresentable_immediate_fails() {
    let errs = assemble_err("ADD R0, R0, #0x12345\n");
    assert_eq!(errs[0].kind, AsmErrorKind::InvalidOperand);
    assert!(errs[0].message.contains("not representable"));
}

#[test]
fn condition_and_s_suffixes() {
    let p = assemble("ADDEQS R0, R1, R2\nSUBNE R3, R4, #1\n");
    assert_eq!(word(&p, TEXT_BASE), 0x0091_0002);
    assert_eq!(word(&p, TEXT_BASE + 4), 0x1244_3001);
}

#[test]
fn branch_offsets() {
    let p = assemble("start:\n    B start\n    BL start\n");
    // B at 0x8000 to 0x8000: offset = -8 bytes = -2 words
    assert_eq!(word(&p, TEXT_BASE), 0xEAFF_FFFE);
    // BL at 0x8004 to 0x8000: offset = -12 bytes = -3 words
    assert_eq!(word(&p, TEXT_BASE + 4), 0xEBFF_FFFD);
}

#[test]
fn push_pop_aliases() {
    let p = assemble("PUSH {R0-R3, LR}\nPOP {R0-R3, PC}\n");
    assert_eq!(word(&p, TEXT_BASE), 0xE92D_400F, "PUSH = STMDB SP!");
    assert_eq!(word(&p, TEXT_BASE + 4), 0xE8BD_800F, "POP = LDMIA SP!");
}

#[test]
fn block_transfer_modes() {
    let p = assemble("STMFD SP!, {R0, R1}\nLDMFD SP!, {R0, R1}\n");
    assert_eq!(word(&p, TEXT_BASE), 0xE92D_0003, "STMFD = STMDB");
    assert_eq!(word(&p, TEXT_BASE + 4), 0xE8BD_0003, "LDMFD = LDMIA");
}

#[test]
fn memory_addressing_forms() {
    let p = assemble(
        "LDR R0, [R1]\n\
         LDR R0, [R1, #4]\n\
         LDR R0, [R1, #-4]\n\
         LDR R0, [R1, R2]\n\
         LDR R0, [R1, R2, LSL #2]\n\
         LDR R0, [R1, #4]!\n\
         LDR R0, [R1], #4\n\
         STRB R0, [R1]\n",
    );
    assert_eq!(word(&p, TEXT_BASE), 0xE591_0000);
    assert_eq!(word(&p, TEXT_BASE + 4), 0xE591_0004);
    assert_eq!(word(&p, TEXT_BASE + 8), 0xE511_0004);
    assert_eq!(word(&p, TEXT_BASE + 12), 0xE791_0002);
    assert_eq!(word(&p, TEXT_BASE + 16), 0xE791_0102);
    assert_eq!(word(&p, TEXT_BASE + 20), 0xE5B1_0004);
    assert_eq!(word(&p, TEXT_BASE + 24), 0xE491_0004);
    assert_eq!(word(&p, TEXT_BASE + 28), 0xE5C1_0000);
}

#[test]
fn halfword_forms() {
    let p = assemble("LDRH R0, [R1]\nSTRH R0, [R1, #2]\nLDRSB R2, [R3]\nLDRSH R4, [R5]\n");
    assert_eq!(word(&p, TEXT_BASE), 0xE1D1_00B0);
    assert_eq!(word(&p, TEXT_BASE + 4), 0xE1C1_00B2);
    assert_eq!(word(&p, TEXT_BASE + 8), 0xE1D3_20D0);
    assert_eq!(word(&p, TEXT_BASE + 12), 0xE1D5_40F0);
}

#[test]
fn literal_pool_basics() {
    let p = assemble("LDR R0, =0x12345678\nSWI #0\n.ltorg\n");
    // Pool follows the SWI at 0x8008
    let ldr = word(&p, TEXT_BASE);
    assert_eq!(ldr & 0x0FFF_F000, 0x059F_0000, "LDR R0, [PC, #imm]");
    let offset = ldr & 0xFFF;
    let entry = TEXT_BASE + 8 + offset;
    assert_eq!(word(&p, entry), 0x1234_5678, "pool holds the constant");
}

#[test]
fn literal_pool_dedup() {
    let p = assemble(
        "LDR R0, =0x11223344\n\
         LDR R1, =0x11223344\n\
         LDR R2, =0x55667788\n\
         SWI #0\n\
         .ltorg\n\
         after:\n",
    );
    // Two unique literals: both LDRs of the first share one entry
    let w0 = word(&p, TEXT_BASE);
    let w1 = word(&p, TEXT_BASE + 4);
    let e0 = TEXT_BASE + 8 + (w0 & 0xFFF);
    let e1 = TEXT_BASE + 12 + (w1 & 0xFFF);
    assert_eq!(e0, e1, "duplicate literal expressions share a pool entry");
    assert_eq!(word(&p, e0), 0x1122_3344);
    // Pool sits at 0x8010 and holds 2 words; `after` follows it
    assert_eq!(p.symbols.value("after"), Some(TEXT_BASE + 0x10 + 8));
}

#[test]
fn pool_overflow_shifts_downstream_labels() {
    // 33 distinct literals overflow the 16-entry estimate by 17 entries;
    // labels after the pool move by (33-16)*4 = 68 bytes.
    let mut src = String::new();
    for i in 0..33 {
        src.push_str(&format!("LDR R0, ={}\n", 0x1000 + i));
    }
    src.push_str(".ltorg\nafter:\nMOV R0, #0\n");
    let p = assemble(&src);

    let pool_addr = TEXT_BASE + 33 * 4;
    assert_eq!(
        p.symbols.value("after"),
        Some(pool_addr + 33 * 4),
        "label shifted by the 68-byte pool growth"
    );
    // Every literal offset stays within the 12-bit reach
    for i in 0..33u32 {
        let w = word(&p, TEXT_BASE + 4 * i);
        assert!(w & 0xFFF <= 4095);
        let entry = TEXT_BASE + 4 * i + 8 + (w & 0xFFF);
        assert_eq!(word(&p, entry), 0x1000 + i);
    }
}

#[test]
fn pool_undershoot_shrinks_addresses() {
    // 2 literals in a pool reserved for 16: downstream labels pull back
    let p = assemble(
        "LDR R0, =0x11111111\n\
         LDR R1, =0x22222222\n\
         .ltorg\n\
         after:\nMOV R0, #0\n",
    );
    let pool_addr = TEXT_BASE + 8;
    assert_eq!(p.symbols.value("after"), Some(pool_addr + 8));
}

#[test]
fn data_directives() {
    let p = assemble(
        ".org 0x8000\n\
         .word 1, 2, -1\n\
         .half 0x1234\n\
         .byte 1, 2\n\
         .align 2\n\
         .asciz \"Hi\"\n",
    );
    assert_eq!(word(&p, 0x8000), 1);
    assert_eq!(word(&p, 0x8004), 2);
    assert_eq!(word(&p, 0x8008), 0xFFFF_FFFF);
    // .half + .byte*2 fill 0x800C..0x8010, .align 2 is already satisfied,
    // then the string bytes follow
    let chunk = &p.chunks[0];
    let off = (0x800C - chunk.address) as usize;
    assert_eq!(&chunk.bytes[off..off + 4], &[0x34, 0x12, 1, 2]);
    assert_eq!(&chunk.bytes[off + 4..off + 7], b"Hi\0");
}

#[test]
fn equ_and_symbol_arithmetic() {
    let p = assemble(
        ".equ SIZE, 16\n\
         MOV R0, #SIZE\n\
         MOV R1, #SIZE+4\n",
    );
    assert_eq!(word(&p, TEXT_BASE), 0xE3A0_0010);
    assert_eq!(word(&p, TEXT_BASE + 4), 0xE3A0_1014);
}

#[test]
fn numeric_labels_resolve_by_direction() {
    let p = assemble(
        "1:\n\
         MOV R0, #1\n\
         B 1f\n\
         MOV R0, #2\n\
         1:\n\
         B 1b\n",
    );
    // B 1f at 0x8004 targets the second `1:` at 0x800C
    assert_eq!(word(&p, TEXT_BASE + 4), 0xEA00_0000);
    // B 1b at 0x800C targets itself (greatest definition <= its address)
    assert_eq!(word(&p, TEXT_BASE + 12), 0xEAFF_FFFE);
}

#[test]
fn duplicate_label_is_reported() {
    let errs = assemble_err("a:\nMOV R0, #0\na:\n");
    assert_eq!(errs[0].kind, AsmErrorKind::DuplicateLabel);
}

#[test]
fn undefined_symbol_is_reported_at_reference() {
    let errs = assemble_err("B nowhere\n");
    assert_eq!(errs[0].kind, AsmErrorKind::UndefinedSymbol);
    assert_eq!(errs[0].loc.line, 1);
}

#[test]
fn errors_accumulate_across_lines() {
    let errs = assemble_err("FROB R0\nMOV R9, #0x123456789\nB gone\n");
    assert!(errs.len() >= 3, "one error per faulty line, got {errs:?}");
}

#[test]
fn error_includes_source_line() {
    let errs = assemble_err("MOV R0, #0x12345\n");
    assert!(errs[0].source_line.contains("MOV R0"));
}

#[test]
fn data_section_and_pc_relative_load() {
    let p = assemble(
        "LDR R0, value\n\
         SWI #0\n\
         value:\n\
         .word 99\n",
    );
    // `value` is at 0x8008; LDR at 0x8000 sees offset 0
    assert_eq!(word(&p, TEXT_BASE), 0xE59F_0000);
    assert_eq!(word(&p, TEXT_BASE + 8), 99);
}

#[test]
fn entry_point_prefers_start_symbol() {
    let p = assemble(
        "MOV R0, #0\n\
         _start:\n\
         MOV R1, #1\n",
    );
    assert_eq!(p.entry_point, TEXT_BASE + 4);
}

#[test]
fn include_resolves_relative(){
    use std::io::Write;
    let dir = tempfile::tempdir().expect("tempdir");
    let inc = dir.path().join("defs.s");
    writeln!(std::fs::File::create(&inc).expect("create"), ".equ ANSWER, 42").expect("write");
    let main = dir.path().join("main.s");
    writeln!(
        std::fs::File::create(&main).expect("create"),
        ".include \"defs.s\"\nMOV R0, #ANSWER"
    )
    .expect("write");

    let p = Assembler::new().assemble_file(&main).expect("assembles");
    assert_eq!(word(&p, TEXT_BASE), 0xE3A0_002A);
}

#[test]
fn circular_include_is_reported() {
    use std::io::Write;
    let dir = tempfile::tempdir().expect("tempdir");
    let a = dir.path().join("a.s");
    let b = dir.path().join("b.s");
    writeln!(std::fs::File::create(&a).expect("create"), ".include \"b.s\"").expect("write");
    writeln!(std::fs::File::create(&b).expect("create"), ".include \"a.s\"").expect("write");

    let errs = Assembler::new().assemble_file(&a).expect_err("cycle");
    assert!(errs.iter().any(|e| e.kind == AsmErrorKind::CircularInclude));
}

#[test]
fn assemble_then_disassemble_round_trip() {
    let lines = [
        "MOV R0, #42",
        "ADDS R1, R0, R2",
        "SUB R3, R4, #1",
        "CMP R0, #5",
        "LDR R1, [R0], #4",
        "STR R1, [R0, #4]!",
        "LDRB R2, [R3, #1]",
        "STMDB SP!, {R0, R1, LR}",
        "LDMIA SP!, {R0-R3, PC}",
        "BX LR",
        "MUL R2, R0, R1",
        "SWI 0x11",
    ];
    let src: String = lines.iter().map(|l| format!("{l}\n")).collect();
    let p = assemble(&src);
    for (i, line) in lines.iter().enumerate() {
        let addr = TEXT_BASE + 4 * i as u32;
        let dis = asm_arm2::disassemble(word(&p, addr), addr);
        assert_eq!(&dis, line, "at {addr:#X}");
    }
}

#[test]
fn source_map_marks_instructions_and_data() {
    let p = assemble("MOV R0, #1\nvalue: .word 7\n");
    assert!(p.source_map.is_instruction(TEXT_BASE));
    assert!(!p.source_map.is_instruction(TEXT_BASE + 4));
    let entry = p.source_map.lookup(TEXT_BASE).expect("entry");
    assert!(entry.text.contains("MOV R0"));
}
