//! End-to-end machine scenarios: assemble, load, run, observe.

use asm_arm2::Assembler;
use emu_arm2::machine::{Machine, StepOutcome};
use emu_arm2::swi::{HostIo, IoWait};
use cpu_arm2::{PC, SP};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Console capture for tests: canned input, recorded output.
#[derive(Default)]
struct CaptureIo {
    output: Arc<Mutex<Vec<u8>>>,
    input: VecDeque<u8>,
}

impl CaptureIo {
    fn with_input(text: &str) -> (Self, Arc<Mutex<Vec<u8>>>) {
        let output = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                output: Arc::clone(&output),
                input: text.bytes().collect(),
            },
            output,
        )
    }
}

impl HostIo for CaptureIo {
    fn write_stdout(&mut self, bytes: &[u8]) {
        self.output.lock().expect("output").extend_from_slice(bytes);
    }

    fn read_char(&mut self) -> IoWait<u8> {
        match self.input.pop_front() {
            Some(b) => IoWait::Ready(b),
            None => IoWait::Ready(0),
        }
    }

    fn read_line(&mut self) -> IoWait<String> {
        let mut line = String::new();
        while let Some(b) = self.input.pop_front() {
            if b == b'\n' {
                break;
            }
            line.push(b as char);
        }
        IoWait::Ready(line)
    }
}

fn machine_for(src: &str, input: &str) -> (Machine, Arc<Mutex<Vec<u8>>>) {
    let program = Assembler::new()
        .assemble_source(src, "test.s")
        .expect("assembles");
    let (io, output) = CaptureIo::with_input(input);
    let mut machine = Machine::with_io(Box::new(io));
    machine.load(&program).expect("loads");
    (machine, output)
}

/// Run until halt or error, with a step bound to keep tests finite.
fn run_to_halt(machine: &mut Machine) -> u32 {
    for _ in 0..1_000_000 {
        match machine.step().expect("no runtime error") {
            report if report.outcome == StepOutcome::Halted => {
                return machine.exit_code().expect("exit code");
            }
            _ => {}
        }
    }
    panic!("program did not halt within the step limit");
}

fn stdout_text(output: &Arc<Mutex<Vec<u8>>>) -> String {
    String::from_utf8_lossy(&output.lock().expect("output")).into_owned()
}

#[test]
fn scenario_mov_exit() {
    let (mut m, _) = machine_for("MOV R0, #42\nSWI #0\n", "");
    assert_eq!(m.cpu.regs.r[PC], 0x8000, "PC at entry after load");

    let s1 = m.step().expect("step 1");
    assert_eq!(s1.outcome, StepOutcome::Executed);
    assert_eq!(m.cpu.regs.r[0], 42);

    let s2 = m.step().expect("step 2");
    assert_eq!(s2.outcome, StepOutcome::Halted);
    assert_eq!(m.exit_code(), Some(42));
}

#[test]
fn scenario_literal_pool_load() {
    let (mut m, _) = machine_for("LDR R0, =0x12345678\nSWI #0\n", "");
    m.step().expect("ldr");
    assert_eq!(m.cpu.regs.r[0], 0x1234_5678);
}

#[test]
fn scenario_recursive_factorial() {
    let src = "\
        MOV R0, #5\n\
        BL fact\n\
        SWI #3\n\
        MOV R0, #10\n\
        SWI #1\n\
        MOV R0, #0\n\
        SWI #0\n\
fact:   CMP R0, #1\n\
        MOVLE R0, #1\n\
        MOVLE PC, LR\n\
        PUSH {R1, LR}\n\
        MOV R1, R0\n\
        SUB R0, R0, #1\n\
        BL fact\n\
        MUL R0, R1, R0\n\
        POP {R1, PC}\n";
    let (mut m, output) = machine_for(src, "");
    let initial_sp = m.cpu.regs.r[SP];

    let code = run_to_halt(&mut m);
    assert_eq!(code, 0);
    assert_eq!(stdout_text(&output), "120\n");
    assert!(m.cpu.cycles() > 0);
    assert_eq!(m.cpu.regs.r[SP], initial_sp, "SP balanced on halt");
}

#[test]
fn scenario_push_pop_preserves_registers() {
    let src = "\
        MOV R0, #1\n\
        MOV R1, #2\n\
        MOV R2, #3\n\
        MOV R3, #4\n\
        BL sub\n\
        SWI #0\n\
sub:    PUSH {R0-R3, LR}\n\
        MOV R0, #99\n\
        MOV R3, #99\n\
        POP {R0-R3, PC}\n";
    let (mut m, _) = machine_for(src, "");
    run_to_halt(&mut m);
    assert_eq!(m.cpu.regs.r[0], 1);
    assert_eq!(m.cpu.regs.r[1], 2);
    assert_eq!(m.cpu.regs.r[2], 3);
    assert_eq!(m.cpu.regs.r[3], 4);
}

#[test]
fn scenario_condition_codes() {
    let src = "\
        MOV R0, #5\n\
        MOV R1, #5\n\
        CMP R0, R1\n\
        MOVEQ R2, #99\n\
        MOVNE R2, #0\n\
        SWI #0\n";
    let (mut m, _) = machine_for(src, "");
    run_to_halt(&mut m);
    assert_eq!(m.cpu.regs.r[2], 99);
}

#[test]
fn console_write_string() {
    let src = "\
        LDR R0, =msg\n\
        SWI #2\n\
        MOV R0, #0\n\
        SWI #0\n\
msg:    .asciz \"Hello, ARM\"\n";
    let (mut m, output) = machine_for(src, "");
    run_to_halt(&mut m);
    assert_eq!(stdout_text(&output), "Hello, ARM");
}

#[test]
fn console_read_int_echo() {
    let src = "\
        SWI #6\n\
        SWI #3\n\
        MOV R0, #0\n\
        SWI #0\n";
    let (mut m, output) = machine_for(src, "37\n");
    run_to_halt(&mut m);
    assert_eq!(stdout_text(&output), "37");
}

#[test]
fn read_string_into_buffer() {
    let src = "\
        LDR R0, =buf\n\
        MOV R1, #16\n\
        SWI #5\n\
        MOV R2, R0\n\
        LDR R0, =buf\n\
        SWI #2\n\
        MOV R0, #0\n\
        SWI #0\n\
        .data\n\
buf:    .space 16\n";
    let (mut m, output) = machine_for(src, "hi there\n");
    run_to_halt(&mut m);
    assert_eq!(stdout_text(&output), "hi there");
    assert_eq!(m.cpu.regs.r[2], 8, "READ_STRING returns the length");
}

#[test]
fn heap_alloc_returns_aligned_pointers() {
    let src = "\
        MOV R0, #12\n\
        SWI #0x20\n\
        MOV R4, R0\n\
        MOV R0, #12\n\
        SWI #0x20\n\
        MOV R5, R0\n\
        SWI #0\n";
    let (mut m, _) = machine_for(src, "");
    run_to_halt(&mut m);
    let first = m.cpu.regs.r[4];
    let second = m.cpu.regs.r[5];
    assert_ne!(first, 0);
    assert_eq!(first % 8, 0);
    assert!(second >= first + 12);
}

#[test]
fn runtime_error_carries_disassembly() {
    // Jump into the data segment: fetch is denied there
    let src = "\
        LDR R0, =0x20000\n\
        BX R0\n";
    let (mut m, _) = machine_for(src, "");
    m.step().expect("ldr");
    m.step().expect("bx");
    let err = m.step().expect_err("fetch from data must fail");
    assert_eq!(err.pc, 0x20000);
}

#[test]
fn unaligned_word_store_faults() {
    let src = "\
        LDR R0, =0x20001\n\
        MOV R1, #1\n\
        STR R1, [R0]\n";
    let (mut m, _) = machine_for(src, "");
    m.step().expect("ldr");
    m.step().expect("mov");
    let err = m.step().expect_err("unaligned store");
    assert!(err.to_string().contains("unaligned"));
}

#[test]
fn file_io_round_trip() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("out.bin");
    let path_str = path.display().to_string();

    // Write "AB" to the file, close, reopen, read back into memory
    let src = format!(
        "\
        LDR R0, =path\n\
        MOV R1, #1\n\
        SWI #0x10\n\
        MOV R4, R0\n\
        LDR R1, =data\n\
        MOV R2, #2\n\
        SWI #0x13\n\
        MOV R0, R4\n\
        SWI #0x11\n\
        LDR R0, =path\n\
        MOV R1, #0\n\
        SWI #0x10\n\
        MOV R4, R0\n\
        LDR R1, =readback\n\
        MOV R2, #2\n\
        SWI #0x12\n\
        MOV R5, R0\n\
        MOV R0, R4\n\
        SWI #0x11\n\
        SWI #0\n\
        .data\n\
path:   .asciz \"{path_str}\"\n\
data:   .ascii \"AB\"\n\
readback: .space 2\n"
    );
    let (mut m, _) = machine_for(&src, "");
    run_to_halt(&mut m);
    assert_eq!(m.cpu.regs.r[5], 2, "read two bytes back");
    assert_eq!(std::fs::read(&path).expect("file exists"), b"AB");
}
