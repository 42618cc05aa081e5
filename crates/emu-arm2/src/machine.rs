//! Top-level ARM2 machine: CPU, segmented memory, and the SWI host.
//!
//! One `step()` executes one instruction and resolves any SWI it raises.
//! The CPU leaves PC on a SWI instruction; the machine advances it only
//! when the call completes, so a blocked console read retries the same
//! instruction after `send_input` with no state rewinding.

use crate::error::{RuntimeError, RuntimeErrorKind};
use crate::memory::Memory;
use crate::swi::{HostIo, SwiHost, SwiOutcome, StdIo};
use asm_arm2::{disassemble, Program};
use cpu_arm2::{Arm2, CpuError, StepEvent, PC, SP};

/// What one machine step did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// Instruction executed (or was condition-skipped).
    Executed,
    /// EXIT SWI: the program halted with the code in `exit_code()`.
    Halted,
    /// A console read is waiting for input; PC unchanged, retry later.
    WaitingForInput,
    /// The guest requested a breakpoint trap (SWI 0xF0).
    BreakpointTrap,
}

/// Per-step report used by the debugger and diagnostics.
#[derive(Debug, Clone, Copy)]
pub struct MachineStep {
    pub outcome: StepOutcome,
    /// PC of the executed instruction.
    pub pc: u32,
    /// The instruction word.
    pub word: u32,
    pub cycles: u32,
    pub regs_read: u16,
    pub regs_written: u16,
}

/// The assembled machine.
pub struct Machine {
    pub cpu: Arm2,
    pub memory: Memory,
    swi: SwiHost,
    io: Box<dyn HostIo>,
    exit_code: Option<u32>,
}

impl Default for Machine {
    fn default() -> Self {
        Self::new()
    }
}

impl Machine {
    /// A machine with the default memory layout and real-terminal I/O.
    #[must_use]
    pub fn new() -> Self {
        Self::with_io(Box::new(StdIo))
    }

    /// A machine with caller-supplied console I/O (sessions use a pipe).
    #[must_use]
    pub fn with_io(io: Box<dyn HostIo>) -> Self {
        Self {
            cpu: Arm2::new(),
            memory: Memory::with_default_layout(),
            swi: SwiHost::new(),
            io,
            exit_code: None,
        }
    }

    /// Replace the memory layout (configuration). Resets the machine.
    pub fn set_memory(&mut self, memory: Memory) {
        self.memory = memory;
        self.reset();
    }

    /// Exit code from the EXIT SWI, once halted.
    #[must_use]
    pub fn exit_code(&self) -> Option<u32> {
        self.exit_code
    }

    /// Full reset: registers, flags, counters, memory, SWI state.
    pub fn reset(&mut self) {
        self.cpu.reset();
        self.memory.reset();
        self.swi.reset();
        self.exit_code = None;
    }

    /// Install a program: wipe state, copy every chunk into memory, set
    /// PC to the entry point and SP to the stack top.
    pub fn load(&mut self, program: &Program) -> Result<(), RuntimeError> {
        self.reset();
        for chunk in &program.chunks {
            self.memory
                .load_bytes(chunk.address, &chunk.bytes)
                .map_err(|fault| RuntimeError {
                    kind: RuntimeErrorKind::from_fault(fault, None),
                    pc: chunk.address,
                    instruction: String::new(),
                })?;
        }
        self.cpu.regs.r[PC] = program.entry_point;
        self.cpu.regs.r[SP] = crate::memory::STACK_TOP;
        Ok(())
    }

    /// Execute one instruction.
    pub fn step(&mut self) -> Result<MachineStep, RuntimeError> {
        let pc = self.cpu.regs.r[PC];
        self.memory.clear_accesses();

        let step = self
            .cpu
            .step(&mut self.memory)
            .map_err(|e| self.runtime_error(e))?;

        let mut report = MachineStep {
            outcome: StepOutcome::Executed,
            pc,
            word: self.memory.peek_word(pc).unwrap_or(0),
            cycles: step.cycles,
            regs_read: step.regs_read,
            regs_written: step.regs_written,
        };

        if let StepEvent::Swi(number) = step.event {
            let cycles = self.cpu.cycles();
            let outcome = self
                .swi
                .dispatch(
                    number,
                    &mut self.cpu.regs,
                    &mut self.memory,
                    self.io.as_mut(),
                    cycles,
                )
                .map_err(|kind| self.error_at(pc, kind))?;
            match outcome {
                SwiOutcome::Continue => self.cpu.regs.r[PC] = pc.wrapping_add(4),
                SwiOutcome::Exit(code) => {
                    self.exit_code = Some(code);
                    self.cpu.regs.r[PC] = pc.wrapping_add(4);
                    report.outcome = StepOutcome::Halted;
                }
                SwiOutcome::WaitInput => {
                    report.outcome = StepOutcome::WaitingForInput;
                }
                SwiOutcome::BreakpointTrap => {
                    self.cpu.regs.r[PC] = pc.wrapping_add(4);
                    report.outcome = StepOutcome::BreakpointTrap;
                }
            }
        }

        Ok(report)
    }

    /// Build a runtime error with PC and disassembly context.
    fn runtime_error(&self, e: CpuError) -> RuntimeError {
        let pc = self.cpu.regs.r[PC];
        let kind = match e {
            CpuError::Fetch { addr, .. } => RuntimeErrorKind::InvalidFetch { addr },
            CpuError::Mem { fault } => {
                RuntimeErrorKind::from_fault(fault, self.memory.stack_floor())
            }
            CpuError::Unsupported { word, .. } => RuntimeErrorKind::UnsupportedInstruction { word },
        };
        self.error_at(pc, kind)
    }

    fn error_at(&self, pc: u32, kind: RuntimeErrorKind) -> RuntimeError {
        let instruction = self
            .memory
            .peek_word(pc)
            .map(|w| disassemble(w, pc))
            .unwrap_or_default();
        RuntimeError {
            kind,
            pc,
            instruction,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use asm_arm2::Assembler;

    fn load(src: &str) -> Machine {
        let program = Assembler::new()
            .assemble_source(src, "test.s")
            .expect("assembles");
        let mut machine = Machine::new();
        machine.load(&program).expect("loads");
        machine
    }

    #[test]
    fn exit_swi_halts_with_code() {
        let mut m = load("MOV R0, #42\nSWI #0\n");
        let s1 = m.step().expect("step 1");
        assert_eq!(s1.outcome, StepOutcome::Executed);
        assert_eq!(m.cpu.regs.r[0], 42);
        let s2 = m.step().expect("step 2");
        assert_eq!(s2.outcome, StepOutcome::Halted);
        assert_eq!(m.exit_code(), Some(42));
    }

    #[test]
    fn load_sets_pc_and_sp() {
        let m = load("MOV R0, #1\nSWI #0\n");
        assert_eq!(m.cpu.regs.r[PC], 0x8000);
        assert_eq!(m.cpu.regs.r[SP], crate::memory::STACK_TOP);
    }

    #[test]
    fn invalid_swi_reports_context() {
        let mut m = load("SWI #0xE0\n");
        let err = m.step().expect_err("invalid SWI");
        assert_eq!(err.kind, RuntimeErrorKind::InvalidSwi { number: 0xE0 });
        assert_eq!(err.pc, 0x8000);
        assert!(err.instruction.contains("SWI"));
    }

    #[test]
    fn literal_pool_load_executes() {
        let mut m = load("LDR R0, =0x12345678\nSWI #0\n");
        m.step().expect("ldr");
        assert_eq!(m.cpu.regs.r[0], 0x1234_5678);
    }
}
