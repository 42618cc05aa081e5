//! Execution tracing: instruction, memory, flag, register, and call-stack
//! traces, switchable independently from the CLI.

use crate::machine::MachineStep;
use crate::memory::Access;
use asm_arm2::disassemble;
use cpu_arm2::{decode, AccessKind, Cpsr, Instruction, Registers};
use serde::Serialize;
use std::io::Write;

/// Sink for line-oriented trace output.
pub type TraceWriter = Box<dyn Write + Send>;

/// One frame of the reconstructed call stack.
#[derive(Debug, Clone, Serialize)]
pub struct CallFrame {
    /// Address of the BL instruction.
    pub call_site: u32,
    /// Branch target (the callee).
    pub target: u32,
    /// Where the callee is expected to return.
    pub return_to: u32,
}

/// Per-register access counters.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct RegisterAccess {
    pub reads: u64,
    pub writes: u64,
}

/// Flag change record.
#[derive(Debug, Clone, Serialize)]
pub struct FlagChange {
    pub pc: u32,
    pub flags: String,
}

/// All tracing state. Individually enabled pieces are `Some`.
pub struct Tracer {
    exec: Option<TraceWriter>,
    mem: Option<TraceWriter>,
    flags: Option<Vec<FlagChange>>,
    registers: Option<[RegisterAccess; 16]>,
    stack: Option<Vec<CallFrame>>,
    last_flags: Cpsr,
}

impl Default for Tracer {
    fn default() -> Self {
        Self::new()
    }
}

impl Tracer {
    #[must_use]
    pub fn new() -> Self {
        Self {
            exec: None,
            mem: None,
            flags: None,
            registers: None,
            stack: None,
            last_flags: Cpsr::default(),
        }
    }

    pub fn enable_exec(&mut self, writer: TraceWriter) {
        self.exec = Some(writer);
    }

    pub fn enable_mem(&mut self, writer: TraceWriter) {
        self.mem = Some(writer);
    }

    pub fn enable_flags(&mut self) {
        self.flags = Some(Vec::new());
    }

    pub fn enable_registers(&mut self) {
        self.registers = Some([RegisterAccess::default(); 16]);
    }

    pub fn enable_stack(&mut self) {
        self.stack = Some(Vec::new());
    }

    /// True when any trace is active (worth calling `record`).
    #[must_use]
    pub fn active(&self) -> bool {
        self.exec.is_some()
            || self.mem.is_some()
            || self.flags.is_some()
            || self.registers.is_some()
            || self.stack.is_some()
    }

    /// Record one executed step.
    pub fn record(&mut self, step: &MachineStep, regs: &Registers, accesses: &[Access]) {
        if let Some(w) = self.exec.as_mut() {
            let _ = writeln!(
                w,
                "{:08X}  {:08X}  {}",
                step.pc,
                step.word,
                disassemble(step.word, step.pc)
            );
        }

        if let Some(w) = self.mem.as_mut() {
            for a in accesses {
                let tag = match a.kind {
                    AccessKind::Read => 'R',
                    AccessKind::Write => 'W',
                    AccessKind::Execute => 'X',
                };
                let _ = writeln!(w, "{tag} {:08X} {} pc={:08X}", a.addr, a.size, step.pc);
            }
        }

        if let Some(changes) = self.flags.as_mut() {
            if regs.cpsr != self.last_flags {
                changes.push(FlagChange {
                    pc: step.pc,
                    flags: regs.cpsr.display(),
                });
                self.last_flags = regs.cpsr;
            }
        }

        if let Some(counters) = self.registers.as_mut() {
            for n in 0..16 {
                if step.regs_read & (1 << n) != 0 {
                    counters[n].reads += 1;
                }
                if step.regs_written & (1 << n) != 0 {
                    counters[n].writes += 1;
                }
            }
        }

        if let Some(stack) = self.stack.as_mut() {
            track_call_stack(stack, step);
        }
    }

    /// Flag-change history, when enabled.
    #[must_use]
    pub fn flag_changes(&self) -> Option<&[FlagChange]> {
        self.flags.as_deref()
    }

    /// Register access counters, when enabled.
    #[must_use]
    pub fn register_access(&self) -> Option<&[RegisterAccess; 16]> {
        self.registers.as_ref()
    }

    /// Current reconstructed call stack, when enabled.
    #[must_use]
    pub fn call_stack(&self) -> Option<&[CallFrame]> {
        self.stack.as_deref()
    }

    /// Flag trace rendered as text or JSON.
    #[must_use]
    pub fn flag_report(&self, json: bool) -> String {
        let Some(changes) = self.flag_changes() else {
            return String::new();
        };
        if json {
            serde_json::to_string_pretty(changes).unwrap_or_default()
        } else {
            let mut out = String::new();
            for c in changes {
                out.push_str(&format!("{:08X}  {}\n", c.pc, c.flags));
            }
            out
        }
    }

    /// Register access analysis rendered as text or JSON.
    #[must_use]
    pub fn register_report(&self, json: bool) -> String {
        let Some(counters) = self.register_access() else {
            return String::new();
        };
        if json {
            let named: Vec<serde_json::Value> = counters
                .iter()
                .enumerate()
                .map(|(n, c)| {
                    serde_json::json!({
                        "register": Registers::name(n),
                        "reads": c.reads,
                        "writes": c.writes,
                    })
                })
                .collect();
            serde_json::to_string_pretty(&named).unwrap_or_default()
        } else {
            let mut out = String::from("register  reads      writes\n");
            for (n, c) in counters.iter().enumerate() {
                out.push_str(&format!(
                    "{:<9} {:<10} {}\n",
                    Registers::name(n),
                    c.reads,
                    c.writes
                ));
            }
            out
        }
    }

    /// Call stack rendered as text or JSON.
    #[must_use]
    pub fn stack_report(&self, json: bool) -> String {
        let Some(stack) = self.call_stack() else {
            return String::new();
        };
        if json {
            serde_json::to_string_pretty(stack).unwrap_or_default()
        } else {
            let mut out = String::new();
            for (depth, frame) in stack.iter().enumerate() {
                out.push_str(&format!(
                    "#{depth} call from {:08X} to {:08X} (returns to {:08X})\n",
                    frame.call_site, frame.target, frame.return_to
                ));
            }
            out
        }
    }
}

/// Maintain the call stack: push on BL, pop when execution reaches the
/// expected return address (covers `MOV PC, LR`, `BX LR`, and `POP {PC}`).
fn track_call_stack(stack: &mut Vec<CallFrame>, step: &MachineStep) {
    if let Some(top) = stack.last() {
        if step.pc == top.return_to {
            stack.pop();
        }
    }
    if let Instruction::Branch { link: true, offset } = decode(step.word).op {
        stack.push(CallFrame {
            call_site: step.pc,
            target: step.pc.wrapping_add(8).wrapping_add(offset as u32),
            return_to: step.pc.wrapping_add(4),
        });
    }
}
