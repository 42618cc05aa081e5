//! Thread-safe session facade.
//!
//! Every frontend (CLI debugger, API server, external GUIs) drives one
//! `Session`. All state lives behind a single mutex; each public
//! operation is one atomic step against it. Events are typed messages on
//! subscriber channels, emitted after the state mutation completes.
//!
//! Guest stdin is a buffered pipe owned by the session. A blocking
//! `READ_*` SWI never blocks while holding the state lock: the machine
//! reports `WaitingForInput` with PC still on the SWI, the executor
//! releases the lock and parks on a condvar, and `send_input` wakes it to
//! retry the same instruction. This replaces the lock-release-around-read
//! pattern such designs traditionally deadlock on.

use crate::coverage::Coverage;
use crate::debugger::{Debugger, WatchKind, WatchTarget, Watchpoint};
use crate::error::{RuntimeError, RuntimeErrorKind, SessionError};
use crate::eval::{self, EvalContext, EvalError};
use crate::machine::{Machine, StepOutcome};
use crate::memory::LastWrite;
use crate::stats::Stats;
use crate::swi::{HostIo, IoWait};
use crate::trace::Tracer;
use asm_arm2::{disassemble, Assembler, Program};
use cpu_arm2::{decode, Cpsr, Instruction, LR, PC};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

/// Executor yield cadence: sleep 1 ms every this many instructions so
/// frontend pollers can observe state mid-run.
const YIELD_EVERY: u64 = 1000;

/// Session execution state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecState {
    Idle,
    Running,
    Breakpoint,
    Halted,
    Error,
    WaitingForInput,
}

/// Output stream tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// Execution event kinds pushed to frontends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecEventKind {
    BreakpointHit,
    Halted,
    Error,
}

/// Typed session events, in production order per session.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    State {
        status: ExecState,
        pc: u32,
        cycles: u64,
        #[serde(skip_serializing_if = "Option::is_none")]
        last_write: Option<(u32, u8)>,
    },
    Output {
        stream: OutputStream,
        content: String,
    },
    Execution {
        kind: ExecEventKind,
        #[serde(skip_serializing_if = "Option::is_none")]
        address: Option<u32>,
        #[serde(skip_serializing_if = "Option::is_none")]
        symbol: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
}

/// Result of a successful `load`.
#[derive(Debug, Clone, Serialize)]
pub struct LoadInfo {
    pub entry_point: u32,
    /// Defined symbols, sorted by value.
    pub symbols: Vec<(String, u32)>,
}

/// One line of disassembly with source annotation.
#[derive(Debug, Clone, Serialize)]
pub struct DisasmLine {
    pub address: u32,
    pub word: u32,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    pub is_current: bool,
}

/// Register snapshot for frontends.
#[derive(Debug, Clone, Serialize)]
pub struct RegisterSnapshot {
    pub r: [u32; 16],
    pub n: bool,
    pub z: bool,
    pub c: bool,
    pub v: bool,
    pub cycles: u64,
    pub instructions: u64,
}

/// The guest stdin pipe: bytes buffered until the machine reads them.
struct InputPipe {
    buffer: Mutex<VecDeque<u8>>,
    cond: Condvar,
}

impl InputPipe {
    fn new() -> Self {
        Self {
            buffer: Mutex::new(VecDeque::new()),
            cond: Condvar::new(),
        }
    }

    fn push(&self, bytes: &[u8]) {
        let mut buffer = self.buffer.lock().expect("input pipe poisoned");
        buffer.extend(bytes.iter().copied());
        self.cond.notify_all();
    }

    fn clear(&self) {
        self.buffer.lock().expect("input pipe poisoned").clear();
        self.cond.notify_all();
    }

    /// Park until new input arrives or `stop` is set. Returns promptly
    /// on either; spurious wakeups are fine (the caller retries the SWI).
    fn wait_for_input(&self, stop: &AtomicBool) {
        let buffer = self.buffer.lock().expect("input pipe poisoned");
        if !buffer.is_empty() {
            return;
        }
        let _unused = self
            .cond
            .wait_timeout_while(buffer, Duration::from_millis(50), |b| {
                b.is_empty() && !stop.load(Ordering::Relaxed)
            });
    }
}

/// `HostIo` over the session's pipe and output buffer.
struct PipedIo {
    input: Arc<InputPipe>,
    output: Arc<Mutex<Vec<u8>>>,
}

impl HostIo for PipedIo {
    fn write_stdout(&mut self, bytes: &[u8]) {
        self.output
            .lock()
            .expect("output buffer poisoned")
            .extend_from_slice(bytes);
    }

    fn read_char(&mut self) -> IoWait<u8> {
        let mut buffer = self.input.buffer.lock().expect("input pipe poisoned");
        match buffer.pop_front() {
            Some(b) => IoWait::Ready(b),
            None => IoWait::WouldBlock,
        }
    }

    fn read_line(&mut self) -> IoWait<String> {
        let mut buffer = self.input.buffer.lock().expect("input pipe poisoned");
        let Some(newline) = buffer.iter().position(|&b| b == b'\n') else {
            return IoWait::WouldBlock;
        };
        let line: Vec<u8> = buffer.drain(..=newline).collect();
        let mut text = String::from_utf8_lossy(&line).into_owned();
        while text.ends_with('\n') || text.ends_with('\r') {
            text.pop();
        }
        IoWait::Ready(text)
    }
}

/// Everything behind the session lock.
struct Core {
    machine: Machine,
    debugger: Debugger,
    program: Option<Program>,
    exec_state: ExecState,
    stats: Stats,
    coverage: Coverage,
    tracer: Tracer,
}

/// One debugging session: a loaded program with its VM state,
/// breakpoints, and I/O pipes.
pub struct Session {
    core: Arc<Mutex<Core>>,
    input: Arc<InputPipe>,
    output: Arc<Mutex<Vec<u8>>>,
    subscribers: Arc<Mutex<Vec<Sender<Event>>>>,
    /// Cooperative pause flag, observed at every step boundary.
    pause: Arc<AtomicBool>,
    /// True while a background run thread is live.
    running: Arc<AtomicBool>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    #[must_use]
    pub fn new() -> Self {
        let input = Arc::new(InputPipe::new());
        let output = Arc::new(Mutex::new(Vec::new()));
        let io = PipedIo {
            input: Arc::clone(&input),
            output: Arc::clone(&output),
        };
        Self {
            core: Arc::new(Mutex::new(Core {
                machine: Machine::with_io(Box::new(io)),
                debugger: Debugger::new(),
                program: None,
                exec_state: ExecState::Idle,
                stats: Stats::new(),
                coverage: Coverage::new(),
                tracer: Tracer::new(),
            })),
            input,
            output,
            subscribers: Arc::new(Mutex::new(Vec::new())),
            pause: Arc::new(AtomicBool::new(false)),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Subscribe to the session's event stream.
    #[must_use]
    pub fn subscribe(&self) -> Receiver<Event> {
        let (tx, rx) = channel();
        self.subscribers
            .lock()
            .expect("subscribers poisoned")
            .push(tx);
        rx
    }

    /// Install tracing (CLI diagnostics). Replaces any existing tracer.
    pub fn set_tracer(&self, tracer: Tracer) {
        self.lock_core().tracer = tracer;
    }

    /// Replace the memory layout (from configuration). Resets the
    /// machine; call before loading a program.
    pub fn configure_memory(&self, memory: crate::memory::Memory) {
        self.lock_core().machine.set_memory(memory);
    }

    fn lock_core(&self) -> std::sync::MutexGuard<'_, Core> {
        self.core.lock().expect("session state poisoned")
    }

    fn emit(subscribers: &Mutex<Vec<Sender<Event>>>, event: &Event) {
        let mut subs = subscribers.lock().expect("subscribers poisoned");
        subs.retain(|tx| tx.send(event.clone()).is_ok());
    }

    fn emit_state(subscribers: &Mutex<Vec<Sender<Event>>>, core: &Core) {
        let event = Event::State {
            status: core.exec_state,
            pc: core.machine.cpu.regs.r[PC],
            cycles: core.machine.cpu.cycles(),
            last_write: core
                .machine
                .memory
                .last_write()
                .map(|LastWrite { addr, size }| (addr, size)),
        };
        Self::emit(subscribers, &event);
    }

    /// Drain buffered guest stdout into an Output event.
    fn flush_output(output: &Mutex<Vec<u8>>, subscribers: &Mutex<Vec<Sender<Event>>>) {
        let drained = {
            let mut buf = output.lock().expect("output buffer poisoned");
            if buf.is_empty() {
                return;
            }
            std::mem::take(&mut *buf)
        };
        Self::emit(
            subscribers,
            &Event::Output {
                stream: OutputStream::Stdout,
                content: String::from_utf8_lossy(&drained).into_owned(),
            },
        );
    }

    // === Program lifecycle ===

    /// Assemble and install a program: wipe machine state, copy the
    /// image, set PC to the entry point, and report symbols.
    pub fn load(&self, source: &str, filename: &str) -> Result<LoadInfo, SessionError> {
        let program = Assembler::new()
            .assemble_source(source, filename)
            .map_err(SessionError::ProgramLoad)?;
        self.install(program)
    }

    /// Assemble and install from a file on disk.
    pub fn load_file(&self, path: &std::path::Path) -> Result<LoadInfo, SessionError> {
        let program = Assembler::new()
            .assemble_file(path)
            .map_err(SessionError::ProgramLoad)?;
        self.install(program)
    }

    /// Install an already-assembled program.
    pub fn install(&self, program: Program) -> Result<LoadInfo, SessionError> {
        self.stop_background();
        let mut core = self.lock_core();
        core.machine.load(&program)?;
        core.debugger.clear_transient();
        core.stats.reset();
        core.coverage.reset();
        core.exec_state = ExecState::Idle;
        self.input.clear();

        let symbols: Vec<(String, u32)> = {
            let mut v: Vec<(String, u32)> = program
                .symbols
                .iter()
                .filter(|s| s.defined)
                .map(|s| (s.name.clone(), s.value))
                .collect();
            v.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
            v
        };
        let info = LoadInfo {
            entry_point: program.entry_point,
            symbols,
        };
        core.program = Some(program);
        Self::emit_state(&self.subscribers, &core);
        Ok(info)
    }

    /// Full reset: forget the program, breakpoints, statistics, input.
    /// A reset followed by a load is equivalent to a fresh session.
    pub fn reset(&self) {
        self.stop_background();
        let mut core = self.lock_core();
        core.machine.reset();
        core.debugger.clear();
        core.program = None;
        core.stats.reset();
        core.coverage.reset();
        core.exec_state = ExecState::Idle;
        self.input.clear();
        Self::emit_state(&self.subscribers, &core);
    }

    /// Program reset: reload the current program, keep breakpoints.
    pub fn reset_to_entry(&self) -> Result<(), SessionError> {
        self.stop_background();
        let mut core = self.lock_core();
        let program = core.program.take().ok_or(SessionError::NoProgramLoaded)?;
        core.machine.load(&program)?;
        core.program = Some(program);
        core.debugger.clear_transient();
        core.stats.reset();
        core.coverage.reset();
        core.exec_state = ExecState::Idle;
        self.input.clear();
        Self::emit_state(&self.subscribers, &core);
        Ok(())
    }

    // === Stepping ===

    /// Execute one instruction and stop.
    pub fn step(&self) -> Result<ExecState, SessionError> {
        let mut core = self.lock_core();
        self.require_steppable(&core)?;
        let flow = self.exec_one(&mut core);
        Self::flush_output(&self.output, &self.subscribers);
        match flow {
            Flow::Fatal(e) => {
                Self::emit_state(&self.subscribers, &core);
                return Err(e.into());
            }
            // An uneventful step leaves the session paused
            Flow::Continue => core.exec_state = ExecState::Idle,
            Flow::Stopped => {}
        }
        Self::emit_state(&self.subscribers, &core);
        Ok(core.exec_state)
    }

    /// Step over: if the next instruction is BL, run to the instruction
    /// after it; otherwise a single step.
    pub fn step_over(&self) -> Result<ExecState, SessionError> {
        let (is_call, next) = {
            let core = self.lock_core();
            self.require_steppable(&core)?;
            let pc = core.machine.cpu.regs.r[PC];
            let word = core.machine.memory.peek_word(pc).unwrap_or(0);
            let is_call = matches!(decode(word).op, Instruction::Branch { link: true, .. });
            (is_call, pc.wrapping_add(4))
        };
        if is_call {
            {
                let mut core = self.lock_core();
                core.debugger.arm_transient(next);
            }
            self.run_to_stop()
        } else {
            self.step()
        }
    }

    /// Step out: run until execution returns to the caller (LR).
    pub fn step_out(&self) -> Result<ExecState, SessionError> {
        {
            let mut core = self.lock_core();
            self.require_steppable(&core)?;
            let lr = core.machine.cpu.regs.r[LR];
            core.debugger.arm_transient(lr);
        }
        self.run_to_stop()
    }

    /// Continue in a background execution thread.
    pub fn run(&self) -> Result<(), SessionError> {
        {
            let core = self.lock_core();
            self.require_steppable(&core)?;
        }
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(SessionError::InvalidSessionState(
                "already running".to_string(),
            ));
        }
        self.pause.store(false, Ordering::SeqCst);
        {
            let mut core = self.lock_core();
            core.exec_state = ExecState::Running;
            Self::emit_state(&self.subscribers, &core);
        }

        let core = Arc::clone(&self.core);
        let input = Arc::clone(&self.input);
        let output = Arc::clone(&self.output);
        let subscribers = Arc::clone(&self.subscribers);
        let pause = Arc::clone(&self.pause);
        let running = Arc::clone(&self.running);
        std::thread::spawn(move || {
            let facade = ExecutorHandles {
                core,
                input,
                output,
                subscribers,
                pause,
            };
            facade.run_loop();
            running.store(false, Ordering::SeqCst);
        });
        Ok(())
    }

    /// Cooperative stop between instructions.
    pub fn pause(&self) {
        self.pause.store(true, Ordering::SeqCst);
        // Wake an executor that is parked on stdin
        self.input.cond.notify_all();
        while self.running.load(Ordering::SeqCst) {
            std::thread::sleep(Duration::from_millis(1));
        }
        let mut core = self.lock_core();
        if core.exec_state == ExecState::Running {
            core.exec_state = ExecState::Idle;
        }
        Self::emit_state(&self.subscribers, &core);
    }

    /// Synchronous run until a stop condition (step over/out).
    fn run_to_stop(&self) -> Result<ExecState, SessionError> {
        self.pause.store(false, Ordering::SeqCst);
        {
            let mut core = self.lock_core();
            core.exec_state = ExecState::Running;
        }
        let handles = ExecutorHandles {
            core: Arc::clone(&self.core),
            input: Arc::clone(&self.input),
            output: Arc::clone(&self.output),
            subscribers: Arc::clone(&self.subscribers),
            pause: Arc::clone(&self.pause),
        };
        handles.run_loop();
        Ok(self.lock_core().exec_state)
    }

    fn require_steppable(&self, core: &Core) -> Result<(), SessionError> {
        if core.program.is_none() {
            return Err(SessionError::NoProgramLoaded);
        }
        match core.exec_state {
            ExecState::Running => Err(SessionError::InvalidSessionState(
                "execution is already running".to_string(),
            )),
            ExecState::Halted => Err(SessionError::InvalidSessionState(
                "program has halted; reset to run again".to_string(),
            )),
            ExecState::Error => Err(SessionError::InvalidSessionState(
                "program is in an error state; reset to run again".to_string(),
            )),
            _ => Ok(()),
        }
    }

    /// Execute one machine step with the lock held, updating diagnostics
    /// and the execution state.
    fn exec_one(&self, core: &mut Core) -> Flow {
        exec_one_impl(core, &self.subscribers)
    }

    /// Stop any background run thread before structural changes.
    fn stop_background(&self) {
        if self.running.load(Ordering::SeqCst) {
            self.pause();
        }
    }

    // === Observers ===

    #[must_use]
    pub fn status(&self) -> ExecState {
        self.lock_core().exec_state
    }

    #[must_use]
    pub fn exit_code(&self) -> Option<u32> {
        self.lock_core().machine.exit_code()
    }

    #[must_use]
    pub fn registers(&self) -> RegisterSnapshot {
        let core = self.lock_core();
        let regs = &core.machine.cpu.regs;
        let Cpsr { n, z, c, v } = regs.cpsr;
        RegisterSnapshot {
            r: regs.r,
            n,
            z,
            c,
            v,
            cycles: core.machine.cpu.cycles(),
            instructions: core.machine.cpu.instructions(),
        }
    }

    /// Memory bytes for display; unmapped bytes read as zero.
    #[must_use]
    pub fn memory(&self, addr: u32, len: usize) -> Vec<u8> {
        self.lock_core().machine.memory.read_lossy(addr, len)
    }

    /// Words around the stack pointer.
    #[must_use]
    pub fn stack(&self, offset: i32, count: usize) -> Vec<(u32, u32)> {
        let core = self.lock_core();
        let sp = core.machine.cpu.regs.r[13];
        (0..count)
            .map(|i| {
                let addr = sp
                    .wrapping_add_signed(offset)
                    .wrapping_add(4 * i as u32);
                let word = core.machine.memory.peek_word(addr).unwrap_or(0);
                (addr, word)
            })
            .collect()
    }

    /// Disassembly with source annotations.
    #[must_use]
    pub fn disassembly(&self, addr: u32, count: usize) -> Vec<DisasmLine> {
        let core = self.lock_core();
        let pc = core.machine.cpu.regs.r[PC];
        (0..count)
            .map(|i| {
                let address = addr.wrapping_add(4 * i as u32);
                let word = core.machine.memory.peek_word(address).unwrap_or(0);
                let source = core.program.as_ref().and_then(|p| {
                    p.source_map
                        .lookup(address)
                        .filter(|e| e.address == address && !e.text.is_empty())
                        .map(|e| e.text.clone())
                });
                DisasmLine {
                    address,
                    word,
                    text: disassemble(word, address),
                    source,
                    is_current: address == pc,
                }
            })
            .collect()
    }

    /// The program's symbol table, if loaded.
    #[must_use]
    pub fn symbols(&self) -> Vec<(String, u32)> {
        let core = self.lock_core();
        core.program.as_ref().map_or_else(Vec::new, |p| {
            let mut v: Vec<(String, u32)> = p
                .symbols
                .iter()
                .filter(|s| s.defined)
                .map(|s| (s.name.clone(), s.value))
                .collect();
            v.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
            v
        })
    }

    /// Statistics snapshot.
    #[must_use]
    pub fn stats_report(&self) -> crate::stats::StatsReport {
        self.lock_core().stats.report()
    }

    /// Coverage report (text or JSON).
    #[must_use]
    pub fn coverage_report(&self, json: bool) -> Option<String> {
        let core = self.lock_core();
        core.program
            .as_ref()
            .map(|p| core.coverage.report(p, json))
    }

    /// Tracer reports, proxied under the lock.
    #[must_use]
    pub fn trace_report(&self, which: TraceReport, json: bool) -> String {
        let core = self.lock_core();
        match which {
            TraceReport::Flags => core.tracer.flag_report(json),
            TraceReport::Registers => core.tracer.register_report(json),
            TraceReport::Stack => core.tracer.stack_report(json),
        }
    }

    // === Breakpoints and watchpoints ===

    pub fn add_breakpoint(
        &self,
        address: u32,
        condition: Option<String>,
    ) -> Result<(), SessionError> {
        let mut core = self.lock_core();
        let program = core.program.as_ref().ok_or(SessionError::NoProgramLoaded)?;
        if !program.source_map.is_instruction(address) {
            return Err(SessionError::InvalidBreakpointAddress(address));
        }
        if let Some(expr) = &condition {
            // Validate the expression now so typos surface at add time
            let ctx = EvalContext {
                regs: &core.machine.cpu.regs,
                memory: &core.machine.memory,
                symbols: Some(&program.symbols),
            };
            if let Err(e) = eval::evaluate(expr, &ctx) {
                if !matches!(e, EvalError::Unmapped(_)) {
                    return Err(SessionError::InvalidExpression(e.to_string()));
                }
            }
        }
        core.debugger.add_breakpoint(address, condition);
        Ok(())
    }

    pub fn remove_breakpoint(&self, address: u32) -> bool {
        self.lock_core().debugger.remove_breakpoint(address)
    }

    #[must_use]
    pub fn breakpoints(&self) -> Vec<(u32, bool, Option<String>, u64)> {
        self.lock_core()
            .debugger
            .breakpoints()
            .map(|bp| (bp.address, bp.enabled, bp.condition.clone(), bp.hit_count))
            .collect()
    }

    pub fn add_watchpoint(&self, target: WatchTarget, kind: WatchKind) -> u32 {
        self.lock_core().debugger.add_watchpoint(target, kind)
    }

    pub fn remove_watchpoint(&self, id: u32) -> bool {
        self.lock_core().debugger.remove_watchpoint(id)
    }

    #[must_use]
    pub fn watchpoints(&self) -> Vec<Watchpoint> {
        self.lock_core().debugger.watchpoints().cloned().collect()
    }

    // === Input and evaluation ===

    /// Write to the guest stdin pipe. Buffered until the program reads.
    pub fn send_input(&self, data: &str) {
        self.input.push(data.as_bytes());
    }

    /// Evaluate a debugger expression against current state.
    pub fn evaluate(&self, expr: &str) -> Result<u32, SessionError> {
        let core = self.lock_core();
        let ctx = EvalContext {
            regs: &core.machine.cpu.regs,
            memory: &core.machine.memory,
            symbols: core.program.as_ref().map(|p| &p.symbols),
        };
        eval::evaluate(expr, &ctx).map_err(|e| SessionError::InvalidExpression(e.to_string()))
    }
}

/// Which tracer report to render.
#[derive(Debug, Clone, Copy)]
pub enum TraceReport {
    Flags,
    Registers,
    Stack,
}

/// Control flow out of one executed step.
enum Flow {
    /// Keep going.
    Continue,
    /// Stopped in a reportable state (breakpoint, halt, waiting).
    Stopped,
    /// Runtime error; state is already `Error`.
    Fatal(RuntimeError),
}

/// The handles an executor needs; shared by the background thread and
/// the synchronous step-over/step-out loop.
struct ExecutorHandles {
    core: Arc<Mutex<Core>>,
    input: Arc<InputPipe>,
    output: Arc<Mutex<Vec<u8>>>,
    subscribers: Arc<Mutex<Vec<Sender<Event>>>>,
    pause: Arc<AtomicBool>,
}

impl ExecutorHandles {
    /// The run loop: acquire the lock, execute one instruction, release,
    /// yield periodically. Stdin waits happen with the lock released.
    fn run_loop(&self) {
        let mut executed: u64 = 0;
        let mut first = true;
        let mut announced_waiting = false;
        loop {
            if self.pause.load(Ordering::SeqCst) {
                let mut core = self.core.lock().expect("session state poisoned");
                if core.exec_state == ExecState::Running {
                    core.exec_state = ExecState::Idle;
                }
                Session::emit_state(&self.subscribers, &core);
                return;
            }

            let mut wait_for_input = false;
            {
                let mut core = self.core.lock().expect("session state poisoned");

                // Breakpoint check at the step boundary. The first
                // instruction is exempt so a continue can leave a
                // breakpoint it is sitting on.
                let pc = core.machine.cpu.regs.r[PC];
                if self.should_break(&mut core, pc, first) {
                    // A condition that divided by zero already moved the
                    // session to Error; don't mask it as a breakpoint.
                    if core.exec_state != ExecState::Error {
                        core.exec_state = ExecState::Breakpoint;
                        let symbol = symbol_at(&core, pc);
                        Session::emit(
                            &self.subscribers,
                            &Event::Execution {
                                kind: ExecEventKind::BreakpointHit,
                                address: Some(pc),
                                symbol,
                                message: None,
                            },
                        );
                    }
                    Session::emit_state(&self.subscribers, &core);
                    return;
                }
                first = false;

                match exec_one_impl(&mut core, &self.subscribers) {
                    Flow::Continue => {}
                    Flow::Stopped => {
                        if core.exec_state == ExecState::WaitingForInput {
                            wait_for_input = true;
                        } else {
                            Session::flush_output(&self.output, &self.subscribers);
                            Session::emit_state(&self.subscribers, &core);
                            return;
                        }
                    }
                    Flow::Fatal(_) => {
                        Session::flush_output(&self.output, &self.subscribers);
                        Session::emit_state(&self.subscribers, &core);
                        return;
                    }
                }
            }

            Session::flush_output(&self.output, &self.subscribers);

            if wait_for_input {
                if !announced_waiting {
                    announced_waiting = true;
                    let core = self.core.lock().expect("session state poisoned");
                    Session::emit_state(&self.subscribers, &core);
                }
                // Lock released: send_input can deliver and wake us
                self.input.wait_for_input(&self.pause);
                let mut core = self.core.lock().expect("session state poisoned");
                if core.exec_state == ExecState::WaitingForInput {
                    core.exec_state = ExecState::Running;
                }
                continue;
            }

            announced_waiting = false;
            executed += 1;
            if executed % YIELD_EVERY == 0 {
                std::thread::sleep(Duration::from_millis(1));
            }
        }
    }

    /// Breakpoint / transient check for the instruction about to run.
    fn should_break(&self, core: &mut Core, pc: u32, first: bool) -> bool {
        if core.debugger.take_transient(pc) {
            return true;
        }
        if first {
            return false;
        }
        if core.debugger.breakpoint_at(pc).is_none() {
            return false;
        }
        match core.debugger.record_hit(pc) {
            None => true,
            Some(condition) => {
                let result = {
                    let ctx = EvalContext {
                        regs: &core.machine.cpu.regs,
                        memory: &core.machine.memory,
                        symbols: core.program.as_ref().map(|p| &p.symbols),
                    };
                    eval::evaluate(&condition, &ctx)
                };
                match result {
                    Ok(value) => value != 0,
                    Err(EvalError::DivisionByZero) => {
                        // Guest-visible arithmetic fault: stop with an error
                        core.exec_state = ExecState::Error;
                        Session::emit(
                            &self.subscribers,
                            &Event::Execution {
                                kind: ExecEventKind::Error,
                                address: Some(pc),
                                symbol: None,
                                message: Some(
                                    RuntimeErrorKind::ArithmeticDivByZero.to_string(),
                                ),
                            },
                        );
                        true
                    }
                    // A broken condition fires the breakpoint so the
                    // user notices rather than sailing past it
                    Err(_) => true,
                }
            }
        }
    }
}

/// Execute one machine step, update diagnostics, set the session state,
/// and emit execution events. Shared by `step` and the run loops.
fn exec_one_impl(core: &mut Core, subscribers: &Mutex<Vec<Sender<Event>>>) -> Flow {
    match core.machine.step() {
        Ok(report) => {
            core.coverage.record(report.pc);
            core.stats.record(&report, core.machine.memory.accesses());
            if core.tracer.active() {
                let accesses: Vec<_> = core.machine.memory.accesses().to_vec();
                core.tracer
                    .record(&report, &core.machine.cpu.regs, &accesses);
            }

            match report.outcome {
                StepOutcome::Executed => {
                    let hit = core.debugger.check_watchpoints(
                        core.machine.memory.accesses(),
                        report.regs_read,
                        report.regs_written,
                    );
                    if let Some(hit) = hit {
                        core.exec_state = ExecState::Breakpoint;
                        let what = match hit.target {
                            WatchTarget::Address(a) => format!("address {a:#010X}"),
                            WatchTarget::Register(r) => {
                                cpu_arm2::Registers::name(r as usize).to_string()
                            }
                        };
                        let action = if hit.is_write { "write" } else { "read" };
                        Session::emit(
                            subscribers,
                            &Event::Execution {
                                kind: ExecEventKind::BreakpointHit,
                                address: Some(report.pc),
                                symbol: None,
                                message: Some(format!(
                                    "watchpoint {} ({action} of {what})",
                                    hit.id
                                )),
                            },
                        );
                        Flow::Stopped
                    } else {
                        Flow::Continue
                    }
                }
                StepOutcome::Halted => {
                    core.exec_state = ExecState::Halted;
                    Session::emit(
                        subscribers,
                        &Event::Execution {
                            kind: ExecEventKind::Halted,
                            address: Some(report.pc),
                            symbol: None,
                            message: core
                                .machine
                                .exit_code()
                                .map(|c| format!("exit code {c}")),
                        },
                    );
                    Flow::Stopped
                }
                StepOutcome::WaitingForInput => {
                    core.exec_state = ExecState::WaitingForInput;
                    Flow::Stopped
                }
                StepOutcome::BreakpointTrap => {
                    core.exec_state = ExecState::Breakpoint;
                    Session::emit(
                        subscribers,
                        &Event::Execution {
                            kind: ExecEventKind::BreakpointHit,
                            address: Some(report.pc),
                            symbol: None,
                            message: Some("breakpoint trap".to_string()),
                        },
                    );
                    Flow::Stopped
                }
            }
        }
        Err(e) => {
            core.exec_state = ExecState::Error;
            Session::emit(
                subscribers,
                &Event::Execution {
                    kind: ExecEventKind::Error,
                    address: Some(e.pc),
                    symbol: None,
                    message: Some(e.to_string()),
                },
            );
            Flow::Fatal(e)
        }
    }
}

/// Name of the symbol at `addr`, if the program defines one there.
fn symbol_at(core: &Core, addr: u32) -> Option<String> {
    let program = core.program.as_ref()?;
    program
        .symbols
        .iter()
        .find(|s| s.defined && s.value == addr)
        .map(|s| s.name.clone())
}
