//! Debugger command line: the text frontend over the session facade.
//!
//! Used by `--debug` and by the API's `execute_command` entrypoint.
//! Commands return their output as text; the caller decides where it
//! goes (terminal, RPC response).

use crate::debugger::{WatchKind, WatchTarget};
use crate::error::SessionError;
use crate::session::{DisasmLine, ExecState, Session};
use std::time::Duration;

/// Outcome of one command.
pub enum CommandResult {
    /// Text to show the user (possibly empty).
    Output(String),
    /// The user asked to leave the debugger.
    Quit,
}

const HELP: &str = "\
commands:
  s, step              execute one instruction
  n, over              step over a BL call
  fin, out             run until the current function returns
  c, continue          run until a breakpoint, halt, or error
  b, break ADDR [if EXPR]   set a breakpoint (symbols allowed)
  delete ADDR          remove a breakpoint
  breakpoints          list breakpoints
  watch [r|w|rw] TARGET     watch an address or register (default w)
  rwatch TARGET        watch reads of an address or register
  delwatch ID          remove a watchpoint
  regs                 show registers and flags
  mem ADDR [LEN]       hex dump memory
  dis [ADDR [N]]       disassemble (default: at PC)
  stack [N]            show words from the stack pointer
  p, print EXPR        evaluate an expression
  input TEXT           send a line to the program's stdin
  symbols              list program symbols
  reset                reset and reload the program
  q, quit              leave the debugger
";

/// Execute one debugger command against a session.
pub fn execute_command(session: &Session, line: &str) -> CommandResult {
    let line = line.trim();
    if line.is_empty() {
        return CommandResult::Output(String::new());
    }
    let (cmd, rest) = match line.find(char::is_whitespace) {
        Some(i) => (&line[..i], line[i..].trim()),
        None => (line, ""),
    };

    let result = match cmd {
        "help" | "h" | "?" => Ok(HELP.to_string()),
        "step" | "s" => step_like(session, Session::step),
        "over" | "n" | "next" => step_like(session, Session::step_over),
        "out" | "fin" | "finish" => step_like(session, Session::step_out),
        "continue" | "c" => run_until_stop(session),
        "break" | "b" => add_breakpoint(session, rest),
        "delete" | "del" => delete_breakpoint(session, rest),
        "breakpoints" | "bp" => Ok(list_breakpoints(session)),
        "watch" => add_watchpoint(session, rest),
        "rwatch" => add_watchpoint(session, &format!("r {rest}")),
        "delwatch" => delete_watchpoint(session, rest),
        "regs" | "r" => Ok(show_registers(session)),
        "mem" | "x" => show_memory(session, rest),
        "dis" | "disassemble" => show_disassembly(session, rest),
        "stack" => show_stack(session, rest),
        "print" | "p" => session.evaluate(rest).map(|v| format!("{v} ({v:#010X})")),
        "input" => {
            session.send_input(&format!("{rest}\n"));
            Ok(String::new())
        }
        "symbols" => Ok(list_symbols(session)),
        "reset" => session.reset_to_entry().map(|()| "reset".to_string()),
        "quit" | "q" | "exit" => return CommandResult::Quit,
        other => Ok(format!("unknown command {other:?}; try 'help'")),
    };

    CommandResult::Output(match result {
        Ok(text) => text,
        Err(e) => format!("error: {e}"),
    })
}

fn step_like(
    session: &Session,
    f: impl Fn(&Session) -> Result<ExecState, SessionError>,
) -> Result<String, SessionError> {
    let state = f(session)?;
    Ok(describe_stop(session, state))
}

/// `continue`: launch the background executor and wait for it to stop.
fn run_until_stop(session: &Session) -> Result<String, SessionError> {
    session.run()?;
    while session.status() == ExecState::Running {
        std::thread::sleep(Duration::from_millis(5));
    }
    Ok(describe_stop(session, session.status()))
}

fn describe_stop(session: &Session, state: ExecState) -> String {
    let regs = session.registers();
    let pc = regs.r[15];
    let place = session
        .disassembly(pc, 1)
        .first()
        .map_or_else(String::new, |l: &DisasmLine| format!("  {}", l.text));
    match state {
        ExecState::Halted => format!(
            "halted, exit code {}",
            session.exit_code().unwrap_or(0)
        ),
        ExecState::Error => "stopped on error".to_string(),
        ExecState::WaitingForInput => {
            "waiting for input (use 'input TEXT' to provide a line)".to_string()
        }
        ExecState::Breakpoint => format!("stopped at {pc:#010X}{place}"),
        _ => format!("at {pc:#010X}{place}"),
    }
}

fn add_breakpoint(session: &Session, args: &str) -> Result<String, SessionError> {
    let (target, condition) = match args.split_once(" if ") {
        Some((t, c)) => (t.trim(), Some(c.trim().to_string())),
        None => (args, None),
    };
    if target.is_empty() {
        return Ok("usage: break ADDR [if EXPR]".to_string());
    }
    let address = session.evaluate(target)?;
    session.add_breakpoint(address, condition)?;
    Ok(format!("breakpoint set at {address:#010X}"))
}

fn delete_breakpoint(session: &Session, args: &str) -> Result<String, SessionError> {
    let address = session.evaluate(args)?;
    if session.remove_breakpoint(address) {
        Ok(format!("breakpoint removed from {address:#010X}"))
    } else {
        Ok(format!("no breakpoint at {address:#010X}"))
    }
}

fn list_breakpoints(session: &Session) -> String {
    let bps = session.breakpoints();
    if bps.is_empty() {
        return "no breakpoints".to_string();
    }
    let mut out = String::new();
    for (addr, enabled, condition, hits) in bps {
        out.push_str(&format!(
            "{addr:#010X}  {}  hits={hits}{}\n",
            if enabled { "enabled " } else { "disabled" },
            condition.map_or_else(String::new, |c| format!("  if {c}")),
        ));
    }
    out
}

fn add_watchpoint(session: &Session, args: &str) -> Result<String, SessionError> {
    let mut parts = args.split_whitespace();
    let first = parts.next().unwrap_or("");
    let (kind, target_text) = match first {
        "r" | "read" => (WatchKind::Read, parts.next().unwrap_or("")),
        "w" | "write" => (WatchKind::Write, parts.next().unwrap_or("")),
        "rw" | "readwrite" => (WatchKind::ReadWrite, parts.next().unwrap_or("")),
        other => (WatchKind::Write, other),
    };
    if target_text.is_empty() {
        return Ok("usage: watch [r|w|rw] ADDR|REGISTER".to_string());
    }
    let target = parse_watch_target(session, target_text)?;
    let id = session.add_watchpoint(target, kind);
    Ok(format!("watchpoint {id} set"))
}

fn parse_watch_target(session: &Session, text: &str) -> Result<WatchTarget, SessionError> {
    let upper = text.to_ascii_uppercase();
    let reg = match upper.as_str() {
        "SP" => Some(13),
        "LR" => Some(14),
        "PC" => Some(15),
        _ => upper
            .strip_prefix('R')
            .and_then(|n| n.parse::<u8>().ok())
            .filter(|&n| n < 16),
    };
    match reg {
        Some(r) => Ok(WatchTarget::Register(r)),
        None => Ok(WatchTarget::Address(session.evaluate(text)?)),
    }
}

fn delete_watchpoint(session: &Session, args: &str) -> Result<String, SessionError> {
    let id = session.evaluate(args)?;
    if session.remove_watchpoint(id) {
        Ok(format!("watchpoint {id} removed"))
    } else {
        Ok(format!("no watchpoint {id}"))
    }
}

fn show_registers(session: &Session) -> String {
    let regs = session.registers();
    let mut out = String::new();
    for n in 0..16 {
        out.push_str(&format!(
            "{:<3} = {:#010X}{}",
            cpu_arm2::Registers::name(n),
            regs.r[n],
            if n % 4 == 3 { "\n" } else { "   " }
        ));
    }
    let flag = |b: bool, c: char| if b { c.to_ascii_uppercase() } else { c };
    out.push_str(&format!(
        "flags: {}{}{}{}   cycles: {}   instructions: {}\n",
        flag(regs.n, 'n'),
        flag(regs.z, 'z'),
        flag(regs.c, 'c'),
        flag(regs.v, 'v'),
        regs.cycles,
        regs.instructions,
    ));
    out
}

fn show_memory(session: &Session, args: &str) -> Result<String, SessionError> {
    let mut parts = args.split_whitespace();
    let Some(addr_text) = parts.next() else {
        return Ok("usage: mem ADDR [LEN]".to_string());
    };
    let addr = session.evaluate(addr_text)?;
    let len = match parts.next() {
        Some(t) => session.evaluate(t)? as usize,
        None => 64,
    }
    .min(4096);

    let bytes = session.memory(addr, len);
    let mut out = String::new();
    for (i, chunk) in bytes.chunks(16).enumerate() {
        out.push_str(&format!("{:08X}: ", addr + 16 * i as u32));
        for b in chunk {
            out.push_str(&format!("{b:02X} "));
        }
        out.push(' ');
        for &b in chunk {
            out.push(if (0x20..0x7F).contains(&b) { b as char } else { '.' });
        }
        out.push('\n');
    }
    Ok(out)
}

fn show_disassembly(session: &Session, args: &str) -> Result<String, SessionError> {
    let mut parts = args.split_whitespace();
    let addr = match parts.next() {
        Some(t) => session.evaluate(t)?,
        None => session.registers().r[15],
    };
    let count = match parts.next() {
        Some(t) => session.evaluate(t)? as usize,
        None => 8,
    }
    .min(256);

    let mut out = String::new();
    for line in session.disassembly(addr, count) {
        let marker = if line.is_current { "=>" } else { "  " };
        out.push_str(&format!(
            "{marker} {:08X}  {:08X}  {}\n",
            line.address, line.word, line.text
        ));
    }
    Ok(out)
}

fn show_stack(session: &Session, args: &str) -> Result<String, SessionError> {
    let count = match args.split_whitespace().next() {
        Some(t) => session.evaluate(t)? as usize,
        None => 8,
    }
    .min(256);
    let mut out = String::new();
    for (addr, word) in session.stack(0, count) {
        out.push_str(&format!("{addr:08X}: {word:08X}\n"));
    }
    Ok(out)
}

fn list_symbols(session: &Session) -> String {
    let symbols = session.symbols();
    if symbols.is_empty() {
        return "no symbols".to_string();
    }
    let mut out = String::new();
    for (name, value) in symbols {
        out.push_str(&format!("{value:#010X}  {name}\n"));
    }
    out
}
