//! Debugger command-line behaviour.

use emu_arm2::command::{execute_command, CommandResult};
use emu_arm2::session::Session;

fn output(session: &Session, line: &str) -> String {
    match execute_command(session, line) {
        CommandResult::Output(text) => text,
        CommandResult::Quit => panic!("unexpected quit from {line:?}"),
    }
}

fn session_with(src: &str) -> Session {
    let session = Session::new();
    session.load(src, "t.s").expect("loads");
    session
}

#[test]
fn step_and_regs() {
    let session = session_with("MOV R0, #42\nSWI #0\n");
    let text = output(&session, "step");
    assert!(text.contains("0x00008004"), "stopped after one instruction");
    let regs = output(&session, "regs");
    assert!(regs.contains("R0  = 0x0000002A"));
    assert!(regs.contains("flags:"));
}

#[test]
fn break_continue_and_list() {
    let src = "\
start:  MOV R0, #0\n\
loop:   ADD R0, R0, #1\n\
        CMP R0, #10\n\
        BNE loop\n\
        SWI #0\n";
    let session = session_with(src);

    let set = output(&session, "break loop");
    assert!(set.contains("0x00008004"), "symbol resolved: {set}");

    let stop = output(&session, "continue");
    assert!(stop.contains("stopped at 0x00008004"), "{stop}");

    let list = output(&session, "breakpoints");
    assert!(list.contains("0x00008004"));
    assert!(list.contains("hits=1"));

    let removed = output(&session, "delete loop");
    assert!(removed.contains("removed"));
}

#[test]
fn print_evaluates_expressions() {
    let session = session_with("MOV R0, #5\nSWI #0\n");
    output(&session, "step");
    assert_eq!(output(&session, "print R0 + 1"), "6 (0x00000006)");
    assert_eq!(output(&session, "p R0 == 5"), "1 (0x00000001)");
    let err = output(&session, "print nonsense");
    assert!(err.starts_with("error:"), "{err}");
}

#[test]
fn mem_dumps_hex_and_ascii() {
    let session = session_with("SWI #0\nmsg: .ascii \"Hi\"\n");
    let dump = output(&session, "mem msg 2");
    assert!(dump.contains("48 69"), "{dump}");
    assert!(dump.contains("Hi"), "{dump}");
}

#[test]
fn dis_marks_current_instruction() {
    let session = session_with("MOV R0, #1\nMOV R1, #2\nSWI #0\n");
    output(&session, "step");
    let dis = output(&session, "dis 0x8000 3");
    let lines: Vec<&str> = dis.lines().collect();
    assert!(lines[0].starts_with("  "), "{dis}");
    assert!(lines[1].starts_with("=>"), "{dis}");
    assert!(lines[0].contains("MOV R0, #1"));
}

#[test]
fn input_feeds_guest_stdin() {
    let session = session_with("SWI #6\nSWI #3\nMOV R0, #0\nSWI #0\n");
    output(&session, "input 55");
    let stop = output(&session, "continue");
    assert!(stop.contains("halted"), "{stop}");
}

#[test]
fn watch_and_symbols_and_reset() {
    let session = session_with("MOV R0, #1\nSWI #0\nbuf: .word 0\n");
    let set = output(&session, "watch w buf");
    assert!(set.contains("watchpoint 1 set"));

    let symbols = output(&session, "symbols");
    assert!(symbols.contains("buf"));

    output(&session, "step");
    let reset = output(&session, "reset");
    assert_eq!(reset, "reset");
    assert_eq!(session.registers().r[15], 0x8000);
}

#[test]
fn rwatch_fires_on_read() {
    let src = "\
        LDR R0, =buf\n\
        LDR R1, [R0]\n\
        SWI #0\n\
        .data\n\
buf:    .word 7\n";
    let session = session_with(src);
    let set = output(&session, "rwatch buf");
    assert!(set.contains("watchpoint 1 set"), "{set}");

    let stop = output(&session, "continue");
    assert!(stop.contains("stopped"), "suspended after the load: {stop}");
    assert_eq!(session.registers().r[1], 7, "the read itself completed");
}

#[test]
fn quit_and_unknown() {
    let session = session_with("SWI #0\n");
    assert!(matches!(
        execute_command(&session, "quit"),
        CommandResult::Quit
    ));
    let text = output(&session, "gibberish");
    assert!(text.contains("unknown command"));
}

#[test]
fn help_lists_commands() {
    let session = Session::new();
    let help = output(&session, "help");
    for cmd in ["step", "break", "watch", "print", "continue"] {
        assert!(help.contains(cmd), "help missing {cmd}");
    }
}
