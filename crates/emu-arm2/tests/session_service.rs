//! Session facade behaviour: lifecycle, stepping, breakpoints,
//! watchpoints, guest stdin, and the event stream.

use emu_arm2::debugger::{WatchKind, WatchTarget};
use emu_arm2::session::{Event, ExecState, Session};
use emu_arm2::SessionError;
use std::sync::mpsc::Receiver;
use std::time::{Duration, Instant};

fn wait_until(session: &Session, timeout_ms: u64, pred: impl Fn(ExecState) -> bool) -> ExecState {
    let deadline = Instant::now() + Duration::from_millis(timeout_ms);
    loop {
        let state = session.status();
        if pred(state) {
            return state;
        }
        assert!(Instant::now() < deadline, "timed out in state {state:?}");
        std::thread::sleep(Duration::from_millis(2));
    }
}

fn collect_output(events: &Receiver<Event>) -> String {
    let mut out = String::new();
    while let Ok(event) = events.try_recv() {
        if let Event::Output { content, .. } = event {
            out.push_str(&content);
        }
    }
    out
}

#[test]
fn load_step_halt_cycle() {
    let session = Session::new();
    let info = session
        .load("MOV R0, #42\nSWI #0\n", "t.s")
        .expect("loads");
    assert_eq!(info.entry_point, 0x8000);
    assert_eq!(session.status(), ExecState::Idle);
    assert_eq!(session.registers().r[15], 0x8000);

    session.step().expect("step 1");
    assert_eq!(session.registers().r[0], 42);

    let state = session.step().expect("step 2");
    assert_eq!(state, ExecState::Halted);
    assert_eq!(session.exit_code(), Some(42));

    // Halted programs refuse further stepping
    assert!(matches!(
        session.step(),
        Err(SessionError::InvalidSessionState(_))
    ));
}

#[test]
fn load_reports_assembly_errors() {
    let session = Session::new();
    let err = session.load("FROB R0\n", "t.s").expect_err("bad program");
    match err {
        SessionError::ProgramLoad(errors) => {
            assert!(!errors.is_empty());
        }
        other => panic!("expected ProgramLoad, got {other}"),
    }
}

#[test]
fn no_program_loaded_errors() {
    let session = Session::new();
    assert!(matches!(session.step(), Err(SessionError::NoProgramLoaded)));
    assert!(matches!(
        session.add_breakpoint(0x8000, None),
        Err(SessionError::NoProgramLoaded)
    ));
}

#[test]
fn run_hits_breakpoint() {
    let src = "\
        MOV R0, #0\n\
loop:   ADD R0, R0, #1\n\
        CMP R0, #100\n\
        BNE loop\n\
        SWI #0\n";
    let session = Session::new();
    session.load(src, "t.s").expect("loads");
    // Break on the CMP
    session.add_breakpoint(0x8008, None).expect("breakpoint");

    session.run().expect("run");
    let state = wait_until(&session, 2000, |s| s != ExecState::Running);
    assert_eq!(state, ExecState::Breakpoint);
    assert_eq!(session.registers().r[15], 0x8008);
    assert_eq!(session.registers().r[0], 1, "stopped on the first pass");

    // Continue: the stop-on breakpoint is skipped, loops once more
    session.run().expect("run again");
    wait_until(&session, 2000, |s| s != ExecState::Running);
    assert_eq!(session.registers().r[0], 2);
}

#[test]
fn conditional_breakpoint_fires_when_true() {
    let src = "\
        MOV R0, #0\n\
loop:   ADD R0, R0, #1\n\
        CMP R0, #100\n\
        BNE loop\n\
        SWI #0\n";
    let session = Session::new();
    session.load(src, "t.s").expect("loads");
    session
        .add_breakpoint(0x8008, Some("R0 == 7".to_string()))
        .expect("breakpoint");

    session.run().expect("run");
    let state = wait_until(&session, 2000, |s| s != ExecState::Running);
    assert_eq!(state, ExecState::Breakpoint);
    assert_eq!(session.registers().r[0], 7, "condition held at the stop");
}

#[test]
fn breakpoint_on_data_is_rejected() {
    let src = "MOV R0, #1\nSWI #0\nvalue: .word 7\n";
    let session = Session::new();
    session.load(src, "t.s").expect("loads");
    assert!(matches!(
        session.add_breakpoint(0x8008, None),
        Err(SessionError::InvalidBreakpointAddress(0x8008))
    ));
}

#[test]
fn watchpoint_stops_after_write() {
    let src = "\
        LDR R0, =0x20010\n\
        MOV R1, #7\n\
        STR R1, [R0]\n\
        SWI #0\n";
    let session = Session::new();
    session.load(src, "t.s").expect("loads");
    session.add_watchpoint(WatchTarget::Address(0x20010), WatchKind::Write);

    session.run().expect("run");
    let state = wait_until(&session, 2000, |s| s != ExecState::Running);
    assert_eq!(state, ExecState::Breakpoint);
    // Suspended immediately after the store
    assert_eq!(session.registers().r[15], 0x800C);
    assert_eq!(session.memory(0x20010, 4), vec![7, 0, 0, 0]);
}

#[test]
fn stdin_pipe_blocks_and_resumes() {
    let src = "\
        SWI #6\n\
        SWI #3\n\
        MOV R0, #0\n\
        SWI #0\n";
    let session = Session::new();
    let events = session.subscribe();
    session.load(src, "t.s").expect("loads");

    session.run().expect("run");
    let state = wait_until(&session, 2000, |s| {
        s == ExecState::WaitingForInput || s == ExecState::Halted
    });
    assert_eq!(state, ExecState::WaitingForInput, "blocked on READ_INT");

    session.send_input("37\n");
    let state = wait_until(&session, 2000, |s| s == ExecState::Halted);
    assert_eq!(state, ExecState::Halted);
    assert_eq!(collect_output(&events), "37");
}

#[test]
fn input_buffered_before_read() {
    let src = "\
        SWI #6\n\
        SWI #3\n\
        MOV R0, #0\n\
        SWI #0\n";
    let session = Session::new();
    let events = session.subscribe();
    session.load(src, "t.s").expect("loads");

    // Input sent before the program ever reads
    session.send_input("99\n");
    session.run().expect("run");
    wait_until(&session, 2000, |s| s == ExecState::Halted);
    assert_eq!(collect_output(&events), "99");
}

#[test]
fn step_over_skips_call() {
    let src = "\
        BL sub\n\
        MOV R1, #1\n\
        SWI #0\n\
sub:    MOV R2, #2\n\
        MOV PC, LR\n";
    let session = Session::new();
    session.load(src, "t.s").expect("loads");

    let state = session.step_over().expect("step over");
    assert_ne!(state, ExecState::Running);
    assert_eq!(session.registers().r[15], 0x8004, "landed after the BL");
    assert_eq!(session.registers().r[2], 2, "callee did run");
}

#[test]
fn step_out_returns_to_caller() {
    let src = "\
        BL sub\n\
        SWI #0\n\
sub:    MOV R2, #2\n\
        MOV R3, #3\n\
        MOV PC, LR\n";
    let session = Session::new();
    session.load(src, "t.s").expect("loads");

    session.step().expect("into the call");
    assert_eq!(session.registers().r[15], 0x8008, "inside sub");

    session.step_out().expect("step out");
    assert_eq!(session.registers().r[15], 0x8004, "back at the call site");
    assert_eq!(session.registers().r[3], 3);
}

#[test]
fn pause_stops_background_run() {
    let src = "\
loop:   ADD R0, R0, #1\n\
        B loop\n";
    let session = Session::new();
    session.load(src, "t.s").expect("loads");

    session.run().expect("run");
    std::thread::sleep(Duration::from_millis(20));
    session.pause();
    let state = session.status();
    assert!(
        state == ExecState::Idle || state == ExecState::Breakpoint,
        "paused, not running: {state:?}"
    );
    let r0 = session.registers().r[0];
    assert!(r0 > 0, "made progress before the pause");
    std::thread::sleep(Duration::from_millis(10));
    assert_eq!(session.registers().r[0], r0, "no progress after pause");
}

#[test]
fn reset_then_load_is_fresh() {
    let src = "MOV R0, #1\nSWI #0\n";
    let session = Session::new();
    session.load(src, "t.s").expect("loads");
    session.add_breakpoint(0x8000, None).expect("breakpoint");
    session.step().expect("step");
    session.reset();

    assert_eq!(session.status(), ExecState::Idle);
    assert!(session.breakpoints().is_empty(), "reset clears breakpoints");
    assert!(matches!(session.step(), Err(SessionError::NoProgramLoaded)));

    session.load(src, "t.s").expect("reload");
    assert_eq!(session.registers().r[15], 0x8000);
    assert_eq!(session.registers().r[0], 0);
}

#[test]
fn reset_to_entry_keeps_breakpoints() {
    let src = "MOV R0, #1\nMOV R1, #2\nSWI #0\n";
    let session = Session::new();
    session.load(src, "t.s").expect("loads");
    session.add_breakpoint(0x8004, None).expect("breakpoint");
    session.step().expect("step");

    session.reset_to_entry().expect("reset to entry");
    assert_eq!(session.registers().r[15], 0x8000);
    assert_eq!(session.registers().r[0], 0, "registers rewound");
    assert_eq!(session.breakpoints().len(), 1, "breakpoints survive");
}

#[test]
fn evaluate_expressions() {
    let src = "MOV R0, #5\nSWI #0\nvalue: .word 3\n";
    let session = Session::new();
    session.load(src, "t.s").expect("loads");
    session.step().expect("step");

    assert_eq!(session.evaluate("R0 + 1").expect("eval"), 6);
    assert_eq!(session.evaluate("value").expect("eval"), 0x8008);
    assert_eq!(session.evaluate("[value]").expect("eval"), 3);
    assert_eq!(session.evaluate("R0 == 5").expect("eval"), 1);
    assert!(matches!(
        session.evaluate("1 +"),
        Err(SessionError::InvalidExpression(_))
    ));
}

#[test]
fn memory_reads_tolerate_unmapped() {
    let session = Session::new();
    session.load("SWI #0\n", "t.s").expect("loads");
    // Straddles the end of the code segment into unmapped space
    let bytes = session.memory(0x17FFC, 8);
    assert_eq!(bytes.len(), 8);
    assert_eq!(&bytes[4..], &[0, 0, 0, 0], "unmapped bytes read as zero");
}

#[test]
fn disassembly_marks_current() {
    let session = Session::new();
    session
        .load("MOV R0, #1\nMOV R1, #2\nSWI #0\n", "t.s")
        .expect("loads");
    session.step().expect("step");

    let lines = session.disassembly(0x8000, 3);
    assert!(!lines[0].is_current);
    assert!(lines[1].is_current, "PC is at the second instruction");
    assert_eq!(lines[0].text, "MOV R0, #1");
}

#[test]
fn events_emitted_in_order() {
    let session = Session::new();
    let events = session.subscribe();
    session.load("MOV R0, #7\nSWI #0\n", "t.s").expect("loads");
    session.step().expect("step 1");
    session.step().expect("step 2");

    let mut states = Vec::new();
    let mut saw_halt_event = false;
    while let Ok(event) = events.try_recv() {
        match event {
            Event::State { status, .. } => states.push(status),
            Event::Execution { kind, .. } => {
                saw_halt_event = kind == emu_arm2::session::ExecEventKind::Halted;
            }
            Event::Output { .. } => {}
        }
    }
    assert_eq!(states.first(), Some(&ExecState::Idle), "load announces idle");
    assert_eq!(states.last(), Some(&ExecState::Halted));
    assert!(saw_halt_event, "halted execution event emitted");
}
