//! ARM2 emulator binary.
//!
//! Assembles and runs an ARM assembly program, with an interactive
//! debugger, a headless JSON-RPC session server, and execution
//! diagnostics (traces, statistics, coverage) switchable from the
//! command line.

use emu_arm2::command::{execute_command, CommandResult};
use emu_arm2::config::EmuConfig;
use emu_arm2::machine::{Machine, StepOutcome};
use emu_arm2::session::{Event, Session, TraceReport};
use emu_arm2::stats::Stats;
use emu_arm2::trace::Tracer;
use emu_arm2::{api::ApiServer, coverage::Coverage};

use asm_arm2::{Assembler, Program};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::process;

/// Report format for the trace/stats outputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Text,
    Json,
    Csv,
    Html,
}

impl Format {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "text" => Some(Self::Text),
            "json" => Some(Self::Json),
            "csv" => Some(Self::Csv),
            "html" => Some(Self::Html),
            _ => None,
        }
    }
}

struct CliArgs {
    program: Option<PathBuf>,
    debug: bool,
    tui: bool,
    api_server: bool,
    dump_symbols: bool,
    symbols_file: Option<PathBuf>,
    trace: bool,
    trace_file: Option<PathBuf>,
    mem_trace: bool,
    mem_trace_file: Option<PathBuf>,
    stats: bool,
    stats_file: Option<PathBuf>,
    stats_format: Format,
    coverage: bool,
    coverage_format: Format,
    stack_trace: bool,
    stack_trace_format: Format,
    flag_trace: bool,
    flag_trace_format: Format,
    register_trace: bool,
    register_trace_format: Format,
    verbose: bool,
}

fn usage() -> ! {
    eprintln!(
        "usage: emu-arm2 [FLAGS] PROGRAM.s

  --debug                 interactive command debugger
  --tui                   full-screen debugger (external frontend)
  --api-server            serve the session protocol over stdio
  --dump-symbols          print the symbol table after assembly
  --symbols-file FILE     write the symbol table to FILE
  --trace                 instruction trace (--trace-file FILE)
  --mem-trace             memory access trace (--mem-trace-file FILE)
  --stats                 execution statistics (--stats-file FILE,
                          --stats-format json|csv|html)
  --coverage              coverage report (--coverage-format text|json)
  --stack-trace           call stack on exit (--stack-trace-format)
  --flag-trace            CPSR change history (--flag-trace-format)
  --register-trace        register access analysis (--register-trace-format)
  --verbose               progress reporting on stderr"
    );
    process::exit(1);
}

fn parse_args() -> CliArgs {
    let argv: Vec<String> = std::env::args().collect();
    let mut cli = CliArgs {
        program: None,
        debug: false,
        tui: false,
        api_server: false,
        dump_symbols: false,
        symbols_file: None,
        trace: false,
        trace_file: None,
        mem_trace: false,
        mem_trace_file: None,
        stats: false,
        stats_file: None,
        stats_format: Format::Json,
        coverage: false,
        coverage_format: Format::Text,
        stack_trace: false,
        stack_trace_format: Format::Text,
        flag_trace: false,
        flag_trace_format: Format::Text,
        register_trace: false,
        register_trace_format: Format::Text,
        verbose: false,
    };

    let mut i = 1;
    while i < argv.len() {
        let arg = argv[i].as_str();
        let value = |i: &mut usize| -> String {
            *i += 1;
            argv.get(*i).cloned().unwrap_or_else(|| usage())
        };
        match arg {
            "--debug" => cli.debug = true,
            "--tui" => cli.tui = true,
            "--api-server" => cli.api_server = true,
            "--port" => {
                // The HTTP binding is an external frontend; accept and
                // ignore its flag so shared launch scripts work.
                let _ = value(&mut i);
            }
            "--dump-symbols" => cli.dump_symbols = true,
            "--symbols-file" => cli.symbols_file = Some(PathBuf::from(value(&mut i))),
            "--trace" => cli.trace = true,
            "--trace-file" => cli.trace_file = Some(PathBuf::from(value(&mut i))),
            "--mem-trace" => cli.mem_trace = true,
            "--mem-trace-file" => cli.mem_trace_file = Some(PathBuf::from(value(&mut i))),
            "--stats" => cli.stats = true,
            "--stats-file" => cli.stats_file = Some(PathBuf::from(value(&mut i))),
            "--stats-format" => {
                cli.stats_format = Format::parse(&value(&mut i)).unwrap_or_else(|| usage());
            }
            "--coverage" => cli.coverage = true,
            "--coverage-format" => {
                cli.coverage_format = Format::parse(&value(&mut i)).unwrap_or_else(|| usage());
            }
            "--stack-trace" => cli.stack_trace = true,
            "--stack-trace-format" => {
                cli.stack_trace_format = Format::parse(&value(&mut i)).unwrap_or_else(|| usage());
            }
            "--flag-trace" => cli.flag_trace = true,
            "--flag-trace-format" => {
                cli.flag_trace_format = Format::parse(&value(&mut i)).unwrap_or_else(|| usage());
            }
            "--register-trace" => cli.register_trace = true,
            "--register-trace-format" => {
                cli.register_trace_format =
                    Format::parse(&value(&mut i)).unwrap_or_else(|| usage());
            }
            "--verbose" | "-v" => cli.verbose = true,
            "--help" | "-h" => usage(),
            other if other.starts_with('-') => {
                eprintln!("unknown flag {other:?}");
                usage();
            }
            _ => {
                if cli.program.is_some() {
                    eprintln!("only one program file may be given");
                    usage();
                }
                cli.program = Some(PathBuf::from(arg));
            }
        }
        i += 1;
    }
    cli
}

fn main() {
    let cli = parse_args();

    if cli.tui {
        eprintln!(
            "the full-screen debugger is an external frontend; \
             use --debug for the built-in command debugger"
        );
        process::exit(2);
    }

    if cli.api_server {
        let mut server = ApiServer::new(Box::new(std::io::stdout()));
        server.serve(std::io::stdin().lock());
        process::exit(0);
    }

    let Some(program_path) = cli.program.clone() else {
        eprintln!("no program file given");
        usage();
    };

    let config = EmuConfig::discover();
    let mut assembler = Assembler::new();
    for define in &config.defines {
        assembler = assembler.define(define.clone());
    }

    if cli.verbose {
        eprintln!("assembling {}", program_path.display());
    }
    let program = match assembler.assemble_file(&program_path) {
        Ok(p) => p,
        Err(errors) => {
            for e in &errors {
                eprintln!("{e}");
            }
            eprintln!("{} error(s)", errors.len());
            process::exit(1);
        }
    };
    if cli.verbose {
        eprintln!(
            "assembled {} bytes, entry point {:#010X}",
            program.size(),
            program.entry_point
        );
    }

    if cli.dump_symbols || cli.symbols_file.is_some() {
        dump_symbols(&program, cli.symbols_file.as_deref());
    }

    let code = if cli.debug {
        run_debugger(&cli, &config, program)
    } else {
        run_program(&cli, &config, &program)
    };
    process::exit(code);
}

fn dump_symbols(program: &Program, path: Option<&std::path::Path>) {
    let mut out = String::new();
    for sym in program.symbols.sorted() {
        if sym.defined {
            out.push_str(&format!("{:#010X}  {}\n", sym.value, sym.name));
        }
    }
    match path {
        Some(path) => {
            if let Err(e) = std::fs::write(path, &out) {
                eprintln!("cannot write {}: {e}", path.display());
            }
        }
        None => print!("{out}"),
    }
}

/// Open a trace output file, or fall back to a default name.
fn trace_writer(path: Option<&PathBuf>, default_name: &str) -> Option<Box<dyn Write + Send>> {
    let path = path
        .cloned()
        .unwrap_or_else(|| PathBuf::from(default_name));
    match File::create(&path) {
        Ok(f) => Some(Box::new(BufWriter::new(f))),
        Err(e) => {
            eprintln!("cannot create {}: {e}", path.display());
            None
        }
    }
}

fn build_tracer(cli: &CliArgs) -> Tracer {
    let mut tracer = Tracer::new();
    if cli.trace {
        if let Some(w) = trace_writer(cli.trace_file.as_ref(), "trace.log") {
            tracer.enable_exec(w);
        }
    }
    if cli.mem_trace {
        if let Some(w) = trace_writer(cli.mem_trace_file.as_ref(), "mem-trace.log") {
            tracer.enable_mem(w);
        }
    }
    if cli.flag_trace {
        tracer.enable_flags();
    }
    if cli.register_trace {
        tracer.enable_registers();
    }
    if cli.stack_trace {
        tracer.enable_stack();
    }
    tracer
}

/// Write a report to a file or stdout.
fn emit_report(path: Option<&PathBuf>, content: &str) {
    match path {
        Some(path) => {
            if let Err(e) = std::fs::write(path, content) {
                eprintln!("cannot write {}: {e}", path.display());
            }
        }
        None => print!("{content}"),
    }
}

/// Plain run: assemble, execute to completion, report.
fn run_program(cli: &CliArgs, config: &EmuConfig, program: &Program) -> i32 {
    let mut machine = Machine::new();
    machine.set_memory(config.build_memory());
    if let Err(e) = machine.load(program) {
        eprintln!("load failed: {e}");
        return 2;
    }

    let mut tracer = build_tracer(cli);
    let mut stats = Stats::new();
    let mut coverage = Coverage::new();

    let exit_code = loop {
        match machine.step() {
            Ok(report) => {
                coverage.record(report.pc);
                stats.record(&report, machine.memory.accesses());
                if tracer.active() {
                    let accesses: Vec<_> = machine.memory.accesses().to_vec();
                    tracer.record(&report, &machine.cpu.regs, &accesses);
                }
                match report.outcome {
                    StepOutcome::Halted => break machine.exit_code().unwrap_or(0),
                    StepOutcome::BreakpointTrap => {
                        // No debugger attached; note it and keep going
                        if cli.verbose {
                            eprintln!("breakpoint trap at {:#010X} (ignored)", report.pc);
                        }
                    }
                    StepOutcome::Executed | StepOutcome::WaitingForInput => {}
                }
            }
            Err(e) => {
                eprintln!("runtime error: {e}");
                if let Some(entry) = program.source_map.lookup(e.pc) {
                    eprintln!("  {}:{}: {}", entry.file, entry.line, entry.text);
                }
                write_reports(cli, program, &tracer, &stats, &coverage);
                return 2;
            }
        }
    };

    write_reports(cli, program, &tracer, &stats, &coverage);

    if cli.verbose {
        eprintln!(
            "program exited with code {exit_code} after {} instructions",
            stats.instructions()
        );
    }
    if exit_code & 0xFF == 0 {
        0
    } else {
        eprintln!("program exited with code {}", exit_code & 0xFF);
        3
    }
}

fn write_reports(
    cli: &CliArgs,
    program: &Program,
    tracer: &Tracer,
    stats: &Stats,
    coverage: &Coverage,
) {
    if cli.stats {
        let report = stats.report();
        let content = match cli.stats_format {
            Format::Csv => report.to_csv(),
            Format::Html => report.to_html(),
            _ => report.to_json(),
        };
        emit_report(cli.stats_file.as_ref(), &content);
    }
    if cli.coverage {
        let content = coverage.report(program, cli.coverage_format == Format::Json);
        emit_report(None, &content);
    }
    if cli.flag_trace {
        emit_report(None, &tracer.flag_report(cli.flag_trace_format == Format::Json));
    }
    if cli.register_trace {
        emit_report(
            None,
            &tracer.register_report(cli.register_trace_format == Format::Json),
        );
    }
    if cli.stack_trace {
        emit_report(
            None,
            &tracer.stack_report(cli.stack_trace_format == Format::Json),
        );
    }
}

/// Interactive command debugger over a session.
fn run_debugger(cli: &CliArgs, config: &EmuConfig, program: Program) -> i32 {
    let session = Session::new();
    session.configure_memory(config.build_memory());
    session.set_tracer(build_tracer(cli));
    let events = session.subscribe();

    if let Err(e) = session.install(program) {
        eprintln!("load failed: {e}");
        return 2;
    }
    println!("ARM2 debugger; 'help' lists commands.");

    let stdin = std::io::stdin();
    loop {
        // Show anything the program printed since the last command
        while let Ok(event) = events.try_recv() {
            match event {
                Event::Output { content, .. } => print!("{content}"),
                Event::Execution {
                    message: Some(msg), ..
                } => println!("[{msg}]"),
                _ => {}
            }
        }
        print!("(emu) ");
        let _ = std::io::stdout().flush();

        let mut line = String::new();
        if stdin.read_line(&mut line).unwrap_or(0) == 0 {
            break;
        }
        match execute_command(&session, &line) {
            CommandResult::Output(text) => {
                if !text.is_empty() {
                    println!("{}", text.trim_end());
                }
            }
            CommandResult::Quit => break,
        }
    }

    // Final diagnostics from the session's tracer
    if cli.flag_trace {
        print!(
            "{}",
            session.trace_report(TraceReport::Flags, cli.flag_trace_format == Format::Json)
        );
    }
    if cli.register_trace {
        print!(
            "{}",
            session.trace_report(
                TraceReport::Registers,
                cli.register_trace_format == Format::Json
            )
        );
    }
    if cli.stack_trace {
        print!(
            "{}",
            session.trace_report(TraceReport::Stack, cli.stack_trace_format == Format::Json)
        );
    }
    if cli.stats {
        let report = session.stats_report();
        let content = match cli.stats_format {
            Format::Csv => report.to_csv(),
            Format::Html => report.to_html(),
            _ => report.to_json(),
        };
        emit_report(cli.stats_file.as_ref(), &content);
    }
    if cli.coverage {
        if let Some(content) = session.coverage_report(cli.coverage_format == Format::Json) {
            print!("{content}");
        }
    }

    match session.exit_code() {
        Some(code) if code & 0xFF != 0 => 3,
        _ => 0,
    }
}
