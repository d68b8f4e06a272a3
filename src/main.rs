use std::{path::PathBuf, process::ExitCode};

use anyhow::{Context, Result};
use clap::Parser;
use simplelog::{ColorChoice, Config, LevelFilter, TermLogger, TerminalMode};

use cpyu16::{
    asm::{assemble, AsmError},
    emu::{
        debugger::Debugger,
        emulator::{EmuState, Emulator},
        trace::Tracer,
        EmuError,
    },
    selftest,
};

/// CPYU-16 assembler and emulator
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Assembly source file to run
    #[arg(required_unless_present = "selftest")]
    program: Option<PathBuf>,

    /// Print a trace line for every executed instruction
    #[arg(long)]
    single_step: bool,

    /// Run the built-in self-test and exit
    #[arg(long)]
    selftest: bool,

    /// Enter the debugger REPL before running
    #[arg(long)]
    debug: bool,

    /// Give up after this many executed instructions
    #[arg(long, default_value_t = 1_000_000)]
    max_steps: u64,

    /// Run at a fixed number of instructions per second
    #[arg(long)]
    clock_hz: Option<f64>,

    /// Raise log verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    if let Err(e) = TermLogger::init(
        level,
        Config::default(),
        TerminalMode::Stderr,
        ColorChoice::Auto,
    ) {
        eprintln!("failed to initialize logging: {e}");
    }
}

fn run(args: &Args, source: &str) -> Result<()> {
    let program = assemble(source)?;
    log::info!("assembled {} instruction(s)", program.len());

    let mut emu = Emulator::with_stdio(program);
    if let Some(hz) = args.clock_hz {
        emu = emu.with_clock_rate(hz)?;
    }
    if args.single_step {
        emu.set_observer(Tracer::stdout());
    }
    if args.debug {
        Debugger::new(&mut emu).repl()?;
        if emu.state() != EmuState::Running {
            return Ok(());
        }
    }
    let steps = emu.run_with_limit(args.max_steps)?;
    log::info!("halted after {steps} instruction(s) at pc={:05}", emu.pc());
    Ok(())
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.verbose);

    if args.selftest {
        return match selftest::run() {
            Ok(()) => {
                println!("self-test passed");
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("Self-test error: {e:#}");
                ExitCode::from(4)
            }
        };
    }

    let Some(path) = args.program.as_deref() else {
        eprintln!("no program given");
        return ExitCode::from(1);
    };
    let source = match std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))
    {
        Ok(source) => source,
        Err(e) => {
            eprintln!("{e:#}");
            return ExitCode::from(1);
        }
    };

    match run(&args, &source) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) if e.is::<AsmError>() => {
            eprintln!("Assembly error: {e}");
            ExitCode::from(2)
        }
        Err(e) if e.is::<EmuError>() => {
            eprintln!("Runtime error: {e}");
            ExitCode::from(3)
        }
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::from(1)
        }
    }
}
