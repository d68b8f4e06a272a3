//! A built-in smoke test of the assembler and emulator, runnable from the CLI with `--selftest`.

use anyhow::{bail, ensure, Context, Result};

use crate::{
    asm::assemble,
    emu::{emulator::Emulator, io::ReaderSource, EmuError, Fault},
};

struct Case {
    name: &'static str,
    source: &'static str,
    input: &'static str,
    expected: &'static [&'static str],
}

const CASES: &[Case] = &[
    Case {
        name: "wraparound",
        source: "
    LI   r1, 65530
    ADDI r1, r1, 10
    OUT  r1
    HALT
",
        input: "",
        expected: &["+00004 (0x0004)"],
    },
    Case {
        name: "store/load",
        source: "
    LI   r1, 0x003C
    ST   r1, 0x0020
    LD   r2, 0x0020
    OUT  r2
    HALT
",
        input: "",
        expected: &["+00060 (0x003c)"],
    },
    Case {
        name: "branch",
        source: "
    LI   r1, 7
    LI   r2, 7
    BNE  r1, r2, wrong
    LI   r3, 0x002A
    JMP  done
wrong:
    LI   r3, 0x0000
done:
    OUT  r3
    HALT
",
        input: "",
        expected: &["+00042 (0x002a)"],
    },
    Case {
        name: "in/out",
        source: "
    IN   r1
    OUT  r1
    IN   r2
    OUT  r2
    IN   r3
    OUT  r3
    HALT
",
        input: "123\n0xFFFE\n-0x000A\n",
        expected: &["+00123 (0x007b)", "-00002 (0xfffe)", "-00010 (0xfff6)"],
    },
];

fn run_case(case: &Case) -> Result<()> {
    let program = assemble(case.source)?;
    let input = ReaderSource::new(case.input.as_bytes());
    let mut emu = Emulator::new(program, input, Vec::<String>::new());
    emu.run_with_limit(1000)?;
    ensure!(
        emu.output() == case.expected,
        "expected output {:?}, got {:?}",
        case.expected,
        emu.output()
    );
    Ok(())
}

fn run_range_fault() -> Result<()> {
    let program = assemble("IN r1\nHALT")?;
    let input = ReaderSource::new("70000".as_bytes());
    let mut emu = Emulator::new(program, input, Vec::<String>::new());
    match emu.run_until_halt() {
        Err(EmuError::Fault {
            fault: Fault::InputRange(ref value),
            ..
        }) if value == "70000" => Ok(()),
        Err(e) => bail!("expected an IN range fault, got: {e}"),
        Ok(_) => bail!("expected an IN range fault, but the program halted"),
    }
}

/// Runs every self-test case, logging each one that passes.
///
/// # Errors
///
/// Returns an error naming the first case that failed.
pub fn run() -> Result<()> {
    for case in CASES {
        run_case(case).with_context(|| format!("self-test '{}' failed", case.name))?;
        log::info!("self-test '{}' passed", case.name);
    }
    run_range_fault().context("self-test 'in range' failed")?;
    log::info!("self-test 'in range' passed");
    Ok(())
}
