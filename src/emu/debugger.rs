use std::cell::RefCell;

use anyhow::Result;
use easy_repl::{command, repl::LoopStatus, CommandStatus, Repl};

use crate::plat::num::{format_word, parse_literal};

use super::{
    emulator::{EmuState, Emulator},
    io::{InputSource, OutputSink},
    EmuError,
};

/// An interactive REPL over a borrowed [Emulator].
///
/// Leaving the REPL with `c` hands the emulator back to the caller still [`EmuState::Running`].
pub struct Debugger<'b, I, O> {
    pub emu: RefCell<&'b mut Emulator<I, O>>,
    error: RefCell<Option<EmuError>>,
}

impl<'b, I: InputSource, O: OutputSink> Debugger<'b, I, O> {
    pub fn new(emu: &'b mut Emulator<I, O>) -> Self {
        Self {
            emu: RefCell::new(emu),
            error: RefCell::new(None),
        }
    }

    fn print_current(&self) {
        let emu = self.emu.borrow();
        match emu.program().get(emu.pc()) {
            Some(instr) if emu.state() == EmuState::Running => {
                eprintln!("Next instruction:\n[pc={:05}] --> {instr}", emu.pc());
            }
            _ => eprintln!("[pc={:05}] machine is {:?}", emu.pc(), emu.state()),
        }
    }

    /// Runs the REPL until the user continues, halts, or the machine stops running.
    ///
    /// # Errors
    ///
    /// Returns the [`EmuError`] of a fault hit while stepping, or a REPL I/O error.
    pub fn repl(&self) -> Result<()> {
        let mut repl = Repl::builder()
            .description("CPYU-16 Debug REPL")
            .add(
                "c",
                command! {
                    "Continue execution",
                    () => || Ok(CommandStatus::Quit)
                },
            )
            .add(
                "s",
                command! {
                    "Step one instruction",
                    () => || {
                        let result = self.emu.borrow_mut().step();
                        match result {
                            Ok(EmuState::Running) => Ok(CommandStatus::Done),
                            Ok(_) => Ok(CommandStatus::Quit),
                            Err(e) => {
                                eprintln!("{e}");
                                *self.error.borrow_mut() = Some(e);
                                Ok(CommandStatus::Quit)
                            }
                        }
                    }
                },
            )
            .add(
                "bt",
                command! {
                    "Print last X instructions executed",
                    (x:usize) => |x| {
                        let emu = self.emu.borrow();
                        let skip = emu.history().len().saturating_sub(x);
                        for (pc, instr) in emu.history().skip(skip) {
                            eprintln!("[pc={pc:05}] {instr}");
                        }
                        Ok(CommandStatus::Done)
                    }
                },
            )
            .add(
                "pr",
                command! {
                    "Print the value of all non-zero registers",
                    () => || {
                        let emu = self.emu.borrow();
                        for (reg, value) in emu.registers.iter().filter(|&(_, v)| v != 0) {
                            eprintln!("{reg}={}", format_word(value));
                        }
                        eprintln!("pc={:05}", emu.pc());
                        Ok(CommandStatus::Done)
                    }
                },
            )
            .add(
                "peek",
                command! {
                    "Peek a value from memory",
                    (addr:String) => |addr: String| {
                        let emu = self.emu.borrow();
                        match parse_literal(&addr) {
                            Ok(addr) => match emu.ram.read(addr) {
                                Ok(value) => eprintln!("[{addr:05}]={}", format_word(value)),
                                Err(fault) => eprintln!("{fault}"),
                            },
                            Err(e) => eprintln!("bad address {addr:?}: {e}"),
                        }
                        Ok(CommandStatus::Done)
                    }
                },
            )
            .add(
                "halt",
                command! {
                    "Halt execution",
                    () => || {
                        self.emu.borrow_mut().halt();
                        Ok(CommandStatus::Quit)
                    }
                },
            )
            .build()?;
        eprintln!("CPYU-16 Debug REPL");
        'repl: loop {
            eprintln!();
            self.print_current();

            let status = repl.next()?;
            if let LoopStatus::Break = status {
                break 'repl;
            }
            if self.emu.borrow().state() != EmuState::Running {
                break 'repl;
            }
        }
        match self.error.borrow_mut().take() {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }
}
