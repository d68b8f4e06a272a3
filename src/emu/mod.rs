//! The emulator/debugger module for CPYU-16.

use thiserror::Error;

use self::emulator::EmuState;

pub mod alu;
pub mod clock;
pub mod debugger;
pub mod emulator;
pub mod io;
pub mod ram;
pub mod registers;
pub mod trace;

/// A fatal condition raised while executing an instruction. Moves the emulator to [`EmuState::Faulted`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Fault {
    #[error("memory access out of bounds at address {0}")]
    MemoryOutOfBounds(i32),
    #[error("IN: invalid input: {0}")]
    InvalidInput(String),
    #[error("IN: value {0} out of range [-32768, 65535]")]
    InputRange(String),
}

#[derive(Debug, Error)]
pub enum EmuError {
    #[error("fault at pc={pc:05} (line {line}): {fault}")]
    Fault { pc: usize, line: usize, fault: Fault },
    #[error("cannot step: machine is {0:?}")]
    NotRunning(EmuState),
    #[error("step limit of {0} instructions exceeded")]
    StepLimit(u64),
    #[error("invalid clock rate: {0} Hz")]
    InvalidClockRate(f64),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
