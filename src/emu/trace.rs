//! Per-instruction observation hooks, used for single-step traces.

use std::{
    fmt::Write as _,
    io::{self, Write},
};

use crate::plat::{Instruction, Register};

use super::emulator::EmuState;

/// What one executed instruction did.
#[derive(Debug, Clone, Copy)]
pub struct StepEvent<'a> {
    /// The PC the instruction was executed at.
    pub pc: usize,
    pub instruction: Instruction,
    /// Registers whose value changed, with their new value.
    pub changed: &'a [(Register, u16)],
    /// The emulator's state after the instruction.
    pub state: EmuState,
}

/// Called by the emulator after every instruction it executes successfully.
pub trait Observer {
    fn on_step(&mut self, event: &StepEvent<'_>);
}

/// Renders a step as `PC=00002  ADD r3, r1, r2            | r3=001e`.
pub fn format_step(event: &StepEvent<'_>) -> String {
    let text = event.instruction.to_string();
    let mut line = format!("PC={:05}  {text:<24}  |", event.pc);
    for (reg, value) in event.changed {
        let _ = write!(line, " {reg}={value:04x}");
    }
    line
}

/// An [Observer] writing one [`format_step`] line per instruction.
pub struct Tracer<W> {
    out: W,
}

impl<W: Write> Tracer<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }
}

impl Tracer<io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write> Observer for Tracer<W> {
    fn on_step(&mut self, event: &StepEvent<'_>) {
        if let Err(e) = writeln!(self.out, "{}", format_step(event)) {
            log::warn!("failed to write trace line: {e}");
        }
    }
}
