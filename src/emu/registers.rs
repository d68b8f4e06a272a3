use crate::plat::{Register, NUM_REGS};

/// The full set of registers in the emulator.
///
/// Writes to [`Register::R0`] are discarded, so it always reads as zero.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EmuRegisters {
    values: [u16; NUM_REGS],
}

impl EmuRegisters {
    pub fn read(&self, reg: Register) -> u16 {
        self.values[reg.index()]
    }

    pub fn write(&mut self, reg: Register, value: u16) {
        if reg.is_zero() {
            return;
        }
        self.values[reg.index()] = value;
    }

    pub fn snapshot(&self) -> [u16; NUM_REGS] {
        self.values
    }

    /// Registers whose value differs from `before`, with their current value.
    pub fn changed_since(&self, before: &[u16; NUM_REGS]) -> Vec<(Register, u16)> {
        self.iter()
            .filter(|&(reg, value)| before[reg.index()] != value)
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Register, u16)> + '_ {
        Register::all().map(|reg| (reg, self.read(reg)))
    }
}
