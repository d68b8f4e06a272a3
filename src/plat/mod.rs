//! Common platform code between CPYU-16's assembler and emulator.

use std::fmt;

use thiserror::Error;

pub mod num;

/// Number of general purpose registers.
pub const NUM_REGS: usize = 32;
/// Number of 16-bit words in data memory.
pub const MEM_WORDS: usize = 1 << 16;

/// An error for the core platform of CPYU-16.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlatformError {
    #[error("invalid register index {0} (must be < {NUM_REGS})")]
    InvalidRegister(u8),
}

/// Type alias for Result<T, [PlatformError]>.
pub type PResult<T> = Result<T, PlatformError>;

/// One of the 32 registers `r0` - `r31`.
///
/// [`R0`](Register::R0) always reads as zero; writes to it are discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Register(u8);

impl Register {
    /// Zero register
    pub const R0: Self = Self(0);

    /// The register's position in the register file.
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// Every register, `r0` first.
    pub fn all() -> impl Iterator<Item = Self> {
        (0..NUM_REGS as u8).map(Self)
    }
}

impl TryFrom<u8> for Register {
    type Error = PlatformError;

    fn try_from(value: u8) -> PResult<Self> {
        if (value as usize) < NUM_REGS {
            Ok(Self(value))
        } else {
            Err(PlatformError::InvalidRegister(value))
        }
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}", self.0)
    }
}

/// The opcodes the machine executes, without their operands.
///
/// ALU opcode notes ([ADD][Opcode::Add], [ADDI][Opcode::Addi], [SUB][Opcode::Sub], [AND][Opcode::And], [OR][Opcode::Or], [XOR][Opcode::Xor]):
///
/// - Results wrap modulo 2^16. No carry or borrow is recorded anywhere.
/// - When [R0](Register::R0) is the destination, the result is discarded.
///
/// Memory opcode notes ([LD][Opcode::Ld], [ST][Opcode::St]):
///
/// - Addresses are absolute word indices into data memory, given as a literal.
/// - Data memory and program memory are separate address spaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    /* ALU */
    /// `rd <- rs1 + rs2`
    Add,
    /// `rd <- rs1 + imm`
    Addi,
    /// `rd <- rs1 - rs2`
    Sub,
    /// `rd <- rs1 & rs2`
    And,
    /// `rd <- rs1 | rs2`
    Or,
    /// `rd <- rs1 ^ rs2`
    Xor,

    /* Memory */
    /// `rd <- mem[addr]`
    Ld,
    /// `mem[addr] <- rs`
    St,

    /* Branching */
    /// "Branch if Equal"
    /// ```text
    /// if rs1 == rs2 {
    ///     PC <- target
    /// }
    /// ```
    Beq,
    /// "Branch if Not Equal"
    /// ```text
    /// if rs1 != rs2 {
    ///     PC <- target
    /// }
    /// ```
    Bne,
    /// `PC <- target`
    Jmp,

    /* I/O */
    /// Reads one number from the input source into `rd`.
    In,
    /// Writes `rs` to the output sink as signed decimal and hex.
    Out,

    /* Halt */
    /// Stops the machine
    Halt,
}

impl Opcode {
    /// The upper-case assembly mnemonic.
    pub const fn mnemonic(self) -> &'static str {
        match self {
            Self::Add => "ADD",
            Self::Addi => "ADDI",
            Self::Sub => "SUB",
            Self::And => "AND",
            Self::Or => "OR",
            Self::Xor => "XOR",
            Self::Ld => "LD",
            Self::St => "ST",
            Self::Beq => "BEQ",
            Self::Bne => "BNE",
            Self::Jmp => "JMP",
            Self::In => "IN",
            Self::Out => "OUT",
            Self::Halt => "HALT",
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}

/// A decoded instruction, carrying exactly the operands its opcode takes.
///
/// Immediates are stored already masked to 16 bits. Data addresses are kept as written in the
/// source, so that out-of-range addresses are caught by the emulator's bounds check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Instruction {
    Add { rd: Register, rs1: Register, rs2: Register },
    Addi { rd: Register, rs1: Register, imm: u16 },
    Sub { rd: Register, rs1: Register, rs2: Register },
    And { rd: Register, rs1: Register, rs2: Register },
    Or { rd: Register, rs1: Register, rs2: Register },
    Xor { rd: Register, rs1: Register, rs2: Register },
    Ld { rd: Register, addr: i32 },
    St { rs: Register, addr: i32 },
    Beq { rs1: Register, rs2: Register, target: usize },
    Bne { rs1: Register, rs2: Register, target: usize },
    Jmp { target: usize },
    In { rd: Register },
    Out { rs: Register },
    Halt,
}

impl Instruction {
    pub const fn opcode(&self) -> Opcode {
        match self {
            Self::Add { .. } => Opcode::Add,
            Self::Addi { .. } => Opcode::Addi,
            Self::Sub { .. } => Opcode::Sub,
            Self::And { .. } => Opcode::And,
            Self::Or { .. } => Opcode::Or,
            Self::Xor { .. } => Opcode::Xor,
            Self::Ld { .. } => Opcode::Ld,
            Self::St { .. } => Opcode::St,
            Self::Beq { .. } => Opcode::Beq,
            Self::Bne { .. } => Opcode::Bne,
            Self::Jmp { .. } => Opcode::Jmp,
            Self::In { .. } => Opcode::In,
            Self::Out { .. } => Opcode::Out,
            Self::Halt => Opcode::Halt,
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = self.opcode();
        match *self {
            Self::Add { rd, rs1, rs2 }
            | Self::Sub { rd, rs1, rs2 }
            | Self::And { rd, rs1, rs2 }
            | Self::Or { rd, rs1, rs2 }
            | Self::Xor { rd, rs1, rs2 } => write!(f, "{op} {rd}, {rs1}, {rs2}"),
            Self::Addi { rd, rs1, imm } => write!(f, "{op} {rd}, {rs1}, {imm}"),
            Self::Ld { rd: r, addr } | Self::St { rs: r, addr } => write!(f, "{op} {r}, {addr}"),
            Self::Beq { rs1, rs2, target } | Self::Bne { rs1, rs2, target } => {
                write!(f, "{op} {rs1}, {rs2}, {target}")
            }
            Self::Jmp { target } => write!(f, "{op} {target}"),
            Self::In { rd: r } | Self::Out { rs: r } => write!(f, "{op} {r}"),
            Self::Halt => write!(f, "{op}"),
        }
    }
}

/// An assembled program: the instruction memory of the machine.
///
/// Each instruction remembers the source line it was assembled from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Program {
    instructions: Vec<Instruction>,
    lines: Vec<usize>,
}

impl Program {
    pub(crate) fn push(&mut self, instr: Instruction, line: usize) {
        self.instructions.push(instr);
        self.lines.push(line);
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// The instruction at index `pc`, if any.
    pub fn get(&self, pc: usize) -> Option<Instruction> {
        self.instructions.get(pc).copied()
    }

    /// The 1-based source line of the instruction at index `pc`, if any.
    pub fn source_line(&self, pc: usize) -> Option<usize> {
        self.lines.get(pc).copied()
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }
}

impl FromIterator<Instruction> for Program {
    /// Builds a program without source information; every line is reported as 0.
    fn from_iter<T: IntoIterator<Item = Instruction>>(iter: T) -> Self {
        let instructions: Vec<_> = iter.into_iter().collect();
        let lines = vec![0; instructions.len()];
        Self {
            instructions,
            lines,
        }
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (pc, (instr, line)) in self.instructions.iter().zip(&self.lines).enumerate() {
            let text = instr.to_string();
            writeln!(f, "{pc:05}  {text:<24} ; line {line}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn r(i: u8) -> Register {
        Register::try_from(i).unwrap()
    }

    #[test]
    fn test_register_bounds() {
        assert_eq!(Register::try_from(0).unwrap(), Register::R0);
        assert_eq!(r(31).index(), 31);
        assert_eq!(
            Register::try_from(32),
            Err(PlatformError::InvalidRegister(32))
        );
        assert_eq!(Register::all().count(), NUM_REGS);
    }

    #[test]
    fn test_instruction_display() {
        let add = Instruction::Add {
            rd: r(3),
            rs1: r(1),
            rs2: r(2),
        };
        assert_eq!(add.to_string(), "ADD r3, r1, r2");
        assert_eq!(add.opcode(), Opcode::Add);
        let bne = Instruction::Bne {
            rs1: r(3),
            rs2: r(1),
            target: 4,
        };
        assert_eq!(bne.to_string(), "BNE r3, r1, 4");
        assert_eq!(Instruction::Ld { rd: r(2), addr: 32 }.to_string(), "LD r2, 32");
        assert_eq!(Instruction::Halt.to_string(), "HALT");
    }

    #[test]
    fn test_program_listing() {
        let program: Program = [Instruction::Out { rs: r(1) }, Instruction::Halt]
            .into_iter()
            .collect();
        assert_eq!(program.len(), 2);
        assert_eq!(program.get(1), Some(Instruction::Halt));
        assert_eq!(program.get(2), None);
        let listing = program.to_string();
        assert!(listing.starts_with("00000  OUT r1"));
        assert!(listing.lines().nth(1).unwrap().starts_with("00001  HALT"));
    }
}
