//! The assembler module for CPYU-16.

use std::fmt;

use nom_locate::LocatedSpan;
use thiserror::Error;

use crate::plat::Opcode;

pub mod assembler;
pub mod lexer;

pub use assembler::assemble;

pub type Span<'a> = LocatedSpan<&'a str>;

/// An error for the assembler module of CPYU-16, located at a source line and column (both 1-based).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("line {line}:{col}: {kind}")]
pub struct AsmError {
    pub line: usize,
    pub col: usize,
    pub kind: AsmErrorKind,
}

/// What went wrong while assembling.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AsmErrorKind {
    #[error("syntax error near '{0}'")]
    Syntax(String),
    #[error("unknown mnemonic '{0}'")]
    UnknownOpcode(String),
    #[error("'{mnemonic}' expects {expected} operand(s), got {found}")]
    OperandArity {
        mnemonic: &'static str,
        expected: usize,
        found: usize,
    },
    #[error("operand {position} of '{mnemonic}' must be {expected}, got '{found}'")]
    OperandKind {
        mnemonic: &'static str,
        position: usize,
        expected: OperandKind,
        found: String,
    },
    #[error("expected register r0..r31, got '{0}'")]
    InvalidRegister(String),
    #[error("immediate {0} out of range [-32768, 65535]")]
    ImmediateRange(String),
    #[error("branch target '{0}' is neither a label nor an instruction index")]
    UnresolvedTarget(String),
    #[error("duplicate label '{label}' (first defined on line {first_line})")]
    DuplicateLabel { label: String, first_line: usize },
    #[error("invalid label '{0}'")]
    InvalidLabel(String),
}

/// A lexed word of a source line, with the column it starts at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token<'a> {
    pub text: &'a str,
    pub col: usize,
}

impl<'a> From<Span<'a>> for Token<'a> {
    fn from(span: Span<'a>) -> Self {
        Self {
            text: *span.fragment(),
            col: span.get_utf8_column(),
        }
    }
}

/// One lexed source line. Output of the lexer, input for the assembler.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Line<'a> {
    /// A label marking the index of the next instruction.
    pub label: Option<Token<'a>>,
    pub mnemonic: Option<Token<'a>>,
    pub operands: Vec<Token<'a>>,
}

/// The kind of value an operand slot accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperandKind {
    /// `r0` - `r31`
    Register,
    /// A literal in `-32768..=65535`, masked to 16 bits.
    Immediate,
    /// A literal data memory address, bounds-checked when executed.
    Address,
    /// A label or a literal instruction index.
    Target,
}

impl fmt::Display for OperandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Register => "a register",
            Self::Immediate => "an immediate",
            Self::Address => "a data address",
            Self::Target => "a branch target",
        })
    }
}

/// A superset of [Opcode], containing all of the "regular" ones that map directly to an instruction,
/// as well as [Pseudo] instructions that are rewritten into a regular one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mnemonic {
    /// A regular operation that maps directly to an instruction.
    Regular(Opcode),
    /// Syntactic sugar for a regular operation.
    Pseudo(Pseudo),
}

/// Pseudo-instructions. These are only valid in assembly listings, and never appear in an
/// assembled [Program](crate::plat::Program).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Pseudo {
    /// Loads an immediate into a register.
    ///
    /// Equivalent to:
    /// ```text
    /// addi    rd, r0, imm
    /// ```
    Li,
    /// Copies a register.
    ///
    /// Equivalent to:
    /// ```text
    /// add     rd, rs, r0
    /// ```
    Mov,
}

impl Mnemonic {
    pub const fn name(self) -> &'static str {
        match self {
            Self::Regular(op) => op.mnemonic(),
            Self::Pseudo(Pseudo::Li) => "LI",
            Self::Pseudo(Pseudo::Mov) => "MOV",
        }
    }

    /// The operands this mnemonic takes, in source order.
    pub const fn schema(self) -> &'static [OperandKind] {
        use OperandKind::*;
        match self {
            Self::Regular(op) => match op {
                Opcode::Add | Opcode::Sub | Opcode::And | Opcode::Or | Opcode::Xor => {
                    &[Register, Register, Register]
                }
                Opcode::Addi => &[Register, Register, Immediate],
                Opcode::Ld | Opcode::St => &[Register, Address],
                Opcode::Beq | Opcode::Bne => &[Register, Register, Target],
                Opcode::Jmp => &[Target],
                Opcode::In | Opcode::Out => &[Register],
                Opcode::Halt => &[],
            },
            Self::Pseudo(Pseudo::Li) => &[Register, Immediate],
            Self::Pseudo(Pseudo::Mov) => &[Register, Register],
        }
    }
}

impl fmt::Display for Mnemonic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
