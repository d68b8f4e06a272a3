use rustc_hash::FxHashMap;

use crate::plat::{
    num::{mask16, parse_literal, ParseError, IMM_MAX, IMM_MIN},
    Instruction, Opcode, Program, Register,
};

use super::{lexer::lex_program, AsmError, AsmErrorKind, Line, Mnemonic, OperandKind, Pseudo, Token};

/// Where a label was defined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct LabelDef {
    /// Index of the instruction the label designates.
    index: usize,
    line: usize,
}

type LabelTable<'a> = FxHashMap<&'a str, LabelDef>;

/// `r` or `R` followed by decimal digits, regardless of range.
fn is_register_shaped(text: &str) -> bool {
    text.strip_prefix(['r', 'R'])
        .is_some_and(|digits| !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()))
}

/// Pass 1: maps every label to the index of the instruction that follows it.
fn collect_labels<'a>(lines: &[(usize, Line<'a>)]) -> Result<LabelTable<'a>, AsmError> {
    let mut labels = LabelTable::default();
    let mut index = 0;
    for (line, lexed) in lines {
        if let Some(label) = lexed.label {
            let def = LabelDef { index, line: *line };
            if let Some(old) = labels.insert(label.text, def) {
                return Err(AsmError {
                    line: *line,
                    col: label.col,
                    kind: AsmErrorKind::DuplicateLabel {
                        label: label.text.to_owned(),
                        first_line: old.line,
                    },
                });
            }
        }
        if lexed.mnemonic.is_some() {
            index += 1;
        }
    }
    Ok(labels)
}

/// Reads the operands of one instruction, in order, checking each against the kind its slot expects.
struct Operands<'t, 'a> {
    line: usize,
    mnemonic: Mnemonic,
    toks: &'t [Token<'a>],
    pos: usize,
    labels: &'t LabelTable<'a>,
}

impl<'t, 'a> Operands<'t, 'a> {
    fn new(
        line: usize,
        mnemonic: Mnemonic,
        at: Token<'a>,
        toks: &'t [Token<'a>],
        labels: &'t LabelTable<'a>,
    ) -> Result<Self, AsmError> {
        let expected = mnemonic.schema().len();
        if toks.len() != expected {
            return Err(AsmError {
                line,
                col: toks.get(expected).map_or(at.col, |t| t.col),
                kind: AsmErrorKind::OperandArity {
                    mnemonic: mnemonic.name(),
                    expected,
                    found: toks.len(),
                },
            });
        }
        Ok(Self {
            line,
            mnemonic,
            toks,
            pos: 0,
            labels,
        })
    }

    fn take(&mut self) -> Token<'a> {
        let tok = self.toks[self.pos];
        self.pos += 1;
        tok
    }

    fn error(&self, tok: Token<'a>, kind: AsmErrorKind) -> AsmError {
        AsmError {
            line: self.line,
            col: tok.col,
            kind,
        }
    }

    fn wrong_kind(&self, tok: Token<'a>, expected: OperandKind) -> AsmError {
        self.error(
            tok,
            AsmErrorKind::OperandKind {
                mnemonic: self.mnemonic.name(),
                position: self.pos,
                expected,
                found: tok.text.to_owned(),
            },
        )
    }

    fn reg(&mut self) -> Result<Register, AsmError> {
        let tok = self.take();
        if parse_literal(tok.text).is_ok() {
            return Err(self.wrong_kind(tok, OperandKind::Register));
        }
        let invalid = || self.error(tok, AsmErrorKind::InvalidRegister(tok.text.to_owned()));
        if !is_register_shaped(tok.text) {
            return Err(invalid());
        }
        tok.text[1..]
            .parse::<u8>()
            .ok()
            .and_then(|i| Register::try_from(i).ok())
            .ok_or_else(invalid)
    }

    fn imm(&mut self) -> Result<u16, AsmError> {
        let tok = self.take();
        if is_register_shaped(tok.text) {
            return Err(self.wrong_kind(tok, OperandKind::Immediate));
        }
        match parse_literal(tok.text) {
            Ok(value) if (IMM_MIN..=IMM_MAX).contains(&value) => Ok(mask16(value)),
            Ok(_) | Err(ParseError::Overflow(_)) => Err(self.error(
                tok,
                AsmErrorKind::ImmediateRange(tok.text.to_owned()),
            )),
            Err(_) => Err(self.wrong_kind(tok, OperandKind::Immediate)),
        }
    }

    /// Data addresses are left unmasked; the emulator bounds-checks them.
    fn addr(&mut self) -> Result<i32, AsmError> {
        let tok = self.take();
        if is_register_shaped(tok.text) {
            return Err(self.wrong_kind(tok, OperandKind::Address));
        }
        parse_literal(tok.text).map_err(|_| self.wrong_kind(tok, OperandKind::Address))
    }

    fn target(&mut self) -> Result<usize, AsmError> {
        let tok = self.take();
        if let Some(def) = self.labels.get(tok.text) {
            return Ok(def.index);
        }
        if is_register_shaped(tok.text) {
            return Err(self.wrong_kind(tok, OperandKind::Target));
        }
        parse_literal(tok.text)
            .ok()
            .and_then(|index| usize::try_from(index).ok())
            .ok_or_else(|| self.error(tok, AsmErrorKind::UnresolvedTarget(tok.text.to_owned())))
    }
}

/// Pass 2: encodes one instruction line.
fn encode<'a>(
    line: usize,
    mnemonic: Token<'a>,
    operands: &[Token<'a>],
    labels: &LabelTable<'a>,
) -> Result<Instruction, AsmError> {
    let error = |kind| AsmError {
        line,
        col: mnemonic.col,
        kind,
    };
    // a ':' left over after lexing means the label before it was malformed
    let words = std::iter::once(mnemonic).chain(operands.iter().copied());
    if let Some(pos) = words.clone().position(|t| t.text.contains(':')) {
        let text = words.take(pos + 1).map(|t| t.text).collect::<Vec<_>>().join(" ");
        let label = text.split(':').next().unwrap_or_default().trim_end();
        return Err(error(AsmErrorKind::InvalidLabel(label.to_owned())));
    }
    let m = Mnemonic::parse(mnemonic.text)
        .ok_or_else(|| error(AsmErrorKind::UnknownOpcode(mnemonic.text.to_owned())))?;
    let mut ops = Operands::new(line, m, mnemonic, operands, labels)?;

    let instr = match m {
        Mnemonic::Regular(op) => match op {
            Opcode::Add => Instruction::Add {
                rd: ops.reg()?,
                rs1: ops.reg()?,
                rs2: ops.reg()?,
            },
            Opcode::Sub => Instruction::Sub {
                rd: ops.reg()?,
                rs1: ops.reg()?,
                rs2: ops.reg()?,
            },
            Opcode::And => Instruction::And {
                rd: ops.reg()?,
                rs1: ops.reg()?,
                rs2: ops.reg()?,
            },
            Opcode::Or => Instruction::Or {
                rd: ops.reg()?,
                rs1: ops.reg()?,
                rs2: ops.reg()?,
            },
            Opcode::Xor => Instruction::Xor {
                rd: ops.reg()?,
                rs1: ops.reg()?,
                rs2: ops.reg()?,
            },
            Opcode::Addi => Instruction::Addi {
                rd: ops.reg()?,
                rs1: ops.reg()?,
                imm: ops.imm()?,
            },
            Opcode::Ld => Instruction::Ld {
                rd: ops.reg()?,
                addr: ops.addr()?,
            },
            Opcode::St => Instruction::St {
                rs: ops.reg()?,
                addr: ops.addr()?,
            },
            Opcode::Beq => Instruction::Beq {
                rs1: ops.reg()?,
                rs2: ops.reg()?,
                target: ops.target()?,
            },
            Opcode::Bne => Instruction::Bne {
                rs1: ops.reg()?,
                rs2: ops.reg()?,
                target: ops.target()?,
            },
            Opcode::Jmp => Instruction::Jmp {
                target: ops.target()?,
            },
            Opcode::In => Instruction::In { rd: ops.reg()? },
            Opcode::Out => Instruction::Out { rs: ops.reg()? },
            Opcode::Halt => Instruction::Halt,
        },
        // li   rd, imm   =>   addi rd, r0, imm
        Mnemonic::Pseudo(Pseudo::Li) => Instruction::Addi {
            rd: ops.reg()?,
            rs1: Register::R0,
            imm: ops.imm()?,
        },
        // mov  rd, rs    =>   add  rd, rs, r0
        Mnemonic::Pseudo(Pseudo::Mov) => Instruction::Add {
            rd: ops.reg()?,
            rs1: ops.reg()?,
            rs2: Register::R0,
        },
    };
    Ok(instr)
}

/// Translates assembly source text into a [Program].
///
/// Labels may be used before they are defined. The label table only lives for the duration of this call.
///
/// # Errors
///
/// Returns the first [AsmError] found; no partial program is produced.
pub fn assemble(source: &str) -> Result<Program, AsmError> {
    let lines = lex_program(source)?;
    let labels = collect_labels(&lines)?;

    let mut program = Program::default();
    for (line, lexed) in &lines {
        let Some(mnemonic) = lexed.mnemonic else {
            continue;
        };
        let instr = encode(*line, mnemonic, &lexed.operands, &labels)?;
        program.push(instr, *line);
    }
    log::debug!(
        "assembled {} instruction(s), {} label(s)",
        program.len(),
        labels.len()
    );
    Ok(program)
}
