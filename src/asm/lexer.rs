use nom::{
    branch::alt,
    bytes::complete::{tag, tag_no_case, take_till1, take_while, take_while1},
    character::complete::{alpha1, alphanumeric1, char, multispace0, one_of, space0},
    combinator::{all_consuming, eof, map, opt, recognize, rest, value},
    multi::{many0, many0_count},
    sequence::{pair, preceded, terminated},
    IResult,
};

use crate::plat::Opcode;

use super::{AsmError, AsmErrorKind, Line, Mnemonic, Pseudo, Span, Token};

fn is_separator(c: char) -> bool {
    c == ',' || c.is_whitespace()
}

fn is_comment_start(c: char) -> bool {
    c == ';' || c == '#'
}

impl Pseudo {
    pub fn lex(inp: &str) -> IResult<&str, Self> {
        alt((
            value(Self::Li, tag_no_case("li")),
            value(Self::Mov, tag_no_case("mov")),
        ))(inp)
    }
}

impl Opcode {
    /// Longer mnemonics come before their prefixes (`addi` before `add`).
    pub fn lex(inp: &str) -> IResult<&str, Self> {
        alt((
            value(Self::Halt, tag_no_case("halt")),
            alt((
                value(Self::Addi, tag_no_case("addi")),
                value(Self::Add, tag_no_case("add")),
                value(Self::Sub, tag_no_case("sub")),
                value(Self::And, tag_no_case("and")),
                value(Self::Or, tag_no_case("or")),
                value(Self::Xor, tag_no_case("xor")),
            )),
            alt((
                value(Self::Ld, tag_no_case("ld")),
                value(Self::St, tag_no_case("st")),
            )),
            alt((
                value(Self::Beq, tag_no_case("beq")),
                value(Self::Bne, tag_no_case("bne")),
                value(Self::Jmp, tag_no_case("jmp")),
            )),
            alt((
                value(Self::In, tag_no_case("in")),
                value(Self::Out, tag_no_case("out")),
            )),
        ))(inp)
    }
}

impl Mnemonic {
    pub fn lex(inp: &str) -> IResult<&str, Self> {
        alt((map(Opcode::lex, Self::Regular), map(Pseudo::lex, Self::Pseudo)))(inp)
    }

    /// Looks up a whole mnemonic token, ignoring case.
    pub fn parse(text: &str) -> Option<Self> {
        all_consuming(Self::lex)(text).ok().map(|(_, m)| m)
    }
}

pub fn lex_identifier(inp: Span) -> IResult<Span, Span> {
    recognize(pair(
        alt((alpha1, tag("_"))),
        many0_count(alt((alphanumeric1, tag("_")))),
    ))(inp)
}

pub fn lex_label(inp: Span) -> IResult<Span, Span> {
    terminated(lex_identifier, preceded(space0, char(':')))(inp)
}

/// A mnemonic or operand: everything up to the next separator or comment.
pub fn lex_word(inp: Span) -> IResult<Span, Span> {
    take_till1(|c: char| is_separator(c) || is_comment_start(c))(inp)
}

pub fn lex_separator(inp: Span) -> IResult<Span, Span> {
    take_while1(is_separator)(inp)
}

pub fn lex_comment(inp: Span) -> IResult<Span, Span> {
    recognize(pair(one_of(";#"), rest))(inp)
}

/// Lexes one source line: `[label:] [mnemonic operand...] [comment]`.
pub fn lex_line(inp: Span) -> IResult<Span, Line> {
    let (inp, _) = multispace0(inp)?;
    let (inp, label) = opt(lex_label)(inp)?;
    let (inp, _) = multispace0(inp)?;
    let (inp, mnemonic) = opt(lex_word)(inp)?;
    let (inp, operands) = if mnemonic.is_some() {
        many0(preceded(lex_separator, lex_word))(inp)?
    } else {
        (inp, vec![])
    };
    let (inp, _) = take_while(is_separator)(inp)?;
    let (inp, _) = opt(lex_comment)(inp)?;
    let (inp, _) = eof(inp)?;
    Ok((
        inp,
        Line {
            label: label.map(Token::from),
            mnemonic: mnemonic.map(Token::from),
            operands: operands.into_iter().map(Token::from).collect(),
        },
    ))
}

/// Lexes assembly program text into its [Line]s, paired with their 1-based line numbers.
pub fn lex_program(program: &str) -> Result<Vec<(usize, Line<'_>)>, AsmError> {
    program
        .lines()
        .enumerate()
        .map(|(i, text)| {
            let line = i + 1;
            let span = Span::new(text);
            let (_, lexed) = lex_line(span).map_err(|e| {
                let at = match e {
                    nom::Err::Error(e) => e.input,
                    nom::Err::Failure(e) => e.input,
                    nom::Err::Incomplete(_) => span,
                };
                AsmError {
                    line,
                    col: at.get_utf8_column(),
                    kind: AsmErrorKind::Syntax(
                        at.fragment()
                            .split(is_separator)
                            .find(|w| !w.is_empty())
                            .unwrap_or_default()
                            .to_string(),
                    ),
                }
            })?;
            Ok((line, lexed))
        })
        .collect()
}
