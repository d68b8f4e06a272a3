//! Word-width helpers shared by the assembler and the emulator.

use nom::{
    branch::alt,
    bytes::complete::tag_no_case,
    character::complete::{char, digit1, hex_digit1},
    combinator::{all_consuming, map, opt},
    sequence::{pair, preceded},
    IResult,
};
use thiserror::Error;

/// Smallest value accepted for an immediate or an `IN` token (the signed 16-bit minimum).
pub const IMM_MIN: i32 = i16::MIN as i32;
/// Largest value accepted for an immediate or an `IN` token (the unsigned 16-bit maximum).
pub const IMM_MAX: i32 = u16::MAX as i32;

/// An error produced while parsing a numeric literal.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("empty number")]
    Empty,
    #[error("invalid number '{0}'")]
    Malformed(String),
    #[error("number '{0}' does not fit in 32 bits")]
    Overflow(String),
}

/// Reduces `x` modulo 2^16 into the unsigned range `0..=65535`.
pub const fn mask16(x: i32) -> u16 {
    (x & 0xFFFF) as u16
}

/// Reinterprets a word as a two's-complement signed value.
pub const fn to_signed(x: u16) -> i16 {
    x as i16
}

#[derive(Debug, Clone, Copy)]
enum Digits<'a> {
    Dec(&'a str),
    Hex(&'a str),
}

fn lex_literal(inp: &str) -> IResult<&str, (bool, Digits<'_>)> {
    pair(
        map(opt(char('-')), |sign| sign.is_some()),
        alt((
            map(preceded(tag_no_case("0x"), hex_digit1), Digits::Hex),
            map(digit1, Digits::Dec),
        )),
    )(inp)
}

/// Parses a decimal or `0x`-prefixed hexadecimal literal with an optional leading `-`.
///
/// The result is not masked; callers range-check and mask as needed.
///
/// # Errors
///
/// Returns [`ParseError`] if `text` is not exactly one literal, or if its value does not fit in an `i32`.
pub fn parse_literal(text: &str) -> Result<i32, ParseError> {
    if text.is_empty() {
        return Err(ParseError::Empty);
    }
    let (_, (negative, digits)) =
        all_consuming(lex_literal)(text).map_err(|_| ParseError::Malformed(text.to_owned()))?;
    let magnitude = match digits {
        Digits::Dec(d) => u32::from_str_radix(d, 10),
        Digits::Hex(d) => u32::from_str_radix(d, 16),
    }
    .map_err(|_| ParseError::Overflow(text.to_owned()))?;
    let value = if negative {
        -i64::from(magnitude)
    } else {
        i64::from(magnitude)
    };
    i32::try_from(value).map_err(|_| ParseError::Overflow(text.to_owned()))
}

/// Renders a word the way `OUT` prints it: `+00030 (0x001e)`.
pub fn format_word(x: u16) -> String {
    let signed = to_signed(x);
    let sign = if signed < 0 { '-' } else { '+' };
    format!("{sign}{:05} (0x{x:04x})", signed.unsigned_abs())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_mask16() {
        assert_eq!(mask16(0), 0);
        assert_eq!(mask16(65535), 0xFFFF);
        assert_eq!(mask16(65536), 0);
        assert_eq!(mask16(65540), 4);
        assert_eq!(mask16(-1), 0xFFFF);
        assert_eq!(mask16(-32768), 0x8000);
    }

    #[test]
    fn test_to_signed() {
        assert_eq!(to_signed(0x7FFF), 32767);
        assert_eq!(to_signed(0x8000), -32768);
        assert_eq!(to_signed(0xFFFF), -1);
    }

    #[test]
    fn test_parse_literal() {
        assert_eq!(parse_literal("123"), Ok(123));
        assert_eq!(parse_literal("-5"), Ok(-5));
        assert_eq!(parse_literal("0x2a"), Ok(42));
        assert_eq!(parse_literal("0xFFFE"), Ok(0xFFFE));
        assert_eq!(parse_literal("-0x000A"), Ok(-10));
        assert_eq!(parse_literal("0X10"), Ok(16));
        assert_eq!(parse_literal("70000"), Ok(70000));
    }

    #[test]
    fn test_parse_literal_rejects() {
        assert_eq!(parse_literal(""), Err(ParseError::Empty));
        for bad in ["abc", "0x", "-", "+5", "--5", "12a", "0x1g", " 7", "r1"] {
            assert!(
                matches!(parse_literal(bad), Err(ParseError::Malformed(_))),
                "{bad:?} should be malformed"
            );
        }
        assert!(matches!(
            parse_literal("0x100000000"),
            Err(ParseError::Overflow(_))
        ));
        assert!(matches!(
            parse_literal("2147483648"),
            Err(ParseError::Overflow(_))
        ));
        assert_eq!(parse_literal("-2147483648"), Ok(i32::MIN));
    }

    #[test]
    fn test_format_word() {
        assert_eq!(format_word(30), "+00030 (0x001e)");
        assert_eq!(format_word(0), "+00000 (0x0000)");
        assert_eq!(format_word(0xFFFF), "-00001 (0xffff)");
        assert_eq!(format_word(0xFFFE), "-00002 (0xfffe)");
        assert_eq!(format_word(0x8000), "-32768 (0x8000)");
        assert_eq!(format_word(0x7FFF), "+32767 (0x7fff)");
    }

    proptest! {
        #[test]
        fn test_add_then_sub_is_identity(a in any::<u16>(), b in any::<u16>()) {
            let sum = mask16(i32::from(a) + i32::from(b));
            prop_assert_eq!(mask16(i32::from(sum) - i32::from(b)), a);
        }

        #[test]
        fn test_mask16_keeps_in_range_values(x in IMM_MIN..=IMM_MAX) {
            prop_assert_eq!(i32::from(mask16(x)), x.rem_euclid(65536));
        }
    }
}
