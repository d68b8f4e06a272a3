use crate::plat::num::mask16;

// The ALU's mode of operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AluMode {
    Add,
    Sub,
    And,
    Or,
    Xor,
}

impl AluMode {
    /// Performs the operation on two words. Arithmetic wraps modulo 2^16; no flags are produced.
    pub const fn apply(self, left: u16, right: u16) -> u16 {
        let (l, r) = (left as i32, right as i32);
        match self {
            Self::Add => mask16(l + r),
            Self::Sub => mask16(l - r),
            Self::And => left & right,
            Self::Or => left | right,
            Self::Xor => left ^ right,
        }
    }
}
