/// byte_test, byte_jump and isdataat options
use super::super::hash::WordHasher;
use super::super::option::EvalStatus;
use crate::error::{KsError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NumberBase {
    Dec,
    Hex,
    Oct,
}

impl NumberBase {
    fn radix(self) -> u32 {
        match self {
            NumberBase::Dec => 10,
            NumberBase::Hex => 16,
            NumberBase::Oct => 8,
        }
    }
}

/// Where and how to read a number from the buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteExtract {
    pub bytes: u8,
    pub offset: i32,
    pub relative: bool,
    pub big_endian: bool,
    /// Read ASCII digits instead of raw bytes
    pub string: Option<NumberBase>,
}

impl ByteExtract {
    pub fn new(bytes: u8, offset: i32) -> Result<Self> {
        let extract = Self {
            bytes,
            offset,
            relative: false,
            big_endian: true,
            string: None,
        };
        extract.validate()?;
        Ok(extract)
    }

    pub fn validate(&self) -> Result<()> {
        let max = if self.string.is_some() { 10 } else { 4 };
        if self.bytes == 0 || self.bytes > max {
            return Err(KsError::InvalidRuleOption(format!(
                "byte count must be between 1 and {}, got {}",
                max, self.bytes
            )));
        }
        Ok(())
    }

    /// Returns the value and the position just past it
    fn read(&self, buf: &[u8], cursor: usize) -> Option<(u64, usize)> {
        let base = if self.relative { cursor as i64 } else { 0 };
        let start = base + i64::from(self.offset);
        if start < 0 {
            return None;
        }
        let start = start as usize;
        let end = start.checked_add(self.bytes as usize)?;
        let raw = buf.get(start..end)?;

        let value = match self.string {
            Some(base) => {
                let text = std::str::from_utf8(raw).ok()?.trim();
                u64::from_str_radix(text, base.radix()).ok()?
            }
            None if self.big_endian => raw.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b)),
            None => raw.iter().rev().fold(0u64, |acc, b| (acc << 8) | u64::from(*b)),
        };
        Some((value, end))
    }

    fn feed(&self, hasher: &mut WordHasher) {
        hasher
            .word(u32::from(self.bytes))
            .word(self.offset as u32)
            .flag(self.relative)
            .flag(self.big_endian)
            .word(self.string.map_or(0, |b| b.radix()));
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ByteOp {
    Lt,
    Gt,
    Eq,
    And,
    Xor,
}

impl ByteOp {
    pub fn parse(op: &str) -> Result<(Self, bool)> {
        let (negate, op) = match op.strip_prefix('!') {
            Some("") => (true, "="),
            Some(rest) => (true, rest),
            None => (false, op),
        };
        let op = match op {
            "<" => ByteOp::Lt,
            ">" => ByteOp::Gt,
            "=" => ByteOp::Eq,
            "&" => ByteOp::And,
            "^" => ByteOp::Xor,
            other => {
                return Err(KsError::InvalidRuleOption(format!(
                    "unknown byte_test operator '{}'",
                    other
                )))
            }
        };
        Ok((op, negate))
    }

    fn apply(self, lhs: u64, rhs: u64) -> bool {
        match self {
            ByteOp::Lt => lhs < rhs,
            ByteOp::Gt => lhs > rhs,
            ByteOp::Eq => lhs == rhs,
            ByteOp::And => lhs & rhs != 0,
            ByteOp::Xor => lhs ^ rhs != 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ByteTestOption {
    pub extract: ByteExtract,
    pub op: ByteOp,
    pub negate: bool,
    pub value: u64,
}

impl ByteTestOption {
    pub fn evaluate(&self, buf: &[u8], cursor: usize) -> EvalStatus {
        let Some((value, _)) = self.extract.read(buf, cursor) else {
            return EvalStatus::NoMatch;
        };
        if self.op.apply(value, self.value) != self.negate {
            EvalStatus::Match
        } else {
            EvalStatus::NoMatch
        }
    }

    pub fn hash(&self, seed: u32) -> u32 {
        let mut hasher = WordHasher::new(seed);
        self.extract.feed(&mut hasher);
        hasher
            .word(self.op as u32)
            .flag(self.negate)
            .wide(self.value)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ByteJumpOption {
    pub extract: ByteExtract,
    pub multiplier: u32,
    /// Round the jump up to a 32-bit boundary
    pub align: bool,
    pub from_beginning: bool,
    pub post_offset: i32,
}

impl ByteJumpOption {
    pub fn evaluate(&self, buf: &[u8], cursor: &mut usize) -> EvalStatus {
        let Some((value, end)) = self.extract.read(buf, *cursor) else {
            return EvalStatus::NoMatch;
        };

        let mut jump = value.saturating_mul(u64::from(self.multiplier.max(1)));
        if self.align && jump % 4 != 0 {
            let Some(aligned) = jump.checked_add(4 - jump % 4) else {
                return EvalStatus::NoMatch;
            };
            jump = aligned;
        }

        let origin = if self.from_beginning { 0 } else { end as i64 };
        let target = origin
            .saturating_add(jump.min(i64::MAX as u64) as i64)
            .saturating_add(i64::from(self.post_offset));
        if target < 0 || target as u64 > buf.len() as u64 {
            return EvalStatus::NoMatch;
        }

        *cursor = target as usize;
        EvalStatus::Match
    }

    pub fn hash(&self, seed: u32) -> u32 {
        let mut hasher = WordHasher::new(seed);
        self.extract.feed(&mut hasher);
        hasher
            .word(self.multiplier)
            .flag(self.align)
            .flag(self.from_beginning)
            .word(self.post_offset as u32)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IsDataAtOption {
    pub offset: u32,
    pub relative: bool,
    pub negate: bool,
}

impl IsDataAtOption {
    pub fn evaluate(&self, buf: &[u8], cursor: usize) -> EvalStatus {
        let base = if self.relative { cursor } else { 0 };
        let present = base.saturating_add(self.offset as usize) < buf.len();
        if present != self.negate {
            EvalStatus::Match
        } else {
            EvalStatus::NoMatch
        }
    }

    pub fn hash(&self, seed: u32) -> u32 {
        WordHasher::new(seed)
            .word(self.offset)
            .flag(self.relative)
            .flag(self.negate)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_byte_test_big_and_little_endian() {
        let mut extract = ByteExtract::new(2, 0).unwrap();
        let test = ByteTestOption {
            extract,
            op: ByteOp::Eq,
            negate: false,
            value: 0x0102,
        };
        assert_eq!(test.evaluate(&[0x01, 0x02], 0), EvalStatus::Match);

        extract.big_endian = false;
        let test = ByteTestOption { extract, ..test };
        assert_eq!(test.evaluate(&[0x01, 0x02], 0), EvalStatus::NoMatch);
        assert_eq!(test.evaluate(&[0x02, 0x01], 0), EvalStatus::Match);
    }

    #[test]
    fn test_byte_test_string_relative() {
        let extract = ByteExtract {
            bytes: 3,
            offset: 1,
            relative: true,
            big_endian: true,
            string: Some(NumberBase::Dec),
        };
        let test = ByteTestOption {
            extract,
            op: ByteOp::Gt,
            negate: false,
            value: 100,
        };
        assert_eq!(test.evaluate(b"len=512", 3), EvalStatus::Match);
        assert_eq!(test.evaluate(b"len=050", 3), EvalStatus::NoMatch);
        // Out of bounds never matches
        assert_eq!(test.evaluate(b"len=5", 3), EvalStatus::NoMatch);
    }

    #[test]
    fn test_byte_op_parse() {
        assert_eq!(ByteOp::parse("<").unwrap(), (ByteOp::Lt, false));
        assert_eq!(ByteOp::parse("!").unwrap(), (ByteOp::Eq, true));
        assert_eq!(ByteOp::parse("!&").unwrap(), (ByteOp::And, true));
        assert!(ByteOp::parse("~").is_err());
    }

    #[test]
    fn test_byte_jump_moves_cursor() {
        let extract = ByteExtract::new(1, 0).unwrap();
        let jump = ByteJumpOption {
            extract,
            multiplier: 1,
            align: false,
            from_beginning: false,
            post_offset: 0,
        };
        let mut cursor = 0;
        assert_eq!(jump.evaluate(&[3, 0, 0, 0, 9], &mut cursor), EvalStatus::Match);
        assert_eq!(cursor, 4);

        let mut cursor = 0;
        assert_eq!(jump.evaluate(&[9, 0, 0], &mut cursor), EvalStatus::NoMatch);
        assert_eq!(cursor, 0);
    }

    #[test]
    fn test_byte_jump_align() {
        let jump = ByteJumpOption {
            extract: ByteExtract::new(1, 0).unwrap(),
            multiplier: 1,
            align: true,
            from_beginning: true,
            post_offset: 0,
        };
        let mut cursor = 0;
        assert_eq!(jump.evaluate(&[5, 0, 0, 0, 0, 0, 0, 0, 0], &mut cursor), EvalStatus::Match);
        assert_eq!(cursor, 8);
    }

    #[test]
    fn test_byte_jump_align_saturated_value() {
        let jump = ByteJumpOption {
            extract: ByteExtract {
                bytes: 10,
                offset: 0,
                relative: false,
                big_endian: true,
                string: Some(NumberBase::Dec),
            },
            multiplier: u32::MAX,
            align: true,
            from_beginning: false,
            post_offset: 0,
        };
        let mut cursor = 0;
        assert_eq!(jump.evaluate(b"9999999999 tail", &mut cursor), EvalStatus::NoMatch);
        assert_eq!(cursor, 0);
    }

    #[test]
    fn test_isdataat() {
        let check = IsDataAtOption {
            offset: 4,
            relative: true,
            negate: false,
        };
        assert_eq!(check.evaluate(b"0123456", 2), EvalStatus::Match);
        assert_eq!(check.evaluate(b"0123456", 3), EvalStatus::NoMatch);

        let negated = IsDataAtOption {
            negate: true,
            ..check
        };
        assert_eq!(negated.evaluate(b"0123456", 3), EvalStatus::Match);
    }

    #[test]
    fn test_extract_validation() {
        assert!(ByteExtract::new(0, 0).is_err());
        assert!(ByteExtract::new(5, 0).is_err());
        assert!(ByteExtract::new(4, 0).is_ok());
    }
}
