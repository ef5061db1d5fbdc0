/// PCRE option backed by `regex::bytes`
use super::super::hash::WordHasher;
use super::super::option::EvalStatus;
use crate::error::{KsError, Result};
use regex::bytes::Regex;

/// Compiled `pcre:"/pattern/flags"` option
#[derive(Debug, Clone)]
pub struct PcreOption {
    /// Pattern text as written, without delimiters
    pattern: String,
    /// Regex-level flags (i, m, s, x) in canonical order
    flags: String,
    relative: bool,
    uri: bool,
    negated: bool,
    regex: Regex,
}

impl PartialEq for PcreOption {
    fn eq(&self, other: &Self) -> bool {
        self.pattern == other.pattern
            && self.flags == other.flags
            && self.relative == other.relative
            && self.uri == other.uri
            && self.negated == other.negated
    }
}

impl PcreOption {
    /// Parse Snort PCRE format: [!]/pattern/modifiers
    pub fn parse(pcre_str: &str) -> Result<Self> {
        let pcre_str = pcre_str.trim();

        // Remove quotes if present
        let pcre_str = pcre_str.trim_matches('"');

        let (negated, pcre_str) = match pcre_str.strip_prefix('!') {
            Some(rest) => (true, rest),
            None => (false, pcre_str),
        };

        // Parse /pattern/modifiers format
        let Some(body) = pcre_str.strip_prefix('/') else {
            return Err(KsError::PatternError("PCRE must start with /".to_string()));
        };

        let Some(split) = body.rfind('/') else {
            return Err(KsError::PatternError(
                "PCRE must be in /pattern/modifiers format".to_string(),
            ));
        };

        let pattern = &body[..split];
        let modifiers = &body[split + 1..];

        let mut flags = String::new();
        let mut relative = false;
        let mut uri = false;
        for m in ['i', 'm', 's', 'x'] {
            if modifiers.contains(m) {
                flags.push(m);
            }
        }
        for m in modifiers.chars() {
            match m {
                'i' | 'm' | 's' | 'x' => {}
                'R' => relative = true,
                'U' => uri = true,
                // Accepted for compatibility, no effect on matching here
                'B' | 'O' | 'G' | 'A' | 'E' => {}
                other => {
                    return Err(KsError::PatternError(format!(
                        "Unknown PCRE modifier '{}'",
                        other
                    )))
                }
            }
        }

        Self::build(pattern, &flags, relative, uri, negated)
    }

    fn build(pattern: &str, flags: &str, relative: bool, uri: bool, negated: bool) -> Result<Self> {
        let regex_str = if flags.is_empty() {
            pattern.to_string()
        } else {
            format!("(?{}){}", flags, pattern)
        };
        let regex = Regex::new(&regex_str)?;

        Ok(Self {
            pattern: pattern.to_string(),
            flags: flags.to_string(),
            relative,
            uri,
            negated,
            regex,
        })
    }

    pub fn is_relative(&self) -> bool {
        self.relative
    }

    pub fn is_negated(&self) -> bool {
        self.negated
    }

    pub fn uses_uri(&self) -> bool {
        self.uri
    }

    pub fn hash(&self, seed: u32) -> u32 {
        WordHasher::new(seed)
            .bytes(self.pattern.as_bytes())
            .bytes(self.flags.as_bytes())
            .flag(self.relative)
            .flag(self.uri)
            .flag(self.negated)
            .finish()
    }
}

/// Per-evaluation working copy of a pcre option
#[derive(Debug)]
pub struct PcreSearch<'a> {
    option: &'a PcreOption,
    resume: Option<usize>,
    last_end: Option<usize>,
    last_was_empty: bool,
    buf_len: usize,
}

impl<'a> PcreSearch<'a> {
    pub fn new(option: &'a PcreOption) -> Self {
        Self {
            option,
            resume: None,
            last_end: None,
            last_was_empty: false,
            buf_len: 0,
        }
    }

    pub fn uses_uri(&self) -> bool {
        self.option.uri
    }

    pub fn evaluate(&mut self, buf: &[u8], cursor: &mut usize) -> EvalStatus {
        self.buf_len = buf.len();
        let start = match self.resume {
            Some(resume) => resume,
            None if self.option.relative => *cursor,
            None => 0,
        };
        if start > buf.len() {
            return if self.option.negated {
                EvalStatus::Match
            } else {
                EvalStatus::NoMatch
            };
        }

        match (self.option.regex.find_at(buf, start), self.option.negated) {
            (Some(m), false) => {
                *cursor = m.end();
                self.last_end = Some(m.end());
                self.last_was_empty = m.start() == m.end();
                EvalStatus::Match
            }
            (Some(_), true) => EvalStatus::NoMatch,
            (None, false) => EvalStatus::NoMatch,
            (None, true) => EvalStatus::Match,
        }
    }

    /// Resume after the previous match; false at end of buffer
    pub fn advance(&mut self) -> bool {
        if self.option.negated {
            return false;
        }
        let Some(end) = self.last_end.take() else {
            return false;
        };
        let next = if self.last_was_empty { end + 1 } else { end };
        if next >= self.buf_len {
            return false;
        }
        self.resume = Some(next);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pcre_parsing() {
        // Simple pattern
        let pcre = PcreOption::parse("/test/").unwrap();
        let mut cursor = 0;
        assert_eq!(
            PcreSearch::new(&pcre).evaluate(b"this is a test", &mut cursor),
            EvalStatus::Match
        );
        assert_eq!(cursor, 14);

        // Case-insensitive
        let pcre = PcreOption::parse("/TEST/i").unwrap();
        let mut cursor = 0;
        assert_eq!(
            PcreSearch::new(&pcre).evaluate(b"this is a test", &mut cursor),
            EvalStatus::Match
        );

        // Multi-line
        let pcre = PcreOption::parse("/^test/m").unwrap();
        let mut cursor = 0;
        assert_eq!(
            PcreSearch::new(&pcre).evaluate(b"line1\ntest", &mut cursor),
            EvalStatus::Match
        );
    }

    #[test]
    fn test_pcre_rejects_bad_format() {
        assert!(PcreOption::parse("test").is_err());
        assert!(PcreOption::parse("/test").is_err());
        assert!(PcreOption::parse("/test/q").is_err());
        assert!(PcreOption::parse("/(unclosed/").is_err());
    }

    #[test]
    fn test_pcre_relative_starts_at_cursor() {
        let pcre = PcreOption::parse("/\\d+/R").unwrap();
        assert!(pcre.is_relative());
        let mut cursor = 4;
        assert_eq!(
            PcreSearch::new(&pcre).evaluate(b"12 ab", &mut cursor),
            EvalStatus::NoMatch
        );
        let mut cursor = 2;
        assert_eq!(
            PcreSearch::new(&pcre).evaluate(b"12 34", &mut cursor),
            EvalStatus::Match
        );
        assert_eq!(cursor, 5);
    }

    #[test]
    fn test_pcre_advance_visits_each_match() {
        let pcre = PcreOption::parse("/a./").unwrap();
        let mut search = PcreSearch::new(&pcre);
        let mut ends = Vec::new();
        loop {
            let mut cursor = 0;
            if search.evaluate(b"a1 a2 a3", &mut cursor) != EvalStatus::Match {
                break;
            }
            ends.push(cursor);
            if !search.advance() {
                break;
            }
        }
        assert_eq!(ends, vec![2, 5, 8]);
    }

    #[test]
    fn test_pcre_negated() {
        let pcre = PcreOption::parse("!/admin/").unwrap();
        let mut cursor = 0;
        let mut search = PcreSearch::new(&pcre);
        assert_eq!(search.evaluate(b"guest", &mut cursor), EvalStatus::Match);
        assert!(!search.advance());
    }

    #[test]
    fn test_pcre_equality_uses_source() {
        let a = PcreOption::parse("/abc/is").unwrap();
        let b = PcreOption::parse("/abc/si").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.hash(0), b.hash(0));
        assert_ne!(a, PcreOption::parse("/abc/isR").unwrap());
    }
}
