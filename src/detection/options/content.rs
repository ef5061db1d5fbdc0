/// Content option: single literal pattern search with positional modifiers
use super::super::hash::WordHasher;
use super::super::option::EvalStatus;
use crate::error::{KsError, Result};
use aho_corasick::{AhoCorasick, AhoCorasickBuilder, MatchKind};

/// Buffer a content option inspects
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ContentBuffer {
    #[default]
    Payload,
    Uri,
}

/// Positional and matching modifiers of a content option
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContentModifiers {
    pub nocase: bool,
    pub rawbytes: bool,
    /// Alert when the pattern is absent
    pub negated: bool,
    pub offset: Option<i32>,
    pub depth: Option<u32>,
    pub distance: Option<i32>,
    pub within: Option<u32>,
    pub buffer: ContentBuffer,
}

impl ContentModifiers {
    /// distance/within anchor the search at the previous match
    pub fn is_relative(&self) -> bool {
        self.distance.is_some() || self.within.is_some()
    }
}

/// Compiled content option
#[derive(Debug, Clone)]
pub struct ContentOption {
    pattern: Vec<u8>,
    modifiers: ContentModifiers,
    /// Smallest shift at which the pattern can occur again
    jump: usize,
    searcher: AhoCorasick,
}

impl PartialEq for ContentOption {
    fn eq(&self, other: &Self) -> bool {
        self.pattern == other.pattern && self.modifiers == other.modifiers
    }
}

impl ContentOption {
    pub fn new(pattern: Vec<u8>, modifiers: ContentModifiers) -> Result<Self> {
        if pattern.is_empty() {
            return Err(KsError::InvalidRuleOption(
                "content pattern cannot be empty".to_string(),
            ));
        }
        if modifiers.is_relative() && (modifiers.offset.is_some() || modifiers.depth.is_some()) {
            return Err(KsError::InvalidRuleOption(
                "offset/depth cannot be combined with distance/within".to_string(),
            ));
        }
        if let Some(depth) = modifiers.depth.or(modifiers.within) {
            if (depth as usize) < pattern.len() {
                return Err(KsError::InvalidRuleOption(format!(
                    "search window of {} bytes is shorter than the {} byte pattern",
                    depth,
                    pattern.len()
                )));
            }
        }

        let searcher = AhoCorasickBuilder::new()
            .match_kind(MatchKind::LeftmostFirst)
            .ascii_case_insensitive(modifiers.nocase)
            .build([pattern.as_slice()])
            .map_err(|e| KsError::PatternError(format!("Failed to build content searcher: {}", e)))?;

        let jump = if modifiers.nocase {
            smallest_period(&pattern.to_ascii_lowercase())
        } else {
            smallest_period(&pattern)
        };

        Ok(Self {
            pattern,
            modifiers,
            jump,
            searcher,
        })
    }

    pub fn pattern(&self) -> &[u8] {
        &self.pattern
    }

    pub fn modifiers(&self) -> &ContentModifiers {
        &self.modifiers
    }

    pub fn jump(&self) -> usize {
        self.jump
    }

    pub fn is_relative(&self) -> bool {
        self.modifiers.is_relative()
    }

    pub fn is_negated(&self) -> bool {
        self.modifiers.negated
    }

    pub fn hash(&self, seed: u32) -> u32 {
        let m = &self.modifiers;
        WordHasher::new(seed)
            .bytes(&self.pattern)
            .flag(m.nocase)
            .flag(m.rawbytes)
            .flag(m.negated)
            .opt(m.offset.map(i64::from))
            .opt(m.depth.map(i64::from))
            .opt(m.distance.map(i64::from))
            .opt(m.within.map(i64::from))
            .word(m.buffer as u32)
            .finish()
    }

    /// Search window `[start, end)` for a fresh evaluation at `cursor`
    fn window(&self, cursor: usize, len: usize) -> (usize, usize) {
        let m = &self.modifiers;
        let (base, shift, limit) = if m.is_relative() {
            (cursor, m.distance.unwrap_or(0), m.within)
        } else {
            (0, m.offset.unwrap_or(0), m.depth)
        };

        let start = if shift < 0 {
            base.saturating_sub(shift.unsigned_abs() as usize)
        } else {
            base.saturating_add(shift as usize)
        }
        .min(len);

        let end = match limit {
            Some(limit) => start.saturating_add(limit as usize).min(len),
            None => len,
        };
        (start, end)
    }
}

/// Per-evaluation working copy of a content option.
///
/// Holds the search window and the last match so a relative retry can
/// resume past it without touching the shared option.
#[derive(Debug)]
pub struct ContentSearch<'a> {
    option: &'a ContentOption,
    window: Option<(usize, usize)>,
    last_match: Option<usize>,
}

impl<'a> ContentSearch<'a> {
    pub fn new(option: &'a ContentOption) -> Self {
        Self {
            option,
            window: None,
            last_match: None,
        }
    }

    pub fn buffer(&self) -> ContentBuffer {
        self.option.modifiers.buffer
    }

    pub fn rawbytes(&self) -> bool {
        self.option.modifiers.rawbytes
    }

    pub fn evaluate(&mut self, buf: &[u8], cursor: &mut usize) -> EvalStatus {
        let (start, end) = match self.window {
            Some(window) => window,
            None => {
                let window = self.option.window(*cursor, buf.len());
                self.window = Some(window);
                window
            }
        };

        let found = if end > start && end - start >= self.option.pattern.len() {
            self.option
                .searcher
                .find(&buf[start..end])
                .map(|m| start + m.start())
        } else {
            None
        };

        match (found, self.option.is_negated()) {
            (Some(pos), false) => {
                self.last_match = Some(pos);
                *cursor = pos + self.option.pattern.len();
                EvalStatus::Match
            }
            (Some(_), true) => EvalStatus::NoMatch,
            (None, false) => EvalStatus::NoMatch,
            (None, true) => EvalStatus::Match,
        }
    }

    /// Move the window past the last match; false when nothing is left to try
    pub fn advance(&mut self) -> bool {
        if self.option.is_negated() {
            return false;
        }
        let (Some(pos), Some((_, end))) = (self.last_match, self.window) else {
            return false;
        };

        let next = pos + self.option.jump;
        if next + self.option.pattern.len() > end {
            return false;
        }
        self.window = Some((next, end));
        self.last_match = None;
        true
    }
}

/// Length of the shortest period of `pattern` (KMP failure function)
fn smallest_period(pattern: &[u8]) -> usize {
    let n = pattern.len();
    if n == 0 {
        return 1;
    }
    let mut fail = vec![0usize; n];
    let mut k = 0;
    for i in 1..n {
        while k > 0 && pattern[i] != pattern[k] {
            k = fail[k - 1];
        }
        if pattern[i] == pattern[k] {
            k += 1;
        }
        fail[i] = k;
    }
    n - fail[n - 1]
}
