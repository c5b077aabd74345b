//! Selection of the contiguous run of parts to narrate.

use std::fmt;
use std::io::{BufRead, Write};

use crate::document::TextUnit;
use crate::error::InvalidRangeError;
use crate::text::preview;

/// Number of characters shown when asking about a part boundary.
pub const PREVIEW_CHARS: usize = 80;

/// Inclusive index interval over a document's parts.
///
/// Always satisfies `start <= end < len(parts)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Range {
    start: usize,
    end: usize,
}

impl Range {
    pub fn new(start: usize, end: usize, len: usize) -> Result<Self, InvalidRangeError> {
        if len == 0 {
            return Err(InvalidRangeError::Empty);
        }
        if start > end {
            return Err(InvalidRangeError::NotAscending { start, end });
        }
        if end >= len {
            return Err(InvalidRangeError::OutOfBounds { start, end, len });
        }
        Ok(Self { start, end })
    }

    /// Every part of a document with `len` parts.
    pub fn full(len: usize) -> Result<Self, InvalidRangeError> {
        Self::new(0, len.saturating_sub(1), len)
    }

    /// Lenient construction for spin-box style input: reversed bounds are
    /// swapped and `end` is clamped to the last part.
    pub fn from_bounds(start: usize, end: usize, len: usize) -> Result<Self, InvalidRangeError> {
        let (start, end) = if end < start { (end, start) } else { (start, end) };
        let last = len.saturating_sub(1);
        Self::new(start.min(last), end.min(last), len)
    }

    pub fn start(&self) -> usize {
        self.start
    }

    pub fn end(&self) -> usize {
        self.end
    }

    /// Number of parts covered.
    pub fn len(&self) -> usize {
        self.end - self.start + 1
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn contains(&self, index: usize) -> bool {
        (self.start..=self.end).contains(&index)
    }

    pub fn indices(&self) -> std::ops::RangeInclusive<usize> {
        self.start..=self.end
    }
}

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.start, self.end)
    }
}

/// Asks whether a part marks the start or the end of the content.
pub trait BoundaryPrompt {
    fn is_start(&mut self, unit: &TextUnit, preview: &str) -> bool;
    fn is_end(&mut self, unit: &TextUnit, preview: &str) -> bool;
}

/// Establishes a [`Range`] from an explicit hint or, failing that, by
/// scanning the parts with a [`BoundaryPrompt`].
pub struct RangeSelector<P> {
    prompt: P,
}

impl<P: BoundaryPrompt> RangeSelector<P> {
    pub fn new(prompt: P) -> Self {
        Self { prompt }
    }

    pub fn into_prompt(self) -> P {
        self.prompt
    }

    /// Accept `hint` when it is a valid range, otherwise scan for boundaries.
    pub fn select(
        &mut self,
        parts: &[TextUnit],
        hint: Option<(usize, usize)>,
    ) -> Result<Range, InvalidRangeError> {
        if parts.is_empty() {
            return Err(InvalidRangeError::Empty);
        }
        if let Some((start, end)) = hint {
            match from_hint(parts.len(), start, end) {
                Ok(range) => return Ok(range),
                Err(e) => log::warn!("Ignoring range hint: {e}"),
            }
        }
        Ok(self.scan(parts))
    }

    /// Forward scan for the start, backward scan for the end.
    ///
    /// Without a confirmation the start stays at 0 and the end at the last
    /// part. The backward scan stops at the chosen start and never offers
    /// part 0 as an end.
    pub fn scan(&mut self, parts: &[TextUnit]) -> Range {
        let last = parts.len().saturating_sub(1);

        let start = parts
            .iter()
            .find(|unit| self.prompt.is_start(unit, &preview(&unit.text, PREVIEW_CHARS)))
            .map_or(0, |unit| unit.index);

        let end = parts[start.max(1).min(parts.len())..]
            .iter()
            .rev()
            .find(|unit| self.prompt.is_end(unit, &preview(&unit.text, PREVIEW_CHARS)))
            .map_or(last, |unit| unit.index);

        log::info!("Selected parts [{start}, {end}]");
        Range { start, end }
    }
}

/// Validate a programmatic range: `start < end < len` is required, so a
/// single-part range is rejected on this path.
pub fn from_hint(len: usize, start: usize, end: usize) -> Result<Range, InvalidRangeError> {
    if start >= end {
        return Err(InvalidRangeError::NotAscending { start, end });
    }
    Range::new(start, end, len)
}

/// Parse `"start end"`.
pub fn parse_hint(input: &str) -> Result<(usize, usize), InvalidRangeError> {
    let unparseable = || InvalidRangeError::Unparseable(input.trim().to_string());
    let numbers: Vec<usize> = input
        .split_whitespace()
        .map(str::parse)
        .collect::<Result<_, _>>()
        .map_err(|_| unparseable())?;
    match numbers.as_slice() {
        [start, end] => Ok((*start, *end)),
        _ => Err(unparseable()),
    }
}

/// Line-oriented prompt on a reader/writer pair, typically stdin/stdout.
pub struct ConsolePrompt<R, W> {
    input: R,
    output: W,
}

impl ConsolePrompt<std::io::StdinLock<'static>, std::io::Stdout> {
    pub fn stdio() -> Self {
        Self::new(std::io::stdin().lock(), std::io::stdout())
    }
}

impl<R: BufRead, W: Write> ConsolePrompt<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }

    /// Ask for a `"start end"` hint; `None` when the answer does not parse.
    pub fn ask_range_hint(&mut self) -> Option<(usize, usize)> {
        let answer = self.ask("Enter part range to extract or 'n' to search: ")?;
        parse_hint(&answer).ok()
    }

    // EOF or a broken terminal counts as "no".
    fn ask(&mut self, question: &str) -> Option<String> {
        write!(self.output, "{question}").ok()?;
        self.output.flush().ok()?;
        let mut line = String::new();
        match self.input.read_line(&mut line) {
            Ok(0) | Err(_) => None,
            Ok(_) => Some(line.trim().to_string()),
        }
    }

    fn confirm(&mut self, unit: &TextUnit, preview: &str, question: &str) -> bool {
        let _ = writeln!(self.output, "\nIndex {}:\n\t{}", unit.index, preview);
        self.ask(question).is_some_and(|answer| answer == "y")
    }
}

impl<R: BufRead, W: Write> BoundaryPrompt for ConsolePrompt<R, W> {
    fn is_start(&mut self, unit: &TextUnit, preview: &str) -> bool {
        self.confirm(unit, preview, "Is this the start (y/n)? ")
    }

    fn is_end(&mut self, unit: &TextUnit, preview: &str) -> bool {
        self.confirm(unit, preview, "Is this the end (y/n)? ")
    }
}
