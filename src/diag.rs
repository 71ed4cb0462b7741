use std::fmt::{Display, Formatter, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Position {
    pub offset: usize,
    pub line: usize,
    pub column: usize,
}

impl Display for Position {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Span {
    pub start: Position,
    pub end: Position,
}

impl Span {
    pub fn new(start: Position, end: Position) -> Self {
        Self { start, end }
    }

    /// Zero-length span at the given line/column, for callers that track
    /// coarse locations only.
    pub fn at(line: usize, column: usize) -> Self {
        let pos = Position {
            offset: 0,
            line,
            column,
        };
        Span::new(pos, pos)
    }
}

impl Default for Span {
    fn default() -> Self {
        Span::at(1, 1)
    }
}

impl Display for Span {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

/// An error kind paired with the source span it was reported at.
#[derive(Debug, Clone, PartialEq)]
pub struct SpannedError<K> {
    pub kind: K,
    pub span: Span,
}

impl<K> SpannedError<K> {
    pub fn new(kind: K, span: Span) -> Self {
        Self { kind, span }
    }
}

impl<K: Display> Display for SpannedError<K> {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        write!(f, "({}) {}", self.span.start, self.kind)
    }
}

impl<K: Display + std::fmt::Debug> std::error::Error for SpannedError<K> {}
