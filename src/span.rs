use std::{fmt::Display, sync::Arc};

use serde::{Deserialize, Serialize};

/// Source locator carried by tokens, nodes and errors.
///
/// Lines and columns are 1-based; `column_end` is exclusive and only
/// meaningful when the span covers a single line.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub file: Arc<str>,
    pub line: usize,
    pub column: usize,
    pub column_end: usize,
}

impl Span {
    pub fn new(file: Arc<str>, line: usize, column: usize, column_end: usize) -> Self {
        Self {
            file,
            line,
            column,
            column_end,
        }
    }

    /// A zero-width span, used for values that are not tied to source.
    pub fn detached() -> Self {
        Self {
            file: Arc::from(""),
            line: 0,
            column: 0,
            column_end: 0,
        }
    }

    pub fn is_detached(&self) -> bool {
        self.line == 0
    }
}

impl std::ops::Add<Span> for Span {
    type Output = Span;

    fn add(self, other: Span) -> Span {
        let (start, end) = if (self.line, self.column) <= (other.line, other.column) {
            (self, other)
        } else {
            (other, self)
        };

        let column_end = if start.line == end.line {
            start.column_end.max(end.column_end)
        } else {
            start.column_end
        };

        Span {
            file: start.file,
            line: start.line,
            column: start.column,
            column_end,
        }
    }
}

impl Display for Span {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn merging_spans_on_one_line_extends_the_end() {
        let file: Arc<str> = Arc::from("main.nubo");
        let a = Span::new(file.clone(), 3, 5, 7);
        let b = Span::new(file.clone(), 3, 10, 14);

        assert_eq!(b.clone() + a.clone(), Span::new(file, 3, 5, 14));
        assert_eq!((a + b).to_string(), "main.nubo:3:5");
    }
}
