use std::{fmt::Display, path::PathBuf};

use colored::Colorize;

use crate::{
    config::ConfigError, events::EventError, parser::ParseErrors, prepared::PreparedError,
    span::Span, tokenizer::TokenizeError, value::prototype::PrototypeError,
};

/// Closed set of error levels shown to users.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Level {
    Fatal,
    Syntax,
    Semantic,
    Runtime,
    Type,
    Value,
    Import,
}

impl Display for Level {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Level::Fatal => "FatalError",
            Level::Syntax => "SyntaxError",
            Level::Semantic => "SemanticError",
            Level::Runtime => "RuntimeError",
            Level::Type => "TypeError",
            Level::Value => "ValueError",
            Level::Import => "ImportError",
        };
        write!(f, "{text}")
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum ExecutionErrorKind {
    #[error("undefined variable '{0}'")]
    UndefinedVariable(String),
    #[error("variable '{0}' is immutable")]
    ImmutableVariable(String),
    #[error("'{0}' is already declared in this scope")]
    AlreadyDeclared(String),
    #[error("{0}")]
    TypeMismatch(String),
    #[error("expected {expected} (minimum {minimum}) arguments, got {got}")]
    ArgumentCount {
        expected: usize,
        minimum: usize,
        got: usize,
    },
    #[error("failed to evaluate expression: {0}")]
    Expression(String),
    #[error("cannot operate on type {0}")]
    InvalidOperand(String),
    #[error("division by zero")]
    DivisionByZero,
    #[error("unknown property '{name}' on {ty}")]
    UnknownProperty { name: String, ty: String },
    #[error("private member '{0}' is not accessible here")]
    PrivateAccess(String),
    #[error("value of type {0} is not callable")]
    NotCallable(String),
    #[error("value of type {0} is not iterable")]
    NotIterable(String),
    #[error("index {index} out of range for length {length}")]
    IndexOutOfRange { index: i64, length: usize },
    #[error("'{0}' used outside of a loop")]
    SignalOutsideLoop(String),
    #[error("condition must be bool, got {0}")]
    ConditionNotBool(String),
    #[error("dict key of type {0} is not hashable")]
    UnhashableKey(String),
    #[error("{0}")]
    Value(String),
    #[error("{0}")]
    Runtime(String),
    #[error("panic: {0}")]
    Panic(String),
    #[error("{0}")]
    Import(String),
    #[error("{0}")]
    Syntax(String),
    #[error(transparent)]
    Prototype(#[from] PrototypeError),
    #[error(transparent)]
    Event(#[from] EventError),
    #[error("execution cancelled")]
    Cancelled,
}

impl ExecutionErrorKind {
    pub fn level(&self) -> Level {
        match self {
            ExecutionErrorKind::Cancelled => Level::Fatal,
            ExecutionErrorKind::Syntax(_) | ExecutionErrorKind::SignalOutsideLoop(_) => {
                Level::Syntax
            }
            ExecutionErrorKind::AlreadyDeclared(_) | ExecutionErrorKind::Prototype(_) => {
                Level::Semantic
            }
            ExecutionErrorKind::TypeMismatch(_)
            | ExecutionErrorKind::ArgumentCount { .. }
            | ExecutionErrorKind::InvalidOperand(_)
            | ExecutionErrorKind::NotCallable(_)
            | ExecutionErrorKind::NotIterable(_)
            | ExecutionErrorKind::ConditionNotBool(_)
            | ExecutionErrorKind::UnhashableKey(_) => Level::Type,
            ExecutionErrorKind::DivisionByZero
            | ExecutionErrorKind::IndexOutOfRange { .. }
            | ExecutionErrorKind::Value(_) => Level::Value,
            ExecutionErrorKind::Import(_) => Level::Import,
            ExecutionErrorKind::UndefinedVariable(_)
            | ExecutionErrorKind::ImmutableVariable(_)
            | ExecutionErrorKind::Expression(_)
            | ExecutionErrorKind::UnknownProperty { .. }
            | ExecutionErrorKind::PrivateAccess(_)
            | ExecutionErrorKind::Runtime(_)
            | ExecutionErrorKind::Panic(_)
            | ExecutionErrorKind::Event(_) => Level::Runtime,
        }
    }

    /// Short label used as the `base` of a caught error.
    pub fn base(&self) -> &'static str {
        match self {
            ExecutionErrorKind::UndefinedVariable(_) => "Undefined variable",
            ExecutionErrorKind::ImmutableVariable(_) => "Variable is immutable",
            ExecutionErrorKind::AlreadyDeclared(_) => "Already declared",
            ExecutionErrorKind::TypeMismatch(_) => "Type mismatch",
            ExecutionErrorKind::ArgumentCount { .. } => "Argument count mismatch",
            ExecutionErrorKind::Expression(_) | ExecutionErrorKind::InvalidOperand(_) => {
                "Expression error"
            }
            ExecutionErrorKind::DivisionByZero => "Division by zero",
            ExecutionErrorKind::UnknownProperty { .. } => "Unknown property",
            ExecutionErrorKind::PrivateAccess(_) => "Private access",
            ExecutionErrorKind::NotCallable(_) => "Not callable",
            ExecutionErrorKind::NotIterable(_) => "Not iterable",
            ExecutionErrorKind::IndexOutOfRange { .. } => "Index out of range",
            ExecutionErrorKind::SignalOutsideLoop(_) => "Invalid signal",
            ExecutionErrorKind::ConditionNotBool(_) => "Invalid condition",
            ExecutionErrorKind::UnhashableKey(_) => "Unhashable key",
            ExecutionErrorKind::Value(_) => "Invalid value",
            ExecutionErrorKind::Runtime(_) => "Runtime error",
            ExecutionErrorKind::Panic(_) => "Panic",
            ExecutionErrorKind::Import(_) => "Import error",
            ExecutionErrorKind::Syntax(_) => "Syntax error",
            ExecutionErrorKind::Prototype(_) => "Prototype error",
            ExecutionErrorKind::Event(_) => "Event error",
            ExecutionErrorKind::Cancelled => "Cancelled",
        }
    }
}

/// An interpreter failure with the locator where it happened and the
/// boundaries it crossed on the way out.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{kind}")]
pub struct ExecutionError {
    pub kind: ExecutionErrorKind,
    pub span: Span,
    pub trace: Vec<Span>,
}

impl ExecutionError {
    pub fn new(kind: impl Into<ExecutionErrorKind>, span: Span) -> Self {
        Self {
            kind: kind.into(),
            span,
            trace: Vec::new(),
        }
    }

    pub fn level(&self) -> Level {
        self.kind.level()
    }

    /// Records a crossed call, block or import boundary.
    pub fn with_trace(mut self, span: &Span) -> Self {
        if span.is_detached() {
            return self;
        }
        let duplicate = self.trace.last().map_or(&self.span, |last| last) == span;
        if !duplicate {
            self.trace.push(span.clone());
        }
        self
    }

    /// Whether `try` may catch this error.
    pub fn is_catchable(&self) -> bool {
        !matches!(self.level(), Level::Fatal)
    }
}

/// Attaches a locator to a bare error kind.
pub trait WithSpan<T> {
    fn at(self, span: &Span) -> Result<T, ExecutionError>;
}

impl<T, K: Into<ExecutionErrorKind>> WithSpan<T> for Result<T, K> {
    fn at(self, span: &Span) -> Result<T, ExecutionError> {
        self.map_err(|kind| ExecutionError::new(kind, span.clone()))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Tokenize(#[from] TokenizeError),
    #[error(transparent)]
    Parse(#[from] ParseErrors),
    #[error(transparent)]
    Execution(#[from] ExecutionError),
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error(transparent)]
    Prepared(#[from] PreparedError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl Error {
    pub fn level(&self) -> Level {
        match self {
            Error::Tokenize(_) => Level::Syntax,
            Error::Parse(errors) if errors.is_cancelled() => Level::Fatal,
            Error::Parse(_) => Level::Syntax,
            Error::Execution(err) => err.level(),
            Error::Io { .. } | Error::Prepared(_) | Error::Config(_) => Level::Fatal,
        }
    }

    pub fn span(&self) -> Option<&Span> {
        match self {
            Error::Tokenize(err) => Some(err.span()),
            Error::Parse(errors) => errors.first().and_then(|e| e.span()),
            Error::Execution(err) => Some(&err.span),
            _ => None,
        }
    }

    pub fn trace(&self) -> &[Span] {
        match self {
            Error::Execution(err) => &err.trace,
            _ => &[],
        }
    }

    fn message(&self) -> String {
        match self {
            Error::Parse(errors) => errors
                .0
                .iter()
                .map(|e| e.error.to_string())
                .collect::<Vec<_>>()
                .join("; "),
            other => other.to_string(),
        }
    }

    /// `Level: message at file:line:col`, a source snippet around the
    /// offending line and the trace. Reads the source from disk.
    pub fn render(&self, color: bool) -> String {
        let source = self
            .span()
            .and_then(|span| std::fs::read_to_string(&*span.file).ok());
        self.render_with_source(color, source.as_deref())
    }

    pub fn render_with_source(&self, color: bool, source: Option<&str>) -> String {
        colored::control::set_override(color);
        let mut out = String::new();

        let level = self.level().to_string();
        out.push_str(&format!("{}: {}", level.red().bold(), self.message()));
        if let Some(span) = self.span().filter(|s| !s.is_detached()) {
            out.push_str(&format!(" at {}", span.to_string().cyan()));
            if let Some(source) = source {
                out.push('\n');
                out.push_str(&snippet(source, span));
            }
        }

        let trace = self.trace();
        if !trace.is_empty() {
            out.push_str(&format!("\n{}", "trace:".dimmed()));
            for span in trace.iter().rev() {
                out.push_str(&format!("\n  at {span}"));
            }
        }

        colored::control::unset_override();
        out
    }
}

/// Up to four lines of context on each side; the failing line is marked.
fn snippet(source: &str, span: &Span) -> String {
    let lines: Vec<&str> = source.lines().collect();
    let first = span.line.saturating_sub(4).max(1);
    let last = (span.line + 4).min(lines.len());
    let width = last.to_string().len();

    let mut out = Vec::new();
    for number in first..=last {
        let Some(line) = lines.get(number - 1) else {
            break;
        };
        if number == span.line {
            let marker = format!("> {number:>width$} | {line}");
            out.push(marker.yellow().to_string());
            let underline = " ".repeat(span.column.saturating_sub(1))
                + &"^".repeat(span.column_end.saturating_sub(span.column).max(1));
            out.push(format!("  {:>width$} | {}", "", underline.red()));
        } else {
            out.push(format!("  {number:>width$} | {line}"));
        }
    }
    out.join("\n")
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn test_trace_skips_consecutive_duplicates() {
        let file: Arc<str> = Arc::from("main.nubo");
        let at = |line| Span::new(file.clone(), line, 1, 2);
        let err = ExecutionError::new(ExecutionErrorKind::DivisionByZero, at(3))
            .with_trace(&at(3))
            .with_trace(&at(7))
            .with_trace(&at(7))
            .with_trace(&Span::detached());
        assert_eq!(err.trace, vec![at(7)]);
    }

    #[test]
    fn test_render_without_color() {
        let source = "let a = 1\nlet b = a / 0\nreturn b\n";
        let err: Error = ExecutionError::new(
            ExecutionErrorKind::DivisionByZero,
            Span::new(Arc::from("main.nubo"), 2, 9, 14),
        )
        .into();
        let rendered = err.render_with_source(false, Some(source));
        assert!(rendered.starts_with("ValueError: division by zero at main.nubo:2:9"));
        assert!(rendered.contains("> 2 | let b = a / 0"));
        assert!(rendered.contains("^^^^^"));
    }

    #[test]
    fn test_cancellation_is_not_catchable() {
        let err = ExecutionError::new(ExecutionErrorKind::Cancelled, Span::detached());
        assert!(!err.is_catchable());
        assert_eq!(err.level().to_string(), "FatalError");
    }
}
