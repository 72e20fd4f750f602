pub mod html;

use std::{fmt::Display, sync::Arc};

use serde::{Deserialize, Serialize};

use crate::span::Span;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TokenType {
    // Trivia
    Whitespace,
    Newline,
    Comment,

    // Single-character tokens
    LeftParen,
    RightParen,
    LeftBrace,
    RightBrace,
    LeftBracket,
    RightBracket,
    Comma,
    Dot,
    Colon,
    Semicolon,
    Question,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Equal,
    Bang,
    Less,
    Greater,
    Ampersand,
    Pipe,

    // Two-character tokens
    EqualEqual,
    BangEqual,
    LessEqual,
    GreaterEqual,
    AndAnd,
    OrOr,
    PlusPlus,
    MinusMinus,
    StarStar,
    FatArrow,
    Arrow,
    ClosingTagStart,
    SelfClose,
    UnescapedBrace,

    // Literals
    Identifier,
    String,
    Number,
    Bool,
    HtmlBlock,
    HtmlText,

    // Keywords
    Fn,
    Struct,
    Impl,
    Event,
    Pub,
    Sub,
    Import,
    From,
    If,
    Else,
    For,
    In,
    While,
    Break,
    Continue,
    Return,
    Let,
    Const,
    Nil,
    Try,
    Defer,
    Spawn,
    Include,
    Dict,
    Private,

    Eof,
}

impl TokenType {
    pub fn is_trivia(&self) -> bool {
        matches!(
            self,
            TokenType::Whitespace | TokenType::Comment | TokenType::Newline
        )
    }

    /// Tokens after which a `<` is a comparison rather than an HTML tag.
    fn ends_value(&self) -> bool {
        matches!(
            self,
            TokenType::Identifier
                | TokenType::String
                | TokenType::Number
                | TokenType::Bool
                | TokenType::Nil
                | TokenType::RightParen
                | TokenType::RightBracket
        )
    }
}

impl Display for TokenType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            TokenType::Whitespace => "whitespace",
            TokenType::Newline => "newline",
            TokenType::Comment => "comment",
            TokenType::LeftParen => "(",
            TokenType::RightParen => ")",
            TokenType::LeftBrace => "{",
            TokenType::RightBrace => "}",
            TokenType::LeftBracket => "[",
            TokenType::RightBracket => "]",
            TokenType::Comma => ",",
            TokenType::Dot => ".",
            TokenType::Colon => ":",
            TokenType::Semicolon => ";",
            TokenType::Question => "?",
            TokenType::Plus => "+",
            TokenType::Minus => "-",
            TokenType::Star => "*",
            TokenType::Slash => "/",
            TokenType::Percent => "%",
            TokenType::Equal => "=",
            TokenType::Bang => "!",
            TokenType::Less => "<",
            TokenType::Greater => ">",
            TokenType::Ampersand => "&",
            TokenType::Pipe => "|",
            TokenType::EqualEqual => "==",
            TokenType::BangEqual => "!=",
            TokenType::LessEqual => "<=",
            TokenType::GreaterEqual => ">=",
            TokenType::AndAnd => "&&",
            TokenType::OrOr => "||",
            TokenType::PlusPlus => "++",
            TokenType::MinusMinus => "--",
            TokenType::StarStar => "**",
            TokenType::FatArrow => "=>",
            TokenType::Arrow => "->",
            TokenType::ClosingTagStart => "</",
            TokenType::SelfClose => "/>",
            TokenType::UnescapedBrace => "!{",
            TokenType::Identifier => "identifier",
            TokenType::String => "string",
            TokenType::Number => "number",
            TokenType::Bool => "bool",
            TokenType::HtmlBlock => "html block",
            TokenType::HtmlText => "html text",
            TokenType::Fn => "fn",
            TokenType::Struct => "struct",
            TokenType::Impl => "impl",
            TokenType::Event => "event",
            TokenType::Pub => "pub",
            TokenType::Sub => "sub",
            TokenType::Import => "import",
            TokenType::From => "from",
            TokenType::If => "if",
            TokenType::Else => "else",
            TokenType::For => "for",
            TokenType::In => "in",
            TokenType::While => "while",
            TokenType::Break => "break",
            TokenType::Continue => "continue",
            TokenType::Return => "return",
            TokenType::Let => "let",
            TokenType::Const => "const",
            TokenType::Nil => "nil",
            TokenType::Try => "try",
            TokenType::Defer => "defer",
            TokenType::Spawn => "spawn",
            TokenType::Include => "include",
            TokenType::Dict => "dict",
            TokenType::Private => "private",
            TokenType::Eof => "end of file",
        };
        write!(f, "{text}")
    }
}

/// Extra facts about literal tokens.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenAttrs {
    /// Opening delimiter of a string token.
    pub quote: Option<char>,
    /// Radix of a number token.
    pub base: Option<u32>,
    pub is_float: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub token_type: TokenType,
    /// Raw source text; strings keep their quotes and escapes.
    pub text: String,
    pub span: Span,
    pub attrs: TokenAttrs,
}

impl Token {
    pub fn token_type(&self) -> &TokenType {
        &self.token_type
    }

    pub fn is_template(&self) -> bool {
        self.token_type == TokenType::String && self.attrs.quote == Some('`')
    }

    /// String contents without the surrounding delimiters.
    pub fn string_body(&self) -> &str {
        let mut chars = self.text.chars();
        chars.next();
        chars.next_back();
        chars.as_str()
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TokenizeError {
    #[error("Unexpected character '{0}' at {1}")]
    UnexpectedCharacter(char, Span),
    #[error("Unterminated string at {0}")]
    UnterminatedString(Span),
    #[error("Unterminated html block at {0}")]
    UnterminatedHtmlBlock(Span),
    #[error("Unterminated multiline comment at {0}")]
    UnterminatedComment(Span),
    #[error("Two dots in a number at {0}")]
    TwoDotsInNumber(Span),
    #[error("Invalid number '{0}' at {1}")]
    InvalidNumber(String, Span),
    #[error("Unknown escape '\\{0}' at {1}")]
    UnknownEscape(char, Span),
}

impl TokenizeError {
    pub fn span(&self) -> &Span {
        match self {
            TokenizeError::UnexpectedCharacter(_, span)
            | TokenizeError::UnterminatedString(span)
            | TokenizeError::UnterminatedHtmlBlock(span)
            | TokenizeError::UnterminatedComment(span)
            | TokenizeError::TwoDotsInNumber(span)
            | TokenizeError::InvalidNumber(_, span)
            | TokenizeError::UnknownEscape(_, span) => span,
        }
    }
}

const VOID_TAGS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param", "source",
    "track", "wbr", "command", "keygen", "menuitem",
];

pub fn is_void_tag(tag: &str) -> bool {
    VOID_TAGS.contains(&tag)
}

const ESCAPES: &[char] = &['n', 't', 'r', '0', '\\', '\'', '"', '`', '$', '{', '}'];

/// Tokenizes a whole source file, ending with an `Eof` token.
pub fn tokens(source: &str, file: &str) -> Result<Vec<Token>, TokenizeError> {
    Tokenizer::new(source, file).tokens()
}

pub struct Tokenizer {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    column: usize,
    file: Arc<str>,
    last_significant: Option<TokenType>,
}

impl Tokenizer {
    pub fn new(source: &str, file: &str) -> Self {
        Self::with_position(source, Arc::from(file), 1, 1)
    }

    /// Starts at an arbitrary position; used to re-lex fragments of a
    /// larger file while keeping locators absolute.
    pub fn with_position(source: &str, file: Arc<str>, line: usize, column: usize) -> Self {
        Self {
            chars: source.chars().filter(|c| *c != '\r').collect(),
            pos: 0,
            line,
            column,
            file,
            last_significant: None,
        }
    }

    pub fn tokens(mut self) -> Result<Vec<Token>, TokenizeError> {
        let mut tokens = Vec::new();
        loop {
            let token = self.token()?;
            let done = token.token_type == TokenType::Eof;
            tokens.push(token);
            if done {
                break;
            }
        }
        Ok(tokens)
    }

    pub fn token(&mut self) -> Result<Token, TokenizeError> {
        let Some(c) = self.peek(0) else {
            return Ok(self.make(TokenType::Eof, 0, TokenAttrs::default()));
        };

        let token = match c {
            '\n' => self.make(TokenType::Newline, 1, TokenAttrs::default()),
            c if c.is_whitespace() => {
                let len = self.run_while(0, |c| c.is_whitespace() && c != '\n');
                self.make(TokenType::Whitespace, len, TokenAttrs::default())
            }
            '#' if self.pos == 0 && self.peek(1) == Some('!') => self.line_comment(),
            '/' if self.peek(1) == Some('/') => self.line_comment(),
            '/' if self.peek(1) == Some('*') => self.block_comment()?,
            c if c.is_ascii_digit() => self.number()?,
            c if is_identifier_start(c) => self.identifier(),
            '"' | '\'' | '`' => self.string(c)?,
            '<' if self.peek(1).map_or(false, |c| c.is_ascii_alphabetic())
                && !self
                    .last_significant
                    .map_or(false, |last| last.ends_value()) =>
            {
                self.html_block()?
            }
            _ => self.operator(c)?,
        };

        if !token.token_type.is_trivia() {
            self.last_significant = Some(token.token_type);
        }

        Ok(token)
    }

    fn peek(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn run_while(&self, offset: usize, f: impl Fn(char) -> bool) -> usize {
        self.chars[(self.pos + offset).min(self.chars.len())..]
            .iter()
            .take_while(|c| f(**c))
            .count()
    }

    fn span_here(&self, len: usize) -> Span {
        Span::new(self.file.clone(), self.line, self.column, self.column + len)
    }

    /// Consumes `len` chars into a token, advancing line and column.
    fn make(&mut self, token_type: TokenType, len: usize, attrs: TokenAttrs) -> Token {
        let start_line = self.line;
        let start_column = self.column;
        let text: String = self.chars[self.pos..self.pos + len].iter().collect();

        for c in text.chars() {
            if c == '\n' {
                self.line += 1;
                self.column = 1;
            } else {
                self.column += 1;
            }
        }
        self.pos += len;

        let column_end = if self.line == start_line {
            self.column
        } else {
            start_column + 1
        };

        Token {
            token_type,
            text,
            span: Span::new(self.file.clone(), start_line, start_column, column_end),
            attrs,
        }
    }

    fn line_comment(&mut self) -> Token {
        let len = self.run_while(0, |c| c != '\n');
        self.make(TokenType::Comment, len, TokenAttrs::default())
    }

    fn block_comment(&mut self) -> Result<Token, TokenizeError> {
        let mut len = 2;
        loop {
            match (self.peek(len), self.peek(len + 1)) {
                (Some('*'), Some('/')) => {
                    len += 2;
                    return Ok(self.make(TokenType::Comment, len, TokenAttrs::default()));
                }
                (Some(_), _) => len += 1,
                (None, _) => return Err(TokenizeError::UnterminatedComment(self.span_here(2))),
            }
        }
    }

    fn number(&mut self) -> Result<Token, TokenizeError> {
        let base = match (self.peek(0), self.peek(1)) {
            (Some('0'), Some('x' | 'X')) => 16,
            (Some('0'), Some('o' | 'O')) => 8,
            (Some('0'), Some('b' | 'B')) => 2,
            _ => 10,
        };

        if base != 10 {
            let digits = self.run_while(2, |c| c.is_digit(base) || c == '_');
            let len = 2 + digits;
            if digits == 0 || self.peek(len).map_or(false, |c| c.is_ascii_alphanumeric()) {
                let bad = len + self.run_while(len, |c| c.is_ascii_alphanumeric());
                let text: String = self.chars[self.pos..self.pos + bad].iter().collect();
                return Err(TokenizeError::InvalidNumber(text, self.span_here(bad)));
            }
            return Ok(self.make(
                TokenType::Number,
                len,
                TokenAttrs {
                    base: Some(base),
                    ..TokenAttrs::default()
                },
            ));
        }

        let mut len = self.run_while(0, |c| c.is_ascii_digit() || c == '_');
        let mut is_float = false;
        if self.peek(len) == Some('.') && self.peek(len + 1).map_or(false, |c| c.is_ascii_digit())
        {
            is_float = true;
            len += 1;
            len += self.run_while(len, |c| c.is_ascii_digit() || c == '_');
            if self.peek(len) == Some('.') {
                return Err(TokenizeError::TwoDotsInNumber(self.span_here(len + 1)));
            }
        }

        Ok(self.make(
            TokenType::Number,
            len,
            TokenAttrs {
                base: Some(10),
                is_float,
                ..TokenAttrs::default()
            },
        ))
    }

    fn identifier(&mut self) -> Token {
        let len = self.run_while(0, is_identifier_continue);
        let word: String = self.chars[self.pos..self.pos + len].iter().collect();
        let token_type = keyword(&word).unwrap_or(TokenType::Identifier);
        self.make(token_type, len, TokenAttrs::default())
    }

    fn string(&mut self, quote: char) -> Result<Token, TokenizeError> {
        let mut len = 1;
        // brace depth inside `${...}` of template strings
        let mut interpolation = 0usize;
        loop {
            let Some(c) = self.peek(len) else {
                return Err(TokenizeError::UnterminatedString(self.span_here(1)));
            };
            match c {
                '\\' => {
                    let escaped = self.peek(len + 1);
                    match escaped {
                        Some(e) if ESCAPES.contains(&e) => len += 2,
                        Some(e) => {
                            return Err(TokenizeError::UnknownEscape(
                                e,
                                self.span_here(len + 2),
                            ))
                        }
                        None => return Err(TokenizeError::UnterminatedString(self.span_here(1))),
                    }
                }
                '$' if quote == '`' && self.peek(len + 1) == Some('{') => {
                    interpolation += 1;
                    len += 2;
                }
                '{' if interpolation > 0 => {
                    interpolation += 1;
                    len += 1;
                }
                '}' if interpolation > 0 => {
                    interpolation -= 1;
                    len += 1;
                }
                '"' | '\'' if interpolation > 0 => {
                    len += 1;
                    while let Some(inner) = self.peek(len) {
                        len += 1;
                        if inner == '\\' {
                            len += 1;
                        } else if inner == c {
                            break;
                        }
                    }
                }
                c if c == quote => {
                    len += 1;
                    return Ok(self.make(
                        TokenType::String,
                        len,
                        TokenAttrs {
                            quote: Some(quote),
                            ..TokenAttrs::default()
                        },
                    ));
                }
                _ => len += 1,
            }
        }
    }

    fn html_block(&mut self) -> Result<Token, TokenizeError> {
        let unterminated = || TokenizeError::UnterminatedHtmlBlock(self.span_here(1));

        let (mut i, root, closing) = self.scan_tag(self.pos).ok_or_else(unterminated)?;
        if !closing && !is_void_tag(&root) {
            let mut depth = 1usize;
            while depth > 0 {
                match self.chars.get(i) {
                    None => return Err(unterminated()),
                    Some('{') => i = self.skip_braces(i).ok_or_else(unterminated)?,
                    Some('!') if self.chars.get(i + 1) == Some(&'{') => {
                        i = self.skip_braces(i + 1).ok_or_else(unterminated)?
                    }
                    Some('<') if self.chars.get(i + 1) == Some(&'/') => {
                        let name_len = self.chars[i + 2..]
                            .iter()
                            .take_while(|c| is_tag_char(**c))
                            .count();
                        let name: String = self.chars[i + 2..i + 2 + name_len].iter().collect();
                        let close = self.chars[i..]
                            .iter()
                            .position(|c| *c == '>')
                            .ok_or_else(unterminated)?;
                        if name == root {
                            depth -= 1;
                        }
                        i += close + 1;
                    }
                    Some('<')
                        if self
                            .chars
                            .get(i + 1)
                            .map_or(false, |c| c.is_ascii_alphabetic()) =>
                    {
                        let (end, name, self_closing) =
                            self.scan_tag(i).ok_or_else(unterminated)?;
                        if name == root && !self_closing && !is_void_tag(&name) {
                            depth += 1;
                        }
                        i = end;
                    }
                    Some(_) => i += 1,
                }
            }
        }

        let len = i - self.pos;
        Ok(self.make(TokenType::HtmlBlock, len, TokenAttrs::default()))
    }

    /// Scans an opening tag starting at `<`, returning the index after it,
    /// the tag name and whether it was self-closing.
    fn scan_tag(&self, start: usize) -> Option<(usize, String, bool)> {
        let mut i = start + 1;
        let name_len = self.chars[i..]
            .iter()
            .take_while(|c| is_tag_char(**c))
            .count();
        let name: String = self.chars[i..i + name_len].iter().collect();
        i += name_len;

        loop {
            match self.chars.get(i)? {
                '"' | '\'' => {
                    let quote = self.chars[i];
                    i += 1;
                    while *self.chars.get(i)? != quote {
                        if self.chars[i] == '\\' {
                            i += 1;
                        }
                        i += 1;
                    }
                    i += 1;
                }
                '{' => i = self.skip_braces(i)?,
                '/' if self.chars.get(i + 1) == Some(&'>') => return Some((i + 2, name, true)),
                '>' => return Some((i + 1, name, false)),
                _ => i += 1,
            }
        }
    }

    fn skip_braces(&self, start: usize) -> Option<usize> {
        matching_brace(&self.chars, start)
    }

    fn operator(&mut self, c: char) -> Result<Token, TokenizeError> {
        let two = match (c, self.peek(1)) {
            ('=', Some('=')) => Some(TokenType::EqualEqual),
            ('!', Some('=')) => Some(TokenType::BangEqual),
            ('<', Some('=')) => Some(TokenType::LessEqual),
            ('>', Some('=')) => Some(TokenType::GreaterEqual),
            ('&', Some('&')) => Some(TokenType::AndAnd),
            ('|', Some('|')) => Some(TokenType::OrOr),
            ('+', Some('+')) => Some(TokenType::PlusPlus),
            ('-', Some('-')) => Some(TokenType::MinusMinus),
            ('*', Some('*')) => Some(TokenType::StarStar),
            ('=', Some('>')) => Some(TokenType::FatArrow),
            ('-', Some('>')) => Some(TokenType::Arrow),
            ('<', Some('/')) => Some(TokenType::ClosingTagStart),
            ('/', Some('>')) => Some(TokenType::SelfClose),
            ('!', Some('{')) => Some(TokenType::UnescapedBrace),
            _ => None,
        };
        if let Some(token_type) = two {
            return Ok(self.make(token_type, 2, TokenAttrs::default()));
        }

        let one = match c {
            '(' => TokenType::LeftParen,
            ')' => TokenType::RightParen,
            '{' => TokenType::LeftBrace,
            '}' => TokenType::RightBrace,
            '[' => TokenType::LeftBracket,
            ']' => TokenType::RightBracket,
            ',' => TokenType::Comma,
            '.' => TokenType::Dot,
            ':' => TokenType::Colon,
            ';' => TokenType::Semicolon,
            '?' => TokenType::Question,
            '+' => TokenType::Plus,
            '-' => TokenType::Minus,
            '*' => TokenType::Star,
            '/' => TokenType::Slash,
            '%' => TokenType::Percent,
            '=' => TokenType::Equal,
            '!' => TokenType::Bang,
            '<' => TokenType::Less,
            '>' => TokenType::Greater,
            '&' => TokenType::Ampersand,
            '|' => TokenType::Pipe,
            _ => return Err(TokenizeError::UnexpectedCharacter(c, self.span_here(1))),
        };
        Ok(self.make(one, 1, TokenAttrs::default()))
    }
}

/// Returns the index after the brace that closes the one at `start`,
/// skipping quoted strings.
pub(crate) fn matching_brace(chars: &[char], start: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut i = start;
    loop {
        match chars.get(i)? {
            '{' => depth += 1,
            '}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i + 1);
                }
            }
            '"' | '\'' | '`' => {
                let quote = chars[i];
                i += 1;
                while *chars.get(i)? != quote {
                    if chars[i] == '\\' {
                        i += 1;
                    }
                    i += 1;
                }
            }
            _ => {}
        }
        i += 1;
    }
}

fn is_identifier_start(c: char) -> bool {
    c.is_alphabetic() || c == '_' || c == '$'
}

fn is_identifier_continue(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

fn is_tag_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':')
}

fn keyword(word: &str) -> Option<TokenType> {
    let token_type = match word {
        "fn" => TokenType::Fn,
        "struct" => TokenType::Struct,
        "impl" => TokenType::Impl,
        "event" => TokenType::Event,
        "pub" => TokenType::Pub,
        "sub" => TokenType::Sub,
        "import" => TokenType::Import,
        "from" => TokenType::From,
        "if" => TokenType::If,
        "else" => TokenType::Else,
        "for" => TokenType::For,
        "in" => TokenType::In,
        "while" => TokenType::While,
        "break" => TokenType::Break,
        "continue" => TokenType::Continue,
        "return" => TokenType::Return,
        "let" => TokenType::Let,
        "const" => TokenType::Const,
        "nil" => TokenType::Nil,
        "try" => TokenType::Try,
        "defer" => TokenType::Defer,
        "spawn" => TokenType::Spawn,
        "include" => TokenType::Include,
        "dict" => TokenType::Dict,
        "private" => TokenType::Private,
        "true" | "false" => TokenType::Bool,
        _ => return None,
    };
    Some(token_type)
}

/// Resolves escape sequences in the body of a string literal.
pub fn unescape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('0') => out.push('\0'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;

    fn kinds(source: &str) -> Vec<TokenType> {
        tokens(source, "test.nubo")
            .unwrap()
            .into_iter()
            .map(|t| t.token_type)
            .filter(|t| !t.is_trivia())
            .collect()
    }

    #[test]
    fn test_tokens() {
        assert_eq!(
            kinds("let x: int = 1;"),
            vec![
                TokenType::Let,
                TokenType::Identifier,
                TokenType::Colon,
                TokenType::Identifier,
                TokenType::Equal,
                TokenType::Number,
                TokenType::Semicolon,
                TokenType::Eof,
            ]
        );
    }

    #[test]
    fn test_texts_rebuild_source() {
        let source = "#!/usr/bin/env nubo\r\nfn add(a: int, b: int) -> int {\r\n  return a + b // sum\r\n}\n/* done */ let s = \"a\\\"b\"\nlet h = <div :id=\"4\">{x}</div>";
        let rebuilt: String = tokens(source, "test.nubo")
            .unwrap()
            .iter()
            .map(|t| t.text.as_str())
            .collect();
        assert_eq!(rebuilt, source.replace('\r', ""));
    }

    #[test]
    fn test_two_char_operators_take_precedence() {
        assert_eq!(
            kinds("a == b != c <= d >= e && f || g ** h -> => ++ --"),
            vec![
                TokenType::Identifier,
                TokenType::EqualEqual,
                TokenType::Identifier,
                TokenType::BangEqual,
                TokenType::Identifier,
                TokenType::LessEqual,
                TokenType::Identifier,
                TokenType::GreaterEqual,
                TokenType::Identifier,
                TokenType::AndAnd,
                TokenType::Identifier,
                TokenType::OrOr,
                TokenType::Identifier,
                TokenType::StarStar,
                TokenType::Identifier,
                TokenType::Arrow,
                TokenType::FatArrow,
                TokenType::PlusPlus,
                TokenType::MinusMinus,
                TokenType::Eof,
            ]
        );
    }

    #[test]
    fn test_number_attrs() {
        let toks = tokens("0x1F 0b101 0o17 42 3.14", "test.nubo").unwrap();
        let numbers: Vec<_> = toks
            .iter()
            .filter(|t| t.token_type == TokenType::Number)
            .map(|t| (t.text.as_str(), t.attrs.base, t.attrs.is_float))
            .collect();
        assert_eq!(
            numbers,
            vec![
                ("0x1F", Some(16), false),
                ("0b101", Some(2), false),
                ("0o17", Some(8), false),
                ("42", Some(10), false),
                ("3.14", Some(10), true),
            ]
        );
    }

    #[test]
    fn test_number_errors() {
        assert!(matches!(
            tokens("1.2.3", "test.nubo"),
            Err(TokenizeError::TwoDotsInNumber(_))
        ));
        assert!(matches!(
            tokens("0x", "test.nubo"),
            Err(TokenizeError::InvalidNumber(..))
        ));
    }

    #[test]
    fn test_member_access_on_number_is_not_a_float() {
        assert_eq!(
            kinds("5.increment()"),
            vec![
                TokenType::Number,
                TokenType::Dot,
                TokenType::Identifier,
                TokenType::LeftParen,
                TokenType::RightParen,
                TokenType::Eof,
            ]
        );
    }

    #[test]
    fn test_strings_keep_quote_and_raw_escapes() {
        let toks = tokens(r#"'a\n' "b" `c ${d}`"#, "test.nubo").unwrap();
        let strings: Vec<_> = toks
            .iter()
            .filter(|t| t.token_type == TokenType::String)
            .map(|t| (t.text.as_str(), t.attrs.quote))
            .collect();
        assert_eq!(
            strings,
            vec![
                (r"'a\n'", Some('\'')),
                ("\"b\"", Some('"')),
                ("`c ${d}`", Some('`')),
            ]
        );
        assert_eq!(unescape(toks[0].string_body()), "a\n");
    }

    #[test]
    fn test_string_errors() {
        assert!(matches!(
            tokens("\"abc", "test.nubo"),
            Err(TokenizeError::UnterminatedString(_))
        ));
        assert!(matches!(
            tokens(r#""\q""#, "test.nubo"),
            Err(TokenizeError::UnknownEscape('q', _))
        ));
        assert!(matches!(
            tokens("/* open", "test.nubo"),
            Err(TokenizeError::UnterminatedComment(_))
        ));
    }

    #[test]
    fn test_html_block_is_one_token() {
        let toks = tokens(
            "return <div class=\"a\"><div>{x > 1}</div><br></div>",
            "test.nubo",
        )
        .unwrap();
        let html: Vec<_> = toks
            .iter()
            .filter(|t| t.token_type == TokenType::HtmlBlock)
            .collect();
        assert_eq!(html.len(), 1);
        assert_eq!(
            html[0].text,
            "<div class=\"a\"><div>{x > 1}</div><br></div>"
        );
    }

    #[test]
    fn test_less_after_value_is_comparison() {
        assert_eq!(
            kinds("a<b"),
            vec![
                TokenType::Identifier,
                TokenType::Less,
                TokenType::Identifier,
                TokenType::Eof
            ]
        );
    }

    #[test]
    fn test_unterminated_html_block() {
        assert!(matches!(
            tokens("let x = <div><span></span>", "test.nubo"),
            Err(TokenizeError::UnterminatedHtmlBlock(_))
        ));
    }

    #[test]
    fn test_line_and_column_tracking() {
        let toks = tokens("let a\n  b", "test.nubo").unwrap();
        let b = toks
            .iter()
            .find(|t| t.text == "b")
            .expect("b should be tokenized");
        assert_eq!((b.span.line, b.span.column, b.span.column_end), (2, 3, 4));
    }
}
