//! Sub-lexer for the inside of an `HtmlBlock` token.

use std::sync::Arc;

use super::{matching_brace, Token, TokenAttrs, TokenType, TokenizeError, Tokenizer};
use crate::span::Span;

struct HtmlLexer {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    column: usize,
    file: Arc<str>,
    in_tag: bool,
    tokens: Vec<Token>,
}

/// Splits an html block into tag, attribute and text tokens. Brace
/// interpolations are re-lexed with the main tokenizer.
pub fn html_tokens(block: &Token) -> Result<Vec<Token>, TokenizeError> {
    let mut lexer = HtmlLexer {
        chars: block.text.chars().collect(),
        pos: 0,
        line: block.span.line,
        column: block.span.column,
        file: block.span.file.clone(),
        in_tag: false,
        tokens: Vec::new(),
    };
    lexer.run()?;
    Ok(lexer.tokens)
}

impl HtmlLexer {
    fn peek(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn span_here(&self, len: usize) -> Span {
        Span::new(self.file.clone(), self.line, self.column, self.column + len)
    }

    fn advance(&mut self, len: usize) -> String {
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
        text
    }

    fn emit(&mut self, token_type: TokenType, len: usize, attrs: TokenAttrs) {
        let (line, column) = (self.line, self.column);
        let text = self.advance(len);
        let column_end = if line == self.line {
            self.column
        } else {
            column + 1
        };
        self.tokens.push(Token {
            token_type,
            text,
            span: Span::new(self.file.clone(), line, column, column_end),
            attrs,
        });
    }

    fn run(&mut self) -> Result<(), TokenizeError> {
        while let Some(c) = self.peek(0) {
            if self.in_tag {
                self.tag_token(c)?;
            } else {
                self.content_token(c)?;
            }
        }
        Ok(())
    }

    fn content_token(&mut self, c: char) -> Result<(), TokenizeError> {
        match (c, self.peek(1)) {
            ('<', Some('/')) => {
                self.emit(TokenType::ClosingTagStart, 2, TokenAttrs::default());
                self.in_tag = true;
            }
            ('<', Some(next)) if next.is_ascii_alphabetic() => {
                self.emit(TokenType::Less, 1, TokenAttrs::default());
                self.in_tag = true;
            }
            ('{', _) => self.interpolation(TokenType::LeftBrace, 1)?,
            ('!', Some('{')) => self.interpolation(TokenType::UnescapedBrace, 2)?,
            _ => {
                let mut len = 1;
                while let Some(next) = self.peek(len) {
                    let stop = match next {
                        '<' => self
                            .peek(len + 1)
                            .map_or(false, |c| c == '/' || c.is_ascii_alphabetic()),
                        '{' => true,
                        '!' => self.peek(len + 1) == Some('{'),
                        _ => false,
                    };
                    if stop {
                        break;
                    }
                    len += 1;
                }
                self.emit(TokenType::HtmlText, len, TokenAttrs::default());
            }
        }
        Ok(())
    }

    fn tag_token(&mut self, c: char) -> Result<(), TokenizeError> {
        match c {
            c if c.is_whitespace() => {
                let len = self.chars[self.pos..]
                    .iter()
                    .take_while(|c| c.is_whitespace())
                    .count();
                self.emit(TokenType::Whitespace, len, TokenAttrs::default());
            }
            c if c.is_alphanumeric() || c == '_' || c == '$' => {
                let len = self.chars[self.pos..]
                    .iter()
                    .take_while(|c| c.is_alphanumeric() || **c == '_' || **c == '$')
                    .count();
                self.emit(TokenType::Identifier, len, TokenAttrs::default());
            }
            '"' | '\'' => {
                let mut len = 1;
                loop {
                    match self.peek(len) {
                        None => {
                            return Err(TokenizeError::UnterminatedString(self.span_here(1)))
                        }
                        Some('\\') => len += 2,
                        Some(q) if q == c => break,
                        Some(_) => len += 1,
                    }
                }
                self.emit(
                    TokenType::String,
                    len + 1,
                    TokenAttrs {
                        quote: Some(c),
                        ..TokenAttrs::default()
                    },
                );
            }
            '/' if self.peek(1) == Some('>') => {
                self.emit(TokenType::SelfClose, 2, TokenAttrs::default());
                self.in_tag = false;
            }
            '>' => {
                self.emit(TokenType::Greater, 1, TokenAttrs::default());
                self.in_tag = false;
            }
            '{' => self.interpolation(TokenType::LeftBrace, 1)?,
            '=' => self.emit(TokenType::Equal, 1, TokenAttrs::default()),
            ':' => self.emit(TokenType::Colon, 1, TokenAttrs::default()),
            '-' => self.emit(TokenType::Minus, 1, TokenAttrs::default()),
            '.' => self.emit(TokenType::Dot, 1, TokenAttrs::default()),
            c => return Err(TokenizeError::UnexpectedCharacter(c, self.span_here(1))),
        }
        Ok(())
    }

    /// Emits the opening brace, the re-lexed body and the closing brace.
    fn interpolation(&mut self, open: TokenType, open_len: usize) -> Result<(), TokenizeError> {
        let brace = self.pos + open_len - 1;
        let end = matching_brace(&self.chars, brace)
            .ok_or_else(|| TokenizeError::UnterminatedHtmlBlock(self.span_here(open_len)))?;

        self.emit(open, open_len, TokenAttrs::default());

        let body_len = end - 1 - self.pos;
        let body: String = self.chars[self.pos..self.pos + body_len].iter().collect();
        let inner = Tokenizer::with_position(&body, self.file.clone(), self.line, self.column)
            .tokens()?;
        self.tokens.extend(
            inner
                .into_iter()
                .filter(|t| t.token_type != TokenType::Eof),
        );
        self.advance(body_len);

        self.emit(TokenType::RightBrace, 1, TokenAttrs::default());
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::tokenizer::tokens;

    fn block(source: &str) -> Token {
        tokens(&format!("return {source}"), "test.nubo")
            .unwrap()
            .into_iter()
            .find(|t| t.token_type == TokenType::HtmlBlock)
            .expect("html block")
    }

    #[test]
    fn test_html_tokens() {
        let toks = html_tokens(&block("<div :id=\"4\">Hi {name}</div>")).unwrap();
        let kinds: Vec<_> = toks
            .iter()
            .filter(|t| !t.token_type.is_trivia())
            .map(|t| (t.token_type, t.text.as_str()))
            .collect();
        assert_eq!(
            kinds,
            vec![
                (TokenType::Less, "<"),
                (TokenType::Identifier, "div"),
                (TokenType::Colon, ":"),
                (TokenType::Identifier, "id"),
                (TokenType::Equal, "="),
                (TokenType::String, "\"4\""),
                (TokenType::Greater, ">"),
                (TokenType::HtmlText, "Hi "),
                (TokenType::LeftBrace, "{"),
                (TokenType::Identifier, "name"),
                (TokenType::RightBrace, "}"),
                (TokenType::ClosingTagStart, "</"),
                (TokenType::Identifier, "div"),
                (TokenType::Greater, ">"),
            ]
        );
    }

    #[test]
    fn test_interpolation_keeps_absolute_locators() {
        let toks = html_tokens(&block("<p>{x}</p>")).unwrap();
        let x = toks.iter().find(|t| t.text == "x").expect("x");
        assert_eq!((x.span.line, x.span.column), (1, 12));
    }

    #[test]
    fn test_unescaped_brace() {
        let toks = html_tokens(&block("<p>!{raw}</p>")).unwrap();
        assert!(toks
            .iter()
            .any(|t| t.token_type == TokenType::UnescapedBrace));
    }
}
