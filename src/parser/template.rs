use crate::{
    ast::TemplatePart,
    tokenizer::{unescape, Token, TokenType, Tokenizer},
};

use super::{expression, peek_type, ParseContext, ParseError, ParseErrorWithContext};

/// Splits a backtick string into raw text and `${…}` expressions.
pub(crate) fn template(
    context: &ParseContext,
    token: &Token,
) -> Result<Vec<TemplatePart>, ParseErrorWithContext> {
    let _guard = context.push("template");
    let here = std::slice::from_ref(token);
    let chars: Vec<char> = token.string_body().chars().collect();

    let mut parts = Vec::new();
    let mut raw = String::new();
    let mut line = token.span.line;
    let mut column = token.span.column + 1;
    let mut i = 0;

    let advance = |c: char, line: &mut usize, column: &mut usize| {
        if c == '\n' {
            *line += 1;
            *column = 1;
        } else {
            *column += 1;
        }
    };

    while i < chars.len() {
        let c = chars[i];
        if c == '\\' {
            raw.push(c);
            advance(c, &mut line, &mut column);
            if let Some(next) = chars.get(i + 1) {
                raw.push(*next);
                advance(*next, &mut line, &mut column);
            }
            i += 2;
            continue;
        }

        if c != '$' || chars.get(i + 1) != Some(&'{') {
            raw.push(c);
            advance(c, &mut line, &mut column);
            i += 1;
            continue;
        }

        if !raw.is_empty() {
            parts.push(TemplatePart::Raw(unescape(&raw)));
            raw.clear();
        }

        // skip `${`
        for _ in 0..2 {
            advance(chars[i], &mut line, &mut column);
            i += 1;
        }
        let (start_line, start_column) = (line, column);

        let mut depth = 1usize;
        let mut quote: Option<char> = None;
        let mut inner = String::new();
        loop {
            let Some(&c) = chars.get(i) else {
                return Err(context.error(ParseError::InvalidTemplate("unclosed ${"), here));
            };
            i += 1;
            advance(c, &mut line, &mut column);

            match (quote, c) {
                (Some(_), '\\') => {
                    inner.push(c);
                    if let Some(&next) = chars.get(i) {
                        inner.push(next);
                        advance(next, &mut line, &mut column);
                        i += 1;
                    }
                    continue;
                }
                (Some(q), c) if c == q => quote = None,
                (Some(_), _) => {}
                (None, '"' | '\'') => quote = Some(c),
                (None, '{') => depth += 1,
                (None, '}') => {
                    depth -= 1;
                    if depth == 0 {
                        break;
                    }
                }
                _ => {}
            }
            inner.push(c);
        }

        if inner.trim().is_empty() {
            return Err(context.error(ParseError::InvalidTemplate("empty ${}"), here));
        }

        let tokens: Vec<Token> =
            Tokenizer::with_position(&inner, token.span.file.clone(), start_line, start_column)
                .tokens()
                .map_err(|err| context.error(err.into(), here))?
                .into_iter()
                .filter(|t| !t.token_type.is_trivia())
                .collect();
        let (expr, rest) = expression(context, &tokens)?;
        if let Some(other) = peek_type(rest).filter(|t| **t != TokenType::Eof) {
            return Err(context.error(ParseError::Unexpected(*other), rest));
        }
        parts.push(TemplatePart::Expr(expr));
    }

    if !raw.is_empty() {
        parts.push(TemplatePart::Raw(unescape(&raw)));
    }
    Ok(parts)
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{cancel::CancellationToken, tokenizer::tokens};

    fn parts(source: &str) -> Result<Vec<TemplatePart>, ParseErrorWithContext> {
        let token = tokens(source, "test.nubo")
            .unwrap()
            .into_iter()
            .find(|t| t.is_template())
            .expect("template token");
        let context = ParseContext::new(CancellationToken::new());
        template(&context, &token)
    }

    #[test]
    fn test_template_parts() {
        let parts = parts("`Hello ${name}, you have ${count + 1} \\`new\\``").unwrap();
        let rendered: Vec<String> = parts
            .iter()
            .map(|part| match part {
                TemplatePart::Raw(text) => format!("raw:{text}"),
                TemplatePart::Expr(expr) => format!("expr:{expr}"),
            })
            .collect();
        assert_eq!(
            rendered,
            vec![
                "raw:Hello ",
                "expr:name",
                "raw:, you have ",
                "expr:count + 1",
                "raw: `new`",
            ]
        );
    }

    #[test]
    fn test_nested_braces_and_quotes() {
        let parts = parts("`${ {\"a}\": 1}.get(\"a}\") }`").unwrap();
        assert_eq!(parts.len(), 1);
        assert!(matches!(parts[0], TemplatePart::Expr(_)));
    }
}
