use crate::{
    ast::{Element, ElementAttr, ElementChild, Expression},
    tokenizer::{html::html_tokens, is_void_tag, unescape, Token, TokenType, Tokenizer},
};

use super::{
    consume, consumed_span, expression, peek_type, ParseContext, ParseError,
    ParseErrorWithContext,
};

/// Parses an `HtmlBlock` token into an element tree.
pub(crate) fn element_block(
    context: &ParseContext,
    block: &Token,
) -> Result<Element, ParseErrorWithContext> {
    let _guard = context.push("html");
    let tokens: Vec<Token> = html_tokens(block)
        .map_err(|err| context.error(err.into(), std::slice::from_ref(block)))?
        .into_iter()
        .filter(|t| !t.token_type.is_trivia())
        .collect();

    let (element, rest) = element(context, &tokens)?;
    if !rest.is_empty() {
        return Err(context.error(ParseError::Unexpected(rest[0].token_type), rest));
    }
    Ok(element)
}

fn element<'a>(
    context: &ParseContext,
    tokens: &'a [Token],
) -> Result<(Element, &'a [Token]), ParseErrorWithContext> {
    let _guard = context.push("element");
    let start = tokens;
    let tokens = consume(context, tokens, TokenType::Less)?;
    let (tag, mut tokens) = joined_name(context, tokens)?;
    let mut attrs = Vec::new();

    loop {
        match peek_type(tokens) {
            Some(TokenType::SelfClose) => {
                let rest = &tokens[1..];
                return Ok((
                    Element {
                        tag,
                        attrs,
                        children: vec![],
                        self_closing: true,
                        span: consumed_span(start, rest),
                    },
                    rest,
                ));
            }
            Some(TokenType::Greater) => {
                tokens = &tokens[1..];
                break;
            }
            _ => {
                let (attr, rest) = attribute(context, tokens)?;
                attrs.push(attr);
                tokens = rest;
            }
        }
    }

    if is_void_tag(&tag) {
        return Ok((
            Element {
                tag,
                attrs,
                children: vec![],
                self_closing: false,
                span: consumed_span(start, tokens),
            },
            tokens,
        ));
    }

    let mut children = Vec::new();
    loop {
        let Some(token) = tokens.first() else {
            return Err(context.error(ParseError::Expected(TokenType::ClosingTagStart), tokens));
        };
        match token.token_type {
            TokenType::ClosingTagStart => {
                let (found, rest) = joined_name(context, &tokens[1..])?;
                if found != tag {
                    return Err(context.error(
                        ParseError::InvalidClosingTag {
                            expected: tag,
                            found,
                        },
                        tokens,
                    ));
                }
                let rest = consume(context, rest, TokenType::Greater)?;
                return Ok((
                    Element {
                        tag,
                        attrs,
                        children,
                        self_closing: false,
                        span: consumed_span(start, rest),
                    },
                    rest,
                ));
            }
            TokenType::Less => {
                let (child, rest) = element(context, tokens)?;
                children.push(ElementChild::Element(child));
                tokens = rest;
            }
            TokenType::HtmlText => {
                if !(token.text.trim().is_empty() && token.text.contains('\n')) {
                    children.push(ElementChild::RawText(token.text.clone()));
                }
                tokens = &tokens[1..];
            }
            TokenType::LeftBrace | TokenType::UnescapedBrace => {
                let unescaped = token.token_type == TokenType::UnescapedBrace;
                let (expr, rest) = expression(context, &tokens[1..])?;
                let rest = consume(context, rest, TokenType::RightBrace)?;
                children.push(ElementChild::DynamicText { expr, unescaped });
                tokens = rest;
            }
            other => return Err(context.error(ParseError::Unexpected(other), tokens)),
        }
    }
}

fn attribute<'a>(
    context: &ParseContext,
    tokens: &'a [Token],
) -> Result<(ElementAttr, &'a [Token]), ParseErrorWithContext> {
    let _guard = context.push("attribute");
    let (dynamic, tokens) = match peek_type(tokens) {
        Some(TokenType::Colon) => (true, &tokens[1..]),
        _ => (false, tokens),
    };
    let name_start = tokens;
    let (name, tokens) = joined_name(context, tokens)?;

    if peek_type(tokens) != Some(&TokenType::Equal) {
        if dynamic {
            let reference = reference_expression(context, &name, name_start)?;
            return Ok((ElementAttr::Dynamic(name, reference), tokens));
        }
        return Ok((ElementAttr::Bare(name), tokens));
    }

    let tokens = &tokens[1..];
    let Some(value) = tokens.first() else {
        return Err(context.error(ParseError::ExpectedValue, tokens));
    };
    match value.token_type {
        TokenType::String if dynamic => {
            let expr = string_expression(context, value)?;
            Ok((ElementAttr::Dynamic(name, expr), &tokens[1..]))
        }
        TokenType::String => Ok((
            ElementAttr::Text(name, unescape(value.string_body())),
            &tokens[1..],
        )),
        TokenType::LeftBrace => {
            let (expr, rest) = expression(context, &tokens[1..])?;
            let rest = consume(context, rest, TokenType::RightBrace)?;
            Ok((ElementAttr::Dynamic(name, expr), rest))
        }
        _ => Err(context.error(
            ParseError::ExpectedOneOf(vec![TokenType::String, TokenType::LeftBrace]),
            tokens,
        )),
    }
}

/// Re-lexes the body of a `:attr="…"` string as an expression.
fn string_expression(
    context: &ParseContext,
    value: &Token,
) -> Result<Expression, ParseErrorWithContext> {
    let body = value.string_body();
    let tokens: Vec<Token> = Tokenizer::with_position(
        body,
        value.span.file.clone(),
        value.span.line,
        value.span.column + 1,
    )
    .tokens()
    .map_err(|err| context.error(err.into(), std::slice::from_ref(value)))?
    .into_iter()
    .filter(|t| !t.token_type.is_trivia())
    .collect();

    let (expr, rest) = expression(context, &tokens)?;
    match peek_type(rest) {
        Some(TokenType::Eof) | None => Ok(expr),
        Some(other) => Err(context.error(ParseError::Unexpected(*other), rest)),
    }
}

fn reference_expression(
    context: &ParseContext,
    name: &str,
    tokens: &[Token],
) -> Result<Expression, ParseErrorWithContext> {
    let Some(first) = tokens.first() else {
        return Err(context.error(ParseError::ExpectedIdentifier, tokens));
    };
    let reference = Token {
        token_type: TokenType::Identifier,
        text: name.to_string(),
        span: first.span.clone(),
        attrs: Default::default(),
    };
    let (expr, _) = expression(context, std::slice::from_ref(&reference))?;
    Ok(expr)
}

/// Joins adjacent name parts such as `n-to`, `data.x` or `hx:get`.
fn joined_name<'a>(
    context: &ParseContext,
    tokens: &'a [Token],
) -> Result<(String, &'a [Token]), ParseErrorWithContext> {
    let Some(first) = tokens.first() else {
        return Err(context.error(ParseError::ExpectedIdentifier, tokens));
    };
    if first.token_type != TokenType::Identifier {
        return Err(context.error(ParseError::ExpectedIdentifier, tokens));
    }

    let mut name = first.text.clone();
    let mut last = first;
    let mut rest = &tokens[1..];
    while let [separator, part, after @ ..] = rest {
        let adjacent = |a: &Token, b: &Token| {
            a.span.line == b.span.line && a.span.column_end == b.span.column
        };
        let joins = matches!(
            separator.token_type,
            TokenType::Minus | TokenType::Dot | TokenType::Colon
        ) && part.token_type == TokenType::Identifier
            && adjacent(last, separator)
            && adjacent(separator, part);
        if !joins {
            break;
        }
        name.push_str(&separator.text);
        name.push_str(&part.text);
        last = part;
        rest = after;
    }
    Ok((name, rest))
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{cancel::CancellationToken, tokenizer::tokens};

    fn parse_element(source: &str) -> Result<Element, ParseErrorWithContext> {
        let block = tokens(&format!("return {source}"), "test.nubo")
            .unwrap()
            .into_iter()
            .find(|t| t.token_type == TokenType::HtmlBlock)
            .expect("html block");
        let context = ParseContext::new(CancellationToken::new());
        element_block(&context, &block)
    }

    #[test]
    fn test_attributes() {
        let element =
            parse_element("<a n-to=\"/x\" :id=\"4\" :title disabled class={cls}>go</a>").unwrap();
        assert_eq!(element.tag, "a");
        let names: Vec<_> = element
            .attrs
            .iter()
            .map(|attr| match attr {
                ElementAttr::Text(name, _) => format!("text:{name}"),
                ElementAttr::Dynamic(name, _) => format!("dynamic:{name}"),
                ElementAttr::Bare(name) => format!("bare:{name}"),
            })
            .collect();
        assert_eq!(
            names,
            vec![
                "text:n-to",
                "dynamic:id",
                "dynamic:title",
                "bare:disabled",
                "dynamic:class"
            ]
        );
        assert_eq!(element.children, vec![ElementChild::RawText("go".into())]);
    }

    #[test]
    fn test_children() {
        let element =
            parse_element("<ul>\n  <li>{name}</li>\n  <li>!{raw}</li>\n  <br>\n</ul>").unwrap();
        assert_eq!(element.children.len(), 3);
        let ElementChild::Element(second) = &element.children[1] else {
            panic!("expected element");
        };
        assert!(matches!(
            second.children[0],
            ElementChild::DynamicText {
                unescaped: true,
                ..
            }
        ));
    }

    #[test]
    fn test_self_closing() {
        let element = parse_element("<Card title=\"x\" />").unwrap();
        assert!(element.self_closing);
        assert_eq!(element.tag, "Card");
    }

    #[test]
    fn test_invalid_closing_tag() {
        let err = parse_element("<div><span></div></span>").unwrap_err();
        assert!(matches!(err.error, ParseError::InvalidClosingTag { .. }));
    }
}
