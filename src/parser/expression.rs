use crate::{
    ast::{Accessor, Atom, AtomKind, ExprItem, Expression, Literal, Operator},
    tokenizer::{unescape, Token, TokenType},
};

use super::{
    consume, consumed_span, function, html, match_identifier, peek_type, skip_newlines,
    template, ParseContext, ParseError, ParseErrorWithContext,
};

fn binary_operator(token_type: &TokenType) -> Option<Operator> {
    let op = match token_type {
        TokenType::Plus => Operator::Plus,
        TokenType::Minus => Operator::Minus,
        TokenType::Star => Operator::Multiply,
        TokenType::Slash => Operator::Divide,
        TokenType::Percent => Operator::Modulo,
        TokenType::StarStar => Operator::Power,
        TokenType::EqualEqual => Operator::Equal,
        TokenType::BangEqual => Operator::NotEqual,
        TokenType::Less => Operator::Less,
        TokenType::LessEqual => Operator::LessEqual,
        TokenType::Greater => Operator::Greater,
        TokenType::GreaterEqual => Operator::GreaterEqual,
        TokenType::AndAnd => Operator::And,
        TokenType::OrOr => Operator::Or,
        TokenType::In => Operator::In,
        _ => return None,
    };
    Some(op)
}

/// Flattens an infix expression into operators and atoms. Precedence is
/// left to the evaluator.
pub(crate) fn expression<'a>(
    context: &ParseContext,
    tokens: &'a [Token],
) -> Result<(Expression, &'a [Token]), ParseErrorWithContext> {
    let _guard = context.push("expression");
    let start = tokens;
    let mut tokens = tokens;
    let mut body = Vec::new();
    let mut open_parens: Vec<&Token> = Vec::new();
    let mut pending_ternaries = 0usize;
    let mut expect_value = true;

    while let Some(token) = tokens.first() {
        let span = token.span.clone();
        match token.token_type {
            TokenType::Newline if !open_parens.is_empty() => tokens = &tokens[1..],
            TokenType::LeftParen if expect_value => {
                if let Some(group) = group_with_accessors(context, tokens)? {
                    let (atom, rest) = group;
                    body.push(ExprItem::Atom(atom));
                    tokens = rest;
                    expect_value = false;
                } else {
                    open_parens.push(token);
                    body.push(ExprItem::Operator(Operator::LeftParen, span));
                    tokens = &tokens[1..];
                }
            }
            TokenType::RightParen if !open_parens.is_empty() && !expect_value => {
                open_parens.pop();
                body.push(ExprItem::Operator(Operator::RightParen, span));
                tokens = &tokens[1..];
            }
            TokenType::Minus | TokenType::Bang if expect_value => {
                let op = if token.token_type == TokenType::Minus {
                    Operator::Minus
                } else {
                    Operator::Not
                };
                body.push(ExprItem::Operator(op, span));
                tokens = &tokens[1..];
            }
            TokenType::Question if !expect_value => {
                pending_ternaries += 1;
                body.push(ExprItem::Operator(Operator::Question, span));
                tokens = &tokens[1..];
                expect_value = true;
            }
            TokenType::Colon if !expect_value && pending_ternaries > 0 => {
                pending_ternaries -= 1;
                body.push(ExprItem::Operator(Operator::Colon, span));
                tokens = &tokens[1..];
                expect_value = true;
            }
            ref token_type if !expect_value => match binary_operator(token_type) {
                Some(op) => {
                    body.push(ExprItem::Operator(op, span));
                    tokens = skip_newlines(&tokens[1..]);
                    expect_value = true;
                }
                None => break,
            },
            _ if expect_value => {
                let (atom, rest) = atom(context, tokens)?;
                body.push(ExprItem::Atom(atom));
                tokens = rest;
                expect_value = false;
            }
            _ => break,
        }
    }

    if let Some(open) = open_parens.first() {
        return Err(context.error(
            ParseError::UnbalancedParentheses(open.span.clone()),
            tokens,
        ));
    }
    if expect_value {
        return Err(context.error(ParseError::ExpectedValue, tokens));
    }

    Ok((
        Expression {
            body,
            span: consumed_span(start, tokens),
        },
        tokens,
    ))
}

/// A parenthesized expression directly followed by `.`, `[` or `(` is
/// kept as one atom so the accessors apply to the whole group.
fn group_with_accessors<'a>(
    context: &ParseContext,
    tokens: &'a [Token],
) -> Result<Option<(Atom, &'a [Token])>, ParseErrorWithContext> {
    let mut depth = 0usize;
    let mut close = None;
    for (i, token) in tokens.iter().enumerate() {
        match token.token_type {
            TokenType::LeftParen => depth += 1,
            TokenType::RightParen => {
                depth -= 1;
                if depth == 0 {
                    close = Some(i);
                    break;
                }
            }
            TokenType::Eof => break,
            _ => {}
        }
    }
    let Some(close) = close else {
        return Ok(None);
    };
    if !matches!(
        peek_type(&tokens[close + 1..]),
        Some(TokenType::Dot | TokenType::LeftBracket | TokenType::LeftParen)
    ) {
        return Ok(None);
    }

    let (inner, rest) = expression(context, skip_newlines(&tokens[1..]))?;
    let rest = consume(context, skip_newlines(rest), TokenType::RightParen)?;
    let (accessors, rest) = accessors(context, rest)?;
    Ok(Some((
        Atom {
            kind: AtomKind::Group(Box::new(inner)),
            accessors,
            span: consumed_span(tokens, rest),
        },
        rest,
    )))
}

fn atom<'a>(
    context: &ParseContext,
    tokens: &'a [Token],
) -> Result<(Atom, &'a [Token]), ParseErrorWithContext> {
    let _guard = context.push("value");
    let Some(token) = tokens.first() else {
        return Err(context.error(ParseError::ExpectedValue, tokens));
    };

    let (kind, rest) = match token.token_type {
        TokenType::Number => (AtomKind::Literal(number(context, tokens)?), &tokens[1..]),
        TokenType::String if token.is_template() => (
            AtomKind::Template(template::template(context, token)?),
            &tokens[1..],
        ),
        TokenType::String => (
            AtomKind::Literal(Literal::String(unescape(token.string_body()))),
            &tokens[1..],
        ),
        TokenType::Bool => (
            AtomKind::Literal(Literal::Bool(token.text == "true")),
            &tokens[1..],
        ),
        TokenType::Nil => (AtomKind::Literal(Literal::Nil), &tokens[1..]),
        TokenType::Identifier => match peek_type(&tokens[1..]) {
            Some(TokenType::LeftParen) => {
                let (args, rest) = call_arguments(context, &tokens[1..])?;
                (
                    AtomKind::Call {
                        name: token.text.clone(),
                        args,
                    },
                    rest,
                )
            }
            _ => (AtomKind::Reference(token.text.clone()), &tokens[1..]),
        },
        TokenType::LeftBracket => list(context, &tokens[1..])?,
        TokenType::LeftBrace => dict(context, tokens)?,
        TokenType::Dict => dict(context, &tokens[1..])?,
        TokenType::HtmlBlock => (
            AtomKind::Element(html::element_block(context, token)?),
            &tokens[1..],
        ),
        TokenType::Fn => {
            let (decl, rest) = match function(context, tokens, false) {
                Ok(parsed) => parsed,
                Err(errors) => {
                    return Err(errors
                        .0
                        .into_iter()
                        .next()
                        .unwrap_or_else(|| context.error(ParseError::ExpectedValue, tokens)))
                }
            };
            (AtomKind::Function(Box::new(decl)), rest)
        }
        _ => return Err(context.error(ParseError::ExpectedValue, tokens)),
    };

    let (accessors, rest) = accessors(context, rest)?;
    Ok((
        Atom {
            kind,
            accessors,
            span: consumed_span(tokens, rest),
        },
        rest,
    ))
}

fn number(context: &ParseContext, tokens: &[Token]) -> Result<Literal, ParseErrorWithContext> {
    let Some(token) = tokens.first() else {
        return Err(context.error(ParseError::ExpectedValue, tokens));
    };
    let digits: String = token.text.chars().filter(|c| *c != '_').collect();
    let invalid = || context.error(ParseError::InvalidNumber(token.text.clone()), tokens);

    if token.attrs.is_float {
        return digits
            .parse::<f64>()
            .map(Literal::Float)
            .map_err(|_| invalid());
    }

    let base = token.attrs.base.unwrap_or(10);
    let digits = if base == 10 { &digits[..] } else { &digits[2..] };
    i64::from_str_radix(digits, base)
        .map(Literal::Int)
        .map_err(|_| invalid())
}

/// Parses the `.field`, `(args)` and `[index]` chain after a value.
pub(crate) fn accessors<'a>(
    context: &ParseContext,
    tokens: &'a [Token],
) -> Result<(Vec<Accessor>, &'a [Token]), ParseErrorWithContext> {
    let mut accessors = Vec::new();
    let mut tokens = tokens;
    loop {
        match peek_type(tokens) {
            Some(TokenType::Dot) => {
                let (name, rest) = match_identifier(context, &tokens[1..])?;
                accessors.push(Accessor::Field(name, consumed_span(tokens, rest)));
                tokens = rest;
            }
            Some(TokenType::LeftParen) => {
                let (args, rest) = call_arguments(context, tokens)?;
                accessors.push(Accessor::Call(args, consumed_span(tokens, rest)));
                tokens = rest;
            }
            Some(TokenType::LeftBracket) => {
                let (index, rest) = expression(context, skip_newlines(&tokens[1..]))?;
                let rest = consume(context, skip_newlines(rest), TokenType::RightBracket)?;
                accessors.push(Accessor::Index(index, consumed_span(tokens, rest)));
                tokens = rest;
            }
            _ => return Ok((accessors, tokens)),
        }
    }
}

/// Parses `(a, b, …)`; `tokens` starts at the opening paren.
pub(crate) fn call_arguments<'a>(
    context: &ParseContext,
    tokens: &'a [Token],
) -> Result<(Vec<Expression>, &'a [Token]), ParseErrorWithContext> {
    let _guard = context.push("call");
    let mut tokens = skip_newlines(consume(context, tokens, TokenType::LeftParen)?);
    let mut args = Vec::new();

    loop {
        if peek_type(tokens) == Some(&TokenType::RightParen) {
            return Ok((args, &tokens[1..]));
        }
        let (arg, rest) = expression(context, tokens)?;
        args.push(arg);
        tokens = skip_newlines(rest);
        match peek_type(tokens) {
            Some(TokenType::Comma) => tokens = skip_newlines(&tokens[1..]),
            Some(TokenType::RightParen) => {}
            _ => {
                return Err(context.error(
                    ParseError::ExpectedOneOf(vec![TokenType::Comma, TokenType::RightParen]),
                    tokens,
                ))
            }
        }
    }
}

fn list<'a>(
    context: &ParseContext,
    tokens: &'a [Token],
) -> Result<(AtomKind, &'a [Token]), ParseErrorWithContext> {
    let _guard = context.push("list");
    let mut tokens = skip_newlines(tokens);
    let mut items = Vec::new();

    loop {
        if peek_type(tokens) == Some(&TokenType::RightBracket) {
            return Ok((AtomKind::List(items), &tokens[1..]));
        }
        let (item, rest) = expression(context, tokens)?;
        items.push(item);
        tokens = skip_newlines(rest);
        match peek_type(tokens) {
            Some(TokenType::Comma) => tokens = skip_newlines(&tokens[1..]),
            Some(TokenType::RightBracket) => {}
            _ => {
                return Err(context.error(
                    ParseError::ExpectedOneOf(vec![TokenType::Comma, TokenType::RightBracket]),
                    tokens,
                ))
            }
        }
    }
}

/// Parses `{ key: value, … }`; bare identifier keys are string keys.
fn dict<'a>(
    context: &ParseContext,
    tokens: &'a [Token],
) -> Result<(AtomKind, &'a [Token]), ParseErrorWithContext> {
    let _guard = context.push("dict");
    let mut tokens = skip_newlines(consume(context, tokens, TokenType::LeftBrace)?);
    let mut entries = Vec::new();

    loop {
        if peek_type(tokens) == Some(&TokenType::RightBrace) {
            return Ok((AtomKind::Dict(entries), &tokens[1..]));
        }

        let key = match tokens.first() {
            Some(token) if token.token_type == TokenType::Identifier => Atom {
                kind: AtomKind::Literal(Literal::String(token.text.clone())),
                accessors: vec![],
                span: token.span.clone(),
            },
            Some(token)
                if matches!(token.token_type, TokenType::String | TokenType::Number) =>
            {
                let (atom, _) = atom(context, &tokens[..1])?;
                atom
            }
            _ => {
                return Err(context.error(
                    ParseError::ExpectedOneOf(vec![
                        TokenType::String,
                        TokenType::Identifier,
                        TokenType::Number,
                    ]),
                    tokens,
                ))
            }
        };
        let rest = consume(context, &tokens[1..], TokenType::Colon)?;
        let (value, rest) = expression(context, skip_newlines(rest))?;
        entries.push((Expression::single(key), value));

        tokens = skip_newlines(rest);
        match peek_type(tokens) {
            Some(TokenType::Comma) => tokens = skip_newlines(&tokens[1..]),
            Some(TokenType::RightBrace) => {}
            _ => {
                return Err(context.error(
                    ParseError::ExpectedOneOf(vec![TokenType::Comma, TokenType::RightBrace]),
                    tokens,
                ))
            }
        }
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{cancel::CancellationToken, tokenizer::tokens};

    fn parse_expression(source: &str) -> Result<Expression, ParseErrorWithContext> {
        let toks: Vec<Token> = tokens(source, "test.nubo")
            .unwrap()
            .into_iter()
            .filter(|t| !matches!(t.token_type, TokenType::Whitespace | TokenType::Comment))
            .collect();
        let context = ParseContext::new(CancellationToken::new());
        expression(&context, &toks).map(|(expr, _)| expr)
    }

    #[test]
    fn test_unary_and_parens() {
        let expr = parse_expression("-(1 + 2) * !x").unwrap();
        assert_eq!(expr.to_string(), "- (1 + 2) * !x");
    }

    #[test]
    fn test_accessor_chain() {
        let expr = parse_expression("user.names[0].length()").unwrap();
        let ExprItem::Atom(atom) = &expr.body[0] else {
            panic!("expected atom");
        };
        assert_eq!(atom.kind, AtomKind::Reference("user".to_string()));
        assert_eq!(atom.accessors.len(), 4);
        assert!(matches!(atom.accessors[1], Accessor::Index(..)));
        assert!(matches!(atom.accessors[3], Accessor::Call(..)));
    }

    #[test]
    fn test_dict_keys_and_trailing_newlines() {
        let expr = parse_expression("dict {\n  \"a\": 1,\n  b: 2,\n}").unwrap();
        let ExprItem::Atom(Atom {
            kind: AtomKind::Dict(entries),
            ..
        }) = &expr.body[0]
        else {
            panic!("expected dict");
        };
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].0.to_string(), "\"b\"");
    }

    #[test]
    fn test_ternary_colon_is_an_operator() {
        let expr = parse_expression("a ? 1 : 2").unwrap();
        assert_eq!(expr.body.len(), 5);
    }

    #[test]
    fn test_unbalanced_parens_report_opening() {
        let err = parse_expression("(1 + (2)").unwrap_err();
        let ParseError::UnbalancedParentheses(span) = err.error else {
            panic!("expected unbalanced parentheses, got {:?}", err.error);
        };
        assert_eq!(span.column, 1);
    }

    #[test]
    fn test_group_with_accessor() {
        let expr = parse_expression("(\"a\" + \"b\").length()").unwrap();
        assert!(matches!(
            &expr.body[0],
            ExprItem::Atom(Atom { kind: AtomKind::Group(_), accessors, .. }) if accessors.len() == 2
        ));
    }

    #[test]
    fn test_number_bases() {
        let expr = parse_expression("0xff + 0b11 + 1_000").unwrap();
        let ints: Vec<_> = expr
            .body
            .iter()
            .filter_map(|item| match item {
                ExprItem::Atom(Atom {
                    kind: AtomKind::Literal(Literal::Int(n)),
                    ..
                }) => Some(*n),
                _ => None,
            })
            .collect();
        assert_eq!(ints, vec![255, 3, 1000]);
    }
}
