use crate::{
    ast::TypeNode,
    tokenizer::{Token, TokenType},
};

use super::{
    consume, match_identifier, peek_type, ParseContext, ParseError, ParseErrorWithContext,
};

/// `A | B | …`
pub(crate) fn type_node<'a>(
    context: &ParseContext,
    tokens: &'a [Token],
) -> Result<(TypeNode, &'a [Token]), ParseErrorWithContext> {
    let _guard = context.push("type");
    let (first, mut tokens) = single_type(context, tokens)?;
    let mut types = vec![first];
    while peek_type(tokens) == Some(&TokenType::Pipe) {
        let (next, rest) = single_type(context, &tokens[1..])?;
        types.push(next);
        tokens = rest;
    }

    if types.len() == 1 {
        if let Some(ty) = types.pop() {
            return Ok((ty, tokens));
        }
    }
    Ok((TypeNode::Union(types), tokens))
}

fn single_type<'a>(
    context: &ParseContext,
    tokens: &'a [Token],
) -> Result<(TypeNode, &'a [Token]), ParseErrorWithContext> {
    let Some(token) = tokens.first() else {
        return Err(context.error(ParseError::ExpectedType, tokens));
    };

    match token.token_type {
        TokenType::LeftBracket => {
            let rest = consume(context, &tokens[1..], TokenType::RightBracket)?;
            let (item, rest) = single_type(context, rest)?;
            Ok((TypeNode::List(Box::new(item)), rest))
        }
        TokenType::Dict if peek_type(&tokens[1..]) == Some(&TokenType::LeftBracket) => {
            let (key, rest) = type_node(context, &tokens[2..])?;
            let rest = consume(context, rest, TokenType::Comma)?;
            let (value, rest) = type_node(context, rest)?;
            let rest = consume(context, rest, TokenType::RightBracket)?;
            Ok((TypeNode::Dict(Box::new(key), Box::new(value)), rest))
        }
        TokenType::Dict => Ok(named("dict", &tokens[1..])),
        TokenType::Nil => Ok(named("nil", &tokens[1..])),
        TokenType::Fn => {
            let mut rest = consume(context, &tokens[1..], TokenType::LeftParen)?;
            let mut args = Vec::new();
            while peek_type(rest) != Some(&TokenType::RightParen) {
                let (arg, after) = type_node(context, rest)?;
                args.push(arg);
                rest = match peek_type(after) {
                    Some(TokenType::Comma) => &after[1..],
                    _ => after,
                };
                if rest.is_empty() || peek_type(rest) == Some(&TokenType::Eof) {
                    return Err(context.error(ParseError::Expected(TokenType::RightParen), rest));
                }
            }
            rest = &rest[1..];
            let (returns, rest) = match peek_type(rest) {
                Some(TokenType::Arrow) => {
                    let (returns, rest) = single_type(context, &rest[1..])?;
                    (Some(Box::new(returns)), rest)
                }
                _ => (None, rest),
            };
            Ok((TypeNode::Function { args, returns }, rest))
        }
        TokenType::Identifier if token.text == "ref" => {
            let (inner, rest) = single_type(context, &tokens[1..])?;
            Ok((TypeNode::Ref(Box::new(inner)), rest))
        }
        TokenType::Identifier => {
            let (mut name, mut rest) = match_identifier(context, tokens)?;
            while peek_type(rest) == Some(&TokenType::Dot) {
                let (part, after) = match_identifier(context, &rest[1..])?;
                name.push('.');
                name.push_str(&part);
                rest = after;
            }
            Ok(named(&name, rest))
        }
        _ => Err(context.error(ParseError::ExpectedType, tokens)),
    }
}

fn named<'a>(name: &str, tokens: &'a [Token]) -> (TypeNode, &'a [Token]) {
    let (nullable, tokens) = match peek_type(tokens) {
        Some(TokenType::Question) => (true, &tokens[1..]),
        _ => (false, tokens),
    };
    (
        TypeNode::Named {
            name: name.to_string(),
            nullable,
        },
        tokens,
    )
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{cancel::CancellationToken, tokenizer::tokens};

    fn parse_type(source: &str) -> TypeNode {
        let toks: Vec<Token> = tokens(source, "test.nubo")
            .unwrap()
            .into_iter()
            .filter(|t| !t.token_type.is_trivia())
            .collect();
        let context = ParseContext::new(CancellationToken::new());
        type_node(&context, &toks).unwrap().0
    }

    #[test]
    fn test_type_forms_render_back() {
        for source in [
            "int",
            "string?",
            "[]int",
            "dict[string, []float]",
            "fn(int, string) -> bool",
            "ref int",
            "int | string | nil",
            "models.User",
        ] {
            assert_eq!(parse_type(source).to_string(), source);
        }
    }
}
