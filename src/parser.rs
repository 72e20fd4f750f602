mod expression;
mod html;
mod template;
mod types;

use std::cell::RefCell;

use crate::{
    ast::{
        Argument, ElseBranch, EventArg, EventDecl, ForStatement, ForValue, FunctionDecl,
        IfStatement, ImplDecl, Import, ImportKind, Path, Program, Publish, Signal, Statement,
        StatementKind, StructDecl, StructField, Subscribe, VariableDecl,
    },
    cancel::CancellationToken,
    span::Span,
    tokenizer::{unescape, Token, TokenType, TokenizeError},
};

pub(crate) use expression::expression;

#[derive(Debug)]
pub struct ParseErrors(pub Vec<ParseErrorWithContext>);

impl std::error::Error for ParseErrors {}

impl std::fmt::Display for ParseErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Found {} errors during parsing", self.0.len())?;
        for error in &self.0 {
            writeln!(f, "{}", error)?;
        }
        Ok(())
    }
}

impl From<ParseErrorWithContext> for ParseErrors {
    fn from(error: ParseErrorWithContext) -> Self {
        ParseErrors(vec![error])
    }
}

impl ParseErrors {
    pub fn first(&self) -> Option<&ParseErrorWithContext> {
        self.0.first()
    }

    pub fn is_cancelled(&self) -> bool {
        self.0
            .iter()
            .any(|e| matches!(e.error, ParseError::Cancelled))
    }
}

#[derive(Debug)]
pub struct ParseErrorWithContext {
    pub error: ParseError,
    context: Vec<&'static str>,
    pub token: Option<Token>,
}

impl ParseErrorWithContext {
    pub fn span(&self) -> Option<&Span> {
        match &self.error {
            ParseError::Tokenize(err) => Some(err.span()),
            ParseError::UnbalancedParentheses(span) => Some(span),
            _ => self.token.as_ref().map(|t| &t.span),
        }
    }
}

impl std::fmt::Display for ParseErrorWithContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "While parsing {}", self.context.join(" > "))?;
        write!(f, "{}", self.error)?;
        if let Some(token) = &self.token {
            let found = match token.token_type {
                TokenType::Eof | TokenType::Newline => token.token_type.to_string(),
                _ => token.text.clone(),
            };
            write!(f, " at {} but found \"{}\"", token.span, found)?;
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("Expected \"{0}\"")]
    Expected(TokenType),
    #[error("Expected one of {0:?}")]
    ExpectedOneOf(Vec<TokenType>),
    #[error("Unexpected \"{0}\"")]
    Unexpected(TokenType),
    #[error("Expected identifier")]
    ExpectedIdentifier,
    #[error("Expected value")]
    ExpectedValue,
    #[error("Expected type")]
    ExpectedType,
    #[error("Unbalanced parentheses opened at {0}")]
    UnbalancedParentheses(Span),
    #[error("Trailing comma is not allowed here")]
    TrailingComma,
    #[error("Invalid number \"{0}\"")]
    InvalidNumber(String),
    #[error("Invalid closing tag, expected </{expected}> found </{found}>")]
    InvalidClosingTag { expected: String, found: String },
    #[error("init method cannot be private")]
    PrivateInit,
    #[error("Invalid assignment target")]
    InvalidAssignTarget,
    #[error("Invalid template literal: {0}")]
    InvalidTemplate(&'static str),
    #[error(transparent)]
    Tokenize(#[from] TokenizeError),
    #[error("Parsing cancelled")]
    Cancelled,
}

#[derive(Debug, Clone)]
pub(crate) struct ParseContext {
    stack: RefCell<Vec<&'static str>>,
    cancel: CancellationToken,
}

impl ParseContext {
    fn new(cancel: CancellationToken) -> Self {
        Self {
            stack: RefCell::new(vec![]),
            cancel,
        }
    }

    fn push(&self, name: &'static str) -> ParseContextGuard {
        self.stack.borrow_mut().push(name);
        ParseContextGuard::new(self)
    }

    fn pop(&self) {
        self.stack.borrow_mut().pop();
    }

    fn error(&self, error: ParseError, tokens: &[Token]) -> ParseErrorWithContext {
        ParseErrorWithContext {
            error,
            context: self.stack.borrow().clone(),
            token: tokens.first().cloned(),
        }
    }
}

struct ParseContextGuard<'a> {
    context: &'a ParseContext,
}

impl<'a> ParseContextGuard<'a> {
    fn new(context: &'a ParseContext) -> Self {
        Self { context }
    }
}

impl<'a> Drop for ParseContextGuard<'a> {
    fn drop(&mut self) {
        self.context.pop();
    }
}

/// Builds a program from a token stream. Whitespace and comments are
/// skipped; newlines are kept as statement terminators.
pub fn program(tokens: &[Token], cancel: &CancellationToken) -> Result<Program, ParseErrors> {
    let tokens: Vec<Token> = tokens
        .iter()
        .filter(|t| !matches!(t.token_type, TokenType::Whitespace | TokenType::Comment))
        .cloned()
        .collect();
    let context = ParseContext::new(cancel.clone());
    let _guard = context.push("program");

    let mut statements = Vec::new();
    let mut errors = Vec::new();
    let mut tokens = skip_terminators(&tokens);

    while let Some(token) = tokens.first() {
        if token.token_type == TokenType::Eof {
            break;
        }
        if context.cancel.is_cancelled() {
            return Err(context.error(ParseError::Cancelled, tokens).into());
        }

        match statement(&context, tokens) {
            Ok((stmt, rest)) => {
                statements.push(stmt);
                tokens = skip_terminators(rest);
            }
            Err(err) if err.is_cancelled() => return Err(err),
            Err(mut err) => {
                errors.append(&mut err.0);
                tokens = skip_terminators(consume_until_after(
                    tokens,
                    &[TokenType::Newline, TokenType::Semicolon],
                ));
            }
        }
    }

    if tokens.first().map(Token::token_type) != Some(&TokenType::Eof) {
        errors.push(context.error(ParseError::Expected(TokenType::Eof), tokens));
    }

    if !errors.is_empty() {
        return Err(ParseErrors(errors));
    }

    Ok(Program(statements))
}

fn consume_until_after<'a>(tokens: &'a [Token], token_types: &[TokenType]) -> &'a [Token] {
    let mut tokens = tokens;
    while let Some(token) = tokens.first() {
        if token.token_type == TokenType::Eof {
            return tokens;
        }
        if token_types.iter().any(|t| t == token.token_type()) {
            return &tokens[1..];
        }
        tokens = &tokens[1..];
    }
    tokens
}

fn skip_terminators(tokens: &[Token]) -> &[Token] {
    let skip = tokens
        .iter()
        .take_while(|t| matches!(t.token_type, TokenType::Newline | TokenType::Semicolon))
        .count();
    &tokens[skip..]
}

fn skip_newlines(tokens: &[Token]) -> &[Token] {
    let skip = tokens
        .iter()
        .take_while(|t| t.token_type == TokenType::Newline)
        .count();
    &tokens[skip..]
}

/// Span from the first token of `start` to the last token consumed before `rest`.
fn consumed_span(start: &[Token], rest: &[Token]) -> Span {
    let consumed = start.len() - rest.len();
    match (start.first(), consumed.checked_sub(1).and_then(|i| start.get(i))) {
        (Some(first), Some(last)) => first.span.clone() + last.span.clone(),
        (Some(first), None) => first.span.clone(),
        _ => Span::detached(),
    }
}

fn peek_type(tokens: &[Token]) -> Option<&TokenType> {
    tokens.first().map(Token::token_type)
}

fn statement<'a>(
    context: &ParseContext,
    tokens: &'a [Token],
) -> Result<(Statement, &'a [Token]), ParseErrors> {
    let _guard = context.push("statement");
    let start = tokens;

    let (kind, rest) = match peek_type(tokens) {
        Some(TokenType::Import) => import(context, &tokens[1..])?,
        Some(TokenType::Include) => {
            let (expr, rest) = expression(context, &tokens[1..])?;
            (StatementKind::Include(expr), rest)
        }
        Some(TokenType::Fn) => {
            let (function, rest) = function(context, tokens, true)?;
            (StatementKind::Function(function), rest)
        }
        Some(TokenType::Struct) => struct_declaration(context, &tokens[1..])?,
        Some(TokenType::Impl) => impl_declaration(context, &tokens[1..])?,
        Some(TokenType::Event) => event_declaration(context, &tokens[1..])?,
        Some(TokenType::Sub) => subscribe(context, &tokens[1..])?,
        Some(TokenType::Pub) => publish(context, &tokens[1..])?,
        Some(TokenType::Let) => variable_declaration(context, &tokens[1..], false)?,
        Some(TokenType::Const) => variable_declaration(context, &tokens[1..], true)?,
        Some(TokenType::Return) => match peek_type(&tokens[1..]) {
            Some(
                TokenType::Newline | TokenType::Semicolon | TokenType::RightBrace | TokenType::Eof,
            ) => (StatementKind::Return(None), &tokens[1..]),
            _ => {
                let (expr, rest) = expression(context, &tokens[1..])?;
                (StatementKind::Return(Some(expr)), rest)
            }
        },
        Some(TokenType::If) => {
            let (statement, rest) = if_statement(context, &tokens[1..])?;
            (StatementKind::If(statement), rest)
        }
        Some(TokenType::While) => while_statement(context, &tokens[1..])?,
        Some(TokenType::For) => for_statement(context, &tokens[1..])?,
        Some(TokenType::Break) => (StatementKind::Signal(Signal::Break), &tokens[1..]),
        Some(TokenType::Continue) => (StatementKind::Signal(Signal::Continue), &tokens[1..]),
        Some(TokenType::Try) => try_statement(context, &tokens[1..])?,
        Some(TokenType::Defer) => {
            let (expr, rest) = expression(context, &tokens[1..])?;
            (StatementKind::Defer(expr), rest)
        }
        Some(TokenType::Spawn) => {
            let (expr, rest) = expression(context, &tokens[1..])?;
            (StatementKind::Spawn(expr), rest)
        }
        Some(TokenType::Identifier) => identifier_statement(context, tokens)?,
        _ => {
            let (expr, rest) = expression(context, tokens)?;
            (StatementKind::Expression(expr), rest)
        }
    };

    let rest = end_of_statement(context, rest)?;
    Ok((Statement::new(kind, consumed_span(start, rest)), rest))
}

fn end_of_statement<'a>(
    context: &ParseContext,
    tokens: &'a [Token],
) -> Result<&'a [Token], ParseErrorWithContext> {
    match peek_type(tokens) {
        Some(TokenType::Newline | TokenType::Semicolon) => Ok(&tokens[1..]),
        Some(TokenType::RightBrace | TokenType::Eof) | None => Ok(tokens),
        Some(_) => Err(context.error(
            ParseError::ExpectedOneOf(vec![TokenType::Newline, TokenType::Semicolon]),
            tokens,
        )),
    }
}

fn block<'a>(
    context: &ParseContext,
    tokens: &'a [Token],
) -> Result<(Vec<Statement>, &'a [Token]), ParseErrors> {
    let _guard = context.push("block");
    let mut tokens = consume(context, tokens, TokenType::LeftBrace)?;
    let mut statements = Vec::new();
    let mut errors = Vec::new();

    loop {
        tokens = skip_terminators(tokens);
        match peek_type(tokens) {
            Some(TokenType::RightBrace) => {
                if !errors.is_empty() {
                    return Err(ParseErrors(errors));
                }
                return Ok((statements, &tokens[1..]));
            }
            Some(TokenType::Eof) | None => break,
            Some(_) => {}
        }

        if context.cancel.is_cancelled() {
            return Err(context.error(ParseError::Cancelled, tokens).into());
        }

        match statement(context, tokens) {
            Ok((stmt, rest)) => {
                statements.push(stmt);
                tokens = rest;
            }
            Err(err) if err.is_cancelled() => return Err(err),
            Err(mut err) => {
                errors.append(&mut err.0);
                tokens = consume_until_after(tokens, &[TokenType::Newline, TokenType::Semicolon]);
            }
        }
    }

    errors.push(context.error(ParseError::Expected(TokenType::RightBrace), tokens));
    Err(ParseErrors(errors))
}

fn import<'a>(
    context: &ParseContext,
    tokens: &'a [Token],
) -> Result<(StatementKind, &'a [Token]), ParseErrorWithContext> {
    let _guard = context.push("import");
    let (kind, tokens) = match peek_type(tokens) {
        Some(TokenType::From) => (ImportKind::Run, tokens),
        Some(TokenType::LeftBrace) => {
            let mut tokens = skip_newlines(&tokens[1..]);
            let mut names = Vec::new();
            loop {
                if peek_type(tokens) == Some(&TokenType::RightBrace) {
                    tokens = &tokens[1..];
                    break;
                }
                let (name, rest) = match_identifier(context, tokens)?;
                let (alias, rest) = match peek_type(rest) {
                    Some(TokenType::Colon) => {
                        let (alias, rest) = match_identifier(context, &rest[1..])?;
                        (Some(alias), rest)
                    }
                    _ => (None, rest),
                };
                names.push((name, alias));
                tokens = skip_newlines(rest);
                match peek_type(tokens) {
                    Some(TokenType::Comma) => tokens = skip_newlines(&tokens[1..]),
                    Some(TokenType::RightBrace) => {}
                    _ => {
                        return Err(context.error(
                            ParseError::ExpectedOneOf(vec![
                                TokenType::Comma,
                                TokenType::RightBrace,
                            ]),
                            tokens,
                        ))
                    }
                }
            }
            (ImportKind::Selected(names), tokens)
        }
        _ => {
            let (name, rest) = match_identifier(context, tokens)?;
            (ImportKind::Module(name), rest)
        }
    };

    let tokens = consume(context, tokens, TokenType::From)?;
    let (path, tokens) = match_string(context, tokens)?;
    Ok((StatementKind::Import(Import { kind, path }), tokens))
}

/// Parses `fn name(args) -> T { … }` or the inline `=> expr` form.
/// `tokens` starts at the `fn` keyword.
pub(crate) fn function<'a>(
    context: &ParseContext,
    tokens: &'a [Token],
    named: bool,
) -> Result<(FunctionDecl, &'a [Token]), ParseErrors> {
    let _guard = context.push("function");
    let start = tokens;
    let tokens = consume(context, tokens, TokenType::Fn)?;

    let (name, tokens) = if named {
        let (name, rest) = match_identifier(context, tokens)?;
        (Some(name), rest)
    } else {
        (None, tokens)
    };

    let (args, tokens) = arguments(context, tokens)?;

    let (returns, tokens) = match peek_type(tokens) {
        Some(TokenType::Arrow) => {
            let (ty, rest) = types::type_node(context, &tokens[1..])?;
            (Some(ty), rest)
        }
        _ => (None, tokens),
    };

    let (body, tokens) = match peek_type(tokens) {
        Some(TokenType::FatArrow) => {
            let (expr, rest) = expression(context, &tokens[1..])?;
            let span = expr.span.clone();
            (
                vec![Statement::new(StatementKind::Return(Some(expr)), span)],
                rest,
            )
        }
        _ => block(context, tokens)?,
    };

    Ok((
        FunctionDecl {
            name,
            args,
            returns,
            body,
            private: false,
            span: consumed_span(start, tokens),
        },
        tokens,
    ))
}

fn arguments<'a>(
    context: &ParseContext,
    tokens: &'a [Token],
) -> Result<(Vec<Argument>, &'a [Token]), ParseErrorWithContext> {
    let _guard = context.push("arguments");
    let mut tokens = skip_newlines(consume(context, tokens, TokenType::LeftParen)?);
    let mut args = vec![];

    if peek_type(tokens) == Some(&TokenType::RightParen) {
        return Ok((args, &tokens[1..]));
    }

    loop {
        let start = tokens;
        let (name, rest) = match_identifier(context, tokens)?;
        let (ty, rest) = match peek_type(rest) {
            Some(TokenType::Colon) => {
                let (ty, rest) = types::type_node(context, &rest[1..])?;
                (Some(ty), rest)
            }
            _ => (None, rest),
        };
        let (default, rest) = match peek_type(rest) {
            Some(TokenType::Equal) => {
                let (expr, rest) = expression(context, &rest[1..])?;
                (Some(expr), rest)
            }
            _ => (None, rest),
        };
        args.push(Argument {
            name,
            ty,
            default,
            span: consumed_span(start, rest),
        });
        tokens = skip_newlines(rest);

        match peek_type(tokens) {
            Some(TokenType::Comma) => {
                tokens = skip_newlines(&tokens[1..]);
                if peek_type(tokens) == Some(&TokenType::RightParen) {
                    return Err(context.error(ParseError::TrailingComma, tokens));
                }
            }
            Some(TokenType::RightParen) => return Ok((args, &tokens[1..])),
            _ => {
                return Err(context.error(
                    ParseError::ExpectedOneOf(vec![TokenType::Comma, TokenType::RightParen]),
                    tokens,
                ))
            }
        }
    }
}

fn struct_declaration<'a>(
    context: &ParseContext,
    tokens: &'a [Token],
) -> Result<(StatementKind, &'a [Token]), ParseErrorWithContext> {
    let _guard = context.push("struct");
    let (name, tokens) = match_identifier(context, tokens)?;
    let mut tokens = consume(context, tokens, TokenType::LeftBrace)?;
    let mut fields = Vec::new();

    loop {
        tokens = skip_field_separators(tokens);
        if peek_type(tokens) == Some(&TokenType::RightBrace) {
            tokens = &tokens[1..];
            break;
        }

        let start = tokens;
        let (private, rest) = match peek_type(tokens) {
            Some(TokenType::Private) => (true, &tokens[1..]),
            _ => (false, tokens),
        };
        let (field, rest) = match_identifier(context, rest)?;
        let rest = consume(context, rest, TokenType::Colon)?;
        let (ty, rest) = types::type_node(context, rest)?;
        fields.push(StructField {
            name: field,
            ty,
            private,
            span: consumed_span(start, rest),
        });

        match peek_type(rest) {
            Some(
                TokenType::Newline
                | TokenType::Semicolon
                | TokenType::Comma
                | TokenType::RightBrace,
            ) => tokens = rest,
            _ => {
                return Err(context.error(
                    ParseError::ExpectedOneOf(vec![
                        TokenType::Newline,
                        TokenType::Semicolon,
                        TokenType::RightBrace,
                    ]),
                    rest,
                ))
            }
        }
    }

    Ok((StatementKind::Struct(StructDecl { name, fields }), tokens))
}

fn skip_field_separators(tokens: &[Token]) -> &[Token] {
    let skip = tokens
        .iter()
        .take_while(|t| {
            matches!(
                t.token_type,
                TokenType::Newline | TokenType::Semicolon | TokenType::Comma
            )
        })
        .count();
    &tokens[skip..]
}

fn impl_declaration<'a>(
    context: &ParseContext,
    tokens: &'a [Token],
) -> Result<(StatementKind, &'a [Token]), ParseErrors> {
    let _guard = context.push("impl");
    let (target, tokens) = match_identifier(context, tokens)?;
    let mut tokens = consume(context, tokens, TokenType::LeftBrace)?;
    let mut methods = Vec::new();

    loop {
        tokens = skip_terminators(tokens);
        let (private, rest) = match peek_type(tokens) {
            Some(TokenType::RightBrace) => {
                tokens = &tokens[1..];
                break;
            }
            Some(TokenType::Private) => (true, &tokens[1..]),
            Some(TokenType::Fn) => (false, tokens),
            _ => {
                return Err(context
                    .error(
                        ParseError::ExpectedOneOf(vec![TokenType::Fn, TokenType::RightBrace]),
                        tokens,
                    )
                    .into())
            }
        };

        let (mut method, rest) = function(context, rest, true)?;
        if private && method.name.as_deref() == Some("init") {
            return Err(context.error(ParseError::PrivateInit, tokens).into());
        }
        method.private = private;
        methods.push(method);
        tokens = rest;
    }

    Ok((StatementKind::Impl(ImplDecl { target, methods }), tokens))
}

fn event_declaration<'a>(
    context: &ParseContext,
    tokens: &'a [Token],
) -> Result<(StatementKind, &'a [Token]), ParseErrorWithContext> {
    let _guard = context.push("event");
    let (name, tokens) = dotted_name(context, tokens)?;
    let mut tokens = skip_newlines(consume(context, tokens, TokenType::LeftParen)?);
    let mut args = Vec::new();

    loop {
        if peek_type(tokens) == Some(&TokenType::RightParen) {
            tokens = &tokens[1..];
            break;
        }
        let (arg, rest) = match_identifier(context, tokens)?;
        let rest = consume(context, rest, TokenType::Colon)?;
        let (ty, rest) = types::type_node(context, rest)?;
        args.push(EventArg { name: arg, ty });
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

    Ok((StatementKind::Event(EventDecl { name, args }), tokens))
}

fn subscribe<'a>(
    context: &ParseContext,
    tokens: &'a [Token],
) -> Result<(StatementKind, &'a [Token]), ParseErrors> {
    let _guard = context.push("sub");
    let (event, tokens) = dotted_name(context, tokens)?;
    let (args, tokens) = arguments(context, tokens)?;
    let (body, tokens) = block(context, tokens)?;
    Ok((
        StatementKind::Subscribe(Subscribe { event, args, body }),
        tokens,
    ))
}

fn publish<'a>(
    context: &ParseContext,
    tokens: &'a [Token],
) -> Result<(StatementKind, &'a [Token]), ParseErrorWithContext> {
    let _guard = context.push("pub");
    let (event, tokens) = dotted_name(context, tokens)?;
    let (args, tokens) = expression::call_arguments(context, tokens)?;
    Ok((StatementKind::Publish(Publish { event, args }), tokens))
}

fn variable_declaration<'a>(
    context: &ParseContext,
    tokens: &'a [Token],
    constant: bool,
) -> Result<(StatementKind, &'a [Token]), ParseErrorWithContext> {
    let _guard = context.push("variable_declaration");
    let (name, tokens) = match_identifier(context, tokens)?;
    let (ty, tokens) = match peek_type(tokens) {
        Some(TokenType::Colon) => {
            let (ty, rest) = types::type_node(context, &tokens[1..])?;
            (Some(ty), rest)
        }
        _ => (None, tokens),
    };
    let (value, tokens) = match peek_type(tokens) {
        Some(TokenType::Equal) => {
            let (expr, rest) = expression(context, &tokens[1..])?;
            (Some(expr), rest)
        }
        _ => (None, tokens),
    };
    Ok((
        StatementKind::VariableDecl(VariableDecl {
            constant,
            name,
            ty,
            value,
        }),
        tokens,
    ))
}

fn if_statement<'a>(
    context: &ParseContext,
    tokens: &'a [Token],
) -> Result<(IfStatement, &'a [Token]), ParseErrors> {
    let _guard = context.push("if");
    let (condition, tokens) = expression(context, tokens)?;
    let (body, tokens) = block(context, tokens)?;

    let after_newlines = skip_newlines(tokens);
    let (else_branch, tokens) = match peek_type(after_newlines) {
        Some(TokenType::Else) => {
            let rest = &after_newlines[1..];
            match peek_type(rest) {
                Some(TokenType::If) => {
                    let (next, rest) = if_statement(context, &rest[1..])?;
                    (Some(ElseBranch::If(Box::new(next))), rest)
                }
                _ => {
                    let (body, rest) = block(context, rest)?;
                    (Some(ElseBranch::Block(body)), rest)
                }
            }
        }
        _ => (None, tokens),
    };

    Ok((
        IfStatement {
            condition,
            body,
            else_branch,
        },
        tokens,
    ))
}

fn while_statement<'a>(
    context: &ParseContext,
    tokens: &'a [Token],
) -> Result<(StatementKind, &'a [Token]), ParseErrors> {
    let _guard = context.push("while");
    let (condition, tokens) = expression(context, tokens)?;
    let (body, tokens) = block(context, tokens)?;
    Ok((StatementKind::While { condition, body }, tokens))
}

fn for_statement<'a>(
    context: &ParseContext,
    tokens: &'a [Token],
) -> Result<(StatementKind, &'a [Token]), ParseErrors> {
    let _guard = context.push("for");
    let (first, tokens) = match_identifier(context, tokens)?;
    let (value, tokens) = match peek_type(tokens) {
        Some(TokenType::Comma) => {
            let (second, rest) = match_identifier(context, &tokens[1..])?;
            (
                ForValue {
                    iterator: Some(first),
                    value: second,
                },
                rest,
            )
        }
        _ => (
            ForValue {
                iterator: None,
                value: first,
            },
            tokens,
        ),
    };
    let tokens = consume(context, tokens, TokenType::In)?;
    let (iterable, tokens) = expression(context, tokens)?;
    let (body, tokens) = block(context, tokens)?;
    Ok((
        StatementKind::For(ForStatement {
            value,
            iterable,
            body,
        }),
        tokens,
    ))
}

fn try_statement<'a>(
    context: &ParseContext,
    tokens: &'a [Token],
) -> Result<(StatementKind, &'a [Token]), ParseErrors> {
    let _guard = context.push("try");
    let (body, tokens) = block(context, tokens)?;
    let (name, tokens) = match_identifier(context, tokens)?;
    Ok((StatementKind::Try { body, name }, tokens))
}

/// `x++`, `x--`, `a.b[c] = v`, or a plain expression such as `f(x)`.
fn identifier_statement<'a>(
    context: &ParseContext,
    tokens: &'a [Token],
) -> Result<(StatementKind, &'a [Token]), ParseErrorWithContext> {
    let _guard = context.push("identifier_statement");
    let (root, rest) = match_identifier(context, tokens)?;
    let (accessors, rest) = expression::accessors(context, rest)?;

    let assignable = !matches!(accessors.last(), Some(crate::ast::Accessor::Call(..)));
    let target = || Path {
        root: root.clone(),
        accessors: accessors.clone(),
    };

    match peek_type(rest) {
        Some(TokenType::PlusPlus | TokenType::MinusMinus | TokenType::Equal) if !assignable => {
            Err(context.error(ParseError::InvalidAssignTarget, rest))
        }
        Some(TokenType::PlusPlus) => Ok((StatementKind::Increment(target()), &rest[1..])),
        Some(TokenType::MinusMinus) => Ok((StatementKind::Decrement(target()), &rest[1..])),
        Some(TokenType::Equal) => {
            let (value, rest) = expression(context, &rest[1..])?;
            Ok((
                StatementKind::Assign {
                    target: target(),
                    value,
                },
                rest,
            ))
        }
        _ => {
            let (expr, rest) = expression(context, tokens)?;
            Ok((StatementKind::Expression(expr), rest))
        }
    }
}

fn dotted_name<'a>(
    context: &ParseContext,
    tokens: &'a [Token],
) -> Result<(String, &'a [Token]), ParseErrorWithContext> {
    let (mut name, mut tokens) = match_identifier(context, tokens)?;
    while peek_type(tokens) == Some(&TokenType::Dot) {
        let (part, rest) = match_identifier(context, &tokens[1..])?;
        name.push('.');
        name.push_str(&part);
        tokens = rest;
    }
    Ok((name, tokens))
}

fn consume<'a>(
    context: &ParseContext,
    tokens: &'a [Token],
    token_type: TokenType,
) -> Result<&'a [Token], ParseErrorWithContext> {
    match peek_type(tokens) {
        Some(t) if t == &token_type => Ok(&tokens[1..]),
        _ => Err(context.error(ParseError::Expected(token_type), tokens)),
    }
}

fn match_identifier<'a>(
    context: &ParseContext,
    tokens: &'a [Token],
) -> Result<(String, &'a [Token]), ParseErrorWithContext> {
    match tokens.first() {
        Some(token) if token.token_type == TokenType::Identifier => {
            Ok((token.text.clone(), &tokens[1..]))
        }
        _ => Err(context.error(ParseError::ExpectedIdentifier, tokens)),
    }
}

fn match_string<'a>(
    context: &ParseContext,
    tokens: &'a [Token],
) -> Result<(String, &'a [Token]), ParseErrorWithContext> {
    match tokens.first() {
        Some(token) if token.token_type == TokenType::String => {
            Ok((unescape(token.string_body()), &tokens[1..]))
        }
        _ => Err(context.error(ParseError::Expected(TokenType::String), tokens)),
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
        ast::{AtomKind, ExprItem, Literal, TypeNode},
        tokenizer::tokens,
    };

    fn parse(source: &str) -> Result<Program, ParseErrors> {
        program(
            &tokens(source, "test.nubo").unwrap(),
            &CancellationToken::new(),
        )
    }

    fn parse_ok(source: &str) -> Vec<StatementKind> {
        parse(source)
            .unwrap()
            .0
            .into_iter()
            .map(|s| s.kind)
            .collect()
    }

    #[test]
    fn test_variable_declarations() {
        let program = parse_ok("let x: int = 5\nconst y = \"a\"; let z");
        assert_eq!(program.len(), 3);
        let StatementKind::VariableDecl(x) = &program[0] else {
            panic!("expected declaration, got {:?}", program[0]);
        };
        assert!(!x.constant);
        assert_eq!(
            x.ty,
            Some(TypeNode::Named {
                name: "int".to_string(),
                nullable: false
            })
        );
        let StatementKind::VariableDecl(y) = &program[1] else {
            panic!("expected declaration");
        };
        assert!(y.constant);
        let StatementKind::VariableDecl(z) = &program[2] else {
            panic!("expected declaration");
        };
        assert_eq!(z.value, None);
    }

    #[test]
    fn test_inline_function_has_single_return() {
        let program = parse_ok("fn double(x: int) -> int => x * 2");
        let StatementKind::Function(function) = &program[0] else {
            panic!("expected function");
        };
        assert_eq!(function.body.len(), 1);
        assert!(matches!(function.body[0].kind, StatementKind::Return(Some(_))));
    }

    #[test]
    fn test_trailing_comma_in_arguments_is_rejected() {
        let err = parse("fn f(a, b,) {}").unwrap_err();
        assert!(matches!(err.0[0].error, ParseError::TrailingComma));
    }

    #[test]
    fn test_for_value_forms() {
        let program = parse_ok("for v in xs {}\nfor k, v in xs {}");
        let StatementKind::For(first) = &program[0] else {
            panic!("expected for");
        };
        assert_eq!(first.value.iterator, None);
        assert_eq!(first.value.value, "v");
        let StatementKind::For(second) = &program[1] else {
            panic!("expected for");
        };
        assert_eq!(second.value.iterator.as_deref(), Some("k"));
        assert_eq!(second.value.value, "v");
    }

    #[test]
    fn test_struct_bodies() {
        let program = parse_ok(
            "struct Empty {}\nstruct Point { x: int; y: int }\nstruct User {\n  name: string\n  private age: int\n}",
        );
        let fields: Vec<_> = program
            .iter()
            .map(|s| match s {
                StatementKind::Struct(decl) => decl.fields.len(),
                _ => panic!("expected struct"),
            })
            .collect();
        assert_eq!(fields, vec![0, 2, 2]);
        let StatementKind::Struct(user) = &program[2] else {
            panic!("expected struct");
        };
        assert!(user.fields[1].private);
    }

    #[test]
    fn test_private_init_is_rejected() {
        let err = parse("struct A {}\nimpl A {\n private fn init(self: A) {}\n}").unwrap_err();
        assert!(matches!(err.0[0].error, ParseError::PrivateInit));
    }

    #[test]
    fn test_if_else_chain() {
        let program = parse_ok("if a { return 1 }\nelse if b { return 2 } else { return 3 }");
        let StatementKind::If(statement) = &program[0] else {
            panic!("expected if");
        };
        let Some(ElseBranch::If(next)) = &statement.else_branch else {
            panic!("expected else if");
        };
        assert!(matches!(next.else_branch, Some(ElseBranch::Block(_))));
    }

    #[test]
    fn test_assignment_targets() {
        let program = parse_ok("xs[0] = 1\np.name = \"a\"\ncount++\nf(1)");
        assert!(matches!(&program[0], StatementKind::Assign { target, .. } if target.accessors.len() == 1));
        assert!(matches!(&program[1], StatementKind::Assign { target, .. } if target.root == "p"));
        assert!(matches!(&program[2], StatementKind::Increment(_)));
        assert!(matches!(&program[3], StatementKind::Expression(_)));
    }

    #[test]
    fn test_imports() {
        let program = parse_ok(
            "import math from \"@std/math\"\nimport { a, b: c } from \"./lib\"\nimport from \"./side\"",
        );
        assert!(matches!(&program[0], StatementKind::Import(Import { kind: ImportKind::Module(name), .. }) if name == "math"));
        assert!(
            matches!(&program[1], StatementKind::Import(Import { kind: ImportKind::Selected(names), path }) if names.len() == 2 && path == "./lib")
        );
        assert!(matches!(&program[2], StatementKind::Import(Import { kind: ImportKind::Run, .. })));
    }

    #[test]
    fn test_events() {
        let program = parse_ok("event tick(n: int)\nsub tick(v) { return v }\npub tick(7)");
        assert!(matches!(&program[0], StatementKind::Event(e) if e.args.len() == 1));
        assert!(matches!(&program[1], StatementKind::Subscribe(s) if s.args.len() == 1));
        assert!(matches!(&program[2], StatementKind::Publish(p) if p.args.len() == 1));
    }

    #[test]
    fn test_try_binds_name() {
        let program = parse_ok("try { let x = undefined_name } err");
        assert!(matches!(&program[0], StatementKind::Try { name, body } if name == "err" && body.len() == 1));
    }

    #[test]
    fn test_expression_is_flat() {
        let program = parse_ok("return 2 + 3 * 4");
        let StatementKind::Return(Some(expr)) = &program[0] else {
            panic!("expected return");
        };
        assert_eq!(expr.body.len(), 5);
        assert!(matches!(
            &expr.body[0],
            ExprItem::Atom(atom) if atom.kind == AtomKind::Literal(Literal::Int(2))
        ));
        assert_eq!(expr.to_string(), "2 + 3 * 4");
    }

    #[test]
    fn test_error_recovery_reports_every_statement() {
        let err = parse("let = 1\nlet x = 2\nconst = 3").unwrap_err();
        assert_eq!(err.0.len(), 2);
        assert!(err.to_string().contains("While parsing program > statement"));
    }

    #[test]
    fn test_cancelled_parse_returns_no_tree() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = program(&tokens("let x = 1", "test.nubo").unwrap(), &cancel).unwrap_err();
        assert!(err.is_cancelled());
    }
}
