use crate::{
    ast::{Accessor, Atom, AtomKind, ExprItem, Expression, Literal, Operator, TemplatePart},
    error::{ExecutionError, ExecutionErrorKind, WithSpan},
    span::Span,
    sync,
    value::{dict::DictKey, function::Closure, Value},
};

use super::{types::common_type, ImportEntry, Interpreter};

/// Operator tree over the flat item list of an [`Expression`].
#[derive(Debug)]
enum Node<'a> {
    Atom(&'a Atom),
    Unary(Operator, &'a Span, Box<Node<'a>>),
    Binary(Operator, &'a Span, Box<Node<'a>>, Box<Node<'a>>),
    Conditional(Box<Node<'a>>, Box<Node<'a>>, Box<Node<'a>>),
}

fn precedence(op: Operator) -> Option<u8> {
    Some(match op {
        Operator::Or => 1,
        Operator::And => 2,
        Operator::Equal | Operator::NotEqual => 3,
        Operator::Less | Operator::LessEqual | Operator::Greater | Operator::GreaterEqual => 4,
        Operator::In => 5,
        Operator::Plus | Operator::Minus => 6,
        Operator::Multiply | Operator::Divide | Operator::Modulo => 7,
        Operator::Power => 8,
        _ => return None,
    })
}

struct TreeBuilder<'a> {
    items: &'a [ExprItem],
    position: usize,
}

impl<'a> TreeBuilder<'a> {
    fn build(items: &'a [ExprItem]) -> Result<Node<'a>, String> {
        let mut builder = Self { items, position: 0 };
        let node = builder.conditional()?;
        match builder.items.get(builder.position) {
            None => Ok(node),
            Some(ExprItem::Operator(op, _)) => Err(format!("unexpected '{op}'")),
            Some(ExprItem::Atom(atom)) => Err(format!("unexpected '{atom}'")),
        }
    }

    fn peek_operator(&self) -> Option<(Operator, &'a Span)> {
        match self.items.get(self.position) {
            Some(ExprItem::Operator(op, span)) => Some((*op, span)),
            _ => None,
        }
    }

    fn conditional(&mut self) -> Result<Node<'a>, String> {
        let condition = self.binary(0)?;
        if !matches!(self.peek_operator(), Some((Operator::Question, _))) {
            return Ok(condition);
        }
        self.position += 1;
        let then = self.conditional()?;
        if !matches!(self.peek_operator(), Some((Operator::Colon, _))) {
            return Err("expected ':' in conditional expression".into());
        }
        self.position += 1;
        let otherwise = self.conditional()?;
        Ok(Node::Conditional(
            Box::new(condition),
            Box::new(then),
            Box::new(otherwise),
        ))
    }

    fn binary(&mut self, min: u8) -> Result<Node<'a>, String> {
        let mut left = self.unary()?;
        while let Some((op, span)) = self.peek_operator() {
            let Some(current) = precedence(op) else {
                break;
            };
            if current < min {
                break;
            }
            self.position += 1;
            // `**` is right associative
            let next = if op == Operator::Power { current } else { current + 1 };
            let right = self.binary(next)?;
            left = Node::Binary(op, span, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn unary(&mut self) -> Result<Node<'a>, String> {
        match self.peek_operator() {
            Some((Operator::Not, span)) => {
                self.position += 1;
                Ok(Node::Unary(Operator::Not, span, Box::new(self.unary()?)))
            }
            Some((Operator::Minus, span)) => {
                self.position += 1;
                let operand = self.binary(precedence(Operator::Power).unwrap_or(u8::MAX))?;
                Ok(Node::Unary(Operator::Minus, span, Box::new(operand)))
            }
            _ => self.primary(),
        }
    }

    fn primary(&mut self) -> Result<Node<'a>, String> {
        match self.items.get(self.position) {
            Some(ExprItem::Atom(atom)) => {
                self.position += 1;
                Ok(Node::Atom(atom))
            }
            Some(ExprItem::Operator(Operator::LeftParen, _)) => {
                self.position += 1;
                let inner = self.conditional()?;
                if !matches!(self.peek_operator(), Some((Operator::RightParen, _))) {
                    return Err("missing ')'".into());
                }
                self.position += 1;
                Ok(inner)
            }
            Some(ExprItem::Operator(op, _)) => Err(format!("unexpected '{op}'")),
            None => Err("unexpected end of expression".into()),
        }
    }
}

impl Interpreter {
    pub(crate) fn evaluate(&mut self, expression: &Expression) -> Result<Value, ExecutionError> {
        if let [ExprItem::Atom(atom)] = expression.body.as_slice() {
            return self.evaluate_atom(atom);
        }
        let tree = TreeBuilder::build(&expression.body)
            .map_err(ExecutionErrorKind::Expression)
            .at(&expression.span)?;
        self.evaluate_node(&tree)
    }

    fn evaluate_node(&mut self, node: &Node<'_>) -> Result<Value, ExecutionError> {
        match node {
            Node::Atom(atom) => self.evaluate_atom(atom),
            Node::Unary(op, span, operand) => {
                let value = self.evaluate_node(operand)?;
                unary(*op, value).at(span)
            }
            Node::Binary(op @ (Operator::And | Operator::Or), span, left, right) => {
                let left = self.operand_bool(left, span)?;
                // short circuit
                if (*op == Operator::And) != left {
                    return Ok(Value::Bool(left));
                }
                Ok(Value::Bool(self.operand_bool(right, span)?))
            }
            Node::Binary(op, span, left, right) => {
                let left = self.evaluate_node(left)?;
                let right = self.evaluate_node(right)?;
                binary(*op, &left, &right).at(span)
            }
            Node::Conditional(condition, then, otherwise) => {
                let span = node_span(condition);
                if self.operand_bool(condition, span)? {
                    self.evaluate_node(then)
                } else {
                    self.evaluate_node(otherwise)
                }
            }
        }
    }

    fn operand_bool(&mut self, node: &Node<'_>, span: &Span) -> Result<bool, ExecutionError> {
        match self.evaluate_node(node)? {
            Value::Bool(b) => Ok(b),
            other => Err(ExecutionError::new(
                ExecutionErrorKind::ConditionNotBool(other.type_of().to_string()),
                span.clone(),
            )),
        }
    }

    pub(crate) fn evaluate_atom(&mut self, atom: &Atom) -> Result<Value, ExecutionError> {
        let span = &atom.span;
        let mut accessors = atom.accessors.as_slice();
        let mut value = match &atom.kind {
            AtomKind::Literal(literal) => literal_value(literal),
            AtomKind::Reference(name) => {
                let (value, rest) = self.reference(name, accessors, span)?;
                accessors = rest;
                value
            }
            AtomKind::Call { name, args } => {
                let callee = self.resolve_name(name, span)?;
                let args = self.arguments(args)?;
                self.call_value(&callee, args, span)?
            }
            AtomKind::Group(inner) => self.evaluate(inner)?,
            AtomKind::List(items) => {
                let values = items
                    .iter()
                    .map(|item| self.evaluate(item))
                    .collect::<Result<Vec<_>, _>>()?;
                let item_type = common_type(&values);
                Value::list(values, item_type)
            }
            AtomKind::Dict(entries) => {
                let mut pairs = Vec::with_capacity(entries.len());
                for (key, value) in entries {
                    pairs.push((self.evaluate(key)?, self.evaluate(value)?));
                }
                let key_type = common_type(pairs.iter().map(|(key, _)| key));
                let value_type = common_type(pairs.iter().map(|(_, value)| value));
                Value::dict(pairs, key_type, value_type).at(span)?
            }
            AtomKind::Element(element) => self.evaluate_element(element)?,
            AtomKind::Template(parts) => {
                let mut text = String::new();
                for part in parts {
                    match part {
                        TemplatePart::Raw(raw) => text.push_str(raw),
                        TemplatePart::Expr(expression) => {
                            text.push_str(&self.evaluate(expression)?.to_string())
                        }
                    }
                }
                Value::string(text)
            }
            AtomKind::Function(decl) => {
                self.function_value(decl, Closure(self.scope.clone()))?
            }
        };

        for accessor in accessors {
            value = self.access(value, accessor)?;
        }
        Ok(value)
    }

    /// A plain name, or an import alias whose first `.member` is consumed here.
    fn reference<'a>(
        &self,
        name: &str,
        accessors: &'a [Accessor],
        span: &Span,
    ) -> Result<(Value, &'a [Accessor]), ExecutionError> {
        if let Some(value) = sync::read(&self.scope).get(name) {
            return Ok((value, accessors));
        }
        if let Some(entry) = self.module.import(name) {
            return match (entry, accessors.split_first()) {
                (entry, Some((Accessor::Field(member, at), rest))) => {
                    Ok((self.import_member(&entry, name, member, at)?, rest))
                }
                (ImportEntry::Package(package), _) => Ok((package, accessors)),
                (ImportEntry::Module(_), _) => Err(ExecutionError::new(
                    ExecutionErrorKind::Import(format!(
                        "module '{name}' can only be used through its members"
                    )),
                    span.clone(),
                )),
            };
        }
        Ok((self.lookup(name, span)?, accessors))
    }

    /// Like [`Interpreter::lookup`], but understands `alias.member`.
    pub(crate) fn resolve_name(&self, name: &str, span: &Span) -> Result<Value, ExecutionError> {
        match name.split_once('.') {
            Some((alias, member)) if !sync::read(&self.scope).contains_local(alias) => {
                match self.module.import(alias) {
                    Some(entry) => self.import_member(&entry, alias, member, span),
                    None => {
                        let base = self.lookup(alias, span)?;
                        self.member(&base, member, span)
                    }
                }
            }
            _ => self.lookup(name, span),
        }
    }

    pub(crate) fn import_member(
        &self,
        entry: &ImportEntry,
        alias: &str,
        member: &str,
        span: &Span,
    ) -> Result<Value, ExecutionError> {
        match entry {
            ImportEntry::Module(module) => sync::read(&module.globals).get(member).ok_or_else(|| {
                ExecutionError::new(
                    ExecutionErrorKind::Import(format!("'{alias}' has no member '{member}'")),
                    span.clone(),
                )
            }),
            ImportEntry::Package(package) => self.member(package, member, span),
        }
    }

    /// Evaluates call arguments left to right, each one cloned.
    pub(crate) fn arguments(&mut self, args: &[Expression]) -> Result<Vec<Value>, ExecutionError> {
        args.iter()
            .map(|arg| self.evaluate(arg).map(|value| value.deep_clone()))
            .collect()
    }

    /// Calls a function or constructs a struct. A void result reads as nil.
    pub(crate) fn call_value(
        &mut self,
        callee: &Value,
        args: Vec<Value>,
        span: &Span,
    ) -> Result<Value, ExecutionError> {
        match callee {
            Value::Function(function) => Ok(self
                .call_function(function, args, span)?
                .unwrap_or(Value::Nil)),
            Value::StructDef(definition) => self.construct(definition, args, span),
            other => Err(ExecutionError::new(
                ExecutionErrorKind::NotCallable(other.type_of().to_string()),
                span.clone(),
            )),
        }
    }

    pub(crate) fn access(&mut self, value: Value, accessor: &Accessor) -> Result<Value, ExecutionError> {
        match accessor {
            Accessor::Field(name, span) => self.member(&value, name, span),
            Accessor::Call(args, span) => {
                let args = self.arguments(args)?;
                self.call_value(&value, args, span)
            }
            Accessor::Index(index, span) => {
                let key = self.evaluate(index)?;
                self.index(&value, key, span)
            }
        }
    }
}

fn node_span<'a>(node: &Node<'a>) -> &'a Span {
    match node {
        Node::Atom(atom) => &atom.span,
        Node::Unary(_, span, _) | Node::Binary(_, span, _, _) => span,
        Node::Conditional(condition, _, _) => node_span(condition),
    }
}

fn literal_value(literal: &Literal) -> Value {
    match literal {
        Literal::Int(n) => Value::Int(*n),
        Literal::Float(f) => Value::Float(*f),
        Literal::String(s) => Value::string(s),
        Literal::Bool(b) => Value::Bool(*b),
        Literal::Nil => Value::Nil,
    }
}

fn overflow() -> ExecutionErrorKind {
    ExecutionErrorKind::Value("integer overflow".into())
}

fn invalid(value: &Value) -> ExecutionErrorKind {
    ExecutionErrorKind::InvalidOperand(value.type_of().to_string())
}

pub(crate) fn unary(op: Operator, value: Value) -> Result<Value, ExecutionErrorKind> {
    match (op, value) {
        (Operator::Minus, Value::Int(n)) => n.checked_neg().map(Value::Int).ok_or_else(overflow),
        (Operator::Minus, Value::Float(f)) => Ok(Value::Float(-f)),
        (Operator::Not, Value::Bool(b)) => Ok(Value::Bool(!b)),
        (_, other) => Err(invalid(&other)),
    }
}

#[derive(Debug, Clone, Copy)]
enum Number {
    Int(i64),
    Float(f64),
}

impl Number {
    fn of(value: &Value) -> Option<Self> {
        match value {
            Value::Int(n) => Some(Number::Int(*n)),
            Value::Byte(b) => Some(Number::Int(i64::from(*b))),
            Value::Float(f) => Some(Number::Float(*f)),
            _ => None,
        }
    }

    fn as_f64(self) -> f64 {
        match self {
            Number::Int(n) => n as f64,
            Number::Float(f) => f,
        }
    }
}

fn text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.to_string()),
        Value::Char(c) => Some(c.to_string()),
        Value::Element(element) => Some(element.render()),
        _ => None,
    }
}

pub(crate) fn binary(op: Operator, left: &Value, right: &Value) -> Result<Value, ExecutionErrorKind> {
    match op {
        Operator::Equal => return Ok(Value::Bool(left == right)),
        Operator::NotEqual => return Ok(Value::Bool(left != right)),
        Operator::In => return contains(right, left).map(Value::Bool),
        _ => {}
    }

    match (Number::of(left), Number::of(right)) {
        (Some(Number::Int(a)), Some(Number::Int(b))) => integer(op, a, b),
        (Some(a), Some(b)) => float(op, a.as_f64(), b.as_f64()),
        _ => match (text(left), text(right)) {
            (Some(a), Some(b)) => textual(op, &a, &b),
            _ => Err(invalid(if Number::of(left).is_none() && text(left).is_none() {
                left
            } else {
                right
            })),
        },
    }
}

/// `/` and `**` always produce a float, even for two ints.
fn integer(op: Operator, a: i64, b: i64) -> Result<Value, ExecutionErrorKind> {
    let value = match op {
        Operator::Divide | Operator::Power => return float(op, a as f64, b as f64),
        Operator::Plus => a.checked_add(b).ok_or_else(overflow)?,
        Operator::Minus => a.checked_sub(b).ok_or_else(overflow)?,
        Operator::Multiply => a.checked_mul(b).ok_or_else(overflow)?,
        Operator::Modulo if b == 0 => return Err(ExecutionErrorKind::DivisionByZero),
        Operator::Modulo => a.checked_rem(b).ok_or_else(overflow)?,
        Operator::Less => return Ok(Value::Bool(a < b)),
        Operator::LessEqual => return Ok(Value::Bool(a <= b)),
        Operator::Greater => return Ok(Value::Bool(a > b)),
        Operator::GreaterEqual => return Ok(Value::Bool(a >= b)),
        _ => return Err(ExecutionErrorKind::InvalidOperand("int".into())),
    };
    Ok(Value::Int(value))
}

fn float(op: Operator, a: f64, b: f64) -> Result<Value, ExecutionErrorKind> {
    let value = match op {
        Operator::Plus => a + b,
        Operator::Minus => a - b,
        Operator::Multiply => a * b,
        Operator::Divide | Operator::Modulo if b == 0.0 => {
            return Err(ExecutionErrorKind::DivisionByZero)
        }
        Operator::Divide => a / b,
        Operator::Modulo => a % b,
        Operator::Power => a.powf(b),
        Operator::Less => return Ok(Value::Bool(a < b)),
        Operator::LessEqual => return Ok(Value::Bool(a <= b)),
        Operator::Greater => return Ok(Value::Bool(a > b)),
        Operator::GreaterEqual => return Ok(Value::Bool(a >= b)),
        _ => return Err(ExecutionErrorKind::InvalidOperand("float".into())),
    };
    Ok(Value::Float(value))
}

fn textual(op: Operator, a: &str, b: &str) -> Result<Value, ExecutionErrorKind> {
    Ok(match op {
        Operator::Plus => Value::string(format!("{a}{b}")),
        Operator::Less => Value::Bool(a < b),
        Operator::LessEqual => Value::Bool(a <= b),
        Operator::Greater => Value::Bool(a > b),
        Operator::GreaterEqual => Value::Bool(a >= b),
        _ => return Err(ExecutionErrorKind::InvalidOperand("string".into())),
    })
}

/// `item in container`
fn contains(container: &Value, item: &Value) -> Result<bool, ExecutionErrorKind> {
    match container {
        Value::List(list) => Ok(list.read().iter().any(|value| value == item)),
        Value::Dict(dict) => {
            Ok(DictKey::from_value(item).is_some_and(|key| dict.read().contains(&key)))
        }
        Value::String(haystack) => match item {
            Value::Char(c) => Ok(haystack.contains(*c)),
            other => match text(other) {
                Some(needle) => Ok(haystack.contains(needle.as_str())),
                None => Err(invalid(other)),
            },
        },
        Value::Ref(inner) => contains(&sync::read(inner), item),
        other => Err(ExecutionErrorKind::NotIterable(other.type_of().to_string())),
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::value::types::Type;

    #[test]
    fn test_integer_arithmetic_is_checked() {
        assert_eq!(binary(Operator::Divide, &Value::Int(7), &Value::Int(2)).unwrap(), Value::Float(3.5));
        assert_eq!(binary(Operator::Power, &Value::Int(2), &Value::Int(10)).unwrap(), Value::Float(1024.0));
        assert_eq!(binary(Operator::Power, &Value::Int(2), &Value::Int(-1)).unwrap(), Value::Float(0.5));
        assert!(matches!(
            binary(Operator::Divide, &Value::Int(1), &Value::Int(0)),
            Err(ExecutionErrorKind::DivisionByZero)
        ));
        assert!(matches!(
            binary(Operator::Modulo, &Value::Int(1), &Value::Int(0)),
            Err(ExecutionErrorKind::DivisionByZero)
        ));
        assert!(matches!(
            binary(Operator::Multiply, &Value::Int(i64::MAX), &Value::Int(2)),
            Err(ExecutionErrorKind::Value(_))
        ));
        assert_eq!(binary(Operator::Plus, &Value::Int(1), &Value::Float(0.5)).unwrap(), Value::Float(1.5));
    }

    #[test]
    fn test_strings_and_containers() {
        assert_eq!(
            binary(Operator::Plus, &Value::string("ab"), &Value::Char('c')).unwrap(),
            Value::string("abc")
        );
        let list = Value::list(vec![Value::Int(1), Value::Int(2)], Type::INT);
        assert!(matches!(
            binary(Operator::Plus, &list, &Value::Int(1)),
            Err(ExecutionErrorKind::InvalidOperand(ty)) if ty == "[]int"
        ));
        assert_eq!(binary(Operator::In, &Value::Int(2), &list).unwrap(), Value::Bool(true));
        assert_eq!(
            binary(Operator::In, &Value::string("ell"), &Value::string("hello")).unwrap(),
            Value::Bool(true)
        );
        assert_eq!(binary(Operator::Equal, &list, &list.deep_clone()).unwrap(), Value::Bool(true));
    }

    #[test]
    fn test_unary() {
        assert_eq!(unary(Operator::Minus, Value::Int(3)).unwrap(), Value::Int(-3));
        assert!(unary(Operator::Not, Value::Int(3)).is_err());
    }
}
