use std::fmt::Display;

use serde::{Deserialize, Serialize};

use crate::span::Span;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Program(pub Vec<Statement>);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Statement {
    pub kind: StatementKind,
    pub span: Span,
}

impl Statement {
    pub fn new(kind: StatementKind, span: Span) -> Self {
        Self { kind, span }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StatementKind {
    Import(Import),
    Include(Expression),
    Function(FunctionDecl),
    Struct(StructDecl),
    Impl(ImplDecl),
    Event(EventDecl),
    Subscribe(Subscribe),
    Publish(Publish),
    VariableDecl(VariableDecl),
    Assign { target: Path, value: Expression },
    Increment(Path),
    Decrement(Path),
    Expression(Expression),
    Return(Option<Expression>),
    If(IfStatement),
    While {
        condition: Expression,
        body: Vec<Statement>,
    },
    For(ForStatement),
    Signal(Signal),
    Try {
        body: Vec<Statement>,
        name: String,
    },
    Defer(Expression),
    Spawn(Expression),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Import {
    pub kind: ImportKind,
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ImportKind {
    /// `import name from "path"`
    Module(String),
    /// `import { a, b: alias } from "path"`
    Selected(Vec<(String, Option<String>)>),
    /// `import from "path"`
    Run,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDecl {
    pub name: Option<String>,
    pub args: Vec<Argument>,
    pub returns: Option<TypeNode>,
    pub body: Vec<Statement>,
    pub private: bool,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Argument {
    pub name: String,
    pub ty: Option<TypeNode>,
    pub default: Option<Expression>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructDecl {
    pub name: String,
    pub fields: Vec<StructField>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructField {
    pub name: String,
    pub ty: TypeNode,
    pub private: bool,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImplDecl {
    pub target: String,
    pub methods: Vec<FunctionDecl>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventDecl {
    /// Possibly qualified as `module.name`.
    pub name: String,
    pub args: Vec<EventArg>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventArg {
    pub name: String,
    pub ty: TypeNode,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscribe {
    pub event: String,
    pub args: Vec<Argument>,
    pub body: Vec<Statement>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Publish {
    pub event: String,
    pub args: Vec<Expression>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableDecl {
    pub constant: bool,
    pub name: String,
    pub ty: Option<TypeNode>,
    pub value: Option<Expression>,
}

/// Assignment target: a name followed by field and index accessors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Path {
    pub root: String,
    pub accessors: Vec<Accessor>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IfStatement {
    pub condition: Expression,
    pub body: Vec<Statement>,
    pub else_branch: Option<ElseBranch>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ElseBranch {
    If(Box<IfStatement>),
    Block(Vec<Statement>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForStatement {
    pub value: ForValue,
    pub iterable: Expression,
    pub body: Vec<Statement>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForValue {
    /// Key binding of the `for k, v in` form.
    pub iterator: Option<String>,
    pub value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Signal {
    Break,
    Continue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expression {
    pub body: Vec<ExprItem>,
    pub span: Span,
}

impl Expression {
    pub fn single(atom: Atom) -> Self {
        let span = atom.span.clone();
        Self {
            body: vec![ExprItem::Atom(atom)],
            span,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExprItem {
    Operator(Operator, Span),
    Atom(Atom),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operator {
    Plus,
    Minus,
    Multiply,
    Divide,
    Modulo,
    Power,
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    And,
    Or,
    Not,
    In,
    Question,
    Colon,
    LeftParen,
    RightParen,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Atom {
    pub kind: AtomKind,
    pub accessors: Vec<Accessor>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AtomKind {
    Literal(Literal),
    Reference(String),
    Call { name: String, args: Vec<Expression> },
    Group(Box<Expression>),
    List(Vec<Expression>),
    Dict(Vec<(Expression, Expression)>),
    Element(Element),
    Template(Vec<TemplatePart>),
    Function(Box<FunctionDecl>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Accessor {
    Field(String, Span),
    Call(Vec<Expression>, Span),
    Index(Expression, Span),
}

impl Accessor {
    pub fn span(&self) -> &Span {
        match self {
            Accessor::Field(_, span) | Accessor::Call(_, span) | Accessor::Index(_, span) => span,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Literal {
    Int(i64),
    Float(f64),
    String(String),
    Bool(bool),
    Nil,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TemplatePart {
    Raw(String),
    Expr(Expression),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TypeNode {
    /// `int`, `string?`, `module.Type`
    Named { name: String, nullable: bool },
    List(Box<TypeNode>),
    Dict(Box<TypeNode>, Box<TypeNode>),
    Function {
        args: Vec<TypeNode>,
        returns: Option<Box<TypeNode>>,
    },
    Ref(Box<TypeNode>),
    Union(Vec<TypeNode>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Element {
    pub tag: String,
    pub attrs: Vec<ElementAttr>,
    pub children: Vec<ElementChild>,
    pub self_closing: bool,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ElementAttr {
    /// `name="text"`
    Text(String, String),
    /// `:name="expr"` or bare `:name`
    Dynamic(String, Expression),
    /// `name`
    Bare(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ElementChild {
    Element(Element),
    RawText(String),
    DynamicText { expr: Expression, unescaped: bool },
}

impl Display for Program {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for statement in &self.0 {
            writeln!(f, "{}", statement)?;
        }
        Ok(())
    }
}

fn write_block(f: &mut std::fmt::Formatter<'_>, statements: &[Statement]) -> std::fmt::Result {
    writeln!(f, "{{")?;
    for statement in statements {
        writeln!(f, "{}", statement)?;
    }
    write!(f, "}}")
}

fn write_list<T: Display>(f: &mut std::fmt::Formatter<'_>, items: &[T]) -> std::fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{item}")?;
    }
    Ok(())
}

impl Display for Statement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.kind {
            StatementKind::Import(import) => match &import.kind {
                ImportKind::Module(alias) => write!(f, "import {alias} from {:?}", import.path),
                ImportKind::Selected(names) => {
                    write!(f, "import {{ ")?;
                    for (i, (name, alias)) in names.iter().enumerate() {
                        if i > 0 {
                            write!(f, ", ")?;
                        }
                        match alias {
                            Some(alias) => write!(f, "{name}: {alias}")?,
                            None => write!(f, "{name}")?,
                        }
                    }
                    write!(f, " }} from {:?}", import.path)
                }
                ImportKind::Run => write!(f, "import from {:?}", import.path),
            },
            StatementKind::Include(expr) => write!(f, "include {expr}"),
            StatementKind::Function(function) => write!(f, "{function}"),
            StatementKind::Struct(decl) => {
                writeln!(f, "struct {} {{", decl.name)?;
                for field in &decl.fields {
                    if field.private {
                        write!(f, "private ")?;
                    }
                    writeln!(f, "{}: {}", field.name, field.ty)?;
                }
                write!(f, "}}")
            }
            StatementKind::Impl(decl) => {
                writeln!(f, "impl {} {{", decl.target)?;
                for method in &decl.methods {
                    writeln!(f, "{method}")?;
                }
                write!(f, "}}")
            }
            StatementKind::Event(event) => {
                write!(f, "event {}(", event.name)?;
                for (i, arg) in event.args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", arg.name, arg.ty)?;
                }
                write!(f, ")")
            }
            StatementKind::Subscribe(sub) => {
                write!(f, "sub {}(", sub.event)?;
                write_list(f, &sub.args)?;
                write!(f, ") ")?;
                write_block(f, &sub.body)
            }
            StatementKind::Publish(publish) => {
                write!(f, "pub {}(", publish.event)?;
                write_list(f, &publish.args)?;
                write!(f, ")")
            }
            StatementKind::VariableDecl(decl) => {
                let keyword = if decl.constant { "const" } else { "let" };
                write!(f, "{keyword} {}", decl.name)?;
                if let Some(ty) = &decl.ty {
                    write!(f, ": {ty}")?;
                }
                if let Some(value) = &decl.value {
                    write!(f, " = {value}")?;
                }
                Ok(())
            }
            StatementKind::Assign { target, value } => write!(f, "{target} = {value}"),
            StatementKind::Increment(target) => write!(f, "{target}++"),
            StatementKind::Decrement(target) => write!(f, "{target}--"),
            StatementKind::Expression(expr) => write!(f, "{expr}"),
            StatementKind::Return(Some(expr)) => write!(f, "return {expr}"),
            StatementKind::Return(None) => write!(f, "return"),
            StatementKind::If(statement) => write!(f, "{statement}"),
            StatementKind::While { condition, body } => {
                write!(f, "while {condition} ")?;
                write_block(f, body)
            }
            StatementKind::For(statement) => {
                write!(f, "for ")?;
                if let Some(iterator) = &statement.value.iterator {
                    write!(f, "{iterator}, ")?;
                }
                write!(f, "{} in {} ", statement.value.value, statement.iterable)?;
                write_block(f, &statement.body)
            }
            StatementKind::Signal(Signal::Break) => write!(f, "break"),
            StatementKind::Signal(Signal::Continue) => write!(f, "continue"),
            StatementKind::Try { body, name } => {
                write!(f, "try ")?;
                write_block(f, body)?;
                write!(f, " {name}")
            }
            StatementKind::Defer(expr) => write!(f, "defer {expr}"),
            StatementKind::Spawn(expr) => write!(f, "spawn {expr}"),
        }
    }
}

impl Display for IfStatement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "if {} ", self.condition)?;
        write_block(f, &self.body)?;
        match &self.else_branch {
            Some(ElseBranch::If(next)) => write!(f, " else {next}"),
            Some(ElseBranch::Block(body)) => {
                write!(f, " else ")?;
                write_block(f, body)
            }
            None => Ok(()),
        }
    }
}

impl Display for FunctionDecl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.private {
            write!(f, "private ")?;
        }
        write!(f, "fn")?;
        if let Some(name) = &self.name {
            write!(f, " {name}")?;
        }
        write!(f, "(")?;
        write_list(f, &self.args)?;
        write!(f, ")")?;
        if let Some(returns) = &self.returns {
            write!(f, " -> {returns}")?;
        }
        write!(f, " ")?;
        write_block(f, &self.body)
    }
}

impl Display for Argument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)?;
        if let Some(ty) = &self.ty {
            write!(f, ": {ty}")?;
        }
        if let Some(default) = &self.default {
            write!(f, " = {default}")?;
        }
        Ok(())
    }
}

impl Display for Path {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.root)?;
        for accessor in &self.accessors {
            write!(f, "{accessor}")?;
        }
        Ok(())
    }
}

impl Display for Expression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut previous: Option<&ExprItem> = None;
        for item in &self.body {
            let spaced = match (previous, item) {
                (None, _) => false,
                (Some(ExprItem::Operator(Operator::LeftParen | Operator::Not, _)), _) => false,
                (_, ExprItem::Operator(Operator::RightParen, _)) => false,
                _ => true,
            };
            if spaced {
                write!(f, " ")?;
            }
            match item {
                ExprItem::Operator(op, _) => write!(f, "{op}")?,
                ExprItem::Atom(atom) => write!(f, "{atom}")?,
            }
            previous = Some(item);
        }
        Ok(())
    }
}

impl Display for Operator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Operator::Plus => "+",
            Operator::Minus => "-",
            Operator::Multiply => "*",
            Operator::Divide => "/",
            Operator::Modulo => "%",
            Operator::Power => "**",
            Operator::Equal => "==",
            Operator::NotEqual => "!=",
            Operator::Less => "<",
            Operator::LessEqual => "<=",
            Operator::Greater => ">",
            Operator::GreaterEqual => ">=",
            Operator::And => "&&",
            Operator::Or => "||",
            Operator::Not => "!",
            Operator::In => "in",
            Operator::Question => "?",
            Operator::Colon => ":",
            Operator::LeftParen => "(",
            Operator::RightParen => ")",
        };
        write!(f, "{text}")
    }
}

impl Display for Atom {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.kind {
            AtomKind::Literal(literal) => write!(f, "{literal}")?,
            AtomKind::Reference(name) => write!(f, "{name}")?,
            AtomKind::Call { name, args } => {
                write!(f, "{name}(")?;
                write_list(f, args)?;
                write!(f, ")")?;
            }
            AtomKind::Group(expr) => write!(f, "({expr})")?,
            AtomKind::List(items) => {
                write!(f, "[")?;
                write_list(f, items)?;
                write!(f, "]")?;
            }
            AtomKind::Dict(entries) => {
                write!(f, "{{")?;
                for (i, (key, value)) in entries.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{key}: {value}")?;
                }
                write!(f, "}}")?;
            }
            AtomKind::Element(element) => write!(f, "{element}")?,
            AtomKind::Template(parts) => {
                write!(f, "`")?;
                for part in parts {
                    match part {
                        TemplatePart::Raw(text) => write!(f, "{text}")?,
                        TemplatePart::Expr(expr) => write!(f, "${{{expr}}}")?,
                    }
                }
                write!(f, "`")?;
            }
            AtomKind::Function(function) => write!(f, "{function}")?,
        }
        for accessor in &self.accessors {
            write!(f, "{accessor}")?;
        }
        Ok(())
    }
}

impl Display for Accessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Accessor::Field(name, _) => write!(f, ".{name}"),
            Accessor::Call(args, _) => {
                write!(f, "(")?;
                write_list(f, args)?;
                write!(f, ")")
            }
            Accessor::Index(index, _) => write!(f, "[{index}]"),
        }
    }
}

impl Display for Literal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Literal::Int(n) => write!(f, "{n}"),
            Literal::Float(n) => write!(f, "{n:?}"),
            Literal::String(s) => write!(f, "{s:?}"),
            Literal::Bool(b) => write!(f, "{b}"),
            Literal::Nil => write!(f, "nil"),
        }
    }
}

impl Display for TypeNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TypeNode::Named { name, nullable } => {
                write!(f, "{name}")?;
                if *nullable {
                    write!(f, "?")?;
                }
                Ok(())
            }
            TypeNode::List(item) => write!(f, "[]{item}"),
            TypeNode::Dict(key, value) => write!(f, "dict[{key}, {value}]"),
            TypeNode::Function { args, returns } => {
                write!(f, "fn(")?;
                write_list(f, args)?;
                write!(f, ")")?;
                if let Some(returns) = returns {
                    write!(f, " -> {returns}")?;
                }
                Ok(())
            }
            TypeNode::Ref(inner) => write!(f, "ref {inner}"),
            TypeNode::Union(types) => {
                for (i, ty) in types.iter().enumerate() {
                    if i > 0 {
                        write!(f, " | ")?;
                    }
                    write!(f, "{ty}")?;
                }
                Ok(())
            }
        }
    }
}

impl Display for Element {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "<{}", self.tag)?;
        for attr in &self.attrs {
            match attr {
                ElementAttr::Text(name, value) => write!(f, " {name}={value:?}")?,
                ElementAttr::Dynamic(name, expr) => write!(f, " :{name}=\"{expr}\"")?,
                ElementAttr::Bare(name) => write!(f, " {name}")?,
            }
        }
        if self.self_closing {
            return write!(f, " />");
        }
        write!(f, ">")?;
        for child in &self.children {
            match child {
                ElementChild::Element(element) => write!(f, "{element}")?,
                ElementChild::RawText(text) => write!(f, "{text}")?,
                ElementChild::DynamicText {
                    expr,
                    unescaped: false,
                } => write!(f, "{{{expr}}}")?,
                ElementChild::DynamicText {
                    expr,
                    unescaped: true,
                } => write!(f, "!{{{expr}}}")?,
            }
        }
        write!(f, "</{}>", self.tag)
    }
}
