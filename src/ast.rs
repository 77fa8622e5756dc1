// ABOUTME: AST node types consumed by the evaluator; no lexer or parser lives in this crate

use std::rc::Rc;

/// Position of a token in source, carried for error enrichment.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Pos {
    pub file: Option<Rc<str>>,
    pub line: u32,
    pub col: u32,
}

impl Pos {
    pub fn unknown() -> Self {
        Pos::default()
    }
}

/// Wraps any AST node with its source position.
#[derive(Debug, Clone)]
pub struct Spanned<T> {
    pub node: T,
    pub pos: Pos,
}

impl<T> Spanned<T> {
    pub fn new(node: T, pos: Pos) -> Self {
        Spanned { node, pos }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    And,
    Or,
    Match, // `~` regex match
}

#[derive(Debug, Clone)]
pub enum TemplatePart {
    Literal(String),
    Expr(Expr),
}

#[derive(Debug, Clone)]
pub enum Pattern {
    Name(String),
    Discard,
    Array {
        elements: Vec<Pattern>,
        rest: Option<String>,
    },
    Dict {
        fields: Vec<DictPatternField>,
        rest: Option<String>,
    },
}

#[derive(Debug, Clone)]
pub struct DictPatternField {
    pub key: String,
    pub alias: Option<String>,
    pub nested: Option<Pattern>,
}

#[derive(Debug, Clone)]
pub enum AssignTarget {
    Name(String),
    Index { receiver: Box<Expr>, index: Box<Expr> },
    Property { receiver: Box<Expr>, name: String },
}

pub type SExpr = Spanned<Expr>;
pub type SStmt = Spanned<Stmt>;

#[derive(Debug, Clone)]
pub enum Expr {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    TemplateStr(Vec<TemplatePart>),
    Ident(String),
    ArrayLit(Vec<Expr>),
    DictLit(Vec<(String, Expr)>, Option<Vec<String>>),
    FunctionLit {
        params: Vec<Pattern>,
        body: Vec<SStmt>,
    },
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
    },
    MethodCall {
        receiver: Box<Expr>,
        name: String,
        args: Vec<Expr>,
    },
    PropertyAccess {
        receiver: Box<Expr>,
        name: String,
    },
    Index {
        receiver: Box<Expr>,
        index: Box<Expr>,
    },
    Unary {
        op: UnaryOp,
        expr: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Is {
        expr: Box<Expr>,
        schema: Box<Expr>,
        negate: bool,
    },
    If {
        cond: Box<Expr>,
        then_branch: Vec<SStmt>,
        else_branch: Option<Vec<SStmt>>,
    },
    ForIn {
        pattern: Pattern,
        iterable: Box<Expr>,
        body: Vec<SStmt>,
    },
    Check(Box<Expr>),
    Import(Box<Expr>),
    ReadExpr {
        pattern: Option<Pattern>,
        source: Box<Expr>,
        format_hint: Option<String>,
    },
    Range {
        start: Box<Expr>,
        end: Box<Expr>,
        inclusive: bool,
    },
}

#[derive(Debug, Clone)]
pub enum Stmt {
    Expr(Expr),
    Let {
        pattern: Pattern,
        value: Expr,
        exported: bool,
    },
    Assign {
        target: AssignTarget,
        value: Expr,
    },
    Return(Option<Expr>),
    Stop,
    Skip,
    Write {
        value: Expr,
        target: Expr,
        append: bool,
        network: bool,
    },
}
