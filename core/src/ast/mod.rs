//! Syntax tree for the Lua dialect accepted by veil.
//!
//! Nodes are plain owned enums (`Box`/`Vec`), one closed sum type per
//! category. Statements carry a [`Span`] into the source they were parsed
//! from and the `vm_owned` marker set by the virtualization pass: passes that
//! run afterwards must treat an owned statement (and everything below it) as
//! opaque.

pub mod build;
pub mod walk;

use core::ops::Range;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Span(pub Range<usize>);

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self(start..end)
    }

    /// Span for synthesized nodes that do not originate in user source.
    pub fn synthetic() -> Self {
        Self(0..0)
    }

    pub fn combine(a: &Span, b: &Span) -> Span {
        Span::new(a.0.start, b.0.end)
    }

    pub fn str_of<'a>(&self, source: &'a str) -> &'a str {
        &source[self.0.start..self.0.end]
    }
}

impl From<pest::Span<'_>> for Span {
    fn from(s: pest::Span<'_>) -> Self {
        Self(s.start()..s.end())
    }
}

pub type Block = Vec<Stmt>;

/// A parsed source file.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Chunk {
    pub body: Block,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    pub kind: StmtKind,
    pub span: Span,
    pub vm_owned: bool,
}

impl Stmt {
    pub fn new(kind: StmtKind, span: Span) -> Self {
        Self {
            kind,
            span,
            vm_owned: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    Local {
        names: Vec<String>,
        values: Vec<Expr>,
    },
    Assign {
        targets: Vec<Expr>,
        values: Vec<Expr>,
    },
    CompoundAssign {
        op: BinaryOp,
        target: Expr,
        value: Expr,
    },
    /// A call used as a statement. The expression is always `Call` or `MethodCall`.
    Call(Expr),
    Do(Block),
    While {
        cond: Expr,
        body: Block,
    },
    Repeat {
        body: Block,
        cond: Expr,
    },
    If {
        clauses: Vec<(Expr, Block)>,
        else_body: Option<Block>,
    },
    NumericFor {
        var: String,
        start: Expr,
        limit: Expr,
        step: Option<Expr>,
        body: Block,
    },
    GenericFor {
        vars: Vec<String>,
        exprs: Vec<Expr>,
        body: Block,
    },
    Function {
        name: FuncName,
        func: FunctionBody,
    },
    LocalFunction {
        name: String,
        func: FunctionBody,
    },
    Return(Vec<Expr>),
    Break,
    Continue,
    Goto(String),
    Label(String),
}

/// `a.b.c` or `a.b:c` in a `function` statement.
#[derive(Debug, Clone, PartialEq)]
pub struct FuncName {
    pub path: Vec<String>,
    pub method: Option<String>,
}

impl FuncName {
    /// Dotted display name, e.g. `obj.util:run`.
    pub fn display(&self) -> String {
        let mut name = self.path.join(".");
        if let Some(method) = &self.method {
            name.push(':');
            name.push_str(method);
        }
        name
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionBody {
    pub params: Vec<String>,
    pub is_vararg: bool,
    pub body: Block,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Nil,
    True,
    False,
    Number(f64),
    Str(Vec<u8>),
    Vararg,
    Function(Box<FunctionBody>),
    Ident(String),
    /// `object[key]`
    Index {
        object: Box<Expr>,
        key: Box<Expr>,
    },
    /// `object.name`
    Member {
        object: Box<Expr>,
        name: String,
    },
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
    },
    MethodCall {
        receiver: Box<Expr>,
        method: String,
        args: Vec<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Unary {
        op: UnaryOp,
        expr: Box<Expr>,
    },
    Table(Vec<TableField>),
    /// Parenthesized expression; truncates multiple results to one.
    Paren(Box<Expr>),
}

impl Expr {
    /// Whether this expression can produce more than one value in tail position.
    pub fn is_multi(&self) -> bool {
        matches!(self, Expr::Call { .. } | Expr::MethodCall { .. } | Expr::Vararg)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TableField {
    Positional(Expr),
    Named(String, Expr),
    Keyed(Expr, Expr),
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    IDiv,
    Mod,
    Pow,
    Concat,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::IDiv => "//",
            BinaryOp::Mod => "%",
            BinaryOp::Pow => "^",
            BinaryOp::Concat => "..",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "~=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::And => "and",
            BinaryOp::Or => "or",
        }
    }

    /// Binding power, higher binds tighter. Unary operators sit at 12.
    pub fn precedence(self) -> u8 {
        match self {
            BinaryOp::Or => 1,
            BinaryOp::And => 2,
            BinaryOp::Eq
            | BinaryOp::Ne
            | BinaryOp::Lt
            | BinaryOp::Le
            | BinaryOp::Gt
            | BinaryOp::Ge => 3,
            BinaryOp::Concat => 9,
            BinaryOp::Add | BinaryOp::Sub => 10,
            BinaryOp::Mul | BinaryOp::Div | BinaryOp::IDiv | BinaryOp::Mod => 11,
            BinaryOp::Pow => 14,
        }
    }

    pub fn is_right_assoc(self) -> bool {
        matches!(self, BinaryOp::Concat | BinaryOp::Pow)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
    Len,
}

impl UnaryOp {
    pub const PRECEDENCE: u8 = 12;

    pub fn symbol(self) -> &'static str {
        match self {
            UnaryOp::Neg => "-",
            UnaryOp::Not => "not ",
            UnaryOp::Len => "#",
        }
    }
}

/// Mark a block and every statement nested in it as owned by the VM pass.
pub fn mark_owned(block: &mut Block) {
    walk::for_each_stmt_mut(block, &mut |stmt| stmt.vm_owned = true);
}
