#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Position {
    pub line: usize,
    pub column: usize,
}

impl Position {
    pub fn new(line: usize, column: usize) -> Self {
        Self { line, column }
    }
}

#[derive(Debug, Clone)]
pub struct ObjectProperty {
    pub key: String,
    pub value: Expr,
}

#[derive(Debug, Clone)]
pub enum Expr {
    Number {
        pos: Position,
        value: f64,
    },
    Str {
        pos: Position,
        value: String,
    },
    Bool {
        pos: Position,
        value: bool,
    },
    /// `null` and `undefined` both land here.
    Null {
        pos: Position,
    },
    Ident {
        pos: Position,
        name: String,
    },
    Array {
        pos: Position,
        elements: Vec<Expr>,
    },
    Object {
        pos: Position,
        properties: Vec<ObjectProperty>,
    },
    /// Arrow functions and `function` expressions; an arrow with an
    /// expression body is stored as a single-return block body.
    Function {
        pos: Position,
        params: Vec<String>,
        body: Vec<Stmt>,
        is_async: bool,
    },
    Unary {
        pos: Position,
        op: String,
        operand: Box<Expr>,
    },
    Update {
        pos: Position,
        op: String,
        prefix: bool,
        target: Box<Expr>,
    },
    Binary {
        pos: Position,
        op: String,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Assign {
        pos: Position,
        op: String,
        target: Box<Expr>,
        value: Box<Expr>,
    },
    Call {
        pos: Position,
        callee: Box<Expr>,
        args: Vec<Expr>,
    },
    New {
        pos: Position,
        callee: Box<Expr>,
        args: Vec<Expr>,
    },
    /// Dot access, plus computed access whose index is a string literal
    /// (`obj["p"]` is normalized to `obj.p` at parse time).
    Member {
        pos: Position,
        object: Box<Expr>,
        property: String,
    },
    /// Computed access with a non-literal index, e.g. `arr[i]`.
    Index {
        pos: Position,
        object: Box<Expr>,
        index: Box<Expr>,
    },
    Await {
        pos: Position,
        operand: Box<Expr>,
    },
}

impl Expr {
    pub fn pos(&self) -> Position {
        match self {
            Expr::Number { pos, .. }
            | Expr::Str { pos, .. }
            | Expr::Bool { pos, .. }
            | Expr::Null { pos }
            | Expr::Ident { pos, .. }
            | Expr::Array { pos, .. }
            | Expr::Object { pos, .. }
            | Expr::Function { pos, .. }
            | Expr::Unary { pos, .. }
            | Expr::Update { pos, .. }
            | Expr::Binary { pos, .. }
            | Expr::Assign { pos, .. }
            | Expr::Call { pos, .. }
            | Expr::New { pos, .. }
            | Expr::Member { pos, .. }
            | Expr::Index { pos, .. }
            | Expr::Await { pos, .. } => *pos,
        }
    }
}

#[derive(Debug, Clone)]
pub enum Stmt {
    VarDecl {
        pos: Position,
        kind: String,
        name: String,
        init: Option<Expr>,
    },
    Expr {
        pos: Position,
        expr: Expr,
    },
    If {
        pos: Position,
        test: Expr,
        consequent: Vec<Stmt>,
        alternate: Vec<Stmt>,
    },
    While {
        pos: Position,
        test: Expr,
        body: Vec<Stmt>,
    },
    For {
        pos: Position,
        init: Option<Box<Stmt>>,
        test: Option<Expr>,
        update: Option<Expr>,
        body: Vec<Stmt>,
    },
    Block {
        pos: Position,
        body: Vec<Stmt>,
    },
    FunctionDecl {
        pos: Position,
        name: String,
        params: Vec<String>,
        body: Vec<Stmt>,
        is_async: bool,
    },
    Return {
        pos: Position,
        value: Option<Expr>,
    },
    Empty {
        pos: Position,
    },
}

impl Stmt {
    pub fn pos(&self) -> Position {
        match self {
            Stmt::VarDecl { pos, .. }
            | Stmt::Expr { pos, .. }
            | Stmt::If { pos, .. }
            | Stmt::While { pos, .. }
            | Stmt::For { pos, .. }
            | Stmt::Block { pos, .. }
            | Stmt::FunctionDecl { pos, .. }
            | Stmt::Return { pos, .. }
            | Stmt::Empty { pos } => *pos,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Program {
    pub pos: Position,
    pub body: Vec<Stmt>,
}
