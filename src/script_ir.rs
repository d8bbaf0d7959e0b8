//! Owned intermediate representation of build scripts and template
//! expressions.
//!
//! The oxc AST lives in an arena that dies with the parse; closures stored in
//! the binding environment outlive it, so scripts are lowered into this tree
//! (see `lower.rs`) before they run.

use oxc_syntax::operator::{
    AssignmentOperator, BinaryOperator, LogicalOperator, UnaryOperator, UpdateOperator,
};
use std::rc::Rc;

use crate::value::Value;

pub type Name = Rc<str>;

#[derive(Debug)]
pub enum Expr {
    /// Primitive literal (never an array/object).
    Literal(Value),
    Template {
        quasis: Vec<String>,
        exprs: Vec<Expr>,
    },
    Ident(Name),
    This,
    Array(Vec<ArrayItem>),
    Object(Vec<ObjectItem>),
    Function(Rc<FunctionDef>),
    Class(Rc<ClassDef>),
    Unary(UnaryOperator, Box<Expr>),
    Update {
        op: UpdateOperator,
        prefix: bool,
        target: Box<Target>,
    },
    Binary(BinaryOperator, Box<Expr>, Box<Expr>),
    Logical(LogicalOperator, Box<Expr>, Box<Expr>),
    Assign {
        op: AssignmentOperator,
        target: Box<Target>,
        value: Box<Expr>,
    },
    Conditional {
        test: Box<Expr>,
        consequent: Box<Expr>,
        alternate: Box<Expr>,
    },
    Member {
        object: Box<Expr>,
        property: Box<Property>,
        optional: bool,
    },
    Call {
        callee: Box<Expr>,
        args: Vec<ArrayItem>,
        optional: bool,
    },
    New {
        callee: Box<Expr>,
        args: Vec<ArrayItem>,
    },
    /// Boundary of an optional chain: a short-circuit anywhere inside
    /// yields `undefined` here.
    Chain(Box<Expr>),
    Sequence(Vec<Expr>),
    Await(Box<Expr>),
    /// A module record pre-loaded before the script started.
    LoadModule(Name),
    /// `import(expr)` with a non-literal specifier.
    DynamicImport(Box<Expr>),
}

#[derive(Debug)]
pub enum Property {
    Static(Name),
    Computed(Expr),
}

#[derive(Debug)]
pub enum PropertyKey {
    Static(Name),
    Computed(Expr),
}

#[derive(Debug)]
pub enum ArrayItem {
    Item(Expr),
    Spread(Expr),
    Hole,
}

#[derive(Debug)]
pub enum ObjectItem {
    Property { key: PropertyKey, value: Expr },
    Spread(Expr),
}

#[derive(Debug)]
pub enum Target {
    Ident(Name),
    Member { object: Expr, property: Property },
    Pattern(Pattern),
}

#[derive(Debug)]
pub enum Pattern {
    Ident(Name),
    /// Only produced by assignment destructuring (`[a.b] = list`).
    Member { object: Box<Expr>, property: Box<Property> },
    Object {
        props: Vec<(PropertyKey, Pattern)>,
        rest: Option<Box<Pattern>>,
    },
    Array {
        items: Vec<Option<Pattern>>,
        rest: Option<Box<Pattern>>,
    },
    Default {
        pattern: Box<Pattern>,
        default: Box<Expr>,
    },
}

impl Pattern {
    /// Every identifier the pattern binds, in source order.
    pub fn bound_names(&self, out: &mut Vec<Name>) {
        match self {
            Pattern::Ident(name) => out.push(name.clone()),
            Pattern::Member { .. } => {}
            Pattern::Object { props, rest } => {
                for (_, p) in props {
                    p.bound_names(out);
                }
                if let Some(rest) = rest {
                    rest.bound_names(out);
                }
            }
            Pattern::Array { items, rest } => {
                for p in items.iter().flatten() {
                    p.bound_names(out);
                }
                if let Some(rest) = rest {
                    rest.bound_names(out);
                }
            }
            Pattern::Default { pattern, .. } => pattern.bound_names(out),
        }
    }
}

#[derive(Debug)]
pub struct FunctionDef {
    pub name: Option<Name>,
    pub params: Vec<Pattern>,
    pub rest: Option<Pattern>,
    pub body: FunctionBody,
    pub is_arrow: bool,
}

#[derive(Debug)]
pub enum FunctionBody {
    Expr(Box<Expr>),
    Block(Vec<Stmt>),
}

#[derive(Debug)]
pub struct ClassDef {
    pub name: Option<Name>,
    pub constructor: Option<Rc<FunctionDef>>,
    pub methods: Vec<(Name, Rc<FunctionDef>)>,
    pub static_methods: Vec<(Name, Rc<FunctionDef>)>,
    pub fields: Vec<(Name, Option<Expr>)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeclKind {
    Var,
    Let,
    Const,
}

impl DeclKind {
    pub fn is_const(self) -> bool {
        self == DeclKind::Const
    }
}

#[derive(Debug)]
pub struct Declarator {
    pub pattern: Pattern,
    pub init: Option<Expr>,
}

#[derive(Debug)]
pub enum ForInit {
    Declare(Box<Stmt>),
    Expr(Expr),
}

#[derive(Debug)]
pub enum ForBinding {
    Declare(DeclKind, Pattern),
    Assign(Pattern),
}

#[derive(Debug)]
pub struct SwitchCase {
    pub test: Option<Expr>,
    pub body: Vec<Stmt>,
}

#[derive(Debug)]
pub enum Stmt {
    Empty,
    Expr(Expr),
    Declare {
        kind: DeclKind,
        decls: Vec<Declarator>,
    },
    Function(Rc<FunctionDef>),
    Class(Rc<ClassDef>),
    Return(Option<Expr>),
    If {
        test: Expr,
        consequent: Box<Stmt>,
        alternate: Option<Box<Stmt>>,
    },
    Block(Vec<Stmt>),
    For {
        init: Option<ForInit>,
        test: Option<Expr>,
        update: Option<Expr>,
        body: Box<Stmt>,
    },
    ForOf {
        left: ForBinding,
        right: Expr,
        body: Box<Stmt>,
    },
    ForIn {
        left: ForBinding,
        right: Expr,
        body: Box<Stmt>,
    },
    While {
        test: Expr,
        body: Box<Stmt>,
    },
    DoWhile {
        body: Box<Stmt>,
        test: Expr,
    },
    Break(Option<Name>),
    Continue(Option<Name>),
    Labeled {
        label: Name,
        body: Box<Stmt>,
    },
    Throw(Expr),
    Try {
        block: Vec<Stmt>,
        param: Option<Pattern>,
        handler: Option<Vec<Stmt>>,
        finalizer: Option<Vec<Stmt>>,
    },
    Switch {
        discriminant: Expr,
        cases: Vec<SwitchCase>,
    },
}

/// Pairs a script-local binding with the name it is exported under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicAlias {
    pub local: String,
    pub exported: String,
}
