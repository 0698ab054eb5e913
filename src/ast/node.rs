// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! AST Node definitions

use serde::{Deserialize, Serialize};

/// Source line of a node.
///
/// Lines never take part in AST equality: two trees that differ only in
/// layout compare equal.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Line(pub usize);

impl PartialEq for Line {
    fn eq(&self, _other: &Self) -> bool {
        true
    }
}

/// Expression node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expr {
    pub kind: ExprKind,
    pub line: Line,
}

impl Expr {
    pub fn new(kind: ExprKind, line: usize) -> Self {
        Self {
            kind,
            line: Line(line),
        }
    }

    pub fn line(&self) -> usize {
        self.line.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExprKind {
    Number(f64),
    String(String),
    Bool(bool),
    Undef,
    Identifier(String),
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Ternary {
        condition: Box<Expr>,
        then_expr: Box<Expr>,
        else_expr: Box<Expr>,
    },
    Range {
        start: Box<Expr>,
        step: Option<Box<Expr>>,
        end: Box<Expr>,
    },
    Vector(Vec<Expr>),
    /// `[for (v = r, ...) if (filter) body]`
    ListComprehension {
        generators: Vec<Binding>,
        filter: Option<Box<Expr>>,
        body: Box<Expr>,
    },
    /// Spreads a list into the enclosing vector or comprehension
    Each(Box<Expr>),
    Let {
        bindings: Vec<Binding>,
        body: Box<Expr>,
    },
    Call {
        callee: Box<Expr>,
        args: Vec<Argument>,
    },
    Index {
        target: Box<Expr>,
        index: Box<Expr>,
    },
    Member {
        target: Box<Expr>,
        member: String,
    },
    FunctionLiteral {
        params: Vec<Parameter>,
        body: Box<Expr>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOp {
    Or,
    And,
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Power,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Or => "||",
            BinaryOp::And => "&&",
            BinaryOp::Equal => "==",
            BinaryOp::NotEqual => "!=",
            BinaryOp::Less => "<",
            BinaryOp::LessEqual => "<=",
            BinaryOp::Greater => ">",
            BinaryOp::GreaterEqual => ">=",
            BinaryOp::Add => "+",
            BinaryOp::Subtract => "-",
            BinaryOp::Multiply => "*",
            BinaryOp::Divide => "/",
            BinaryOp::Modulo => "%",
            BinaryOp::Power => "^",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOp {
    Negate,
    Plus,
    Not,
}

impl UnaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            UnaryOp::Negate => "-",
            UnaryOp::Plus => "+",
            UnaryOp::Not => "!",
        }
    }
}

/// `name = value` in let, for and comprehension headers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Binding {
    pub name: String,
    pub value: Expr,
}

/// Call-site argument, positional when `name` is `None`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Argument {
    pub name: Option<String>,
    pub value: Expr,
}

/// Declared parameter with optional default
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    pub default: Option<Expr>,
}

/// Statement node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stmt {
    pub kind: StmtKind,
    pub line: Line,
}

impl Stmt {
    pub fn new(kind: StmtKind, line: usize) -> Self {
        Self {
            kind,
            line: Line(line),
        }
    }

    pub fn line(&self) -> usize {
        self.line.0
    }

    /// Whether this statement counts as a child for `children()` and `$children`
    pub fn is_instantiation(&self) -> bool {
        match &self.kind {
            StmtKind::Assignment { .. }
            | StmtKind::FunctionDecl(_)
            | StmtKind::ModuleDecl(_) => false,
            StmtKind::Import { kind, .. } => *kind == ImportKind::Geometry,
            _ => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StmtKind {
    Assignment {
        name: String,
        value: Expr,
    },
    FunctionDecl(FunctionDecl),
    ModuleDecl(ModuleDecl),
    ModuleCall(ModuleCall),
    If {
        condition: Expr,
        then_branch: Vec<Stmt>,
        /// Empty when there is no `else`
        else_branch: Vec<Stmt>,
    },
    For {
        bindings: Vec<Binding>,
        body: Vec<Stmt>,
    },
    Let {
        bindings: Vec<Binding>,
        body: Vec<Stmt>,
    },
    Block(Vec<Stmt>),
    Import {
        kind: ImportKind,
        path: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDecl {
    pub name: String,
    pub params: Vec<Parameter>,
    pub body: Expr,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleDecl {
    pub name: String,
    pub params: Vec<Parameter>,
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleCall {
    pub name: String,
    pub args: Vec<Argument>,
    pub modifier: Option<Modifier>,
    pub children: Vec<Stmt>,
}

/// Modifier character prefixing a module instantiation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Modifier {
    /// `*` skips the subtree
    Disable,
    /// `!` replaces the program output with this subtree
    RootOnly,
    /// `#` highlights the result
    Highlight,
    /// `%` renders the result as background
    Background,
}

impl Modifier {
    pub fn symbol(self) -> char {
        match self {
            Modifier::Disable => '*',
            Modifier::RootOnly => '!',
            Modifier::Highlight => '#',
            Modifier::Background => '%',
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImportKind {
    /// `include <path>`: the library's statements run in place
    Include,
    /// `use <path>`: only the library's functions and modules are imported
    Use,
    /// `import("path")`: mesh data handed to the geometry backend
    Geometry,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lines_ignored_by_equality() {
        let a = Expr::new(ExprKind::Number(1.0), 1);
        let b = Expr::new(ExprKind::Number(1.0), 42);
        assert_eq!(a, b);
        assert_ne!(a, Expr::new(ExprKind::Number(2.0), 1));
    }

    #[test]
    fn test_instantiation_classification() {
        let assign = Stmt::new(
            StmtKind::Assignment {
                name: "x".into(),
                value: Expr::new(ExprKind::Number(1.0), 1),
            },
            1,
        );
        let call = Stmt::new(
            StmtKind::ModuleCall(ModuleCall {
                name: "cube".into(),
                args: vec![],
                modifier: None,
                children: vec![],
            }),
            1,
        );
        let used = Stmt::new(
            StmtKind::Import {
                kind: ImportKind::Use,
                path: "lib.scad".into(),
            },
            1,
        );
        assert!(!assign.is_instantiation());
        assert!(call.is_instantiation());
        assert!(!used.is_instantiation());
    }
}
