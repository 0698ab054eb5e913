// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Recursive descent parser
//!
//! Expression precedence, lowest first: `let`/function literal, ternary,
//! `||`, `&&`, equality, relational, additive, multiplicative, unary, `^`,
//! postfix (call, index, member), primary.

use super::lexer::tokenize;
use super::token::{Token, TokenKind};
use crate::ast::{
    Argument, BinaryOp, Binding, Expr, ExprKind, FunctionDecl, ImportKind, Modifier, ModuleCall,
    ModuleDecl, Parameter, Stmt, StmtKind, UnaryOp,
};
use thiserror::Error;

/// Grammar violation at a token
#[derive(Debug, Clone, PartialEq, Error)]
#[error("line {line}, column {column}: expected {expected}, found {found}")]
pub struct ParseError {
    pub line: usize,
    pub column: usize,
    pub expected: String,
    pub found: String,
}

pub type ParseResult<T> = Result<T, ParseError>;

/// Deepest statement and expression nesting the parser accepts
pub const MAX_NESTING_DEPTH: usize = 512;

static EOF_TOKEN: Token = Token {
    kind: TokenKind::Eof,
    lexeme: String::new(),
    line: 0,
    column: 0,
};

/// Parse a token stream into a list of top-level statements
pub fn parse(tokens: &[Token]) -> ParseResult<Vec<Stmt>> {
    Parser::new(tokens).parse_program()
}

/// Parse a token stream holding exactly one expression
pub fn parse_expression(tokens: &[Token]) -> ParseResult<Expr> {
    let mut parser = Parser::new(tokens);
    let expr = parser.parse_expr()?;
    if !parser.at_end() {
        return Err(parser.error("end of expression"));
    }
    Ok(expr)
}

/// Tokenize and parse source code in one step
pub fn parse_scad(source: &str) -> Result<Vec<Stmt>, crate::Error> {
    let tokens = tokenize(source)?;
    Ok(parse(&tokens)?)
}

struct Parser<'t> {
    tokens: &'t [Token],
    pos: usize,
    depth: usize,
}

impl<'t> Parser<'t> {
    fn new(tokens: &'t [Token]) -> Self {
        Self {
            tokens,
            pos: 0,
            depth: 0,
        }
    }

    // =========================================================================
    // Token navigation
    // =========================================================================

    fn peek(&self) -> &'t Token {
        self.peek_nth(0)
    }

    fn peek_nth(&self, n: usize) -> &'t Token {
        let tokens: &'t [Token] = self.tokens;
        tokens
            .get(self.pos + n)
            .or_else(|| tokens.last())
            .unwrap_or(&EOF_TOKEN)
    }

    fn at_end(&self) -> bool {
        self.peek().kind == TokenKind::Eof
    }

    fn advance(&mut self) -> &'t Token {
        let token = self.peek();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        token
    }

    fn check(&self, kind: &TokenKind) -> bool {
        &self.peek().kind == kind
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: TokenKind, expected: &str) -> ParseResult<&'t Token> {
        if self.check(&kind) {
            Ok(self.advance())
        } else {
            Err(self.error(expected))
        }
    }

    fn expect_ident(&mut self, expected: &str) -> ParseResult<String> {
        match &self.peek().kind {
            TokenKind::Ident(name) => {
                self.advance();
                Ok(name.clone())
            }
            _ => Err(self.error(expected)),
        }
    }

    fn error(&self, expected: &str) -> ParseError {
        let token = self.peek();
        ParseError {
            line: token.line,
            column: token.column,
            expected: expected.to_string(),
            found: token.kind.describe(),
        }
    }

    /// Enter one nesting level; callers restore `depth` when they return
    fn nest(&mut self) -> ParseResult<()> {
        if self.depth >= MAX_NESTING_DEPTH {
            return Err(self.error(&format!(
                "at most {} levels of nesting",
                MAX_NESTING_DEPTH
            )));
        }
        self.depth += 1;
        Ok(())
    }

    fn nested<T>(&mut self, parse: fn(&mut Self) -> ParseResult<T>) -> ParseResult<T> {
        self.nest()?;
        let result = parse(self);
        self.depth -= 1;
        result
    }

    // =========================================================================
    // Statements
    // =========================================================================

    fn parse_program(&mut self) -> ParseResult<Vec<Stmt>> {
        let mut statements = Vec::new();
        while !self.at_end() {
            if let Some(stmt) = self.parse_statement()? {
                statements.push(stmt);
            }
        }
        Ok(statements)
    }

    fn parse_statement(&mut self) -> ParseResult<Option<Stmt>> {
        self.nested(Self::parse_statement_kind)
    }

    fn parse_statement_kind(&mut self) -> ParseResult<Option<Stmt>> {
        let token = self.peek();
        let line = token.line;

        let stmt = match &token.kind {
            TokenKind::Semi => {
                self.advance();
                return Ok(None);
            }
            TokenKind::LBrace => {
                self.advance();
                let body = self.parse_block_body()?;
                Stmt::new(StmtKind::Block(body), line)
            }
            TokenKind::Module => self.parse_module_decl()?,
            TokenKind::Function => self.parse_function_decl()?,
            TokenKind::Include | TokenKind::Use => self.parse_directive()?,
            TokenKind::Import => self.parse_import()?,
            TokenKind::If => self.parse_if()?,
            TokenKind::For => self.parse_for()?,
            TokenKind::Let => self.parse_let_statement()?,
            TokenKind::Ident(_) if self.peek_nth(1).kind == TokenKind::Eq => {
                self.parse_assignment()?
            }
            TokenKind::Ident(_) => self.parse_module_call(None)?,
            TokenKind::Bang | TokenKind::Hash | TokenKind::Percent | TokenKind::Star => {
                let modifier = match self.advance().kind {
                    TokenKind::Bang => Modifier::RootOnly,
                    TokenKind::Hash => Modifier::Highlight,
                    TokenKind::Percent => Modifier::Background,
                    _ => Modifier::Disable,
                };
                if !matches!(self.peek().kind, TokenKind::Ident(_)) {
                    return Err(self.error("module instantiation after modifier"));
                }
                self.parse_module_call(Some(modifier))?
            }
            _ => return Err(self.error("statement")),
        };

        Ok(Some(stmt))
    }

    /// Statements up to and including the closing brace
    fn parse_block_body(&mut self) -> ParseResult<Vec<Stmt>> {
        let mut statements = Vec::new();
        while !self.check(&TokenKind::RBrace) {
            if self.at_end() {
                return Err(self.error("'}'"));
            }
            if let Some(stmt) = self.parse_statement()? {
                statements.push(stmt);
            }
        }
        self.advance();
        Ok(statements)
    }

    /// Body of a module, control statement or instantiation: `;`, a block,
    /// or a single statement
    fn parse_child(&mut self) -> ParseResult<Vec<Stmt>> {
        if self.eat(&TokenKind::Semi) {
            return Ok(Vec::new());
        }
        if self.eat(&TokenKind::LBrace) {
            return self.parse_block_body();
        }
        Ok(self.parse_statement()?.into_iter().collect())
    }

    fn parse_assignment(&mut self) -> ParseResult<Stmt> {
        let line = self.peek().line;
        let name = self.expect_ident("variable name")?;
        self.expect(TokenKind::Eq, "'='")?;
        let value = self.parse_expr()?;
        self.expect(TokenKind::Semi, "';' after assignment")?;
        Ok(Stmt::new(StmtKind::Assignment { name, value }, line))
    }

    fn parse_module_decl(&mut self) -> ParseResult<Stmt> {
        let line = self.advance().line;
        let name = self.expect_ident("module name")?;
        let params = self.parse_parameters()?;
        let body = self.parse_child()?;
        Ok(Stmt::new(
            StmtKind::ModuleDecl(ModuleDecl { name, params, body }),
            line,
        ))
    }

    fn parse_function_decl(&mut self) -> ParseResult<Stmt> {
        let line = self.advance().line;
        let name = self.expect_ident("function name")?;
        let params = self.parse_parameters()?;
        self.expect(TokenKind::Eq, "'=' before function body")?;
        let body = self.parse_expr()?;
        self.expect(TokenKind::Semi, "';' after function body")?;
        Ok(Stmt::new(
            StmtKind::FunctionDecl(FunctionDecl { name, params, body }),
            line,
        ))
    }

    fn parse_directive(&mut self) -> ParseResult<Stmt> {
        let token = self.advance();
        let kind = if token.kind == TokenKind::Include {
            ImportKind::Include
        } else {
            ImportKind::Use
        };
        let path = match &self.peek().kind {
            TokenKind::Path(path) => path.clone(),
            _ => return Err(self.error("library path in angle brackets")),
        };
        self.advance();
        self.eat(&TokenKind::Semi);
        Ok(Stmt::new(StmtKind::Import { kind, path }, token.line))
    }

    fn parse_import(&mut self) -> ParseResult<Stmt> {
        let line = self.advance().line;
        let open = self.peek();
        let args = self.parse_arguments()?;
        self.expect(TokenKind::Semi, "';' after import")?;

        let path = args
            .iter()
            .find(|arg| arg.name.as_deref() == Some("file"))
            .or_else(|| args.iter().find(|arg| arg.name.is_none()))
            .and_then(|arg| match &arg.value.kind {
                ExprKind::String(path) => Some(path.clone()),
                _ => None,
            });

        match path {
            Some(path) => Ok(Stmt::new(
                StmtKind::Import {
                    kind: ImportKind::Geometry,
                    path,
                },
                line,
            )),
            None => Err(ParseError {
                line: open.line,
                column: open.column,
                expected: "string literal file path".to_string(),
                found: "non-literal import arguments".to_string(),
            }),
        }
    }

    fn parse_if(&mut self) -> ParseResult<Stmt> {
        let line = self.advance().line;
        self.expect(TokenKind::LParen, "'(' after if")?;
        let condition = self.parse_expr()?;
        self.expect(TokenKind::RParen, "')' after condition")?;
        let then_branch = self.parse_child()?;
        let else_branch = if self.eat(&TokenKind::Else) {
            self.parse_child()?
        } else {
            Vec::new()
        };
        Ok(Stmt::new(
            StmtKind::If {
                condition,
                then_branch,
                else_branch,
            },
            line,
        ))
    }

    fn parse_for(&mut self) -> ParseResult<Stmt> {
        let line = self.advance().line;
        let bindings = self.parse_bindings(true)?;
        let body = self.parse_child()?;
        Ok(Stmt::new(StmtKind::For { bindings, body }, line))
    }

    fn parse_let_statement(&mut self) -> ParseResult<Stmt> {
        let line = self.advance().line;
        let bindings = self.parse_bindings(false)?;
        let body = self.parse_child()?;
        Ok(Stmt::new(StmtKind::Let { bindings, body }, line))
    }

    fn parse_module_call(&mut self, modifier: Option<Modifier>) -> ParseResult<Stmt> {
        let line = self.peek().line;
        let name = self.expect_ident("module name")?;
        let args = self.parse_arguments()?;
        let children = self.parse_child()?;
        Ok(Stmt::new(
            StmtKind::ModuleCall(ModuleCall {
                name,
                args,
                modifier,
                children,
            }),
            line,
        ))
    }

    // =========================================================================
    // Parameter and argument lists
    // =========================================================================

    fn parse_parameters(&mut self) -> ParseResult<Vec<Parameter>> {
        self.expect(TokenKind::LParen, "'(' before parameters")?;
        let mut params = Vec::new();
        while !self.eat(&TokenKind::RParen) {
            let name = self.expect_ident("parameter name")?;
            let default = if self.eat(&TokenKind::Eq) {
                Some(self.parse_expr()?)
            } else {
                None
            };
            params.push(Parameter { name, default });
            if !self.eat(&TokenKind::Comma) {
                self.expect(TokenKind::RParen, "',' or ')' in parameter list")?;
                break;
            }
        }
        Ok(params)
    }

    fn parse_arguments(&mut self) -> ParseResult<Vec<Argument>> {
        self.expect(TokenKind::LParen, "'(' before arguments")?;
        let mut args = Vec::new();
        while !self.eat(&TokenKind::RParen) {
            let named = matches!(self.peek().kind, TokenKind::Ident(_))
                && self.peek_nth(1).kind == TokenKind::Eq;
            let name = if named {
                let name = self.expect_ident("argument name")?;
                self.advance();
                Some(name)
            } else {
                None
            };
            let value = self.parse_expr()?;
            args.push(Argument { name, value });
            if !self.eat(&TokenKind::Comma) {
                self.expect(TokenKind::RParen, "',' or ')' in argument list")?;
                break;
            }
        }
        Ok(args)
    }

    /// `(name = expr, ...)`; generator headers need at least one binding
    fn parse_bindings(&mut self, non_empty: bool) -> ParseResult<Vec<Binding>> {
        self.expect(TokenKind::LParen, "'('")?;
        let mut bindings = Vec::new();
        while !self.eat(&TokenKind::RParen) {
            let name = self.expect_ident("variable name")?;
            self.expect(TokenKind::Eq, "'=' in binding")?;
            let value = self.parse_expr()?;
            bindings.push(Binding { name, value });
            if !self.eat(&TokenKind::Comma) {
                self.expect(TokenKind::RParen, "',' or ')' in bindings")?;
                break;
            }
        }
        if non_empty && bindings.is_empty() {
            return Err(self.error("at least one loop variable"));
        }
        Ok(bindings)
    }

    // =========================================================================
    // Expressions
    // =========================================================================

    fn parse_expr(&mut self) -> ParseResult<Expr> {
        self.nested(Self::parse_expr_kind)
    }

    fn parse_expr_kind(&mut self) -> ParseResult<Expr> {
        let line = self.peek().line;
        match self.peek().kind {
            TokenKind::Let => {
                self.advance();
                let bindings = self.parse_bindings(false)?;
                let body = self.parse_expr()?;
                Ok(Expr::new(
                    ExprKind::Let {
                        bindings,
                        body: Box::new(body),
                    },
                    line,
                ))
            }
            TokenKind::Function => {
                self.advance();
                let params = self.parse_parameters()?;
                let body = self.parse_expr()?;
                Ok(Expr::new(
                    ExprKind::FunctionLiteral {
                        params,
                        body: Box::new(body),
                    },
                    line,
                ))
            }
            _ => self.parse_ternary(),
        }
    }

    fn parse_ternary(&mut self) -> ParseResult<Expr> {
        let condition = self.parse_logical_or()?;
        if !self.eat(&TokenKind::Question) {
            return Ok(condition);
        }
        let then_expr = self.parse_expr()?;
        self.expect(TokenKind::Colon, "':' in conditional expression")?;
        let else_expr = self.parse_expr()?;
        let line = condition.line();
        Ok(Expr::new(
            ExprKind::Ternary {
                condition: Box::new(condition),
                then_expr: Box::new(then_expr),
                else_expr: Box::new(else_expr),
            },
            line,
        ))
    }

    /// One left-associative binary precedence level
    fn parse_binary_level(
        &mut self,
        operand: fn(&mut Self) -> ParseResult<Expr>,
        operator: fn(&TokenKind) -> Option<BinaryOp>,
    ) -> ParseResult<Expr> {
        let depth = self.depth;
        let mut left = operand(self)?;
        while let Some(op) = operator(&self.peek().kind) {
            // each operator deepens the left-leaning tree
            self.nest()?;
            self.advance();
            let right = operand(self)?;
            let line = left.line();
            left = Expr::new(
                ExprKind::Binary {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                line,
            );
        }
        self.depth = depth;
        Ok(left)
    }

    fn parse_logical_or(&mut self) -> ParseResult<Expr> {
        self.parse_binary_level(Self::parse_logical_and, |kind| match kind {
            TokenKind::PipePipe => Some(BinaryOp::Or),
            _ => None,
        })
    }

    fn parse_logical_and(&mut self) -> ParseResult<Expr> {
        self.parse_binary_level(Self::parse_equality, |kind| match kind {
            TokenKind::AmpAmp => Some(BinaryOp::And),
            _ => None,
        })
    }

    fn parse_equality(&mut self) -> ParseResult<Expr> {
        self.parse_binary_level(Self::parse_relational, |kind| match kind {
            TokenKind::EqEq => Some(BinaryOp::Equal),
            TokenKind::BangEq => Some(BinaryOp::NotEqual),
            _ => None,
        })
    }

    fn parse_relational(&mut self) -> ParseResult<Expr> {
        self.parse_binary_level(Self::parse_additive, |kind| match kind {
            TokenKind::Lt => Some(BinaryOp::Less),
            TokenKind::LtEq => Some(BinaryOp::LessEqual),
            TokenKind::Gt => Some(BinaryOp::Greater),
            TokenKind::GtEq => Some(BinaryOp::GreaterEqual),
            _ => None,
        })
    }

    fn parse_additive(&mut self) -> ParseResult<Expr> {
        self.parse_binary_level(Self::parse_multiplicative, |kind| match kind {
            TokenKind::Plus => Some(BinaryOp::Add),
            TokenKind::Minus => Some(BinaryOp::Subtract),
            _ => None,
        })
    }

    fn parse_multiplicative(&mut self) -> ParseResult<Expr> {
        self.parse_binary_level(Self::parse_unary, |kind| match kind {
            TokenKind::Star => Some(BinaryOp::Multiply),
            TokenKind::Slash => Some(BinaryOp::Divide),
            TokenKind::Percent => Some(BinaryOp::Modulo),
            _ => None,
        })
    }

    fn parse_unary(&mut self) -> ParseResult<Expr> {
        let token = self.peek();
        let op = match token.kind {
            TokenKind::Minus => UnaryOp::Negate,
            TokenKind::Plus => UnaryOp::Plus,
            TokenKind::Bang => UnaryOp::Not,
            _ => return self.parse_power(),
        };
        self.advance();
        let operand = self.nested(Self::parse_unary)?;
        Ok(Expr::new(
            ExprKind::Unary {
                op,
                operand: Box::new(operand),
            },
            token.line,
        ))
    }

    /// `^` is right-associative and binds tighter than unary minus
    fn parse_power(&mut self) -> ParseResult<Expr> {
        let base = self.parse_postfix()?;
        if !self.eat(&TokenKind::Caret) {
            return Ok(base);
        }
        let exponent = self.nested(Self::parse_unary)?;
        let line = base.line();
        Ok(Expr::new(
            ExprKind::Binary {
                op: BinaryOp::Power,
                left: Box::new(base),
                right: Box::new(exponent),
            },
            line,
        ))
    }

    fn parse_postfix(&mut self) -> ParseResult<Expr> {
        let depth = self.depth;
        let mut expr = self.parse_primary()?;
        loop {
            let line = expr.line();
            if matches!(
                self.peek().kind,
                TokenKind::LParen | TokenKind::LBracket | TokenKind::Dot
            ) {
                self.nest()?;
            }
            match self.peek().kind {
                TokenKind::LParen => {
                    let args = self.parse_arguments()?;
                    expr = Expr::new(
                        ExprKind::Call {
                            callee: Box::new(expr),
                            args,
                        },
                        line,
                    );
                }
                TokenKind::LBracket => {
                    self.advance();
                    let index = self.parse_expr()?;
                    self.expect(TokenKind::RBracket, "']' after index")?;
                    expr = Expr::new(
                        ExprKind::Index {
                            target: Box::new(expr),
                            index: Box::new(index),
                        },
                        line,
                    );
                }
                TokenKind::Dot => {
                    self.advance();
                    let member = self.expect_ident("member name after '.'")?;
                    expr = Expr::new(
                        ExprKind::Member {
                            target: Box::new(expr),
                            member,
                        },
                        line,
                    );
                }
                _ => {
                    self.depth = depth;
                    return Ok(expr);
                }
            }
        }
    }

    fn parse_primary(&mut self) -> ParseResult<Expr> {
        let token = self.peek();
        let line = token.line;
        let kind = match &token.kind {
            TokenKind::Number(n) => ExprKind::Number(*n),
            TokenKind::String(s) => ExprKind::String(s.clone()),
            TokenKind::True => ExprKind::Bool(true),
            TokenKind::False => ExprKind::Bool(false),
            TokenKind::Undef => ExprKind::Undef,
            TokenKind::Ident(name) => ExprKind::Identifier(name.clone()),
            TokenKind::LParen => {
                self.advance();
                let inner = self.parse_expr()?;
                self.expect(TokenKind::RParen, "')'")?;
                return Ok(inner);
            }
            TokenKind::LBracket => {
                self.advance();
                return self.parse_bracketed(line);
            }
            _ => return Err(self.error("expression")),
        };
        self.advance();
        Ok(Expr::new(kind, line))
    }

    /// Vector literal, range or list comprehension, after the opening `[`
    fn parse_bracketed(&mut self, line: usize) -> ParseResult<Expr> {
        if self.eat(&TokenKind::RBracket) {
            return Ok(Expr::new(ExprKind::Vector(Vec::new()), line));
        }

        let first = match self.peek().kind {
            TokenKind::For => {
                let comprehension = self.parse_comprehension()?;
                if self.eat(&TokenKind::RBracket) {
                    return Ok(comprehension);
                }
                let line = comprehension.line();
                Expr::new(ExprKind::Each(Box::new(comprehension)), line)
            }
            TokenKind::If | TokenKind::Each | TokenKind::Let => self.parse_list_element()?,
            _ => {
                let first = self.parse_expr()?;
                if self.eat(&TokenKind::Colon) {
                    return self.parse_range(first, line);
                }
                first
            }
        };

        let mut elements = vec![first];
        while self.eat(&TokenKind::Comma) {
            if self.check(&TokenKind::RBracket) {
                break;
            }
            elements.push(self.parse_list_element()?);
        }
        self.expect(TokenKind::RBracket, "',' or ']' in vector")?;
        Ok(Expr::new(ExprKind::Vector(elements), line))
    }

    fn parse_range(&mut self, start: Expr, line: usize) -> ParseResult<Expr> {
        let second = self.parse_expr()?;
        let (step, end) = if self.eat(&TokenKind::Colon) {
            (Some(Box::new(second)), self.parse_expr()?)
        } else {
            (None, second)
        };
        self.expect(TokenKind::RBracket, "']' after range")?;
        Ok(Expr::new(
            ExprKind::Range {
                start: Box::new(start),
                step,
                end: Box::new(end),
            },
            line,
        ))
    }

    /// Element of a vector or body of a comprehension. Generator forms come
    /// back wrapped in `Each` so the caller spreads them.
    fn parse_list_element(&mut self) -> ParseResult<Expr> {
        self.nested(Self::parse_list_element_kind)
    }

    fn parse_list_element_kind(&mut self) -> ParseResult<Expr> {
        let line = self.peek().line;
        match self.peek().kind {
            TokenKind::For => {
                let comprehension = self.parse_comprehension()?;
                Ok(Expr::new(ExprKind::Each(Box::new(comprehension)), line))
            }
            TokenKind::Each => {
                self.advance();
                let inner = self.parse_expr()?;
                Ok(Expr::new(ExprKind::Each(Box::new(inner)), line))
            }
            TokenKind::If => {
                let (condition, then_expr, else_expr) = self.parse_list_condition()?;
                let kind = match else_expr {
                    Some(else_expr) => ExprKind::Ternary {
                        condition: Box::new(condition),
                        then_expr: Box::new(then_expr),
                        else_expr: Box::new(else_expr),
                    },
                    None => ExprKind::Each(Box::new(Expr::new(
                        ExprKind::ListComprehension {
                            generators: Vec::new(),
                            filter: Some(Box::new(condition)),
                            body: Box::new(then_expr),
                        },
                        line,
                    ))),
                };
                Ok(Expr::new(kind, line))
            }
            // `let` binds for the rest of the element, which may itself be a
            // generator form
            TokenKind::Let => {
                self.advance();
                let bindings = self.parse_bindings(false)?;
                let body = self.parse_list_element()?;
                Ok(Expr::new(
                    ExprKind::Let {
                        bindings,
                        body: Box::new(body),
                    },
                    line,
                ))
            }
            _ => self.parse_expr(),
        }
    }

    /// `if (cond) element [else element]`
    fn parse_list_condition(&mut self) -> ParseResult<(Expr, Expr, Option<Expr>)> {
        self.expect(TokenKind::If, "'if'")?;
        self.expect(TokenKind::LParen, "'(' after if")?;
        let condition = self.parse_expr()?;
        self.expect(TokenKind::RParen, "')' after condition")?;
        let then_expr = self.parse_list_element()?;
        let else_expr = if self.eat(&TokenKind::Else) {
            Some(self.parse_list_element()?)
        } else {
            None
        };
        Ok((condition, then_expr, else_expr))
    }

    /// `for (v = r, ...) [if (cond)] body`
    fn parse_comprehension(&mut self) -> ParseResult<Expr> {
        let line = self.expect(TokenKind::For, "'for'")?.line;
        let generators = self.parse_bindings(true)?;

        let (filter, body) = if self.check(&TokenKind::If) {
            let if_line = self.peek().line;
            let (condition, then_expr, else_expr) = self.parse_list_condition()?;
            match else_expr {
                None => (Some(Box::new(condition)), then_expr),
                Some(else_expr) => (
                    None,
                    Expr::new(
                        ExprKind::Ternary {
                            condition: Box::new(condition),
                            then_expr: Box::new(then_expr),
                            else_expr: Box::new(else_expr),
                        },
                        if_line,
                    ),
                ),
            }
        } else {
            (None, self.parse_list_element()?)
        };

        Ok(Expr::new(
            ExprKind::ListComprehension {
                generators,
                filter,
                body: Box::new(body),
            },
            line,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_source(source: &str) -> Vec<Stmt> {
        parse(&tokenize(source).unwrap()).unwrap()
    }

    fn parse_expr_source(source: &str) -> Expr {
        parse_expression(&tokenize(source).unwrap()).unwrap()
    }

    fn parse_err(source: &str) -> ParseError {
        parse(&tokenize(source).unwrap()).unwrap_err()
    }

    #[test]
    fn test_parse_cube() {
        let stmts = parse_source("cube([10, 10, 10]);");
        assert_eq!(stmts.len(), 1);
        match &stmts[0].kind {
            StmtKind::ModuleCall(call) => {
                assert_eq!(call.name, "cube");
                assert_eq!(call.args.len(), 1);
                assert!(call.children.is_empty());
            }
            other => panic!("expected module call, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_transform_with_child() {
        let stmts = parse_source("translate([5, 0, 0]) cube(10);");
        match &stmts[0].kind {
            StmtKind::ModuleCall(call) => {
                assert_eq!(call.name, "translate");
                assert_eq!(call.children.len(), 1);
            }
            other => panic!("expected module call, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_boolean_block() {
        let stmts = parse_source("difference() { cube(10); sphere(8); }");
        match &stmts[0].kind {
            StmtKind::ModuleCall(call) => assert_eq!(call.children.len(), 2),
            other => panic!("expected module call, got {:?}", other),
        }
    }

    #[test]
    fn test_precedence() {
        let expr = parse_expr_source("1 + 2 * 3 == 7 && !false || x");
        let ExprKind::Binary { op, left, .. } = &expr.kind else {
            panic!("expected binary");
        };
        assert_eq!(*op, BinaryOp::Or);
        let ExprKind::Binary { op, left, .. } = &left.kind else {
            panic!("expected binary");
        };
        assert_eq!(*op, BinaryOp::And);
        let ExprKind::Binary { op, left, .. } = &left.kind else {
            panic!("expected binary");
        };
        assert_eq!(*op, BinaryOp::Equal);
        let ExprKind::Binary { op, right, .. } = &left.kind else {
            panic!("expected binary");
        };
        assert_eq!(*op, BinaryOp::Add);
        assert!(matches!(
            right.kind,
            ExprKind::Binary {
                op: BinaryOp::Multiply,
                ..
            }
        ));
    }

    #[test]
    fn test_power_binds_tighter_than_negation() {
        let expr = parse_expr_source("-2 ^ 2");
        let ExprKind::Unary { op, operand } = &expr.kind else {
            panic!("expected unary");
        };
        assert_eq!(*op, UnaryOp::Negate);
        assert!(matches!(
            operand.kind,
            ExprKind::Binary {
                op: BinaryOp::Power,
                ..
            }
        ));
    }

    #[test]
    fn test_ternary_is_right_associative() {
        let expr = parse_expr_source("a ? b : c ? d : e");
        let ExprKind::Ternary { else_expr, .. } = &expr.kind else {
            panic!("expected ternary");
        };
        assert!(matches!(else_expr.kind, ExprKind::Ternary { .. }));
    }

    #[test]
    fn test_postfix_chain() {
        let expr = parse_expr_source("f(1)[2].x");
        let ExprKind::Member { target, member } = &expr.kind else {
            panic!("expected member");
        };
        assert_eq!(member, "x");
        let ExprKind::Index { target, .. } = &target.kind else {
            panic!("expected index");
        };
        assert!(matches!(target.kind, ExprKind::Call { .. }));
    }

    #[test]
    fn test_ranges() {
        let expr = parse_expr_source("[0:2:10]");
        assert!(matches!(
            expr.kind,
            ExprKind::Range { step: Some(_), .. }
        ));
        let expr = parse_expr_source("[0:10]");
        assert!(matches!(expr.kind, ExprKind::Range { step: None, .. }));
    }

    #[test]
    fn test_comprehension_with_filter() {
        let expr = parse_expr_source("[for (i = [0:4], j = [0:1]) if (i % 2 == 0) i * j]");
        let ExprKind::ListComprehension {
            generators, filter, ..
        } = &expr.kind
        else {
            panic!("expected comprehension");
        };
        assert_eq!(generators.len(), 2);
        assert!(filter.is_some());
    }

    #[test]
    fn test_mixed_vector_spreads_generators() {
        let expr = parse_expr_source("[1, for (i = [0:2]) i, each [7, 8]]");
        let ExprKind::Vector(elements) = &expr.kind else {
            panic!("expected vector");
        };
        assert_eq!(elements.len(), 3);
        assert!(matches!(elements[1].kind, ExprKind::Each(_)));
        assert!(matches!(elements[2].kind, ExprKind::Each(_)));
    }

    #[test]
    fn test_named_arguments() {
        let stmts = parse_source("m(5, b = 10);");
        let StmtKind::ModuleCall(call) = &stmts[0].kind else {
            panic!("expected module call");
        };
        assert_eq!(call.args[0].name, None);
        assert_eq!(call.args[1].name.as_deref(), Some("b"));
    }

    #[test]
    fn test_declarations() {
        let stmts = parse_source(
            "function f(x, y = 2) = x + y;\nmodule m(a = 1) { cube(a); children(); }",
        );
        assert!(matches!(&stmts[0].kind, StmtKind::FunctionDecl(f) if f.params.len() == 2));
        assert!(matches!(&stmts[1].kind, StmtKind::ModuleDecl(m) if m.body.len() == 2));
        assert_eq!(stmts[1].line(), 2);
    }

    #[test]
    fn test_modifiers() {
        let stmts = parse_source("!cube(1); #sphere(2); %cylinder(); *cube();");
        let modifiers: Vec<_> = stmts
            .iter()
            .map(|s| match &s.kind {
                StmtKind::ModuleCall(call) => call.modifier,
                _ => None,
            })
            .collect();
        assert_eq!(
            modifiers,
            vec![
                Some(Modifier::RootOnly),
                Some(Modifier::Highlight),
                Some(Modifier::Background),
                Some(Modifier::Disable),
            ]
        );
    }

    #[test]
    fn test_control_statements() {
        let stmts = parse_source(
            "if (a) cube(); else { sphere(); }\nfor (i = [0:3], j = [1, 2]) cube(i);\nlet (x = 2) cube(x);",
        );
        assert!(matches!(
            &stmts[0].kind,
            StmtKind::If { else_branch, .. } if else_branch.len() == 1
        ));
        assert!(matches!(&stmts[1].kind, StmtKind::For { bindings, .. } if bindings.len() == 2));
        assert!(matches!(&stmts[2].kind, StmtKind::Let { body, .. } if body.len() == 1));
    }

    #[test]
    fn test_imports() {
        let stmts = parse_source("include <a.scad>\nuse <b.scad>;\nimport(\"part.stl\");");
        assert!(matches!(
            &stmts[0].kind,
            StmtKind::Import { kind: ImportKind::Include, path } if path == "a.scad"
        ));
        assert!(matches!(
            &stmts[1].kind,
            StmtKind::Import { kind: ImportKind::Use, .. }
        ));
        assert!(matches!(
            &stmts[2].kind,
            StmtKind::Import { kind: ImportKind::Geometry, path } if path == "part.stl"
        ));
    }

    #[test]
    fn test_let_inside_comprehension_body() {
        let expr = parse_expr_source("[for (i = [0:2]) let (j = i) if (j > 0) j]");
        let ExprKind::ListComprehension { body, .. } = &expr.kind else {
            panic!("expected comprehension");
        };
        let ExprKind::Let { bindings, body } = &body.kind else {
            panic!("expected let body");
        };
        assert_eq!(bindings[0].name, "j");
        assert!(matches!(body.kind, ExprKind::Each(_)));
    }

    #[test]
    fn test_nesting_limit() {
        // parsing right up to the limit needs more than a test thread's stack
        std::thread::Builder::new()
            .stack_size(64 * 1024 * 1024)
            .spawn(check_nesting_limit)
            .unwrap()
            .join()
            .unwrap();
    }

    fn check_nesting_limit() {
        let depth = MAX_NESTING_DEPTH + 10;
        let nested = format!("x = {}1{};", "(".repeat(depth), ")".repeat(depth));
        let err = parse_err(&nested);
        assert_eq!(err.line, 1);
        assert!(err.expected.contains("levels of nesting"), "{}", err);

        let sum = format!("x = 1{};", "+1".repeat(20_000));
        let err = parse_err(&sum);
        assert!(err.expected.contains("levels of nesting"), "{}", err);

        let blocks = format!("{}cube();{}", "{".repeat(depth), "}".repeat(depth));
        assert!(parse_err(&blocks).expected.contains("levels of nesting"));

        let within = format!("x = {}1{};", "(".repeat(100), ")".repeat(100));
        assert_eq!(parse_source(&within).len(), 1);
    }

    #[test]
    fn test_function_literal_and_let() {
        let expr = parse_expr_source("let (k = 2) function (x) x * k");
        let ExprKind::Let { body, .. } = &expr.kind else {
            panic!("expected let");
        };
        assert!(matches!(body.kind, ExprKind::FunctionLiteral { .. }));
    }

    #[test]
    fn test_missing_semicolon_reports_position() {
        let err = parse_err("x = 1\ny = 2;");
        assert_eq!((err.line, err.column), (2, 1));
        assert!(err.expected.contains("';'"));
        assert_eq!(err.found, "identifier 'y'");
    }

    #[test]
    fn test_unclosed_block() {
        let err = parse_err("union() { cube(1);");
        assert!(err.expected.contains("'}'"));
        assert_eq!(err.found, "end of input");
    }

    #[test]
    fn test_modifier_requires_instantiation() {
        let err = parse_err("!if (true) cube();");
        assert!(err.expected.contains("module instantiation"));
    }

    #[test]
    fn test_empty_statements_are_dropped() {
        assert!(parse_source(";;").is_empty());
    }
}
