// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! AST pretty-printer
//!
//! Output parses back to an equal tree. Compound operands are always
//! parenthesized and non-empty bodies are always braced, so the printer never
//! needs to reason about precedence.

use super::node::{Argument, Binding, Expr, ExprKind, ImportKind, Parameter, Stmt, StmtKind};
use std::fmt;

const INDENT: &str = "    ";

/// Render a statement list as source text
pub fn print_program(stmts: &[Stmt]) -> String {
    let mut printer = Printer::default();
    for stmt in stmts {
        printer.stmt(stmt);
    }
    printer.out
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut printer = Printer::default();
        printer.expr(self);
        f.write_str(&printer.out)
    }
}

impl fmt::Display for Stmt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut printer = Printer::default();
        printer.stmt(self);
        f.write_str(printer.out.trim_end())
    }
}

/// Source form of a number literal
pub fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{:?}", n)
    }
}

/// Quoted, escaped source form of a string literal
pub fn quote_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for ch in s.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            c if (c as u32) < 0x20 || c as u32 == 0x7f => {
                out.push_str(&format!("\\x{:02x}", c as u32))
            }
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

#[derive(Default)]
struct Printer {
    out: String,
    depth: usize,
}

impl Printer {
    fn write(&mut self, text: &str) {
        self.out.push_str(text);
    }

    fn line_start(&mut self) {
        for _ in 0..self.depth {
            self.out.push_str(INDENT);
        }
    }

    // =========================================================================
    // Statements
    // =========================================================================

    fn stmt(&mut self, stmt: &Stmt) {
        self.line_start();
        match &stmt.kind {
            StmtKind::Assignment { name, value } => {
                self.write(name);
                self.write(" = ");
                self.expr(value);
                self.write(";\n");
            }
            StmtKind::FunctionDecl(decl) => {
                self.write("function ");
                self.write(&decl.name);
                self.params(&decl.params);
                self.write(" = ");
                self.expr(&decl.body);
                self.write(";\n");
            }
            StmtKind::ModuleDecl(decl) => {
                self.write("module ");
                self.write(&decl.name);
                self.params(&decl.params);
                self.write(" ");
                self.body(&decl.body);
                self.write("\n");
            }
            StmtKind::ModuleCall(call) => {
                if let Some(modifier) = call.modifier {
                    self.out.push(modifier.symbol());
                }
                self.write(&call.name);
                self.args(&call.args);
                if call.children.is_empty() {
                    self.write(";\n");
                } else {
                    self.write(" ");
                    self.body(&call.children);
                    self.write("\n");
                }
            }
            StmtKind::If {
                condition,
                then_branch,
                else_branch,
            } => {
                self.write("if (");
                self.expr(condition);
                self.write(") ");
                self.body(then_branch);
                if !else_branch.is_empty() {
                    self.write(" else ");
                    self.body(else_branch);
                }
                self.write("\n");
            }
            StmtKind::For { bindings, body } => {
                self.write("for ");
                self.bindings(bindings);
                self.write(" ");
                self.body(body);
                self.write("\n");
            }
            StmtKind::Let { bindings, body } => {
                self.write("let ");
                self.bindings(bindings);
                self.write(" ");
                self.body(body);
                self.write("\n");
            }
            StmtKind::Block(body) => {
                self.body(body);
                self.write("\n");
            }
            StmtKind::Import { kind, path } => match kind {
                ImportKind::Include => self.write(&format!("include <{}>\n", path)),
                ImportKind::Use => self.write(&format!("use <{}>\n", path)),
                ImportKind::Geometry => self.write(&format!("import({});\n", quote_string(path))),
            },
        }
    }

    /// Braced statement list, closing brace left without a newline
    fn body(&mut self, stmts: &[Stmt]) {
        if stmts.is_empty() {
            self.write("{}");
            return;
        }
        self.write("{\n");
        self.depth += 1;
        for stmt in stmts {
            self.stmt(stmt);
        }
        self.depth -= 1;
        self.line_start();
        self.write("}");
    }

    fn params(&mut self, params: &[Parameter]) {
        self.write("(");
        for (i, param) in params.iter().enumerate() {
            if i > 0 {
                self.write(", ");
            }
            self.write(&param.name);
            if let Some(default) = &param.default {
                self.write(" = ");
                self.expr(default);
            }
        }
        self.write(")");
    }

    fn args(&mut self, args: &[Argument]) {
        self.write("(");
        for (i, arg) in args.iter().enumerate() {
            if i > 0 {
                self.write(", ");
            }
            if let Some(name) = &arg.name {
                self.write(name);
                self.write(" = ");
            }
            self.expr(&arg.value);
        }
        self.write(")");
    }

    fn bindings(&mut self, bindings: &[Binding]) {
        self.write("(");
        for (i, binding) in bindings.iter().enumerate() {
            if i > 0 {
                self.write(", ");
            }
            self.write(&binding.name);
            self.write(" = ");
            self.expr(&binding.value);
        }
        self.write(")");
    }

    // =========================================================================
    // Expressions
    // =========================================================================

    fn expr(&mut self, expr: &Expr) {
        match &expr.kind {
            ExprKind::Number(n) => self.write(&format_number(*n)),
            ExprKind::String(s) => self.write(&quote_string(s)),
            ExprKind::Bool(b) => self.write(if *b { "true" } else { "false" }),
            ExprKind::Undef => self.write("undef"),
            ExprKind::Identifier(name) => self.write(name),
            ExprKind::Binary { op, left, right } => {
                self.operand(left);
                self.write(" ");
                self.write(op.symbol());
                self.write(" ");
                self.operand(right);
            }
            ExprKind::Unary { op, operand } => {
                self.write(op.symbol());
                self.operand(operand);
            }
            ExprKind::Ternary {
                condition,
                then_expr,
                else_expr,
            } => {
                self.operand(condition);
                self.write(" ? ");
                self.expr(then_expr);
                self.write(" : ");
                self.expr(else_expr);
            }
            ExprKind::Range { start, step, end } => {
                self.write("[");
                self.expr(start);
                if let Some(step) = step {
                    self.write(" : ");
                    self.expr(step);
                }
                self.write(" : ");
                self.expr(end);
                self.write("]");
            }
            ExprKind::Vector(elements) => self.vector(elements),
            ExprKind::ListComprehension { .. } => {
                self.write("[");
                self.generator(expr);
                self.write("]");
            }
            ExprKind::Each(inner) => {
                self.write("each ");
                self.expr(inner);
            }
            ExprKind::Let { bindings, body } => {
                self.write("let ");
                self.bindings(bindings);
                self.write(" ");
                self.expr(body);
            }
            ExprKind::Call { callee, args } => {
                self.operand(callee);
                self.args(args);
            }
            ExprKind::Index { target, index } => {
                self.operand(target);
                self.write("[");
                self.expr(index);
                self.write("]");
            }
            ExprKind::Member { target, member } => {
                self.operand(target);
                self.write(".");
                self.write(member);
            }
            ExprKind::FunctionLiteral { params, body } => {
                self.write("function ");
                self.params(params);
                self.write(" ");
                self.expr(body);
            }
        }
    }

    /// Expression in operand position
    fn operand(&mut self, expr: &Expr) {
        let compound = matches!(
            expr.kind,
            ExprKind::Binary { .. }
                | ExprKind::Unary { .. }
                | ExprKind::Ternary { .. }
                | ExprKind::Let { .. }
                | ExprKind::FunctionLiteral { .. }
                | ExprKind::Each(_)
        );
        if compound {
            self.write("(");
            self.expr(expr);
            self.write(")");
        } else {
            self.expr(expr);
        }
    }

    fn vector(&mut self, elements: &[Expr]) {
        // A lone spread comprehension would read back as a plain one
        if let [only] = elements {
            if let ExprKind::Each(inner) = &only.kind {
                if matches!(&inner.kind, ExprKind::ListComprehension { generators, .. } if !generators.is_empty())
                {
                    self.write("[each ");
                    self.expr(inner);
                    self.write("]");
                    return;
                }
            }
        }

        self.write("[");
        for (i, element) in elements.iter().enumerate() {
            if i > 0 {
                self.write(", ");
            }
            self.element(element);
        }
        self.write("]");
    }

    /// Vector element or comprehension body
    fn element(&mut self, expr: &Expr) {
        match &expr.kind {
            ExprKind::Each(inner) if matches!(inner.kind, ExprKind::ListComprehension { .. }) => {
                self.generator(inner)
            }
            ExprKind::Ternary {
                condition,
                then_expr,
                else_expr,
            } if is_spread(then_expr) || is_spread(else_expr) => {
                self.write("if (");
                self.expr(condition);
                self.write(") ");
                self.element(then_expr);
                self.write(" else ");
                self.element(else_expr);
            }
            ExprKind::Let { bindings, body } => {
                self.write("let ");
                self.bindings(bindings);
                self.write(" ");
                self.element(body);
            }
            _ => self.expr(expr),
        }
    }

    /// Comprehension without its brackets
    fn generator(&mut self, expr: &Expr) {
        let ExprKind::ListComprehension {
            generators,
            filter,
            body,
        } = &expr.kind
        else {
            self.expr(expr);
            return;
        };

        if !generators.is_empty() {
            self.write("for ");
            self.bindings(generators);
            self.write(" ");
        }
        if let Some(filter) = filter {
            self.write("if (");
            self.expr(filter);
            self.write(") ");
        }
        self.element(body);
    }
}

fn is_spread(expr: &Expr) -> bool {
    match &expr.kind {
        ExprKind::Each(_) => true,
        ExprKind::Let { body, .. } => is_spread(body),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::{parse, tokenize};

    fn round_trip(source: &str) {
        let ast = parse(&tokenize(source).unwrap()).unwrap();
        let printed = print_program(&ast);
        let reparsed = parse(&tokenize(&printed).unwrap())
            .unwrap_or_else(|e| panic!("reparse failed: {}\n{}", e, printed));
        assert_eq!(ast, reparsed, "printed source:\n{}", printed);
    }

    #[test]
    fn test_round_trip_statements() {
        round_trip(
            r#"
            $fn = 32;
            size = [10, 20, 30];
            function area(w, h = 2) = w * h;
            module part(s = 5) {
                translate([s, 0, 0]) cube(s, center = true);
                children();
            }
            !part(3) sphere(1);
            #cylinder(h = 2, r = 1);
            %square(2);
            *circle(1);
            if (size[0] > 5) cube(1); else { sphere(2); }
            for (i = [0 : 2 : 10], j = [1, 2]) translate([i, j, 0]) cube(1);
            let (a = 1) cube(a);
            { cube(); }
            include <lib/a.scad>
            use <b.scad>
            import("part.stl");
            "#,
        );
    }

    #[test]
    fn test_round_trip_expressions() {
        round_trip(
            r#"
            a = -2 ^ 2 + (1 - 2) * 3 % 4 / 5;
            b = !(x || y) && z != 1 ? "s\t\"q\"" : undef;
            c = (a ? b : c) ? d : e;
            d = let (k = 2) function (x) x * k;
            e = d(3)[0].y;
            f = [for (i = [0 : 4]) if (i % 2 == 0) i * i];
            g = [1, for (i = v) each [i, i], each w, if (t) 9];
            h = [for (i = v) for (j = w) [i, j]];
            i = [each [for (i = v) i]];
            k = [for (i = v) if (i > 1) i else -i];
            l = [for (i = v) let (j = i * 2) j];
            m = [0 : 0.25 : 1e-3];
            n = [for (i = v) let (j = i) if (j > 0) j];
            o = [let (a = 1) each [a, a], 3];
            p = [if (t) let (q = 1) each [q] else 0];
            "#,
        );
    }

    #[test]
    fn test_number_formatting() {
        assert_eq!(format_number(10.0), "10");
        assert_eq!(format_number(-3.0), "-3");
        assert_eq!(format_number(0.5), "0.5");
        assert_eq!(format_number(1e20), "1e20");
    }

    #[test]
    fn test_expr_display() {
        let ast = parse(&tokenize("x = 1 + 2 * 3;").unwrap()).unwrap();
        let StmtKind::Assignment { value, .. } = &ast[0].kind else {
            panic!("expected assignment");
        };
        assert_eq!(value.to_string(), "1 + (2 * 3)");
        assert_eq!(ast[0].to_string(), "x = 1 + (2 * 3);");
    }
}
