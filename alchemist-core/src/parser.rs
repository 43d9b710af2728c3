//! Recursive-descent parser for Alloy.
//!
//! One token of lookahead, C-style precedence climbing for binary
//! operators, and no error recovery: the first mismatch aborts the
//! parse with a diagnostic pointing at the offending token.

use crate::ast::*;
use crate::diagnostic::Diagnostic;
use crate::lexer::{Token, TokenKind, lex};
use crate::span::Span;

pub fn parse(source: &str) -> Result<Module, Diagnostic> {
    let tokens = lex(source)?;
    let mut parser = Parser { tokens, pos: 0 };
    parser.parse_module()
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn parse_module(&mut self) -> Result<Module, Diagnostic> {
        let mut items = Vec::new();
        while !matches!(self.peek().kind, TokenKind::Eof) {
            items.push(self.parse_item()?);
        }
        Ok(Module { items })
    }

    fn parse_item(&mut self) -> Result<Item, Diagnostic> {
        match self.peek().kind {
            TokenKind::Export | TokenKind::Fn => self.parse_function().map(Item::Function),
            TokenKind::Let => self.parse_global().map(Item::Global),
            _ => Err(self.unexpected("`fn`, `export fn`, or `let`")),
        }
    }

    fn parse_global(&mut self) -> Result<Global, Diagnostic> {
        self.expect(&TokenKind::Let, "`let`")?;
        let mutable = self.eat(&TokenKind::Mut);
        let name = self.expect_ident()?;
        self.expect(&TokenKind::Colon, "`:`")?;
        let ty = self.parse_type()?;
        self.expect(&TokenKind::Assign, "`=`")?;
        let init = self.parse_expr()?;
        self.expect(&TokenKind::Semi, "`;`")?;
        Ok(Global { name, mutable, ty, init })
    }

    fn parse_function(&mut self) -> Result<Function, Diagnostic> {
        let start = self.peek().span;
        let exported = self.eat(&TokenKind::Export);
        self.expect(&TokenKind::Fn, "`fn`")?;
        let name = self.expect_ident()?;

        self.expect(&TokenKind::LParen, "`(`")?;
        let mut params = Vec::new();
        if !matches!(self.peek().kind, TokenKind::RParen) {
            loop {
                let pname = self.expect_ident()?;
                self.expect(&TokenKind::Colon, "`:`")?;
                let pty = self.parse_type()?;
                params.push(Param { name: pname, ty: pty });
                if !self.eat(&TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(&TokenKind::RParen, "`)`")?;

        let result = if self.eat(&TokenKind::Arrow) {
            Some(self.parse_type()?)
        } else {
            None
        };

        let body = self.parse_block()?;
        let span = start.merge(self.previous_span());
        Ok(Function {
            name,
            exported,
            params,
            result,
            body,
            span,
        })
    }

    fn parse_type(&mut self) -> Result<TypeExpr, Diagnostic> {
        let tok = self.peek().clone();
        let TokenKind::Ident(name) = &tok.kind else {
            return Err(self.unexpected("a type name"));
        };
        self.advance();

        let kind = match name.as_str() {
            "ptr" => {
                self.expect(&TokenKind::Lt, "`<`")?;
                let inner = self.parse_type()?;
                self.expect_close_angle()?;
                TypeExprKind::Ptr(Box::new(inner))
            }
            "array" => {
                self.expect(&TokenKind::Lt, "`<`")?;
                let inner = self.parse_type()?;
                self.expect_close_angle()?;
                TypeExprKind::Array(Box::new(inner))
            }
            "fnref" => {
                self.expect(&TokenKind::LParen, "`(`")?;
                let mut params = Vec::new();
                if !matches!(self.peek().kind, TokenKind::RParen) {
                    loop {
                        params.push(self.parse_type()?);
                        if !self.eat(&TokenKind::Comma) {
                            break;
                        }
                    }
                }
                self.expect(&TokenKind::RParen, "`)`")?;
                let result = if self.eat(&TokenKind::Arrow) {
                    Some(Box::new(self.parse_type()?))
                } else {
                    None
                };
                TypeExprKind::FnRef { params, result }
            }
            _ => TypeExprKind::Name(name.clone()),
        };

        Ok(TypeExpr {
            kind,
            span: tok.span.merge(self.previous_span()),
        })
    }

    /// Close a type argument list. A `>>` here is two closing angles
    /// from nested arguments (`ptr<ptr<i32>>`), so only half of it is
    /// consumed.
    fn expect_close_angle(&mut self) -> Result<(), Diagnostic> {
        match self.peek().kind {
            TokenKind::Gt => {
                self.advance();
                Ok(())
            }
            TokenKind::Shr => {
                let span = self.peek().span;
                self.tokens[self.pos] = Token {
                    kind: TokenKind::Gt,
                    span: Span::new(span.start + 1, span.end),
                };
                Ok(())
            }
            _ => Err(self.unexpected("`>`")),
        }
    }

    fn parse_block(&mut self) -> Result<Vec<Stmt>, Diagnostic> {
        self.expect(&TokenKind::LBrace, "`{`")?;
        let mut stmts = Vec::new();
        while !matches!(self.peek().kind, TokenKind::RBrace) {
            if matches!(self.peek().kind, TokenKind::Eof) {
                return Err(self.unexpected("`}`"));
            }
            stmts.push(self.parse_stmt()?);
        }
        self.expect(&TokenKind::RBrace, "`}`")?;
        Ok(stmts)
    }

    fn parse_stmt(&mut self) -> Result<Stmt, Diagnostic> {
        let start = self.peek().span;
        match self.peek().kind {
            TokenKind::Let => {
                self.advance();
                let mutable = self.eat(&TokenKind::Mut);
                let name = self.expect_ident()?;
                self.expect(&TokenKind::Colon, "`:`")?;
                let ty = self.parse_type()?;
                self.expect(&TokenKind::Assign, "`=`")?;
                let init = self.parse_expr()?;
                self.expect(&TokenKind::Semi, "`;`")?;
                Ok(Stmt {
                    kind: StmtKind::Let { name, mutable, ty, init },
                    span: start.merge(self.previous_span()),
                })
            }
            TokenKind::If => self.parse_if(),
            TokenKind::While => {
                self.advance();
                let cond = self.parse_expr()?;
                let body = self.parse_block()?;
                Ok(Stmt {
                    kind: StmtKind::While { cond, body },
                    span: start.merge(self.previous_span()),
                })
            }
            TokenKind::Return => {
                self.advance();
                let value = if matches!(self.peek().kind, TokenKind::Semi) {
                    None
                } else {
                    Some(self.parse_expr()?)
                };
                self.expect(&TokenKind::Semi, "`;`")?;
                Ok(Stmt {
                    kind: StmtKind::Return(value),
                    span: start.merge(self.previous_span()),
                })
            }
            TokenKind::Break => {
                self.advance();
                self.expect(&TokenKind::Semi, "`;`")?;
                Ok(Stmt { kind: StmtKind::Break, span: start })
            }
            TokenKind::Continue => {
                self.advance();
                self.expect(&TokenKind::Semi, "`;`")?;
                Ok(Stmt { kind: StmtKind::Continue, span: start })
            }
            _ => {
                let expr = self.parse_expr()?;
                if self.eat(&TokenKind::Assign) {
                    if !matches!(expr.kind, ExprKind::Ident(_) | ExprKind::Index { .. }) {
                        return Err(Diagnostic::error(
                            "invalid assignment target; expected a name or an index expression",
                            expr.span,
                        ));
                    }
                    let value = self.parse_expr()?;
                    self.expect(&TokenKind::Semi, "`;`")?;
                    return Ok(Stmt {
                        kind: StmtKind::Assign { target: expr, value },
                        span: start.merge(self.previous_span()),
                    });
                }
                self.expect(&TokenKind::Semi, "`;`")?;
                Ok(Stmt {
                    kind: StmtKind::Expr(expr),
                    span: start.merge(self.previous_span()),
                })
            }
        }
    }

    fn parse_if(&mut self) -> Result<Stmt, Diagnostic> {
        let start = self.peek().span;
        self.expect(&TokenKind::If, "`if`")?;
        let cond = self.parse_expr()?;
        let then_body = self.parse_block()?;
        let else_body = if self.eat(&TokenKind::Else) {
            if matches!(self.peek().kind, TokenKind::If) {
                vec![self.parse_if()?]
            } else {
                self.parse_block()?
            }
        } else {
            Vec::new()
        };
        Ok(Stmt {
            kind: StmtKind::If { cond, then_body, else_body },
            span: start.merge(self.previous_span()),
        })
    }

    // ----- expressions -------------------------------------------------

    fn parse_expr(&mut self) -> Result<Expr, Diagnostic> {
        self.parse_binary(0)
    }

    /// Precedence climbing over the binary operator table; `min_level`
    /// is the loosest level allowed to bind here.
    fn parse_binary(&mut self, min_level: u8) -> Result<Expr, Diagnostic> {
        let mut lhs = self.parse_cast()?;

        loop {
            let Some((op, level)) = binary_op(&self.peek().kind) else {
                break;
            };
            if level < min_level {
                break;
            }
            self.advance();
            let rhs = self.parse_binary(level + 1)?;
            let span = lhs.span.merge(rhs.span);
            lhs = Expr {
                kind: ExprKind::Binary {
                    op,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
                span,
            };
        }

        Ok(lhs)
    }

    fn parse_cast(&mut self) -> Result<Expr, Diagnostic> {
        let mut expr = self.parse_unary()?;
        while self.eat(&TokenKind::As) {
            let ty = self.parse_type()?;
            let span = expr.span.merge(ty.span);
            expr = Expr {
                kind: ExprKind::Cast { operand: Box::new(expr), ty },
                span,
            };
        }
        Ok(expr)
    }

    fn parse_unary(&mut self) -> Result<Expr, Diagnostic> {
        let start = self.peek().span;
        let op = match self.peek().kind {
            TokenKind::Minus => Some(UnOp::Neg),
            TokenKind::Bang => Some(UnOp::Not),
            TokenKind::Tilde => Some(UnOp::BitNot),
            _ => None,
        };
        if let Some(op) = op {
            self.advance();
            let operand = self.parse_unary()?;
            let span = start.merge(operand.span);
            return Ok(Expr {
                kind: ExprKind::Unary { op, operand: Box::new(operand) },
                span,
            });
        }
        if matches!(self.peek().kind, TokenKind::Amp) {
            self.advance();
            let name = self.expect_ident()?;
            let span = start.merge(name.span);
            return Ok(Expr { kind: ExprKind::FuncRef(name), span });
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> Result<Expr, Diagnostic> {
        let mut expr = self.parse_primary()?;
        loop {
            match self.peek().kind {
                TokenKind::LParen => {
                    self.advance();
                    let mut args = Vec::new();
                    if !matches!(self.peek().kind, TokenKind::RParen) {
                        loop {
                            args.push(self.parse_expr()?);
                            if !self.eat(&TokenKind::Comma) {
                                break;
                            }
                        }
                    }
                    self.expect(&TokenKind::RParen, "`)`")?;
                    let span = expr.span.merge(self.previous_span());
                    expr = Expr {
                        kind: ExprKind::Call { callee: Box::new(expr), args },
                        span,
                    };
                }
                TokenKind::LBracket => {
                    self.advance();
                    let index = self.parse_expr()?;
                    self.expect(&TokenKind::RBracket, "`]`")?;
                    let span = expr.span.merge(self.previous_span());
                    expr = Expr {
                        kind: ExprKind::Index {
                            base: Box::new(expr),
                            index: Box::new(index),
                        },
                        span,
                    };
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    fn parse_primary(&mut self) -> Result<Expr, Diagnostic> {
        let tok = self.peek().clone();
        let kind = match &tok.kind {
            TokenKind::Int { value, suffix } => ExprKind::Int {
                value: *value,
                suffix: *suffix,
            },
            TokenKind::Float { value, is_f32 } => ExprKind::Float {
                value: *value,
                is_f32: *is_f32,
            },
            TokenKind::True => ExprKind::Bool(true),
            TokenKind::False => ExprKind::Bool(false),
            TokenKind::Str(value) => ExprKind::Str(value.clone()),
            TokenKind::Ident(name) => ExprKind::Ident(name.clone()),
            TokenKind::LParen => {
                self.advance();
                let inner = self.parse_expr()?;
                self.expect(&TokenKind::RParen, "`)`")?;
                return Ok(inner);
            }
            _ => return Err(self.unexpected("an expression")),
        };
        self.advance();
        Ok(Expr { kind, span: tok.span })
    }

    // ----- cursor helpers ----------------------------------------------

    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn advance(&mut self) {
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
    }

    fn previous_span(&self) -> Span {
        self.tokens[self.pos.saturating_sub(1)].span
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if &self.peek().kind == kind {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: &TokenKind, what: &str) -> Result<(), Diagnostic> {
        if self.eat(kind) {
            Ok(())
        } else {
            Err(self.unexpected(what))
        }
    }

    fn expect_ident(&mut self) -> Result<Ident, Diagnostic> {
        let tok = self.peek().clone();
        if let TokenKind::Ident(name) = tok.kind {
            self.advance();
            Ok(Ident { name, span: tok.span })
        } else {
            Err(self.unexpected("an identifier"))
        }
    }

    fn unexpected(&self, expected: &str) -> Diagnostic {
        let tok = self.peek();
        Diagnostic::error(
            format!("expected {expected}, found {}", describe(&tok.kind)),
            tok.span,
        )
    }
}

/// Binding levels for binary operators; higher binds tighter.
fn binary_op(kind: &TokenKind) -> Option<(BinOp, u8)> {
    let pair = match kind {
        TokenKind::OrOr => (BinOp::Or, 0),
        TokenKind::AndAnd => (BinOp::And, 1),
        TokenKind::Pipe => (BinOp::BitOr, 2),
        TokenKind::Caret => (BinOp::BitXor, 3),
        TokenKind::Amp => (BinOp::BitAnd, 4),
        TokenKind::EqEq => (BinOp::Eq, 5),
        TokenKind::NotEq => (BinOp::Ne, 5),
        TokenKind::Lt => (BinOp::Lt, 6),
        TokenKind::Le => (BinOp::Le, 6),
        TokenKind::Gt => (BinOp::Gt, 6),
        TokenKind::Ge => (BinOp::Ge, 6),
        TokenKind::Shl => (BinOp::Shl, 7),
        TokenKind::Shr => (BinOp::Shr, 7),
        TokenKind::Plus => (BinOp::Add, 8),
        TokenKind::Minus => (BinOp::Sub, 8),
        TokenKind::Star => (BinOp::Mul, 9),
        TokenKind::Slash => (BinOp::Div, 9),
        TokenKind::Percent => (BinOp::Rem, 9),
        _ => return None,
    };
    Some(pair)
}

fn describe(kind: &TokenKind) -> String {
    match kind {
        TokenKind::Eof => "end of input".to_string(),
        TokenKind::Ident(name) => format!("`{name}`"),
        TokenKind::Int { .. } => "an integer literal".to_string(),
        TokenKind::Float { .. } => "a float literal".to_string(),
        TokenKind::Str(_) => "a string literal".to_string(),
        other => format!("`{}`", token_text(other)),
    }
}

fn token_text(kind: &TokenKind) -> &'static str {
    match kind {
        TokenKind::LParen => "(",
        TokenKind::RParen => ")",
        TokenKind::LBrace => "{",
        TokenKind::RBrace => "}",
        TokenKind::LBracket => "[",
        TokenKind::RBracket => "]",
        TokenKind::Comma => ",",
        TokenKind::Semi => ";",
        TokenKind::Colon => ":",
        TokenKind::Arrow => "->",
        TokenKind::Assign => "=",
        TokenKind::EqEq => "==",
        TokenKind::NotEq => "!=",
        TokenKind::Lt => "<",
        TokenKind::Le => "<=",
        TokenKind::Gt => ">",
        TokenKind::Ge => ">=",
        TokenKind::Shl => "<<",
        TokenKind::Shr => ">>",
        TokenKind::Plus => "+",
        TokenKind::Minus => "-",
        TokenKind::Star => "*",
        TokenKind::Slash => "/",
        TokenKind::Percent => "%",
        TokenKind::Amp => "&",
        TokenKind::AndAnd => "&&",
        TokenKind::Pipe => "|",
        TokenKind::OrOr => "||",
        TokenKind::Caret => "^",
        TokenKind::Tilde => "~",
        TokenKind::Bang => "!",
        TokenKind::Fn => "fn",
        TokenKind::Export => "export",
        TokenKind::Let => "let",
        TokenKind::Mut => "mut",
        TokenKind::If => "if",
        TokenKind::Else => "else",
        TokenKind::While => "while",
        TokenKind::Return => "return",
        TokenKind::Break => "break",
        TokenKind::Continue => "continue",
        TokenKind::As => "as",
        TokenKind::True => "true",
        TokenKind::False => "false",
        TokenKind::Eof | TokenKind::Ident(_) => "",
        TokenKind::Int { .. } | TokenKind::Float { .. } | TokenKind::Str(_) => "",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(source: &str) -> Module {
        parse(source).expect("parse")
    }

    #[test]
    fn parses_exported_function() {
        let module = parse_ok("export fn add(a: i32, b: i32) -> i32 { return a + b; }");
        assert_eq!(module.items.len(), 1);
        let Item::Function(f) = &module.items[0] else {
            panic!("expected function");
        };
        assert!(f.exported);
        assert_eq!(f.name.name, "add");
        assert_eq!(f.params.len(), 2);
    }

    #[test]
    fn multiplication_binds_tighter_than_addition() {
        let module = parse_ok("fn f() -> i32 { return 1 + 2 * 3; }");
        let Item::Function(f) = &module.items[0] else { panic!() };
        let StmtKind::Return(Some(expr)) = &f.body[0].kind else { panic!() };
        let ExprKind::Binary { op: BinOp::Add, rhs, .. } = &expr.kind else {
            panic!("expected `+` at the top");
        };
        assert!(matches!(rhs.kind, ExprKind::Binary { op: BinOp::Mul, .. }));
    }

    #[test]
    fn cast_binds_tighter_than_binary_but_looser_than_unary() {
        let module = parse_ok("fn f() -> u32 { return -1 as u32; }");
        let Item::Function(f) = &module.items[0] else { panic!() };
        let StmtKind::Return(Some(expr)) = &f.body[0].kind else { panic!() };
        let ExprKind::Cast { operand, .. } = &expr.kind else {
            panic!("expected a cast at the top");
        };
        assert!(matches!(operand.kind, ExprKind::Unary { op: UnOp::Neg, .. }));
    }

    #[test]
    fn splits_shift_right_when_closing_nested_type_arguments() {
        let module = parse_ok("fn f(p: ptr<ptr<i32>>) { }");
        let Item::Function(f) = &module.items[0] else { panic!() };
        let TypeExprKind::Ptr(inner) = &f.params[0].ty.kind else {
            panic!("expected ptr");
        };
        assert!(matches!(inner.kind, TypeExprKind::Ptr(_)));
    }

    #[test]
    fn parses_pointer_type_and_index_store() {
        let module = parse_ok("fn f(p: ptr<i64>) { p[0] = 1l; }");
        let Item::Function(f) = &module.items[0] else { panic!() };
        assert!(matches!(
            f.params[0].ty.kind,
            TypeExprKind::Ptr(_)
        ));
        assert!(matches!(f.body[0].kind, StmtKind::Assign { .. }));
    }

    #[test]
    fn parses_function_reference_and_indirect_call() {
        let module = parse_ok(
            "fn f() -> i32 { let g: fnref(i32) -> i32 = &h; return g(1); }",
        );
        let Item::Function(f) = &module.items[0] else { panic!() };
        let StmtKind::Let { init, .. } = &f.body[0].kind else { panic!() };
        assert!(matches!(init.kind, ExprKind::FuncRef(_)));
    }

    #[test]
    fn parses_else_if_chain() {
        let module = parse_ok(
            "fn f(x: i32) -> i32 { if x > 0 { return 1; } else if x == 0 { return 0; } else { return -1; } }",
        );
        let Item::Function(f) = &module.items[0] else { panic!() };
        let StmtKind::If { else_body, .. } = &f.body[0].kind else { panic!() };
        assert!(matches!(else_body[0].kind, StmtKind::If { .. }));
    }

    #[test]
    fn rejects_invalid_assignment_target() {
        let err = parse("fn f() { 1 + 2 = 3; }").unwrap_err();
        assert!(err.message.contains("assignment target"));
    }

    #[test]
    fn reports_first_error_only() {
        let err = parse("fn f( { }").unwrap_err();
        assert!(err.message.contains("expected an identifier"));
    }

    #[test]
    fn rejects_trailing_garbage_after_item() {
        let err = parse("fn f() { } 42").unwrap_err();
        assert!(err.message.contains("expected"));
    }
}
