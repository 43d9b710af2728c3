//! Type checking and lowering to HIR.
//!
//! Two passes over the module, per the pipeline contract: a top-down
//! pass collects every declaration (globals and function signatures,
//! with storage class and a unique index), then a bottom-up pass types
//! every use site against its declaration. There are no implicit
//! conversions anywhere: signed/unsigned and int/float mixes are
//! rejected with a message naming both types, and every conversion in
//! a checked program is an explicit cast node.

use std::collections::HashMap;

use crate::ast::{self, BinOp, UnOp};
use crate::builtins;
use crate::diagnostic::Diagnostic;
use crate::hir;
use crate::lexer::IntSuffix;
use crate::span::Span;
use crate::types::{FuncSig, Type};

pub fn check(module: &ast::Module) -> Result<hir::Module, Diagnostic> {
    let mut env = ModuleEnv::default();
    env.collect(module)?;

    let mut table: Vec<usize> = Vec::new();
    let mut table_sig: Option<FuncSig> = None;
    let mut functions = Vec::new();

    for item in &module.items {
        let ast::Item::Function(func) = item else { continue };
        let info = &env.funcs[env.func_map[&func.name.name]];
        let mut body = BodyChecker {
            env: &env,
            scopes: Vec::new(),
            locals: Vec::new(),
            n_params: info.sig.params.len() as u32,
            result: info.sig.result.clone(),
            loop_depth: 0,
            table: &mut table,
            table_sig: &mut table_sig,
        };
        let stmts = body.check_function(func, &info.sig)?;
        functions.push(hir::Function {
            name: func.name.name.clone(),
            exported: func.exported,
            params: info.sig.params.clone(),
            result: info.sig.result.clone(),
            locals: body.locals,
            body: stmts,
            span: func.span,
        });
    }

    Ok(hir::Module {
        globals: env.globals,
        functions,
        table,
        table_sig,
    })
}

#[derive(Debug, Clone)]
struct FuncInfo {
    sig: FuncSig,
}

#[derive(Default)]
struct ModuleEnv {
    globals: Vec<hir::Global>,
    global_map: HashMap<String, u32>,
    global_mutability: Vec<bool>,
    funcs: Vec<FuncInfo>,
    func_map: HashMap<String, usize>,
}

impl ModuleEnv {
    /// Top-down pass: every declaration gets its resolved type and
    /// unique index before any body is looked at, so forward
    /// references between functions need no special handling.
    fn collect(&mut self, module: &ast::Module) -> Result<(), Diagnostic> {
        for item in &module.items {
            match item {
                ast::Item::Global(global) => {
                    let ty = resolve_type(&global.ty)?;
                    if !ty.is_storable() {
                        return Err(Diagnostic::error(
                            format!("`{ty}` is not a value type for a global"),
                            global.ty.span,
                        ));
                    }
                    if self.global_map.contains_key(&global.name.name)
                        || self.func_map.contains_key(&global.name.name)
                    {
                        return Err(duplicate(&global.name));
                    }
                    let init = const_init(&global.init, &ty)?;
                    let index = self.globals.len() as u32;
                    self.global_map.insert(global.name.name.clone(), index);
                    self.global_mutability.push(global.mutable);
                    self.globals.push(hir::Global {
                        name: global.name.name.clone(),
                        ty,
                        mutable: global.mutable,
                        init,
                    });
                }
                ast::Item::Function(func) => {
                    if self.func_map.contains_key(&func.name.name)
                        || self.global_map.contains_key(&func.name.name)
                    {
                        return Err(duplicate(&func.name));
                    }
                    let mut params = Vec::new();
                    for param in &func.params {
                        let ty = resolve_type(&param.ty)?;
                        if !ty.is_storable() {
                            return Err(Diagnostic::error(
                                format!("`{ty}` is not a value type for a parameter"),
                                param.ty.span,
                            ));
                        }
                        params.push(ty);
                    }
                    let result = match &func.result {
                        Some(ty) => resolve_type(ty)?,
                        None => Type::Unit,
                    };
                    let index = self.funcs.len();
                    self.func_map.insert(func.name.name.clone(), index);
                    self.funcs.push(FuncInfo {
                        sig: FuncSig { params, result },
                    });
                }
            }
        }
        Ok(())
    }
}

fn mismatched_assign(found: &Type, expected: &Type, span: Span) -> Diagnostic {
    Diagnostic::error(
        format!("cannot assign {found} to a target of type {expected}"),
        span,
    )
}

fn duplicate(name: &ast::Ident) -> Diagnostic {
    Diagnostic::error(
        format!("`{}` is declared more than once at module level", name.name),
        name.span,
    )
}

/// Globals take constant initializers only: a literal, optionally
/// under a single arithmetic negation.
fn const_init(expr: &ast::Expr, ty: &Type) -> Result<hir::Const, Diagnostic> {
    let (kind, negated) = match &expr.kind {
        ast::ExprKind::Unary { op: UnOp::Neg, operand } => (&operand.kind, true),
        other => (other, false),
    };
    let err = || {
        Diagnostic::error(
            "global initializer must be a literal of the declared type",
            expr.span,
        )
    };
    match (kind, ty) {
        (ast::ExprKind::Int { value, suffix }, _) => {
            let lit = int_literal(*value, *suffix, expr.span)?;
            if &lit.ty != ty {
                return Err(err());
            }
            if !negated {
                return Ok(lit.value);
            }
            if !ty.is_signed_integer() {
                return Err(err());
            }
            match lit.value {
                hir::Const::I32(v) => Ok(hir::Const::I32(v.wrapping_neg())),
                hir::Const::I64(v) => Ok(hir::Const::I64(v.wrapping_neg())),
                _ => Err(err()),
            }
        }
        (ast::ExprKind::Float { value, is_f32 }, Type::F32) if *is_f32 => {
            let v = if negated { -*value } else { *value };
            Ok(hir::Const::F32(v as f32))
        }
        (ast::ExprKind::Float { value, is_f32 }, Type::F64) if !*is_f32 => {
            let v = if negated { -*value } else { *value };
            Ok(hir::Const::F64(v))
        }
        (ast::ExprKind::Bool(b), Type::Bool) if !negated => {
            Ok(hir::Const::I32(i32::from(*b)))
        }
        _ => Err(err()),
    }
}

struct IntLiteral {
    value: hir::Const,
    ty: Type,
}

fn int_literal(value: u64, suffix: IntSuffix, span: Span) -> Result<IntLiteral, Diagnostic> {
    let out_of_range = |ty: &str| {
        Diagnostic::error(format!("integer literal out of range for {ty}"), span)
    };
    match suffix {
        IntSuffix::None => {
            let v = i32::try_from(value).map_err(|_| out_of_range("i32"))?;
            Ok(IntLiteral { value: hir::Const::I32(v), ty: Type::I32 })
        }
        IntSuffix::U => {
            let v = u32::try_from(value).map_err(|_| out_of_range("u32"))?;
            Ok(IntLiteral {
                value: hir::Const::I32(v as i32),
                ty: Type::U32,
            })
        }
        IntSuffix::L => {
            let v = i64::try_from(value).map_err(|_| out_of_range("i64"))?;
            Ok(IntLiteral { value: hir::Const::I64(v), ty: Type::I64 })
        }
        IntSuffix::Ul => Ok(IntLiteral {
            value: hir::Const::I64(value as i64),
            ty: Type::U64,
        }),
    }
}

/// Resolve written type syntax to the semantic lattice.
fn resolve_type(ty: &ast::TypeExpr) -> Result<Type, Diagnostic> {
    match &ty.kind {
        ast::TypeExprKind::Name(name) => match name.as_str() {
            "i32" => Ok(Type::I32),
            "i64" => Ok(Type::I64),
            "u32" => Ok(Type::U32),
            "u64" => Ok(Type::U64),
            "f32" => Ok(Type::F32),
            "f64" => Ok(Type::F64),
            "bool" => Ok(Type::Bool),
            "str" => Ok(Type::Str),
            "handle" => Ok(Type::Handle),
            other => Err(Diagnostic::error(
                format!("unknown type `{other}`"),
                ty.span,
            )),
        },
        ast::TypeExprKind::Ptr(inner) => {
            let elem = resolve_type(inner)?;
            Ok(Type::Ptr(Box::new(elem)))
        }
        ast::TypeExprKind::Array(inner) => {
            let elem = resolve_type(inner)?;
            Ok(Type::Array(Box::new(elem)))
        }
        ast::TypeExprKind::FnRef { params, result } => {
            let mut param_types = Vec::new();
            for p in params {
                param_types.push(resolve_type(p)?);
            }
            let result = match result {
                Some(r) => resolve_type(r)?,
                None => Type::Unit,
            };
            Ok(Type::FnRef(Box::new(FuncSig {
                params: param_types,
                result,
            })))
        }
    }
}

#[derive(Debug, Clone)]
struct LocalSym {
    index: u32,
    ty: Type,
    mutable: bool,
}

struct BodyChecker<'m> {
    env: &'m ModuleEnv,
    /// Lexical scope stack; child scopes shadow parents and die with
    /// their block.
    scopes: Vec<HashMap<String, LocalSym>>,
    /// Declared locals in index order, after the params.
    locals: Vec<Type>,
    n_params: u32,
    result: Type,
    loop_depth: u32,
    table: &'m mut Vec<usize>,
    table_sig: &'m mut Option<FuncSig>,
}

impl<'m> BodyChecker<'m> {
    fn check_function(
        &mut self,
        func: &ast::Function,
        sig: &FuncSig,
    ) -> Result<Vec<hir::Stmt>, Diagnostic> {
        self.scopes.push(HashMap::new());
        for (i, param) in func.params.iter().enumerate() {
            let sym = LocalSym {
                index: i as u32,
                ty: sig.params[i].clone(),
                mutable: false,
            };
            if self
                .scopes
                .last_mut()
                .expect("param scope")
                .insert(param.name.name.clone(), sym)
                .is_some()
            {
                return Err(Diagnostic::error(
                    format!("duplicate parameter `{}`", param.name.name),
                    param.name.span,
                ));
            }
        }
        let stmts = self.check_block(&func.body)?;
        self.scopes.pop();
        Ok(stmts)
    }

    fn check_block(&mut self, stmts: &[ast::Stmt]) -> Result<Vec<hir::Stmt>, Diagnostic> {
        self.scopes.push(HashMap::new());
        let mut out = Vec::new();
        for stmt in stmts {
            out.push(self.check_stmt(stmt)?);
        }
        self.scopes.pop();
        Ok(out)
    }

    fn check_stmt(&mut self, stmt: &ast::Stmt) -> Result<hir::Stmt, Diagnostic> {
        let kind = match &stmt.kind {
            ast::StmtKind::Let { name, mutable, ty, init } => {
                let declared = resolve_type(ty)?;
                if !declared.is_storable() {
                    return Err(Diagnostic::error(
                        format!("`{declared}` is not a value type for a local"),
                        ty.span,
                    ));
                }
                let value = self.check_expr(init)?;
                if value.ty != declared {
                    return Err(Diagnostic::error(
                        format!(
                            "initializer has type {} but `{}` is declared as {declared}",
                            value.ty, name.name
                        ),
                        init.span,
                    ));
                }
                let index = self.n_params + self.locals.len() as u32;
                self.locals.push(declared.clone());
                let scope = self.scopes.last_mut().expect("block scope");
                if scope.contains_key(&name.name) {
                    return Err(Diagnostic::error(
                        format!("`{}` is already declared in this scope", name.name),
                        name.span,
                    ));
                }
                scope.insert(
                    name.name.clone(),
                    LocalSym { index, ty: declared, mutable: *mutable },
                );
                hir::StmtKind::LocalSet { index, value }
            }
            ast::StmtKind::Assign { target, value } => self.check_assign(target, value)?,
            ast::StmtKind::If { cond, then_body, else_body } => {
                let cond = self.check_condition(cond, "if")?;
                let then_body = self.check_block(then_body)?;
                let else_body = self.check_block(else_body)?;
                hir::StmtKind::If { cond, then_body, else_body }
            }
            ast::StmtKind::While { cond, body } => {
                let cond = self.check_condition(cond, "while")?;
                self.loop_depth += 1;
                let body = self.check_block(body)?;
                self.loop_depth -= 1;
                hir::StmtKind::While { cond, body }
            }
            ast::StmtKind::Return(value) => match (value, self.result.is_unit()) {
                (Some(expr), false) => {
                    let value = self.check_expr(expr)?;
                    if value.ty != self.result {
                        return Err(Diagnostic::error(
                            format!(
                                "return value has type {} but the function returns {}",
                                value.ty, self.result
                            ),
                            expr.span,
                        ));
                    }
                    hir::StmtKind::Return(Some(value))
                }
                (None, true) => hir::StmtKind::Return(None),
                (Some(expr), true) => {
                    return Err(Diagnostic::error(
                        "this function does not return a value",
                        expr.span,
                    ));
                }
                (None, false) => {
                    return Err(Diagnostic::error(
                        format!("return without a value in a function returning {}", self.result),
                        stmt.span,
                    ));
                }
            },
            ast::StmtKind::Break => {
                if self.loop_depth == 0 {
                    return Err(Diagnostic::error("`break` outside of a loop", stmt.span));
                }
                hir::StmtKind::Break
            }
            ast::StmtKind::Continue => {
                if self.loop_depth == 0 {
                    return Err(Diagnostic::error("`continue` outside of a loop", stmt.span));
                }
                hir::StmtKind::Continue
            }
            ast::StmtKind::Expr(expr) => hir::StmtKind::Expr(self.check_expr(expr)?),
        };
        Ok(hir::Stmt { kind, span: stmt.span })
    }

    fn check_condition(&mut self, cond: &ast::Expr, what: &str) -> Result<hir::Expr, Diagnostic> {
        let checked = self.check_expr(cond)?;
        if checked.ty != Type::Bool {
            return Err(Diagnostic::error(
                format!("{what} condition must be bool, found {}", checked.ty),
                cond.span,
            ));
        }
        Ok(checked)
    }

    fn check_assign(
        &mut self,
        target: &ast::Expr,
        value: &ast::Expr,
    ) -> Result<hir::StmtKind, Diagnostic> {
        match &target.kind {
            ast::ExprKind::Ident(name) => {
                let value = self.check_expr(value)?;
                if let Some(sym) = self.lookup_local(name) {
                    if !sym.mutable {
                        return Err(Diagnostic::error(
                            format!("cannot assign to immutable binding `{name}`"),
                            target.span,
                        ));
                    }
                    if value.ty != sym.ty {
                        return Err(mismatched_assign(&value.ty, &sym.ty, target.span));
                    }
                    return Ok(hir::StmtKind::LocalSet { index: sym.index, value });
                }
                if let Some(&index) = self.env.global_map.get(name) {
                    if !self.env.global_mutability[index as usize] {
                        return Err(Diagnostic::error(
                            format!("cannot assign to immutable global `{name}`"),
                            target.span,
                        ));
                    }
                    let ty = &self.env.globals[index as usize].ty;
                    if &value.ty != ty {
                        return Err(mismatched_assign(&value.ty, ty, target.span));
                    }
                    return Ok(hir::StmtKind::GlobalSet { index, value });
                }
                Err(Diagnostic::error(
                    format!("unresolved identifier `{name}`"),
                    target.span,
                ))
            }
            ast::ExprKind::Index { base, index } => {
                let (base, index, elem, length_prefixed) = self.check_element(base, index)?;
                let value = self.check_expr(value)?;
                if value.ty != elem {
                    return Err(mismatched_assign(&value.ty, &elem, target.span));
                }
                Ok(hir::StmtKind::Store { base, index, value, elem, length_prefixed })
            }
            _ => Err(Diagnostic::error(
                "invalid assignment target; expected a name or an index expression",
                target.span,
            )),
        }
    }

    /// Shared typing for `base[index]` in load and store position.
    fn check_element(
        &mut self,
        base: &ast::Expr,
        index: &ast::Expr,
    ) -> Result<(hir::Expr, hir::Expr, Type, bool), Diagnostic> {
        let base_checked = self.check_expr(base)?;
        let (elem, length_prefixed) = match &base_checked.ty {
            Type::Ptr(elem) => ((**elem).clone(), false),
            Type::Array(elem) => ((**elem).clone(), true),
            other => {
                return Err(Diagnostic::error(
                    format!("cannot index a value of type {other}"),
                    base.span,
                ));
            }
        };
        let index_checked = self.check_expr(index)?;
        if !matches!(index_checked.ty, Type::I32 | Type::U32) {
            return Err(Diagnostic::error(
                format!("index must be i32 or u32, found {}", index_checked.ty),
                index.span,
            ));
        }
        Ok((base_checked, index_checked, elem, length_prefixed))
    }

    fn lookup_local(&self, name: &str) -> Option<LocalSym> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.get(name))
            .cloned()
    }

    fn check_expr(&mut self, expr: &ast::Expr) -> Result<hir::Expr, Diagnostic> {
        let span = expr.span;
        match &expr.kind {
            ast::ExprKind::Int { value, suffix } => {
                let lit = int_literal(*value, *suffix, span)?;
                Ok(hir::Expr {
                    kind: match lit.value {
                        hir::Const::I32(v) => hir::ExprKind::ConstI32(v),
                        hir::Const::I64(v) => hir::ExprKind::ConstI64(v),
                        _ => unreachable!("integer literal lowers to an integer const"),
                    },
                    ty: lit.ty,
                    span,
                })
            }
            ast::ExprKind::Float { value, is_f32 } => Ok(if *is_f32 {
                hir::Expr {
                    kind: hir::ExprKind::ConstF32(*value as f32),
                    ty: Type::F32,
                    span,
                }
            } else {
                hir::Expr {
                    kind: hir::ExprKind::ConstF64(*value),
                    ty: Type::F64,
                    span,
                }
            }),
            ast::ExprKind::Bool(b) => Ok(hir::Expr {
                kind: hir::ExprKind::ConstI32(i32::from(*b)),
                ty: Type::Bool,
                span,
            }),
            ast::ExprKind::Str(s) => Ok(hir::Expr {
                kind: hir::ExprKind::Str(s.clone()),
                ty: Type::Str,
                span,
            }),
            ast::ExprKind::Ident(name) => {
                if let Some(sym) = self.lookup_local(name) {
                    return Ok(hir::Expr {
                        kind: hir::ExprKind::LocalGet(sym.index),
                        ty: sym.ty,
                        span,
                    });
                }
                if let Some(&index) = self.env.global_map.get(name) {
                    return Ok(hir::Expr {
                        kind: hir::ExprKind::GlobalGet(index),
                        ty: self.env.globals[index as usize].ty.clone(),
                        span,
                    });
                }
                if self.env.func_map.contains_key(name) {
                    return Err(Diagnostic::error(
                        format!("`{name}` is a function; call it or take a reference with `&{name}`"),
                        span,
                    ));
                }
                Err(Diagnostic::error(
                    format!("unresolved identifier `{name}`"),
                    span,
                ))
            }
            ast::ExprKind::Unary { op, operand } => self.check_unary(*op, operand, span),
            ast::ExprKind::Binary { op, lhs, rhs } => self.check_binary(*op, lhs, rhs, span),
            ast::ExprKind::Cast { operand, ty } => {
                let target = resolve_type(ty)?;
                let operand = self.check_expr(operand)?;
                let ok = (operand.ty.is_numeric() && target.is_numeric())
                    || (operand.ty == Type::Bool && target.is_integer());
                if !ok {
                    return Err(Diagnostic::error(
                        format!("cannot cast {} to {target}", operand.ty),
                        span,
                    ));
                }
                Ok(hir::Expr {
                    kind: hir::ExprKind::Cast { operand: Box::new(operand) },
                    ty: target,
                    span,
                })
            }
            ast::ExprKind::Call { callee, args } => self.check_call(callee, args, span),
            ast::ExprKind::Index { base, index } => {
                let (base, index, elem, length_prefixed) = self.check_element(base, index)?;
                Ok(hir::Expr {
                    ty: elem.clone(),
                    kind: hir::ExprKind::Load {
                        base: Box::new(base),
                        index: Box::new(index),
                        elem,
                        length_prefixed,
                    },
                    span,
                })
            }
            ast::ExprKind::FuncRef(name) => self.check_func_ref(name, span),
        }
    }

    fn check_unary(
        &mut self,
        op: UnOp,
        operand: &ast::Expr,
        span: Span,
    ) -> Result<hir::Expr, Diagnostic> {
        let operand = self.check_expr(operand)?;
        let ty = operand.ty.clone();
        let ok = match op {
            UnOp::Neg => ty.is_signed_integer() || ty.is_float(),
            UnOp::Not => ty == Type::Bool,
            UnOp::BitNot => ty.is_integer(),
        };
        if !ok {
            return Err(Diagnostic::error(
                format!("unary `{}` is not defined for {ty}", op.symbol()),
                span,
            ));
        }
        Ok(hir::Expr {
            kind: hir::ExprKind::Unary { op, operand: Box::new(operand) },
            ty,
            span,
        })
    }

    fn check_binary(
        &mut self,
        op: BinOp,
        lhs: &ast::Expr,
        rhs: &ast::Expr,
        span: Span,
    ) -> Result<hir::Expr, Diagnostic> {
        let lhs = self.check_expr(lhs)?;
        let rhs = self.check_expr(rhs)?;

        // Pointer arithmetic is the one asymmetric case: a typed
        // pointer plus an integer element offset.
        if matches!(lhs.ty, Type::Ptr(_)) && matches!(op, BinOp::Add | BinOp::Sub) {
            if matches!(rhs.ty, Type::Ptr(_)) {
                return Err(Diagnostic::error(
                    format!(
                        "pointer arithmetic between {} and {} is not allowed",
                        lhs.ty, rhs.ty
                    ),
                    span,
                ));
            }
            if !matches!(rhs.ty, Type::I32 | Type::U32) {
                return Err(Diagnostic::error(
                    format!("pointer offset must be i32 or u32, found {}", rhs.ty),
                    span,
                ));
            }
            let ty = lhs.ty.clone();
            return Ok(hir::Expr {
                kind: hir::ExprKind::Binary {
                    op,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
                ty,
                span,
            });
        }

        let mismatch = || {
            Diagnostic::error(
                format!(
                    "mismatched operand types {} and {} for `{}`; insert an explicit cast",
                    lhs.ty,
                    rhs.ty,
                    op.symbol()
                ),
                span,
            )
        };
        let unsupported = || {
            Diagnostic::error(
                format!("`{}` is not defined for {}", op.symbol(), lhs.ty),
                span,
            )
        };

        let result_ty = match op {
            BinOp::And | BinOp::Or => {
                if lhs.ty != Type::Bool || rhs.ty != Type::Bool {
                    return Err(Diagnostic::error(
                        format!(
                            "`{}` requires bool operands, found {} and {}",
                            op.symbol(),
                            lhs.ty,
                            rhs.ty
                        ),
                        span,
                    ));
                }
                Type::Bool
            }
            BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div => {
                if lhs.ty != rhs.ty {
                    return Err(mismatch());
                }
                if !lhs.ty.is_numeric() {
                    return Err(unsupported());
                }
                lhs.ty.clone()
            }
            BinOp::Rem | BinOp::BitAnd | BinOp::BitOr | BinOp::BitXor
            | BinOp::Shl | BinOp::Shr => {
                if lhs.ty != rhs.ty {
                    return Err(mismatch());
                }
                if !lhs.ty.is_integer() {
                    return Err(unsupported());
                }
                lhs.ty.clone()
            }
            BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
                if lhs.ty != rhs.ty {
                    return Err(mismatch());
                }
                if !lhs.ty.is_numeric() {
                    return Err(unsupported());
                }
                Type::Bool
            }
            BinOp::Eq | BinOp::Ne => {
                if lhs.ty != rhs.ty {
                    return Err(mismatch());
                }
                if lhs.ty.is_unit() {
                    return Err(unsupported());
                }
                Type::Bool
            }
        };

        Ok(hir::Expr {
            kind: hir::ExprKind::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            },
            ty: result_ty,
            span,
        })
    }

    fn check_call(
        &mut self,
        callee: &ast::Expr,
        args: &[ast::Expr],
        span: Span,
    ) -> Result<hir::Expr, Diagnostic> {
        // A bare name resolves through symbols first (locals shadow
        // globals shadow functions shadow builtins), so user code can
        // redefine a builtin name.
        if let ast::ExprKind::Ident(name) = &callee.kind {
            if let Some(sym) = self.lookup_local(name) {
                return self.check_indirect(callee, sym.ty, args, span);
            }
            if let Some(&index) = self.env.global_map.get(name) {
                let ty = self.env.globals[index as usize].ty.clone();
                return self.check_indirect(callee, ty, args, span);
            }
            if let Some(&func) = self.env.func_map.get(name) {
                let sig = self.env.funcs[func].sig.clone();
                let args = self.check_args(name, &sig, args, span)?;
                return Ok(hir::Expr {
                    ty: sig.result,
                    kind: hir::ExprKind::CallDirect { func, args },
                    span,
                });
            }
            if name == "len" {
                return self.check_len(args, span);
            }
            if let Some(builtin) = builtins::find_builtin(name) {
                let sig = builtin.signature();
                let args = self.check_args(name, &sig, args, span)?;
                return Ok(hir::Expr {
                    ty: sig.result,
                    kind: hir::ExprKind::CallBuiltin { builtin, args },
                    span,
                });
            }
            return Err(Diagnostic::error(
                format!("unknown function `{name}`"),
                span,
            ));
        }

        let callee_checked = self.check_expr(callee)?;
        let ty = callee_checked.ty.clone();
        self.check_indirect_checked(callee_checked, ty, args, span)
    }

    fn check_indirect(
        &mut self,
        callee: &ast::Expr,
        ty: Type,
        args: &[ast::Expr],
        span: Span,
    ) -> Result<hir::Expr, Diagnostic> {
        let callee = self.check_expr(callee)?;
        self.check_indirect_checked(callee, ty, args, span)
    }

    fn check_indirect_checked(
        &mut self,
        callee: hir::Expr,
        ty: Type,
        args: &[ast::Expr],
        span: Span,
    ) -> Result<hir::Expr, Diagnostic> {
        let Type::FnRef(sig) = ty else {
            return Err(Diagnostic::error(
                format!("cannot call a value of type {ty}"),
                span,
            ));
        };
        let args = self.check_args("function reference", &sig, args, span)?;
        Ok(hir::Expr {
            ty: sig.result.clone(),
            kind: hir::ExprKind::CallIndirect {
                callee: Box::new(callee),
                sig: *sig,
                args,
            },
            span,
        })
    }

    fn check_args(
        &mut self,
        what: &str,
        sig: &FuncSig,
        args: &[ast::Expr],
        span: Span,
    ) -> Result<Vec<hir::Expr>, Diagnostic> {
        if args.len() != sig.params.len() {
            return Err(Diagnostic::error(
                format!(
                    "`{what}` expects {} argument{} but received {}",
                    sig.params.len(),
                    if sig.params.len() == 1 { "" } else { "s" },
                    args.len()
                ),
                span,
            ));
        }
        let mut out = Vec::new();
        for (arg, expected) in args.iter().zip(&sig.params) {
            let checked = self.check_expr(arg)?;
            if &checked.ty != expected {
                return Err(Diagnostic::error(
                    format!(
                        "argument has type {} but {expected} was expected",
                        checked.ty
                    ),
                    arg.span,
                ));
            }
            out.push(checked);
        }
        Ok(out)
    }

    fn check_len(&mut self, args: &[ast::Expr], span: Span) -> Result<hir::Expr, Diagnostic> {
        if args.len() != 1 {
            return Err(Diagnostic::error(
                format!("`len` expects 1 argument but received {}", args.len()),
                span,
            ));
        }
        let arg = self.check_expr(&args[0])?;
        if !matches!(arg.ty, Type::Array(_)) {
            return Err(Diagnostic::error(
                format!("`len` expects an array reference, found {}", arg.ty),
                span,
            ));
        }
        Ok(hir::Expr {
            kind: hir::ExprKind::ArrayLen(Box::new(arg)),
            ty: Type::U32,
            span,
        })
    }

    /// `&name`: registration point for the indirect-call table. The
    /// first reference fixes the table's uniform signature; later
    /// references must match it here, not at call time.
    fn check_func_ref(&mut self, name: &ast::Ident, span: Span) -> Result<hir::Expr, Diagnostic> {
        let Some(&func) = self.env.func_map.get(&name.name) else {
            return Err(Diagnostic::error(
                format!("`&` expects a declared function, `{}` is not one", name.name),
                name.span,
            ));
        };
        let sig = self.env.funcs[func].sig.clone();
        match self.table_sig.as_ref() {
            None => *self.table_sig = Some(sig.clone()),
            Some(existing) if *existing == sig => {}
            Some(existing) => {
                return Err(Diagnostic::error(
                    format!(
                        "function reference signature {} does not match this module's \
                         table signature {}",
                        Type::FnRef(Box::new(sig)),
                        Type::FnRef(Box::new(existing.clone()))
                    ),
                    span,
                ));
            }
        }
        let slot = match self.table.iter().position(|&f| f == func) {
            Some(slot) => slot,
            None => {
                self.table.push(func);
                self.table.len() - 1
            }
        };
        Ok(hir::Expr {
            kind: hir::ExprKind::FuncRefSlot(slot as u32),
            ty: Type::FnRef(Box::new(sig)),
            span,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    fn check_ok(source: &str) -> hir::Module {
        check(&parse(source).expect("parse")).expect("check")
    }

    fn check_err(source: &str) -> Diagnostic {
        check(&parse(source).expect("parse")).unwrap_err()
    }

    #[test]
    fn types_a_simple_function() {
        let module = check_ok("export fn add(a: i32, b: i32) -> i32 { return a + b; }");
        assert_eq!(module.functions.len(), 1);
        let func = &module.functions[0];
        assert!(func.exported);
        assert_eq!(func.result, Type::I32);
    }

    #[test]
    fn rejects_signed_unsigned_mix_without_cast() {
        let err = check_err("fn f(a: i32, b: u32) -> i32 { return a + b; }");
        assert!(err.message.contains("i32"));
        assert!(err.message.contains("u32"));
        assert!(err.message.contains("cast"));
    }

    #[test]
    fn accepts_explicit_cast_between_signedness() {
        check_ok("fn f(a: i32, b: u32) -> i32 { return a + (b as i32); }");
    }

    #[test]
    fn rejects_int_float_mix() {
        let err = check_err("fn f(a: i32, b: f64) -> f64 { return (a as f64) * b + a; }");
        assert!(err.message.contains("mismatched operand types"));
    }

    #[test]
    fn rejects_wrong_argument_count() {
        let err = check_err("fn g(a: i32) -> i32 { return a; } fn f() -> i32 { return g(1, 2); }");
        assert!(err.message.contains("expects 1 argument"));
        assert!(err.message.contains("received 2"));
    }

    #[test]
    fn rejects_pointer_plus_pointer() {
        let err = check_err("fn f(p: ptr<i32>, q: ptr<i32>) -> i32 { return (p + q)[0]; }");
        assert!(err.message.contains("pointer arithmetic"));
    }

    #[test]
    fn pointer_plus_integer_keeps_pointee() {
        let module = check_ok("fn f(p: ptr<i64>, n: i32) -> i64 { return (p + n)[0]; }");
        let func = &module.functions[0];
        let hir::StmtKind::Return(Some(expr)) = &func.body[0].kind else { panic!() };
        assert_eq!(expr.ty, Type::I64);
    }

    #[test]
    fn rejects_unsigned_negation() {
        let err = check_err("fn f(x: u32) -> u32 { return -x; }");
        assert!(err.message.contains("unary `-`"));
    }

    #[test]
    fn rejects_non_bool_condition() {
        let err = check_err("fn f(x: i32) { if x { return; } }");
        assert!(err.message.contains("must be bool"));
    }

    #[test]
    fn rejects_immutable_assignment() {
        let err = check_err("fn f() { let x: i32 = 1; x = 2; }");
        assert!(err.message.contains("immutable"));
    }

    #[test]
    fn child_scope_shadows_parent() {
        check_ok(
            "fn f(x: i32) -> i32 { if x > 0 { let x: bool = true; if x { return 1; } } return x; }",
        );
    }

    #[test]
    fn function_references_share_one_table_signature() {
        let err = check_err(
            "fn a(x: i32) -> i32 { return x; }\
             fn b(x: f64) -> f64 { return x; }\
             fn f() { let p: fnref(i32) -> i32 = &a; let q: fnref(f64) -> f64 = &b; }",
        );
        assert!(err.message.contains("table signature"));
    }

    #[test]
    fn indirect_call_checks_against_carried_signature() {
        let err = check_err(
            "fn a(x: i32) -> i32 { return x; }\
             fn f() -> i32 { let p: fnref(i32) -> i32 = &a; return p(1.5); }",
        );
        assert!(err.message.contains("expected"));
    }

    #[test]
    fn duplicate_table_entries_reuse_slots() {
        let module = check_ok(
            "fn a(x: i32) -> i32 { return x; }\
             fn f() { let p: fnref(i32) -> i32 = &a; let q: fnref(i32) -> i32 = &a; }",
        );
        assert_eq!(module.table.len(), 1);
    }

    #[test]
    fn global_initializers_must_be_literals() {
        let err = check_err("let g: i32 = 1 + 2; fn f() {}");
        assert!(err.message.contains("literal"));
    }

    #[test]
    fn globals_resolve_with_storage_and_mutability() {
        let module = check_ok(
            "let mut counter: i32 = -5; export fn bump() -> i32 { counter = counter + 1; return counter; }",
        );
        assert_eq!(module.globals.len(), 1);
        assert!(module.globals[0].mutable);
        assert_eq!(module.globals[0].init, hir::Const::I32(-5));
    }

    #[test]
    fn plain_literal_out_of_range_for_i32() {
        let err = check_err("fn f() -> i32 { return 4294967295; }");
        assert!(err.message.contains("out of range"));
    }

    #[test]
    fn break_outside_loop_is_rejected() {
        let err = check_err("fn f() { break; }");
        assert!(err.message.contains("break"));
    }

    #[test]
    fn len_requires_array() {
        let err = check_err("fn f(p: ptr<i32>) -> u32 { return len(p); }");
        assert!(err.message.contains("array"));
        check_ok("fn f(a: array<i32>) -> u32 { return len(a); }");
    }

    #[test]
    fn builtin_signatures_are_enforced() {
        let err = check_err("fn f() -> u32 { return popcount(1); }");
        assert!(err.message.contains("u32"));
        check_ok("fn f() -> u32 { return popcount(1u); }");
    }
}
