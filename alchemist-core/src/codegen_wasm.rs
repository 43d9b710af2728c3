//! WASM backend: lowers typed HIR to a binary module.
//!
//! Every operator maps to the instruction selected by its resolved
//! operand type (signed vs. unsigned division, remainder, shift, and
//! comparison variants), never by operator spelling. The module always
//! imports its linear memory from `env.memory`, sized by the caller's
//! `MemoryLayout`; host functions are imported only when used, in
//! their fixed ABI order. Code generation cannot fail for a program
//! that passed the checker: invariant violations here are defects and
//! panic via `expect`.

use std::collections::HashMap;

use wasm_encoder::{
    BlockType, CodeSection, ConstExpr, DataSection, ElementSection, Elements, EntityType,
    ExportKind, ExportSection, Function, FunctionSection, GlobalSection, GlobalType,
    ImportSection, Instruction, MemArg, MemoryType, Module, RefType, TableSection, TableType,
    TypeSection, ValType,
};

use crate::ast::{BinOp, UnOp};
use crate::builtins::{self, BuiltinKind, ENV_MODULE, Lowering, MEMORY_IMPORT};
use crate::hir;
use crate::types::{FuncSig, Type};

/// First byte of the string data region. The low kilobyte is left
/// untouched as a scratch/null guard area, matching the runtime's
/// view of address 0 as the null pointer.
const STRING_BASE: u32 = 1024;

/// Linear-memory page geometry the emitted module declares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryLayout {
    pub initial_pages: u32,
    pub max_pages: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedModule {
    pub wasm: Vec<u8>,
    /// First byte past the static string data; the runtime heap must
    /// start at or above this address.
    pub data_end: u32,
}

pub fn generate(module: &hir::Module, layout: &MemoryLayout) -> GeneratedModule {
    let usage = collect_usage(module);

    // Interned string literals: offset of the length word, in first
    // appearance order.
    let mut string_offsets: HashMap<String, u32> = HashMap::new();
    let mut data_segments: Vec<(u32, Vec<u8>)> = Vec::new();
    let mut cursor = STRING_BASE;
    for text in &usage.strings {
        let mut bytes = Vec::with_capacity(4 + text.len());
        bytes.extend_from_slice(&(text.len() as u32).to_le_bytes());
        bytes.extend_from_slice(text.as_bytes());
        string_offsets.insert(text.clone(), cursor);
        data_segments.push((cursor, bytes));
        cursor += (4 + text.len() as u32).div_ceil(8) * 8;
    }
    let data_end = cursor;

    let mut types = TypeTable::default();

    // Host imports first: their order fixes the low function indices.
    let mut imports = ImportSection::new();
    imports.import(
        ENV_MODULE,
        MEMORY_IMPORT,
        EntityType::Memory(MemoryType {
            minimum: u64::from(layout.initial_pages),
            maximum: Some(u64::from(layout.max_pages)),
            memory64: false,
            shared: false,
            page_size_log2: None,
        }),
    );
    let mut builtin_indices: HashMap<BuiltinKind, u32> = HashMap::new();
    for descriptor in builtins::HOST_IMPORTS {
        if !usage.host.contains(&descriptor.kind) {
            continue;
        }
        let type_index = types.intern(descriptor.params.to_vec(), descriptor.results.to_vec());
        let func_index = builtin_indices.len() as u32;
        imports.import(
            descriptor.module,
            descriptor.name,
            EntityType::Function(type_index),
        );
        builtin_indices.insert(descriptor.kind, func_index);
    }
    let import_count = builtin_indices.len() as u32;

    let mut functions = FunctionSection::new();
    for func in &module.functions {
        let (params, results) = sig_val_types(&FuncSig {
            params: func.params.clone(),
            result: func.result.clone(),
        });
        functions.function(types.intern(params, results));
    }
    let mask_index = if usage.mask {
        let index = import_count + module.functions.len() as u32;
        let type_index = types.intern(
            vec![ValType::I32, ValType::I32],
            vec![ValType::I32],
        );
        functions.function(type_index);
        Some(index)
    } else {
        None
    };

    let indirect_type = module.table_sig.as_ref().map(|sig| {
        let (params, results) = sig_val_types(sig);
        types.intern(params, results)
    });

    let mut code = CodeSection::new();
    for func in &module.functions {
        let mut ctx = FuncCtx {
            import_count,
            builtin_indices: &builtin_indices,
            mask_index,
            indirect_type,
            string_offsets: &string_offsets,
            instructions: Vec::new(),
            first_scratch: (func.params.len() + func.locals.len()) as u32,
            scratch_count: 0,
            depth: 0,
            loops: Vec::new(),
        };
        for stmt in &func.body {
            ctx.emit_stmt(stmt);
        }
        if !func.result.is_unit() {
            // A checked body either returned on every path or traps
            // here; the polymorphic stack keeps validation happy.
            ctx.push(Instruction::Unreachable);
        }
        ctx.push(Instruction::End);

        let mut locals: Vec<(u32, ValType)> = func
            .locals
            .iter()
            .map(|ty| (1, ty.val_type().expect("locals are value types")))
            .collect();
        if ctx.scratch_count > 0 {
            locals.push((ctx.scratch_count, ValType::I32));
        }
        let mut body = Function::new(locals);
        for instruction in &ctx.instructions {
            body.instruction(instruction);
        }
        code.function(&body);
    }
    if usage.mask {
        code.function(&mask_body());
    }

    // Assemble sections in the order the format requires.
    let mut out = Module::new();
    out.section(&types.section);
    out.section(&imports);
    out.section(&functions);

    if !module.table.is_empty() {
        let mut tables = TableSection::new();
        tables.table(TableType {
            element_type: RefType::FUNCREF,
            minimum: module.table.len() as u64,
            maximum: Some(module.table.len() as u64),
            table64: false,
            shared: false,
        });
        out.section(&tables);
    }

    if !module.globals.is_empty() {
        let mut globals = GlobalSection::new();
        for global in &module.globals {
            globals.global(
                GlobalType {
                    val_type: global.ty.val_type().expect("globals are value types"),
                    mutable: global.mutable,
                    shared: false,
                },
                &const_expr(&global.init),
            );
        }
        out.section(&globals);
    }

    let mut exports = ExportSection::new();
    for (i, func) in module.functions.iter().enumerate() {
        if func.exported {
            exports.export(&func.name, ExportKind::Func, import_count + i as u32);
        }
    }
    out.section(&exports);

    if !module.table.is_empty() {
        let func_indices: Vec<u32> = module
            .table
            .iter()
            .map(|&f| import_count + f as u32)
            .collect();
        let mut elements = ElementSection::new();
        elements.active(
            Some(0),
            &ConstExpr::i32_const(0),
            Elements::Functions(func_indices.into()),
        );
        out.section(&elements);
    }

    out.section(&code);

    if !data_segments.is_empty() {
        let mut data = DataSection::new();
        for (offset, bytes) in &data_segments {
            data.active(0, &ConstExpr::i32_const(*offset as i32), bytes.iter().copied());
        }
        out.section(&data);
    }

    GeneratedModule {
        wasm: out.finish(),
        data_end,
    }
}

fn const_expr(init: &hir::Const) -> ConstExpr {
    match init {
        hir::Const::I32(v) => ConstExpr::i32_const(*v),
        hir::Const::I64(v) => ConstExpr::i64_const(*v),
        hir::Const::F32(v) => ConstExpr::f32_const((*v).into()),
        hir::Const::F64(v) => ConstExpr::f64_const((*v).into()),
    }
}

/// Deduplicating function-type section.
#[derive(Default)]
struct TypeTable {
    section: TypeSection,
    interned: HashMap<(Vec<ValType>, Vec<ValType>), u32>,
}

impl TypeTable {
    fn intern(&mut self, params: Vec<ValType>, results: Vec<ValType>) -> u32 {
        if let Some(&index) = self.interned.get(&(params.clone(), results.clone())) {
            return index;
        }
        let index = self.section.len();
        self.section
            .ty()
            .function(params.iter().copied(), results.iter().copied());
        self.interned.insert((params, results), index);
        index
    }
}

fn sig_val_types(sig: &FuncSig) -> (Vec<ValType>, Vec<ValType>) {
    let params = sig
        .params
        .iter()
        .map(|ty| ty.val_type().expect("params are value types"))
        .collect();
    let results = match sig.result.val_type() {
        Some(vt) => vec![vt],
        None => Vec::new(),
    };
    (params, results)
}

/// What a module actually uses, gathered in one walk so imports and
/// the synthesized helper are emitted only when referenced.
#[derive(Default)]
struct Usage {
    host: Vec<BuiltinKind>,
    mask: bool,
    strings: Vec<String>,
}

fn collect_usage(module: &hir::Module) -> Usage {
    let mut usage = Usage::default();
    for func in &module.functions {
        for stmt in &func.body {
            walk_stmt(stmt, &mut usage);
        }
    }
    usage
}

fn walk_stmt(stmt: &hir::Stmt, usage: &mut Usage) {
    match &stmt.kind {
        hir::StmtKind::LocalSet { value, .. } | hir::StmtKind::GlobalSet { value, .. } => {
            walk_expr(value, usage);
        }
        hir::StmtKind::Store { base, index, value, .. } => {
            walk_expr(base, usage);
            walk_expr(index, usage);
            walk_expr(value, usage);
        }
        hir::StmtKind::If { cond, then_body, else_body } => {
            walk_expr(cond, usage);
            for s in then_body.iter().chain(else_body) {
                walk_stmt(s, usage);
            }
        }
        hir::StmtKind::While { cond, body } => {
            walk_expr(cond, usage);
            for s in body {
                walk_stmt(s, usage);
            }
        }
        hir::StmtKind::Return(Some(value)) => walk_expr(value, usage),
        hir::StmtKind::Return(None) | hir::StmtKind::Break | hir::StmtKind::Continue => {}
        hir::StmtKind::Expr(expr) => walk_expr(expr, usage),
    }
}

fn walk_expr(expr: &hir::Expr, usage: &mut Usage) {
    match &expr.kind {
        hir::ExprKind::Str(text) => {
            if !usage.strings.contains(text) {
                usage.strings.push(text.clone());
            }
        }
        hir::ExprKind::Binary { lhs, rhs, .. } => {
            walk_expr(lhs, usage);
            walk_expr(rhs, usage);
        }
        hir::ExprKind::Unary { operand, .. } | hir::ExprKind::Cast { operand } => {
            walk_expr(operand, usage);
        }
        hir::ExprKind::CallDirect { args, .. } => {
            for arg in args {
                walk_expr(arg, usage);
            }
        }
        hir::ExprKind::CallBuiltin { builtin, args } => {
            match builtin.lowering() {
                Lowering::HostImport => {
                    if !usage.host.contains(builtin) {
                        usage.host.push(*builtin);
                    }
                }
                Lowering::Synthesized => usage.mask = true,
                Lowering::Instruction => {}
            }
            for arg in args {
                walk_expr(arg, usage);
            }
        }
        hir::ExprKind::CallIndirect { callee, args, .. } => {
            walk_expr(callee, usage);
            for arg in args {
                walk_expr(arg, usage);
            }
        }
        hir::ExprKind::Load { base, index, .. } => {
            walk_expr(base, usage);
            walk_expr(index, usage);
        }
        hir::ExprKind::ArrayLen(base) => walk_expr(base, usage),
        hir::ExprKind::ConstI32(_)
        | hir::ExprKind::ConstI64(_)
        | hir::ExprKind::ConstF32(_)
        | hir::ExprKind::ConstF64(_)
        | hir::ExprKind::LocalGet(_)
        | hir::ExprKind::GlobalGet(_)
        | hir::ExprKind::FuncRefSlot(_) => {}
    }
}

struct LoopCtx {
    /// Nesting level of the wrapping exit block (`break` target).
    block_level: u32,
    /// Nesting level of the loop itself (`continue` target).
    loop_level: u32,
}

struct FuncCtx<'m> {
    import_count: u32,
    builtin_indices: &'m HashMap<BuiltinKind, u32>,
    mask_index: Option<u32>,
    indirect_type: Option<u32>,
    string_offsets: &'m HashMap<String, u32>,
    instructions: Vec<Instruction<'static>>,
    first_scratch: u32,
    scratch_count: u32,
    depth: u32,
    loops: Vec<LoopCtx>,
}

impl<'m> FuncCtx<'m> {
    fn push(&mut self, instruction: Instruction<'static>) {
        self.instructions.push(instruction);
    }

    /// Index of the `slot`th i32 scratch local, allocating on demand.
    /// Scratch locals sit after the declared locals.
    fn scratch(&mut self, slot: u32) -> u32 {
        if slot >= self.scratch_count {
            self.scratch_count = slot + 1;
        }
        self.first_scratch + slot
    }

    fn emit_stmt(&mut self, stmt: &hir::Stmt) {
        match &stmt.kind {
            hir::StmtKind::LocalSet { index, value } => {
                self.emit_expr(value);
                self.push(Instruction::LocalSet(*index));
            }
            hir::StmtKind::GlobalSet { index, value } => {
                self.emit_expr(value);
                self.push(Instruction::GlobalSet(*index));
            }
            hir::StmtKind::Store { base, index, value, elem, length_prefixed } => {
                self.emit_element_addr(base, index, elem);
                self.emit_expr(value);
                let memarg = element_memarg(elem, *length_prefixed);
                self.push(match elem.val_type().expect("storable element") {
                    ValType::I32 => Instruction::I32Store(memarg),
                    ValType::I64 => Instruction::I64Store(memarg),
                    ValType::F32 => Instruction::F32Store(memarg),
                    ValType::F64 => Instruction::F64Store(memarg),
                    other => unreachable!("element type lowers to {other:?}"),
                });
            }
            hir::StmtKind::If { cond, then_body, else_body } => {
                self.emit_expr(cond);
                self.push(Instruction::If(BlockType::Empty));
                self.depth += 1;
                for s in then_body {
                    self.emit_stmt(s);
                }
                if !else_body.is_empty() {
                    self.push(Instruction::Else);
                    for s in else_body {
                        self.emit_stmt(s);
                    }
                }
                self.push(Instruction::End);
                self.depth -= 1;
            }
            hir::StmtKind::While { cond, body } => {
                let block_level = self.depth;
                self.push(Instruction::Block(BlockType::Empty));
                self.depth += 1;
                let loop_level = self.depth;
                self.push(Instruction::Loop(BlockType::Empty));
                self.depth += 1;

                self.emit_expr(cond);
                self.push(Instruction::I32Eqz);
                self.push(Instruction::BrIf(self.depth - 1 - block_level));

                self.loops.push(LoopCtx { block_level, loop_level });
                for s in body {
                    self.emit_stmt(s);
                }
                self.loops.pop();

                self.push(Instruction::Br(self.depth - 1 - loop_level));
                self.push(Instruction::End);
                self.depth -= 1;
                self.push(Instruction::End);
                self.depth -= 1;
            }
            hir::StmtKind::Return(value) => {
                if let Some(value) = value {
                    self.emit_expr(value);
                }
                self.push(Instruction::Return);
            }
            hir::StmtKind::Break => {
                let target = self.loops.last().expect("break inside a loop").block_level;
                self.push(Instruction::Br(self.depth - 1 - target));
            }
            hir::StmtKind::Continue => {
                let target = self.loops.last().expect("continue inside a loop").loop_level;
                self.push(Instruction::Br(self.depth - 1 - target));
            }
            hir::StmtKind::Expr(expr) => {
                self.emit_expr(expr);
                if !expr.ty.is_unit() {
                    self.push(Instruction::Drop);
                }
            }
        }
    }

    fn emit_expr(&mut self, expr: &hir::Expr) {
        match &expr.kind {
            hir::ExprKind::ConstI32(v) => self.push(Instruction::I32Const(*v)),
            hir::ExprKind::ConstI64(v) => self.push(Instruction::I64Const(*v)),
            hir::ExprKind::ConstF32(v) => self.push(Instruction::F32Const((*v).into())),
            hir::ExprKind::ConstF64(v) => self.push(Instruction::F64Const((*v).into())),
            hir::ExprKind::Str(text) => {
                let offset = *self
                    .string_offsets
                    .get(text)
                    .expect("string literal was interned");
                self.push(Instruction::I32Const(offset as i32));
            }
            hir::ExprKind::LocalGet(index) => self.push(Instruction::LocalGet(*index)),
            hir::ExprKind::GlobalGet(index) => self.push(Instruction::GlobalGet(*index)),
            hir::ExprKind::Binary { op, lhs, rhs } => self.emit_binary(*op, lhs, rhs),
            hir::ExprKind::Unary { op, operand } => self.emit_unary(*op, operand),
            hir::ExprKind::Cast { operand } => {
                self.emit_expr(operand);
                self.emit_cast(&operand.ty, &expr.ty);
            }
            hir::ExprKind::CallDirect { func, args } => {
                for arg in args {
                    self.emit_expr(arg);
                }
                self.push(Instruction::Call(self.import_count + *func as u32));
            }
            hir::ExprKind::CallBuiltin { builtin, args } => self.emit_builtin(*builtin, args),
            hir::ExprKind::CallIndirect { callee, args, .. } => {
                for arg in args {
                    self.emit_expr(arg);
                }
                self.emit_expr(callee);
                self.push(Instruction::CallIndirect {
                    type_index: self.indirect_type.expect("indirect type interned"),
                    table_index: 0,
                });
            }
            hir::ExprKind::FuncRefSlot(slot) => {
                self.push(Instruction::I32Const(*slot as i32));
            }
            hir::ExprKind::Load { base, index, elem, length_prefixed } => {
                self.emit_element_addr(base, index, elem);
                let memarg = element_memarg(elem, *length_prefixed);
                self.push(match elem.val_type().expect("storable element") {
                    ValType::I32 => Instruction::I32Load(memarg),
                    ValType::I64 => Instruction::I64Load(memarg),
                    ValType::F32 => Instruction::F32Load(memarg),
                    ValType::F64 => Instruction::F64Load(memarg),
                    other => unreachable!("element type lowers to {other:?}"),
                });
            }
            hir::ExprKind::ArrayLen(base) => {
                self.emit_expr(base);
                self.push(Instruction::I32Load(MemArg {
                    offset: 0,
                    align: 2,
                    memory_index: 0,
                }));
            }
        }
    }

    /// Push the byte address of element `index` of `base` (without the
    /// length-prefix displacement, which goes into the memarg offset).
    fn emit_element_addr(&mut self, base: &hir::Expr, index: &hir::Expr, elem: &Type) {
        self.emit_expr(base);
        self.emit_expr(index);
        let size = elem.byte_size();
        if size > 1 {
            self.push(Instruction::I32Const(size as i32));
            self.push(Instruction::I32Mul);
        }
        self.push(Instruction::I32Add);
    }

    fn emit_binary(&mut self, op: BinOp, lhs: &hir::Expr, rhs: &hir::Expr) {
        // Pointer arithmetic scales the integer offset by element size.
        if let Type::Ptr(elem) = &lhs.ty {
            if matches!(op, BinOp::Add | BinOp::Sub) {
                self.emit_expr(lhs);
                self.emit_expr(rhs);
                let size = elem.byte_size();
                if size > 1 {
                    self.push(Instruction::I32Const(size as i32));
                    self.push(Instruction::I32Mul);
                }
                self.push(match op {
                    BinOp::Add => Instruction::I32Add,
                    _ => Instruction::I32Sub,
                });
                return;
            }
        }

        self.emit_expr(lhs);
        self.emit_expr(rhs);
        self.push(binary_instruction(op, &lhs.ty));
    }

    fn emit_unary(&mut self, op: UnOp, operand: &hir::Expr) {
        match (op, &operand.ty) {
            (UnOp::Neg, Type::F32) => {
                self.emit_expr(operand);
                self.push(Instruction::F32Neg);
            }
            (UnOp::Neg, Type::F64) => {
                self.emit_expr(operand);
                self.push(Instruction::F64Neg);
            }
            (UnOp::Neg, Type::I64) => {
                self.push(Instruction::I64Const(0));
                self.emit_expr(operand);
                self.push(Instruction::I64Sub);
            }
            (UnOp::Neg, _) => {
                self.push(Instruction::I32Const(0));
                self.emit_expr(operand);
                self.push(Instruction::I32Sub);
            }
            (UnOp::Not, _) => {
                self.emit_expr(operand);
                self.push(Instruction::I32Eqz);
            }
            (UnOp::BitNot, Type::I64 | Type::U64) => {
                self.emit_expr(operand);
                self.push(Instruction::I64Const(-1));
                self.push(Instruction::I64Xor);
            }
            (UnOp::BitNot, _) => {
                self.emit_expr(operand);
                self.push(Instruction::I32Const(-1));
                self.push(Instruction::I32Xor);
            }
        }
    }

    fn emit_builtin(&mut self, builtin: BuiltinKind, args: &[hir::Expr]) {
        match builtin {
            BuiltinKind::Log => {
                // (ptr, len) pair from a length-prefixed string ref.
                let s0 = self.scratch(0);
                self.emit_expr(&args[0]);
                self.push(Instruction::LocalSet(s0));
                self.emit_str_parts(s0);
                self.emit_host_call(BuiltinKind::Log);
            }
            BuiltinKind::WriteFile => {
                let s0 = self.scratch(0);
                let s1 = self.scratch(1);
                self.emit_expr(&args[0]);
                self.push(Instruction::LocalSet(s0));
                self.emit_expr(&args[1]);
                self.push(Instruction::LocalSet(s1));
                self.emit_str_parts(s0);
                self.emit_str_parts(s1);
                self.emit_host_call(BuiltinKind::WriteFile);
            }
            BuiltinKind::Abort => {
                self.emit_expr(&args[0]);
                self.emit_host_call(BuiltinKind::Abort);
            }
            BuiltinKind::Popcount | BuiltinKind::Clz | BuiltinKind::Ctz => {
                self.emit_expr(&args[0]);
                self.push(match builtin {
                    BuiltinKind::Popcount => Instruction::I32Popcnt,
                    BuiltinKind::Clz => Instruction::I32Clz,
                    _ => Instruction::I32Ctz,
                });
            }
            BuiltinKind::Rotl | BuiltinKind::Rotr => {
                self.emit_expr(&args[0]);
                self.emit_expr(&args[1]);
                self.push(if builtin == BuiltinKind::Rotl {
                    Instruction::I32Rotl
                } else {
                    Instruction::I32Rotr
                });
            }
            BuiltinKind::Mask => {
                self.emit_expr(&args[0]);
                self.emit_expr(&args[1]);
                self.push(Instruction::Call(
                    self.mask_index.expect("mask helper emitted"),
                ));
            }
        }
    }

    /// Push `(data_ptr, len)` for the string reference held in a
    /// scratch local.
    fn emit_str_parts(&mut self, local: u32) {
        self.push(Instruction::LocalGet(local));
        self.push(Instruction::I32Const(4));
        self.push(Instruction::I32Add);
        self.push(Instruction::LocalGet(local));
        self.push(Instruction::I32Load(MemArg {
            offset: 0,
            align: 2,
            memory_index: 0,
        }));
    }

    fn emit_host_call(&mut self, kind: BuiltinKind) {
        let index = *self
            .builtin_indices
            .get(&kind)
            .expect("host import registered during usage collection");
        self.push(Instruction::Call(index));
    }

    fn emit_cast(&mut self, from: &Type, to: &Type) {
        use Type::*;
        let instructions: &[Instruction<'static>] = match (from, to) {
            // Same lowering: reinterpret only.
            (I32 | U32 | Bool, I32 | U32) => &[],
            (I64 | U64, I64 | U64) => &[],
            (F32, F32) | (F64, F64) => &[],

            (Bool, I64 | U64) => &[Instruction::I64ExtendI32U],
            // Widening follows the signedness of the source.
            (I32, I64 | U64) => &[Instruction::I64ExtendI32S],
            (U32, I64 | U64) => &[Instruction::I64ExtendI32U],
            (I64 | U64, I32 | U32) => &[Instruction::I32WrapI64],

            (I32, F32) => &[Instruction::F32ConvertI32S],
            (U32, F32) => &[Instruction::F32ConvertI32U],
            (I32, F64) => &[Instruction::F64ConvertI32S],
            (U32, F64) => &[Instruction::F64ConvertI32U],
            (I64, F32) => &[Instruction::F32ConvertI64S],
            (U64, F32) => &[Instruction::F32ConvertI64U],
            (I64, F64) => &[Instruction::F64ConvertI64S],
            (U64, F64) => &[Instruction::F64ConvertI64U],

            // Truncation follows the signedness of the target.
            (F32, I32) => &[Instruction::I32TruncF32S],
            (F32, U32) => &[Instruction::I32TruncF32U],
            (F64, I32) => &[Instruction::I32TruncF64S],
            (F64, U32) => &[Instruction::I32TruncF64U],
            (F32, I64) => &[Instruction::I64TruncF32S],
            (F32, U64) => &[Instruction::I64TruncF32U],
            (F64, I64) => &[Instruction::I64TruncF64S],
            (F64, U64) => &[Instruction::I64TruncF64U],

            (F32, F64) => &[Instruction::F64PromoteF32],
            (F64, F32) => &[Instruction::F32DemoteF64],

            (from, to) => unreachable!("checker admitted cast {from} -> {to}"),
        };
        for instruction in instructions {
            self.push(instruction.clone());
        }
    }
}

fn element_memarg(elem: &Type, length_prefixed: bool) -> MemArg {
    MemArg {
        offset: if length_prefixed { 4 } else { 0 },
        align: if elem.byte_size() == 8 { 3 } else { 2 },
        memory_index: 0,
    }
}

/// Select the instruction for a binary operator from the resolved
/// operand type. Comparison results are bool; everything else keeps
/// the operand type.
fn binary_instruction(op: BinOp, operand: &Type) -> Instruction<'static> {
    use Type::*;
    match operand {
        I32 => match op {
            BinOp::Add => Instruction::I32Add,
            BinOp::Sub => Instruction::I32Sub,
            BinOp::Mul => Instruction::I32Mul,
            BinOp::Div => Instruction::I32DivS,
            BinOp::Rem => Instruction::I32RemS,
            BinOp::BitAnd => Instruction::I32And,
            BinOp::BitOr => Instruction::I32Or,
            BinOp::BitXor => Instruction::I32Xor,
            BinOp::Shl => Instruction::I32Shl,
            BinOp::Shr => Instruction::I32ShrS,
            BinOp::Eq => Instruction::I32Eq,
            BinOp::Ne => Instruction::I32Ne,
            BinOp::Lt => Instruction::I32LtS,
            BinOp::Le => Instruction::I32LeS,
            BinOp::Gt => Instruction::I32GtS,
            BinOp::Ge => Instruction::I32GeS,
            BinOp::And | BinOp::Or => unreachable!("logical ops type as bool"),
        },
        U32 => match op {
            BinOp::Add => Instruction::I32Add,
            BinOp::Sub => Instruction::I32Sub,
            BinOp::Mul => Instruction::I32Mul,
            BinOp::Div => Instruction::I32DivU,
            BinOp::Rem => Instruction::I32RemU,
            BinOp::BitAnd => Instruction::I32And,
            BinOp::BitOr => Instruction::I32Or,
            BinOp::BitXor => Instruction::I32Xor,
            BinOp::Shl => Instruction::I32Shl,
            BinOp::Shr => Instruction::I32ShrU,
            BinOp::Eq => Instruction::I32Eq,
            BinOp::Ne => Instruction::I32Ne,
            BinOp::Lt => Instruction::I32LtU,
            BinOp::Le => Instruction::I32LeU,
            BinOp::Gt => Instruction::I32GtU,
            BinOp::Ge => Instruction::I32GeU,
            BinOp::And | BinOp::Or => unreachable!("logical ops type as bool"),
        },
        I64 => match op {
            BinOp::Add => Instruction::I64Add,
            BinOp::Sub => Instruction::I64Sub,
            BinOp::Mul => Instruction::I64Mul,
            BinOp::Div => Instruction::I64DivS,
            BinOp::Rem => Instruction::I64RemS,
            BinOp::BitAnd => Instruction::I64And,
            BinOp::BitOr => Instruction::I64Or,
            BinOp::BitXor => Instruction::I64Xor,
            BinOp::Shl => Instruction::I64Shl,
            BinOp::Shr => Instruction::I64ShrS,
            BinOp::Eq => Instruction::I64Eq,
            BinOp::Ne => Instruction::I64Ne,
            BinOp::Lt => Instruction::I64LtS,
            BinOp::Le => Instruction::I64LeS,
            BinOp::Gt => Instruction::I64GtS,
            BinOp::Ge => Instruction::I64GeS,
            BinOp::And | BinOp::Or => unreachable!("logical ops type as bool"),
        },
        U64 => match op {
            BinOp::Add => Instruction::I64Add,
            BinOp::Sub => Instruction::I64Sub,
            BinOp::Mul => Instruction::I64Mul,
            BinOp::Div => Instruction::I64DivU,
            BinOp::Rem => Instruction::I64RemU,
            BinOp::BitAnd => Instruction::I64And,
            BinOp::BitOr => Instruction::I64Or,
            BinOp::BitXor => Instruction::I64Xor,
            BinOp::Shl => Instruction::I64Shl,
            BinOp::Shr => Instruction::I64ShrU,
            BinOp::Eq => Instruction::I64Eq,
            BinOp::Ne => Instruction::I64Ne,
            BinOp::Lt => Instruction::I64LtU,
            BinOp::Le => Instruction::I64LeU,
            BinOp::Gt => Instruction::I64GtU,
            BinOp::Ge => Instruction::I64GeU,
            BinOp::And | BinOp::Or => unreachable!("logical ops type as bool"),
        },
        F32 => match op {
            BinOp::Add => Instruction::F32Add,
            BinOp::Sub => Instruction::F32Sub,
            BinOp::Mul => Instruction::F32Mul,
            BinOp::Div => Instruction::F32Div,
            BinOp::Eq => Instruction::F32Eq,
            BinOp::Ne => Instruction::F32Ne,
            BinOp::Lt => Instruction::F32Lt,
            BinOp::Le => Instruction::F32Le,
            BinOp::Gt => Instruction::F32Gt,
            BinOp::Ge => Instruction::F32Ge,
            other => unreachable!("checker admitted `{}` on f32", other.symbol()),
        },
        F64 => match op {
            BinOp::Add => Instruction::F64Add,
            BinOp::Sub => Instruction::F64Sub,
            BinOp::Mul => Instruction::F64Mul,
            BinOp::Div => Instruction::F64Div,
            BinOp::Eq => Instruction::F64Eq,
            BinOp::Ne => Instruction::F64Ne,
            BinOp::Lt => Instruction::F64Lt,
            BinOp::Le => Instruction::F64Le,
            BinOp::Gt => Instruction::F64Gt,
            BinOp::Ge => Instruction::F64Ge,
            other => unreachable!("checker admitted `{}` on f64", other.symbol()),
        },
        Bool => match op {
            BinOp::And | BinOp::BitAnd => Instruction::I32And,
            BinOp::Or | BinOp::BitOr => Instruction::I32Or,
            BinOp::Eq => Instruction::I32Eq,
            BinOp::Ne => Instruction::I32Ne,
            other => unreachable!("checker admitted `{}` on bool", other.symbol()),
        },
        Ptr(_) | Str | Array(_) | Handle | FnRef(_) => match op {
            BinOp::Eq => Instruction::I32Eq,
            BinOp::Ne => Instruction::I32Ne,
            other => unreachable!("checker admitted `{}` on a reference", other.symbol()),
        },
        Unit => unreachable!("unit has no operators"),
    }
}

/// Body of the synthesized `mask` helper:
/// `((count >= 32 ? -1 : (1 << count) - 1) << start)`.
fn mask_body() -> Function {
    let mut func = Function::new(Vec::new());
    func.instruction(&Instruction::I32Const(-1));
    func.instruction(&Instruction::I32Const(1));
    func.instruction(&Instruction::LocalGet(1));
    func.instruction(&Instruction::I32Shl);
    func.instruction(&Instruction::I32Const(1));
    func.instruction(&Instruction::I32Sub);
    func.instruction(&Instruction::LocalGet(1));
    func.instruction(&Instruction::I32Const(32));
    func.instruction(&Instruction::I32GeU);
    func.instruction(&Instruction::Select);
    func.instruction(&Instruction::LocalGet(0));
    func.instruction(&Instruction::I32Shl);
    func.instruction(&Instruction::End);
    func
}
