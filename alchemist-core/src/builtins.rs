//! Builtins visible at the Alloy language level, and the host ABI.
//!
//! One table serves both sides of the sandbox boundary: the type
//! checker uses the language-level signatures, the code generator maps
//! host builtins to wasm imports, and the runtime linker registers the
//! same module/name pairs. Names and arities here are the stable ABI
//! between generated modules and the AetherLink bridge.

use wasm_encoder::ValType;

use crate::types::{FuncSig, Type};

/// Wasm namespace for host callback functions (logging, file writes).
pub const HOST_MODULE: &str = "host";
/// Wasm namespace for environment-level items (abort trap, memory).
pub const ENV_MODULE: &str = "env";
/// Import name of the linear memory inside [`ENV_MODULE`].
pub const MEMORY_IMPORT: &str = "memory";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuiltinKind {
    /// Log a string in module memory; `(ptr, len)` pair.
    Log,
    /// Write a file; `(path_ptr, path_len, content_ptr, content_len)`.
    WriteFile,
    /// Trap the instance with an error code.
    Abort,
    Popcount,
    Clz,
    Ctz,
    Rotl,
    Rotr,
    /// `mask(start, count)`: `count` one-bits starting at `start`.
    Mask,
}

/// How a builtin call lowers during code generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lowering {
    /// Call into a host import.
    HostImport,
    /// A single wasm instruction.
    Instruction,
    /// A module-internal function synthesized on first use.
    Synthesized,
}

impl BuiltinKind {
    pub fn lowering(self) -> Lowering {
        match self {
            BuiltinKind::Log | BuiltinKind::WriteFile | BuiltinKind::Abort => {
                Lowering::HostImport
            }
            BuiltinKind::Mask => Lowering::Synthesized,
            _ => Lowering::Instruction,
        }
    }

    /// The language-level signature checked at every call site.
    pub fn signature(self) -> FuncSig {
        match self {
            BuiltinKind::Log => FuncSig {
                params: vec![Type::Str],
                result: Type::Unit,
            },
            BuiltinKind::WriteFile => FuncSig {
                params: vec![Type::Str, Type::Str],
                result: Type::Unit,
            },
            BuiltinKind::Abort => FuncSig {
                params: vec![Type::I32],
                result: Type::Unit,
            },
            BuiltinKind::Popcount | BuiltinKind::Clz | BuiltinKind::Ctz => FuncSig {
                params: vec![Type::U32],
                result: Type::U32,
            },
            BuiltinKind::Rotl | BuiltinKind::Rotr | BuiltinKind::Mask => FuncSig {
                params: vec![Type::U32, Type::U32],
                result: Type::U32,
            },
        }
    }
}

/// Wasm-level shape of one host import.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostImportDescriptor {
    pub kind: BuiltinKind,
    pub module: &'static str,
    pub name: &'static str,
    pub params: &'static [ValType],
    pub results: &'static [ValType],
}

/// Host imports in their fixed ABI order. Generated modules import
/// only the subset they use, but always in this relative order.
pub const HOST_IMPORTS: &[HostImportDescriptor] = &[
    HostImportDescriptor {
        kind: BuiltinKind::Log,
        module: HOST_MODULE,
        name: "log",
        params: &[ValType::I32, ValType::I32],
        results: &[],
    },
    HostImportDescriptor {
        kind: BuiltinKind::WriteFile,
        module: HOST_MODULE,
        name: "write_file",
        params: &[ValType::I32, ValType::I32, ValType::I32, ValType::I32],
        results: &[],
    },
    HostImportDescriptor {
        kind: BuiltinKind::Abort,
        module: ENV_MODULE,
        name: "abort",
        params: &[ValType::I32],
        results: &[],
    },
];

/// Look up a builtin by its Alloy-level name.
///
/// Linear over a small table, same as the host-import scan. User
/// declarations shadow builtins; the checker consults this only after
/// symbol lookup fails.
pub fn find_builtin(name: &str) -> Option<BuiltinKind> {
    match name {
        "log" => Some(BuiltinKind::Log),
        "write_file" => Some(BuiltinKind::WriteFile),
        "abort" => Some(BuiltinKind::Abort),
        "popcount" => Some(BuiltinKind::Popcount),
        "clz" => Some(BuiltinKind::Clz),
        "ctz" => Some(BuiltinKind::Ctz),
        "rotl" => Some(BuiltinKind::Rotl),
        "rotr" => Some(BuiltinKind::Rotr),
        "mask" => Some(BuiltinKind::Mask),
        _ => None,
    }
}

pub fn host_import(kind: BuiltinKind) -> Option<&'static HostImportDescriptor> {
    HOST_IMPORTS.iter().find(|d| d.kind == kind)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_imports_resolve_by_kind() {
        let log = host_import(BuiltinKind::Log).expect("log descriptor");
        assert_eq!((log.module, log.name), ("host", "log"));
        assert_eq!(log.params.len(), 2);
        let abort = host_import(BuiltinKind::Abort).expect("abort descriptor");
        assert_eq!((abort.module, abort.name), ("env", "abort"));
    }

    #[test]
    fn instruction_builtins_have_no_import() {
        assert_eq!(host_import(BuiltinKind::Popcount), None);
        assert_eq!(BuiltinKind::Popcount.lowering(), Lowering::Instruction);
        assert_eq!(BuiltinKind::Mask.lowering(), Lowering::Synthesized);
    }

    #[test]
    fn builtin_names_resolve() {
        assert_eq!(find_builtin("rotl"), Some(BuiltinKind::Rotl));
        assert_eq!(find_builtin("no_such"), None);
    }
}
