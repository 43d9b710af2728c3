//! AetherLink: the foreign bridge between compiled modules and the
//! host.
//!
//! Builds the import table a compiled module needs (logging, the
//! file-write callback, the abort trap) and keeps the handle table
//! that lets compiled code refer to host objects as plain integers.
//! Handle lookup is the one operation here that fails loudly: a
//! dangling handle is a caller-side defect, not an expected runtime
//! condition.

use std::any::Any;

use wasmi::{Caller, Linker, Memory};

use alchemist_core::builtins::{self, BuiltinKind};

use crate::error::{RuntimeError, wasm_err};
use crate::view::MemoryView;

/// An opaque host-side value held on behalf of compiled code.
pub type HostValue = Box<dyn Any + Send>;

/// Numeric-handle table. Handles are unique and monotonically
/// increasing for the lifetime of one bridge instance; 0 is reserved
/// as the invalid/null handle.
#[derive(Default)]
pub struct HandleTable {
    next: u32,
    entries: std::collections::HashMap<u32, HostValue>,
}

impl HandleTable {
    pub fn new() -> Self {
        HandleTable::default()
    }

    pub fn register(&mut self, value: HostValue) -> u32 {
        self.next += 1;
        self.entries.insert(self.next, value);
        self.next
    }

    /// Loud lookup: an unknown handle is a programming defect in the
    /// caller and surfaces as an error rather than a sentinel.
    pub fn get(&self, handle: u32) -> Result<&(dyn Any + Send), RuntimeError> {
        match self.entries.get(&handle) {
            Some(value) => Ok(value.as_ref()),
            None => Err(RuntimeError::UnknownHandle(handle)),
        }
    }

    pub fn get_mut(&mut self, handle: u32) -> Result<&mut (dyn Any + Send), RuntimeError> {
        match self.entries.get_mut(&handle) {
            Some(value) => Ok(value.as_mut()),
            None => Err(RuntimeError::UnknownHandle(handle)),
        }
    }

    /// Drop a handle; `false` if it was not registered.
    pub fn remove(&mut self, handle: u32) -> bool {
        self.entries.remove(&handle).is_some()
    }

    pub fn contains(&self, handle: u32) -> bool {
        self.entries.contains_key(&handle)
    }
}

/// One logical resource with a presence on both sides of the sandbox
/// boundary: a memory pointer and a host handle that must be released
/// as a unit. Nothing releases it implicitly; call
/// [`release`](Entangled::release).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Entangled {
    ptr: u32,
    handle: u32,
}

impl Entangled {
    pub fn new(ptr: u32, handle: u32) -> Self {
        Entangled { ptr, handle }
    }

    pub fn ptr(&self) -> u32 {
        self.ptr
    }

    pub fn handle(&self) -> u32 {
        self.handle
    }

    /// Valid only while both halves are non-zero.
    pub fn is_valid(&self) -> bool {
        self.ptr != 0 && self.handle != 0
    }

    /// Release both halves. Idempotent: the first call unregisters the
    /// handle and nulls the pair, later calls do nothing. The memory
    /// half needs no per-object action (the bump allocator reclaims
    /// only via reset).
    pub fn release(&mut self, handles: &mut HandleTable) -> bool {
        if !self.is_valid() {
            return false;
        }
        handles.remove(self.handle);
        self.ptr = 0;
        self.handle = 0;
        true
    }
}

/// A deferred-choice value: a plain candidate list plus a pure
/// resolver that picks one. No machinery beyond that.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unresolved<T> {
    candidates: Vec<T>,
}

impl<T> Unresolved<T> {
    pub fn new(candidates: Vec<T>) -> Self {
        Unresolved { candidates }
    }

    pub fn candidates(&self) -> &[T] {
        &self.candidates
    }

    /// Collapse to one candidate. `chooser` sees the full candidate
    /// list and returns an index; `None` for an empty list or an
    /// out-of-range choice.
    pub fn resolve_with(mut self, chooser: impl FnOnce(&[T]) -> usize) -> Option<T> {
        if self.candidates.is_empty() {
            return None;
        }
        let index = chooser(&self.candidates);
        if index >= self.candidates.len() {
            return None;
        }
        Some(self.candidates.swap_remove(index))
    }
}

/// A file emitted by compiled code through the `write_file` callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrittenFile {
    pub path: String,
    pub contents: Vec<u8>,
}

/// Host-side state carried by a session's store: the memory the
/// module imports, the handle table, and capture buffers for the host
/// callbacks.
#[derive(Default)]
pub struct HostState {
    pub memory: Option<Memory>,
    pub handles: HandleTable,
    pub log_messages: Vec<String>,
    pub files: Vec<WrittenFile>,
}

fn read_module_bytes(caller: &Caller<'_, HostState>, ptr: i32, len: i32) -> Vec<u8> {
    let Some(memory) = caller.data().memory else {
        log::warn!("host callback invoked before memory was configured");
        return Vec::new();
    };
    let view = MemoryView::new(memory.data(caller));
    view.read_bytes(ptr as u32, len as u32).to_vec()
}

/// Install the namespace-grouped host functions a compiled module
/// imports: `host.log`, `host.write_file`, and the `env.abort` trap.
/// The memory import is defined by the session, which owns it.
pub fn install_host_imports(linker: &mut Linker<HostState>) -> Result<(), RuntimeError> {
    let log_import = builtins::host_import(BuiltinKind::Log).expect("log is a host import");
    linker
        .func_wrap(
            log_import.module,
            log_import.name,
            |mut caller: Caller<'_, HostState>, ptr: i32, len: i32| {
                let bytes = read_module_bytes(&caller, ptr, len);
                let message = String::from_utf8_lossy(&bytes).into_owned();
                log::info!(target: "aetherlink", "{message}");
                caller.data_mut().log_messages.push(message);
            },
        )
        .map_err(wasm_err)?;

    let write_import =
        builtins::host_import(BuiltinKind::WriteFile).expect("write_file is a host import");
    linker
        .func_wrap(
            write_import.module,
            write_import.name,
            |mut caller: Caller<'_, HostState>,
             path_ptr: i32,
             path_len: i32,
             content_ptr: i32,
             content_len: i32| {
                let path_bytes = read_module_bytes(&caller, path_ptr, path_len);
                let contents = read_module_bytes(&caller, content_ptr, content_len);
                let path = String::from_utf8_lossy(&path_bytes).into_owned();
                log::debug!(target: "aetherlink", "write_file {path} ({} bytes)", contents.len());
                caller.data_mut().files.push(WrittenFile { path, contents });
            },
        )
        .map_err(wasm_err)?;

    let abort_import = builtins::host_import(BuiltinKind::Abort).expect("abort is a host import");
    linker
        .func_wrap(
            abort_import.module,
            abort_import.name,
            |_caller: Caller<'_, HostState>, code: i32| -> Result<(), wasmi::Error> {
                Err(wasmi::Error::new(format!(
                    "compiled module aborted with code {code}"
                )))
            },
        )
        .map_err(wasm_err)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handles_round_trip_and_grow_from_one() {
        let mut table = HandleTable::new();
        let a = table.register(Box::new(41i32));
        let b = table.register(Box::new(String::from("resource")));
        assert_eq!(a, 1);
        assert_eq!(b, 2);
        let value = table.get(a).expect("registered handle");
        assert_eq!(value.downcast_ref::<i32>(), Some(&41));
        let value = table.get(b).expect("registered handle");
        assert_eq!(
            value.downcast_ref::<String>().map(String::as_str),
            Some("resource")
        );
    }

    #[test]
    fn unknown_handles_fail_loudly() {
        let table = HandleTable::new();
        let err = table.get(7).unwrap_err();
        assert!(matches!(err, RuntimeError::UnknownHandle(7)));
        assert!(err.to_string().contains("unknown handle 7"));
    }

    #[test]
    fn removed_handles_are_not_recycled() {
        let mut table = HandleTable::new();
        let a = table.register(Box::new(1u8));
        assert!(table.remove(a));
        assert!(!table.remove(a));
        let b = table.register(Box::new(2u8));
        assert_eq!(b, a + 1);
        assert!(table.get(a).is_err());
    }

    #[test]
    fn entangled_release_is_idempotent() {
        let mut table = HandleTable::new();
        let handle = table.register(Box::new("both sides"));
        let mut pair = Entangled::new(1024, handle);
        assert!(pair.is_valid());

        assert!(pair.release(&mut table));
        assert!(!pair.is_valid());
        assert_eq!(pair.ptr(), 0);
        assert_eq!(pair.handle(), 0);
        assert!(!table.contains(handle));

        assert!(!pair.release(&mut table), "second release is a no-op");
    }

    #[test]
    fn half_null_pairs_are_invalid() {
        assert!(!Entangled::new(0, 3).is_valid());
        assert!(!Entangled::new(3, 0).is_valid());
    }

    #[test]
    fn unresolved_collapses_through_a_pure_resolver() {
        let value = Unresolved::new(vec!["a", "b", "c"]);
        assert_eq!(value.candidates().len(), 3);
        assert_eq!(value.resolve_with(|c| c.len() - 1), Some("c"));

        let empty: Unresolved<u32> = Unresolved::new(Vec::new());
        assert_eq!(empty.resolve_with(|_| 0), None);

        let short = Unresolved::new(vec![1]);
        assert_eq!(short.resolve_with(|_| 5), None, "out-of-range choice");
    }
}
