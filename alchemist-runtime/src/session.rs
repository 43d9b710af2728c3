//! Per-run execution context.
//!
//! One `Session` owns everything a compile-and-run needs: the wasmi
//! engine and store, the host-created linear memory the module
//! imports, the bump allocator over that memory, and the AetherLink
//! host state. Nothing is global; independent sessions never share
//! mutable state, so they are safe to run concurrently.

use wasmi::{Engine, Instance, Linker, Memory, MemoryType, Store};

use alchemist_core::builtins::{ENV_MODULE, MEMORY_IMPORT};
use alchemist_core::{CompilationArtifact, CompileOptions, compile};

use crate::bridge::{self, Entangled, HostState, HostValue};
use crate::error::{RuntimeError, wasm_err};
use crate::memory::{AllocStats, BumpAllocator, LinearMemory, PAGE_SIZE};
use crate::view::{MemoryView, MemoryViewMut};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    pub initial_pages: u32,
    pub max_pages: u32,
    /// First heap byte handed out by the allocator. Raised
    /// automatically past a module's static data on instantiation.
    pub heap_start: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            initial_pages: 2,
            max_pages: 64,
            heap_start: PAGE_SIZE,
        }
    }
}

impl SessionConfig {
    pub fn compile_options(&self) -> CompileOptions {
        CompileOptions {
            initial_pages: self.initial_pages,
            max_pages: self.max_pages,
        }
    }
}

pub struct Session {
    engine: Engine,
    store: Store<HostState>,
    memory: Memory,
    allocator: BumpAllocator,
}

/// Adapter giving the allocator and views access to the module's
/// store-owned memory through the same seam as [`HeapMemory`].
///
/// [`HeapMemory`]: crate::memory::HeapMemory
struct WasmLinearMemory<'a> {
    memory: Memory,
    store: &'a mut Store<HostState>,
}

impl LinearMemory for WasmLinearMemory<'_> {
    fn byte_len(&self) -> u32 {
        self.memory.data(&*self.store).len() as u32
    }

    fn grow_pages(&mut self, pages: u32) -> bool {
        self.memory.grow(&mut *self.store, pages.into()).is_ok()
    }

    fn data(&self) -> &[u8] {
        self.memory.data(&*self.store)
    }

    fn data_mut(&mut self) -> &mut [u8] {
        self.memory.data_mut(&mut *self.store)
    }
}

impl Session {
    pub fn new(config: &SessionConfig) -> Result<Self, RuntimeError> {
        let engine = Engine::default();
        let mut store = Store::new(&engine, HostState::default());
        let memory = Memory::new(
            &mut store,
            MemoryType::new(config.initial_pages.into(), Some(config.max_pages.into())),
        )
        .map_err(wasm_err)?;
        store.data_mut().memory = Some(memory);
        Ok(Session {
            engine,
            store,
            memory,
            allocator: BumpAllocator::new(config.heap_start, config.max_pages),
        })
    }

    /// Build the import table (memory plus AetherLink host functions)
    /// and bring the compiled module to life.
    pub fn instantiate(&mut self, artifact: &CompilationArtifact) -> Result<Instance, RuntimeError> {
        // Static string data must never be handed out as heap.
        self.allocator.raise_heap_start(artifact.data_end);

        let module = wasmi::Module::new(&self.engine, &artifact.wasm).map_err(wasm_err)?;
        let mut linker = Linker::new(&self.engine);
        linker
            .define(ENV_MODULE, MEMORY_IMPORT, self.memory)
            .map_err(wasm_err)?;
        bridge::install_host_imports(&mut linker)?;
        let instance = linker
            .instantiate(&mut self.store, &module)
            .map_err(wasm_err)?
            .start(&mut self.store)
            .map_err(wasm_err)?;
        Ok(instance)
    }

    /// Invoke the module's exported `main() -> i32`.
    pub fn run_main(&mut self, instance: &Instance) -> Result<i32, RuntimeError> {
        let main = instance
            .get_typed_func::<(), i32>(&self.store, "main")
            .map_err(|_| RuntimeError::MissingExport("main".to_string()))?;
        main.call(&mut self.store, ()).map_err(wasm_err)
    }

    // ----- memory manager surface --------------------------------------

    pub fn alloc(&mut self, size: i64) -> u32 {
        let Session { allocator, store, memory, .. } = self;
        let mut mem = WasmLinearMemory { memory: *memory, store };
        allocator.alloc(&mut mem, size)
    }

    pub fn realloc(&mut self, old_ptr: u32, old_size: u32, new_size: i64) -> u32 {
        let Session { allocator, store, memory, .. } = self;
        let mut mem = WasmLinearMemory { memory: *memory, store };
        allocator.realloc(&mut mem, old_ptr, old_size, new_size)
    }

    pub fn free(&mut self, ptr: u32) {
        self.allocator.free(ptr);
    }

    pub fn reset(&mut self) {
        self.allocator.reset();
    }

    pub fn stats(&self) -> AllocStats {
        self.allocator.stats()
    }

    pub fn view(&self) -> MemoryView<'_> {
        MemoryView::new(self.memory.data(&self.store))
    }

    pub fn view_mut(&mut self) -> MemoryViewMut<'_> {
        MemoryViewMut::new(self.memory.data_mut(&mut self.store))
    }

    // ----- bridge surface ----------------------------------------------

    pub fn register_host_object(&mut self, value: HostValue) -> u32 {
        self.store.data_mut().handles.register(value)
    }

    pub fn get_host_object(&self, handle: u32) -> Result<&(dyn std::any::Any + Send), RuntimeError> {
        self.store.data().handles.get(handle)
    }

    pub fn release_host_object(&mut self, handle: u32) -> bool {
        self.store.data_mut().handles.remove(handle)
    }

    /// Allocate scratch memory and register a host object as one
    /// paired resource.
    pub fn entangle(&mut self, size: i64, value: HostValue) -> Entangled {
        let ptr = self.alloc(size);
        if ptr == 0 {
            return Entangled::new(0, 0);
        }
        let handle = self.register_host_object(value);
        Entangled::new(ptr, handle)
    }

    /// Release both halves of a paired resource; idempotent.
    pub fn disentangle(&mut self, pair: &mut Entangled) -> bool {
        pair.release(&mut self.store.data_mut().handles)
    }

    // ----- raw access --------------------------------------------------

    pub fn host(&self) -> &HostState {
        self.store.data()
    }

    pub fn host_mut(&mut self) -> &mut HostState {
        self.store.data_mut()
    }

    pub fn store(&self) -> &Store<HostState> {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut Store<HostState> {
        &mut self.store
    }

    pub fn memory(&self) -> Memory {
        self.memory
    }
}

/// Result of the one-shot compile-and-run entry point.
pub struct Launched {
    pub artifact: CompilationArtifact,
    pub session: Session,
    pub instance: Instance,
}

impl std::fmt::Debug for Launched {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Launched")
            .field("artifact", &self.artifact)
            .field("instance", &self.instance)
            .finish_non_exhaustive()
    }
}

/// Compile source text and instantiate it in a fresh session: the
/// sanity-check touchpoint for the whole pipeline.
pub fn launch(source: &str, config: &SessionConfig) -> Result<Launched, RuntimeError> {
    let artifact = compile(source, &config.compile_options())?;
    let mut session = Session::new(config)?;
    let instance = session.instantiate(&artifact)?;
    Ok(Launched {
        artifact,
        session,
        instance,
    })
}
