//! Runtime support for compiled Alloy modules.
//!
//! Everything a compiled program needs at execution time, with no
//! global state anywhere:
//!
//! - `memory`: linear memory backings and the monotonic bump allocator
//! - `view`: bounds-checked typed accessors over the same bytes
//! - `shared`: the shared-buffer registry and atomic wait/notify
//! - `bridge`: the AetherLink host import table and handle registry
//! - `session`: the per-run context tying the above to a live wasmi
//!   instance

pub mod error;

pub mod memory;
pub mod view;
pub mod shared;

pub mod bridge;
pub mod session;

pub use bridge::{Entangled, HandleTable, HostState, HostValue, Unresolved, WrittenFile};
pub use error::RuntimeError;
pub use memory::{AllocStats, BumpAllocator, HeapMemory, LinearMemory, PAGE_SIZE};
pub use session::{Launched, Session, SessionConfig, launch};
pub use shared::{SharedBufferRegistry, WaitResult};
pub use view::{MemoryView, MemoryViewMut};
