//! Memory domain types and tool input models.
//!
//! Identifiers are UUIDs and timestamps RFC 3339 on the wire.

mod enums;
mod inputs;
mod memory;

pub use enums::{Permission, Persona};
pub use inputs::*;
pub use memory::{
    Memory, MemoryRecord, QueryMemoryResult, QueryScope, QueryUserResult, ScoredMemory,
};
