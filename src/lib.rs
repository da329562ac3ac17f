//! # swarm_ecs
//!
//! Entity–Component System core built around *fast archetype filtering over
//! a large, heterogeneous entity population*.
//!
//! ## Design Goals
//! - Sparse two-level bitmasks for constant-time archetype tests
//! - Frequency-tuned chunked component storage, indexed by entity index
//! - Batched system dispatch over contiguous runs of matching entities
//! - Deferred reclamation of empty chunks off the hot path
//!
//! This crate builds as both:
//! - `rlib` (for Rust usage & integration tests)
//! - `cdylib` (for FFI / DLL usage)

#![forbid(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]
#![allow(clippy::module_inception)]

pub mod engine;

// ─────────────────────────────────────────────────────────────────────────────
// Re-exports (Public API)
// ─────────────────────────────────────────────────────────────────────────────

// Core ECS types

pub use engine::types::{
    ComponentId,
    EntityIndex,
    Generation,
    Flags,
    DictWord,
    MaskBits,
    EntityPtr,
    EntityRecord,
    GROUP_SIZE,
    GROUP_SHIFT,
    GROUPS_COUNT,
    BITS_IN_DICT,
    FREQUENCY_ADJUST,
    MAX_COMPONENTS,
    TOMBSTONE_DICT,
};

pub use engine::mask::{SparseMask, Ranks};

pub use engine::component::{
    Component,
    ComponentBundle,
    ComponentMeta,
    ComponentsList,
    Frequency,
};

pub use engine::registry::{CleanupJob, Registry};

pub use engine::storage::{Arena, ErasedArena, ErasedPtr};

pub use engine::system::{
    BatchCallback,
    BatchContext,
    QueryTuple,
    SystemStep,
};

pub use engine::error::{EcsError, EcsResult};

// ─────────────────────────────────────────────────────────────────────────────
// Prelude (Optional but recommended)
// ─────────────────────────────────────────────────────────────────────────────

/// Commonly used ECS types.
///
/// Import with:
/// ```rust
/// use swarm_ecs::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        Component,
        ComponentId,
        ComponentsList,
        EcsError,
        EcsResult,
        EntityPtr,
        Frequency,
        Registry,
        SparseMask,
    };
}
