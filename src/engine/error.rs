//! Error types for registry and bitmask operations.
//!
//! This module declares focused, composable error types used across the
//! registry pipeline. Each error carries enough context to make failures
//! actionable while remaining small and cheap to pass around.
//!
//! ## Goals
//! * **Specificity:** Each variant models a single failure mode (bitmask
//!   group exhaustion, undefined components, stale entity handles, …).
//! * **Ergonomics:** All errors implement [`std::error::Error`] and
//!   [`fmt::Display`], and provide `From<T>` conversions into the aggregate
//!   [`EcsError`].
//! * **Totality:** Registry operations never panic on user error paths;
//!   every failure is reported through [`EcsResult`] or a `None` return,
//!   and a failed operation leaves the registry in its pre-call state.
//!
//! ## Display vs. Debug
//! * [`fmt::Display`] is optimized for operator logs (short, imperative
//!   phrasing).
//! * [`fmt::Debug`] (derived) retains full structure for diagnostics.

use std::collections::TryReserveError;
use std::fmt;

use crate::engine::types::ComponentId;

/// Result alias used by all fallible engine operations.
pub type EcsResult<T> = Result<T, EcsError>;

/// Returned when a bitmask cannot represent the requested component set.
///
/// Raised either because a component id is out of range or because the set
/// would span more than the per-entity group budget.
///
/// ### Fields
/// * `id` — The component id that could not be accommodated.
/// * `groups_in_use` — Number of dictionary groups already occupied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaskCapacityError {
    /// Component id that could not be accommodated.
    pub id: ComponentId,

    /// Dictionary groups already occupied when the operation failed.
    pub groups_in_use: u32,
}

impl fmt::Display for MaskCapacityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "bitmask cannot hold component {} ({} groups in use)",
            self.id, self.groups_in_use
        )
    }
}

impl std::error::Error for MaskCapacityError {}

/// Aggregate error for registry and bitmask operations.
///
/// Low-level operations return dedicated errors (e.g. [`MaskCapacityError`])
/// which convert into this type via `From`, so orchestration code can use
/// `?` and still return a single expressive type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EcsError {
    /// A bitmask ran out of dictionary groups or an id was out of range.
    CapacityExceeded(MaskCapacityError),

    /// A component id has no arena in this registry.
    NotDefined {
        /// The offending component id.
        id: ComponentId,
    },

    /// A component id was defined twice.
    AlreadyDefined {
        /// The offending component id.
        id: ComponentId,
    },

    /// Remove/get targeted an entity that does not carry the component.
    NotPresent {
        /// The requested component id.
        id: ComponentId,
    },

    /// Add targeted an entity that already carries the component.
    AlreadyPresent {
        /// The requested component id.
        id: ComponentId,
    },

    /// A component list named the same id twice.
    ///
    /// Rejected up front: a query delivering two pointers into one arena
    /// would alias mutable storage.
    DuplicateInList {
        /// The repeated component id.
        id: ComponentId,
    },

    /// An entity handle was stale: generation mismatch or tombstone.
    StaleHandle,

    /// Allocation failed while growing the entity table or a chunk
    /// directory.
    OutOfMemory,

    /// Merge between registries with differing component metadata.
    ArchitectureMismatch {
        /// First component id on which the registries disagree.
        id: ComponentId,
    },
}

impl fmt::Display for EcsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EcsError::CapacityExceeded(e) => write!(f, "{e}"),
            EcsError::NotDefined { id } => write!(f, "component {} is not defined", id),
            EcsError::AlreadyDefined { id } => write!(f, "component {} is already defined", id),
            EcsError::NotPresent { id } => write!(f, "entity does not have component {}", id),
            EcsError::AlreadyPresent { id } => write!(f, "entity already has component {}", id),
            EcsError::DuplicateInList { id } => write!(f, "component {} listed twice", id),
            EcsError::StaleHandle => f.write_str("stale or dead entity reference"),
            EcsError::OutOfMemory => f.write_str("allocation failure while growing storage"),
            EcsError::ArchitectureMismatch { id } => {
                write!(f, "registries disagree on component {}", id)
            }
        }
    }
}

impl std::error::Error for EcsError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EcsError::CapacityExceeded(e) => Some(e),
            _ => None,
        }
    }
}

impl From<MaskCapacityError> for EcsError {
    fn from(e: MaskCapacityError) -> Self {
        EcsError::CapacityExceeded(e)
    }
}

impl From<TryReserveError> for EcsError {
    fn from(_: TryReserveError) -> Self {
        EcsError::OutOfMemory
    }
}
