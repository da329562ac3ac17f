//! Core ECS Types, Identifiers, and Bit-Level Layouts
//!
//! This module defines the **fundamental types, identifiers, and constants**
//! shared across all engine subsystems: the sparse bitmask encoding, chunked
//! component storage, the entity registry, and the system runner.
//!
//! ## Design Philosophy
//!
//! The ECS is designed around:
//!
//! - **Dense entity tables** indexed by a plain integer,
//! - **Sparse bitmask archetypes** (a 64-bit group dictionary plus a 128-bit
//!   packed subfield word),
//! - **Stable numeric identifiers** chosen by the user per component type,
//! - **Weak, generation-tagged entity handles**.
//!
//! ## Bitmask Layout
//!
//! A component id in `[0, MAX_COMPONENTS)` is split into a *group*
//! (`id >> GROUP_SHIFT`) and a *bit within the group* (`id & (GROUP_SIZE - 1)`).
//! Out of `BITS_IN_DICT` addressable groups, at most `GROUPS_COUNT` may be
//! present on one entity at a time. The set bits of the dictionary word
//! enumerate the contributing groups; the 128-bit word packs one
//! `GROUP_SIZE`-bit subfield per contributing group, in ascending group
//! order. See [`crate::engine::mask`] for the algebra over this encoding.
//!
//! ## Entity Records
//!
//! One [`EntityRecord`] exists per slot of the entity table. Records of
//! destroyed entities stay in place as *tombstones* (dictionary of all
//! ones) until their slot is reused. Handles ([`EntityPtr`]) carry the
//! generation observed at creation and dereference to `None` once the slot
//! has been destroyed or recycled.

/// Integer identifier of a component type, chosen by the user.
///
/// Must be below [`MAX_COMPONENTS`]. The registry treats ids as opaque
/// integers; grouping into dictionary groups is purely positional.
pub type ComponentId = u32;

/// Index of an entity slot within the registry's entity table.
pub type EntityIndex = u32;

/// Generation counter used to detect stale entity handles.
pub type Generation = u32;

/// User-controlled per-entity filter flags.
pub type Flags = u32;

/// Dictionary word of a sparse bitmask: one bit per component group.
pub type DictWord = u64;

/// Packed subfield word of a sparse bitmask.
pub type MaskBits = u128;

/// Bits per subfield in the sparse bitmask (one bit per component id).
pub const GROUP_SIZE: u32 = 32;

/// Shift converting a component id into its group index.
pub const GROUP_SHIFT: u32 = 5;

/// Maximum number of distinct groups present on one entity or query mask.
pub const GROUPS_COUNT: usize = 4;

/// Total number of groups addressable by the dictionary word.
pub const BITS_IN_DICT: u32 = 64;

/// Added to a component's frequency to obtain its chunk-capacity shift.
pub const FREQUENCY_ADJUST: u32 = 5;

/// Hard ceiling on component ids.
pub const MAX_COMPONENTS: ComponentId = GROUP_SIZE * BITS_IN_DICT;

/// Dictionary sentinel marking a destroyed entity slot.
pub const TOMBSTONE_DICT: DictWord = DictWord::MAX;

const _: [(); 1] = [(); ((1u32 << GROUP_SHIFT) == GROUP_SIZE) as usize];
const _: [(); 1] = [(); (GROUP_SIZE as usize * GROUPS_COUNT <= MaskBits::BITS as usize) as usize];
const _: [(); 1] = [(); (BITS_IN_DICT == DictWord::BITS) as usize];
const _: [(); 1] = [(); (GROUPS_COUNT <= BITS_IN_DICT as usize) as usize];

/// Weak handle to an entity: a table index plus the generation the slot
/// carried when the handle was issued.
///
/// ## Validity
/// A handle is valid iff the slot at `index` still stores the same
/// generation and has not been tombstoned. Handles never keep entities
/// alive; all validation happens at dereference time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct EntityPtr {
    /// Generation observed when the handle was issued.
    pub generation: Generation,

    /// Slot index within the entity table.
    pub index: EntityIndex,
}

/// One slot of the dense entity table.
///
/// Stores the entity's component bitmask (`bits` + `dict`), its generation
/// tag, and user-controlled filter flags. The mask fields are read-only
/// outside the registry; `flags` is the only field user code may mutate
/// through entity views.
///
/// ## Invariants
/// - `dict` has at most [`GROUPS_COUNT`] set bits, except for tombstones
///   where it equals [`TOMBSTONE_DICT`].
/// - For every clear bit of `dict` the corresponding subfield of `bits` is
///   zero; for every set bit it is nonzero.
#[derive(Clone, Copy, Debug)]
pub struct EntityRecord {
    pub(crate) bits: MaskBits,
    pub(crate) dict: DictWord,
    pub(crate) generation: Generation,
    pub(crate) flags: Flags,
}

impl EntityRecord {
    /// Packed subfield word of this entity's component mask.
    #[inline]
    pub fn bits(&self) -> MaskBits {
        self.bits
    }

    /// Group dictionary of this entity's component mask.
    #[inline]
    pub fn dict(&self) -> DictWord {
        self.dict
    }

    /// Generation tag of the slot.
    #[inline]
    pub fn generation(&self) -> Generation {
        self.generation
    }

    /// Current filter flags.
    #[inline]
    pub fn flags(&self) -> Flags {
        self.flags
    }

    /// Replaces the filter flags.
    #[inline]
    pub fn set_flags(&mut self, flags: Flags) {
        self.flags = flags;
    }

    /// Returns `true` if this slot marks a destroyed entity.
    #[inline]
    pub fn is_tombstone(&self) -> bool {
        self.dict == TOMBSTONE_DICT
    }
}
