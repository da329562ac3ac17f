//! Component identity, metadata, and component lists.
//!
//! ## Identity
//!
//! Component types implement [`Component`], carrying a user-chosen
//! compile-time id and a storage frequency. The registry treats ids as
//! opaque integers in `[0, MAX_COMPONENTS)`; nothing global is registered.
//! Two registries agree on a component exactly when they were given the
//! same type under the same id.
//!
//! ## Frequency
//!
//! [`Frequency`] tunes chunk capacity per component: common components get
//! large chunks (long contiguous batches), rare components small ones
//! (less slack in sparsely populated index ranges). The chunk capacity is
//! `1 << (frequency + FREQUENCY_ADJUST)`.
//!
//! ## Lists
//!
//! A [`ComponentsList`] is the resolved form of a query or creation
//! request: the caller's ids in declaration order (the order component
//! pointers are delivered to callbacks) plus the sparse mask and rank
//! tables built from the sorted ids.

use std::any::{type_name, TypeId};
use std::mem::{align_of, needs_drop, size_of};

use crate::engine::error::EcsResult;
use crate::engine::mask::{Ranks, SparseMask};
use crate::engine::storage::ErasedPtr;
use crate::engine::types::{ComponentId, FREQUENCY_ADJUST};

/// Storage frequency of a component: how common it is expected to be
/// across the entity population. Higher frequencies allocate larger
/// chunks.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u32)]
pub enum Frequency {
    /// Very rare components; smallest chunks.
    Rare = 1,
    /// Frequency tier 2.
    Freq2 = 2,
    /// Frequency tier 3.
    Freq3 = 3,
    /// Frequency tier 4.
    Freq4 = 4,
    /// Frequency tier 5 (default).
    Freq5 = 5,
    /// Frequency tier 6.
    Freq6 = 6,
    /// Frequency tier 7.
    Freq7 = 7,
    /// Frequency tier 8.
    Freq8 = 8,
    /// Near-ubiquitous components; largest chunks.
    Frequent = 9,
}

impl Frequency {
    /// Shift converting an entity index into this component's chunk index.
    #[inline]
    pub const fn shift(self) -> u32 {
        self as u32 + FREQUENCY_ADJUST
    }

    /// Number of component slots per chunk.
    #[inline]
    pub const fn chunk_capacity(self) -> u32 {
        1 << self.shift()
    }
}

/// A component type storable in a [`crate::Registry`].
///
/// The id must be unique within an application and below
/// [`crate::MAX_COMPONENTS`]; it is a compile-time constant so queries and
/// creation lists can be assembled without any global lookup.
///
/// Zero-sized types are *tag* components: presence is tracked in the
/// entity bitmask but no chunk storage is allocated for them.
pub trait Component: Send + Sync + Sized + 'static {
    /// User-chosen component id.
    const ID: ComponentId;

    /// Storage frequency; defaults to the middle tier.
    const FREQUENCY: Frequency = Frequency::Freq5;
}

/// Fixed-size descriptor of a component type.
///
/// Everything the registry needs to destroy, relocate, and compare
/// components without knowing the concrete type: sizes for chunk layout,
/// the [`TypeId`] for merge compatibility checks, and the drop flag for
/// skipping destruction work on plain-data components.
#[derive(Clone, Copy, Debug)]
pub struct ComponentMeta {
    /// The component id.
    pub id: ComponentId,

    /// Runtime type identifier, used to verify merge compatibility.
    pub type_id: TypeId,

    /// Rust type name for diagnostics.
    pub name: &'static str,

    /// Size of one component value in bytes; zero marks a tag component.
    pub size: usize,

    /// Alignment of the component type in bytes.
    pub align: usize,

    /// Storage frequency.
    pub frequency: Frequency,

    /// Whether values require destruction.
    pub needs_drop: bool,
}

impl ComponentMeta {
    /// Builds the descriptor for component type `T`.
    #[inline]
    pub fn of<T: Component>() -> Self {
        Self {
            id: T::ID,
            type_id: TypeId::of::<T>(),
            name: type_name::<T>(),
            size: size_of::<T>(),
            align: align_of::<T>(),
            frequency: T::FREQUENCY,
            needs_drop: needs_drop::<T>(),
        }
    }

    /// Chunk-index shift for this component.
    #[inline]
    pub fn shift(&self) -> u32 {
        self.frequency.shift()
    }

    /// Returns `true` for storageless tag components.
    #[inline]
    pub fn is_tag(&self) -> bool {
        self.size == 0 && !self.needs_drop
    }

    /// Returns `true` if two registries defining these descriptors under
    /// the same id are merge-compatible.
    #[inline]
    pub fn matches(&self, other: &ComponentMeta) -> bool {
        self.id == other.id
            && self.type_id == other.type_id
            && self.size == other.size
            && self.frequency == other.frequency
    }
}

/// Resolved component list for a query or creation request.
///
/// Keeps the caller's ids in declaration order (callbacks receive one
/// component pointer per entry, in this order) alongside the sparse mask
/// and rank tables derived from the sorted ids.
#[derive(Clone, Debug)]
pub struct ComponentsList {
    ids: Vec<ComponentId>,
    mask: SparseMask,
    ranks: Ranks,
}

impl ComponentsList {
    /// Builds a list from distinct component ids in any order.
    ///
    /// ## Errors
    /// Fails when an id is out of range, the ids span more than
    /// [`crate::GROUPS_COUNT`] distinct groups, or an id repeats (a
    /// repeated id would hand callbacks two mutable views of one arena).
    pub fn new(ids: &[ComponentId]) -> EcsResult<Self> {
        let mut sorted = ids.to_vec();
        sorted.sort_unstable();
        if let Some(window) = sorted.windows(2).find(|w| w[0] == w[1]) {
            return Err(crate::engine::error::EcsError::DuplicateInList { id: window[0] });
        }
        let mask = SparseMask::from_sorted_ids(&sorted)?;
        Ok(Self {
            ids: ids.to_vec(),
            ranks: Ranks::of_dict(mask.dict),
            mask,
        })
    }

    /// The ids in declaration order.
    #[inline]
    pub fn ids(&self) -> &[ComponentId] {
        &self.ids
    }

    /// The sparse mask over the listed ids.
    #[inline]
    pub fn mask(&self) -> &SparseMask {
        &self.mask
    }

    /// Rank tables of the mask's dictionary.
    #[inline]
    pub fn ranks(&self) -> &Ranks {
        &self.ranks
    }

    /// Number of listed components.
    #[inline]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Returns `true` for the empty list.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Returns `true` if the two lists share any component.
    ///
    /// Systems over non-conflicting lists touch disjoint arenas and may be
    /// executed in any order, which is the contract an external execution
    /// pool must preserve when running systems concurrently.
    pub fn conflicts_with(&self, other: &ComponentsList) -> bool {
        self.ids.iter().any(|&id| other.mask.get(id))
    }
}

/// A set of component values spawned onto one entity.
///
/// Implemented for any single [`Component`] and for tuples of distinct
/// components up to arity 8. `IDS` is in declaration order; values are
/// written to the matching slot pointers during batch creation.
pub trait ComponentBundle: 'static {
    /// Component ids, declaration order.
    const IDS: &'static [ComponentId];

    /// Writes the bundle's values into per-component chunk slots.
    ///
    /// ## Safety
    /// `ptrs` must hold one pointer per entry of `IDS`, each valid for
    /// writes of at least `offset + 1` values of the corresponding
    /// component type and properly aligned for it.
    unsafe fn write(self, ptrs: &[ErasedPtr], offset: usize);
}

impl<T: Component> ComponentBundle for T {
    const IDS: &'static [ComponentId] = &[T::ID];

    #[inline]
    unsafe fn write(self, ptrs: &[ErasedPtr], offset: usize) {
        unsafe { ptrs[0].as_ptr().cast::<T>().add(offset).write(self) }
    }
}

macro_rules! impl_component_bundle {
    ($(($ty:ident, $idx:tt)),+) => {
        impl<$($ty: Component),+> ComponentBundle for ($($ty,)+) {
            const IDS: &'static [ComponentId] = &[$($ty::ID),+];

            #[inline]
            unsafe fn write(self, ptrs: &[ErasedPtr], offset: usize) {
                $(unsafe { ptrs[$idx].as_ptr().cast::<$ty>().add(offset).write(self.$idx) };)+
            }
        }
    };
}

impl_component_bundle!((A, 0));
impl_component_bundle!((A, 0), (B, 1));
impl_component_bundle!((A, 0), (B, 1), (C, 2));
impl_component_bundle!((A, 0), (B, 1), (C, 2), (D, 3));
impl_component_bundle!((A, 0), (B, 1), (C, 2), (D, 3), (E, 4));
impl_component_bundle!((A, 0), (B, 1), (C, 2), (D, 3), (E, 4), (F, 5));
impl_component_bundle!((A, 0), (B, 1), (C, 2), (D, 3), (E, 4), (F, 5), (G, 6));
impl_component_bundle!((A, 0), (B, 1), (C, 2), (D, 3), (E, 4), (F, 5), (G, 6), (H, 7));
