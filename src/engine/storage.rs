//! Chunked component arenas.
//!
//! Each defined component owns an [`Arena<T>`]: a sparse directory of
//! fixed-capacity chunks indexed by `entity_index >> shift`, where the
//! shift is derived from the component's frequency. Components live at
//! `entity_index & (capacity - 1)` inside their chunk, so the same entity
//! index addresses every arena without per-entity indirection.
//!
//! ## Chunk layout
//!
//! A chunk is a liveness counter (`alive`: the number of present
//! components) followed by a boxed slice of `MaybeUninit<T>` slots. Slots
//! are uninitialized until an add writes them and become uninitialized
//! again when a destroy drops them; the counter is the only occupancy
//! record. Chunks whose counter reaches zero are reclaimed by the deferred
//! cleanup pass, never on the hot path.
//!
//! Invariant:
//! - A slot is initialized iff the owning entity's bitmask has the
//!   component bit set; the registry keeps mask and storage in lockstep.
//! - `alive` equals the number of initialized slots in the chunk.
//!
//! Arenas therefore do not track per-slot liveness and cannot drop live
//! components on their own; the registry destroys live components (via
//! [`ErasedArena::destroy_range`]) before its arenas are dropped.
//!
//! ## Type erasure
//!
//! The registry stores arenas behind [`ErasedArena`]. The trait surface is
//! the fixed-size-descriptor reflection the engine needs to destroy,
//! relocate, and move components, with typed behavior (drop glue, typed
//! moves) supplied by the `Arena<T>` implementation and recovered via
//! `Any` downcasts where two arenas must cooperate.

use std::any::Any;
use std::mem::MaybeUninit;
use std::ptr::NonNull;

use crate::engine::component::{Component, ComponentMeta};
use crate::engine::error::EcsResult;
use crate::engine::types::EntityIndex;

/// Raw pointer to a component slot inside a chunk.
///
/// Valid only until the next mutating registry operation. Tag components
/// yield dangling (never dereferenced) pointers.
#[derive(Clone, Copy, Debug)]
pub struct ErasedPtr(NonNull<u8>);

impl ErasedPtr {
    /// Wraps a typed slot pointer.
    #[inline]
    pub(crate) fn from_slot<T>(ptr: *mut MaybeUninit<T>) -> Self {
        // Slot pointers come from live chunk allocations and are never null.
        Self(unsafe { NonNull::new_unchecked(ptr.cast()) })
    }

    /// Well-aligned placeholder pointer for storageless components.
    #[inline]
    pub(crate) fn dangling_for<T>() -> Self {
        Self(NonNull::<T>::dangling().cast())
    }

    /// The raw pointer.
    #[inline]
    pub fn as_ptr(self) -> *mut u8 {
        self.0.as_ptr()
    }
}

/// Fixed-capacity storage block of one arena.
struct Chunk<T> {
    /// Number of live components in this chunk.
    alive: u32,
    slots: Box<[MaybeUninit<T>]>,
}

impl<T> Chunk<T> {
    fn new(capacity: usize) -> Box<Self> {
        let mut slots = Vec::with_capacity(capacity);
        // SAFETY: MaybeUninit slots carry no initialization requirement.
        unsafe { slots.set_len(capacity) };
        Box::new(Self {
            alive: 0,
            slots: slots.into_boxed_slice(),
        })
    }
}

/// Chunked storage for one component type.
pub struct Arena<T: Component> {
    chunks: Vec<Option<Box<Chunk<T>>>>,
    meta: ComponentMeta,
}

impl<T: Component> Arena<T> {
    /// Creates an empty arena for `T`.
    pub fn new() -> Self {
        Self {
            chunks: Vec::new(),
            meta: ComponentMeta::of::<T>(),
        }
    }

    #[inline]
    fn capacity() -> u32 {
        T::FREQUENCY.chunk_capacity()
    }

    #[inline]
    fn split_index(index: EntityIndex) -> (usize, usize) {
        let shift = T::FREQUENCY.shift();
        (
            (index >> shift) as usize,
            (index & (Self::capacity() - 1)) as usize,
        )
    }

    /// Grows the chunk directory to cover `chunk_index`, infallibly.
    fn ensure_directory(&mut self, chunk_index: usize) {
        if self.chunks.len() <= chunk_index {
            self.chunks.resize_with(chunk_index + 1, || None);
        }
    }

    fn chunk_at(&self, chunk_index: usize) -> Option<&Chunk<T>> {
        self.chunks.get(chunk_index).and_then(|c| c.as_deref())
    }
}

impl<T: Component> Default for Arena<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Type-erased arena surface used by the registry.
///
/// Ranges are always expressed as `(entity_index, count)`; `add_range` and
/// `select_range` answer at most one chunk's worth per call and report how
/// many slots the returned pointer covers, so callers loop until a range
/// is exhausted. [`ErasedArena::chunk_span`] answers the same slicing
/// question without touching storage, letting the system runner take the
/// minimum across arenas before committing.
pub trait ErasedArena: Send + Sync {
    /// Descriptor of the stored component type.
    fn meta(&self) -> &ComponentMeta;

    /// Number of directory entries (allocated or not).
    fn chunk_count(&self) -> usize;

    /// Returns `true` if the directory holds a live allocation at `chunk`.
    fn chunk_is_allocated(&self, chunk: usize) -> bool;

    /// Liveness counter of `chunk` (zero if unallocated).
    fn chunk_alive(&self, chunk: usize) -> u32;

    /// Number of slots from `index` to the nearer of `index + count` and
    /// the end of the containing chunk. Tag components answer `count`.
    fn chunk_span(&self, index: EntityIndex, count: u32) -> u32;

    /// Ensures the chunk directory covers `[index, index + count)`.
    ///
    /// Fallible (directory growth allocates); chunks themselves are
    /// allocated lazily by `add_range`.
    fn reserve_chunks(&mut self, index: EntityIndex, count: u32) -> EcsResult<()>;

    /// Reserves up to one chunk's worth of slots starting at `index`,
    /// allocating the chunk if absent, and bumps its liveness counter.
    /// Returns the slot pointer and the number of slots reserved.
    ///
    /// The returned slots are uninitialized; the caller must write them
    /// before they can be selected or destroyed.
    fn add_range(&mut self, index: EntityIndex, count: u32) -> (ErasedPtr, u32);

    /// Locates up to one chunk's worth of existing slots starting at
    /// `index`. Returns the slot pointer and the number of slots covered.
    fn select_range(&mut self, index: EntityIndex, count: u32) -> (ErasedPtr, u32);

    /// Read-only variant of [`ErasedArena::select_range`]: the returned
    /// pointer derives from a shared borrow and must not be written
    /// through.
    fn peek_range(&self, index: EntityIndex, count: u32) -> (ErasedPtr, u32);

    /// Drops every component in `[index, index + count)` and decrements
    /// the affected liveness counters. Returns `true` if any chunk
    /// reached zero.
    fn destroy_range(&mut self, index: EntityIndex, count: u32) -> bool;

    /// Moves `count` components from `source` starting at `source_index`
    /// into this arena starting at `dest_index`, one chunk slice at a
    /// time. Source slots become uninitialized and source liveness drops.
    /// Returns `true` if any source chunk reached zero.
    ///
    /// ## Panics
    /// Panics if `source` stores a different component type; callers
    /// verify metadata before merging.
    fn merge_move(
        &mut self,
        source: &mut dyn ErasedArena,
        source_index: EntityIndex,
        dest_index: EntityIndex,
        count: u32,
    ) -> bool;

    /// Appends the directory indexes of allocated chunks whose liveness
    /// counter is zero.
    fn collect_empty_chunks(&self, out: &mut Vec<usize>);

    /// Frees the chunk at `chunk` if it is still empty. Returns `true`
    /// if the chunk was released.
    fn free_chunk(&mut self, chunk: usize) -> bool;

    /// Fresh arena with identical metadata and no storage.
    fn clone_empty(&self) -> Box<dyn ErasedArena>;

    /// Upcast for typed recovery.
    fn as_any(&self) -> &dyn Any;

    /// Mutable upcast for typed recovery.
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Component> ErasedArena for Arena<T> {
    fn meta(&self) -> &ComponentMeta {
        &self.meta
    }

    fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    fn chunk_is_allocated(&self, chunk: usize) -> bool {
        self.chunk_at(chunk).is_some()
    }

    fn chunk_alive(&self, chunk: usize) -> u32 {
        self.chunk_at(chunk).map_or(0, |c| c.alive)
    }

    #[inline]
    fn chunk_span(&self, index: EntityIndex, count: u32) -> u32 {
        if self.meta.is_tag() {
            return count;
        }
        let offset = index & (Self::capacity() - 1);
        count.min(Self::capacity() - offset)
    }

    fn reserve_chunks(&mut self, index: EntityIndex, count: u32) -> EcsResult<()> {
        if self.meta.is_tag() || count == 0 {
            return Ok(());
        }
        let last_chunk = ((index + count - 1) >> T::FREQUENCY.shift()) as usize;
        if self.chunks.len() <= last_chunk {
            let additional = last_chunk + 1 - self.chunks.len();
            self.chunks.try_reserve(additional)?;
            self.chunks.resize_with(last_chunk + 1, || None);
        }
        Ok(())
    }

    fn add_range(&mut self, index: EntityIndex, count: u32) -> (ErasedPtr, u32) {
        debug_assert!(count > 0);
        if self.meta.is_tag() {
            return (ErasedPtr::dangling_for::<T>(), count);
        }
        let span = self.chunk_span(index, count);
        let (chunk_index, offset) = Self::split_index(index);
        self.ensure_directory(chunk_index);
        let chunk = self.chunks[chunk_index].get_or_insert_with(|| Chunk::new(Self::capacity() as usize));
        chunk.alive += span;
        (ErasedPtr::from_slot(&mut chunk.slots[offset]), span)
    }

    fn select_range(&mut self, index: EntityIndex, count: u32) -> (ErasedPtr, u32) {
        debug_assert!(count > 0);
        if self.meta.is_tag() {
            return (ErasedPtr::dangling_for::<T>(), count);
        }
        let span = self.chunk_span(index, count);
        let (chunk_index, offset) = Self::split_index(index);
        let chunk = self.chunks[chunk_index]
            .as_deref_mut()
            .expect("selected a component range with no backing chunk");
        (ErasedPtr::from_slot(&mut chunk.slots[offset]), span)
    }

    fn peek_range(&self, index: EntityIndex, count: u32) -> (ErasedPtr, u32) {
        debug_assert!(count > 0);
        if self.meta.is_tag() {
            return (ErasedPtr::dangling_for::<T>(), count);
        }
        let span = self.chunk_span(index, count);
        let (chunk_index, offset) = Self::split_index(index);
        let chunk = self
            .chunk_at(chunk_index)
            .expect("selected a component range with no backing chunk");
        let slot = &chunk.slots[offset] as *const MaybeUninit<T> as *mut MaybeUninit<T>;
        (ErasedPtr::from_slot(slot), span)
    }

    fn destroy_range(&mut self, index: EntityIndex, count: u32) -> bool {
        if self.meta.is_tag() {
            return false;
        }
        let mut emptied = false;
        let mut cursor = index;
        let mut remaining = count;
        while remaining > 0 {
            let span = self.chunk_span(cursor, remaining);
            let (chunk_index, offset) = Self::split_index(cursor);
            let chunk = self.chunks[chunk_index]
                .as_deref_mut()
                .expect("destroyed a component range with no backing chunk");
            if std::mem::needs_drop::<T>() {
                let begin = chunk.slots[offset].as_mut_ptr();
                // SAFETY: the registry only destroys ranges whose owning
                // entities carry the component bit, so all `span` slots
                // are initialized.
                unsafe {
                    std::ptr::drop_in_place(std::ptr::slice_from_raw_parts_mut(begin, span as usize))
                };
            }
            debug_assert!(chunk.alive >= span);
            chunk.alive -= span;
            emptied |= chunk.alive == 0;
            cursor += span;
            remaining -= span;
        }
        emptied
    }

    fn merge_move(
        &mut self,
        source: &mut dyn ErasedArena,
        source_index: EntityIndex,
        dest_index: EntityIndex,
        count: u32,
    ) -> bool {
        let source = source
            .as_any_mut()
            .downcast_mut::<Arena<T>>()
            .expect("component type mismatch between merged arenas");
        if self.meta.is_tag() {
            return false;
        }
        let mut emptied = false;
        let mut src = source_index;
        let mut dst = dest_index;
        let mut remaining = count;
        while remaining > 0 {
            let span = remaining
                .min(source.chunk_span(src, remaining))
                .min(self.chunk_span(dst, remaining));
            let (src_chunk_index, src_offset) = Self::split_index(src);
            let (dst_chunk_index, dst_offset) = Self::split_index(dst);

            self.ensure_directory(dst_chunk_index);
            let dst_ptr = {
                let chunk = self.chunks[dst_chunk_index]
                    .get_or_insert_with(|| Chunk::new(Self::capacity() as usize));
                chunk.alive += span;
                chunk.slots[dst_offset].as_mut_ptr()
            };
            let src_chunk = source.chunks[src_chunk_index]
                .as_deref_mut()
                .expect("merged a component range with no backing chunk");
            // SAFETY: the merged range is live in the source, the arenas
            // are distinct objects, and `span` stays within one chunk on
            // both sides.
            unsafe {
                std::ptr::copy_nonoverlapping(src_chunk.slots[src_offset].as_ptr(), dst_ptr, span as usize)
            };
            debug_assert!(src_chunk.alive >= span);
            src_chunk.alive -= span;
            emptied |= src_chunk.alive == 0;

            src += span;
            dst += span;
            remaining -= span;
        }
        emptied
    }

    fn collect_empty_chunks(&self, out: &mut Vec<usize>) {
        if self.meta.is_tag() {
            return;
        }
        for (chunk_index, chunk) in self.chunks.iter().enumerate() {
            if let Some(chunk) = chunk {
                if chunk.alive == 0 {
                    out.push(chunk_index);
                }
            }
        }
    }

    fn free_chunk(&mut self, chunk: usize) -> bool {
        // A create between the cleanup scan and this call may have
        // refilled the chunk; freeing it then would lose live data.
        if self.chunk_is_allocated(chunk) && self.chunk_alive(chunk) == 0 {
            self.chunks[chunk] = None;
            true
        } else {
            false
        }
    }

    fn clone_empty(&self) -> Box<dyn ErasedArena> {
        Box::new(Arena::<T>::new())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
