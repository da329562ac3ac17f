//! The entity registry.
//!
//! A [`Registry`] owns the dense entity table, the free-slot list, and one
//! arena per defined component. All mutating operations assume exclusive
//! access; the registry is single-threaded by design and a second registry
//! with cloned settings plus [`Registry::merge_from`] is the supported
//! pattern for preparing entities on another thread.
//!
//! ## Lifecycle
//!
//! Entities are created by allocating a slot range (from the free list
//! when possible, otherwise by extending the table) and stamping every
//! slot with the request's bitmask and the registry's current generation.
//! Destruction bumps the registry generation, drops the slot's components,
//! tombstones the record, and returns the range to the free list. Empty
//! chunks produced by removals and destroys are reclaimed by the split
//! [`Registry::prepare_cleanup`] / [`Registry::cleanup`] pass, never
//! eagerly.
//!
//! ## Fragmentation policy
//!
//! When no free range can hold a creation request but the table holds at
//! least three times the requested count in scattered free slots, the
//! request is split in half and satisfied in two passes instead of
//! growing the table. Table growth itself is geometric (×1.7).
//!
//! ## Pointer validity
//!
//! Component references returned by get/add and pointers delivered to
//! callbacks are valid only until the next mutating registry operation:
//! any create, destroy, add, remove, merge, or cleanup may reallocate the
//! entity table or a chunk directory.

use rayon::prelude::*;

use crate::engine::component::{Component, ComponentBundle, ComponentsList};
use crate::engine::error::{EcsError, EcsResult};
use crate::engine::mask::{Ranks, SparseMask};
use crate::engine::storage::{Arena, ErasedArena, ErasedPtr};
use crate::engine::system::{BatchCallback, BatchContext};
use crate::engine::types::{
    ComponentId, EntityIndex, EntityPtr, EntityRecord, Generation, MAX_COMPONENTS, TOMBSTONE_DICT,
};

use crate::engine::freelist::FreeList;

/// Owner of entities and component arenas.
pub struct Registry {
    pub(crate) entities: Vec<EntityRecord>,
    pub(crate) arenas: Vec<Option<Box<dyn ErasedArena>>>,
    free: FreeList,
    generation: Generation,
    alive: u32,
    cleanup_pending: bool,
}

/// Batch of empty chunks collected by [`Registry::prepare_cleanup`],
/// consumed by [`Registry::cleanup`].
#[derive(Debug, Default)]
pub struct CleanupJob {
    jobs: Vec<(ComponentId, usize)>,
}

impl CleanupJob {
    /// Number of chunks scheduled for release.
    #[inline]
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    /// Returns `true` if the scan found nothing to release.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

#[derive(Default)]
struct SlotPlan {
    free_ranges: Vec<(EntityIndex, u32)>,
    appended: u32,
}

impl Registry {
    /// Creates an empty registry with no components defined.
    pub fn new() -> Self {
        let mut arenas = Vec::new();
        arenas.resize_with(MAX_COMPONENTS as usize, || None);
        Self {
            entities: Vec::new(),
            arenas,
            free: FreeList::new(),
            generation: 0,
            alive: 0,
            cleanup_pending: false,
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Component definition
    // ─────────────────────────────────────────────────────────────────────

    /// Defines component `T`, creating its arena.
    ///
    /// ## Errors
    /// - `CapacityExceeded` if `T::ID` is out of range.
    /// - `AlreadyDefined` if the id already has an arena; the registry is
    ///   unchanged.
    pub fn define_component<T: Component>(&mut self) -> EcsResult<()> {
        let id = T::ID;
        if id >= MAX_COMPONENTS {
            return Err(EcsError::CapacityExceeded(
                crate::engine::error::MaskCapacityError {
                    id,
                    groups_in_use: 0,
                },
            ));
        }
        let slot = &mut self.arenas[id as usize];
        if slot.is_some() {
            return Err(EcsError::AlreadyDefined { id });
        }
        *slot = Some(Box::new(Arena::<T>::new()));
        Ok(())
    }

    /// Returns `true` if `id` has an arena.
    #[inline]
    pub fn is_defined(&self, id: ComponentId) -> bool {
        self.arenas
            .get(id as usize)
            .map_or(false, |slot| slot.is_some())
    }

    /// Returns `true` if every listed component is defined.
    pub fn check_components(&self, list: &ComponentsList) -> bool {
        list.ids().iter().all(|&id| self.is_defined(id))
    }

    /// Creates a registry sharing this one's component metadata but no
    /// entities. The clone is merge-compatible with `self`.
    pub fn clone_settings(&self) -> Registry {
        let mut out = Registry::new();
        for (id, slot) in self.arenas.iter().enumerate() {
            if let Some(arena) = slot.as_deref() {
                out.arenas[id] = Some(arena.clone_empty());
            }
        }
        out
    }

    // ─────────────────────────────────────────────────────────────────────
    // Introspection
    // ─────────────────────────────────────────────────────────────────────

    /// Number of live entities.
    #[inline]
    pub fn alive_count(&self) -> u32 {
        self.alive
    }

    /// Length of the entity table, tombstones included.
    #[inline]
    pub fn table_len(&self) -> u32 {
        self.entities.len() as u32
    }

    /// Current generation counter.
    #[inline]
    pub fn generation(&self) -> Generation {
        self.generation
    }

    /// Returns `true` if a removal or destroy produced an empty chunk
    /// that cleanup has not yet reclaimed.
    #[inline]
    pub fn cleanup_pending(&self) -> bool {
        self.cleanup_pending
    }

    /// Resolves a handle to its entity record.
    ///
    /// Answers `None` for out-of-range indices, generation mismatches,
    /// and tombstoned slots.
    #[inline]
    pub fn deref(&self, ptr: EntityPtr) -> Option<&EntityRecord> {
        let record = self.entities.get(ptr.index as usize)?;
        (record.generation() == ptr.generation && !record.is_tombstone()).then_some(record)
    }

    /// Mutable variant of [`Registry::deref`]; the record only exposes
    /// flags for mutation.
    #[inline]
    pub fn deref_mut(&mut self, ptr: EntityPtr) -> Option<&mut EntityRecord> {
        let record = self.entities.get_mut(ptr.index as usize)?;
        (record.generation() == ptr.generation && !record.is_tombstone()).then_some(record)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Creation
    // ─────────────────────────────────────────────────────────────────────

    /// Creates `count` entities carrying the listed components, driving a
    /// type-erased populate callback over the new slots in chunk-bounded
    /// batches.
    ///
    /// Slot allocation prefers the free list; a fragmented table splits
    /// the request (see module docs) and the table grows geometrically
    /// otherwise. All fallible reservations happen before any slot is
    /// stamped, so an error return leaves the registry observably
    /// unchanged (chunk directories may retain extra capacity).
    ///
    /// ## Safety
    /// The callback must initialize every component slot it is handed:
    /// for each invocation, all `count` values behind every pointer. Slots
    /// left uninitialized would later be dropped as if live.
    pub unsafe fn create_entities_raw(
        &mut self,
        list: &ComponentsList,
        count: u32,
        callback: &mut dyn BatchCallback,
    ) -> EcsResult<()> {
        if count == 0 {
            return Ok(());
        }
        for &id in list.ids() {
            if !self.is_defined(id) {
                return Err(EcsError::NotDefined { id });
            }
        }

        let mut plan = SlotPlan::default();
        self.plan_slots(count, &mut plan);
        let base = self.entities.len() as EntityIndex;

        if let Err(error) = self.reserve_for_plan(list, &plan, base) {
            for &(index, n) in &plan.free_ranges {
                self.free.insert(index, n);
            }
            return Err(error);
        }

        let record = EntityRecord {
            bits: list.mask().bits,
            dict: list.mask().dict,
            generation: self.generation,
            flags: 0,
        };
        for &(index, n) in &plan.free_ranges {
            let start = index as usize;
            for slot in &mut self.entities[start..start + n as usize] {
                *slot = record;
            }
        }
        if plan.appended > 0 {
            self.entities
                .resize(base as usize + plan.appended as usize, record);
        }
        self.alive += count;

        for &(index, n) in &plan.free_ranges {
            self.populate_range(list, index, n, callback);
        }
        if plan.appended > 0 {
            self.populate_range(list, base, plan.appended, callback);
        }
        Ok(())
    }

    /// Creates `count` entities, obtaining each entity's component values
    /// from `populate`.
    pub fn create_entities<B, F>(&mut self, count: u32, populate: F) -> EcsResult<()>
    where
        B: ComponentBundle,
        F: FnMut(EntityPtr) -> B,
    {
        let list = ComponentsList::new(B::IDS)?;
        let mut writer = BundleWriter {
            populate,
            _marker: std::marker::PhantomData::<fn() -> B>,
        };
        // SAFETY: BundleWriter writes every component of every slot.
        unsafe { self.create_entities_raw(&list, count, &mut writer) }
    }

    /// Creates one entity from a bundle of component values and returns
    /// its handle.
    pub fn spawn<B: ComponentBundle>(&mut self, bundle: B) -> EcsResult<EntityPtr> {
        let mut bundle = Some(bundle);
        let mut created = None;
        self.create_entities(1, |ptr| {
            created = Some(ptr);
            bundle.take().expect("spawn callback ran more than once")
        })?;
        Ok(created.expect("spawn created no entity"))
    }

    /// Creates one entity per bundle yielded by the iterator.
    pub fn extend<B, I>(&mut self, bundles: I) -> EcsResult<()>
    where
        B: ComponentBundle,
        I: IntoIterator<Item = B>,
        I::IntoIter: ExactSizeIterator,
    {
        let mut bundles = bundles.into_iter();
        let count = bundles.len() as u32;
        self.create_entities(count, |_| {
            bundles.next().expect("iterator shorter than reported")
        })
    }

    fn plan_slots(&mut self, count: u32, plan: &mut SlotPlan) {
        if let Some(index) = self.free.take(count) {
            plan.free_ranges.push((index, count));
            return;
        }
        // Fragmented table: satisfy the request in halves rather than
        // growing the table past slots we already own.
        if count > 1 && self.free.total() / count >= 3 {
            let half = count / 2;
            self.plan_slots(half, plan);
            self.plan_slots(count - half, plan);
            return;
        }
        plan.appended += count;
    }

    fn reserve_for_plan(
        &mut self,
        list: &ComponentsList,
        plan: &SlotPlan,
        base: EntityIndex,
    ) -> EcsResult<()> {
        if plan.appended > 0 {
            let new_len = self.entities.len() + plan.appended as usize;
            if new_len > self.entities.capacity() {
                let target = (self.entities.capacity() * 17 / 10).max(new_len);
                self.entities.try_reserve(target - self.entities.len())?;
            }
        }
        for &id in list.ids() {
            let arena = self.arenas[id as usize]
                .as_deref_mut()
                .expect("reserving chunks for an undefined component");
            for &(index, n) in &plan.free_ranges {
                arena.reserve_chunks(index, n)?;
            }
            if plan.appended > 0 {
                arena.reserve_chunks(base, plan.appended)?;
            }
        }
        Ok(())
    }

    fn populate_range(
        &mut self,
        list: &ComponentsList,
        index: EntityIndex,
        count: u32,
        callback: &mut dyn BatchCallback,
    ) {
        let mut ptrs: Vec<ErasedPtr> = Vec::with_capacity(list.len());
        let mut cursor = index;
        let end = index + count;
        while cursor < end {
            let remaining = end - cursor;
            let mut batch = remaining;
            for &id in list.ids() {
                let arena = self.arenas[id as usize]
                    .as_deref()
                    .expect("populating an undefined component");
                batch = batch.min(arena.chunk_span(cursor, remaining));
            }
            ptrs.clear();
            for &id in list.ids() {
                let arena = self.arenas[id as usize]
                    .as_deref_mut()
                    .expect("populating an undefined component");
                let (ptr, added) = arena.add_range(cursor, batch);
                debug_assert_eq!(added, batch);
                ptrs.push(ptr);
            }
            let start = cursor as usize;
            let endu = start + batch as usize;
            let mut ctx = BatchContext::new(cursor, &mut self.entities[start..endu]);
            callback.invoke(&mut ctx, &ptrs, batch);
            cursor += batch;
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Destruction
    // ─────────────────────────────────────────────────────────────────────

    /// Destroys the entity behind `ptr`. Returns `false` for stale
    /// handles, leaving the registry untouched.
    pub fn destroy(&mut self, ptr: EntityPtr) -> bool {
        if self.deref(ptr).is_none() {
            return false;
        }
        self.generation = self.generation.wrapping_add(1);
        self.destroy_run(ptr.index, 1);
        true
    }

    /// Destroys every valid handle in `ptrs`, tolerating stale and
    /// duplicate entries. Returns the number of entities destroyed.
    ///
    /// The generation is bumped once for the whole call, and contiguous
    /// runs of same-shape entities are torn down together. Order of the
    /// input does not affect the outcome.
    pub fn destroy_batch(&mut self, ptrs: &[EntityPtr]) -> usize {
        self.generation = self.generation.wrapping_add(1);
        let mut destroyed = 0usize;
        let mut i = 0usize;
        while i < ptrs.len() {
            let Some(record) = self.deref(ptrs[i]).copied() else {
                i += 1;
                continue;
            };
            let start = ptrs[i].index;
            let mut run = 1u32;
            while i + (run as usize) < ptrs.len() {
                let next = ptrs[i + run as usize];
                if next.index != start + run {
                    break;
                }
                match self.deref(next) {
                    Some(r) if r.bits() == record.bits() && r.dict() == record.dict() => run += 1,
                    _ => break,
                }
            }
            self.destroy_run(start, run);
            destroyed += run as usize;
            i += run as usize;
        }
        destroyed
    }

    fn destroy_run(&mut self, index: EntityIndex, count: u32) {
        let record = self.entities[index as usize];
        let ranks = Ranks::of_dict(record.dict());
        let ids = SparseMask::of_record(&record).into_ids(&ranks);
        let mut emptied = false;
        for &id in ids.as_slice() {
            let arena = self.arenas[id as usize]
                .as_deref_mut()
                .expect("destroying a component without an arena");
            emptied |= arena.destroy_range(index, count);
        }
        let start = index as usize;
        for slot in &mut self.entities[start..start + count as usize] {
            slot.dict = TOMBSTONE_DICT;
            slot.bits = 0;
        }
        self.free.insert(index, count);
        self.alive -= count;
        if emptied {
            self.cleanup_pending = true;
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Component add / remove / get
    // ─────────────────────────────────────────────────────────────────────

    /// Attaches component `T` to an entity and returns a reference to the
    /// stored value.
    ///
    /// ## Errors
    /// `NotDefined`, `StaleHandle`, `AlreadyPresent`, `CapacityExceeded`
    /// (fifth group), or `OutOfMemory`. On any failure the entity's
    /// bitmask is left as it was before the call.
    pub fn add_component<T: Component>(
        &mut self,
        ptr: EntityPtr,
        value: T,
    ) -> EcsResult<&mut T> {
        let id = T::ID;
        if !self.is_defined(id) {
            return Err(EcsError::NotDefined { id });
        }
        if self.deref(ptr).is_none() {
            return Err(EcsError::StaleHandle);
        }

        let record = &mut self.entities[ptr.index as usize];
        let mut mask = SparseMask::of_record(record);
        if mask.get(id) {
            return Err(EcsError::AlreadyPresent { id });
        }
        let saved = (record.bits, record.dict);
        mask.set(id, true)?;
        record.bits = mask.bits;
        record.dict = mask.dict;

        let arena = self.arenas[id as usize]
            .as_deref_mut()
            .expect("arena vanished after definition check");
        if let Err(error) = arena.reserve_chunks(ptr.index, 1) {
            let record = &mut self.entities[ptr.index as usize];
            record.bits = saved.0;
            record.dict = saved.1;
            return Err(error);
        }
        let (slot, added) = arena.add_range(ptr.index, 1);
        debug_assert_eq!(added, 1);
        let slot = slot.as_ptr().cast::<T>();
        // SAFETY: `slot` addresses this entity's freshly reserved slot in
        // T's arena; writing initializes it, and the returned borrow is
        // tied to `&mut self`.
        unsafe {
            slot.write(value);
            Ok(&mut *slot)
        }
    }

    /// Detaches component `T` from an entity, dropping the stored value.
    ///
    /// ## Errors
    /// `NotDefined`, `StaleHandle`, or `NotPresent`.
    pub fn remove_component<T: Component>(&mut self, ptr: EntityPtr) -> EcsResult<()> {
        let id = T::ID;
        if !self.is_defined(id) {
            return Err(EcsError::NotDefined { id });
        }
        if self.deref(ptr).is_none() {
            return Err(EcsError::StaleHandle);
        }

        let record = self.entities[ptr.index as usize];
        let mut mask = SparseMask::of_record(&record);
        if !mask.get(id) {
            return Err(EcsError::NotPresent { id });
        }

        let arena = self.arenas[id as usize]
            .as_deref_mut()
            .expect("arena vanished after definition check");
        if arena.destroy_range(ptr.index, 1) {
            self.cleanup_pending = true;
        }
        mask.set(id, false)?;
        let record = &mut self.entities[ptr.index as usize];
        record.bits = mask.bits;
        record.dict = mask.dict;
        Ok(())
    }

    /// Reads component `T` of an entity. Answers `None` for stale handles
    /// and absent components.
    pub fn get_component<T: Component>(&self, ptr: EntityPtr) -> Option<&T> {
        let record = self.deref(ptr)?;
        if !SparseMask::of_record(record).get(T::ID) {
            return None;
        }
        let arena = self.arenas[T::ID as usize].as_deref()?;
        let (slot, _) = arena.peek_range(ptr.index, 1);
        // SAFETY: the bit check guarantees an initialized slot; the shared
        // borrow of self covers the returned reference.
        Some(unsafe { &*slot.as_ptr().cast::<T>() })
    }

    /// Mutable variant of [`Registry::get_component`].
    pub fn get_component_mut<T: Component>(&mut self, ptr: EntityPtr) -> Option<&mut T> {
        if !SparseMask::of_record(self.deref(ptr)?).get(T::ID) {
            return None;
        }
        let arena = self.arenas[T::ID as usize].as_deref_mut()?;
        let (slot, _) = arena.select_range(ptr.index, 1);
        // SAFETY: as for get_component, with exclusivity from `&mut self`.
        Some(unsafe { &mut *slot.as_ptr().cast::<T>() })
    }

    // ─────────────────────────────────────────────────────────────────────
    // Merge
    // ─────────────────────────────────────────────────────────────────────

    /// Moves every entity of `other` into this registry, appending them
    /// after the current table. `other` is left empty but keeps its
    /// component definitions.
    ///
    /// ## Errors
    /// `ArchitectureMismatch` if the registries disagree on any component
    /// definition (either direction), before anything is moved.
    pub fn merge_from(&mut self, other: &mut Registry) -> EcsResult<()> {
        for id in 0..MAX_COMPONENTS as usize {
            match (self.arenas[id].as_deref(), other.arenas[id].as_deref()) {
                (None, None) => {}
                (Some(a), Some(b)) if a.meta().matches(b.meta()) => {}
                _ => {
                    return Err(EcsError::ArchitectureMismatch {
                        id: id as ComponentId,
                    })
                }
            }
        }

        let source_len = other.entities.len();
        if source_len == 0 {
            return Ok(());
        }
        let base = self.entities.len() as EntityIndex;

        self.entities.try_reserve(source_len)?;
        for slot in self.arenas.iter_mut() {
            if let Some(arena) = slot.as_deref_mut() {
                arena.reserve_chunks(base, source_len as u32)?;
            }
        }

        self.entities.extend(other.entities.iter().copied());
        for range in other.free.iter().collect::<Vec<_>>() {
            self.free.insert(base + range.index, range.count);
        }

        let mut i = 0usize;
        while i < source_len {
            let record = other.entities[i];
            if record.is_tombstone() {
                i += 1;
                continue;
            }
            let mut run = 1usize;
            while i + run < source_len {
                let next = &other.entities[i + run];
                if next.is_tombstone() || next.bits() != record.bits() || next.dict() != record.dict()
                {
                    break;
                }
                run += 1;
            }
            let ranks = Ranks::of_dict(record.dict());
            for &id in SparseMask::of_record(&record).into_ids(&ranks).as_slice() {
                let dest = self.arenas[id as usize]
                    .as_deref_mut()
                    .expect("merge over an undefined component");
                let source = other.arenas[id as usize]
                    .as_deref_mut()
                    .expect("merge over an undefined component");
                if dest.merge_move(source, i as EntityIndex, base + i as EntityIndex, run as u32) {
                    other.cleanup_pending = true;
                }
            }
            i += run;
        }

        self.alive += other.alive;
        self.generation = self.generation.max(other.generation);
        other.entities.clear();
        other.free.clear();
        other.alive = 0;
        // Every chunk left in the source is now empty; its next cleanup
        // pass reclaims them.
        other.cleanup_pending = true;

        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────
    // Cleanup
    // ─────────────────────────────────────────────────────────────────────

    /// Scans every arena for chunks whose liveness counter reached zero
    /// and returns them as a job for [`Registry::cleanup`].
    ///
    /// The scan runs read-only and fans out over arenas, so callers can
    /// schedule it away from the hot path and apply the result later.
    pub fn prepare_cleanup(&self) -> CleanupJob {
        let jobs = self
            .arenas
            .par_iter()
            .enumerate()
            .flat_map_iter(|(id, slot)| {
                let mut empties = Vec::new();
                if let Some(arena) = slot.as_deref() {
                    arena.collect_empty_chunks(&mut empties);
                }
                empties
                    .into_iter()
                    .map(move |chunk| (id as ComponentId, chunk))
            })
            .collect();
        CleanupJob { jobs }
    }

    /// Releases the chunks collected by a cleanup scan and clears the
    /// pending flag. Chunks refilled since the scan are skipped.
    pub fn cleanup(&mut self, job: CleanupJob) {
        for (id, chunk) in job.jobs {
            if let Some(arena) = self.arenas[id as usize].as_deref_mut() {
                arena.free_chunk(chunk);
            }
        }
        self.cleanup_pending = false;
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Registry {
    /// Drops the components of every live entity. Arenas themselves only
    /// release memory, so live values must be destroyed here first.
    fn drop(&mut self) {
        let mut i = 0usize;
        while i < self.entities.len() {
            let record = self.entities[i];
            if record.is_tombstone() {
                i += 1;
                continue;
            }
            let mut run = 1usize;
            while i + run < self.entities.len() {
                let next = &self.entities[i + run];
                if next.is_tombstone() || next.bits() != record.bits() || next.dict() != record.dict()
                {
                    break;
                }
                run += 1;
            }
            let ranks = Ranks::of_dict(record.dict());
            for &id in SparseMask::of_record(&record).into_ids(&ranks).as_slice() {
                if let Some(arena) = self.arenas[id as usize].as_deref_mut() {
                    arena.destroy_range(i as EntityIndex, run as u32);
                }
            }
            i += run;
        }
    }
}

/// Populate adapter: drives a `FnMut(EntityPtr) -> B` over creation
/// batches, writing each bundle into the reserved slots.
struct BundleWriter<B, F> {
    populate: F,
    _marker: std::marker::PhantomData<fn() -> B>,
}

impl<B, F> BatchCallback for BundleWriter<B, F>
where
    B: ComponentBundle,
    F: FnMut(EntityPtr) -> B,
{
    fn invoke(&mut self, ctx: &mut BatchContext<'_>, ptrs: &[ErasedPtr], count: u32) {
        for offset in 0..count as usize {
            let bundle = (self.populate)(ctx.entity_ptr(offset));
            // SAFETY: the creation loop hands one pointer per bundle
            // component covering `count` slots; each offset is written
            // exactly once.
            unsafe { bundle.write(ptrs, offset) };
        }
    }
}
