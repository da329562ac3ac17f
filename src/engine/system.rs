//! System execution over matching entity runs.
//!
//! ## Execution model
//!
//! A system is a callback over batches of consecutive matching entities:
//!
//! 1. [`first_match`](crate::engine::mask::first_match) advances a cursor
//!    to the next entity satisfying the query.
//! 2. [`first_miss`](crate::engine::mask::first_miss) bounds the run of
//!    consecutive matches.
//! 3. Within the run, the batch is truncated to the nearest chunk boundary
//!    across all queried arenas, and the callback is invoked once per
//!    sub-batch with one component pointer per queried component.
//!
//! Matching and missing are cheap integer scans; the inner batch loop
//! keeps component pointers dense and aligned to chunk boundaries, so the
//! callback body can be a straight array walk.
//!
//! ## Re-entrancy
//!
//! [`SystemStep`] exposes one match–miss–dispatch round at a time for
//! callers that time-slice their work. Within one drain of a step,
//! entities are visited in strictly ascending index order. Control never
//! yields inside a callback invocation.
//!
//! ## Typed adapters
//!
//! [`QueryTuple`] recovers typed slices from the erased pointer array for
//! component tuples up to arity 8; [`Registry::run_system`] and
//! [`Registry::for_each`] are the typed entry points. Component pointers
//! are delivered in the tuple's declaration order.

use crate::engine::component::{Component, ComponentsList};
use crate::engine::error::{EcsError, EcsResult};
use crate::engine::mask::{first_match, first_miss};
use crate::engine::registry::Registry;
use crate::engine::storage::ErasedPtr;
use crate::engine::types::{ComponentId, EntityIndex, EntityPtr, EntityRecord, Flags};

/// View of one dispatched batch: the starting entity index plus the
/// entity records covering the batch.
///
/// Records expose read-only mask, dictionary, and generation, and mutable
/// flags. Offsets are relative to the batch start.
pub struct BatchContext<'a> {
    begin: EntityIndex,
    entities: &'a mut [EntityRecord],
}

impl<'a> BatchContext<'a> {
    pub(crate) fn new(begin: EntityIndex, entities: &'a mut [EntityRecord]) -> Self {
        Self { begin, entities }
    }

    /// Entity index of the first batch element.
    #[inline]
    pub fn begin_index(&self) -> EntityIndex {
        self.begin
    }

    /// Number of entities in the batch.
    #[inline]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Returns `true` for an empty batch (never dispatched).
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// The entity records of the batch.
    #[inline]
    pub fn records(&self) -> &[EntityRecord] {
        self.entities
    }

    /// Mutable record access; only flags can be modified through it.
    #[inline]
    pub fn record_mut(&mut self, offset: usize) -> &mut EntityRecord {
        &mut self.entities[offset]
    }

    /// Handle of the batch element at `offset`.
    #[inline]
    pub fn entity_ptr(&self, offset: usize) -> EntityPtr {
        EntityPtr {
            generation: self.entities[offset].generation(),
            index: self.begin + offset as EntityIndex,
        }
    }
}

/// Type-erased batch callback: one pointer per queried component, one
/// invocation per chunk-bounded sub-batch.
pub trait BatchCallback {
    /// Processes `count` consecutive entities. `ptrs` holds one component
    /// pointer per entry of the driving component list, in list order;
    /// each points at `count` packed values.
    fn invoke(&mut self, ctx: &mut BatchContext<'_>, ptrs: &[ErasedPtr], count: u32);
}

/// Re-entrant cursor over a system's traversal of the entity table.
///
/// Obtained from [`Registry::begin_system`]; each call to
/// [`Registry::system_step`] performs one match–miss–dispatch round.
/// Stepping is interleavable with other registries but not with mutations
/// of this one: any create/destroy/add/remove invalidates outstanding
/// steps (the cursor itself stays harmless, it only indexes forward, but
/// batches already dispatched are not revisited).
pub struct SystemStep {
    list: ComponentsList,
    flags: Flags,
    cursor: usize,
    ptrs: Vec<ErasedPtr>,
}

impl SystemStep {
    pub(crate) fn new(list: ComponentsList, flags: Flags) -> Self {
        let capacity = list.len();
        Self {
            list,
            flags,
            cursor: 0,
            ptrs: Vec::with_capacity(capacity),
        }
    }

    /// The component list driving this traversal.
    #[inline]
    pub fn list(&self) -> &ComponentsList {
        &self.list
    }

    /// Flags every visited entity must carry.
    #[inline]
    pub fn required_flags(&self) -> Flags {
        self.flags
    }

    /// Table position the next round starts from.
    #[inline]
    pub fn cursor(&self) -> EntityIndex {
        self.cursor as EntityIndex
    }

    /// Resets the traversal to the start of the table.
    pub fn rewind(&mut self) {
        self.cursor = 0;
    }
}

impl Registry {
    /// Starts a system traversal for `list`, validating that every listed
    /// component is defined.
    pub fn begin_system(&self, list: ComponentsList, flags: Flags) -> EcsResult<SystemStep> {
        for &id in list.ids() {
            if !self.is_defined(id) {
                return Err(EcsError::NotDefined { id });
            }
        }
        Ok(SystemStep::new(list, flags))
    }

    /// Performs one match–miss–dispatch round of a system traversal.
    ///
    /// Returns `true` while the cursor has not exhausted the entity table;
    /// a `false` return means no further invocations will happen.
    pub fn system_step(&mut self, step: &mut SystemStep, callback: &mut dyn BatchCallback) -> bool {
        let table_len = self.entities.len();
        let begin = first_match(
            step.cursor,
            step.list.mask(),
            step.list.ranks(),
            &self.entities,
            step.flags,
        );
        if begin >= table_len {
            step.cursor = table_len;
            return false;
        }
        let miss = first_miss(
            begin + 1,
            step.list.mask(),
            step.list.ranks(),
            &self.entities,
            step.flags,
        );

        let mut cursor = begin;
        while cursor < miss {
            let remaining = (miss - cursor) as u32;
            let mut batch = remaining;
            for &id in step.list.ids() {
                let arena = self.arenas[id as usize]
                    .as_deref()
                    .expect("system over an undefined component");
                batch = batch.min(arena.chunk_span(cursor as EntityIndex, remaining));
            }

            step.ptrs.clear();
            for &id in step.list.ids() {
                let arena = self.arenas[id as usize]
                    .as_deref_mut()
                    .expect("system over an undefined component");
                let (ptr, taken) = arena.select_range(cursor as EntityIndex, batch);
                debug_assert_eq!(taken, batch);
                step.ptrs.push(ptr);
            }

            let end = cursor + batch as usize;
            let mut ctx = BatchContext::new(cursor as EntityIndex, &mut self.entities[cursor..end]);
            callback.invoke(&mut ctx, &step.ptrs, batch);
            cursor = end;
        }

        step.cursor = miss;
        miss < table_len
    }

    /// Runs a type-erased system to completion over the entity table.
    ///
    /// Entities are visited in strictly ascending index order. An empty
    /// component list visits nothing.
    pub fn run_system_raw(
        &mut self,
        list: &ComponentsList,
        flags: Flags,
        callback: &mut dyn BatchCallback,
    ) -> EcsResult<()> {
        if list.is_empty() {
            return Ok(());
        }
        let mut step = self.begin_system(list.clone(), flags)?;
        while self.system_step(&mut step, callback) {}
        Ok(())
    }

    /// Runs a typed system receiving whole batches as component slices.
    ///
    /// The closure is invoked once per chunk-bounded sub-batch with the
    /// batch context and one mutable slice per queried component, all of
    /// equal length, in the tuple's declaration order.
    pub fn run_system<Q, F>(&mut self, flags: Flags, mut f: F) -> EcsResult<()>
    where
        Q: QueryTuple,
        F: FnMut(&mut BatchContext<'_>, Q::Slices<'_>),
    {
        let list = Q::components_list()?;
        struct SliceAdapter<Q, F> {
            f: F,
            _marker: std::marker::PhantomData<fn() -> Q>,
        }
        impl<Q: QueryTuple, F> BatchCallback for SliceAdapter<Q, F>
        where
            F: FnMut(&mut BatchContext<'_>, Q::Slices<'_>),
        {
            fn invoke(&mut self, ctx: &mut BatchContext<'_>, ptrs: &[ErasedPtr], count: u32) {
                // SAFETY: the runner delivers one exclusive pointer per
                // queried component, each covering `count` initialized
                // values, for the duration of this call.
                let slices = unsafe { Q::slices(ptrs, count as usize) };
                (self.f)(ctx, slices);
            }
        }
        let mut adapter = SliceAdapter::<Q, _> {
            f: &mut f,
            _marker: std::marker::PhantomData,
        };
        self.run_system_raw(&list, flags, &mut adapter)
    }

    /// Runs a typed system invoking the closure once per matching entity.
    pub fn for_each<Q, F>(&mut self, flags: Flags, mut f: F) -> EcsResult<()>
    where
        Q: QueryTuple,
        F: FnMut(EntityPtr, Q::Refs<'_>),
    {
        let list = Q::components_list()?;
        struct RefAdapter<Q, F> {
            f: F,
            _marker: std::marker::PhantomData<fn() -> Q>,
        }
        impl<Q: QueryTuple, F> BatchCallback for RefAdapter<Q, F>
        where
            F: FnMut(EntityPtr, Q::Refs<'_>),
        {
            fn invoke(&mut self, ctx: &mut BatchContext<'_>, ptrs: &[ErasedPtr], count: u32) {
                for offset in 0..count as usize {
                    // SAFETY: as for batch slices; element accesses within
                    // one batch target disjoint slots per component.
                    let refs = unsafe { Q::refs_at(ptrs, offset) };
                    (self.f)(ctx.entity_ptr(offset), refs);
                }
            }
        }
        let mut adapter = RefAdapter::<Q, _> {
            f: &mut f,
            _marker: std::marker::PhantomData,
        };
        self.run_system_raw(&list, flags, &mut adapter)
    }
}

/// Tuple of component types usable as a typed query.
///
/// Implemented for single components wrapped in 1-tuples up to 8-tuples.
/// `IDS` lists ids in declaration order; the erased pointer array handed
/// to adapters follows the same order.
pub trait QueryTuple: 'static {
    /// Component ids, declaration order.
    const IDS: &'static [ComponentId];

    /// One mutable slice per component, equal lengths.
    type Slices<'a>;

    /// One mutable reference per component.
    type Refs<'a>;

    /// Builds the resolved component list for this tuple.
    fn components_list() -> EcsResult<ComponentsList> {
        ComponentsList::new(Self::IDS)
    }

    /// Recovers typed slices from the erased pointer array.
    ///
    /// ## Safety
    /// `ptrs` must hold one pointer per entry of `IDS`, each exclusive and
    /// valid for `len` initialized values of the corresponding type.
    unsafe fn slices<'a>(ptrs: &[ErasedPtr], len: usize) -> Self::Slices<'a>;

    /// Recovers typed references to the values at `offset`.
    ///
    /// ## Safety
    /// As for [`QueryTuple::slices`], with `offset` in bounds; no two
    /// outstanding calls may alias the same offset.
    unsafe fn refs_at<'a>(ptrs: &[ErasedPtr], offset: usize) -> Self::Refs<'a>;
}

macro_rules! impl_query_tuple {
    ($(($ty:ident, $idx:tt)),+) => {
        impl<$($ty: Component),+> QueryTuple for ($($ty,)+) {
            const IDS: &'static [ComponentId] = &[$($ty::ID),+];

            type Slices<'a> = ($(&'a mut [$ty],)+);
            type Refs<'a> = ($(&'a mut $ty,)+);

            #[inline]
            unsafe fn slices<'a>(ptrs: &[ErasedPtr], len: usize) -> Self::Slices<'a> {
                ($(
                    unsafe {
                        std::slice::from_raw_parts_mut(ptrs[$idx].as_ptr().cast::<$ty>(), len)
                    },
                )+)
            }

            #[inline]
            unsafe fn refs_at<'a>(ptrs: &[ErasedPtr], offset: usize) -> Self::Refs<'a> {
                ($(
                    unsafe { &mut *ptrs[$idx].as_ptr().cast::<$ty>().add(offset) },
                )+)
            }
        }
    };
}

impl_query_tuple!((A, 0));
impl_query_tuple!((A, 0), (B, 1));
impl_query_tuple!((A, 0), (B, 1), (C, 2));
impl_query_tuple!((A, 0), (B, 1), (C, 2), (D, 3));
impl_query_tuple!((A, 0), (B, 1), (C, 2), (D, 3), (E, 4));
impl_query_tuple!((A, 0), (B, 1), (C, 2), (D, 3), (E, 4), (F, 5));
impl_query_tuple!((A, 0), (B, 1), (C, 2), (D, 3), (E, 4), (F, 5), (G, 6));
impl_query_tuple!((A, 0), (B, 1), (C, 2), (D, 3), (E, 4), (F, 5), (G, 6), (H, 7));
