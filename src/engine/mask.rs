//! Sparse bitmask algebra and query scans.
//!
//! A [`SparseMask`] encodes a subset of component ids as a pair
//! `(dict, bits)`: the dictionary word has one bit per component *group*,
//! and the 128-bit word packs one 32-bit subfield per contributing group,
//! in ascending group order. At most [`GROUPS_COUNT`] groups may contribute
//! simultaneously.
//!
//! ## Alignment
//!
//! Queries and entities may carry different dictionaries. A query is only
//! satisfiable against an entity whose dictionary is a superset of the
//! query's; in that case the query's subfields sit at *lower* slots than
//! the corresponding entity subfields. [`Ranks`] precomputes, per query
//! subfield, the dictionary bits strictly below its group rank; alignment
//! shifts each subfield up by one slot per extra entity group below it.
//! The common case (identical dictionaries, or extra groups only above the
//! highest query group) requires no relocation and is detected with a
//! single AND.
//!
//! ## Scans
//!
//! [`first_match`] and [`first_miss`] are linear scans over a packed
//! entity table; together they delimit contiguous runs of matching
//! entities for batch dispatch. Both reject tombstoned slots and apply the
//! required-flags filter before any mask work.

use crate::engine::error::MaskCapacityError;
use crate::engine::types::{
    ComponentId, DictWord, EntityRecord, Flags, MaskBits, GROUPS_COUNT, GROUP_SHIFT, GROUP_SIZE,
    MAX_COMPONENTS, TOMBSTONE_DICT,
};

/// Maximum number of ids a single mask can carry.
pub const MASK_ID_CAPACITY: usize = GROUP_SIZE as usize * GROUPS_COUNT;

/// All ones across one subfield.
const SUBFIELD_MASK: MaskBits = (1 << GROUP_SIZE) - 1;

/// Dictionary mask of all bits strictly below `bit`.
#[inline]
fn fill_up_to(bit: u32) -> DictWord {
    debug_assert!(bit < DictWord::BITS);
    ((1 as DictWord) << bit) - 1
}

/// Compressed set of component ids: a group dictionary plus packed
/// per-group subfields.
///
/// The encoding invariants (checked in debug builds, preserved by every
/// operation):
/// - `dict.count_ones() <= GROUPS_COUNT`,
/// - a clear dictionary bit implies a zero subfield for that group,
/// - a set dictionary bit implies a nonzero subfield (an emptied group
///   loses its dictionary bit and higher subfields are repacked down).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SparseMask {
    /// Packed per-group subfields, ascending group order.
    pub bits: MaskBits,

    /// One bit per contributing group.
    pub dict: DictWord,
}

/// Popcount prefixes derived from a dictionary, used to align query
/// subfields against entities with larger dictionaries.
#[derive(Clone, Copy, Debug, Default)]
pub struct Ranks {
    /// Per subfield, the dictionary bits strictly below its group rank.
    pub select_dict_masks: [DictWord; GROUPS_COUNT],

    /// Per subfield, the group index of the i-th set dictionary bit.
    pub group_ranks: [u32; GROUPS_COUNT],

    /// Number of contributing groups.
    pub groups_count: u32,
}

impl Ranks {
    /// Derives the rank tables for `dict`.
    pub fn of_dict(dict: DictWord) -> Self {
        debug_assert!(
            dict.count_ones() as usize <= GROUPS_COUNT,
            "rank derivation on an over-full dictionary"
        );
        let mut ranks = Ranks::default();
        let mut remaining = dict;
        while remaining != 0 {
            let rank = remaining.trailing_zeros();
            let slot = ranks.groups_count as usize;
            if slot == GROUPS_COUNT {
                break;
            }
            ranks.group_ranks[slot] = rank;
            ranks.select_dict_masks[slot] = fill_up_to(rank);
            ranks.groups_count += 1;
            remaining &= remaining - 1;
        }
        ranks
    }

    /// The largest select mask, i.e. all dictionary bits strictly below the
    /// highest contributing group. A zero intersection with a dictionary
    /// difference means no subfield needs relocation.
    #[inline]
    pub fn highest_select_mask(&self) -> DictWord {
        if self.groups_count == 0 {
            0
        } else {
            self.select_dict_masks[self.groups_count as usize - 1]
        }
    }
}

/// Relocates one subfield of `bits` upward by one slot per set bit of
/// `diff` below the subfield's group rank.
#[inline]
fn relocate_subfield(
    diff: DictWord,
    bits: MaskBits,
    slot: usize,
    select_masks: &[DictWord; GROUPS_COUNT],
) -> MaskBits {
    let shift = (diff & select_masks[slot]).count_ones() * GROUP_SIZE;
    let value = bits & (SUBFIELD_MASK << (slot as u32 * GROUP_SIZE));
    value << shift
}

/// Realigns packed subfields for a dictionary that grew by the groups in
/// `diff`. Each subfield relocates independently; unused subfields are
/// zero and contribute nothing.
#[inline]
pub(crate) fn align_bits(
    diff: DictWord,
    bits: MaskBits,
    select_masks: &[DictWord; GROUPS_COUNT],
) -> MaskBits {
    relocate_subfield(diff, bits, 0, select_masks)
        | relocate_subfield(diff, bits, 1, select_masks)
        | relocate_subfield(diff, bits, 2, select_masks)
        | relocate_subfield(diff, bits, 3, select_masks)
}

#[inline]
fn needs_alignment(diff: DictWord, ranks: &Ranks) -> bool {
    (diff & ranks.highest_select_mask()) != 0
}

impl SparseMask {
    /// Empty mask.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// The mask of an entity record.
    #[inline]
    pub fn of_record(record: &EntityRecord) -> Self {
        Self {
            bits: record.bits(),
            dict: record.dict(),
        }
    }

    /// Sets or clears the bit for component `id`.
    ///
    /// Setting a bit in a group not yet present inserts the group into the
    /// dictionary and realigns existing subfields so they remain sorted by
    /// group index. Clearing the last bit of a group removes the group and
    /// repacks higher subfields downward.
    ///
    /// ## Errors
    /// Fails when `id` is out of range, or when setting would require a
    /// fifth group. The mask is unchanged on failure.
    pub fn set(&mut self, id: ComponentId, state: bool) -> Result<(), MaskCapacityError> {
        if id >= MAX_COMPONENTS {
            return Err(MaskCapacityError {
                id,
                groups_in_use: self.dict.count_ones(),
            });
        }
        let group = id >> GROUP_SHIFT;
        let bit = id & (GROUP_SIZE - 1);
        let group_bit = (1 as DictWord) << group;

        if (self.dict & group_bit) == 0 {
            if !state {
                // Clearing a bit in an absent group is a no-op.
                return Ok(());
            }
            let ranks = Ranks::of_dict(self.dict);
            if ranks.groups_count as usize == GROUPS_COUNT {
                return Err(MaskCapacityError {
                    id,
                    groups_in_use: ranks.groups_count,
                });
            }
            let new_dict = self.dict | group_bit;
            // Only subfields of groups above the inserted one move.
            self.bits = align_bits(new_dict ^ self.dict, self.bits, &ranks.select_dict_masks);
            self.dict = new_dict;
        }

        let slot = (self.dict & fill_up_to(group)).count_ones();
        let selector = (1 as MaskBits) << (slot * GROUP_SIZE + bit);
        if state {
            self.bits |= selector;
        } else {
            self.bits &= !selector;
            if (self.bits & (SUBFIELD_MASK << (slot * GROUP_SIZE))) == 0 {
                self.dict &= !group_bit;
                // Repack: higher subfields slide down one slot.
                let below = ((1 as MaskBits) << (slot * GROUP_SIZE)) - 1;
                self.bits = (self.bits & below) | ((self.bits >> GROUP_SIZE) & !below);
            }
        }
        Ok(())
    }

    /// Returns `true` if the bit for component `id` is set.
    #[inline]
    pub fn get(&self, id: ComponentId) -> bool {
        if id >= MAX_COMPONENTS {
            return false;
        }
        let group = id >> GROUP_SHIFT;
        if (self.dict & ((1 as DictWord) << group)) == 0 {
            return false;
        }
        let bit = id & (GROUP_SIZE - 1);
        let slot = (self.dict & fill_up_to(group)).count_ones();
        (self.bits & ((1 as MaskBits) << (slot * GROUP_SIZE + bit))) != 0
    }

    /// Builds a mask from strictly ascending component ids.
    ///
    /// ## Errors
    /// Fails when an id is out of range or the ids span more than
    /// [`GROUPS_COUNT`] distinct groups.
    ///
    /// ## Panics
    /// Debug builds assert that the input is strictly ascending.
    pub fn from_sorted_ids(ids: &[ComponentId]) -> Result<Self, MaskCapacityError> {
        debug_assert!(
            ids.windows(2).all(|w| w[0] < w[1]),
            "component ids must be strictly ascending"
        );
        let mut mask = SparseMask::new();
        for &id in ids {
            if id >= MAX_COMPONENTS {
                return Err(MaskCapacityError {
                    id,
                    groups_in_use: mask.dict.count_ones(),
                });
            }
            let group = id >> GROUP_SHIFT;
            let new_dict = mask.dict | ((1 as DictWord) << group);
            let slot = new_dict.count_ones() - 1;
            if slot as usize == GROUPS_COUNT {
                return Err(MaskCapacityError {
                    id,
                    groups_in_use: GROUPS_COUNT as u32,
                });
            }
            mask.dict = new_dict;
            let bit = id & (GROUP_SIZE - 1);
            mask.bits |= (1 as MaskBits) << (slot * GROUP_SIZE + bit);
        }
        Ok(mask)
    }

    /// Expands the mask back into ascending component ids.
    pub fn into_ids(&self, ranks: &Ranks) -> IdsBuffer {
        let mut out = IdsBuffer::new();
        for slot in 0..GROUPS_COUNT {
            let rank = ranks.group_ranks[slot];
            let mut part = ((self.bits >> (slot as u32 * GROUP_SIZE)) & SUBFIELD_MASK) as u32;
            while part != 0 {
                let bit = part.trailing_zeros();
                out.push(rank * GROUP_SIZE + bit);
                part &= part - 1;
            }
        }
        out
    }
}

/// Fixed-capacity buffer of expanded component ids.
#[derive(Clone, Copy, Debug)]
pub struct IdsBuffer {
    ids: [ComponentId; MASK_ID_CAPACITY],
    len: usize,
}

impl IdsBuffer {
    fn new() -> Self {
        Self {
            ids: [0; MASK_ID_CAPACITY],
            len: 0,
        }
    }

    #[inline]
    fn push(&mut self, id: ComponentId) {
        self.ids[self.len] = id;
        self.len += 1;
    }

    /// The expanded ids, ascending.
    #[inline]
    pub fn as_slice(&self) -> &[ComponentId] {
        &self.ids[..self.len]
    }

    /// Number of expanded ids.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if no ids were expanded.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Advances `cursor` to the next entity satisfying the query, or to
/// `entities.len()` if none remains.
///
/// An entity matches iff its slot is not tombstoned, it carries all
/// `required_flags`, its dictionary is a superset of the query's, and the
/// query bits (aligned to the entity's dictionary where necessary) are
/// all present.
pub fn first_match(
    mut cursor: usize,
    query: &SparseMask,
    ranks: &Ranks,
    entities: &[EntityRecord],
    required_flags: Flags,
) -> usize {
    while cursor < entities.len() {
        let entity = &entities[cursor];
        if entity.dict() != TOMBSTONE_DICT
            && (entity.flags() & required_flags) == required_flags
            && (entity.dict() & query.dict) == query.dict
        {
            let diff = entity.dict() ^ query.dict;
            let mask = if needs_alignment(diff, ranks) {
                align_bits(diff, query.bits, &ranks.select_dict_masks)
            } else {
                query.bits
            };
            if (entity.bits() & mask) == mask {
                return cursor;
            }
        }
        cursor += 1;
    }
    cursor
}

/// Advances `cursor` from a matching entity to the first subsequent entity
/// that fails the query, bounding the current run for batch dispatch.
///
/// Caches the most recently aligned mask keyed by entity dictionary, so a
/// run of identically-shaped entities realigns once.
pub fn first_miss(
    mut cursor: usize,
    query: &SparseMask,
    ranks: &Ranks,
    entities: &[EntityRecord],
    required_flags: Flags,
) -> usize {
    let mut cached_dict = query.dict;
    let mut cached_mask = query.bits;
    while cursor < entities.len() {
        let entity = &entities[cursor];
        if entity.dict() == TOMBSTONE_DICT
            || (entity.flags() & required_flags) != required_flags
            || (entity.dict() & query.dict) != query.dict
        {
            return cursor;
        }
        if entity.dict() != cached_dict {
            let diff = entity.dict() ^ query.dict;
            cached_mask = if needs_alignment(diff, ranks) {
                align_bits(diff, query.bits, &ranks.select_dict_masks)
            } else {
                query.bits
            };
            cached_dict = entity.dict();
        }
        if (entity.bits() & cached_mask) != cached_mask {
            return cursor;
        }
        cursor += 1;
    }
    cursor
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alignment_is_identity_for_equal_dicts() {
        let mask = SparseMask::from_sorted_ids(&[3, 67]).unwrap();
        let ranks = Ranks::of_dict(mask.dict);
        assert_eq!(align_bits(0, mask.bits, &ranks.select_dict_masks), mask.bits);
    }

    #[test]
    fn alignment_shifts_low_group_insertion() {
        // Group 2 alone occupies slot 0; inserting group 0 moves it to slot 1.
        let mut mask = SparseMask::new();
        mask.set(67, true).unwrap();
        let before = mask.bits;
        mask.set(3, true).unwrap();
        assert_eq!(mask.dict, 0b101);
        assert!(mask.get(3));
        assert!(mask.get(67));
        assert_ne!(mask.bits, before);
    }

    #[test]
    fn emptied_group_repacks_higher_subfields() {
        let mut mask = SparseMask::from_sorted_ids(&[3, 67, 200]).unwrap();
        mask.set(67, false).unwrap();
        assert!(mask.get(3));
        assert!(!mask.get(67));
        assert!(mask.get(200));
        assert_eq!(mask.dict.count_ones(), 2);
        let roundtrip = mask.into_ids(&Ranks::of_dict(mask.dict));
        assert_eq!(roundtrip.as_slice(), &[3, 200]);
    }

    #[test]
    fn ranks_match_set_bits() {
        let ranks = Ranks::of_dict(0b110101);
        assert_eq!(ranks.groups_count, 4);
        assert_eq!(ranks.group_ranks, [0, 2, 4, 5]);
        assert_eq!(ranks.select_dict_masks, [0, 0b11, 0b1111, 0b11111]);
    }
}
