//! Channel routing tables.

use std::collections::BTreeMap;

/// Maps destination channel slots to source channel slots.
///
/// Keys are destination slots, values are source slots. For a playback
/// stream the destination is the shared hardware buffer; for a capture
/// stream the destination is the stream's own buffer.
///
/// An invalid map (see [`is_valid`](SlotMap::is_valid)) is never an error by
/// itself: registration rejects it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SlotMap {
    slots: BTreeMap<u32, u32>,
}

impl SlotMap {
    /// Identity map over every bit set in `mask`.
    #[must_use]
    pub fn symmetric(mask: u32) -> Self {
        let slots = (0..32)
            .filter(|pos| mask & (1 << pos) != 0)
            .map(|pos| (pos, pos))
            .collect();
        Self { slots }
    }

    /// Pairs the set bits of `src_mask` with those of `dst_mask`, lowest first.
    ///
    /// If the masks have a different number of bits set the map is left
    /// empty.
    #[must_use]
    pub fn consecutive(src_mask: u32, dst_mask: u32) -> Self {
        let src_count = src_mask.count_ones();
        let dst_count = dst_mask.count_ones();
        if src_count != dst_count {
            tracing::warn!(
                src_mask = format_args!("{src_mask:#x}"),
                dst_mask = format_args!("{dst_mask:#x}"),
                src_count,
                dst_count,
                "slot map masks have different channel counts"
            );
            return Self::default();
        }

        let mut slots = BTreeMap::new();
        let (mut src, mut dst) = (src_mask, dst_mask);
        while src != 0 && dst != 0 {
            let src_pos = src.trailing_zeros();
            let dst_pos = dst.trailing_zeros();
            slots.insert(dst_pos, src_pos);
            src &= src - 1;
            dst &= dst - 1;
        }
        Self { slots }
    }

    /// Returns `true` if the map is non-empty and every destination is distinct.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        !self.slots.is_empty() && self.dst_mask().count_ones() as usize == self.slots.len()
    }

    /// Number of mapped channels.
    #[must_use]
    pub fn channel_count(&self) -> usize {
        self.slots.len()
    }

    /// OR of all source slots.
    #[must_use]
    pub fn src_mask(&self) -> u32 {
        self.slots.values().fold(0, |mask, &src| mask | bit(src))
    }

    /// OR of all destination slots.
    #[must_use]
    pub fn dst_mask(&self) -> u32 {
        self.slots.keys().fold(0, |mask, &dst| mask | bit(dst))
    }

    /// Source slot for a destination slot.
    #[must_use]
    pub fn source_of(&self, dst: u32) -> Option<u32> {
        self.slots.get(&dst).copied()
    }

    /// Iterates `(destination, source)` pairs in destination order.
    pub fn iter(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        self.slots.iter().map(|(&dst, &src)| (dst, src))
    }
}

fn bit(pos: u32) -> u32 {
    1u32.checked_shl(pos).unwrap_or(0)
}
