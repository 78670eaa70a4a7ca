use core::mem;

pub const WORD_SIZE: usize = mem::size_of::<usize>();
pub const WORD_BITS: usize = usize::BITS as usize;

// alignment of the widest scalar type (long double / u128)
pub const MAX_ALIGN: usize = 16;

pub const HEADER_SIZE: usize = WORD_SIZE;
pub const FOOTER_SIZE: usize = WORD_SIZE;

// a free chunk must hold both list links and its footer
pub const MIN_CHUNK_SIZE: usize = 2 * WORD_SIZE + FOOTER_SIZE;

// payloads land on MAX_ALIGN when the first header sits this far into a region
pub const ALIGNMENT_OFFSET: usize = round_up(HEADER_SIZE, MAX_ALIGN) - HEADER_SIZE;

pub const NUM_BINS: usize = WORD_BITS;

pub const SMALL_LIMIT_POWER: u32 = 5;
pub const SMALL_LIMIT: usize = 1 << SMALL_LIMIT_POWER;
pub const NUM_SMALL_CLASSES: usize = SMALL_LIMIT_POWER as usize + 1;

pub const SLOTS_PER_CONTAINER: usize = WORD_BITS / 4;
pub const CONTAINER_HEADER_SIZE: usize = round_up(2 * WORD_SIZE, MAX_ALIGN);

/// Rounds `value` up to the next multiple of `multiple`, which must be a
/// power of two.
pub const fn round_up(value: usize, multiple: usize) -> usize {
    (value + multiple - 1) & !(multiple - 1)
}

pub fn checked_round_up(value: usize, multiple: usize) -> Option<usize> {
    Some(value.checked_add(multiple - 1)? & !(multiple - 1))
}
