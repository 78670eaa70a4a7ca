use crate::constants::{SMALL_LIMIT, WORD_SIZE};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SizeClass {
    /// Index into the small-object container lists.
    Small(usize),
    Large,
}

impl SizeClass {
    pub fn get_for_size(size: usize) -> SizeClass {
        debug_assert!(size > 0);

        if size < SMALL_LIMIT {
            SizeClass::Small(log2_class(size))
        } else {
            SizeClass::Large
        }
    }
}

/// Slot size of a small class: `2^class` bytes.
pub fn slot_size(class: usize) -> usize {
    1 << class
}

/// Bin holding free chunks of `size` payload bytes.
///
/// Bins group sizes by order of magnitude in words: {1}, {2}, {3, 4}, {5..8}, ...
pub fn bin_index(size: usize) -> usize {
    log2_class(size / WORD_SIZE)
}

// floor(log2(n - 1)) + 1, with n <= 1 mapped to 0
fn log2_class(n: usize) -> usize {
    if n <= 1 {
        return 0;
    }

    (usize::BITS - (n - 1).leading_zeros()) as usize
}
