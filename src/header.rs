//! The chunk header: one word holding three flags and the payload size.
//!
//! ```text
//!   MSB                                                   LSB
//!   ┌──────┬─────────────────────────────────────┬──────┬──────┐
//!   │ free │              size                   │ prev │ last │
//!   └──────┴─────────────────────────────────────┴──────┴──────┘
//! ```
//!
//! Sizes are always a multiple of the word size, so the two lowest bits are
//! free to carry flags. The highest bit is reserved for the free flag, which
//! caps a chunk at half the address space.

const LAST_CHUNK_OF_REGION: usize = 0x1;
const PREVIOUS_CHUNK_FREE: usize = 0x2;
const CHUNK_FREE: usize = !(usize::MAX >> 1);
const SIZE_MASK: usize = !(LAST_CHUNK_OF_REGION | PREVIOUS_CHUNK_FREE | CHUNK_FREE);

#[derive(Clone, Copy, Default, PartialEq, Eq)]
#[repr(transparent)]
pub struct ChunkHeader(usize);

impl ChunkHeader {
    pub fn new(size: usize, last_of_region: bool, previous_free: bool) -> Self {
        let mut header = Self(0);

        header.set_size(size);
        header.set_last_of_region(last_of_region);
        header.set_previous_free(previous_free);
        header
    }

    pub const fn from_raw(word: usize) -> Self {
        Self(word)
    }

    pub const fn raw(self) -> usize {
        self.0
    }

    /// Whether `size` can be stored without touching a flag bit.
    pub const fn can_hold(size: usize) -> bool {
        size & !SIZE_MASK == 0
    }

    pub const fn size(self) -> usize {
        self.0 & SIZE_MASK
    }

    pub const fn is_last_of_region(self) -> bool {
        self.0 & LAST_CHUNK_OF_REGION != 0
    }

    pub const fn is_previous_free(self) -> bool {
        self.0 & PREVIOUS_CHUNK_FREE != 0
    }

    pub const fn is_free(self) -> bool {
        self.0 & CHUNK_FREE != 0
    }

    pub fn set_size(&mut self, size: usize) {
        debug_assert!(Self::can_hold(size), "size {size:#x} overlaps header flags");

        self.0 = (self.0 & !SIZE_MASK) | (size & SIZE_MASK);
    }

    pub fn set_last_of_region(&mut self, value: bool) {
        self.set_flag(LAST_CHUNK_OF_REGION, value);
    }

    pub fn set_previous_free(&mut self, value: bool) {
        self.set_flag(PREVIOUS_CHUNK_FREE, value);
    }

    pub fn set_free(&mut self, value: bool) {
        self.set_flag(CHUNK_FREE, value);
    }

    fn set_flag(&mut self, mask: usize, value: bool) {
        if value {
            self.0 |= mask;
        } else {
            self.0 &= !mask;
        }
    }
}

impl core::fmt::Debug for ChunkHeader {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ChunkHeader")
            .field("size", &self.size())
            .field("free", &self.is_free())
            .field("previous_free", &self.is_previous_free())
            .field("last_of_region", &self.is_last_of_region())
            .finish()
    }
}
