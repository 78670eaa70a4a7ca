use crate::constants::{CONTAINER_HEADER_SIZE, SLOTS_PER_CONTAINER};
use std::ptr::NonNull;

const FULL_MASK: usize = usize::MAX >> (usize::BITS as usize - SLOTS_PER_CONTAINER);

#[repr(C)]
struct ContainerHeader {
    next: Option<Container>,
    // bit i set: slot i is handed out
    mask: usize,
}

/// A slab of `SLOTS_PER_CONTAINER` equally sized slots carved from one large
/// chunk. The metadata header is padded to `CONTAINER_HEADER_SIZE`, so the
/// payload that follows keeps the large chunk's alignment.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(transparent)]
pub struct Container(NonNull<ContainerHeader>);

impl Container {
    /// Bytes of backing memory needed for slots of `slot_size`.
    pub const fn backing_size(slot_size: usize) -> usize {
        CONTAINER_HEADER_SIZE + SLOTS_PER_CONTAINER * slot_size
    }

    /// Writes an empty container header into `memory`.
    ///
    /// # Safety
    /// `memory` must be writable for `backing_size(slot_size)` bytes and
    /// aligned for a word.
    pub unsafe fn init(memory: NonNull<u8>, next: Option<Container>) -> Container {
        let header = memory.cast::<ContainerHeader>();

        header.as_ptr().write(ContainerHeader { next, mask: 0 });
        Container(header)
    }

    pub fn as_ptr(self) -> NonNull<u8> {
        self.0.cast()
    }

    fn header(&self) -> &ContainerHeader {
        unsafe { self.0.as_ref() }
    }

    fn header_mut(&mut self) -> &mut ContainerHeader {
        unsafe { self.0.as_mut() }
    }

    pub fn next(self) -> Option<Container> {
        self.header().next
    }

    pub fn set_next(mut self, next: Option<Container>) {
        self.header_mut().next = next;
    }

    pub fn mask(self) -> usize {
        self.header().mask
    }

    pub fn is_full(self) -> bool {
        self.mask() & FULL_MASK == FULL_MASK
    }

    pub fn is_empty(self) -> bool {
        self.mask() == 0
    }

    /// Claims the lowest free slot.
    pub fn claim_slot(mut self) -> Option<usize> {
        let free = !self.mask() & FULL_MASK;

        if free == 0 {
            return None;
        }

        let index = free.trailing_zeros() as usize;

        self.header_mut().mask |= 1 << index;
        Some(index)
    }

    /// Clears slot `index`, returning false if it was not claimed.
    pub fn release_slot(mut self, index: usize) -> bool {
        let bit = 1 << index;

        if self.mask() & bit == 0 {
            return false;
        }

        self.header_mut().mask &= !bit;
        true
    }

    pub fn slot_ptr(self, index: usize, slot_size: usize) -> NonNull<u8> {
        debug_assert!(index < SLOTS_PER_CONTAINER);

        unsafe {
            let slot = self.as_ptr().as_ptr().add(CONTAINER_HEADER_SIZE + index * slot_size);

            NonNull::new_unchecked(slot)
        }
    }

    /// Whether `addr` falls anywhere inside this container, header included.
    pub fn contains(self, addr: usize, slot_size: usize) -> bool {
        let start = self.as_ptr().as_ptr() as usize;

        addr >= start && addr - start < Self::backing_size(slot_size)
    }

    /// Slot starting exactly at `addr`.
    pub fn slot_index(self, addr: usize, slot_size: usize) -> Option<usize> {
        let offset = addr
            .checked_sub(self.as_ptr().as_ptr() as usize)?
            .checked_sub(CONTAINER_HEADER_SIZE)?;

        if offset % slot_size != 0 || offset / slot_size >= SLOTS_PER_CONTAINER {
            return None;
        }

        Some(offset / slot_size)
    }
}
