use crate::constants::{NUM_SMALL_CLASSES, SLOTS_PER_CONTAINER};
use crate::container::Container;
use crate::error::AllocError;
use crate::large::LargeHeap;
use crate::size_class::slot_size;
use log::{error, trace};
use std::ptr::NonNull;

/// Fixed-size slots packed into bitmap-tracked containers, one list of
/// containers per power-of-two class.
///
/// Containers are large allocations. While a container is alive its backing
/// chunk is accounted as free small-object capacity rather than as allocated
/// space, and only claimed slots count as allocated.
#[derive(Default)]
pub struct SmallHeap {
    containers: [Option<Container>; NUM_SMALL_CLASSES],
}

impl SmallHeap {
    pub fn alloc(&mut self, class: usize, large: &mut LargeHeap) -> Result<NonNull<u8>, AllocError> {
        let slot_size = slot_size(class);
        let claimed = self.containers[class]
            .and_then(|head| head.claim_slot().map(|index| (head, index)));

        let (container, index) = match claimed {
            Some(claimed) => claimed,
            None => {
                let container = self.add_container(class, large)?;
                let index = container.claim_slot().ok_or(AllocError::OOM {
                    requested: slot_size,
                })?;

                (container, index)
            }
        };

        let stats = large.stats_mut();

        stats.allocated_space += slot_size;
        stats.free_space -= slot_size;

        Ok(container.slot_ptr(index, slot_size))
    }

    /// Releases a slot, returning its size, or `None` when `ptr` does not
    /// belong to any container.
    ///
    /// # Safety
    /// `ptr` must not be used after a successful release.
    pub unsafe fn free(
        &mut self,
        ptr: NonNull<u8>,
        large: &mut LargeHeap,
    ) -> Result<Option<usize>, AllocError> {
        let addr = ptr.as_ptr() as usize;

        for class in 0..NUM_SMALL_CLASSES {
            let slot_size = slot_size(class);
            let mut previous: Option<Container> = None;
            let mut cursor = self.containers[class];

            while let Some(container) = cursor {
                if !container.contains(addr, slot_size) {
                    previous = Some(container);
                    cursor = container.next();
                    continue;
                }

                let index = container
                    .slot_index(addr, slot_size)
                    .ok_or(AllocError::InvalidPointer(addr))?;

                if !container.release_slot(index) {
                    return Err(AllocError::DoubleFree(addr));
                }

                let stats = large.stats_mut();

                stats.allocated_space -= slot_size;
                stats.free_space += slot_size;

                if container.is_empty() {
                    match previous {
                        Some(previous) => previous.set_next(container.next()),
                        None => self.containers[class] = container.next(),
                    }

                    self.retire_container(container, slot_size, large);
                }

                return Ok(Some(slot_size));
            }
        }

        Ok(None)
    }

    fn add_container(
        &mut self,
        class: usize,
        large: &mut LargeHeap,
    ) -> Result<Container, AllocError> {
        let slot_size = slot_size(class);
        let memory = large.alloc(Container::backing_size(slot_size))?;
        let granted = unsafe { large.usable_size(memory) };
        let container = unsafe { Container::init(memory, self.containers[class]) };

        // the chunk becomes slot capacity, not an allocation
        let stats = large.stats_mut();

        stats.allocated_space -= granted;
        stats.free_space += SLOTS_PER_CONTAINER * slot_size;

        self.containers[class] = Some(container);

        trace!("new container {:p} for {slot_size} byte slots", memory);

        Ok(container)
    }

    // A failed release leaves the backing chunk counted as allocated space.
    fn retire_container(&mut self, container: Container, slot_size: usize, large: &mut LargeHeap) {
        let memory = container.as_ptr();
        let granted = unsafe { large.usable_size(memory) };
        let stats = large.stats_mut();

        stats.free_space -= SLOTS_PER_CONTAINER * slot_size;
        stats.allocated_space += granted;

        trace!("retiring container {:p}", memory);

        if let Err(e) = unsafe { large.free(memory) } {
            error!("container {:p} could not be released: {e}", memory);
        }
    }

    #[cfg(test)]
    fn container_count(&self, class: usize) -> usize {
        std::iter::successors(self.containers[class], |c| c.next()).count()
    }
}
