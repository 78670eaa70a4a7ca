use crate::bins::Bins;
use crate::chunk::Chunk;
use crate::constants::{
    checked_round_up, ALIGNMENT_OFFSET, HEADER_SIZE, MAX_ALIGN, MIN_CHUNK_SIZE,
};
use crate::error::AllocError;
use crate::header::ChunkHeader;
use crate::region::{self, Region};
use crate::size_class::bin_index;
use crate::stats::Stats;
use log::{debug, error};
use std::collections::BTreeMap;
use std::ptr::NonNull;

/// Variable-sized chunks carved out of mapped regions, with free chunks kept
/// in segregated bins and coalesced on release.
#[derive(Default)]
pub struct LargeHeap {
    bins: Bins,
    // region base address -> mapping
    regions: BTreeMap<usize, Region>,
    stats: Stats,
}

impl LargeHeap {
    pub fn stats(&self) -> Stats {
        self.stats
    }

    pub fn stats_mut(&mut self) -> &mut Stats {
        &mut self.stats
    }

    pub fn alloc(&mut self, size: usize) -> Result<NonNull<u8>, AllocError> {
        let size = Self::normalize(size)?;
        let chunk = self.find_free_chunk(size)?;

        if chunk.size() - size >= HEADER_SIZE + MIN_CHUNK_SIZE {
            self.split(chunk, size);
        }

        self.stats.allocated_space += chunk.size();

        Ok(chunk.payload())
    }

    /// Releases a chunk handed out by `alloc`, returning its payload size.
    ///
    /// Pointers that are not the payload of a chunk in a live region are
    /// rejected with `InvalidPointer`.
    ///
    /// # Safety
    /// `ptr` must not be used after this call.
    pub unsafe fn free(&mut self, ptr: NonNull<u8>) -> Result<usize, AllocError> {
        let chunk = self.chunk_for(ptr)?;

        if chunk.header().is_free() {
            return Err(AllocError::DoubleFree(ptr.as_ptr() as usize));
        }

        let freed = chunk.size();

        chunk.mark_free();
        self.stats.allocated_space -= freed;

        let chunk = self.coalesce(chunk);

        if chunk.fills_region() {
            self.remove_region(chunk);
        } else {
            self.add_to_bin(chunk);
        }

        Ok(freed)
    }

    /// Payload size of the live chunk behind `ptr`.
    ///
    /// # Safety
    /// `ptr` must have been returned by `alloc` and not yet freed.
    pub unsafe fn usable_size(&self, ptr: NonNull<u8>) -> usize {
        Chunk::from_payload(ptr.as_ptr()).size()
    }

    #[cfg(test)]
    pub fn region_count(&self) -> usize {
        self.regions.len()
    }

    // Raise to the minimum chunk size and place the payload end so the next
    // header keeps the following payload on MAX_ALIGN.
    fn normalize(requested: usize) -> Result<usize, AllocError> {
        let size = requested.max(MIN_CHUNK_SIZE) - ALIGNMENT_OFFSET;
        let size = checked_round_up(size, MAX_ALIGN)
            .and_then(|size| size.checked_add(ALIGNMENT_OFFSET))
            .filter(|&size| ChunkHeader::can_hold(size))
            .ok_or(AllocError::TooLarge(requested))?;

        Ok(size)
    }

    fn find_free_chunk(&mut self, size: usize) -> Result<Chunk, AllocError> {
        let best_fit = bin_index(size);

        if let Some(largest) = self.bins.largest_in_use().filter(|&l| l >= best_fit) {
            // a near-exact fit that will not be split
            let exact = self
                .bins
                .iter(best_fit)
                .find(|c| c.size() >= size && c.size() < size + MIN_CHUNK_SIZE);

            // otherwise worst-fit from the largest bin, or anything big enough
            // when the best-fit bin is the largest
            let chunk = exact.or_else(|| {
                if largest > best_fit {
                    self.bins.head(largest)
                } else {
                    self.bins.iter(best_fit).find(|c| c.size() >= size)
                }
            });

            if let Some(chunk) = chunk {
                self.remove_from_bin(chunk);
                chunk.mark_allocated();
                return Ok(chunk);
            }
        }

        self.new_region(size)
    }

    fn split(&mut self, chunk: Chunk, size: usize) {
        let header = chunk.header();
        let rest_size = header.size() - size - HEADER_SIZE;

        chunk.update(|h| {
            h.set_size(size);
            h.set_last_of_region(false);
        });

        let rest = chunk.next();

        rest.set_header(ChunkHeader::new(rest_size, header.is_last_of_region(), false));
        rest.mark_free();
        self.add_to_bin(rest);
    }

    fn coalesce(&mut self, mut chunk: Chunk) -> Chunk {
        if !chunk.header().is_last_of_region() {
            let next = chunk.next();
            let next_header = next.header();

            if next_header.is_free() {
                self.remove_from_bin(next);
                chunk.update(|h| {
                    h.set_size(h.size() + HEADER_SIZE + next_header.size());
                    h.set_last_of_region(next_header.is_last_of_region());
                });
            }
        }

        if chunk.header().is_previous_free() {
            let previous = chunk.previous();
            let header = chunk.header();

            self.remove_from_bin(previous);
            previous.update(|h| {
                h.set_size(h.size() + HEADER_SIZE + header.size());
                h.set_last_of_region(header.is_last_of_region());
            });
            chunk = previous;
        }

        chunk.write_footer();
        chunk
    }

    fn add_to_bin(&mut self, chunk: Chunk) {
        debug_assert!(chunk.header().is_free());

        self.bins.push(chunk);
        self.stats.free_space += chunk.size();
        self.stats.free_chunks += 1;
    }

    fn remove_from_bin(&mut self, chunk: Chunk) {
        self.bins.remove(chunk);
        self.stats.free_space -= chunk.size();
        self.stats.free_chunks -= 1;
    }

    fn new_region(&mut self, size: usize) -> Result<Chunk, AllocError> {
        let len = region::size_for_chunk(size).ok_or(AllocError::TooLarge(size))?;
        let region = Region::map(len)?;
        let chunk = unsafe { Chunk::from_header(region.first_chunk()) };

        chunk.set_header(ChunkHeader::new(region::chunk_size_for(len), true, false));
        chunk.mark_allocated();
        chunk.write_region_footer(chunk);

        debug!("new region {:p} of {len} bytes for a {size} byte chunk", region.as_ptr());

        self.regions.insert(region.addr(), region);
        self.stats.regions += 1;

        Ok(chunk)
    }

    fn remove_region(&mut self, chunk: Chunk) {
        let base = chunk.addr() - ALIGNMENT_OFFSET;

        match self.regions.remove(&base) {
            Some(region) => {
                debug!("releasing region {:p} of {} bytes", region.as_ptr(), region.len());
                self.stats.regions -= 1;
            }
            None => error!("chunk {:#x} fills a region that is not registered", chunk.addr()),
        }
    }

    // Locate the header for a payload pointer, refusing anything that is not
    // the payload of a chunk in a live region.
    fn chunk_for(&self, ptr: NonNull<u8>) -> Result<Chunk, AllocError> {
        let addr = ptr.as_ptr() as usize;
        let (_, region) = self
            .regions
            .range(..=addr)
            .next_back()
            .ok_or(AllocError::InvalidPointer(addr))?;

        if !region.contains(addr)
            || addr < region.first_chunk() as usize + HEADER_SIZE
            || addr % MAX_ALIGN != 0
        {
            return Err(AllocError::InvalidPointer(addr));
        }

        // only headers reached from the first chunk are trusted
        let target = addr - HEADER_SIZE;
        let mut chunk = unsafe { Chunk::from_header(region.first_chunk()) };

        while chunk.addr() < target && !chunk.header().is_last_of_region() {
            chunk = chunk.next();
        }

        if chunk.addr() != target {
            return Err(AllocError::InvalidPointer(addr));
        }

        Ok(chunk)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::FOOTER_SIZE;
    use crate::region::page_size;

    fn header_of(ptr: NonNull<u8>) -> ChunkHeader {
        unsafe { Chunk::from_payload(ptr.as_ptr()).header() }
    }

    fn assert_empty(heap: &LargeHeap) {
        assert_eq!(heap.stats(), Stats::default());
        assert_eq!(heap.region_count(), 0);
        assert!(heap.bins.is_empty());
    }

    #[test]
    fn normalized_sizes() {
        for requested in [1, 24, 70, 71, 72, 73, 1000, 4096] {
            let size = LargeHeap::normalize(requested).unwrap();

            assert!(size >= requested);
            assert!(size >= MIN_CHUNK_SIZE);
            assert_eq!((size - ALIGNMENT_OFFSET) % MAX_ALIGN, 0);
            assert!(size - requested.max(MIN_CHUNK_SIZE) < MAX_ALIGN);
        }
    }

    #[test]
    fn too_large() {
        let mut heap = LargeHeap::default();
        let result = heap.alloc(usize::MAX >> 1);

        assert!(matches!(result, Err(AllocError::TooLarge(_))));
        assert_empty(&heap);
    }

    #[test]
    fn payload_alignment() {
        let mut heap = LargeHeap::default();

        for size in [32, 33, 70, 100, 1000, 5000] {
            let ptr = heap.alloc(size).unwrap();

            assert_eq!(ptr.as_ptr() as usize % MAX_ALIGN, 0);
        }
    }

    #[test]
    fn alloc_splits_fresh_region() {
        let mut heap = LargeHeap::default();
        let ptr = heap.alloc(70).unwrap();
        let header = header_of(ptr);
        let region_chunk = region::chunk_size_for(page_size());

        assert_eq!(header.size(), 72);
        assert!(!header.is_free());
        assert!(!header.is_last_of_region());

        let stats = heap.stats();

        assert_eq!(stats.regions, 1);
        assert_eq!(stats.allocated_space, 72);
        assert_eq!(stats.free_chunks, 1);
        assert_eq!(stats.free_space, region_chunk - 72 - HEADER_SIZE);
    }

    #[test]
    fn round_trip_returns_region() {
        let mut heap = LargeHeap::default();
        let ptr = heap.alloc(70).unwrap();

        let freed = unsafe { heap.free(ptr) }.unwrap();

        assert_eq!(freed, 72);
        assert_empty(&heap);
    }

    #[test]
    fn whole_region_allocation_is_not_split() {
        let mut heap = LargeHeap::default();
        let region_chunk = region::chunk_size_for(page_size());
        let ptr = heap.alloc(region_chunk - MAX_ALIGN).unwrap();

        assert_eq!(header_of(ptr).size(), region_chunk);
        assert!(header_of(ptr).is_last_of_region());
        assert_eq!(heap.stats().free_chunks, 0);

        unsafe { heap.free(ptr) }.unwrap();
        assert_empty(&heap);
    }

    #[test]
    fn large_request_gets_own_region() {
        let mut heap = LargeHeap::default();
        let size = 5 * page_size() + 24;
        let ptr = heap.alloc(size).unwrap();

        assert!(header_of(ptr).size() >= size);
        assert_eq!(heap.region_count(), 1);

        unsafe {
            std::ptr::write_bytes(ptr.as_ptr(), 0x5A, size);
            heap.free(ptr).unwrap();
        }

        assert_empty(&heap);
    }

    #[test]
    fn second_alloc_carved_from_tail() {
        let mut heap = LargeHeap::default();
        let a = heap.alloc(70).unwrap();
        let b = heap.alloc(200).unwrap();

        // b is carved from the remainder left after a
        assert_eq!(b.as_ptr() as usize, a.as_ptr() as usize + 72 + HEADER_SIZE);
        assert_eq!(heap.region_count(), 1);
    }

    #[test]
    fn worst_fit_takes_largest_bin() {
        let mut heap = LargeHeap::default();
        let region_chunk = region::chunk_size_for(page_size());
        let middle = heap.alloc(600).unwrap();
        let guard = heap.alloc(100).unwrap();
        let tail = region_chunk - 600 - HEADER_SIZE - 104 - HEADER_SIZE;

        unsafe { heap.free(middle).unwrap() };

        // the freed chunk sits in a bin between the request's and the tail's
        assert!(bin_index(104) < bin_index(600));
        assert!(bin_index(600) < bin_index(tail));
        assert_eq!(heap.stats().free_chunks, 2);

        let ptr = heap.alloc(100).unwrap();

        assert_ne!(ptr, middle);
        assert_eq!(ptr.as_ptr() as usize, guard.as_ptr() as usize + 104 + HEADER_SIZE);
        assert!(header_of(middle).is_free());
        assert_eq!(header_of(middle).size(), 600);
        assert_eq!(heap.stats().free_space, 600 + tail - 104 - HEADER_SIZE);
    }

    #[test]
    fn best_fit_reuses_exact_chunk() {
        let mut heap = LargeHeap::default();
        let a = heap.alloc(200).unwrap();
        let _guard = heap.alloc(24).unwrap();
        let c = heap.alloc(1000).unwrap();
        let _guard2 = heap.alloc(24).unwrap();

        unsafe {
            heap.free(a).unwrap();
            heap.free(c).unwrap();
        }

        let again = heap.alloc(200).unwrap();

        assert_eq!(again, a);
        assert_eq!(header_of(again).size(), 200);
    }

    #[test]
    fn best_fit_bin_split_when_it_is_largest() {
        let mut heap = LargeHeap::default();
        let region_chunk = region::chunk_size_for(page_size());
        // leave a 504 byte tail, alone in its bin
        let head_size = region_chunk - 504 - HEADER_SIZE;
        let head = heap.alloc(head_size).unwrap();

        assert_eq!(heap.stats().free_space, 504);

        let ptr = heap.alloc(264).unwrap();

        assert_eq!(ptr.as_ptr() as usize, head.as_ptr() as usize + head_size + HEADER_SIZE);
        assert_eq!(header_of(ptr).size(), 264);
        assert_eq!(heap.stats().free_space, 504 - 264 - HEADER_SIZE);
        assert_eq!(heap.region_count(), 1);
    }

    #[test]
    fn coalesce_forward() {
        let mut heap = LargeHeap::default();
        let a = heap.alloc(100).unwrap();
        let b = heap.alloc(300).unwrap();
        let _c = heap.alloc(100).unwrap();
        let a_size = header_of(a).size();
        let b_size = header_of(b).size();

        unsafe {
            heap.free(b).unwrap();
            heap.free(a).unwrap();
        }

        let merged = header_of(a);

        assert!(merged.is_free());
        assert_eq!(merged.size(), a_size + b_size + HEADER_SIZE);
        // merged chunk plus the region tail
        assert_eq!(heap.stats().free_chunks, 2);
    }

    #[test]
    fn coalesce_backward() {
        let mut heap = LargeHeap::default();
        let a = heap.alloc(100).unwrap();
        let b = heap.alloc(300).unwrap();
        let c = heap.alloc(100).unwrap();
        let a_size = header_of(a).size();
        let b_size = header_of(b).size();

        unsafe {
            heap.free(a).unwrap();
            heap.free(b).unwrap();
        }

        let merged = header_of(a);

        assert!(merged.is_free());
        assert_eq!(merged.size(), a_size + b_size + HEADER_SIZE);
        assert!(header_of(c).is_previous_free());
        assert_eq!(heap.stats().free_chunks, 2);

        // footer of the merged chunk points back at its header
        let footer = unsafe { (c.as_ptr().sub(HEADER_SIZE + FOOTER_SIZE) as *const usize).read() };

        assert_eq!(footer, a.as_ptr() as usize - HEADER_SIZE);
    }

    #[test]
    fn coalesce_both_sides_reclaims_region() {
        let mut heap = LargeHeap::default();
        let a = heap.alloc(100).unwrap();
        let b = heap.alloc(300).unwrap();
        let c = heap.alloc(100).unwrap();

        unsafe {
            heap.free(a).unwrap();
            heap.free(c).unwrap();

            assert_eq!(heap.region_count(), 1);

            heap.free(b).unwrap();
        }

        assert_empty(&heap);
    }

    #[test]
    fn freed_space_is_reused() {
        let mut heap = LargeHeap::default();
        let a = heap.alloc(500).unwrap();
        let _b = heap.alloc(500).unwrap();

        unsafe { heap.free(a).unwrap() };

        let c = heap.alloc(500).unwrap();

        assert_eq!(c, a);
        assert_eq!(heap.region_count(), 1);
    }

    #[test]
    fn double_free() {
        let mut heap = LargeHeap::default();
        let a = heap.alloc(100).unwrap();
        let _b = heap.alloc(100).unwrap();

        unsafe {
            heap.free(a).unwrap();

            let before = heap.stats();

            assert!(matches!(heap.free(a), Err(AllocError::DoubleFree(_))));
            assert_eq!(heap.stats(), before);
        }
    }

    #[test]
    fn free_after_region_unmapped() {
        let mut heap = LargeHeap::default();
        let a = heap.alloc(100).unwrap();

        unsafe {
            heap.free(a).unwrap();

            assert!(matches!(heap.free(a), Err(AllocError::InvalidPointer(_))));
        }
    }

    #[test]
    fn foreign_pointer() {
        let mut heap = LargeHeap::default();
        let _a = heap.alloc(100).unwrap();
        let mut local = [0u128; 4];
        let ptr = NonNull::new(local.as_mut_ptr() as *mut u8).unwrap();

        assert!(matches!(unsafe { heap.free(ptr) }, Err(AllocError::InvalidPointer(_))));
    }

    #[test]
    fn misaligned_pointer() {
        let mut heap = LargeHeap::default();
        let a = heap.alloc(100).unwrap();
        let inside = unsafe { NonNull::new_unchecked(a.as_ptr().add(8)) };

        assert!(matches!(unsafe { heap.free(inside) }, Err(AllocError::InvalidPointer(_))));
    }

    #[test]
    fn interior_pointer() {
        let mut heap = LargeHeap::default();
        let a = heap.alloc(100).unwrap();
        let inside = unsafe { NonNull::new_unchecked(a.as_ptr().add(MAX_ALIGN)) };
        let before = heap.stats();

        assert!(matches!(unsafe { heap.free(inside) }, Err(AllocError::InvalidPointer(_))));
        assert_eq!(heap.stats(), before);
    }

    #[test]
    fn absorbed_chunk_is_not_a_boundary() {
        let mut heap = LargeHeap::default();
        let a = heap.alloc(100).unwrap();
        let b = heap.alloc(100).unwrap();
        let _c = heap.alloc(100).unwrap();

        unsafe {
            heap.free(a).unwrap();
            heap.free(b).unwrap();
        }

        // b now lies inside the chunk headed by a
        assert_eq!(header_of(a).size(), 104 + HEADER_SIZE + 104);

        let before = heap.stats();

        assert!(matches!(unsafe { heap.free(b) }, Err(AllocError::InvalidPointer(_))));
        assert_eq!(heap.stats(), before);
    }

    #[test]
    fn many_regions_conserve() {
        let mut heap = LargeHeap::default();
        let mut live = vec![];
        let mut size = 70;

        for _ in 0..65 {
            live.push(heap.alloc(size).unwrap());
            size += 70;
        }

        assert!(heap.region_count() > 1);

        for ptr in live {
            unsafe { heap.free(ptr).unwrap() };
        }

        assert_empty(&heap);
    }
}
