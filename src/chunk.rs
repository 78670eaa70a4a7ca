use crate::constants::{FOOTER_SIZE, HEADER_SIZE, WORD_SIZE};
use crate::header::ChunkHeader;
use std::ptr::NonNull;

/// A view over a chunk living in a mapped region.
///
/// ```text
///   ┌────────┬─────────────────────────────────────────────┐
///   │ header │ payload (size bytes)                        │  allocated
///   └────────┴─────────────────────────────────────────────┘
///   ┌────────┬───────────┬───────────┬─────────┬──────────┐
///   │ header │ last_free │ next_free │   ...   │  footer  │  free
///   └────────┴───────────┴───────────┴─────────┴──────────┘
/// ```
///
/// The footer of a free chunk holds the address of its own header, which lets
/// the following chunk find it in O(1). The word right after the last chunk of
/// a region is the region footer, holding the address of the region's first
/// chunk.
///
/// A `Chunk` is only ever built for a header inside a live region, so the
/// accessors below read and write through the pointer without further checks.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Chunk(NonNull<usize>);

impl Chunk {
    pub unsafe fn from_header(ptr: *mut u8) -> Chunk {
        debug_assert!(!ptr.is_null());
        debug_assert_eq!(ptr as usize % WORD_SIZE, 0);

        Chunk(NonNull::new_unchecked(ptr as *mut usize))
    }

    pub unsafe fn from_payload(ptr: *mut u8) -> Chunk {
        Self::from_header(ptr.sub(HEADER_SIZE))
    }

    unsafe fn from_addr(addr: usize) -> Option<Chunk> {
        NonNull::new(addr as *mut usize).map(Chunk)
    }

    pub fn addr(self) -> usize {
        self.0.as_ptr() as usize
    }

    pub fn payload(self) -> NonNull<u8> {
        unsafe { NonNull::new_unchecked((self.0.as_ptr() as *mut u8).add(HEADER_SIZE)) }
    }

    pub fn header(self) -> ChunkHeader {
        unsafe { ChunkHeader::from_raw(self.0.as_ptr().read()) }
    }

    pub fn set_header(self, header: ChunkHeader) {
        unsafe { self.0.as_ptr().write(header.raw()) }
    }

    pub fn update(self, f: impl FnOnce(&mut ChunkHeader)) {
        let mut header = self.header();

        f(&mut header);
        self.set_header(header);
    }

    pub fn size(self) -> usize {
        self.header().size()
    }

    /// First byte past this chunk's payload.
    pub fn end(self) -> usize {
        self.addr() + HEADER_SIZE + self.size()
    }

    /// The chunk that follows this one in its region.
    pub fn next(self) -> Chunk {
        debug_assert!(!self.header().is_last_of_region());

        unsafe { Chunk::from_header(self.end() as *mut u8) }
    }

    /// The preceding chunk, found through its footer. Only meaningful when
    /// the previous chunk is free.
    pub fn previous(self) -> Chunk {
        debug_assert!(self.header().is_previous_free());

        unsafe {
            let footer = (self.addr() - FOOTER_SIZE) as *const usize;

            Chunk::from_header(footer.read() as *mut u8)
        }
    }

    pub fn write_footer(self) {
        unsafe { self.word_at(self.end() - FOOTER_SIZE).write(self.addr()) }
    }

    pub fn write_region_footer(self, first: Chunk) {
        debug_assert!(self.header().is_last_of_region());

        unsafe { self.word_at(self.end()).write(first.addr()) }
    }

    /// True when this is the last chunk of its region and also the first one.
    pub fn fills_region(self) -> bool {
        self.header().is_last_of_region() && unsafe { self.word_at(self.end()).read() } == self.addr()
    }

    /// Flags this chunk allocated and tells the next chunk about it.
    pub fn mark_allocated(self) {
        self.update(|h| h.set_free(false));

        if !self.header().is_last_of_region() {
            self.next().update(|h| h.set_previous_free(false));
        }
    }

    /// Flags this chunk free, tells the next chunk, and writes the footer.
    pub fn mark_free(self) {
        self.update(|h| h.set_free(true));

        if !self.header().is_last_of_region() {
            self.next().update(|h| h.set_previous_free(true));
        }

        self.write_footer();
    }

    pub fn last_free(self) -> Option<Chunk> {
        unsafe { Chunk::from_addr(self.link(0).read()) }
    }

    pub fn next_free(self) -> Option<Chunk> {
        unsafe { Chunk::from_addr(self.link(1).read()) }
    }

    pub fn set_last_free(self, chunk: Option<Chunk>) {
        unsafe { self.link(0).write(chunk.map_or(0, Chunk::addr)) }
    }

    pub fn set_next_free(self, chunk: Option<Chunk>) {
        unsafe { self.link(1).write(chunk.map_or(0, Chunk::addr)) }
    }

    unsafe fn link(self, index: usize) -> *mut usize {
        self.0.as_ptr().add(1 + index)
    }

    unsafe fn word_at(self, addr: usize) -> *mut usize {
        debug_assert_eq!(addr % WORD_SIZE, 0);

        addr as *mut usize
    }
}
