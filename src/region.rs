use crate::constants::{checked_round_up, ALIGNMENT_OFFSET, FOOTER_SIZE, HEADER_SIZE};
use crate::error::AllocError;
use log::{error, trace};
use std::io;
use std::ptr::{self, NonNull};
use std::sync::OnceLock;

pub fn page_size() -> usize {
    static PAGE_SIZE: OnceLock<usize> = OnceLock::new();

    *PAGE_SIZE.get_or_init(|| {
        let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };

        if size > 0 {
            size as usize
        } else {
            4096
        }
    })
}

/// Mapping length needed to host a single chunk of `chunk_size` payload bytes.
pub fn size_for_chunk(chunk_size: usize) -> Option<usize> {
    let needed = chunk_size.checked_add(ALIGNMENT_OFFSET + HEADER_SIZE + FOOTER_SIZE)?;

    checked_round_up(needed, page_size())
}

/// Payload of the chunk that initially spans a region of `len` bytes.
pub fn chunk_size_for(len: usize) -> usize {
    len - ALIGNMENT_OFFSET - HEADER_SIZE - FOOTER_SIZE
}

/// One anonymous, private, read-write mapping. Unmapped on drop.
pub struct Region {
    base: NonNull<u8>,
    len: usize,
}

impl Region {
    pub fn map(len: usize) -> Result<Region, AllocError> {
        debug_assert!(len > 0 && len % page_size() == 0);

        let ptr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };

        if ptr == libc::MAP_FAILED {
            error!("mmap of {len} bytes failed: {}", io::Error::last_os_error());
            return Err(AllocError::OOM { requested: len });
        }

        let base = NonNull::new(ptr as *mut u8).ok_or(AllocError::OOM { requested: len })?;

        trace!("mapped region {:p} ({len} bytes)", base);

        Ok(Region { base, len })
    }

    pub fn as_ptr(&self) -> *mut u8 {
        self.base.as_ptr()
    }

    pub fn addr(&self) -> usize {
        self.base.as_ptr() as usize
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn contains(&self, addr: usize) -> bool {
        addr >= self.addr() && addr - self.addr() < self.len
    }

    /// Header of the first chunk in this region.
    pub fn first_chunk(&self) -> *mut u8 {
        unsafe { self.as_ptr().add(ALIGNMENT_OFFSET) }
    }
}

impl Drop for Region {
    fn drop(&mut self) {
        let ret = unsafe { libc::munmap(self.base.as_ptr() as *mut libc::c_void, self.len) };

        if ret != 0 {
            error!(
                "munmap of region {:p} ({} bytes) failed: {}",
                self.base,
                self.len,
                io::Error::last_os_error()
            );
        } else {
            trace!("unmapped region {:p} ({} bytes)", self.base, self.len);
        }
    }
}
