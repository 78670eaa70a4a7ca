use crate::config::{Config, TraceTarget};
use crate::error::AllocError;
use crate::large::LargeHeap;
use crate::size_class::SizeClass;
use crate::small::SmallHeap;
use crate::stats::Stats;
use crate::trace::{CsvTrace, Op, TraceSink};
use log::{debug, error, warn};
use std::ptr::NonNull;

/// An allocator instance: small and large object heaps behind one entry
/// point, plus an optional trace sink.
///
/// Dropping a `Heap` unmaps every region it owns, invalidating any pointer
/// still held by callers.
#[derive(Default)]
pub struct Heap {
    large: LargeHeap,
    small: SmallHeap,
    trace: Option<Box<dyn TraceSink>>,
    trace_configured: bool,
}

impl Heap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: &Config) -> Self {
        let mut heap = Self::new();

        if let Some(target) = &config.trace {
            if let Err(e) = heap.set_trace_target(target) {
                warn!("tracing disabled: {e}");
            }
        }

        heap
    }

    pub fn alloc(&mut self, size: isize) -> Result<NonNull<u8>, AllocError> {
        if size <= 0 {
            error!("allocation size must be positive (got {size})");
            return Err(AllocError::InvalidSize(size));
        }

        let size = size as usize;
        let ptr = match SizeClass::get_for_size(size) {
            SizeClass::Small(class) => self.small.alloc(class, &mut self.large),
            SizeClass::Large => self.large.alloc(size),
        }
        .inspect_err(|e| error!("allocation of {size} bytes failed: {e}"))?;

        self.large.stats_mut().allocated_chunks += 1;
        self.record(Op::Alloc);

        Ok(ptr)
    }

    /// Releases an allocation, returning the number of bytes given back.
    ///
    /// # Safety
    /// `ptr` must not be used after this call. Pointers into this heap's
    /// memory that were not returned by `alloc` can corrupt it.
    pub unsafe fn free(&mut self, ptr: *mut u8) -> Result<usize, AllocError> {
        let freed = self
            .free_inner(ptr)
            .inspect_err(|e| error!("release of {ptr:p} failed: {e}"))?;

        self.large.stats_mut().allocated_chunks -= 1;
        self.record(Op::Free);

        Ok(freed)
    }

    unsafe fn free_inner(&mut self, ptr: *mut u8) -> Result<usize, AllocError> {
        let ptr = NonNull::new(ptr).ok_or(AllocError::NullPointer)?;

        match self.small.free(ptr, &mut self.large)? {
            Some(freed) => Ok(freed),
            None => self.large.free(ptr),
        }
    }

    pub fn stats(&self) -> Stats {
        self.large.stats()
    }

    /// Installs the trace sink. Only the first call on a heap succeeds.
    pub fn set_trace(&mut self, sink: Box<dyn TraceSink>) -> Result<(), AllocError> {
        if self.trace_configured {
            return Err(AllocError::TraceAlreadySet);
        }

        self.trace = Some(sink);
        self.trace_configured = true;

        Ok(())
    }

    pub fn set_trace_target(&mut self, target: &TraceTarget) -> Result<(), AllocError> {
        if self.trace_configured {
            return Err(AllocError::TraceAlreadySet);
        }

        let sink: Box<dyn TraceSink> = match target {
            TraceTarget::Stdout => Box::new(CsvTrace::stdout()),
            TraceTarget::File(path) => Box::new(CsvTrace::append(path)?),
        };

        self.set_trace(sink)
    }

    /// Flushes and detaches the trace sink. Tracing cannot be configured
    /// again afterwards.
    pub fn close_trace(&mut self) -> Result<(), AllocError> {
        if let Some(mut sink) = self.trace.take() {
            sink.flush()?;
        }

        Ok(())
    }

    fn record(&mut self, op: Op) {
        let stats = self.large.stats();

        if let Some(sink) = self.trace.as_mut() {
            if let Err(e) = sink.record(op, &stats) {
                warn!("failed to write {op} trace record: {e}");
            }
        }
    }
}

impl Drop for Heap {
    fn drop(&mut self) {
        let stats = self.stats();

        if stats.allocated_chunks > 0 {
            debug!(
                "heap dropped with {} live allocations across {} regions",
                stats.allocated_chunks, stats.regions
            );
        }

        if let Err(e) = self.close_trace() {
            warn!("failed to flush trace output: {e}");
        }
    }
}
