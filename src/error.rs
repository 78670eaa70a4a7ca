use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AllocError {
    #[error("allocation size must be positive (got {0})")]
    InvalidSize(isize),
    #[error("cannot release a null pointer")]
    NullPointer,
    #[error("request for {0} bytes exceeds the largest chunk a header can describe")]
    TooLarge(usize),
    #[error("out of memory: mapping a {requested} byte region failed")]
    OOM { requested: usize },
    #[error("double free of {0:#x}")]
    DoubleFree(usize),
    #[error("{0:#x} was not allocated by this heap")]
    InvalidPointer(usize),
    #[error("trace output can only be configured once")]
    TraceAlreadySet,
    #[error("trace output: {0}")]
    Trace(#[from] io::Error),
}
