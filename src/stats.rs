/// Running totals kept by the heap and handed to the trace sink after every
/// operation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Stats {
    /// Payload bytes currently handed out.
    pub allocated_space: usize,
    pub allocated_chunks: usize,
    /// Bytes sitting in free bins plus unused small-object slots.
    pub free_space: usize,
    pub free_chunks: usize,
    /// Live memory mappings.
    pub regions: usize,
}
