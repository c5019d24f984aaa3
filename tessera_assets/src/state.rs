/// Where a key stands in the load pipeline
#[repr(u8)]
#[derive(Debug, PartialEq, Eq, Copy, Clone, Hash)]
pub enum LoadState {
    /// Never requested, or dropped from the cache since
    Unrequested = 0,
    /// Submitted and waiting on a worker or an inline load
    Pending = 1,
    /// Last load failed and no fallback was installed
    Failed = 2,
    /// Resident in the value cache, possibly as a fallback
    Cached = 3,
}
