use std::{
    fmt,
    sync::atomic::{AtomicU64, Ordering},
};

static NEXT_STREAM_ID: AtomicU64 = AtomicU64::new(1);

/// An opaque handle to an ordered sequence of accelerator operations.
///
/// Work enqueued on the same stream runs in enqueue order, there is no ordering across streams.
/// The host backend executes every operation eagerly on the calling thread, which is a valid
/// stream-ordered schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Stream(u64);

impl Stream {
    /// The stream every caller shares when it does not create its own.
    pub const DEFAULT: Stream = Stream(0);

    /// Creates a stream with a process-unique id.
    pub fn create() -> Self {
        Self(NEXT_STREAM_ID.fetch_add(1, Ordering::Relaxed))
    }

    #[inline]
    pub fn id(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stream:{}", self.0)
    }
}
