use std::{
    collections::HashMap,
    ops::{Deref, DerefMut},
    sync::{Arc, LazyLock},
};

use log::{debug, warn};
use parking_lot::{Mutex, RawMutex, lock_api::ArcMutexGuard};

use super::Stream;
use crate::{Result, error::AcceleratorErr};

const ELEM_BYTES: usize = size_of::<f32>();

static GLOBAL_POOL: LazyLock<Arc<WorkspacePool>> = LazyLock::new(|| Arc::new(WorkspacePool::new()));

/// The scratch buffer of a single stream.
#[derive(Debug, Default)]
struct Slot {
    buffer: Arc<Mutex<Vec<f32>>>,
    bytes: usize,
}

/// A pool of GEMM scratch memory keyed by execution stream.
///
/// Each stream owns at most one buffer which grows on demand and is only ever reclaimed through
/// `release`. Buffers are leased for the duration of a single kernel, a second lease of the same
/// stream waits for the first one to drop, which is what keeps work on a stream ordered.
#[derive(Debug, Default)]
pub struct WorkspacePool {
    capacity: Option<usize>,
    streams: Mutex<HashMap<Stream, Slot>>,
}

impl WorkspacePool {
    /// Creates a new unbounded `WorkspacePool`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new `WorkspacePool` that never holds more than `bytes` bytes across all streams.
    ///
    /// # Arguments
    /// * `bytes` - The maximum amount of scratch memory.
    ///
    /// # Returns
    /// A new `WorkspacePool` instance.
    pub fn with_capacity(bytes: usize) -> Self {
        Self {
            capacity: Some(bytes),
            ..Default::default()
        }
    }

    /// Returns the process-wide pool.
    pub fn global() -> &'static Arc<WorkspacePool> {
        &GLOBAL_POOL
    }

    /// Leases at least `len` scratch elements attributed to `stream`.
    ///
    /// Blocks while the stream's buffer is leased by other work on the same stream.
    ///
    /// # Arguments
    /// * `stream` - The stream the scratch memory is attributed to.
    /// * `len` - The amount of `f32` elements needed.
    ///
    /// # Returns
    /// The leased buffer or an accelerator failure if the pool is out of memory.
    pub fn acquire(&self, stream: Stream, len: usize) -> Result<WorkspaceLease> {
        let buffer = self.streams.lock().entry(stream).or_default().buffer.clone();

        // The map lock is never held while waiting on a buffer.
        let mut guard = buffer.lock_arc();
        if guard.len() >= len {
            return Ok(WorkspaceLease { guard, len });
        }

        let requested = len * ELEM_BYTES;
        let mut streams = self.streams.lock();
        let own = streams
            .get(&stream)
            .filter(|slot| Arc::ptr_eq(&slot.buffer, &buffer));
        let held = own.map_or(0, |slot| slot.bytes);
        let empty_slot = own.is_some() && held == 0;

        if let Some(capacity) = self.capacity {
            let used: usize = streams.values().map(|slot| slot.bytes).sum();
            let available = capacity.saturating_sub(used - held);

            if requested > available {
                if empty_slot {
                    streams.remove(&stream);
                }

                return Err(AcceleratorErr::OutOfMemory {
                    stream,
                    requested,
                    available,
                }
                .into());
            }
        }

        guard.resize(len, 0.0);
        streams.insert(
            stream,
            Slot {
                buffer,
                bytes: requested,
            },
        );
        debug!(stream = stream.id(), bytes = requested; "grew workspace");

        Ok(WorkspaceLease { guard, len })
    }

    /// Frees all the scratch memory attributed to `stream`.
    ///
    /// Must only be called once `stream` is idle. A buffer that is still leased is detached from
    /// the pool and freed when its lease drops.
    ///
    /// # Arguments
    /// * `stream` - The stream whose workspace to free.
    ///
    /// # Returns
    /// The amount of bytes released, `0` if the stream had no workspace.
    pub fn release(&self, stream: Stream) -> usize {
        let Some(slot) = self.streams.lock().remove(&stream) else {
            return 0;
        };

        if Arc::strong_count(&slot.buffer) > 1 {
            warn!(stream = stream.id(); "released a workspace that is still leased");
        }

        debug!(stream = stream.id(), bytes = slot.bytes; "released workspace");
        slot.bytes
    }

    /// Returns the amount of bytes held across all streams.
    pub fn allocated_bytes(&self) -> usize {
        self.streams.lock().values().map(|slot| slot.bytes).sum()
    }

    /// Returns the amount of bytes attributed to `stream`.
    pub fn stream_bytes(&self, stream: Stream) -> usize {
        self.streams
            .lock()
            .get(&stream)
            .map(|slot| slot.bytes)
            .unwrap_or(0)
    }
}

/// Exclusive access to a stream's scratch buffer.
pub struct WorkspaceLease {
    guard: ArcMutexGuard<RawMutex, Vec<f32>>,
    len: usize,
}

impl std::fmt::Debug for WorkspaceLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkspaceLease").field("len", &self.len).finish_non_exhaustive()
    }
}

impl Deref for WorkspaceLease {
    type Target = [f32];

    fn deref(&self) -> &[f32] {
        &self.guard[..self.len]
    }
}

impl DerefMut for WorkspaceLease {
    fn deref_mut(&mut self) -> &mut [f32] {
        &mut self.guard[..self.len]
    }
}

/// Frees the scratch memory the process-wide pool holds for `stream`.
///
/// Safe to call between iterations, once no work is pending on `stream`. Calling it again on an
/// idle stream does nothing.
///
/// # Arguments
/// * `stream` - The stream whose workspace to free.
pub fn free_workspace(stream: Stream) {
    WorkspacePool::global().release(stream);
}

#[cfg(test)]
mod tests {
    use std::{thread, time::Duration};

    use super::*;

    #[test]
    fn grows_on_demand_and_never_shrinks() {
        let pool = WorkspacePool::new();
        let stream = Stream::create();

        let lease = pool.acquire(stream, 16).unwrap();
        assert_eq!(lease.len(), 16);
        drop(lease);
        assert_eq!(pool.stream_bytes(stream), 64);

        let lease = pool.acquire(stream, 4).unwrap();
        assert_eq!(lease.len(), 4);
        drop(lease);
        assert_eq!(pool.stream_bytes(stream), 64);

        drop(pool.acquire(stream, 32).unwrap());
        assert_eq!(pool.allocated_bytes(), 128);
    }

    #[test]
    fn release_is_idempotent() {
        let pool = WorkspacePool::new();
        let stream = Stream::create();

        drop(pool.acquire(stream, 10).unwrap());
        assert_eq!(pool.release(stream), 40);
        assert_eq!(pool.release(stream), 0);
        assert_eq!(pool.allocated_bytes(), 0);
    }

    #[test]
    fn streams_are_isolated() {
        let pool = WorkspacePool::new();
        let (a, b) = (Stream::create(), Stream::create());

        drop(pool.acquire(a, 10).unwrap());
        drop(pool.acquire(b, 20).unwrap());

        pool.release(a);
        assert_eq!(pool.stream_bytes(a), 0);
        assert_eq!(pool.stream_bytes(b), 80);
    }

    #[test]
    fn capacity_is_enforced() {
        let pool = WorkspacePool::with_capacity(100);
        let (a, b) = (Stream::create(), Stream::create());

        drop(pool.acquire(a, 20).unwrap());
        let err = pool.acquire(b, 10).unwrap_err();
        assert!(matches!(
            err,
            crate::NetErr::Accelerator(AcceleratorErr::OutOfMemory {
                requested: 40,
                available: 20,
                ..
            })
        ));

        // Growing a stream's own buffer only needs the difference.
        drop(pool.acquire(a, 25).unwrap());
        assert_eq!(pool.allocated_bytes(), 100);
    }

    #[test]
    fn failed_acquire_leaves_no_slot() {
        let pool = WorkspacePool::with_capacity(16);
        let stream = Stream::create();

        assert!(pool.acquire(stream, 8).is_err());
        assert!(pool.streams.lock().is_empty());
        assert_eq!(pool.allocated_bytes(), 0);
    }

    #[test]
    fn second_lease_waits_for_the_first() {
        let pool = Arc::new(WorkspacePool::new());
        let stream = Stream::create();

        let mut lease = pool.acquire(stream, 8).unwrap();
        lease[0] = 1.0;

        let waiter = {
            let pool = Arc::clone(&pool);
            thread::spawn(move || pool.acquire(stream, 8).map(|lease| lease[0]))
        };

        thread::sleep(Duration::from_millis(20));
        assert!(!waiter.is_finished());
        lease[0] = 2.0;
        drop(lease);

        assert_eq!(waiter.join().unwrap().unwrap(), 2.0);
        assert_eq!(pool.stream_bytes(stream), 32);
    }

    #[test]
    fn leased_buffer_outlives_release() {
        let pool = WorkspacePool::new();
        let stream = Stream::create();

        let mut lease = pool.acquire(stream, 8).unwrap();
        assert_eq!(pool.release(stream), 32);

        lease[7] = 1.0;
        assert_eq!(lease[7], 1.0);
        drop(lease);

        assert_eq!(pool.allocated_bytes(), 0);
        // The stream starts over with a fresh buffer.
        assert!(pool.acquire(stream, 8).is_ok());
    }

    #[test]
    fn free_workspace_on_idle_stream_is_a_noop() {
        let stream = Stream::create();
        free_workspace(stream);
        free_workspace(stream);
        assert_eq!(WorkspacePool::global().stream_bytes(stream), 0);
    }
}
