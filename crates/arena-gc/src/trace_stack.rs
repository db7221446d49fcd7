//! The gray set: a chunked LIFO of user pointers awaiting a scan.
//!
//! An allocation is marked when it is pushed, so it can be queued at most
//! once per collection and cycles terminate. Exhausted chunks go back to a
//! bounded process-wide pool instead of the allocator.

use std::ptr::NonNull;
use std::sync::LazyLock;

use crossbeam_queue::ArrayQueue;

use crate::config::DEFAULT_MAX_FREE_CHUNKS;
use crate::header::GcAllocation;

type Chunk = Vec<usize>;

static FREE_CHUNKS: LazyLock<ArrayQueue<Chunk>> =
    LazyLock::new(|| ArrayQueue::new(DEFAULT_MAX_FREE_CHUNKS));

/// Chunks currently parked in the free pool.
#[must_use]
pub fn free_chunk_count() -> usize {
    FREE_CHUNKS.len()
}

/// Chunked work list of pointers to scan.
#[derive(Debug)]
pub struct TraceStack {
    /// Full chunks below `current`.
    chunks: Vec<Chunk>,
    current: Chunk,
    chunk_size: usize,
    max_free_chunks: usize,
}

impl TraceStack {
    /// An empty stack with `chunk_size` words per chunk. At most
    /// `max_free_chunks` chunks are kept in the shared pool on release.
    #[must_use]
    pub fn new(chunk_size: usize, max_free_chunks: usize) -> Self {
        Self {
            chunks: Vec::new(),
            current: get_chunk(chunk_size),
            chunk_size,
            max_free_chunks: max_free_chunks.min(DEFAULT_MAX_FREE_CHUNKS),
        }
    }

    /// Mark and queue `user_data` unless it is already marked.
    ///
    /// Returns whether the pointer was queued.
    ///
    /// # Safety
    ///
    /// `user_data` must be the payload pointer of a live allocation.
    pub unsafe fn push(&mut self, user_data: NonNull<u8>) -> bool {
        let header = unsafe { GcAllocation::from_user_data(user_data).as_ref() };
        if header.is_marked() {
            return false;
        }
        header.set_mark();

        self.current.push(user_data.as_ptr() as usize);
        if self.current.len() == self.chunk_size {
            let fresh = get_chunk(self.chunk_size);
            self.chunks.push(std::mem::replace(&mut self.current, fresh));
        }
        true
    }

    /// Take the most recently pushed pointer.
    pub fn pop(&mut self) -> Option<NonNull<u8>> {
        if let Some(p) = self.current.pop() {
            return NonNull::new(p as *mut u8);
        }

        let full = self.chunks.pop()?;
        let empty = std::mem::replace(&mut self.current, full);
        release_chunk(empty, self.max_free_chunks);
        NonNull::new(self.current.pop()? as *mut u8)
    }

    /// Whether nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.current.is_empty() && self.chunks.is_empty()
    }

    /// Number of queued pointers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.current.len() + self.chunks.len() * self.chunk_size
    }
}

impl Drop for TraceStack {
    fn drop(&mut self) {
        for chunk in self.chunks.drain(..) {
            release_chunk(chunk, self.max_free_chunks);
        }
        release_chunk(std::mem::take(&mut self.current), self.max_free_chunks);
    }
}

fn get_chunk(chunk_size: usize) -> Chunk {
    while let Some(chunk) = FREE_CHUNKS.pop() {
        if chunk.capacity() >= chunk_size {
            return chunk;
        }
    }
    Vec::with_capacity(chunk_size)
}

fn release_chunk(mut chunk: Chunk, max_free_chunks: usize) {
    if chunk.capacity() == 0 || FREE_CHUNKS.len() >= max_free_chunks {
        return;
    }
    chunk.clear();
    // A full pool drops the chunk.
    let _ = FREE_CHUNKS.push(chunk);
}
