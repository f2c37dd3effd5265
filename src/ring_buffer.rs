//! Fixed-capacity circular byte queue shared between exactly one producer and
//! exactly one consumer.
//!
//! The queue keeps one slot empty so that `head == tail` always means empty and
//! `next(head) == tail` always means full; a queue created with capacity `n`
//! therefore holds at most `n - 1` bytes.
//!
//! Synchronization is index-only. The producer is the sole writer of `head`
//! and the consumer the sole writer of `tail`; each side only reads the other
//! one's index. Storing a byte happens before the `Release` store of `head`,
//! and the consumer `Acquire`s `head` before loading the byte, so no lock is
//! ever taken. The [`Producer`] and [`Consumer`] handles are not `Clone`, which
//! keeps the single-producer/single-consumer contract at compile time.

use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;

// =============================================================================
// Public Interface
// =============================================================================

/// Create a new ring buffer with `capacity` slots and split it into its two
/// ends.
///
/// **Panics** if `capacity < 2`, as such a queue could never hold a byte.
pub fn ring_buffer(capacity: usize) -> (Producer, Consumer) {
    assert!(capacity >= 2, "ring buffer needs at least two slots");
    let shared = Arc::new(Shared {
        buf: (0..capacity).map(|_| AtomicU8::new(0)).collect(),
        head: AtomicUsize::new(0),
        tail: AtomicUsize::new(0),
    });
    (
        Producer {
            shared: Arc::clone(&shared),
        },
        Consumer { shared },
    )
}

/// The writing end of a ring buffer.
#[derive(Debug)]
pub struct Producer {
    shared: Arc<Shared>,
}
impl Producer {
    /// Append one byte. Returns `false`, leaving the queue untouched, when the
    /// queue is full.
    pub fn push(&mut self, byte: u8) -> bool {
        let shared = &*self.shared;
        let head = shared.head.load(Ordering::Relaxed);
        let next = shared.next(head);
        if next == shared.tail.load(Ordering::Acquire) {
            return false;
        }
        shared.buf[head].store(byte, Ordering::Relaxed);
        shared.head.store(next, Ordering::Release);
        true
    }

    /// Append as many bytes of `bytes` as fit, in order, and return how many
    /// were accepted. Bytes beyond the first rejected one are never written.
    pub fn write(&mut self, bytes: &[u8]) -> usize {
        bytes.iter().take_while(|&&b| self.push(b)).count()
    }

    /// `true` if one more byte would be rejected.
    pub fn is_full(&self) -> bool {
        self.shared.is_full()
    }

    /// Number of bytes that can still be pushed.
    pub fn free(&self) -> usize {
        self.shared.capacity() - 1 - self.shared.len()
    }
}

/// The reading end of a ring buffer.
#[derive(Debug)]
pub struct Consumer {
    shared: Arc<Shared>,
}
impl Consumer {
    /// Remove and return the oldest byte, if any.
    pub fn pop(&mut self) -> Option<u8> {
        let shared = &*self.shared;
        let tail = shared.tail.load(Ordering::Relaxed);
        if tail == shared.head.load(Ordering::Acquire) {
            return None;
        }
        let byte = shared.buf[tail].load(Ordering::Relaxed);
        shared.tail.store(shared.next(tail), Ordering::Release);
        Some(byte)
    }

    /// Copy up to `out.len()` of the oldest bytes into `out` without removing
    /// them. Returns the number of bytes copied.
    pub fn peek(&self, out: &mut [u8]) -> usize {
        let shared = &*self.shared;
        let head = shared.head.load(Ordering::Acquire);
        let mut tail = shared.tail.load(Ordering::Relaxed);
        let mut n = 0;
        while n < out.len() && tail != head {
            out[n] = shared.buf[tail].load(Ordering::Relaxed);
            tail = shared.next(tail);
            n += 1;
        }
        n
    }

    /// Drop the `count` oldest bytes, typically after a [`peek`](Self::peek)
    /// whose bytes were only partially consumed downstream.
    pub fn advance(&mut self, count: usize) {
        let shared = &*self.shared;
        let count = count.min(shared.len());
        let tail = shared.tail.load(Ordering::Relaxed);
        shared
            .tail
            .store((tail + count) % shared.capacity(), Ordering::Release);
    }

    /// Remove up to `out.len()` bytes into `out`, returning how many were read.
    pub fn read(&mut self, out: &mut [u8]) -> usize {
        let n = self.peek(out);
        self.advance(n);
        n
    }

    /// Drop everything currently queued.
    pub fn clear(&mut self) {
        let head = self.shared.head.load(Ordering::Acquire);
        self.shared.tail.store(head, Ordering::Release);
    }

    pub fn is_empty(&self) -> bool {
        self.shared.len() == 0
    }

    pub fn len(&self) -> usize {
        self.shared.len()
    }
}

// =============================================================================
// Private stuff
// =============================================================================

#[derive(Debug)]
struct Shared {
    buf: Box<[AtomicU8]>,
    head: AtomicUsize,
    tail: AtomicUsize,
}
impl Shared {
    fn capacity(&self) -> usize {
        self.buf.len()
    }

    fn next(&self, index: usize) -> usize {
        (index + 1) % self.capacity()
    }

    fn len(&self) -> usize {
        let head = self.head.load(Ordering::Acquire);
        let tail = self.tail.load(Ordering::Acquire);
        (head + self.capacity() - tail) % self.capacity()
    }

    fn is_full(&self) -> bool {
        self.next(self.head.load(Ordering::Acquire)) == self.tail.load(Ordering::Acquire)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
