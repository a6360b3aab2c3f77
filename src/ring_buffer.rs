//! Fixed capacity single-producer single-consumer ring buffer.
//!
//! The buffer is split once into a [`Producer`] and a [`Consumer`]. The
//! producer is the only writer of `head`, the consumer the only writer of
//! `tail`; each side merely reads the other's index. That is enough to push
//! from an interrupt while popping from task context without masking
//! interrupts.

use core::cell::UnsafeCell;
use core::marker::PhantomData;
use core::mem::MaybeUninit;
use core::sync::atomic::{AtomicUsize, Ordering};

/// Ring buffer of `N` slots, one of which always stays empty to tell a full
/// buffer from an empty one.
pub struct RingBuffer<T, const N: usize> {
    head: AtomicUsize,
    tail: AtomicUsize,
    buffer: UnsafeCell<[MaybeUninit<T>; N]>,
}

// Only the split handles touch the slots through a shared reference, and
// there is exactly one of each.
unsafe impl<T: Send, const N: usize> Sync for RingBuffer<T, N> {}

impl<T: Copy, const N: usize> RingBuffer<T, N> {
    pub const fn new() -> Self {
        assert!(N >= 2, "A ring buffer needs at least two slots");
        Self {
            head: AtomicUsize::new(0),
            tail: AtomicUsize::new(0),
            // An array of `MaybeUninit` needs no initialization
            buffer: UnsafeCell::new(unsafe { MaybeUninit::uninit().assume_init() }),
        }
    }

    /// Number of elements the buffer can hold at once
    pub const fn capacity(&self) -> usize {
        N - 1
    }

    pub fn len(&self) -> usize {
        let head = self.head.load(Ordering::Acquire);
        let tail = self.tail.load(Ordering::Acquire);
        (head + N - tail) % N
    }

    pub fn is_empty(&self) -> bool {
        self.head.load(Ordering::Acquire) == self.tail.load(Ordering::Acquire)
    }

    pub fn is_full(&self) -> bool {
        Self::next(self.head.load(Ordering::Acquire)) == self.tail.load(Ordering::Acquire)
    }

    /// Appends `value`. Returns false and leaves the buffer untouched when full.
    pub fn push(&mut self, value: T) -> bool {
        self.enqueue(value)
    }

    pub fn pop(&mut self) -> Option<T> {
        self.dequeue()
    }

    /// Hands out the two halves of the buffer. The exclusive borrow keeps
    /// anyone else from pushing or popping while they live.
    pub fn split(&mut self) -> (Producer<'_, T, N>, Consumer<'_, T, N>) {
        (
            Producer {
                ring: self,
                _not_sync: PhantomData,
            },
            Consumer {
                ring: self,
                _not_sync: PhantomData,
            },
        )
    }

    const fn next(index: usize) -> usize {
        (index + 1) % N
    }

    fn slot(&self, index: usize) -> *mut MaybeUninit<T> {
        debug_assert!(index < N);
        // Pointer arithmetic only, no reference to the whole array is formed
        unsafe { (self.buffer.get() as *mut MaybeUninit<T>).add(index) }
    }

    /// Must only be called by the single producer.
    fn enqueue(&self, value: T) -> bool {
        let head = self.head.load(Ordering::Relaxed);
        let next = Self::next(head);

        if next == self.tail.load(Ordering::Acquire) {
            return false;
        }

        unsafe { self.slot(head).write(MaybeUninit::new(value)) };
        // Publish the slot only after it has been written
        self.head.store(next, Ordering::Release);
        true
    }

    /// Must only be called by the single consumer.
    fn dequeue(&self) -> Option<T> {
        let tail = self.tail.load(Ordering::Relaxed);

        if tail == self.head.load(Ordering::Acquire) {
            return None;
        }

        let value = unsafe { self.slot(tail).read().assume_init() };
        // Hand the slot back only after it has been read
        self.tail.store(Self::next(tail), Ordering::Release);
        Some(value)
    }
}

impl<T: Copy, const N: usize> Default for RingBuffer<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

/// Writing half of a [`RingBuffer`].
pub struct Producer<'a, T, const N: usize> {
    ring: &'a RingBuffer<T, N>,
    _not_sync: PhantomData<core::cell::Cell<()>>,
}

unsafe impl<T: Send, const N: usize> Send for Producer<'_, T, N> {}

impl<T: Copy, const N: usize> Producer<'_, T, N> {
    /// Returns false when the buffer is full; queued data is never overwritten.
    pub fn push(&mut self, value: T) -> bool {
        self.ring.enqueue(value)
    }

    pub fn is_full(&self) -> bool {
        self.ring.is_full()
    }

    pub fn len(&self) -> usize {
        self.ring.len()
    }
}

/// Reading half of a [`RingBuffer`].
pub struct Consumer<'a, T, const N: usize> {
    ring: &'a RingBuffer<T, N>,
    _not_sync: PhantomData<core::cell::Cell<()>>,
}

unsafe impl<T: Send, const N: usize> Send for Consumer<'_, T, N> {}

impl<'a, T: Copy, const N: usize> Consumer<'a, T, N> {
    pub fn pop(&mut self) -> Option<T> {
        self.ring.dequeue()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ring.len()
    }

    /// Pops everything that is queued right now, oldest first.
    ///
    /// Elements pushed while the iterator is alive are yielded as well.
    pub fn drain(&mut self) -> Drain<'_, 'a, T, N> {
        Drain { consumer: self }
    }

    /// Drops everything that is queued, returning how many elements that were.
    pub fn flush(&mut self) -> usize {
        self.drain().count()
    }
}

pub struct Drain<'c, 'a, T, const N: usize> {
    consumer: &'c mut Consumer<'a, T, N>,
}

impl<T: Copy, const N: usize> Iterator for Drain<'_, '_, T, N> {
    type Item = T;

    fn next(&mut self) -> Option<Self::Item> {
        self.consumer.pop()
    }
}
