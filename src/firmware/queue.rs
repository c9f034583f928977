//! Fixed-capacity single-producer/single-consumer byte ring.
//!
//! The ring is split into a [`Producer`] and a [`Consumer`] when it is
//! created. Neither half can be cloned, so each side has exactly one owner.
//! `head` counts pushes and is only stored by the producer, `tail` counts pops
//! and is only stored by the consumer; the element count is their difference,
//! so there is no multi-field update for the other context to observe half
//! done.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};

use crate::firmware::error::QueueFull;

/// Capacity of both firmware queues.
pub const QUEUE_SIZE: usize = 32;

struct Ring<const N: usize> {
    slots: [AtomicU8; N],
    head: AtomicUsize,
    tail: AtomicUsize,
}

impl<const N: usize> Ring<N> {
    fn len(&self) -> usize {
        let head = self.head.load(Ordering::Acquire);
        let tail = self.tail.load(Ordering::Acquire);
        head.wrapping_sub(tail)
    }
}

/// Creates a ring of `N` bytes and returns its two halves.
pub fn channel<const N: usize>() -> (Producer<N>, Consumer<N>) {
    const { assert!(N.is_power_of_two()) };
    let ring = Arc::new(Ring {
        slots: [const { AtomicU8::new(0) }; N],
        head: AtomicUsize::new(0),
        tail: AtomicUsize::new(0),
    });
    (
        Producer { ring: ring.clone() },
        Consumer { ring },
    )
}

/// Writing half. Owned by the context that produces bytes.
pub struct Producer<const N: usize> {
    ring: Arc<Ring<N>>,
}

impl<const N: usize> Producer<N> {
    /// Appends `byte`. A full ring rejects the byte and leaves the stored
    /// entries untouched.
    pub fn push(&mut self, byte: u8) -> Result<(), QueueFull> {
        let head = self.ring.head.load(Ordering::Relaxed);
        let tail = self.ring.tail.load(Ordering::Acquire);
        if head.wrapping_sub(tail) == N {
            return Err(QueueFull(byte));
        }
        self.ring.slots[head % N].store(byte, Ordering::Relaxed);
        self.ring.head.store(head.wrapping_add(1), Ordering::Release);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn is_full(&self) -> bool {
        self.ring.len() == N
    }

    pub fn capacity(&self) -> usize {
        N
    }
}

/// Reading half. Owned by the context that consumes bytes.
pub struct Consumer<const N: usize> {
    ring: Arc<Ring<N>>,
}

impl<const N: usize> Consumer<N> {
    /// Removes the oldest byte, or returns `None` when the ring is empty.
    pub fn pop(&mut self) -> Option<u8> {
        let tail = self.ring.tail.load(Ordering::Relaxed);
        let head = self.ring.head.load(Ordering::Acquire);
        if head == tail {
            return None;
        }
        let byte = self.ring.slots[tail % N].load(Ordering::Relaxed);
        self.ring.tail.store(tail.wrapping_add(1), Ordering::Release);
        Some(byte)
    }

    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.len() == 0
    }

    pub fn capacity(&self) -> usize {
        N
    }
}

pub type ScanCodeProducer = Producer<QUEUE_SIZE>;
pub type ScanCodeConsumer = Consumer<QUEUE_SIZE>;
pub type KeyCodeProducer = Producer<QUEUE_SIZE>;
pub type KeyCodeConsumer = Consumer<QUEUE_SIZE>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_order() {
        let (mut tx, mut rx) = channel::<4>();
        tx.push(1).unwrap();
        tx.push(2).unwrap();
        tx.push(3).unwrap();
        assert_eq!(rx.len(), 3);
        assert_eq!(rx.pop(), Some(1));
        assert_eq!(rx.pop(), Some(2));
        assert_eq!(rx.pop(), Some(3));
        assert_eq!(rx.pop(), None);
    }

    #[test]
    fn test_empty_pop_has_no_side_effects() {
        let (mut tx, mut rx) = channel::<4>();
        for _ in 0..10 {
            assert_eq!(rx.pop(), None);
        }
        assert!(rx.is_empty());
        tx.push(7).unwrap();
        assert_eq!(rx.pop(), Some(7));
        assert_eq!(rx.pop(), None);
    }

    #[test]
    fn test_overrun_keeps_contents() {
        let (mut tx, mut rx) = channel::<QUEUE_SIZE>();
        for i in 0..QUEUE_SIZE as u8 {
            tx.push(i).unwrap();
        }
        assert!(tx.is_full());
        for _ in 0..5 {
            assert_eq!(tx.push(0xEE), Err(QueueFull(0xEE)));
        }
        assert_eq!(rx.len(), QUEUE_SIZE);
        for i in 0..QUEUE_SIZE as u8 {
            assert_eq!(rx.pop(), Some(i));
        }
        assert_eq!(rx.pop(), None);
    }

    #[test]
    fn test_wraparound() {
        let (mut tx, mut rx) = channel::<4>();
        for round in 0..10u8 {
            tx.push(round).unwrap();
            tx.push(round.wrapping_add(100)).unwrap();
            assert_eq!(rx.pop(), Some(round));
            assert_eq!(rx.pop(), Some(round.wrapping_add(100)));
        }
        assert!(rx.is_empty());
        assert_eq!(tx.capacity(), 4);
    }

    #[test]
    fn test_cross_thread() {
        let (mut tx, mut rx) = channel::<QUEUE_SIZE>();
        let writer = std::thread::spawn(move || {
            for i in 0..=255u8 {
                while tx.push(i).is_err() {
                    std::hint::spin_loop();
                }
            }
        });
        let mut expected = 0u16;
        while expected <= 255 {
            if let Some(byte) = rx.pop() {
                assert_eq!(byte as u16, expected);
                expected += 1;
            }
        }
        writer.join().unwrap();
    }
}
