use std::sync::{Condvar, Mutex, PoisonError};

use crate::error::{Result, SieveError};

/// Slots between two adjacent stages when nothing else is configured
pub const DEFAULT_CAPACITY: usize = 10;

/// Fixed-capacity blocking queue connecting exactly one producer to one consumer.
///
/// - `put` blocks while every slot is occupied
/// - `get` blocks while no slot is occupied
/// - Values come out in exactly the order they went in
/// - There is no close or cancel: a consumer is released by sending it a
///   value it recognises as end-of-stream
pub struct BoundedQueue<T> {
    ring: Mutex<Ring<T>>,
    not_full: Condvar,
    not_empty: Condvar,
    capacity: usize,
}

/// Circular buffer state. `len` is always in [0, slots.len()] and both
/// cursors are always valid slot indices.
struct Ring<T> {
    slots: Vec<Option<T>>,
    head: usize,
    tail: usize,
    len: usize,
}

impl<T> Ring<T> {
    /// Store at the tail, handing the value back when every slot is taken.
    fn push(&mut self, value: T) -> std::result::Result<(), T> {
        if self.len == self.slots.len() {
            return Err(value);
        }
        let tail = self.tail;
        self.slots[tail] = Some(value);
        self.tail = (tail + 1) % self.slots.len();
        self.len += 1;
        Ok(())
    }

    /// Take the head value, if there is one.
    fn pop(&mut self) -> Option<T> {
        let head = self.head;
        let value = self.slots[head].take()?;
        self.head = (head + 1) % self.slots.len();
        self.len -= 1;
        Some(value)
    }
}

impl<T> BoundedQueue<T> {
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(SieveError::Configuration { capacity });
        }

        let mut slots = Vec::new();
        slots
            .try_reserve_exact(capacity)
            .map_err(|e| SieveError::ResourceExhaustion {
                what: "queue buffer",
                detail: e.to_string(),
            })?;
        slots.resize_with(capacity, || None);

        Ok(BoundedQueue {
            ring: Mutex::new(Ring {
                slots,
                head: 0,
                tail: 0,
                len: 0,
            }),
            not_full: Condvar::new(),
            not_empty: Condvar::new(),
            capacity,
        })
    }

    /// Insert at the tail, waiting for a free slot first.
    pub fn put(&self, value: T) {
        // Every critical section leaves the ring consistent, so a poisoned
        // lock still guards valid state.
        let mut ring = self.ring.lock().unwrap_or_else(PoisonError::into_inner);
        let mut pending = value;
        loop {
            match ring.push(pending) {
                Ok(()) => break,
                Err(rejected) => {
                    pending = rejected;
                    ring = self
                        .not_full
                        .wait(ring)
                        .unwrap_or_else(PoisonError::into_inner);
                }
            }
        }
        drop(ring);

        self.not_empty.notify_one();
    }

    /// Remove from the head, waiting for a value first.
    pub fn get(&self) -> T {
        let mut ring = self.ring.lock().unwrap_or_else(PoisonError::into_inner);
        let value = loop {
            if let Some(value) = ring.pop() {
                break value;
            }
            ring = self
                .not_empty
                .wait(ring)
                .unwrap_or_else(PoisonError::into_inner);
        };
        drop(ring);

        self.not_full.notify_one();
        value
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.ring
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
