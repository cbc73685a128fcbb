//! Fixed-capacity circular buffer with a gap sentinel.
//!
//! One slot is always left empty, so a buffer of `capacity` slots holds at
//! most `capacity - 1` items. That keeps "full" and "empty" distinguishable
//! from the cursors alone:
//!
//! ```text
//!  empty:  insert_cursor == remove_cursor
//!  full:   (insert_cursor + 1) % capacity == remove_cursor
//! ```
//!
//! The primitives never block. Callers that share a buffer between threads
//! wrap it in a lock and build the waiting protocol on top, see
//! [`Monitor`](crate::monitor::Monitor).

use std::fmt;
use thiserror::Error;

use crate::errors::{ScanError, ScanResult};

/// Smallest capacity that still leaves one usable slot
pub const MIN_CAPACITY: usize = 2;

/// Returned by [`RingBuffer::try_insert`] when no slot is free.
/// Carries the rejected item back to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Full<T>(pub T);

impl<T> Full<T> {
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> fmt::Display for Full<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ring buffer has no free slot")
    }
}

impl<T: fmt::Debug> std::error::Error for Full<T> {}

/// Returned by [`RingBuffer::try_remove`] when nothing is buffered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("ring buffer is empty")]
pub struct Empty;

#[derive(Debug)]
pub struct RingBuffer<T> {
    slots: Box<[Option<T>]>,
    occupied: usize,
    insert_cursor: usize,
    remove_cursor: usize,
    exhausted: bool,
}

impl<T> RingBuffer<T> {
    /// Allocates `capacity` empty slots
    pub fn new(capacity: usize) -> ScanResult<Self> {
        if capacity < MIN_CAPACITY {
            return Err(ScanError::config_error(format!(
                "buffer capacity must be at least {}, got {}",
                MIN_CAPACITY, capacity
            )));
        }

        Ok(Self {
            slots: std::iter::repeat_with(|| None).take(capacity).collect(),
            occupied: 0,
            insert_cursor: 0,
            remove_cursor: 0,
            exhausted: false,
        })
    }

    /// Stores `item` at the insert cursor and returns the slot it landed in
    pub fn try_insert(&mut self, item: T) -> Result<usize, Full<T>> {
        if self.is_full() {
            return Err(Full(item));
        }

        let slot = self.insert_cursor;
        debug_assert!(self.slots[slot].is_none(), "slot {} still occupied", slot);
        self.slots[slot] = Some(item);
        self.insert_cursor = self.advance(slot);
        self.occupied += 1;
        Ok(slot)
    }

    /// Takes the oldest item, returning it with the slot it was read from
    pub fn try_remove(&mut self) -> Result<(usize, T), Empty> {
        if self.is_empty() {
            return Err(Empty);
        }

        let slot = self.remove_cursor;
        let item = self.slots[slot].take().ok_or(Empty)?;
        self.remove_cursor = self.advance(slot);
        self.occupied -= 1;
        Ok((slot, item))
    }

    /// Records that no more items will arrive. Idempotent.
    pub fn mark_exhausted(&mut self) {
        self.exhausted = true;
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// True once the source is exhausted and every item has been removed
    pub fn is_drained_and_exhausted(&self) -> bool {
        self.occupied == 0 && self.exhausted
    }

    pub fn len(&self) -> usize {
        self.occupied
    }

    pub fn is_empty(&self) -> bool {
        self.occupied == 0
    }

    pub fn is_full(&self) -> bool {
        self.occupied >= self.usable_capacity()
    }

    /// Total number of slots, including the gap
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of items the buffer can hold at once
    pub fn usable_capacity(&self) -> usize {
        self.slots.len() - 1
    }

    /// Slot the next insert will write to
    pub fn insert_cursor(&self) -> usize {
        self.insert_cursor
    }

    /// Slot the next remove will read from
    pub fn remove_cursor(&self) -> usize {
        self.remove_cursor
    }

    fn advance(&self, cursor: usize) -> usize {
        (cursor + 1) % self.slots.len()
    }
}
