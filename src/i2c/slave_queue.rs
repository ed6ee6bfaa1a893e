// Licensed under the Apache-2.0 license

//! Bounded ring of length-prefixed slave messages.
//!
//! The interrupt handler pushes each complete slave write as one length byte
//! followed by the payload; the receiving task pops whole messages. A push
//! either stores the complete message or nothing, so a full ring never
//! leaves a partial entry behind.

use heapless::Deque;

use crate::i2c::common::{Frame, MAX_MSG_LEN};

/// Ring size in bytes, length prefixes included.
pub const SLAVE_QUEUE_CAPACITY: usize = 512;

pub struct SlaveQueue<const N: usize = SLAVE_QUEUE_CAPACITY> {
    ring: Deque<u8, N>,
    overflows: u32,
}

impl<const N: usize> Default for SlaveQueue<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> SlaveQueue<N> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            ring: Deque::new(),
            overflows: 0,
        }
    }

    /// Queue one message.
    ///
    /// Empty messages are ignored. A message that is longer than a frame or
    /// does not fit the remaining space is dropped and counted.
    ///
    /// # Returns
    ///
    /// `true` if the message was queued.
    pub fn push(&mut self, message: &[u8]) -> bool {
        if message.is_empty() {
            return false;
        }
        let fits = message.len() <= MAX_MSG_LEN && self.free() > message.len();
        let prefix = match u8::try_from(message.len()) {
            Ok(prefix) if fits => prefix,
            _ => {
                self.record_overflow();
                return false;
            }
        };
        let _ = self.ring.push_back(prefix);
        for &byte in message {
            let _ = self.ring.push_back(byte);
        }
        true
    }

    /// Take the oldest message.
    pub fn pop(&mut self) -> Option<Frame> {
        let len = self.ring.pop_front()?;
        let mut frame = Frame::new();
        for _ in 0..len {
            let byte = self.ring.pop_front()?;
            let _ = frame.push(byte);
        }
        Some(frame)
    }

    /// Count a message dropped before it reached the ring.
    pub fn record_overflow(&mut self) {
        self.overflows = self.overflows.wrapping_add(1);
    }

    #[must_use]
    pub fn overflows(&self) -> u32 {
        self.overflows
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    /// Bytes in use, length prefixes included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ring.len()
    }

    #[must_use]
    pub fn free(&self) -> usize {
        N - self.ring.len()
    }
}
