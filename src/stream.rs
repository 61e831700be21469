//! Single-producer/single-consumer byte stream with an explicit wake signal.
//!
//! The producer side is short, non-blocking and allocation-free so it can run
//! in an interrupt context. The consumer side suspends on a signal until a
//! byte or a deadline arrives, it never busy-polls.

use crate::buffer::RingBuffer;
use core::cell::RefCell;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::signal::Signal;
use embassy_time::{with_timeout, Instant};

/// Deadline elapsed before a byte arrived
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) struct StreamTimeout;

pub(crate) struct ByteStream<const N: usize> {
    ring: Mutex<CriticalSectionRawMutex, RefCell<RingBuffer<N>>>,
    available: Signal<CriticalSectionRawMutex, ()>,
}

impl<const N: usize> ByteStream<N> {
    pub fn new() -> Self {
        Self {
            ring: Mutex::new(RefCell::new(RingBuffer::new())),
            available: Signal::new(),
        }
    }

    /// Appends a byte and wakes the consumer. Never blocks; a full ring
    /// overwrites its oldest unread byte.
    pub fn push(&self, byte: u8) {
        self.ring.lock(|ring| ring.borrow_mut().push(byte));
        self.available.signal(());
    }

    pub fn try_pop(&self) -> Option<u8> {
        self.ring.lock(|ring| ring.borrow_mut().pop())
    }

    /// Waits for the next byte without a deadline
    pub async fn pop(&self) -> u8 {
        loop {
            if let Some(byte) = self.try_pop() {
                return byte;
            }

            self.available.wait().await;
        }
    }

    /// Waits for the next byte until `deadline`
    pub async fn pop_until(&self, deadline: Instant) -> Result<u8, StreamTimeout> {
        loop {
            if let Some(byte) = self.try_pop() {
                return Ok(byte);
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(StreamTimeout);
            }

            if with_timeout(deadline - now, self.available.wait()).await.is_err() {
                // One final check, the byte may have raced the deadline
                return self.try_pop().ok_or(StreamTimeout);
            }
        }
    }

    /// Steps the read side back by up to `amount` bytes, s. [RingBuffer::rewind]
    pub fn rewind(&self, amount: usize) -> usize {
        self.ring.lock(|ring| ring.borrow_mut().rewind(amount))
    }

    pub fn overruns(&self) -> u32 {
        self.ring.lock(|ring| ring.borrow().overruns())
    }
}
