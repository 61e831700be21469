//! Reassembled bulk payloads and the per-connection packet queues.
//!
//! Each logical connection owns one bounded FIFO of [Packet]s. A packet that
//! was only partially consumed by a receive call goes back to the *head* of
//! its queue, so subsequent calls keep draining it before any newer packet.
//! Violating that order would interleave two partially delivered messages.

use crate::frame::MAX_CONNECTIONS;
use core::cell::RefCell;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::signal::Signal;
use embassy_time::{with_timeout, Instant};
use heapless::{Deque, Vec};

/// Producer-visible capacity of one connection's queue
pub const QUEUE_DEPTH: usize = 5;

/// Reassembled payload of one framed bulk transfer.
///
/// The read offset survives across receive calls, supporting partial
/// consumption.
#[derive(Debug)]
pub struct Packet<const RX_SIZE: usize> {
    cid: usize,
    payload: Vec<u8, RX_SIZE>,
    offset: usize,
}

impl<const RX_SIZE: usize> Packet<RX_SIZE> {
    pub fn new(cid: usize, payload: Vec<u8, RX_SIZE>) -> Self {
        Self { cid, payload, offset: 0 }
    }

    /// Connection the payload belongs to
    pub fn cid(&self) -> usize {
        self.cid
    }

    /// Total payload length, independent of the read offset
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Unconsumed bytes left in the payload
    pub fn remaining(&self) -> usize {
        self.payload.len() - self.offset
    }

    pub fn is_consumed(&self) -> bool {
        self.remaining() == 0
    }

    /// Copies unconsumed payload into `buf` and advances the read offset.
    /// Returns the number of bytes copied.
    pub fn read(&mut self, buf: &mut [u8]) -> usize {
        let amount = self.remaining().min(buf.len());
        let end = self.offset + amount;

        buf[..amount].copy_from_slice(&self.payload[self.offset..end]);
        self.offset = end;
        amount
    }
}

/// Behavior of an enqueue against a full queue
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum OverflowPolicy {
    /// Suspend the producer until a consumer frees a slot. One slow consumer
    /// stalls the shared dispatch task and thereby delivery to every other
    /// connection.
    Block,

    /// Evict the oldest queued packet to make room
    DropOldest,

    /// Drop the new packet and count it
    Reject,
}

/// Bounded FIFO of packets for a single connection id.
///
/// The backing deque holds one slot more than [QUEUE_DEPTH]: the consumer
/// holds at most one packet out of the queue at a time, so re-inserting a
/// partially consumed packet at the head cannot fail even when the producer
/// filled the queue in between.
pub struct PacketQueue<const RX_SIZE: usize> {
    packets: Mutex<CriticalSectionRawMutex, RefCell<Deque<Packet<RX_SIZE>, { QUEUE_DEPTH + 1 }>>>,

    /// Wakes a consumer blocked in [get_until](Self::get_until)
    added: Signal<CriticalSectionRawMutex, ()>,

    /// Wakes a producer blocked by [OverflowPolicy::Block]
    removed: Signal<CriticalSectionRawMutex, ()>,
}

/// Queue was at capacity, the packet is handed back
#[derive(Debug)]
pub struct QueueFull<const RX_SIZE: usize>(pub Packet<RX_SIZE>);

/// Deadline elapsed before a packet arrived
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct GetTimeout;

impl<const RX_SIZE: usize> PacketQueue<RX_SIZE> {
    pub fn new() -> Self {
        Self {
            packets: Mutex::new(RefCell::new(Deque::new())),
            added: Signal::new(),
            removed: Signal::new(),
        }
    }

    /// Appends a packet if a producer slot is free
    pub fn try_put(&self, packet: Packet<RX_SIZE>) -> Result<(), QueueFull<RX_SIZE>> {
        let result = self.packets.lock(|packets| {
            let mut packets = packets.borrow_mut();

            if packets.len() >= QUEUE_DEPTH {
                return Err(packet);
            }

            // Cannot fail, the spare slot is reserved for push_front
            let _ = packets.push_back(packet);
            Ok(())
        });

        match result {
            Ok(()) => {
                self.added.signal(());
                Ok(())
            }
            Err(packet) => Err(QueueFull(packet)),
        }
    }

    /// Appends a packet, suspending until a slot is free
    pub async fn put_blocking(&self, packet: Packet<RX_SIZE>) {
        let mut packet = packet;

        loop {
            match self.try_put(packet) {
                Ok(()) => return,
                Err(QueueFull(returned)) => packet = returned,
            }

            self.removed.wait().await;
        }
    }

    /// Appends a packet, evicting the oldest queued one when full. Returns
    /// the evicted packet, if any.
    pub fn put_drop_oldest(&self, packet: Packet<RX_SIZE>) -> Option<Packet<RX_SIZE>> {
        let evicted = self.packets.lock(|packets| {
            let mut packets = packets.borrow_mut();

            let evicted = if packets.len() >= QUEUE_DEPTH {
                packets.pop_front()
            } else {
                None
            };

            let _ = packets.push_back(packet);
            evicted
        });

        self.added.signal(());
        evicted
    }

    /// Removes and returns the head packet without waiting
    pub fn try_get(&self) -> Option<Packet<RX_SIZE>> {
        let packet = self.packets.lock(|packets| packets.borrow_mut().pop_front());

        if packet.is_some() {
            self.removed.signal(());
        }

        packet
    }

    /// Removes and returns the head packet, waiting until `deadline`
    pub async fn get_until(&self, deadline: Instant) -> Result<Packet<RX_SIZE>, GetTimeout> {
        loop {
            if let Some(packet) = self.try_get() {
                return Ok(packet);
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(GetTimeout);
            }

            if with_timeout(deadline - now, self.added.wait()).await.is_err() {
                // One final check, the packet may have raced the deadline
                return self.try_get().ok_or(GetTimeout);
            }
        }
    }

    /// Re-inserts a partially consumed packet at the head, ahead of any newer
    /// packet, so the next receive call continues draining it.
    pub fn push_front(&self, packet: Packet<RX_SIZE>) {
        self.packets.lock(|packets| {
            // The spare slot guarantees room for the single in-flight packet
            let _ = packets.borrow_mut().push_front(packet);
        });

        self.added.signal(());
    }

    /// Number of queued packets
    pub fn len(&self) -> usize {
        self.packets.lock(|packets| packets.borrow().len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<const RX_SIZE: usize> Default for PacketQueue<RX_SIZE> {
    fn default() -> Self {
        Self::new()
    }
}

/// One bounded queue per logical connection id
pub struct PacketQueueSet<const RX_SIZE: usize> {
    queues: [PacketQueue<RX_SIZE>; MAX_CONNECTIONS],
}

impl<const RX_SIZE: usize> PacketQueueSet<RX_SIZE> {
    pub fn new() -> Self {
        Self {
            queues: core::array::from_fn(|_| PacketQueue::new()),
        }
    }

    /// Returns the queue of the given connection id, None when out of range
    pub fn get(&self, cid: usize) -> Option<&PacketQueue<RX_SIZE>> {
        self.queues.get(cid)
    }
}

impl<const RX_SIZE: usize> Default for PacketQueueSet<RX_SIZE> {
    fn default() -> Self {
        Self::new()
    }
}
