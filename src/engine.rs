//! # Transport engine
//!
//! Composes the raw ingestion stream, the out-of-band dispatcher, the
//! command-response stream and the per-connection packet queues into one
//! engine. The engine is allocated by the caller and split into three parts:
//!
//! * [RxSink] — fed by the hardware notification context, one byte per
//!   interrupt. Short, non-blocking, allocation-free.
//! * [Dispatcher] — the single dedicated task classifying every received
//!   byte. Run it via [Dispatcher::run] or poll it with
//!   [Dispatcher::process_pending].
//! * [AtChannel](crate::channel::AtChannel) — the synchronous caller side:
//!   command/response exchanges and the socket-facing operations.
//!
//! ## Example
//!
//! ````
//! use embassy_futures::block_on;
//! use gs1500m_transport::engine::{Config, Engine};
//! use gs1500m_transport::example::ExampleSerial;
//! use gs1500m_transport::oob::OobTable;
//!
//! block_on(async {
//!     let engine: Engine<256, 256, 1500> = Engine::new(Config::default());
//!     let (sink, mut dispatcher, channel) = engine.parts(ExampleSerial::default(), OobTable::bulk_data());
//!
//!     // Hardware notification context delivers one byte at a time
//!     for &byte in b"\x1bZ30005hello" {
//!         sink.push(byte);
//!     }
//!
//!     dispatcher.process_pending().await;
//!
//!     let mut buf = [0x0; 16];
//!     let length = channel.receive(3, &mut buf).await.unwrap();
//!     assert_eq!(b"hello", &buf[..length]);
//! });
//! ````
use crate::channel::AtChannel;
use crate::frame;
use crate::oob::{OobAction, OobTable};
use crate::packet::{OverflowPolicy, Packet, PacketQueue, PacketQueueSet};
use crate::stream::ByteStream;
use core::cell::RefCell;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embassy_time::{Duration, Instant};
use embedded_io_async::Write;
use heapless::Vec;

/// Engine configuration.
///
/// Timeouts are defaults, every blocking call has a `_within` variant taking
/// an explicit deadline.
#[derive(Copy, Clone, Debug)]
pub struct Config {
    /// Default window for one synchronous command/response step
    pub command_timeout: Duration,

    /// Window for the header and payload bytes of one framed bulk transfer.
    /// A full 1400 byte part takes ~120 ms at 115200 baud.
    pub payload_timeout: Duration,

    /// Behavior when a connection's packet queue is full
    pub overflow: OverflowPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            command_timeout: Duration::from_millis(100),
            payload_timeout: Duration::from_millis(500),
            overflow: OverflowPolicy::Block,
        }
    }
}

/// Counters for conditions the engine absorbs silently at protocol level
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TransportStats {
    /// Frames discarded due to header parse failure, oversized length or a
    /// payload that timed out mid-transfer
    pub malformed_frames: u32,

    /// Packets evicted by [OverflowPolicy::DropOldest]
    pub dropped_packets: u32,

    /// Packets discarded by [OverflowPolicy::Reject]
    pub rejected_packets: u32,

    /// Ingestion ring bytes lost to overwriting
    pub raw_overruns: u32,

    /// Command-response ring bytes lost to overwriting
    pub line_overruns: u32,
}

#[derive(Default)]
struct Counters {
    malformed_frames: u32,
    dropped_packets: u32,
    rejected_packets: u32,
}

/// Central transport state.
///
/// `RAW` is the ingestion ring capacity, `LINE` the command-response ring
/// capacity and `RX_SIZE` the maximum reassembled payload length per packet.
pub struct Engine<const RAW: usize, const LINE: usize, const RX_SIZE: usize> {
    /// Ingestion stream: hardware notification context -> dispatcher
    pub(crate) raw: ByteStream<RAW>,

    /// Command-response stream: dispatcher -> synchronous callers
    pub(crate) line: ByteStream<LINE>,

    /// One bounded packet queue per connection id
    pub(crate) queues: PacketQueueSet<RX_SIZE>,

    pub(crate) config: Config,

    counters: Mutex<CriticalSectionRawMutex, RefCell<Counters>>,
}

impl<const RAW: usize, const LINE: usize, const RX_SIZE: usize> Engine<RAW, LINE, RX_SIZE> {
    pub fn new(config: Config) -> Self {
        Self {
            raw: ByteStream::new(),
            line: ByteStream::new(),
            queues: PacketQueueSet::new(),
            config,
            counters: Mutex::new(RefCell::new(Counters::default())),
        }
    }

    /// Splits the engine into its three parts. Intended to be called once
    /// after placing the engine where it outlives the tasks using it.
    pub fn parts<W: Write>(
        &self,
        serial: W,
        table: OobTable,
    ) -> (RxSink<'_, RAW>, Dispatcher<'_, RAW, LINE, RX_SIZE>, AtChannel<'_, W, RAW, LINE, RX_SIZE>) {
        (
            RxSink { raw: &self.raw },
            Dispatcher { engine: self, table },
            AtChannel::new(self, serial),
        )
    }

    /// Queue of the given connection id, None when out of range
    pub fn queue(&self, cid: usize) -> Option<&PacketQueue<RX_SIZE>> {
        self.queues.get(cid)
    }

    /// Snapshot of the engine's loss counters
    pub fn stats(&self) -> TransportStats {
        let (malformed_frames, dropped_packets, rejected_packets) = self.counters.lock(|counters| {
            let counters = counters.borrow();
            (counters.malformed_frames, counters.dropped_packets, counters.rejected_packets)
        });

        TransportStats {
            malformed_frames,
            dropped_packets,
            rejected_packets,
            raw_overruns: self.raw.overruns(),
            line_overruns: self.line.overruns(),
        }
    }

    fn count_malformed(&self) {
        self.counters.lock(|counters| counters.borrow_mut().malformed_frames += 1);
    }

    fn count_dropped(&self) {
        self.counters.lock(|counters| counters.borrow_mut().dropped_packets += 1);
    }

    fn count_rejected(&self) {
        self.counters.lock(|counters| counters.borrow_mut().rejected_packets += 1);
    }
}

/// Producer handle for the hardware notification context
pub struct RxSink<'e, const RAW: usize> {
    raw: &'e ByteStream<RAW>,
}

impl<const RAW: usize> RxSink<'_, RAW> {
    /// Appends one received byte and wakes the dispatcher. Never blocks and
    /// never allocates, safe to call from an interrupt context.
    pub fn push(&self, byte: u8) {
        self.raw.push(byte);
    }
}

/// The dedicated dispatch task.
///
/// Exclusive writer to the command-response stream and the packet queues.
pub struct Dispatcher<'e, const RAW: usize, const LINE: usize, const RX_SIZE: usize> {
    engine: &'e Engine<RAW, LINE, RX_SIZE>,
    table: OobTable,
}

impl<const RAW: usize, const LINE: usize, const RX_SIZE: usize> Dispatcher<'_, RAW, LINE, RX_SIZE> {
    /// Classifies incoming bytes forever. Suspends on the ingestion stream's
    /// wake signal while no data is pending.
    pub async fn run(mut self) -> ! {
        loop {
            let byte = self.engine.raw.pop().await;
            self.dispatch(byte).await;
        }
    }

    /// Drains and classifies all currently pending bytes, then returns
    pub async fn process_pending(&mut self) {
        while let Some(byte) = self.engine.raw.try_pop() {
            self.dispatch(byte).await;
        }
    }

    /// Feeds one byte to the registered matchers in registration order. The
    /// first completed match claims the byte and runs its action before any
    /// further byte is drained. Unclaimed bytes go to the command-response
    /// stream, including bytes that only advanced a partial match.
    async fn dispatch(&mut self, byte: u8) {
        let mut matched = None;

        for entry in self.table.entries.iter_mut() {
            if entry.matcher.feed(byte) {
                matched = Some(entry.action);
                break;
            }
        }

        match matched {
            Some(OobAction::BulkData) => self.reassemble().await,
            Some(OobAction::Discard) => {}
            None => self.engine.line.push(byte),
        }
    }

    /// Bulk-data handler: reads `<cid><len4>` and exactly `len` payload bytes
    /// from the raw stream, then enqueues the packet. A header parse failure,
    /// an oversized length or a payload timeout discards the partial frame
    /// and resumes scanning.
    async fn reassemble(&mut self) {
        let deadline = Instant::now() + self.engine.config.payload_timeout;

        let mut header = [0x0; frame::BULK_HEADER_LEN];
        for slot in header.iter_mut() {
            match self.engine.raw.pop_until(deadline).await {
                Ok(byte) => *slot = byte,
                Err(_) => {
                    self.engine.count_malformed();
                    return;
                }
            }
        }

        let (cid, length) = match frame::parse_bulk_header(&header) {
            Ok(parsed) => parsed,
            Err(_) => {
                self.engine.count_malformed();
                return;
            }
        };

        if length > RX_SIZE {
            self.engine.count_malformed();
            return;
        }

        let mut payload: Vec<u8, RX_SIZE> = Vec::new();
        for _ in 0..length {
            match self.engine.raw.pop_until(deadline).await {
                Ok(byte) => {
                    // Cannot fail, length is bounded by RX_SIZE above
                    let _ = payload.push(byte);
                }
                Err(_) => {
                    self.engine.count_malformed();
                    return;
                }
            }
        }

        // Header digits guarantee cid < MAX_CONNECTIONS
        if let Some(queue) = self.engine.queues.get(cid) {
            self.enqueue(queue, Packet::new(cid, payload)).await;
        }
    }

    async fn enqueue(&self, queue: &PacketQueue<RX_SIZE>, packet: Packet<RX_SIZE>) {
        match self.engine.config.overflow {
            OverflowPolicy::Block => queue.put_blocking(packet).await,
            OverflowPolicy::DropOldest => {
                if queue.put_drop_oldest(packet).is_some() {
                    self.engine.count_dropped();
                }
            }
            OverflowPolicy::Reject => {
                if queue.try_put(packet).is_err() {
                    self.engine.count_rejected();
                }
            }
        }
    }
}
