//! # Command/response channel
//!
//! Half-duplex RPC over the command-response stream: a command is written to
//! the outbound serial path, then the caller blocks until the expected
//! response token shows up or a deadline elapses. Every higher-level driver
//! operation is an ordered chain of `send` and `recv` steps where the first
//! failing step short-circuits the chain. Partial command sequences are not
//! rolled back, the module may be left partially configured and the caller
//! issues a corrective reset.
//!
//! A single mutex guards the outbound write path so two callers issuing
//! commands concurrently never interleave bytes. Timeouts default to
//! [Config::command_timeout](crate::engine::Config::command_timeout), each
//! call has a `_within` variant taking an explicit window.

use crate::engine::Engine;
use crate::sequence::SequenceMatcher;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::mutex::Mutex;
use embassy_time::{Duration, Instant};
use embedded_io_async::Write;

/// Failures of a single command/response step
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ChannelError {
    /// The expected token or byte did not arrive within the window
    Timeout,

    /// The outbound serial path rejected a write
    WriteFailed,
}

/// Synchronous caller side of the engine.
///
/// Reads the command-response stream fed by the dispatcher and owns the
/// outbound serial writer.
pub struct AtChannel<'e, W: Write, const RAW: usize, const LINE: usize, const RX_SIZE: usize> {
    pub(crate) engine: &'e Engine<RAW, LINE, RX_SIZE>,
    pub(crate) serial: Mutex<CriticalSectionRawMutex, W>,
}

impl<'e, W: Write, const RAW: usize, const LINE: usize, const RX_SIZE: usize> AtChannel<'e, W, RAW, LINE, RX_SIZE> {
    pub(crate) fn new(engine: &'e Engine<RAW, LINE, RX_SIZE>, serial: W) -> Self {
        Self {
            engine,
            serial: Mutex::new(serial),
        }
    }

    /// Writes a formatted command to the outbound path
    pub async fn send(&self, command: &str) -> Result<(), ChannelError> {
        self.send_bytes(command.as_bytes()).await
    }

    /// Writes raw bytes to the outbound path
    pub async fn send_bytes(&self, bytes: &[u8]) -> Result<(), ChannelError> {
        let mut serial = self.serial.lock().await;

        serial.write_all(bytes).await.map_err(|_| ChannelError::WriteFailed)?;
        serial.flush().await.map_err(|_| ChannelError::WriteFailed)
    }

    /// Blocks until the command-response stream produced `token`, up to the
    /// default command timeout
    pub async fn recv(&self, token: &[u8]) -> Result<(), ChannelError> {
        self.recv_within(token, self.engine.config.command_timeout).await
    }

    /// Blocks until the command-response stream produced `token`, up to
    /// `timeout`
    pub async fn recv_within(&self, token: &[u8], timeout: Duration) -> Result<(), ChannelError> {
        let deadline = Instant::now() + timeout;
        let mut matcher = SequenceMatcher::new(token);

        loop {
            let byte = self.engine.line.pop_until(deadline).await.map_err(|_| ChannelError::Timeout)?;

            if matcher.feed(byte) {
                return Ok(());
            }
        }
    }

    /// Copies response bytes into `buf` until the delimiter sub-sequence is
    /// seen or `buf` is full. The delimiter is trimmed from the result.
    /// Returns the number of bytes copied.
    pub async fn read_till(&self, buf: &mut [u8], delimiter: &[u8]) -> Result<usize, ChannelError> {
        self.read_till_within(buf, delimiter, self.engine.config.command_timeout).await
    }

    pub async fn read_till_within(
        &self,
        buf: &mut [u8],
        delimiter: &[u8],
        timeout: Duration,
    ) -> Result<usize, ChannelError> {
        let deadline = Instant::now() + timeout;
        let mut matcher = SequenceMatcher::new(delimiter);
        let mut count = 0;

        while count < buf.len() {
            let byte = self.engine.line.pop_until(deadline).await.map_err(|_| ChannelError::Timeout)?;

            buf[count] = byte;
            count += 1;

            if matcher.feed(byte) {
                return Ok(count - delimiter.len());
            }
        }

        Ok(count)
    }

    /// Copies ASCII digits into `buf`. The first non-digit byte is handed
    /// back to the stream for the next reader. Returns the number of digits
    /// copied.
    pub async fn read_digits(&self, buf: &mut [u8]) -> Result<usize, ChannelError> {
        self.read_digits_within(buf, self.engine.config.command_timeout).await
    }

    pub async fn read_digits_within(&self, buf: &mut [u8], timeout: Duration) -> Result<usize, ChannelError> {
        let deadline = Instant::now() + timeout;
        let mut count = 0;

        while count < buf.len() {
            let byte = self.engine.line.pop_until(deadline).await.map_err(|_| ChannelError::Timeout)?;

            if !byte.is_ascii_digit() {
                self.engine.line.rewind(1);
                break;
            }

            buf[count] = byte;
            count += 1;
        }

        Ok(count)
    }

    /// The engine this channel reads from
    pub fn engine(&self) -> &'e Engine<RAW, LINE, RX_SIZE> {
        self.engine
    }
}
