//! # Socket operations
//!
//! Maps the cid-based socket contract onto command/response exchanges and
//! the framed bulk-data path. Outgoing payloads are split into parts of at
//! most [MAX_PART_LEN] bytes, each part is framed `<ESC>Z<cid><len4>` and
//! must be confirmed by the module with `<ESC>O` before the next part goes
//! out. Incoming payloads are taken from the connection's packet queue with
//! partial-consumption semantics: an unfinished packet goes back to the head
//! of the queue and keeps priority over newer packets.
//!
//! ## Example
//!
//! ````
//! use embassy_futures::block_on;
//! use gs1500m_transport::engine::{Config, Engine};
//! use gs1500m_transport::example::ExampleSerial;
//! use gs1500m_transport::oob::OobTable;
//! use gs1500m_transport::socket::Protocol;
//!
//! block_on(async {
//!     let engine: Engine<256, 256, 1500> = Engine::new(Config::default());
//!     let (sink, mut dispatcher, channel) = engine.parts(ExampleSerial::default(), OobTable::bulk_data());
//!
//!     // Module confirms the connection with cid 4 and accepts one payload
//!     for &byte in b"CONNECT 4\r\nOK\r\n\x1bO" {
//!         sink.push(byte);
//!     }
//!     dispatcher.process_pending().await;
//!
//!     let cid = channel.bind(Protocol::Udp, 7000).await.unwrap();
//!     assert_eq!(4, cid);
//!
//!     let sent = channel.send_to(cid, b"ping").await.unwrap();
//!     assert_eq!(4, sent);
//! });
//! ````
use crate::channel::{AtChannel, ChannelError};
use crate::frame::{self, MAX_CONNECTIONS, MAX_PART_LEN};
use core::fmt::Write as _;
use core::net::SocketAddr;
use embassy_time::{Duration, Instant};
use embedded_io_async::Write;
use heapless::String;

/// Transport selector of the open/bind commands
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Protocol {
    Tcp,
    Udp,
}

impl Protocol {
    fn tag(&self) -> &'static str {
        match self {
            Protocol::Tcp => "TCP",
            Protocol::Udp => "UDP",
        }
    }
}

/// Socket related errors
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SocketError {
    /// A step of the open command chain failed
    OpenFailed(ChannelError),

    /// A step of the bind command chain failed
    BindFailed(ChannelError),

    /// Close command failed
    CloseFailed(ChannelError),

    /// Writing a framed payload part failed
    SendFailed(ChannelError),

    /// The module did not confirm a payload part with the data-accepted
    /// token within the command timeout
    NotAccepted,

    /// Connection id is outside 0..16 or did not parse as a hex digit
    InvalidConnectionId,

    /// No packet arrived on the connection's queue within the window
    ReceiveTimeout,

    /// Formatted command exceeded its buffer
    CommandTooLong,
}

impl embedded_io::Error for SocketError {
    fn kind(&self) -> embedded_io::ErrorKind {
        match self {
            SocketError::ReceiveTimeout | SocketError::NotAccepted => embedded_io::ErrorKind::TimedOut,
            _ => embedded_io::ErrorKind::Other,
        }
    }
}

impl<'e, W: Write, const RAW: usize, const LINE: usize, const RX_SIZE: usize> AtChannel<'e, W, RAW, LINE, RX_SIZE> {
    /// Opens an outgoing connection and returns the module-assigned
    /// connection id.
    ///
    /// Chain: `AT+NC<TCP|UDP>=<ip>,<port>`, `CONNECT <cid>`, `OK`. The
    /// module's TCP keepalive only takes effect with SO_KEEPALIVE enabled,
    /// despite being documented as default-on, so the socket option is set
    /// right after connecting.
    pub async fn open(&self, protocol: Protocol, remote: SocketAddr) -> Result<usize, SocketError> {
        let mut command: String<64> = String::new();
        write!(&mut command, "AT+NC{}={},{}\n", protocol.tag(), remote.ip(), remote.port())
            .map_err(|_| SocketError::CommandTooLong)?;

        self.send(&command).await.map_err(SocketError::OpenFailed)?;
        self.recv(b"CONNECT ").await.map_err(SocketError::OpenFailed)?;
        let cid = self.read_cid(SocketError::OpenFailed).await?;
        self.recv(b"OK").await.map_err(SocketError::OpenFailed)?;

        let mut command: String<40> = String::new();
        write!(&mut command, "AT+SETSOCKOPT={:x},65535,8,1,4\n", cid).map_err(|_| SocketError::CommandTooLong)?;
        self.send(&command).await.map_err(SocketError::OpenFailed)?;
        self.recv(b"OK").await.map_err(SocketError::OpenFailed)?;

        Ok(cid)
    }

    /// Opens a listening socket on the given local port and returns the
    /// module-assigned connection id
    pub async fn bind(&self, protocol: Protocol, port: u16) -> Result<usize, SocketError> {
        let mut command: String<32> = String::new();
        write!(&mut command, "AT+NS{}={}\n", protocol.tag(), port).map_err(|_| SocketError::CommandTooLong)?;

        self.send(&command).await.map_err(SocketError::BindFailed)?;
        self.recv(b"CONNECT ").await.map_err(SocketError::BindFailed)?;
        let cid = self.read_cid(SocketError::BindFailed).await?;
        self.recv(b"OK").await.map_err(SocketError::BindFailed)?;

        Ok(cid)
    }

    /// Sends a payload over the given connection. Returns the full payload
    /// length once every part was accepted, a failed part fails the whole
    /// send.
    pub async fn send_to(&self, cid: usize, data: &[u8]) -> Result<usize, SocketError> {
        if cid >= MAX_CONNECTIONS {
            return Err(SocketError::InvalidConnectionId);
        }

        for part in data.chunks(MAX_PART_LEN) {
            self.send_part(cid, part).await?;
        }

        Ok(data.len())
    }

    /// Drains the connection's packet queue into `buf`, waiting up to the
    /// default command timeout for the first packet.
    ///
    /// At most one packet is consumed per call. A packet larger than `buf`
    /// is consumed partially and keeps its place at the head of the queue.
    pub async fn receive(&self, cid: usize, buf: &mut [u8]) -> Result<usize, SocketError> {
        self.receive_within(cid, buf, self.engine.config.command_timeout).await
    }

    pub async fn receive_within(&self, cid: usize, buf: &mut [u8], timeout: Duration) -> Result<usize, SocketError> {
        let queue = self.engine.queues.get(cid).ok_or(SocketError::InvalidConnectionId)?;

        let deadline = Instant::now() + timeout;
        let mut packet = queue.get_until(deadline).await.map_err(|_| SocketError::ReceiveTimeout)?;

        let count = packet.read(buf);

        if !packet.is_consumed() {
            queue.push_front(packet);
        }

        Ok(count)
    }

    /// Closes the connection on the module.
    ///
    /// Packets already queued for the connection are not purged, s. [drain](Self::drain).
    pub async fn close(&self, cid: usize) -> Result<(), SocketError> {
        if cid >= MAX_CONNECTIONS {
            return Err(SocketError::InvalidConnectionId);
        }

        let mut command: String<16> = String::new();
        write!(&mut command, "AT+NCLOSE={:x}\n", cid).map_err(|_| SocketError::CommandTooLong)?;

        self.send(&command).await.map_err(SocketError::CloseFailed)?;
        self.recv(b"OK").await.map_err(SocketError::CloseFailed)
    }

    /// Discards all packets queued for the connection. Returns the number of
    /// packets dropped.
    pub fn drain(&self, cid: usize) -> Result<usize, SocketError> {
        let queue = self.engine.queues.get(cid).ok_or(SocketError::InvalidConnectionId)?;

        let mut count = 0;
        while queue.try_get().is_some() {
            count += 1;
        }

        Ok(count)
    }

    /// Byte-stream handle for the given connection id
    pub fn connection(&self, cid: usize) -> Result<Connection<'_, 'e, W, RAW, LINE, RX_SIZE>, SocketError> {
        if cid >= MAX_CONNECTIONS {
            return Err(SocketError::InvalidConnectionId);
        }

        Ok(Connection { cid, channel: self })
    }

    /// Frames one payload part and waits for the data-accepted token
    async fn send_part(&self, cid: usize, part: &[u8]) -> Result<(), SocketError> {
        // Bounds were checked by send_to, part length by chunks()
        let header =
            frame::encode_bulk_header(cid, part.len()).map_err(|_| SocketError::InvalidConnectionId)?;

        {
            let mut serial = self.serial.lock().await;

            serial
                .write_all(&header)
                .await
                .map_err(|_| SocketError::SendFailed(ChannelError::WriteFailed))?;
            serial
                .write_all(part)
                .await
                .map_err(|_| SocketError::SendFailed(ChannelError::WriteFailed))?;
            serial
                .flush()
                .await
                .map_err(|_| SocketError::SendFailed(ChannelError::WriteFailed))?;
        }

        self.recv(frame::DATA_ACCEPTED).await.map_err(|_| SocketError::NotAccepted)
    }

    /// Reads the single hex cid digit of a `CONNECT ` response, leaving the
    /// line terminator for the next step of the chain
    async fn read_cid(&self, map: fn(ChannelError) -> SocketError) -> Result<usize, SocketError> {
        let mut digit = [0x0; 1];

        let count = self.read_till(&mut digit, b"\n").await.map_err(map)?;
        if count == 0 {
            return Err(SocketError::InvalidConnectionId);
        }

        frame::parse_cid_digit(digit[0]).map_err(|_| SocketError::InvalidConnectionId)
    }
}

/// Byte-stream view of one logical connection
pub struct Connection<'c, 'e, W: Write, const RAW: usize, const LINE: usize, const RX_SIZE: usize> {
    cid: usize,
    channel: &'c AtChannel<'e, W, RAW, LINE, RX_SIZE>,
}

impl<W: Write, const RAW: usize, const LINE: usize, const RX_SIZE: usize> Connection<'_, '_, W, RAW, LINE, RX_SIZE> {
    pub fn cid(&self) -> usize {
        self.cid
    }
}

impl<W: Write, const RAW: usize, const LINE: usize, const RX_SIZE: usize> embedded_io::ErrorType
    for Connection<'_, '_, W, RAW, LINE, RX_SIZE>
{
    type Error = SocketError;
}

impl<W: Write, const RAW: usize, const LINE: usize, const RX_SIZE: usize> embedded_io_async::Read
    for Connection<'_, '_, W, RAW, LINE, RX_SIZE>
{
    /// Blocks until at least one byte is available for the connection
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        if buf.is_empty() {
            return Ok(0);
        }

        loop {
            match self.channel.receive(self.cid, buf).await {
                Ok(count) => return Ok(count),
                Err(SocketError::ReceiveTimeout) => {}
                Err(error) => return Err(error),
            }
        }
    }
}

impl<W: Write, const RAW: usize, const LINE: usize, const RX_SIZE: usize> embedded_io_async::Write
    for Connection<'_, '_, W, RAW, LINE, RX_SIZE>
{
    async fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        self.channel.send_to(self.cid, buf).await
    }

    /// Every part is already confirmed by the module during write
    async fn flush(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}
