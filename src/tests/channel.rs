use crate::channel::ChannelError;
use crate::engine::{Config, Engine};
use crate::oob::OobTable;
use crate::tests::mock::MockSerial;
use embassy_futures::block_on;
use embassy_time::{Duration, Instant};

type TestEngine = Engine<256, 256, 32>;

#[test]
fn test_send_writes_all_bytes() {
    let engine = TestEngine::new(Config::default());
    let (serial, log) = MockSerial::new();
    let (_sink, _dispatcher, channel) = engine.parts(serial, OobTable::new());

    block_on(channel.send("AT+NDHCP=1\n")).unwrap();

    assert_eq!("AT+NDHCP=1\n", log.as_string());
}

#[test]
fn test_send_write_error() {
    let engine = TestEngine::new(Config::default());
    let (serial, _log) = MockSerial::failing_at(0);
    let (_sink, _dispatcher, channel) = engine.parts(serial, OobTable::new());

    let result = block_on(channel.send("AT\n"));
    assert_eq!(Err(ChannelError::WriteFailed), result);
}

#[test]
fn test_recv_matches_token() {
    let engine = TestEngine::new(Config::default());
    let (serial, _log) = MockSerial::new();
    let (sink, mut dispatcher, channel) = engine.parts(serial, OobTable::new());

    for &byte in b"\r\nOK\r\n" {
        sink.push(byte);
    }

    block_on(async {
        dispatcher.process_pending().await;
        channel.recv(b"OK").await.unwrap();
    });
}

#[test]
fn test_recv_skips_noise() {
    let engine = TestEngine::new(Config::default());
    let (serial, _log) = MockSerial::new();
    let (sink, mut dispatcher, channel) = engine.parts(serial, OobTable::new());

    for &byte in b"garbage OIP addr=OK" {
        sink.push(byte);
    }

    block_on(async {
        dispatcher.process_pending().await;
        channel.recv(b"OK").await.unwrap();
    });
}

#[test]
fn test_recv_timeout_window() {
    let engine = TestEngine::new(Config::default());
    let (serial, _log) = MockSerial::new();
    let (sink, mut dispatcher, channel) = engine.parts(serial, OobTable::new());

    // A stream that never produces the token
    for &byte in b"ERROR\r\n" {
        sink.push(byte);
    }

    let start = Instant::now();
    let result = block_on(async {
        dispatcher.process_pending().await;
        channel.recv(b"OK").await
    });
    let elapsed = Instant::now() - start;

    assert_eq!(Err(ChannelError::Timeout), result);
    assert!(elapsed >= Duration::from_millis(100));
    assert!(elapsed < Duration::from_secs(2));
}

#[test]
fn test_recv_within_explicit_window() {
    let engine = TestEngine::new(Config::default());
    let (serial, _log) = MockSerial::new();
    let (_sink, _dispatcher, channel) = engine.parts(serial, OobTable::new());

    let start = Instant::now();
    let result = block_on(channel.recv_within(b"OK", Duration::from_millis(30)));

    assert_eq!(Err(ChannelError::Timeout), result);
    assert!(Instant::now() - start >= Duration::from_millis(30));
}

#[test]
fn test_read_till_trims_delimiter() {
    let engine = TestEngine::new(Config::default());
    let (serial, _log) = MockSerial::new();
    let (sink, mut dispatcher, channel) = engine.parts(serial, OobTable::new());

    for &byte in b"10.0.0.42\rOK" {
        sink.push(byte);
    }

    block_on(async {
        dispatcher.process_pending().await;

        let mut buf = [0x0; 32];
        let count = channel.read_till(&mut buf, b"\r").await.unwrap();
        assert_eq!(9, count);
        assert_eq!(b"10.0.0.42", &buf[..count]);

        // The rest of the line is still available
        channel.recv(b"OK").await.unwrap();
    });
}

#[test]
fn test_read_till_buffer_full() {
    let engine = TestEngine::new(Config::default());
    let (serial, _log) = MockSerial::new();
    let (sink, mut dispatcher, channel) = engine.parts(serial, OobTable::new());

    for &byte in b"longer than the buffer\r" {
        sink.push(byte);
    }

    block_on(async {
        dispatcher.process_pending().await;

        let mut buf = [0x0; 6];
        let count = channel.read_till(&mut buf, b"\r").await.unwrap();
        assert_eq!(6, count);
        assert_eq!(b"longer", &buf[..count]);
    });
}

#[test]
fn test_read_till_timeout() {
    let engine = TestEngine::new(Config::default());
    let (serial, _log) = MockSerial::new();
    let (sink, mut dispatcher, channel) = engine.parts(serial, OobTable::new());

    for &byte in b"no delimiter" {
        sink.push(byte);
    }

    block_on(async {
        dispatcher.process_pending().await;

        let mut buf = [0x0; 32];
        let result = channel.read_till_within(&mut buf, b"\r", Duration::from_millis(20)).await;
        assert_eq!(Err(ChannelError::Timeout), result);
    });
}

#[test]
fn test_read_digits_stops_at_non_digit() {
    let engine = TestEngine::new(Config::default());
    let (serial, _log) = MockSerial::new();
    let (sink, mut dispatcher, channel) = engine.parts(serial, OobTable::new());

    for &byte in b"0437XOK" {
        sink.push(byte);
    }

    block_on(async {
        dispatcher.process_pending().await;

        let mut buf = [0x0; 8];
        let count = channel.read_digits(&mut buf).await.unwrap();
        assert_eq!(4, count);
        assert_eq!(b"0437", &buf[..count]);

        // The non-digit byte was handed back to the stream
        channel.recv(b"XOK").await.unwrap();
    });
}

#[test]
fn test_read_digits_buffer_full() {
    let engine = TestEngine::new(Config::default());
    let (serial, _log) = MockSerial::new();
    let (sink, mut dispatcher, channel) = engine.parts(serial, OobTable::new());

    for &byte in b"123456" {
        sink.push(byte);
    }

    block_on(async {
        dispatcher.process_pending().await;

        let mut buf = [0x0; 4];
        let count = channel.read_digits(&mut buf).await.unwrap();
        assert_eq!(4, count);
        assert_eq!(b"1234", &buf[..count]);
    });
}

#[test]
fn test_read_digits_timeout() {
    let engine = TestEngine::new(Config::default());
    let (serial, _log) = MockSerial::new();
    let (_sink, _dispatcher, channel) = engine.parts(serial, OobTable::new());

    block_on(async {
        let mut buf = [0x0; 4];
        let result = channel.read_digits_within(&mut buf, Duration::from_millis(20)).await;
        assert_eq!(Err(ChannelError::Timeout), result);
    });
}
