use std::cell::RefCell;
use std::rc::Rc;
use std::string::String;
use std::vec::Vec;

/// Custom mock for the outbound serial path. Records every written byte and
/// optionally fails a single write call for error-path tests.
pub struct MockSerial {
    log: Rc<RefCell<Vec<u8>>>,

    /// Simulates a write error at the given call index
    fail_at_write: Option<usize>,

    /// write() call count
    write_count: usize,
}

/// Read handle on the bytes a [MockSerial] has accepted
pub struct SerialLog {
    log: Rc<RefCell<Vec<u8>>>,
}

impl MockSerial {
    pub fn new() -> (Self, SerialLog) {
        let log = Rc::new(RefCell::new(Vec::new()));

        (
            Self {
                log: log.clone(),
                fail_at_write: None,
                write_count: 0,
            },
            SerialLog { log },
        )
    }

    /// Serial mock whose write call at `index` fails
    pub fn failing_at(index: usize) -> (Self, SerialLog) {
        let (mut serial, log) = Self::new();
        serial.fail_at_write = Some(index);
        (serial, log)
    }
}

impl SerialLog {
    /// Copy of all accepted bytes
    pub fn bytes(&self) -> Vec<u8> {
        self.log.borrow().clone()
    }

    /// Accepted bytes as string, panics on non-UTF8 output
    pub fn as_string(&self) -> String {
        String::from_utf8(self.bytes()).unwrap()
    }
}

impl embedded_io::ErrorType for MockSerial {
    type Error = embedded_io::ErrorKind;
}

impl embedded_io_async::Write for MockSerial {
    async fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        if self.fail_at_write == Some(self.write_count) {
            return Err(embedded_io::ErrorKind::Other);
        }

        self.write_count += 1;
        self.log.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    async fn flush(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}
