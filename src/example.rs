//! Mocks for doc examples

/// Serial sink accepting and discarding all outbound bytes
#[derive(Default)]
pub struct ExampleSerial {}

impl embedded_io::ErrorType for ExampleSerial {
    type Error = core::convert::Infallible;
}

impl embedded_io_async::Write for ExampleSerial {
    async fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        Ok(buf.len())
    }

    async fn flush(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}
