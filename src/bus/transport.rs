//! Transport abstraction: the byte channel to the NWP.
//!
//! Concrete implementations live with the platform (SPI with a
//! host-interrupt line, SDIO, UART). The bus pump is generic over
//! `Transport`, so a new bus requires no change to dispatch or
//! correlation logic. Frames are self-delimiting, so reads may return any
//! slice of the incoming stream.

/// Byte-oriented transport channel.
pub trait Transport {
    /// Error type for this transport.
    type Error: core::fmt::Debug;

    /// Read up to `buf.len()` bytes into `buf`.
    /// Returns 0 if no data is available (non-blocking).
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error>;

    /// Write `data` to the transport.
    /// Returns the number of bytes actually written.
    fn write(&mut self, data: &[u8]) -> Result<usize, Self::Error>;

    /// Flush any buffered output.
    fn flush(&mut self) -> Result<(), Self::Error>;

    /// `true` when the NWP has signalled pending receive data.
    fn available(&self) -> bool;

    /// Write a whole frame, looping over short writes.
    fn write_frame(&mut self, frame: &[u8]) -> Result<(), Self::Error> {
        let mut sent = 0;
        while sent < frame.len() {
            let n = self.write(&frame[sent..])?;
            if n == 0 {
                break;
            }
            sent += n;
        }
        self.flush()
    }
}

/// A transport that discards all writes and never reads.
/// Every request sent through it times out.
pub struct NullTransport;

impl Transport for NullTransport {
    type Error = ();

    fn read(&mut self, _buf: &mut [u8]) -> Result<usize, ()> {
        Ok(0)
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, ()> {
        Ok(data.len())
    }

    fn flush(&mut self) -> Result<(), ()> {
        Ok(())
    }

    fn available(&self) -> bool {
        false
    }
}
