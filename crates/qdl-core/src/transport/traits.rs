//! USB Transport layer abstraction.
//!
//! Defines the `UsbTransport` trait for bulk communication with the device,
//! allowing different implementations (nusb, mock, etc.).

use std::time::Duration;

use thiserror::Error;
use tracing::trace;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Device not found: VID={vid:04X} PID={pid:04X}")]
    DeviceNotFound { vid: u16, pid: u16 },

    #[error("Failed to enumerate USB devices: {0}")]
    EnumerationFailed(String),

    #[error("Failed to open device: {0}")]
    OpenFailed(String),

    #[error("Device busy: {0}")]
    Busy(String),

    #[error("Permission denied opening device: {0}")]
    PermissionDenied(String),

    #[error("Failed to claim interface {interface}: {message}")]
    ClaimInterfaceFailed { interface: u8, message: String },

    #[error("Write failed: {0}")]
    WriteFailed(String),

    #[error("Short write: {actual} of {expected} bytes transferred")]
    ShortWrite { expected: usize, actual: usize },

    #[error("Read failed: {0}")]
    ReadFailed(String),

    #[error("Device disconnected")]
    Disconnected,

    #[error("Timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
}

/// Abstract USB transport interface.
///
/// Backends provide the single-transfer primitives; the chunking rules of
/// [`UsbTransport::write`] are shared by all of them.
pub trait UsbTransport: Send + Sync {
    /// Issue exactly one bulk OUT transfer and return the bytes accepted.
    fn bulk_out(&self, chunk: &[u8]) -> Result<usize, TransportError>;

    /// Issue one bulk IN transfer of up to `max_len` bytes.
    ///
    /// The request is rounded up to whole IN packets (see [`in_request_len`]),
    /// so a device frame longer than `max_len` comes back whole rather than
    /// truncated. Returns exactly what was received.
    fn read(&self, max_len: usize, timeout: Duration) -> Result<Vec<u8>, TransportError>;

    /// Maximum packet size of the OUT endpoint.
    fn max_packet_size(&self) -> usize;

    /// Get the current VID.
    fn vendor_id(&self) -> u16;

    /// Get the current PID.
    fn product_id(&self) -> u16;

    /// Write `payload` split into packet-sized bulk transfers.
    ///
    /// Every transfer must complete in full. With `zero_length_terminate`
    /// set, a packet-aligned payload is followed by a zero-length transfer.
    /// An empty payload without the flag issues a single empty transfer.
    fn write(&self, payload: &[u8], zero_length_terminate: bool) -> Result<usize, TransportError> {
        let max_packet = self.max_packet_size().max(1);

        if payload.is_empty() {
            self.bulk_out(&[])?;
            return Ok(0);
        }

        let mut written = 0;
        for chunk in payload.chunks(max_packet) {
            let n = self.bulk_out(chunk)?;
            if n != chunk.len() {
                return Err(TransportError::ShortWrite {
                    expected: chunk.len(),
                    actual: n,
                });
            }
            written += n;
        }

        if zero_length_terminate && payload.len() % max_packet == 0 {
            trace!(len = payload.len(), "Sending zero-length packet");
            self.bulk_out(&[])?;
        }

        Ok(written)
    }
}

/// Length of the IN request issued for a read of `max_len` bytes: whole
/// packets of `packet` bytes, at least one.
pub fn in_request_len(max_len: usize, packet: usize) -> usize {
    let packet = packet.max(1);
    max_len.div_ceil(packet).max(1) * packet
}

impl<T: UsbTransport + ?Sized> UsbTransport for &T {
    fn bulk_out(&self, chunk: &[u8]) -> Result<usize, TransportError> {
        (**self).bulk_out(chunk)
    }

    fn read(&self, max_len: usize, timeout: Duration) -> Result<Vec<u8>, TransportError> {
        (**self).read(max_len, timeout)
    }

    fn max_packet_size(&self) -> usize {
        (**self).max_packet_size()
    }

    fn vendor_id(&self) -> u16 {
        (**self).vendor_id()
    }

    fn product_id(&self) -> u16 {
        (**self).product_id()
    }

    fn write(&self, payload: &[u8], zero_length_terminate: bool) -> Result<usize, TransportError> {
        (**self).write(payload, zero_length_terminate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_request_len() {
        assert_eq!(in_request_len(4096, 512), 4096);
        assert_eq!(in_request_len(100, 512), 512);
        assert_eq!(in_request_len(513, 512), 1024);
        assert_eq!(in_request_len(0, 512), 512);
        assert_eq!(in_request_len(10, 0), 10);
    }
}
