//! Mock USB transport for testing.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::traits::{TransportError, UsbTransport, in_request_len};
use crate::protocol::constants::{EDL_PRODUCT_ID, QUALCOMM_VENDOR_ID};

/// Scripted outcome of a future bulk OUT transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteFault {
    /// Accept only this many bytes.
    Short(usize),
    /// Fail with a timeout.
    Timeout,
}

/// Mock transport for unit testing protocol logic.
pub struct MockTransport {
    /// Queued frames to return on read; `None` reads as a timeout.
    read_queue: Arc<Mutex<VecDeque<Option<Vec<u8>>>>>,
    /// Every bulk OUT transfer, one entry per transfer (ZLPs included).
    transfers: Arc<Mutex<Vec<Vec<u8>>>>,
    /// Faults keyed by the index of the transfer they apply to.
    faults: Arc<Mutex<Vec<(usize, WriteFault)>>>,
    max_packet_size: usize,
    vid: u16,
    pid: u16,
    /// Whether device is "connected".
    connected: Arc<Mutex<bool>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::with_max_packet_size(512)
    }

    pub fn with_max_packet_size(max_packet_size: usize) -> Self {
        Self {
            read_queue: Arc::new(Mutex::new(VecDeque::new())),
            transfers: Arc::new(Mutex::new(Vec::new())),
            faults: Arc::new(Mutex::new(Vec::new())),
            max_packet_size,
            vid: QUALCOMM_VENDOR_ID,
            pid: EDL_PRODUCT_ID,
            connected: Arc::new(Mutex::new(true)),
        }
    }

    /// Queue a frame to be returned on next read.
    pub fn queue_read(&self, frame: &[u8]) {
        self.read_queue.lock().unwrap().push_back(Some(frame.to_vec()));
    }

    /// Make the next read after the already queued frames time out.
    pub fn queue_timeout(&self) {
        self.read_queue.lock().unwrap().push_back(None);
    }

    /// Queue a Firehose document given as text.
    pub fn queue_xml(&self, xml: &str) {
        self.queue_read(xml.as_bytes());
    }

    /// Make the bulk OUT transfer with the given index misbehave.
    pub fn inject_fault(&self, transfer_index: usize, fault: WriteFault) {
        self.faults.lock().unwrap().push((transfer_index, fault));
    }

    /// Get every captured bulk OUT transfer.
    pub fn transfers(&self) -> Vec<Vec<u8>> {
        self.transfers.lock().unwrap().clone()
    }

    /// Captured transfers with zero-length packets merged into their
    /// preceding payload, i.e. one entry per logical write.
    pub fn payloads(&self) -> Vec<Vec<u8>> {
        let mut out: Vec<Vec<u8>> = Vec::new();
        let mut current = Vec::new();
        for t in self.transfers() {
            if t.is_empty() || t.len() < self.max_packet_size {
                current.extend_from_slice(&t);
                out.push(std::mem::take(&mut current));
            } else {
                current.extend_from_slice(&t);
            }
        }
        if !current.is_empty() {
            out.push(current);
        }
        out.retain(|p| !p.is_empty());
        out
    }

    /// Clear captured transfers.
    pub fn clear_transfers(&self) {
        self.transfers.lock().unwrap().clear();
    }

    /// Number of frames still waiting to be read.
    pub fn pending_reads(&self) -> usize {
        self.read_queue.lock().unwrap().len()
    }

    /// Simulate device disconnect.
    pub fn disconnect(&self) {
        *self.connected.lock().unwrap() = false;
    }

    /// Simulate device reconnect.
    pub fn reconnect(&self) {
        *self.connected.lock().unwrap() = true;
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl UsbTransport for MockTransport {
    fn bulk_out(&self, chunk: &[u8]) -> Result<usize, TransportError> {
        if !*self.connected.lock().unwrap() {
            return Err(TransportError::Disconnected);
        }
        let mut transfers = self.transfers.lock().unwrap();
        let index = transfers.len();
        let fault = self
            .faults
            .lock()
            .unwrap()
            .iter()
            .find(|(i, _)| *i == index)
            .map(|(_, f)| *f);

        match fault {
            Some(WriteFault::Timeout) => Err(TransportError::Timeout { timeout_ms: 1000 }),
            Some(WriteFault::Short(n)) => {
                let n = n.min(chunk.len());
                transfers.push(chunk[..n].to_vec());
                Ok(n)
            }
            None => {
                transfers.push(chunk.to_vec());
                Ok(chunk.len())
            }
        }
    }

    fn read(&self, max_len: usize, timeout: Duration) -> Result<Vec<u8>, TransportError> {
        if !*self.connected.lock().unwrap() {
            return Err(TransportError::Disconnected);
        }
        let mut frame = self
            .read_queue
            .lock()
            .unwrap()
            .pop_front()
            .flatten()
            .ok_or(TransportError::Timeout {
                timeout_ms: timeout.as_millis() as u64,
            })?;
        frame.truncate(in_request_len(max_len, self.max_packet_size));
        Ok(frame)
    }

    fn max_packet_size(&self) -> usize {
        self.max_packet_size
    }

    fn vendor_id(&self) -> u16 {
        self.vid
    }

    fn product_id(&self) -> u16 {
        self.pid
    }
}
