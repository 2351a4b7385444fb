//! nusb-based USB transport implementation.

use std::sync::Mutex;
use std::time::Duration;

use nusb::descriptors::TransferType;
use nusb::transfer::{Buffer, Bulk, Completion, In, Out, TransferError};
use nusb::{Device, DeviceInfo, Endpoint, Interface, MaybeFuture, list_devices};
use tracing::{debug, info, instrument, trace};

use super::descriptor::{
    DeviceSummary, EndpointKind, EndpointSummary, InterfaceMatch, InterfaceSummary,
    select_candidate,
};
use super::traits::{TransportError, UsbTransport, in_request_len};
use crate::protocol::constants::{EDL_PRODUCT_ID, QUALCOMM_VENDOR_ID, WRITE_TIMEOUT_MS};

/// A device that matched by ID and exposes a usable EDL interface.
///
/// The device is already opened (descriptors require it) but no interface
/// is claimed yet.
pub struct DeviceCandidate {
    device: Device,
    vid: u16,
    pid: u16,
    matched: InterfaceMatch,
}

impl DeviceCandidate {
    pub fn interface_match(&self) -> &InterfaceMatch {
        &self.matched
    }

    pub fn vendor_id(&self) -> u16 {
        self.vid
    }

    pub fn product_id(&self) -> u16 {
        self.pid
    }
}

/// nusb-based USB transport owning one claimed interface.
///
/// Dropping it releases the interface and closes the device.
pub struct NusbTransport {
    in_ep: Mutex<Endpoint<Bulk, In>>,
    out_ep: Mutex<Endpoint<Bulk, Out>>,
    interface: Interface,
    matched: InterfaceMatch,
    vid: u16,
    pid: u16,
}

impl NusbTransport {
    /// Locate the device in emergency download mode.
    pub fn find_device() -> Result<DeviceCandidate, TransportError> {
        Self::enumerate_and_match(QUALCOMM_VENDOR_ID, EDL_PRODUCT_ID)
    }

    /// Walk the USB device list and return the first qualifying device.
    #[instrument(level = "info", fields(vid = format!("{:04X}", vid), pid = format!("{:04X}", pid)))]
    pub fn enumerate_and_match(vid: u16, pid: u16) -> Result<DeviceCandidate, TransportError> {
        let devices = list_devices()
            .wait()
            .map_err(|e| TransportError::EnumerationFailed(e.to_string()))?;

        let mut last_open_error = None;
        let probed = devices
            .filter(|info| info.vendor_id() == vid && info.product_id() == pid)
            .filter_map(|info| match probe(vid, pid, &info) {
                Ok(probed) => Some(probed),
                Err(e) => {
                    debug!(error = %e, "Skipping matching device");
                    last_open_error = Some(e);
                    None
                }
            });

        if let Some((Probed { device, .. }, matched)) = select_candidate(probed, vid, pid) {
            info!(
                interface = matched.interface,
                in_ep = %format!("0x{:02X}", matched.in_endpoint),
                out_ep = %format!("0x{:02X}", matched.out_endpoint),
                "Found device"
            );
            return Ok(DeviceCandidate {
                device,
                vid,
                pid,
                matched,
            });
        }

        Err(last_open_error.unwrap_or(TransportError::DeviceNotFound { vid, pid }))
    }

    /// Detach any kernel driver (best effort) and claim the interface.
    #[instrument(level = "info", skip(candidate), fields(interface = candidate.matched.interface))]
    pub fn open(candidate: DeviceCandidate) -> Result<Self, TransportError> {
        let DeviceCandidate {
            device,
            vid,
            pid,
            matched,
        } = candidate;
        let number = matched.interface;

        #[cfg(any(target_os = "linux", target_os = "android"))]
        if let Err(e) = device.detach_kernel_driver(number) {
            debug!(error = %e, "No kernel driver detached");
        }

        let interface = device.claim_interface(number).wait().map_err(|e| {
            match map_open_error(e) {
                TransportError::OpenFailed(message) => TransportError::ClaimInterfaceFailed {
                    interface: number,
                    message,
                },
                other => other,
            }
        })?;

        if matched.alt_setting != 0 {
            interface
                .set_alt_setting(matched.alt_setting)
                .wait()
                .map_err(|e| TransportError::ClaimInterfaceFailed {
                    interface: number,
                    message: e.to_string(),
                })?;
        }

        let in_ep = interface
            .endpoint::<Bulk, In>(matched.in_endpoint)
            .map_err(|e| TransportError::ClaimInterfaceFailed {
                interface: number,
                message: e.to_string(),
            })?;
        let out_ep = interface
            .endpoint::<Bulk, Out>(matched.out_endpoint)
            .map_err(|e| TransportError::ClaimInterfaceFailed {
                interface: number,
                message: e.to_string(),
            })?;

        info!(
            in_ep = %format!("0x{:02X}", matched.in_endpoint),
            out_ep = %format!("0x{:02X}", matched.out_endpoint),
            max_packet = matched.out_max_packet_size,
            "Device opened successfully"
        );

        Ok(Self {
            in_ep: Mutex::new(in_ep),
            out_ep: Mutex::new(out_ep),
            interface,
            matched,
            vid,
            pid,
        })
    }

    /// Convenience: find and open in one step.
    pub fn open_default() -> Result<Self, TransportError> {
        Self::open(Self::find_device()?)
    }

    pub fn interface_number(&self) -> u8 {
        self.interface.interface_number()
    }
}

impl Drop for NusbTransport {
    fn drop(&mut self) {
        debug!(interface = self.matched.interface, "Releasing interface");
    }
}

impl UsbTransport for NusbTransport {
    fn bulk_out(&self, chunk: &[u8]) -> Result<usize, TransportError> {
        let mut ep = self
            .out_ep
            .lock()
            .map_err(|_| TransportError::WriteFailed("endpoint lock poisoned".into()))?;

        let buf: Buffer = chunk.to_vec().into();
        ep.submit(buf);
        let timeout = Duration::from_millis(WRITE_TIMEOUT_MS);
        let completion = match ep.wait_next_complete(timeout) {
            Some(c) => c,
            None => {
                ep.cancel_all();
                let _ = ep.wait_next_complete(timeout);
                return Err(TransportError::Timeout {
                    timeout_ms: WRITE_TIMEOUT_MS,
                });
            }
        };

        let n = check_completion(&completion, TransportError::WriteFailed)?;
        trace!(bytes_written = n, "Bulk OUT complete");
        Ok(n)
    }

    fn read(&self, max_len: usize, timeout: Duration) -> Result<Vec<u8>, TransportError> {
        let mut ep = self
            .in_ep
            .lock()
            .map_err(|_| TransportError::ReadFailed("endpoint lock poisoned".into()))?;

        // IN requests must be a whole number of packets.
        let request_len = in_request_len(max_len, self.matched.in_max_packet_size);
        let mut buf = Buffer::new(request_len);
        buf.set_requested_len(request_len);
        ep.submit(buf);

        let completion = match ep.wait_next_complete(timeout) {
            Some(c) => c,
            None => {
                ep.cancel_all();
                let _ = ep.wait_next_complete(Duration::from_millis(WRITE_TIMEOUT_MS));
                return Err(TransportError::Timeout {
                    timeout_ms: timeout.as_millis() as u64,
                });
            }
        };

        let n = check_completion(&completion, TransportError::ReadFailed)?;
        trace!(bytes_read = n, "Bulk IN complete");
        Ok(completion.buffer[..n].to_vec())
    }

    fn max_packet_size(&self) -> usize {
        self.matched.out_max_packet_size
    }

    fn vendor_id(&self) -> u16 {
        self.vid
    }

    fn product_id(&self) -> u16 {
        self.pid
    }
}

fn check_completion(
    completion: &Completion,
    failed: fn(String) -> TransportError,
) -> Result<usize, TransportError> {
    match completion.status {
        Ok(()) => Ok(completion.actual_len),
        Err(TransferError::Disconnected) => Err(TransportError::Disconnected),
        Err(e) => Err(failed(e.to_string())),
    }
}

fn map_open_error(e: nusb::Error) -> TransportError {
    match e.kind() {
        nusb::ErrorKind::Busy => TransportError::Busy(e.to_string()),
        nusb::ErrorKind::PermissionDenied => TransportError::PermissionDenied(e.to_string()),
        nusb::ErrorKind::Disconnected => TransportError::Disconnected,
        _ => TransportError::OpenFailed(e.to_string()),
    }
}

/// An opened device with its descriptors.
struct Probed {
    device: Device,
    summary: DeviceSummary,
}

impl AsRef<DeviceSummary> for Probed {
    fn as_ref(&self) -> &DeviceSummary {
        &self.summary
    }
}

fn probe(vid: u16, pid: u16, info: &DeviceInfo) -> Result<Probed, TransportError> {
    let device = info.open().wait().map_err(map_open_error)?;
    let summary = summarize(vid, pid, &device)?;
    if summary.find_interface().is_none() {
        debug!("Matching IDs but no qualifying interface");
    }
    Ok(Probed { device, summary })
}

fn summarize(vid: u16, pid: u16, device: &Device) -> Result<DeviceSummary, TransportError> {
    let config = device
        .active_configuration()
        .map_err(|e| TransportError::OpenFailed(format!("Failed to get config: {}", e)))?;

    let interfaces = config
        .interface_alt_settings()
        .map(|alt| InterfaceSummary {
            number: alt.interface_number(),
            alt_setting: alt.alternate_setting(),
            class: alt.class(),
            subclass: alt.subclass(),
            protocol: alt.protocol(),
            endpoints: alt
                .endpoints()
                .map(|ep| EndpointSummary {
                    address: ep.address(),
                    kind: if ep.transfer_type() == TransferType::Bulk {
                        EndpointKind::Bulk
                    } else {
                        EndpointKind::Other
                    },
                    max_packet_size: ep.max_packet_size(),
                })
                .collect(),
        })
        .collect();

    Ok(DeviceSummary {
        vendor_id: vid,
        product_id: pid,
        interfaces,
    })
}
