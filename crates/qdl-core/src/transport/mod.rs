//! Transport layer module.

pub mod descriptor;
pub mod mock;
pub mod nusb;
pub mod traits;

pub use descriptor::{DeviceSummary, InterfaceMatch, select_candidate};
pub use mock::{MockTransport, WriteFault};
pub use nusb::{DeviceCandidate, NusbTransport};
pub use traits::{TransportError, UsbTransport};
