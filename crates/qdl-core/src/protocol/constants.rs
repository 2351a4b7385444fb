// USB identification of the emergency download (9008) mode.
pub const QUALCOMM_VENDOR_ID: u16 = 0x05C6;
pub const EDL_PRODUCT_ID: u16 = 0x9008;

// Qualifying interface: vendor specific class/subclass, protocol 0xFF or 0x10.
pub const EDL_INTERFACE_CLASS: u8 = 0xFF;
pub const EDL_INTERFACE_SUBCLASS: u8 = 0xFF;
pub const EDL_INTERFACE_PROTOCOLS: [u8; 2] = [0xFF, 0x10];

/// Timeout of a single bulk OUT transfer.
pub const WRITE_TIMEOUT_MS: u64 = 1000;

// Sahara command identifiers
pub const SAHARA_HELLO: u32 = 0x01;
pub const SAHARA_HELLO_RESP: u32 = 0x02;
pub const SAHARA_READ_DATA: u32 = 0x03;
pub const SAHARA_END_OF_IMAGE: u32 = 0x04;
pub const SAHARA_DONE: u32 = 0x05;
pub const SAHARA_DONE_RESP: u32 = 0x06;
pub const SAHARA_RESET: u32 = 0x07;
pub const SAHARA_RESET_RESP: u32 = 0x08;
pub const SAHARA_READ_DATA_64: u32 = 0x12;

// Sahara packet lengths (header included)
pub const SAHARA_HELLO_LEN: u32 = 0x30;
pub const SAHARA_READ_DATA_LEN: u32 = 0x14;
pub const SAHARA_END_OF_IMAGE_LEN: u32 = 0x10;
pub const SAHARA_DONE_LEN: u32 = 0x08;
pub const SAHARA_DONE_RESP_LEN: u32 = 0x0C;
pub const SAHARA_RESET_LEN: u32 = 0x08;
pub const SAHARA_READ_DATA_64_LEN: u32 = 0x20;

// Sahara modes
pub const SAHARA_MODE_IMAGE_TX_PENDING: u32 = 0x00;
pub const SAHARA_MODE_IMAGE_TX_COMPLETE: u32 = 0x01;
pub const SAHARA_MODE_MEMORY_DEBUG: u32 = 0x02;
pub const SAHARA_MODE_COMMAND: u32 = 0x03;

pub const SAHARA_VERSION: u32 = 2;
pub const SAHARA_VERSION_COMPATIBLE: u32 = 1;
pub const SAHARA_STATUS_SUCCESS: u32 = 0;

/// Read size used for every inbound Sahara frame.
pub const SAHARA_FRAME_SIZE: usize = 4096;
pub const SAHARA_READ_TIMEOUT_MS: u64 = 1000;

/// Preferred payload size offered in `<configure>`.
pub const FIREHOSE_DEFAULT_PAYLOAD_SIZE: usize = 1024 * 1024;
/// Largest inbound Firehose frame we read at once.
pub const FIREHOSE_FRAME_SIZE: usize = 4096;
pub const FIREHOSE_READ_TIMEOUT_MS: u64 = 10_000;
/// Welcome log drain stops at the first read idle for this long.
pub const FIREHOSE_DRAIN_TIMEOUT_MS: u64 = 100;

/// Placeholder for the device's total sector count in start sector expressions.
pub const NUM_DISK_SECTORS: &str = "NUM_DISK_SECTORS";

/// Labels of the primary boot image; their partition is marked bootable.
pub const BOOTABLE_LABELS: [&str; 3] = ["xbl", "xbl_a", "sbl1"];
