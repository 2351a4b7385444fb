//! Protocol module - Sahara and Firehose wire definitions.

pub mod constants;
pub mod firehose;
pub mod sahara;

pub use constants::*;
pub use firehose::{
    FirehoseFrameError, FirehoseMessage, FirehoseResponse, encode_command, parse_frames,
};
pub use sahara::{SaharaPacket, SaharaPacketError};
