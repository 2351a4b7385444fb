//! Sahara packet encoding and decoding.
//!
//! Every packet starts with a little-endian `(command, length)` header where
//! `length` covers the whole packet. Fields are 32-bit words, except for the
//! 64-bit read request used for images above 4 GiB.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::Cursor;
use thiserror::Error;

use super::constants::*;

#[derive(Error, Debug)]
pub enum SaharaPacketError {
    #[error("Packet too short: expected {expected} bytes, got {actual}")]
    TooShort { expected: usize, actual: usize },
    #[error("Declared length {declared} does not match command 0x{command:02X}")]
    BadLength { command: u32, declared: u32 },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A decoded Sahara packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaharaPacket {
    Hello {
        version: u32,
        version_compatible: u32,
        max_len: u32,
        mode: u32,
    },
    HelloResp {
        version: u32,
        version_compatible: u32,
        status: u32,
        mode: u32,
    },
    ReadData {
        image: u32,
        offset: u32,
        length: u32,
    },
    ReadData64 {
        image: u64,
        offset: u64,
        length: u64,
    },
    EndOfImage {
        image: u32,
        status: u32,
    },
    Done,
    DoneResp {
        status: u32,
    },
    Reset,
    ResetResp,
    Unknown {
        command: u32,
        length: u32,
    },
}

impl SaharaPacket {
    pub const HEADER_SIZE: usize = 8;

    pub fn command(&self) -> u32 {
        match self {
            SaharaPacket::Hello { .. } => SAHARA_HELLO,
            SaharaPacket::HelloResp { .. } => SAHARA_HELLO_RESP,
            SaharaPacket::ReadData { .. } => SAHARA_READ_DATA,
            SaharaPacket::ReadData64 { .. } => SAHARA_READ_DATA_64,
            SaharaPacket::EndOfImage { .. } => SAHARA_END_OF_IMAGE,
            SaharaPacket::Done => SAHARA_DONE,
            SaharaPacket::DoneResp { .. } => SAHARA_DONE_RESP,
            SaharaPacket::Reset => SAHARA_RESET,
            SaharaPacket::ResetResp => SAHARA_RESET_RESP,
            SaharaPacket::Unknown { command, .. } => *command,
        }
    }

    /// Short human readable command name, used in logs and errors.
    pub fn name(&self) -> &'static str {
        match self {
            SaharaPacket::Hello { .. } => "HELLO",
            SaharaPacket::HelloResp { .. } => "HELLO_RESP",
            SaharaPacket::ReadData { .. } => "READ_DATA",
            SaharaPacket::ReadData64 { .. } => "READ_DATA_64",
            SaharaPacket::EndOfImage { .. } => "END_OF_IMAGE",
            SaharaPacket::Done => "DONE",
            SaharaPacket::DoneResp { .. } => "DONE_RESP",
            SaharaPacket::Reset => "RESET",
            SaharaPacket::ResetResp => "RESET_RESP",
            SaharaPacket::Unknown { .. } => "UNKNOWN",
        }
    }

    /// Length of the encoded packet, header included.
    pub fn wire_len(&self) -> u32 {
        match self {
            SaharaPacket::Hello { .. } | SaharaPacket::HelloResp { .. } => SAHARA_HELLO_LEN,
            SaharaPacket::ReadData { .. } => SAHARA_READ_DATA_LEN,
            SaharaPacket::ReadData64 { .. } => SAHARA_READ_DATA_64_LEN,
            SaharaPacket::EndOfImage { .. } => SAHARA_END_OF_IMAGE_LEN,
            SaharaPacket::Done => SAHARA_DONE_LEN,
            SaharaPacket::DoneResp { .. } => SAHARA_DONE_RESP_LEN,
            SaharaPacket::Reset | SaharaPacket::ResetResp => SAHARA_RESET_LEN,
            SaharaPacket::Unknown { length, .. } => *length,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let len = self.wire_len();
        let mut buf = Vec::with_capacity(len as usize);
        // Writes into a Vec cannot fail.
        let _ = self.write_into(&mut buf, len);
        buf.resize(len as usize, 0);
        buf
    }

    fn write_into(&self, buf: &mut Vec<u8>, len: u32) -> std::io::Result<()> {
        buf.write_u32::<LittleEndian>(self.command())?;
        buf.write_u32::<LittleEndian>(len)?;
        match *self {
            SaharaPacket::Hello {
                version,
                version_compatible,
                max_len,
                mode,
            } => {
                buf.write_u32::<LittleEndian>(version)?;
                buf.write_u32::<LittleEndian>(version_compatible)?;
                buf.write_u32::<LittleEndian>(max_len)?;
                buf.write_u32::<LittleEndian>(mode)?;
            }
            SaharaPacket::HelloResp {
                version,
                version_compatible,
                status,
                mode,
            } => {
                buf.write_u32::<LittleEndian>(version)?;
                buf.write_u32::<LittleEndian>(version_compatible)?;
                buf.write_u32::<LittleEndian>(status)?;
                buf.write_u32::<LittleEndian>(mode)?;
            }
            SaharaPacket::ReadData {
                image,
                offset,
                length,
            } => {
                buf.write_u32::<LittleEndian>(image)?;
                buf.write_u32::<LittleEndian>(offset)?;
                buf.write_u32::<LittleEndian>(length)?;
            }
            SaharaPacket::ReadData64 {
                image,
                offset,
                length,
            } => {
                buf.write_u64::<LittleEndian>(image)?;
                buf.write_u64::<LittleEndian>(offset)?;
                buf.write_u64::<LittleEndian>(length)?;
            }
            SaharaPacket::EndOfImage { image, status } => {
                buf.write_u32::<LittleEndian>(image)?;
                buf.write_u32::<LittleEndian>(status)?;
            }
            SaharaPacket::DoneResp { status } => {
                buf.write_u32::<LittleEndian>(status)?;
            }
            SaharaPacket::Done
            | SaharaPacket::Reset
            | SaharaPacket::ResetResp
            | SaharaPacket::Unknown { .. } => {}
        }
        Ok(())
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, SaharaPacketError> {
        if data.len() < Self::HEADER_SIZE {
            return Err(SaharaPacketError::TooShort {
                expected: Self::HEADER_SIZE,
                actual: data.len(),
            });
        }
        let mut cursor = Cursor::new(data);
        let command = cursor.read_u32::<LittleEndian>()?;
        let declared = cursor.read_u32::<LittleEndian>()?;

        let expected = match command {
            SAHARA_HELLO | SAHARA_HELLO_RESP => SAHARA_HELLO_LEN,
            SAHARA_READ_DATA => SAHARA_READ_DATA_LEN,
            SAHARA_READ_DATA_64 => SAHARA_READ_DATA_64_LEN,
            SAHARA_END_OF_IMAGE => SAHARA_END_OF_IMAGE_LEN,
            SAHARA_DONE => SAHARA_DONE_LEN,
            SAHARA_DONE_RESP => SAHARA_DONE_RESP_LEN,
            SAHARA_RESET | SAHARA_RESET_RESP => SAHARA_RESET_LEN,
            _ => {
                return Ok(SaharaPacket::Unknown {
                    command,
                    length: declared,
                });
            }
        };
        if declared != expected {
            return Err(SaharaPacketError::BadLength { command, declared });
        }
        if data.len() < expected as usize {
            return Err(SaharaPacketError::TooShort {
                expected: expected as usize,
                actual: data.len(),
            });
        }

        let packet = match command {
            SAHARA_HELLO => SaharaPacket::Hello {
                version: cursor.read_u32::<LittleEndian>()?,
                version_compatible: cursor.read_u32::<LittleEndian>()?,
                max_len: cursor.read_u32::<LittleEndian>()?,
                mode: cursor.read_u32::<LittleEndian>()?,
            },
            SAHARA_HELLO_RESP => SaharaPacket::HelloResp {
                version: cursor.read_u32::<LittleEndian>()?,
                version_compatible: cursor.read_u32::<LittleEndian>()?,
                status: cursor.read_u32::<LittleEndian>()?,
                mode: cursor.read_u32::<LittleEndian>()?,
            },
            SAHARA_READ_DATA => SaharaPacket::ReadData {
                image: cursor.read_u32::<LittleEndian>()?,
                offset: cursor.read_u32::<LittleEndian>()?,
                length: cursor.read_u32::<LittleEndian>()?,
            },
            SAHARA_READ_DATA_64 => SaharaPacket::ReadData64 {
                image: cursor.read_u64::<LittleEndian>()?,
                offset: cursor.read_u64::<LittleEndian>()?,
                length: cursor.read_u64::<LittleEndian>()?,
            },
            SAHARA_END_OF_IMAGE => SaharaPacket::EndOfImage {
                image: cursor.read_u32::<LittleEndian>()?,
                status: cursor.read_u32::<LittleEndian>()?,
            },
            SAHARA_DONE => SaharaPacket::Done,
            SAHARA_DONE_RESP => SaharaPacket::DoneResp {
                status: cursor.read_u32::<LittleEndian>()?,
            },
            SAHARA_RESET => SaharaPacket::Reset,
            _ => SaharaPacket::ResetResp,
        };
        Ok(packet)
    }

    /// The HELLO response we send: image transfer, protocol version 2.
    pub fn hello_response(mode: u32) -> Self {
        SaharaPacket::HelloResp {
            version: SAHARA_VERSION,
            version_compatible: SAHARA_VERSION_COMPATIBLE,
            status: SAHARA_STATUS_SUCCESS,
            mode,
        }
    }
}
