//! Sahara command handlers.
//!
//! This module is split into submodules by functionality:
//! - `hello`: mode and version negotiation
//! - `image`: READ_DATA / READ_DATA_64 / END_OF_IMAGE
//! - `control`: DONE_RESP and commands that are never valid from a device

mod control;
mod hello;
mod image;

use crate::events::{LogLevel, QdlEvent, QdlObserver};
use crate::payload::LoaderImage;
use crate::protocol::SaharaPacket;
use crate::state::HandshakeError;
use crate::state::machine::SaharaContext;
use crate::transport::UsbTransport;

use control::{handle_done_resp, handle_unexpected};
use hello::handle_hello;
use image::{handle_end_of_image, handle_read};

/// Result of handling a packet.
#[derive(Debug, PartialEq, Eq)]
pub enum HandleResult {
    /// Keep reading packets.
    Continue,
    /// The programmer has taken over.
    Complete,
}

/// Handler context containing all resources.
pub struct HandlerContext<'a, T: UsbTransport, O: QdlObserver + ?Sized> {
    pub transport: &'a T,
    pub observer: &'a O,
    pub state: &'a mut SaharaContext,
    pub image: &'a LoaderImage,
}

impl<T: UsbTransport, O: QdlObserver + ?Sized> HandlerContext<'_, T, O> {
    pub(crate) fn emit(&self, event: QdlEvent) {
        self.observer.on_event(&event);
    }

    pub(crate) fn log(&self, level: LogLevel, message: impl Into<String>) {
        self.emit(QdlEvent::Log {
            level,
            message: message.into(),
        });
    }

    pub(crate) fn send(&self, packet: &SaharaPacket) -> Result<(), HandshakeError> {
        self.transport.write(&packet.to_bytes(), true)?;
        Ok(())
    }
}

/// Handle one decoded packet.
///
/// Errors leave the context untouched; the caller moves it to the error
/// phase.
pub fn handle_packet<T: UsbTransport, O: QdlObserver + ?Sized>(
    packet: &SaharaPacket,
    ctx: &mut HandlerContext<'_, T, O>,
) -> Result<HandleResult, HandshakeError> {
    ctx.state.last_command = Some(packet.name());

    match *packet {
        SaharaPacket::Hello {
            version,
            version_compatible,
            max_len,
            mode,
        } => handle_hello(ctx, version, version_compatible, max_len, mode),
        SaharaPacket::ReadData {
            image,
            offset,
            length,
        } => handle_read(ctx, u64::from(image), u64::from(offset), u64::from(length)),
        SaharaPacket::ReadData64 {
            image,
            offset,
            length,
        } => handle_read(ctx, image, offset, length),
        SaharaPacket::EndOfImage { image, status } => handle_end_of_image(ctx, image, status),
        SaharaPacket::DoneResp { status } => handle_done_resp(ctx, status),
        _ => handle_unexpected(ctx, packet),
    }
}
