//! Image transfer handlers (READ_DATA, READ_DATA_64, END_OF_IMAGE).

use tracing::{debug, info};

use crate::events::{LogLevel, QdlEvent, QdlObserver, QdlPhase};
use crate::protocol::SaharaPacket;
use crate::state::HandshakeError;
use crate::state::machine::SaharaPhase;
use crate::transport::UsbTransport;

use super::{HandleResult, HandlerContext};

/// READ_DATA - send `length` bytes of the loader from `offset`.
pub fn handle_read<T: UsbTransport, O: QdlObserver + ?Sized>(
    ctx: &mut HandlerContext<'_, T, O>,
    image: u64,
    offset: u64,
    length: u64,
) -> Result<HandleResult, HandshakeError> {
    if !ctx.state.phase.accepts_reads() {
        return Err(HandshakeError::UnexpectedCommand {
            command: ctx.state.last_command.unwrap_or("READ_DATA"),
            phase: ctx.state.phase,
        });
    }

    let data = ctx.image.slice(offset, length)?;
    ctx.state.served.claim(offset, length)?;

    if ctx.state.image_id.is_none() {
        info!(image, "Device requested image");
        ctx.state.image_id = Some(image);
    }
    if ctx.state.phase == SaharaPhase::HelloSent {
        ctx.state.goto_phase(SaharaPhase::ModeSelected);
    }
    if ctx.state.phase == SaharaPhase::ModeSelected {
        ctx.state.goto_phase(SaharaPhase::ImageTransfer);
    }

    debug!(image, offset, length, "READ_DATA");
    ctx.transport.write(data, true)?;
    ctx.state.bytes_served += length;

    ctx.emit(QdlEvent::Progress {
        phase: QdlPhase::Handshake,
        operation: "Loader upload".to_string(),
        current: ctx.state.bytes_served,
        total: ctx.image.len(),
    });
    Ok(HandleResult::Continue)
}

/// END_OF_IMAGE - the device has everything it asked for.
pub fn handle_end_of_image<T: UsbTransport, O: QdlObserver + ?Sized>(
    ctx: &mut HandlerContext<'_, T, O>,
    image: u32,
    status: u32,
) -> Result<HandleResult, HandshakeError> {
    if !ctx.state.phase.accepts_reads() {
        return Err(HandshakeError::UnexpectedCommand {
            command: "END_OF_IMAGE",
            phase: ctx.state.phase,
        });
    }
    if status != 0 {
        return Err(HandshakeError::TransferFailed { status });
    }

    info!(image, served = ctx.state.bytes_served, "END_OF_IMAGE");
    ctx.log(
        LogLevel::Info,
        format!("Loader transferred ({} bytes)", ctx.state.bytes_served),
    );
    ctx.state.end_of_image = true;
    ctx.send(&SaharaPacket::Done)?;
    ctx.state.goto_phase(SaharaPhase::TransferComplete);
    Ok(HandleResult::Continue)
}
