//! Control flow handlers (done, unexpected commands).

use tracing::{info, warn};

use crate::events::{LogLevel, QdlObserver};
use crate::protocol::SaharaPacket;
use crate::state::HandshakeError;
use crate::state::machine::SaharaPhase;
use crate::transport::UsbTransport;

use super::{HandleResult, HandlerContext};

/// DONE_RESP - the programmer is executing.
pub fn handle_done_resp<T: UsbTransport, O: QdlObserver + ?Sized>(
    ctx: &mut HandlerContext<'_, T, O>,
    status: u32,
) -> Result<HandleResult, HandshakeError> {
    if ctx.state.phase != SaharaPhase::TransferComplete {
        return Err(HandshakeError::UnexpectedCommand {
            command: "DONE_RESP",
            phase: ctx.state.phase,
        });
    }
    info!(status, "DONE_RESP: programmer running");
    ctx.log(LogLevel::Info, "Loader handshake complete");
    ctx.state.done_status = Some(status);
    ctx.state.goto_phase(SaharaPhase::Complete);
    Ok(HandleResult::Complete)
}

/// Host side commands and unknown packets.
pub fn handle_unexpected<T: UsbTransport, O: QdlObserver + ?Sized>(
    ctx: &mut HandlerContext<'_, T, O>,
    packet: &SaharaPacket,
) -> Result<HandleResult, HandshakeError> {
    warn!(command = format!("0x{:02X}", packet.command()), name = packet.name(), "Unexpected Sahara command");
    Err(HandshakeError::UnexpectedCommand {
        command: packet.name(),
        phase: ctx.state.phase,
    })
}
