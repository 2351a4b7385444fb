//! HELLO handling.

use tracing::info;

use crate::events::{LogLevel, QdlObserver};
use crate::protocol::SaharaPacket;
use crate::protocol::constants::*;
use crate::state::HandshakeError;
use crate::state::machine::SaharaPhase;
use crate::transport::UsbTransport;

use super::{HandleResult, HandlerContext};

/// HELLO - device announces itself; answer with the mode it asked for.
pub fn handle_hello<T: UsbTransport, O: QdlObserver + ?Sized>(
    ctx: &mut HandlerContext<'_, T, O>,
    version: u32,
    version_compatible: u32,
    max_len: u32,
    mode: u32,
) -> Result<HandleResult, HandshakeError> {
    if ctx.state.phase != SaharaPhase::Idle {
        return Err(HandshakeError::UnexpectedCommand {
            command: "HELLO",
            phase: ctx.state.phase,
        });
    }
    if version < SAHARA_VERSION || version_compatible > SAHARA_VERSION {
        return Err(HandshakeError::UnsupportedVersion {
            version,
            compatible: version_compatible,
        });
    }
    if mode != SAHARA_MODE_IMAGE_TX_PENDING && mode != SAHARA_MODE_IMAGE_TX_COMPLETE {
        return Err(HandshakeError::UnsupportedMode(mode));
    }

    info!(version, version_compatible, max_len, mode, "HELLO");
    ctx.log(
        LogLevel::Debug,
        format!("Sahara v{} (compatible v{}), mode {}", version, version_compatible, mode),
    );

    ctx.send(&SaharaPacket::hello_response(mode))?;
    ctx.state.mode = mode;
    ctx.state.max_command_len = max_len;
    ctx.state.goto_phase(SaharaPhase::HelloSent);
    Ok(HandleResult::Continue)
}
