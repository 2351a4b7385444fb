//! Sahara handshake: state machine and packet handlers.

pub mod handlers;
pub mod machine;

use std::path::Path;
use std::time::Duration;

use thiserror::Error;
use tracing::{error, instrument};

use crate::error::{ErrorKind, transport_kind};
use crate::events::{QdlEvent, QdlObserver};
use crate::payload::{LoaderImage, LoaderImageError};
use crate::protocol::constants::{SAHARA_FRAME_SIZE, SAHARA_READ_TIMEOUT_MS};
use crate::protocol::{SaharaPacket, SaharaPacketError};
use crate::transport::{TransportError, UsbTransport};

pub use handlers::{HandleResult, HandlerContext, handle_packet};
pub use machine::{SaharaContext, SaharaPhase};

#[derive(Error, Debug)]
pub enum HandshakeError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("Malformed packet: {0}")]
    Packet(#[from] SaharaPacketError),

    #[error("Frame of {actual} bytes, header declares {declared}")]
    FrameLength { declared: u32, actual: usize },

    #[error("Unsupported mode {0}")]
    UnsupportedMode(u32),

    #[error("Unsupported protocol version {version} (compatible {compatible})")]
    UnsupportedVersion { version: u32, compatible: u32 },

    #[error("Unexpected {command} in phase {phase}")]
    UnexpectedCommand {
        command: &'static str,
        phase: SaharaPhase,
    },

    #[error(transparent)]
    Loader(#[from] LoaderImageError),

    #[error("Device reported image transfer failure, status 0x{status:X}")]
    TransferFailed { status: u32 },
}

impl HandshakeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            HandshakeError::Transport(e) => transport_kind(e),
            HandshakeError::Loader(LoaderImageError::Io { .. })
            | HandshakeError::Loader(LoaderImageError::Empty { .. }) => ErrorKind::Io,
            HandshakeError::TransferFailed { .. } => ErrorKind::DeviceReported,
            _ => ErrorKind::ProtocolViolation,
        }
    }
}

/// Upload the programmer at `loader` and wait until it runs.
pub fn run_handshake<T: UsbTransport, O: QdlObserver + ?Sized>(
    transport: &T,
    loader: &Path,
    observer: &O,
) -> Result<SaharaContext, HandshakeError> {
    let image = LoaderImage::load(loader)?;
    let mut state = SaharaContext::new();
    serve_loader(
        transport,
        &image,
        observer,
        Duration::from_millis(SAHARA_READ_TIMEOUT_MS),
        &mut state,
    )?;
    Ok(state)
}

/// Answer device requests until DONE_RESP.
///
/// Every read is bounded by `timeout`; an expired read fails the
/// handshake. On error `state` is left in [`SaharaPhase::Error`].
#[instrument(skip_all, fields(loader = %image.path().display(), size = image.len()))]
pub fn serve_loader<T: UsbTransport, O: QdlObserver + ?Sized>(
    transport: &T,
    image: &LoaderImage,
    observer: &O,
    timeout: Duration,
    state: &mut SaharaContext,
) -> Result<(), HandshakeError> {
    let result = drive(transport, image, observer, timeout, state);
    if let Err(e) = &result {
        error!(phase = %state.phase, error = %e, "Handshake failed");
        state.fail();
        observer.on_event(&QdlEvent::Error {
            kind: e.kind(),
            message: e.to_string(),
        });
    }
    result
}

fn drive<T: UsbTransport, O: QdlObserver + ?Sized>(
    transport: &T,
    image: &LoaderImage,
    observer: &O,
    timeout: Duration,
    state: &mut SaharaContext,
) -> Result<(), HandshakeError> {
    while state.should_continue() {
        let frame = transport.read(SAHARA_FRAME_SIZE, timeout)?;
        let packet = SaharaPacket::from_bytes(&frame)?;
        if frame.len() != packet.wire_len() as usize {
            return Err(HandshakeError::FrameLength {
                declared: packet.wire_len(),
                actual: frame.len(),
            });
        }

        let mut ctx = HandlerContext {
            transport,
            observer,
            state: &mut *state,
            image,
        };
        if handle_packet(&packet, &mut ctx)? == HandleResult::Complete {
            break;
        }
    }
    Ok(())
}
