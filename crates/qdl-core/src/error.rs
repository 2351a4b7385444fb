//! Crate level error type.
//!
//! Every module reports its own `thiserror` enum; `QdlError` gathers them
//! so entry points can return one type while callers still branch on
//! [`ErrorKind`].

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::firehose::FlashError;
use crate::script::{ScriptError, SectorExprError};
use crate::state::HandshakeError;
use crate::transport::TransportError;

/// Machine distinguishable failure class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// No matching USB device.
    DeviceAbsent,
    /// Open, claim or transfer failure, including short writes and timeouts.
    Transport,
    /// A script could not be parsed or lacks required structure.
    MalformedScript,
    /// The device deviated from the expected protocol.
    ProtocolViolation,
    /// The device rejected a command it accepted syntactically.
    DeviceReported,
    /// A local file could not be read.
    Io,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::DeviceAbsent => write!(f, "device-absent"),
            ErrorKind::Transport => write!(f, "transport"),
            ErrorKind::MalformedScript => write!(f, "malformed-script"),
            ErrorKind::ProtocolViolation => write!(f, "protocol-violation"),
            ErrorKind::DeviceReported => write!(f, "device-reported"),
            ErrorKind::Io => write!(f, "io"),
        }
    }
}

#[derive(Error, Debug)]
pub enum QdlError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Script(#[from] ScriptError),

    #[error("Invalid start sector: {0}")]
    Sector(#[from] SectorExprError),

    #[error("Sahara: {0}")]
    Handshake(#[from] HandshakeError),

    #[error("Firehose: {0}")]
    Flash(#[from] FlashError),

    #[error("Failed to open {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{label} (partition {partition}): {source}")]
    Directive {
        label: String,
        partition: u32,
        #[source]
        source: Box<QdlError>,
    },
}

impl QdlError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            QdlError::Transport(e) => transport_kind(e),
            QdlError::Script(ScriptError::Io { .. }) => ErrorKind::Io,
            QdlError::Script(_) | QdlError::Sector(_) => ErrorKind::MalformedScript,
            QdlError::Handshake(e) => e.kind(),
            QdlError::Flash(e) => e.kind(),
            QdlError::Io { .. } => ErrorKind::Io,
            QdlError::Directive { source, .. } => source.kind(),
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        QdlError::Io {
            path: path.into(),
            source,
        }
    }
}

pub(crate) fn transport_kind(e: &TransportError) -> ErrorKind {
    match e {
        TransportError::DeviceNotFound { .. } => ErrorKind::DeviceAbsent,
        _ => ErrorKind::Transport,
    }
}
