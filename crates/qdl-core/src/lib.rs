//! QDL-Core: Qualcomm EDL flashing in Rust.
//!
//! This crate drives a Qualcomm device in Emergency Download mode: it
//! uploads a programmer over Sahara, then flashes storage with Firehose
//! commands described by XML scripts.
//!
//! # Architecture
//!
//! The crate is organized into layers:
//!
//! - **Protocol**: Constants, Sahara packets, Firehose XML framing
//! - **Transport**: USB communication abstraction (nusb, mock)
//! - **Script**: Classification and parsing of program, patch and UFS scripts
//! - **State**: Sahara state machine and packet handlers
//! - **Firehose**: Flashing engine and the scripted run
//! - **Events**: Observer pattern for UI decoupling
//! - **Session**: High-level orchestrator
//!
//! # Example
//!
//! ```no_run
//! use qdl_core::session::{QdlSession, SessionConfig};
//!
//! let config = SessionConfig {
//!     loader: "prog_firehose_ddr.elf".into(),
//!     scripts: vec!["rawprogram0.xml".into(), "patch0.xml".into()],
//!     ..Default::default()
//! };
//!
//! let mut session = QdlSession::new(config);
//! session.run().expect("flashing failed");
//! ```

pub mod error;
pub mod events;
pub mod firehose;
pub mod payload;
pub mod protocol;
pub mod script;
pub mod session;
pub mod state;
pub mod transport;

// Re-exports for convenience
pub use error::{ErrorKind, QdlError};
pub use events::{LogLevel, QdlEvent, QdlObserver, QdlPhase, TracingObserver};
pub use firehose::{FirehoseConfig, FlashOptions, FlashReport, StorageKind, run_flashing};
pub use payload::{ChunkState, LoaderImage};
pub use script::{FileType, PatchList, ProgramList, UfsPlan, classify};
pub use session::{FlashPlan, QdlSession, SessionConfig};
pub use state::{HandshakeError, run_handshake};
pub use transport::{MockTransport, NusbTransport, TransportError, UsbTransport};
