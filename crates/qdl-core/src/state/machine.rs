//! State machine implementation for the Sahara handshake.

use std::fmt;

use crate::payload::ServedRanges;

/// Handshake phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SaharaPhase {
    /// Waiting for HELLO.
    #[default]
    Idle,
    /// HELLO answered, waiting for the first request.
    HelloSent,
    /// Device accepted the offered mode with its first read.
    ModeSelected,
    /// Serving read requests.
    ImageTransfer,
    /// END_OF_IMAGE received, DONE sent.
    TransferComplete,
    /// DONE_RESP received; the programmer is running.
    Complete,
    /// Absorbing failure state.
    Error,
}

impl fmt::Display for SaharaPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SaharaPhase::Idle => write!(f, "IDLE"),
            SaharaPhase::HelloSent => write!(f, "HELLO_SENT"),
            SaharaPhase::ModeSelected => write!(f, "MODE_SELECTED"),
            SaharaPhase::ImageTransfer => write!(f, "IMAGE_TRANSFER"),
            SaharaPhase::TransferComplete => write!(f, "TRANSFER_COMPLETE"),
            SaharaPhase::Complete => write!(f, "COMPLETE"),
            SaharaPhase::Error => write!(f, "ERROR"),
        }
    }
}

impl SaharaPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SaharaPhase::Complete | SaharaPhase::Error)
    }

    /// Phases in which the device may request image data.
    pub fn accepts_reads(&self) -> bool {
        matches!(
            self,
            SaharaPhase::HelloSent | SaharaPhase::ModeSelected | SaharaPhase::ImageTransfer
        )
    }
}

/// State machine context holding all runtime state.
#[derive(Debug, Default)]
pub struct SaharaContext {
    pub phase: SaharaPhase,
    /// Mode announced in HELLO and echoed back.
    pub mode: u32,
    /// Largest command packet the device accepts, from HELLO.
    pub max_command_len: u32,
    /// Image id from the first read request.
    pub image_id: Option<u64>,
    /// Image bytes sent so far.
    pub bytes_served: u64,
    pub served: ServedRanges,
    /// Name of the last command received.
    pub last_command: Option<&'static str>,
    /// DONE_RESP image transfer status.
    pub done_status: Option<u32>,
    /// Whether END_OF_IMAGE has been seen.
    pub end_of_image: bool,
}

impl SaharaContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Transition to a new phase.
    pub fn goto_phase(&mut self, phase: SaharaPhase) {
        tracing::info!(from = %self.phase, to = %phase, "State transition");
        self.phase = phase;
    }

    /// Enter the error phase.
    pub fn fail(&mut self) {
        if self.phase != SaharaPhase::Error {
            self.goto_phase(SaharaPhase::Error);
        }
    }

    pub fn should_continue(&self) -> bool {
        !self.phase.is_terminal()
    }

    pub fn is_complete(&self) -> bool {
        self.phase == SaharaPhase::Complete
    }
}
