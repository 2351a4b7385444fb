//! Event system for UI decoupling.
//!
//! Frontends subscribe to protocol progress through [`QdlObserver`] without
//! the engines knowing who listens. Observers only watch; they never feed
//! anything back into a run.

use std::fmt;

use crate::error::ErrorKind;

/// Log level for events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

/// Phases of a flashing run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QdlPhase {
    /// Looking for an EDL device.
    WaitingForDevice,
    /// Sahara loader upload.
    Handshake,
    /// Firehose session setup.
    Configure,
    /// UFS provisioning.
    Provisioning,
    /// Writing program directives.
    Programming,
    /// Applying patches.
    Patching,
    /// Device is leaving EDL mode.
    Reset,
    Complete,
    Error,
}

impl fmt::Display for QdlPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QdlPhase::WaitingForDevice => write!(f, "Waiting for Device"),
            QdlPhase::Handshake => write!(f, "Sahara"),
            QdlPhase::Configure => write!(f, "Configure"),
            QdlPhase::Provisioning => write!(f, "Provisioning"),
            QdlPhase::Programming => write!(f, "Programming"),
            QdlPhase::Patching => write!(f, "Patching"),
            QdlPhase::Reset => write!(f, "Reset"),
            QdlPhase::Complete => write!(f, "Complete"),
            QdlPhase::Error => write!(f, "Error"),
        }
    }
}

/// Events emitted during a run.
#[derive(Debug, Clone)]
pub enum QdlEvent {
    DeviceConnected { vid: u16, pid: u16 },
    PhaseChanged { from: QdlPhase, to: QdlPhase },
    /// Progress update for current operation.
    Progress {
        phase: QdlPhase,
        operation: String,
        current: u64,
        total: u64,
    },
    /// Log line, including the ones printed by the programmer.
    Log { level: LogLevel, message: String },
    Error { kind: ErrorKind, message: String },
    /// USB packet sent/received.
    Packet {
        direction: PacketDirection,
        packet_type: String,
        length: usize,
        /// At most the first 32 bytes.
        data: Option<Vec<u8>>,
    },
    /// All operations completed successfully.
    Complete,
}

/// USB packet direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketDirection {
    Tx, // Host -> Device
    Rx, // Device -> Host
}

impl fmt::Display for PacketDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PacketDirection::Tx => write!(f, "TX"),
            PacketDirection::Rx => write!(f, "RX"),
        }
    }
}

/// Observer trait for receiving run events.
///
/// Implement this trait in your UI layer to receive updates.
pub trait QdlObserver: Send + Sync {
    fn on_event(&self, event: &QdlEvent);
}

impl<O: QdlObserver + ?Sized> QdlObserver for std::sync::Arc<O> {
    fn on_event(&self, event: &QdlEvent) {
        (**self).on_event(event)
    }
}

/// No-op observer that discards all events.
pub struct NullObserver;

impl QdlObserver for NullObserver {
    fn on_event(&self, _event: &QdlEvent) {}
}

/// Observer that logs events using tracing.
pub struct TracingObserver;

impl QdlObserver for TracingObserver {
    fn on_event(&self, event: &QdlEvent) {
        match event {
            QdlEvent::DeviceConnected { vid, pid } => {
                tracing::info!(vid = %format!("{:04X}", vid), pid = %format!("{:04X}", pid), "Device connected");
            }
            QdlEvent::PhaseChanged { from, to } => {
                tracing::info!(from = %from, to = %to, "Phase changed");
            }
            QdlEvent::Progress {
                phase,
                operation,
                current,
                total,
            } => {
                let pct = if *total > 0 {
                    (*current * 100) / *total
                } else {
                    0
                };
                tracing::debug!(phase = %phase, operation = %operation, progress = %format!("{}%", pct), "Progress");
            }
            QdlEvent::Log { level, message } => match level {
                LogLevel::Trace => tracing::trace!("{}", message),
                LogLevel::Debug => tracing::debug!("{}", message),
                LogLevel::Info => tracing::info!("{}", message),
                LogLevel::Warn => tracing::warn!("{}", message),
                LogLevel::Error => tracing::error!("{}", message),
            },
            QdlEvent::Error { kind, message } => {
                tracing::error!(kind = %kind, "Error: {}", message);
            }
            QdlEvent::Packet {
                direction,
                packet_type,
                length,
                data,
            } => {
                tracing::trace!(
                    dir = %direction,
                    type_ = %packet_type,
                    len = length,
                    head = %data.as_deref().map(hex_dump).unwrap_or_default(),
                    "USB Packet"
                );
            }
            QdlEvent::Complete => {
                tracing::info!("Operation complete");
            }
        }
    }
}

/// Space separated hex bytes.
pub fn hex_dump(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    struct Recorder(Mutex<Vec<String>>);

    impl QdlObserver for Recorder {
        fn on_event(&self, event: &QdlEvent) {
            self.0.lock().unwrap().push(format!("{:?}", event));
        }
    }

    #[test]
    fn test_hex_dump() {
        assert_eq!(hex_dump(&[0x01, 0xab, 0x00]), "01 ab 00");
        assert_eq!(hex_dump(&[]), "");
    }

    #[test]
    fn test_arc_forwards() {
        let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));
        let shared: Arc<Recorder> = Arc::clone(&recorder);
        shared.on_event(&QdlEvent::Complete);
        assert_eq!(recorder.0.lock().unwrap().as_slice(), ["Complete"]);
    }

    #[test]
    fn test_phase_names() {
        assert_eq!(QdlPhase::Handshake.to_string(), "Sahara");
        assert_eq!(PacketDirection::Rx.to_string(), "RX");
    }
}
