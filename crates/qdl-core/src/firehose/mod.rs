//! Firehose flashing: engine configuration, errors and the scripted run.

pub mod engine;

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::error::{ErrorKind, QdlError, transport_kind};
use crate::events::{QdlEvent, QdlObserver, QdlPhase};
use crate::protocol::FirehoseFrameError;
use crate::protocol::constants::{FIREHOSE_DEFAULT_PAYLOAD_SIZE, FIREHOSE_READ_TIMEOUT_MS};
use crate::script::{ScriptError, SectorExprError};
use crate::session::FlashPlan;
use crate::transport::{TransportError, UsbTransport};

pub use engine::FirehoseEngine;

#[derive(Error, Debug)]
pub enum FlashError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Frame(#[from] FirehoseFrameError),

    #[error("<{command}> rejected by device: {log}")]
    Nak { command: String, log: String },

    #[error("<{command}> acknowledged without entering raw mode")]
    RawModeNotEntered { command: String },

    #[error("Device offered an unusable payload size {0}")]
    InvalidPayloadSize(usize),

    #[error("Invalid start sector: {0}")]
    Sector(#[from] SectorExprError),

    #[error("{label}: file offset does not fit in 64 bits")]
    FileOffsetOverflow { label: String },

    #[error("Failed to read source data: {0}")]
    Io(#[from] std::io::Error),
}

impl FlashError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            FlashError::Transport(e) => transport_kind(e),
            FlashError::Nak { .. } => ErrorKind::DeviceReported,
            FlashError::Frame(_)
            | FlashError::RawModeNotEntered { .. }
            | FlashError::InvalidPayloadSize(_) => ErrorKind::ProtocolViolation,
            FlashError::Sector(_) | FlashError::FileOffsetOverflow { .. } => {
                ErrorKind::MalformedScript
            }
            FlashError::Io(_) => ErrorKind::Io,
        }
    }
}

/// Target storage type, sent as `MemoryName`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    Emmc,
    #[default]
    Ufs,
    Nvme,
    Nand,
    Spinor,
}

impl StorageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageKind::Emmc => "emmc",
            StorageKind::Ufs => "ufs",
            StorageKind::Nvme => "nvme",
            StorageKind::Nand => "nand",
            StorageKind::Spinor => "spinor",
        }
    }

    /// Sector size used when a script does not state one.
    pub fn default_sector_size(&self) -> u32 {
        match self {
            StorageKind::Ufs | StorageKind::Nand => 4096,
            StorageKind::Emmc | StorageKind::Nvme | StorageKind::Spinor => 512,
        }
    }
}

impl fmt::Display for StorageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StorageKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "emmc" => Ok(StorageKind::Emmc),
            "ufs" => Ok(StorageKind::Ufs),
            "nvme" => Ok(StorageKind::Nvme),
            "nand" => Ok(StorageKind::Nand),
            "spinor" => Ok(StorageKind::Spinor),
            other => Err(format!(
                "unknown storage type '{}' (expected emmc, ufs, nvme, nand or spinor)",
                other
            )),
        }
    }
}

/// Engine parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FirehoseConfig {
    pub storage: StorageKind,
    /// Payload size offered in `<configure>`; the device may lower it.
    pub max_payload_size: usize,
    /// Fallback for directives declaring a zero sector size.
    pub sector_size: Option<u32>,
    pub zlp_aware_host: bool,
    pub skip_storage_init: bool,
    /// Ask the programmer for verbose logs.
    pub verbose: bool,
    pub read_timeout_ms: u64,
    /// Known disk size, skips `<getstorageinfo>`.
    pub num_disk_sectors: Option<u64>,
}

impl Default for FirehoseConfig {
    fn default() -> Self {
        Self {
            storage: StorageKind::default(),
            max_payload_size: FIREHOSE_DEFAULT_PAYLOAD_SIZE,
            sector_size: None,
            zlp_aware_host: true,
            skip_storage_init: false,
            verbose: false,
            read_timeout_ms: FIREHOSE_READ_TIMEOUT_MS,
            num_disk_sectors: None,
        }
    }
}

impl FirehoseConfig {
    pub fn sector_size_or_default(&self, declared: u32) -> u32 {
        if declared != 0 {
            declared
        } else {
            self.sector_size
                .unwrap_or_else(|| self.storage.default_sector_size())
        }
    }
}

/// What a flashing run should do besides the plan itself.
#[derive(Debug, Clone, Default)]
pub struct FlashOptions {
    pub firehose: FirehoseConfig,
    /// Directory searched first for program source files.
    pub include_dir: Option<PathBuf>,
    /// Send the UFS commit element.
    pub finalize_provisioning: bool,
    /// Reset the device once everything is written.
    pub reset: bool,
}

/// Summary of a completed run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlashReport {
    pub max_payload_size: usize,
    pub ufs_elements: usize,
    pub programs: usize,
    pub patches: usize,
    pub bootable_partition: Option<u32>,
    pub reset: bool,
}

/// Execute `plan` over an established Firehose channel.
///
/// Order: drain welcome logs, configure, UFS provisioning, programs,
/// patches, bootable partition, then reset when requested. The first
/// failure ends the run.
#[instrument(skip_all, fields(storage = %options.firehose.storage))]
pub fn run_flashing<T, O, P>(
    transport: &T,
    plan: &FlashPlan,
    options: &FlashOptions,
    observer: &O,
    mut progress: P,
) -> Result<FlashReport, QdlError>
where
    T: UsbTransport,
    O: QdlObserver + ?Sized,
    P: FnMut(usize, usize),
{
    let mut engine = FirehoseEngine::new(transport, observer, options.firehose.clone());
    let mut report = FlashReport::default();
    let mut phase = QdlPhase::Handshake;
    let mut enter = |to: QdlPhase| {
        observer.on_event(&QdlEvent::PhaseChanged { from: phase, to });
        phase = to;
    };

    enter(QdlPhase::Configure);
    engine.drain_logs()?;
    report.max_payload_size = engine.configure()?;

    if let Some(ufs) = &plan.ufs {
        enter(QdlPhase::Provisioning);
        report.ufs_elements = ufs.execute(options.finalize_provisioning, |el| {
            engine.ufs(el).map_err(QdlError::from)
        })?;
    }

    enter(QdlPhase::Programming);
    plan.programs.execute(
        options.include_dir.as_deref(),
        |program, file| engine.program(program, file).map_err(QdlError::from),
        |done, total| {
            progress(done, total);
            observer.on_event(&QdlEvent::Progress {
                phase: QdlPhase::Programming,
                operation: "Directives".to_string(),
                current: done as u64,
                total: total as u64,
            });
        },
    )?;
    report.programs = plan.programs.len();

    enter(QdlPhase::Patching);
    report.patches = plan
        .patches
        .execute(|patch| engine.patch(patch).map_err(QdlError::from))?;

    match plan.programs.find_bootable_partition() {
        Ok(partition) => {
            engine.set_bootable(partition)?;
            report.bootable_partition = Some(partition);
        }
        Err(e @ ScriptError::AmbiguousBootablePartition { .. }) => {
            warn!(error = %e, "Not marking a bootable partition");
        }
        Err(_) => warn!("No boot partition found"),
    }

    if options.reset {
        enter(QdlPhase::Reset);
        engine.reset()?;
        report.reset = true;
    }

    info!(?report, "Flashing complete");
    Ok(report)
}
