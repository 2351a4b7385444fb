//! QDL Session - high-level orchestrator for a flashing run.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::error::QdlError;
use crate::events::{PacketDirection, QdlEvent, QdlObserver, QdlPhase, TracingObserver};
use crate::firehose::{FirehoseConfig, FlashOptions, FlashReport, StorageKind, run_flashing};
use crate::protocol::constants::{
    FIREHOSE_DEFAULT_PAYLOAD_SIZE, FIREHOSE_READ_TIMEOUT_MS, SAHARA_READ_TIMEOUT_MS,
};
use crate::script::{FileType, PatchList, ProgramList, ScriptError, UfsPlan, classify};
use crate::payload::LoaderImage;
use crate::state::{SaharaContext, serve_loader};
use crate::transport::{NusbTransport, TransportError, UsbTransport};

/// Configuration for a flashing session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Programmer uploaded over Sahara.
    pub loader: PathBuf,
    /// Program, patch and provisioning scripts, in execution order.
    pub scripts: Vec<PathBuf>,
    /// Searched first for program source files.
    pub include_dir: Option<PathBuf>,
    pub storage: StorageKind,
    pub finalize_provisioning: bool,
    /// Reset the device after flashing.
    pub reset: bool,
    /// Preferred Firehose payload size; the device may lower it.
    pub max_payload_size: usize,
    pub sahara_timeout_ms: u64,
    pub firehose_timeout_ms: u64,
    /// Disk size, when known ahead of time.
    pub num_disk_sectors: Option<u64>,
    /// How long to wait for the device to appear. Zero tries once.
    pub wait_for_device_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            loader: PathBuf::new(),
            scripts: Vec::new(),
            include_dir: None,
            storage: StorageKind::default(),
            finalize_provisioning: false,
            reset: true,
            max_payload_size: FIREHOSE_DEFAULT_PAYLOAD_SIZE,
            sahara_timeout_ms: SAHARA_READ_TIMEOUT_MS,
            firehose_timeout_ms: FIREHOSE_READ_TIMEOUT_MS,
            num_disk_sectors: None,
            wait_for_device_secs: 0,
        }
    }
}

impl SessionConfig {
    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: SessionConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn firehose_config(&self) -> FirehoseConfig {
        FirehoseConfig {
            storage: self.storage,
            max_payload_size: self.max_payload_size,
            read_timeout_ms: self.firehose_timeout_ms,
            num_disk_sectors: self.num_disk_sectors,
            ..FirehoseConfig::default()
        }
    }

    pub fn flash_options(&self) -> FlashOptions {
        FlashOptions {
            firehose: self.firehose_config(),
            include_dir: self.include_dir.clone(),
            finalize_provisioning: self.finalize_provisioning,
            reset: self.reset,
        }
    }
}

/// Everything the scripts ask for, in load order.
#[derive(Debug, Clone, Default)]
pub struct FlashPlan {
    pub programs: ProgramList,
    pub patches: PatchList,
    pub ufs: Option<UfsPlan>,
}

impl FlashPlan {
    pub fn new() -> Self {
        Self::default()
    }

    /// Classify `path` and hand it to the matching loader.
    pub fn load(&mut self, path: &Path) -> Result<FileType, QdlError> {
        let file_type = classify(path)?;
        match file_type {
            FileType::Program => {
                self.load_program(path)?;
            }
            FileType::Patch => {
                self.load_patch(path)?;
            }
            FileType::Ufs => self.load_ufs(path)?,
            FileType::Contents | FileType::Unknown => {
                return Err(ScriptError::UnsupportedScript {
                    path: path.to_path_buf(),
                    file_type,
                }
                .into());
            }
        }
        info!(path = %path.display(), kind = %file_type, "Loaded script");
        Ok(file_type)
    }

    pub fn load_program(&mut self, path: &Path) -> Result<usize, QdlError> {
        Ok(self.programs.load(path)?)
    }

    pub fn load_patch(&mut self, path: &Path) -> Result<usize, QdlError> {
        Ok(self.patches.load(path)?)
    }

    pub fn load_ufs(&mut self, path: &Path) -> Result<(), QdlError> {
        if self.ufs.is_some() {
            return Err(ScriptError::DuplicateProvisioning {
                path: path.to_path_buf(),
            }
            .into());
        }
        self.ufs = Some(UfsPlan::load(path)?);
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.programs.is_empty() && self.patches.is_empty() && self.ufs.is_none()
    }
}

/// QDL Session - orchestrates the complete run.
pub struct QdlSession<O: QdlObserver> {
    config: SessionConfig,
    observer: Arc<O>,
    plan: FlashPlan,
}

impl QdlSession<TracingObserver> {
    /// Create a new session with default tracing observer.
    pub fn new(config: SessionConfig) -> Self {
        Self::with_observer(config, Arc::new(TracingObserver))
    }
}

impl<O: QdlObserver + 'static> QdlSession<O> {
    /// Create a new session with a custom observer.
    pub fn with_observer(config: SessionConfig, observer: Arc<O>) -> Self {
        Self {
            config,
            observer,
            plan: FlashPlan::new(),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn plan(&self) -> &FlashPlan {
        &self.plan
    }

    fn emit(&self, event: QdlEvent) {
        self.observer.on_event(&event);
    }

    /// Parse every configured script into a fresh plan.
    pub fn load_scripts(&mut self) -> Result<(), QdlError> {
        let mut plan = FlashPlan::new();
        for path in &self.config.scripts {
            plan.load(path)?;
        }
        self.plan = plan;
        Ok(())
    }

    /// Run the complete session: scripts, device, handshake, flashing.
    #[instrument(skip(self), fields(loader = %self.config.loader.display()))]
    pub fn run(&mut self) -> Result<FlashReport, QdlError> {
        // Scripts and loader are checked before touching the device.
        self.load_scripts().inspect_err(|e| self.report(e))?;
        let image = LoaderImage::load(&self.config.loader)
            .map_err(|e| QdlError::Handshake(e.into()))
            .inspect_err(|e| self.report(e))?;

        let transport = self.wait_for_device().inspect_err(|e| self.report(e))?;
        self.emit(QdlEvent::DeviceConnected {
            vid: transport.vendor_id(),
            pid: transport.product_id(),
        });

        self.run_on(&transport, &image)
    }

    /// Handshake and flashing over an already opened transport.
    pub fn run_on<T: UsbTransport>(
        &mut self,
        transport: &T,
        image: &LoaderImage,
    ) -> Result<FlashReport, QdlError> {
        let result = self.run_protocols(transport, image);
        match &result {
            Ok(_) => {
                self.emit(QdlEvent::PhaseChanged {
                    from: if self.config.reset {
                        QdlPhase::Reset
                    } else {
                        QdlPhase::Patching
                    },
                    to: QdlPhase::Complete,
                });
                self.emit(QdlEvent::Complete);
            }
            Err(e) => self.report(e),
        }
        result
    }

    fn run_protocols<T: UsbTransport>(
        &self,
        transport: &T,
        image: &LoaderImage,
    ) -> Result<FlashReport, QdlError> {
        let observer = self.observer.as_ref();
        let transport = ObservableTransport {
            inner: transport,
            observer,
        };

        self.emit(QdlEvent::PhaseChanged {
            from: QdlPhase::WaitingForDevice,
            to: QdlPhase::Handshake,
        });
        let mut sahara = SaharaContext::new();
        serve_loader(
            &transport,
            image,
            observer,
            Duration::from_millis(self.config.sahara_timeout_ms),
            &mut sahara,
        )?;
        info!(bytes = sahara.bytes_served, "Programmer running");

        run_flashing(
            &transport,
            &self.plan,
            &self.config.flash_options(),
            observer,
            |_, _| {},
        )
    }

    fn report(&self, error: &QdlError) {
        self.emit(QdlEvent::Error {
            kind: error.kind(),
            message: error.to_string(),
        });
    }

    fn wait_for_device(&self) -> Result<NusbTransport, QdlError> {
        info!("Waiting for device...");
        let timeout = Duration::from_secs(self.config.wait_for_device_secs);
        let start = Instant::now();
        let mut poll_count = 0u64;

        loop {
            poll_count += 1;

            match NusbTransport::open_default() {
                Ok(t) => {
                    info!(
                        vid = format!("{:04X}", t.vendor_id()),
                        pid = format!("{:04X}", t.product_id()),
                        "Device found after {} polls",
                        poll_count
                    );
                    return Ok(t);
                }
                Err(TransportError::DeviceNotFound { .. }) if start.elapsed() < timeout => {
                    thread::sleep(Duration::from_millis(100));
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

/// Transport wrapper that emits packet events.
pub struct ObservableTransport<'a, T: UsbTransport, O: QdlObserver + ?Sized> {
    pub inner: &'a T,
    pub observer: &'a O,
}

impl<T: UsbTransport, O: QdlObserver + ?Sized> ObservableTransport<'_, T, O> {
    fn emit(&self, direction: PacketDirection, data: &[u8]) {
        let packet_type = if data.starts_with(b"<?xml") {
            "XML"
        } else if data.len() <= 0x30 {
            "Cmd"
        } else {
            "Data"
        };
        self.observer.on_event(&QdlEvent::Packet {
            direction,
            packet_type: packet_type.to_string(),
            length: data.len(),
            data: Some(data.iter().take(32).cloned().collect()),
        });
    }
}

impl<T: UsbTransport, O: QdlObserver + ?Sized> UsbTransport for ObservableTransport<'_, T, O> {
    fn bulk_out(&self, chunk: &[u8]) -> Result<usize, TransportError> {
        self.inner.bulk_out(chunk)
    }

    fn read(&self, max_len: usize, timeout: Duration) -> Result<Vec<u8>, TransportError> {
        let res = self.inner.read(max_len, timeout);
        if let Ok(data) = &res
            && !data.is_empty()
        {
            self.emit(PacketDirection::Rx, data);
        }
        res
    }

    fn max_packet_size(&self) -> usize {
        self.inner.max_packet_size()
    }

    fn vendor_id(&self) -> u16 {
        self.inner.vendor_id()
    }

    fn product_id(&self) -> u16 {
        self.inner.product_id()
    }

    fn write(&self, payload: &[u8], zero_length_terminate: bool) -> Result<usize, TransportError> {
        let res = self.inner.write(payload, zero_length_terminate);
        if res.is_ok() {
            self.emit(PacketDirection::Tx, payload);
        }
        res
    }
}
