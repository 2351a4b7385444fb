//! Firehose command/response engine.
//!
//! One command in flight at a time: every operation sends a document and
//! waits for the matching `<response>`, surfacing `<log>` lines as they
//! arrive. Messages that trail a response in the same frame are kept for
//! the next exchange.

use std::collections::{HashMap, VecDeque};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::time::Duration;

use tracing::{debug, info, warn};

use super::{FirehoseConfig, FlashError};
use crate::events::{LogLevel, QdlEvent, QdlObserver, QdlPhase};
use crate::payload::ChunkState;
use crate::protocol::constants::{FIREHOSE_DRAIN_TIMEOUT_MS, FIREHOSE_FRAME_SIZE};
use crate::protocol::{FirehoseMessage, FirehoseResponse, encode_command, parse_frames};
use crate::script::sector::{Geometry, is_symbolic, resolve_start_sector};
use crate::script::xml::Element;
use crate::script::{Patch, Program};
use crate::transport::{TransportError, UsbTransport};

/// A response together with the log lines that preceded it.
#[derive(Debug, Clone)]
pub struct Exchange {
    pub response: FirehoseResponse,
    pub logs: Vec<String>,
}

impl Exchange {
    fn log_text(&self) -> String {
        if self.logs.is_empty() {
            self.response.to_string()
        } else {
            self.logs.join("\n")
        }
    }
}

pub struct FirehoseEngine<'a, T: UsbTransport, O: QdlObserver + ?Sized> {
    transport: &'a T,
    observer: &'a O,
    config: FirehoseConfig,
    max_payload: usize,
    pending: VecDeque<FirehoseMessage>,
    /// Per physical partition; an entry means a lookup was attempted.
    geometry: HashMap<u32, Geometry>,
}

impl<'a, T: UsbTransport, O: QdlObserver + ?Sized> FirehoseEngine<'a, T, O> {
    pub fn new(transport: &'a T, observer: &'a O, config: FirehoseConfig) -> Self {
        let max_payload = config.max_payload_size;
        Self {
            transport,
            observer,
            config,
            max_payload,
            pending: VecDeque::new(),
            geometry: HashMap::new(),
        }
    }

    /// Negotiated payload size for raw data.
    pub fn max_payload_size(&self) -> usize {
        self.max_payload
    }

    pub fn config(&self) -> &FirehoseConfig {
        &self.config
    }

    fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.config.read_timeout_ms)
    }

    fn send(&self, command: &str, attributes: &[(&str, String)]) -> Result<(), FlashError> {
        let doc = encode_command(command, attributes)?;
        debug!(command, "Sending {}", String::from_utf8_lossy(&doc));
        self.transport.write(&doc, true)?;
        Ok(())
    }

    fn read_frame(&mut self, timeout: Duration) -> Result<(), FlashError> {
        let frame = self.transport.read(FIREHOSE_FRAME_SIZE, timeout)?;
        self.pending.extend(parse_frames(&frame)?);
        Ok(())
    }

    fn device_log(&self, line: &str) {
        self.observer.on_event(&QdlEvent::Log {
            level: LogLevel::Info,
            message: format!("LOG: {}", line),
        });
    }

    /// Wait for the next `<response>`, collecting logs on the way.
    pub fn wait_response(&mut self) -> Result<Exchange, FlashError> {
        let mut logs = Vec::new();
        loop {
            match self.pending.pop_front() {
                Some(FirehoseMessage::Log(line)) => {
                    self.device_log(&line);
                    logs.push(line);
                }
                Some(FirehoseMessage::Response(response)) => {
                    debug!(response = %response, "Response");
                    return Ok(Exchange { response, logs });
                }
                None => self.read_frame(self.read_timeout())?,
            }
        }
    }

    /// Send `command` and require an ACK.
    fn command(&mut self, command: &str, attributes: &[(&str, String)]) -> Result<Exchange, FlashError> {
        self.send(command, attributes)?;
        let exchange = self.wait_response()?;
        if !exchange.response.is_ack() {
            return Err(FlashError::Nak {
                command: command.to_string(),
                log: exchange.log_text(),
            });
        }
        Ok(exchange)
    }

    /// Consume whatever the programmer printed on startup.
    pub fn drain_logs(&mut self) -> Result<usize, FlashError> {
        let timeout = Duration::from_millis(FIREHOSE_DRAIN_TIMEOUT_MS);
        let mut lines = 0;
        loop {
            while let Some(message) = self.pending.pop_front() {
                match message {
                    FirehoseMessage::Log(line) => {
                        self.device_log(&line);
                        lines += 1;
                    }
                    FirehoseMessage::Response(response) => {
                        debug!(response = %response, "Discarding stale response");
                    }
                }
            }
            match self.read_frame(timeout) {
                Ok(()) => {}
                Err(FlashError::Transport(TransportError::Timeout { .. })) => break,
                Err(e) => return Err(e),
            }
        }
        debug!(lines, "Drained welcome logs");
        Ok(lines)
    }

    fn configure_attributes(&self, payload: usize) -> Vec<(&'static str, String)> {
        let flag = |b: bool| (if b { "1" } else { "0" }).to_string();
        vec![
            ("MemoryName", self.config.storage.to_string()),
            ("MaxPayloadSizeToTargetInBytes", payload.to_string()),
            ("verbose", flag(self.config.verbose)),
            ("ZLPAwareHost", flag(self.config.zlp_aware_host)),
            ("SkipStorageInit", flag(self.config.skip_storage_init)),
        ]
    }

    /// Negotiate the payload size.
    ///
    /// A NAK naming `MaxPayloadSizeToTargetInBytesSupported` is answered
    /// with one more `<configure>` at that size.
    pub fn configure(&mut self) -> Result<usize, FlashError> {
        let preferred = self.config.max_payload_size;
        let attributes = self.configure_attributes(preferred);
        self.send("configure", &attributes)?;
        let mut exchange = self.wait_response()?;

        if !exchange.response.is_ack() {
            let supported = exchange
                .response
                .get_usize("MaxPayloadSizeToTargetInBytesSupported")
                .ok_or_else(|| FlashError::Nak {
                    command: "configure".into(),
                    log: exchange.log_text(),
                })?;
            let retry = preferred.min(supported);
            if retry == 0 {
                return Err(FlashError::InvalidPayloadSize(supported));
            }
            info!(preferred, supported, "Renegotiating payload size");
            let attributes = self.configure_attributes(retry);
            exchange = self.command("configure", &attributes)?;
            self.max_payload = retry;
        } else {
            self.max_payload = preferred;
        }

        if let Some(device) = exchange.response.get_usize("MaxPayloadSizeToTargetInBytes") {
            if device == 0 {
                return Err(FlashError::InvalidPayloadSize(device));
            }
            self.max_payload = self.max_payload.min(device);
        }

        info!(
            storage = %self.config.storage,
            max_payload = self.max_payload,
            "Configured"
        );
        Ok(self.max_payload)
    }

    /// Total sectors of `partition` from `<getstorageinfo>`, when reported.
    pub fn storage_info(&mut self, partition: u32) -> Result<Option<u64>, FlashError> {
        let exchange = self.command(
            "getstorageinfo",
            &[("physical_partition_number", partition.to_string())],
        )?;
        let total = exchange.logs.iter().find_map(|l| parse_total_blocks(l));
        debug!(partition, ?total, "Storage info");
        Ok(total)
    }

    fn geometry(&mut self, partition: u32) -> Result<Geometry, FlashError> {
        if let Some(sectors) = self.config.num_disk_sectors {
            return Ok(Geometry::with_disk_sectors(sectors));
        }
        if let Some(geometry) = self.geometry.get(&partition) {
            return Ok(*geometry);
        }
        let geometry = match self.storage_info(partition) {
            Ok(Some(sectors)) => Geometry::with_disk_sectors(sectors),
            Ok(None) => Geometry::default(),
            Err(FlashError::Nak { log, .. }) => {
                warn!(partition, log = %log, "getstorageinfo rejected");
                Geometry::default()
            }
            Err(e) => return Err(e),
        };
        self.geometry.insert(partition, geometry);
        Ok(geometry)
    }

    /// Start sector as sent to the device.
    ///
    /// Plain numbers are normalized. Symbolic expressions are resolved when
    /// the disk size is known and forwarded verbatim otherwise.
    pub fn resolve_start(&mut self, partition: u32, expr: &str) -> Result<String, FlashError> {
        if !is_symbolic(expr) {
            return Ok(resolve_start_sector(expr, &Geometry::default())?.to_string());
        }
        let geometry = self.geometry(partition)?;
        if geometry.num_disk_sectors.is_none() {
            debug!(partition, expr, "Disk size unknown, forwarding expression");
            return Ok(expr.to_string());
        }
        Ok(resolve_start_sector(expr, &geometry)?.to_string())
    }

    /// Write one program directive from `file`.
    pub fn program(&mut self, program: &Program, file: &mut File) -> Result<(), FlashError> {
        let sector_size = self.config.sector_size_or_default(program.sector_size);
        let sector = u64::from(sector_size);

        let file_offset = program
            .file_offset(sector_size)
            .ok_or_else(|| FlashError::FileOffsetOverflow {
                label: program.label.clone(),
            })?;
        let available = file.metadata()?.len().saturating_sub(file_offset);
        let mut num_sectors = available.div_ceil(sector);
        if program.num_sectors != 0 && num_sectors > program.num_sectors {
            warn!(
                label = %program.label,
                file_sectors = num_sectors,
                partition_sectors = program.num_sectors,
                "{} too big for {}, truncated",
                program.filename,
                program.label
            );
            num_sectors = program.num_sectors;
        }
        if num_sectors == 0 {
            warn!(label = %program.label, file = %program.filename, "Nothing to write");
            return Ok(());
        }

        let start_sector = self.resolve_start(program.partition, &program.start_sector)?;
        let exchange = self.command(
            "program",
            &[
                ("SECTOR_SIZE_IN_BYTES", sector_size.to_string()),
                ("num_partition_sectors", num_sectors.to_string()),
                ("physical_partition_number", program.partition.to_string()),
                ("start_sector", start_sector),
                ("filename", program.filename.clone()),
            ],
        )?;
        if !exchange.response.rawmode() {
            return Err(FlashError::RawModeNotEntered {
                command: "program".into(),
            });
        }

        file.seek(SeekFrom::Start(file_offset))?;
        let total = num_sectors * sector;
        let mut chunks = ChunkState::for_sectors(total, self.max_payload, sector_size as usize);
        let mut buf = vec![0u8; chunks.chunk_size.min(total as usize)];
        while let Some(len) = chunks.next_len() {
            let chunk = &mut buf[..len];
            let read = fill_from(file, chunk)?;
            chunk[read..].fill(0);
            self.transport.write(chunk, chunks.is_done())?;
            self.observer.on_event(&QdlEvent::Progress {
                phase: QdlPhase::Programming,
                operation: program.label.clone(),
                current: chunks.offset,
                total,
            });
        }

        let exchange = self.wait_response()?;
        if !exchange.response.is_ack() {
            return Err(FlashError::Nak {
                command: "program".into(),
                log: exchange.log_text(),
            });
        }
        info!(
            label = %program.label,
            sectors = num_sectors,
            bytes = total,
            "Programmed"
        );
        Ok(())
    }

    /// Send one patch; its expressions are evaluated by the device.
    pub fn patch(&mut self, patch: &Patch) -> Result<(), FlashError> {
        let sector_size = self.config.sector_size_or_default(patch.sector_size);
        debug!(what = %patch.what, "Patching");
        self.command(
            "patch",
            &[
                ("SECTOR_SIZE_IN_BYTES", sector_size.to_string()),
                ("byte_offset", patch.byte_offset.to_string()),
                ("filename", patch.filename.clone()),
                ("physical_partition_number", patch.partition.to_string()),
                ("size_in_bytes", patch.size_in_bytes.to_string()),
                ("start_sector", patch.start_sector.clone()),
                ("value", patch.value.clone()),
            ],
        )?;
        Ok(())
    }

    pub fn set_bootable(&mut self, partition: u32) -> Result<(), FlashError> {
        self.command("setbootablestoragedrive", &[("value", partition.to_string())])?;
        info!(partition, "Partition marked bootable");
        Ok(())
    }

    /// Send one UFS provisioning element unchanged.
    pub fn ufs(&mut self, element: &Element) -> Result<(), FlashError> {
        let attributes: Vec<(&str, String)> = element
            .attributes
            .iter()
            .map(|(k, v)| (k.as_str(), v.clone()))
            .collect();
        self.command("ufs", &attributes)?;
        Ok(())
    }

    pub fn reset(&mut self) -> Result<(), FlashError> {
        self.command("power", &[("value", "reset".to_string())])?;
        info!("Device reset requested");
        Ok(())
    }
}

/// Read until `buf` is full or the file ends.
fn fill_from(file: &mut File, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match file.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Value of `"total_blocks":N` in a storage info log line.
fn parse_total_blocks(line: &str) -> Option<u64> {
    let rest = &line[line.find("\"total_blocks\"")? + "\"total_blocks\"".len()..];
    let rest = rest.trim_start().strip_prefix(':')?.trim_start();
    let end = rest
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(rest.len());
    rest[..end].parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::NullObserver;
    use crate::script::xml::Document;
    use crate::transport::MockTransport;
    use std::path::Path;
    use tempfile::TempDir;

    fn response(attrs: &str) -> String {
        format!(r#"<?xml version="1.0" encoding="UTF-8" ?><data><response {attrs}/></data>"#)
    }

    fn log(line: &str) -> String {
        let line = line.replace('"', "&quot;");
        format!(r#"<?xml version="1.0" encoding="UTF-8" ?><data><log value="{line}"/></data>"#)
    }

    fn sent_command(raw: &[u8]) -> Element {
        let doc = Document::parse_str(std::str::from_utf8(raw).unwrap(), Path::new("sent")).unwrap();
        assert_eq!(doc.root, "data");
        assert_eq!(doc.children.len(), 1);
        doc.children[0].clone()
    }

    fn config() -> FirehoseConfig {
        FirehoseConfig {
            read_timeout_ms: 10,
            ..FirehoseConfig::default()
        }
    }

    fn program(filename: &str, sectors: u64, start: &str) -> Program {
        Program {
            sector_size: 512,
            file_sector_offset: 0,
            filename: filename.into(),
            label: "boot".into(),
            num_sectors: sectors,
            partition: 0,
            start_sector: start.into(),
        }
    }

    fn source(dir: &TempDir, len: usize) -> File {
        let path = dir.path().join("boot.img");
        std::fs::write(&path, vec![0x5A; len]).unwrap();
        File::open(path).unwrap()
    }

    #[test]
    fn test_configure_ack() {
        let transport = MockTransport::new();
        transport.queue_xml(&log("Binary build date: Jan 1 2024"));
        transport.queue_xml(&response(
            r#"value="ACK" MaxPayloadSizeToTargetInBytes="524288" MaxPayloadSizeToTargetInBytesSupported="1048576""#,
        ));
        let mut engine = FirehoseEngine::new(&transport, &NullObserver, config());
        assert_eq!(engine.configure().unwrap(), 524288);

        let cmd = sent_command(&transport.payloads()[0]);
        assert_eq!(cmd.name, "configure");
        assert_eq!(cmd.attr("MemoryName"), Some("ufs"));
        assert_eq!(cmd.attr("MaxPayloadSizeToTargetInBytes"), Some("1048576"));
        assert_eq!(cmd.attr("ZLPAwareHost"), Some("1"));
        assert_eq!(cmd.attr("SkipStorageInit"), Some("0"));
    }

    #[test]
    fn test_configure_renegotiates_once() {
        let transport = MockTransport::new();
        transport.queue_xml(&response(
            r#"value="NAK" MaxPayloadSizeToTargetInBytes="1048576" MaxPayloadSizeToTargetInBytesSupported="16384""#,
        ));
        transport.queue_xml(&response(r#"value="ACK" MaxPayloadSizeToTargetInBytes="16384""#));
        let mut engine = FirehoseEngine::new(&transport, &NullObserver, config());
        assert_eq!(engine.configure().unwrap(), 16384);

        let sent = transport.payloads();
        assert_eq!(sent.len(), 2);
        assert_eq!(
            sent_command(&sent[1]).attr("MaxPayloadSizeToTargetInBytes"),
            Some("16384")
        );
    }

    #[test]
    fn test_configure_nak_without_size() {
        let transport = MockTransport::new();
        transport.queue_xml(&log("ERROR: storage not found"));
        transport.queue_xml(&response(r#"value="NAK""#));
        let mut engine = FirehoseEngine::new(&transport, &NullObserver, config());
        match engine.configure() {
            Err(FlashError::Nak { command, log }) => {
                assert_eq!(command, "configure");
                assert_eq!(log, "ERROR: storage not found");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_drain_logs() {
        let transport = MockTransport::new();
        transport.queue_xml(&format!("{}{}", log("one"), log("two")));
        transport.queue_xml(&log("three"));
        let mut engine = FirehoseEngine::new(&transport, &NullObserver, config());
        assert_eq!(engine.drain_logs().unwrap(), 3);
        assert_eq!(transport.pending_reads(), 0);
    }

    #[test]
    fn test_program_streams_padded_data() {
        let dir = TempDir::new().unwrap();
        let mut file = source(&dir, 1000);
        let transport = MockTransport::new();
        transport.queue_xml(&response(r#"value="ACK" rawmode="true""#));
        transport.queue_xml(&response(r#"value="ACK" rawmode="false""#));

        let mut engine = FirehoseEngine::new(&transport, &NullObserver, config());
        engine.program(&program("boot.img", 128, "0"), &mut file).unwrap();

        let transfers = transport.transfers();
        let cmd = sent_command(&transfers[0]);
        assert_eq!(cmd.name, "program");
        assert_eq!(cmd.attr("num_partition_sectors"), Some("2"));
        assert_eq!(cmd.attr("start_sector"), Some("0"));
        assert_eq!(cmd.attr("physical_partition_number"), Some("0"));

        // 1024 bytes in two packets, then a zero-length packet.
        assert_eq!(transfers.len(), 4);
        assert_eq!(transfers[1], vec![0x5A; 512]);
        assert_eq!(&transfers[2][..488], &[0x5A; 488][..]);
        assert!(transfers[2][488..].iter().all(|&b| b == 0));
        assert!(transfers[3].is_empty());
    }

    #[test]
    fn test_zero_sector_size_offset_uses_storage_default() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("boot.img");
        let mut content = vec![0x11; 4096];
        content.extend_from_slice(&[0x22; 100]);
        std::fs::write(&path, content).unwrap();
        let mut file = File::open(path).unwrap();

        let transport = MockTransport::new();
        transport.queue_xml(&response(r#"value="ACK" rawmode="true""#));
        transport.queue_xml(&response(r#"value="ACK""#));
        let mut engine = FirehoseEngine::new(&transport, &NullObserver, config());
        let program = Program {
            sector_size: 0,
            file_sector_offset: 1,
            ..program("boot.img", 0, "0")
        };
        engine.program(&program, &mut file).unwrap();

        let transfers = transport.transfers();
        let cmd = sent_command(&transfers[0]);
        assert_eq!(cmd.attr("SECTOR_SIZE_IN_BYTES"), Some("4096"));
        assert_eq!(cmd.attr("num_partition_sectors"), Some("1"));
        assert_eq!(&transfers[1][..100], &[0x22; 100][..]);
        assert!(transfers[1][100..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_program_chunks_at_negotiated_size() {
        let dir = TempDir::new().unwrap();
        let mut file = source(&dir, 3000);
        let transport = MockTransport::new();
        transport.queue_xml(&response(r#"value="ACK" MaxPayloadSizeToTargetInBytes="1024""#));
        transport.queue_xml(&response(r#"value="ACK" rawmode="true""#));
        transport.queue_xml(&response(r#"value="ACK""#));

        let mut engine = FirehoseEngine::new(&transport, &NullObserver, config());
        engine.configure().unwrap();
        transport.clear_transfers();
        engine.program(&program("boot.img", 0, "8"), &mut file).unwrap();

        // Command, three 1024 byte chunks of two packets each, one ZLP.
        let transfers = transport.transfers();
        assert_eq!(transfers.len(), 1 + 6 + 1);
        assert!(transfers[1..7].iter().all(|t| t.len() == 512));
        assert!(transfers[7].is_empty());
    }

    #[test]
    fn test_program_truncates_to_partition() {
        let dir = TempDir::new().unwrap();
        let mut file = source(&dir, 4096);
        let transport = MockTransport::new();
        transport.queue_xml(&response(r#"value="ACK" rawmode="true""#));
        transport.queue_xml(&response(r#"value="ACK""#));

        let mut engine = FirehoseEngine::new(&transport, &NullObserver, config());
        engine.program(&program("boot.img", 2, "0"), &mut file).unwrap();
        let cmd = sent_command(&transport.transfers()[0]);
        assert_eq!(cmd.attr("num_partition_sectors"), Some("2"));
    }

    #[test]
    fn test_program_nak_carries_log() {
        let dir = TempDir::new().unwrap();
        let mut file = source(&dir, 512);
        let transport = MockTransport::new();
        transport.queue_xml(&log("ERROR: Failed to open partition"));
        transport.queue_xml(&response(r#"value="NAK""#));

        let mut engine = FirehoseEngine::new(&transport, &NullObserver, config());
        match engine.program(&program("boot.img", 1, "0"), &mut file) {
            Err(FlashError::Nak { log, .. }) => assert_eq!(log, "ERROR: Failed to open partition"),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(transport.transfers().len(), 1);
    }

    #[test]
    fn test_program_requires_rawmode() {
        let dir = TempDir::new().unwrap();
        let mut file = source(&dir, 512);
        let transport = MockTransport::new();
        transport.queue_xml(&response(r#"value="ACK" rawmode="false""#));

        let mut engine = FirehoseEngine::new(&transport, &NullObserver, config());
        assert!(matches!(
            engine.program(&program("boot.img", 1, "0"), &mut file),
            Err(FlashError::RawModeNotEntered { .. })
        ));
    }

    #[test]
    fn test_symbolic_start_sector_resolved() {
        let dir = TempDir::new().unwrap();
        let mut file = source(&dir, 512);
        let transport = MockTransport::new();
        transport.queue_xml(&log(r#"INFO: {"storage_info": {"total_blocks":1000, "block_size":512}}"#));
        transport.queue_xml(&response(r#"value="ACK""#));
        transport.queue_xml(&response(r#"value="ACK" rawmode="true""#));
        transport.queue_xml(&response(r#"value="ACK""#));

        let mut engine = FirehoseEngine::new(&transport, &NullObserver, config());
        engine
            .program(&program("gpt_backup0.bin", 1, "NUM_DISK_SECTORS-5."), &mut file)
            .unwrap();

        let transfers = transport.transfers();
        let info = sent_command(&transfers[0]);
        assert_eq!(info.name, "getstorageinfo");
        assert_eq!(sent_command(&transfers[1]).attr("start_sector"), Some("995"));
    }

    #[test]
    fn test_symbolic_start_sector_forwarded_when_unknown() {
        let transport = MockTransport::new();
        transport.queue_xml(&response(r#"value="NAK""#));
        let mut engine = FirehoseEngine::new(&transport, &NullObserver, config());
        assert_eq!(
            engine.resolve_start(0, "NUM_DISK_SECTORS-5.").unwrap(),
            "NUM_DISK_SECTORS-5."
        );
        // The failed lookup is cached.
        assert_eq!(
            engine.resolve_start(0, "NUM_DISK_SECTORS-33.").unwrap(),
            "NUM_DISK_SECTORS-33."
        );
        assert_eq!(transport.transfers().len(), 1);
        assert_eq!(engine.resolve_start(0, "34.").unwrap(), "34");
    }

    #[test]
    fn test_known_disk_size_skips_lookup() {
        let transport = MockTransport::new();
        let mut engine = FirehoseEngine::new(
            &transport,
            &NullObserver,
            FirehoseConfig {
                num_disk_sectors: Some(2000),
                ..config()
            },
        );
        assert_eq!(engine.resolve_start(3, "NUM_DISK_SECTORS-1").unwrap(), "1999");
        assert!(transport.transfers().is_empty());
    }

    #[test]
    fn test_patch_set_bootable_and_reset() {
        let transport = MockTransport::new();
        for _ in 0..3 {
            transport.queue_xml(&response(r#"value="ACK""#));
        }
        let mut engine = FirehoseEngine::new(&transport, &NullObserver, config());
        engine
            .patch(&Patch {
                sector_size: 4096,
                byte_offset: 16,
                filename: "DISK".into(),
                partition: 0,
                size_in_bytes: 4,
                start_sector: "1".into(),
                value: "CRC32(2,4096)".into(),
                what: "Update Primary Header with CRC of Partition Array.".into(),
            })
            .unwrap();
        engine.set_bootable(1).unwrap();
        engine.reset().unwrap();

        let sent: Vec<Element> = transport.payloads().iter().map(|p| sent_command(p)).collect();
        assert_eq!(sent[0].name, "patch");
        assert_eq!(sent[0].attr("value"), Some("CRC32(2,4096)"));
        assert_eq!(sent[0].attr("what"), None);
        assert_eq!(sent[1].name, "setbootablestoragedrive");
        assert_eq!(sent[1].attr("value"), Some("1"));
        assert_eq!(sent[2].name, "power");
        assert_eq!(sent[2].attr("value"), Some("reset"));
    }

    #[test]
    fn test_ufs_element_forwarded() {
        let transport = MockTransport::new();
        transport.queue_xml(&response(r#"value="ACK""#));
        let mut engine = FirehoseEngine::new(&transport, &NullObserver, config());
        let element = Element {
            name: "ufs".into(),
            attributes: vec![("LUNum".into(), "0".into()), ("size_in_kb".into(), "0".into())],
        };
        engine.ufs(&element).unwrap();
        let cmd = sent_command(&transport.payloads()[0]);
        assert_eq!(cmd.name, "ufs");
        assert_eq!(cmd.attributes, element.attributes);
    }

    #[test]
    fn test_response_and_trailing_log_in_one_frame() {
        let transport = MockTransport::new();
        transport.queue_xml(&format!(
            "{}{}",
            response(r#"value="ACK""#),
            log("INFO: trailing")
        ));
        transport.queue_xml(&response(r#"value="ACK""#));
        let mut engine = FirehoseEngine::new(&transport, &NullObserver, config());
        engine.set_bootable(0).unwrap();
        engine.reset().unwrap();
        assert_eq!(transport.pending_reads(), 0);
    }

    #[test]
    fn test_parse_total_blocks() {
        assert_eq!(
            parse_total_blocks(r#"INFO: {"storage_info": {"total_blocks" : 124321792, "block_size":4096}}"#),
            Some(124321792)
        );
        assert_eq!(parse_total_blocks("INFO: nothing here"), None);
    }
}
