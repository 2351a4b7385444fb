//! Program directives.
//!
//! A program script is a `<data>` document whose `<program>` children each
//! describe one file to write to a partition. Directives from several
//! scripts accumulate in one [`ProgramList`] and run in load order.

use std::fs::File;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use super::ScriptError;
use super::sector::check_start_sector;
use super::xml::{Document, Element};
use crate::error::QdlError;
use crate::protocol::constants::BOOTABLE_LABELS;

/// One flashing directive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Program {
    /// Zero when the script leaves it to the storage default.
    pub sector_size: u32,
    /// Offset into the source file, in sectors.
    pub file_sector_offset: u64,
    pub filename: String,
    pub label: String,
    pub num_sectors: u64,
    pub partition: u32,
    /// Start sector, possibly symbolic (`NUM_DISK_SECTORS-5.`).
    pub start_sector: String,
}

impl Program {
    fn from_element(doc: &Document, el: &Element) -> Result<Self, ScriptError> {
        let sector_size = doc.attr_u32(el, "SECTOR_SIZE_IN_BYTES")?;
        let file_sector_offset = doc.attr_u64(el, "file_sector_offset")?;
        if file_sector_offset.checked_mul(u64::from(sector_size)).is_none() {
            return Err(doc.invalid_number(el, "file_sector_offset", file_sector_offset));
        }

        let num_sectors = if el.attr("num_partition_sectors").is_some() {
            doc.attr_u64(el, "num_partition_sectors")?
        } else if el.attr("num_sectors").is_some() {
            doc.attr_u64(el, "num_sectors")?
        } else {
            return Err(ScriptError::MissingAttribute {
                path: doc.path.clone(),
                element: el.name.clone(),
                attribute: "num_partition_sectors".into(),
            });
        };

        let start_sector = doc.attr_str(el, "start_sector")?.trim();
        if start_sector.is_empty() {
            return Err(ScriptError::EmptyAttribute {
                path: doc.path.clone(),
                element: el.name.clone(),
                attribute: "start_sector".into(),
            });
        }
        let label = doc.attr_str(el, "label")?.to_string();
        check_start_sector(start_sector).map_err(|source| ScriptError::InvalidStartSector {
            path: doc.path.clone(),
            element: el.name.clone(),
            label: label.clone(),
            source,
        })?;

        Ok(Self {
            sector_size,
            file_sector_offset,
            filename: doc.attr_str(el, "filename")?.to_string(),
            label,
            num_sectors,
            partition: doc.attr_u32(el, "physical_partition_number")?,
            start_sector: start_sector.to_string(),
        })
    }

    /// Byte offset into the source file for the sector size in effect.
    pub fn file_offset(&self, sector_size: u32) -> Option<u64> {
        self.file_sector_offset.checked_mul(u64::from(sector_size))
    }

    pub fn is_bootable(&self) -> bool {
        BOOTABLE_LABELS.contains(&self.label.as_str())
    }

    /// Source file, preferring `include_dir` when the file exists there.
    pub fn resolve_path(&self, include_dir: Option<&Path>) -> PathBuf {
        if let Some(dir) = include_dir {
            let candidate = dir.join(&self.filename);
            if candidate.exists() {
                return candidate;
            }
        }
        PathBuf::from(&self.filename)
    }
}

/// Stable index of a directive inside its [`ProgramList`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProgramId(usize);

impl ProgramId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Ordered, append-only directive arena.
#[derive(Debug, Clone, Default)]
pub struct ProgramList {
    programs: Vec<Program>,
}

impl ProgramList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a program script and append its directives.
    ///
    /// Nothing is appended when any directive in the file is invalid.
    pub fn load(&mut self, path: &Path) -> Result<usize, ScriptError> {
        let doc = Document::load(path)?;
        self.load_document(&doc)
    }

    pub fn load_document(&mut self, doc: &Document) -> Result<usize, ScriptError> {
        doc.expect_root("data", "program")?;
        let parsed = doc
            .elements("program")
            .map(|el| Program::from_element(doc, el))
            .collect::<Result<Vec<_>, _>>()?;
        let count = parsed.len();
        self.programs.extend(parsed);
        debug!(path = %doc.path.display(), count, "Loaded program directives");
        Ok(count)
    }

    pub fn push(&mut self, program: Program) -> ProgramId {
        self.programs.push(program);
        ProgramId(self.programs.len() - 1)
    }

    pub fn get(&self, id: ProgramId) -> Option<&Program> {
        self.programs.get(id.0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (ProgramId, &Program)> {
        self.programs
            .iter()
            .enumerate()
            .map(|(i, p)| (ProgramId(i), p))
    }

    pub fn len(&self) -> usize {
        self.programs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.programs.is_empty()
    }

    /// Partition holding the primary boot image.
    pub fn find_bootable_partition(&self) -> Result<u32, ScriptError> {
        let mut found: Option<u32> = None;
        for program in self.programs.iter().filter(|p| p.is_bootable()) {
            match found {
                None => found = Some(program.partition),
                Some(first) if first != program.partition => {
                    return Err(ScriptError::AmbiguousBootablePartition {
                        first,
                        second: program.partition,
                    });
                }
                Some(_) => {}
            }
        }
        found.ok_or(ScriptError::NoBootablePartition)
    }

    /// Run `apply` for each directive in order.
    ///
    /// `progress(done, total)` fires after every directive, including the
    /// ones skipped for lacking a filename. The first failure stops the run
    /// and is reported with the directive's label and partition.
    pub fn execute<F, P>(
        &self,
        include_dir: Option<&Path>,
        mut apply: F,
        mut progress: P,
    ) -> Result<(), QdlError>
    where
        F: FnMut(&Program, &mut File) -> Result<(), QdlError>,
        P: FnMut(usize, usize),
    {
        let total = self.programs.len();
        for (i, program) in self.programs.iter().enumerate() {
            if program.filename.is_empty() {
                debug!(label = %program.label, "No filename, skipping");
            } else {
                let path = program.resolve_path(include_dir);
                info!(
                    label = %program.label,
                    partition = program.partition,
                    file = %path.display(),
                    "Programming"
                );
                let wrap = |source: QdlError| QdlError::Directive {
                    label: program.label.clone(),
                    partition: program.partition,
                    source: Box::new(source),
                };
                let mut file = File::open(&path).map_err(|e| wrap(QdlError::io(&path, e)))?;
                apply(program, &mut file).map_err(wrap)?;
            }
            progress(i + 1, total);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::transport::TransportError;
    use std::fs;
    use tempfile::TempDir;

    fn program_xml(entries: &[(&str, &str, u32)]) -> String {
        let mut xml = String::from("<?xml version=\"1.0\"?>\n<data>\n");
        for (label, filename, partition) in entries {
            xml.push_str(&format!(
                "  <program SECTOR_SIZE_IN_BYTES=\"4096\" file_sector_offset=\"0\" \
                 filename=\"{filename}\" label=\"{label}\" num_partition_sectors=\"8\" \
                 physical_partition_number=\"{partition}\" start_sector=\"6\"/>\n"
            ));
        }
        xml.push_str("</data>\n");
        xml
    }

    fn write(dir: &TempDir, name: &str, text: &str) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, text).unwrap();
        path
    }

    fn labels(list: &ProgramList) -> Vec<&str> {
        list.iter().map(|(_, p)| p.label.as_str()).collect()
    }

    #[test]
    fn test_load_preserves_order() {
        let dir = TempDir::new().unwrap();
        let path = write(
            &dir,
            "rawprogram0.xml",
            &program_xml(&[("xbl", "xbl.elf", 1), ("boot", "boot.img", 4), ("system", "", 4)]),
        );
        let mut list = ProgramList::new();
        assert_eq!(list.load(&path).unwrap(), 3);
        assert_eq!(labels(&list), ["xbl", "boot", "system"]);

        let (id, boot) = list.iter().nth(1).unwrap();
        assert_eq!(id.index(), 1);
        assert_eq!(list.get(id), Some(boot));
        assert_eq!(boot.sector_size, 4096);
        assert_eq!(boot.num_sectors, 8);
        assert_eq!(boot.partition, 4);
        assert_eq!(boot.start_sector, "6");
    }

    #[test]
    fn test_two_files_concatenate() {
        let dir = TempDir::new().unwrap();
        let a = write(&dir, "rawprogram0.xml", &program_xml(&[("a", "a.bin", 0), ("b", "b.bin", 0)]));
        let b = write(&dir, "rawprogram1.xml", &program_xml(&[("c", "c.bin", 1)]));
        let mut list = ProgramList::new();
        list.load(&a).unwrap();
        list.load(&b).unwrap();
        assert_eq!(labels(&list), ["a", "b", "c"]);
    }

    #[test]
    fn test_attribute_conversions() {
        let doc = Document::parse_str(
            r#"<data>
                 <program SECTOR_SIZE_IN_BYTES="512" file_sector_offset="3" filename="f"
                          label="gpt" num_sectors="34" physical_partition_number="0"
                          start_sector="NUM_DISK_SECTORS-33."/>
               </data>"#,
            Path::new("t.xml"),
        )
        .unwrap();
        let mut list = ProgramList::new();
        list.load_document(&doc).unwrap();
        let (_, p) = list.iter().next().unwrap();
        assert_eq!(p.file_sector_offset, 3);
        assert_eq!(p.file_offset(512), Some(1536));
        assert_eq!(p.num_sectors, 34);
        assert_eq!(p.start_sector, "NUM_DISK_SECTORS-33.");
    }

    #[test]
    fn test_invalid_directive_names_attribute_and_appends_nothing() {
        let doc = Document::parse_str(
            r#"<data>
                 <program SECTOR_SIZE_IN_BYTES="512" file_sector_offset="0" filename="a"
                          label="a" num_partition_sectors="1" physical_partition_number="0"
                          start_sector="0"/>
                 <program SECTOR_SIZE_IN_BYTES="512" file_sector_offset="0" filename="b"
                          label="b" num_partition_sectors="1" physical_partition_number="x"
                          start_sector="0"/>
               </data>"#,
            Path::new("t.xml"),
        )
        .unwrap();
        let mut list = ProgramList::new();
        match list.load_document(&doc) {
            Err(ScriptError::InvalidNumber { attribute, .. }) => {
                assert_eq!(attribute, "physical_partition_number")
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(list.is_empty());
    }

    #[test]
    fn test_missing_and_empty_attributes() {
        let missing = Document::parse_str(
            r#"<data><program SECTOR_SIZE_IN_BYTES="512" file_sector_offset="0" filename="a"
                 label="a" physical_partition_number="0" start_sector="0"/></data>"#,
            Path::new("t.xml"),
        )
        .unwrap();
        match ProgramList::new().load_document(&missing) {
            Err(ScriptError::MissingAttribute { attribute, .. }) => {
                assert_eq!(attribute, "num_partition_sectors")
            }
            other => panic!("unexpected {:?}", other),
        }

        let empty = Document::parse_str(
            r#"<data><program SECTOR_SIZE_IN_BYTES="512" file_sector_offset="0" filename="a"
                 label="a" num_sectors="1" physical_partition_number="0" start_sector=" "/></data>"#,
            Path::new("t.xml"),
        )
        .unwrap();
        assert!(matches!(
            ProgramList::new().load_document(&empty),
            Err(ScriptError::EmptyAttribute { .. })
        ));
    }

    #[test]
    fn test_malformed_start_sector_rejected_at_load() {
        let nested = format!("{}1{}", "(".repeat(200_000), ")".repeat(200_000));
        for expr in ["NUM_DISK_SECTORS-", "DISK_SIZE-5", "12abc", nested.as_str()] {
            let doc = Document::parse_str(
                &format!(
                    r#"<data><program SECTOR_SIZE_IN_BYTES="512" file_sector_offset="0" filename="a"
                         label="gpt" num_sectors="1" physical_partition_number="0"
                         start_sector="{expr}"/></data>"#
                ),
                Path::new("t.xml"),
            )
            .unwrap();
            let mut list = ProgramList::new();
            match list.load_document(&doc) {
                Err(ScriptError::InvalidStartSector { label, .. }) => assert_eq!(label, "gpt"),
                other => panic!("{expr:.20}: unexpected {:?}", other),
            }
            assert!(list.is_empty());
        }
    }

    #[test]
    fn test_zero_sector_size_keeps_sector_offset() {
        let doc = Document::parse_str(
            r#"<data><program SECTOR_SIZE_IN_BYTES="0" file_sector_offset="3" filename="f"
                 label="a" num_sectors="1" physical_partition_number="0" start_sector="0"/></data>"#,
            Path::new("t.xml"),
        )
        .unwrap();
        let mut list = ProgramList::new();
        list.load_document(&doc).unwrap();
        let (_, p) = list.iter().next().unwrap();
        assert_eq!(p.sector_size, 0);
        assert_eq!(p.file_sector_offset, 3);
        assert_eq!(p.file_offset(4096), Some(12288));
    }

    #[test]
    fn test_wrong_root() {
        let doc = Document::parse_str("<patches/>", Path::new("t.xml")).unwrap();
        assert!(matches!(
            ProgramList::new().load_document(&doc),
            Err(ScriptError::WrongRoot { .. })
        ));
    }

    #[test]
    fn test_find_bootable_partition() {
        let mut list = ProgramList::new();
        assert!(matches!(
            list.find_bootable_partition(),
            Err(ScriptError::NoBootablePartition)
        ));

        let dir = TempDir::new().unwrap();
        let path = write(
            &dir,
            "p.xml",
            &program_xml(&[("boot", "b", 4), ("xbl", "x", 1), ("xbl_a", "x", 1)]),
        );
        list.load(&path).unwrap();
        assert_eq!(list.find_bootable_partition().unwrap(), 1);

        let other = write(&dir, "q.xml", &program_xml(&[("sbl1", "s", 2)]));
        list.load(&other).unwrap();
        assert!(matches!(
            list.find_bootable_partition(),
            Err(ScriptError::AmbiguousBootablePartition { first: 1, second: 2 })
        ));
    }

    #[test]
    fn test_execute_single_directive() {
        let dir = TempDir::new().unwrap();
        write(&dir, "boot.img", "kernel");
        let doc = Document::parse_str(
            r#"<data><program SECTOR_SIZE_IN_BYTES="512" file_sector_offset="0"
                 filename="boot.img" label="boot" num_partition_sectors="128"
                 physical_partition_number="0" start_sector="0"/></data>"#,
            Path::new("rawprogram0.xml"),
        )
        .unwrap();
        let mut list = ProgramList::new();
        list.load_document(&doc).unwrap();

        let mut calls = 0;
        let mut progress = Vec::new();
        list.execute(
            Some(dir.path()),
            |program, file| {
                calls += 1;
                assert_eq!(program.filename, "boot.img");
                let mut content = String::new();
                std::io::Read::read_to_string(file, &mut content).unwrap();
                assert_eq!(content, "kernel");
                Ok(())
            },
            |done, total| progress.push((done, total)),
        )
        .unwrap();
        assert_eq!(calls, 1);
        assert_eq!(progress, [(1, 1)]);
    }

    #[test]
    fn test_execute_skips_empty_filename() {
        let dir = TempDir::new().unwrap();
        write(&dir, "a.bin", "a");
        let path = write(&dir, "p.xml", &program_xml(&[("a", "a.bin", 0), ("gap", "", 0)]));
        let mut list = ProgramList::new();
        list.load(&path).unwrap();

        let mut applied = Vec::new();
        let mut progress = Vec::new();
        list.execute(
            Some(dir.path()),
            |p, _| {
                applied.push(p.label.clone());
                Ok(())
            },
            |done, total| progress.push((done, total)),
        )
        .unwrap();
        assert_eq!(applied, ["a"]);
        assert_eq!(progress, [(1, 2), (2, 2)]);
    }

    #[test]
    fn test_execute_stops_at_first_failure() {
        let dir = TempDir::new().unwrap();
        write(&dir, "a.bin", "a");
        write(&dir, "b.bin", "b");
        let path = write(
            &dir,
            "p.xml",
            &program_xml(&[("a", "a.bin", 0), ("b", "b.bin", 3), ("c", "a.bin", 0)]),
        );
        let mut list = ProgramList::new();
        list.load(&path).unwrap();

        let mut applied = Vec::new();
        let err = list
            .execute(
                Some(dir.path()),
                |p, _| {
                    applied.push(p.label.clone());
                    if p.label == "b" {
                        Err(TransportError::Timeout { timeout_ms: 1000 }.into())
                    } else {
                        Ok(())
                    }
                },
                |_, _| {},
            )
            .unwrap_err();
        assert_eq!(applied, ["a", "b"]);
        match &err {
            QdlError::Directive { label, partition, .. } => {
                assert_eq!(label, "b");
                assert_eq!(*partition, 3);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(err.kind(), ErrorKind::Transport);
    }

    #[test]
    fn test_execute_missing_file() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "p.xml", &program_xml(&[("modem", "NON-HLOS.bin", 0)]));
        let mut list = ProgramList::new();
        list.load(&path).unwrap();
        let err = list
            .execute(Some(dir.path()), |_, _| Ok(()), |_, _| {})
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Io);
        assert!(err.to_string().contains("modem"));
    }
}
