//! Patch directives.
//!
//! Patches are small in-place edits (GPT CRCs, backup header locations).
//! Only patches addressed to `DISK` target the device; the others describe
//! edits to host side image files and are ignored here.

use std::path::Path;

use tracing::debug;

use super::ScriptError;
use super::xml::{Document, Element};
use crate::error::QdlError;

/// Patches with this filename are sent to the device.
pub const DISK_TARGET: &str = "DISK";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Patch {
    pub sector_size: u32,
    pub byte_offset: u64,
    pub filename: String,
    pub partition: u32,
    pub size_in_bytes: u64,
    /// Start sector expression, forwarded as written.
    pub start_sector: String,
    /// Value expression, evaluated by the device (e.g. `CRC32(2,16384)`).
    pub value: String,
    /// Free form description.
    pub what: String,
}

impl Patch {
    fn from_element(doc: &Document, el: &Element) -> Result<Self, ScriptError> {
        Ok(Self {
            sector_size: doc.attr_u32(el, "SECTOR_SIZE_IN_BYTES")?,
            byte_offset: doc.attr_u64(el, "byte_offset")?,
            filename: doc.attr_str(el, "filename")?.to_string(),
            partition: doc.attr_u32(el, "physical_partition_number")?,
            size_in_bytes: doc.attr_u64(el, "size_in_bytes")?,
            start_sector: doc.attr_str(el, "start_sector")?.trim().to_string(),
            value: doc.attr_str(el, "value")?.to_string(),
            what: el.attr("what").unwrap_or_default().to_string(),
        })
    }

    pub fn targets_disk(&self) -> bool {
        self.filename == DISK_TARGET
    }
}

#[derive(Debug, Clone, Default)]
pub struct PatchList {
    patches: Vec<Patch>,
}

impl PatchList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(&mut self, path: &Path) -> Result<usize, ScriptError> {
        let doc = Document::load(path)?;
        self.load_document(&doc)
    }

    pub fn load_document(&mut self, doc: &Document) -> Result<usize, ScriptError> {
        doc.expect_root("patches", "patch")?;
        let parsed = doc
            .elements("patch")
            .map(|el| Patch::from_element(doc, el))
            .collect::<Result<Vec<_>, _>>()?;
        let count = parsed.len();
        self.patches.extend(parsed);
        debug!(path = %doc.path.display(), count, "Loaded patches");
        Ok(count)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Patch> {
        self.patches.iter()
    }

    pub fn len(&self) -> usize {
        self.patches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patches.is_empty()
    }

    /// Apply every `DISK` patch in order, stopping at the first failure.
    pub fn execute<F>(&self, mut apply: F) -> Result<usize, QdlError>
    where
        F: FnMut(&Patch) -> Result<(), QdlError>,
    {
        let mut applied = 0;
        for patch in self.patches.iter().filter(|p| p.targets_disk()) {
            apply(patch).map_err(|source| QdlError::Directive {
                label: patch.what.clone(),
                partition: patch.partition,
                source: Box::new(source),
            })?;
            applied += 1;
        }
        Ok(applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::firehose::FlashError;

    const PATCHES: &str = r#"<?xml version="1.0" ?>
<patches>
  <patch SECTOR_SIZE_IN_BYTES="4096" byte_offset="16" filename="gpt_main0.bin"
         physical_partition_number="0" size_in_bytes="4" start_sector="1"
         value="CRC32(2,4096)" what="Update host image CRC"/>
  <patch SECTOR_SIZE_IN_BYTES="4096" byte_offset="16" filename="DISK"
         physical_partition_number="0" size_in_bytes="4" start_sector="1"
         value="CRC32(2,4096)" what="Update Primary Header with CRC of Partition Array."/>
  <patch SECTOR_SIZE_IN_BYTES="4096" byte_offset="32" filename="DISK"
         physical_partition_number="0" size_in_bytes="8" start_sector="NUM_DISK_SECTORS-1."
         value="NUM_DISK_SECTORS-1." what="Update Backup Header with LastUseableLBA."/>
</patches>"#;

    fn load() -> PatchList {
        let doc = Document::parse_str(PATCHES, Path::new("patch0.xml")).unwrap();
        let mut list = PatchList::new();
        assert_eq!(list.load_document(&doc).unwrap(), 3);
        list
    }

    #[test]
    fn test_load() {
        let list = load();
        let last = list.iter().last().unwrap();
        assert_eq!(last.byte_offset, 32);
        assert_eq!(last.size_in_bytes, 8);
        assert_eq!(last.start_sector, "NUM_DISK_SECTORS-1.");
        assert_eq!(last.value, "NUM_DISK_SECTORS-1.");
        assert!(last.targets_disk());
    }

    #[test]
    fn test_execute_only_disk_patches() {
        let list = load();
        let mut seen = Vec::new();
        let applied = list
            .execute(|p| {
                seen.push(p.byte_offset);
                Ok(())
            })
            .unwrap();
        assert_eq!(applied, 2);
        assert_eq!(seen, [16, 32]);
    }

    #[test]
    fn test_execute_failure_stops() {
        let list = load();
        let mut calls = 0;
        let err = list
            .execute(|_| {
                calls += 1;
                Err(FlashError::Nak {
                    command: "patch".into(),
                    log: "bad".into(),
                }
                .into())
            })
            .unwrap_err();
        assert_eq!(calls, 1);
        assert!(matches!(err, QdlError::Directive { partition: 0, .. }));
    }

    #[test]
    fn test_wrong_root_and_missing_value() {
        let doc = Document::parse_str("<data/>", Path::new("p.xml")).unwrap();
        assert!(PatchList::new().load_document(&doc).is_err());

        let doc = Document::parse_str(
            r#"<patches><patch SECTOR_SIZE_IN_BYTES="512" byte_offset="0" filename="DISK"
                 physical_partition_number="0" size_in_bytes="4" start_sector="0"/></patches>"#,
            Path::new("p.xml"),
        )
        .unwrap();
        match PatchList::new().load_document(&doc) {
            Err(ScriptError::MissingAttribute { attribute, .. }) => assert_eq!(attribute, "value"),
            other => panic!("unexpected {:?}", other),
        }
    }
}
