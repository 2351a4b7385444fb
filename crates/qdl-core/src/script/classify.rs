//! Script type detection from the root element.

use std::fmt;
use std::path::Path;

use super::ScriptError;
use super::xml::Document;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    Unknown,
    Patch,
    Program,
    Ufs,
    Contents,
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileType::Unknown => write!(f, "unknown"),
            FileType::Patch => write!(f, "patch"),
            FileType::Program => write!(f, "program"),
            FileType::Ufs => write!(f, "ufs"),
            FileType::Contents => write!(f, "contents"),
        }
    }
}

/// Classify the script at `path`.
///
/// A document that fails to parse is an error; a well formed document of an
/// unrecognized shape is `Ok(FileType::Unknown)`.
pub fn classify(path: &Path) -> Result<FileType, ScriptError> {
    Ok(classify_document(&Document::load(path)?))
}

pub fn classify_document(doc: &Document) -> FileType {
    match doc.root.as_str() {
        "patches" => FileType::Patch,
        "contents" => FileType::Contents,
        // First recognized child wins.
        "data" => doc
            .children
            .iter()
            .find_map(|child| match child.name.as_str() {
                "program" => Some(FileType::Program),
                "ufs" => Some(FileType::Ufs),
                _ => None,
            })
            .unwrap_or(FileType::Unknown),
        _ => FileType::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn classify_text(text: &str) -> Result<FileType, ScriptError> {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("script.xml");
        fs::write(&path, text).unwrap();
        classify(&path)
    }

    #[test]
    fn test_root_names() {
        assert_eq!(classify_text("<patches/>").unwrap(), FileType::Patch);
        assert_eq!(
            classify_text("<contents><product_info/></contents>").unwrap(),
            FileType::Contents
        );
        assert_eq!(classify_text("<other/>").unwrap(), FileType::Unknown);
    }

    #[test]
    fn test_data_without_known_child_is_unknown() {
        assert_eq!(
            classify_text("<data><read/><erase/></data>").unwrap(),
            FileType::Unknown
        );
        assert_eq!(classify_text("<data/>").unwrap(), FileType::Unknown);
    }

    #[test]
    fn test_first_match_wins() {
        assert_eq!(
            classify_text("<data><ufs/><program/></data>").unwrap(),
            FileType::Ufs
        );
        assert_eq!(
            classify_text("<data><program/><ufs/></data>").unwrap(),
            FileType::Program
        );
        assert_eq!(
            classify_text("<data><erase/><program/></data>").unwrap(),
            FileType::Program
        );
    }

    #[test]
    fn test_only_immediate_children_count() {
        assert_eq!(
            classify_text("<data><group><program/></group></data>").unwrap(),
            FileType::Unknown
        );
    }

    #[test]
    fn test_parse_failure_is_error() {
        assert!(matches!(
            classify_text("<data><program></data>"),
            Err(ScriptError::Parse { .. })
        ));
        let missing = Path::new("/nonexistent/definitely/missing.xml");
        assert!(matches!(classify(missing), Err(ScriptError::Io { .. })));
    }

    #[test]
    fn test_idempotent() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("rawprogram0.xml");
        fs::write(&path, "<data><program/></data>").unwrap();
        let first = classify(&path).unwrap();
        for _ in 0..3 {
            assert_eq!(classify(&path).unwrap(), first);
        }
    }
}
