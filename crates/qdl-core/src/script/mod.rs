//! Flashing scripts: classification, program/patch/UFS models and start
//! sector expressions.

pub mod classify;
pub mod patch;
pub mod program;
pub mod sector;
pub mod ufs;
pub mod xml;

use std::path::PathBuf;

use thiserror::Error;

pub use classify::{FileType, classify};
pub use patch::{Patch, PatchList};
pub use program::{Program, ProgramId, ProgramList};
pub use sector::{Geometry, SectorExprError, check_start_sector, resolve_start_sector};
pub use ufs::UfsPlan;

#[derive(Error, Debug)]
pub enum ScriptError {
    #[error("Failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {}: {message}", path.display())]
    Parse { path: PathBuf, message: String },

    #[error("{}: <{element}> is missing attribute {attribute}", path.display())]
    MissingAttribute {
        path: PathBuf,
        element: String,
        attribute: String,
    },

    #[error("{}: <{element}> attribute {attribute}={value:?} is not a non-negative integer", path.display())]
    InvalidNumber {
        path: PathBuf,
        element: String,
        attribute: String,
        value: String,
    },

    #[error("{}: <{element} label={label:?}> has an invalid start_sector: {source}", path.display())]
    InvalidStartSector {
        path: PathBuf,
        element: String,
        label: String,
        #[source]
        source: SectorExprError,
    },

    #[error("{}: <{element}> has an empty {attribute}", path.display())]
    EmptyAttribute {
        path: PathBuf,
        element: String,
        attribute: String,
    },

    #[error("{}: root <{root}> is not a {expected} script", path.display())]
    WrongRoot {
        path: PathBuf,
        root: String,
        expected: &'static str,
    },

    #[error("{}: {file_type} scripts are not supported", path.display())]
    UnsupportedScript { path: PathBuf, file_type: FileType },

    #[error("{}: only one UFS provisioning script may be given", path.display())]
    DuplicateProvisioning { path: PathBuf },

    #[error("No directive carries a bootable label")]
    NoBootablePartition,

    #[error("Bootable labels found on partitions {first} and {second}")]
    AmbiguousBootablePartition { first: u32, second: u32 },
}
