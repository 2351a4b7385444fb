//! Programmer (second stage loader) image served over Sahara.
//!
//! The device pulls the image piecewise with READ_DATA requests. Requests
//! must stay inside the image and must not revisit bytes already served.

use std::ops::Range;
use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum LoaderImageError {
    #[error("Failed to read loader {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Loader {} is empty", path.display())]
    Empty { path: PathBuf },
    #[error("Request for {length} bytes at offset {offset} exceeds image size {size}")]
    OutOfRange { offset: u64, length: u64, size: u64 },
    #[error("Request for 0 bytes at offset {offset}")]
    EmptyRequest { offset: u64 },
    #[error("Request {offset}+{length} overlaps already served range {served:?}")]
    Overlap {
        offset: u64,
        length: u64,
        served: Range<u64>,
    },
}

/// Loader image held in memory.
#[derive(Debug, Clone)]
pub struct LoaderImage {
    path: PathBuf,
    data: Vec<u8>,
}

impl LoaderImage {
    pub fn load(path: &Path) -> Result<Self, LoaderImageError> {
        let data = std::fs::read(path).map_err(|source| LoaderImageError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        if data.is_empty() {
            return Err(LoaderImageError::Empty {
                path: path.to_path_buf(),
            });
        }
        Ok(Self {
            path: path.to_path_buf(),
            data,
        })
    }

    pub fn from_bytes(data: Vec<u8>) -> Self {
        Self {
            path: PathBuf::from("<memory>"),
            data,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Bytes `offset..offset + length`, which must lie inside the image.
    pub fn slice(&self, offset: u64, length: u64) -> Result<&[u8], LoaderImageError> {
        if length == 0 {
            return Err(LoaderImageError::EmptyRequest { offset });
        }
        let size = self.len();
        let end = offset
            .checked_add(length)
            .filter(|end| *end <= size)
            .ok_or(LoaderImageError::OutOfRange {
                offset,
                length,
                size,
            })?;
        Ok(&self.data[offset as usize..end as usize])
    }
}

/// Ranges of the image already sent to the device.
#[derive(Debug, Default, Clone)]
pub struct ServedRanges {
    ranges: Vec<Range<u64>>,
}

impl ServedRanges {
    /// Record `offset..offset + length`, rejecting any overlap.
    pub fn claim(&mut self, offset: u64, length: u64) -> Result<(), LoaderImageError> {
        let end = offset.saturating_add(length);
        if let Some(served) = self
            .ranges
            .iter()
            .find(|r| offset < r.end && r.start < end)
        {
            return Err(LoaderImageError::Overlap {
                offset,
                length,
                served: served.clone(),
            });
        }
        self.ranges.push(offset..end);
        Ok(())
    }

    pub fn total(&self) -> u64 {
        self.ranges.iter().map(|r| r.end - r.start).sum()
    }

    pub fn clear(&mut self) {
        self.ranges.clear();
    }
}
