//! Chunk tracking for streamed transfers.

/// Chunk tracking state for stateful sending.
///
/// Lengths only; the caller owns the data source (a loader image in memory
/// or a file read chunk by chunk).
#[derive(Debug, Default, Clone)]
pub struct ChunkState {
    /// Current chunk index.
    pub current: usize,
    /// Total number of chunks.
    pub total: usize,
    /// Current byte offset.
    pub offset: u64,
    /// Size of each chunk.
    pub chunk_size: usize,
    /// Total data size.
    pub data_size: u64,
}

impl ChunkState {
    pub fn new(data_size: u64, chunk_size: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        let total = if data_size == 0 {
            0
        } else {
            data_size.div_ceil(chunk_size as u64) as usize
        };
        Self {
            current: 0,
            total,
            offset: 0,
            chunk_size,
            data_size,
        }
    }

    /// Chunks of whole sectors no larger than `max_payload`.
    ///
    /// A payload limit below one sector still moves one sector at a time.
    pub fn for_sectors(data_size: u64, max_payload: usize, sector_size: usize) -> Self {
        let sector_size = sector_size.max(1);
        let sectors_per_chunk = (max_payload / sector_size).max(1);
        Self::new(data_size, sectors_per_chunk * sector_size)
    }

    /// Length of the next chunk, advancing state.
    pub fn next_len(&mut self) -> Option<usize> {
        if self.offset >= self.data_size {
            return None;
        }
        let remaining = self.data_size - self.offset;
        let len = remaining.min(self.chunk_size as u64) as usize;
        self.offset += len as u64;
        self.current += 1;
        Some(len)
    }

    /// Check if done.
    pub fn is_done(&self) -> bool {
        self.current >= self.total
    }

    /// Progress as percentage.
    pub fn progress_pct(&self) -> u8 {
        if self.total == 0 {
            100
        } else {
            ((self.current * 100) / self.total) as u8
        }
    }
}
