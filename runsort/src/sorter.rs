//! Buffer-and-spill front half of the external sort.

use std::path::PathBuf;

use tempfile::TempDir;

use crate::chunk::{ChunkInfo, ChunkReader, ChunkWriter, Record};
use crate::merge::KWayMerge;
use crate::{Result, SortError};

/// Options controlling spilling.
#[derive(Debug, Clone)]
pub struct SorterOptions {
    /// Records buffered in memory before a chunk is spilled.
    pub capacity: usize,
    /// Compress chunk bodies with zstd (requires the `zstd` feature).
    pub compress: bool,
    /// Parent directory for the scratch directory; the system temp dir if unset.
    pub temp_dir: Option<PathBuf>,
}

impl Default for SorterOptions {
    fn default() -> Self {
        SorterOptions {
            capacity: 1_000_000,
            compress: cfg!(feature = "zstd"),
            temp_dir: None,
        }
    }
}

/// Accepts records in any order and produces a key-ordered [`KWayMerge`].
pub struct ExternalSorter {
    buffer: Vec<Record>,
    capacity: usize,
    writer: ChunkWriter,
    scratch: TempDir,
    chunks: Vec<ChunkInfo>,
    pushed: u64,
}

impl std::fmt::Debug for ExternalSorter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExternalSorter")
            .field("buffered", &self.buffer.len())
            .field("capacity", &self.capacity)
            .field("chunks", &self.chunks.len())
            .field("scratch", &self.scratch.path())
            .finish()
    }
}

impl ExternalSorter {
    pub fn new(opts: SorterOptions) -> Result<Self> {
        if opts.capacity == 0 {
            return Err(SortError::Invalid("sorter capacity must be at least 1"));
        }
        let mut builder = tempfile::Builder::new();
        builder.prefix("runsort-");
        let scratch = match &opts.temp_dir {
            Some(dir) => builder.tempdir_in(dir)?,
            None => builder.tempdir()?,
        };
        Ok(ExternalSorter {
            buffer: Vec::with_capacity(opts.capacity.min(1 << 16)),
            capacity: opts.capacity,
            writer: ChunkWriter::new(opts.compress),
            scratch,
            chunks: Vec::new(),
            pushed: 0,
        })
    }

    /// Buffer one record, spilling a chunk first if the buffer is full.
    ///
    /// Returns the chunk written by this call, if any.
    pub fn push(&mut self, record: Record) -> Result<Option<&ChunkInfo>> {
        let spilled = if self.buffer.len() >= self.capacity {
            self.spill()?;
            true
        } else {
            false
        };
        self.buffer.push(record);
        self.pushed += 1;
        Ok(if spilled { self.chunks.last() } else { None })
    }

    /// Total records pushed so far.
    pub fn pushed(&self) -> u64 {
        self.pushed
    }

    /// Chunks written so far.
    pub fn chunks(&self) -> &[ChunkInfo] {
        &self.chunks
    }

    /// Directory holding the chunk files.
    pub fn scratch_dir(&self) -> &std::path::Path {
        self.scratch.path()
    }

    fn spill(&mut self) -> Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        // stable: equal keys keep push order
        self.buffer
            .sort_by(|a, b| a.key().as_bytes().cmp(b.key().as_bytes()));
        let path = self
            .scratch
            .path()
            .join(format!("chunk-{:05}.rsrt", self.chunks.len()));
        let info = self.writer.write_run(&path, &self.buffer)?;
        self.buffer.clear();
        self.chunks.push(info);
        Ok(())
    }

    /// Spill what is left (even a short final run) and open the merge.
    ///
    /// The returned merge owns the scratch directory.
    pub fn finish(mut self) -> Result<KWayMerge> {
        self.spill()?;
        let readers = self
            .chunks
            .iter()
            .map(|c| ChunkReader::open(&c.path))
            .collect::<Result<Vec<_>>>()?;
        KWayMerge::with_scratch(readers, Some(self.scratch))
    }
}
