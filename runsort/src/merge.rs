//! K-way merge of sorted chunk files into one key-ordered stream.
//!
//! A min-heap holds the current head record of every open chunk. Popping the
//! minimum emits it and advances that chunk; exhausted chunks are closed and
//! deleted immediately. Heads with equal keys are ordered by chunk index, so
//! records sharing a key keep the order in which they were spilled.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

use tempfile::TempDir;

use crate::chunk::{ChunkReader, Record};
use crate::Result;

struct HeapEntry {
    record: Record,
    source: usize,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.record.key() == other.record.key() && self.source == other.source
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.record
            .key()
            .as_bytes()
            .cmp(other.record.key().as_bytes())
            .then_with(|| self.source.cmp(&other.source))
    }
}

/// Globally key-ordered iterator over a set of sorted chunks.
///
/// Owns the scratch directory the chunks were spilled into (if any); dropping
/// the merge, whether exhausted or not, removes every remaining chunk.
pub struct KWayMerge {
    sources: Vec<Option<ChunkReader>>,
    heap: BinaryHeap<Reverse<HeapEntry>>,
    emitted: u64,
    failed: bool,
    _scratch: Option<TempDir>,
}

impl std::fmt::Debug for KWayMerge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KWayMerge")
            .field("open_sources", &self.open_sources())
            .field("emitted", &self.emitted)
            .finish()
    }
}

impl KWayMerge {
    /// Seed the heap with the first record of every chunk.
    pub fn new(readers: Vec<ChunkReader>) -> Result<Self> {
        Self::with_scratch(readers, None)
    }

    pub(crate) fn with_scratch(readers: Vec<ChunkReader>, scratch: Option<TempDir>) -> Result<Self> {
        let mut merge = KWayMerge {
            sources: readers.into_iter().map(Some).collect(),
            heap: BinaryHeap::new(),
            emitted: 0,
            failed: false,
            _scratch: scratch,
        };
        for source in 0..merge.sources.len() {
            merge.advance(source)?;
        }
        Ok(merge)
    }

    /// Number of chunks that still have unread records.
    pub fn open_sources(&self) -> usize {
        self.sources.iter().filter(|s| s.is_some()).count()
    }

    /// Number of records emitted so far.
    pub fn emitted(&self) -> u64 {
        self.emitted
    }

    fn advance(&mut self, source: usize) -> Result<()> {
        let Some(reader) = self.sources[source].as_mut() else {
            return Ok(());
        };
        match reader.next_record()? {
            Some(record) => self.heap.push(Reverse(HeapEntry { record, source })),
            None => {
                if let Some(reader) = self.sources[source].take() {
                    reader.remove()?;
                }
            }
        }
        Ok(())
    }

    fn next_record(&mut self) -> Result<Option<Record>> {
        let Some(Reverse(entry)) = self.heap.pop() else {
            return Ok(None);
        };
        self.advance(entry.source)?;
        self.emitted += 1;
        Ok(Some(entry.record))
    }
}

impl Iterator for KWayMerge {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        let next = self.next_record();
        if next.is_err() {
            self.failed = true;
        }
        next.transpose()
    }
}
