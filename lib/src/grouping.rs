//! Regrouping of an unordered statement stream by subject.
//!
//! Every strategy implements [`SubjectGrouper`]: raw lines go in, in any
//! order, and a stream of [`SubjectRecord`]s comes out with exactly one
//! record per subject, in ascending key order. The sort-merge key is the raw
//! subject token, the other strategies key on the resolved subject.
//!
//! The external sort-merge is the default. The store-backed strategy is
//! resumable, and the bucketed one spreads accumulation over worker threads.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{sync_channel, SyncSender};
use std::sync::Arc;
use std::thread::JoinHandle;

use anyhow::{anyhow, Context, Result};
use log::{debug, info, warn};
use runsort::{ExternalSorter, KWayMerge, Record, SorterOptions};
use serde::Serialize;
use tempfile::TempDir;

use crate::deprecation::DeprecatedNodeSet;
use crate::options::OnUnresolvable;
use crate::record::{Predicate, StoredRecord, SubjectAccumulator, SubjectRecord};
use crate::store::{KvStore, LogStore};
use crate::triple::{subject_key, StatementError, Triple};

/// Ordered output of a grouper.
pub type Records = Box<dyn Iterator<Item = Result<SubjectRecord>>>;

/// Counters shared by every parser of one run, possibly across threads.
#[derive(Debug, Default)]
pub struct ParseCounters {
    pub parse_failures: AtomicU64,
    pub unresolvable_skipped: AtomicU64,
    pub ignored: AtomicU64,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ParseCounts {
    pub parse_failures: u64,
    pub unresolvable_skipped: u64,
    pub ignored: u64,
}

impl ParseCounters {
    pub fn snapshot(&self) -> ParseCounts {
        ParseCounts {
            parse_failures: self.parse_failures.load(Ordering::Relaxed),
            unresolvable_skipped: self.unresolvable_skipped.load(Ordering::Relaxed),
            ignored: self.ignored.load(Ordering::Relaxed),
        }
    }
}

/// Parses lines under the run's unresolvable-value policy.
#[derive(Debug, Clone)]
pub struct LineParser {
    policy: OnUnresolvable,
    counters: Arc<ParseCounters>,
}

impl LineParser {
    pub fn new(policy: OnUnresolvable) -> Self {
        LineParser {
            policy,
            counters: Arc::new(ParseCounters::default()),
        }
    }

    pub fn counts(&self) -> ParseCounts {
        self.counters.snapshot()
    }

    pub fn malformed(&self) {
        self.counters.parse_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn ignored(&self) {
        self.counters.ignored.fetch_add(1, Ordering::Relaxed);
    }

    /// `Ok(None)` for lines that are skipped and counted; `Err` only when an
    /// unresolvable value is fatal.
    pub fn parse(&self, line: &str) -> Result<Option<Triple>> {
        match Triple::parse(line) {
            Ok(triple) => Ok(Some(triple)),
            Err(StatementError::Malformed(e)) => {
                debug!("{}", e);
                self.malformed();
                Ok(None)
            }
            Err(StatementError::Unresolvable(e)) => {
                if self.policy.is_fail() {
                    return Err(e.into());
                }
                warn!("Skipping statement: {}", e);
                self.counters
                    .unresolvable_skipped
                    .fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
        }
    }

    /// Like [`LineParser::parse`], but statements that cannot contribute to a
    /// record (unrecognized predicate, no usable object) are counted as
    /// ignored and dropped as well.
    pub fn parse_recognized(&self, line: &str) -> Result<Option<Triple>> {
        match self.parse(line)? {
            Some(triple)
                if triple.object.is_some() && Predicate::from_iri(&triple.predicate).is_some() =>
            {
                Ok(Some(triple))
            }
            Some(_) => {
                self.ignored();
                Ok(None)
            }
            None => Ok(None),
        }
    }
}

/// Given an unordered stream of statement lines, produce subject-ordered records.
pub trait SubjectGrouper {
    /// Offer one raw line. `position` counts the input lines consumed so far,
    /// this one included.
    fn ingest(&mut self, line: &str, position: u64) -> Result<()>;

    /// Input is exhausted after `lines_read` lines. Strategies holding
    /// records the caller never saw parsed add their deprecated nodes here.
    fn finish_ingest(&mut self, lines_read: u64, deprecated: &mut DeprecatedNodeSet) -> Result<()>;

    fn into_records(self: Box<Self>) -> Result<Records>;

    /// Temporary chunk files written, for strategies that spill.
    fn chunks_written(&self) -> usize {
        0
    }
}

/// External sort of raw lines by subject key, then single-pass accumulation
/// over the merged stream.
pub struct SortMergeGrouper {
    sorter: ExternalSorter,
    parser: LineParser,
}

impl SortMergeGrouper {
    pub fn new(options: SorterOptions, parser: LineParser) -> Result<Self> {
        Ok(SortMergeGrouper {
            sorter: ExternalSorter::new(options)?,
            parser,
        })
    }
}

impl SubjectGrouper for SortMergeGrouper {
    fn ingest(&mut self, line: &str, _position: u64) -> Result<()> {
        let line = line.trim_end_matches(['\n', '\r']);
        let Some(key) = subject_key(line) else {
            self.parser.malformed();
            return Ok(());
        };
        let record = Record::new(line.to_string(), key.len())?;
        if let Some(chunk) = self.sorter.push(record)? {
            debug!(
                "Spilled chunk {} ({} lines, {} bytes)",
                chunk.path.display(),
                chunk.records,
                chunk.bytes
            );
        }
        Ok(())
    }

    fn finish_ingest(&mut self, _lines_read: u64, _deprecated: &mut DeprecatedNodeSet) -> Result<()> {
        Ok(())
    }

    fn into_records(self: Box<Self>) -> Result<Records> {
        let merge: KWayMerge = self.sorter.finish()?;
        let parser = self.parser;
        let triples = merge.filter_map(move |record| match record {
            Ok(record) => parser.parse_recognized(record.line()).transpose(),
            Err(e) => Some(Err(e.into())),
        });
        Ok(Box::new(SubjectAccumulator::new(triples)))
    }

    /// Includes the final short run that `into_records` spills.
    fn chunks_written(&self) -> usize {
        let spilled: u64 = self.sorter.chunks().iter().map(|c| c.records).sum();
        self.sorter.chunks().len() + usize::from(self.sorter.pushed() > spilled)
    }
}

/// Streaming accumulation into a durable store.
///
/// Records touched since the last checkpoint are held in a write-back cache;
/// every `checkpoint_every` lines they are written to the store together with
/// the input position, so an interrupted run can resume from that position.
pub struct StoreGrouper {
    store: Box<dyn KvStore>,
    parser: LineParser,
    cache: HashMap<String, SubjectRecord>,
    checkpoint_every: u64,
    since_checkpoint: u64,
}

impl StoreGrouper {
    pub fn new(store: Box<dyn KvStore>, parser: LineParser, checkpoint_every: u64) -> Self {
        StoreGrouper {
            store,
            parser,
            cache: HashMap::new(),
            checkpoint_every: checkpoint_every.max(1),
            since_checkpoint: 0,
        }
    }

    fn load(&mut self, subject: &str) -> Result<SubjectRecord> {
        match self.store.get(subject.as_bytes())? {
            Some(bytes) => StoredRecord::decode(&bytes),
            None => Ok(SubjectRecord::new(subject)),
        }
    }

    fn checkpoint(&mut self, position: u64) -> Result<()> {
        let mut dirty: Vec<(String, SubjectRecord)> = self.cache.drain().collect();
        dirty.sort_by(|a, b| a.0.cmp(&b.0));
        for (subject, record) in &dirty {
            self.store.set(subject.as_bytes(), &StoredRecord::encode(record)?)?;
        }
        self.store.save_checkpoint(position)?;
        self.store.flush()?;
        debug!("Checkpoint at line {} ({} records written)", position, dirty.len());
        self.since_checkpoint = 0;
        Ok(())
    }

    /// Write out the cache and hand back the store.
    fn into_store(mut self, position: u64) -> Result<Box<dyn KvStore>> {
        self.checkpoint(position)?;
        Ok(self.store)
    }
}

impl SubjectGrouper for StoreGrouper {
    fn ingest(&mut self, line: &str, position: u64) -> Result<()> {
        if let Some(triple) = self.parser.parse_recognized(line)? {
            if !self.cache.contains_key(&triple.subject) {
                let record = self.load(&triple.subject)?;
                self.cache.insert(triple.subject.clone(), record);
            }
            if let Some(record) = self.cache.get_mut(&triple.subject) {
                record.add(&triple);
            }
        }
        self.since_checkpoint += 1;
        if self.since_checkpoint >= self.checkpoint_every {
            self.checkpoint(position)?;
        }
        Ok(())
    }

    fn finish_ingest(&mut self, lines_read: u64, deprecated: &mut DeprecatedNodeSet) -> Result<()> {
        self.checkpoint(lines_read)?;
        let keys = self.store.record_keys();
        for key in keys {
            if let Some(bytes) = self.store.get(&key)? {
                deprecated.observe_record(&StoredRecord::decode(&bytes)?);
            }
        }
        info!("Store holds {} records", self.store.record_keys().len());
        Ok(())
    }

    fn into_records(self: Box<Self>) -> Result<Records> {
        let keys = self.store.record_keys().into_iter();
        Ok(Box::new(StoreRecords {
            store: self.store,
            keys,
        }))
    }
}

struct StoreRecords {
    store: Box<dyn KvStore>,
    keys: std::vec::IntoIter<Vec<u8>>,
}

impl Iterator for StoreRecords {
    type Item = Result<SubjectRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let key = self.keys.next()?;
            match self.store.get(&key) {
                Ok(Some(bytes)) => return Some(StoredRecord::decode(&bytes)),
                Ok(None) => continue,
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

const BUCKET_BATCH: usize = 10_000;
const BUCKET_QUEUE: usize = 4;

type BucketResult = Result<Box<dyn KvStore>>;

/// `blake3(subject key) mod B` partitioning onto one worker thread per
/// bucket. Every subject lands in exactly one bucket, so each worker owns an
/// isolated [`LogStore`] in a per-run temporary directory, accumulated through
/// the same write-back cache as [`StoreGrouper`]. After all workers join, the
/// stores are heap-merged by key on a single thread.
pub struct BucketedGrouper {
    senders: Vec<SyncSender<Vec<String>>>,
    pending: Vec<Vec<String>>,
    workers: Vec<JoinHandle<BucketResult>>,
    stores: Vec<Box<dyn KvStore>>,
    dir: TempDir,
    parser: LineParser,
}

pub fn bucket_of(key: &str, buckets: usize) -> usize {
    let hash = blake3::hash(key.as_bytes());
    let mut head = [0u8; 8];
    head.copy_from_slice(&hash.as_bytes()[..8]);
    (u64::from_le_bytes(head) % buckets as u64) as usize
}

impl BucketedGrouper {
    /// `flush_every` bounds each worker's cache, in lines.
    pub fn new(
        buckets: usize,
        temp_dir: Option<&Path>,
        flush_every: u64,
        parser: LineParser,
    ) -> Result<Self> {
        if buckets == 0 {
            return Err(anyhow!("Bucket count must be at least 1"));
        }
        let mut builder = tempfile::Builder::new();
        builder.prefix("authdocs-buckets-");
        let dir = match temp_dir {
            Some(parent) => builder.tempdir_in(parent),
            None => builder.tempdir(),
        }
        .context("Failed to create bucket store directory")?;

        let mut senders = Vec::with_capacity(buckets);
        let mut workers = Vec::with_capacity(buckets);
        for bucket in 0..buckets {
            let (tx, rx) = sync_channel::<Vec<String>>(BUCKET_QUEUE);
            let parser = parser.clone();
            let path = dir.path().join(format!("bucket-{}.log", bucket));
            let handle = std::thread::Builder::new()
                .name(format!("bucket-{}", bucket))
                .spawn(move || -> BucketResult {
                    let store = LogStore::open(&path)?;
                    let mut grouper = StoreGrouper::new(Box::new(store), parser, flush_every);
                    let mut position = 0u64;
                    for batch in rx {
                        for line in batch {
                            position += 1;
                            grouper.ingest(&line, position)?;
                        }
                    }
                    grouper.into_store(position)
                })?;
            senders.push(tx);
            workers.push(handle);
        }
        debug!("Started {} bucket workers in {}", buckets, dir.path().display());
        Ok(BucketedGrouper {
            senders,
            pending: vec![Vec::new(); buckets],
            workers,
            stores: Vec::new(),
            dir,
            parser,
        })
    }

    fn send(&mut self, bucket: usize) -> Result<()> {
        let batch = std::mem::take(&mut self.pending[bucket]);
        if batch.is_empty() {
            return Ok(());
        }
        // a closed channel means the worker stopped early; its error surfaces on join
        if self.senders[bucket].send(batch).is_err() {
            self.join()?;
            return Err(anyhow!("Bucket worker {} stopped", bucket));
        }
        Ok(())
    }

    fn join(&mut self) -> Result<()> {
        self.senders.clear();
        let workers = std::mem::take(&mut self.workers);
        for (bucket, handle) in workers.into_iter().enumerate() {
            let store = handle
                .join()
                .map_err(|_| anyhow!("Bucket worker {} panicked", bucket))??;
            self.stores.push(store);
        }
        Ok(())
    }
}

impl SubjectGrouper for BucketedGrouper {
    fn ingest(&mut self, line: &str, _position: u64) -> Result<()> {
        let Some(key) = subject_key(line) else {
            self.parser.malformed();
            return Ok(());
        };
        let bucket = bucket_of(key, self.pending.len());
        self.pending[bucket].push(line.to_string());
        if self.pending[bucket].len() >= BUCKET_BATCH {
            self.send(bucket)?;
        }
        Ok(())
    }

    fn finish_ingest(&mut self, _lines_read: u64, _deprecated: &mut DeprecatedNodeSet) -> Result<()> {
        for bucket in 0..self.pending.len() {
            self.send(bucket)?;
        }
        self.join()?;
        debug!(
            "Bucket sizes: {:?}",
            self.stores
                .iter()
                .map(|s| s.record_keys().len())
                .collect::<Vec<_>>()
        );
        Ok(())
    }

    fn into_records(self: Box<Self>) -> Result<Records> {
        let this = *self;
        if !this.workers.is_empty() {
            return Err(anyhow!("Bucket workers have not been joined"));
        }
        let sources = this
            .stores
            .into_iter()
            .map(|store| {
                let keys = store.record_keys().into_iter();
                StoreRecords { store, keys }
            })
            .collect();
        Ok(Box::new(BucketMerge::new(sources, this.dir)?))
    }
}

/// Heap merge of the per-bucket stores. Equal subjects (possible only when
/// two raw tokens resolve to the same value) are folded into one record.
struct BucketMerge {
    sources: Vec<StoreRecords>,
    heap: BinaryHeap<Reverse<(String, usize)>>,
    heads: Vec<Option<SubjectRecord>>,
    failed: bool,
    // removed once the merge is dropped
    _dir: TempDir,
}

impl BucketMerge {
    fn new(sources: Vec<StoreRecords>, dir: TempDir) -> Result<Self> {
        let mut merge = BucketMerge {
            heads: sources.iter().map(|_| None).collect(),
            sources,
            heap: BinaryHeap::new(),
            failed: false,
            _dir: dir,
        };
        for source in 0..merge.sources.len() {
            merge.advance(source)?;
        }
        Ok(merge)
    }

    fn advance(&mut self, source: usize) -> Result<()> {
        if let Some(record) = self.sources[source].next().transpose()? {
            self.heap.push(Reverse((record.subject().to_string(), source)));
            self.heads[source] = Some(record);
        }
        Ok(())
    }

    fn pop(&mut self) -> Result<Option<SubjectRecord>> {
        let Some(Reverse((_, source))) = self.heap.pop() else {
            return Ok(None);
        };
        let record = self.heads[source].take();
        self.advance(source)?;
        Ok(record)
    }

    fn next_record(&mut self) -> Result<Option<SubjectRecord>> {
        let Some(mut record) = self.pop()? else {
            return Ok(None);
        };
        while matches!(self.heap.peek(), Some(Reverse((next, _))) if next.as_str() == record.subject())
        {
            if let Some(more) = self.pop()? {
                record.merge(more);
            }
        }
        Ok(Some(record))
    }
}

impl Iterator for BucketMerge {
    type Item = Result<SubjectRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        let next = self.next_record();
        self.failed = next.is_err();
        next.transpose()
    }
}
