//! Defines the conversion pipeline and the maintenance operations around it.
//! A run reads a statement dump, regroups it by subject with the configured
//! strategy and writes one JSON document per accepted subject.

use crate::config::Config;
use crate::consts::{PROGRESS_EVERY, RECORD_STATUS};
use crate::deprecation::DeprecatedNodeSet;
use crate::grouping::{
    BucketedGrouper, LineParser, SortMergeGrouper, StoreGrouper, SubjectGrouper,
};
use crate::options::{OutputMode, Strategy};
use crate::output::DocumentWriter;
use crate::project::Projector;
use crate::record::Predicate;
use crate::store::{prune_deprecated, KvStore, LogStore, StoreStats};
use crate::triple::{is_ignorable, predicate_iri, Triple};
use crate::util::{create_file, finish_file, open_source, read_line, LineRead};
use crate::vocabulary::{Vocabularies, VocabularyDescriptor};
use anyhow::Result;
use chrono::prelude::*;
use log::{debug, info, warn};
use runsort::SorterOptions;
use serde::Serialize;
use std::collections::BTreeMap;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};

/// Initializes logging for the authdocs library.
///
/// This function checks for the `AUTHDOCS_LOG` environment variable. If it is set,
/// `RUST_LOG` is set to its value. `AUTHDOCS_LOG` takes precedence over `RUST_LOG`.
/// The logger initialization (e.g., `env_logger::init()`) must be called after
/// this function for the log level to take effect.
pub fn init_logging() {
    if let Ok(log_level) = std::env::var("AUTHDOCS_LOG") {
        std::env::set_var("RUST_LOG", log_level);
    }
}

/// Where an interrupted run picks up: the number of input lines already
/// accumulated and the store they were accumulated into.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Checkpoint {
    pub source_offset: u64,
    pub store: Option<PathBuf>,
}

impl Checkpoint {
    pub fn new(source_offset: u64, store: Option<PathBuf>) -> Self {
        Checkpoint {
            source_offset,
            store,
        }
    }

    /// Read the position saved in an existing store. A store without a
    /// checkpoint (or no store file at all) resumes from the beginning.
    pub fn resume_from_store(path: &Path) -> Result<Self> {
        let source_offset = if path.exists() {
            let mut store = LogStore::open(path)?;
            store.checkpoint()?.map_or(0, |c| c.source_offset)
        } else {
            0
        };
        Ok(Checkpoint::new(source_offset, Some(path.to_path_buf())))
    }
}

/// Counters of one run.
#[derive(Debug, Clone, Serialize)]
pub struct RunStats {
    pub vocabulary: String,
    pub strategy: Strategy,
    pub source: PathBuf,
    pub output: Option<PathBuf>,
    pub lines_read: u64,
    /// Lines skipped because an earlier run already accumulated them.
    pub lines_resumed: u64,
    pub parse_failures: u64,
    pub unresolvable_skipped: u64,
    /// Statements with an unrecognized predicate or no usable object.
    pub statements_ignored: u64,
    pub chunks_written: usize,
    pub subjects: u64,
    pub documents_written: u64,
    pub deprecated_nodes: usize,
    pub rejections: BTreeMap<String, u64>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl RunStats {
    fn new(config: &Config) -> Self {
        RunStats {
            vocabulary: config.vocabulary.clone(),
            strategy: config.strategy,
            source: config.source.clone(),
            output: None,
            lines_read: 0,
            lines_resumed: 0,
            parse_failures: 0,
            unresolvable_skipped: 0,
            statements_ignored: 0,
            chunks_written: 0,
            subjects: 0,
            documents_written: 0,
            deprecated_nodes: 0,
            rejections: BTreeMap::new(),
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn rejected(&self) -> u64 {
        self.rejections.values().sum()
    }

    pub fn print(&self) {
        println!("Conversion of {} ({})", self.source.display(), self.vocabulary);
        if let Some(output) = &self.output {
            println!("  Output: {}", output.display());
        }
        println!("  Strategy: {}", self.strategy);
        println!("  Lines read: {}", self.lines_read);
        if self.lines_resumed > 0 {
            println!("  Lines resumed: {}", self.lines_resumed);
        }
        println!("  Parse failures: {}", self.parse_failures);
        if self.unresolvable_skipped > 0 {
            println!("  Unresolvable values skipped: {}", self.unresolvable_skipped);
        }
        println!("  Statements ignored: {}", self.statements_ignored);
        if self.chunks_written > 0 {
            println!("  Chunks written: {}", self.chunks_written);
        }
        println!("  Subjects: {}", self.subjects);
        println!("  Deprecated nodes: {}", self.deprecated_nodes);
        println!("  Documents written: {}", self.documents_written);
        println!("  Rejected: {}", self.rejected());
        for (rule, count) in &self.rejections {
            println!("    - {}: {}", rule, count);
        }
        if let Some(finished) = self.finished_at {
            let elapsed = finished - self.started_at;
            println!("  Elapsed: {:.1}s", elapsed.num_milliseconds() as f64 / 1000.0);
        }
    }
}

/// State threaded through the stages of one run; created when the run
/// starts and turned into its [`RunStats`] when it ends.
pub struct PipelineContext {
    pub parser: LineParser,
    pub deprecated: DeprecatedNodeSet,
    pub stats: RunStats,
}

impl PipelineContext {
    fn new(config: &Config) -> Self {
        PipelineContext {
            parser: LineParser::new(config.on_unresolvable),
            deprecated: DeprecatedNodeSet::new(),
            stats: RunStats::new(config),
        }
    }

    fn finish(mut self) -> RunStats {
        let counts = self.parser.counts();
        self.stats.parse_failures = counts.parse_failures;
        self.stats.unresolvable_skipped = counts.unresolvable_skipped;
        self.stats.statements_ignored = counts.ignored;
        self.stats.deprecated_nodes = self.deprecated.len();
        self.stats.finished_at = Some(Utc::now());
        self.stats
    }
}

pub struct Pipeline {
    config: Config,
    checkpoint: Checkpoint,
    vocabulary: VocabularyDescriptor,
    output_mode: OutputMode,
}

impl Pipeline {
    /// Validate the configuration and resolve the vocabulary up front, so a
    /// bad code fails before any input is read.
    pub fn new(config: Config, checkpoint: Checkpoint) -> Result<Self> {
        config.validate()?;
        if config.strategy == Strategy::Store
            && checkpoint.store.is_none()
            && config.store.is_none()
        {
            return Err(anyhow::anyhow!("The store strategy needs a store path"));
        }
        let vocabularies = match &config.vocabularies {
            Some(path) => Vocabularies::from_file(path)?,
            None => Vocabularies::builtin(),
        };
        let vocabulary = vocabularies.get(&config.vocabulary)?.clone();
        if checkpoint.source_offset > 0 && config.strategy != Strategy::Store {
            warn!(
                "Skipping {} lines without an accumulation store; their statements are lost",
                checkpoint.source_offset
            );
        }
        Ok(Pipeline {
            config,
            checkpoint,
            vocabulary,
            output_mode: OutputMode::Truncate,
        })
    }

    pub fn with_output_mode(mut self, mode: OutputMode) -> Self {
        self.output_mode = mode;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn vocabulary(&self) -> &VocabularyDescriptor {
        &self.vocabulary
    }

    fn store_path(&self) -> Option<&Path> {
        self.checkpoint
            .store
            .as_deref()
            .or(self.config.store.as_deref())
    }

    fn grouper(&self, parser: LineParser) -> Result<Box<dyn SubjectGrouper>> {
        Ok(match self.config.strategy {
            Strategy::SortMerge => {
                let options = SorterOptions {
                    capacity: self.config.chunk_capacity,
                    compress: self.config.compress_chunks.is_enabled(),
                    temp_dir: self.config.temp_dir.clone(),
                };
                Box::new(SortMergeGrouper::new(options, parser)?)
            }
            Strategy::Store => {
                let path = self
                    .store_path()
                    .ok_or_else(|| anyhow::anyhow!("The store strategy needs a store path"))?;
                let store = LogStore::open(path)?.with_compact_ratio(self.config.compact_ratio);
                info!("Accumulating into store {}", path.display());
                Box::new(StoreGrouper::new(
                    Box::new(store),
                    parser,
                    self.config.checkpoint_every,
                ))
            }
            Strategy::Bucketed => Box::new(BucketedGrouper::new(
                self.config.buckets,
                self.config.temp_dir.as_deref(),
                self.config.checkpoint_every,
                parser,
            )?),
        })
    }

    /// Run against the configured source and output files.
    pub fn run(&self) -> Result<RunStats> {
        let output = self.config.output_path();
        let input = open_source(&self.config.source)?;
        let mut writer = DocumentWriter::create(&output, self.output_mode)?;
        let mut stats = self.run_with(input, &mut writer)?;
        writer.finish()?;
        stats.output = Some(output);
        Ok(stats)
    }

    /// Run against any line source and document sink.
    pub fn run_with<R: BufRead, W: Write>(
        &self,
        mut input: R,
        out: &mut DocumentWriter<W>,
    ) -> Result<RunStats> {
        let mut ctx = PipelineContext::new(&self.config);
        let mut grouper = self.grouper(ctx.parser.clone())?;
        let source = self.config.source.clone();

        let skip = self.checkpoint.source_offset;
        let mut line = String::new();
        let mut position: u64 = 0;
        loop {
            let read = read_line(&mut input, &mut line, &source)?;
            if read == LineRead::End {
                break;
            }
            position += 1;
            if position <= skip {
                ctx.stats.lines_resumed += 1;
                continue;
            }
            ctx.stats.lines_read += 1;
            if position % PROGRESS_EVERY == 0 {
                info!("Read {} lines", position);
            }
            if read == LineRead::NotUtf8 {
                debug!("Line {} is not valid UTF-8: {}", position, line.trim_end());
                ctx.parser.malformed();
                continue;
            }
            if is_ignorable(&line) {
                continue;
            }
            if let Some(predicate) = predicate_iri(&line) {
                if Predicate::from_iri(predicate).is_none() {
                    ctx.parser.ignored();
                    continue;
                }
                if predicate == RECORD_STATUS {
                    if let Ok(triple) = Triple::parse(&line) {
                        ctx.deprecated.observe(&triple);
                    }
                }
            }
            grouper.ingest(&line, position)?;
        }
        grouper.finish_ingest(position, &mut ctx.deprecated)?;
        ctx.stats.chunks_written = grouper.chunks_written();
        info!(
            "Finished reading {} lines; {} deprecated nodes",
            position,
            ctx.deprecated.len()
        );

        let projector = Projector::new(&self.vocabulary, &ctx.deprecated);
        let mut rejections: BTreeMap<String, u64> = BTreeMap::new();
        let mut subjects = 0u64;
        for record in grouper.into_records()? {
            let record = record?;
            subjects += 1;
            match projector.project(&record) {
                Ok(document) => out.write(&document)?,
                Err(rejection) => {
                    debug!("Rejected {}: {}", record.subject(), rejection);
                    *rejections.entry(rejection.name().to_string()).or_default() += 1;
                }
            }
        }
        ctx.stats.subjects = subjects;
        ctx.stats.rejections = rejections;
        ctx.stats.documents_written = out.written();

        let stats = ctx.finish();
        info!(
            "Wrote {} documents for {} subjects ({} rejected)",
            stats.documents_written,
            stats.subjects,
            stats.rejected()
        );
        Ok(stats)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FilterStats {
    pub lines_read: u64,
    pub lines_kept: u64,
}

/// Copy only the statements whose predicate the projection reads. The
/// output is a smaller dump that converts to the same documents.
pub fn filter_statements(input: &Path, output: &Path) -> Result<FilterStats> {
    let mut reader = open_source(input)?;
    let mut writer = create_file(output)?;
    let mut stats = FilterStats::default();
    let mut line = String::new();
    loop {
        let read = read_line(reader.as_mut(), &mut line, input)?;
        if read == LineRead::End {
            break;
        }
        stats.lines_read += 1;
        let keep = read == LineRead::Line
            && predicate_iri(&line).map_or(false, |p| Predicate::from_iri(p).is_some());
        if keep {
            writer.write_all(line.as_bytes())?;
            if !line.ends_with('\n') {
                writer.write_all(b"\n")?;
            }
            stats.lines_kept += 1;
        }
        if stats.lines_read % PROGRESS_EVERY == 0 {
            info!("Filtered {} lines", stats.lines_read);
        }
    }
    finish_file(writer, output)?;
    Ok(stats)
}

/// Remove every record linked to a deprecated node from a store.
pub fn prune_store(path: &Path) -> Result<usize> {
    let mut store = LogStore::open(path)?;
    prune_deprecated(&mut store)
}

pub fn compact_store(path: &Path) -> Result<StoreStats> {
    let mut store = LogStore::open(path)?;
    store.compact()
}
