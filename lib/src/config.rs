//! Defines the configuration of a conversion run.
//! A `Config` is built with `Config::builder()`, or read from a JSON file.

use crate::options::{Compression, OnUnresolvable, Strategy};
use crate::util::default_output_path;
use anyhow::{anyhow, Context, Result};
use derive_builder::Builder;
use serde::{Deserialize, Serialize};
use std::io::{BufReader, Write};
use std::path::{Path, PathBuf};

use crate::errors::FileError;
use crate::store::DEFAULT_COMPACT_RATIO;

fn default_buckets() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Builder)]
#[builder(pattern = "owned", setter(into), default)]
#[serde(default)]
pub struct Config {
    // authority code of the vocabulary being converted
    pub vocabulary: String,
    pub source: PathBuf,
    // defaults to <source dir>/<source stem>.json
    #[builder(setter(into, strip_option))]
    pub output: Option<PathBuf>,
    // lines held in memory before a sorted chunk is spilled
    pub chunk_capacity: usize,
    #[builder(setter(into, strip_option))]
    pub temp_dir: Option<PathBuf>,
    pub compress_chunks: Compression,
    pub on_unresolvable: OnUnresolvable,
    pub strategy: Strategy,
    // worker threads for the bucketed strategy
    pub buckets: usize,
    // accumulation store for the store strategy
    #[builder(setter(into, strip_option))]
    pub store: Option<PathBuf>,
    pub checkpoint_every: u64,
    pub compact_ratio: f64,
    // replaces the built-in vocabulary table
    #[builder(setter(into, strip_option))]
    pub vocabularies: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            vocabulary: String::new(),
            source: PathBuf::new(),
            output: None,
            chunk_capacity: 1_000_000,
            temp_dir: None,
            compress_chunks: Compression::default(),
            on_unresolvable: OnUnresolvable::default(),
            strategy: Strategy::default(),
            buckets: default_buckets(),
            store: None,
            checkpoint_every: 100_000,
            compact_ratio: DEFAULT_COMPACT_RATIO,
            vocabularies: None,
        }
    }
}

impl Config {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Checks the settings that cannot be expressed by the types alone.
    pub fn validate(&self) -> Result<()> {
        if self.vocabulary.is_empty() {
            return Err(anyhow!("No vocabulary given"));
        }
        if self.source.as_os_str().is_empty() {
            return Err(anyhow!("No source file given"));
        }
        if self.chunk_capacity == 0 {
            return Err(anyhow!("Chunk capacity must be at least 1"));
        }
        if self.buckets == 0 {
            return Err(anyhow!("Bucket count must be at least 1"));
        }
        if !(self.compact_ratio > 0.0) {
            return Err(anyhow!("Compaction ratio must be positive"));
        }
        Ok(())
    }

    /// Where documents are written.
    pub fn output_path(&self) -> PathBuf {
        self.output
            .clone()
            .unwrap_or_else(|| default_output_path(&self.source))
    }

    pub fn save_to_file(&self, file: &Path) -> Result<()> {
        let config_str = serde_json::to_string_pretty(&self)?;
        let mut f = std::fs::File::create(file).with_context(|| FileError {
            path: file.to_path_buf(),
            op: "create",
        })?;
        f.write_all(config_str.as_bytes())?;
        Ok(())
    }

    pub fn from_file(file: &Path) -> Result<Self> {
        let f = std::fs::File::open(file).with_context(|| FileError {
            path: file.to_path_buf(),
            op: "open",
        })?;
        let reader = BufReader::new(f);
        let config: Config = serde_json::from_reader(reader)
            .with_context(|| format!("Invalid configuration in {}", file.display()))?;
        Ok(config)
    }

    /// Prints out the current Config in a clear and readable way for command line output.
    pub fn print(&self) {
        println!("Configuration:");
        println!("  Vocabulary: {}", self.vocabulary);
        println!("  Source: {}", self.source.display());
        println!("  Output: {}", self.output_path().display());
        println!("  Strategy: {}", self.strategy);
        match self.strategy {
            Strategy::SortMerge => {
                println!("  Chunk Capacity: {}", self.chunk_capacity);
                println!("  Compress Chunks: {}", self.compress_chunks.is_enabled());
                if let Some(dir) = &self.temp_dir {
                    println!("  Temp Dir: {}", dir.display());
                }
            }
            Strategy::Store => {
                if let Some(store) = &self.store {
                    println!("  Store: {}", store.display());
                }
                println!("  Checkpoint Every: {}", self.checkpoint_every);
                println!("  Compact Ratio: {}", self.compact_ratio);
            }
            Strategy::Bucketed => println!("  Buckets: {}", self.buckets),
        }
        println!("  Fail On Unresolvable: {}", self.on_unresolvable.is_fail());
        if let Some(vocabularies) = &self.vocabularies {
            println!("  Vocabularies: {}", vocabularies.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let config = Config::builder()
            .vocabulary("lcgft")
            .source("/data/lcgft.nt")
            .build()
            .unwrap();
        assert_eq!(config.chunk_capacity, 1_000_000);
        assert_eq!(config.strategy, Strategy::SortMerge);
        assert!(config.compress_chunks.is_enabled());
        assert!(config.on_unresolvable.is_fail());
        assert_eq!(config.output_path(), PathBuf::from("/data/lcgft.json"));
        config.validate().unwrap();
    }

    #[test]
    fn test_builder_overrides_and_validation() {
        let config = Config::builder()
            .vocabulary("lcsh")
            .source("subjects.nt")
            .strategy(Strategy::Store)
            .compress_chunks(false)
            .on_unresolvable(false)
            .build()
            .unwrap();
        assert_eq!(config.compress_chunks, Compression::None);
        assert_eq!(config.on_unresolvable, OnUnresolvable::Skip);
        // the store path may still come from a checkpoint
        config.validate().unwrap();
        let no_buckets = Config {
            buckets: 0,
            ..config.clone()
        };
        assert!(no_buckets.validate().is_err());

        let config = Config::builder()
            .vocabulary("lcsh")
            .source("subjects.nt")
            .strategy(Strategy::Store)
            .store("subjects.store")
            .output("out.jsonl")
            .build()
            .unwrap();
        config.validate().unwrap();
        assert_eq!(config.output_path(), PathBuf::from("out.jsonl"));

        assert!(Config::default().validate().is_err());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("authdocs.json");
        let config = Config::builder()
            .vocabulary("naf")
            .source("names.nt.zst")
            .strategy(Strategy::Bucketed)
            .buckets(3usize)
            .build()
            .unwrap();
        config.save_to_file(&path).unwrap();
        assert_eq!(Config::from_file(&path).unwrap(), config);

        // missing fields take their defaults
        std::fs::write(&path, r#"{"vocabulary": "aat", "source": "aat.nt"}"#).unwrap();
        let partial = Config::from_file(&path).unwrap();
        assert_eq!(partial.checkpoint_every, 100_000);
        assert_eq!(partial.strategy, Strategy::SortMerge);
    }
}
