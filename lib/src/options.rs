//! Shared option types that replace boolean flag parameters in the Rust API.

use serde::{Deserialize, Serialize};

/// What to do with a token that matches none of the value encodings.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OnUnresolvable {
    /// Abort the run with the offending token.
    #[default]
    Fail,
    /// Log it, count it, and drop the statement.
    Skip,
}

impl OnUnresolvable {
    pub fn is_fail(self) -> bool {
        matches!(self, OnUnresolvable::Fail)
    }
}

impl From<bool> for OnUnresolvable {
    /// `true` means strict.
    fn from(value: bool) -> Self {
        if value {
            OnUnresolvable::Fail
        } else {
            OnUnresolvable::Skip
        }
    }
}

/// How the output file is opened.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OutputMode {
    #[default]
    Truncate,
    /// Keep documents from an earlier, interrupted run.
    Append,
}

impl OutputMode {
    pub fn is_append(self) -> bool {
        matches!(self, OutputMode::Append)
    }
}

impl From<bool> for OutputMode {
    fn from(value: bool) -> Self {
        if value {
            OutputMode::Append
        } else {
            OutputMode::Truncate
        }
    }
}

/// Compression of temporary chunk files.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Compression {
    #[default]
    Zstd,
    None,
}

impl Compression {
    pub fn is_enabled(self) -> bool {
        matches!(self, Compression::Zstd)
    }
}

impl From<bool> for Compression {
    fn from(value: bool) -> Self {
        if value {
            Compression::Zstd
        } else {
            Compression::None
        }
    }
}

/// Which grouping strategy regroups the input by subject.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    /// External sort into compressed chunks, then k-way merge.
    #[default]
    SortMerge,
    /// Streaming accumulation into a durable, resumable store.
    Store,
    /// Hash-partitioned worker threads with isolated accumulators.
    Bucketed,
}

impl std::str::FromStr for Strategy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sort-merge" | "sort" => Ok(Strategy::SortMerge),
            "store" => Ok(Strategy::Store),
            "bucketed" | "buckets" => Ok(Strategy::Bucketed),
            _ => Err(anyhow::anyhow!(
                "Unknown strategy '{}'; expected sort-merge, store or bucketed",
                s
            )),
        }
    }
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Strategy::SortMerge => write!(f, "sort-merge"),
            Strategy::Store => write!(f, "store"),
            Strategy::Bucketed => write!(f, "bucketed"),
        }
    }
}
