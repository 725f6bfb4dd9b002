//! authdocs regroups N-Triples dumps of library authority records by subject
//! and projects every subject into a flat JSON document for a search index.
//!
//! The pipeline is: parse ([`triple`]), regroup by subject ([`grouping`],
//! backed by the `runsort` external sort or an accumulation [`store`]),
//! accumulate per-subject attributes ([`record`]), resolve deprecation
//! ([`deprecation`]), project ([`project`]) and write JSON Lines ([`output`]).
//! [`api::Pipeline`] wires the stages together.

extern crate derive_builder;

pub mod api;
pub mod config;
pub mod consts;
pub mod deprecation;
pub mod errors;
pub mod grouping;
pub mod options;
pub mod output;
pub mod project;
pub mod record;
pub mod store;
pub mod triple;
pub mod util;
pub mod vocabulary;

pub use api::{Checkpoint, Pipeline, RunStats};
pub use config::Config;
pub use project::Document;
