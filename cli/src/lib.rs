use anyhow::{anyhow, Error, Result};
use authdocs::api::{compact_store, filter_statements, prune_store, Checkpoint, Pipeline};
use authdocs::config::Config;
use authdocs::options::{Compression, OnUnresolvable, OutputMode, Strategy};
use authdocs::vocabulary::Vocabularies;
use clap::{Args, Parser, Subcommand};
use log::info;
use std::ffi::OsString;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "authdocs")]
#[command(about = "Convert N-Triples authority dumps into search documents")]
#[command(arg_required_else_help = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
    /// Verbose mode - sets the RUST_LOG level to info, defaults to warning level
    #[clap(long, short, action, default_value = "false", global = true)]
    verbose: bool,
    /// Debug mode - sets the RUST_LOG level to debug, defaults to warning level
    #[clap(long, action, default_value = "false", global = true)]
    debug: bool,
}

/// Settings of a conversion; anything given here overrides `--config`.
#[derive(Debug, Args)]
struct ConvertArgs {
    /// Authority code of the vocabulary, e.g. lcgft or lcsh
    #[clap(long)]
    vocabulary: Option<String>,
    /// N-Triples dump to convert; a .zst suffix is decompressed on the fly
    #[clap(long, short)]
    source: Option<PathBuf>,
    /// JSON Lines output file, defaults to <source stem>.json next to the source
    #[clap(long, short)]
    output: Option<PathBuf>,
    /// Grouping strategy: one of [sort-merge, store, bucketed] (default: sort-merge)
    #[clap(long)]
    strategy: Option<String>,
    /// Statements held in memory before a sorted chunk is spilled
    #[clap(long = "chunk-size")]
    chunk_size: Option<usize>,
    /// Directory for temporary chunk files, defaults to the system temp dir
    #[clap(long)]
    temp_dir: Option<PathBuf>,
    /// Write temporary chunks uncompressed
    #[clap(long, action)]
    no_compress: bool,
    /// Worker threads for the bucketed strategy
    #[clap(long)]
    buckets: Option<usize>,
    /// Accumulation store for the store strategy
    #[clap(long)]
    store: Option<PathBuf>,
    /// Skip trusted input lines already accumulated by an earlier run
    #[clap(long)]
    start_line: Option<u64>,
    /// Resume from the checkpoint saved in --store
    #[clap(long, action)]
    resume: bool,
    /// Skip statements whose value cannot be resolved instead of failing
    #[clap(long, action)]
    lenient: bool,
    /// JSON file of vocabulary descriptors replacing the built-in table
    #[clap(long)]
    vocabularies: Option<PathBuf>,
    /// JSON configuration file, as written by `authdocs config --save`
    #[clap(long)]
    config: Option<PathBuf>,
}

impl ConvertArgs {
    fn to_config(&self) -> Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::from_file(path)?,
            None => Config::default(),
        };
        if let Some(vocabulary) = &self.vocabulary {
            config.vocabulary = vocabulary.clone();
        }
        if let Some(source) = &self.source {
            config.source = source.clone();
        }
        if let Some(output) = &self.output {
            config.output = Some(output.clone());
        }
        if let Some(strategy) = &self.strategy {
            config.strategy = strategy.parse::<Strategy>()?;
        }
        if let Some(chunk_size) = self.chunk_size {
            config.chunk_capacity = chunk_size;
        }
        if let Some(temp_dir) = &self.temp_dir {
            config.temp_dir = Some(temp_dir.clone());
        }
        if self.no_compress {
            config.compress_chunks = Compression::None;
        }
        if let Some(buckets) = self.buckets {
            config.buckets = buckets;
        }
        if let Some(store) = &self.store {
            config.store = Some(store.clone());
            // a store on the command line implies the store strategy
            if self.strategy.is_none() {
                config.strategy = Strategy::Store;
            }
        }
        if self.lenient {
            config.on_unresolvable = OnUnresolvable::Skip;
        }
        if let Some(vocabularies) = &self.vocabularies {
            config.vocabularies = Some(vocabularies.clone());
        }
        config.validate()?;
        Ok(config)
    }

    fn checkpoint(&self, config: &Config) -> Result<Checkpoint> {
        if let Some(start_line) = self.start_line {
            return Ok(Checkpoint::new(start_line, config.store.clone()));
        }
        if self.resume {
            let store = config
                .store
                .as_ref()
                .ok_or_else(|| anyhow!("--resume needs an accumulation store (--store)"))?;
            return Checkpoint::resume_from_store(store);
        }
        Ok(Checkpoint::default())
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Convert an N-Triples dump into one JSON document per authority record
    Convert {
        #[command(flatten)]
        args: ConvertArgs,
        /// Append to the output file instead of replacing it
        #[clap(long, action)]
        append: bool,
        /// Output the run statistics as JSON instead of text
        #[clap(long, action, default_value = "false")]
        json: bool,
    },
    /// Print the effective configuration, optionally saving it for --config
    Config {
        #[command(flatten)]
        args: ConvertArgs,
        /// File to write the configuration to
        #[clap(long)]
        save: Option<PathBuf>,
    },
    /// Keep only the statements whose predicate is used by the conversion
    Filter {
        /// Dump to read; a .zst suffix is decompressed on the fly
        input: PathBuf,
        /// Filtered N-Triples file to write
        output: PathBuf,
    },
    /// List the vocabularies that can be converted
    Vocabularies {
        /// JSON file of vocabulary descriptors replacing the built-in table
        #[clap(long)]
        file: Option<PathBuf>,
        /// Output JSON instead of text
        #[clap(long, action, default_value = "false")]
        json: bool,
    },
    /// Remove every record linked to a deprecated node from a store
    Prune {
        #[clap(long)]
        store: PathBuf,
    },
    /// Rewrite a store with its live entries only
    Compact {
        #[clap(long)]
        store: PathBuf,
        /// Output JSON instead of text
        #[clap(long, action, default_value = "false")]
        json: bool,
    },
    /// Prints the version of the authdocs binary
    Version,
}

pub fn run() -> Result<()> {
    authdocs::api::init_logging();
    let cmd = Cli::parse();
    execute(cmd)
}

pub fn run_from_args<I, T>(args: I) -> Result<()>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    authdocs::api::init_logging();
    let cmd = Cli::try_parse_from(args).map_err(Error::from)?;
    execute(cmd)
}

fn execute(cmd: Cli) -> Result<()> {
    // The RUST_LOG env var is set by `init_logging` if AUTHDOCS_LOG is present.
    // CLI flags for verbosity take precedence. If nothing is set, we default to "warn".
    if cmd.debug {
        std::env::set_var("RUST_LOG", "debug");
    } else if cmd.verbose {
        std::env::set_var("RUST_LOG", "info");
    } else if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "warn");
    }
    let _ = env_logger::try_init();

    match cmd.command {
        Commands::Convert { args, append, json } => {
            let config = args.to_config()?;
            if cmd.verbose || cmd.debug {
                config.print();
            }
            let checkpoint = args.checkpoint(&config)?;
            if checkpoint.source_offset > 0 {
                info!("Resuming after line {}", checkpoint.source_offset);
            }
            let stats = Pipeline::new(config, checkpoint)?
                .with_output_mode(OutputMode::from(append))
                .run()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                stats.print();
            }
        }
        Commands::Config { args, save } => {
            let config = args.to_config()?;
            match save {
                Some(path) => {
                    config.save_to_file(&path)?;
                    println!("Saved configuration to {}", path.display());
                }
                None => config.print(),
            }
        }
        Commands::Filter { input, output } => {
            let stats = filter_statements(&input, &output)?;
            println!(
                "Kept {} of {} lines in {}",
                stats.lines_kept,
                stats.lines_read,
                output.display()
            );
        }
        Commands::Vocabularies { file, json } => {
            let vocabularies = match file {
                Some(path) => Vocabularies::from_file(&path)?,
                None => Vocabularies::builtin(),
            };
            if json {
                let descriptors: Vec<_> = vocabularies.iter().collect();
                println!("{}", serde_json::to_string_pretty(&descriptors)?);
            } else {
                for descriptor in vocabularies.iter() {
                    println!("{}: {}", descriptor.code, descriptor.authority_name);
                    match &descriptor.term_type {
                        Some(term_type) => println!("  term type: {}", term_type),
                        None => println!("  term type: detected from rdf:type"),
                    }
                    if let Some(pattern) = &descriptor.canonical_uri {
                        println!("  canonical URIs: {}", pattern.as_str());
                    }
                    if !descriptor.excluded_term_types.is_empty() {
                        println!("  excluded: {}", descriptor.excluded_term_types.join(", "));
                    }
                }
            }
        }
        Commands::Prune { store } => {
            let removed = prune_store(&store)?;
            println!("Removed {} deprecated records from {}", removed, store.display());
        }
        Commands::Compact { store, json } => {
            let stats = compact_store(&store)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                println!(
                    "Compacted {}: {} entries, {} live bytes",
                    store.display(),
                    stats.entries,
                    stats.live_bytes
                );
            }
        }
        Commands::Version => {
            println!("authdocs {}", env!("CARGO_PKG_VERSION"));
        }
    }
    Ok(())
}
