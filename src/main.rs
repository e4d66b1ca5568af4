//! Genolith command-line interface.
//!
//! Three subcommands cover the database lifecycle:
//!
//! - `preprocess`: build a snapshot from NDJSON records, a schema file, and
//!   reference genomes;
//! - `query`: load a snapshot and answer one query (JSON from a file or
//!   stdin) as NDJSON/FASTA on stdout;
//! - `info`: print snapshot summary statistics.

use std::fs::File;
use std::io::{BufRead, BufReader, Read, Write};
use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use genolith::preprocessing::RowInput;
use genolith::query::Query;
use genolith::{
    Config, DatabaseBuilder, DatabaseSchema, LineageTree, QueryEngine, ReferenceGenomes,
};

#[derive(Parser)]
#[command(name = "genolith", version, about = "Columnar sequence database engine")]
struct Cli {
    /// Path to a configuration file (defaults to config.toml discovery)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Build a snapshot from structured input records
    Preprocess {
        /// NDJSON file with one input record per line
        #[arg(long)]
        input: PathBuf,

        /// TOML schema (primary key, partition key, column declarations)
        #[arg(long)]
        schema: PathBuf,

        /// reference_genomes.json
        #[arg(long)]
        reference_genomes: PathBuf,

        /// JSON array of {"name": ..., "parent": ...} lineage definitions
        #[arg(long)]
        lineage_definitions: Option<PathBuf>,

        /// Output snapshot directory
        #[arg(long)]
        output: PathBuf,
    },

    /// Evaluate a query against a snapshot
    Query {
        /// Snapshot directory
        #[arg(long)]
        snapshot: PathBuf,

        /// Query JSON file; stdin when omitted
        #[arg(long)]
        query_file: Option<PathBuf>,
    },

    /// Print snapshot summary statistics
    Info {
        /// Snapshot directory
        #[arg(long)]
        snapshot: PathBuf,
    },
}

#[derive(serde::Deserialize)]
struct LineageDefinition {
    name: String,
    #[serde(default)]
    parent: Option<String>,
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<Config> {
    let config = match path {
        Some(path) => Config::from_file(
            path.to_str()
                .context("configuration path is not valid UTF-8")?,
        )?,
        None => Config::load()?,
    };
    Ok(config)
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.clone()));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if config.logging.format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_ref())?;
    init_tracing(&config);

    match cli.command {
        Command::Preprocess {
            input,
            schema,
            reference_genomes,
            lineage_definitions,
            output,
        } => preprocess(
            &config,
            &input,
            &schema,
            &reference_genomes,
            lineage_definitions.as_ref(),
            &output,
        ),
        Command::Query {
            snapshot,
            query_file,
        } => run_query(&config, &snapshot, query_file.as_ref()),
        Command::Info { snapshot } => {
            let database = genolith::load_database(&snapshot)?;
            let info = database.info();
            println!("{}", serde_json::to_string_pretty(&info)?);
            Ok(())
        }
    }
}

fn preprocess(
    config: &Config,
    input: &PathBuf,
    schema_path: &PathBuf,
    reference_genomes_path: &PathBuf,
    lineage_definitions_path: Option<&PathBuf>,
    output: &PathBuf,
) -> anyhow::Result<()> {
    let schema: DatabaseSchema = toml::from_str(
        &std::fs::read_to_string(schema_path)
            .with_context(|| format!("reading {}", schema_path.display()))?,
    )?;
    let reference_genomes: ReferenceGenomes = serde_json::from_reader(
        File::open(reference_genomes_path)
            .with_context(|| format!("reading {}", reference_genomes_path.display()))?,
    )?;
    let lineage_tree = match lineage_definitions_path {
        Some(path) => {
            let definitions: Vec<LineageDefinition> = serde_json::from_reader(
                File::open(path).with_context(|| format!("reading {}", path.display()))?,
            )?;
            let edges: Vec<(String, Option<String>)> = definitions
                .into_iter()
                .map(|definition| (definition.name, definition.parent))
                .collect();
            LineageTree::from_edges(&edges)?
        }
        None => LineageTree::default(),
    };

    let mut builder = DatabaseBuilder::new(
        schema,
        reference_genomes,
        lineage_tree,
        config.build.clone(),
    )?;
    let reader = BufReader::new(
        File::open(input).with_context(|| format!("reading {}", input.display()))?,
    );
    let mut row_count: u64 = 0;
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let record: RowInput = serde_json::from_str(&line)
            .with_context(|| format!("record {}", row_count + 1))?;
        builder.add_row(record)?;
        row_count += 1;
    }
    info!(rows = row_count, "input_records_staged");

    let database = builder.build()?;
    genolith::save_database(&database, output)?;
    println!(
        "{}",
        serde_json::to_string_pretty(&database.info())?
    );
    Ok(())
}

fn run_query(
    config: &Config,
    snapshot: &PathBuf,
    query_file: Option<&PathBuf>,
) -> anyhow::Result<()> {
    let database = genolith::load_database(snapshot)?;
    let mut query_json = String::new();
    match query_file {
        Some(path) => {
            query_json = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
        }
        None => {
            std::io::stdin().read_to_string(&mut query_json)?;
        }
    }
    let query = Query::from_json(&query_json)?;

    let engine = QueryEngine::from_config(&config.query);
    let stdout = std::io::stdout();
    let mut handle = stdout.lock();
    engine.execute_to_writer(&database, &query, &mut handle)?;
    handle.flush()?;
    Ok(())
}
