//! option-merge CLI
//!
//! Entry point for the `option-merge` command-line tool: layers the given
//! configuration files and inspects the merged result.

use clap::{Parser, Subcommand};
use option_merge::{Collector, Key, MergedOptions, MergedOptionsFormatter, Value};
use std::path::PathBuf;
use std::process;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "option-merge")]
#[command(about = "Inspect layered configuration files", version)]
struct Cli {
    /// Configuration file to layer (TOML or JSON); later files win
    #[arg(long = "file", short = 'f', global = true)]
    files: Vec<PathBuf>,

    /// Also collect the files each configuration file lists under this key
    #[arg(long, global = true, value_name = "KEY")]
    includes: Option<String>,

    /// Log which files are read
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the merged value of a key as JSON
    Get {
        /// Dotted key, e.g. "server.port"
        key: String,

        /// Expand {placeholders} in strings
        #[arg(long)]
        format: bool,
    },

    /// List the sources defining a key, newest first
    Sources {
        /// Dotted key, e.g. "server.port"
        key: String,
    },

    /// Print the whole merged configuration as JSON
    Dump {
        /// Expand {placeholders} in strings
        #[arg(long)]
        format: bool,
    },
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let options = match load(&cli.files, cli.includes) {
        Ok(options) => options,
        Err(e) => {
            eprintln!("Error loading configuration: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Get { key, format } => run_get(&options, &key, format),
        Commands::Sources { key } => run_sources(&options, &key),
        Commands::Dump { format } => run_dump(&options, format),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn load(files: &[PathBuf], includes: Option<String>) -> Result<MergedOptions, String> {
    if let Some(missing) = files.iter().find(|path| !path.exists()) {
        return Err(format!("No such file: {}", missing.display()));
    }

    let mut collector = match includes {
        Some(key) => Collector::new().with_includes(key),
        None => Collector::new(),
    };
    collector.collect_all(files).map_err(|e| e.to_string())?;
    collector.prepare().map_err(|e| e.to_string())
}

fn parse_key(key: &str) -> Result<Key, String> {
    Key::parse(key).map_err(|e| e.to_string())
}

fn print_json(value: &Value) -> Result<(), String> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| format!("JSON serialization failed: {}", e))?;
    println!("{}", json);
    Ok(())
}

fn formatted(options: &MergedOptions, value: Value, format: bool) -> Result<Value, String> {
    if !format {
        return Ok(value);
    }
    MergedOptionsFormatter::new(options)
        .format(&value)
        .map_err(|e| e.to_string())
}

fn run_get(options: &MergedOptions, key: &str, format: bool) -> Result<(), String> {
    let key = parse_key(key)?;
    let value = options.get_converted(key).map_err(|e| e.to_string())?;
    print_json(&formatted(options, value, format)?)
}

fn run_sources(options: &MergedOptions, key: &str) -> Result<(), String> {
    let key = parse_key(key)?;
    let sources = options.source_for(key.clone());
    if sources.is_empty() {
        return Err(format!("Key not found: {}", key));
    }
    for source in sources {
        println!("{}", source);
    }
    Ok(())
}

fn run_dump(options: &MergedOptions, format: bool) -> Result<(), String> {
    let value = options.as_mapping().map_err(|e| e.to_string())?;
    print_json(&formatted(options, value, format)?)
}
