use anyhow::{anyhow, bail, Context, Result};
use clap::error::ErrorKind;
use clap::Parser;
use equip_loader::{LoadRequest, LoadSummary, Loader, SourceEncoding, SourceOptions};
use equip_storage::EquipStore;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{debug, error};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "equip-bulk-load")]
#[command(
    about = "Wipe the equipment database and/or bulk-load assets from a CSV file",
    long_about = None
)]
struct Args {
    /// SQLite database file
    #[arg(long, env = "EQUIP_DB_PATH")]
    db: PathBuf,
    /// Delete all assets, loans, categories and locations before loading
    #[arg(long, default_value_t = false)]
    wipe: bool,
    /// CSV file to upsert into the assets table
    #[arg(long)]
    csv: Option<PathBuf>,
    /// auto, utf-8, shift_jis, cp932, euc-jp or any WHATWG label
    #[arg(long, env = "EQUIP_CSV_ENCODING", default_value = "auto")]
    encoding: String,
    /// Field separator; sniffed from the header line when omitted
    #[arg(long)]
    delimiter: Option<char>,
    /// Read and validate only, leave the database untouched
    #[arg(long, default_value_t = false)]
    dry_run: bool,
    /// Print the summary as JSON
    #[arg(long, default_value_t = false)]
    json: bool,
    #[arg(long, default_value_t = false)]
    debug: bool,
}

#[derive(Debug, Clone)]
struct Config {
    db_path: PathBuf,
    request: LoadRequest,
    source: SourceOptions,
    json: bool,
    debug: bool,
}

impl Config {
    fn from_args(args: Args) -> Result<Self> {
        let encoding = args
            .encoding
            .parse::<SourceEncoding>()
            .map_err(|err| anyhow!(err))?;
        let delimiter = args.delimiter.map(resolve_delimiter).transpose()?;

        Ok(Self {
            db_path: args.db,
            request: LoadRequest {
                wipe: args.wipe,
                csv: args.csv,
                dry_run: args.dry_run,
            },
            source: SourceOptions {
                encoding,
                delimiter,
            },
            json: args.json,
            debug: args.debug,
        })
    }
}

fn resolve_delimiter(delimiter: char) -> Result<u8> {
    if !delimiter.is_ascii() || delimiter == '"' || delimiter == '\n' || delimiter == '\r' {
        bail!("unsupported delimiter {delimiter:?}: use a single ASCII separator");
    }
    Ok(delimiter as u8)
}

fn main() -> ExitCode {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(err) => {
            if let Err(print_err) = err.print() {
                eprintln!("error: {print_err}");
            }
            return ExitCode::from(usage_exit_code(&err));
        }
    };
    let config = match Config::from_args(args) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("error: {err:#}");
            return ExitCode::from(1);
        }
    };
    init_logging(&config);
    run(config)
}

/// Help and version requests succeed; every other usage error shares status 1
/// with config errors so it never reads as a loader failure.
fn usage_exit_code(err: &clap::Error) -> u8 {
    match err.kind() {
        ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => 0,
        _ => 1,
    }
}

fn run(config: Config) -> ExitCode {
    let store = match open_store(&config.db_path) {
        Ok(store) => store,
        Err(err) => {
            error!("store_open_failed: {err:#}");
            eprintln!("error: {err:#}");
            return ExitCode::from(1);
        }
    };

    let mut loader = Loader::new(store, config.source);
    let outcome = loader.run(&config.request);
    // release the database before reporting
    drop(loader);

    match outcome {
        Ok(summary) => match print_summary(&summary, config.json) {
            Ok(()) => ExitCode::SUCCESS,
            Err(err) => {
                eprintln!("error: {err:#}");
                ExitCode::from(1)
            }
        },
        Err(failure) => {
            if let Err(err) = print_summary(&failure.summary, config.json) {
                debug!("summary_print_failed: {err:#}");
            }
            eprintln!("error: {}", failure.error);
            ExitCode::from(failure.error.exit_code())
        }
    }
}

fn open_store(path: &Path) -> Result<EquipStore> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    EquipStore::open(path).with_context(|| format!("failed to open database {}", path.display()))
}

fn print_summary(summary: &LoadSummary, json: bool) -> Result<()> {
    if json {
        serde_json::to_writer_pretty(io::stdout().lock(), summary)
            .context("failed to write JSON summary")?;
        println!();
    } else {
        print!("{summary}");
    }
    Ok(())
}

fn init_logging(config: &Config) {
    let level = if config.debug {
        "debug".to_string()
    } else if let Ok(level) = std::env::var("EQUIP_LOG_LEVEL") {
        level
    } else {
        "info".to_string()
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        eprintln!("log_init_error: global subscriber already set");
    }
}
