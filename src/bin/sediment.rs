//! Binary entry point for the Sediment administrative CLI.
#![forbid(unsafe_code)]

use std::error::Error;
use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use sediment::{
    admin::{
        open_graph, stats, verify, AdminError, AdminOpenOptions, StatsReport, VerifyLevel,
        VerifyReport,
    },
    config::SedimentConfig,
    storage::Synchronous,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "sediment",
    version,
    about = "Administrative CLI for Sediment stores",
    disable_help_subcommand = true
)]
struct Cli {
    #[command(flatten)]
    open: OpenArgs,

    #[arg(
        long,
        global = true,
        value_enum,
        default_value_t = OutputFormat::Text,
        help = "Output format for structured responses"
    )]
    format: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct OpenArgs {
    #[arg(
        long,
        global = true,
        env = "SEDIMENT_CONFIG",
        value_name = "FILE",
        help = "TOML file declaring store settings and contexts"
    )]
    config: Option<PathBuf>,

    #[arg(long, global = true, value_enum, help = "SQLite synchronous mode override")]
    synchronous: Option<SynchronousArg>,
}

#[derive(Args, Debug)]
struct DbArg {
    #[arg(value_name = "DB", help = "Database file (defaults to [store].path)")]
    db_path: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a store and install its schema.
    Init {
        #[command(flatten)]
        db: DbArg,
    },
    /// Report row counts and allocator state.
    Stats {
        #[command(flatten)]
        db: DbArg,
    },
    /// Check persisted rows against the store's invariants.
    Verify {
        #[command(flatten)]
        db: DbArg,
        #[arg(long, value_enum, default_value_t = VerifyLevelArg::Fast)]
        level: VerifyLevelArg,
    },
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum SynchronousArg {
    Full,
    Normal,
    Off,
}

impl From<SynchronousArg> for Synchronous {
    fn from(mode: SynchronousArg) -> Self {
        match mode {
            SynchronousArg::Full => Synchronous::Full,
            SynchronousArg::Normal => Synchronous::Normal,
            SynchronousArg::Off => Synchronous::Off,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum VerifyLevelArg {
    Fast,
    Full,
}

impl From<VerifyLevelArg> for VerifyLevel {
    fn from(level: VerifyLevelArg) -> Self {
        match level {
            VerifyLevelArg::Fast => VerifyLevel::Fast,
            VerifyLevelArg::Full => VerifyLevel::Full,
        }
    }
}

#[derive(Debug, Serialize)]
struct InitReport {
    path: String,
    created: bool,
    shard_bits: u8,
    shard: u16,
    contexts: usize,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();
    if let Err(err) = run() {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    let config = match &cli.open.config {
        Some(path) => SedimentConfig::load(path)?,
        None => SedimentConfig::default(),
    };
    let open_opts = build_open_options(&cli.open, &config)?;

    match cli.command {
        Command::Init { db } => {
            let path = resolve_db(db.db_path, &config)?;
            let created = !path.exists();
            let graph = open_graph(&path, &open_opts.clone().create_if_missing(true))?;
            let allocator = graph.allocator();
            let report = InitReport {
                path: path.display().to_string(),
                created,
                shard_bits: allocator.layout().shard_bits(),
                shard: allocator.shard().0,
                contexts: graph.contexts().iter().count(),
            };
            emit(&cli.format, &report, |_| print_init_text(&report))?;
        }
        Command::Stats { db } => {
            let path = resolve_db(db.db_path, &config)?;
            let report = stats(&path, &open_opts)?;
            emit(&cli.format, &report, |_| print_stats_text(&report))?;
        }
        Command::Verify { db, level } => {
            let path = resolve_db(db.db_path, &config)?;
            let report = verify(&path, &open_opts, level.into())?;
            emit(&cli.format, &report, |_| print_verify_text(&report))?;
            if !report.success {
                std::process::exit(2);
            }
        }
    }

    Ok(())
}

fn build_open_options(
    args: &OpenArgs,
    config: &SedimentConfig,
) -> Result<AdminOpenOptions, AdminError> {
    let mut opts = AdminOpenOptions::from_config(config)?;
    if let Some(mode) = args.synchronous {
        opts.store = opts.store.synchronous(mode.into());
    }
    Ok(opts)
}

fn resolve_db(explicit: Option<PathBuf>, config: &SedimentConfig) -> Result<PathBuf, AdminError> {
    explicit
        .or_else(|| config.database().map(Path::to_path_buf))
        .ok_or_else(|| {
            AdminError::Message("no database given and the config has no [store].path".into())
        })
}

fn emit<T, F>(format: &OutputFormat, value: &T, printer: F) -> Result<(), Box<dyn Error>>
where
    T: Serialize,
    F: Fn(OutputFormat),
{
    match format {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{json}");
        }
        OutputFormat::Text => printer(OutputFormat::Text),
    }
    Ok(())
}

fn print_init_text(report: &InitReport) {
    let verb = if report.created {
        "Created"
    } else {
        "Opened existing"
    };
    println!(
        "{verb} store at {} (shard_bits={} shard={} contexts={})",
        report.path, report.shard_bits, report.shard, report.contexts
    );
}

fn print_stats_text(report: &StatsReport) {
    println!(
        "Store: schema_version={} shard_bits={} shard={} ids_remaining={} prefix_lengths={:?} contexts={}",
        report.store.schema_version,
        report.store.shard_bits,
        report.store.shard,
        report.store.ids_remaining,
        report.store.prefix_lengths,
        report.store.contexts_declared
    );
    println!();
    println!("Tables:");
    for table in &report.tables {
        println!(
            "  {:<16} current={} tombstoned={}",
            table.table, table.current, table.tombstoned
        );
    }
    if !report.contexts.is_empty() {
        println!();
        println!("Contexts:");
        for ctx in &report.contexts {
            let label = ctx
                .name
                .clone()
                .unwrap_or_else(|| format!("ctx#{}", ctx.ctx));
            let kind = ctx.kind.unwrap_or("undeclared");
            println!(
                "  {:<16} {} ({}, id={}): current={}",
                ctx.table, label, kind, ctx.ctx, ctx.current
            );
        }
    }
    if let Some(fs) = &report.filesystem {
        println!();
        println!(
            "Filesystem: db_size={} wal_size={} db_path={} wal_path={}",
            fs.db_size_bytes, fs.wal_size_bytes, fs.db_path, fs.wal_path
        );
    }
}

fn print_verify_text(report: &VerifyReport) {
    println!(
        "Verify ({:?}) => success={} rows_scanned={} current_rows={} relationship_rows={} aliases={} names={}",
        report.level,
        report.success,
        report.counts.rows_scanned,
        report.counts.current_rows,
        report.counts.relationship_rows,
        report.counts.aliases_checked,
        report.counts.names_checked,
    );
    for finding in &report.findings {
        println!("- {:?}: {}", finding.severity, finding.message);
    }
}
