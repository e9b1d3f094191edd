//! bakex: extract tables from SQL Server `.bak` files without a server.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, ValueEnum};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use bakex_error::{BakError, Result};
use bakex_extract::sink::{ColumnarSink, CsvSink, JsonlSink, RowSink};
use bakex_extract::{hints, probe_headers, DirectExtractor, ExtractOptions};

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Format {
    Csv,
    Jsonl,
    Parquet,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Mode {
    /// Try direct parsing, report when a restore fallback is needed.
    Auto,
    /// Direct parsing only.
    Direct,
    /// Restore through a SQL Server instance (not available here).
    Restore,
}

#[derive(Parser, Debug)]
#[command(
    name = "bakex",
    version,
    about = "Extract tables from SQL Server backup files without restoring them"
)]
struct Cli {
    /// Path to a .bak stripe file (repeat for striped backups, in order)
    #[arg(long = "bak", value_name = "PATH", required = true)]
    bak: Vec<PathBuf>,

    /// Schema-qualified table, e.g. dbo.Orders or [dbo].[Orders]
    #[arg(long, value_name = "SCHEMA.NAME")]
    table: Option<String>,

    /// Output file path
    #[arg(long, value_name = "PATH")]
    out: Option<PathBuf>,

    /// Output format
    #[arg(long, value_enum, default_value_t = Format::Csv)]
    format: Format,

    /// Execution mode
    #[arg(long, value_enum, default_value_t = Mode::Auto)]
    mode: Mode,

    /// Select a backup set by position (default: the first)
    #[arg(long, value_name = "N")]
    backupset: Option<i32>,

    /// Comma-separated list of columns to export
    #[arg(long, value_name = "a,b,c")]
    columns: Option<String>,

    /// Row filter (restore mode only)
    #[arg(long, value_name = "CONDITION")]
    r#where: Option<String>,

    /// Maximum number of rows to export
    #[arg(long, value_name = "N")]
    max_rows: Option<u64>,

    /// Field delimiter for csv output
    #[arg(long, default_value = ",", value_name = "CHAR")]
    delimiter: String,

    /// Use the sidecar-indexed page store (recommended for large backups)
    #[arg(long)]
    indexed: bool,

    /// LRU page-cache size in MiB
    #[arg(long, value_name = "MB", default_value_t = 256)]
    cache_size: usize,

    /// Directory for sidecar index files (default: next to the backup)
    #[arg(long, value_name = "DIR")]
    index_dir: Option<PathBuf>,

    /// Ignore an existing sidecar index and rescan
    #[arg(long)]
    force_rescan: bool,

    /// CSV of (file_id,page_id) pages to restrict row streaming to
    #[arg(long, value_name = "FILE")]
    allocation_hint: Option<PathBuf>,

    /// List user tables found in the backup and exit
    #[arg(long)]
    list_tables: bool,

    /// Print the page-data start offset and exit
    #[arg(long)]
    print_data_offset: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let outcome = std::panic::catch_unwind(move || run(&cli));
    match outcome {
        Ok(Ok(())) => ExitCode::SUCCESS,
        Ok(Err(err)) => {
            eprintln!("error: {err}");
            ExitCode::from(err.exit_code() as u8)
        }
        Err(_) => {
            eprintln!("error: internal failure");
            ExitCode::from(3)
        }
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run(cli: &Cli) -> Result<()> {
    if cli.print_data_offset {
        let (info, data_start) = probe_headers(&cli.bak[0])?;
        for set in &info.backup_sets {
            info!(
                position = set.position,
                database = %set.database_name,
                compressed = set.is_compressed,
                "backup set"
            );
        }
        println!("{data_start}");
        return Ok(());
    }

    let options = build_options(cli)?;
    let mut extractor = DirectExtractor::new(options)?;

    if cli.list_tables {
        let tables = extractor.list_tables()?;
        if tables.is_empty() {
            return Err(BakError::format("no user tables found in catalog"));
        }
        for table in tables {
            println!("{}", table.qualified_name());
        }
        return Ok(());
    }

    match cli.mode {
        Mode::Restore => Err(BakError::config(
            "restore mode drives a SQL Server instance and is not available in this build; \
             use --mode direct",
        )),
        Mode::Direct | Mode::Auto => {
            let out = cli
                .out
                .as_ref()
                .ok_or_else(|| BakError::config("--out is required"))?;
            let mut sink = make_sink(cli, out)?;
            let report = extractor.extract_to_sink(sink.as_mut());

            if report.success {
                info!(
                    rows = report.rows_read,
                    elapsed_ms = report.elapsed.as_millis() as u64,
                    "extraction finished"
                );
                return Ok(());
            }
            if matches!(cli.mode, Mode::Auto) && report.wants_restore_fallback() {
                warn!(
                    "direct parsing cannot proceed ({}); retry on a machine with SQL Server \
                     access using restore tooling",
                    report.error_message()
                );
            }
            Err(report
                .error
                .unwrap_or_else(|| BakError::format("extraction failed")))
        }
    }
}

fn build_options(cli: &Cli) -> Result<ExtractOptions> {
    let (schema, table) = match &cli.table {
        Some(qualified) => parse_table_name(qualified)?,
        None if cli.list_tables => (String::new(), String::new()),
        None => return Err(BakError::config("--table is required (use schema.table)")),
    };

    if cli.r#where.is_some() {
        warn!("--where applies to restore mode only; ignored for direct parsing");
    }
    if cli.delimiter.chars().count() != 1 {
        return Err(BakError::config("--delimiter must be a single character"));
    }

    let columns = cli
        .columns
        .as_deref()
        .map(|csv| {
            csv.split(',')
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .map(ToOwned::to_owned)
                .collect()
        })
        .unwrap_or_default();

    let allocation_hints = match &cli.allocation_hint {
        Some(path) => Some(hints::load_allocation_hints(path)?),
        None => None,
    };

    Ok(ExtractOptions {
        bak_paths: cli.bak.clone(),
        schema,
        table,
        columns,
        max_rows: cli.max_rows,
        backupset: cli.backupset,
        indexed: cli.indexed,
        cache_size_mb: cli.cache_size,
        index_dir: cli.index_dir.clone(),
        force_rescan: cli.force_rescan,
        allocation_hints,
    })
}

/// Split `schema.table`, defaulting the schema to `dbo` and stripping
/// `[bracket]` quoting from both parts.
fn parse_table_name(qualified: &str) -> Result<(String, String)> {
    let (schema, table) = match qualified.split_once('.') {
        Some((s, t)) => (s.to_owned(), t.to_owned()),
        None => ("dbo".to_owned(), qualified.to_owned()),
    };
    let strip = |s: String| -> String {
        let trimmed = s.trim();
        trimmed
            .strip_prefix('[')
            .and_then(|v| v.strip_suffix(']'))
            .unwrap_or(trimmed)
            .to_owned()
    };
    let schema = strip(schema);
    let table = strip(table);
    if table.is_empty() {
        return Err(BakError::config("table name is empty"));
    }
    Ok((schema, table))
}

fn make_sink(cli: &Cli, out: &PathBuf) -> Result<Box<dyn RowSink>> {
    Ok(match cli.format {
        Format::Csv => {
            let delimiter = cli.delimiter.chars().next().unwrap_or(',');
            Box::new(CsvSink::new(out, delimiter))
        }
        Format::Jsonl => Box::new(JsonlSink::new(out)),
        Format::Parquet => Box::new(ColumnarSink::new(out)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_name_resolution() {
        assert_eq!(
            parse_table_name("dbo.Orders").unwrap(),
            ("dbo".to_owned(), "Orders".to_owned())
        );
        assert_eq!(
            parse_table_name("Orders").unwrap(),
            ("dbo".to_owned(), "Orders".to_owned())
        );
        assert_eq!(
            parse_table_name("[dbo].[Order Details]").unwrap(),
            ("dbo".to_owned(), "Order Details".to_owned())
        );
        assert_eq!(
            parse_table_name("[sales].Orders").unwrap(),
            ("sales".to_owned(), "Orders".to_owned())
        );
        assert!(parse_table_name("dbo.").is_err());
    }

    #[test]
    fn cli_parses_the_full_surface() {
        let cli = Cli::try_parse_from([
            "bakex",
            "--bak",
            "a.bak",
            "--bak",
            "b.bak",
            "--table",
            "dbo.Orders",
            "--out",
            "orders.csv",
            "--format",
            "csv",
            "--mode",
            "direct",
            "--columns",
            "id, total ,",
            "--max-rows",
            "500",
            "--indexed",
            "--cache-size",
            "64",
            "--force-rescan",
        ])
        .unwrap();

        assert_eq!(cli.bak.len(), 2);
        assert!(cli.indexed);
        assert_eq!(cli.cache_size, 64);
        assert_eq!(cli.max_rows, Some(500));

        let options = build_options(&cli).unwrap();
        assert_eq!(options.schema, "dbo");
        assert_eq!(options.table, "Orders");
        assert_eq!(options.columns, vec!["id".to_owned(), "total".to_owned()]);
        assert!(options.force_rescan);
    }

    #[test]
    fn missing_table_is_config_error() {
        let cli = Cli::try_parse_from(["bakex", "--bak", "a.bak", "--out", "x.csv"]).unwrap();
        let err = build_options(&cli).unwrap_err();
        assert!(matches!(err, BakError::Config { .. }));
    }

    #[test]
    fn multi_char_delimiter_is_rejected() {
        let cli = Cli::try_parse_from([
            "bakex",
            "--bak",
            "a.bak",
            "--table",
            "dbo.T",
            "--delimiter",
            "||",
        ])
        .unwrap();
        let err = build_options(&cli).unwrap_err();
        assert!(matches!(err, BakError::Config { .. }));
    }
}
