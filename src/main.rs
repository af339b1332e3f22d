use std::error::Error as _;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::error;
use tracing_subscriber::EnvFilter;

use binflash::config::{comma_separated_list, parse_datetime_flag};
use binflash::{pipeline, Config, DmlKind, Mode, PipelineError, WorkType};

/// Translate a MySQL row-based binlog range into forward SQL, rollback SQL,
/// or per-table statistics.
#[derive(Debug, Parser)]
#[command(name = "binflash", version, about)]
struct Cli {
    /// Binlog source: read files from disk, or pull from a primary as a
    /// replica
    #[arg(long, default_value = "file", value_name = "file|repl")]
    mode: String,

    /// Artifact to produce
    #[arg(long = "work-type", default_value = "2sql", value_name = "2sql|rollback|stats")]
    work_type: String,

    /// MySQL host for schema queries (and the primary in repl mode)
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    #[arg(long, default_value_t = 3306)]
    port: u16,

    #[arg(short, long, default_value = "")]
    user: String,

    #[arg(short, long, default_value = "")]
    password: String,

    /// Replica server id to register under in repl mode
    #[arg(long = "server-id", default_value_t = 1113306)]
    server_id: u32,

    /// Server flavour: mysql or mariadb
    #[arg(long = "mysql-type", default_value = "mysql")]
    mysql_type: String,

    /// Directory holding the binlog files (file mode)
    #[arg(long = "binlog-dir", default_value = ".")]
    binlog_dir: PathBuf,

    /// First binlog file of the range, e.g. mysql-bin.000004
    #[arg(long = "start-file")]
    start_file: Option<String>,

    #[arg(long = "start-pos")]
    start_pos: Option<u32>,

    #[arg(long = "stop-file")]
    stop_file: Option<String>,

    #[arg(long = "stop-pos")]
    stop_pos: Option<u32>,

    /// Inclusive lower time bound, `YYYY-MM-DD HH:MM:SS` local time
    #[arg(long = "start-datetime")]
    start_datetime: Option<String>,

    /// Exclusive upper time bound, `YYYY-MM-DD HH:MM:SS` local time
    #[arg(long = "stop-datetime")]
    stop_datetime: Option<String>,

    /// Comma-separated database allow-list; empty allows all
    #[arg(long, default_value = "")]
    databases: String,

    /// Comma-separated table allow-list; empty allows all
    #[arg(long, default_value = "")]
    tables: String,

    #[arg(long = "ignore-databases", default_value = "")]
    ignore_databases: String,

    #[arg(long = "ignore-tables", default_value = "")]
    ignore_tables: String,

    /// Comma-separated DML subset to translate, among insert,update,delete
    #[arg(long, default_value = "")]
    sql: String,

    /// SQL generator worker count
    #[arg(long, default_value_t = 2)]
    threads: usize,

    /// Rows batched into one INSERT statement
    #[arg(long = "rows-per-insert", default_value_t = 20)]
    rows_per_insert: usize,

    /// Compare and emit all columns instead of only keys/changed columns
    #[arg(long = "full-image")]
    full_image: bool,

    /// Omit primary-key columns from generated INSERTs
    #[arg(long = "ignore-primary-on-insert")]
    ignore_primary_on_insert: bool,

    /// Generate table names without the database prefix
    #[arg(long = "no-db-prefix")]
    no_db_prefix: bool,

    /// Precede each row change with a position/time comment line
    #[arg(long = "extra-info")]
    extra_info: bool,

    /// Statistics bucket width in seconds
    #[arg(long = "stats-interval", default_value_t = 60)]
    stats_interval: u32,

    #[arg(long = "output-dir", default_value = ".")]
    output_dir: PathBuf,

    /// Write SQL and statistics to stdout instead of files
    #[arg(long = "output-to-screen")]
    output_to_screen: bool,
}

fn build_config(cli: Cli) -> Result<Config, PipelineError> {
    let mode: Mode = cli.mode.parse().map_err(PipelineError::Config)?;
    let work_type: WorkType = cli.work_type.parse().map_err(PipelineError::Config)?;
    let mut sql = Vec::new();
    for item in comma_separated_list(&cli.sql) {
        let kind: DmlKind = item.parse().map_err(PipelineError::Config)?;
        sql.push(kind);
    }
    Ok(Config {
        mode,
        work_type,
        host: cli.host,
        port: cli.port,
        user: cli.user,
        password: cli.password,
        server_id: cli.server_id,
        mysql_type: cli.mysql_type,
        binlog_dir: cli.binlog_dir,
        start_file: cli.start_file,
        start_pos: cli.start_pos,
        stop_file: cli.stop_file,
        stop_pos: cli.stop_pos,
        start_datetime: cli
            .start_datetime
            .as_deref()
            .map(parse_datetime_flag)
            .transpose()?,
        stop_datetime: cli
            .stop_datetime
            .as_deref()
            .map(parse_datetime_flag)
            .transpose()?,
        databases: comma_separated_list(&cli.databases),
        tables: comma_separated_list(&cli.tables),
        ignore_databases: comma_separated_list(&cli.ignore_databases),
        ignore_tables: comma_separated_list(&cli.ignore_tables),
        sql,
        threads: cli.threads,
        rows_per_insert: cli.rows_per_insert,
        full_image: cli.full_image,
        ignore_primary_on_insert: cli.ignore_primary_on_insert,
        prefix_db: !cli.no_db_prefix,
        extra_info: cli.extra_info,
        stats_interval: cli.stats_interval,
        output_dir: cli.output_dir,
        output_to_screen: cli.output_to_screen,
        start_position: None,
        stop_position: None,
    })
}

/// Render an error with its source chain on one line.
fn error_chain(err: &PipelineError) -> String {
    let mut out = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        out.push_str(": ");
        out.push_str(&cause.to_string());
        source = cause.source();
    }
    out
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let result = match build_config(cli) {
        Ok(cfg) => pipeline::run(cfg).await,
        Err(e) => Err(e),
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", error_chain(&e));
            ExitCode::FAILURE
        }
    }
}
