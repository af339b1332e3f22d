use std::io;

use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter, Stdout};

use crate::config::{Config, WorkType};

/// A line-oriented output: the screen, or a file under `output_dir`.
/// Whoever owns one must call `flush` before dropping it; every pipeline
/// exit path does.
pub enum LineSink {
    Screen(Stdout),
    File(BufWriter<File>),
}

impl LineSink {
    /// The SQL sink for this run: `forward.sql` or `rollback.sql` under
    /// `output_dir`, or the screen.
    pub async fn sql_sink(cfg: &Config) -> io::Result<LineSink> {
        if cfg.output_to_screen {
            return Ok(LineSink::Screen(tokio::io::stdout()));
        }
        let name = match cfg.work_type {
            WorkType::Rollback => "rollback.sql",
            _ => "forward.sql",
        };
        let file = File::create(cfg.output_dir.join(name)).await?;
        Ok(LineSink::File(BufWriter::new(file)))
    }

    /// The statistics sink: `binlog_stats.txt` under `output_dir`, or the
    /// screen.
    pub async fn stats_sink(cfg: &Config) -> io::Result<LineSink> {
        if cfg.output_to_screen {
            return Ok(LineSink::Screen(tokio::io::stdout()));
        }
        let file = File::create(cfg.output_dir.join("binlog_stats.txt")).await?;
        Ok(LineSink::File(BufWriter::new(file)))
    }

    pub async fn write_line(&mut self, line: &str) -> io::Result<()> {
        match self {
            LineSink::Screen(w) => {
                w.write_all(line.as_bytes()).await?;
                w.write_all(b"\n").await
            }
            LineSink::File(w) => {
                w.write_all(line.as_bytes()).await?;
                w.write_all(b"\n").await
            }
        }
    }

    pub async fn flush(&mut self) -> io::Result<()> {
        match self {
            LineSink::Screen(w) => w.flush().await,
            LineSink::File(w) => w.flush().await,
        }
    }
}
