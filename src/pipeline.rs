use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{Local, TimeZone};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::{Config, Mode, WorkType};
use crate::dispatch::Dispatcher;
use crate::errors::{EventParseError, PipelineError};
use crate::event::{BinEvent, EventBody};
use crate::schema::SchemaCache;
use crate::sink::LineSink;
use crate::sqlgen;
use crate::stats::{StatsAggregator, StatsEvent};
use crate::{binlog_file, repl};

/// Depth of every inter-stage queue. Deep enough to ride out bursts, small
/// enough to bound memory when a stage stalls.
const QUEUE_DEPTH: usize = 1024;

/// Run the whole translation: reader → workers → re-sequenced sink, with
/// the stats aggregator alongside. Returns after every stage has drained;
/// the first error wins.
pub async fn run(mut cfg: Config) -> Result<(), PipelineError> {
    cfg.validate()?;
    let cfg = Arc::new(cfg);
    let schema = Arc::new(SchemaCache::from_config(&cfg));
    run_with_schema(cfg, schema).await
}

/// Like [`run`], with a caller-supplied (possibly preloaded) schema cache.
pub async fn run_with_schema(
    cfg: Arc<Config>,
    schema: Arc<SchemaCache>,
) -> Result<(), PipelineError> {
    let (stats_tx, stats_rx) = mpsc::channel::<StatsEvent>(QUEUE_DEPTH);
    let stats_sink = LineSink::stats_sink(&cfg)
        .await
        .map_err(PipelineError::Output)?;
    let stats_task = tokio::spawn(stats_loop(cfg.clone(), stats_rx, stats_sink));

    let mut worker_tasks: Vec<JoinHandle<Result<(), PipelineError>>> = Vec::new();
    let mut sink_task: Option<JoinHandle<Result<(), PipelineError>>> = None;
    let event_tx = if cfg.work_type == WorkType::Stats {
        None
    } else {
        let (event_tx, event_rx) = mpsc::channel::<BinEvent>(QUEUE_DEPTH);
        let (out_tx, out_rx) = mpsc::channel::<(u64, Vec<String>)>(QUEUE_DEPTH);
        let sql_sink = LineSink::sql_sink(&cfg)
            .await
            .map_err(PipelineError::Output)?;
        sink_task = Some(tokio::spawn(resequence_loop(out_rx, sql_sink)));
        let shared_rx = Arc::new(Mutex::new(event_rx));
        for worker_id in 1..=cfg.threads {
            worker_tasks.push(tokio::spawn(worker_loop(
                worker_id,
                cfg.clone(),
                schema.clone(),
                shared_rx.clone(),
                out_tx.clone(),
            )));
        }
        Some(event_tx)
    };

    let dispatcher = Dispatcher::new(cfg.clone(), schema.clone(), event_tx, stats_tx);
    let read_result = match cfg.mode {
        Mode::File => binlog_file::run(cfg.clone(), dispatcher).await,
        Mode::Repl => repl::run(cfg.clone(), dispatcher).await,
    };
    // the dispatcher (and with it both senders) is gone now, so every
    // downstream stage sees its queue close and drains out

    let mut first_error = read_result.err();
    for task in worker_tasks {
        collect_error(&mut first_error, task.await);
    }
    if let Some(task) = sink_task {
        collect_error(&mut first_error, task.await);
    }
    collect_error(&mut first_error, stats_task.await);
    schema.close().await;

    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

fn collect_error(
    first: &mut Option<PipelineError>,
    joined: Result<Result<(), PipelineError>, tokio::task::JoinError>,
) {
    let outcome = match joined {
        Ok(inner) => inner,
        Err(join_err) => Err(join_err.into()),
    };
    if let Err(e) = outcome {
        if first.is_none() {
            *first = Some(e);
        }
    }
}

/// One SQL generator. Workers race on the shared receiver and tag their
/// output with the envelope's event index; ordering is the re-sequencer's
/// problem.
async fn worker_loop(
    worker_id: usize,
    cfg: Arc<Config>,
    schema: Arc<SchemaCache>,
    rx: Arc<Mutex<mpsc::Receiver<BinEvent>>>,
    out_tx: mpsc::Sender<(u64, Vec<String>)>,
) -> Result<(), PipelineError> {
    loop {
        let ev = { rx.lock().await.recv().await };
        let ev = match ev {
            Some(ev) => ev,
            None => break,
        };
        let lines = match &ev.body {
            EventBody::Rows(change) => {
                let tbl = schema.get(&change.schema_name, &change.table_name).await?;
                let stmts = sqlgen::generate_statements(change, ev.kind, &tbl, &cfg)
                    .map_err(EventParseError::from)?;
                let mut lines = Vec::with_capacity(stmts.len() + 1);
                if cfg.extra_info && !stmts.is_empty() {
                    lines.push(extra_info_comment(&ev));
                }
                lines.extend(stmts);
                lines
            }
            // transaction markers produce no statements; their index still
            // has to reach the re-sequencer so it can advance
            EventBody::Query(_) => Vec::new(),
        };
        if out_tx.send((ev.event_idx, lines)).await.is_err() {
            break;
        }
    }
    info!(worker_id, "sql worker drained");
    Ok(())
}

fn extra_info_comment(ev: &BinEvent) -> String {
    let (table, rows) = match &ev.body {
        EventBody::Rows(change) => (
            format!("{}.{}", change.schema_name, change.table_name),
            change.affected_rows(ev.kind),
        ),
        EventBody::Query(_) => (String::new(), 0),
    };
    let when = Local
        .timestamp_opt(i64::from(ev.timestamp), 0)
        .single()
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| ev.timestamp.to_string());
    format!(
        "-- [{}] [{} {} {}] [{}] [{}] [rows={}]",
        when, ev.pos.name, ev.start_pos, ev.pos.pos, table, ev.kind, rows
    )
}

/// Re-sequence worker output by event index before writing, so parallel
/// generation never reorders statements. Buffering is bounded by the spread
/// of in-flight indices, which the bounded queues already cap.
async fn resequence_loop(
    mut rx: mpsc::Receiver<(u64, Vec<String>)>,
    mut sink: LineSink,
) -> Result<(), PipelineError> {
    let mut next_expected: u64 = 1;
    let mut pending: BTreeMap<u64, Vec<String>> = BTreeMap::new();
    while let Some((idx, lines)) = rx.recv().await {
        pending.insert(idx, lines);
        while let Some(lines) = pending.remove(&next_expected) {
            for line in &lines {
                sink.write_line(line).await.map_err(PipelineError::Output)?;
            }
            next_expected += 1;
        }
    }
    if !pending.is_empty() {
        // only reachable when a worker died mid-stream; keep whatever
        // arrived, in order
        warn!(
            missing_index = next_expected,
            buffered = pending.len(),
            "output gap left by failed worker"
        );
        for (_, lines) in pending {
            for line in &lines {
                sink.write_line(line).await.map_err(PipelineError::Output)?;
            }
        }
    }
    sink.flush().await.map_err(PipelineError::Output)?;
    Ok(())
}

/// Collect stats rows until the reader closes the queue, then render the
/// bucket table in one go.
async fn stats_loop(
    cfg: Arc<Config>,
    mut rx: mpsc::Receiver<StatsEvent>,
    mut sink: LineSink,
) -> Result<(), PipelineError> {
    let mut agg = StatsAggregator::new(cfg.stats_interval);
    while let Some(ev) = rx.recv().await {
        agg.record(ev);
    }
    sink.write_line(StatsAggregator::HEADER)
        .await
        .map_err(PipelineError::Output)?;
    for row in agg.rows() {
        sink.write_line(&row).await.map_err(PipelineError::Output)?;
    }
    sink.flush().await.map_err(PipelineError::Output)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn drive_resequencer(batches: Vec<(u64, Vec<String>)>) -> Vec<String> {
        let dir = std::env::temp_dir().join(format!(
            "binflash-reseq-{}-{}",
            std::process::id(),
            batches.len()
        ));
        tokio::fs::create_dir_all(&dir).await.unwrap();
        let cfg = Config {
            work_type: WorkType::TwoSql,
            output_dir: dir.clone(),
            ..Config::default()
        };
        let sink = LineSink::sql_sink(&cfg).await.unwrap();
        let (tx, rx) = mpsc::channel(16);
        let task = tokio::spawn(resequence_loop(rx, sink));
        for batch in batches {
            tx.send(batch).await.unwrap();
        }
        drop(tx);
        task.await.unwrap().unwrap();
        let written = tokio::fs::read_to_string(dir.join("forward.sql"))
            .await
            .unwrap();
        tokio::fs::remove_dir_all(&dir).await.ok();
        written.lines().map(|l| l.to_owned()).collect()
    }

    #[tokio::test]
    async fn test_resequencer_orders_out_of_order_completions() {
        let lines = drive_resequencer(vec![
            (2, vec!["second;".to_owned()]),
            (3, vec!["third;".to_owned()]),
            (1, vec!["first;".to_owned()]),
        ])
        .await;
        assert_eq!(lines, vec!["first;", "second;", "third;"]);
    }

    #[tokio::test]
    async fn test_resequencer_skips_empty_marker_batches() {
        let lines = drive_resequencer(vec![
            (1, vec![]),
            (3, vec!["dml;".to_owned()]),
            (2, vec![]),
            (4, vec![]),
        ])
        .await;
        assert_eq!(lines, vec!["dml;"]);
    }
}
