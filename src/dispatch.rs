use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::config::{Config, WorkType};
use crate::errors::PipelineError;
use crate::event::{
    BinEvent, DmlKind, EventBody, EventData, EventHeader, TrxStatus, TypeCode,
};
use crate::filter::{self, Gate};
use crate::position::BinlogPosition;
use crate::schema::SchemaCache;
use crate::stats::StatsEvent;
use crate::table_map::TableMap;

/// What the reader should do after one event is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Stop,
}

/// Header-gate verdict: whether an event is worth decoding at all. Rotate
/// and table-map events decode even when the range filter skips them, to
/// keep the reader context coherent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admit {
    Stop,
    Skip,
    Decode,
}

/// The per-run event path shared by both reader variants: gate on the
/// header, track table-map and transaction state, resolve schemas, and
/// enqueue envelopes and stats rows. The file reader hands in raw bodies
/// via [`Dispatcher::handle`]; the replica reader gates with
/// [`Dispatcher::admit`] and hands in already-decoded events via
/// [`Dispatcher::apply`].
///
/// Owns every piece of once-global state — the current binlog name, the
/// table map, and the event/transaction counters — so nothing here outlives
/// the reader run that created it.
pub struct Dispatcher {
    cfg: Arc<Config>,
    schema: Arc<SchemaCache>,
    table_map: TableMap,
    current_binlog: String,
    tb_map_pos: u32,
    event_idx: u64,
    trx_idx: u64,
    event_tx: Option<mpsc::Sender<BinEvent>>,
    stats_tx: mpsc::Sender<StatsEvent>,
}

impl Dispatcher {
    pub fn new(
        cfg: Arc<Config>,
        schema: Arc<SchemaCache>,
        event_tx: Option<mpsc::Sender<BinEvent>>,
        stats_tx: mpsc::Sender<StatsEvent>,
    ) -> Self {
        let current_binlog = cfg
            .start_position
            .as_ref()
            .map(|p| p.name.clone())
            .unwrap_or_default();
        Dispatcher {
            cfg,
            schema,
            table_map: TableMap::new(),
            current_binlog,
            tb_map_pos: 0,
            event_idx: 0,
            trx_idx: 0,
            event_tx,
            stats_tx,
        }
    }

    pub fn current_binlog(&self) -> &str {
        &self.current_binlog
    }

    /// File-mode reader switches files by suffix; keep the envelope
    /// positions in step.
    pub fn set_current_binlog(&mut self, name: &str) {
        self.current_binlog = name.to_owned();
    }

    /// File-mode entry point: gate on the header, decode the raw body,
    /// apply.
    pub async fn handle(
        &mut self,
        header: &EventHeader,
        body: &[u8],
    ) -> Result<Flow, PipelineError> {
        match self.admit(header) {
            Admit::Stop => Ok(Flow::Stop),
            Admit::Skip => Ok(Flow::Continue),
            Admit::Decode => {
                let data = EventData::from_data(header.type_code, body, &self.table_map)?;
                self.apply(header, data).await
            }
        }
    }

    /// Position, time and DML-kind gates, applied to the header alone so
    /// skipped events never pay for body decoding. Rotate always decodes
    /// (it renames the stream); table maps decode even when range-skipped,
    /// because a row event just inside the range needs the map written
    /// just before it.
    pub fn admit(&self, header: &EventHeader) -> Admit {
        if header.type_code == TypeCode::RotateEvent {
            return Admit::Decode;
        }
        let pos = BinlogPosition::new(self.current_binlog.clone(), header.log_pos);
        match filter::check_header(&self.cfg, &pos, header.timestamp) {
            Gate::Stop => {
                info!(position = %pos, "stop condition reached, ending stream");
                return Admit::Stop;
            }
            Gate::Skip => {
                return if header.type_code == TypeCode::TableMapEvent {
                    Admit::Decode
                } else {
                    Admit::Skip
                };
            }
            Gate::Pass => {}
        }
        if filter::check_dml_kind(&self.cfg, header.type_code) == Gate::Skip {
            return Admit::Skip;
        }
        Admit::Decode
    }

    /// Act on one decoded event: track rotate/table-map state, tag and
    /// enqueue the rest.
    pub async fn apply(
        &mut self,
        header: &EventHeader,
        data: Option<EventData>,
    ) -> Result<Flow, PipelineError> {
        let pos = BinlogPosition::new(self.current_binlog.clone(), header.log_pos);
        match data {
            Some(EventData::Rotate { next_log_name, .. }) => {
                debug!(next = %next_log_name, "rotate event");
                self.current_binlog = next_log_name;
                Ok(Flow::Continue)
            }
            Some(EventData::TableMap {
                table_id,
                schema_name,
                table_name,
                columns,
            }) => {
                self.tb_map_pos = header.start_pos();
                self.table_map
                    .handle(table_id, schema_name, table_name, columns);
                Ok(Flow::Continue)
            }
            Some(EventData::Rows { kind, change }) => {
                if !filter::table_allowed(&self.cfg, &change.schema_name, &change.table_name) {
                    return Ok(Flow::Continue);
                }
                if self.cfg.work_type != WorkType::Stats {
                    // resolve (and cache) the schema up front so workers
                    // always hit; unresolvable tables are fatal here
                    self.schema
                        .get(&change.schema_name, &change.table_name)
                        .await?;
                }
                let stats = StatsEvent {
                    timestamp: header.timestamp,
                    binlog: self.current_binlog.clone(),
                    start_pos: self.tb_map_pos,
                    stop_pos: header.log_pos,
                    database: change.schema_name.clone(),
                    table: change.table_name.clone(),
                    query_sql: String::new(),
                    row_cnt: change.affected_rows(kind),
                    kind,
                };
                let start_pos = self.tb_map_pos;
                let trx_idx = self.trx_idx;
                let timestamp = header.timestamp;
                let envelope = move |event_idx| BinEvent {
                    pos,
                    start_pos,
                    event_idx,
                    trx_idx,
                    trx_status: TrxStatus::InProgress,
                    timestamp,
                    kind,
                    body: EventBody::Rows(change),
                };
                self.enqueue(Some(envelope), stats).await
            }
            Some(EventData::Query { schema, query }) => {
                let lowered = query.trim().to_lowercase();
                let status = match lowered.as_str() {
                    "begin" => {
                        self.trx_idx += 1;
                        Some(TrxStatus::Begin)
                    }
                    "commit" => Some(TrxStatus::Commit),
                    "rollback" => Some(TrxStatus::Rollback),
                    // DDL and other statements are stats-only
                    _ => None,
                };
                let stats = StatsEvent {
                    timestamp: header.timestamp,
                    binlog: self.current_binlog.clone(),
                    start_pos: header.start_pos(),
                    stop_pos: header.log_pos,
                    database: schema,
                    table: String::new(),
                    query_sql: query.clone(),
                    row_cnt: if status.is_none() { 1 } else { 0 },
                    kind: DmlKind::Query,
                };
                match status {
                    Some(trx_status) => {
                        let trx_idx = self.trx_idx;
                        let start_pos = header.start_pos();
                        let timestamp = header.timestamp;
                        let envelope = move |event_idx| BinEvent {
                            pos,
                            start_pos,
                            event_idx,
                            trx_idx,
                            trx_status,
                            timestamp,
                            kind: DmlKind::Query,
                            body: EventBody::Query(query),
                        };
                        self.enqueue(Some(envelope), stats).await
                    }
                    None => self.enqueue::<fn(u64) -> BinEvent>(None, stats).await,
                }
            }
            Some(EventData::Xid { .. }) => {
                // implicit commit of the surrounding transaction
                let stats = StatsEvent {
                    timestamp: header.timestamp,
                    binlog: self.current_binlog.clone(),
                    start_pos: header.start_pos(),
                    stop_pos: header.log_pos,
                    database: String::new(),
                    table: String::new(),
                    query_sql: "COMMIT".to_owned(),
                    row_cnt: 0,
                    kind: DmlKind::Query,
                };
                let trx_idx = self.trx_idx;
                let start_pos = header.start_pos();
                let timestamp = header.timestamp;
                let envelope = move |event_idx| BinEvent {
                    pos,
                    start_pos,
                    event_idx,
                    trx_idx,
                    trx_status: TrxStatus::Commit,
                    timestamp,
                    kind: DmlKind::Query,
                    body: EventBody::Query("COMMIT".to_owned()),
                };
                self.enqueue(Some(envelope), stats).await
            }
            _ => Ok(Flow::Continue),
        }
    }

    /// Push an envelope (when the work type wants one) and its stats row.
    /// A closed queue means a downstream stage already died; its own error
    /// is the interesting one, so the reader just stops.
    async fn enqueue<F>(
        &mut self,
        envelope: Option<F>,
        stats: StatsEvent,
    ) -> Result<Flow, PipelineError>
    where
        F: FnOnce(u64) -> BinEvent,
    {
        if let (Some(tx), Some(make)) = (self.event_tx.as_ref(), envelope) {
            self.event_idx += 1;
            if tx.send(make(self.event_idx)).await.is_err() {
                return Ok(Flow::Stop);
            }
        }
        if self.stats_tx.send(stats).await.is_err() {
            return Ok(Flow::Stop);
        }
        Ok(Flow::Continue)
    }
}
