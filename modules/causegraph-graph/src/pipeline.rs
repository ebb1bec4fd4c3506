//! Run controller.
//!
//! A run is two explicit steps:
//! 1. **Reset**: wipe the graph so the run starts from a clean baseline
//!    (skipped when `reset_before_run` is off).
//! 2. **Ingest**: stream rows in table order, one at a time, through
//!    normalize → upsert.
//!
//! Row-scoped problems are recorded in the [`RunSummary`] and the run moves
//! on. A schema violation halts the run, since every later row would fail
//! the same way.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, error, info, warn};

use causegraph_common::{normalize, AccidentRecord, IngestConfig, IngestError};

use crate::store::GraphStore;
use crate::upsert::{with_retry, Upserter};

const PROGRESS_EVERY: usize = 1000;

/// An input record together with its 1-based row in the source table.
///
/// Bare records are numbered by their position in the stream. Readers that
/// drop undecodable rows yield `(row, record)` pairs so later rows keep
/// their true position.
pub trait TableRow {
    fn into_row(self, position: usize) -> (usize, AccidentRecord);
}

impl TableRow for AccidentRecord {
    fn into_row(self, position: usize) -> (usize, AccidentRecord) {
        (position, self)
    }
}

impl TableRow for (usize, AccidentRecord) {
    fn into_row(self, _position: usize) -> (usize, AccidentRecord) {
        self
    }
}

/// What happened to one row.
#[derive(Debug, Clone, PartialEq)]
pub enum RowOutcome {
    /// Accident, topic, location and every vehicle were upserted.
    Complete,
    /// Some of the row made it into the graph, some did not.
    Partial { reasons: Vec<String> },
    /// Nothing from the row is in the graph.
    Skipped { reason: IngestError },
}

/// A row that did not load cleanly.
#[derive(Debug, Clone, PartialEq)]
pub struct RowReport {
    pub row: usize,
    pub oid: Option<String>,
    pub reasons: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    pub complete: usize,
    pub partial: Vec<RowReport>,
    pub skipped: Vec<RowReport>,
    /// The run was stopped at a row boundary before the table ran out.
    pub interrupted: bool,
}

impl RunSummary {
    pub fn rows_seen(&self) -> usize {
        self.complete + self.partial.len() + self.skipped.len()
    }

    fn record(&mut self, row: usize, oid: Option<String>, outcome: RowOutcome) {
        match outcome {
            RowOutcome::Complete => self.complete += 1,
            RowOutcome::Partial { reasons } => self.partial.push(RowReport { row, oid, reasons }),
            RowOutcome::Skipped { reason } => self.skipped.push(RowReport {
                row,
                oid,
                reasons: vec![reason.to_string()],
            }),
        }
    }
}

/// The run stopped on a run-scoped failure.
#[derive(Error, Debug)]
#[error("Ingestion halted: {error}")]
pub struct RunHalted {
    pub error: IngestError,
    /// Progress up to the failing row.
    pub summary: RunSummary,
}

pub struct Pipeline {
    store: Arc<dyn GraphStore>,
    upserter: Upserter,
    config: IngestConfig,
    stop: Arc<AtomicBool>,
}

impl Pipeline {
    pub fn new(store: Arc<dyn GraphStore>, config: IngestConfig) -> Self {
        let upserter = Upserter::new(store.clone(), config.clone());
        Self {
            store,
            upserter,
            config,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flag that stops the run at the next row boundary once set.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    /// Delete all nodes and relationships. Retried like any other store call.
    pub async fn reset(&self) -> Result<(), IngestError> {
        with_retry(&self.config, "wipe", || self.store.wipe())
            .await
            .map_err(IngestError::from)
    }

    /// Reset (if configured), then ingest every record.
    pub async fn run<I>(&self, records: I) -> Result<RunSummary, RunHalted>
    where
        I: IntoIterator,
        I::Item: TableRow,
    {
        if self.config.reset_before_run {
            self.reset().await.map_err(|error| RunHalted {
                error,
                summary: RunSummary::default(),
            })?;
        } else {
            info!("Incremental run: keeping existing graph data");
        }
        self.ingest(records).await
    }

    /// Stream records through normalize → upsert in table order.
    pub async fn ingest<I>(&self, records: I) -> Result<RunSummary, RunHalted>
    where
        I: IntoIterator,
        I::Item: TableRow,
    {
        let mut summary = RunSummary::default();
        info!(
            transactions = self.config.row_transactions,
            vehicle_identity = %self.config.vehicle_identity,
            "Ingestion starting"
        );

        for (i, item) in records.into_iter().enumerate() {
            if self.stop.load(Ordering::SeqCst) {
                warn!(
                    rows = summary.rows_seen(),
                    "Stop requested, ending run at row boundary"
                );
                summary.interrupted = true;
                break;
            }

            let (row, record) = item.into_row(i + 1);
            let oid = record
                .oid
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string);
            match self.process_row(row, record).await {
                Ok(outcome) => summary.record(row, oid, outcome),
                Err(error) => {
                    error!(
                        row,
                        oid = oid.as_deref().unwrap_or(""),
                        error = %error,
                        "Run-scoped failure, halting"
                    );
                    return Err(RunHalted { error, summary });
                }
            }

            let seen = summary.rows_seen();
            if seen % PROGRESS_EVERY == 0 {
                info!(
                    rows = seen,
                    complete = summary.complete,
                    partial = summary.partial.len(),
                    skipped = summary.skipped.len(),
                    "Ingestion progress"
                );
            }
        }

        info!(
            complete = summary.complete,
            partial = summary.partial.len(),
            skipped = summary.skipped.len(),
            interrupted = summary.interrupted,
            "Ingestion complete"
        );
        Ok(summary)
    }

    /// Normalize and upsert one row. Only run-scoped failures come back as `Err`.
    pub async fn process_row(
        &self,
        row: usize,
        record: AccidentRecord,
    ) -> Result<RowOutcome, IngestError> {
        let record = match normalize(row, record) {
            Ok(r) => r,
            Err(missing) => {
                warn!(row, field = missing.field, "Row has no identity key, skipping");
                return Ok(RowOutcome::Skipped {
                    reason: missing.into(),
                });
            }
        };

        match self.upserter.upsert(&record).await {
            Ok(_) if record.has_vehicle_problems() => Ok(RowOutcome::Partial {
                reasons: record.vehicle_problems(),
            }),
            Ok(_) => {
                debug!(row, oid = record.oid.as_str(), "Row complete");
                Ok(RowOutcome::Complete)
            }
            Err(failure) if failure.error.is_fatal() => Err(failure.error.into()),
            Err(failure) => {
                let reason = IngestError::from(failure.error);
                warn!(
                    row,
                    oid = record.oid.as_str(),
                    committed = failure.committed,
                    error = %reason,
                    "Row upsert failed"
                );
                if failure.committed == 0 {
                    Ok(RowOutcome::Skipped { reason })
                } else {
                    let mut reasons = vec![reason.to_string()];
                    reasons.extend(record.vehicle_problems());
                    Ok(RowOutcome::Partial { reasons })
                }
            }
        }
    }
}
