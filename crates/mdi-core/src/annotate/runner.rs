use std::collections::{HashMap, HashSet};

use tokio::task::{Id, JoinError, JoinSet};

use super::machine::AnnotationMachine;
use super::rows::{AnnotationStatus, DocumentRow, OutputRow};
use crate::error::AppError;
use crate::traits::{AnnotationSink, LlmClient};

/// Counts for one annotation run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub total: usize,
    pub skipped: usize,
    pub ok: usize,
    pub failed: usize,
    pub crashed: usize,
}

/// Events emitted by the runner for monitoring/logging.
#[derive(Debug, Clone)]
pub enum AnnotationEvent<'a> {
    Started { pending: usize, skipped: usize },
    Written { row: &'a OutputRow },
    WorkerCrashed { error: &'a str },
    Finished { summary: &'a RunSummary },
}

/// Receives runner events.
pub trait AnnotationReporter: Send + Sync {
    fn report(&self, event: AnnotationEvent<'_>) {
        let _ = event;
    }
}

/// Reporter that uses the `tracing` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl AnnotationReporter for TracingReporter {
    fn report(&self, event: AnnotationEvent<'_>) {
        match event {
            AnnotationEvent::Started { pending, skipped } => {
                tracing::info!(%pending, %skipped, "Annotation started");
            }
            AnnotationEvent::Written { row } => match row.status {
                AnnotationStatus::Ok => {
                    tracing::info!(
                        doc_id = %row.doc_id,
                        stance = %row.stance,
                        attempts = row.attempts,
                        "Document annotated"
                    );
                }
                AnnotationStatus::Failed => {
                    tracing::warn!(
                        doc_id = %row.doc_id,
                        attempts = row.attempts,
                        error = row.error.as_deref().unwrap_or_default(),
                        "Document failed"
                    );
                }
            },
            AnnotationEvent::WorkerCrashed { error } => {
                tracing::error!(%error, "Annotation worker crashed");
            }
            AnnotationEvent::Finished { summary } => {
                tracing::info!(
                    total = summary.total,
                    skipped = summary.skipped,
                    ok = summary.ok,
                    failed = summary.failed,
                    crashed = summary.crashed,
                    "Annotation finished"
                );
            }
        }
    }
}

/// Bounded worker pool around [`AnnotationMachine`]. The driving loop is the
/// only writer to the sink.
pub struct AnnotationRunner<L: LlmClient> {
    machine: AnnotationMachine<L>,
    annotator: String,
    concurrency: usize,
}

impl<L: LlmClient> AnnotationRunner<L> {
    pub fn new(machine: AnnotationMachine<L>, annotator: impl Into<String>, concurrency: usize) -> Self {
        Self {
            machine,
            annotator: annotator.into(),
            concurrency: concurrency.max(1),
        }
    }

    /// Annotate every document whose id is not in `completed`. Every
    /// pending document gets exactly one row.
    ///
    /// Only a sink failure aborts the run; a panicking worker is counted as
    /// crashed and its document is written as a failed row.
    pub async fn run<S, R>(
        &self,
        documents: Vec<DocumentRow>,
        completed: &HashSet<String>,
        sink: &mut S,
        reporter: &R,
    ) -> Result<RunSummary, AppError>
    where
        S: AnnotationSink,
        R: AnnotationReporter,
    {
        let total = documents.len();
        let pending: Vec<DocumentRow> = documents
            .into_iter()
            .filter(|doc| !completed.contains(&doc.doc_id))
            .collect();

        let mut summary = RunSummary {
            total,
            skipped: total - pending.len(),
            ..RunSummary::default()
        };
        reporter.report(AnnotationEvent::Started {
            pending: pending.len(),
            skipped: summary.skipped,
        });

        let mut workers: JoinSet<OutputRow> = JoinSet::new();
        let mut in_flight: HashMap<Id, DocumentRow> = HashMap::new();
        for doc in pending {
            while workers.len() >= self.concurrency {
                if let Some(joined) = workers.join_next_with_id().await {
                    self.record(joined, &mut in_flight, sink, reporter, &mut summary)?;
                }
            }

            let machine = self.machine.clone();
            let annotator = self.annotator.clone();
            let task_doc = doc.clone();
            let handle =
                workers.spawn(async move { machine.run(task_doc).await.into_output(&annotator) });
            in_flight.insert(handle.id(), doc);
        }

        while let Some(joined) = workers.join_next_with_id().await {
            self.record(joined, &mut in_flight, sink, reporter, &mut summary)?;
        }

        reporter.report(AnnotationEvent::Finished { summary: &summary });
        Ok(summary)
    }

    fn record<S, R>(
        &self,
        joined: Result<(Id, OutputRow), JoinError>,
        in_flight: &mut HashMap<Id, DocumentRow>,
        sink: &mut S,
        reporter: &R,
        summary: &mut RunSummary,
    ) -> Result<(), AppError>
    where
        S: AnnotationSink,
        R: AnnotationReporter,
    {
        let row = match joined {
            Ok((id, row)) => {
                in_flight.remove(&id);
                match row.status {
                    AnnotationStatus::Ok => summary.ok += 1,
                    AnnotationStatus::Failed => summary.failed += 1,
                }
                row
            }
            Err(e) => {
                summary.crashed += 1;
                let error = e.to_string();
                reporter.report(AnnotationEvent::WorkerCrashed { error: &error });
                let Some(doc) = in_flight.remove(&e.id()) else {
                    return Ok(());
                };
                let error = format!("worker crashed: {error}");
                OutputRow::failed(&doc, Some(&error), &self.annotator, 0)
            }
        };

        sink.append(&row)?;
        reporter.report(AnnotationEvent::Written { row: &row });
        Ok(())
    }
}
