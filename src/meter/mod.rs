//! The accounting facade: summarize a run and schedule its persistence.

mod worker;

use chrono::Utc;
use tracing::{debug, warn};

use crate::config::MeterConfig;
use crate::error::Result;
use crate::rollup::{RollupStore, RollupTurnEntry, TurnUsage};
use crate::trace::{TraceDump, TraceDumpRecord};
use crate::types::{RunId, RunResult, RunUsageSummary, TurnContext};
use crate::usage::{RunMarkers, RunStateTable, RunSummarizer};

use worker::{PersistJob, PersistenceQueue};

/// Summarizes runs and persists trace dumps and rollups in the background.
///
/// [`summarize`](Self::summarize) never blocks on disk and never fails;
/// persistence runs on a worker task and its errors are only logged.
///
/// # Example
/// ```no_run
/// use turnmeter::prelude::*;
///
/// # async fn example() {
/// let meter = UsageMeter::new(MeterConfig::global().clone());
/// let mut run = RunResult::batch(vec![CallUsage::new(120, 30, 150)]);
/// let summary = meter.summarize(&mut run, &TurnContext::new("chat-42"));
/// assert_eq!(summary.requests, 1);
/// # }
/// ```
#[derive(Debug)]
pub struct UsageMeter {
    config: MeterConfig,
    summarizer: RunSummarizer,
    markers: RunStateTable,
    queue: Option<PersistenceQueue>,
}

impl UsageMeter {
    /// Build a meter from `config`.
    ///
    /// When persistence is enabled this spawns the worker on the current
    /// tokio runtime; outside a runtime the meter still summarizes but
    /// persists nothing.
    pub fn new(config: MeterConfig) -> Self {
        let queue = if config.persists() {
            match tokio::runtime::Handle::try_current() {
                Ok(runtime) => {
                    let (queue, _worker) = PersistenceQueue::spawn(
                        &runtime,
                        config.queue_capacity,
                        TraceDump::new(&config.trace_dir),
                        RollupStore::new(&config.trace_dir),
                    );
                    Some(queue)
                }
                Err(_) => {
                    warn!("no tokio runtime available; usage persistence disabled");
                    None
                }
            }
        } else {
            None
        };

        Self {
            summarizer: RunSummarizer::new(config.backfill),
            markers: RunStateTable::with_capacity(config.max_tracked_runs),
            config,
            queue,
        }
    }

    /// Build a meter that only summarizes.
    pub fn without_persistence(config: MeterConfig) -> Self {
        Self {
            summarizer: RunSummarizer::new(config.backfill),
            markers: RunStateTable::with_capacity(config.max_tracked_runs),
            config,
            queue: None,
        }
    }

    pub fn config(&self) -> &MeterConfig {
        &self.config
    }

    /// Summarize `run`.
    ///
    /// Repeated calls on the same run return the same summary, write at most
    /// one trace dump and append at most one rollup entry.
    pub fn summarize(&self, run: &mut RunResult, ctx: &TurnContext) -> RunUsageSummary {
        self.markers.with_markers(run.run_id, |markers| {
            if self.config.trace_dump {
                self.schedule_trace(run, ctx, markers);
            }

            let summary = self.summarizer.summarize(run, markers);
            debug!(
                run_id = %run.run_id,
                mode = %run.mode(),
                summary = %summary,
                "run usage summarized"
            );

            if self.config.rollup {
                self.schedule_rollup(run, ctx, &summary, markers);
            }
            summary
        })
    }

    /// Wait until all persistence scheduled so far has finished.
    pub async fn flush(&self) -> Result<()> {
        match &self.queue {
            Some(queue) => queue.flush().await,
            None => Ok(()),
        }
    }

    /// Markers recorded for `run_id`, if it has been summarized.
    pub fn markers(&self, run_id: RunId) -> Option<RunMarkers> {
        self.markers.get(run_id)
    }

    /// Release the markers for a run that will not be summarized again.
    pub fn forget(&self, run_id: RunId) -> Option<RunMarkers> {
        self.markers.forget(run_id)
    }

    fn schedule_trace(&self, run: &RunResult, ctx: &TurnContext, markers: &mut RunMarkers) {
        if markers.dump_path.is_some() {
            return;
        }
        let Some(queue) = &self.queue else {
            return;
        };

        let record = TraceDumpRecord::capture(run, ctx, Utc::now());
        let path = TraceDump::new(&self.config.trace_dir).path_for(&record);
        if queue.enqueue(PersistJob::Trace {
            path: path.clone(),
            record: Box::new(record),
        }) {
            debug!(run_id = %run.run_id, path = %path.display(), "trace dump scheduled");
            markers.dump_path = Some(path);
        }
    }

    fn schedule_rollup(
        &self,
        run: &RunResult,
        ctx: &TurnContext,
        summary: &RunUsageSummary,
        markers: &mut RunMarkers,
    ) {
        if markers.rollup_appended {
            return;
        }
        let Some(queue) = &self.queue else {
            return;
        };

        let entry = RollupTurnEntry {
            tag: ctx.tag.clone(),
            run_id: Some(run.run_id),
            last_response_id: run.last_response_id().map(str::to_string),
            last_agent: run.last_agent.clone(),
            dump_path: markers
                .dump_path
                .as_ref()
                .map(|path| path.display().to_string()),
            ..RollupTurnEntry::new(Utc::now(), TurnUsage::from(summary))
        };
        if queue.enqueue(PersistJob::Rollup {
            chat_id: ctx.conversation_id.clone(),
            entry,
        }) {
            markers.rollup_appended = true;
        }
    }
}

impl From<MeterConfig> for UsageMeter {
    fn from(config: MeterConfig) -> Self {
        Self::new(config)
    }
}
