//! Reconciling a run's ledger and raw responses into one summary.

use tracing::debug;

use crate::types::{CallUsage, RawResponse, RunDelivery, RunMode, RunResult, RunUsageSummary};

use super::extract::extract_usage;
use super::state::RunMarkers;

/// Computes [`RunUsageSummary`] values without double counting.
#[derive(Debug, Clone, Copy)]
pub struct RunSummarizer {
    backfill: bool,
}

impl Default for RunSummarizer {
    fn default() -> Self {
        Self { backfill: true }
    }
}

impl RunSummarizer {
    /// `backfill` controls whether a streaming run's raw usage is merged into
    /// its ledger after the first summary.
    pub fn new(backfill: bool) -> Self {
        Self { backfill }
    }

    pub fn backfill(&self) -> bool {
        self.backfill
    }

    /// Summarize `run`, consulting and updating its markers.
    ///
    /// Batch runs, and streaming runs that were already backfilled, are read
    /// from the ledger alone. The first summary of a streaming run combines
    /// the ledger (nested sub-run calls) with the raw responses (top-level
    /// streamed calls), ledger entries first.
    pub fn summarize(&self, run: &mut RunResult, markers: &mut RunMarkers) -> RunUsageSummary {
        let run_id = run.run_id;
        if !markers.backfilled && ledger_holds_raw_responses(&run.delivery) {
            // Markers were evicted after an earlier backfill.
            debug!(run_id = %run_id, "ledger already backfilled, restoring marker");
            markers.backfilled = true;
        }
        match (run.mode(), markers.backfilled) {
            (RunMode::Batch, _) | (RunMode::Streaming, true) => summarize_ledger(run.ledger()),
            (RunMode::Streaming, false) => {
                let nested = summarize_ledger(run.ledger());
                let streamed = summarize_responses(run.raw_responses());
                let combined = nested.merge(streamed);

                if self.backfill {
                    let merged = backfill_ledger(&mut run.delivery);
                    markers.backfilled = true;
                    debug!(run_id = %run_id, merged, "backfilled streamed usage into ledger");
                }
                combined
            }
        }
    }
}

/// Summarize ledger entries in order.
pub fn summarize_ledger(ledger: &[CallUsage]) -> RunUsageSummary {
    RunUsageSummary::from_records(
        ledger
            .iter()
            .map(|usage| extract_usage(usage, usage.response_id.as_deref())),
    )
}

/// Summarize raw responses in order, keeping their response ids.
pub fn summarize_responses(responses: &[RawResponse]) -> RunUsageSummary {
    RunUsageSummary::from_records(
        responses.iter().map(|response| {
            let response_id = response
                .response_id
                .as_deref()
                .or(response.usage.response_id.as_deref());
            extract_usage(&response.usage, response_id)
        }),
    )
}

/// Whether the ledger ends with the identified copies a backfill appends.
fn ledger_holds_raw_responses(delivery: &RunDelivery) -> bool {
    let RunDelivery::Streaming {
        ledger,
        raw_responses,
    } = delivery
    else {
        return false;
    };
    if raw_responses.is_empty() || ledger.len() < raw_responses.len() {
        return false;
    }
    let tail = &ledger[ledger.len() - raw_responses.len()..];
    tail.iter().zip(raw_responses).all(|(entry, response)| {
        let expected = backfilled_id(response);
        expected.is_some() && entry.response_id.as_deref() == expected
    })
}

fn backfilled_id(response: &RawResponse) -> Option<&str> {
    response
        .usage
        .response_id
        .as_deref()
        .or(response.response_id.as_deref())
}

fn backfill_ledger(delivery: &mut RunDelivery) -> usize {
    match delivery {
        RunDelivery::Batch { .. } => 0,
        RunDelivery::Streaming {
            ledger,
            raw_responses,
        } => {
            ledger.extend(raw_responses.iter().map(|response| {
                let mut usage = response.usage.clone();
                if usage.response_id.is_none() {
                    usage.response_id = response.response_id.clone();
                }
                usage
            }));
            raw_responses.len()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn worked_example() -> RunResult {
        RunResult::streaming(
            vec![CallUsage::new(100, 20, 120).with_cached_tokens(10)],
            vec![RawResponse::new(
                "r1",
                CallUsage::new(50, 5, 55)
                    .with_cached_tokens(0)
                    .with_reasoning_tokens(2),
            )],
        )
    }

    #[test]
    fn batch_reads_ledger_only() {
        let mut run = RunResult::batch(vec![
            CallUsage::new(10, 1, 11),
            CallUsage::new(20, 2, 22),
            CallUsage::new(30, 3, 33),
        ]);
        let summary = RunSummarizer::default().summarize(&mut run, &mut RunMarkers::default());

        assert_eq!(summary.requests, 3);
        assert_eq!(summary.total_tokens, 66);
        assert_eq!(summary.per_request.len(), 3);
    }

    #[test]
    fn streaming_first_call_combines_ledger_then_raw() {
        let mut run = worked_example();
        let mut markers = RunMarkers::default();
        let summary = RunSummarizer::default().summarize(&mut run, &mut markers);

        assert_eq!(summary.requests, 2);
        assert_eq!(summary.input_tokens, 150);
        assert_eq!(summary.cached_input_tokens, 10);
        assert_eq!(summary.total_input_tokens, 160);
        assert_eq!(summary.output_tokens, 25);
        assert_eq!(summary.total_tokens, 175);
        assert_eq!(summary.total_tokens_including_cached, 185);
        assert_eq!(summary.reasoning_tokens, 2);

        assert_eq!(summary.per_request[0].request_index, 1);
        assert_eq!(summary.per_request[0].input_tokens, 100);
        assert_eq!(summary.per_request[1].request_index, 2);
        assert_eq!(summary.per_request[1].response_id.as_deref(), Some("r1"));
    }

    #[test]
    fn second_streaming_call_is_identical_after_backfill() {
        let mut run = worked_example();
        let mut markers = RunMarkers::default();
        let summarizer = RunSummarizer::default();

        let first = summarizer.summarize(&mut run, &mut markers);
        assert!(markers.backfilled);
        assert_eq!(run.ledger().len(), 2);

        let second = summarizer.summarize(&mut run, &mut markers);
        assert_eq!(run.ledger().len(), 2);
        assert_eq!(first, second);
    }

    #[test]
    fn disabled_backfill_leaves_ledger_untouched_and_stays_stable() {
        let mut run = worked_example();
        let mut markers = RunMarkers::default();
        let summarizer = RunSummarizer::new(false);

        let first = summarizer.summarize(&mut run, &mut markers);
        let second = summarizer.summarize(&mut run, &mut markers);

        assert!(!markers.backfilled);
        assert_eq!(run.ledger().len(), 1);
        assert_eq!(first, second);
    }

    #[test]
    fn lost_markers_do_not_double_count_a_backfilled_run() {
        let mut run = worked_example();
        let summarizer = RunSummarizer::default();

        let first = summarizer.summarize(&mut run, &mut RunMarkers::default());
        let mut fresh = RunMarkers::default();
        let again = summarizer.summarize(&mut run, &mut fresh);

        assert_eq!(first, again);
        assert!(fresh.backfilled);
        assert_eq!(run.ledger().len(), 2);
    }

    #[test]
    fn aggregate_invariants_hold() {
        let mut run = worked_example();
        let summary = RunSummarizer::default().summarize(&mut run, &mut RunMarkers::default());

        assert_eq!(
            summary.total_input_tokens,
            summary.input_tokens + summary.cached_input_tokens
        );
        assert_eq!(
            summary.total_tokens_including_cached,
            summary.total_input_tokens + summary.output_tokens
        );
        for record in &summary.per_request {
            assert_eq!(
                record.total_input_tokens,
                record.input_tokens + record.cached_input_tokens
            );
        }
    }

    #[test]
    fn empty_streaming_run_yields_empty_summary() {
        let mut run = RunResult::streaming(Vec::new(), Vec::new());
        let summary = RunSummarizer::default().summarize(&mut run, &mut RunMarkers::default());
        assert_eq!(summary, RunUsageSummary::default());
    }
}
