//! Run results as handed over by the orchestration runtime adapter.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

use super::usage::{CallUsage, RawResponse};

/// Unique run identifier.
pub type RunId = Uuid;

/// How a run's output was delivered.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RunMode {
    /// The ledger already reflects every call, nested sub-runs included.
    Batch,
    /// The ledger only reflects nested sub-run calls; top-level streamed
    /// calls exist only in the raw response list.
    Streaming,
}

/// Usage sources for a run, tagged by delivery mode at the adapter boundary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum RunDelivery {
    Batch {
        #[serde(default)]
        ledger: Vec<CallUsage>,
    },
    Streaming {
        #[serde(default)]
        ledger: Vec<CallUsage>,
        #[serde(default, rename = "rawResponses", alias = "raw_responses")]
        raw_responses: Vec<RawResponse>,
    },
}

/// A finished (or in-flight, when streaming) run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RunResult {
    #[serde(default = "Uuid::new_v4", alias = "run_id")]
    pub run_id: RunId,
    #[serde(flatten)]
    pub delivery: RunDelivery,
    #[serde(default, alias = "last_agent", skip_serializing_if = "Option::is_none")]
    pub last_agent: Option<String>,
    #[serde(default, alias = "last_response_id", skip_serializing_if = "Option::is_none")]
    pub last_response_id: Option<String>,
}

impl RunResult {
    pub fn batch(ledger: Vec<CallUsage>) -> Self {
        Self::with_delivery(RunDelivery::Batch { ledger })
    }

    pub fn streaming(ledger: Vec<CallUsage>, raw_responses: Vec<RawResponse>) -> Self {
        Self::with_delivery(RunDelivery::Streaming {
            ledger,
            raw_responses,
        })
    }

    fn with_delivery(delivery: RunDelivery) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            delivery,
            last_agent: None,
            last_response_id: None,
        }
    }

    pub fn with_run_id(mut self, run_id: RunId) -> Self {
        self.run_id = run_id;
        self
    }

    pub fn with_last_agent(mut self, agent: impl Into<String>) -> Self {
        self.last_agent = Some(agent.into());
        self
    }

    pub fn with_last_response_id(mut self, response_id: impl Into<String>) -> Self {
        self.last_response_id = Some(response_id.into());
        self
    }

    /// Classify the run from its delivery tag.
    pub fn mode(&self) -> RunMode {
        match self.delivery {
            RunDelivery::Batch { .. } => RunMode::Batch,
            RunDelivery::Streaming { .. } => RunMode::Streaming,
        }
    }

    /// The runtime's aggregate usage ledger.
    pub fn ledger(&self) -> &[CallUsage] {
        match &self.delivery {
            RunDelivery::Batch { ledger } | RunDelivery::Streaming { ledger, .. } => ledger,
        }
    }

    /// Raw per-call responses. Always empty for batch runs.
    pub fn raw_responses(&self) -> &[RawResponse] {
        match &self.delivery {
            RunDelivery::Batch { .. } => &[],
            RunDelivery::Streaming { raw_responses, .. } => raw_responses,
        }
    }

    /// The explicit last response id, else the last raw response that has one.
    pub fn last_response_id(&self) -> Option<&str> {
        self.last_response_id.as_deref().or_else(|| {
            self.raw_responses()
                .iter()
                .rev()
                .find_map(|response| response.response_id.as_deref())
        })
    }
}

/// Caller-supplied context for one summarization.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TurnContext {
    pub conversation_id: Option<String>,
    pub tag: Option<String>,
}

impl TurnContext {
    pub fn new(conversation_id: impl Into<String>) -> Self {
        Self {
            conversation_id: Some(conversation_id.into()),
            tag: None,
        }
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn mode_follows_delivery_tag() {
        assert_eq!(RunResult::batch(Vec::new()).mode(), RunMode::Batch);
        assert_eq!(
            RunResult::streaming(Vec::new(), Vec::new()).mode(),
            RunMode::Streaming
        );
    }

    #[test]
    fn adapter_json_deserializes_into_tagged_delivery() {
        let run: RunResult = serde_json::from_value(json!({
            "mode": "streaming",
            "ledger": [{ "inputTokens": 1, "outputTokens": 2, "totalTokens": 3 }],
            "rawResponses": [{ "responseId": "r1", "usage": { "inputTokens": 5 } }],
            "lastAgent": "triage",
        }))
        .unwrap();

        assert_eq!(run.mode(), RunMode::Streaming);
        assert_eq!(run.ledger().len(), 1);
        assert_eq!(run.raw_responses()[0].usage.input_tokens, 5);
        assert_eq!(run.last_agent.as_deref(), Some("triage"));
        assert_eq!(run.last_response_id(), Some("r1"));
    }

    #[test]
    fn explicit_last_response_id_wins() {
        let run = RunResult::streaming(
            Vec::new(),
            vec![RawResponse::new("r1", CallUsage::default())],
        )
        .with_last_response_id("explicit");
        assert_eq!(run.last_response_id(), Some("explicit"));
    }

    #[test]
    fn run_mode_display_is_snake_case() {
        assert_eq!(RunMode::Streaming.to_string(), "streaming");
        assert_eq!("batch".parse::<RunMode>().unwrap(), RunMode::Batch);
    }
}
