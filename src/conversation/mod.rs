//! Conversational bot adapter
//!
//! Translates an inbound utterance event into a retrieval + composition run
//! and wraps the answer in a closed, fulfilled dialog response. Pipeline
//! errors become the message text; `handle` itself never fails.

use crate::config::ConversationConfig;
use crate::generation::AnswerComposer;
use crate::retrieval::HybridRetriever;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::Instrument;
use uuid::Uuid;

/// Inbound utterance event
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationEvent {
    #[serde(default)]
    pub input_transcript: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_state: Option<InboundSessionState>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundSessionState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent: Option<InboundIntent>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InboundIntent {
    #[serde(default)]
    pub name: String,
}

impl ConversationEvent {
    pub fn new(input_transcript: impl Into<String>) -> Self {
        Self {
            input_transcript: input_transcript.into(),
            session_state: None,
        }
    }

    fn intent_name(&self) -> Option<&str> {
        self.session_state
            .as_ref()?
            .intent
            .as_ref()
            .map(|i| i.name.as_str())
            .filter(|n| !n.is_empty())
    }
}

/// Response envelope returned to the bot platform
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationResponse {
    pub session_state: SessionState,
    pub messages: Vec<Message>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    pub dialog_action: DialogAction,
    pub intent: Intent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DialogAction {
    #[serde(rename = "type")]
    pub action_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Intent {
    pub name: String,
    pub state: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub content_type: String,
    pub content: String,
}

impl ConversationResponse {
    /// Closed, fulfilled response carrying one plain-text message
    pub fn fulfilled(intent: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            session_state: SessionState {
                dialog_action: DialogAction {
                    action_type: "Close".to_string(),
                },
                intent: Intent {
                    name: intent.into(),
                    state: "Fulfilled".to_string(),
                },
            },
            messages: vec![Message {
                content_type: "PlainText".to_string(),
                content: content.into(),
            }],
        }
    }
}

/// Maps utterances onto the retrieval and answer pipeline
pub struct ConversationalAdapter {
    retriever: Arc<HybridRetriever>,
    composer: Arc<AnswerComposer>,
    limit: usize,
    default_intent: String,
}

impl ConversationalAdapter {
    pub fn new(
        retriever: Arc<HybridRetriever>,
        composer: Arc<AnswerComposer>,
        limit: usize,
        config: &ConversationConfig,
    ) -> Self {
        Self {
            retriever,
            composer,
            limit,
            default_intent: config.default_intent.clone(),
        }
    }

    /// Answer one event
    pub async fn handle(&self, event: &ConversationEvent) -> ConversationResponse {
        let span = tracing::info_span!("request", id = %Uuid::new_v4());

        async {
            let query = event.input_transcript.as_str();
            tracing::info!("Input text: {:?}", query);

            let intent = event
                .intent_name()
                .unwrap_or(&self.default_intent)
                .to_string();

            let documents = self.retriever.retrieve(query, self.limit).await;
            let content = match self.composer.compose(query, documents).await {
                Ok(answer) => {
                    tracing::info!(
                        "Answered from {} documents (generated: {})",
                        answer.source_documents.len(),
                        answer.generated
                    );
                    answer.text
                }
                Err(e) => {
                    tracing::error!("Pipeline failed: {}", e);
                    format!("Unable to process query '{}'. Error: {}", query, e)
                }
            };

            ConversationResponse::fulfilled(intent, content)
        }
        .instrument(span)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_envelope_shape() {
        let response = ConversationResponse::fulfilled("FallbackIntent", "Robin Hood.");
        let value = serde_json::to_value(&response).unwrap();

        assert_eq!(
            value,
            json!({
                "sessionState": {
                    "dialogAction": {"type": "Close"},
                    "intent": {"name": "FallbackIntent", "state": "Fulfilled"}
                },
                "messages": [{"contentType": "PlainText", "content": "Robin Hood."}]
            })
        );
    }

    #[test]
    fn test_event_parsing() {
        let event: ConversationEvent = serde_json::from_value(json!({
            "inputTranscript": "tell me about pirates",
            "sessionState": {"intent": {"name": "MovieQuestion", "state": "InProgress"}},
            "bot": {"name": "movies"}
        }))
        .unwrap();
        assert_eq!(event.input_transcript, "tell me about pirates");
        assert_eq!(event.intent_name(), Some("MovieQuestion"));

        let bare: ConversationEvent = serde_json::from_value(json!({})).unwrap();
        assert_eq!(bare.input_transcript, "");
        assert_eq!(bare.intent_name(), None);
    }
}
