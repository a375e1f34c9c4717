//! Prompt assembly and answer composition

use super::{GenerationError, GenerationParams, TextGenerator};
use crate::config::GenerationConfig;
use crate::retrieval::RetrievedDocument;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

/// Prompt sent to the generation service; `{context}` and `{question}` are
/// substituted
pub const PROMPT_TEMPLATE: &str = "The following is a friendly conversation between a human and an AI. \
The AI is talkative and provides lots of specific details from its context. \
If the AI does not know the answer to a question, it truthfully says it does not know. \
{context} Instruction: Based on the above documents, summarize the following statement, \
{question} Answer \"don't know\" if not present in the document. Solution:";

/// Answer to one query
#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub text: String,
    pub source_documents: Vec<RetrievedDocument>,
    /// Whether `text` came from the generation service
    pub generated: bool,
}

/// Builds answers from retrieved documents
pub struct AnswerComposer {
    generator: Option<Arc<dyn TextGenerator>>,
    params: GenerationParams,
    max_context_chars: usize,
    fallback_chars: usize,
}

impl AnswerComposer {
    /// Create a composer; without a generator every answer is extractive
    pub fn new(config: &GenerationConfig, generator: Option<Arc<dyn TextGenerator>>) -> Self {
        Self {
            generator,
            params: config.parameters.clone(),
            max_context_chars: config.max_context_chars,
            fallback_chars: config.fallback_chars,
        }
    }

    pub fn with_params(mut self, params: GenerationParams) -> Self {
        self.params = params;
        self
    }

    /// Compose an answer for `query` from `documents`
    ///
    /// Parameters are validated first; an invalid parameter is the only
    /// error. Generation failures fall back to an extractive summary.
    pub async fn compose(
        &self,
        query: &str,
        documents: Vec<RetrievedDocument>,
    ) -> Result<Answer, GenerationError> {
        self.params.validate()?;

        if documents.is_empty() {
            return Ok(Answer {
                text: format!("No relevant documents found for '{}'.", query),
                source_documents: documents,
                generated: false,
            });
        }

        let context = self.build_context(&documents);

        if let Some(generator) = &self.generator {
            let prompt = build_prompt(&context, query);
            debug!("Prompt is {} characters", prompt.chars().count());

            match generator.generate(&prompt, &self.params).await {
                Ok(texts) => {
                    let first = texts
                        .into_iter()
                        .map(|t| t.trim().to_string())
                        .find(|t| !t.is_empty());
                    if let Some(text) = first {
                        return Ok(Answer {
                            text,
                            source_documents: documents,
                            generated: true,
                        });
                    }
                    warn!("Generation returned only empty texts, using extractive summary");
                }
                Err(e @ GenerationError::InvalidParameter { .. }) => return Err(e),
                Err(e) => warn!("Generation failed, using extractive summary: {}", e),
            }
        }

        Ok(self.extractive(query, &context, documents))
    }

    /// Document texts joined by newlines, cut to the context budget
    fn build_context(&self, documents: &[RetrievedDocument]) -> String {
        let joined = documents
            .iter()
            .map(|d| d.text.as_str())
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join("\n");
        truncate_chars(&joined, self.max_context_chars)
    }

    fn extractive(&self, query: &str, context: &str, documents: Vec<RetrievedDocument>) -> Answer {
        Answer {
            text: format!(
                "Based on the retrieved documents about '{}': {}...",
                query,
                truncate_chars(context, self.fallback_chars)
            ),
            source_documents: documents,
            generated: false,
        }
    }
}

/// Fill the prompt template
///
/// Placeholders are substituted in one pass, so braces inside the
/// retrieved context or the question are copied through untouched.
pub fn build_prompt(context: &str, question: &str) -> String {
    let mut prompt = String::with_capacity(PROMPT_TEMPLATE.len() + context.len() + question.len());
    let mut rest = PROMPT_TEMPLATE;

    while let Some(start) = rest.find('{') {
        prompt.push_str(&rest[..start]);
        let tail = &rest[start..];
        if let Some(after) = tail.strip_prefix("{context}") {
            prompt.push_str(context);
            rest = after;
        } else if let Some(after) = tail.strip_prefix("{question}") {
            prompt.push_str(question);
            rest = after;
        } else {
            prompt.push('{');
            rest = &tail[1..];
        }
    }
    prompt.push_str(rest);
    prompt
}

fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::generation::EndpointGenerator;
    use crate::retrieval::SearchTier;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct FakeGenerator {
        calls: AtomicUsize,
        reply: Result<Vec<String>, String>,
        prompts: Mutex<Vec<String>>,
    }

    impl FakeGenerator {
        fn replying(texts: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                reply: Ok(texts.iter().map(|t| t.to_string()).collect()),
                prompts: Mutex::new(Vec::new()),
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                reply: Err("connection refused".to_string()),
                prompts: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl TextGenerator for FakeGenerator {
        async fn generate(
            &self,
            prompt: &str,
            _params: &GenerationParams,
        ) -> Result<Vec<String>, GenerationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.prompts.lock().unwrap().push(prompt.to_string());
            self.reply
                .clone()
                .map_err(GenerationError::Connectivity)
        }
    }

    fn document(title: &str, text: &str) -> RetrievedDocument {
        RetrievedDocument {
            id: title.to_string(),
            text: text.to_string(),
            title: title.to_string(),
            score: 1.0,
            source_tier: SearchTier::Keyword,
            year: None,
            genres: Vec::new(),
            cast: Vec::new(),
        }
    }

    fn composer(generator: Option<Arc<FakeGenerator>>) -> AnswerComposer {
        let generator = generator.map(|g| g as Arc<dyn TextGenerator>);
        AnswerComposer::new(&Config::default().generation, generator)
    }

    #[test]
    fn test_prompt_placeholders_in_context_are_literal() {
        let context = "A poster reads {question} in neon.";
        let prompt = build_prompt(context, "Who robs the rich?");

        assert!(prompt.contains("A poster reads {question} in neon."));
        assert_eq!(prompt.matches("Who robs the rich?").count(), 1);
        assert!(prompt.contains("summarize the following statement, Who robs the rich?"));
        assert!(!prompt.contains("{context}"));
    }

    #[tokio::test]
    async fn test_generated_answer() {
        let generator = FakeGenerator::replying(&["  ", "Robin Hood robs the rich. "]);
        let answer = composer(Some(generator.clone()))
            .compose(
                "Who robs the rich?",
                vec![document("Robin Hood", "An outlaw robs the rich.")],
            )
            .await
            .unwrap();

        assert!(answer.generated);
        assert_eq!(answer.text, "Robin Hood robs the rich.");
        assert_eq!(answer.source_documents.len(), 1);

        let prompts = generator.prompts.lock().unwrap();
        assert!(prompts[0].contains("An outlaw robs the rich. Instruction:"));
        assert!(prompts[0].contains("statement, Who robs the rich? Answer"));
    }

    #[tokio::test]
    async fn test_generation_failure_falls_back() {
        let generator = FakeGenerator::failing();
        let answer = composer(Some(generator.clone()))
            .compose("heroic outlaw", vec![document("Robin Hood", "An outlaw.")])
            .await
            .unwrap();

        assert!(!answer.generated);
        assert_eq!(
            answer.text,
            "Based on the retrieved documents about 'heroic outlaw': An outlaw...."
        );
        assert_eq!(generator.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_falls_back() {
        let generator: Arc<dyn TextGenerator> =
            Arc::new(EndpointGenerator::new("http://127.0.0.1:1/generate", None).unwrap());
        let composer = AnswerComposer::new(&Config::default().generation, Some(generator));

        let answer = composer
            .compose("train chase", vec![document("The General", "A locomotive.")])
            .await
            .unwrap();
        assert!(answer.text.contains("train chase"));
    }

    #[tokio::test]
    async fn test_invalid_parameter_before_call() {
        let generator = FakeGenerator::replying(&["unused"]);
        let params = GenerationParams {
            top_p: 1.5,
            ..Default::default()
        };

        let result = composer(Some(generator.clone()))
            .with_params(params)
            .compose("q", vec![document("A", "text")])
            .await;

        assert!(matches!(
            result,
            Err(GenerationError::InvalidParameter { .. })
        ));
        assert_eq!(generator.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_no_documents() {
        let generator = FakeGenerator::replying(&["unused"]);
        let answer = composer(Some(generator.clone()))
            .compose("xylophone", Vec::new())
            .await
            .unwrap();

        assert_eq!(answer.text, "No relevant documents found for 'xylophone'.");
        assert_eq!(generator.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_context_budgets() {
        let mut config = Config::default().generation;
        config.max_context_chars = 12;
        config.fallback_chars = 5;
        let composer = AnswerComposer::new(&config, None);

        let docs = vec![document("A", "ééééé"), document("B", "second text")];
        assert_eq!(composer.build_context(&docs), "ééééé\nsecond");

        let answer = composer.compose("q", docs).await.unwrap();
        assert_eq!(answer.text, "Based on the retrieved documents about 'q': ééééé...");
    }
}
