//! Language-Model Gateway
//!
//! Single entry point for model calls. Per-document analysis must come back
//! as schema-valid JSON (one corrective follow-up allowed); the narrative is
//! free text held to a word window, degrading to whatever the model returns.

use super::client::{ChatBackend, ChatMessage, ChatRequest, ChatResponse, OpenAiClient};
use super::prompts::{
    build_narrative_correction, PromptSet, ANALYSIS_SYSTEM_PROMPT, JSON_CORRECTION_PROMPT,
    NARRATIVE_SYSTEM_PROMPT,
};
use super::utils::{extract_json_object, strip_fences, word_count};
use crate::config::{
    LlmConfig, MAX_FACTS, MAX_FINDING_ITEM_CHARS, MAX_RED_FLAGS, NARRATIVE_MAX_WORDS,
    NARRATIVE_MIN_WORDS,
};
use crate::error::{ErrorKind, GatewayError, PipelineError};
use crate::pipeline::types::{Category, DocumentFinding, GatewayStats};
use serde::Deserialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub struct LanguageModelGateway {
    backend: Arc<dyn ChatBackend>,
    config: LlmConfig,
    prompts: PromptSet,
    calls: AtomicU64,
    corrections: AtomicU64,
    tokens: AtomicU64,
}

/// Finding as the model sends it, before validation
#[derive(Deserialize)]
struct RawFinding {
    doc: String,
    category: String,
    facts: Vec<String>,
    red_flags: Vec<String>,
}

impl LanguageModelGateway {
    pub fn new(backend: Arc<dyn ChatBackend>, config: LlmConfig, prompts: PromptSet) -> Self {
        Self {
            backend,
            config,
            prompts,
            calls: AtomicU64::new(0),
            corrections: AtomicU64::new(0),
            tokens: AtomicU64::new(0),
        }
    }

    /// Build a gateway backed by the HTTP client. An empty key is a fatal
    /// configuration error.
    pub fn from_config(config: LlmConfig) -> Result<Self, PipelineError> {
        if config.api_key.trim().is_empty() {
            return Err(PipelineError::MissingCredential(
                super::credentials::API_KEY_VARS.join(" or "),
            ));
        }
        let prompts = PromptSet::load(config.prompt_dir.as_deref())?;
        let client = OpenAiClient::new(&config)
            .map_err(|e| PipelineError::Configuration(e.to_string()))?;

        tracing::info!(
            "[Gateway] Model {} at {} (key {}, prompts {})",
            config.model,
            config.base_url,
            super::credentials::mask_key(&config.api_key),
            prompts.analysis.version
        );

        Ok(Self::new(Arc::new(client), config, prompts))
    }

    pub fn stats(&self) -> GatewayStats {
        GatewayStats {
            calls: self.calls.load(Ordering::Relaxed),
            corrections: self.corrections.load(Ordering::Relaxed),
            tokens: self.tokens.load(Ordering::Relaxed),
        }
    }

    /// Analyze one document into a validated finding.
    ///
    /// The returned finding's `doc` is always `filename`. Transport errors
    /// propagate as-is for the caller's retry policy; a reply that is still
    /// invalid after the corrective follow-up is `InvalidResponse`.
    pub async fn analyze_document(
        &self,
        filename: &str,
        advisory_category: Category,
        text: &str,
    ) -> Result<DocumentFinding, GatewayError> {
        let prompt = self
            .prompts
            .build_analysis_prompt(filename, advisory_category, text)
            .map_err(|e| GatewayError::new(ErrorKind::Configuration, e.to_string()))?;

        let mut messages = vec![
            ChatMessage::system(ANALYSIS_SYSTEM_PROMPT),
            ChatMessage::user(prompt),
        ];

        let first = self
            .call(self.analysis_request(&messages), self.config.analysis_timeout)
            .await?;

        let reason = match parse_finding(&first.content, filename) {
            Ok(finding) => return Ok(finding),
            Err(reason) => reason,
        };

        tracing::warn!(
            "[Gateway] Invalid analysis for {} ({}), requesting correction",
            filename,
            reason
        );
        tracing::debug!("[Gateway] Rejected reply: {}", preview(&first.content));

        messages.push(ChatMessage::assistant(first.content));
        messages.push(ChatMessage::user(JSON_CORRECTION_PROMPT));
        self.corrections.fetch_add(1, Ordering::Relaxed);

        let second = self
            .call(self.analysis_request(&messages), self.config.analysis_timeout)
            .await?;

        parse_finding(&second.content, filename).map_err(|reason| {
            GatewayError::new(
                ErrorKind::InvalidResponse,
                format!("model returned invalid analysis after correction: {}", reason),
            )
        })
    }

    /// Write the narrative summary for a set of findings.
    ///
    /// Out-of-window word counts get one corrective follow-up; after that the
    /// reply is returned regardless. Only a failed first call is an error.
    pub async fn synthesize_narrative(
        &self,
        findings: &[DocumentFinding],
    ) -> Result<String, GatewayError> {
        let prompt = self
            .prompts
            .build_narrative_prompt(findings)
            .map_err(|e| GatewayError::new(ErrorKind::Configuration, e.to_string()))?;

        let mut messages = vec![
            ChatMessage::system(NARRATIVE_SYSTEM_PROMPT),
            ChatMessage::user(prompt),
        ];

        let first = self
            .call(self.narrative_request(&messages), self.config.narrative_timeout)
            .await?;
        let summary = strip_fences(&first.content).to_string();
        let words = word_count(&summary);

        if in_word_window(words) {
            return Ok(summary);
        }

        tracing::info!(
            "[Gateway] Narrative was {} words, requesting {}-{}",
            words,
            NARRATIVE_MIN_WORDS,
            NARRATIVE_MAX_WORDS
        );

        messages.push(ChatMessage::assistant(first.content));
        messages.push(ChatMessage::user(build_narrative_correction(
            words,
            NARRATIVE_MIN_WORDS,
            NARRATIVE_MAX_WORDS,
        )));
        self.corrections.fetch_add(1, Ordering::Relaxed);

        let corrected = match self
            .call(self.narrative_request(&messages), self.config.narrative_timeout)
            .await
        {
            Ok(response) => strip_fences(&response.content).to_string(),
            Err(e) => {
                tracing::warn!(
                    "[Gateway] Narrative correction failed ({}), keeping first draft",
                    e
                );
                return Ok(summary);
            }
        };

        let corrected_words = word_count(&corrected);
        if !in_word_window(corrected_words) {
            tracing::warn!(
                "[Gateway] Narrative still {} words after correction, using it as fallback",
                corrected_words
            );
        }

        Ok(corrected)
    }

    fn analysis_request(&self, messages: &[ChatMessage]) -> ChatRequest {
        ChatRequest {
            messages: messages.to_vec(),
            temperature: 0.0,
            max_tokens: self.config.analysis_max_tokens,
            json_mode: true,
        }
    }

    fn narrative_request(&self, messages: &[ChatMessage]) -> ChatRequest {
        ChatRequest {
            messages: messages.to_vec(),
            temperature: 0.0,
            max_tokens: self.config.narrative_max_tokens,
            json_mode: false,
        }
    }

    async fn call(&self, request: ChatRequest, limit: Duration) -> Result<ChatResponse, GatewayError> {
        self.calls.fetch_add(1, Ordering::Relaxed);

        let response = tokio::time::timeout(limit, self.backend.complete(request))
            .await
            .map_err(|_| GatewayError::timeout(limit))??;

        self.tokens.fetch_add(response.total_tokens, Ordering::Relaxed);
        Ok(response)
    }
}

fn in_word_window(words: usize) -> bool {
    (NARRATIVE_MIN_WORDS..=NARRATIVE_MAX_WORDS).contains(&words)
}

/// Parse and validate a reply against the finding schema
fn parse_finding(reply: &str, filename: &str) -> Result<DocumentFinding, String> {
    let json = extract_json_object(reply).ok_or("no JSON object in reply")?;
    let raw: RawFinding =
        serde_json::from_str(json).map_err(|e| format!("JSON does not match schema: {}", e))?;

    if raw.doc.trim().is_empty() {
        return Err("empty doc".to_string());
    }
    if raw.doc.trim() != filename {
        tracing::debug!(
            "[Gateway] Model named the document {:?}, recording it as {:?}",
            raw.doc,
            filename
        );
    }

    let category = Category::parse(&raw.category)
        .ok_or_else(|| format!("unknown category {:?}", raw.category))?;

    let facts = validate_items("facts", raw.facts, 1, MAX_FACTS)?;
    let red_flags = validate_items("red_flags", raw.red_flags, 0, MAX_RED_FLAGS)?;

    Ok(DocumentFinding {
        doc: filename.to_string(),
        category,
        facts,
        red_flags,
    })
}

fn validate_items(
    field: &str,
    items: Vec<String>,
    min: usize,
    max: usize,
) -> Result<Vec<String>, String> {
    if items.len() < min || items.len() > max {
        return Err(format!(
            "{} has {} items, expected {}-{}",
            field,
            items.len(),
            min,
            max
        ));
    }

    items
        .into_iter()
        .enumerate()
        .map(|(i, item)| {
            let item = item.trim().to_string();
            if item.is_empty() {
                Err(format!("{}[{}] is empty", field, i))
            } else if item.chars().count() > MAX_FINDING_ITEM_CHARS {
                Err(format!(
                    "{}[{}] exceeds {} characters",
                    field, i, MAX_FINDING_ITEM_CHARS
                ))
            } else {
                Ok(item)
            }
        })
        .collect()
}

fn preview(text: &str) -> String {
    let head: String = text.chars().take(200).collect();
    if head.len() < text.len() {
        format!("{}...", head)
    } else {
        head
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays canned replies and records every request
    struct ScriptedBackend {
        replies: Mutex<VecDeque<Result<String, GatewayError>>>,
        requests: Mutex<Vec<ChatRequest>>,
    }

    impl ScriptedBackend {
        fn new(replies: Vec<Result<String, GatewayError>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                requests: Mutex::new(Vec::new()),
            })
        }

        fn requests(&self) -> Vec<ChatRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ChatBackend for ScriptedBackend {
        async fn complete(&self, request: ChatRequest) -> Result<ChatResponse, GatewayError> {
            self.requests.lock().unwrap().push(request);
            let reply = self
                .replies
                .lock()
                .unwrap()
                .pop_front()
                .expect("script exhausted");
            reply.map(|content| ChatResponse {
                content,
                total_tokens: 10,
            })
        }
    }

    fn gateway(backend: Arc<ScriptedBackend>) -> LanguageModelGateway {
        LanguageModelGateway::new(backend, LlmConfig::default(), PromptSet::builtin())
    }

    fn words(n: usize) -> String {
        vec!["word"; n].join(" ")
    }

    const VALID: &str = r#"{"doc":"nda.pdf","category":"legal","facts":["Mutual NDA with Acme"],"red_flags":[]}"#;

    #[tokio::test]
    async fn test_valid_analysis_needs_one_call() {
        let backend = ScriptedBackend::new(vec![Ok(VALID.to_string())]);
        let gw = gateway(backend.clone());

        let finding = gw
            .analyze_document("nda.pdf", Category::Legal, "text")
            .await
            .unwrap();

        assert_eq!(finding.category, Category::Legal);
        assert_eq!(finding.facts, vec!["Mutual NDA with Acme"]);
        let requests = backend.requests();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].json_mode);
        assert_eq!(requests[0].temperature, 0.0);
        assert_eq!(requests[0].max_tokens, 700);
        assert_eq!(gw.stats().calls, 1);
        assert_eq!(gw.stats().corrections, 0);
    }

    #[tokio::test]
    async fn test_invalid_reply_gets_one_correction_in_same_conversation() {
        let backend = ScriptedBackend::new(vec![
            Ok("Sure! Here is my analysis of the document.".to_string()),
            Ok(VALID.to_string()),
        ]);
        let gw = gateway(backend.clone());

        let finding = gw
            .analyze_document("nda.pdf", Category::Other, "text")
            .await
            .unwrap();
        assert_eq!(finding.doc, "nda.pdf");

        let requests = backend.requests();
        assert_eq!(requests.len(), 2);
        let followup = &requests[1].messages;
        assert_eq!(followup.len(), 4);
        assert_eq!(followup[2].role, "assistant");
        assert_eq!(followup[2].content, "Sure! Here is my analysis of the document.");
        assert_eq!(followup[3].content, JSON_CORRECTION_PROMPT);
        assert_eq!(gw.stats().corrections, 1);
        assert_eq!(gw.stats().tokens, 20);
    }

    #[tokio::test]
    async fn test_second_invalid_reply_fails_with_invalid_response() {
        let backend = ScriptedBackend::new(vec![
            Ok("not json".to_string()),
            Ok(r#"{"doc":"x","category":"legal","facts":[],"red_flags":[]}"#.to_string()),
        ]);
        let gw = gateway(backend.clone());

        let err = gw
            .analyze_document("x.pdf", Category::Legal, "text")
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidResponse);
        assert!(!err.effective_kind().is_retryable());
        assert_eq!(backend.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_transport_error_propagates_without_correction() {
        let backend = ScriptedBackend::new(vec![Err(GatewayError::new(
            ErrorKind::RateLimited,
            "429",
        ))]);
        let gw = gateway(backend.clone());

        let err = gw
            .analyze_document("x.pdf", Category::Legal, "text")
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::RateLimited);
        assert_eq!(gw.stats().corrections, 0);
    }

    #[test]
    fn test_schema_validation_rules() {
        let ok = parse_finding(
            r#"```json
{"doc":"a.pdf","category":"Financial","facts":[" Revenue $4M "],"red_flags":["Customer concentration"]}
```"#,
            "a.pdf",
        )
        .unwrap();
        assert_eq!(ok.category, Category::Financial);
        assert_eq!(ok.facts, vec!["Revenue $4M"]);

        let bad_category =
            r#"{"doc":"a","category":"marketing","facts":["x"],"red_flags":[]}"#;
        assert!(parse_finding(bad_category, "a").is_err());

        let too_many_facts = r#"{"doc":"a","category":"legal","facts":["1","2","3","4","5","6"],"red_flags":[]}"#;
        assert!(parse_finding(too_many_facts, "a").is_err());

        let blank_flag = r#"{"doc":"a","category":"legal","facts":["1"],"red_flags":["  "]}"#;
        assert!(parse_finding(blank_flag, "a").is_err());

        let empty_doc = r#"{"doc":" ","category":"legal","facts":["1"],"red_flags":[]}"#;
        assert!(parse_finding(empty_doc, "a").is_err());

        let long_fact = format!(
            r#"{{"doc":"a","category":"legal","facts":["{}"],"red_flags":[]}}"#,
            "x".repeat(301)
        );
        assert!(parse_finding(&long_fact, "a").is_err());

        let missing_flags = r#"{"doc":"a","category":"legal","facts":["1"]}"#;
        assert!(parse_finding(missing_flags, "a").is_err());
    }

    #[test]
    fn test_finding_doc_is_archive_filename() {
        let finding = parse_finding(
            r#"{"doc":"Non-disclosure agreement","category":"legal","facts":["1"],"red_flags":[]}"#,
            "nda.pdf",
        )
        .unwrap();
        assert_eq!(finding.doc, "nda.pdf");
    }

    #[tokio::test]
    async fn test_narrative_in_window_returns_directly() {
        let backend = ScriptedBackend::new(vec![Ok(words(350))]);
        let gw = gateway(backend.clone());

        let summary = gw.synthesize_narrative(&[]).await.unwrap();
        assert_eq!(word_count(&summary), 350);
        let requests = backend.requests();
        assert_eq!(requests.len(), 1);
        assert!(!requests[0].json_mode);
    }

    #[tokio::test]
    async fn test_narrative_out_of_window_is_corrected_once() {
        let backend = ScriptedBackend::new(vec![Ok(words(120)), Ok(words(320))]);
        let gw = gateway(backend.clone());

        let summary = gw.synthesize_narrative(&[]).await.unwrap();
        assert_eq!(word_count(&summary), 320);
        let requests = backend.requests();
        assert_eq!(requests.len(), 2);
        assert!(requests[1].messages[3].content.contains("120 words"));
    }

    #[tokio::test]
    async fn test_narrative_still_out_of_window_is_returned_anyway() {
        let backend = ScriptedBackend::new(vec![Ok(words(50)), Ok(words(600))]);
        let gw = gateway(backend.clone());

        let summary = gw.synthesize_narrative(&[]).await.unwrap();
        assert_eq!(word_count(&summary), 600);
        assert_eq!(backend.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_narrative_failed_correction_keeps_first_draft() {
        let backend = ScriptedBackend::new(vec![
            Ok(words(50)),
            Err(GatewayError::new(ErrorKind::Unavailable, "503")),
        ]);
        let gw = gateway(backend);

        let summary = gw.synthesize_narrative(&[]).await.unwrap();
        assert_eq!(word_count(&summary), 50);
    }

    #[tokio::test]
    async fn test_call_timeout_is_tagged() {
        struct SlowBackend;

        #[async_trait]
        impl ChatBackend for SlowBackend {
            async fn complete(&self, _request: ChatRequest) -> Result<ChatResponse, GatewayError> {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(ChatResponse::default())
            }
        }

        let config = LlmConfig {
            analysis_timeout: Duration::from_millis(20),
            ..LlmConfig::default()
        };
        let gw = LanguageModelGateway::new(Arc::new(SlowBackend), config, PromptSet::builtin());

        let err = gw
            .analyze_document("slow.pdf", Category::Other, "text")
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Timeout);
        assert!(err.effective_kind().is_retryable());
    }

    #[test]
    fn test_from_config_requires_key() {
        let err = LanguageModelGateway::from_config(LlmConfig::default()).err().unwrap();
        assert!(matches!(err, PipelineError::MissingCredential(_)));
    }
}
