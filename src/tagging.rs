//! Semantic tag enrichment.
//!
//! A [`Tagger`] asks a language model four questions about an entity and
//! returns a small category map:
//!
//! | Key | Question |
//! |-----|----------|
//! | `generic_name` | What kind of software or device is this? |
//! | `problem_solved` | What problem does it solve? |
//! | `infrastructure_role` | What role does it play in the infrastructure? |
//! | `system_component` | Which larger system is it a component of? |
//!
//! # Providers
//!
//! - **[`DisabledTagger`]**: always fails; used when tagging is off.
//! - **[`HttpTagger`]**: an OpenAI-compatible chat endpoint or an Ollama
//!   generate endpoint, with exponential backoff on 429, 5xx and network
//!   errors (1s, 2s, 4s, ... capped at 32s).
//!
//! # Concurrency
//!
//! [`enrich_documents`] is the only concurrent step of a run. At most
//! `max_workers` requests are in flight; each worker returns its result
//! with the document's position, and the calling task applies every
//! result itself. A failed request leaves its document untagged.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use infradoc_core::models::EntityDocument;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::config::TaggingConfig;
use crate::progress::{ProgressEvent, ProgressReporter};

/// Category keys requested from the model, in prompt order.
pub const TAG_KEYS: &[&str] = &[
    "generic_name",
    "problem_solved",
    "infrastructure_role",
    "system_component",
];

const DEFAULT_OPENAI_URL: &str = "https://api.openai.com/v1";
const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";

/// Content longer than this is truncated before it goes into the prompt.
const MAX_PROMPT_CONTENT: usize = 4000;

#[derive(Debug, Clone, Serialize)]
pub struct TagRequest {
    pub entity_id: String,
    pub entity_type: String,
    pub content: String,
    pub context: Value,
}

impl TagRequest {
    pub fn for_document(doc: &EntityDocument) -> Self {
        Self {
            entity_id: doc.id.clone(),
            entity_type: doc.doc_type.clone(),
            content: doc.content.clone(),
            context: json!({
                "title": doc.title,
                "system_name": doc.owning_system(),
            }),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TagResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TagResponse {
    pub fn ok(tags: BTreeMap<String, String>) -> Self {
        Self {
            success: true,
            tags: Some(tags),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            tags: None,
            error: Some(error.into()),
        }
    }
}

/// Generates semantic tags for one entity.
///
/// Implementations never return an error: failures are reported through
/// [`TagResponse::error`] so that one entity cannot abort a run.
#[async_trait]
pub trait Tagger: Send + Sync {
    fn name(&self) -> &str;

    async fn tag(&self, request: &TagRequest) -> TagResponse;
}

/// Tagger used when tagging is disabled.
pub struct DisabledTagger;

#[async_trait]
impl Tagger for DisabledTagger {
    fn name(&self) -> &str {
        "disabled"
    }

    async fn tag(&self, _request: &TagRequest) -> TagResponse {
        TagResponse::failed("tagging is disabled")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flavor {
    OpenAi,
    Ollama,
}

/// Tagger backed by an HTTP language model endpoint.
pub struct HttpTagger {
    client: reqwest::Client,
    flavor: Flavor,
    base_url: String,
    model: String,
    api_key: Option<String>,
    max_retries: u32,
}

impl HttpTagger {
    /// OpenAI-compatible chat completions. Reads `OPENAI_API_KEY`; the key
    /// is required only for the default OpenAI endpoint.
    pub fn openai(config: &TaggingConfig) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY").ok();
        if config.url.is_none() && api_key.is_none() {
            bail!("OPENAI_API_KEY not set");
        }
        Self::new(config, Flavor::OpenAi, DEFAULT_OPENAI_URL, api_key)
    }

    pub fn ollama(config: &TaggingConfig) -> Result<Self> {
        Self::new(config, Flavor::Ollama, DEFAULT_OLLAMA_URL, None)
    }

    fn new(
        config: &TaggingConfig,
        flavor: Flavor,
        default_url: &str,
        api_key: Option<String>,
    ) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow!("tagging.model required"))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            flavor,
            base_url: config
                .url
                .clone()
                .unwrap_or_else(|| default_url.to_string())
                .trim_end_matches('/')
                .to_string(),
            model,
            api_key,
            max_retries: config.max_retries,
        })
    }

    fn request_body(&self, prompt: &str) -> (String, Value) {
        match self.flavor {
            Flavor::OpenAi => (
                format!("{}/chat/completions", self.base_url),
                json!({
                    "model": self.model,
                    "temperature": 0,
                    "messages": [
                        {"role": "system", "content": "You classify infrastructure components. Reply with a single JSON object."},
                        {"role": "user", "content": prompt}
                    ]
                }),
            ),
            Flavor::Ollama => (
                format!("{}/api/generate", self.base_url),
                json!({
                    "model": self.model,
                    "prompt": prompt,
                    "stream": false,
                    "format": "json"
                }),
            ),
        }
    }

    fn completion_text(&self, body: &Value) -> Result<String> {
        let text = match self.flavor {
            Flavor::OpenAi => body
                .pointer("/choices/0/message/content")
                .and_then(Value::as_str),
            Flavor::Ollama => body.get("response").and_then(Value::as_str),
        };
        text.map(str::to_string)
            .ok_or_else(|| anyhow!("Invalid {} response: missing completion text", self.name()))
    }

    /// Send one prompt with retry/backoff.
    ///
    /// - HTTP 429 or 5xx → retry with exponential backoff
    /// - HTTP 4xx (not 429) → fail immediately
    /// - Network error → retry
    async fn complete(&self, prompt: &str) -> Result<String> {
        let (url, body) = self.request_body(prompt);
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let mut req = self.client.post(&url).json(&body);
            if let Some(key) = &self.api_key {
                req = req.header("Authorization", format!("Bearer {}", key));
            }

            match req.send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        let json: Value = response.json().await?;
                        return self.completion_text(&json);
                    }
                    let body_text = response.text().await.unwrap_or_default();
                    if status.as_u16() == 429 || status.is_server_error() {
                        last_err = Some(anyhow!("{} API error {}: {}", self.name(), status, body_text));
                        continue;
                    }
                    bail!("{} API error {}: {}", self.name(), status, body_text);
                }
                Err(e) => {
                    last_err = Some(e.into());
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow!("Tagging failed after retries")))
    }
}

#[async_trait]
impl Tagger for HttpTagger {
    fn name(&self) -> &str {
        match self.flavor {
            Flavor::OpenAi => "openai",
            Flavor::Ollama => "ollama",
        }
    }

    async fn tag(&self, request: &TagRequest) -> TagResponse {
        let prompt = build_prompt(request);
        match self.complete(&prompt).await {
            Ok(text) => match parse_tags(&text) {
                Some(tags) => TagResponse::ok(tags),
                None => TagResponse::failed("model reply contained no tags"),
            },
            Err(e) => TagResponse::failed(format!("{:#}", e)),
        }
    }
}

/// Create the [`Tagger`] selected by `config.provider`.
pub fn create_tagger(config: &TaggingConfig) -> Result<Arc<dyn Tagger>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledTagger)),
        "openai" => Ok(Arc::new(HttpTagger::openai(config)?)),
        "ollama" => Ok(Arc::new(HttpTagger::ollama(config)?)),
        other => bail!("Unknown tagging provider: {}", other),
    }
}

pub fn build_prompt(request: &TagRequest) -> String {
    let content: String = request.content.chars().take(MAX_PROMPT_CONTENT).collect();
    let context = match &request.context {
        Value::Null => String::new(),
        other => format!("\nContext: {}", other),
    };
    format!(
        "Entity type: {}\nEntity id: {}{}\n\nDescription:\n{}\n\n\
         Answer four questions about this entity in a few words each:\n\
         1. generic_name: what kind of software or device is it?\n\
         2. problem_solved: what problem does it solve?\n\
         3. infrastructure_role: what role does it play in the infrastructure?\n\
         4. system_component: which larger system is it part of?\n\n\
         Reply only with JSON: {{\"generic_name\": \"...\", \"problem_solved\": \"...\", \
         \"infrastructure_role\": \"...\", \"system_component\": \"...\"}}",
        request.entity_type, request.entity_id, context, content
    )
}

/// Extract the tag map from a model reply.
///
/// Tries the outermost `{...}` as JSON first, then `key: value` lines.
/// Only [`TAG_KEYS`] are kept; values are trimmed and lower-cased.
pub fn parse_tags(reply: &str) -> Option<BTreeMap<String, String>> {
    let mut tags = BTreeMap::new();

    let json_obj = match (reply.find('{'), reply.rfind('}')) {
        (Some(start), Some(end)) if start < end => {
            serde_json::from_str::<serde_json::Map<String, Value>>(&reply[start..=end]).ok()
        }
        _ => None,
    };

    if let Some(obj) = json_obj {
        for key in TAG_KEYS {
            if let Some(value) = obj.get(*key).and_then(Value::as_str) {
                insert_tag(&mut tags, key, value);
            }
        }
    } else {
        for line in reply.lines() {
            let line = line.trim().trim_start_matches(|c: char| c.is_ascii_digit() || c == '.' || c == '-' || c == '*');
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let key = key.trim().trim_matches('"').to_lowercase();
            if let Some(known) = TAG_KEYS.iter().find(|k| **k == key) {
                insert_tag(&mut tags, known, value.trim().trim_matches(|c: char| c == '"' || c == ','));
            }
        }
    }

    (!tags.is_empty()).then_some(tags)
}

fn insert_tag(tags: &mut BTreeMap<String, String>, key: &str, value: &str) {
    let value = value.trim().to_lowercase();
    if !value.is_empty() {
        tags.insert(key.to_string(), value);
    }
}

/// Apply a successful tag map to a document: values become tags and the
/// map is stored under `details.semantic_tags`.
pub fn apply_tags(doc: &mut EntityDocument, tags: &BTreeMap<String, String>) {
    doc.add_tags(tags.values().map(|v| v.replace(' ', "-")));
    let semantic = json!(tags);
    match &mut doc.details {
        Some(Value::Object(map)) => {
            map.insert("semantic_tags".to_string(), semantic);
        }
        None | Some(Value::Null) => doc.details = Some(json!({ "semantic_tags": semantic })),
        Some(_) => {
            tracing::debug!(id = %doc.id, "details is not an object, semantic_tags not stored");
        }
    }
}

/// Outcome of a tagging pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagSummary {
    pub requested: usize,
    pub tagged: usize,
    pub failed: usize,
}

/// Tag every document accepted by `config.applies_to`, at most
/// `config.max_workers` at a time.
pub async fn enrich_documents(
    tagger: Arc<dyn Tagger>,
    documents: &mut [EntityDocument],
    config: &TaggingConfig,
    progress: &dyn ProgressReporter,
) -> TagSummary {
    let semaphore = Arc::new(Semaphore::new(config.max_workers.max(1)));
    let mut tasks = JoinSet::new();

    for (index, doc) in documents.iter().enumerate() {
        if !config.applies_to(&doc.doc_type) {
            continue;
        }
        let request = TagRequest::for_document(doc);
        let tagger = tagger.clone();
        let semaphore = semaphore.clone();
        tasks.spawn(async move {
            let response = match semaphore.acquire_owned().await {
                Ok(_permit) => tagger.tag(&request).await,
                Err(_) => TagResponse::failed("tagging pool closed"),
            };
            (index, response)
        });
    }

    let mut summary = TagSummary {
        requested: tasks.len(),
        ..TagSummary::default()
    };
    let total = summary.requested as u64;
    let mut done = 0u64;

    while let Some(joined) = tasks.join_next().await {
        done += 1;
        progress.report(ProgressEvent::Tagging { n: done, total });
        let (index, response) = match joined {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!(error = %e, "tagging worker failed");
                summary.failed += 1;
                continue;
            }
        };
        let doc = &mut documents[index];
        match response.tags.filter(|_| response.success) {
            Some(tags) => {
                apply_tags(doc, &tags);
                summary.tagged += 1;
            }
            None => {
                tracing::warn!(
                    id = %doc.id,
                    error = response.error.as_deref().unwrap_or("no tags"),
                    "tagging failed, leaving document untagged"
                );
                summary.failed += 1;
            }
        }
    }

    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::NoProgress;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn parses_json_reply_inside_prose() {
        let reply = "Sure! {\"generic_name\": \"Reverse Proxy\", \"problem_solved\": \"TLS termination\", \
                     \"infrastructure_role\": \"Edge\", \"system_component\": \"Web\", \"extra\": \"x\"} Done.";
        let tags = parse_tags(reply).unwrap();
        assert_eq!(tags.len(), 4);
        assert_eq!(tags["generic_name"], "reverse proxy");
        assert!(!tags.contains_key("extra"));
    }

    #[test]
    fn falls_back_to_key_value_lines() {
        let reply = "1. generic_name: Database\n2. problem_solved: \"persistent storage\"\nnoise line\n";
        let tags = parse_tags(reply).unwrap();
        assert_eq!(tags["generic_name"], "database");
        assert_eq!(tags["problem_solved"], "persistent storage");
        assert!(parse_tags("nothing useful").is_none());
    }

    #[test]
    fn prompt_mentions_all_questions() {
        let doc = EntityDocument::new("container_h_nginx", "container", "nginx", "Docker container 'nginx'");
        let prompt = build_prompt(&TagRequest::for_document(&doc));
        for key in TAG_KEYS {
            assert!(prompt.contains(key));
        }
        assert!(prompt.contains("container_h_nginx"));
    }

    #[test]
    fn apply_tags_merges_into_details() {
        let mut doc = EntityDocument::new("a", "container", "t", "c");
        doc.details = Some(json!({"labels": {}}));
        let tags = BTreeMap::from([("generic_name".to_string(), "media server".to_string())]);
        apply_tags(&mut doc, &tags);
        assert!(doc.tags.contains("media-server"));
        assert_eq!(
            doc.details.as_ref().unwrap()["semantic_tags"]["generic_name"],
            json!("media server")
        );
    }

    struct CountingTagger {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl Tagger for CountingTagger {
        fn name(&self) -> &str {
            "counting"
        }

        async fn tag(&self, request: &TagRequest) -> TagResponse {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            if request.entity_id.ends_with("bad") {
                TagResponse::failed("boom")
            } else {
                TagResponse::ok(BTreeMap::from([(
                    "generic_name".to_string(),
                    request.entity_id.clone(),
                )]))
            }
        }
    }

    #[tokio::test]
    async fn pool_is_bounded_and_failures_are_isolated() {
        let tagger = Arc::new(CountingTagger {
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let mut docs: Vec<EntityDocument> = (0..8)
            .map(|i| EntityDocument::new(format!("doc{}", i), "container", "t", "c"))
            .collect();
        docs.push(EntityDocument::new("doc_bad", "container", "t", "c"));
        docs.push(EntityDocument::new("host", "server", "t", "c"));

        let config = TaggingConfig {
            provider: "test".into(),
            max_workers: 2,
            entity_types: vec!["container".into()],
            ..TaggingConfig::default()
        };
        let summary = enrich_documents(tagger.clone(), &mut docs, &config, &NoProgress).await;

        assert_eq!(summary, TagSummary { requested: 9, tagged: 8, failed: 1 });
        assert!(tagger.peak.load(Ordering::SeqCst) <= 2);
        assert!(docs[0].tags.contains("doc0"));
        assert!(docs[8].tags.is_empty());
        assert!(docs[9].details.is_none());
    }

    #[tokio::test]
    async fn disabled_tagger_reports_failure() {
        let response = DisabledTagger
            .tag(&TagRequest::for_document(&EntityDocument::new("x", "t", "t", "c")))
            .await;
        assert!(!response.success);
        assert!(response.error.is_some());
    }
}
