//! Test doubles shared by the drill-down unit tests.

use std::sync::Mutex;

use async_trait::async_trait;

use insight_cascade_core::Record;
use insight_cascade_llm::{
    LlmProvider, LlmRequestOptions, LlmResponse, LlmResult, Message, ProviderConfig, UsageStats,
};
use insight_cascade_tools::{QueryEngine, QueryError};

type Reply = Box<dyn Fn(&str) -> LlmResult<String> + Send + Sync>;

/// Provider answering every prompt through a closure.
pub struct FnProvider {
    config: ProviderConfig,
    reply: Reply,
    prompts: Mutex<Vec<String>>,
}

impl FnProvider {
    pub fn new(reply: impl Fn(&str) -> LlmResult<String> + Send + Sync + 'static) -> Self {
        Self {
            config: ProviderConfig::default(),
            reply: Box::new(reply),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl LlmProvider for FnProvider {
    fn name(&self) -> &'static str {
        "fn"
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    async fn send_message(
        &self,
        messages: Vec<Message>,
        _system: Option<String>,
        _request_options: LlmRequestOptions,
    ) -> LlmResult<LlmResponse> {
        let prompt = messages
            .into_iter()
            .map(|m| m.content)
            .collect::<Vec<_>>()
            .join("\n");
        self.prompts.lock().unwrap().push(prompt.clone());
        let content = (self.reply)(&prompt)?;
        Ok(LlmResponse {
            content: Some(content),
            usage: UsageStats::default(),
            model: self.config.model.clone(),
        })
    }

    fn config(&self) -> &ProviderConfig {
        &self.config
    }
}

type Answer = Box<dyn Fn(&str) -> Result<Vec<Record>, QueryError> + Send + Sync>;

/// Engine answering every query through a closure.
pub struct FnEngine {
    answer: Answer,
    queries: Mutex<Vec<String>>,
}

impl FnEngine {
    pub fn new(
        answer: impl Fn(&str) -> Result<Vec<Record>, QueryError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            answer: Box::new(answer),
            queries: Mutex::new(Vec::new()),
        }
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait]
impl QueryEngine for FnEngine {
    fn name(&self) -> &'static str {
        "fn"
    }

    async fn execute(&self, query: &str) -> Result<Vec<Record>, QueryError> {
        self.queries.lock().unwrap().push(query.to_string());
        (self.answer)(query)
    }
}

/// Build a record from a JSON object literal.
pub fn record(value: serde_json::Value) -> Record {
    match value {
        serde_json::Value::Object(map) => map,
        other => panic!("expected a JSON object, got {other}"),
    }
}
